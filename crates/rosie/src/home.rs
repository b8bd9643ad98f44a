//! Process-wide location of the runtime assets.
//!
//! The asset root is resolved the first time any engine is created and is
//! read-only afterwards. Concurrent first calls race on a [`OnceLock`], so
//! exactly one resolution result (success or failure) is kept for the life
//! of the process.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::debug;

use crate::error::{Result, RosieError};

/// Overrides the compiled-in asset root.
pub const HOME_ENV: &str = "ROSIE_HOME";
/// Overrides the default import search path (`<home>/rpl`).
pub const LIBPATH_ENV: &str = "ROSIE_LIBPATH";

const DEFAULT_HOME: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/assets");
const BOOT_SCRIPT: &str = "lib/boot.lua";
const STANDARD_LIBRARY: &str = "rpl";

#[derive(Debug)]
pub struct RosieHome {
    root: String,
    boot_script: PathBuf,
    default_libpath: String,
}

impl RosieHome {
    /// Canonical asset root, as handed to the bootstrap script.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn boot_script(&self) -> &Path {
        &self.boot_script
    }

    pub fn default_libpath(&self) -> &str {
        &self.default_libpath
    }
}

static HOME: OnceLock<std::result::Result<RosieHome, String>> = OnceLock::new();

/// Returns the process-wide asset location, resolving it on first use.
pub fn rosie_home() -> Result<&'static RosieHome> {
    HOME.get_or_init(resolve)
        .as_ref()
        .map_err(|msg| RosieError::Home(msg.clone()))
}

fn resolve() -> std::result::Result<RosieHome, String> {
    let candidate = match std::env::var_os(HOME_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_HOME),
    };
    let root = candidate
        .canonicalize()
        .map_err(|e| format!("{}: {e}", candidate.display()))?;
    let boot_script = root.join(BOOT_SCRIPT);
    if !boot_script.is_file() {
        return Err(format!("{} is not a file", boot_script.display()));
    }
    let root_str = root
        .to_str()
        .ok_or_else(|| format!("{} is not valid UTF-8", root.display()))?
        .to_string();
    let default_libpath = match std::env::var(LIBPATH_ENV) {
        Ok(path) if !path.is_empty() => path,
        _ => root.join(STANDARD_LIBRARY).display().to_string(),
    };

    debug!(home = %root_str, libpath = %default_libpath, "resolved rosie home");
    Ok(RosieHome {
        root: root_str,
        boot_script,
        default_libpath,
    })
}
