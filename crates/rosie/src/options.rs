use luars::SafeOption;

use crate::governor::INITIAL_ALLOC_LIMIT_MB;

/// Per-engine settings. Process-wide settings (the asset root) live in
/// [`crate::home`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum Lua call depth inside the runtime module.
    pub max_call_depth: usize,
    pub max_stack_size: usize,
    /// Allocation ceiling installed at creation, in megabytes above the
    /// post-boot baseline. `0` means unlimited.
    pub alloc_limit_mb: u32,
    /// Import search path; `None` keeps the runtime's default.
    pub libpath: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        let safe = SafeOption::default();
        Self {
            max_call_depth: safe.max_call_depth,
            max_stack_size: safe.max_stack_size,
            alloc_limit_mb: INITIAL_ALLOC_LIMIT_MB,
            libpath: None,
        }
    }
}

impl EngineOptions {
    pub fn with_alloc_limit(mut self, megabytes: u32) -> Self {
        self.alloc_limit_mb = megabytes;
        self
    }

    pub fn with_libpath(mut self, libpath: impl Into<String>) -> Self {
        self.libpath = Some(libpath.into());
        self
    }

    pub(crate) fn safe_option(&self) -> SafeOption {
        SafeOption {
            max_stack_size: self.max_stack_size,
            max_call_depth: self.max_call_depth,
            ..SafeOption::default()
        }
    }
}
