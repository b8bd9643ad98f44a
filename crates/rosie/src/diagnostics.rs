//! Diagnostics marshaling.
//!
//! The runtime module reports compile, load, import and trace problems as a
//! Lua array of records. Crossing the boundary they become one JSON buffer,
//! with an empty collection becoming no buffer at all.

use luars::{LuaValue, LuaVM};
use serde::{Deserialize, Serialize};

use crate::buffer::OwnedBuffer;
use crate::error::{Result, RosieError};
use crate::runtime::{self, LuaAnyRef, LuaFunctionRef, value_bytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One record of a marshaled diagnostics buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The runtime component that produced the record (`compiler`, `loader`, ...).
    pub who: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Parses a diagnostics buffer produced by any engine operation.
pub fn parse(buffer: &[u8]) -> serde_json::Result<Vec<Diagnostic>> {
    serde_json::from_slice(buffer)
}

/// One entry of the `config` report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub name: String,
    pub value: String,
    pub description: String,
}

pub fn parse_config(buffer: &[u8]) -> serde_json::Result<Vec<ConfigEntry>> {
    serde_json::from_slice(buffer)
}

/// True for nil and for tables without any entries.
pub(crate) fn is_empty(value: &LuaValue) -> bool {
    if value.is_nil() {
        return true;
    }
    match value.as_table() {
        Some(table) => table.len() == 0 && table.iter_all().is_empty(),
        None => false,
    }
}

/// Serializes `diagnostics` with the engine's JSON encoder.
pub(crate) fn marshal(
    vm: &mut LuaVM,
    encoder: &LuaFunctionRef,
    diagnostics: &LuaAnyRef,
) -> Result<Option<OwnedBuffer>> {
    let diagnostics = diagnostics.to_value();
    if is_empty(&diagnostics) {
        return Ok(None);
    }
    let results = runtime::call_function(vm, encoder, "json.encode", &[diagnostics])?;
    match results.as_slice() {
        [encoded] => {
            let encoded = encoded.to_value();
            value_bytes(&encoded)
                .map(|bytes| Some(OwnedBuffer::from(bytes)))
                .ok_or_else(|| {
                    RosieError::contract(
                        "json.encode",
                        format!("expected a string, got {}", encoded.type_name()),
                    )
                })
        }
        other => Err(RosieError::contract(
            "json.encode",
            format!("expected exactly one string, got {} values", other.len()),
        )),
    }
}

/// Removes internal fields before diagnostics leave the engine.
pub(crate) fn strip(
    vm: &mut LuaVM,
    stripper: &LuaFunctionRef,
    diagnostics: LuaAnyRef,
) -> Result<LuaAnyRef> {
    if is_empty(&diagnostics.to_value()) {
        return Ok(diagnostics);
    }
    let mut results =
        runtime::call_function(vm, stripper, "strip_diagnostics", &[diagnostics.to_value()])?;
    match results.pop() {
        Some(stripped) if results.is_empty() && stripped.to_value().is_table() => Ok(stripped),
        popped => Err(RosieError::contract(
            "strip_diagnostics",
            format!(
                "expected one table, got {} values",
                results.len() + usize::from(popped.is_some())
            ),
        )),
    }
}
