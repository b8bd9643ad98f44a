// Allocation governor
// Keeps the runtime's heap under a ceiling expressed as megabytes above the
// usage measured when the limit was set. Exceeding it forces a synchronous full
// collection before the next match, trace or matchfile.

use luars::LuaVM;
use tracing::{debug, trace};

use crate::error::{Result, RosieError};
use crate::runtime::{self, LuaAnyRef, LuaFunctionRef};

/// Smallest non-zero limit accepted by `set_alloc_limit`.
pub const MIN_ALLOC_LIMIT_MB: u32 = 8;
/// Limit installed at engine creation. Zero means unlimited.
pub const INITIAL_ALLOC_LIMIT_MB: u32 = 0;

/// The two allocation slots: what the caller asked for and the absolute
/// ceiling derived from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AllocLimit {
    pub set_mb: u32,
    /// Absolute ceiling in KB; zero when unlimited.
    pub actual_kb: u64,
}

/// Configured limit and heap usage, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocUsage {
    /// Megabytes above the baseline; zero means unlimited.
    pub limit_mb: u32,
    pub usage_kb: u64,
}

fn collector_call(
    vm: &mut LuaVM,
    collector: &LuaFunctionRef,
    option: &str,
) -> Result<Vec<LuaAnyRef>> {
    let option = runtime::root_bytes(vm, option.as_bytes())?;
    runtime::call_function(vm, collector, "collectgarbage", &[option.to_value()])
}

pub(crate) fn collect(vm: &mut LuaVM, collector: &LuaFunctionRef) -> Result<()> {
    collector_call(vm, collector, "collect")?;
    Ok(())
}

/// Current heap usage in KB, rounded up.
pub(crate) fn usage_kb(vm: &mut LuaVM, collector: &LuaFunctionRef) -> Result<u64> {
    let count = collector_call(vm, collector, "count")?
        .first()
        .and_then(|value| value.to_value().as_float())
        .ok_or_else(|| RosieError::contract("collectgarbage", "count did not return a number"))?;
    Ok(count.max(0.0).ceil() as u64)
}

pub(crate) fn set_limit(
    vm: &mut LuaVM,
    collector: &LuaFunctionRef,
    limit: &mut AllocLimit,
    megabytes: u32,
) -> Result<AllocUsage> {
    if megabytes != 0 && megabytes < MIN_ALLOC_LIMIT_MB {
        return Err(RosieError::AllocLimitTooSmall {
            requested: megabytes,
            minimum: MIN_ALLOC_LIMIT_MB,
        });
    }
    // The second pass reclaims what finalizers released during the first.
    collect(vm, collector)?;
    collect(vm, collector)?;
    let usage = usage_kb(vm, collector)?;

    limit.set_mb = megabytes;
    limit.actual_kb = if megabytes == 0 {
        0
    } else {
        usage + u64::from(megabytes) * 1024
    };
    debug!(
        limit_mb = megabytes,
        usage_kb = usage,
        ceiling_kb = limit.actual_kb,
        "allocation limit set"
    );
    Ok(AllocUsage {
        limit_mb: megabytes,
        usage_kb: usage,
    })
}

pub(crate) fn query_limit(
    vm: &mut LuaVM,
    collector: &LuaFunctionRef,
    limit: &AllocLimit,
) -> Result<AllocUsage> {
    Ok(AllocUsage {
        limit_mb: limit.set_mb,
        usage_kb: usage_kb(vm, collector)?,
    })
}

/// Forces a full collection when usage is above the ceiling. Returns whether
/// a collection ran.
pub(crate) fn collect_if_needed(
    vm: &mut LuaVM,
    collector: &LuaFunctionRef,
    limit: &AllocLimit,
) -> Result<bool> {
    if limit.actual_kb == 0 {
        return Ok(false);
    }
    let usage = usage_kb(vm, collector)?;
    if usage <= limit.actual_kb {
        return Ok(false);
    }
    trace!(usage_kb = usage, ceiling_kb = limit.actual_kb, "forcing collection");
    collect(vm, collector)?;
    Ok(true)
}
