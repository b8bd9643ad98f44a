//! Engine lifecycle and the public operations.
//!
//! An [`Engine`] is one runtime instance behind a mutex. Every operation locks
//! on entry and unlocks on every exit path, except [`Engine::finalize`], which
//! tears the runtime down under the lock and never releases it.

use std::fmt;
use std::mem::ManuallyDrop;

use luars::{LuaValue, LuaVM};
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::buffer::OwnedBuffer;
use crate::diagnostics;
use crate::dispatch::{self, DataRef, Outcome};
use crate::error::{Result, RosieError};
use crate::governor::{self, AllocUsage};
use crate::handle_table::PatternHandle;
use crate::home;
use crate::matchfile::{self, FileMatch, FileMatchRequest};
use crate::options::EngineOptions;
use crate::runtime::{
    self, LuaAnyRef, call_function, call_method, function_field, root_bytes, value_bytes,
};
use crate::slots::Slots;

pub(crate) struct EngineState {
    /// Declared before `vm`: every reference must be released while the VM is alive.
    pub slots: Slots,
    pub vm: Box<LuaVM>,
    /// Bytes of the last native-path result, reused across matches.
    pub native_result: Vec<u8>,
    #[cfg(test)]
    pub governed: u64,
}

// SAFETY: the VM and every reference into it are reachable only through the
// engine mutex, so at most one thread touches them at a time and none of them
// is ever shared outside the engine.
unsafe impl Send for EngineState {}

impl EngineState {
    pub(crate) fn data(&self, data: DataRef) -> Option<&[u8]> {
        match data {
            DataRef::Native => Some(&self.native_result),
            DataRef::Scripted => self.slots.previous_scripted_result.as_deref(),
            DataRef::NoMatch | DataRef::NoSuchPattern | DataRef::NoSuchEncoder => None,
        }
    }

    /// Allocation governor hook, run first by match, trace and matchfile.
    pub(crate) fn govern(&mut self) -> Result<()> {
        #[cfg(test)]
        {
            self.governed += 1;
        }
        governor::collect_if_needed(&mut self.vm, &self.slots.collector, &self.slots.alloc)?;
        Ok(())
    }
}

/// Outcome of [`Engine::compile`].
#[derive(Debug)]
pub struct Compiled {
    /// [`PatternHandle::NONE`] when compilation failed.
    pub pattern: PatternHandle,
    /// Errors on failure; warnings, if any, on success.
    pub diagnostics: Option<OwnedBuffer>,
}

impl Compiled {
    pub fn is_ok(&self) -> bool {
        !self.pattern.is_none()
    }
}

/// Outcome of [`Engine::load`], [`Engine::loadfile`] and [`Engine::import`].
#[derive(Debug)]
pub struct LoadOutcome {
    pub ok: bool,
    /// Declared package for loads, actual package name for imports.
    pub package: Option<String>,
    pub diagnostics: Option<OwnedBuffer>,
}

/// Outcome of [`Engine::trace`].
#[derive(Debug)]
pub enum Trace {
    NoSuchPattern,
    InvalidStyle,
    Traced { matched: bool, trace: OwnedBuffer },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Matched,
    NoMatch,
    /// The handle is zero, stale, or was never issued by this engine.
    NoSuchPattern,
    /// The encoder is neither built in nor known to the runtime module.
    NoSuchEncoder,
}

/// Result of [`Engine::match_input`].
///
/// Holds the engine lock: the data it exposes is borrowed from the engine
/// and stays valid until the `Match` is dropped. Drop it before issuing the
/// next call on the same engine.
pub struct Match<'e> {
    guard: MutexGuard<'e, ManuallyDrop<EngineState>>,
    outcome: Outcome,
}

impl Match<'_> {
    pub fn status(&self) -> MatchStatus {
        match self.outcome.data {
            DataRef::Native | DataRef::Scripted => MatchStatus::Matched,
            DataRef::NoMatch => MatchStatus::NoMatch,
            DataRef::NoSuchPattern => MatchStatus::NoSuchPattern,
            DataRef::NoSuchEncoder => MatchStatus::NoSuchEncoder,
        }
    }

    pub fn matched(&self) -> bool {
        self.status() == MatchStatus::Matched
    }

    /// Encoded result bytes; `None` unless the status is `Matched`.
    pub fn data(&self) -> Option<&[u8]> {
        self.guard.data(self.outcome.data)
    }

    /// Input bytes left unconsumed.
    pub fn leftover(&self) -> i64 {
        self.outcome.leftover
    }

    pub fn abend(&self) -> bool {
        self.outcome.abend
    }

    /// Microseconds spent in the whole match, encoding included.
    pub fn total_time(&self) -> i64 {
        self.outcome.total_time
    }

    /// Microseconds spent in the matcher.
    pub fn match_time(&self) -> i64 {
        self.outcome.match_time
    }
}

impl fmt::Debug for Match<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Match")
            .field("status", &self.status())
            .field("data", &self.data().map(String::from_utf8_lossy))
            .field("leftover", &self.outcome.leftover)
            .field("abend", &self.outcome.abend)
            .finish()
    }
}

pub struct Engine {
    state: Mutex<ManuallyDrop<EngineState>>,
}

impl Engine {
    pub fn new() -> Result<Engine> {
        Self::with_options(EngineOptions::default())
    }

    /// Boots a fresh runtime and populates the slot registry. Nothing is
    /// allocated for the engine unless every step succeeds.
    pub fn with_options(options: EngineOptions) -> Result<Engine> {
        let home = home::rosie_home()?;
        let mut vm = runtime::boot(home, &options)?;
        let mut slots = Slots::populate(&mut vm)?;

        let libpath = options
            .libpath
            .as_deref()
            .unwrap_or_else(|| home.default_libpath());
        let libpath = root_bytes(&mut vm, libpath.as_bytes())?;
        call_method(&mut vm, &slots.engine, "set_libpath", &[libpath.to_value()])?;
        drop(libpath);
        governor::set_limit(
            &mut vm,
            &slots.collector,
            &mut slots.alloc,
            options.alloc_limit_mb,
        )?;

        debug!(alloc_limit_mb = options.alloc_limit_mb, "engine created");
        Ok(Engine {
            state: Mutex::new(ManuallyDrop::new(EngineState {
                slots,
                vm,
                native_result: Vec::new(),
                #[cfg(test)]
                governed: 0,
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ManuallyDrop<EngineState>> {
        self.state.lock()
    }

    /// Sets the allocation ceiling to `megabytes` above current usage, after
    /// two full collections. Zero removes the ceiling.
    pub fn set_alloc_limit(&self, megabytes: u32) -> Result<AllocUsage> {
        let mut guard = self.lock();
        let EngineState { slots, vm, .. } = &mut **guard;
        governor::set_limit(vm, &slots.collector, &mut slots.alloc, megabytes)
    }

    pub fn alloc_limit(&self) -> Result<AllocUsage> {
        let mut guard = self.lock();
        let EngineState { slots, vm, .. } = &mut **guard;
        governor::query_limit(vm, &slots.collector, &slots.alloc)
    }

    /// Runtime configuration as a JSON array of `{name, value, description}`.
    pub fn config(&self) -> Result<Option<OwnedBuffer>> {
        let mut guard = self.lock();
        let EngineState { slots, vm, .. } = &mut **guard;
        let config = function_field(vm, &slots.runtime_module, "config")?;
        let results = call_function(vm, &config, "config", &[])?;
        let [records] = results.as_slice() else {
            return Err(RosieError::contract(
                "config",
                format!("expected one value, got {}", results.len()),
            ));
        };
        diagnostics::marshal(vm, &slots.json_encoder, records)
    }

    /// The import search path (colon-separated directories).
    pub fn libpath(&self) -> Result<String> {
        let mut guard = self.lock();
        let EngineState { slots, vm, .. } = &mut **guard;
        let results = call_method(vm, &slots.engine, "libpath", &[])?;
        let path = results.first().map(LuaAnyRef::to_value).unwrap_or_default();
        value_bytes(&path)
            .map(|path| String::from_utf8_lossy(path).into_owned())
            .ok_or_else(|| RosieError::contract("libpath", "expected a string"))
    }

    pub fn set_libpath(&self, libpath: &str) -> Result<()> {
        let mut guard = self.lock();
        let EngineState { slots, vm, .. } = &mut **guard;
        let libpath = root_bytes(vm, libpath.as_bytes())?;
        call_method(vm, &slots.engine, "set_libpath", &[libpath.to_value()])?;
        Ok(())
    }

    /// Compiles `expression`. A bad expression is not an error: it yields
    /// [`PatternHandle::NONE`] and diagnostics explaining why.
    pub fn compile(&self, expression: &[u8]) -> Result<Compiled> {
        let mut guard = self.lock();
        let EngineState { slots, vm, .. } = &mut **guard;
        let expression = root_bytes(vm, expression)?;
        let results = call_method(vm, &slots.engine, "compile", &[expression.to_value()])?;
        let [compiled, messages] = results.as_slice() else {
            return Err(RosieError::contract(
                "compile",
                format!("expected 2 values, got {}", results.len()),
            ));
        };
        let diagnostics = diagnostics::marshal(vm, &slots.json_encoder, messages)?;
        if compiled.to_value().as_boolean() == Some(false) {
            return Ok(Compiled {
                pattern: PatternHandle::NONE,
                diagnostics,
            });
        }
        let rplx = compiled
            .as_table()
            .ok_or_else(|| RosieError::contract("compile", "expected a pattern or false"))?;
        let pattern = slots.patterns.insert(rplx).ok_or(RosieError::HandlesExhausted)?;
        debug!(%pattern, live = slots.patterns.len(), "pattern compiled");
        Ok(Compiled {
            pattern,
            diagnostics,
        })
    }

    /// Releases a compiled pattern. Returns `false` if the handle was not live.
    pub fn free_pattern(&self, pattern: PatternHandle) -> bool {
        let mut guard = self.lock();
        let freed = guard.slots.patterns.remove(pattern).is_some();
        debug!(%pattern, freed, "pattern freed");
        freed
    }

    /// Matches `input` against a compiled pattern, starting at the 1-based
    /// byte position `start`, encoding the result with `encoder`.
    pub fn match_input(
        &self,
        pattern: PatternHandle,
        start: i64,
        encoder: &str,
        input: &[u8],
    ) -> Result<Match<'_>> {
        let mut guard = self.lock();
        guard.govern()?;
        let outcome = dispatch::dispatch(&mut guard, pattern, start, encoder, input)?;
        Ok(Match { guard, outcome })
    }

    pub fn trace(
        &self,
        pattern: PatternHandle,
        start: i64,
        style: &str,
        input: &[u8],
    ) -> Result<Trace> {
        let mut guard = self.lock();
        guard.govern()?;
        let EngineState { slots, vm, .. } = &mut **guard;
        let Some(rplx) = slots.patterns.get(pattern) else {
            return Ok(Trace::NoSuchPattern);
        };
        let rplx = rplx.to_value();
        let input = root_bytes(vm, input)?;
        let style = root_bytes(vm, style.as_bytes())?;
        let args = [rplx, input.to_value(), LuaValue::integer(start), style.to_value()];
        let results = call_method(vm, &slots.engine, "trace", &args)?;
        let [style_ok, matched, trace] = results.as_slice() else {
            return Err(RosieError::contract(
                "trace",
                format!("expected 3 values, got {}", results.len()),
            ));
        };
        match style_ok.to_value().as_boolean() {
            Some(true) => {}
            Some(false) => return Ok(Trace::InvalidStyle),
            None => return Err(RosieError::contract("trace", "style flag must be a boolean")),
        }
        let matched = matched
            .to_value()
            .as_boolean()
            .ok_or_else(|| RosieError::contract("trace", "matched flag must be a boolean"))?;
        let trace = if trace.to_value().is_table() {
            diagnostics::marshal(vm, &slots.json_encoder, trace)?
        } else {
            value_bytes(&trace.to_value()).map(OwnedBuffer::from)
        };
        let trace = trace.ok_or_else(|| RosieError::contract("trace", "empty trace"))?;
        Ok(Trace::Traced { matched, trace })
    }

    /// Loads pattern source into the engine's environment.
    pub fn load(&self, source: &[u8]) -> Result<LoadOutcome> {
        self.load_like("load", |vm| Ok(vec![root_bytes(vm, source)?]))
    }

    pub fn loadfile(&self, path: &str) -> Result<LoadOutcome> {
        self.load_like("loadfile", |vm| Ok(vec![root_bytes(vm, path.as_bytes())?]))
    }

    /// Imports `package` from the library path, optionally under `alias`
    /// (`"."` binds its patterns without a prefix).
    pub fn import(&self, package: &str, alias: Option<&str>) -> Result<LoadOutcome> {
        self.load_like("import", |vm| {
            let package = root_bytes(vm, package.as_bytes())?;
            let alias = match alias {
                Some(alias) => root_bytes(vm, alias.as_bytes())?,
                None => vm.to_ref(LuaValue::nil()),
            };
            Ok(vec![package, alias])
        })
    }

    fn load_like(
        &self,
        call: &'static str,
        args: impl FnOnce(&mut LuaVM) -> Result<Vec<LuaAnyRef>>,
    ) -> Result<LoadOutcome> {
        let mut guard = self.lock();
        let EngineState { slots, vm, .. } = &mut **guard;
        let rooted = args(vm)?;
        let args: Vec<LuaValue> = rooted.iter().map(LuaAnyRef::to_value).collect();
        let results = call_method(vm, &slots.engine, call, &args)?;
        drop(rooted);
        let mut results = results.into_iter();
        let (Some(ok), Some(package), Some(messages), None) =
            (results.next(), results.next(), results.next(), results.next())
        else {
            return Err(RosieError::contract(call, "expected 3 values"));
        };
        let ok = ok
            .to_value()
            .as_boolean()
            .ok_or_else(|| RosieError::contract(call, "ok flag must be a boolean"))?;
        let package = package.to_value();
        let package = if package.is_nil() {
            None
        } else {
            let name = value_bytes(&package)
                .ok_or_else(|| RosieError::contract(call, "package name must be a string"))?;
            Some(String::from_utf8_lossy(name).into_owned())
        };
        let stripped = diagnostics::strip(vm, &slots.diagnostic_stripper, messages)?;
        let diagnostics = diagnostics::marshal(vm, &slots.json_encoder, &stripped)?;
        debug!(call, ok, package = package.as_deref(), "environment updated");
        Ok(LoadOutcome {
            ok,
            package,
            diagnostics,
        })
    }

    /// Matches every line (or the whole file) of `request.input` and writes
    /// results to `request.output`, unmatched records to `request.errors`.
    pub fn matchfile(&self, request: &FileMatchRequest<'_>) -> Result<FileMatch> {
        let mut guard = self.lock();
        guard.govern()?;
        matchfile::run(&mut guard, request)
    }

    /// Tears the engine down: releases the stashed scripted result, closes the
    /// runtime and keeps the lock held forever.
    pub fn finalize(self) {
        let mut guard = self.state.lock();
        let released = guard.slots.previous_scripted_result.take().is_some();
        let patterns = guard.slots.patterns.len();
        // SAFETY: the lock is never released and `self` is forgotten below,
        // so neither another caller nor `Drop` can reach the state again.
        unsafe { ManuallyDrop::drop(&mut *guard) };
        std::mem::forget(guard);
        std::mem::forget(self);
        debug!(released, patterns, "engine finalized");
    }

    #[cfg(test)]
    pub(crate) fn stashed_scripted_result(&self) -> Option<Vec<u8>> {
        self.lock()
            .slots
            .previous_scripted_result
            .as_deref()
            .map(<[u8]>::to_vec)
    }

    #[cfg(test)]
    pub(crate) fn live_patterns(&self) -> usize {
        self.lock().slots.patterns.len()
    }

    /// How many times the allocation governor has run.
    #[cfg(test)]
    pub(crate) fn governed(&self) -> u64 {
        self.lock().governed
    }

    #[cfg(test)]
    pub(crate) fn with_vm<R>(&self, f: impl FnOnce(&mut LuaVM) -> R) -> R {
        let mut guard = self.lock();
        f(guard.vm.as_mut())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // SAFETY: `finalize` forgets the engine after dropping the state, so
        // this only runs for engines that were never finalized.
        unsafe { ManuallyDrop::drop(self.state.get_mut()) }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}
