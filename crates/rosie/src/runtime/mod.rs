//! The embedded runtime: a `luars` VM booted with the runtime module.
//!
//! Booting follows a fixed protocol:
//! 1. open the standard library and register the native primitives
//! 2. load `lib/boot.lua` from the asset root and run it
//! 3. call the function it returns with the asset root
//!
//! Afterwards the global `rosie` table is the runtime module the slot
//! registry is populated from.
//!
//! A `LuaValue` held only by Rust is invisible to the collector. Anything
//! that must survive a call into the VM is kept as a [`LuaAnyRef`], which
//! pins it in the registry until dropped.

pub mod input;
pub mod json;
pub mod native;
pub mod peg;

use luars::{LuaError, LuaValue, LuaVM, Stdlib};
pub(crate) use luars::{LuaAnyRef, LuaFunctionRef, LuaTableRef};
use tracing::debug;

use crate::error::{Result, RosieError};
use crate::home::RosieHome;
use crate::options::EngineOptions;

pub(crate) fn boot(home: &RosieHome, options: &EngineOptions) -> Result<Box<LuaVM>> {
    let mut vm = LuaVM::new(options.safe_option());
    vm.open_stdlib(Stdlib::All)
        .map_err(|e| boot_error(&mut vm, "opening the standard library", e))?;
    native::register_all(&mut vm)
        .map_err(|e| boot_error(&mut vm, "registering native primitives", e))?;

    let path = home.boot_script();
    let source = std::fs::read_to_string(path)
        .map_err(|e| RosieError::Boot(format!("{}: {e}", path.display())))?;
    let chunk = vm
        .load_with_name(&source, "@boot.lua")
        .map_err(|e| boot_error(&mut vm, "loading boot.lua", e))?;
    let returned = vm
        .call_raw(chunk, vec![])
        .map_err(|e| boot_error(&mut vm, "running boot.lua", e))?;
    let init = returned
        .into_iter()
        .next()
        .filter(LuaValue::is_function)
        .ok_or_else(|| RosieError::Boot("boot.lua did not return a function".to_string()))?;
    let init = vm.to_ref(init);
    let root = vm
        .create_string(home.root())
        .map_err(|e| boot_error(&mut vm, "passing the asset root", e))?;
    vm.call_raw(init.to_value(), vec![root])
        .map_err(|e| boot_error(&mut vm, "initializing the runtime module", e))?;

    debug!(boot_script = %path.display(), "runtime booted");
    Ok(vm)
}

fn boot_error(vm: &mut LuaVM, stage: &str, e: LuaError) -> RosieError {
    if matches!(e, LuaError::OutOfMemory) {
        return RosieError::OutOfMemory;
    }
    RosieError::Boot(format!("{stage}: {}", vm.get_error_message(e)))
}

/// Converts a VM failure outside a runtime-module call.
pub(crate) fn lua_error(vm: &mut LuaVM, e: LuaError) -> RosieError {
    if matches!(e, LuaError::OutOfMemory) {
        return RosieError::OutOfMemory;
    }
    RosieError::Lua(vm.get_error_message(e))
}

/// Converts a failure raised by the runtime-module entry point `call`.
pub(crate) fn call_error(vm: &mut LuaVM, call: &'static str, e: LuaError) -> RosieError {
    if matches!(e, LuaError::OutOfMemory) {
        return RosieError::OutOfMemory;
    }
    RosieError::Runtime {
        call,
        message: vm.get_error_message(e),
    }
}

/// Calls `object:name(args...)`. The caller keeps every collectable argument
/// rooted until this returns; the results come back rooted.
pub(crate) fn call_method(
    vm: &mut LuaVM,
    object: &LuaTableRef,
    name: &'static str,
    args: &[LuaValue],
) -> Result<Vec<LuaAnyRef>> {
    let method = object.get(name).map_err(|e| lua_error(vm, e))?;
    if !method.is_function() {
        return Err(RosieError::MissingSlot(name));
    }
    let mut call_args = Vec::with_capacity(args.len() + 1);
    call_args.push(object.to_value());
    call_args.extend_from_slice(args);
    let results = vm
        .call_raw(method, call_args)
        .map_err(|e| call_error(vm, name, e))?;
    Ok(root_all(vm, results))
}

/// Calls a runtime-module function held in a slot.
pub(crate) fn call_function(
    vm: &mut LuaVM,
    function: &LuaFunctionRef,
    name: &'static str,
    args: &[LuaValue],
) -> Result<Vec<LuaAnyRef>> {
    let results = vm
        .call_raw(function.to_value(), args.to_vec())
        .map_err(|e| call_error(vm, name, e))?;
    Ok(root_all(vm, results))
}

fn root_all(vm: &mut LuaVM, values: Vec<LuaValue>) -> Vec<LuaAnyRef> {
    values.into_iter().map(|value| vm.to_ref(value)).collect()
}

/// Passes bytes into the VM as a rooted string.
pub(crate) fn root_bytes(vm: &mut LuaVM, bytes: &[u8]) -> Result<LuaAnyRef> {
    let value = vm.create_bytes(bytes).map_err(|e| lua_error(vm, e))?;
    Ok(vm.to_ref(value))
}

/// Bytes of a string value.
pub(crate) fn value_bytes(value: &LuaValue) -> Option<&[u8]> {
    value.as_bytes()
}

pub(crate) fn table_field(
    vm: &mut LuaVM,
    table: &LuaTableRef,
    key: &'static str,
) -> Result<LuaTableRef> {
    let value = table.get(key).map_err(|e| lua_error(vm, e))?;
    vm.to_table_ref(value).ok_or(RosieError::MissingSlot(key))
}

pub(crate) fn function_field(
    vm: &mut LuaVM,
    table: &LuaTableRef,
    key: &'static str,
) -> Result<LuaFunctionRef> {
    let value = table.get(key).map_err(|e| lua_error(vm, e))?;
    vm.to_function_ref(value).ok_or(RosieError::MissingSlot(key))
}
