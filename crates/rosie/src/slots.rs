// Slot registry
// One fixed set of long-lived runtime references per engine. Populated once at
// creation; only the allocation limits and the previous scripted result change
// afterwards. Nothing here is visible outside the owning engine.

use luars::LuaVM;
use tracing::debug;

use crate::buffer::OwnedBuffer;
use crate::encoder::NativeEncoder;
use crate::error::{Result, RosieError};
use crate::governor::AllocLimit;
use crate::handle_table::HandleTable;
use crate::runtime::{
    self, LuaFunctionRef, LuaTableRef, call_method, function_field, table_field,
};

pub(crate) struct Slots {
    /// The global `rosie` table.
    pub runtime_module: LuaTableRef,
    /// The engine object returned by `rosie.engine.new()`.
    pub engine: LuaTableRef,
    /// Compiled-pattern objects, addressed by handle.
    pub patterns: HandleTable<LuaTableRef>,
    pub json_encoder: LuaFunctionRef,
    pub diagnostic_stripper: LuaFunctionRef,
    /// Extension encoders known to the runtime module.
    pub encoders: LuaTableRef,
    /// `rosie.env.collect`, a Lua wrapper around `collectgarbage` driven by
    /// the allocation governor.
    pub collector: LuaFunctionRef,
    pub alloc: AllocLimit,
    pub previous_scripted_result: Option<OwnedBuffer>,
}

impl Slots {
    pub fn populate(vm: &mut LuaVM) -> Result<Slots> {
        let runtime_module = vm
            .get_global_table("rosie")
            .map_err(|e| runtime::lua_error(vm, e))?
            .ok_or(RosieError::MissingSlot("rosie"))?;
        let engine_class = table_field(vm, &runtime_module, "engine")?;
        let created = call_method(vm, &engine_class, "new", &[])?;
        let engine = created
            .first()
            .and_then(|value| value.as_table())
            .ok_or_else(|| RosieError::contract("engine.new", "expected an engine object"))?;

        let env = table_field(vm, &runtime_module, "env")?;
        let json = table_field(vm, &env, "json")?;
        let json_encoder = function_field(vm, &json, "encode")?;
        let diagnostic_stripper = function_field(vm, &env, "strip_diagnostics")?;
        let encoders = table_field(vm, &env, "encoders")?;
        let collector = function_field(vm, &env, "collect")?;

        for native in NativeEncoder::ALL {
            let shadowed = encoders
                .get(native.name())
                .map_err(|e| runtime::lua_error(vm, e))?;
            if !shadowed.is_nil() {
                return Err(RosieError::Boot(format!(
                    "extension encoder `{}` shadows a built-in encoder",
                    native.name()
                )));
            }
        }

        debug!("slot registry populated");
        Ok(Slots {
            runtime_module,
            engine,
            patterns: HandleTable::default(),
            json_encoder,
            diagnostic_stripper,
            encoders,
            collector,
            alloc: AllocLimit::default(),
            previous_scripted_result: None,
        })
    }

    /// Whether `name` is an extension encoder the runtime module defines.
    pub fn has_extension_encoder(&self, vm: &mut LuaVM, name: &str) -> Result<bool> {
        let entry = self
            .encoders
            .get(name)
            .map_err(|e| runtime::lua_error(vm, e))?;
        Ok(!entry.is_nil())
    }
}
