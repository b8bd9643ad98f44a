// Match dispatcher
// lookup-pattern -> dispatch-path -> invoke -> decode-result
//
// Built-in encoders take the native path straight to the matching primitive.
// Extension encoders take the scripted path through the runtime module's
// `match` entry point, which must return exactly five values:
// result, leftover, abend, total_time, match_time.

use luars::{LuaUserdata, LuaValue};
use tracing::trace;

use crate::buffer::OwnedBuffer;
use crate::encoder::{Encoder, NativeEncoder};
use crate::engine::EngineState;
use crate::error::{Result, RosieError};
use crate::handle_table::PatternHandle;
use crate::runtime::input::InputBuffer;
use crate::runtime::peg::{Peg, RBuffer};
use crate::runtime::{self, LuaAnyRef, call_method, value_bytes};

const MATCH_ARITY: usize = 5;

/// Where the bytes of a match result live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataRef {
    NoMatch,
    NoSuchPattern,
    NoSuchEncoder,
    /// The engine's reusable native result buffer.
    Native,
    /// The `previous-scripted-result` slot.
    Scripted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Outcome {
    pub data: DataRef,
    pub leftover: i64,
    pub abend: bool,
    pub total_time: i64,
    pub match_time: i64,
}

impl Outcome {
    fn sentinel(data: DataRef) -> Self {
        Outcome {
            data,
            leftover: 0,
            abend: false,
            total_time: 0,
            match_time: 0,
        }
    }
}

pub(crate) fn dispatch(
    state: &mut EngineState,
    handle: PatternHandle,
    start: i64,
    encoder: &str,
    input: &[u8],
) -> Result<Outcome> {
    let Some(rplx) = state.slots.patterns.get(handle) else {
        trace!(%handle, "no such pattern");
        return Ok(Outcome::sentinel(DataRef::NoSuchPattern));
    };
    match Encoder::resolve(encoder) {
        Encoder::Native(native) => {
            let peg = rplx
                .get("peg")
                .map_err(|e| runtime::lua_error(&mut state.vm, e))?;
            native_path(state, peg, start, native, input)
        }
        Encoder::Extension(name) => {
            let rplx = rplx.to_value();
            if !state.slots.has_extension_encoder(&mut state.vm, name)? {
                trace!(encoder = name, "no such encoder");
                return Ok(Outcome::sentinel(DataRef::NoSuchEncoder));
            }
            scripted_path(state, rplx, start, name, input)
        }
    }
}

fn native_path(
    state: &mut EngineState,
    peg: LuaValue,
    start: i64,
    encoder: NativeEncoder,
    input: &[u8],
) -> Result<Outcome> {
    let peg = peg
        .as_userdata_mut()
        .and_then(|ud| ud.downcast_ref::<Peg>())
        .ok_or_else(|| RosieError::contract("compile", "compiled pattern has no native matcher"))?;

    let outcome = peg
        .rmatch(input, start, encoder, &mut state.native_result)
        .map_err(|e| RosieError::Runtime {
            call: "rmatch",
            message: e.to_string(),
        })?;
    trace!(encoder = encoder.name(), matched = outcome.matched, "native match");
    Ok(Outcome {
        data: if outcome.matched {
            DataRef::Native
        } else {
            DataRef::NoMatch
        },
        leftover: outcome.leftover,
        abend: outcome.abend,
        total_time: outcome.total_time,
        match_time: outcome.match_time,
    })
}

fn scripted_path(
    state: &mut EngineState,
    rplx: LuaValue,
    start: i64,
    encoder: &str,
    input: &[u8],
) -> Result<Outcome> {
    // The previous scripted result stays readable until this point.
    state.slots.previous_scripted_result = None;

    let vm = &mut state.vm;
    // SAFETY: the wrapper is revoked below, before `input` can go away.
    let lent = LuaUserdata::new(unsafe { InputBuffer::lend(input) });
    let wrapper = vm
        .create_userdata(lent)
        .map_err(|e| runtime::lua_error(vm, e))?;
    // Rooted until revoked: a collection during the call must not free it.
    let wrapper = vm.to_ref(wrapper);
    let encoder_name = runtime::root_bytes(vm, encoder.as_bytes())?;
    let args = [rplx, wrapper.to_value(), LuaValue::integer(start), encoder_name.to_value()];
    let called = call_method(vm, &state.slots.engine, "match", &args);
    if let Some(lent) = wrapper
        .to_value()
        .as_userdata_mut()
        .and_then(|ud| ud.downcast_mut::<InputBuffer>())
    {
        lent.revoke();
    }
    drop(wrapper);
    let results = called?;
    trace!(encoder, "scripted match");
    decode(state, &results)
}

fn integer_at(results: &[LuaValue], index: usize, what: &str) -> Result<i64> {
    results[index].as_integer().ok_or_else(|| {
        RosieError::contract(
            "match",
            format!("{what} must be an integer, got {}", results[index].type_name()),
        )
    })
}

fn decode(state: &mut EngineState, results: &[LuaAnyRef]) -> Result<Outcome> {
    if results.len() != MATCH_ARITY {
        return Err(RosieError::contract(
            "match",
            format!("expected {MATCH_ARITY} values, got {}", results.len()),
        ));
    }
    let results: Vec<LuaValue> = results.iter().map(LuaAnyRef::to_value).collect();
    let results = results.as_slice();
    let leftover = integer_at(results, 1, "leftover")?;
    let abend = results[2]
        .as_boolean()
        .ok_or_else(|| RosieError::contract("match", "abend must be a boolean"))?;
    let total_time = integer_at(results, 3, "total time")?;
    let match_time = integer_at(results, 4, "match time")?;

    let result = &results[0];
    let data = if let Some(buffer) = result
        .as_userdata_mut()
        .and_then(|ud| ud.downcast_mut::<RBuffer>())
    {
        state.native_result = buffer.take();
        DataRef::Native
    } else if result.as_boolean() == Some(false) {
        DataRef::NoMatch
    } else if let Some(bytes) = value_bytes(result) {
        state.slots.previous_scripted_result = Some(OwnedBuffer::from(bytes));
        DataRef::Scripted
    } else {
        return Err(RosieError::contract(
            "match",
            format!("unexpected result of type {}", result.type_name()),
        ));
    };
    Ok(Outcome {
        data,
        leftover,
        abend,
        total_time,
        match_time,
    })
}

