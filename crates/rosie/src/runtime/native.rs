// Native primitives
// Registered as globals before the bootstrap script runs; the script captures
// them into `rosie.env.native` and clears the globals.

use luars::{LuaError, LuaResult, LuaState, LuaUserdata, LuaValue, LuaVM};

use crate::encoder::NativeEncoder;
use crate::runtime::input::InputBuffer;
use crate::runtime::json;
use crate::runtime::peg::{Peg, RBuffer, start_index};

pub fn register_all(vm: &mut LuaVM) -> LuaResult<()> {
    vm.register_function("peg_compile", peg_compile)?;
    vm.register_function("peg_match", peg_match)?;
    vm.register_function("peg_rmatch", peg_rmatch)?;
    vm.register_function("buffer_sub", buffer_sub)?;
    vm.register_function("buffer_len", buffer_len)?;
    vm.register_function("json_encode", json_encode)?;
    Ok(())
}

/// Bytes of a string, binary string, or lent input buffer.
fn input_bytes(value: &LuaValue) -> Option<&[u8]> {
    if let Some(ud) = value.as_userdata_mut() {
        return ud.downcast_ref::<InputBuffer>().map(InputBuffer::bytes);
    }
    value.as_bytes()
}

fn peg_of(value: &LuaValue) -> Option<&Peg> {
    value.as_userdata_mut()?.downcast_ref::<Peg>()
}

fn arg_error(l: &mut LuaState, function: &str, index: usize, expected: &str) -> LuaError {
    l.error(format!("bad argument #{index} to '{function}' ({expected} expected)"))
}

/// `peg_compile(source, name)` -> peg | nil, message
fn peg_compile(l: &mut LuaState) -> LuaResult<usize> {
    let source_arg = l.get_arg(1).unwrap_or(LuaValue::nil());
    let name_arg = l.get_arg(2).unwrap_or(LuaValue::nil());
    let Some(source) = input_bytes(&source_arg) else {
        return Err(arg_error(l, "peg_compile", 1, "string"));
    };
    let name = name_arg.as_str().unwrap_or("*").to_string();

    let compiled = std::str::from_utf8(source)
        .map_err(|_| "expression is not valid UTF-8".to_string())
        .and_then(|source| Peg::compile(source, &name));
    match compiled {
        Ok(peg) => {
            let ud = l.create_userdata(LuaUserdata::new(peg))?;
            l.push_value(ud)?;
            Ok(1)
        }
        Err(message) => {
            let message = l.create_string(&message)?;
            l.push_value(LuaValue::nil())?;
            l.push_value(message)?;
            Ok(2)
        }
    }
}

/// `peg_match(peg, input, start)` -> s, e, leftover, tmatch, captures
///
/// Positions are 1-based and `e` is exclusive. On no-match `s` is false and
/// `e`, `captures` are nil. Captures are a flat list of name, s, e triples.
fn peg_match(l: &mut LuaState) -> LuaResult<usize> {
    let peg_arg = l.get_arg(1).unwrap_or(LuaValue::nil());
    let input_arg = l.get_arg(2).unwrap_or(LuaValue::nil());
    let start = l.get_arg(3).and_then(|v| v.as_integer()).unwrap_or(1);
    let Some(peg) = peg_of(&peg_arg) else {
        return Err(arg_error(l, "peg_match", 1, "peg"));
    };
    let Some(input) = input_bytes(&input_arg) else {
        return Err(arg_error(l, "peg_match", 2, "string or buffer"));
    };

    let began = std::time::Instant::now();
    let found = start_index(start, input.len()).map(|index| (index, peg.find(input, index)));
    let tmatch = began.elapsed().as_micros() as i64;

    match found {
        Some((_, Some((span, captures)))) => {
            let caps = l.create_table(captures.len() * 3, 0)?;
            for (i, capture) in captures.iter().enumerate() {
                let name = l.create_string(&capture.name)?;
                let base = (i * 3) as i64;
                l.raw_seti(&caps, base + 1, name);
                l.raw_seti(&caps, base + 2, LuaValue::integer(capture.span.start as i64 + 1));
                l.raw_seti(&caps, base + 3, LuaValue::integer(capture.span.end as i64 + 1));
            }
            l.push_value(LuaValue::integer(span.start as i64 + 1))?;
            l.push_value(LuaValue::integer(span.end as i64 + 1))?;
            l.push_value(LuaValue::integer((input.len() - span.end) as i64))?;
            l.push_value(LuaValue::integer(tmatch))?;
            l.push_value(caps)?;
        }
        Some((index, None)) => {
            l.push_value(LuaValue::boolean(false))?;
            l.push_value(LuaValue::nil())?;
            l.push_value(LuaValue::integer((input.len() - index) as i64))?;
            l.push_value(LuaValue::integer(tmatch))?;
            l.push_value(LuaValue::nil())?;
        }
        None => {
            l.push_value(LuaValue::boolean(false))?;
            l.push_value(LuaValue::nil())?;
            l.push_value(LuaValue::integer(0))?;
            l.push_value(LuaValue::integer(tmatch))?;
            l.push_value(LuaValue::nil())?;
        }
    }
    Ok(5)
}

/// `peg_rmatch(peg, input, start, code)` -> buffer | false, leftover, abend, ttotal, tmatch
///
/// The native primitive as seen from Lua. Produces the same five values the
/// engine's `match` entry point must return.
fn peg_rmatch(l: &mut LuaState) -> LuaResult<usize> {
    let peg_arg = l.get_arg(1).unwrap_or(LuaValue::nil());
    let input_arg = l.get_arg(2).unwrap_or(LuaValue::nil());
    let start = l.get_arg(3).and_then(|v| v.as_integer()).unwrap_or(1);
    let code = l.get_arg(4).and_then(|v| v.as_integer()).unwrap_or(0);
    let Some(peg) = peg_of(&peg_arg) else {
        return Err(arg_error(l, "peg_rmatch", 1, "peg"));
    };
    let Some(input) = input_bytes(&input_arg) else {
        return Err(arg_error(l, "peg_rmatch", 2, "string or buffer"));
    };
    let Some(encoder) = NativeEncoder::from_code(code) else {
        return Err(l.error(format!("peg_rmatch: invalid encoder code {code}")));
    };

    let mut out = Vec::new();
    let outcome = peg
        .rmatch(input, start, encoder, &mut out)
        .map_err(|e| l.error(format!("peg_rmatch: {e}")))?;
    if outcome.matched {
        let ud = l.create_userdata(LuaUserdata::new(RBuffer::new(out)))?;
        l.push_value(ud)?;
    } else {
        l.push_value(LuaValue::boolean(false))?;
    }
    l.push_value(LuaValue::integer(outcome.leftover))?;
    l.push_value(LuaValue::boolean(outcome.abend))?;
    l.push_value(LuaValue::integer(outcome.total_time))?;
    l.push_value(LuaValue::integer(outcome.match_time))?;
    Ok(5)
}

/// `buffer_sub(input, s, e)` -> string with bytes s..e-1 (1-based, e exclusive)
fn buffer_sub(l: &mut LuaState) -> LuaResult<usize> {
    let input_arg = l.get_arg(1).unwrap_or(LuaValue::nil());
    let Some(input) = input_bytes(&input_arg) else {
        return Err(arg_error(l, "buffer_sub", 1, "string or buffer"));
    };
    let len = input.len() as i64;
    let s = l.get_arg(2).and_then(|v| v.as_integer()).unwrap_or(1).clamp(1, len + 1);
    let e = l
        .get_arg(3)
        .and_then(|v| v.as_integer())
        .unwrap_or(len + 1)
        .clamp(s, len + 1);
    let value = l.create_bytes(&input[(s - 1) as usize..(e - 1) as usize])?;
    l.push_value(value)?;
    Ok(1)
}

/// `buffer_len(input)` -> byte length
fn buffer_len(l: &mut LuaState) -> LuaResult<usize> {
    let input_arg = l.get_arg(1).unwrap_or(LuaValue::nil());
    let Some(input) = input_bytes(&input_arg) else {
        return Err(arg_error(l, "buffer_len", 1, "string or buffer"));
    };
    l.push_value(LuaValue::integer(input.len() as i64))?;
    Ok(1)
}

/// `json_encode(value)` -> string | nil, message
fn json_encode(l: &mut LuaState) -> LuaResult<usize> {
    let value = l.get_arg(1).unwrap_or(LuaValue::nil());
    match json::encode(&value) {
        Ok(text) => {
            let text = l.create_string(&text)?;
            l.push_value(text)?;
            Ok(1)
        }
        Err(message) => {
            let message = l.create_string(&message)?;
            l.push_value(LuaValue::nil())?;
            l.push_value(message)?;
            Ok(2)
        }
    }
}
