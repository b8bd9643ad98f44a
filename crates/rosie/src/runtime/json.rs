/// Lua → JSON conversion behind the runtime module's `json.encode`.
///
/// Tables with a non-empty sequence part become arrays, other non-empty tables
/// become objects, and an empty table becomes `[]`. Cycles, functions, threads,
/// userdata and non-finite numbers are rejected.
use std::collections::HashSet;

use luars::LuaValue;
use serde_json::{Map, Number, Value};

const MAX_DEPTH: usize = 64;

struct Ctx {
    visiting: HashSet<usize>,
    depth: usize,
}

impl Ctx {
    fn new() -> Self {
        Self {
            visiting: HashSet::new(),
            depth: 0,
        }
    }

    fn enter_table(&mut self, ptr: usize) -> Result<(), String> {
        if self.depth >= MAX_DEPTH {
            return Err(format!("nesting deeper than {MAX_DEPTH} levels"));
        }
        if !self.visiting.insert(ptr) {
            return Err("cannot encode a table that contains itself".to_string());
        }
        self.depth += 1;
        Ok(())
    }

    fn exit_table(&mut self, ptr: usize) {
        self.visiting.remove(&ptr);
        self.depth -= 1;
    }
}

pub fn lua_to_json(value: &LuaValue) -> Result<Value, String> {
    let mut ctx = Ctx::new();
    lua_to_json_inner(value, &mut ctx)
}

pub fn encode(value: &LuaValue) -> Result<String, String> {
    let json = lua_to_json(value)?;
    serde_json::to_string(&json).map_err(|e| e.to_string())
}

fn lua_to_json_inner(value: &LuaValue, ctx: &mut Ctx) -> Result<Value, String> {
    if value.is_nil() {
        return Ok(Value::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Some(i) = value.as_integer() {
        return Ok(Value::Number(i.into()));
    }
    if let Some(n) = value.as_number() {
        return Number::from_f64(n)
            .map(Value::Number)
            .ok_or_else(|| format!("cannot encode non-finite number {n}"));
    }
    if let Some(s) = value.as_str() {
        return Ok(Value::String(s.to_string()));
    }
    if let Some(b) = value.as_binary() {
        return Ok(Value::String(String::from_utf8_lossy(b).into_owned()));
    }
    if value.is_table() {
        return table_to_json(value, ctx);
    }
    Err(format!("cannot encode a value of type {}", value.type_name()))
}

fn table_to_json(table_value: &LuaValue, ctx: &mut Ctx) -> Result<Value, String> {
    let Some(table) = table_value.as_table() else {
        return Ok(Value::Null);
    };
    let ptr = table_value
        .as_table_ptr()
        .map(|p| p.as_ptr() as usize)
        .unwrap_or(0);
    ctx.enter_table(ptr)?;
    let result = if table.len() > 0 {
        table_to_json_array(table_value, ctx)
    } else {
        table_to_json_object(table_value, ctx)
    };
    ctx.exit_table(ptr);
    result
}

fn table_to_json_array(table_value: &LuaValue, ctx: &mut Ctx) -> Result<Value, String> {
    let Some(table) = table_value.as_table() else {
        return Ok(Value::Null);
    };
    let len = table.len();
    let mut items = vec![Value::Null; len];
    for (k, v) in table.iter_all() {
        let slot = k
            .as_integer()
            .and_then(|i| usize::try_from(i).ok())
            .filter(|i| (1..=len).contains(i));
        if let Some(i) = slot {
            items[i - 1] = lua_to_json_inner(&v, ctx)?;
        }
    }
    Ok(Value::Array(items))
}

fn table_to_json_object(table_value: &LuaValue, ctx: &mut Ctx) -> Result<Value, String> {
    let Some(table) = table_value.as_table() else {
        return Ok(Value::Null);
    };
    let mut object = Map::new();
    for (k, v) in table.iter_all() {
        let key = if let Some(s) = k.as_str() {
            s.to_string()
        } else if let Some(i) = k.as_integer() {
            i.to_string()
        } else if let Some(n) = k.as_number() {
            n.to_string()
        } else if let Some(b) = k.as_bool() {
            b.to_string()
        } else {
            return Err(format!("cannot encode a key of type {}", k.type_name()));
        };
        object.insert(key, lua_to_json_inner(&v, ctx)?);
    }
    if object.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    Ok(Value::Object(object))
}
