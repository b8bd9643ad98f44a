// Match output encoders
// Built-in encoders run natively next to the matcher. Every other name is an
// extension encoder, resolved by the runtime module on the scripted path.

use serde_json::{Map, Value, json};

/// A contiguous byte range of the input, 0-based and end-exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A participating capture group of a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub name: String,
    pub span: Span,
}

/// Everything a native encoder needs to know about one successful match.
#[derive(Debug, Clone)]
pub struct MatchRecord<'a> {
    pub pattern_name: &'a str,
    pub input: &'a [u8],
    pub span: Span,
    pub captures: Vec<Capture>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeEncoder {
    Json = 1,
    Line = 2,
    Matches = 3,
}

impl NativeEncoder {
    pub const ALL: [NativeEncoder; 3] = [
        NativeEncoder::Json,
        NativeEncoder::Line,
        NativeEncoder::Matches,
    ];

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|encoder| encoder.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            NativeEncoder::Json => "json",
            NativeEncoder::Line => "line",
            NativeEncoder::Matches => "matches",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|encoder| encoder.name() == name)
    }

    /// Writes the encoding of `record` into `out`, replacing its contents.
    pub fn encode(self, record: &MatchRecord<'_>, out: &mut Vec<u8>) -> serde_json::Result<()> {
        out.clear();
        match self {
            NativeEncoder::Json => serde_json::to_writer(out, &json_record(record))?,
            NativeEncoder::Line => out.extend_from_slice(record.input),
            NativeEncoder::Matches => {
                out.extend_from_slice(&record.input[record.span.start..record.span.end])
            }
        }
        Ok(())
    }
}

fn json_span(kind: &str, input: &[u8], span: Span) -> Map<String, Value> {
    let mut node = Map::new();
    node.insert("type".to_string(), json!(kind));
    node.insert("s".to_string(), json!(span.start + 1));
    node.insert("e".to_string(), json!(span.end + 1));
    node.insert(
        "data".to_string(),
        json!(String::from_utf8_lossy(&input[span.start..span.end])),
    );
    node
}

fn json_record(record: &MatchRecord<'_>) -> Value {
    let mut node = json_span(record.pattern_name, record.input, record.span);
    if !record.captures.is_empty() {
        let subs = record
            .captures
            .iter()
            .map(|capture| Value::Object(json_span(&capture.name, record.input, capture.span)))
            .collect();
        node.insert("subs".to_string(), Value::Array(subs));
    }
    Value::Object(node)
}

/// The encoder a caller asked for, after resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoder<'a> {
    Native(NativeEncoder),
    /// Known only to the runtime module.
    Extension(&'a str),
}

impl<'a> Encoder<'a> {
    pub fn resolve(name: &'a str) -> Self {
        match NativeEncoder::from_name(name) {
            Some(native) => Encoder::Native(native),
            None => Encoder::Extension(name),
        }
    }

    /// The numeric code handed to the matching primitive; zero for extensions.
    pub fn code(self) -> i64 {
        match self {
            Encoder::Native(native) => native.code(),
            Encoder::Extension(_) => 0,
        }
    }

    pub fn name(self) -> &'a str {
        match self {
            Encoder::Native(native) => native.name(),
            Encoder::Extension(name) => name,
        }
    }
}
