// Native matching primitive
// Compiled matchers and the buffers they produce, both exposed to Lua as userdata.

use std::time::Instant;

use luars::{LuaMethodProvider, LuaUserData};
use regex_automata::meta::Regex;
use regex_automata::util::syntax;
use regex_automata::{Anchored, Input, MatchKind, PatternID};

use crate::encoder::{Capture, MatchRecord, NativeEncoder, Span};

/// A compiled matcher. Lives inside the runtime as userdata, stored in the
/// compiled-pattern object under the `peg` key.
#[derive(LuaUserData)]
pub struct Peg {
    regex: Regex,
    name: String,
    group_names: Vec<String>,
}

/// Result of the native matching primitive, minus the encoded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeOutcome {
    pub matched: bool,
    pub leftover: i64,
    pub abend: bool,
    pub total_time: i64,
    pub match_time: i64,
}

fn syntax_config() -> syntax::Config {
    syntax::Config::new().unicode(false).utf8(false)
}

/// Converts a 1-based start position into a byte index. `None` when the start
/// lies past the end of the input.
pub fn start_index(start: i64, len: usize) -> Option<usize> {
    let index = usize::try_from(start.max(1) - 1).ok()?;
    (index <= len).then_some(index)
}

fn micros(since: Instant) -> i64 {
    i64::try_from(since.elapsed().as_micros()).unwrap_or(i64::MAX)
}

impl Peg {
    pub fn compile(source: &str, name: &str) -> Result<Peg, String> {
        let mut builder = Regex::builder();
        builder.configure(Regex::config().match_kind(MatchKind::LeftmostFirst));
        builder.syntax(syntax_config());
        let regex = builder.build(source).map_err(|e| e.to_string())?;
        let group_names = regex
            .group_info()
            .pattern_names(PatternID::ZERO)
            .enumerate()
            .skip(1)
            .map(|(index, group)| group.map_or_else(|| index.to_string(), str::to_string))
            .collect();
        Ok(Peg {
            regex,
            name: name.to_string(),
            group_names,
        })
    }

    /// Anchored match at `start` (0-based). Returns the overall span and the
    /// participating capture groups.
    pub fn find(&self, input: &[u8], start: usize) -> Option<(Span, Vec<Capture>)> {
        let search = Input::new(input)
            .span(start..input.len())
            .anchored(Anchored::Yes);
        let mut caps = self.regex.create_captures();
        self.regex.search_captures(&search, &mut caps);
        let found = caps.get_match()?;
        let captures = self
            .group_names
            .iter()
            .enumerate()
            .filter_map(|(offset, name)| {
                caps.get_group(offset + 1).map(|span| Capture {
                    name: name.clone(),
                    span: Span {
                        start: span.start,
                        end: span.end,
                    },
                })
            })
            .collect();
        Some((
            Span {
                start: found.start(),
                end: found.end(),
            },
            captures,
        ))
    }

    /// The native matching primitive: match at the 1-based `start` and encode
    /// the result into `out` with a built-in encoder. On no-match `out` is left
    /// empty.
    pub fn rmatch(
        &self,
        input: &[u8],
        start: i64,
        encoder: NativeEncoder,
        out: &mut Vec<u8>,
    ) -> serde_json::Result<NativeOutcome> {
        let began = Instant::now();
        out.clear();
        let Some(index) = start_index(start, input.len()) else {
            return Ok(NativeOutcome {
                matched: false,
                leftover: 0,
                abend: false,
                total_time: micros(began),
                match_time: 0,
            });
        };
        let found = self.find(input, index);
        let match_time = micros(began);
        let Some((span, captures)) = found else {
            return Ok(NativeOutcome {
                matched: false,
                leftover: (input.len() - index) as i64,
                abend: false,
                total_time: micros(began),
                match_time,
            });
        };
        let record = MatchRecord {
            pattern_name: &self.name,
            input,
            span,
            captures,
        };
        encoder.encode(&record, out)?;
        Ok(NativeOutcome {
            matched: true,
            leftover: (input.len() - span.end) as i64,
            abend: false,
            total_time: micros(began),
            match_time,
        })
    }
}

/// Bytes produced by a built-in encoder when the primitive is called from Lua.
/// Handed back to the boundary without copying.
#[derive(LuaUserData)]
pub struct RBuffer {
    data: Vec<u8>,
}

impl RBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        RBuffer { data }
    }

    /// Moves the bytes out, leaving the userdata empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_index() {
        assert_eq!(start_index(1, 3), Some(0));
        assert_eq!(start_index(-5, 3), Some(0));
        assert_eq!(start_index(4, 3), Some(3));
        assert_eq!(start_index(5, 3), None);
    }

    #[test]
    fn test_find_is_anchored() {
        let peg = Peg::compile("[0-9]+", "*").unwrap();
        assert!(peg.find(b"abc123", 0).is_none());
        let (span, _) = peg.find(b"abc123", 3).unwrap();
        assert_eq!((span.start, span.end), (3, 6));
    }

    #[test]
    fn test_find_reports_named_and_numbered_groups() {
        let peg = Peg::compile("(?P<key>[a-z]+)=([0-9]+)?", "kv").unwrap();
        let (_, captures) = peg.find(b"port=80", 0).unwrap();
        assert_eq!(captures.len(), 2);
        assert_eq!(captures[0].name, "key");
        assert_eq!(captures[1].name, "2");

        let (_, captures) = peg.find(b"port=", 0).unwrap();
        assert_eq!(captures.len(), 1);
    }

    #[test]
    fn test_rmatch_leftover() {
        let peg = Peg::compile("[a-z]+", "*").unwrap();
        let mut out = Vec::new();
        let outcome = peg
            .rmatch(b"abc123", 1, NativeEncoder::Matches, &mut out)
            .unwrap();
        assert!(outcome.matched);
        assert_eq!(outcome.leftover, 3);
        assert_eq!(out, b"abc");

        let outcome = peg
            .rmatch(b"abc123", 4, NativeEncoder::Matches, &mut out)
            .unwrap();
        assert!(!outcome.matched);
        assert_eq!(outcome.leftover, 3);
        assert!(out.is_empty());
    }

    #[test]
    fn test_compile_error_is_reported() {
        let err = Peg::compile("(unclosed", "*").err().unwrap();
        assert!(!err.is_empty());
    }
}
