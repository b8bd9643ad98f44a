// Tests for trace
use serde_json::Value;

use crate::*;

#[test]
fn test_condensed_trace() {
    let engine = Engine::new().unwrap();
    let pattern = engine.compile(b"[a-z]+").unwrap().pattern;
    let Trace::Traced { matched, trace } = engine.trace(pattern, 1, "condensed", b"abc1").unwrap() else {
        panic!("expected a trace");
    };
    assert!(matched);
    assert_eq!(trace.to_str(), Some("Matched [a-z]+ at 1..4, leftover 1"));

    let Trace::Traced { matched, trace } = engine.trace(pattern, 4, "condensed", b"abc1").unwrap() else {
        panic!("expected a trace");
    };
    assert!(!matched);
    assert_eq!(trace.to_str(), Some("No match for [a-z]+ at 4"));
}

#[test]
fn test_full_trace_lists_captures() {
    let engine = Engine::new().unwrap();
    let pattern = engine.compile(b"(?P<word>[a-z]+)(?P<num>[0-9]+)").unwrap().pattern;
    let Trace::Traced { matched, trace } = engine.trace(pattern, 1, "full", b"ab12").unwrap() else {
        panic!("expected a trace");
    };
    assert!(matched);
    let text = trace.to_str().unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("  regex: "));
    assert_eq!(lines[2], "  word 1..3: ab");
    assert_eq!(lines[3], "  num 3..5: 12");
}

#[test]
fn test_json_trace() {
    let engine = Engine::new().unwrap();
    let pattern = engine.compile(b"[0-9]+").unwrap().pattern;
    let Trace::Traced { matched, trace } = engine.trace(pattern, 0, "json", b"42").unwrap() else {
        panic!("expected a trace");
    };
    assert!(matched);
    let json: Value = serde_json::from_slice(&trace).unwrap();
    assert_eq!(json["expression"], "[0-9]+");
    assert_eq!(json["matched"], true);
    assert_eq!(json["start"], 1);
    assert_eq!(json["s"], 1);
    assert_eq!(json["e"], 3);
    assert_eq!(json["leftover"], 0);
}

#[test]
fn test_trace_sentinels() {
    let engine = Engine::new().unwrap();
    let pattern = engine.compile(b"x").unwrap().pattern;
    assert!(matches!(
        engine.trace(pattern, 1, "verbose", b"x").unwrap(),
        Trace::InvalidStyle
    ));
    engine.free_pattern(pattern);
    assert!(matches!(
        engine.trace(pattern, 1, "condensed", b"x").unwrap(),
        Trace::NoSuchPattern
    ));
}

#[test]
fn test_repeated_traces_under_a_limit() {
    let engine = Engine::new().unwrap();
    engine.set_alloc_limit(MIN_ALLOC_LIMIT_MB).unwrap();
    let pattern = engine.compile(b"(?P<word>[a-z]+)").unwrap().pattern;
    for i in 0..1000 {
        let input = format!("{}{i}", "xy".repeat(i % 50 + 1));
        let style = ["condensed", "full", "json"][i % 3];
        let Trace::Traced { matched, trace } = engine.trace(pattern, 1, style, input.as_bytes()).unwrap() else {
            panic!("expected a {style} trace");
        };
        assert!(matched);
        assert!(!trace.is_empty());
    }
}
