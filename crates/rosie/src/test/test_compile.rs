// Tests for pattern compilation
use crate::diagnostics::{self, Severity};
use crate::*;

#[test]
fn test_compile_valid_expression() {
    let engine = Engine::new().unwrap();
    let compiled = engine.compile(b"[a-z]+@[a-z]+").unwrap();
    assert!(compiled.is_ok());
    assert!(!compiled.pattern.is_none());
    assert!(compiled.diagnostics.is_none());
}

#[test]
fn test_compile_empty_expression_fails() {
    let engine = Engine::new().unwrap();
    for expression in [&b""[..], b"   "] {
        let compiled = engine.compile(expression).unwrap();
        assert_eq!(compiled.pattern, PatternHandle::NONE);
        let diags = diagnostics::parse(&compiled.diagnostics.unwrap()).unwrap();
        assert_eq!(diags.len(), 1);
        assert!(diags[0].is_error());
        assert_eq!(diags[0].who, "compiler");
    }
}

#[test]
fn test_compile_invalid_regex_fails() {
    let engine = Engine::new().unwrap();
    let compiled = engine.compile(b"(unclosed").unwrap();
    assert!(compiled.pattern.is_none());
    let diags = diagnostics::parse(&compiled.diagnostics.unwrap()).unwrap();
    assert_eq!(diags[0].severity, Severity::Error);
    assert!(diags[0].message.starts_with("invalid expression"));
    assert_eq!(diags[0].expression.as_deref(), Some("(unclosed"));
}

#[test]
fn test_compile_unbound_reference_fails() {
    let engine = Engine::new().unwrap();
    let compiled = engine.compile(b"${nope}-[0-9]").unwrap();
    assert!(compiled.pattern.is_none());
    let diags = diagnostics::parse(&compiled.diagnostics.unwrap()).unwrap();
    assert!(diags[0].message.contains("nope"));
}

#[test]
fn test_compile_diagnostics_keep_internal_fields() {
    let engine = Engine::new().unwrap();
    let compiled = engine.compile(b"(").unwrap();
    let text = compiled.diagnostics.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&text).unwrap();
    assert!(value[0].get("_context").is_some());
}

#[test]
fn test_compile_uses_loaded_bindings() {
    let engine = Engine::new().unwrap();
    assert!(engine.load(b"digits = [0-9]+").unwrap().ok);
    let compiled = engine.compile(b"v${digits}").unwrap();
    assert!(compiled.is_ok());
    let m = engine
        .match_input(compiled.pattern, 1, "matches", b"v42 rest")
        .unwrap();
    assert_eq!(m.data(), Some(&b"v42"[..]));
    assert_eq!(m.leftover(), 5);
}
