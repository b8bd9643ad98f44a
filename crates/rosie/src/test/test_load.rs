// Tests for load, loadfile and import
use std::io::Write;

use crate::diagnostics::{self, Severity};
use crate::*;

fn matches(engine: &Engine, expression: &str, input: &str) -> Option<String> {
    let compiled = engine.compile(expression.as_bytes()).unwrap();
    if !compiled.is_ok() {
        return None;
    }
    let m = engine
        .match_input(compiled.pattern, 1, "matches", input.as_bytes())
        .unwrap();
    let data = m.data().map(|d| String::from_utf8_lossy(d).into_owned());
    drop(m);
    engine.free_pattern(compiled.pattern);
    data
}

#[test]
fn test_load_bindings() {
    let engine = Engine::new().unwrap();
    let loaded = engine
        .load(b"-- greetings\n\nhello = [Hh]ello\nworld = [Ww]orld\ngreeting = ${hello}, ${world}!\n")
        .unwrap();
    assert!(loaded.ok);
    assert_eq!(loaded.package, None);
    assert!(loaded.diagnostics.is_none());
    assert_eq!(
        matches(&engine, "${greeting}", "Hello, world!?").as_deref(),
        Some("Hello, world!")
    );
}

#[test]
fn test_load_reports_declared_package() {
    let engine = Engine::new().unwrap();
    let loaded = engine.load(b"package mine\nx = [x]+").unwrap();
    assert!(loaded.ok);
    assert_eq!(loaded.package.as_deref(), Some("mine"));
}

#[test]
fn test_load_rebinding_warns() {
    let engine = Engine::new().unwrap();
    assert!(engine.load(b"n = [0-9]").unwrap().ok);
    let loaded = engine.load(b"n = [0-9]+").unwrap();
    assert!(loaded.ok);
    let diags = diagnostics::parse(&loaded.diagnostics.unwrap()).unwrap();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].severity, Severity::Warning);
    assert_eq!(diags[0].line, Some(1));
    assert_eq!(matches(&engine, "${n}", "123").as_deref(), Some("123"));
}

#[test]
fn test_failed_load_is_atomic() {
    let engine = Engine::new().unwrap();
    let loaded = engine.load(b"a = [a-z]+\nb = ${missing}\n").unwrap();
    assert!(!loaded.ok);
    let diags = diagnostics::parse(&loaded.diagnostics.unwrap()).unwrap();
    assert_eq!(diags.len(), 1);
    assert!(diags[0].is_error());
    assert_eq!(diags[0].line, Some(2));
    assert_eq!(diags[0].expression.as_deref(), Some("${missing}"));
    assert!(!engine.compile(b"${a}").unwrap().is_ok());
}

#[test]
fn test_load_diagnostics_are_stripped() {
    let engine = Engine::new().unwrap();
    let loaded = engine.load(b"this is not a binding").unwrap();
    assert!(!loaded.ok);
    let text = loaded.diagnostics.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&text).unwrap();
    let record = value[0].as_object().unwrap();
    assert!(record.keys().all(|key| !key.starts_with('_')));
    assert_eq!(record["message"], "syntax error");
}

#[test]
fn test_loadfile() {
    let engine = Engine::new().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "package files").unwrap();
    writeln!(file, "ext = \\.[a-z]{{2,4}}").unwrap();
    writeln!(file, "broken = (").unwrap();
    let path = file.path().to_str().unwrap();

    let loaded = engine.loadfile(path).unwrap();
    assert!(!loaded.ok);
    assert_eq!(loaded.package.as_deref(), Some("files"));
    let diags = diagnostics::parse(&loaded.diagnostics.unwrap()).unwrap();
    assert_eq!(diags[0].filename.as_deref(), Some(path));
    assert_eq!(diags[0].line, Some(3));

    std::fs::write(path, "package files\next = \\.[a-z]{2,4}\n").unwrap();
    let loaded = engine.loadfile(path).unwrap();
    assert!(loaded.ok);
    assert_eq!(matches(&engine, "${ext}", ".toml").as_deref(), Some(".toml"));
}

#[test]
fn test_loadfile_missing_file() {
    let engine = Engine::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.rpl");
    let loaded = engine.loadfile(path.to_str().unwrap()).unwrap();
    assert!(!loaded.ok);
    let diags = diagnostics::parse(&loaded.diagnostics.unwrap()).unwrap();
    assert!(diags[0].message.starts_with("cannot open file"));
}

#[test]
fn test_import_standard_library() {
    let engine = Engine::new().unwrap();
    let imported = engine.import("num", None).unwrap();
    assert!(imported.ok);
    assert_eq!(imported.package.as_deref(), Some("num"));
    assert!(imported.diagnostics.is_none());
    assert_eq!(matches(&engine, "${num.float}", "-3.25e2x").as_deref(), Some("-3.25e2"));
    assert_eq!(matches(&engine, "${int}", "12"), None);
}

#[test]
fn test_import_with_alias() {
    let engine = Engine::new().unwrap();
    assert!(engine.import("word", Some("w")).unwrap().ok);
    assert_eq!(matches(&engine, "${w.id}", "_tmp1 = 2").as_deref(), Some("_tmp1"));
    assert_eq!(matches(&engine, "${word.id}", "x"), None);

    assert!(engine.import("word", Some(".")).unwrap().ok);
    assert_eq!(matches(&engine, "${alpha}", "abc1").as_deref(), Some("abc"));
}

#[test]
fn test_import_resolves_nested_imports() {
    let engine = Engine::new().unwrap();
    assert!(engine.import("net", None).unwrap().ok);
    assert_eq!(
        matches(&engine, "${net.hostport}", "10.0.0.1:8080 up").as_deref(),
        Some("10.0.0.1:8080")
    );
    assert_eq!(matches(&engine, "${num.digit}", "1"), None);
}

#[test]
fn test_import_from_load_source() {
    let engine = Engine::new().unwrap();
    let loaded = engine.load(b"import num as n\nversion = v${n.int}").unwrap();
    assert!(loaded.ok);
    assert_eq!(matches(&engine, "${version}", "v12.").as_deref(), Some("v12"));
}

#[test]
fn test_import_missing_package() {
    let engine = Engine::new().unwrap();
    let imported = engine.import("nosuchpkg", None).unwrap();
    assert!(!imported.ok);
    assert_eq!(imported.package, None);
    let diags = diagnostics::parse(&imported.diagnostics.unwrap()).unwrap();
    assert_eq!(diags[0].who, "importer");
    assert!(diags[0].message.contains("not found"));
}

#[test]
fn test_import_from_custom_libpath() {
    let engine = Engine::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("tags.rpl"), "package tags\ntag = #[a-z]+\n").unwrap();
    std::fs::write(dir.path().join("liar.rpl"), "package other\nx = x\n").unwrap();
    let libpath = format!("/nonexistent:{}", dir.path().display());
    engine.set_libpath(&libpath).unwrap();

    assert!(engine.import("tags", None).unwrap().ok);
    assert_eq!(matches(&engine, "${tags.tag}", "#rust!").as_deref(), Some("#rust"));

    let imported = engine.import("liar", None).unwrap();
    assert!(!imported.ok);
    let diags = diagnostics::parse(&imported.diagnostics.unwrap()).unwrap();
    assert!(diags[0].message.contains("declares package other"));
}

#[test]
fn test_repeated_imports_with_aliases() {
    let engine = Engine::new().unwrap();
    engine.set_alloc_limit(MIN_ALLOC_LIMIT_MB).unwrap();
    for i in 0..300 {
        let alias = format!("n{i}");
        let outcome = engine.import("num", Some(&alias)).unwrap();
        assert!(outcome.ok, "{alias}");
        assert_eq!(outcome.package.as_deref(), Some("num"));
    }
    assert!(engine.compile(b"${n299.int}").unwrap().is_ok());
}
