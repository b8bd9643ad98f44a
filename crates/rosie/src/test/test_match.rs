// Tests for the match dispatcher
use serde_json::Value;

use crate::*;

fn compile(engine: &Engine, expression: &str) -> PatternHandle {
    let compiled = engine.compile(expression.as_bytes()).unwrap();
    assert!(compiled.is_ok(), "{expression}: {:?}", compiled.diagnostics);
    compiled.pattern
}

#[test]
fn test_json_encoder() {
    let engine = Engine::new().unwrap();
    let pattern = compile(&engine, "(?P<user>[a-z]+)@(?P<host>[a-z]+)");
    let m = engine.match_input(pattern, 1, "json", b"joe@example!").unwrap();
    assert_eq!(m.status(), MatchStatus::Matched);
    assert_eq!(m.leftover(), 1);
    assert!(!m.abend());

    let json: Value = serde_json::from_slice(m.data().unwrap()).unwrap();
    assert_eq!(json["type"], "(?P<user>[a-z]+)@(?P<host>[a-z]+)");
    assert_eq!(json["s"], 1);
    assert_eq!(json["e"], 12);
    assert_eq!(json["data"], "joe@example");
    let subs = json["subs"].as_array().unwrap();
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[0]["type"], "user");
    assert_eq!(subs[0]["data"], "joe");
    assert_eq!(subs[1]["type"], "host");
    assert_eq!(subs[1]["s"], 5);
}

#[test]
fn test_line_and_matches_encoders() {
    let engine = Engine::new().unwrap();
    let pattern = compile(&engine, "[0-9]+");
    let m = engine.match_input(pattern, 1, "line", b"123 abc").unwrap();
    assert_eq!(m.data(), Some(&b"123 abc"[..]));
    drop(m);
    let m = engine.match_input(pattern, 1, "matches", b"123 abc").unwrap();
    assert_eq!(m.data(), Some(&b"123"[..]));
    assert_eq!(m.leftover(), 4);
}

#[test]
fn test_no_match_leftover() {
    let engine = Engine::new().unwrap();
    let pattern = compile(&engine, "[0-9]+");
    let m = engine.match_input(pattern, 2, "json", b"ab1").unwrap();
    assert_eq!(m.status(), MatchStatus::NoMatch);
    assert_eq!(m.data(), None);
    assert_eq!(m.leftover(), 2);
}

#[test]
fn test_start_offsets() {
    let engine = Engine::new().unwrap();
    let pattern = compile(&engine, "[a-z]+");

    let m = engine.match_input(pattern, -3, "matches", b"abc").unwrap();
    assert_eq!(m.data(), Some(&b"abc"[..]));
    drop(m);

    let m = engine.match_input(pattern, 3, "matches", b"abc").unwrap();
    assert_eq!(m.data(), Some(&b"c"[..]));
    assert_eq!(m.leftover(), 0);
    drop(m);

    let m = engine.match_input(pattern, 10, "matches", b"abc").unwrap();
    assert_eq!(m.status(), MatchStatus::NoMatch);
    assert_eq!(m.leftover(), 0);
}

#[test]
fn test_unknown_encoder_is_reported_in_band() {
    let engine = Engine::new().unwrap();
    let pattern = compile(&engine, "[a-z]+");
    let m = engine.match_input(pattern, 1, "yaml", b"abc").unwrap();
    assert_eq!(m.status(), MatchStatus::NoSuchEncoder);
    assert_eq!(m.data(), None);
}

#[test]
fn test_native_and_scripted_paths_agree() {
    let engine = Engine::new().unwrap();
    let pattern = compile(&engine, "[a-z]+[0-9]*");
    let inputs: [&[u8]; 3] = [b"abc123 tail", b"x", b"123"];
    for input in inputs {
        let native = engine.match_input(pattern, 1, "matches", input).unwrap();
        let native_result = (native.status(), native.data().map(<[u8]>::to_vec), native.leftover());
        drop(native);
        let scripted = engine.match_input(pattern, 1, "text", input).unwrap();
        let scripted_result = (
            scripted.status(),
            scripted.data().map(<[u8]>::to_vec),
            scripted.leftover(),
        );
        assert_eq!(native_result, scripted_result);
        assert!(scripted.match_time() >= 0);
        assert!(!scripted.abend());
    }
}

#[test]
fn test_default_encoder_aliases_json() {
    let engine = Engine::new().unwrap();
    let pattern = compile(&engine, "(?P<n>[0-9]+)");
    let json = engine
        .match_input(pattern, 1, "json", b"42!")
        .unwrap()
        .data()
        .map(<[u8]>::to_vec);
    let default = engine
        .match_input(pattern, 1, "default", b"42!")
        .unwrap()
        .data()
        .map(<[u8]>::to_vec);
    assert!(json.is_some());
    assert_eq!(json, default);
    assert_eq!(engine.stashed_scripted_result(), None);
}

#[test]
fn test_subs_and_color_encoders() {
    let engine = Engine::new().unwrap();
    let pattern = compile(&engine, "(?P<key>[a-z]+)=(?P<value>[0-9]+)");
    let m = engine.match_input(pattern, 1, "subs", b"port=80").unwrap();
    assert_eq!(m.data(), Some(&b"port\n80"[..]));
    drop(m);
    let m = engine.match_input(pattern, 1, "color", b"port=80;").unwrap();
    assert_eq!(m.data(), Some(&b"\x1b[32mport=80\x1b[0m"[..]));
    assert_eq!(m.leftover(), 1);
}

#[test]
fn test_binary_input() {
    let engine = Engine::new().unwrap();
    let pattern = compile(&engine, r"\xFF+");
    let input = b"\xff\xffa";
    let m = engine.match_input(pattern, 1, "matches", input).unwrap();
    assert_eq!(m.data(), Some(&b"\xff\xff"[..]));
    drop(m);
    let m = engine.match_input(pattern, 1, "text", input).unwrap();
    assert_eq!(m.data(), Some(&b"\xff\xff"[..]));
    assert_eq!(m.leftover(), 1);
}

#[test]
fn test_scripted_result_lives_until_next_scripted_match() {
    let engine = Engine::new().unwrap();
    let pattern = compile(&engine, "[a-z]+");

    let first = engine.match_input(pattern, 1, "text", b"first").unwrap();
    assert_eq!(first.data(), Some(&b"first"[..]));
    drop(first);
    assert_eq!(engine.stashed_scripted_result(), Some(b"first".to_vec()));

    // native matches and failed lookups leave the stash alone
    drop(engine.match_input(pattern, 1, "matches", b"native").unwrap());
    drop(engine.match_input(PatternHandle::NONE, 1, "text", b"none").unwrap());
    assert_eq!(engine.stashed_scripted_result(), Some(b"first".to_vec()));

    let second = engine.match_input(pattern, 1, "text", b"second").unwrap();
    assert_eq!(second.data(), Some(&b"second"[..]));
    drop(second);
    assert_eq!(engine.stashed_scripted_result(), Some(b"second".to_vec()));

    let missed = engine.match_input(pattern, 1, "text", b"123").unwrap();
    assert_eq!(missed.status(), MatchStatus::NoMatch);
    drop(missed);
    assert_eq!(engine.stashed_scripted_result(), None);
}

fn add_encoder(engine: &Engine, name: &str, body: &str) {
    engine.with_vm(|vm| {
        let source = format!(
            "local native = rosie.env.native
             rosie.env.encoders.{name} = function (input, s, e, caps) {body} end"
        );
        vm.execute(&source).unwrap();
    });
}

#[test]
fn test_scripted_matches_survive_collections() {
    let engine = Engine::new().unwrap();
    engine.set_alloc_limit(MIN_ALLOC_LIMIT_MB).unwrap();
    add_encoder(
        &engine,
        "collecting",
        r#"collectgarbage("collect") return native.buffer_sub(input, s, e)"#,
    );
    let pattern = compile(&engine, "[a-z]+");
    for i in 0..2000 {
        let input = format!("{}{i}", "abc".repeat(i % 97 + 1));
        let encoder = if i % 2 == 0 { "collecting" } else { "text" };
        let m = engine.match_input(pattern, 1, encoder, input.as_bytes()).unwrap();
        assert_eq!(m.data(), Some("abc".repeat(i % 97 + 1).as_bytes()), "{encoder} #{i}");
    }
}

#[test]
fn test_kept_input_is_revoked_after_the_call() {
    let engine = Engine::new().unwrap();
    add_encoder(&engine, "keeping", "kept = input return native.buffer_sub(input, s, e)");
    let pattern = compile(&engine, "[a-z]+");
    let m = engine.match_input(pattern, 1, "keeping", b"lent").unwrap();
    assert_eq!(m.data(), Some(&b"lent"[..]));
    drop(m);

    let kept_len = engine.with_vm(|vm| {
        vm.execute(r#"collectgarbage("collect") return rosie.env.native.buffer_len(kept)"#)
            .unwrap()[0]
            .as_integer()
    });
    assert_eq!(kept_len, Some(0));
}
