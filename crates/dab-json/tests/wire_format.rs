//! Wire-format laws: round-trip stability, key ordering, number typing.

use dab_json::{parse, JsonValue, ParseErrorKind};

#[test]
fn parse_basics() {
    let v = parse("{\"a\":1,\"b\":true,\"c\":null,\"d\":[1,2.5,\"x\"]}").expect("parse");

    assert_eq!(v.get("a"), Some(&JsonValue::Int(1)));
    assert_eq!(v.get("b"), Some(&JsonValue::Bool(true)));
    assert_eq!(v.get("c"), Some(&JsonValue::Null));
    let d = v.get("d").expect("d");
    assert_eq!(d.idx(0), Some(&JsonValue::Int(1)));
    assert_eq!(d.idx(1), Some(&JsonValue::Float(2.5)));
    assert_eq!(d.idx(2).and_then(|x| x.string().ok()), Some("x"));

    let wire = v.serialize(true);
    assert_eq!(wire, "{\"a\":1,\"b\":true,\"c\":null,\"d\":[1,2.5,\"x\"]}");
    assert_eq!(parse(&wire), Ok(v));
}

#[test]
fn round_trip_holds_for_parseable_inputs() {
    let inputs = [
        "null",
        "true",
        "-42",
        "3.5",
        "1e3",
        "\"plain\"",
        "\"esc \\\" \\\\ \\r \\n \\t\"",
        "[]",
        "[1,[2,[3]]]",
        "{}",
        "{\"k\":{\"nested\":[null,false,0.25]}}",
        "{z:1,a:2,m:{q:\"v\"}}",
    ];
    for input in inputs {
        let first = parse(input).expect("first parse");
        let wire = first.serialize(true);
        let second = parse(&wire).expect("re-parse");
        assert_eq!(first, second, "round-trip failed for {input}");
        assert_eq!(wire, second.serialize(true), "unstable wire for {input}");
    }
}

#[test]
fn object_keys_emit_sorted_and_replacement_keeps_position() {
    let mut v = parse("{\"m\":1,\"a\":2,\"z\":3}").expect("parse");
    assert_eq!(v.serialize(true), "{\"a\":2,\"m\":1,\"z\":3}");

    *v.entry("m") = 99i64.into();
    assert_eq!(v.serialize(true), "{\"a\":2,\"m\":99,\"z\":3}");
}

#[test]
fn number_typing_survives_round_trip() {
    let int = parse("3").expect("int");
    assert!(int.is_int());
    assert!(parse(&int.serialize(true)).expect("re-parse").is_int());

    for text in ["3.0", "3e0"] {
        let float = parse(text).expect("float");
        assert!(float.is_float(), "{text} should parse as float");
        let round = parse(&float.serialize(true)).expect("re-parse");
        assert!(round.is_float(), "{text} should re-parse as float");
    }
}

#[test]
fn percent_escapes_round_trip_as_bytes() {
    let v = JsonValue::Str("caf\u{e9}".into());
    let wire = v.serialize(true);
    assert_eq!(wire, "\"caf%C3%A9\"");
    // %HH is opaque to the parser; the escaped text itself round-trips
    let round = parse(&wire).expect("re-parse");
    assert_eq!(round.serialize(true), "\"caf%C3%A9\"");
}

#[test]
fn error_offsets_point_at_the_failure() {
    let err = parse("{\"a\":1,}x").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::TrailingGarbage);
    assert_eq!(err.offset, 8);

    let err = parse("[1 ,2, }").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::InvalidSymbol);
}
