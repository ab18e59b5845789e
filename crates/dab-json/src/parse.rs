//! Left-to-right parser for the pragmatic wire grammar.
//!
//! The grammar is a superset of strict JSON: object member names may be bare
//! symbols (`[A-Za-z_][A-Za-z_0-9]*`), a trailing comma is tolerated before
//! `}`, and the string escape set is the five sequences `\" \\ \r \n \t` with
//! every other `\x` collapsing to `x` literally. Numbers carry at most one
//! leading sign; a `.` or exponent classifies the literal as a float.

use std::collections::BTreeMap;

use crate::error::{ParseError, ParseErrorKind};
use crate::value::JsonValue;

/// Parse a complete document, rejecting non-whitespace trailing input.
pub fn parse(input: &str) -> Result<JsonValue, ParseError> {
    let mut parser = Parser::new(input);
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos < parser.bytes.len() {
        return Err(parser.err(ParseErrorKind::TrailingGarbage));
    }
    Ok(value)
}

/// Parse one value off the front of `input`, returning the remainder.
pub fn parse_prefix(input: &str) -> Result<(JsonValue, &str), ParseError> {
    let mut parser = Parser::new(input);
    let value = parser.value()?;
    Ok((value, &input[parser.pos..]))
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn is_symbol_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_symbol(b: u8) -> bool {
    is_symbol_start(b) || b.is_ascii_digit()
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn err(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(kind, self.pos)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(is_space) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_literal(&mut self, literal: &str) -> bool {
        if self.bytes[self.pos..].starts_with(literal.as_bytes()) {
            self.pos += literal.len();
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Result<JsonValue, ParseError> {
        self.skip_ws();
        match self.peek() {
            Some(b'{') => self.object(),
            Some(b'[') => self.array(),
            Some(b'"') => {
                self.pos += 1;
                self.string_body().map(JsonValue::Str)
            }
            Some(b) if b.is_ascii_digit() || b == b'+' || b == b'-' => self.number(),
            _ => {
                if self.eat_literal("true") {
                    Ok(JsonValue::Bool(true))
                } else if self.eat_literal("false") {
                    Ok(JsonValue::Bool(false))
                } else if self.eat_literal("null") {
                    Ok(JsonValue::Null)
                } else {
                    Err(self.err(ParseErrorKind::InvalidSymbol))
                }
            }
        }
    }

    fn object(&mut self) -> Result<JsonValue, ParseError> {
        self.pos += 1; // {
        let mut map = BTreeMap::new();
        let mut first = true;
        loop {
            self.skip_ws();
            if self.eat(b'}') {
                break;
            }
            if !first {
                if !self.eat(b',') {
                    return Err(self.err(ParseErrorKind::MissingComma));
                }
                self.skip_ws();
                // trailing comma before the closing brace is tolerated
                if self.eat(b'}') {
                    break;
                }
            }
            first = false;

            let name = self.member_name()?;
            self.skip_ws();
            if !self.eat(b':') {
                return Err(self.err(ParseErrorKind::MissingColon));
            }
            let value = self.value()?;
            // last write wins on duplicate keys
            map.insert(name, value);
        }
        Ok(JsonValue::Object(map))
    }

    fn member_name(&mut self) -> Result<String, ParseError> {
        if self.eat(b'"') {
            return self.string_body();
        }
        if !self.peek().is_some_and(is_symbol_start) {
            return Err(self.err(ParseErrorKind::InvalidSymbol));
        }
        let start = self.pos;
        while self.peek().is_some_and(is_symbol) {
            self.pos += 1;
        }
        Ok(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
    }

    fn array(&mut self) -> Result<JsonValue, ParseError> {
        self.pos += 1; // [
        let mut items = Vec::new();
        let mut first = true;
        loop {
            self.skip_ws();
            if self.eat(b']') {
                break;
            }
            if !first {
                if !self.eat(b',') {
                    return Err(self.err(ParseErrorKind::MissingComma));
                }
            }
            first = false;
            items.push(self.value()?);
        }
        Ok(JsonValue::Array(items))
    }

    fn string_body(&mut self) -> Result<String, ParseError> {
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.err(ParseErrorKind::UnterminatedString)),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(String::from_utf8_lossy(&out).into_owned());
                }
                Some(b'\\') => {
                    let Some(next) = self.bytes.get(self.pos + 1).copied() else {
                        self.pos += 1;
                        return Err(self.err(ParseErrorKind::UnterminatedString));
                    };
                    out.push(match next {
                        b'r' => b'\r',
                        b'n' => b'\n',
                        b't' => b'\t',
                        // covers \" and \\; any other \x yields x literally
                        other => other,
                    });
                    self.pos += 2;
                }
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
    }

    fn number(&mut self) -> Result<JsonValue, ParseError> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
            self.pos += 1;
        }

        let mut saw_digit = false;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            saw_digit = true;
            self.pos += 1;
        }

        let mut is_float = false;
        if self.eat(b'.') {
            is_float = true;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                saw_digit = true;
                self.pos += 1;
            }
        }

        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            let mut exp_digits = false;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                exp_digits = true;
                self.pos += 1;
            }
            if !exp_digits {
                return Err(ParseError::new(ParseErrorKind::InvalidNumber, start));
            }
        }

        if !saw_digit {
            return Err(ParseError::new(ParseErrorKind::InvalidNumber, start));
        }

        let text = String::from_utf8_lossy(&self.bytes[start..self.pos]);
        if is_float {
            text.parse::<f64>()
                .map(JsonValue::Float)
                .map_err(|_| ParseError::new(ParseErrorKind::InvalidNumber, start))
        } else {
            text.parse::<i64>()
                .map(JsonValue::Int)
                .map_err(|_| ParseError::new(ParseErrorKind::InvalidNumber, start))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse("true"), Ok(JsonValue::Bool(true)));
        assert_eq!(parse("false"), Ok(JsonValue::Bool(false)));
        assert_eq!(parse("null"), Ok(JsonValue::Null));
        assert_eq!(parse("42"), Ok(JsonValue::Int(42)));
        assert_eq!(parse("-7"), Ok(JsonValue::Int(-7)));
        assert_eq!(parse("+7"), Ok(JsonValue::Int(7)));
        assert_eq!(parse("\"hi\""), Ok(JsonValue::Str("hi".into())));
    }

    #[test]
    fn test_number_classification() {
        assert_eq!(parse("3"), Ok(JsonValue::Int(3)));
        assert_eq!(parse("3.0"), Ok(JsonValue::Float(3.0)));
        assert_eq!(parse("3e0"), Ok(JsonValue::Float(3.0)));
        assert_eq!(parse("2.5e2"), Ok(JsonValue::Float(250.0)));
        assert_eq!(parse("-1.5"), Ok(JsonValue::Float(-1.5)));
    }

    #[test]
    fn test_bare_member_names() {
        let v = parse("{appId: \"netflix\", _x9: 1}").expect("parse");
        assert_eq!(v.get("appId").and_then(|a| a.string().ok()), Some("netflix"));
        assert_eq!(v.get("_x9"), Some(&JsonValue::Int(1)));
    }

    #[test]
    fn test_trailing_comma_in_object() {
        let v = parse("{\"a\": 1, }").expect("parse");
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn test_nested_structures() {
        let v = parse("{\"a\":[1,[2,{\"b\":null}]]}").expect("parse");
        let inner = v.get("a").and_then(|a| a.idx(1)).and_then(|a| a.idx(1));
        assert_eq!(inner.and_then(|o| o.get("b")), Some(&JsonValue::Null));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            parse("\"a\\\"b\\\\c\\r\\n\\t\""),
            Ok(JsonValue::Str("a\"b\\c\r\n\t".into()))
        );
        // unknown escapes collapse to the escaped character
        assert_eq!(parse("\"\\q\\u1234\""), Ok(JsonValue::Str("qu1234".into())));
    }

    #[test]
    fn test_whitespace_between_tokens() {
        let v = parse(" {\r\n\t\"a\" :\t1 , \"b\" : [ 1 , 2 ] } ").expect("parse");
        assert_eq!(v.get("a"), Some(&JsonValue::Int(1)));
        assert_eq!(v.get("b").map(JsonValue::len), Some(2));
    }

    #[test]
    fn test_missing_comma() {
        let err = parse("{\"a\":1 \"b\":2}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingComma);
        let err = parse("[1 2]").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingComma);
    }

    #[test]
    fn test_missing_colon() {
        let err = parse("{\"a\" 1}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingColon);
    }

    #[test]
    fn test_unterminated_string() {
        let err = parse("\"abc").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedString);
    }

    #[test]
    fn test_invalid_symbol() {
        let err = parse("nope").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidSymbol);
        let err = parse("{9bad: 1}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidSymbol);
    }

    #[test]
    fn test_trailing_garbage() {
        let err = parse("{} x").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TrailingGarbage);
        assert_eq!(err.offset, 3);
    }

    #[test]
    fn test_stray_sign_rejected() {
        assert!(parse("1+2").is_err());
        assert!(parse("--1").is_err());
    }

    #[test]
    fn test_parse_prefix_returns_remainder() {
        let (value, rest) = parse_prefix("{\"a\":1} tail").expect("parse");
        assert_eq!(value.get("a"), Some(&JsonValue::Int(1)));
        assert_eq!(rest, " tail");
    }

    #[test]
    fn test_duplicate_keys_last_write_wins() {
        let v = parse("{\"a\":1,\"a\":2}").expect("parse");
        assert_eq!(v.get("a"), Some(&JsonValue::Int(2)));
    }

    #[test]
    fn test_empty_containers() {
        assert_eq!(parse("{}"), Ok(JsonValue::new_object()));
        assert_eq!(parse("[]"), Ok(JsonValue::new_array()));
    }
}
