//! Dynamic JSON value model used as the DAB wire format.
//!
//! The broker speaks a pragmatic JSON dialect rather than the RFC grammar:
//! object member names may be bare symbols, trailing commas are tolerated in
//! objects, the escape set is fixed at `\" \\ \r \n \t`, and non-ASCII or
//! control bytes serialize as `%HH`. [`JsonValue`] is the tagged union behind
//! every payload, reply, and telemetry sample; [`parse`] and
//! [`JsonValue::serialize`] are guaranteed to round-trip for every value the
//! serializer can produce.

pub mod error;
pub mod parse;
pub mod ser;
pub mod value;

pub use error::{JsonError, ParseError, ParseErrorKind};
pub use parse::{parse, parse_prefix};
pub use value::JsonValue;

impl JsonValue {
    /// Serialize into a compact string; the wire always uses `quote_names`.
    pub fn serialize(&self, quote_names: bool) -> String {
        ser::to_string(self, quote_names)
    }
}

impl std::fmt::Display for JsonValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&ser::to_string(self, true))
    }
}

impl std::str::FromStr for JsonValue {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}
