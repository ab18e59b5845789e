//! Tagged-union JSON value.
//!
//! `JsonValue` is the universal argument and return type of the broker: every
//! request payload, reply, and telemetry sample is one of these. Objects keep
//! their members in lexicographic key order so serialization is stable, and
//! duplicate keys resolve last-write-wins.

use std::collections::BTreeMap;

use crate::error::JsonError;

/// A dynamic JSON value.
///
/// `ArrayMarker` is a construction-time sentinel consumed by
/// [`JsonValue::from_elems`]; it never appears in parsed input or serialized
/// output.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum JsonValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<JsonValue>),
    Object(BTreeMap<String, JsonValue>),
    ArrayMarker,
}

impl JsonValue {
    /// Sentinel that forces [`from_elems`](Self::from_elems) to build an array.
    pub const ARRAY: JsonValue = JsonValue::ArrayMarker;

    /// Empty object.
    pub fn new_object() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// Empty array.
    pub fn new_array() -> Self {
        Self::Array(Vec::new())
    }

    /// Variant name used in `WrongType` errors and logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::ArrayMarker => "array-marker",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    pub fn is_str(&self) -> bool {
        matches!(self, Self::Str(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    // ----- exact-type reads -----

    pub fn boolean(&self) -> Result<bool, JsonError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(other.wrong_type("bool")),
        }
    }

    pub fn integer(&self) -> Result<i64, JsonError> {
        match self {
            Self::Int(n) => Ok(*n),
            other => Err(other.wrong_type("int")),
        }
    }

    pub fn double(&self) -> Result<f64, JsonError> {
        match self {
            Self::Float(f) => Ok(*f),
            other => Err(other.wrong_type("float")),
        }
    }

    pub fn string(&self) -> Result<&str, JsonError> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(other.wrong_type("string")),
        }
    }

    pub fn members(&self) -> Result<&BTreeMap<String, JsonValue>, JsonError> {
        match self {
            Self::Object(map) => Ok(map),
            other => Err(other.wrong_type("object")),
        }
    }

    pub fn elements(&self) -> Result<&[JsonValue], JsonError> {
        match self {
            Self::Array(items) => Ok(items),
            other => Err(other.wrong_type("array")),
        }
    }

    fn wrong_type(&self, expected: &'static str) -> JsonError {
        JsonError::WrongType {
            expected,
            found: self.type_name(),
        }
    }

    /// Member lookup; `None` for non-objects and absent keys.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Whether `key` is present with a non-null value.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_null())
    }

    /// Positional lookup; `None` for non-arrays and out-of-range indices.
    pub fn idx(&self, index: usize) -> Option<&JsonValue> {
        match self {
            Self::Array(items) => items.get(index),
            _ => None,
        }
    }

    /// Member or element count; null counts as empty.
    pub fn len(&self) -> usize {
        match self {
            Self::Object(map) => map.len(),
            Self::Array(items) => items.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Object members in key order; empty for non-objects. Restartable.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        let map = match self {
            Self::Object(map) => Some(map),
            _ => None,
        };
        map.into_iter().flatten().map(|(k, v)| (k.as_str(), v))
    }

    /// Array elements in order; empty for non-arrays. Restartable.
    pub fn items(&self) -> impl Iterator<Item = &JsonValue> {
        let items = match self {
            Self::Array(items) => Some(items),
            _ => None,
        };
        items.into_iter().flatten()
    }

    // ----- coercing writes -----

    /// Member slot, promoting the value to an object first if needed.
    pub fn entry(&mut self, key: &str) -> &mut JsonValue {
        if !self.is_object() {
            *self = Self::new_object();
        }
        match self {
            Self::Object(map) => map.entry(key.to_owned()).or_default(),
            _ => unreachable!(),
        }
    }

    /// Element slot, promoting to an array and growing with nulls if needed.
    ///
    /// Indexing one past the end appends; indexing further pads the gap.
    pub fn slot(&mut self, index: usize) -> &mut JsonValue {
        if !self.is_array() {
            *self = Self::new_array();
        }
        match self {
            Self::Array(items) => {
                if index >= items.len() {
                    items.resize(index + 1, JsonValue::Null);
                }
                &mut items[index]
            }
            _ => unreachable!(),
        }
    }

    /// Append to the value, promoting it to an array first if needed.
    pub fn push(&mut self, value: impl Into<JsonValue>) {
        if !self.is_array() {
            *self = Self::new_array();
        }
        if let Self::Array(items) = self {
            items.push(value.into());
        }
    }

    /// Coerce to a bool in place: integers collapse via `!= 0`, anything else
    /// resets to `false`.
    pub fn coerce_bool(&mut self) -> &mut bool {
        match self {
            Self::Bool(_) => {}
            Self::Int(n) => *self = Self::Bool(*n != 0),
            _ => *self = Self::Bool(false),
        }
        match self {
            Self::Bool(b) => b,
            _ => unreachable!(),
        }
    }

    /// Coerce to an integer in place: floats truncate, anything else resets
    /// to `0`.
    pub fn coerce_int(&mut self) -> &mut i64 {
        match self {
            Self::Int(_) => {}
            Self::Float(f) => *self = Self::Int(*f as i64),
            _ => *self = Self::Int(0),
        }
        match self {
            Self::Int(n) => n,
            _ => unreachable!(),
        }
    }

    /// Coerce to a float in place: integers widen, anything else resets to
    /// `0.0`.
    pub fn coerce_float(&mut self) -> &mut f64 {
        match self {
            Self::Float(_) => {}
            Self::Int(n) => *self = Self::Float(*n as f64),
            _ => *self = Self::Float(0.0),
        }
        match self {
            Self::Float(f) => f,
            _ => unreachable!(),
        }
    }

    /// Coerce to a string in place; non-strings reset to empty.
    pub fn coerce_string(&mut self) -> &mut String {
        if !self.is_str() {
            *self = Self::Str(String::new());
        }
        match self {
            Self::Str(s) => s,
            _ => unreachable!(),
        }
    }

    /// Brace-list constructor.
    ///
    /// Mirrors the literal-building rules of the wire format's origin:
    /// a two-element list whose head is a string becomes a single-member
    /// object, a list of objects merges into one object (later keys win),
    /// and anything else becomes an array. [`JsonValue::ARRAY`] elements are
    /// skipped, so prepending one forces the array interpretation for lists
    /// that would otherwise read as objects.
    pub fn from_elems(mut elems: Vec<JsonValue>) -> JsonValue {
        if elems.len() == 2 && elems[0].is_str() {
            let value = elems.pop().unwrap_or_default();
            let name = match elems.pop() {
                Some(Self::Str(name)) => name,
                _ => String::new(),
            };
            return Self::member(name, value);
        }

        if !elems.is_empty() && elems.iter().all(JsonValue::is_object) {
            let mut map = BTreeMap::new();
            for elem in elems {
                if let Self::Object(members) = elem {
                    map.extend(members);
                }
            }
            return Self::Object(map);
        }

        Self::Array(
            elems
                .into_iter()
                .filter(|e| !matches!(e, Self::ArrayMarker))
                .collect(),
        )
    }

    /// Single-member object, the `{"name": value}` literal.
    pub fn member(name: impl Into<String>, value: impl Into<JsonValue>) -> JsonValue {
        let mut map = BTreeMap::new();
        map.insert(name.into(), value.into());
        Self::Object(map)
    }
}

impl From<bool> for JsonValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for JsonValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for JsonValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<u32> for JsonValue {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for JsonValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for JsonValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for JsonValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<JsonValue>> for JsonValue {
    fn from(v: Vec<JsonValue>) -> Self {
        Self::Array(v)
    }
}

impl From<BTreeMap<String, JsonValue>> for JsonValue {
    fn from(v: BTreeMap<String, JsonValue>) -> Self {
        Self::Object(v)
    }
}

impl<T: Into<JsonValue>> FromIterator<T> for JsonValue {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::Array(iter.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for JsonValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, JsonValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<JsonValue> for serde_json::Value {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null | JsonValue::ArrayMarker => serde_json::Value::Null,
            JsonValue::Bool(b) => serde_json::Value::Bool(b),
            JsonValue::Int(n) => serde_json::Value::Number(n.into()),
            JsonValue::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            JsonValue::Str(s) => serde_json::Value::String(s),
            JsonValue::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            JsonValue::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_promotes_to_object() {
        let mut v = JsonValue::Null;
        *v.entry("a") = 1i64.into();
        *v.entry("b") = "x".into();
        assert!(v.is_object());
        assert_eq!(v.get("a"), Some(&JsonValue::Int(1)));
        assert_eq!(v.get("b").and_then(|b| b.string().ok()), Some("x"));
    }

    #[test]
    fn test_slot_grows_with_nulls() {
        let mut v = JsonValue::Null;
        *v.slot(0) = 1i64.into();
        *v.slot(3) = 4i64.into();
        assert_eq!(v.len(), 4);
        assert_eq!(v.idx(1), Some(&JsonValue::Null));
        assert_eq!(v.idx(2), Some(&JsonValue::Null));
        assert_eq!(v.idx(3), Some(&JsonValue::Int(4)));
    }

    #[test]
    fn test_slot_append_at_len() {
        let mut v = JsonValue::new_array();
        *v.slot(0) = 1i64.into();
        *v.slot(1) = 2i64.into();
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn test_exact_reads_reject_other_variants() {
        let v = JsonValue::Int(3);
        assert_eq!(v.integer(), Ok(3));
        assert!(matches!(v.double(), Err(JsonError::WrongType { .. })));
        assert!(matches!(v.string(), Err(JsonError::WrongType { .. })));
    }

    #[test]
    fn test_coerce_bool_from_int() {
        let mut v = JsonValue::Int(7);
        assert!(*v.coerce_bool());
        let mut v = JsonValue::Int(0);
        assert!(!*v.coerce_bool());
        let mut v = JsonValue::Str("x".into());
        assert!(!*v.coerce_bool());
    }

    #[test]
    fn test_coerce_numeric_widen_narrow() {
        let mut v = JsonValue::Int(3);
        assert_eq!(*v.coerce_float(), 3.0);
        let mut v = JsonValue::Float(2.9);
        assert_eq!(*v.coerce_int(), 2);
    }

    #[test]
    fn test_object_keys_sorted_last_write_wins() {
        let mut v = JsonValue::new_object();
        *v.entry("b") = 1i64.into();
        *v.entry("a") = 2i64.into();
        *v.entry("b") = 3i64.into();
        let keys: Vec<&str> = v.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(v.get("b"), Some(&JsonValue::Int(3)));
    }

    #[test]
    fn test_from_elems_pair_is_object() {
        let v = JsonValue::from_elems(vec!["width".into(), 3840i64.into()]);
        assert!(v.is_object());
        assert_eq!(v.get("width"), Some(&JsonValue::Int(3840)));
    }

    #[test]
    fn test_from_elems_marker_forces_array() {
        let v = JsonValue::from_elems(vec![JsonValue::ARRAY, "width".into(), 3840i64.into()]);
        assert!(v.is_array());
        assert_eq!(v.len(), 2);

        let one = JsonValue::from_elems(vec![
            JsonValue::ARRAY,
            JsonValue::member("appId", "netflix"),
        ]);
        assert!(one.is_array());
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn test_from_elems_merges_objects() {
        let v = JsonValue::from_elems(vec![
            JsonValue::member("a", 1i64),
            JsonValue::member("b", 2i64),
            JsonValue::member("a", 3i64),
        ]);
        assert!(v.is_object());
        assert_eq!(v.get("a"), Some(&JsonValue::Int(3)));
        assert_eq!(v.get("b"), Some(&JsonValue::Int(2)));
    }

    #[test]
    fn test_serde_json_conversion() {
        let source = serde_json::json!({"a": 1, "b": [true, 2.5], "c": null});
        let value = JsonValue::from(source.clone());
        assert_eq!(value.get("a"), Some(&JsonValue::Int(1)));
        assert_eq!(value.get("b").and_then(|b| b.idx(1)), Some(&JsonValue::Float(2.5)));
        let back = serde_json::Value::from(value);
        assert_eq!(back, source);
    }

    #[test]
    fn test_has_skips_null_members() {
        let mut v = JsonValue::new_object();
        *v.entry("present") = 1i64.into();
        v.entry("absent");
        assert!(v.has("present"));
        assert!(!v.has("absent"));
        assert!(!v.has("missing"));
    }
}
