//! Scalar and array value codec (spec §4.2 / C2).

use chrono::{DateTime, SecondsFormat, Utc};
use docbase_error::{DocbaseError, ErrorKind};
use docbase_key::Key;

/// A single property value: the tagged union spec §3 describes.
///
/// Nested entities, geo points, and blob values are out of scope (spec
/// §1 Non-goals).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The absence of a value.
    Null,
    /// A UTF-8 string.
    String(String),
    /// A signed 64-bit integer.
    Integer(i64),
    /// A 64-bit float.
    Double(f64),
    /// A boolean.
    Boolean(bool),
    /// A UTC timestamp, nanosecond precision.
    Timestamp(DateTime<Utc>),
    /// A reference to another entity's key.
    Key(Key),
    /// An ordered array of values. The codec produces homogeneous arrays,
    /// though the wire format does not require it.
    Array(Vec<Value>),
}

impl Value {
    /// Borrow the string, or a type-mismatch error naming both sides.
    pub fn as_str(&self) -> docbase_error::Result<&str> {
        match self {
            Value::String(s) => Ok(s.as_str()),
            other => Err(mismatch("string", other)),
        }
    }

    /// Read as `i64`, or a type-mismatch error naming both sides.
    pub fn as_i64(&self) -> docbase_error::Result<i64> {
        match self {
            Value::Integer(n) => Ok(*n),
            other => Err(mismatch("integer", other)),
        }
    }

    /// Read as `f64`, or a type-mismatch error naming both sides.
    pub fn as_f64(&self) -> docbase_error::Result<f64> {
        match self {
            Value::Double(d) => Ok(*d),
            other => Err(mismatch("double", other)),
        }
    }

    /// Read as `bool`, or a type-mismatch error naming both sides.
    pub fn as_bool(&self) -> docbase_error::Result<bool> {
        match self {
            Value::Boolean(b) => Ok(*b),
            other => Err(mismatch("boolean", other)),
        }
    }

    /// Read as a timestamp, or a type-mismatch error naming both sides.
    pub fn as_timestamp(&self) -> docbase_error::Result<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Ok(*t),
            other => Err(mismatch("timestamp", other)),
        }
    }

    /// Read as a key reference, or a type-mismatch error naming both sides.
    pub fn as_key(&self) -> docbase_error::Result<&Key> {
        match self {
            Value::Key(k) => Ok(k),
            other => Err(mismatch("key", other)),
        }
    }

    /// Read as an array, or a type-mismatch error naming both sides.
    pub fn as_array(&self) -> docbase_error::Result<&[Value]> {
        match self {
            Value::Array(items) => Ok(items),
            other => Err(mismatch("array", other)),
        }
    }

    fn wire_kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Boolean(_) => "boolean",
            Value::Timestamp(_) => "timestamp",
            Value::Key(_) => "key",
            Value::Array(_) => "array",
        }
    }
}

fn mismatch(expected: &str, actual: &Value) -> DocbaseError {
    DocbaseError::new(ErrorKind::Decode, "type mismatch")
        .with_context("expected", expected)
        .with_context("actual", actual.wire_kind())
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}
impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n as i64)
    }
}
impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}
impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}
impl From<Key> for Value {
    fn from(k: Key) -> Self {
        Value::Key(k)
    }
}
impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

/// Encode a [`Value`] into its wire form: a map with exactly one of
/// `{nullValue, stringValue, integerValue, booleanValue, doubleValue,
/// timestampValue, keyValue, arrayValue}`.
pub fn encode_value(v: &Value) -> docbase_error::Result<serde_json::Value> {
    use serde_json::json;
    Ok(match v {
        Value::Null => json!({ "nullValue": serde_json::Value::Null }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Integer(n) => json!({ "integerValue": n.to_string() }),
        Value::Boolean(b) => json!({ "booleanValue": b }),
        Value::Double(d) => json!({ "doubleValue": d }),
        Value::Timestamp(t) => {
            json!({ "timestampValue": t.to_rfc3339_opts(SecondsFormat::Nanos, true) })
        }
        Value::Key(k) => json!({ "keyValue": decode_key_envelope(k) }),
        Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(encode_value(item)?);
            }
            json!({ "arrayValue": { "values": values } })
        }
    })
}

/// A key embedded as a property value carries its own `path`, mirroring
/// the standalone opaque encoding's shape (spec §4.1/§6) but inline as
/// JSON rather than base64-url, since it's already nested in a JSON body.
fn decode_key_envelope(k: &Key) -> serde_json::Value {
    let mut path = Vec::new();
    let mut chain = vec![k];
    while let Some(parent) = chain.last().unwrap().parent() {
        chain.push(parent);
    }
    for elem in chain.into_iter().rev() {
        let mut obj = serde_json::Map::new();
        obj.insert("kind".into(), serde_json::Value::String(elem.kind().into()));
        if !elem.name().is_empty() {
            obj.insert("name".into(), serde_json::Value::String(elem.name().into()));
        } else if elem.id() != 0 {
            obj.insert("id".into(), serde_json::Value::String(elem.id().to_string()));
        }
        path.push(serde_json::Value::Object(obj));
    }
    serde_json::json!({ "path": path })
}

fn encode_key_envelope(wire: &serde_json::Value) -> docbase_error::Result<Key> {
    let path = wire
        .get("path")
        .and_then(|p| p.as_array())
        .ok_or_else(|| DocbaseError::new(ErrorKind::Decode, "keyValue missing path array"))?;
    if path.is_empty() {
        return Err(DocbaseError::new(ErrorKind::Decode, "keyValue path is empty"));
    }
    let mut built: Option<Key> = None;
    for elem in path {
        let kind = elem
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| DocbaseError::new(ErrorKind::Decode, "key element missing kind"))?
            .to_string();
        built = Some(match (elem.get("name").and_then(|n| n.as_str()), elem.get("id")) {
            (Some(name), _) => Key::make_name(kind, name, built),
            (None, Some(id)) => {
                let id = parse_wire_int(id)?;
                Key::make_id(kind, id, built)
            }
            (None, None) => Key::make_incomplete(kind, built),
        });
    }
    Ok(built.expect("path checked non-empty above"))
}

/// Parse an integer that may arrive as a JSON number or a decimal string
/// (spec §4.2 / §9: the server is consistent, the test mock is not).
fn parse_wire_int(v: &serde_json::Value) -> docbase_error::Result<i64> {
    if let Some(s) = v.as_str() {
        return s.parse::<i64>().map_err(|e| {
            DocbaseError::new(ErrorKind::Decode, "integer wire value is not valid decimal")
                .with_context("value", s)
                .with_source(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
        });
    }
    if let Some(n) = v.as_i64() {
        return Ok(n);
    }
    Err(DocbaseError::new(
        ErrorKind::Decode,
        "integer wire value is neither a string nor a number",
    ))
}

/// Decode a wire value produced by [`encode_value`] (or the server).
pub fn decode_value(wire: &serde_json::Value) -> docbase_error::Result<Value> {
    let obj = wire
        .as_object()
        .ok_or_else(|| DocbaseError::new(ErrorKind::Decode, "value is not a JSON object"))?;

    if obj.contains_key("nullValue") {
        return Ok(Value::Null);
    }
    if let Some(s) = obj.get("stringValue") {
        return Ok(Value::String(
            s.as_str()
                .ok_or_else(|| DocbaseError::new(ErrorKind::Decode, "stringValue is not a string"))?
                .to_string(),
        ));
    }
    if let Some(n) = obj.get("integerValue") {
        return Ok(Value::Integer(parse_wire_int(n)?));
    }
    if let Some(b) = obj.get("booleanValue") {
        return Ok(Value::Boolean(b.as_bool().ok_or_else(|| {
            DocbaseError::new(ErrorKind::Decode, "booleanValue is not a boolean")
        })?));
    }
    if let Some(d) = obj.get("doubleValue") {
        return Ok(Value::Double(d.as_f64().ok_or_else(|| {
            DocbaseError::new(ErrorKind::Decode, "doubleValue is not a number")
        })?));
    }
    if let Some(t) = obj.get("timestampValue") {
        let s = t
            .as_str()
            .ok_or_else(|| DocbaseError::new(ErrorKind::Decode, "timestampValue is not a string"))?;
        let parsed = DateTime::parse_from_rfc3339(s).map_err(|e| {
            DocbaseError::new(ErrorKind::Decode, "timestampValue is not valid RFC-3339")
                .with_context("value", s)
                .with_source(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
        })?;
        return Ok(Value::Timestamp(parsed.with_timezone(&Utc)));
    }
    if let Some(k) = obj.get("keyValue") {
        return Ok(Value::Key(encode_key_envelope(k)?));
    }
    if let Some(arr) = obj.get("arrayValue") {
        let values = match arr.get("values").and_then(|v| v.as_array()) {
            Some(values) => values
                .iter()
                .map(decode_value)
                .collect::<docbase_error::Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        return Ok(Value::Array(values));
    }

    Err(DocbaseError::new(
        ErrorKind::Decode,
        "value has no recognized discriminator key",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trips_as_decimal_string() {
        let wire = encode_value(&Value::Integer(42)).unwrap();
        assert_eq!(wire["integerValue"], serde_json::json!("42"));
        let back = decode_value(&wire).unwrap();
        assert_eq!(back, Value::Integer(42));
    }

    #[test]
    fn integer_decodes_from_json_number_too() {
        let wire = serde_json::json!({ "integerValue": 7 });
        assert_eq!(decode_value(&wire).unwrap(), Value::Integer(7));
    }

    #[test]
    fn string_round_trips() {
        let wire = encode_value(&Value::String("hi".into())).unwrap();
        assert_eq!(decode_value(&wire).unwrap(), Value::String("hi".into()));
    }

    #[test]
    fn boolean_round_trips() {
        let wire = encode_value(&Value::Boolean(true)).unwrap();
        assert_eq!(decode_value(&wire).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn double_round_trips() {
        let wire = encode_value(&Value::Double(3.14)).unwrap();
        assert_eq!(decode_value(&wire).unwrap(), Value::Double(3.14));
    }

    #[test]
    fn null_round_trips() {
        let wire = encode_value(&Value::Null).unwrap();
        assert_eq!(decode_value(&wire).unwrap(), Value::Null);
    }

    #[test]
    fn timestamp_round_trips_with_nanosecond_precision() {
        let t = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let wire = encode_value(&Value::Timestamp(t)).unwrap();
        assert_eq!(decode_value(&wire).unwrap(), Value::Timestamp(t));
    }

    #[test]
    fn array_of_scalars_round_trips() {
        let v = Value::Array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        let wire = encode_value(&v).unwrap();
        assert_eq!(decode_value(&wire).unwrap(), v);
    }

    #[test]
    fn array_without_values_key_decodes_empty() {
        let wire = serde_json::json!({ "arrayValue": {} });
        assert_eq!(decode_value(&wire).unwrap(), Value::Array(vec![]));
    }

    #[test]
    fn key_value_round_trips() {
        let parent = Key::make_name("Parent", "p1", None);
        let k = Key::make_name("Child", "c1", Some(parent));
        let wire = encode_value(&Value::Key(k.clone())).unwrap();
        assert_eq!(decode_value(&wire).unwrap(), Value::Key(k));
    }

    #[test]
    fn type_mismatch_names_both_sides() {
        let err = Value::String("x".into()).as_i64().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("integer"));
        assert!(msg.contains("string"));
    }

    #[test]
    fn decode_rejects_unknown_discriminator() {
        let wire = serde_json::json!({ "geoPointValue": {} });
        let err = decode_value(&wire).unwrap_err();
        assert_eq!(err.kind(), docbase_error::ErrorKind::Decode);
    }

    proptest::proptest! {
        #[test]
        fn integer_round_trip_holds_for_any_i64(n in i64::MIN..=i64::MAX) {
            let wire = encode_value(&Value::Integer(n)).unwrap();
            prop_assert_eq!(decode_value(&wire).unwrap(), Value::Integer(n));
        }

        #[test]
        fn string_round_trip_holds_for_arbitrary_strings(s in "\\PC*") {
            let wire = encode_value(&Value::String(s.clone())).unwrap();
            prop_assert_eq!(decode_value(&wire).unwrap(), Value::String(s));
        }
    }
}
