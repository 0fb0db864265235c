//! Dynamic property values.

use crate::metadata::DataType;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// A dynamic entity property value.
///
/// `DateTime` and `Decimal` properties travel as text and doubles
/// respectively; the declared [`DataType`] decides how JSON is read.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Double(f64),
    /// Text string.
    Text(String),
    /// GUID.
    Guid(Uuid),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer, if this is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a double (integers widen).
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the text, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the GUID, if this is one.
    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Value::Guid(g) => Some(*g),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Guid(_) => "guid",
        }
    }

    /// The value a non-nullable property takes when none is supplied.
    pub fn default_for(data_type: DataType) -> Self {
        match data_type {
            DataType::String | DataType::DateTime => Value::Text(String::new()),
            DataType::Int32 | DataType::Int64 => Value::Integer(0),
            DataType::Double | DataType::Decimal => Value::Double(0.0),
            DataType::Boolean => Value::Bool(false),
            DataType::Guid => Value::Guid(Uuid::nil()),
        }
    }

    /// Converts this value so that it fits `data_type`.
    ///
    /// Integers widen to doubles, GUID text parses to a GUID, and `Int32`
    /// values are range checked. Returns `None` if the value cannot fit.
    /// Null fits every type; nullability is a validation concern.
    pub fn coerce(self, data_type: DataType) -> Option<Self> {
        match (data_type, self) {
            (_, Value::Null) => Some(Value::Null),
            (DataType::String | DataType::DateTime, Value::Text(s)) => Some(Value::Text(s)),
            (DataType::Int32, Value::Integer(i)) => {
                i32::try_from(i).ok().map(|_| Value::Integer(i))
            }
            (DataType::Int64, Value::Integer(i)) => Some(Value::Integer(i)),
            (DataType::Double | DataType::Decimal, Value::Double(d)) => Some(Value::Double(d)),
            (DataType::Double | DataType::Decimal, Value::Integer(i)) => {
                Some(Value::Double(i as f64))
            }
            (DataType::Boolean, Value::Bool(b)) => Some(Value::Bool(b)),
            (DataType::Guid, Value::Guid(g)) => Some(Value::Guid(g)),
            (DataType::Guid, Value::Text(s)) => Uuid::parse_str(&s).ok().map(Value::Guid),
            _ => None,
        }
    }

    /// Returns true if this value already fits `data_type` without coercion.
    pub fn matches_type(&self, data_type: DataType) -> bool {
        match (data_type, self) {
            (_, Value::Null) => true,
            (DataType::String | DataType::DateTime, Value::Text(_)) => true,
            (DataType::Int32, Value::Integer(i)) => i32::try_from(*i).is_ok(),
            (DataType::Int64, Value::Integer(_)) => true,
            (DataType::Double | DataType::Decimal, Value::Double(_)) => true,
            (DataType::Boolean, Value::Bool(_)) => true,
            (DataType::Guid, Value::Guid(_)) => true,
            _ => false,
        }
    }

    /// Reads a JSON value as the given data type.
    ///
    /// Numbers sent as strings (as some serializers do for 64-bit and
    /// decimal columns) are accepted.
    pub fn from_json(json: &JsonValue, data_type: DataType) -> Option<Self> {
        if json.is_null() {
            return Some(Value::Null);
        }
        match data_type {
            DataType::String | DataType::DateTime => {
                json.as_str().map(|s| Value::Text(s.to_string()))
            }
            DataType::Int32 | DataType::Int64 => {
                let i = json
                    .as_i64()
                    .or_else(|| json.as_str().and_then(|s| s.parse().ok()))?;
                Value::Integer(i).coerce(data_type)
            }
            DataType::Double | DataType::Decimal => json
                .as_f64()
                .or_else(|| json.as_str().and_then(|s| s.parse().ok()))
                .map(Value::Double),
            DataType::Boolean => json.as_bool().map(Value::Bool),
            DataType::Guid => json
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(Value::Guid),
        }
    }

    /// Converts to JSON.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Integer(i) => JsonValue::from(*i),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Guid(g) => JsonValue::String(g.to_string()),
        }
    }

    /// Converts to a key value. Only integers, text and GUIDs can be keys.
    pub fn to_key_value(&self) -> Option<KeyValue> {
        match self {
            Value::Integer(i) => Some(KeyValue::Integer(*i)),
            Value::Text(s) => Some(KeyValue::Text(s.clone())),
            Value::Guid(g) => Some(KeyValue::Guid(*g)),
            _ => None,
        }
    }

    /// Compares two values for ordering and equality.
    ///
    /// Integers and doubles compare numerically. Null sorts before
    /// everything else. Values of unrelated kinds are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::Text(b)) => Uuid::parse_str(b).ok().map(|b| a.cmp(&b)),
            (Value::Text(a), Value::Guid(b)) => Uuid::parse_str(a).ok().map(|a| a.cmp(b)),
            (a, b) => a.as_double()?.partial_cmp(&b.as_double()?),
        }
    }

    /// Total ordering for sorting.
    ///
    /// Agrees with [`Value::compare`] within a kind. Across kinds the order
    /// is null, booleans, numbers, text, GUIDs. NaN sorts after every other
    /// number.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Guid(a), Value::Guid(b)) => a.cmp(b),
            (a, b) => match (a.as_double(), b.as_double()) {
                (Some(x), Some(y)) => match (x.is_nan(), y.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                },
                _ => a.kind_rank().cmp(&b.kind_rank()),
            },
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) | Value::Double(_) => 2,
            Value::Text(_) => 3,
            Value::Guid(_) => 4,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Guid(g) => write!(f, "{g}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Guid(value)
    }
}

impl From<KeyValue> for Value {
    fn from(value: KeyValue) -> Self {
        value.to_value()
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// A single component of an entity key.
///
/// Keys compare structurally, so `Integer(1)` from a query and
/// `Integer(1)` from a save response resolve to the same entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    /// Integer key (`Int32`/`Int64` columns).
    Integer(i64),
    /// Text key.
    Text(String),
    /// GUID key.
    Guid(Uuid),
}

impl KeyValue {
    /// Converts to a property value.
    pub fn to_value(&self) -> Value {
        match self {
            KeyValue::Integer(i) => Value::Integer(*i),
            KeyValue::Text(s) => Value::Text(s.clone()),
            KeyValue::Guid(g) => Value::Guid(*g),
        }
    }

    /// Reads a key value from JSON according to the key property's type.
    pub fn from_json(json: &JsonValue, data_type: DataType) -> Option<Self> {
        Value::from_json(json, data_type)?.to_key_value()
    }

    /// Converts to JSON.
    pub fn to_json(&self) -> JsonValue {
        self.to_value().to_json()
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Integer(i) => write!(f, "{i}"),
            KeyValue::Text(s) => write!(f, "{s}"),
            KeyValue::Guid(g) => write!(f, "{g}"),
        }
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        KeyValue::Integer(i64::from(value))
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Integer(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Text(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Text(value)
    }
}

impl From<Uuid> for KeyValue {
    fn from(value: Uuid) -> Self {
        KeyValue::Guid(value)
    }
}
