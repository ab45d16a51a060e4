//! Dynamic SQL values read from result sets and bound as key parameters.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::mem;

/// A dynamically-typed SQL value.
///
/// Column values pulled from a result set, identifier values that make up
/// entity and collection keys, and the positional bind values of a compiled
/// load statement are all represented with this enum.
///
/// Values of different variants never compare equal, even for the same
/// number: a key hydrated as `Int(1)` is not the key `BigInt(1)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Double(f64),
    /// Arbitrary precision decimal, kept in its textual form.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    /// Days since the Unix epoch.
    Date(i32),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
    Uuid([u8; 16]),
    Json(serde_json::Value),
    /// Several columns read as one value, e.g. a composite map index.
    Array(Vec<Value>),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL type name, used in conversion errors.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
            Value::Array(_) => "ARRAY",
        }
    }

    /// Integers and booleans as a flag; zero is false.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            other => other.as_integer().map(|i| i != 0),
        }
    }

    /// Any integer width, and booleans as 0/1.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            other => other.as_integer(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Decimal(text) => text.parse().ok(),
            other => other.as_integer().map(|i| i as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    fn as_integer(&self) -> Option<i64> {
        match self {
            Value::SmallInt(i) => Some(i64::from(*i)),
            Value::Int(i) => Some(i64::from(*i)),
            Value::BigInt(i) => Some(*i),
            _ => None,
        }
    }

    /// Feed this value into a key hash. Consistent with `PartialEq`: the
    /// variant is hashed first and floats hash by bit pattern.
    pub fn hash_into(&self, hasher: &mut impl Hasher) {
        mem::discriminant(self).hash(hasher);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(hasher),
            Value::SmallInt(i) => i.hash(hasher),
            Value::Int(i) | Value::Date(i) => i.hash(hasher),
            Value::BigInt(i) | Value::Timestamp(i) => i.hash(hasher),
            Value::Double(d) => d.to_bits().hash(hasher),
            Value::Decimal(s) | Value::Text(s) => s.hash(hasher),
            Value::Bytes(bytes) => bytes.hash(hasher),
            Value::Uuid(uuid) => uuid.hash(hasher),
            Value::Json(json) => json.to_string().hash(hasher),
            Value::Array(items) => {
                items.len().hash(hasher);
                for item in items {
                    item.hash_into(hasher);
                }
            }
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(v: $source) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    f64 => Double,
    String => Text,
    Vec<u8> => Bytes,
    [u8; 16] => Uuid,
    serde_json::Value => Json,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
