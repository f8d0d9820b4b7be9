//! Session values.
//!
//! A [`Value`] is what handlers store under a session key. Scalars, bytes,
//! timestamps, lists and maps are first class; application structs are
//! stored either as their generic serde shape or, for types that implement
//! [`SessionType`], as a named [`Value::Typed`] wrapper.

use crate::error::{SessionError, SessionResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// A value stored in a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Time(DateTime<Utc>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A named application type. The name lets the codec check the payload
    /// against a registered type when the session is loaded again.
    Typed {
        type_name: String,
        value: Box<Value>,
    },
}

/// An application type that is stored under a stable name.
///
/// ```
/// use hearth_session::{SessionType, Value};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Cart {
///     items: Vec<String>,
/// }
///
/// impl SessionType for Cart {
///     const TYPE_NAME: &'static str = "shop.Cart";
/// }
///
/// let value = Value::typed(&Cart { items: vec!["book".into()] }).unwrap();
/// assert_eq!(value.type_name(), Some("shop.Cart"));
/// ```
pub trait SessionType: Serialize + DeserializeOwned {
    /// Stable name written next to the payload.
    const TYPE_NAME: &'static str;
}

impl Value {
    /// Convert any serializable value to its generic shape.
    pub fn from_serde<T: Serialize + ?Sized>(value: &T) -> SessionResult<Self> {
        serde_json::to_value(value)
            .map(Self::from_json)
            .map_err(|e| SessionError::Serialization(e.to_string()))
    }

    /// Wrap a [`SessionType`] with its registered name.
    pub fn typed<T: SessionType>(value: &T) -> SessionResult<Self> {
        Ok(Self::Typed {
            type_name: T::TYPE_NAME.to_string(),
            value: Box::new(Self::from_serde(value)?),
        })
    }

    /// Convert back into a concrete type.
    ///
    /// `Typed` wrappers are transparent here; the inner payload is converted.
    pub fn to_serde<T: DeserializeOwned>(&self) -> SessionResult<T> {
        serde_json::from_value(self.to_json())
            .map_err(|e| SessionError::Deserialization(e.to_string()))
    }

    /// Build from a plain JSON value.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Plain JSON shape, as serde would produce for the equivalent Rust type.
    ///
    /// Bytes become an array of numbers, times become RFC 3339 strings and
    /// non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(b) => serde_json::Value::from(b.clone()),
            Self::Time(t) => serde_json::Value::String(t.to_rfc3339()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Self::Typed { value, .. } => value.to_json(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as a float; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Name of a `Typed` value.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Typed { type_name, .. } => Some(type_name),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Self::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    impl SessionType for Profile {
        const TYPE_NAME: &'static str = "test.Profile";
    }

    #[test]
    fn test_from_serde_struct() {
        let value = Value::from_serde(&Profile {
            name: "alice".into(),
            age: 30,
        })
        .unwrap();

        let map = value.as_map().unwrap();
        assert_eq!(map["name"].as_str(), Some("alice"));
        assert_eq!(map["age"].as_i64(), Some(30));
    }

    #[test]
    fn test_typed_round_trip_through_serde() {
        let profile = Profile {
            name: "bob".into(),
            age: 41,
        };
        let value = Value::typed(&profile).unwrap();
        assert_eq!(value.type_name(), Some("test.Profile"));
        assert_eq!(value.to_serde::<Profile>().unwrap(), profile);
    }

    #[test]
    fn test_to_serde_type_mismatch() {
        let value = Value::from("not a number");
        assert!(matches!(
            value.to_serde::<i64>(),
            Err(SessionError::Deserialization(_))
        ));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(Value::from_json(serde_json::json!(5)), Value::Int(5));
        assert_eq!(Value::from_json(serde_json::json!(2.5)), Value::Float(2.5));
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(7i32), Value::Int(7));
        assert_eq!(Value::from("x"), Value::String("x".into()));
        assert_eq!(Value::from(vec![1u8, 2]), Value::Bytes(vec![1, 2]));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_bytes_to_serde() {
        let value = Value::Bytes(vec![1, 2, 3]);
        assert_eq!(value.to_serde::<Vec<u8>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_time_to_serde() {
        let now = Utc::now();
        let value = Value::Time(now);
        assert_eq!(value.to_serde::<DateTime<Utc>>().unwrap(), now);
    }
}
