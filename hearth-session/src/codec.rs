//! Record serialization.
//!
//! The default [`JsonCodec`] writes a JSON document. Kinds JSON cannot
//! represent natively are wrapped in single-key tag objects:
//!
//! | kind            | wire form                                  |
//! |-----------------|--------------------------------------------|
//! | bytes           | `{"$bytes": "<base64url>"}`                |
//! | time            | `{"$time": "<rfc3339>"}`                   |
//! | map             | `{"$map": {...}}`                          |
//! | named type      | `{"$type": "<name>", "$value": ...}`       |
//!
//! Decoding never fails on an unknown tag: any object that is not a
//! recognised tag degrades to a plain [`Value::Map`].

use crate::error::{SessionError, SessionResult};
use crate::record::{FlashLevel, SessionRecord};
use crate::value::{SessionType, Value};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

const TAG_BYTES: &str = "$bytes";
const TAG_TIME: &str = "$time";
const TAG_MAP: &str = "$map";
const TAG_TYPE: &str = "$type";
const TAG_VALUE: &str = "$value";

/// Converts session records to bytes and back.
pub trait SessionCodec: Send + Sync {
    fn encode(&self, record: &SessionRecord) -> SessionResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> SessionResult<SessionRecord>;
}

type Validator = fn(&serde_json::Value) -> bool;

fn validate<T: SessionType>(json: &serde_json::Value) -> bool {
    T::deserialize(json).is_ok()
}

/// Named application types known to a codec.
///
/// The registry is a constructor argument of the codec and is consulted only
/// while decoding.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<&'static str, Validator>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under [`SessionType::TYPE_NAME`].
    pub fn register<T: SessionType>(mut self) -> Self {
        self.types.insert(T::TYPE_NAME, validate::<T>);
        self
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// `Some(true)` if the payload matches the registered type, `None` if the
    /// name is unknown.
    fn check(&self, type_name: &str, payload: &Value) -> Option<bool> {
        self.types
            .get(type_name)
            .map(|validator| validator(&payload.to_json()))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.types.keys().collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

#[derive(Serialize, Deserialize)]
struct WireRecord {
    #[serde(default)]
    data: BTreeMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_no_flash")]
    flash: FlashLevel,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    flash_message: String,
}

fn is_no_flash(level: &FlashLevel) -> bool {
    *level == FlashLevel::None
}

/// JSON record codec.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    registry: TypeRegistry,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: TypeRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    fn encode_value(value: &Value) -> serde_json::Value {
        use serde_json::Value as Json;

        match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Bytes(b) => tagged(TAG_BYTES, Json::String(URL_SAFE_NO_PAD.encode(b))),
            Value::Time(t) => tagged(
                TAG_TIME,
                Json::String(t.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)),
            ),
            Value::List(items) => Json::Array(items.iter().map(Self::encode_value).collect()),
            Value::Map(map) => tagged(
                TAG_MAP,
                Json::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Self::encode_value(v)))
                        .collect(),
                ),
            ),
            Value::Typed { type_name, value } => {
                let mut obj = serde_json::Map::new();
                obj.insert(TAG_TYPE.to_string(), Json::String(type_name.clone()));
                obj.insert(TAG_VALUE.to_string(), Self::encode_value(value));
                Json::Object(obj)
            }
        }
    }

    fn decode_value(&self, json: serde_json::Value) -> Value {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => {
                Value::List(items.into_iter().map(|v| self.decode_value(v)).collect())
            }
            Json::Object(obj) => self.decode_object(obj),
        }
    }

    fn decode_object(&self, mut obj: serde_json::Map<String, serde_json::Value>) -> Value {
        use serde_json::Value as Json;

        if obj.len() == 1 {
            match (obj.get(TAG_BYTES), obj.get(TAG_TIME), obj.get(TAG_MAP)) {
                (Some(Json::String(s)), _, _) => {
                    if let Ok(bytes) = URL_SAFE_NO_PAD.decode(s) {
                        return Value::Bytes(bytes);
                    }
                }
                (_, Some(Json::String(s)), _) => {
                    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                        return Value::Time(t.with_timezone(&Utc));
                    }
                }
                (_, _, Some(Json::Object(_))) => {
                    if let Some(Json::Object(inner)) = obj.remove(TAG_MAP) {
                        return Value::Map(self.decode_entries(inner));
                    }
                }
                _ => {}
            }
        }

        if obj.len() == 2 && matches!(obj.get(TAG_TYPE), Some(Json::String(_))) {
            if let (Some(Json::String(type_name)), Some(payload)) =
                (obj.remove(TAG_TYPE), obj.remove(TAG_VALUE))
            {
                let value = self.decode_value(payload);
                return match self.registry.check(&type_name, &value) {
                    Some(true) => Value::Typed {
                        type_name,
                        value: Box::new(value),
                    },
                    Some(false) => {
                        debug!(type_name = %type_name, "Stored value no longer matches registered type");
                        value
                    }
                    None => {
                        debug!(type_name = %type_name, "Unregistered session type");
                        value
                    }
                };
            }
        }

        Value::Map(self.decode_entries(obj))
    }

    fn decode_entries(
        &self,
        obj: serde_json::Map<String, serde_json::Value>,
    ) -> BTreeMap<String, Value> {
        obj.into_iter()
            .map(|(k, v)| (k, self.decode_value(v)))
            .collect()
    }
}

fn tagged(tag: &str, value: serde_json::Value) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert(tag.to_string(), value);
    serde_json::Value::Object(obj)
}

impl SessionCodec for JsonCodec {
    fn encode(&self, record: &SessionRecord) -> SessionResult<Vec<u8>> {
        let wire = WireRecord {
            data: record
                .data
                .iter()
                .map(|(k, v)| (k.clone(), Self::encode_value(v)))
                .collect(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            flash: record.flash_level,
            flash_message: record.flash_message.clone(),
        };
        serde_json::to_vec(&wire).map_err(|e| SessionError::Serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> SessionResult<SessionRecord> {
        let wire: WireRecord = serde_json::from_slice(bytes)
            .map_err(|e| SessionError::Deserialization(e.to_string()))?;

        Ok(SessionRecord {
            data: wire
                .data
                .into_iter()
                .map(|(k, v)| (k, self.decode_value(v)))
                .collect(),
            created_at: wire.created_at,
            updated_at: wire.updated_at,
            flash_level: wire.flash,
            flash_message: wire.flash_message,
        })
    }
}
