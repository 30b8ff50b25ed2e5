//! Values crossing the load boundary.
//!
//! A load returns [`LoadData`]: an ordered key -> [`DataValue`] map. Plain
//! values are converted with serde on insert; typed values inserted with
//! [`LoadData::insert_custom`] travel as-is until merge time, where they must be
//! encoded by an encoder registered in the [`Transport`]. Anything that cannot
//! be encoded is reported as a [`SerializationError`] instead of being dropped.

use crate::error::SerializationError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Key used for the type tag of transported custom values
pub const TRANSPORT_TYPE_KEY: &str = "__kit_type";

/// A typed value waiting for a transport encoder.
#[derive(Clone)]
pub struct CustomValue {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl CustomValue {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CustomValue<{}>", self.type_name)
    }
}

/// One value returned by a load.
#[derive(Debug, Clone)]
pub enum DataValue {
    Json(Value),
    Custom(CustomValue),
    /// serde refused the value; the reason is reported at merge time
    Invalid(String),
}

/// Data returned by one load function.
#[derive(Debug, Clone, Default)]
pub struct LoadData {
    entries: Vec<(String, DataValue)>,
}

impl LoadData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(&mut self, key: String, value: DataValue) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Insert a serde value. Serialization failures surface when the data is merged.
    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> &mut Self {
        let value = match serde_json::to_value(value) {
            Ok(v) => DataValue::Json(v),
            Err(e) => DataValue::Invalid(e.to_string()),
        };
        self.upsert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with<T: Serialize>(mut self, key: impl Into<String>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a typed value that needs a transport encoder.
    pub fn insert_custom<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> &mut Self {
        let custom = CustomValue {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        };
        self.upsert(key.into(), DataValue::Custom(custom));
        self
    }

    #[must_use]
    pub fn with_custom<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
        self.insert_custom(key, value);
        self
    }

    /// Build from any serializable struct or map. A value that is not a JSON
    /// object is kept as a single invalid entry so merging reports it.
    #[must_use]
    pub fn from_serialize<T: Serialize>(value: &T) -> Self {
        let mut data = Self::new();
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => {
                for (k, v) in map {
                    data.entries.push((k, DataValue::Json(v)));
                }
            }
            Ok(other) => data.upsert(
                String::new(),
                DataValue::Invalid(format!("load must return an object, got {}", kind(&other))),
            ),
            Err(e) => data.upsert(String::new(), DataValue::Invalid(e.to_string())),
        }
        data
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn get_json(&self, key: &str) -> Option<&Value> {
        match self.get(key)? {
            DataValue::Json(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_custom<T: Any>(&self, key: &str) -> Option<&T> {
        match self.get(key)? {
            DataValue::Custom(c) => c.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shallow merge: keys of `other` override, everything else is inherited.
    pub fn merge(&mut self, other: &LoadData) {
        for (k, v) in &other.entries {
            self.upsert(k.clone(), v.clone());
        }
    }

    /// Encode every value to JSON.
    pub fn encode(&self, node: &str, transport: &Transport) -> Result<Map<String, Value>, SerializationError> {
        let mut out = Map::new();
        for (key, value) in &self.entries {
            let encoded = match value {
                DataValue::Json(v) => v.clone(),
                DataValue::Custom(c) => transport.encode(c).ok_or_else(|| SerializationError {
                    node: node.to_string(),
                    key: key.clone(),
                    reason: format!(
                        "no transport encoder registered for type {}",
                        c.type_name()
                    ),
                })?,
                DataValue::Invalid(reason) => {
                    return Err(SerializationError {
                        node: node.to_string(),
                        key: key.clone(),
                        reason: reason.clone(),
                    })
                }
            };
            out.insert(key.clone(), encoded);
        }
        Ok(out)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

type Encoder = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Option<Value> + Send + Sync>;

/// Encoders for typed values returned from loads.
///
/// An encoded value is sent as `{"__kit_type": <name>, "value": <encoded>}` so
/// the client can pick the matching decoder.
#[derive(Clone, Default)]
pub struct Transport {
    encoders: HashMap<TypeId, (Arc<str>, Encoder)>,
}

impl Transport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, F>(&mut self, name: &str, encode: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let encoder: Encoder = Arc::new(move |any| any.downcast_ref::<T>().map(&encode));
        self.encoders
            .insert(TypeId::of::<T>(), (Arc::from(name), encoder));
        self
    }

    #[must_use]
    pub fn encode(&self, value: &CustomValue) -> Option<Value> {
        let (name, encoder) = self.encoders.get(&value.type_id)?;
        let encoded = encoder(value.value.as_ref())?;
        let mut tagged = Map::new();
        tagged.insert(TRANSPORT_TYPE_KEY.into(), Value::String(name.to_string()));
        tagged.insert("value".into(), encoded);
        Some(Value::Object(tagged))
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.encoders.values().map(|(n, _)| n.as_ref()).collect();
        f.debug_struct("Transport").field("encoders", &names).finish()
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// What a load read, so the client knows when to rerun it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Uses {
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub dependencies: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub params: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub search_params: BTreeSet<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub parent: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub url: bool,
}

impl Uses {
    pub fn absorb(&mut self, other: Uses) {
        self.dependencies.extend(other.dependencies);
        self.params.extend(other.params);
        self.search_params.extend(other.search_params);
        self.parent |= other.parent;
        self.url |= other.url;
    }
}
