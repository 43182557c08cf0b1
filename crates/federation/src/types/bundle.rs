//! FHIR Bundle wrapper.
//!
//! The engine does not model the clinical payload. A [`Bundle`] is a JSON
//! document whose `resourceType` is `Bundle`; the engine only reads its
//! identity fields and entry keys and writes into its `meta` block.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

use crate::error::ProviderCallError;

/// A FHIR Bundle returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Bundle(Map<String, Value>);

impl<'de> Deserialize<'de> for Bundle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Bundle::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl Bundle {
    /// Wraps a JSON value, checking that it is a Bundle resource.
    pub fn from_value(value: Value) -> Result<Self, ProviderCallError> {
        let Value::Object(object) = value else {
            return Err(ProviderCallError::InvalidResponse {
                message: "response is not a JSON object".to_string(),
            });
        };
        match object.get("resourceType").and_then(Value::as_str) {
            Some("Bundle") => Ok(Self(object)),
            Some(other) => Err(ProviderCallError::InvalidResponse {
                message: format!("expected a Bundle, got {other}"),
            }),
            None => Err(ProviderCallError::InvalidResponse {
                message: "response has no resourceType".to_string(),
            }),
        }
    }

    /// Creates an empty bundle of the given type.
    pub fn empty(bundle_type: &str) -> Self {
        let mut object = Map::new();
        object.insert("resourceType".to_string(), json!("Bundle"));
        object.insert("type".to_string(), json!(bundle_type));
        object.insert("entry".to_string(), Value::Array(Vec::new()));
        Self(object)
    }

    /// Returns the bundle `type`.
    pub fn bundle_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// Returns the bundle `id`.
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Returns the entries, or an empty slice.
    pub fn entries(&self) -> &[Value] {
        self.0
            .get("entry")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Appends an entry.
    pub fn push_entry(&mut self, entry: Value) {
        let entries = self
            .0
            .entry("entry")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entries.is_array() {
            *entries = Value::Array(Vec::new());
        }
        if let Some(array) = entries.as_array_mut() {
            array.push(entry);
        }
    }

    /// Sets `total` to the current entry count if the bundle carries one.
    pub fn refresh_total(&mut self) {
        let count = self.entries().len();
        if self.0.contains_key("total") {
            self.0.insert("total".to_string(), json!(count));
        }
    }

    /// Returns the `meta` object, creating it if absent.
    pub fn meta_mut(&mut self) -> &mut Map<String, Value> {
        let meta = self
            .0
            .entry("meta")
            .or_insert_with(|| Value::Object(Map::new()));
        if !meta.is_object() {
            *meta = Value::Object(Map::new());
        }
        meta.as_object_mut()
            .expect("meta was just normalised to an object")
    }

    /// Returns the `meta.tag` codings.
    pub fn tags(&self) -> &[Value] {
        self.0
            .get("meta")
            .and_then(|m| m.get("tag"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns true if `meta.tag` contains a coding with this system and code.
    pub fn has_tag(&self, system: &str, code: &str) -> bool {
        self.tags().iter().any(|tag| {
            tag.get("system").and_then(Value::as_str) == Some(system)
                && tag.get("code").and_then(Value::as_str) == Some(code)
        })
    }

    /// Returns the top-level JSON object.
    pub fn as_object(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the bundle, returning the JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Returns the identity key of an entry: `Type/id`, else `fullUrl`.
pub fn entry_key(entry: &Value) -> Option<String> {
    let resource = entry.get("resource");
    let resource_type = resource
        .and_then(|r| r.get("resourceType"))
        .and_then(Value::as_str);
    let id = resource.and_then(|r| r.get("id")).and_then(Value::as_str);
    match (resource_type, id) {
        (Some(resource_type), Some(id)) => Some(format!("{resource_type}/{id}")),
        _ => entry
            .get("fullUrl")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}
