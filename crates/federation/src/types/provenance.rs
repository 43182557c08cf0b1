//! Provenance stamping.
//!
//! Every successful provider result is stamped with the issuing provider's
//! provenance in three places of the bundle's `meta` block:
//!
//! | Location | Content |
//! |----------|---------|
//! | `meta.tag[]` | Coding with `system`, `code`, `version`, `display` |
//! | `meta.extension[]` | [`PROVENANCE_EXTENSION_URL`] with one sub-extension per field |
//! | `meta.source` | The provider's source URI |

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::bundle::Bundle;

/// Extension URL identifying the provenance extension.
pub const PROVENANCE_EXTENSION_URL: &str = "urn:recordhub:extension:record-provenance";

/// Origin of one provider result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Coding system of the provider tag.
    pub system: String,
    /// Provider code.
    pub code: String,
    /// Human-readable provider name.
    pub display: String,
    /// Protocol version of the provider.
    pub version: String,
    /// Source URI of the provider.
    pub source: String,
}

impl Provenance {
    /// Stamps this provenance onto a bundle's `meta` block.
    ///
    /// Restamping with the same system and code replaces the earlier stamp.
    pub fn stamp(&self, bundle: &mut Bundle) {
        let meta = bundle.meta_mut();

        let tags = array_field(meta, "tag");
        tags.retain(|tag| !self.matches_coding(tag));
        tags.push(self.tag());

        let extensions = array_field(meta, "extension");
        extensions.retain(|ext| {
            !(ext.get("url").and_then(Value::as_str) == Some(PROVENANCE_EXTENSION_URL)
                && self.matches_extension(ext))
        });
        extensions.push(self.extension());

        if !self.source.is_empty() {
            meta.insert("source".to_string(), json!(self.source));
        }
    }

    /// Appends this provenance's tag without touching `meta.source`.
    pub fn add_tag(&self, bundle: &mut Bundle) {
        let tags = array_field(bundle.meta_mut(), "tag");
        if !tags.iter().any(|tag| self.matches_coding(tag)) {
            tags.push(self.tag());
        }
    }

    /// Returns true if the bundle carries this provenance's tag.
    pub fn is_stamped_on(&self, bundle: &Bundle) -> bool {
        bundle.has_tag(&self.system, &self.code)
    }

    fn tag(&self) -> Value {
        json!({
            "system": self.system,
            "code": self.code,
            "version": self.version,
            "display": self.display,
        })
    }

    fn extension(&self) -> Value {
        json!({
            "url": PROVENANCE_EXTENSION_URL,
            "extension": [
                { "url": "system", "valueUri": self.system },
                { "url": "code", "valueCode": self.code },
                { "url": "display", "valueString": self.display },
                { "url": "version", "valueString": self.version },
                { "url": "source", "valueUri": self.source },
            ]
        })
    }

    fn matches_coding(&self, coding: &Value) -> bool {
        coding.get("system").and_then(Value::as_str) == Some(self.system.as_str())
            && coding.get("code").and_then(Value::as_str) == Some(self.code.as_str())
    }

    fn matches_extension(&self, ext: &Value) -> bool {
        let field = |name: &str| {
            ext.get("extension")
                .and_then(Value::as_array)
                .and_then(|parts| {
                    parts
                        .iter()
                        .find(|p| p.get("url").and_then(Value::as_str) == Some(name))
                })
                .and_then(|p| {
                    p.get("valueUri")
                        .or_else(|| p.get("valueCode"))
                        .and_then(Value::as_str)
                })
                .map(str::to_string)
        };
        field("system").as_deref() == Some(self.system.as_str())
            && field("code").as_deref() == Some(self.code.as_str())
    }
}

/// Returns the named array inside `meta`, replacing non-array values.
fn array_field<'a>(
    meta: &'a mut serde_json::Map<String, Value>,
    name: &str,
) -> &'a mut Vec<Value> {
    let value = meta
        .entry(name)
        .or_insert_with(|| Value::Array(Vec::new()));
    if !value.is_array() {
        *value = Value::Array(Vec::new());
    }
    match value {
        Value::Array(items) => items,
        _ => unreachable!("value was just normalised to an array"),
    }
}
