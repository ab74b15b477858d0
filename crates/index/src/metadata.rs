use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata attached to every stored vector.
///
/// The well-known fields keep their historical JSON names (`file_id`,
/// `file_name`, `page_no`, `text`) so snapshots stay readable by older
/// tooling. Anything else lands in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PassageMetadata {
    #[serde(rename = "file_id", default)]
    pub source_id: String,
    #[serde(rename = "file_name", default)]
    pub label: String,
    #[serde(rename = "page_no", default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(rename = "text", default)]
    pub excerpt: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PassageMetadata {
    pub fn new(
        source_id: impl Into<String>,
        label: impl Into<String>,
        position: Option<u32>,
        excerpt: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            label: label.into(),
            position,
            excerpt: excerpt.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Stable identity built from every key/value pair in sorted key order.
    /// Two hits with equal signatures describe the same logical passage.
    pub fn identity_signature(&self) -> String {
        let mut pairs: BTreeMap<&str, Value> = self
            .extra
            .iter()
            .map(|(key, value)| (key.as_str(), value.clone()))
            .collect();
        pairs.insert("file_id", Value::String(self.source_id.clone()));
        pairs.insert("file_name", Value::String(self.label.clone()));
        pairs.insert(
            "page_no",
            self.position.map(Value::from).unwrap_or(Value::Null),
        );
        pairs.insert("text", Value::String(self.excerpt.clone()));
        pairs
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }

    /// `<source_id>:<page_no>` when both are known.
    pub fn page_reference(&self) -> Option<String> {
        if self.source_id.is_empty() {
            return None;
        }
        self.position
            .map(|page| format!("{}:{}", self.source_id, page))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    #[serde(rename = "embedding")]
    pub vector: Vec<f32>,
    pub metadata: PassageMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub score: f64,
    pub metadata: PassageMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_uses_historical_keys_and_keeps_extras() {
        let raw = json!({
            "file_id": "f1",
            "file_name": "unit1.pdf",
            "page_no": 4,
            "text": "Ohm's law",
            "chapter": "2"
        });
        let meta: PassageMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(meta.source_id, "f1");
        assert_eq!(meta.position, Some(4));
        assert_eq!(meta.extra.get("chapter"), Some(&json!("2")));
        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["file_name"], "unit1.pdf");
        assert_eq!(back["chapter"], "2");
    }

    #[test]
    fn signature_ignores_extra_insertion_order() {
        let a = PassageMetadata::new("f", "a.pdf", Some(1), "x")
            .with_extra("b", json!(1))
            .with_extra("a", json!(2));
        let b = PassageMetadata::new("f", "a.pdf", Some(1), "x")
            .with_extra("a", json!(2))
            .with_extra("b", json!(1));
        assert_eq!(a.identity_signature(), b.identity_signature());
        let c = PassageMetadata::new("f", "a.pdf", Some(2), "x");
        assert_ne!(a.identity_signature(), c.identity_signature());
    }

    #[test]
    fn page_reference_requires_source_and_page() {
        assert_eq!(
            PassageMetadata::new("f1", "", Some(3), "").page_reference(),
            Some("f1:3".to_string())
        );
        assert_eq!(PassageMetadata::new("f1", "", None, "").page_reference(), None);
        assert_eq!(PassageMetadata::new("", "", Some(3), "").page_reference(), None);
    }
}
