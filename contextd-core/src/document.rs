//! The vector document model (spec §3.1-3.2).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A primitive payload value. Payloads are metadata used for filtering and
/// display, never for computing the embedding itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    /// UTF-8 string.
    String(String),
    /// 64-bit integer.
    Integer(i64),
    /// 64-bit float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// List of strings (used for `tags[]`, `patterns[]`, `source_ids[]`).
    StringList(Vec<String>),
}

impl PayloadValue {
    /// Borrow as a string, if this is a `String` variant.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PayloadValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as a string list, if this is a `StringList` variant.
    #[must_use]
    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            PayloadValue::StringList(v) => Some(v),
            _ => None,
        }
    }

    /// Read as an `f64`, accepting both `Float` and numeric `String`
    /// variants so that checkpoint's string-typed `token_count` round-trips
    /// (spec §3.5, §8).
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PayloadValue::Float(f) => Some(*f),
            PayloadValue::Integer(i) => Some(*i as f64),
            PayloadValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Read as a bool.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PayloadValue::Bool(b) => Some(*b),
            PayloadValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::String(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue::String(value)
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        PayloadValue::Bool(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Integer(value)
    }
}

impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        PayloadValue::Float(value)
    }
}

impl From<Vec<String>> for PayloadValue {
    fn from(value: Vec<String>) -> Self {
        PayloadValue::StringList(value)
    }
}

/// Ordered map of payload fields. `BTreeMap` keeps the on-disk encoding
/// deterministic, which matters for the WAL's HMAC canonical form.
pub type Payload = BTreeMap<String, PayloadValue>;

/// The fundamental stored unit (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique id within the owning collection.
    pub id: String,
    /// The text that was embedded.
    pub content: String,
    /// Fixed-length embedding vector, length equal to the collection's
    /// declared dimension.
    pub embedding: Vec<f32>,
    /// Metadata used for filtering and display.
    pub payload: Payload,
}

impl Document {
    /// Construct a new document, validating the embedding invariants:
    /// non-empty, finite, and (when `expected_dim` is given) of the
    /// expected length.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedding is empty, contains NaN/Inf, or does
    /// not match `expected_dim`.
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
        payload: Payload,
        expected_dim: Option<usize>,
    ) -> crate::Result<Self> {
        validate_embedding(&embedding, expected_dim)?;
        Ok(Self {
            id: id.into(),
            content: content.into(),
            embedding,
            payload,
        })
    }

    /// The tenant scope stamped on this document's payload, if any.
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.payload.get("tenant_id").and_then(PayloadValue::as_str)
    }
}

/// Validate the embedding invariants from spec §3.1: never empty, never
/// NaN/Inf, and matching the collection's declared dimension.
pub fn validate_embedding(embedding: &[f32], expected_dim: Option<usize>) -> crate::Result<()> {
    if embedding.is_empty() {
        return Err(crate::Error::Validation("embedding must not be empty".into()));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(crate::Error::Validation(
            "embedding must not contain NaN/Inf".into(),
        ));
    }
    if let Some(dim) = expected_dim {
        if embedding.len() != dim {
            return Err(crate::Error::Validation(format!(
                "embedding length {} does not match collection dimension {dim}",
                embedding.len()
            )));
        }
    }
    Ok(())
}

/// Distance metric used by a collection. Cosine is the only metric this
/// substrate implements (spec §3.2), kept as an enum so future metrics slot
/// in without changing call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Cosine similarity, normalised to `[0, 1]`.
    Cosine,
}

/// Named group of documents sharing a single embedding dimension and metric
/// (spec §3.2). Maps to a directory (embedded backend) or a remote
/// collection name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMeta {
    /// Collection name, e.g. `memories`, `remediations`, `checkpoints`.
    pub name: String,
    /// Embedding dimension every document in this collection must match.
    pub dimension: usize,
    /// Distance metric.
    pub metric: Metric,
    /// Arbitrary user metadata attached to the collection itself.
    pub user_metadata: BTreeMap<String, String>,
}

impl CollectionMeta {
    /// Construct collection metadata with no user metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            metric: Metric::Cosine,
            user_metadata: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_embedding() {
        assert!(validate_embedding(&[], None).is_err());
    }

    #[test]
    fn rejects_nan() {
        assert!(validate_embedding(&[1.0, f32::NAN], None).is_err());
    }

    #[test]
    fn rejects_dimension_mismatch() {
        assert!(validate_embedding(&[1.0, 2.0], Some(3)).is_err());
        assert!(validate_embedding(&[1.0, 2.0, 3.0], Some(3)).is_ok());
    }

    #[test]
    fn token_count_round_trips_through_string() {
        let v = PayloadValue::String("12345".to_string());
        assert_eq!(v.as_f64(), Some(12345.0));
    }
}
