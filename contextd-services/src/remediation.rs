//! Remediation service (spec §3.4, §4.6): error→fix pairs, searched with a
//! hybrid semantic+lexical rerank against `error_msg`.

use crate::hybrid;
use crate::ids::remediation_id;
use chrono::{DateTime, Utc};
use contextd_core::{
    CollectionMeta, Document, EmbeddingProvider, Error, Filter, Payload, PayloadValue, Result,
    SearchOptions, VectorStore,
};
use std::collections::BTreeMap;

/// Collection name for remediations (spec §3.2).
pub const REMEDIATIONS_COLLECTION: &str = "remediations";

/// Length limits from spec §3.4.
pub const MAX_ERROR_MSG_BYTES: usize = 10 * 1024;
pub const MAX_SOLUTION_BYTES: usize = 50 * 1024;
pub const MAX_CONTEXT_BYTES: usize = 100 * 1024;

const KEY_PROJECT_PATH: &str = "project_path";
const KEY_ERROR_MSG: &str = "error_msg";
const KEY_SOLUTION: &str = "solution";
const KEY_CONTEXT: &str = "context";
const KEY_PATTERNS: &str = "patterns";
const KEY_METADATA: &str = "metadata";
const KEY_CREATED_AT: &str = "created_at";
const KEY_UPDATED_AT: &str = "updated_at";

/// A remediation, decoded from its stored payload (spec §3.4).
#[derive(Debug, Clone)]
pub struct RemediationRecord {
    pub id: String,
    pub project_path: String,
    pub error_msg: String,
    pub solution: String,
    pub context: Option<String>,
    pub patterns: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemediationRecord {
    fn into_payload(self) -> Result<Payload> {
        let mut payload = Payload::new();
        payload.insert(KEY_PROJECT_PATH.into(), self.project_path.into());
        payload.insert(KEY_ERROR_MSG.into(), self.error_msg.into());
        payload.insert(KEY_SOLUTION.into(), self.solution.into());
        if let Some(context) = self.context {
            payload.insert(KEY_CONTEXT.into(), context.into());
        }
        payload.insert(KEY_PATTERNS.into(), self.patterns.into());
        if !self.metadata.is_empty() {
            let encoded = serde_json::to_string(&self.metadata)?;
            payload.insert(KEY_METADATA.into(), encoded.into());
        }
        payload.insert(KEY_CREATED_AT.into(), self.created_at.to_rfc3339().into());
        payload.insert(KEY_UPDATED_AT.into(), self.updated_at.to_rfc3339().into());
        Ok(payload)
    }

    /// Decode a remediation from a document id and payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if a required field is missing.
    pub fn from_payload(id: String, payload: &Payload) -> Result<Self> {
        let get_str = |key: &str| -> Result<String> {
            payload
                .get(key)
                .and_then(PayloadValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Validation(format!("remediation payload missing '{key}'")))
        };
        let metadata = match payload.get(KEY_METADATA).and_then(PayloadValue::as_str) {
            Some(raw) => serde_json::from_str(raw)?,
            None => BTreeMap::new(),
        };
        Ok(Self {
            id,
            project_path: get_str(KEY_PROJECT_PATH)?,
            error_msg: get_str(KEY_ERROR_MSG)?,
            solution: get_str(KEY_SOLUTION)?,
            context: payload.get(KEY_CONTEXT).and_then(PayloadValue::as_str).map(str::to_string),
            patterns: payload
                .get(KEY_PATTERNS)
                .and_then(PayloadValue::as_string_list)
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
            metadata,
            created_at: parse_timestamp(&get_str(KEY_CREATED_AT)?)?,
            updated_at: parse_timestamp(&get_str(KEY_UPDATED_AT)?)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Validation(format!("invalid timestamp '{raw}': {e}")))
}

/// A remediation search hit carrying the hybrid-combined score alongside
/// its semantic/lexical components (teacher's `HybridSearchResult` shape).
#[derive(Debug, Clone)]
pub struct RemediationHit {
    pub record: RemediationRecord,
    pub combined_score: f32,
    pub semantic_score: f32,
    pub lexical_score: f32,
}

const CANDIDATE_FANOUT: usize = 4;

/// Remediation service (C6).
pub struct RemediationService<S, E> {
    store: S,
    embedder: std::sync::Arc<E>,
}

impl<S: VectorStore, E: EmbeddingProvider> RemediationService<S, E> {
    #[must_use]
    pub fn new(store: S, embedder: std::sync::Arc<E>) -> Self {
        Self { store, embedder }
    }

    async fn ensure_collection(&self) -> Result<()> {
        self.store
            .ensure_collection(CollectionMeta::new(REMEDIATIONS_COLLECTION, self.embedder.dimension()))
            .await
    }

    /// `remediation_record` (spec §6.1): validates required fields, length
    /// limits, and that `project_path` is absolute.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        project_path: impl Into<String>,
        error_msg: impl Into<String>,
        solution: impl Into<String>,
        context: Option<String>,
        patterns: Vec<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<String> {
        let project_path = project_path.into();
        let error_msg = error_msg.into();
        let solution = solution.into();
        if project_path.is_empty() || error_msg.is_empty() || solution.is_empty() {
            return Err(Error::Validation(
                "project_path, error_msg, and solution are required".into(),
            ));
        }
        if !project_path.starts_with('/') {
            return Err(Error::Validation("project_path must be absolute".into()));
        }
        if error_msg.len() > MAX_ERROR_MSG_BYTES {
            return Err(Error::Validation(format!(
                "error_msg exceeds {MAX_ERROR_MSG_BYTES} bytes"
            )));
        }
        if solution.len() > MAX_SOLUTION_BYTES {
            return Err(Error::Validation(format!(
                "solution exceeds {MAX_SOLUTION_BYTES} bytes"
            )));
        }
        if let Some(ctx) = &context {
            if ctx.len() > MAX_CONTEXT_BYTES {
                return Err(Error::Validation(format!(
                    "context exceeds {MAX_CONTEXT_BYTES} bytes"
                )));
            }
        }

        self.ensure_collection().await?;
        let embedding = self.embedder.embed(&error_msg).await?;
        let id = remediation_id();
        let now = Utc::now();
        let record = RemediationRecord {
            id: id.clone(),
            project_path,
            error_msg: error_msg.clone(),
            solution,
            context,
            patterns,
            metadata,
            created_at: now,
            updated_at: now,
        };
        let doc = Document::new(id.clone(), error_msg, embedding, record.into_payload()?, None)?;
        self.store
            .add_documents(REMEDIATIONS_COLLECTION, vec![doc])
            .await?;
        Ok(id)
    }

    /// `remediation_search` (spec §4.6, §6.1): hybrid score
    /// `0.70*semantic + 0.30*lexical` against `error_msg`, optionally
    /// scoped to `project_path`, dropped below `min_score`.
    pub async fn search(
        &self,
        query: &str,
        project_path: Option<&str>,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<RemediationHit>> {
        let embedding = self.embedder.embed(query).await?;
        let filter = project_path.map(|p| Filter::Eq(KEY_PROJECT_PATH.into(), p.into()));
        let opts = SearchOptions {
            limit: limit.saturating_mul(CANDIDATE_FANOUT).max(limit),
            min_score: 0.0,
            filters: filter.clone(),
            include_archived: true,
        };
        let hits = self
            .store
            .search_with_filters(REMEDIATIONS_COLLECTION, &embedding, &opts, filter.as_ref())
            .await?;
        let mut decoded = Vec::with_capacity(hits.len());
        for hit in hits {
            let record = RemediationRecord::from_payload(hit.id.clone(), &hit.payload)?;
            let lexical = hybrid::lexical_similarity(query, &record.error_msg);
            let combined = hybrid::combined_score(hit.score, lexical);
            decoded.push(RemediationHit {
                record,
                combined_score: combined,
                semantic_score: hit.score,
                lexical_score: lexical,
            });
        }
        decoded.retain(|h| h.combined_score >= min_score);
        decoded.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        decoded.truncate(limit);
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextd_core::MockEmbeddingProvider;
    use contextd_store_embedded::EmbeddedVectorStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn service() -> (TempDir, RemediationService<EmbeddedVectorStore, MockEmbeddingProvider>) {
        let dir = TempDir::new().unwrap();
        let store = EmbeddedVectorStore::open(dir.path()).await.unwrap();
        (dir, RemediationService::new(store, Arc::new(MockEmbeddingProvider::new(16))))
    }

    #[tokio::test]
    async fn record_rejects_relative_project_path() {
        let (_dir, svc) = service().await;
        let err = svc
            .record("not/absolute", "connection refused", "retry with backoff", None, vec![], BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn record_rejects_oversized_error_msg() {
        let (_dir, svc) = service().await;
        let huge = "x".repeat(MAX_ERROR_MSG_BYTES + 1);
        let err = svc
            .record("/proj", huge, "fix", None, vec![], BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn record_then_search_round_trips_with_hybrid_score() {
        let (_dir, svc) = service().await;
        let id = svc
            .record(
                "/proj/a",
                "connection refused",
                "retry with exponential backoff",
                None,
                vec!["connection refused".into()],
                BTreeMap::new(),
            )
            .await
            .unwrap();

        let hits = svc.search("connection refused", None, 5, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, id);
        assert!((hits[0].lexical_score - 1.0).abs() < 1e-6);
        assert!(hits[0].combined_score > 0.0);
    }

    #[tokio::test]
    async fn search_scopes_to_project_path() {
        let (_dir, svc) = service().await;
        svc.record("/proj/a", "file_path_error", "normalize path", None, vec![], BTreeMap::new())
            .await
            .unwrap();
        svc.record("/proj/b", "file_path_error", "normalize path", None, vec![], BTreeMap::new())
            .await
            .unwrap();

        let hits = svc.search("file_path_error", Some("/proj/a"), 10, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.project_path, "/proj/a");
    }
}
