//! Checkpoint service (spec §3.5, §4.6): compact per-session state
//! summaries, listed and resumed by id. Numeric fields are stored as
//! strings and must round-trip exactly (spec §8's canonical test case).

use crate::ids::checkpoint_id;
use chrono::{DateTime, Utc};
use contextd_core::{
    CollectionMeta, Document, EmbeddingProvider, Error, Filter, Payload, PayloadValue, Result,
    SearchOptions, VectorStore,
};

/// Collection name for checkpoints (spec §3.2).
pub const CHECKPOINTS_COLLECTION: &str = "checkpoints";

const KEY_SESSION_ID: &str = "session_id";
const KEY_SUMMARY: &str = "summary";
const KEY_TOKEN_COUNT: &str = "token_count";
const KEY_AUTO_CREATED: &str = "auto_created";
const KEY_CREATED_AT: &str = "created_at";

/// A checkpoint, decoded from its stored payload (spec §3.5).
#[derive(Debug, Clone)]
pub struct CheckpointRecord {
    pub id: String,
    pub session_id: String,
    pub summary: String,
    pub token_count: u64,
    pub auto_created: bool,
    pub created_at: DateTime<Utc>,
}

impl CheckpointRecord {
    fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert(KEY_SESSION_ID.into(), self.session_id.into());
        payload.insert(KEY_SUMMARY.into(), self.summary.into());
        // Stored as a string, not a number, per spec §3.5: "numeric fields
        // MUST be parseable back via explicit conversion".
        payload.insert(KEY_TOKEN_COUNT.into(), self.token_count.to_string().into());
        payload.insert(KEY_AUTO_CREATED.into(), self.auto_created.to_string().into());
        payload.insert(KEY_CREATED_AT.into(), self.created_at.to_rfc3339().into());
        payload
    }

    /// Decode a checkpoint from a document id and payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if a required field is missing or
    /// `token_count` does not parse back as an integer.
    pub fn from_payload(id: String, payload: &Payload) -> Result<Self> {
        let get_str = |key: &str| -> Result<String> {
            payload
                .get(key)
                .and_then(PayloadValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Validation(format!("checkpoint payload missing '{key}'")))
        };
        let token_count = payload
            .get(KEY_TOKEN_COUNT)
            .and_then(PayloadValue::as_f64)
            .map(|v| v as u64)
            .ok_or_else(|| Error::Validation("checkpoint token_count did not round-trip".into()))?;
        let auto_created = payload
            .get(KEY_AUTO_CREATED)
            .and_then(PayloadValue::as_bool)
            .unwrap_or(false);
        Ok(Self {
            id,
            session_id: get_str(KEY_SESSION_ID)?,
            summary: get_str(KEY_SUMMARY)?,
            token_count,
            auto_created,
            created_at: parse_timestamp(&get_str(KEY_CREATED_AT)?)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Validation(format!("invalid timestamp '{raw}': {e}")))
}

/// Checkpoint service (C6).
pub struct CheckpointService<S, E> {
    store: S,
    embedder: std::sync::Arc<E>,
}

impl<S: VectorStore, E: EmbeddingProvider> CheckpointService<S, E> {
    #[must_use]
    pub fn new(store: S, embedder: std::sync::Arc<E>) -> Self {
        Self { store, embedder }
    }

    async fn ensure_collection(&self) -> Result<()> {
        self.store
            .ensure_collection(CollectionMeta::new(CHECKPOINTS_COLLECTION, self.embedder.dimension()))
            .await
    }

    /// `checkpoint_save` (spec §6.1). Returns the new checkpoint's id.
    pub async fn save(
        &self,
        session_id: impl Into<String>,
        summary: impl Into<String>,
        token_count: u64,
        auto_created: bool,
    ) -> Result<String> {
        let session_id = session_id.into();
        let summary = summary.into();
        if session_id.is_empty() || summary.is_empty() {
            return Err(Error::Validation("session_id and summary are required".into()));
        }
        self.ensure_collection().await?;
        let embedding = self.embedder.embed(&summary).await?;
        let id = checkpoint_id();
        let record = CheckpointRecord {
            id: id.clone(),
            session_id,
            summary: summary.clone(),
            token_count,
            auto_created,
            created_at: Utc::now(),
        };
        let doc = Document::new(id.clone(), summary, embedding, record.into_payload(), None)?;
        self.store
            .add_documents(CHECKPOINTS_COLLECTION, vec![doc])
            .await?;
        Ok(id)
    }

    /// `checkpoint_list` (spec §6.1): checkpoints for `session_id`, newest
    /// first, capped at `limit`.
    pub async fn list(&self, session_id: &str, limit: usize) -> Result<Vec<CheckpointRecord>> {
        self.ensure_collection().await?;
        let filter = Filter::Eq(KEY_SESSION_ID.into(), session_id.into());
        let query_embedding = vec![0.0_f32; self.embedder.dimension()];
        let opts = SearchOptions {
            limit: limit.max(1) * 4,
            min_score: 0.0,
            filters: Some(filter.clone()),
            include_archived: true,
        };
        let hits = self
            .store
            .search_with_filters(CHECKPOINTS_COLLECTION, &query_embedding, &opts, Some(&filter))
            .await?;
        let mut records = hits
            .into_iter()
            .map(|hit| CheckpointRecord::from_payload(hit.id, &hit.payload))
            .collect::<Result<Vec<_>>>()?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    /// `checkpoint_resume` (spec §6.1): fetch a single checkpoint by id.
    pub async fn resume(&self, id: &str) -> Result<Option<CheckpointRecord>> {
        let doc = self.store.get_document(CHECKPOINTS_COLLECTION, id).await?;
        doc.map(|d| CheckpointRecord::from_payload(d.id, &d.payload)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextd_core::MockEmbeddingProvider;
    use contextd_store_embedded::EmbeddedVectorStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn service() -> (TempDir, CheckpointService<EmbeddedVectorStore, MockEmbeddingProvider>) {
        let dir = TempDir::new().unwrap();
        let store = EmbeddedVectorStore::open(dir.path()).await.unwrap();
        (dir, CheckpointService::new(store, Arc::new(MockEmbeddingProvider::new(16))))
    }

    #[tokio::test]
    async fn save_then_resume_round_trips_token_count() {
        let (_dir, svc) = service().await;
        let id = svc.save("session-1", "did X then Y", 12345, false).await.unwrap();
        let record = svc.resume(&id).await.unwrap().unwrap();
        assert_eq!(record.token_count, 12345);
        assert_eq!(record.session_id, "session-1");
        assert!(!record.auto_created);
    }

    #[tokio::test]
    async fn list_scopes_to_session_and_orders_newest_first() {
        let (_dir, svc) = service().await;
        svc.save("session-1", "first", 10, true).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = svc.save("session-1", "second", 20, true).await.unwrap();
        svc.save("session-2", "other session", 30, true).await.unwrap();

        let list = svc.list("session-1", 10).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, second);
    }

    #[tokio::test]
    async fn resume_of_missing_id_returns_none() {
        let (_dir, svc) = service().await;
        assert!(svc.resume("ck_nonexistent").await.unwrap().is_none());
    }
}
