//! Memory service (spec §3.3, §4.6): episodic lessons learned, searched by
//! semantic similarity with a confidence-weighted boost for consolidated
//! memories.

use crate::confidence::{self, DEFAULT_CONFIDENCE};
use crate::ids::memory_id;
use chrono::{DateTime, Utc};
use contextd_core::{
    CollectionMeta, Document, DocumentPatch, EmbeddingProvider, Error, Filter, Payload,
    PayloadValue, Result, SearchOptions, VectorStore,
};

/// Collection name for memories (spec §3.2).
pub const MEMORIES_COLLECTION: &str = "memories";

/// Score multiplier applied to consolidated memories before final sort
/// (spec §4.6), bounded at 1.0.
pub const CONSOLIDATED_BOOST: f32 = 1.20;

const KEY_TITLE: &str = "title";
const KEY_CONTENT: &str = "content";
const KEY_OUTCOME: &str = "outcome";
const KEY_TAGS: &str = "tags";
const KEY_CONFIDENCE: &str = "confidence";
const KEY_USAGE_COUNT: &str = "usage_count";
const KEY_STATE: &str = "state";
const KEY_CONSOLIDATION_ID: &str = "consolidation_id";
const KEY_SOURCE_IDS: &str = "source_ids";
const KEY_CREATED_AT: &str = "created_at";
const KEY_UPDATED_AT: &str = "updated_at";

/// Outcome of the episode a memory was drawn from (spec §3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Parse case-insensitively, rejecting anything outside the closed
    /// set (spec §6.2's `InvalidOutcome`).
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.to_lowercase().as_str() {
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            other => Err(Error::InvalidOutcome(other.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Lifecycle state of a memory (spec §3.1, §3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryState {
    Active,
    Archived,
}

impl MemoryState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryState::Active => "active",
            MemoryState::Archived => "archived",
        }
    }
}

/// A memory, decoded from its stored payload (spec §3.3).
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub id: String,
    pub title: String,
    pub content: String,
    pub outcome: Outcome,
    pub tags: Vec<String>,
    pub confidence: f32,
    pub usage_count: i64,
    pub state: MemoryState,
    pub consolidation_id: Option<String>,
    pub source_ids: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryRecord {
    fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert(KEY_TITLE.into(), self.title.into());
        payload.insert(KEY_CONTENT.into(), self.content.into());
        payload.insert(KEY_OUTCOME.into(), self.outcome.as_str().into());
        payload.insert(KEY_TAGS.into(), self.tags.into());
        payload.insert(KEY_CONFIDENCE.into(), f64::from(self.confidence).into());
        payload.insert(KEY_USAGE_COUNT.into(), self.usage_count.into());
        payload.insert(KEY_STATE.into(), self.state.as_str().into());
        if let Some(cid) = self.consolidation_id {
            payload.insert(KEY_CONSOLIDATION_ID.into(), cid.into());
        }
        if let Some(sources) = self.source_ids {
            payload.insert(KEY_SOURCE_IDS.into(), sources.into());
        }
        payload.insert(KEY_CREATED_AT.into(), self.created_at.to_rfc3339().into());
        payload.insert(KEY_UPDATED_AT.into(), self.updated_at.to_rfc3339().into());
        payload
    }

    /// Decode a memory from a document id and payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if a required field is missing or
    /// malformed.
    pub fn from_payload(id: String, content: String, payload: &Payload) -> Result<Self> {
        let get_str = |key: &str| -> Result<String> {
            payload
                .get(key)
                .and_then(PayloadValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Validation(format!("memory payload missing '{key}'")))
        };
        let outcome = Outcome::parse(&get_str(KEY_OUTCOME)?)?;
        let tags = payload
            .get(KEY_TAGS)
            .and_then(PayloadValue::as_string_list)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        let confidence = payload
            .get(KEY_CONFIDENCE)
            .and_then(PayloadValue::as_f64)
            .map(|v| confidence::clamp(v as f32))
            .unwrap_or(DEFAULT_CONFIDENCE);
        let usage_count = payload
            .get(KEY_USAGE_COUNT)
            .and_then(PayloadValue::as_f64)
            .map(|v| v as i64)
            .unwrap_or(0);
        let state = match payload.get(KEY_STATE).and_then(PayloadValue::as_str) {
            Some("archived") => MemoryState::Archived,
            _ => MemoryState::Active,
        };
        let consolidation_id = payload
            .get(KEY_CONSOLIDATION_ID)
            .and_then(PayloadValue::as_str)
            .map(str::to_string);
        let source_ids = payload
            .get(KEY_SOURCE_IDS)
            .and_then(PayloadValue::as_string_list)
            .map(<[String]>::to_vec);
        let created_at = parse_timestamp(&get_str(KEY_CREATED_AT)?)?;
        let updated_at = parse_timestamp(&get_str(KEY_UPDATED_AT)?)?;
        Ok(Self {
            id,
            title: get_str(KEY_TITLE)?,
            content,
            outcome,
            tags,
            confidence,
            usage_count,
            state,
            consolidation_id,
            source_ids,
            created_at,
            updated_at,
        })
    }

    fn is_consolidated(&self) -> bool {
        self.source_ids.as_ref().is_some_and(|s| !s.is_empty())
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Validation(format!("invalid timestamp '{raw}': {e}")))
}

/// A memory search hit, with the semantic score already boosted and the
/// decoded record attached.
#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub record: MemoryRecord,
    pub score: f32,
}

/// Fan-out multiplier applied to the backend query so that boosted scores
/// never miss a document the raw (pre-boost) search would have dropped.
const CANDIDATE_FANOUT: usize = 4;

/// Memory service (C6), composed over an already tenant-scoped,
/// fallback/resilience-wrapped `VectorStore` (spec §2's data-flow chain).
pub struct MemoryService<S, E> {
    store: S,
    embedder: std::sync::Arc<E>,
}

impl<S: VectorStore, E: EmbeddingProvider> MemoryService<S, E> {
    #[must_use]
    pub fn new(store: S, embedder: std::sync::Arc<E>) -> Self {
        Self { store, embedder }
    }

    async fn ensure_collection(&self) -> Result<()> {
        self.store
            .ensure_collection(CollectionMeta::new(MEMORIES_COLLECTION, self.embedder.dimension()))
            .await
    }

    /// `memory_record` (spec §6.1): validate, embed, stamp timestamps, and
    /// upsert. Returns the new memory's id.
    pub async fn record(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
        outcome: Outcome,
        tags: Vec<String>,
        confidence: Option<f32>,
    ) -> Result<String> {
        self.record_with_sources(title, content, outcome, tags, confidence, None).await
    }

    /// Write a consolidated memory with `source_ids` populated (spec
    /// §4.7.4 step 1). Used only by the distiller's commit flow.
    pub async fn record_consolidated(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
        outcome: Outcome,
        tags: Vec<String>,
        confidence: f32,
        source_ids: Vec<String>,
    ) -> Result<String> {
        self.record_with_sources(title, content, outcome, tags, Some(confidence), Some(source_ids))
            .await
    }

    async fn record_with_sources(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
        outcome: Outcome,
        tags: Vec<String>,
        confidence: Option<f32>,
        source_ids: Option<Vec<String>>,
    ) -> Result<String> {
        let title = title.into();
        let content = content.into();
        if title.is_empty() || content.is_empty() {
            return Err(Error::Validation("title and content are required".into()));
        }
        let confidence = confidence::clamp(confidence.unwrap_or(DEFAULT_CONFIDENCE));
        self.ensure_collection().await?;
        let embedding = self.embedder.embed(&content).await?;
        let id = memory_id();
        let now = Utc::now();
        let record = MemoryRecord {
            id: id.clone(),
            title,
            content: content.clone(),
            outcome,
            tags,
            confidence,
            usage_count: 0,
            state: MemoryState::Active,
            consolidation_id: None,
            source_ids,
            created_at: now,
            updated_at: now,
        };
        let doc = Document::new(id.clone(), content, embedding, record.into_payload(), None)?;
        self.store
            .add_documents(MEMORIES_COLLECTION, vec![doc])
            .await?;
        Ok(id)
    }

    /// Mark a source memory `archived` and link it to the consolidated
    /// memory that replaced it (spec §4.7.4 step 2). Best-effort per
    /// source: a failure here leaves that source active, to be
    /// re-clustered on the next run (spec §4.7.4, §4.7.6).
    pub async fn archive_as_consolidated(&self, id: &str, consolidation_id: &str) -> Result<()> {
        let mut payload_set = Payload::new();
        payload_set.insert(KEY_STATE.into(), MemoryState::Archived.as_str().into());
        payload_set.insert(KEY_CONSOLIDATION_ID.into(), consolidation_id.into());
        payload_set.insert(KEY_UPDATED_AT.into(), Utc::now().to_rfc3339().into());
        self.store
            .update_document(
                MEMORIES_COLLECTION,
                id,
                DocumentPatch { payload_set, ..DocumentPatch::default() },
            )
            .await
    }

    /// `memory_search` (spec §4.6, §6.1). Excludes archived memories unless
    /// `opts.include_archived`; boosts consolidated memories ×1.20 bounded
    /// at 1.0; re-sorts and truncates to `opts.limit` after boosting.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<MemoryHit>> {
        let embedding = self.embedder.embed(query).await?;
        let fanout = SearchOptions {
            limit: opts.limit.saturating_mul(CANDIDATE_FANOUT).max(opts.limit),
            min_score: 0.0,
            filters: opts.filters.clone(),
            include_archived: opts.include_archived,
        };
        let archived_filter = Filter::Eq(KEY_STATE.into(), "archived".into());
        let effective_filter = if opts.include_archived {
            fanout.filters.clone()
        } else {
            let exclude = Filter::Not(Box::new(archived_filter));
            Some(match fanout.filters.clone() {
                Some(f) => f.and(exclude),
                None => exclude,
            })
        };
        let hits = self
            .store
            .search_with_filters(MEMORIES_COLLECTION, &embedding, &fanout, effective_filter.as_ref())
            .await?;
        let mut decoded = Vec::with_capacity(hits.len());
        for hit in hits {
            let record = MemoryRecord::from_payload(
                hit.id.clone(),
                hit.payload
                    .get(KEY_CONTENT)
                    .and_then(PayloadValue::as_str)
                    .unwrap_or_default()
                    .to_string(),
                &hit.payload,
            )?;
            let score = if record.is_consolidated() {
                (hit.score * CONSOLIDATED_BOOST).min(1.0)
            } else {
                hit.score
            };
            decoded.push(MemoryHit { record, score });
        }
        decoded.retain(|h| h.score >= opts.min_score);
        decoded.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        decoded.truncate(opts.limit);
        Ok(decoded)
    }

    /// Stream every active (non-archived) memory with its embedding, for
    /// the distiller's clustering pass (spec §4.7.1). Archived memories and
    /// memories already part of a cluster's consolidated output are never
    /// re-clustered.
    pub async fn list_active_with_embeddings(&self) -> Result<Vec<(MemoryRecord, Vec<f32>)>> {
        self.ensure_collection().await?;
        let mut iter = self.store.new_document_iterator(MEMORIES_COLLECTION).await?;
        let mut out = Vec::new();
        while let Some(doc) = iter.next().await {
            let doc = doc?;
            let record = MemoryRecord::from_payload(doc.id, doc.content, &doc.payload)?;
            if record.state == MemoryState::Active {
                out.push((record, doc.embedding));
            }
        }
        Ok(out)
    }

    /// Archive every `source_ids` entry as consolidated into `new_memory_id`
    /// (spec §4.7.4 step 2). Archival is best-effort and sequenced after the
    /// new memory is already committed: a source that fails to archive
    /// remains active and is simply re-clustered on the next distiller run
    /// (spec §4.7.4, §4.7.6), so a partial failure here never undoes step 1.
    /// Returns the per-source errors, if any, for the caller's report.
    pub async fn commit_consolidation(&self, new_memory_id: &str, source_ids: &[String]) -> Vec<Error> {
        let mut errors = Vec::new();
        for id in source_ids {
            if let Err(e) = self.archive_as_consolidated(id, new_memory_id).await {
                errors.push(e);
            }
        }
        errors
    }

    /// `memory_feedback` (spec §4.6): adjust confidence by `+0.10`/`-0.15`.
    pub async fn feedback(&self, id: &str, helpful: bool) -> Result<()> {
        self.adjust_confidence(id, |c| confidence::apply_feedback(c, helpful))
            .await
    }

    /// `memory_outcome` (spec §4.6): adjust confidence by `+0.05`/`-0.10`.
    pub async fn outcome(&self, id: &str, succeeded: bool) -> Result<()> {
        self.adjust_confidence(id, |c| confidence::apply_outcome(c, succeeded))
            .await
    }

    async fn adjust_confidence(&self, id: &str, f: impl FnOnce(f32) -> f32) -> Result<()> {
        let doc = self
            .store
            .get_document(MEMORIES_COLLECTION, id)
            .await?
            .ok_or_else(|| Error::Validation(format!("memory '{id}' not found")))?;
        let current = doc
            .payload
            .get(KEY_CONFIDENCE)
            .and_then(PayloadValue::as_f64)
            .map(|v| v as f32)
            .unwrap_or(DEFAULT_CONFIDENCE);
        let updated = f(current);
        let mut payload_set = Payload::new();
        payload_set.insert(KEY_CONFIDENCE.into(), f64::from(updated).into());
        payload_set.insert(KEY_UPDATED_AT.into(), Utc::now().to_rfc3339().into());
        self.store
            .update_document(
                MEMORIES_COLLECTION,
                id,
                DocumentPatch {
                    payload_set,
                    ..DocumentPatch::default()
                },
            )
            .await
    }
}
