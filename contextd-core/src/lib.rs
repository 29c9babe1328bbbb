//! Core data model, embedding provider contract, and vector store
//! capability set shared by every ContextD storage backend and wrapper.
//!
//! This crate has no knowledge of tenancy policy, resilience policy, or
//! remote transport — those live in `contextd-isolation`,
//! `contextd-resilient`, `contextd-fallback`, `contextd-store-embedded`
//! and `contextd-store-remote`. `contextd-core` only defines the shapes
//! those crates agree on.

pub mod document;
pub mod embeddings;
pub mod error;
pub mod filter;
pub mod scrub;
pub mod tenant;
pub mod vectorstore;
pub mod wal;

pub use document::{CollectionMeta, Document, Metric, Payload, PayloadValue};
pub use embeddings::{EmbeddingProvider, MockEmbeddingProvider};
pub use error::{Error, Result};
pub use filter::{Filter, SearchOptions};
pub use scrub::{FailingScrubber, PatternScrubber, ScrubReport, Scrubber};
pub use tenant::TenantContext;
pub use vectorstore::{
    cosine_similarity, DocumentIterator, DocumentPatch, SearchHit, VectorStore,
    DOCUMENT_ITERATOR_BUFFER,
};
pub use wal::{RemoteState, WalEntry, WalOperation, MAX_ENTRY_BYTES, MAX_ENTRY_DOCS};
