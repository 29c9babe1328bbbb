//! REST wire types for the remote vector store contract. The remote
//! service itself is an external collaborator (spec §1: out of scope) —
//! these types describe the request/response shapes this client sends
//! and expects.

use contextd_core::{CollectionMeta, Document, Filter, Payload};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct AddDocumentsRequest<'a> {
    pub documents: &'a [Document],
}

#[derive(Debug, Serialize)]
pub struct SearchRequest<'a> {
    pub query_embedding: &'a [f32],
    pub limit: usize,
    pub min_score: f32,
    pub include_archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<&'a Filter>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponseHit {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchResponseHit>,
}

#[derive(Debug, Serialize, Default)]
pub struct UpdateDocumentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub payload_set: Payload,
    pub payload_unset: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteDocumentsRequest<'a> {
    pub ids: &'a [String],
}

#[derive(Debug, Deserialize)]
pub struct ListCollectionsResponse {
    pub collections: Vec<CollectionMeta>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}
