//! HTTP-backed `VectorStore` implementation (C2, remote variant).
//!
//! A single REST call per trait method, no internal retries — spec §4.2
//! assigns retry policy to the fallback wrapper (`contextd-fallback`),
//! not to this client.

use crate::config::RemoteConfig;
use crate::wire::{
    AddDocumentsRequest, DeleteDocumentsRequest, ErrorResponse, ListCollectionsResponse,
    SearchRequest, SearchResponse, UpdateDocumentRequest,
};
use async_trait::async_trait;
use contextd_core::{
    CollectionMeta, Document, DocumentIterator, DocumentPatch, Error, Filter, Result, SearchHit,
    SearchOptions, VectorStore, DOCUMENT_ITERATOR_BUFFER,
};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const STREAM_PAGE_SIZE: usize = 200;

/// `VectorStore` backend that proxies every operation to a remote HTTP
/// service over a `reqwest::Client`.
pub struct RemoteVectorStore {
    http: reqwest::Client,
    config: RemoteConfig,
}

impl RemoteVectorStore {
    /// Build a client for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the underlying HTTP client
    /// cannot be constructed (e.g. an unsupported TLS configuration).
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.endpoint.as_str().trim_end_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, self.url(path));
        if let Some(token) = &self.config.auth_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> Result<T> {
        let response = builder.send().await.map_err(map_transport_error)?;
        handle_response(response).await
    }

    async fn send_empty(&self, builder: reqwest::RequestBuilder) -> Result<()> {
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(map_status_error(status, response.text().await.unwrap_or_default()))
    }
}

fn map_transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else if e.is_connect() {
        Error::Unreachable(e.to_string())
    } else {
        Error::WriteFailed(e.to_string())
    }
}

async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(map_transport_error);
    }
    Err(map_status_error(status, response.text().await.unwrap_or_default()))
}

fn map_status_error(status: StatusCode, body: String) -> Error {
    let parsed: Option<ErrorResponse> = serde_json::from_str(&body).ok();
    let message = parsed.map_or(body, |e| format!("{}: {}", e.code, e.message));
    match status {
        StatusCode::NOT_FOUND => Error::CollectionNotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Error::Validation(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Error::Timeout(message),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => Error::Unreachable(message),
        _ => Error::WriteFailed(message),
    }
}

#[async_trait]
impl VectorStore for RemoteVectorStore {
    async fn add_documents(&self, collection: &str, docs: Vec<Document>) -> Result<()> {
        let body = AddDocumentsRequest { documents: &docs };
        let builder = self
            .request(Method::POST, &format!("/collections/{collection}/documents"))
            .json(&body);
        self.send_empty(builder).await
    }

    async fn search(&self, collection: &str, query_embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let opts = SearchOptions {
            limit: k,
            ..SearchOptions::default()
        };
        self.search_with_filters(collection, query_embedding, &opts, None).await
    }

    async fn search_with_filters(
        &self,
        collection: &str,
        query_embedding: &[f32],
        opts: &SearchOptions,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>> {
        let body = SearchRequest {
            query_embedding,
            limit: opts.limit,
            min_score: opts.min_score,
            include_archived: opts.include_archived,
            filter,
        };
        let builder = self
            .request(Method::POST, &format!("/collections/{collection}/search"))
            .json(&body);
        let response: SearchResponse = self.send_json(builder).await?;
        Ok(response
            .hits
            .into_iter()
            .map(|hit| SearchHit {
                id: hit.id,
                score: hit.score,
                payload: hit.payload,
            })
            .collect())
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let builder = self.request(Method::GET, &format!("/collections/{collection}/documents/{id}"));
        let response = builder.send().await.map_err(map_transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(map_status_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(Some(response.json::<Document>().await.map_err(map_transport_error)?))
    }

    async fn update_document(&self, collection: &str, id: &str, patch: DocumentPatch) -> Result<()> {
        let body = UpdateDocumentRequest {
            content: patch.content,
            embedding: patch.embedding,
            payload_set: patch.payload_set,
            payload_unset: patch.payload_unset,
        };
        let builder = self
            .request(Method::PATCH, &format!("/collections/{collection}/documents/{id}"))
            .json(&body);
        self.send_empty(builder).await
    }

    async fn delete_documents(&self, collection: &str, ids: &[String]) -> Result<()> {
        let body = DeleteDocumentsRequest { ids };
        let builder = self
            .request(Method::POST, &format!("/collections/{collection}/documents:delete"))
            .json(&body);
        self.send_empty(builder).await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionMeta>> {
        let builder = self.request(Method::GET, "/collections");
        let response: ListCollectionsResponse = self.send_json(builder).await?;
        Ok(response.collections)
    }

    async fn new_document_iterator(&self, collection: &str) -> Result<DocumentIterator> {
        let http = self.http.clone();
        let base = self.url(&format!("/collections/{collection}/documents"));
        let auth = self.config.auth_token.clone();
        let (tx, rx) = mpsc::channel(DOCUMENT_ITERATOR_BUFFER);

        tokio::spawn(async move {
            let mut cursor: Option<String> = None;
            loop {
                let mut req = http
                    .get(&base)
                    .query(&[("limit", STREAM_PAGE_SIZE.to_string())]);
                if let Some(token) = &auth {
                    req = req.bearer_auth(token);
                }
                if let Some(c) = &cursor {
                    req = req.query(&[("cursor", c.as_str())]);
                }
                let page: Result<DocumentPage> = async {
                    let response = req.send().await.map_err(map_transport_error)?;
                    handle_response(response).await
                }
                .await;

                let page = match page {
                    Ok(page) => page,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                let exhausted = page.documents.is_empty();
                for doc in page.documents {
                    if tx.send(Ok(doc)).await.is_err() {
                        return;
                    }
                }
                match page.next_cursor {
                    Some(next) if !exhausted => cursor = Some(next),
                    _ => return,
                }
            }
        });

        Ok(DocumentIterator::new(rx))
    }

    async fn ensure_collection(&self, meta: CollectionMeta) -> Result<()> {
        let name = meta.name.clone();
        let builder = self
            .request(Method::PUT, &format!("/collections/{name}"))
            .json(&meta);
        match self.send_empty(builder).await {
            Ok(()) => Ok(()),
            Err(Error::Validation(msg)) if msg.contains("already exists") => {
                debug!(collection = %name, "ensure_collection: already present");
                Ok(())
            }
            Err(e) => {
                warn!(collection = %name, error = %e, "ensure_collection failed");
                Err(e)
            }
        }
    }
}

#[derive(serde::Deserialize)]
struct DocumentPage {
    documents: Vec<Document>,
    next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_error_taxonomy() {
        assert!(matches!(
            map_status_error(StatusCode::NOT_FOUND, String::new()),
            Error::CollectionNotFound(_)
        ));
        assert!(matches!(
            map_status_error(StatusCode::UNAUTHORIZED, String::new()),
            Error::Unauthorized(_)
        ));
        assert!(matches!(
            map_status_error(StatusCode::BAD_REQUEST, String::new()),
            Error::Validation(_)
        ));
        assert!(matches!(
            map_status_error(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            Error::Unreachable(_)
        ));
        assert!(matches!(
            map_status_error(StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            Error::WriteFailed(_)
        ));
    }

    #[test]
    fn error_body_is_folded_into_the_message() {
        let body = serde_json::json!({"code": "InvalidTenant", "message": "bad id"}).to_string();
        match map_status_error(StatusCode::BAD_REQUEST, body) {
            Error::Validation(msg) => assert!(msg.contains("InvalidTenant") && msg.contains("bad id")),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }
}
