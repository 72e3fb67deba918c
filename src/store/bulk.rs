//! Chunked bulk upsert.
//!
//! Documents are sent as `index` actions with an explicit `_id`, so a
//! re-ingested id replaces the stored document. A rejected item is logged with
//! its id and the rest of the batch carries on; nothing is retried here.

use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{Value, json};

use super::StoreClient;
use crate::documents::Document;
use crate::key::DocumentKey;

pub const DEFAULT_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure {
    pub id: DocumentKey,
    pub status: Option<u16>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkReport {
    pub succeeded: usize,
    pub failed: Vec<BulkFailure>,
}

impl BulkReport {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn merge(&mut self, other: BulkReport) {
        self.succeeded += other.succeeded;
        self.failed.extend(other.failed);
    }
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<std::collections::HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

impl BulkItem {
    fn failure_reason(&self) -> Option<String> {
        match &self.error {
            Some(error) => Some(
                error
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            ),
            None if !(200..300).contains(&self.status) => Some(format!("HTTP {}", self.status)),
            None => None,
        }
    }
}

#[derive(Clone)]
pub struct BulkSink {
    store: StoreClient,
    chunk_size: usize,
}

impl BulkSink {
    pub fn new(store: StoreClient) -> Self {
        Self {
            store,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn store(&self) -> &StoreClient {
        &self.store
    }

    /// Upsert every document; failures are reported, never raised.
    pub async fn ingest<D: Document>(&self, documents: &[D]) -> BulkReport {
        tracing::debug!(
            documents = documents.len(),
            index = %self.store.index(),
            "Sending documents to output store"
        );
        let mut report = BulkReport::default();
        for chunk in documents.chunks(self.chunk_size) {
            report.merge(self.ingest_chunk(chunk).await);
        }
        if !report.is_clean() {
            tracing::warn!(
                succeeded = report.succeeded,
                failed = report.failed.len(),
                "Bulk ingest finished with failures"
            );
        }
        report
    }

    /// Single indexed write with the same overwrite-by-id contract.
    pub async fn write_one<D: Document>(&self, document: &D) -> BulkReport {
        match self.store.index_document(document).await {
            Ok(()) => BulkReport {
                succeeded: 1,
                failed: Vec::new(),
            },
            Err(e) => {
                let failure = BulkFailure {
                    id: document.id(),
                    status: e.status_code(),
                    reason: e.to_string(),
                };
                tracing::error!(id = %failure.id, error = %e, "Document write failed");
                BulkReport {
                    succeeded: 0,
                    failed: vec![failure],
                }
            }
        }
    }

    async fn ingest_chunk<D: Document>(&self, chunk: &[D]) -> BulkReport {
        let mut report = BulkReport::default();
        let mut body = String::new();
        let mut sent = Vec::with_capacity(chunk.len());

        for document in chunk {
            let id = document.id();
            match serde_json::to_string(document) {
                Ok(source) => {
                    let action = json!({
                        "index": {"_index": self.store.index(), "_id": id.to_string()}
                    });
                    body.push_str(&action.to_string());
                    body.push('\n');
                    body.push_str(&source);
                    body.push('\n');
                    sent.push(id);
                }
                Err(e) => {
                    tracing::error!(%id, error = %e, "Document could not be serialized");
                    report.failed.push(BulkFailure {
                        id,
                        status: None,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if sent.is_empty() {
            return report;
        }

        let items = match self.send(body).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(documents = sent.len(), error = %e, "Bulk request failed");
                report.failed.extend(sent.into_iter().map(|id| BulkFailure {
                    id,
                    status: e.status_code(),
                    reason: e.to_string(),
                }));
                return report;
            }
        };

        for (position, id) in sent.into_iter().enumerate() {
            let Some(item) = items.get(position).and_then(|item| item.values().next()) else {
                tracing::error!(%id, "Bulk response has no result for document");
                report.failed.push(BulkFailure {
                    id,
                    status: None,
                    reason: "missing from bulk response".into(),
                });
                continue;
            };

            match item.failure_reason() {
                None => report.succeeded += 1,
                Some(reason) => {
                    tracing::error!(
                        %id,
                        status = item.status,
                        reason = %reason,
                        "Document rejected by store"
                    );
                    report.failed.push(BulkFailure {
                        id,
                        status: Some(item.status),
                        reason,
                    });
                }
            }
        }
        report
    }

    async fn send(
        &self,
        body: String,
    ) -> crate::Result<Vec<std::collections::HashMap<String, BulkItem>>> {
        let response = self
            .store
            .request(Method::POST, "/_bulk")
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| crate::Error::store("bulk", None, e.to_string()))?;
        let body = super::check(response, "bulk").await?;
        let parsed: BulkResponse = serde_json::from_value(body)?;
        Ok(parsed.items)
    }
}
