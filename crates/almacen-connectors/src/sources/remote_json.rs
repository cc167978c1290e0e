//! Remote JSON document list (raw gist, static file server, ...).
//!
//! Expected body: an array of `{id, title, content, addedAt, ...}` objects. Records are normalized
//! leniently; only a non-array body is rejected.

use super::{http_client, DEFAULT_FETCH_TIMEOUT};
use almacen_core::{now_ms, DocumentSource, KnowledgeDocument, SourceError};
use reqwest::header::CACHE_CONTROL;
use serde_json::Value;
use std::time::Duration;

pub const UNTITLED_REMOTE_DOCUMENT: &str = "Documento Remoto Sin Título";

pub struct RemoteJsonSource {
    url: String,
    client: reqwest::Client,
}

impl RemoteJsonSource {
    pub fn new(url: impl Into<String>) -> Result<Self, SourceError> {
        Self::with_timeout(url, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        Ok(Self {
            url: url.into(),
            client: http_client(timeout)?,
        })
    }
}

#[async_trait::async_trait]
impl DocumentSource for RemoteJsonSource {
    fn name(&self) -> &str {
        "remote-json"
    }

    async fn load(&self) -> Result<Vec<KnowledgeDocument>, SourceError> {
        tracing::info!(target: "almacen::sources", url = %self.url, "Loading remote knowledge");
        let response = self
            .client
            .get(&self.url)
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|e| SourceError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidFormat(e.to_string()))?;
        parse_documents(&body)
    }
}

/// Normalizes a remote JSON payload into system documents.
pub(crate) fn parse_documents(body: &Value) -> Result<Vec<KnowledgeDocument>, SourceError> {
    let records = body
        .as_array()
        .ok_or_else(|| SourceError::InvalidFormat("expected a JSON array of documents".to_string()))?;
    let now = now_ms();
    Ok(records.iter().map(|record| normalize(record, now)).collect())
}

fn normalize(record: &Value, now: i64) -> KnowledgeDocument {
    let id = text_field(record, "id").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let title = text_field(record, "title").unwrap_or_else(|| UNTITLED_REMOTE_DOCUMENT.to_string());
    let content = text_field(record, "content").unwrap_or_default();
    let added_at_ms = ["addedAt", "added_at_ms"]
        .iter()
        .filter_map(|key| record.get(*key))
        .find_map(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .filter(|ms| *ms != 0)
        .unwrap_or(now);
    KnowledgeDocument::new(id, title, content, added_at_ms, true)
}

/// Non-empty string (or number, for ids) at `key`.
fn text_field(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
