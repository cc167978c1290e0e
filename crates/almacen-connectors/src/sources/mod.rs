//! Document source implementations.
//!
//! Each source produces the current system documents. The gateway usually chains them:
//! remote JSON, published sheet, last-known-good cache, then the built-in list.

mod csv_sheet;
mod remote_json;
mod synced;

pub use csv_sheet::{CsvSheetSource, SHEET_DOCUMENT_ID, SHEET_DOCUMENT_TITLE};
pub use remote_json::{RemoteJsonSource, UNTITLED_REMOTE_DOCUMENT};
pub use synced::{mirror_into_store, SyncedSource};

use almacen_core::{builtin_documents, DocumentSource, DocumentStore, KnowledgeDocument, SourceError};
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for remote document fetches.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SourceError::Fetch(e.to_string()))
}

/// A fixed document list. Defaults to the built-in price list and policies.
pub struct StaticSource {
    name: String,
    documents: Vec<KnowledgeDocument>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, documents: Vec<KnowledgeDocument>) -> Self {
        Self {
            name: name.into(),
            documents,
        }
    }

    pub fn builtin() -> Self {
        Self::new("builtin", builtin_documents())
    }
}

impl Default for StaticSource {
    fn default() -> Self {
        Self::builtin()
    }
}

#[async_trait::async_trait]
impl DocumentSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<Vec<KnowledgeDocument>, SourceError> {
        Ok(self.documents.clone())
    }
}

/// The store's last-known-good system set.
pub struct CachedSource {
    store: Arc<DocumentStore>,
}

impl CachedSource {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl DocumentSource for CachedSource {
    fn name(&self) -> &str {
        "cache"
    }

    async fn load(&self) -> Result<Vec<KnowledgeDocument>, SourceError> {
        Ok(self.store.cached_system_documents()?)
    }
}

/// Tries each source in order and returns the first non-empty result.
///
/// An empty result counts as a miss. When every source misses, the last error is returned
/// (or [`SourceError::NoSources`] if none of them failed outright).
pub struct FallbackSource {
    sources: Vec<Arc<dyn DocumentSource>>,
}

impl FallbackSource {
    pub fn new(sources: Vec<Arc<dyn DocumentSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait::async_trait]
impl DocumentSource for FallbackSource {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn load(&self) -> Result<Vec<KnowledgeDocument>, SourceError> {
        let mut last_error = None;
        for source in &self.sources {
            match source.load().await {
                Ok(docs) if !docs.is_empty() => {
                    tracing::info!(
                        target: "almacen::sources",
                        source = source.name(),
                        documents = docs.len(),
                        "System documents loaded"
                    );
                    return Ok(docs);
                }
                Ok(_) => {
                    tracing::debug!(target: "almacen::sources", source = source.name(), "Source returned no documents");
                }
                Err(e) => {
                    tracing::warn!(
                        target: "almacen::sources",
                        source = source.name(),
                        error = %e,
                        "Source failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(SourceError::NoSources))
    }
}

/// Loads system documents from `source` and installs them (and the cache) in `store`.
/// Returns the number of documents installed.
pub async fn refresh_store(store: &DocumentStore, source: &dyn DocumentSource) -> Result<usize, SourceError> {
    let docs = source.load().await?;
    let n = docs.len();
    store.replace_system_documents(docs)?;
    Ok(n)
}

/// Serves `router` on an ephemeral local port and returns its base url.
#[cfg(test)]
pub(crate) async fn serve_fixture(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
