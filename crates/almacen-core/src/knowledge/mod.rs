//! Knowledge documents and where they come from.
//!
//! ## Sources
//!
//! Every backend (built-in list, remote JSON, published sheet, last-known-good cache, live sync)
//! is a [`DocumentSource`]: one capability, "produce the current system documents". The store
//! installs whatever a source returns; the selector only ever sees a store snapshot.

mod bootstrap;
mod document;
mod store;

pub use bootstrap::{builtin_documents, initialize_system_documents, BUILTIN_POLICIES_ID, BUILTIN_PRICES_ID};
pub use document::{estimate_tokens, now_ms, KnowledgeDocument, CHARS_PER_TOKEN};
pub use store::{DocumentStore, StoreStatus};

use crate::error::SourceError;

/// Common trait for all document backends.
#[async_trait::async_trait]
pub trait DocumentSource: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Loads the current set of system documents.
    async fn load(&self) -> Result<Vec<KnowledgeDocument>, SourceError>;
}
