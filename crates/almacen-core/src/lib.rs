//! almacen-core: store assistant core library.
//!
//! Knowledge documents and their sled-backed store, the context selector that turns a query plus a
//! document snapshot into a prompt fragment, the instruction templates per locale, the CSV adapter
//! and the shared configuration. Connectors and the gateway build on this public API.

mod csv_table;
pub mod error;
mod knowledge;
pub mod selector;
mod shared;

pub use csv_table::csv_to_markdown_table;
pub use error::{SourceError, StoreError, StoreResult};
pub use knowledge::{
    builtin_documents, estimate_tokens, initialize_system_documents, now_ms, DocumentSource,
    DocumentStore, KnowledgeDocument, StoreStatus, BUILTIN_POLICIES_ID, BUILTIN_PRICES_ID,
    CHARS_PER_TOKEN,
};
pub use selector::{
    extract_terms, score_document, select, ContextSelector, InstructionTemplates, Locale,
    ScoredDocument, SelectionResult, UnknownLocale,
};
pub use shared::{CoreConfig, DEFAULT_MAX_CONTEXT_TOKENS, DEFAULT_SYSTEM_INSTRUCTIONS};
