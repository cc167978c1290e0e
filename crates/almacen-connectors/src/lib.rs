//! Swappable document sources and the completion client.

mod model_router;
pub mod sources;

pub use model_router::{
    mock_generate, mock_stream_generate, CompletionError, CompletionRequest, CompletionStream, LlmMode,
    ModelRouter, ENV_LLM_API_KEY,
};
pub use sources::{
    mirror_into_store, refresh_store, CachedSource, CsvSheetSource, FallbackSource, RemoteJsonSource,
    StaticSource, SyncedSource, DEFAULT_FETCH_TIMEOUT,
};
