//! Document CRUD and knowledge refresh.

use super::ApiError;
use crate::AppState;
use almacen_connectors::refresh_store;
use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

#[derive(serde::Deserialize)]
pub(crate) struct NewDocument {
    title: String,
    content: String,
    /// "text" (default) or "csv". Titles ending in `.csv` are converted either way.
    #[serde(default)]
    format: Option<String>,
}

impl NewDocument {
    fn is_csv(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("csv"))
            || self.title.to_lowercase().ends_with(".csv")
    }
}

/// GET /api/v1/documents – system documents then local documents, plus store counts.
pub(crate) async fn list_documents(
    State(state): State<AppState>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let documents = state.store.snapshot()?;
    let status = state.store.status()?;
    Ok(axum::Json(serde_json::json!({
        "documents": documents,
        "status": status,
    })))
}

/// POST /api/v1/documents – stores a user document.
pub(crate) async fn add_document(
    State(state): State<AppState>,
    Json(req): Json<NewDocument>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    let doc = if req.is_csv() {
        state.store.add_csv_document(req.title, &req.content)?
    } else {
        state.store.add_document(req.title, req.content)?
    };
    Ok((StatusCode::CREATED, axum::Json(doc)))
}

/// DELETE /api/v1/documents/:id – 403 for system-owned ids, 404 for unknown ones.
pub(crate) async fn remove_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let removed = state.store.remove_document(&id)?;
    Ok(axum::Json(serde_json::json!({ "status": "ok", "removed": removed.id })))
}

/// DELETE /api/v1/documents – drops every local document.
pub(crate) async fn clear_documents(
    State(state): State<AppState>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let removed = state.store.clear_local_documents()?;
    Ok(axum::Json(serde_json::json!({ "status": "ok", "removed": removed })))
}

/// POST /api/v1/knowledge/refresh – reloads system documents through the source chain.
pub(crate) async fn refresh_knowledge(
    State(state): State<AppState>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let installed = refresh_store(&state.store, state.source.as_ref()).await?;
    tracing::info!(target: "almacen::knowledge", documents = installed, "Knowledge refreshed");
    Ok(axum::Json(serde_json::json!({
        "status": "ok",
        "system_documents": installed,
    })))
}
