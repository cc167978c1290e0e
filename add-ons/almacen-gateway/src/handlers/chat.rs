//! Chat handler: every turn selects context from the current store snapshot and sends
//! `fragment + question label + query` to the completion service.
//!
//! Non-streaming chat answers with JSON `{status, response, used_documents}`. Streaming chat
//! returns raw text chunks with the used ids in the `x-used-documents` header, encoded as an
//! ASCII-only JSON array. A stream that breaks midway ends with the localized failure message.

use super::ApiError;
use crate::AppState;
use almacen_connectors::CompletionRequest;
use almacen_core::{ContextSelector, InstructionTemplates, Locale, SelectionResult};
use axum::body::Body;
use axum::extract::{Json, State};
use axum::http::header::InvalidHeaderValue;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream::StreamExt;

pub(crate) const USED_DOCUMENTS_HEADER: &str = "x-used-documents";

#[derive(serde::Deserialize)]
pub(crate) struct ChatRequest {
    prompt: String,
    #[serde(default)]
    stream: bool,
    /// Overrides the configured strict mode for this turn.
    #[serde(default)]
    strict: Option<bool>,
}

/// Context selected for one turn and the prompt built from it.
#[derive(Debug)]
pub(crate) struct ChatTurn {
    pub(crate) prompt: String,
    pub(crate) used_document_ids: Vec<String>,
}

/// Joins the prompt fragment and the user's question; a bare query when nothing was selected.
pub(crate) fn build_turn_prompt(
    templates: &InstructionTemplates,
    selection: &SelectionResult,
    query: &str,
) -> String {
    templates.user_prompt(&selection.prompt_fragment, query)
}

fn failure_message(locale: Locale) -> &'static str {
    match locale {
        Locale::Es => "Hubo un error al generar la respuesta.",
        Locale::En => "There was an error generating the response.",
    }
}

/// JSON array of ids with every non-printable or non-ASCII character written as a `\uXXXX`
/// escape, so arbitrary ids (commas, accents) survive as a header value.
pub(crate) fn used_documents_header(ids: &[String]) -> Result<HeaderValue, InvalidHeaderValue> {
    let json = serde_json::json!(ids).to_string();
    let mut encoded = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii_graphic() || c == ' ' {
            encoded.push(c);
        } else {
            for unit in c.encode_utf16(&mut [0u16; 2]) {
                encoded.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    HeaderValue::from_str(&encoded)
}

fn prepare_turn(state: &AppState, query: &str, strict: bool) -> Result<ChatTurn, ApiError> {
    let snapshot = state.store.snapshot()?;
    let selector = ContextSelector::with_locale(state.config.locale);
    let selection = selector.select(query, &snapshot, state.config.max_context_tokens, strict);
    tracing::info!(
        target: "almacen::chat",
        documents = snapshot.len(),
        used = selection.used_document_ids.len(),
        strict,
        "Context selected for chat turn"
    );
    Ok(ChatTurn {
        prompt: build_turn_prompt(selector.templates(), &selection, query),
        used_document_ids: selection.used_document_ids,
    })
}

/// POST /api/v1/chat
pub(crate) async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    if req.prompt.trim().is_empty() {
        return ApiError::bad_request("prompt must not be empty").into_response();
    }
    tracing::info!(
        target: "almacen::chat",
        "Chat request received: {} chars, stream: {}",
        req.prompt.chars().count(),
        req.stream
    );

    let strict = req.strict.unwrap_or(state.config.strict_mode);
    let turn = match prepare_turn(&state, &req.prompt, strict) {
        Ok(turn) => turn,
        Err(e) => return e.into_response(),
    };

    if req.stream {
        chat_streaming(state, turn).await
    } else {
        chat_json(state, turn).await.into_response()
    }
}

fn failure_response(state: &AppState, turn: ChatTurn, error: String) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "error",
        "error": error,
        "response": failure_message(state.config.locale),
        "used_documents": turn.used_document_ids,
    }))
}

async fn chat_json(state: AppState, turn: ChatTurn) -> axum::Json<serde_json::Value> {
    let request = CompletionRequest::from_config(&state.config, turn.prompt.as_str());
    match state.model_router.generate(&request).await {
        Ok(text) => {
            tracing::info!(target: "almacen::chat", chars = text.chars().count(), "Chat response generated");
            axum::Json(serde_json::json!({
                "status": "ok",
                "response": text,
                "used_documents": turn.used_document_ids,
            }))
        }
        Err(e) => {
            tracing::error!(target: "almacen::chat", "Chat error: {}", e);
            failure_response(&state, turn, e.to_string())
        }
    }
}

async fn chat_streaming(state: AppState, turn: ChatTurn) -> Response {
    use async_stream::stream;

    let request = CompletionRequest::from_config(&state.config, turn.prompt.as_str());
    let mut rx = match state.model_router.stream_generate(&request).await {
        Ok(rx) => rx,
        Err(e) => {
            tracing::error!(target: "almacen::chat", "Stream generation error: {}", e);
            return failure_response(&state, turn, e.to_string()).into_response();
        }
    };

    tracing::info!(
        target: "almacen::chat",
        used = turn.used_document_ids.len(),
        "Starting streaming response"
    );

    let locale = state.config.locale;
    let stream = stream! {
        let mut total = 0usize;
        let mut interrupted = false;
        while let Some(item) = rx.recv().await {
            match item {
                Ok(chunk) => {
                    total += chunk.len();
                    yield chunk;
                }
                Err(e) => {
                    tracing::error!(target: "almacen::chat", bytes = total, "Stream generation error: {}", e);
                    yield format!("\n\n{}", failure_message(locale));
                    interrupted = true;
                    break;
                }
            }
        }
        tracing::info!(target: "almacen::chat", bytes = total, interrupted, "Streaming complete");
    };
    let body = Body::from_stream(stream.map(Ok::<_, std::convert::Infallible>));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        axum::http::header::CACHE_CONTROL,
        axum::http::HeaderValue::from_static("no-cache"),
    );
    match used_documents_header(&turn.used_document_ids) {
        Ok(value) => {
            headers.insert(USED_DOCUMENTS_HEADER, value);
        }
        Err(e) => tracing::warn!(target: "almacen::chat", error = %e, "Used documents header dropped"),
    }
    response
}
