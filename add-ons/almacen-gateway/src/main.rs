//! Axum-based API Gateway for the store assistant. Config-driven via CoreConfig.

mod handlers;

use almacen_connectors::{
    mirror_into_store, refresh_store, CachedSource, CsvSheetSource, FallbackSource, ModelRouter,
    RemoteJsonSource, StaticSource, SyncedSource,
};
use almacen_core::{initialize_system_documents, CoreConfig, DocumentSource, DocumentStore, SourceError};
use axum::{
    extract::State,
    http::Method,
    response::sse::{Event, Sse},
    routing::{delete, get, post},
    Router,
};
use handlers::{chat, documents};
use std::path::Path as StdPath;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::field::Visit;
use tracing_subscriber::layer::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const STORE_DIR: &str = "almacen_knowledge";

/// Captures the "message" field from a tracing event.
struct MessageCollector<'a>(&'a mut String);

impl Visit for MessageCollector<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            *self.0 = value.to_string();
        }
    }
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{:?}", value);
        }
    }
}

/// Sends each tracing event as a line to a broadcast channel for SSE log streaming.
#[derive(Clone)]
struct LogBroadcastLayer {
    tx: broadcast::Sender<String>,
}

impl LogBroadcastLayer {
    fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }
}

impl<S> tracing_subscriber::Layer<S> for LogBroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageCollector(&mut message));
        let line = format!(
            "{} [{}] {}",
            event.metadata().level(),
            event.metadata().target(),
            message
        );
        let _ = self.tx.send(line);
    }
}

/// Pre-flight check: the document store opens and the port is free.
fn run_verify() -> Result<(), String> {
    let config = CoreConfig::load().map_err(|e| format!("Config load failed: {}", e))?;
    let store_path = StdPath::new(&config.storage_path).join(STORE_DIR);

    print!("Checking document store... ");
    let store = DocumentStore::open_path(&store_path)
        .map_err(|e| format!("{} LOCKED or inaccessible: {}", store_path.display(), e))?;
    let status = store.status().map_err(|e| format!("store status failed: {}", e))?;
    drop(store);
    println!(
        "OK ({} local, {} cached system documents)",
        status.local_documents, status.cached_system_documents
    );

    let port = config.port;
    print!("Checking port {}... ", port);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    match std::net::TcpListener::bind(addr) {
        Ok(listener) => {
            drop(listener);
            println!("OK (available)");
        }
        Err(e) => {
            return Err(format!("Port {} BLOCKED: {}", port, e));
        }
    }

    println!("\nSUCCESS: ready to start gateway.");
    Ok(())
}

/// Remote sources configured in `config`, in priority order.
fn remote_sources(config: &CoreConfig) -> Result<Vec<Arc<dyn DocumentSource>>, SourceError> {
    let timeout = Duration::from_secs(config.fetch_timeout_secs.max(1));
    let mut sources: Vec<Arc<dyn DocumentSource>> = Vec::new();
    if let Some(url) = config.knowledge_url.as_deref().filter(|u| !u.trim().is_empty()) {
        sources.push(Arc::new(RemoteJsonSource::with_timeout(url, timeout)?));
    }
    if let Some(url) = config.csv_url.as_deref().filter(|u| !u.trim().is_empty()) {
        sources.push(Arc::new(CsvSheetSource::with_timeout(url, timeout)?));
    }
    Ok(sources)
}

/// Remote sources, then the last-known-good cache, then the built-in documents.
fn build_source_chain(
    remote: Vec<Arc<dyn DocumentSource>>,
    store: &Arc<DocumentStore>,
) -> Arc<dyn DocumentSource> {
    let mut chain = remote;
    chain.push(Arc::new(CachedSource::new(Arc::clone(store))));
    chain.push(Arc::new(StaticSource::builtin()));
    Arc::new(FallbackSource::new(chain))
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[almacen-gateway] .env not loaded: {} (using system environment)", e);
    }

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--verify") {
        match run_verify() {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("PRE-FLIGHT FAILED: {}", e);
                std::process::exit(1);
            }
        }
    }

    let (log_tx, _) = broadcast::channel(1000);
    let log_layer = LogBroadcastLayer::new(log_tx.clone());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(log_layer)
        .init();

    if let Err(e) = run(log_tx).await {
        tracing::error!("Gateway failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(log_tx: broadcast::Sender<String>) -> Result<(), BoxError> {
    let config = Arc::new(CoreConfig::load()?);
    let store_path = StdPath::new(&config.storage_path).join(STORE_DIR);
    let store = Arc::new(DocumentStore::open_path(&store_path)?);

    match initialize_system_documents(&store) {
        Ok(true) => tracing::info!("Built-in system documents installed"),
        Ok(false) => tracing::debug!("System documents restored from cache"),
        Err(e) => tracing::warn!("Failed to initialize system documents: {}", e),
    }

    let remote = remote_sources(&config)?;

    // Live sync: reload the remote sources on an interval and mirror good snapshots into the store.
    let synced = if config.refresh_interval_secs > 0 && !remote.is_empty() {
        let inner: Arc<dyn DocumentSource> = Arc::new(FallbackSource::new(remote.clone()));
        let synced =
            SyncedSource::spawn(inner, Duration::from_secs(config.refresh_interval_secs)).await;
        mirror_into_store(Arc::clone(&store), synced.subscribe());
        Some(synced)
    } else {
        None
    };

    let source = build_source_chain(remote, &store);
    match refresh_store(&store, source.as_ref()).await {
        Ok(n) => tracing::info!(target: "almacen::knowledge", documents = n, "System documents loaded"),
        Err(e) => tracing::warn!(target: "almacen::knowledge", error = %e, "Initial knowledge load failed"),
    }

    let model_router = Arc::new(ModelRouter::from_config(&config));
    tracing::info!(
        mode = model_router.mode().as_str(),
        model = model_router.model(),
        "Model router ready"
    );

    let app = build_app(AppState {
        config: Arc::clone(&config),
        store,
        source,
        model_router,
        log_tx,
    });

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], config.port));
    tracing::info!("{} listening on {}", config.app_name, addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    drop(synced);
    Ok(())
}

fn build_app(state: AppState) -> Router {
    // CORS: allow Backend/API (8001-8099) and Frontend/UI (3001-3099) port ranges.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &axum::http::HeaderValue, _| {
            let s = origin.to_str().unwrap_or("");
            let port = s
                .split(':')
                .last()
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(0);
            (3001..=3099).contains(&port) || (8001..=8099).contains(&port)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
        .expose_headers(tower_http::cors::Any);

    Router::new()
        .route("/v1/status", get(status))
        .route("/api/v1/health", get(health))
        .route("/api/v1/logs", get(logs_stream))
        .route(
            "/api/v1/documents",
            get(documents::list_documents)
                .post(documents::add_document)
                .delete(documents::clear_documents),
        )
        .route("/api/v1/documents/:id", delete(documents::remove_document))
        .route("/api/v1/knowledge/refresh", post(documents::refresh_knowledge))
        .route("/api/v1/chat", post(chat::chat))
        .with_state(state)
        .layer(cors)
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<CoreConfig>,
    pub(crate) store: Arc<DocumentStore>,
    pub(crate) source: Arc<dyn DocumentSource>,
    pub(crate) model_router: Arc<ModelRouter>,
    pub(crate) log_tx: broadcast::Sender<String>,
}

/// GET /api/v1/health – liveness check for UI and scripts.
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

/// GET /api/v1/logs – Server-Sent Events stream of gateway logs (tracing output).
async fn logs_stream(
    State(state): State<AppState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static> {
    use async_stream::stream;
    let mut rx = state.log_tx.subscribe();
    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(line) => yield Ok(Event::default().data(line)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    yield Ok(Event::default().data(format!("... {} log lines dropped", n)));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// GET /v1/status – app identity, assistant settings and store counts.
async fn status(
    State(state): State<AppState>,
) -> Result<axum::Json<serde_json::Value>, handlers::ApiError> {
    let store = state.store.status()?;
    Ok(axum::Json(serde_json::json!({
        "app_name": state.config.app_name,
        "port": state.config.port,
        "llm_mode": state.model_router.mode().as_str(),
        "model": state.model_router.model(),
        "strict_mode": state.config.strict_mode,
        "max_context_tokens": state.config.max_context_tokens,
        "locale": state.config.locale.code(),
        "store": store,
    })))
}
