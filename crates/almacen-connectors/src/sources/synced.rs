//! Subscription-style source: a background task keeps reloading an inner source and publishes
//! each good snapshot on a `watch` channel.

use almacen_core::{DocumentSource, DocumentStore, KnowledgeDocument, SourceError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct SyncedSource {
    rx: watch::Receiver<Vec<KnowledgeDocument>>,
    task: JoinHandle<()>,
}

impl SyncedSource {
    /// Loads `inner` once, then reloads it every `interval` on a background task.
    ///
    /// Failed or empty reloads keep the previous snapshot.
    pub async fn spawn(inner: Arc<dyn DocumentSource>, interval: Duration) -> Self {
        let initial = match inner.load().await {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!(target: "almacen::sources", source = inner.name(), error = %e, "Initial sync failed");
                Vec::new()
            }
        };
        let (tx, rx) = watch::channel(initial);
        let task = tokio::spawn(sync_loop(inner, tx, interval));
        Self { rx, task }
    }

    /// A receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Vec<KnowledgeDocument>> {
        self.rx.clone()
    }
}

impl Drop for SyncedSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn sync_loop(
    inner: Arc<dyn DocumentSource>,
    tx: watch::Sender<Vec<KnowledgeDocument>>,
    interval: Duration,
) {
    tracing::info!(
        target: "almacen::sources",
        source = inner.name(),
        interval_secs = interval.as_secs(),
        "Sync loop started"
    );
    let mut ticker = tokio::time::interval(interval);
    // first tick completes immediately; the initial load already ran
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match inner.load().await {
            Ok(docs) if !docs.is_empty() => {
                tracing::debug!(target: "almacen::sources", documents = docs.len(), "Sync snapshot published");
                tx.send_replace(docs);
            }
            Ok(_) => {
                tracing::debug!(target: "almacen::sources", "Sync returned no documents, keeping snapshot");
            }
            Err(e) => {
                tracing::warn!(target: "almacen::sources", error = %e, "Sync failed, keeping snapshot");
            }
        }
        if tx.is_closed() {
            break;
        }
    }
}

#[async_trait::async_trait]
impl DocumentSource for SyncedSource {
    fn name(&self) -> &str {
        "synced"
    }

    async fn load(&self) -> Result<Vec<KnowledgeDocument>, SourceError> {
        Ok(self.rx.borrow().clone())
    }
}

/// Installs every snapshot published on `rx` into `store` until the sender goes away.
pub fn mirror_into_store(
    store: Arc<DocumentStore>,
    mut rx: watch::Receiver<Vec<KnowledgeDocument>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let docs = rx.borrow_and_update().clone();
            if let Err(e) = store.replace_system_documents(docs) {
                tracing::warn!(target: "almacen::sources", error = %e, "Failed to install synced documents");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a new single-document snapshot per call; every third call fails.
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DocumentSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        async fn load(&self) -> Result<Vec<KnowledgeDocument>, SourceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 3 == 2 {
                return Err(SourceError::Fetch("offline".to_string()));
            }
            Ok(vec![KnowledgeDocument::system(format!("v{}", n), "Precios", "x")])
        }
    }

    #[tokio::test]
    async fn publishes_snapshots_and_keeps_last_on_failure() {
        let inner = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let synced = SyncedSource::spawn(inner, Duration::from_millis(50)).await;
        assert_eq!(synced.load().await.unwrap()[0].id, "v0");

        let mut rx = synced.subscribe();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update()[0].id, "v1");

        // third load fails; the fourth publishes v3 and v1 stays visible in between
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update()[0].id, "v3");
        assert_eq!(synced.load().await.unwrap()[0].id, "v3");
    }

    #[tokio::test]
    async fn mirror_installs_published_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DocumentStore::open_path(dir.path()).unwrap());
        let (tx, rx) = watch::channel(Vec::new());
        let handle = mirror_into_store(Arc::clone(&store), rx);

        tx.send_replace(vec![KnowledgeDocument::system("live-1", "Precios", "x")]);
        drop(tx);
        handle.await.unwrap();

        assert_eq!(store.system_documents()[0].id, "live-1");
        assert_eq!(store.cached_system_documents().unwrap().len(), 1);
    }
}
