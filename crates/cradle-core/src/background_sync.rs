use crate::error::SyncError;
use crate::platform::{DeferredExecution, WorkerChannel};
use crate::store::DurableStore;
use crate::telemetry::TelemetrySink;
use crate::transport::HttpTransport;
use chrono::Utc;
use cradle_proto::{PageMessage, QueuedRequest, WorkerMessage};
use futures_util::future::join_all;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Default store key for the persisted request queue.
pub const QUEUE_KEY: &str = "cradle.sync_queue";

/// Default tag used when registering with the platform's deferred-execution
/// facility.
pub const DEFAULT_SYNC_TAG: &str = "cradle-mutation-sync";

/// Normalized request options for [`BackgroundSyncManager::queue_request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// HTTP method; defaults to GET like a bare fetch.
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// Caller-supplied id, e.g. a mutation id carried over from the
    /// tracker. A fresh one is generated when absent.
    pub id: Option<String>,
}

impl RequestOptions {
    pub fn post_json(body: impl Into<String>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        RequestOptions {
            method: Some("POST".to_string()),
            headers,
            body: Some(body.into()),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Generic persisted FIFO queue of HTTP requests with best-effort deferred
/// delivery and manual replay as fallback.
///
/// The persisted queue is the source of truth; the in-memory copy is a
/// cache. Two tabs sharing storage are not coordinated, so concurrent
/// replays can both attempt the same request; that is acceptable only
/// because the write endpoint is duplicate-tolerant.
pub struct BackgroundSyncManager {
    store: Arc<dyn DurableStore>,
    transport: Arc<dyn HttpTransport>,
    deferred: Arc<dyn DeferredExecution>,
    telemetry: Arc<dyn TelemetrySink>,
    tag: String,
    key: String,
    queue: Mutex<Vec<QueuedRequest>>,
}

impl BackgroundSyncManager {
    pub fn new(
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn HttpTransport>,
        deferred: Arc<dyn DeferredExecution>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self::with_settings(store, transport, deferred, telemetry, DEFAULT_SYNC_TAG, QUEUE_KEY)
    }

    pub fn with_tag(
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn HttpTransport>,
        deferred: Arc<dyn DeferredExecution>,
        telemetry: Arc<dyn TelemetrySink>,
        tag: &str,
    ) -> Self {
        Self::with_settings(store, transport, deferred, telemetry, tag, QUEUE_KEY)
    }

    /// Full constructor taking the registration tag and store key, typically
    /// from [`crate::config::SyncConfig`].
    pub fn with_settings(
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn HttpTransport>,
        deferred: Arc<dyn DeferredExecution>,
        telemetry: Arc<dyn TelemetrySink>,
        tag: &str,
        key: &str,
    ) -> Self {
        let queue = match store.get(key) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<QueuedRequest>>(&raw) {
                Ok(requests) => requests,
                Err(e) => {
                    eprintln!("background sync: discarding unreadable queue: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                eprintln!("background sync: storage unavailable, starting memory-only: {}", e);
                Vec::new()
            }
        };

        Self {
            store,
            transport,
            deferred,
            telemetry,
            tag: tag.to_string(),
            key: key.to_string(),
            queue: Mutex::new(queue),
        }
    }

    /// Append a request and arrange for its delivery. Registration with the
    /// deferred-execution facility is fire-and-forget; when it is missing
    /// or refuses, the queue is processed immediately instead. Never fails.
    pub async fn queue_request(&self, url: &str, options: RequestOptions) {
        let request = QueuedRequest {
            id: options.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            url: url.to_string(),
            method: options
                .method
                .map(|m| m.to_ascii_uppercase())
                .unwrap_or_else(|| "GET".to_string()),
            headers: options.headers,
            body: options.body,
            timestamp: Utc::now(),
        };

        self.append(request);

        if self.deferred.supported() {
            if let Err(e) = self.register_deferred() {
                eprintln!("background sync: registration failed, replaying now: {}", e);
                self.process_queue().await;
            }
        } else {
            self.process_queue().await;
        }
    }

    /// Synchronous enqueue for call sites that cannot await (unload
    /// handlers). No registration attempt, no replay; just persist.
    pub fn add_to_queue_sync(&self, request: QueuedRequest) {
        self.append(request);
    }

    /// Issue every queued request concurrently and keep only the failed
    /// subset, preserving relative order. Requests appended while a pass is
    /// in flight are untouched.
    pub async fn process_queue(&self) {
        let snapshot = self.queue_snapshot();
        if snapshot.is_empty() {
            return;
        }

        let sends = snapshot.iter().map(|request| self.transport.send(request));
        let results = join_all(sends).await;

        let mut succeeded: HashSet<String> = HashSet::new();
        let mut failed = 0usize;
        for (request, result) in snapshot.iter().zip(results) {
            match result {
                Ok(status) if (200..300).contains(&status) => {
                    succeeded.insert(request.id.clone());
                }
                Ok(status) => {
                    failed += 1;
                    eprintln!(
                        "background sync: {} {} answered {}, keeping queued",
                        request.method, request.url, status
                    );
                }
                Err(e) => {
                    failed += 1;
                    eprintln!("background sync: {} failed, keeping queued: {}", request.url, e);
                }
            }
        }

        let remaining = {
            let Ok(mut queue) = self.queue.lock() else {
                return;
            };
            queue.retain(|r| !succeeded.contains(&r.id));
            self.persist(&queue);
            queue.len()
        };

        self.telemetry.emit(
            "sync_queue_processed",
            json!({
                "processed": snapshot.len(),
                "failed": failed,
                "remaining": remaining,
            }),
        );
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn queue(&self) -> Vec<QueuedRequest> {
        self.queue_snapshot()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.queue
            .lock()
            .map(|q| q.iter().any(|r| r.id == id))
            .unwrap_or(false)
    }

    pub fn clear_queue(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
            self.persist(&queue);
        }
    }

    pub fn remove_request(&self, id: &str) {
        if let Ok(mut queue) = self.queue.lock() {
            let before = queue.len();
            queue.retain(|r| r.id != id);
            if queue.len() != before {
                self.persist(&queue);
            }
        }
    }

    /// Re-register with the deferred-execution facility, e.g. from the
    /// recovery pass when leftover requests are found.
    pub fn register_deferred(&self) -> Result<(), SyncError> {
        self.deferred.register(&self.tag)
    }

    /// Handle a message from the platform worker context.
    pub fn handle_worker_message(&self, message: WorkerMessage, channel: &WorkerChannel) {
        match message {
            WorkerMessage::RequestQueue => {
                channel.reply(&PageMessage::QueueContents {
                    requests: self.queue_snapshot(),
                });
            }
            WorkerMessage::RemoveMutation { id } => {
                self.remove_request(&id);
            }
        }
    }

    fn append(&self, request: QueuedRequest) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push(request);
            self.persist(&queue);
        }
    }

    fn queue_snapshot(&self) -> Vec<QueuedRequest> {
        self.queue.lock().map(|q| q.clone()).unwrap_or_default()
    }

    fn persist(&self, queue: &[QueuedRequest]) {
        let raw = match serde_json::to_string(queue) {
            Ok(raw) => raw,
            Err(e) => {
                eprintln!("background sync: failed to serialize queue: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key, &raw) {
            eprintln!("background sync: failed to persist queue: {}", e);
        }
    }
}
