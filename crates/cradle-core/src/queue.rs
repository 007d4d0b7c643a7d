use crate::background_sync::{BackgroundSyncManager, RequestOptions};
use crate::tracker::MutationTracker;
use crate::transport::BeaconTransport;
use chrono::{DateTime, Utc};
use cradle_proto::QueuedRequest;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of one delivery attempt by a dispatch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Accepted for send. For one-way transports this does not mean the
    /// server processed it.
    Delivered,
    Rejected,
}

/// A way to get a request off the page before teardown. Implementations
/// must complete within the current task without awaiting.
pub trait DispatchStrategy: Send + Sync {
    fn attempt(&self, request: &QueuedRequest) -> DispatchOutcome;
}

/// Beacon-backed strategy: POST bodies only, fire-and-forget.
pub struct BeaconDispatch {
    beacon: Arc<dyn BeaconTransport>,
}

impl DispatchStrategy for BeaconDispatch {
    fn attempt(&self, request: &QueuedRequest) -> DispatchOutcome {
        if request.method != "POST" {
            return DispatchOutcome::Rejected;
        }
        let Some(body) = &request.body else {
            return DispatchOutcome::Rejected;
        };
        if self.beacon.send(&request.url, body) {
            DispatchOutcome::Delivered
        } else {
            DispatchOutcome::Rejected
        }
    }
}

/// Read-only, domain-shaped view of a queued delivery.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMutationView {
    pub id: String,
    pub url: String,
    pub method: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Per-mutation dispatch: prefer the unload-safe one-way transport, fall
/// back to the durable queue. The strategy is chosen once at construction
/// by capability probing, not re-checked per call.
pub struct MutationQueue {
    strategy: Option<Box<dyn DispatchStrategy>>,
    sync_manager: Arc<BackgroundSyncManager>,
    tracker: Arc<MutationTracker>,
}

impl MutationQueue {
    pub fn new(
        beacon: Arc<dyn BeaconTransport>,
        sync_manager: Arc<BackgroundSyncManager>,
        tracker: Arc<MutationTracker>,
    ) -> Self {
        let strategy: Option<Box<dyn DispatchStrategy>> = if beacon.supported() {
            Some(Box::new(BeaconDispatch { beacon }))
        } else {
            None
        };

        Self {
            strategy,
            sync_manager,
            tracker,
        }
    }

    /// Queue a mutation for delivery. Returns true when the one-way
    /// transport accepted it; false means it went to the durable queue.
    /// Either way the tracker is told via `track_queued`.
    pub async fn queue_mutation(
        &self,
        id: &str,
        url: &str,
        options: RequestOptions,
        activity_type: &str,
        source: &str,
    ) -> bool {
        let request = QueuedRequest {
            id: id.to_string(),
            url: url.to_string(),
            method: options
                .method
                .clone()
                .map(|m| m.to_ascii_uppercase())
                .unwrap_or_else(|| "GET".to_string()),
            headers: options.headers.clone(),
            body: options.body.clone(),
            timestamp: Utc::now(),
        };

        if let Some(strategy) = &self.strategy {
            if strategy.attempt(&request) == DispatchOutcome::Delivered {
                self.tracker
                    .track_queued(id, activity_type, source, self.sync_manager.queue_len());
                return true;
            }
        }

        self.sync_manager
            .queue_request(url, options.with_id(id))
            .await;
        self.tracker
            .track_queued(id, activity_type, source, self.sync_manager.queue_len());
        false
    }

    /// Strictly synchronous variant for unload handlers: try the one-way
    /// transport, otherwise append to the durable queue without awaiting.
    pub fn queue_mutation_sync(
        &self,
        id: &str,
        url: &str,
        body: &str,
        activity_type: &str,
        source: &str,
    ) -> bool {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        let request = QueuedRequest {
            id: id.to_string(),
            url: url.to_string(),
            method: "POST".to_string(),
            headers,
            body: Some(body.to_string()),
            timestamp: Utc::now(),
        };

        if let Some(strategy) = &self.strategy {
            if strategy.attempt(&request) == DispatchOutcome::Delivered {
                self.tracker
                    .track_queued(id, activity_type, source, self.sync_manager.queue_len());
                return true;
            }
        }

        self.sync_manager.add_to_queue_sync(request);
        self.tracker
            .track_queued(id, activity_type, source, self.sync_manager.queue_len());
        false
    }

    /// Domain projection of the durable queue.
    pub fn queued_mutations(&self) -> Vec<QueuedMutationView> {
        self.sync_manager
            .queue()
            .into_iter()
            .map(|r| QueuedMutationView {
                id: r.id,
                url: r.url,
                method: r.method,
                timestamp: r.timestamp,
            })
            .collect()
    }
}
