use crate::store::DurableStore;
use crate::telemetry::TelemetrySink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Default age limit for tracked entries; anything older is evicted lazily
/// on read. The boundary is inclusive: an entry aged exactly the limit is
/// stale.
pub const MAX_AGE_MS: i64 = 5 * 60 * 1000;

/// Default store key for the persisted pending list.
pub const PENDING_KEY: &str = "cradle.pending_mutations";

/// A write attempt that has started but not yet been confirmed complete.
/// Persisted so a killed session leaves evidence of what it was doing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    pub id: String,
    pub activity_type: String,
    pub source: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    #[serde(default)]
    pub retry_count: u32,
}

impl PendingMutation {
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis() - self.start_time.timestamp_millis()
    }

    pub fn is_expired(&self, now: DateTime<Utc>, max_age_ms: i64) -> bool {
        self.age_ms(now) >= max_age_ms
    }
}

/// Bookkeeping of in-flight mutations, independent of the delivery queue.
/// One instance per tab context; call sites share it by `Arc`.
///
/// Persistence failures never escape: the tracker logs them and keeps
/// going memory-only, because losing durability beats breaking the write
/// path.
pub struct MutationTracker {
    store: Arc<dyn DurableStore>,
    telemetry: Arc<dyn TelemetrySink>,
    key: String,
    max_age_ms: i64,
    pending: Mutex<Vec<PendingMutation>>,
}

impl MutationTracker {
    /// Build a tracker with the default store key and age limit, reloading
    /// whatever a previous session persisted.
    pub fn new(store: Arc<dyn DurableStore>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self::with_limits(store, telemetry, PENDING_KEY, MAX_AGE_MS)
    }

    /// Build a tracker with an explicit store key and age limit, typically
    /// taken from [`crate::config::SyncConfig`].
    pub fn with_limits(
        store: Arc<dyn DurableStore>,
        telemetry: Arc<dyn TelemetrySink>,
        key: &str,
        max_age_ms: i64,
    ) -> Self {
        let pending = match store.get(key) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<PendingMutation>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    eprintln!("mutation tracker: discarding unreadable pending state: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                eprintln!("mutation tracker: storage unavailable, starting memory-only: {}", e);
                Vec::new()
            }
        };

        Self {
            store,
            telemetry,
            key: key.to_string(),
            max_age_ms,
            pending: Mutex::new(pending),
        }
    }

    /// Register a mutation attempt. The caller supplies a unique id; a
    /// collision silently overwrites the previous entry.
    pub fn track_start(
        &self,
        id: &str,
        activity_type: &str,
        source: &str,
        data: serde_json::Map<String, Value>,
    ) {
        let entry = PendingMutation {
            id: id.to_string(),
            activity_type: activity_type.to_string(),
            source: source.to_string(),
            start_time: Utc::now(),
            data,
            retry_count: 0,
        };

        if let Ok(mut pending) = self.pending.lock() {
            match pending.iter_mut().find(|m| m.id == id) {
                Some(existing) => *existing = entry,
                None => pending.push(entry),
            }
            self.persist(&pending);
        }

        self.telemetry.emit(
            "mutation_started",
            json!({
                "id": id,
                "activityType": activity_type,
                "source": source,
            }),
        );
    }

    /// Drop the entry after a confirmed write. Idempotent: a second call
    /// for the same id is a no-op and emits nothing.
    pub fn track_complete(&self, id: &str, activity_type: &str, source: &str) {
        let removed = self.take(id);

        if let Some(entry) = removed {
            self.telemetry.emit(
                "mutation_completed",
                json!({
                    "id": id,
                    "activityType": activity_type,
                    "source": source,
                    "durationMs": entry.age_ms(Utc::now()),
                }),
            );
        }
    }

    /// Record a failed attempt, bumping the retry count if still tracked.
    pub fn track_failed(&self, id: &str, activity_type: &str, source: &str, error_message: &str) {
        let mut retry_count = None;
        let mut duration_ms = None;

        if let Ok(mut pending) = self.pending.lock() {
            if let Some(entry) = pending.iter_mut().find(|m| m.id == id) {
                entry.retry_count += 1;
                retry_count = Some(entry.retry_count);
                duration_ms = Some(entry.age_ms(Utc::now()));
            }
            self.persist(&pending);
        }

        self.telemetry.emit(
            "mutation_failed",
            json!({
                "id": id,
                "activityType": activity_type,
                "source": source,
                "error": error_message,
                "retryCount": retry_count,
                "durationMs": duration_ms,
            }),
        );
    }

    /// Telemetry-only signal that delivery was handed to the durable queue.
    /// Does not move the entry; recovery decides what to do with it.
    pub fn track_queued(&self, id: &str, activity_type: &str, source: &str, queue_length: usize) {
        self.telemetry.emit(
            "mutation_queued",
            json!({
                "id": id,
                "activityType": activity_type,
                "source": source,
                "queueLength": queue_length,
            }),
        );
    }

    /// All non-expired entries. Anything past the age limit is evicted here
    /// and the removal persisted; this lazy read is the only expiry
    /// mechanism, there is no background timer.
    pub fn pending_mutations(&self) -> Vec<PendingMutation> {
        self.evict_expired();
        self.pending
            .lock()
            .map(|pending| pending.clone())
            .unwrap_or_default()
    }

    /// Drop entries past the age limit, returning how many were discarded.
    /// Recovery calls this first so the pass can report stale drops.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let Ok(mut pending) = self.pending.lock() else {
            return 0;
        };

        let before = pending.len();
        pending.retain(|m| !m.is_expired(now, self.max_age_ms));
        let dropped = before - pending.len();
        if dropped > 0 {
            self.persist(&pending);
        }
        dropped
    }

    /// Explicit eviction, used by recovery after a successful handoff.
    /// Idempotent.
    pub fn remove(&self, id: &str) {
        let _ = self.take(id);
    }

    pub fn clear(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
            self.persist(&pending);
        }
    }

    /// One-shot observational snapshot for page-hidden / unload
    /// transitions. Never blocks, never fails.
    pub fn emit_pending_snapshot(&self, trigger: &str) {
        let (count, activity_types) = match self.pending.lock() {
            Ok(pending) => {
                let mut types: Vec<String> =
                    pending.iter().map(|m| m.activity_type.clone()).collect();
                types.sort();
                types.dedup();
                (pending.len(), types)
            }
            Err(_) => (0, Vec::new()),
        };

        self.telemetry.emit(
            "pending_snapshot",
            json!({
                "trigger": trigger,
                "pendingCount": count,
                "activityTypes": activity_types,
            }),
        );
    }

    fn take(&self, id: &str) -> Option<PendingMutation> {
        let mut pending = self.pending.lock().ok()?;
        let idx = pending.iter().position(|m| m.id == id)?;
        let entry = pending.remove(idx);
        self.persist(&pending);
        Some(entry)
    }

    fn persist(&self, pending: &[PendingMutation]) {
        let raw = match serde_json::to_string(pending) {
            Ok(raw) => raw,
            Err(e) => {
                eprintln!("mutation tracker: failed to serialize pending state: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key, &raw) {
            eprintln!("mutation tracker: failed to persist pending state: {}", e);
        }
    }
}
