use crate::background_sync::BackgroundSyncManager;
use crate::queue::MutationQueue;
use crate::tracker::{MutationTracker, PendingMutation};
use crate::telemetry::TelemetrySink;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Counts from one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Tracked mutations found from the previous session.
    pub pending: usize,
    /// Requests already sitting in the durable queue at scan time.
    pub queued: usize,
    /// Pending mutations successfully handed off and evicted.
    pub recovered: usize,
    /// Pending mutations that could not be handed off; left tracked.
    pub failed: usize,
    /// Entries past the age limit, discarded during the scan without a
    /// delivery attempt.
    pub stale: usize,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.pending == 0 && self.queued == 0
    }
}

/// One-shot startup reconciliation of tracker and queue state left behind
/// by a previous session. Runs linearly: scan, replay pending, re-arm the
/// deferred-execution facility, done.
pub struct MutationRecovery {
    tracker: Arc<MutationTracker>,
    queue: Arc<MutationQueue>,
    sync_manager: Arc<BackgroundSyncManager>,
    telemetry: Arc<dyn TelemetrySink>,
    /// Where replayed mutations are POSTed.
    endpoint: String,
    ran: AtomicBool,
}

impl MutationRecovery {
    pub fn new(
        tracker: Arc<MutationTracker>,
        queue: Arc<MutationQueue>,
        sync_manager: Arc<BackgroundSyncManager>,
        telemetry: Arc<dyn TelemetrySink>,
        endpoint: &str,
    ) -> Self {
        Self {
            tracker,
            queue,
            sync_manager,
            telemetry,
            endpoint: endpoint.to_string(),
            ran: AtomicBool::new(false),
        }
    }

    /// Whether anything from a prior session is waiting. Used to decide if
    /// a "recovered N items" notice is worth showing.
    pub fn has_incomplete_mutations(&self) -> bool {
        !self.tracker.pending_mutations().is_empty() || self.sync_manager.queue_len() > 0
    }

    /// Execute the recovery pass. A second call is a no-op returning an
    /// empty report; the pass runs once per constructed instance.
    pub fn recover_incomplete_mutations(&self) -> RecoveryReport {
        if self.ran.swap(true, Ordering::SeqCst) {
            return RecoveryReport::default();
        }

        // Scanning. Anything past the age limit is discarded first, without
        // a final delivery attempt, and counted so relaunch diagnostics show
        // what was thrown away.
        let stale = self.tracker.evict_expired();
        let pending = self.tracker.pending_mutations();
        let queued = self.sync_manager.queue_len();

        self.telemetry.emit(
            "recovery_started",
            json!({
                "pendingCount": pending.len(),
                "queuedCount": queued,
                "staleDropped": stale,
            }),
        );

        let mut report = RecoveryReport {
            pending: pending.len(),
            queued,
            stale,
            ..Default::default()
        };

        if report.is_empty() {
            self.telemetry.emit(
                "recovery_completed",
                json!({
                    "pending": 0,
                    "queued": 0,
                    "recovered": 0,
                    "failed": 0,
                    "stale": stale,
                }),
            );
            return report;
        }

        // Replaying pending. Handoff goes through the mutation queue's
        // unload-safe path: beacon if accepted, durable queue otherwise.
        // Actual network replay is left to the re-armed platform facility
        // or the next online event.
        for entry in &pending {
            if self.replay(entry) {
                self.tracker.remove(&entry.id);
                report.recovered += 1;
            } else {
                eprintln!(
                    "recovery: could not hand off mutation {} ({}), leaving tracked",
                    entry.id, entry.activity_type
                );
                report.failed += 1;
            }
        }

        // Re-arming. Failure here is logged only; the online handler still
        // covers replay.
        if self.sync_manager.queue_len() > 0 {
            if let Err(e) = self.sync_manager.register_deferred() {
                eprintln!("recovery: could not re-register deferred execution: {}", e);
            }
        }

        self.telemetry.emit(
            "recovery_completed",
            json!({
                "pending": report.pending,
                "queued": report.queued,
                "recovered": report.recovered,
                "failed": report.failed,
                "stale": report.stale,
            }),
        );

        report
    }

    fn replay(&self, entry: &PendingMutation) -> bool {
        let body = json!({
            "id": entry.id,
            "activityType": entry.activity_type,
            "source": entry.source,
            "data": entry.data,
            "retryCount": entry.retry_count,
        })
        .to_string();

        let delivered = self.queue.queue_mutation_sync(
            &entry.id,
            &self.endpoint,
            &body,
            &entry.activity_type,
            &entry.source,
        );

        // Handoff succeeded if the beacon took it or it now sits in the
        // durable queue.
        delivered || self.sync_manager.contains(&entry.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use serde_json::json;
    use crate::platform::{DeferredExecution, NoDeferredExecution};
    use crate::store::{DurableStore, MemoryStore};
    use crate::telemetry::{CapturingSink, NoopSink};
    use crate::transport::{BeaconTransport, HttpTransport, NoBeacon};
    use async_trait::async_trait;
    use cradle_proto::QueuedRequest;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    struct IdleTransport;
    #[async_trait]
    impl HttpTransport for IdleTransport {
        async fn send(&self, _request: &QueuedRequest) -> Result<u16, SyncError> {
            Ok(200)
        }
    }

    struct CountingDeferred {
        registrations: AtomicUsize,
    }
    impl DeferredExecution for CountingDeferred {
        fn supported(&self) -> bool {
            true
        }
        fn register(&self, _tag: &str) -> Result<(), SyncError> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn seeded_store(entries: Value) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .set("cradle.pending_mutations", &entries.to_string())
            .unwrap();
        store
    }

    fn recovery_over(
        store: Arc<MemoryStore>,
        beacon: Arc<dyn BeaconTransport>,
        deferred: Arc<dyn DeferredExecution>,
        sink: Arc<CapturingSink>,
    ) -> (MutationRecovery, Arc<MutationTracker>, Arc<BackgroundSyncManager>) {
        let tracker = Arc::new(MutationTracker::new(store.clone(), sink.clone()));
        let sync_manager = Arc::new(BackgroundSyncManager::new(
            store,
            Arc::new(IdleTransport),
            deferred,
            Arc::new(NoopSink),
        ));
        let queue = Arc::new(MutationQueue::new(
            beacon,
            sync_manager.clone(),
            tracker.clone(),
        ));
        let recovery = MutationRecovery::new(
            tracker.clone(),
            queue,
            sync_manager.clone(),
            sink,
            "https://api.example.com/activities",
        );
        (recovery, tracker, sync_manager)
    }

    fn pending_entry(id: &str) -> Value {
        json!({
            "id": id,
            "activityType": "feeding",
            "source": "quick-log",
            "startTime": chrono::Utc::now().timestamp_millis(),
            "data": {"amountMl": 120},
            "retryCount": 0,
        })
    }

    #[test]
    fn interrupted_mutation_is_recovered_after_restart() {
        // A previous session tracked m1 and died before completing it.
        let store = seeded_store(json!([pending_entry("m1")]));
        let sink = Arc::new(CapturingSink::new());
        let (recovery, tracker, sync_manager) = recovery_over(
            store,
            Arc::new(NoBeacon),
            Arc::new(NoDeferredExecution),
            sink.clone(),
        );

        assert!(recovery.has_incomplete_mutations());
        assert_eq!(tracker.pending_mutations().len(), 1);

        let report = recovery.recover_incomplete_mutations();
        assert_eq!(report.pending, 1);
        assert_eq!(report.recovered, 1);
        assert_eq!(report.failed, 0);

        // Handed off to the durable queue, evicted from the tracker.
        assert!(tracker.pending_mutations().is_empty());
        assert_eq!(sync_manager.queue_len(), 1);
        assert_eq!(sync_manager.queue()[0].id, "m1");

        let completed = sink.named("recovery_completed");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0]["recovered"], json!(1));
    }

    #[test]
    fn stale_entries_are_dropped_without_handoff() {
        let old = chrono::Utc::now().timestamp_millis() - crate::tracker::MAX_AGE_MS - 1;
        let mut entry = pending_entry("m-old");
        entry["startTime"] = json!(old);
        let store = seeded_store(json!([entry, pending_entry("m-fresh")]));

        let sink = Arc::new(CapturingSink::new());
        let (recovery, tracker, sync_manager) = recovery_over(
            store,
            Arc::new(NoBeacon),
            Arc::new(NoDeferredExecution),
            sink.clone(),
        );

        let report = recovery.recover_incomplete_mutations();
        assert_eq!(report.pending, 1);
        assert_eq!(report.recovered, 1);
        assert_eq!(report.stale, 1);
        assert!(tracker.pending_mutations().is_empty());

        // Only the fresh entry reached the queue; the discard is visible in
        // the pass telemetry.
        assert_eq!(sync_manager.queue_len(), 1);
        assert_eq!(sync_manager.queue()[0].id, "m-fresh");
        let completed = sink.named("recovery_completed");
        assert_eq!(completed[0]["stale"], json!(1));
    }

    #[test]
    fn stale_only_state_still_reports_the_drop() {
        let old = chrono::Utc::now().timestamp_millis() - crate::tracker::MAX_AGE_MS - 1;
        let mut entry = pending_entry("m-old");
        entry["startTime"] = json!(old);
        let store = seeded_store(json!([entry]));

        let sink = Arc::new(CapturingSink::new());
        let (recovery, _tracker, sync_manager) = recovery_over(
            store,
            Arc::new(NoBeacon),
            Arc::new(NoDeferredExecution),
            sink.clone(),
        );

        let report = recovery.recover_incomplete_mutations();
        assert!(report.is_empty());
        assert_eq!(report.stale, 1);
        assert_eq!(sync_manager.queue_len(), 0);

        let started = sink.named("recovery_started");
        assert_eq!(started[0]["staleDropped"], json!(1));
        assert_eq!(sink.named("recovery_completed")[0]["stale"], json!(1));
    }

    #[test]
    fn empty_state_completes_immediately() {
        let sink = Arc::new(CapturingSink::new());
        let (recovery, _tracker, _sync_manager) = recovery_over(
            Arc::new(MemoryStore::new()),
            Arc::new(NoBeacon),
            Arc::new(NoDeferredExecution),
            sink.clone(),
        );

        assert!(!recovery.has_incomplete_mutations());
        let report = recovery.recover_incomplete_mutations();
        assert!(report.is_empty());
        assert_eq!(sink.named("recovery_completed").len(), 1);
    }

    #[test]
    fn second_pass_is_a_noop() {
        let store = seeded_store(json!([pending_entry("m1")]));
        let sink = Arc::new(CapturingSink::new());
        let (recovery, _tracker, _sync_manager) = recovery_over(
            store,
            Arc::new(NoBeacon),
            Arc::new(NoDeferredExecution),
            sink.clone(),
        );

        recovery.recover_incomplete_mutations();
        let second = recovery.recover_incomplete_mutations();
        assert_eq!(second, RecoveryReport::default());
        assert_eq!(sink.named("recovery_started").len(), 1);
    }

    #[test]
    fn rearm_registers_when_queue_nonempty() {
        let store = seeded_store(json!([pending_entry("m1")]));
        let deferred = Arc::new(CountingDeferred {
            registrations: AtomicUsize::new(0),
        });
        let sink = Arc::new(CapturingSink::new());
        let (recovery, _tracker, _sync_manager) =
            recovery_over(store, Arc::new(NoBeacon), deferred.clone(), sink);

        recovery.recover_incomplete_mutations();
        assert_eq!(deferred.registrations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn beacon_delivery_recovers_without_queueing() {
        struct AlwaysBeacon;
        impl BeaconTransport for AlwaysBeacon {
            fn supported(&self) -> bool {
                true
            }
            fn send(&self, _url: &str, _payload: &str) -> bool {
                true
            }
        }

        let store = seeded_store(json!([pending_entry("m1")]));
        let sink = Arc::new(CapturingSink::new());
        let (recovery, tracker, sync_manager) = recovery_over(
            store,
            Arc::new(AlwaysBeacon),
            Arc::new(NoDeferredExecution),
            sink,
        );

        let report = recovery.recover_incomplete_mutations();
        assert_eq!(report.recovered, 1);
        assert!(tracker.pending_mutations().is_empty());
        assert_eq!(sync_manager.queue_len(), 0);
    }
}
