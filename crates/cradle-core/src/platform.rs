use crate::error::SyncError;
use cradle_proto::PageMessage;

/// Best-effort deferred-execution registration, keyed by a string tag.
/// When the facility fires, the platform runs a worker context outside our
/// control; we only ever talk to it via the worker message channel.
pub trait DeferredExecution: Send + Sync {
    /// Probed once at startup; when false callers fall back to processing
    /// the queue immediately.
    fn supported(&self) -> bool;

    fn register(&self, tag: &str) -> Result<(), SyncError>;
}

/// Stub for hosts without the facility.
pub struct NoDeferredExecution;

impl DeferredExecution for NoDeferredExecution {
    fn supported(&self) -> bool {
        false
    }

    fn register(&self, _tag: &str) -> Result<(), SyncError> {
        Err(SyncError::CapabilityMissing("deferred execution"))
    }
}

/// One direction of the worker message channel: a place replies can be
/// posted. Returns false when the port is gone.
pub trait ReplyPort: Send + Sync {
    fn send(&self, message: &PageMessage) -> bool;
}

/// Reply path for answering worker messages: the dedicated reply port
/// first, the broadcast channel as fallback when the dedicated port has
/// closed underneath us.
pub struct WorkerChannel {
    dedicated: Box<dyn ReplyPort>,
    broadcast: Box<dyn ReplyPort>,
}

impl WorkerChannel {
    pub fn new(dedicated: Box<dyn ReplyPort>, broadcast: Box<dyn ReplyPort>) -> Self {
        Self {
            dedicated,
            broadcast,
        }
    }

    pub fn reply(&self, message: &PageMessage) {
        if !self.dedicated.send(message) {
            // Fire-and-forget either way.
            let _ = self.broadcast.send(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cradle_proto::PageMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingPort {
        sent: Arc<AtomicUsize>,
        accept: bool,
    }

    impl ReplyPort for CountingPort {
        fn send(&self, _message: &PageMessage) -> bool {
            if self.accept {
                self.sent.fetch_add(1, Ordering::SeqCst);
            }
            self.accept
        }
    }

    #[test]
    fn reply_prefers_dedicated_port() {
        let dedicated = Arc::new(AtomicUsize::new(0));
        let broadcast = Arc::new(AtomicUsize::new(0));
        let channel = WorkerChannel::new(
            Box::new(CountingPort {
                sent: dedicated.clone(),
                accept: true,
            }),
            Box::new(CountingPort {
                sent: broadcast.clone(),
                accept: true,
            }),
        );

        channel.reply(&PageMessage::QueueContents { requests: vec![] });
        assert_eq!(dedicated.load(Ordering::SeqCst), 1);
        assert_eq!(broadcast.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reply_falls_back_to_broadcast() {
        let dedicated = Arc::new(AtomicUsize::new(0));
        let broadcast = Arc::new(AtomicUsize::new(0));
        let channel = WorkerChannel::new(
            Box::new(CountingPort {
                sent: dedicated.clone(),
                accept: false,
            }),
            Box::new(CountingPort {
                sent: broadcast.clone(),
                accept: true,
            }),
        );

        channel.reply(&PageMessage::QueueContents { requests: vec![] });
        assert_eq!(dedicated.load(Ordering::SeqCst), 0);
        assert_eq!(broadcast.load(Ordering::SeqCst), 1);
    }
}
