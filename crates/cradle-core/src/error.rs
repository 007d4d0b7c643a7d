use thiserror::Error;

/// Failures this subsystem handles locally. None of these escape to the
/// caller's write path; they are logged, counted in telemetry, or turned
/// into a fallback.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Persistence failed; the owning component degrades to memory-only.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Transport error or non-2xx response; the request stays queued.
    #[error("network failure for {url}: {reason}")]
    NetworkFailure { url: String, reason: String },

    /// The host lacks a platform facility; callers silently fall back.
    #[error("platform capability missing: {0}")]
    CapabilityMissing(&'static str),
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::StorageUnavailable(err.to_string())
    }
}
