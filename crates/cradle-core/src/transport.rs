use crate::error::SyncError;
use async_trait::async_trait;
use cradle_proto::QueuedRequest;

/// Fetch-equivalent used by the background sync queue. Returns the HTTP
/// status code; connection-level failures surface as `NetworkFailure`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &QueuedRequest) -> Result<u16, SyncError>;
}

/// One-way send that can survive page teardown. Reports only "accepted for
/// send", never "server processed it", so callers must keep a durable
/// backstop.
pub trait BeaconTransport: Send + Sync {
    /// Whether the host exposes the beacon facility at all. Probed once at
    /// startup, not per call.
    fn supported(&self) -> bool;

    /// Hand the payload to the host for delivery. Must not block on the
    /// network; a `true` return means queued by the host, nothing more.
    fn send(&self, url: &str, payload: &str) -> bool;
}

/// Beacon stub for hosts without the facility.
pub struct NoBeacon;

impl BeaconTransport for NoBeacon {
    fn supported(&self) -> bool {
        false
    }

    fn send(&self, _url: &str, _payload: &str) -> bool {
        false
    }
}

/// reqwest-backed transport. Cookies/credentials travel with the client the
/// caller configures; per-request headers come from the queued request.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Use a pre-configured client (auth headers, cookie jar, timeouts).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &QueuedRequest) -> Result<u16, SyncError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            SyncError::NetworkFailure {
                url: request.url.clone(),
                reason: format!("invalid method {}: {}", request.method, e),
            }
        })?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::NetworkFailure {
                url: request.url.clone(),
                reason: e.to_string(),
            })?;

        Ok(response.status().as_u16())
    }
}
