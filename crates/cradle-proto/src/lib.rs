use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A durable delivery attempt: one HTTP request waiting in the persisted
/// queue until the server confirms it with a 2xx.
///
/// The serialized form is shared between the page context and the platform
/// worker context, so field names stay camelCase and timestamps are epoch
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    pub id: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl QueuedRequest {
    /// Build a request with a fresh random id and the current time.
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        QueuedRequest {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            method: method.into(),
            headers: HashMap::new(),
            body: None,
            timestamp: Utc::now(),
        }
    }
}

/// Messages the platform worker context sends to the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// The worker wants the current queue so it can replay it itself.
    RequestQueue,
    /// The worker delivered a request and asks the page to drop it.
    RemoveMutation { id: String },
}

/// Replies the page sends back over the worker channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageMessage {
    QueueContents { requests: Vec<QueuedRequest> },
}
