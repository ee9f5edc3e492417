//! Outbound real-time task envelope.
//!
//! The platform's publish/subscribe channel carries actions as "task"
//! envelopes published on a request topic. The field names, the doubly
//! JSON-encoded `payload` strings, and the `null` `failure_count` are all
//! dictated by the remote end and must be reproduced exactly:
//!
//! ```json
//! {
//!   "app_id": "2220391788200892",
//!   "payload": "{\"epoch_id\":6763184060278439936,\"tasks\":[...],\"version_id\":\"7545284382\"}",
//!   "request_id": 4,
//!   "type": 3
//! }
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic the envelopes are published on.
pub const REQUEST_TOPIC: &str = "/ls_req";
/// Topic the correlated acknowledgments arrive on.
pub const RESPONSE_TOPIC: &str = "/ls_resp";

/// Envelope `type` discriminator for task publishes.
const TASK_PUBLISH_TYPE: u32 = 3;

/// One named action for the remote platform to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Always serialized, always `null` on first publish.
    pub failure_count: Option<u32>,
    /// Numeric type code of the action, as a string.
    pub label: String,
    /// JSON-encoded task parameters.
    pub payload: String,
    pub queue_name: String,
    pub task_id: u64,
}

impl Task {
    /// Builds a task with its parameters JSON-encoded into the wire shape.
    pub fn new(
        label: &str,
        queue_name: &str,
        task_id: u64,
        params: &Value,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            failure_count: None,
            label: label.to_string(),
            payload: serde_json::to_string(params)?,
            queue_name: queue_name.to_string(),
            task_id,
        })
    }
}

/// Inner payload of a [`TaskEnvelope`], JSON-encoded into its `payload` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopePayload {
    pub epoch_id: u64,
    pub tasks: Vec<Task>,
    pub version_id: String,
}

/// The outbound envelope published on [`REQUEST_TOPIC`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub app_id: String,
    /// JSON-encoded [`EnvelopePayload`].
    pub payload: String,
    pub request_id: u64,
    #[serde(rename = "type")]
    pub kind: u32,
}

impl TaskEnvelope {
    /// Wraps `tasks` in the wire envelope under the given request id.
    pub fn build(
        app_id: &str,
        version_id: &str,
        request_id: u64,
        tasks: Vec<Task>,
    ) -> serde_json::Result<Self> {
        let payload = EnvelopePayload {
            epoch_id: epoch_id(),
            tasks,
            version_id: version_id.to_string(),
        };
        Ok(Self {
            app_id: app_id.to_string(),
            payload: serde_json::to_string(&payload)?,
            request_id,
            kind: TASK_PUBLISH_TYPE,
        })
    }

    /// Decodes the inner payload back out of the envelope.
    pub fn decode_payload(&self) -> serde_json::Result<EnvelopePayload> {
        serde_json::from_str(&self.payload)
    }
}

/// Epoch id generator the platform expects: millisecond timestamp shifted
/// left 22 bits, the low bits left for the caller's sub-millisecond ordering.
pub fn epoch_id() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    millis << 22
}
