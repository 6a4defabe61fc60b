use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_SERVER_ERROR: u16 = 500;
pub const STATUS_GATEWAY_TIMEOUT: u16 = 504;

/// A direct method invocation targeted at a connected device or module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMethodRequest {
    /// Correlates the eventual response with this request. Assigned by the
    /// invoke handler when the caller leaves it empty.
    #[serde(default)]
    pub correlation_id: String,

    /// Identity key of the target (`deviceId` or `deviceId/moduleId`).
    pub target_id: String,

    /// Method name.
    pub name: String,

    #[serde(default)]
    pub payload: Value,

    /// How long the caller is willing to wait for the device to respond.
    #[serde(default = "DirectMethodRequest::default_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl DirectMethodRequest {
    fn default_timeout_ms() -> u64 {
        30_000
    }

    pub fn new(target_id: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self {
            correlation_id: String::new(),
            target_id: target_id.into(),
            name: name.into(),
            payload,
            response_timeout_ms: Self::default_timeout_ms(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[inline]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Response to a direct method invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMethodResponse {
    pub correlation_id: String,
    pub status: u16,
    #[serde(default)]
    pub payload: Value,
}

impl DirectMethodResponse {
    pub fn new(correlation_id: impl Into<String>, status: u16, payload: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status,
            payload,
        }
    }

    /// Synthetic response returned when the device does not answer within
    /// the request's timeout.
    pub fn timed_out(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: STATUS_GATEWAY_TIMEOUT,
            payload: serde_json::json!({ "message": "method invocation timed out" }),
        }
    }
}
