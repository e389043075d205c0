use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

use super::transport::TransportError;

/// Status recorded when no HTTP response was ever received.
pub const SYNTHETIC_ERROR_STATUS: u16 = 5000;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Normalized result of running one query against one environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseOutcome {
    pub status: u16,
    pub data: Value,
    /// `None` when the response was not measured (baseline responses).
    pub duration_ms: Option<f64>,
    pub url: String,
}

impl ResponseOutcome {
    pub fn synthetic(error: &TransportError, url: String, duration_ms: f64) -> Self {
        Self {
            status: SYNTHETIC_ERROR_STATUS,
            data: json!({
                "errorMessage": error.to_string(),
                "errorCode": error.code(),
            }),
            duration_ms: Some(duration_ms),
            url,
        }
    }

    pub fn baseline(data: Value) -> Self {
        Self {
            status: 200,
            data,
            duration_ms: None,
            url: String::new(),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.status == SYNTHETIC_ERROR_STATUS
    }
}
