//! Server error envelope.
//!
//! # Design
//! The API reports failures as
//! `{"error": {"code": .., "message": .., "missing": [..], "duplicated": [..], "isAutoRetryable": ..}}`.
//! Proxies and load balancers in front of it do not, so any body that does
//! not match is kept verbatim as the message under the HTTP status code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured form of a non-2xx response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicated: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_auto_retryable: Option<bool>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetails,
}

impl ErrorDetails {
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => envelope.error,
            Err(_) => Self {
                code: i64::from(status),
                message: body.to_string(),
                missing: None,
                duplicated: None,
                is_auto_retryable: None,
            },
        }
    }

    pub fn auto_retryable(&self) -> bool {
        self.is_auto_retryable.unwrap_or(false)
    }
}
