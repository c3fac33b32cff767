//! Defines the value returned to the Lambda runtime.

use anyhow::Result;
use serde::Serialize;

/// API Gateway-style status and body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status_code: u16,
    pub body: String,
}

impl Response {
    pub fn text(status_code: u16, body: &str) -> Self {
        Self {
            status_code,
            body: body.to_string(),
        }
    }

    /// A response whose body is `value` serialized as JSON.
    pub fn json<T: Serialize>(status_code: u16, value: &T) -> Result<Self> {
        Ok(Self {
            status_code,
            body: serde_json::to_string(value)?,
        })
    }
}
