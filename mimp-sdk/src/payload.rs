//! Typed payloads carried on the two notification topics.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Problem type used when the server leaves `type` empty.
pub const DEFAULT_PROBLEM_TYPE: &str = "about:blank";

/// RFC 7807 problem details, as published on the error topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub problem_type: Option<String>,
}

impl ProblemDetails {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            instance: None,
            status: None,
            title: None,
            problem_type: None,
        }
    }

    /// `type`, falling back to `about:blank` when absent or blank.
    pub fn problem_type(&self) -> &str {
        self.problem_type
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_PROBLEM_TYPE)
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.detail.trim().is_empty() {
            return Err(PayloadError::Invalid {
                field: "message.detail",
                reason: "must not be blank".to_string(),
            });
        }
        if let Some(status) = self.status
            && !(100..=599).contains(&status)
        {
            return Err(PayloadError::Invalid {
                field: "message.status",
                reason: format!("{status} is not between 100 and 599"),
            });
        }
        Ok(())
    }
}

/// Envelope wrapping problem details on the error topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: ProblemDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Decode and validate an error-topic body.
///
/// A body without `message` or `message.detail` is rejected with
/// [`PayloadError::MissingField`]; it never reaches the alert handler.
pub fn decode_error_notice(body: &str) -> Result<ProblemDetails, PayloadError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| PayloadError::InvalidJson(e.to_string()))?;
    let message = value
        .get("message")
        .filter(|m| !m.is_null())
        .ok_or(PayloadError::MissingField("message"))?;
    if !message.is_object() {
        return Err(PayloadError::Invalid {
            field: "message",
            reason: "expected an object".to_string(),
        });
    }
    if message.get("detail").is_none_or(Value::is_null) {
        return Err(PayloadError::MissingField("message.detail"));
    }

    let ErrorNotice { message: details } =
        serde_json::from_value(value).map_err(|e| PayloadError::Invalid {
            field: "message",
            reason: e.to_string(),
        })?;
    details.validate()?;
    Ok(details)
}

/// Decode a general-topic body. Any JSON value is accepted.
pub fn decode_notification(body: &str) -> Result<Value, PayloadError> {
    serde_json::from_str(body).map_err(|e| PayloadError::InvalidJson(e.to_string()))
}
