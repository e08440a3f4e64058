//! Client error taxonomy.

use std::collections::BTreeMap;

use reqwest::StatusCode;
use thiserror::Error;

use crate::store::StoreError;

/// Error type for every REST operation.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("api base url must not be empty")]
    BaseUrlMissing,

    #[error("invalid request path")]
    InvalidPath,

    #[error("request failed: {message}")]
    Request { message: String },

    #[error("response read failed: {message}")]
    Read { message: String },

    #[error("response decode failed: {message}")]
    Decode { message: String },

    #[error("not authenticated: {message}")]
    Unauthorized { message: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    /// Field-level rejection of a submitted form. Never fatal; surfaced next
    /// to the offending input.
    #[error("validation failed: {}", format_fields(.fields))]
    Validation { fields: BTreeMap<String, Vec<String>> },

    #[error("http {status}: {body}")]
    Http { status: StatusCode, body: String },

    /// The refresh token was rejected or unreachable. The credential store
    /// has been cleared and the session has ended; only a new login
    /// recovers.
    #[error("session expired: {reason}")]
    SessionExpired { reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    /// Whether this error tore the session down (forces the login flow).
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::SessionExpired { .. })
    }
}

fn format_fields(fields: &BTreeMap<String, Vec<String>>) -> String {
    fields
        .iter()
        .map(|(field, messages)| format!("{field}: {}", messages.join("; ")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Classify a non-2xx response body into the taxonomy.
///
/// DRF-style bodies are either `{"detail": "..."}` / `{"error": "..."}`
/// message objects or `{"field": ["msg", ...]}` validation maps.
pub(crate) fn classify_http_error(status: StatusCode, body: &[u8]) -> ApiError {
    let message = extract_message(body);

    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized { message },
        StatusCode::FORBIDDEN => ApiError::Forbidden { message },
        StatusCode::NOT_FOUND => ApiError::NotFound { message },
        StatusCode::BAD_REQUEST => {
            if let Some(fields) = extract_field_errors(body) {
                ApiError::Validation { fields }
            } else {
                ApiError::Http {
                    status,
                    body: message,
                }
            }
        }
        _ => ApiError::Http {
            status,
            body: message,
        },
    }
}

fn extract_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        for key in ["detail", "error", "message"] {
            if let Some(text) = value.get(key).and_then(serde_json::Value::as_str) {
                return text.to_string();
            }
        }
    }
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "<empty>".to_string()
    } else {
        trimmed.to_string()
    }
}

fn extract_field_errors(body: &[u8]) -> Option<BTreeMap<String, Vec<String>>> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object()?;

    let mut fields = BTreeMap::new();
    for (key, entry) in object {
        match entry {
            serde_json::Value::String(message) => {
                fields.insert(key.clone(), vec![message.clone()]);
            }
            serde_json::Value::Array(messages) => {
                let collected: Vec<String> = messages
                    .iter()
                    .filter_map(|message| message.as_str().map(ToString::to_string))
                    .collect();
                if !collected.is_empty() {
                    fields.insert(key.clone(), collected);
                }
            }
            _ => {}
        }
    }

    if fields.is_empty() { None } else { Some(fields) }
}
