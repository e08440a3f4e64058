//! Live channel frame decode.
//!
//! The update stream carries loosely-typed JSON text frames tagged by a
//! `type` discriminator. Decode is a closed boundary: the two known variants
//! come out typed, unrecognized `type` values are reported as "no message"
//! so the channel can drop them, and malformed frames are an error the
//! channel swallows without closing.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::task::TaskStatus;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed live frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("live frame missing type discriminator")]
    MissingType,

    #[error("invalid {kind} frame: {message}")]
    InvalidFrame { kind: String, message: String },
}

/// One message on the per-task update stream.
///
/// Both variants describe the task the channel is scoped to. Arrival order
/// is the only ordering signal; the merger applies last-received-wins per
/// field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum LiveUpdate {
    /// Full replacement of the live-derived fields, sent once per
    /// (re)connection. Carries no log line.
    #[serde(rename = "initial_state")]
    InitialState {
        status: TaskStatus,
        #[serde(default)]
        stage: Option<String>,
        #[serde(default)]
        percentage: Option<f64>,
        #[serde(default)]
        result_message: Option<String>,
        #[serde(default)]
        matrix_size: Option<u32>,
    },
    /// Incremental update; `log_message` appends one line when present.
    #[serde(rename = "update")]
    Update {
        #[serde(default)]
        task_id: Option<String>,
        status: TaskStatus,
        #[serde(default)]
        stage: Option<String>,
        #[serde(default)]
        percentage: Option<f64>,
        #[serde(default)]
        log_message: Option<String>,
        #[serde(default)]
        result_message: Option<String>,
        #[serde(default)]
        matrix_size: Option<u32>,
    },
}

impl LiveUpdate {
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::InitialState { status, .. } | Self::Update { status, .. } => *status,
        }
    }
}

/// Decode one text frame into a typed live update.
///
/// Returns `Ok(None)` for frames with an unrecognized `type` so callers can
/// drop them without treating forward-compatible traffic as an error.
pub fn parse_live_frame(text: &str) -> Result<Option<LiveUpdate>, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;

    match kind {
        "initial_state" | "update" => {
            let kind = kind.to_string();
            serde_json::from_value(value)
                .map(Some)
                .map_err(|error| ProtocolError::InvalidFrame {
                    kind,
                    message: error.to_string(),
                })
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_initial_state_frame() -> Result<(), ProtocolError> {
        let frame = r#"{
            "type": "initial_state",
            "status": "running",
            "stage": "factorizing",
            "percentage": 40.0,
            "result_message": null
        }"#;
        let parsed = parse_live_frame(frame)?;
        assert_eq!(
            parsed,
            Some(LiveUpdate::InitialState {
                status: TaskStatus::Running,
                stage: Some("factorizing".to_string()),
                percentage: Some(40.0),
                result_message: None,
                matrix_size: None,
            })
        );
        Ok(())
    }

    #[test]
    fn parse_update_frame_with_log() -> Result<(), ProtocolError> {
        let frame = r#"{
            "type": "update",
            "task_id": "3f0a4f5c-9d1e-4d37-b6a2-1a2b3c4d5e6f",
            "status": "running",
            "stage": "substitution",
            "percentage": 85.5,
            "log_message": "forward substitution done"
        }"#;
        match parse_live_frame(frame)? {
            Some(LiveUpdate::Update {
                status,
                percentage,
                log_message,
                ..
            }) => {
                assert_eq!(status, TaskStatus::Running);
                assert_eq!(percentage, Some(85.5));
                assert_eq!(log_message.as_deref(), Some("forward substitution done"));
            }
            other => panic!("expected update frame, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn unknown_type_is_dropped_not_an_error() -> Result<(), ProtocolError> {
        let parsed = parse_live_frame(r#"{"type": "heartbeat", "seq": 7}"#)?;
        assert!(parsed.is_none());
        Ok(())
    }

    #[test]
    fn malformed_frames_are_errors() {
        struct Case {
            name: &'static str,
            input: &'static str,
        }

        let cases = vec![
            Case {
                name: "not json",
                input: "not-a-frame",
            },
            Case {
                name: "missing discriminator",
                input: r#"{"status": "running"}"#,
            },
            Case {
                name: "non-string discriminator",
                input: r#"{"type": 3}"#,
            },
            Case {
                name: "known type, bad status",
                input: r#"{"type": "update", "status": "exploded"}"#,
            },
            Case {
                name: "known type, missing status",
                input: r#"{"type": "initial_state"}"#,
            },
        ];

        for case in cases {
            let result = parse_live_frame(case.input);
            assert!(result.is_err(), "{}: expected an error", case.name);
        }
    }
}
