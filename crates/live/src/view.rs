//! Snapshot/stream merge into one displayed task state.
//!
//! The snapshot is authoritative until the first live message arrives; from
//! then on the latest live message wins per field, falling back to the
//! snapshot for anything it omits. The result is deterministic regardless of
//! whether the snapshot or the channel's first message lands first.

use chrono::{DateTime, Utc};
use lusolve_protocol::{LiveUpdate, TaskSnapshot, TaskStatus};

/// One displayed log line. Snapshot lines keep their server timestamps;
/// streamed lines are stamped at receipt because the stream carries none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: Option<String>,
    pub message: String,
}

/// Fields owned by the live stream once it has spoken.
#[derive(Debug, Clone, PartialEq)]
struct LiveFields {
    status: TaskStatus,
    stage: Option<String>,
    percentage: Option<f64>,
    result_message: Option<String>,
    matrix_size: Option<u32>,
}

/// Merged display state for one task.
///
/// Pure derivation: `apply` mutates only the live-derived fields and the log
/// sequence; every accessor recomputes from (snapshot, live) on read.
#[derive(Debug, Clone)]
pub struct TaskView {
    snapshot: TaskSnapshot,
    live: Option<LiveFields>,
    logs: Vec<LogLine>,
}

impl TaskView {
    /// Seed the view from a snapshot; its historical logs open the log
    /// sequence.
    #[must_use]
    pub fn new(snapshot: TaskSnapshot) -> Self {
        let logs = snapshot
            .logs
            .iter()
            .map(|entry| LogLine {
                timestamp: entry.timestamp,
                level: Some(entry.level.clone()),
                message: entry.message.clone(),
            })
            .collect();
        Self {
            snapshot,
            live: None,
            logs,
        }
    }

    /// Apply one live message, stamping any appended log line with the
    /// current instant.
    pub fn apply(&mut self, update: &LiveUpdate) {
        self.apply_at(update, Utc::now());
    }

    /// Apply with an explicit receipt instant.
    pub fn apply_at(&mut self, update: &LiveUpdate, received_at: DateTime<Utc>) {
        match update {
            LiveUpdate::InitialState {
                status,
                stage,
                percentage,
                result_message,
                matrix_size,
            } => {
                // Wholesale replacement; carries no log line, so re-applying
                // the same initial state is idempotent.
                self.live = Some(LiveFields {
                    status: *status,
                    stage: stage.clone(),
                    percentage: *percentage,
                    result_message: result_message.clone(),
                    matrix_size: *matrix_size,
                });
            }
            LiveUpdate::Update {
                status,
                stage,
                percentage,
                log_message,
                result_message,
                matrix_size,
                ..
            } => {
                self.live = Some(LiveFields {
                    status: *status,
                    stage: stage.clone(),
                    percentage: *percentage,
                    result_message: result_message.clone(),
                    matrix_size: *matrix_size,
                });
                if let Some(message) = log_message {
                    self.logs.push(LogLine {
                        timestamp: received_at,
                        level: None,
                        message: message.clone(),
                    });
                }
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> &TaskSnapshot {
        &self.snapshot
    }

    /// Whether at least one live message has been merged in.
    #[must_use]
    pub fn has_live_state(&self) -> bool {
        self.live.is_some()
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.live
            .as_ref()
            .map_or(self.snapshot.status, |live| live.status)
    }

    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        self.live
            .as_ref()
            .and_then(|live| live.stage.as_deref())
            .or_else(|| self.snapshot.last_progress().map(|p| p.stage.as_str()))
    }

    /// Progress in `[0, 100]`. A terminal status pins it to 100.
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        if self.status().is_terminal() {
            return 100.0;
        }
        self.live
            .as_ref()
            .and_then(|live| live.percentage)
            .or_else(|| self.snapshot.last_progress().map(|p| p.percentage))
            .unwrap_or(0.0)
            .clamp(0.0, 100.0)
    }

    #[must_use]
    pub fn result_message(&self) -> Option<&str> {
        self.live
            .as_ref()
            .and_then(|live| live.result_message.as_deref())
            .or(self.snapshot.result_message.as_deref())
    }

    #[must_use]
    pub fn matrix_size(&self) -> Option<u32> {
        self.live
            .as_ref()
            .and_then(|live| live.matrix_size)
            .or(self.snapshot.matrix_size)
    }

    /// Queue position, meaningful only while the task is still waiting for
    /// admission. Once the merged status leaves the queue phase this reports
    /// nothing rather than a stale last-known value.
    #[must_use]
    pub fn queue_position(&self) -> Option<u32> {
        if !self.status().in_queue_phase() {
            return None;
        }
        self.snapshot.queue_position
    }

    #[must_use]
    pub fn estimated_wait_sec(&self) -> Option<u64> {
        if !self.status().in_queue_phase() {
            return None;
        }
        self.snapshot.estimated_wait_time_sec
    }

    /// Cancellation stays available until the task reaches a terminal
    /// status.
    #[must_use]
    pub fn can_cancel(&self) -> bool {
        !self.status().is_terminal()
    }

    /// Result retrieval is only offered for a completed task.
    #[must_use]
    pub fn can_download(&self) -> bool {
        self.status() == TaskStatus::Completed
    }

    /// Whether the result message should be surfaced as an error rather than
    /// a success.
    #[must_use]
    pub fn result_is_error(&self) -> bool {
        matches!(self.status(), TaskStatus::Failed | TaskStatus::Cancelled)
    }

    #[must_use]
    pub fn logs(&self) -> &[LogLine] {
        &self.logs
    }
}
