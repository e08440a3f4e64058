//! Task records as served by the REST API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a solve task.
///
/// `Pending` and `Queued` are the admission phases: the task exists but no
/// worker has picked it up yet. Everything from `Running` on is execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the task is still waiting for backend admission.
    #[must_use]
    pub fn in_queue_phase(self) -> bool {
        matches!(self, Self::Pending | Self::Queued)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded progress step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPoint {
    pub stage: String,
    pub percentage: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One historical log line stored server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub message: String,
    #[serde(default = "default_log_level")]
    pub level: String,
    pub timestamp: DateTime<Utc>,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

/// Full point-in-time task record from `GET /tasks/{id}/`.
///
/// Immutable at fetch time; stale the instant a live update arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: u64,
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub matrix_size: Option<u32>,
    #[serde(default)]
    pub save_matrices: bool,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub result_message: Option<String>,
    #[serde(default)]
    pub queue_position: Option<u32>,
    #[serde(default)]
    pub estimated_wait_time_sec: Option<u64>,
    #[serde(default)]
    pub queue_message: Option<String>,
    #[serde(default)]
    pub progress_updates: Vec<ProgressPoint>,
    #[serde(default)]
    pub logs: Vec<TaskLogEntry>,
}

impl TaskSnapshot {
    /// Latest recorded progress step, if any.
    #[must_use]
    pub fn last_progress(&self) -> Option<&ProgressPoint> {
        self.progress_updates.last()
    }
}

/// Abbreviated task record from `GET /tasks/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: u64,
    pub uuid: Uuid,
    pub name: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub last_progress: Option<ProgressPoint>,
}

/// Worker fleet counters from the monitoring endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerFleet {
    pub count: u32,
    pub max_replicas: u32,
}

/// Staff-only dashboard payload from `GET /monitoring/metrics/`.
///
/// The system/tasks/users groups are dashboard-shaped and fluid; they are
/// carried as raw JSON for display rather than pinned to a schema.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringMetrics {
    #[serde(default)]
    pub system: serde_json::Value,
    #[serde(default)]
    pub tasks: serde_json::Value,
    #[serde(default)]
    pub users: serde_json::Value,
    pub workers: WorkerFleet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_phase_predicates() {
        assert!(TaskStatus::Pending.in_queue_phase());
        assert!(TaskStatus::Queued.in_queue_phase());
        assert!(!TaskStatus::Running.in_queue_phase());

        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn snapshot_rejects_malformed_uuid() {
        let json = r#"{
            "id": 7,
            "uuid": "3f0a4f5c-9d1e-4d37-b6a2-malformed",
            "name": "solve",
            "status": "pending",
            "created_at": "2024-05-01T10:00:00Z"
        }"#;
        assert!(serde_json::from_str::<TaskSnapshot>(json).is_err());
    }

    #[test]
    fn snapshot_decodes_with_optional_fields_absent() -> serde_json::Result<()> {
        let json = r#"{
            "id": 7,
            "uuid": "3f0a4f5c-9d1e-4d37-b6a2-1a2b3c4d5e6f",
            "name": "solve",
            "status": "pending",
            "created_at": "2024-05-01T10:00:00Z"
        }"#;
        let snapshot: TaskSnapshot = serde_json::from_str(json)?;
        assert_eq!(snapshot.status, TaskStatus::Pending);
        assert!(snapshot.logs.is_empty());
        assert!(snapshot.last_progress().is_none());
        assert_eq!(snapshot.queue_position, None);
        Ok(())
    }

    #[test]
    fn snapshot_decodes_queue_metadata() -> serde_json::Result<()> {
        let json = r#"{
            "id": 12,
            "uuid": "3f0a4f5c-9d1e-4d37-b6a2-1a2b3c4d5e6f",
            "name": "big solve",
            "status": "queued",
            "created_at": "2024-05-01T10:00:00Z",
            "queue_position": 5,
            "estimated_wait_time_sec": 120,
            "progress_updates": [{"stage": "awaiting parse", "percentage": 1.0}],
            "logs": [
                {"message": "a", "timestamp": "2024-05-01T10:00:01Z"},
                {"message": "b", "level": "ERROR", "timestamp": "2024-05-01T10:00:02Z"}
            ]
        }"#;
        let snapshot: TaskSnapshot = serde_json::from_str(json)?;
        assert_eq!(snapshot.queue_position, Some(5));
        assert_eq!(snapshot.estimated_wait_time_sec, Some(120));
        assert_eq!(
            snapshot.last_progress().map(|p| p.stage.as_str()),
            Some("awaiting parse")
        );
        assert_eq!(snapshot.logs[0].level, "INFO");
        assert_eq!(snapshot.logs[1].level, "ERROR");
        Ok(())
    }
}
