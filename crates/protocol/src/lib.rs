//! Wire and data model shared by the lusolve client crates.

pub mod auth;
pub mod live;
pub mod task;

pub use auth::{
    ChangePasswordRequest, LoginRequest, ProfileUpdate, RefreshRequest, RefreshResponse,
    RegisterRequest, TokenPair, UserProfile,
};
pub use live::{LiveUpdate, ProtocolError, parse_live_frame};
pub use task::{
    MonitoringMetrics, ProgressPoint, TaskLogEntry, TaskSnapshot, TaskStatus, TaskSummary,
    WorkerFleet,
};
