//! Live task-state synchronization: the per-task update channel and the
//! snapshot/stream merger.

pub mod channel;
pub mod error;
pub mod view;

pub use channel::{ChannelConfig, ChannelState, TaskChannel, updates_url};
pub use error::{ChannelError, Result};
pub use view::{LogLine, TaskView};
