//! Live channel error types.
//!
//! Only channel creation can fail from the caller's point of view.
//! Transport failures during operation are recovered internally by
//! reconnection and never bubble out; the connectivity flag is the only
//! visible effect.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid channel URL: {0}")]
    InvalidUrl(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
