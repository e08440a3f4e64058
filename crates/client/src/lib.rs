//! Authenticated REST client for the lusolve task service.
//!
//! The pieces: a credential store (one persisted slot), an access-token
//! claims decoder, the refresh pipeline that sits underneath every request,
//! and the typed REST surface.

pub mod auth;
pub mod client;
pub mod error;
pub mod store;
pub mod token;

pub use auth::{AuthPipeline, RefreshTransport, SessionPhase};
pub use client::{
    ApiClient, ApiClientConfig, DEFAULT_TIMEOUT_MS, DownloadedFile, NewTask, TaskInput,
};
pub use error::ApiError;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StoreError};
pub use token::{AccessClaims, ClaimsError, access_token_expired, decode_access_claims};
