//! Endpoint resolution and shared command context.

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use lusolve_client::{ApiClient, ApiClientConfig, FileCredentialStore};
use url::Url;

pub const ENV_BASE_URL: &str = "LUSOLVE_BASE_URL";
pub const ENV_WS_URL: &str = "LUSOLVE_WS_URL";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// Resolve the REST base URL: explicit flag, then environment, then the
/// local default.
pub fn resolve_base_url(flag: Option<&str>) -> String {
    if let Some(base) = non_empty(flag.map(ToString::to_string)) {
        return base;
    }
    if let Some(base) = non_empty(std::env::var(ENV_BASE_URL).ok()) {
        return base;
    }
    DEFAULT_BASE_URL.to_string()
}

/// Derive the update-stream base from the REST base: same host, ws scheme,
/// no API path prefix (the stream is mounted at the host root).
pub fn derive_ws_base(base_url: &str) -> anyhow::Result<String> {
    let parsed = Url::parse(base_url).with_context(|| format!("invalid base url: {base_url}"))?;
    let scheme = if parsed.scheme() == "https" { "wss" } else { "ws" };
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("base url has no host: {base_url}"))?;
    Ok(match parsed.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
}

/// Everything a command needs: the authenticated client and the ws base.
pub struct CliContext {
    pub client: ApiClient,
    base_url: String,
}

impl CliContext {
    pub fn new(base_url_flag: Option<&str>) -> anyhow::Result<Self> {
        let base_url = resolve_base_url(base_url_flag);
        let store = Arc::new(
            FileCredentialStore::default_location().context("locating credential store")?,
        );
        let client = ApiClient::new(ApiClientConfig::new(base_url.clone()), store)
            .context("constructing api client")?;
        Ok(Self { client, base_url })
    }

    /// Update-stream base: explicit override, then `LUSOLVE_WS_URL`, then
    /// derivation from the REST base.
    pub fn ws_base(&self, flag: Option<&str>) -> anyhow::Result<String> {
        if let Some(ws) = non_empty(flag.map(ToString::to_string)) {
            return Ok(ws);
        }
        if let Some(ws) = non_empty(std::env::var(ENV_WS_URL).ok()) {
            return Ok(ws);
        }
        derive_ws_base(&self.base_url)
    }
}
