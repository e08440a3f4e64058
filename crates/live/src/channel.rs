//! Per-task live update channel.
//!
//! One WebSocket per task UUID, opened once the snapshot fetch has resolved
//! the UUID. The channel reconnects forever on transport loss (capped
//! exponential backoff) and only stops on explicit teardown. Frames are
//! decoded at the boundary; malformed ones are dropped without closing the
//! connection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use lusolve_protocol::{LiveUpdate, parse_live_frame};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{ChannelError, Result};

/// Connection lifecycle. `Closed` is terminal and only reached by explicit
/// teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub connect_timeout: Duration,
    pub reconnect_base_backoff_ms: u64,
    pub reconnect_max_backoff_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_base_backoff_ms: 250,
            reconnect_max_backoff_ms: 8_000,
        }
    }
}

/// Build the per-task updates URL from a ws base and the task UUID.
pub fn updates_url(ws_base: &str, task_uuid: Uuid) -> Result<Url> {
    let base = ws_base.trim().trim_end_matches('/');
    if base.is_empty() {
        return Err(ChannelError::InvalidUrl(
            "ws base url must not be empty".to_string(),
        ));
    }
    let url = Url::parse(&format!("{base}/ws/tasks/updates/{task_uuid}/"))?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(ChannelError::InvalidUrl(format!(
            "URL must use ws:// or wss:// scheme, got: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

/// Live update channel for one task.
pub struct TaskChannel {
    url: Url,
    state: Arc<RwLock<ChannelState>>,
    connected_rx: watch::Receiver<bool>,
    updates_rx: Mutex<mpsc::UnboundedReceiver<LiveUpdate>>,
    shutdown_tx: watch::Sender<bool>,
    run_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TaskChannel {
    /// Open a channel with default config. The connection attempt (and all
    /// reconnection) happens on a background task; this returns immediately.
    pub fn open(ws_base: &str, task_uuid: Uuid) -> Result<Self> {
        Self::open_with_config(ws_base, task_uuid, ChannelConfig::default())
    }

    pub fn open_with_config(
        ws_base: &str,
        task_uuid: Uuid,
        config: ChannelConfig,
    ) -> Result<Self> {
        let url = updates_url(ws_base, task_uuid)?;
        let state = Arc::new(RwLock::new(ChannelState::Disconnected));
        let (connected_tx, connected_rx) = watch::channel(false);
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let run_task = tokio::spawn(run_channel(
            url.clone(),
            config,
            Arc::clone(&state),
            connected_tx,
            updates_tx,
            shutdown_rx,
        ));

        Ok(Self {
            url,
            state,
            connected_rx,
            updates_rx: Mutex::new(updates_rx),
            shutdown_tx,
            run_task: Mutex::new(Some(run_task)),
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub async fn state(&self) -> ChannelState {
        *self.state.read().await
    }

    /// Connectivity flag for the owning front-end; true while the socket is
    /// open.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    /// Receive the next live update, in receipt order. Returns `None` once
    /// the channel has been closed and the buffer is drained.
    pub async fn recv(&self) -> Option<LiveUpdate> {
        self.updates_rx.lock().await.recv().await
    }

    /// Terminal teardown: stop reconnecting and close the socket. Idempotent.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send_replace(true);
        if let Some(task) = self.run_task.lock().await.take() {
            let _ = task.await;
        }
        *self.state.write().await = ChannelState::Closed;
    }
}

async fn set_state(state: &Arc<RwLock<ChannelState>>, next: ChannelState) {
    *state.write().await = next;
}

fn reconnect_delay(config: &ChannelConfig, attempt: u32) -> Duration {
    let shift = attempt.min(6);
    let delay = config.reconnect_base_backoff_ms.saturating_mul(1 << shift);
    Duration::from_millis(delay.min(config.reconnect_max_backoff_ms))
}

/// Deliver one text frame. Returns false only when the receiving side is
/// gone and the channel should wind down.
fn deliver(text: &str, url: &Url, updates_tx: &mpsc::UnboundedSender<LiveUpdate>) -> bool {
    match parse_live_frame(text) {
        Ok(Some(update)) => updates_tx.send(update).is_ok(),
        Ok(None) => {
            debug!("ignoring unrecognized frame kind on {}", url);
            true
        }
        Err(error) => {
            warn!("dropping malformed frame on {}: {}", url, error);
            true
        }
    }
}

async fn run_channel(
    url: Url,
    config: ChannelConfig,
    state: Arc<RwLock<ChannelState>>,
    connected_tx: watch::Sender<bool>,
    updates_tx: mpsc::UnboundedSender<LiveUpdate>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut reconnect_attempts: u32 = 0;

    'supervise: loop {
        if *shutdown_rx.borrow() {
            break;
        }
        set_state(&state, ChannelState::Connecting).await;

        let attempt = timeout(config.connect_timeout, connect_async(url.as_str()));
        let outcome = tokio::select! {
            changed = shutdown_rx.changed() => {
                // Sender gone or teardown requested; either way, stop.
                let _ = changed;
                break 'supervise;
            }
            result = attempt => result,
        };

        match outcome {
            Ok(Ok((mut stream, _response))) => {
                reconnect_attempts = 0;
                set_state(&state, ChannelState::Open).await;
                let _ = connected_tx.send_replace(true);
                debug!("live channel open: {}", url);

                loop {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                let _ = stream.close(None).await;
                                let _ = connected_tx.send_replace(false);
                                break 'supervise;
                            }
                        }
                        frame = stream.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                if !deliver(text.as_str(), &url, &updates_tx) {
                                    let _ = stream.close(None).await;
                                    let _ = connected_tx.send_replace(false);
                                    break 'supervise;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(error)) => {
                                warn!("live channel read error on {}: {}", url, error);
                                break;
                            }
                        }
                    }
                }

                let _ = connected_tx.send_replace(false);
            }
            Ok(Err(error)) => {
                debug!("live channel connect failed on {}: {}", url, error);
            }
            Err(_elapsed) => {
                debug!(
                    "live channel connect timed out after {:?} on {}",
                    config.connect_timeout, url
                );
            }
        }

        if *shutdown_rx.borrow() {
            break;
        }
        set_state(&state, ChannelState::Disconnected).await;

        let delay = reconnect_delay(&config, reconnect_attempts);
        reconnect_attempts = reconnect_attempts.saturating_add(1);
        debug!(
            "live channel reconnecting to {} in {:?} (attempt {})",
            url, delay, reconnect_attempts
        );

        tokio::select! {
            changed = shutdown_rx.changed() => {
                let _ = changed;
                break 'supervise;
            }
            () = sleep(delay) => {}
        }
    }

    let _ = connected_tx.send_replace(false);
    set_state(&state, ChannelState::Closed).await;
}
