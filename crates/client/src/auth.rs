//! The authenticated-request pipeline.
//!
//! Every outgoing call resolves its bearer token here: read the stored pair,
//! attach the access token while it is still valid, exchange the refresh
//! token when it is not. Refresh failure tears the session down; the owning
//! front-end observes that through the session watch channel and routes the
//! user back to login.

use std::sync::Arc;

use chrono::Utc;
use lusolve_protocol::{RefreshResponse, TokenPair};
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::store::CredentialStore;
use crate::token::access_token_expired;

/// Session lifecycle, observable by the owning front-end.
///
/// `Ended` is the teardown signal: the credential slot is empty and only a
/// fresh login brings the session back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Active,
    Ended,
}

/// Transport seam for the refresh exchange, injectable in tests.
pub trait RefreshTransport: Send + Sync {
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<RefreshResponse, ApiError>> + Send;
}

pub struct AuthPipeline<T> {
    store: Arc<dyn CredentialStore>,
    transport: T,
    // Single-flight guard around the refresh exchange only; the request
    // path itself is never serialized.
    refresh_gate: Mutex<()>,
    session_tx: watch::Sender<SessionPhase>,
}

impl<T: RefreshTransport> AuthPipeline<T> {
    pub fn new(store: Arc<dyn CredentialStore>, transport: T) -> Self {
        let (session_tx, _) = watch::channel(SessionPhase::Active);
        Self {
            store,
            transport,
            refresh_gate: Mutex::new(()),
            session_tx,
        }
    }

    pub fn subscribe_session(&self) -> watch::Receiver<SessionPhase> {
        self.session_tx.subscribe()
    }

    #[must_use]
    pub fn session_phase(&self) -> SessionPhase {
        *self.session_tx.borrow()
    }

    /// Persist a freshly obtained pair and (re)activate the session.
    pub fn install(&self, pair: &TokenPair) -> Result<(), ApiError> {
        self.store.save(pair)?;
        let _ = self.session_tx.send_replace(SessionPhase::Active);
        Ok(())
    }

    /// Explicit logout: empty the slot and end the session.
    pub fn sign_out(&self) -> Result<(), ApiError> {
        self.store.clear()?;
        let _ = self.session_tx.send_replace(SessionPhase::Ended);
        Ok(())
    }

    /// Resolve the bearer token for one outgoing call.
    ///
    /// `Ok(None)` means the call goes out unauthenticated (no stored pair).
    /// An expired or undecodable access token suspends the call on a refresh
    /// exchange; callers waiting on the gate re-read the store afterwards,
    /// so N concurrent expired calls produce one exchange.
    pub async fn bearer_for_request(&self) -> Result<Option<String>, ApiError> {
        let Some(pair) = self.store.load()? else {
            return Ok(None);
        };
        if !access_token_expired(&pair.access, Utc::now()) {
            return Ok(Some(pair.access));
        }

        let _gate = self.refresh_gate.lock().await;

        // A concurrent caller may have refreshed (or torn the session down)
        // while this one waited on the gate.
        let Some(pair) = self.store.load()? else {
            return Ok(None);
        };
        if !access_token_expired(&pair.access, Utc::now()) {
            return Ok(Some(pair.access));
        }

        match self.transport.refresh(&pair.refresh).await {
            Ok(response) => {
                let refreshed = pair.merged_with(response);
                if self.session_phase() == SessionPhase::Ended {
                    // Torn down while the exchange was in flight; discard
                    // rather than resurrect.
                    debug!("refresh resolved after session end; discarding pair");
                    return Err(ApiError::SessionExpired {
                        reason: "session ended during refresh".to_string(),
                    });
                }
                self.store.save(&refreshed)?;
                debug!("access token refreshed");
                Ok(Some(refreshed.access))
            }
            Err(error) => {
                warn!("credential refresh failed: {error}");
                self.store.clear()?;
                let _ = self.session_tx.send_replace(SessionPhase::Ended);
                Err(ApiError::SessionExpired {
                    reason: error.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::store::MemoryCredentialStore;
    use crate::token::test_tokens::token_with_exp;

    #[derive(Clone)]
    enum Outcome {
        Grant { access: String, rotate: Option<String> },
        Deny,
    }

    struct FakeRefresher {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        outcome: Outcome,
    }

    impl RefreshTransport for FakeRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshResponse, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.outcome.clone() {
                Outcome::Grant { access, rotate } => Ok(RefreshResponse {
                    access,
                    refresh: rotate,
                }),
                Outcome::Deny => Err(ApiError::Unauthorized {
                    message: "refresh token is invalid or expired".to_string(),
                }),
            }
        }
    }

    fn fresh_access() -> String {
        token_with_exp(Utc::now().timestamp() + 3_600)
    }

    fn stale_access() -> String {
        token_with_exp(Utc::now().timestamp() - 60)
    }

    fn pipeline_with(
        pair: Option<TokenPair>,
        outcome: Outcome,
        delay: Duration,
    ) -> (Arc<AuthPipeline<FakeRefresher>>, Arc<AtomicUsize>, Arc<MemoryCredentialStore>) {
        let store = Arc::new(match pair {
            Some(pair) => MemoryCredentialStore::with_pair(pair),
            None => MemoryCredentialStore::new(),
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = FakeRefresher {
            calls: Arc::clone(&calls),
            delay,
            outcome,
        };
        let pipeline = Arc::new(AuthPipeline::new(
            Arc::clone(&store) as Arc<dyn CredentialStore>,
            transport,
        ));
        (pipeline, calls, store)
    }

    #[tokio::test]
    async fn valid_token_attached_unmodified_without_refresh() -> Result<(), ApiError> {
        let access = fresh_access();
        let pair = TokenPair {
            access: access.clone(),
            refresh: "refresh".to_string(),
        };
        let (pipeline, calls, _store) = pipeline_with(
            Some(pair),
            Outcome::Grant {
                access: fresh_access(),
                rotate: None,
            },
            Duration::ZERO,
        );

        let bearer = pipeline.bearer_for_request().await?;
        assert_eq!(bearer, Some(access));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn absent_pair_goes_out_unauthenticated() -> Result<(), ApiError> {
        let (pipeline, calls, _store) = pipeline_with(
            None,
            Outcome::Grant {
                access: fresh_access(),
                rotate: None,
            },
            Duration::ZERO,
        );

        assert_eq!(pipeline.bearer_for_request().await?, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_exactly_once() -> Result<(), ApiError> {
        let refreshed_access = fresh_access();
        let pair = TokenPair {
            access: stale_access(),
            refresh: "refresh".to_string(),
        };
        let (pipeline, calls, store) = pipeline_with(
            Some(pair),
            Outcome::Grant {
                access: refreshed_access.clone(),
                rotate: None,
            },
            Duration::ZERO,
        );

        let bearer = pipeline.bearer_for_request().await?;
        assert_eq!(bearer, Some(refreshed_access.clone()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Old refresh token carried over, new access persisted.
        let stored = store.load()?.ok_or(ApiError::InvalidPath)?;
        assert_eq!(stored.access, refreshed_access);
        assert_eq!(stored.refresh, "refresh");
        Ok(())
    }

    #[tokio::test]
    async fn malformed_token_forces_refresh() -> Result<(), ApiError> {
        let refreshed_access = fresh_access();
        let pair = TokenPair {
            access: "garbage".to_string(),
            refresh: "refresh".to_string(),
        };
        let (pipeline, calls, _store) = pipeline_with(
            Some(pair),
            Outcome::Grant {
                access: refreshed_access.clone(),
                rotate: None,
            },
            Duration::ZERO,
        );

        assert_eq!(pipeline.bearer_for_request().await?, Some(refreshed_access));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn rotated_refresh_token_is_persisted() -> Result<(), ApiError> {
        let pair = TokenPair {
            access: stale_access(),
            refresh: "old-refresh".to_string(),
        };
        let (pipeline, _calls, store) = pipeline_with(
            Some(pair),
            Outcome::Grant {
                access: fresh_access(),
                rotate: Some("rotated-refresh".to_string()),
            },
            Duration::ZERO,
        );

        pipeline.bearer_for_request().await?;
        let stored = store.load()?.ok_or(ApiError::InvalidPath)?;
        assert_eq!(stored.refresh, "rotated-refresh");
        Ok(())
    }

    #[tokio::test]
    async fn refresh_failure_clears_store_and_ends_session() -> Result<(), ApiError> {
        let pair = TokenPair {
            access: stale_access(),
            refresh: "refresh".to_string(),
        };
        let (pipeline, _calls, store) = pipeline_with(Some(pair), Outcome::Deny, Duration::ZERO);

        let result = pipeline.bearer_for_request().await;
        assert!(matches!(result, Err(ApiError::SessionExpired { .. })));
        assert!(store.load()?.is_none());
        assert_eq!(pipeline.session_phase(), SessionPhase::Ended);

        // The torn-down session issues nothing stale: subsequent calls see
        // an empty slot and go out unauthenticated.
        assert_eq!(pipeline.bearer_for_request().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_expired_callers_share_one_refresh() -> Result<(), ApiError> {
        let refreshed_access = fresh_access();
        let pair = TokenPair {
            access: stale_access(),
            refresh: "refresh".to_string(),
        };
        let (pipeline, calls, _store) = pipeline_with(
            Some(pair),
            Outcome::Grant {
                access: refreshed_access.clone(),
                rotate: None,
            },
            Duration::from_millis(50),
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pipeline = Arc::clone(&pipeline);
            handles.push(tokio::spawn(
                async move { pipeline.bearer_for_request().await },
            ));
        }

        for handle in handles {
            let bearer = handle
                .await
                .map_err(|error| ApiError::Request {
                    message: error.to_string(),
                })??;
            assert_eq!(bearer, Some(refreshed_access.clone()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_resolving_after_sign_out_does_not_resurrect() -> Result<(), ApiError> {
        let pair = TokenPair {
            access: stale_access(),
            refresh: "refresh".to_string(),
        };
        let (pipeline, _calls, store) = pipeline_with(
            Some(pair),
            Outcome::Grant {
                access: fresh_access(),
                rotate: None,
            },
            Duration::from_millis(80),
        );

        let racer = Arc::clone(&pipeline);
        let in_flight = tokio::spawn(async move { racer.bearer_for_request().await });

        // Let the exchange start, then tear the session down underneath it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipeline.sign_out()?;

        let result = in_flight.await.map_err(|error| ApiError::Request {
            message: error.to_string(),
        })?;
        assert!(matches!(result, Err(ApiError::SessionExpired { .. })));
        assert!(store.load()?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn install_reactivates_an_ended_session() -> Result<(), ApiError> {
        let (pipeline, _calls, store) = pipeline_with(None, Outcome::Deny, Duration::ZERO);

        pipeline.sign_out()?;
        assert_eq!(pipeline.session_phase(), SessionPhase::Ended);

        let pair = TokenPair {
            access: fresh_access(),
            refresh: "refresh".to_string(),
        };
        pipeline.install(&pair)?;
        assert_eq!(pipeline.session_phase(), SessionPhase::Active);
        assert_eq!(store.load()?, Some(pair));
        Ok(())
    }
}
