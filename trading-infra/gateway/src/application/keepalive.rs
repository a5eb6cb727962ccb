//! Session keepalive
//!
//! Owns the authenticated session token of one venue: issues it on first
//! use, renews it on a timer well before expiry, and tears down the private
//! connections bound to it once it can no longer be kept alive.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::connection_manager::ConnectionManager;
use crate::domain::{Endpoint, FetchError, SessionIssuer, VenueId};
use crate::error::{ErrorTable, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Acquiring,
    Active,
    Renewing,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub value: String,
    pub issued_at: Instant,
    pub validity: Duration,
}

#[derive(Default)]
struct Slot {
    token: Option<SessionToken>,
    /// Bumped whenever the token is replaced or dropped; stale timers exit
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

pub struct SessionKeepalive {
    venue: VenueId,
    issuer: Arc<dyn SessionIssuer>,
    renew_fraction: f64,
    errors: ErrorTable,
    slot: tokio::sync::Mutex<Slot>,
    state: Mutex<SessionState>,
    bound: Mutex<HashSet<Endpoint>>,
    connections: Weak<ConnectionManager>,
    this: Weak<SessionKeepalive>,
}

impl SessionKeepalive {
    pub fn new(
        venue: VenueId,
        issuer: Arc<dyn SessionIssuer>,
        renew_fraction: f64,
        errors: ErrorTable,
        connections: Weak<ConnectionManager>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| SessionKeepalive {
            venue,
            issuer,
            renew_fraction: renew_fraction.clamp(0.05, 0.95),
            errors,
            slot: tokio::sync::Mutex::new(Slot::default()),
            state: Mutex::new(SessionState::NoSession),
            bound: Mutex::new(HashSet::new()),
            connections,
            this: this.clone(),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Current token, issuing one if there is none
    ///
    /// Concurrent callers wait on the same issuance.
    pub async fn acquire(&self) -> Result<SessionToken, StreamError> {
        let mut slot = self.slot.lock().await;
        if let Some(token) = &slot.token {
            return Ok(token.clone());
        }

        self.set_state(SessionState::Acquiring);
        match self.issuer.issue().await {
            Ok(grant) => {
                let token = SessionToken {
                    value: grant.token,
                    issued_at: Instant::now(),
                    validity: grant.validity,
                };
                slot.epoch += 1;
                slot.token = Some(token.clone());
                let timer = self.arm(slot.epoch, grant.validity);
                if let Some(old) = slot.timer.replace(timer) {
                    old.abort();
                }
                self.set_state(SessionState::Active);
                tracing::info!("{} session issued, valid for {:?}", self.venue, grant.validity);
                Ok(token)
            }
            Err(e) => {
                self.set_state(SessionState::NoSession);
                tracing::error!("{} session issuance failed: {}", self.venue, e);
                Err(self.issue_error(e))
            }
        }
    }

    fn issue_error(&self, error: FetchError) -> StreamError {
        match error {
            FetchError::Api { code, message } => {
                let code = code.to_string();
                StreamError::VenueRejection {
                    venue: self.venue.clone(),
                    kind: self.errors.classify(&code, &message),
                    code,
                    message,
                }
            }
            FetchError::Network(message) | FetchError::Parse(message) => {
                StreamError::TransientNetwork {
                    endpoint: format!("{} session", self.venue),
                    message,
                }
            }
        }
    }

    /// Register a private endpoint to close when the session ends
    pub fn bind(&self, endpoint: Endpoint) {
        self.bound.lock().insert(endpoint);
    }

    fn arm(&self, epoch: u64, validity: Duration) -> JoinHandle<()> {
        let this = self.this.clone();
        let delay = validity.mul_f64(self.renew_fraction);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                let Some(keepalive) = this.upgrade() else {
                    return;
                };
                if !keepalive.renew(epoch).await {
                    return;
                }
            }
        })
    }

    async fn renew(&self, epoch: u64) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.epoch != epoch {
            return false;
        }
        let Some(token) = slot.token.clone() else {
            return false;
        };

        self.set_state(SessionState::Renewing);
        match self.issuer.renew(&token.value).await {
            Ok(()) => {
                if let Some(token) = slot.token.as_mut() {
                    token.issued_at = Instant::now();
                }
                self.set_state(SessionState::Active);
                tracing::debug!("{} session renewed", self.venue);
                true
            }
            Err(e) => {
                tracing::warn!("{} session renewal failed: {}", self.venue, e);
                // this runs on the timer task, which exits on its own
                Self::invalidate(&mut slot, false);
                self.set_state(SessionState::Expired);
                drop(slot);
                self.close_bound();
                false
            }
        }
    }

    /// The venue reported the session gone
    pub async fn expire(&self) {
        let mut slot = self.slot.lock().await;
        if slot.token.is_none() {
            return;
        }
        tracing::warn!("{} session expired by venue", self.venue);
        Self::invalidate(&mut slot, true);
        self.set_state(SessionState::Expired);
        drop(slot);
        self.close_bound();
    }

    fn invalidate(slot: &mut Slot, abort_timer: bool) {
        slot.token = None;
        slot.epoch += 1;
        if let Some(timer) = slot.timer.take()
            && abort_timer
        {
            timer.abort();
        }
    }

    fn close_bound(&self) {
        let endpoints: Vec<Endpoint> = self.bound.lock().drain().collect();
        if let Some(connections) = self.connections.upgrade() {
            for endpoint in endpoints {
                connections.close(
                    &endpoint,
                    StreamError::AuthExpired {
                        venue: self.venue.clone(),
                    },
                );
            }
        }
        self.set_state(SessionState::NoSession);
    }

    /// Stop renewing and revoke the token without touching connections
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(token) = &slot.token
            && let Err(e) = self.issuer.close(&token.value).await
        {
            tracing::warn!("{} session close failed: {}", self.venue, e);
        }
        Self::invalidate(&mut slot, true);
        self.bound.lock().clear();
        self.set_state(SessionState::NoSession);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionGrant;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct MockIssuer {
        issued: AtomicU32,
        renewed: AtomicU32,
        closed: AtomicU32,
        fail_renew: AtomicBool,
    }

    #[async_trait]
    impl SessionIssuer for MockIssuer {
        async fn issue(&self) -> Result<SessionGrant, FetchError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(SessionGrant {
                token: format!("listen-key-{}", n),
                validity: Duration::from_secs(60),
            })
        }

        async fn renew(&self, _token: &str) -> Result<(), FetchError> {
            self.renewed.fetch_add(1, Ordering::SeqCst);
            if self.fail_renew.load(Ordering::SeqCst) {
                Err(FetchError::Api {
                    code: -1125,
                    message: "This listenKey does not exist.".to_string(),
                })
            } else {
                Ok(())
            }
        }

        async fn close(&self, _token: &str) -> Result<(), FetchError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn keepalive(issuer: Arc<MockIssuer>) -> Arc<SessionKeepalive> {
        SessionKeepalive::new(VenueId::asterdex(), issuer, 0.5, ErrorTable::new(), Weak::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_issues_once() {
        let issuer = Arc::new(MockIssuer::default());
        let session = keepalive(Arc::clone(&issuer));

        let (a, b) = tokio::join!(session.acquire(), session.acquire());
        assert_eq!(a.unwrap().value, "listen-key-1");
        assert_eq!(b.unwrap().value, "listen-key-1");
        assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renews_at_fraction_of_validity() {
        let issuer = Arc::new(MockIssuer::default());
        let session = keepalive(Arc::clone(&issuer));
        session.acquire().await.unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(issuer.renewed.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(issuer.renewed.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Active);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(issuer.renewed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_drops_token() {
        let issuer = Arc::new(MockIssuer::default());
        issuer.fail_renew.store(true, Ordering::SeqCst);
        let session = keepalive(Arc::clone(&issuer));
        session.acquire().await.unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(session.state(), SessionState::NoSession);

        // no further renewals from the dead timer
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(issuer.renewed.load(Ordering::SeqCst), 1);

        let token = session.acquire().await.unwrap();
        assert_eq!(token.value, "listen-key-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_venue_expiry_forces_reissue() {
        let issuer = Arc::new(MockIssuer::default());
        let session = keepalive(Arc::clone(&issuer));
        session.acquire().await.unwrap();

        session.expire().await;
        assert_eq!(session.state(), SessionState::NoSession);

        let token = session.acquire().await.unwrap();
        assert_eq!(token.value, "listen-key-2");
        assert_eq!(issuer.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_revokes_live_token() {
        let issuer = Arc::new(MockIssuer::default());
        let session = keepalive(Arc::clone(&issuer));

        // nothing to revoke yet
        session.shutdown().await;
        assert_eq!(issuer.closed.load(Ordering::SeqCst), 0);

        session.acquire().await.unwrap();
        session.shutdown().await;
        assert_eq!(issuer.closed.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::NoSession);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(issuer.renewed.load(Ordering::SeqCst), 0);
    }
}
