// ── Credential lifecycle ──
//
// Owns the one live credential. State transitions:
//
//   Unauthenticated ─begin─▶ PendingVerification ─complete─▶ Authenticated
//   Authenticated ─mark_expired─▶ Expired ─refresh─▶ Authenticated
//   Authenticated ─fresh token rejected─▶ Expired (reauth required)
//   Expired (reauth required) ─begin─▶ PendingVerification
//
// `begin` on a usable credential only records the pending token; the old
// credential keeps serving calls until `complete` replaces it.
//
// Readers load an immutable `AuthSnapshot` through `ArcSwap`; writers
// publish a whole new snapshot. Silent refreshes are single-flight: the
// first caller to observe `Expired` installs a shared future, everyone
// else awaits that same future and receives the same outcome.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use strum::Display;
use tracing::{debug, info, warn};

use rackdash_api::ApiClient;

use super::store::{Credential, CredentialRecord, CredentialStore, token_preview};
use crate::error::CoreError;

type RefreshFuture = Shared<BoxFuture<'static, Result<SecretString, CoreError>>>;

/// Where the credential is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    PendingVerification,
    Authenticated,
    Expired,
}

/// Immutable view of the lifecycle, swapped atomically on every transition.
#[derive(Debug, Clone)]
struct AuthSnapshot {
    state: AuthState,
    credential: Option<Credential>,
    identity: Option<String>,
    /// Unverified token issued by `begin_authentication`.
    pending: Option<SecretString>,
    /// Set when a silent refresh was refused; only a new code clears it.
    reauth_required: bool,
}

impl AuthSnapshot {
    fn from_record(record: CredentialRecord) -> Self {
        let state = if record.credential.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        };
        Self {
            state,
            credential: record.credential,
            identity: record.identity,
            pending: None,
            reauth_required: false,
        }
    }

    fn record(&self) -> CredentialRecord {
        CredentialRecord {
            credential: self.credential.clone(),
            identity: self.identity.clone(),
        }
    }

    fn unavailable_error(&self) -> CoreError {
        if self.reauth_required {
            CoreError::ReauthorizationRequired
        } else {
            CoreError::NotAuthenticated
        }
    }
}

/// A token handed to a caller, and whether it was minted by a refresh on
/// the way.
pub(crate) struct LiveToken {
    pub token: SecretString,
    pub refreshed: bool,
}

/// Externally visible credential status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthStatus {
    pub state: AuthState,
    pub identity: Option<String>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub token_age_hours: Option<f64>,
    /// Token older than the configured maximum age. Advisory only.
    pub stale: bool,
    pub reauthorization_required: bool,
    /// A verification code has been requested and not yet presented.
    pub verification_pending: bool,
}

/// Credential lifecycle manager. Cheaply cloneable.
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    api: ApiClient,
    store: Arc<dyn CredentialStore>,
    timeout: Duration,
    max_age: Duration,
    live: ArcSwap<AuthSnapshot>,
    inflight: Mutex<Option<RefreshFuture>>,
}

impl CredentialManager {
    /// Restore the persisted record (if any) and start in the matching state.
    pub fn new(
        api: ApiClient,
        store: Arc<dyn CredentialStore>,
        timeout: Duration,
        max_age: Duration,
    ) -> Self {
        let record = match store.load() {
            Ok(record) => record.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "could not load stored credential; starting unauthenticated");
                CredentialRecord::default()
            }
        };
        let snapshot = AuthSnapshot::from_record(record);
        info!(state = %snapshot.state, "credential manager initialised");

        Self {
            inner: Arc::new(ManagerInner {
                api,
                store,
                timeout,
                max_age,
                live: ArcSwap::from_pointee(snapshot),
                inflight: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> AuthState {
        self.inner.live.load().state
    }

    pub fn identity(&self) -> Option<String> {
        self.inner.live.load().identity.clone()
    }

    // ── Interactive exchange ─────────────────────────────────────

    /// Ask upstream to send a verification code to `identity`.
    pub async fn begin_authentication(&self, identity: &str) -> Result<(), CoreError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(CoreError::Config {
                message: "identity must not be empty".into(),
            });
        }

        let token = self
            .inner
            .bounded("login", self.inner.api.login(identity))
            .await
            .map_err(unavailable)?;

        debug!(token = %token_preview(&token), "verification challenge issued");
        self.inner.live.rcu(|cur| AuthSnapshot {
            state: match cur.state {
                AuthState::Authenticated => AuthState::Authenticated,
                AuthState::Expired if !cur.reauth_required => AuthState::Expired,
                _ => AuthState::PendingVerification,
            },
            credential: cur.credential.clone(),
            identity: Some(identity.to_owned()),
            pending: Some(token.clone()),
            reauth_required: cur.reauth_required,
        });
        self.inner.persist();
        info!("authentication started; awaiting verification code");
        Ok(())
    }

    /// Present the verification code and activate the pending token.
    pub async fn complete_authentication(&self, code: &str) -> Result<(), CoreError> {
        let code = code.trim();
        let Some(pending) = self.inner.live.load().pending.clone() else {
            return Err(CoreError::NotAuthenticated);
        };
        if code.is_empty() {
            return Err(CoreError::InvalidVerificationCode {
                message: "verification code must not be empty".into(),
            });
        }

        self.inner
            .bounded("verify", self.inner.api.verify(&pending, code))
            .await
            .map_err(|e| match e {
                CoreError::InvalidVerificationCode { .. } | CoreError::RateLimited { .. } => e,
                other => unavailable(other),
            })?;

        let credential = Credential::new(pending, Utc::now());
        self.inner.live.rcu(|cur| AuthSnapshot {
            state: AuthState::Authenticated,
            credential: Some(credential.clone()),
            identity: cur.identity.clone(),
            pending: None,
            reauth_required: false,
        });
        self.inner.persist();
        info!("authentication complete");
        Ok(())
    }

    // ── Token access ─────────────────────────────────────────────

    /// The live token. Joins (or starts) the single in-flight refresh when
    /// the credential is `Expired`.
    pub async fn current_token(&self) -> Result<SecretString, CoreError> {
        self.acquire_token().await.map(|live| live.token)
    }

    pub(crate) async fn acquire_token(&self) -> Result<LiveToken, CoreError> {
        let snapshot = self.inner.live.load_full();
        match snapshot.state {
            AuthState::Authenticated => snapshot
                .credential
                .as_ref()
                .map(|c| LiveToken {
                    token: c.token.clone(),
                    refreshed: false,
                })
                .ok_or(CoreError::NotAuthenticated),
            AuthState::Expired if snapshot.reauth_required => {
                Err(CoreError::ReauthorizationRequired)
            }
            AuthState::Expired => self.refresh_single_flight().await.map(|token| LiveToken {
                token,
                refreshed: true,
            }),
            AuthState::Unauthenticated | AuthState::PendingVerification => {
                Err(snapshot.unavailable_error())
            }
        }
    }

    /// Non-blocking read of the token; `None` unless `Authenticated`.
    pub fn peek_token(&self) -> Option<SecretString> {
        let snapshot = self.inner.live.load();
        (snapshot.state == AuthState::Authenticated)
            .then(|| snapshot.credential.as_ref().map(|c| c.token.clone()))
            .flatten()
    }

    /// Authenticated → Expired. Idempotent; no effect in any other state.
    pub fn mark_expired(&self) {
        self.inner.expire_if(|_| true);
    }

    /// Expire only if `token` is still the live one, so a late failure on an
    /// old token cannot expire a credential that was already refreshed.
    pub fn mark_token_expired(&self, token: &SecretString) {
        self.inner
            .expire_if(|c| c.token.expose_secret() == token.expose_secret());
    }

    /// Upstream rejected a token that was just refreshed. Park the credential
    /// in `Expired` with reauthorization required so no further silent
    /// refresh is attempted. No effect if `token` is no longer the live one.
    pub fn require_reauthorization(&self, token: &SecretString) {
        let prev = self.inner.live.rcu(|cur| {
            let live = cur
                .credential
                .as_ref()
                .is_some_and(|c| c.token.expose_secret() == token.expose_secret());
            if live && matches!(cur.state, AuthState::Authenticated | AuthState::Expired) {
                AuthSnapshot {
                    state: AuthState::Expired,
                    reauth_required: true,
                    ..AuthSnapshot::clone(cur)
                }
            } else {
                AuthSnapshot::clone(cur)
            }
        });
        if !prev.reauth_required && self.inner.live.load().reauth_required {
            warn!("credential parked; reauthorization required");
        }
    }

    /// Silent re-run of the exchange using the stored credential.
    ///
    /// Fails with `ReauthorizationRequired` when upstream refuses, so the
    /// caller can collect a fresh code via `begin_authentication`.
    pub async fn reauthorize(&self) -> Result<(), CoreError> {
        let snapshot = self.inner.live.load_full();
        if snapshot.credential.is_none() {
            return Err(if snapshot.identity.is_some() {
                CoreError::ReauthorizationRequired
            } else {
                CoreError::NotAuthenticated
            });
        }

        self.inner.live.rcu(|cur| {
            let mut next = AuthSnapshot::clone(cur);
            if next.credential.is_some() {
                next.state = AuthState::Expired;
            }
            next.reauth_required = false;
            next
        });

        if self.state() != AuthState::Expired {
            return Err(CoreError::ReauthorizationRequired);
        }
        self.refresh_single_flight().await.map(|_| ())
    }

    // ── Status ───────────────────────────────────────────────────

    pub fn status(&self, now: DateTime<Utc>) -> AuthStatus {
        let snapshot = self.inner.live.load();
        let acquired_at = snapshot.credential.as_ref().map(|c| c.acquired_at);
        let age = acquired_at.map(|at| (now - at).to_std().unwrap_or_default());
        let token_age_hours = age.map(|a| (a.as_secs_f64() / 3600.0 * 100.0).round() / 100.0);

        AuthStatus {
            state: snapshot.state,
            identity: snapshot.identity.clone(),
            acquired_at,
            token_age_hours,
            stale: age.is_some_and(|a| a > self.inner.max_age),
            reauthorization_required: snapshot.reauth_required,
            verification_pending: snapshot.pending.is_some(),
        }
    }

    // ── Single-flight refresh ────────────────────────────────────

    async fn refresh_single_flight(&self) -> Result<SecretString, CoreError> {
        let flight = {
            let mut slot = self
                .inner
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if let Some(flight) = slot.as_ref() {
                flight.clone()
            } else {
                // A refresh may have committed between our state read and
                // taking the slot.
                let snapshot = self.inner.live.load();
                if snapshot.state == AuthState::Authenticated {
                    if let Some(c) = snapshot.credential.as_ref() {
                        return Ok(c.token.clone());
                    }
                }
                if snapshot.state != AuthState::Expired || snapshot.reauth_required {
                    return Err(snapshot.unavailable_error());
                }

                let inner = Arc::clone(&self.inner);
                let flight = async move { inner.run_refresh().await }.boxed().shared();
                *slot = Some(flight.clone());
                flight
            }
        };
        flight.await
    }
}

impl ManagerInner {
    /// Perform one refresh exchange and publish the outcome. Clears the
    /// in-flight slot after the new state is visible.
    async fn run_refresh(&self) -> Result<SecretString, CoreError> {
        let result = self.exchange().await;

        match &result {
            Ok(token) => {
                let credential = Credential::new(token.clone(), Utc::now());
                self.live.rcu(|cur| AuthSnapshot {
                    state: AuthState::Authenticated,
                    credential: Some(credential.clone()),
                    identity: cur.identity.clone(),
                    pending: cur.pending.clone(),
                    reauth_required: false,
                });
                self.persist();
                info!(token = %token_preview(token), "token refreshed");
            }
            Err(CoreError::ReauthorizationRequired) => {
                self.live.rcu(|cur| AuthSnapshot {
                    reauth_required: true,
                    ..AuthSnapshot::clone(cur)
                });
                warn!("silent refresh refused; reauthorization required");
            }
            Err(e) => warn!(error = %e, "token refresh failed; will retry on next use"),
        }

        *self.inflight.lock().unwrap_or_else(PoisonError::into_inner) = None;
        result
    }

    async fn exchange(&self) -> Result<SecretString, CoreError> {
        let Some(current) = self.live.load().credential.clone() else {
            return Err(CoreError::ReauthorizationRequired);
        };
        debug!(token = %token_preview(&current.token), "starting silent refresh");
        self.bounded("refresh", self.api.refresh(&current.token))
            .await
    }

    /// Run an upstream call under the configured timeout.
    async fn bounded<T>(
        &self,
        what: &'static str,
        call: impl Future<Output = Result<T, rackdash_api::Error>>,
    ) -> Result<T, CoreError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(CoreError::from),
            Err(_) => Err(CoreError::UpstreamUnavailable {
                reason: format!("{what} timed out after {}s", self.timeout.as_secs()),
            }),
        }
    }

    fn expire_if(&self, predicate: impl Fn(&Credential) -> bool) {
        let prev = self.live.rcu(|cur| {
            if cur.state == AuthState::Authenticated
                && cur.credential.as_ref().is_some_and(&predicate)
            {
                AuthSnapshot {
                    state: AuthState::Expired,
                    ..AuthSnapshot::clone(cur)
                }
            } else {
                AuthSnapshot::clone(cur)
            }
        });
        if prev.state == AuthState::Authenticated && self.live.load().state == AuthState::Expired {
            info!("credential marked expired");
        }
    }

    fn persist(&self) {
        let record = self.live.load().record();
        if let Err(e) = self.store.save(&record) {
            warn!(error = %e, "failed to persist credential");
        }
    }
}

/// Login and verify failures other than rate limiting surface as
/// `UpstreamUnavailable`; a 401 there means "bad request", not "expired".
fn unavailable(err: CoreError) -> CoreError {
    match err {
        CoreError::RateLimited { .. } | CoreError::UpstreamUnavailable { .. } => err,
        other => CoreError::UpstreamUnavailable {
            reason: other.to_string(),
        },
    }
}
