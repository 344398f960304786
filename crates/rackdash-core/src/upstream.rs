// ── Credential-aware upstream gateway ──
//
// Every authenticated call goes through `Gateway::call`: fetch the live
// token, run the call under a hard timeout, classify failures, and apply
// `retry_policy`. An auth failure expires the token and repeats the call
// exactly once with a fresh one; nothing else is retried inline. A rejected
// fresh token parks the credential until someone reauthorizes.

use std::time::Duration;

use secrecy::SecretString;
use tracing::{debug, warn};

use rackdash_api::error::DEFAULT_RETRY_AFTER_SECS;
use rackdash_api::{ApiClient, ErrorClass};

use crate::credential::CredentialManager;
use crate::error::CoreError;

/// What to do after a failed upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Expire the token, obtain a fresh one, repeat the call once.
    RefreshAndRetry,
    /// Give up on this call. Wait at least `backoff` before the next one.
    Skip { backoff: Option<Duration> },
    /// The fresh token was rejected too; a person has to reauthorize.
    Reauthorize,
}

/// Retry policy as a pure function of the failure class and the number of
/// attempts already made.
pub fn retry_policy(
    class: ErrorClass,
    attempt: u32,
    retry_after: Option<Duration>,
) -> RetryDecision {
    match class {
        ErrorClass::AuthFailure if attempt == 0 => RetryDecision::RefreshAndRetry,
        ErrorClass::AuthFailure => RetryDecision::Reauthorize,
        ErrorClass::RateLimited => RetryDecision::Skip {
            backoff: Some(
                retry_after.unwrap_or(Duration::from_secs(DEFAULT_RETRY_AFTER_SECS)),
            ),
        },
        ErrorClass::Malformed | ErrorClass::NetworkError | ErrorClass::Rejected => {
            RetryDecision::Skip { backoff: None }
        }
    }
}

/// Pairs the stateless `ApiClient` with the credential lifecycle.
#[derive(Clone)]
pub struct Gateway {
    api: ApiClient,
    credentials: CredentialManager,
    timeout: Duration,
}

impl Gateway {
    pub fn new(api: ApiClient, credentials: CredentialManager, timeout: Duration) -> Self {
        Self {
            api,
            credentials,
            timeout,
        }
    }

    /// Run `op` with the live token.
    ///
    /// `op` receives owned handles so the returned future can be `'static`.
    pub async fn call<T, F, Fut>(&self, what: &'static str, op: F) -> Result<T, CoreError>
    where
        F: Fn(ApiClient, SecretString) -> Fut,
        Fut: Future<Output = Result<T, rackdash_api::Error>>,
    {
        let mut attempt = 0;
        loop {
            let live = self.credentials.acquire_token().await?;
            if live.refreshed {
                // A token minted for this call counts as the retry.
                attempt = attempt.max(1);
            }
            let token = live.token;

            let err = match tokio::time::timeout(self.timeout, op(self.api.clone(), token.clone()))
                .await
            {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => rackdash_api::Error::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                },
            };

            let retry_after = err.retry_after_secs().map(Duration::from_secs);
            match retry_policy(err.class(), attempt, retry_after) {
                RetryDecision::RefreshAndRetry => {
                    debug!(call = what, error = %err, "token rejected; refreshing and retrying once");
                    self.credentials.mark_token_expired(&token);
                    attempt += 1;
                }
                RetryDecision::Reauthorize => {
                    warn!(call = what, "fresh token rejected; reauthorization required");
                    self.credentials.require_reauthorization(&token);
                    return Err(CoreError::ReauthorizationRequired);
                }
                RetryDecision::Skip { backoff } => {
                    debug!(call = what, error = %err, ?backoff, "upstream call failed");
                    return Err(match backoff {
                        Some(retry_after) => CoreError::RateLimited { retry_after },
                        None => CoreError::from(err),
                    });
                }
            }
        }
    }
}
