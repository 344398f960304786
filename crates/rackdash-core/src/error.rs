// ── Core error types ──
//
// User-facing errors from rackdash-core. Consumers never see HTTP status
// codes or JSON parse failures directly: the `From<rackdash_api::Error>`
// impl translates transport-layer errors into this taxonomy.
//
// `CoreError` is `Clone` so a single in-flight token exchange can hand the
// same outcome to every waiter.

use std::time::Duration;

use rackdash_api::ErrorClass;
use rackdash_api::error::DEFAULT_RETRY_AFTER_SECS;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    // ── Credential lifecycle ─────────────────────────────────────────
    #[error("Not authenticated -- complete the verification flow first")]
    NotAuthenticated,

    #[error("Verification code rejected: {message}")]
    InvalidVerificationCode { message: String },

    #[error("Reauthorization required -- a new verification code must be collected")]
    ReauthorizationRequired,

    // ── Upstream ─────────────────────────────────────────────────────
    #[error("Upstream unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    #[error("Rate limited by upstream -- retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("Malformed upstream data: {message}")]
    Malformed { message: String },

    // ── Speed test ───────────────────────────────────────────────────
    #[error("A speed test is already running")]
    AlreadyRunning,

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Returns `true` if the error requires a person to re-enter the
    /// verification flow before polling can resume.
    pub fn needs_user(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::ReauthorizationRequired)
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<rackdash_api::Error> for CoreError {
    fn from(err: rackdash_api::Error) -> Self {
        match err {
            rackdash_api::Error::InvalidVerificationCode { message } => {
                CoreError::InvalidVerificationCode { message }
            }
            rackdash_api::Error::Authentication { .. } => CoreError::ReauthorizationRequired,
            rackdash_api::Error::RateLimited { retry_after_secs } => CoreError::RateLimited {
                retry_after: Duration::from_secs(retry_after_secs),
            },
            rackdash_api::Error::Deserialization { message, body: _ } => {
                CoreError::Malformed { message }
            }
            rackdash_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            other => match other.class() {
                ErrorClass::Malformed => CoreError::Malformed {
                    message: other.to_string(),
                },
                ErrorClass::RateLimited => CoreError::RateLimited {
                    retry_after: Duration::from_secs(
                        other.retry_after_secs().unwrap_or(DEFAULT_RETRY_AFTER_SECS),
                    ),
                },
                _ => CoreError::UpstreamUnavailable {
                    reason: other.to_string(),
                },
            },
        }
    }
}
