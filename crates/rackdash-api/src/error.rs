// Upstream error type and its coarse classification

use thiserror::Error;

/// Default backoff when the upstream rate-limits without a `Retry-After` hint.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Top-level error type for the `rackdash-api` crate.
///
/// Covers every failure mode of the upstream cloud API: authentication,
/// transport, rate limiting, and payload decoding. `rackdash-core` maps
/// these into its own domain taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The token was rejected (HTTP 401/403 or an auth error envelope).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The verification code was not accepted by the verify endpoint.
    #[error("Verification code rejected: {message}")]
    InvalidVerificationCode { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Rate limited by the cloud API. Includes retry-after in seconds.
    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ── API ─────────────────────────────────────────────────────────
    /// Non-success status that is neither auth nor rate limiting.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

/// Coarse outcome class of a failed upstream call.
///
/// Callers branch on this instead of individual variants when deciding
/// whether to refresh the credential, back off, or skip a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    AuthFailure,
    RateLimited,
    Malformed,
    NetworkError,
    Rejected,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Authentication { .. } | Self::InvalidVerificationCode { .. } => {
                ErrorClass::AuthFailure
            }
            Self::RateLimited { .. } => ErrorClass::RateLimited,
            Self::Deserialization { .. } => ErrorClass::Malformed,
            Self::Transport(e) if e.is_decode() => ErrorClass::Malformed,
            Self::Transport(_) | Self::Timeout { .. } => ErrorClass::NetworkError,
            Self::InvalidUrl(_) | Self::Api { .. } => ErrorClass::Rejected,
        }
    }

    /// Backoff suggested by the upstream, if this is a rate-limit error.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
