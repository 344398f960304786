//! Error types for the binary: miette diagnostics for startup failures and
//! HTTP responses for request handlers.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use rackdash_config::ConfigError;
use rackdash_core::CoreError;

// ── Exit codes ───────────────────────────────────────────────────────

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const BIND: i32 = 3;
}

// ── Startup ──────────────────────────────────────────────────────────

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("Configuration error")]
    #[diagnostic(
        code(rackdash::config),
        help(
            "Check the config file at {path}.\n\
             Every value can also be overridden with RACKDASH_* environment variables."
        )
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("Could not start the telemetry engine")]
    #[diagnostic(code(rackdash::engine))]
    Engine(#[source] CoreError),

    #[error("Could not listen on {addr}")]
    #[diagnostic(
        code(rackdash::bind),
        help("Is another process using the port? Override with --bind or server.bind.")
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server failed")]
    #[diagnostic(code(rackdash::server))]
    Server(#[source] std::io::Error),

    #[error("Failed to render configuration")]
    #[diagnostic(code(rackdash::render))]
    Render(#[from] toml::ser::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => exit_code::USAGE,
            Self::Bind { .. } => exit_code::BIND,
            _ => exit_code::GENERAL,
        }
    }
}

// ── HTTP ─────────────────────────────────────────────────────────────

/// Error returned by request handlers.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Core(e) => match e {
                CoreError::NotAuthenticated | CoreError::ReauthorizationRequired => {
                    StatusCode::UNAUTHORIZED
                }
                CoreError::InvalidVerificationCode { .. } | CoreError::Config { .. } => {
                    StatusCode::BAD_REQUEST
                }
                CoreError::AlreadyRunning => StatusCode::CONFLICT,
                CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                CoreError::UpstreamUnavailable { .. } | CoreError::Malformed { .. } => {
                    StatusCode::BAD_GATEWAY
                }
            },
            Self::BadRequest(_)
            | Self::Config(ConfigError::Validation { .. } | ConfigError::UnknownEnvironment { .. }) => {
                StatusCode::BAD_REQUEST
            }
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Core(e) => match e {
                CoreError::NotAuthenticated => "not_authenticated",
                CoreError::InvalidVerificationCode { .. } => "invalid_verification_code",
                CoreError::ReauthorizationRequired => "reauthorization_required",
                CoreError::UpstreamUnavailable { .. } => "upstream_unavailable",
                CoreError::RateLimited { .. } => "rate_limited",
                CoreError::Malformed { .. } => "malformed",
                CoreError::AlreadyRunning => "already_running",
                CoreError::Config { .. } => "invalid_config",
            },
            Self::BadRequest(_) => "bad_request",
            Self::Config(_) => "config",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));
        let mut response = (status, body).into_response();
        if let Self::Core(CoreError::RateLimited { retry_after }) = &self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after.as_secs()));
        }
        response
    }
}
