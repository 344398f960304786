// Upstream API HTTP client
//
// Wraps `reqwest::Client` with URL construction, token header attachment,
// envelope unwrapping, and response classification. Endpoint groups
// (auth, devices, speedtest) are implemented as inherent methods in
// separate files to keep this module focused on transport mechanics.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::{DEFAULT_RETRY_AFTER_SECS, Error};
use crate::models::Envelope;
use crate::transport::TransportConfig;

/// Header carrying the user token on every authenticated call.
pub const TOKEN_HEADER: &str = "X-User-Token";

/// Raw HTTP client for the vendor cloud API.
///
/// Stateless with respect to credentials: every authenticated method takes
/// the token to attach. Cheap to clone (the inner `reqwest::Client` is
/// reference-counted).
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl ApiClient {
    /// Create a client for `base_url` (e.g. `https://api-user.e2ro.com/2.2`).
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            timeout: transport.timeout,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            timeout: TransportConfig::default().timeout,
        }
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a full URL: `{base}/{path}`. The base may carry a version
    /// prefix (`/2.2`), so paths are appended rather than joined.
    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    /// Build a network-scoped URL: `{base}/networks/{network_id}/{path}`.
    pub(crate) fn network_url(&self, network_id: &str, path: &str) -> Result<Url, Error> {
        self.api_url(&format!("networks/{network_id}/{path}"))
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn attach_token(
        builder: reqwest::RequestBuilder,
        token: Option<&SecretString>,
    ) -> reqwest::RequestBuilder {
        match token {
            Some(token) => builder.header(TOKEN_HEADER, token.expose_secret()),
            None => builder,
        }
    }

    /// Send a GET request and unwrap the envelope.
    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        token: &SecretString,
    ) -> Result<T, Error> {
        debug!("GET {}", url);
        let builder = Self::attach_token(self.http.get(url), Some(token));
        let resp = builder.send().await.map_err(|e| self.map_send_error(e))?;
        self.parse_envelope(resp).await
    }

    /// Send a POST request with a JSON body and unwrap the envelope.
    pub(crate) async fn post_json<T: DeserializeOwned>(
        &self,
        url: Url,
        token: Option<&SecretString>,
        body: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        debug!("POST {}", url);
        let builder = Self::attach_token(self.http.post(url).json(body), token);
        let resp = builder.send().await.map_err(|e| self.map_send_error(e))?;
        self.parse_envelope(resp).await
    }

    /// Send a POST request with a form body and unwrap the envelope.
    pub(crate) async fn post_form<T: DeserializeOwned>(
        &self,
        url: Url,
        token: &SecretString,
        form: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        debug!("POST (form) {}", url);
        let builder = Self::attach_token(self.http.post(url).form(form), Some(token));
        let resp = builder.send().await.map_err(|e| self.map_send_error(e))?;
        self.parse_envelope(resp).await
    }

    fn map_send_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            Error::Transport(err)
        }
    }

    /// Classify the response and decode `data` on success.
    async fn parse_envelope<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();

        if let Some(err) = classify_status(status, resp.headers()) {
            let body = resp.text().await.unwrap_or_default();
            trace!(%status, body = %preview(&body), "upstream rejected request");
            return Err(match err {
                Error::Api { status, .. } => Error::Api {
                    status,
                    message: preview(&body).to_owned(),
                },
                other => other,
            });
        }

        let body = resp.text().await.map_err(|e| self.map_send_error(e))?;

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            Error::Deserialization {
                message: format!("{e} (body preview: {:?})", preview(&body)),
                body: body.clone(),
            }
        })?;

        if let Some(message) = envelope.meta.error {
            return Err(match envelope.meta.code {
                Some(401 | 403) => Error::Authentication { message },
                Some(429) => Error::RateLimited {
                    retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
                },
                code => Error::Api {
                    status: code.unwrap_or(status.as_u16()),
                    message,
                },
            });
        }

        Ok(envelope.data)
    }
}

/// Map an HTTP status to a failure class, or `None` for success.
///
/// 401/403 mean the token is no longer accepted; 429 carries the upstream's
/// `Retry-After` (seconds) or a fixed default.
pub fn classify_status(status: StatusCode, headers: &HeaderMap) -> Option<Error> {
    match status {
        s if s.is_success() => None,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(Error::Authentication {
            message: format!("token rejected (HTTP {status})"),
        }),
        StatusCode::TOO_MANY_REQUESTS => Some(Error::RateLimited {
            retry_after_secs: retry_after(headers).unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        }),
        s => Some(Error::Api {
            status: s.as_u16(),
            message: String::new(),
        }),
    }
}

fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
