// Token exchange endpoints
//
// Two-step login: `POST /pro/login` issues an unverified token and sends a
// verification code out-of-band; `POST /login/verify` activates the token
// once the code is presented. `POST /login/refresh` swaps a still-known
// token for a fresh one without user interaction.

use secrecy::SecretString;
use serde_json::json;
use tracing::debug;

use crate::client::ApiClient;
use crate::error::Error;
use crate::models::{TokenData, VerifyData};

impl ApiClient {
    /// Request a verification challenge for `identity` (email or phone).
    ///
    /// `POST /pro/login` with `{"login": identity}`. Returns the unverified
    /// token that must accompany the verification code.
    pub async fn login(&self, identity: &str) -> Result<SecretString, Error> {
        let url = self.api_url("pro/login")?;
        debug!("requesting verification challenge");
        let data: TokenData = self
            .post_json(url, None, &json!({ "login": identity }))
            .await?;
        Ok(SecretString::from(data.user_token))
    }

    /// Activate `token` with the verification `code`.
    ///
    /// `POST /login/verify` (form body). A 4xx response or a payload that
    /// doesn't report the account as verified means the code was rejected.
    pub async fn verify(&self, token: &SecretString, code: &str) -> Result<(), Error> {
        let url = self.api_url("login/verify")?;
        debug!("verifying token");
        let result: Result<VerifyData, Error> = self.post_form(url, token, &[("code", code)]).await;

        match result {
            Ok(data) if data.is_verified() => {
                debug!("verification accepted");
                Ok(())
            }
            Ok(_) => Err(Error::InvalidVerificationCode {
                message: "account not reported as verified".into(),
            }),
            Err(Error::Authentication { message }) => {
                Err(Error::InvalidVerificationCode { message })
            }
            Err(Error::Api { status, message }) if (400..500).contains(&status) => {
                Err(Error::InvalidVerificationCode {
                    message: format!("HTTP {status}: {message}"),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Exchange `token` for a fresh one without a verification code.
    ///
    /// `POST /login/refresh`. Fails with `Error::Authentication` when the
    /// upstream no longer honours the token for silent refresh.
    pub async fn refresh(&self, token: &SecretString) -> Result<SecretString, Error> {
        let url = self.api_url("login/refresh")?;
        debug!("refreshing token");
        let result: Result<TokenData, Error> = self.post_json(url, Some(token), &json!({})).await;
        match result {
            Ok(data) => Ok(SecretString::from(data.user_token)),
            Err(Error::Api { status: 404, message }) => Err(Error::Authentication {
                message: format!("silent refresh unavailable: {message}"),
            }),
            Err(e) => Err(e),
        }
    }
}
