//! OpenID Connect authentication
//!
//! The interactive half of the gateway: `/login` redirects the browser
//! to the provider's authorization endpoint with a fresh state value
//! stashed in the session, and the strategy here completes the
//! handshake on `/login/callback` by exchanging the code for a token
//! and reading the userinfo record.

use super::{identity_from_claims, AuthError, AuthRequest, Authenticator};
use crate::config::OidcConfig;
use crate::session::{Identity, OidcHandshake, Session};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Token response from the provider's token endpoint
#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Minimal OpenID Connect relying-party client
///
/// Endpoints are configured explicitly; everything beyond the three
/// extracted account fields is treated as opaque provider data.
pub struct OidcClient {
    config: OidcConfig,
    client: reqwest::Client,
}

impl OidcClient {
    pub fn new(config: OidcConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        Self { config, client }
    }

    /// Begin a handshake: returns the provider redirect URL and the
    /// state record to stash in the session.
    pub fn begin_handshake(&self) -> (String, OidcHandshake) {
        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = self.authorization_url(&state);
        (url, OidcHandshake { state })
    }

    /// Build the authorization-code redirect URL
    fn authorization_url(&self, state: &str) -> String {
        let encode = |s: &str| utf8_percent_encode(s, NON_ALPHANUMERIC).to_string();
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.config.authorization_endpoint,
            encode(&self.config.client_id),
            encode(&self.config.callback_url),
            encode(&self.config.scopes),
            encode(state),
        )
    }

    /// Exchange an authorization code for an access token
    async fn exchange_code(&self, code: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .post(&self.config.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::ExchangeError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::ExchangeError(format!(
                "Token endpoint returned status {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::ExchangeError(e.to_string()))?;

        Ok(token.access_token)
    }

    /// Fetch the userinfo record for an access token
    async fn fetch_userinfo(&self, access_token: &str) -> Result<serde_json::Value, AuthError> {
        let response = self
            .client
            .get(&self.config.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::ExchangeError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::ExchangeError(format!(
                "Userinfo endpoint returned status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::ExchangeError(e.to_string()))
    }
}

/// OIDC session-flow authenticator
///
/// Only applicable mid-callback: without a handshake record in the
/// session this request is not part of an active login and the strategy
/// passes. A state mismatch is a normal "login did not complete"
/// outcome, never an error.
pub struct OidcAuthenticator {
    client: Arc<OidcClient>,
}

impl OidcAuthenticator {
    pub fn new(client: Arc<OidcClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Authenticator for OidcAuthenticator {
    fn name(&self) -> &'static str {
        "oidc"
    }

    #[tracing::instrument(name = "auth.oidc", skip_all)]
    async fn attempt(
        &self,
        request: &AuthRequest,
        session: &mut Session,
    ) -> Result<Option<Identity>, AuthError> {
        // The handshake is single-use regardless of how the callback
        // turns out.
        let handshake = match session.take_oidc_handshake() {
            Some(handshake) => handshake,
            None => {
                debug!("No handshake in session, not an OIDC callback");
                return Ok(None);
            }
        };

        let state = request.query_param("state").unwrap_or_default();
        if state != handshake.state {
            warn!("Mismatching state while completing OIDC handshake");
            return Ok(None);
        }

        let code = match request.query_param("code") {
            Some(code) if !code.is_empty() => code,
            _ => {
                warn!("Provider callback carried no authorization code");
                return Ok(None);
            }
        };

        let access_token = self.client.exchange_code(&code).await?;
        let userinfo = self.client.fetch_userinfo(&access_token).await?;

        let identity = identity_from_claims(
            &userinfo,
            &self.client.config.username_field,
            &self.client.config.groups_field,
            &self.client.config.openid_field,
        )?;

        Ok(Some(identity))
    }
}
