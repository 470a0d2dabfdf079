//! Bearer-token authentication
//!
//! Tokens are opaque to the gateway; each one is validated by POSTing it
//! to a remote OAuth2 token-introspection endpoint and reading the
//! account data from the response.

use super::{identity_from_claims, AuthError, AuthRequest, Authenticator};
use crate::config::BearerConfig;
use crate::session::{Identity, Session};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Bearer-token authenticator
///
/// Requires `Authorization: Bearer <token>`; a missing or malformed
/// header means the strategy simply does not apply.
pub struct BearerAuthenticator {
    config: BearerConfig,
    client: reqwest::Client,
}

impl BearerAuthenticator {
    pub fn new(config: BearerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        Self { config, client }
    }

    /// Extract the bearer token from the request, if any
    fn extract_token(&self, request: &AuthRequest) -> Option<String> {
        let auth = request.headers.get("authorization")?;
        let token = auth.strip_prefix("Bearer ")?.trim();
        if token.is_empty() {
            return None;
        }
        Some(token.to_string())
    }

    /// Call the introspection endpoint and return the token's claims.
    ///
    /// A non-200 response, an unparseable body, or `active: false` are
    /// all credential failures; the caller degrades them to "no
    /// identity".
    async fn introspect(&self, token: &str) -> Result<serde_json::Value, AuthError> {
        let response = self
            .client
            .post(&self.config.introspection_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("token", token),
            ])
            .send()
            .await
            .map_err(|e| AuthError::IntrospectionError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::IntrospectionError(format!(
                "Introspection endpoint returned status {}",
                response.status()
            )));
        }

        let claims: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::IntrospectionError(e.to_string()))?;

        if !claims.get("active").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(AuthError::InvalidCredential("Token is not active".into()));
        }

        Ok(claims)
    }
}

#[async_trait]
impl Authenticator for BearerAuthenticator {
    fn name(&self) -> &'static str {
        "bearer"
    }

    #[tracing::instrument(name = "auth.bearer", skip_all)]
    async fn attempt(
        &self,
        request: &AuthRequest,
        _session: &mut Session,
    ) -> Result<Option<Identity>, AuthError> {
        let token = match self.extract_token(request) {
            Some(token) => token,
            None => return Ok(None),
        };

        debug!("Found bearer token, querying introspection endpoint");
        let claims = self.introspect(&token).await?;

        let identity = identity_from_claims(
            &claims,
            &self.config.username_field,
            &self.config.groups_field,
            &self.config.openid_field,
        )?;

        Ok(Some(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn authenticator() -> BearerAuthenticator {
        BearerAuthenticator::new(BearerConfig {
            introspection_url: "http://localhost:1/introspect".into(),
            client_id: "gateway".into(),
            client_secret: "secret".into(),
            username_field: "preferred_username".into(),
            groups_field: "groups".into(),
            openid_field: "openid".into(),
            timeout_secs: 1,
        })
    }

    fn request_with_auth(value: &str) -> AuthRequest {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), value.to_string());
        AuthRequest {
            headers,
            method: "GET".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_header_is_not_an_error() {
        let mut session = Session::default();
        let result = authenticator()
            .attempt(&AuthRequest::default(), &mut session)
            .await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_not_an_error() {
        let mut session = Session::default();
        let result = authenticator()
            .attempt(&request_with_auth("Basic dXNlcjpwdw=="), &mut session)
            .await;
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_extract_token() {
        let auth = authenticator();
        let token = auth.extract_token(&request_with_auth("Bearer abc123"));
        assert_eq!(token, Some("abc123".to_string()));

        assert_eq!(auth.extract_token(&request_with_auth("Bearer ")), None);
    }
}
