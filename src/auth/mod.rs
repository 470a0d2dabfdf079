//! Authentication module
//!
//! Provides the credential strategies (bearer token, OIDC session flow,
//! signed account cookie) and the pipeline that chains them.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::{Identity, Session};

pub mod bearer;
pub mod cookie;
pub mod oidc;

/// Authentication errors
///
/// Every variant is recovered inside the pipeline: a credential that
/// cannot be parsed or verified degrades to "no identity" and the next
/// strategy gets its turn.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Introspection error: {0}")]
    IntrospectionError(String),

    #[error("Token exchange error: {0}")]
    ExchangeError(String),

    #[error("Cookie parsing error: {0}")]
    CookieError(String),
}

/// Authentication request context
///
/// A transport-neutral view of the inbound request; header names and
/// cookie names are lowercased by the server layer.
#[derive(Debug, Default, Clone)]
pub struct AuthRequest {
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub query: Option<String>,
    pub method: String,
    pub path: String,
}

impl AuthRequest {
    /// Look up a query-string parameter, percent-decoded
    pub fn query_param(&self, key: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        for pair in query.split('&') {
            let mut kv = pair.splitn(2, '=');
            if kv.next() == Some(key) {
                let raw = kv.next().unwrap_or("");
                return Some(
                    percent_encoding::percent_decode_str(raw)
                        .decode_utf8_lossy()
                        .into_owned(),
                );
            }
        }
        None
    }
}

/// Build an [`Identity`] out of a JSON claims document using the
/// configured field names. The subject id falls back to the username
/// when the source provides none.
pub(crate) fn identity_from_claims(
    claims: &serde_json::Value,
    username_field: &str,
    groups_field: &str,
    openid_field: &str,
) -> Result<Identity, AuthError> {
    let username = claims
        .get(username_field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            AuthError::InvalidCredential(format!("Missing '{}' field", username_field))
        })?;

    let groups = claims
        .get(groups_field)
        .and_then(|v| v.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let openid = claims
        .get(openid_field)
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(Identity::new(username, groups, openid))
}

/// Authenticator strategy trait
///
/// `Ok(None)` means "no credential of this kind present" and is the
/// normal outcome for most requests; `Err` means a credential was
/// present but malformed. Neither stops the pipeline.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Strategy name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Attempt to extract an identity from the request
    async fn attempt(
        &self,
        request: &AuthRequest,
        session: &mut Session,
    ) -> Result<Option<Identity>, AuthError>;
}

/// Ordered chain of authentication strategies
///
/// Runs each strategy in configured order and stops at the first one
/// producing an identity, which is written to the session. A session
/// that already holds an identity short-circuits the whole chain so no
/// strategy makes a redundant remote call.
pub struct AuthenticationPipeline {
    strategies: Vec<Box<dyn Authenticator>>,
}

impl AuthenticationPipeline {
    pub fn new(strategies: Vec<Box<dyn Authenticator>>) -> Self {
        Self { strategies }
    }

    /// Authenticate the request, updating the session on success.
    ///
    /// Never fails: a request with no usable credential simply proceeds
    /// unauthenticated. Rejection is the authorizer's job, not ours.
    pub async fn authenticate(&self, request: &AuthRequest, session: &mut Session) {
        if session.is_authenticated() {
            debug!("Session already authenticated, skipping strategies");
            return;
        }

        for strategy in &self.strategies {
            match strategy.attempt(request, session).await {
                Ok(Some(identity)) => {
                    if identity.username.is_empty() {
                        warn!(strategy = strategy.name(), "Discarding identity with empty username");
                        continue;
                    }
                    debug!(
                        strategy = strategy.name(),
                        username = %identity.username,
                        "Authentication successful"
                    );
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_auth_attempt(strategy.name(), true);
                    session.set_identity(identity);
                    return;
                }
                Ok(None) => {
                    debug!(strategy = strategy.name(), "No credential present");
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Credential rejected");
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_auth_attempt(strategy.name(), false);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedAuthenticator {
        identity: Option<Identity>,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Authenticator for FixedAuthenticator {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn attempt(
            &self,
            _request: &AuthRequest,
            _session: &mut Session,
        ) -> Result<Option<Identity>, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthError::InvalidCredential("bad".into()));
            }
            Ok(self.identity.clone())
        }
    }

    fn fixed(identity: Option<Identity>, fail: bool) -> (Box<dyn Authenticator>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(FixedAuthenticator {
                identity,
                fail,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let (none, none_calls) = fixed(None, false);
        let (alice, _) = fixed(Some(Identity::new("alice", vec![], None)), false);
        let (bob, bob_calls) = fixed(Some(Identity::new("bob", vec![], None)), false);
        let pipeline = AuthenticationPipeline::new(vec![none, alice, bob]);

        let mut session = Session::default();
        pipeline.authenticate(&AuthRequest::default(), &mut session).await;

        assert_eq!(session.identity().unwrap().username, "alice");
        assert_eq!(none_calls.load(Ordering::SeqCst), 1);
        assert_eq!(bob_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_errors_degrade_to_next_strategy() {
        let (bad, _) = fixed(None, true);
        let (alice, _) = fixed(Some(Identity::new("alice", vec![], None)), false);
        let pipeline = AuthenticationPipeline::new(vec![bad, alice]);

        let mut session = Session::default();
        pipeline.authenticate(&AuthRequest::default(), &mut session).await;

        assert_eq!(session.identity().unwrap().username, "alice");
    }

    #[tokio::test]
    async fn test_no_strategy_success_leaves_unauthenticated() {
        let (none, _) = fixed(None, false);
        let (bad, _) = fixed(None, true);
        let pipeline = AuthenticationPipeline::new(vec![none, bad]);

        let mut session = Session::default();
        pipeline.authenticate(&AuthRequest::default(), &mut session).await;

        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_populated_session_skips_strategies() {
        let (alice, calls) = fixed(Some(Identity::new("alice", vec![], None)), false);
        let pipeline = AuthenticationPipeline::new(vec![alice]);

        let mut session = Session::default();
        session.set_identity(Identity::new("bob", vec![], None));
        pipeline.authenticate(&AuthRequest::default(), &mut session).await;

        assert_eq!(session.identity().unwrap().username, "bob");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_username_identity_skipped() {
        let empty = Identity {
            username: String::new(),
            groups: vec![],
            openid: "x".into(),
        };
        let (first, _) = fixed(Some(empty), false);
        let (alice, _) = fixed(Some(Identity::new("alice", vec![], None)), false);
        let pipeline = AuthenticationPipeline::new(vec![first, alice]);

        let mut session = Session::default();
        pipeline.authenticate(&AuthRequest::default(), &mut session).await;

        assert_eq!(session.identity().unwrap().username, "alice");
    }

    #[test]
    fn test_query_param_decoding() {
        let request = AuthRequest {
            query: Some("next=%2Fdata%2Ffile.nc&other=1".into()),
            ..Default::default()
        };
        assert_eq!(request.query_param("next").unwrap(), "/data/file.nc");
        assert_eq!(request.query_param("missing"), None);
    }
}
