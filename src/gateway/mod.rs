//! Request-level decision orchestration
//!
//! Ties exemption rules, the authentication pipeline, resource
//! resolution, and the decision client together into the single
//! allow/deny outcome the HTTP layer maps onto 200/401/403.

use tracing::debug;

use crate::auth::{AuthRequest, AuthenticationPipeline};
use crate::authz::{Authorizer, AuthzError};
use crate::config::GatewayConfig;
use crate::resource::ResourceResolver;
use crate::session::Session;

/// Final state of a request's access check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// Route is excluded from authorization checks
    Exempt,
    /// Nothing gate-worthy was asked for
    NoResource,
    /// Decision service permitted the access
    Permitted,
    /// Denied and no identity present
    DeniedUnauthenticated,
    /// Denied but the caller is a known user
    DeniedForbidden,
}

impl AccessOutcome {
    /// Whether the request should pass through to the protected resource
    pub fn allows(&self) -> bool {
        matches!(
            self,
            AccessOutcome::Exempt | AccessOutcome::NoResource | AccessOutcome::Permitted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessOutcome::Exempt => "exempt",
            AccessOutcome::NoResource => "no_resource",
            AccessOutcome::Permitted => "permitted",
            AccessOutcome::DeniedUnauthenticated => "denied_unauthenticated",
            AccessOutcome::DeniedForbidden => "denied_forbidden",
        }
    }
}

/// Decision orchestrator
pub struct Gateway {
    config: GatewayConfig,
    resolver: ResourceResolver,
    pipeline: AuthenticationPipeline,
    authorizer: Box<dyn Authorizer>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        resolver: ResourceResolver,
        pipeline: AuthenticationPipeline,
        authorizer: Box<dyn Authorizer>,
    ) -> Self {
        Self {
            config,
            resolver,
            pipeline,
            authorizer,
        }
    }

    pub fn pipeline(&self) -> &AuthenticationPipeline {
        &self.pipeline
    }

    pub fn resolver(&self) -> &ResourceResolver {
        &self.resolver
    }

    /// Whether a route is excluded from authorization checks
    pub fn is_exempt(&self, path: &str) -> bool {
        self.config
            .exempt_paths
            .iter()
            .any(|exempt| exempt == path)
            || self
                .config
                .exempt_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Run the full access check for one request.
    ///
    /// Exempt routes skip everything, including authentication. A
    /// decision-service failure propagates out — the caller must not
    /// mistake it for a permit or a deny.
    pub async fn check(
        &self,
        request: &AuthRequest,
        session: &mut Session,
    ) -> Result<AccessOutcome, AuthzError> {
        if self.is_exempt(&request.path) {
            debug!(path = %request.path, "Route is exempt from authorization");
            return Ok(self.record(AccessOutcome::Exempt));
        }

        self.pipeline.authenticate(request, session).await;

        let resource = match self.resolver.describe(request, session) {
            Some(resource) => resource,
            None => {
                debug!("No resource requested, passing through");
                return Ok(self.record(AccessOutcome::NoResource));
            }
        };

        // Stash the target so an interactive login can recover it after
        // the redirect round trip.
        self.resolver.save(session, &resource.uri);

        debug!(resource = %resource.uri, "Querying authorization decision");
        let permitted = self
            .authorizer
            .authorize(session.identity(), &resource)
            .await?;

        let outcome = if permitted {
            AccessOutcome::Permitted
        } else if session.is_authenticated() {
            AccessOutcome::DeniedForbidden
        } else {
            AccessOutcome::DeniedUnauthenticated
        };

        Ok(self.record(outcome))
    }

    fn record(&self, outcome: AccessOutcome) -> AccessOutcome {
        #[cfg(feature = "metrics")]
        crate::metrics::record_access_outcome(outcome.as_str());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, Authenticator};
    use crate::authz::{AllowAllAuthorizer, DenyAllAuthorizer};
    use crate::config::ResolverConfig;
    use crate::resource::ResourceDescriptor;
    use crate::session::Identity;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StaticIdentity(Option<Identity>);

    #[async_trait]
    impl Authenticator for StaticIdentity {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn attempt(
            &self,
            _request: &AuthRequest,
            _session: &mut Session,
        ) -> Result<Option<Identity>, AuthError> {
            Ok(self.0.clone())
        }
    }

    struct FailingAuthorizer;

    #[async_trait]
    impl Authorizer for FailingAuthorizer {
        async fn authorize(
            &self,
            _subject: Option<&Identity>,
            _resource: &ResourceDescriptor,
        ) -> Result<bool, AuthzError> {
            Err(AuthzError::ServiceError("connection refused".into()))
        }
    }

    fn gateway(identity: Option<Identity>, authorizer: Box<dyn Authorizer>) -> Gateway {
        Gateway::new(
            GatewayConfig::default(),
            ResourceResolver::new(&ResolverConfig::default()),
            AuthenticationPipeline::new(vec![Box::new(StaticIdentity(identity))]),
            authorizer,
        )
    }

    fn request(path: &str, resource: Option<&str>) -> AuthRequest {
        AuthRequest {
            headers: HashMap::new(),
            cookies: HashMap::new(),
            query: resource.map(|uri| format!("next={}", uri)),
            method: "GET".into(),
            path: path.into(),
        }
    }

    #[tokio::test]
    async fn test_exempt_route_skips_everything() {
        // A failing authorizer proves the decision client is never called
        let gateway = gateway(None, Box::new(FailingAuthorizer));
        let mut session = Session::default();

        let outcome = gateway
            .check(&request("/login", Some("/data")), &mut session)
            .await
            .unwrap();

        assert_eq!(outcome, AccessOutcome::Exempt);
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_exempt_prefix() {
        let mut config = GatewayConfig::default();
        config.exempt_prefixes = vec!["/static/".into()];
        let gateway = Gateway::new(
            config,
            ResourceResolver::new(&ResolverConfig::default()),
            AuthenticationPipeline::new(vec![]),
            Box::new(FailingAuthorizer),
        );

        let outcome = gateway
            .check(&request("/static/logo.png", None), &mut Session::default())
            .await
            .unwrap();
        assert_eq!(outcome, AccessOutcome::Exempt);
    }

    #[tokio::test]
    async fn test_no_resource_passes_through() {
        let gateway = gateway(None, Box::new(DenyAllAuthorizer));
        let outcome = gateway
            .check(&request("/verify", None), &mut Session::default())
            .await
            .unwrap();
        assert_eq!(outcome, AccessOutcome::NoResource);
    }

    #[tokio::test]
    async fn test_permit() {
        let identity = Identity::new("alice", vec![], None);
        let gateway = gateway(Some(identity), Box::new(AllowAllAuthorizer));
        let mut session = Session::default();

        let outcome = gateway
            .check(&request("/verify", Some("/data")), &mut session)
            .await
            .unwrap();

        assert_eq!(outcome, AccessOutcome::Permitted);
        assert_eq!(session.identity().unwrap().username, "alice");
        // The target is stashed for a potential login redirect
        assert_eq!(session.pending_resource(), Some("/data"));
    }

    #[tokio::test]
    async fn test_deny_authenticated_is_forbidden() {
        let identity = Identity::new("bob", vec![], None);
        let gateway = gateway(Some(identity), Box::new(DenyAllAuthorizer));

        let outcome = gateway
            .check(&request("/verify", Some("/data")), &mut Session::default())
            .await
            .unwrap();
        assert_eq!(outcome, AccessOutcome::DeniedForbidden);
    }

    #[tokio::test]
    async fn test_deny_unauthenticated_is_unauthenticated() {
        let gateway = gateway(None, Box::new(DenyAllAuthorizer));

        let outcome = gateway
            .check(&request("/verify", Some("/data")), &mut Session::default())
            .await
            .unwrap();
        assert_eq!(outcome, AccessOutcome::DeniedUnauthenticated);
    }

    #[tokio::test]
    async fn test_decision_failure_propagates() {
        let gateway = gateway(None, Box::new(FailingAuthorizer));

        let result = gateway
            .check(&request("/verify", Some("/data")), &mut Session::default())
            .await;
        assert!(matches!(result, Err(AuthzError::ServiceError(_))));
    }
}
