//! Requested-resource derivation
//!
//! The proxy forwards each request with the original target either in a
//! query parameter or an injected header; an interactive login stashes
//! it in the session to survive the redirect round trip. This module
//! reconstructs the canonical resource URI and tags it with the action
//! implied by the HTTP method.

use crate::auth::AuthRequest;
use crate::config::ResolverConfig;
use crate::session::Session;

/// Access mode requested for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
}

impl Action {
    /// Map an HTTP method to an action; only mutating methods are writes
    pub fn from_method(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "POST" | "PUT" | "PATCH" | "DELETE" => Action::Write,
            _ => Action::Read,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "Read",
            Action::Write => "Write",
        }
    }
}

/// The protected resource being requested
///
/// Built fresh per request from proxy-supplied input; treated as
/// attacker-influenced and validated only for well-formedness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub action: Action,
}

/// Derives the canonical URI of the originally requested resource
pub struct ResourceResolver {
    query_key: String,
    header_key: String,
    resource_server_uri: String,
}

impl ResourceResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            query_key: config.query_key.clone(),
            header_key: config.header_key.to_lowercase(),
            resource_server_uri: config.resource_server_uri.clone(),
        }
    }

    /// Resolve the requested resource URI.
    ///
    /// Checks, in strict priority order: the configured query parameter,
    /// the proxy-injected header (joined onto the resource-server base),
    /// then the session stash. First non-empty match wins; a pure read
    /// with no side effects, so repeated calls agree.
    pub fn resolve(&self, request: &AuthRequest, session: &Session) -> Option<String> {
        if let Some(uri) = request.query_param(&self.query_key) {
            if !uri.is_empty() {
                return Some(uri);
            }
        }

        if let Some(path) = request.headers.get(&self.header_key) {
            if !path.is_empty() {
                return Some(self.join_resource_uri(path));
            }
        }

        session.pending_resource().map(|uri| uri.to_string())
    }

    /// Resolve and tag with the action implied by the request method
    pub fn describe(&self, request: &AuthRequest, session: &Session) -> Option<ResourceDescriptor> {
        self.resolve(request, session).map(|uri| ResourceDescriptor {
            uri,
            action: Action::from_method(&request.method),
        })
    }

    /// Stash a resource URI in the session, overwriting any previous one.
    ///
    /// Called right before redirecting to an interactive login so the
    /// callback can recover the original target.
    pub fn save(&self, session: &mut Session, uri: &str) {
        session.set_pending_resource(uri);
    }

    fn join_resource_uri(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.resource_server_uri.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
