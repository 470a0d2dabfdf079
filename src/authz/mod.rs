//! Authorization module
//!
//! Provides the decision-service clients: a SAML attribute-query
//! backend speaking SOAP, and an OPA-style policy-engine backend
//! speaking JSON. Both are stateless per call — decisions are never
//! cached, since a resource's authorization can change between
//! requests.

use async_trait::async_trait;
use thiserror::Error;

use crate::resource::ResourceDescriptor;
use crate::session::Identity;

pub mod opa;
pub mod saml;

/// Authorization errors
///
/// None of these are recovered per request: a failing or indeterminate
/// decision service means the security control itself is broken, which
/// must stay distinguishable from a legitimate deny.
#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("Decision service error: {0}")]
    ServiceError(String),

    #[error("Malformed decision response: {0}")]
    ProtocolError(String),

    #[error("Decision service returned an indeterminate decision")]
    IndeterminateDecision,
}

/// Verdict returned by the decision service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Permit,
    Deny,
    Indeterminate,
}

impl Decision {
    /// Total mapping from decision to outcome: Permit allows, Deny
    /// denies, Indeterminate raises. There is no code that silently
    /// defaults to either boolean.
    pub fn into_permitted(self) -> Result<bool, AuthzError> {
        match self {
            Decision::Permit => Ok(true),
            Decision::Deny => Ok(false),
            Decision::Indeterminate => Err(AuthzError::IndeterminateDecision),
        }
    }
}

/// Authorizer trait
///
/// `subject` is `None` for unauthenticated callers; backends query the
/// decision service as an anonymous subject in that case.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Check whether the subject may access the resource
    async fn authorize(
        &self,
        subject: Option<&Identity>,
        resource: &ResourceDescriptor,
    ) -> Result<bool, AuthzError>;
}

/// No-op authorizer that always allows
pub struct AllowAllAuthorizer;

#[async_trait]
impl Authorizer for AllowAllAuthorizer {
    async fn authorize(
        &self,
        _subject: Option<&Identity>,
        _resource: &ResourceDescriptor,
    ) -> Result<bool, AuthzError> {
        Ok(true)
    }
}

/// No-op authorizer that always denies
pub struct DenyAllAuthorizer;

#[async_trait]
impl Authorizer for DenyAllAuthorizer {
    async fn authorize(
        &self,
        _subject: Option<&Identity>,
        _resource: &ResourceDescriptor,
    ) -> Result<bool, AuthzError> {
        Ok(false)
    }
}
