//! Policy-engine authorization
//!
//! Queries an OPA-style policy server: the decision input is a JSON
//! document carrying the resource, the subject (or null for anonymous
//! callers), and the requested action; the rule's boolean `result`
//! carries the verdict, with a missing result defaulting to deny.

use super::{Authorizer, AuthzError};
use crate::config::OpaConfig;
use crate::resource::ResourceDescriptor;
use crate::session::Identity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Policy-engine authorizer
pub struct OpaAuthorizer {
    config: OpaConfig,
    client: reqwest::Client,
}

/// Decision-query input document
#[derive(Debug, Serialize)]
struct OpaInput<'a> {
    input: OpaInputData<'a>,
}

#[derive(Debug, Serialize)]
struct OpaInputData<'a> {
    resource: &'a str,
    subject: Option<OpaSubject<'a>>,
    action: &'static str,
}

#[derive(Debug, Serialize)]
struct OpaSubject<'a> {
    user: &'a str,
    groups: &'a [String],
}

/// Policy-engine response
#[derive(Debug, Deserialize)]
struct OpaResponse {
    result: Option<bool>,
}

impl OpaAuthorizer {
    /// Create a new policy-engine authorizer
    pub fn new(config: OpaConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        Self { config, client }
    }

    fn decision_url(&self) -> String {
        format!(
            "{}/v1/data/{}/{}",
            self.config.url.trim_end_matches('/'),
            self.config.package_path.trim_matches('/'),
            self.config.rule_name
        )
    }
}

#[async_trait]
impl Authorizer for OpaAuthorizer {
    #[tracing::instrument(name = "authz.opa", skip_all, fields(action = resource.action.as_str()))]
    async fn authorize(
        &self,
        subject: Option<&Identity>,
        resource: &ResourceDescriptor,
    ) -> Result<bool, AuthzError> {
        let input = OpaInput {
            input: OpaInputData {
                resource: &resource.uri,
                subject: subject.map(|identity| OpaSubject {
                    user: &identity.username,
                    groups: &identity.groups,
                }),
                action: resource.action.as_str(),
            },
        };

        debug!(url = %self.decision_url(), "Querying policy engine");

        let response = self
            .client
            .post(self.decision_url())
            .json(&input)
            .send()
            .await
            .map_err(|e| AuthzError::ServiceError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthzError::ServiceError(format!(
                "Policy engine returned status {}",
                response.status()
            )));
        }

        let opa_response: OpaResponse = response
            .json()
            .await
            .map_err(|e| AuthzError::ProtocolError(e.to_string()))?;

        // An unmatched rule yields no result; deny rather than guess
        let allowed = opa_response.result.unwrap_or(false);

        info!(
            decision = %if allowed { "allow" } else { "deny" },
            "Policy engine decision"
        );

        Ok(allowed)
    }
}
