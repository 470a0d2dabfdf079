//! SAML attribute-query authorization
//!
//! Sends a SAML 2.0 `AuthzDecisionQuery` to the decision service over a
//! SOAP 1.1 binding and maps the decision code of the first
//! authorization statement in the response. An `Indeterminate` decision
//! is an error, not a deny — it signals a broken decision service and
//! must stay visible.

use super::{Authorizer, AuthzError, Decision};
use crate::config::SamlConfig;
use crate::resource::ResourceDescriptor;
use crate::session::Identity;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::time::Duration;
use tracing::{debug, info};

const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SAMLP_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
const SAML_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
const ISSUER_FORMAT: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:X509SubjectName";
const NAMEID_FORMAT: &str = "urn:esg:openid";
const ACTION_NS: &str = "urn:oasis:names:tc:SAML:1.0:action:rwedc";

/// SAML decision-query authorizer
pub struct SamlAuthorizer {
    config: SamlConfig,
    client: reqwest::Client,
}

impl SamlAuthorizer {
    /// Create a new SAML authorizer
    pub fn new(config: SamlConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        Self { config, client }
    }

    /// Build the SOAP envelope for a decision query.
    ///
    /// Subject NameID is the caller's openid, or empty for anonymous
    /// queries; the single Action is Read or Write in the rwedc
    /// namespace.
    fn build_query(&self, subject: Option<&Identity>, resource: &ResourceDescriptor) -> String {
        let query_id = uuid::Uuid::new_v4();
        let issue_instant = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let name_id = subject.map(|identity| identity.openid.as_str()).unwrap_or("");

        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<soap11:Envelope xmlns:soap11="{soap}">"#,
                r#"<soap11:Body>"#,
                r#"<samlp:AuthzDecisionQuery xmlns:samlp="{samlp}" ID="{id}" Version="2.0" IssueInstant="{instant}" Resource="{resource}">"#,
                r#"<saml:Issuer xmlns:saml="{saml}" Format="{issuer_format}">{issuer}</saml:Issuer>"#,
                r#"<saml:Subject xmlns:saml="{saml}">"#,
                r#"<saml:NameID Format="{nameid_format}">{name_id}</saml:NameID>"#,
                r#"</saml:Subject>"#,
                r#"<saml:Action xmlns:saml="{saml}" Namespace="{action_ns}">{action}</saml:Action>"#,
                r#"</samlp:AuthzDecisionQuery>"#,
                r#"</soap11:Body>"#,
                r#"</soap11:Envelope>"#
            ),
            soap = SOAP_NS,
            samlp = SAMLP_NS,
            saml = SAML_NS,
            id = query_id,
            instant = issue_instant,
            resource = escape(&resource.uri),
            issuer_format = ISSUER_FORMAT,
            issuer = escape(&self.config.issuer),
            nameid_format = NAMEID_FORMAT,
            name_id = escape(name_id),
            action_ns = ACTION_NS,
            action = resource.action.as_str(),
        )
    }

    /// Extract the first decision statement's code from a response
    /// envelope.
    fn parse_decision(&self, body: &str) -> Result<Decision, AuthzError> {
        let mut reader = Reader::from_str(body);

        loop {
            match reader.read_event() {
                Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                    if element.local_name().as_ref() != b"AuthzDecisionStatement" {
                        continue;
                    }
                    for attribute in element.attributes().flatten() {
                        if attribute.key.local_name().as_ref() == b"Decision" {
                            let value = attribute.unescape_value().map_err(|e| {
                                AuthzError::ProtocolError(format!("Bad Decision attribute: {}", e))
                            })?;
                            return match value.as_ref() {
                                "Permit" => Ok(Decision::Permit),
                                "Deny" => Ok(Decision::Deny),
                                "Indeterminate" => Ok(Decision::Indeterminate),
                                other => Err(AuthzError::ProtocolError(format!(
                                    "Unknown decision code '{}'",
                                    other
                                ))),
                            };
                        }
                    }
                    return Err(AuthzError::ProtocolError(
                        "Decision statement has no Decision attribute".into(),
                    ));
                }
                Ok(Event::Eof) => {
                    return Err(AuthzError::ProtocolError(
                        "Response contains no decision statement".into(),
                    ));
                }
                Err(e) => {
                    return Err(AuthzError::ProtocolError(format!(
                        "Failed to parse response envelope: {}",
                        e
                    )));
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl Authorizer for SamlAuthorizer {
    #[tracing::instrument(name = "authz.saml", skip_all, fields(action = resource.action.as_str()))]
    async fn authorize(
        &self,
        subject: Option<&Identity>,
        resource: &ResourceDescriptor,
    ) -> Result<bool, AuthzError> {
        let envelope = self.build_query(subject, resource);

        debug!(url = %self.config.service_url, "Sending decision query");

        let response = self
            .client
            .post(&self.config.service_url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", "\"\"")
            .body(envelope)
            .send()
            .await
            .map_err(|e| AuthzError::ServiceError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthzError::ServiceError(format!(
                "Decision service returned status {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AuthzError::ServiceError(e.to_string()))?;

        let decision = self.parse_decision(&body)?;

        info!(decision = ?decision, "Decision service verdict");

        decision.into_permitted()
    }
}
