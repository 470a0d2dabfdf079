//! Configuration module for Torii Authgate
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and comprehensive validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
pub(crate) fn expand_env_vars(s: &str) -> String {
    // Regex to capture ${VAR} or ${VAR:-default}
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}").unwrap();
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let full_match = cap.get(0).unwrap();
        let var_name = cap.get(1).unwrap().as_str();

        // Append the text before the match
        result.push_str(&s[last_match..full_match.start()]);

        // Get value from env, or use default from regex
        let value = match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => {
                if let Some(default) = cap.get(2) {
                    default.as_str().to_string()
                } else {
                    // No env var and no default. Keep the original placeholder.
                    full_match.as_str().to_string()
                }
            }
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    // Append the rest of the string after the last match
    result.push_str(&s[last_match..]);

    result
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    pub auth: AuthConfig,
    pub authz: AuthzConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Server address cannot be empty".into(),
            ));
        }

        if self.session.shared_secret.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Session shared_secret cannot be empty".into(),
            ));
        }

        if !is_valid_http_url(&self.resolver.resource_server_uri) {
            return Err(ConfigError::ValidationError(
                "Invalid resolver.resource_server_uri: must start with http:// or https://".into(),
            ));
        }

        if self.auth.order.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.order must name at least one strategy".into(),
            ));
        }

        for strategy in &self.auth.order {
            match strategy {
                StrategyKind::Bearer => {
                    let bearer = self.auth.bearer.as_ref().ok_or_else(|| {
                        ConfigError::ValidationError(
                            "auth.order names 'bearer' but auth.bearer is missing".into(),
                        )
                    })?;
                    if !is_valid_http_url(&bearer.introspection_url) {
                        return Err(ConfigError::ValidationError(
                            "Invalid auth.bearer.introspection_url: must start with http:// or https://".into(),
                        ));
                    }
                }
                StrategyKind::Oidc => {
                    let oidc = self.auth.oidc.as_ref().ok_or_else(|| {
                        ConfigError::ValidationError(
                            "auth.order names 'oidc' but auth.oidc is missing".into(),
                        )
                    })?;
                    for (name, url) in [
                        ("authorization_endpoint", &oidc.authorization_endpoint),
                        ("token_endpoint", &oidc.token_endpoint),
                        ("userinfo_endpoint", &oidc.userinfo_endpoint),
                        ("callback_url", &oidc.callback_url),
                    ] {
                        if !is_valid_http_url(url) {
                            return Err(ConfigError::ValidationError(format!(
                                "Invalid auth.oidc.{}: must start with http:// or https://",
                                name
                            )));
                        }
                    }
                }
                StrategyKind::Cookie => {
                    let cookie = self.auth.cookie.as_ref().ok_or_else(|| {
                        ConfigError::ValidationError(
                            "auth.order names 'cookie' but auth.cookie is missing".into(),
                        )
                    })?;
                    use base64::Engine as _;
                    if base64::engine::general_purpose::STANDARD
                        .decode(cookie.shared_secret.trim())
                        .is_err()
                    {
                        return Err(ConfigError::ValidationError(
                            "auth.cookie.shared_secret must be base64-encoded".into(),
                        ));
                    }
                }
            }
        }

        match self.authz.backend {
            AuthzBackend::Saml => {
                let saml = self.authz.saml.as_ref().ok_or_else(|| {
                    ConfigError::ValidationError(
                        "authz.backend is 'saml' but authz.saml is missing".into(),
                    )
                })?;
                if !is_valid_http_url(&saml.service_url) {
                    return Err(ConfigError::ValidationError(
                        "Invalid authz.saml.service_url: must start with http:// or https://".into(),
                    ));
                }
                if saml.issuer.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "authz.saml.issuer cannot be empty".into(),
                    ));
                }
            }
            AuthzBackend::Opa => {
                let opa = self.authz.opa.as_ref().ok_or_else(|| {
                    ConfigError::ValidationError(
                        "authz.backend is 'opa' but authz.opa is missing".into(),
                    )
                })?;
                if !is_valid_http_url(&opa.url) {
                    return Err(ConfigError::ValidationError(
                        "Invalid authz.opa.url: must start with http:// or https://".into(),
                    ));
                }
                if opa.package_path.trim().is_empty() || opa.rule_name.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "authz.opa.package_path and authz.opa.rule_name are required".into(),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
}

/// Session cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_cookie_name")]
    pub cookie_name: String,
    /// Secret used to sign the session cookie payload
    pub shared_secret: String,
    #[serde(default = "default_session_max_age")]
    pub max_age_secs: u64,
}

fn default_session_cookie_name() -> String {
    "authgate_session".to_string()
}

fn default_session_max_age() -> u64 {
    28800 // 8 hours
}

/// Resource URI resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Query-string key carrying the requested resource URI
    #[serde(default = "default_resolver_query_key")]
    pub query_key: String,
    /// Proxy-injected header carrying the original upstream URI path
    #[serde(default = "default_resolver_header_key")]
    pub header_key: String,
    /// Base URI of the resource server, joined with the header path
    #[serde(default = "default_resource_server_uri")]
    pub resource_server_uri: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            query_key: default_resolver_query_key(),
            header_key: default_resolver_header_key(),
            resource_server_uri: default_resource_server_uri(),
        }
    }
}

fn default_resolver_query_key() -> String {
    "next".to_string()
}

fn default_resolver_header_key() -> String {
    "x-origin-uri".to_string()
}

fn default_resource_server_uri() -> String {
    "http://localhost".to_string()
}

/// Authentication strategy names usable in `auth.order`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Bearer,
    Oidc,
    Cookie,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Strategies run in this order; first success wins
    #[serde(default = "default_auth_order")]
    pub order: Vec<StrategyKind>,
    #[serde(default)]
    pub bearer: Option<BearerConfig>,
    #[serde(default)]
    pub oidc: Option<OidcConfig>,
    #[serde(default)]
    pub cookie: Option<CookieConfig>,
}

fn default_auth_order() -> Vec<StrategyKind> {
    vec![StrategyKind::Bearer, StrategyKind::Oidc, StrategyKind::Cookie]
}

/// Bearer-token introspection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerConfig {
    pub introspection_url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_username_field")]
    pub username_field: String,
    #[serde(default = "default_groups_field")]
    pub groups_field: String,
    #[serde(default = "default_openid_field")]
    pub openid_field: String,
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

/// OpenID Connect provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    /// Absolute URL of this gateway's /login/callback endpoint
    pub callback_url: String,
    #[serde(default = "default_oidc_scopes")]
    pub scopes: String,
    #[serde(default = "default_username_field")]
    pub username_field: String,
    #[serde(default = "default_groups_field")]
    pub groups_field: String,
    #[serde(default = "default_oidc_subject_field")]
    pub openid_field: String,
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

/// Signed account-cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_account_cookie_name")]
    pub account_cookie_name: String,
    /// Optional second cookie carrying the openid subject identifier
    #[serde(default)]
    pub openid_cookie_name: Option<String>,
    /// Base64-encoded shared secret for ticket verification
    pub shared_secret: String,
    /// Maximum ticket age in seconds; 0 disables the expiry check
    #[serde(default = "default_ticket_lifetime")]
    pub ticket_lifetime_secs: u64,
}

fn default_username_field() -> String {
    "preferred_username".to_string()
}

fn default_groups_field() -> String {
    "groups".to_string()
}

fn default_openid_field() -> String {
    "openid".to_string()
}

fn default_oidc_subject_field() -> String {
    "sub".to_string()
}

fn default_oidc_scopes() -> String {
    "openid profile".to_string()
}

fn default_account_cookie_name() -> String {
    "account".to_string()
}

fn default_ticket_lifetime() -> u64 {
    28800 // 8 hours
}

fn default_client_timeout() -> u64 {
    10
}

/// Decision-service backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthzBackend {
    Saml,
    Opa,
}

/// Authorization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthzConfig {
    pub backend: AuthzBackend,
    #[serde(default)]
    pub saml: Option<SamlConfig>,
    #[serde(default)]
    pub opa: Option<OpaConfig>,
}

/// SAML attribute-query backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamlConfig {
    pub service_url: String,
    /// Issuer value placed in each decision query (X.509 subject format)
    pub issuer: String,
    #[serde(default = "default_decision_timeout")]
    pub timeout_secs: u64,
}

/// Policy-engine backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpaConfig {
    pub url: String,
    pub package_path: String,
    pub rule_name: String,
    #[serde(default = "default_decision_timeout")]
    pub timeout_secs: u64,
}

fn default_decision_timeout() -> u64 {
    5
}

/// Gateway orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Exact request paths excluded from authorization checks
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
    /// Path prefixes excluded from authorization checks
    #[serde(default)]
    pub exempt_prefixes: Vec<String>,
    /// Response header carrying the authenticated username on 200
    #[serde(default = "default_remote_user_header")]
    pub remote_user_header: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            exempt_paths: default_exempt_paths(),
            exempt_prefixes: Vec::new(),
            remote_user_header: default_remote_user_header(),
        }
    }
}

fn default_exempt_paths() -> Vec<String> {
    vec![
        "/".to_string(),
        "/health".to_string(),
        "/login".to_string(),
        "/login/callback".to_string(),
    ]
}

fn default_remote_user_header() -> String {
    "X-Remote-User".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}
