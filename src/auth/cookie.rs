//! Signed account-cookie authentication
//!
//! Deployments that mint an account cookie on a central login host can
//! be trusted here without a remote call. The cookie value is an
//! auth_tkt-style ticket: `base64(mac ‖ timestamp ‖ user!tokens)`, MAC'd
//! with a shared secret. A tampered or stale ticket degrades to
//! "unauthenticated" — it must never fail the request.

use super::{AuthError, AuthRequest, Authenticator};
use crate::config::{ConfigError, CookieConfig};
use crate::session::{Identity, Session};
use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

const B64: base64::engine::general_purpose::GeneralPurpose =
    base64::engine::general_purpose::STANDARD;

/// Hex HMAC-SHA256 plus hex timestamp
const MAC_LEN: usize = 64;
const TS_LEN: usize = 8;

/// A verified ticket's contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTicket {
    pub timestamp: i64,
    pub userid: String,
    /// Comma-separated tokens segment, used as group names
    pub tokens: Vec<String>,
}

/// Signed-cookie authenticator
pub struct CookieAuthenticator {
    account_cookie_name: String,
    openid_cookie_name: Option<String>,
    key: Vec<u8>,
    lifetime_secs: u64,
}

impl CookieAuthenticator {
    pub fn new(config: &CookieConfig) -> Result<Self, ConfigError> {
        let key = B64.decode(config.shared_secret.trim()).map_err(|_| {
            ConfigError::ValidationError("auth.cookie.shared_secret must be base64-encoded".into())
        })?;

        Ok(Self {
            account_cookie_name: config.account_cookie_name.clone(),
            openid_cookie_name: config.openid_cookie_name.clone(),
            key,
            lifetime_secs: config.ticket_lifetime_secs,
        })
    }

    /// Mint a ticket for `userid` with the given token list.
    ///
    /// Used by tests and by deployments where this process also issues
    /// the account cookie.
    pub fn issue_ticket(&self, userid: &str, tokens: &[&str]) -> String {
        let timestamp = format!("{:08x}", Utc::now().timestamp());
        let payload = format!("{}!{}", userid, tokens.join(","));
        let mac = self.mac_for(&timestamp, &payload);
        B64.encode(format!("{}{}{}", mac, timestamp, payload))
    }

    /// Verify and decode a ticket value
    pub fn parse_ticket(&self, value: &str) -> Result<ParsedTicket, AuthError> {
        let decoded = B64
            .decode(value)
            .map_err(|e| AuthError::CookieError(format!("Ticket is not base64: {}", e)))?;

        if decoded.len() < MAC_LEN + TS_LEN + 1 {
            return Err(AuthError::CookieError("Ticket too short".into()));
        }

        // Split on byte offsets; the MAC and timestamp segments are hex
        let (mac, rest) = decoded.split_at(MAC_LEN);
        let (timestamp, payload) = rest.split_at(TS_LEN);
        let mac = std::str::from_utf8(mac)
            .map_err(|_| AuthError::CookieError("Ticket MAC is not ASCII".into()))?;
        let timestamp = std::str::from_utf8(timestamp)
            .map_err(|_| AuthError::CookieError("Ticket timestamp is not ASCII".into()))?;
        let payload = std::str::from_utf8(payload)
            .map_err(|_| AuthError::CookieError("Ticket payload is not valid UTF-8".into()))?;

        let mut verifier =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        verifier.update(timestamp.as_bytes());
        verifier.update(payload.as_bytes());
        let mac_bytes = hex::decode(mac)
            .map_err(|_| AuthError::CookieError("Ticket MAC is not hex".into()))?;
        if verifier.verify_slice(&mac_bytes).is_err() {
            return Err(AuthError::CookieError(
                "Ticket signature verification failed".into(),
            ));
        }

        let timestamp = i64::from_str_radix(timestamp, 16)
            .map_err(|_| AuthError::CookieError("Ticket timestamp is not hex".into()))?;

        let age = Utc::now().timestamp().saturating_sub(timestamp);
        if self.lifetime_secs > 0 && age > self.lifetime_secs as i64 {
            return Err(AuthError::CookieError(format!(
                "Ticket expired {}s ago",
                age - self.lifetime_secs as i64
            )));
        }

        let mut parts = payload.splitn(2, '!');
        let userid = parts.next().unwrap_or("").to_string();
        if userid.is_empty() {
            return Err(AuthError::CookieError("Ticket has no userid".into()));
        }
        let tokens = parts
            .next()
            .unwrap_or("")
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(ParsedTicket {
            timestamp,
            userid,
            tokens,
        })
    }

    fn mac_for(&self, timestamp: &str, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(timestamp.as_bytes());
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[async_trait]
impl Authenticator for CookieAuthenticator {
    fn name(&self) -> &'static str {
        "cookie"
    }

    #[tracing::instrument(name = "auth.cookie", skip_all)]
    async fn attempt(
        &self,
        request: &AuthRequest,
        _session: &mut Session,
    ) -> Result<Option<Identity>, AuthError> {
        let value = match request.cookies.get(&self.account_cookie_name) {
            Some(value) => value,
            None => {
                debug!(cookie = %self.account_cookie_name, "Missing account cookie");
                return Ok(None);
            }
        };

        let ticket = self.parse_ticket(value)?;

        // The openid cookie is optional; a broken one costs only the
        // subject id, not the whole identity.
        let openid = self.openid_cookie_name.as_ref().and_then(|name| {
            let value = request.cookies.get(name)?;
            match self.parse_ticket(value) {
                Ok(ticket) => Some(ticket.userid),
                Err(e) => {
                    warn!(cookie = %name, error = %e, "Failed to parse openid cookie");
                    None
                }
            }
        });

        let groups = ticket.tokens.clone();
        Ok(Some(Identity::new(ticket.userid, groups, openid)))
    }
}
