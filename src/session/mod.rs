//! Session state and the signed cookie that carries it
//!
//! The gateway keeps one session per browser, serialized into a single
//! HMAC-signed cookie. The session holds at most one authenticated
//! [`Identity`], at most one pending resource URI (stashed across the
//! interactive login redirect), and the transient OIDC handshake state.

use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

const B64: base64::engine::general_purpose::GeneralPurpose =
    base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Resolved caller identity
///
/// `openid` is the stable subject identifier used when querying the
/// decision service; sources that provide no separate subject id fall
/// back to the username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
    pub openid: String,
}

impl Identity {
    /// Create an identity, defaulting the subject id to the username
    pub fn new(username: impl Into<String>, groups: Vec<String>, openid: Option<String>) -> Self {
        let username = username.into();
        let openid = openid
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| username.clone());
        Self {
            username,
            groups,
            openid,
        }
    }
}

/// Transient state proving a login redirect was issued on this session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcHandshake {
    /// Anti-forgery value echoed back by the provider
    pub state: String,
}

/// Per-request session bag
///
/// Mutations flip an internal dirty flag so the response layer only
/// re-serializes the cookie when something changed.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    identity: Option<Identity>,
    #[serde(default)]
    pending_resource: Option<String>,
    #[serde(default)]
    oidc_handshake: Option<OidcHandshake>,
    #[serde(skip)]
    dirty: bool,
}

impl Session {
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Store an authenticated identity, replacing any previous one.
    ///
    /// An identity with an empty username is never stored; absence of an
    /// identity is the "unauthenticated" state.
    pub fn set_identity(&mut self, identity: Identity) {
        if identity.username.is_empty() {
            warn!("Refusing to store identity with empty username");
            return;
        }
        self.identity = Some(identity);
        self.dirty = true;
    }

    pub fn clear_identity(&mut self) {
        if self.identity.take().is_some() {
            self.dirty = true;
        }
    }

    pub fn pending_resource(&self) -> Option<&str> {
        self.pending_resource.as_deref()
    }

    /// Overwrites any previously stashed resource URI
    pub fn set_pending_resource(&mut self, uri: impl Into<String>) {
        self.pending_resource = Some(uri.into());
        self.dirty = true;
    }

    pub fn take_pending_resource(&mut self) -> Option<String> {
        let taken = self.pending_resource.take();
        if taken.is_some() {
            self.dirty = true;
        }
        taken
    }

    pub fn oidc_handshake(&self) -> Option<&OidcHandshake> {
        self.oidc_handshake.as_ref()
    }

    pub fn set_oidc_handshake(&mut self, handshake: OidcHandshake) {
        self.oidc_handshake = Some(handshake);
        self.dirty = true;
    }

    /// Consume the handshake; it is valid for exactly one callback attempt
    pub fn take_oidc_handshake(&mut self) -> Option<OidcHandshake> {
        let taken = self.oidc_handshake.take();
        if taken.is_some() {
            self.dirty = true;
        }
        taken
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Signs and verifies the session cookie value
///
/// Wire format: `base64url(json) . hex(unix-timestamp) . hex(hmac-sha256)`
/// with the MAC computed over the payload and timestamp segments.
pub struct SessionCodec {
    key: Vec<u8>,
    max_age_secs: u64,
}

impl SessionCodec {
    pub fn new(shared_secret: &str, max_age_secs: u64) -> Self {
        Self {
            key: shared_secret.as_bytes().to_vec(),
            max_age_secs,
        }
    }

    /// Serialize and sign a session into a cookie value
    pub fn encode(&self, session: &Session) -> String {
        let payload = serde_json::to_vec(session).expect("session serializes to JSON");
        let payload_b64 = B64.encode(&payload);
        let timestamp = format!("{:08x}", Utc::now().timestamp());
        let mac = self.mac_for(&payload_b64, &timestamp);
        format!("{}.{}.{}", payload_b64, timestamp, mac)
    }

    /// Verify and deserialize a cookie value.
    ///
    /// Any tampering, decode failure, or staleness yields a fresh empty
    /// session; a bad session cookie must degrade to "unauthenticated",
    /// never fail the request.
    pub fn decode(&self, value: &str) -> Session {
        match self.try_decode(value) {
            Some(session) => session,
            None => {
                warn!("Discarding invalid or stale session cookie");
                Session::default()
            }
        }
    }

    fn try_decode(&self, value: &str) -> Option<Session> {
        let mut parts = value.splitn(3, '.');
        let payload_b64 = parts.next()?;
        let timestamp = parts.next()?;
        let mac = parts.next()?;

        let mut verifier = HmacSha256::new_from_slice(&self.key).ok()?;
        verifier.update(payload_b64.as_bytes());
        verifier.update(b".");
        verifier.update(timestamp.as_bytes());
        let mac_bytes = hex::decode(mac).ok()?;
        if verifier.verify_slice(&mac_bytes).is_err() {
            debug!("Session cookie MAC mismatch");
            return None;
        }

        let issued_at = i64::from_str_radix(timestamp, 16).ok()?;
        let age = Utc::now().timestamp().saturating_sub(issued_at);
        if self.max_age_secs > 0 && age > self.max_age_secs as i64 {
            debug!(age, "Session cookie expired");
            return None;
        }

        let payload = B64.decode(payload_b64).ok()?;
        serde_json::from_slice(&payload).ok()
    }

    fn mac_for(&self, payload_b64: &str, timestamp: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(payload_b64.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> SessionCodec {
        SessionCodec::new("test-secret", 3600)
    }

    #[test]
    fn test_identity_openid_falls_back_to_username() {
        let identity = Identity::new("alice", vec![], None);
        assert_eq!(identity.openid, "alice");

        let identity = Identity::new("alice", vec![], Some("https://idp/alice".into()));
        assert_eq!(identity.openid, "https://idp/alice");
    }

    #[test]
    fn test_empty_username_never_stored() {
        let mut session = Session::default();
        session.set_identity(Identity::new("", vec![], None));
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_pending_resource_overwritten_not_accumulated() {
        let mut session = Session::default();
        session.set_pending_resource("/a");
        session.set_pending_resource("/b");
        assert_eq!(session.pending_resource(), Some("/b"));
        assert_eq!(session.take_pending_resource(), Some("/b".to_string()));
        assert_eq!(session.pending_resource(), None);
    }

    #[test]
    fn test_handshake_consumed_once() {
        let mut session = Session::default();
        session.set_oidc_handshake(OidcHandshake {
            state: "xyz".into(),
        });
        assert!(session.take_oidc_handshake().is_some());
        assert!(session.take_oidc_handshake().is_none());
    }

    #[test]
    fn test_round_trip() {
        let mut session = Session::default();
        session.set_identity(Identity::new("alice", vec!["staff".into()], None));
        session.set_pending_resource("/data/file.nc");

        let value = codec().encode(&session);
        let decoded = codec().decode(&value);

        assert_eq!(decoded.identity().unwrap().username, "alice");
        assert_eq!(decoded.pending_resource(), Some("/data/file.nc"));
        assert!(!decoded.is_dirty());
    }

    #[test]
    fn test_tampered_cookie_degrades_to_empty_session() {
        let mut session = Session::default();
        session.set_identity(Identity::new("alice", vec![], None));

        let mut value = codec().encode(&session);
        value.replace_range(0..4, "AAAA");

        let decoded = codec().decode(&value);
        assert!(!decoded.is_authenticated());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let session = Session::default();
        let value = codec().encode(&session);

        let other = SessionCodec::new("other-secret", 3600);
        let mut tampered = Session::default();
        tampered.set_identity(Identity::new("mallory", vec![], None));
        let forged = other.encode(&tampered);

        assert!(!codec().decode(&forged).is_authenticated());
        // Sanity: the honest value still decodes
        assert!(!codec().decode(&value).is_authenticated());
    }

    #[test]
    fn test_garbage_cookie_degrades() {
        assert!(!codec().decode("not-a-session").is_authenticated());
        assert!(!codec().decode("a.b.c").is_authenticated());
        assert!(!codec().decode("").is_authenticated());
    }
}
