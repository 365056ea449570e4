//! SASL + legacy authentication mechanisms (§4.D).
//!
//! Mechanism selection and the PLAIN credential format are handled here;
//! dispatching a parsed credential to [`crate::hooks::AuthHook`] and driving
//! the challenge/response suspension for multi-step mechanisms is
//! [`crate::stream`]'s job.

use crate::config::ServerConfig;
use crate::XmppError;

/// A SASL (or legacy) authentication mechanism advertised in stream
/// features, gated by [`available_mechanisms`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslMechanism {
    /// RFC 4616, always available (policy is enforced per-credential, not
    /// per-mechanism — see [`classify_plain_password`]).
    Plain,
    /// XEP-0175, gated by `allow_anonymous_login`.
    Anonymous,
    /// RFC 6120 §6.3.1 via peer TLS certificate, gated by the presence of
    /// one (currently never present — no client-certificate support).
    External,
    /// XEP-0078 Non-SASL (legacy) authentication, gated by
    /// `allow_legacy_auth`. Not a SASL mechanism proper — advertised as a
    /// separate `<auth/>` stream feature, not in `<mechanisms/>`.
    Legacy,
}

impl std::fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaslMechanism::Plain => write!(f, "PLAIN"),
            SaslMechanism::Anonymous => write!(f, "ANONYMOUS"),
            SaslMechanism::External => write!(f, "EXTERNAL"),
            SaslMechanism::Legacy => write!(f, "jabber:iq:auth"),
        }
    }
}

impl SaslMechanism {
    /// Map a wire mechanism name (as carried in `<auth mechanism='...'>`) to
    /// a [`SaslMechanism`]. `jabber:iq:auth` is not a SASL mechanism and is
    /// never produced here; legacy auth is dispatched from the `<iq/>`
    /// stream, not `<auth/>`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PLAIN" => Some(Self::Plain),
            "ANONYMOUS" => Some(Self::Anonymous),
            "EXTERNAL" => Some(Self::External),
            _ => None,
        }
    }
}

/// Whether a peer certificate was presented for this connection. No
/// client-certificate support exists yet, so this is always `false`; kept
/// as a named predicate so the EXTERNAL gate reads as a policy decision
/// rather than a hardcoded `false` at the call site.
pub fn has_peer_certificate() -> bool {
    false
}

/// The SASL mechanisms to list in `<mechanisms/>`, per §4.D's gating rules.
/// Does not include [`SaslMechanism::Legacy`] — that is advertised as a
/// separate `<auth/>` feature, not a `<mechanism/>` entry.
pub fn available_mechanisms(cfg: &ServerConfig) -> Vec<SaslMechanism> {
    let mut mechanisms = Vec::with_capacity(3);
    if has_peer_certificate() {
        mechanisms.push(SaslMechanism::External);
    }
    mechanisms.push(SaslMechanism::Plain);
    if cfg.allow_anonymous_login {
        mechanisms.push(SaslMechanism::Anonymous);
    }
    mechanisms
}

/// Whether legacy XEP-0078 `<auth/>` should be advertised as a pre-auth
/// stream feature.
pub fn legacy_auth_available(cfg: &ServerConfig) -> bool {
    cfg.allow_legacy_auth
}

/// Parsed SASL PLAIN credentials (RFC 4616): `authzid \0 authcid \0
/// password`. `authcid` is the bare username, not a JID — XMPP's PLAIN
/// profile (RFC 6120 §6.3.1) puts the username, not `user@domain`, in that
/// field.
#[derive(Debug, Clone)]
pub struct SaslCredentials {
    pub authcid: String,
    pub password: String,
    pub authzid: Option<String>,
}

/// Parse SASL PLAIN credentials from the base64-decoded `<auth/>` payload.
pub fn parse_plain(data: &[u8]) -> Result<SaslCredentials, XmppError> {
    let parts: Vec<&[u8]> = data.splitn(3, |&b| b == 0).collect();
    if parts.len() != 3 {
        return Err(XmppError::bad_request(Some("malformed SASL PLAIN payload".to_string())));
    }

    let authzid = if parts[0].is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(parts[0]).to_string())
    };
    let authcid = String::from_utf8_lossy(parts[1]).to_string();
    let password = String::from_utf8_lossy(parts[2]).to_string();

    if authcid.is_empty() {
        return Err(XmppError::bad_request(Some("empty authcid in SASL PLAIN payload".to_string())));
    }

    Ok(SaslCredentials { authcid, password, authzid })
}

/// Whether an authzid is acceptable for `username` on `server_host`: empty,
/// or exactly `username@server_host` (§4.D). Any other value is rejected
/// with `invalid-authzid`.
pub fn authzid_is_valid(authzid: Option<&str>, username: &str, server_host: &str) -> bool {
    match authzid {
        None => true,
        Some(z) if z.is_empty() => true,
        Some(z) => z == format!("{username}@{server_host}"),
    }
}

/// The prefix marking a PLAIN password field as a pre-bind session token
/// rather than a literal password (§4.D).
pub const TOKEN_PASSWORD_PREFIX: &str = "//jid/";

/// How a PLAIN password field should be checked, classified by content
/// rather than by mechanism: an empty password means web-session auth, a
/// `//jid/`-prefixed one means a token, anything else is a literal
/// password (subject to `allow_plain_password`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlainCredentialKind {
    WebUser,
    Token(String),
    Password(String),
}

/// Classify a PLAIN password field per §4.D's dispatch rules.
pub fn classify_plain_password(password: &str) -> PlainCredentialKind {
    if password.is_empty() {
        PlainCredentialKind::WebUser
    } else if let Some(token) = password.strip_prefix(TOKEN_PASSWORD_PREFIX) {
        PlainCredentialKind::Token(token.to_string())
    } else {
        PlainCredentialKind::Password(password.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ServerConfig {
        ServerConfig::default()
    }

    #[test]
    fn test_parse_plain_simple() {
        let data = b"\0alice\0password123";
        let creds = parse_plain(data).unwrap();
        assert_eq!(creds.authcid, "alice");
        assert_eq!(creds.password, "password123");
        assert!(creds.authzid.is_none());
    }

    #[test]
    fn test_parse_plain_with_authzid() {
        let data = b"alice@example.com\0alice\0password123";
        let creds = parse_plain(data).unwrap();
        assert_eq!(creds.authcid, "alice");
        assert_eq!(creds.password, "password123");
        assert_eq!(creds.authzid, Some("alice@example.com".to_string()));
    }

    #[test]
    fn test_parse_plain_missing_separator() {
        assert!(parse_plain(b"nouser").is_err());
    }

    #[test]
    fn test_parse_plain_empty_authcid_rejected() {
        assert!(parse_plain(b"\0\0password").is_err());
    }

    #[test]
    fn test_parse_plain_empty_password_is_ok() {
        let creds = parse_plain(b"\0alice\0").unwrap();
        assert_eq!(creds.password, "");
    }

    #[test]
    fn test_available_mechanisms_default() {
        let mechs = available_mechanisms(&cfg());
        assert_eq!(mechs, vec![SaslMechanism::Plain]);
    }

    #[test]
    fn test_available_mechanisms_with_anonymous() {
        let mut c = cfg();
        c.allow_anonymous_login = true;
        let mechs = available_mechanisms(&c);
        assert!(mechs.contains(&SaslMechanism::Plain));
        assert!(mechs.contains(&SaslMechanism::Anonymous));
    }

    #[test]
    fn test_legacy_auth_gated_by_config() {
        assert!(!legacy_auth_available(&cfg()));
        let mut c = cfg();
        c.allow_legacy_auth = true;
        assert!(legacy_auth_available(&c));
    }

    #[test]
    fn test_authzid_validation() {
        assert!(authzid_is_valid(None, "alice", "example.com"));
        assert!(authzid_is_valid(Some(""), "alice", "example.com"));
        assert!(authzid_is_valid(Some("alice@example.com"), "alice", "example.com"));
        assert!(!authzid_is_valid(Some("bob@example.com"), "alice", "example.com"));
        assert!(!authzid_is_valid(Some("alice@other.com"), "alice", "example.com"));
    }

    #[test]
    fn test_classify_plain_password() {
        assert_eq!(classify_plain_password(""), PlainCredentialKind::WebUser);
        assert_eq!(
            classify_plain_password("//jid/abc123"),
            PlainCredentialKind::Token("abc123".to_string())
        );
        assert_eq!(
            classify_plain_password("hunter2"),
            PlainCredentialKind::Password("hunter2".to_string())
        );
    }

    #[test]
    fn test_mechanism_display() {
        assert_eq!(SaslMechanism::Plain.to_string(), "PLAIN");
        assert_eq!(SaslMechanism::Anonymous.to_string(), "ANONYMOUS");
        assert_eq!(SaslMechanism::External.to_string(), "EXTERNAL");
    }

    #[test]
    fn test_mechanism_from_name() {
        assert_eq!(SaslMechanism::from_name("PLAIN"), Some(SaslMechanism::Plain));
        assert_eq!(SaslMechanism::from_name("ANONYMOUS"), Some(SaslMechanism::Anonymous));
        assert_eq!(SaslMechanism::from_name("EXTERNAL"), Some(SaslMechanism::External));
        assert_eq!(SaslMechanism::from_name("SCRAM-SHA-256"), None);
    }
}
