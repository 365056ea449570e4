//! Server configuration (§6 "Configuration options").
//!
//! Mirrors `xmppserver.conf.Settings` from the original implementation: one
//! struct of named options with documented defaults, resolved once at
//! startup and threaded down through server construction — no runtime
//! mutation, no global registry.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// XMPP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// XMPP domain name. Falls back to the stream header's `to` attribute
    /// (or the BOSH/WS request's `Host`) when unset.
    pub domain: Option<String>,

    /// Whether to allow in-band registration (XEP-0077).
    pub allow_registration: bool,

    /// URL to visit to register when `allow_registration` is false.
    pub registration_url: Option<String>,

    /// Whether to allow anonymous logins (SASL ANONYMOUS).
    pub allow_anonymous_login: bool,

    /// Whether to allow SASL PLAIN with an ordinary plaintext password.
    pub allow_plain_password: bool,

    /// Whether to allow authenticating with an empty password via
    /// `auth_hook.check_webuser`.
    pub allow_webuser_login: bool,

    /// Whether to allow legacy non-SASL authentication (XEP-0078).
    pub allow_legacy_auth: bool,

    /// Lifetime, in seconds, of signed session tokens accepted via the
    /// `//jid/` password prefix.
    pub credentials_max_age: u64,

    /// Minimum allowed BOSH `wait` value, in seconds.
    pub bosh_min_wait: u32,
    /// Maximum allowed BOSH `wait` value, in seconds.
    pub bosh_max_wait: u32,
    /// Maximum allowed BOSH `hold` value.
    pub bosh_max_hold: u32,
    /// Seconds without a queued consumer before a BOSH session is presumed dead.
    pub bosh_max_inactivity: u64,

    /// Whether to run the plain TCP listener at all.
    pub tcp_server: bool,
    /// Client-to-server TCP port.
    pub tcp_client_port: u16,
    /// Whether TLS-secured TCP connections are required.
    pub tcp_require_tls: bool,

    /// Path to the PEM-encoded X.509 certificate (required for TLS).
    pub tls_cert_path: Option<PathBuf>,
    /// Path to the PEM-encoded private key (required for TLS).
    pub tls_priv_key_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            domain: None,
            allow_registration: false,
            registration_url: None,
            allow_anonymous_login: false,
            allow_plain_password: true,
            allow_webuser_login: true,
            allow_legacy_auth: false,
            credentials_max_age: 30,
            bosh_min_wait: 10,
            bosh_max_wait: 60,
            bosh_max_hold: 2,
            bosh_max_inactivity: 120,
            tcp_server: true,
            tcp_client_port: 5222,
            tcp_require_tls: true,
            tls_cert_path: None,
            tls_priv_key_path: None,
        }
    }
}

impl ServerConfig {
    /// Resolve the effective domain, falling back to a transport-supplied
    /// hostname (stream header `to`, or HTTP `Host`) when unset.
    pub fn effective_domain<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.domain.as_deref().unwrap_or(fallback)
    }

    /// Clamp a client-requested BOSH `wait` value into the configured bounds.
    pub fn clamp_bosh_wait(&self, requested: u32) -> u32 {
        requested.clamp(self.bosh_min_wait, self.bosh_max_wait)
    }

    /// Clamp a client-requested BOSH `hold` value into the configured bounds.
    pub fn clamp_bosh_hold(&self, requested: u32) -> u32 {
        requested.min(self.bosh_max_hold)
    }
}
