//! XMPP server: binds a TCP listener, accepts connections, and spawns one
//! [`ConnectionActor`] per client.
//!
//! BOSH and WebSocket transports share the same [`ConnectionDeps`] and
//! hook set but are served by [`crate::bosh`] and [`crate::websocket`]
//! respectively — this module only drives the raw-TCP (STARTTLS) listener.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, info_span, warn, Instrument};

use crate::config::ServerConfig;
use crate::connection::{ConnectionActor, ConnectionDeps};
use crate::hooks::{AuthHook, RosterHook, SessionHook};
use crate::ipc::IpcBus;
use crate::registry::ConnectionRegistry;
use crate::XmppError;

/// XMPP C2S server instance. Generic over the three hook traits so the
/// host application supplies its own persistence without this crate
/// depending on a concrete storage backend.
pub struct XmppServer<A: AuthHook, R: RosterHook, S: SessionHook> {
    config: Arc<ServerConfig>,
    deps: ConnectionDeps<A, R, S>,
    tls_acceptor: Option<TlsAcceptor>,
    c2s_listener: TcpListener,
    shutdown_token: tokio_util::sync::CancellationToken,
}

impl<A: AuthHook, R: RosterHook, S: SessionHook> XmppServer<A, R, S> {
    /// Create a new XMPP server instance.
    ///
    /// Requires a pre-bound C2S listener and a shutdown token; the listener
    /// may be inherited from a parent process or freshly bound by the
    /// caller. TLS is loaded from `config.tls_cert_path`/`tls_priv_key_path`
    /// when both are set; otherwise the server runs over plain TCP.
    pub async fn new(
        config: ServerConfig,
        auth_hook: Arc<A>,
        roster_hook: Arc<R>,
        session_hook: Arc<S>,
        c2s_listener: TcpListener,
        shutdown_token: tokio_util::sync::CancellationToken,
    ) -> Result<Self, XmppError> {
        let config = Arc::new(config);
        let tls_acceptor = Self::load_tls_config(&config)?;

        let deps = ConnectionDeps {
            config: Arc::clone(&config),
            auth_hook,
            roster_hook,
            session_hook,
            connection_registry: Arc::new(ConnectionRegistry::new()),
            ipc_bus: Arc::new(IpcBus::new()),
        };

        Ok(Self {
            config,
            deps,
            tls_acceptor,
            c2s_listener,
            shutdown_token,
        })
    }

    /// Load TLS configuration from the certificate and key paths in
    /// `config`, if both are set. Returns `None` (plain TCP) if either is
    /// unset — the caller decides whether that's acceptable via
    /// `tcp_require_tls`.
    fn load_tls_config(config: &ServerConfig) -> Result<Option<TlsAcceptor>, XmppError> {
        use rustls_pemfile::{certs, pkcs8_private_keys};
        use std::fs::File;
        use std::io::BufReader;
        use tokio_rustls::rustls::{pki_types::PrivateKeyDer, ServerConfig as RustlsServerConfig};

        let (Some(cert_path), Some(key_path)) = (&config.tls_cert_path, &config.tls_priv_key_path) else {
            if config.tcp_require_tls {
                return Err(XmppError::config("tcp_require_tls is set but no TLS cert/key configured"));
            }
            return Ok(None);
        };

        let cert_file = File::open(cert_path)
            .map_err(|e| XmppError::config(format!("failed to open cert file {}: {e}", cert_path.display())))?;
        let key_file = File::open(key_path)
            .map_err(|e| XmppError::config(format!("failed to open key file {}: {e}", key_path.display())))?;

        let certs: Vec<_> = certs(&mut BufReader::new(cert_file)).filter_map(|r| r.ok()).collect();
        let keys: Vec<_> = pkcs8_private_keys(&mut BufReader::new(key_file)).filter_map(|r| r.ok()).collect();

        let key = keys
            .into_iter()
            .next()
            .ok_or_else(|| XmppError::config("no private key found"))?;

        let server_config = RustlsServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, PrivateKeyDer::Pkcs8(key))
            .map_err(|e| XmppError::config(format!("TLS config error: {e}")))?;

        Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
    }

    /// Run the accept loop until `shutdown_token` is cancelled.
    pub async fn run(self) -> Result<(), XmppError> {
        let listener = self.c2s_listener;
        let addr = listener.local_addr().ok();
        let domain = self.config.effective_domain("localhost").to_string();
        info!(addr = ?addr, domain = %domain, "XMPP C2S server listening");

        loop {
            let (stream, peer_addr) = tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "failed to accept C2S connection");
                            continue;
                        }
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("C2S accept loop stopped (shutdown token cancelled)");
                    return Ok(());
                }
            };

            let tls_acceptor = self.tls_acceptor.clone();
            let domain = domain.clone();
            let deps = self.deps.clone();
            let shutdown = self.shutdown_token.clone();

            tokio::spawn(
                async move {
                    if let Err(e) =
                        ConnectionActor::handle_connection(stream, peer_addr, tls_acceptor, domain, deps, shutdown)
                            .await
                    {
                        warn!(error = %e, "connection error");
                    }
                }
                .instrument(info_span!(
                    "xmpp.connection.lifecycle",
                    client_ip = %peer_addr,
                    transport = "tcp",
                    jid = tracing::field::Empty,
                )),
            );
        }
    }

    /// The effective server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The connection registry shared by every bound stream, for callers
    /// that want to inspect live connections (metrics, admin tooling).
    pub fn connection_registry(&self) -> &Arc<ConnectionRegistry> {
        &self.deps.connection_registry
    }

    /// The IPC bus shared by every bound stream.
    pub fn ipc_bus(&self) -> &Arc<IpcBus> {
        &self.deps.ipc_bus
    }

    /// Clone of the dependencies handed to each connection actor — used by
    /// [`crate::bosh`] and [`crate::websocket`] to serve the same users
    /// over their own transports.
    pub fn deps(&self) -> ConnectionDeps<A, R, S> {
        self.deps.clone()
    }
}
