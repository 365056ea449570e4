//! # waddle-xmpp
//!
//! Native XMPP server core implementing RFC 6120 (XMPP Core) and RFC 6121
//! (Instant Messaging and Presence).
//!
//! ## Architecture
//!
//! - **Server**: TCP listener for C2S connections, with STARTTLS, BOSH, and
//!   WebSocket transports sharing one connection actor implementation.
//! - **Connection actors**: each client connection is driven by a
//!   `ConnectionActor` task reading from an `XmppStream` and dispatching
//!   parsed stanzas.
//! - **Hooks**: identity, roster storage, and presence bookkeeping are
//!   delegated to a host application through the [`AuthHook`],
//!   [`RosterHook`], and [`SessionHook`] traits, so this crate owns
//!   protocol behavior without owning persistence.
//!
//! ## XEP support
//!
//! - RFC 6120/6121 (XMPP Core / Instant Messaging and Presence)
//! - XEP-0030 (Service Discovery)
//! - XEP-0077 (In-Band Registration)
//! - XEP-0078 (Non-SASL Authentication, legacy)
//! - XEP-0199 (XMPP Ping)
//! - XEP-0280 (Message Carbons)
//! - XEP-0124/0206 (BOSH)
//! - RFC 7395 (WebSocket)

pub mod auth;
pub mod bosh;
pub mod carbons;
pub mod config;
pub mod connection;
pub mod disco;
pub mod hooks;
pub mod ipc;
pub mod parser;
pub mod presence;
pub mod registry;
pub mod roster;
pub mod server;
pub mod stream;
pub mod websocket;
pub mod xep;

mod error;

pub use config::ServerConfig;
pub use error::{AuthFailureCondition, StanzaErrorCondition, XmppError};
pub use hooks::{
    AuthHook, InboundSubscribeOutcome, PendingContact, PresenceRecord, RosterHook, Session,
    SessionHook,
};
pub use parser::{ns, StreamHeader};
pub use server::XmppServer;
pub use xep::xep0077::{RegistrationError, RegistrationRequest};

use std::sync::Arc;

/// Start the XMPP server with the given configuration, hooks, listener, and
/// shutdown token.
pub async fn start<A: AuthHook, R: RosterHook, S: SessionHook>(
    config: ServerConfig,
    auth_hook: Arc<A>,
    roster_hook: Arc<R>,
    session_hook: Arc<S>,
    c2s_listener: tokio::net::TcpListener,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> Result<XmppServer<A, R, S>, XmppError> {
    XmppServer::new(
        config,
        auth_hook,
        roster_hook,
        session_hook,
        c2s_listener,
        shutdown_token,
    )
    .await
}
