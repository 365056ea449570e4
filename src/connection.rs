//! Per-connection actor: drives one XMPP stream from open to teardown.
//!
//! One [`ConnectionActor`] task owns one [`crate::stream::XmppStream`]. It runs
//! the handshake (stream open, STARTTLS, SASL/legacy-auth/registration,
//! resource bind), then the bound dispatch loop that shuttles stanzas between
//! the client, the [`ConnectionRegistry`] (direct full-JID delivery) and the
//! [`IpcBus`] (group delivery to every resource of a bare JID — presence
//! broadcast, roster pushes, message fan-out).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jid::{BareJid, FullJid, Jid};
use minidom::Element;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::message::{Message, MessageType};
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use crate::auth::{self, PlainCredentialKind, SaslCredentials, SaslMechanism};
use crate::carbons;
use crate::config::ServerConfig;
use crate::disco::{self, DiscoInfoQuery, DiscoItemsQuery, Feature, Identity};
use crate::hooks::{AuthHook, InboundSubscribeOutcome, RosterHook, SessionHook};
use crate::ipc::{IpcBus, IpcEvent, IpcEventKind};
use crate::presence::subscription::{
    build_available_presence, build_subscription_presence, build_unavailable_presence,
    parse_subscription_presence, PresenceAction, SubscriptionType,
};
use crate::registry::{ConnectionRegistry, SendResult};
use crate::roster::{self, RosterQuery, RosterSetResult, Subscription};
use crate::stream::{PreAuthEvent, SaslAuthRequest, SaslContinuation, XmppStream};
use crate::xep::{xep0049, xep0054, xep0077, xep0199};
use crate::XmppError;

/// Everything a bound stream needs to reach the rest of the server.
pub struct ConnectionDeps<A: AuthHook, R: RosterHook, S: SessionHook> {
    pub config: Arc<ServerConfig>,
    pub auth_hook: Arc<A>,
    pub roster_hook: Arc<R>,
    pub session_hook: Arc<S>,
    pub connection_registry: Arc<ConnectionRegistry>,
    pub ipc_bus: Arc<IpcBus>,
}

impl<A: AuthHook, R: RosterHook, S: SessionHook> Clone for ConnectionDeps<A, R, S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            auth_hook: Arc::clone(&self.auth_hook),
            roster_hook: Arc::clone(&self.roster_hook),
            session_hook: Arc::clone(&self.session_hook),
            connection_registry: Arc::clone(&self.connection_registry),
            ipc_bus: Arc::clone(&self.ipc_bus),
        }
    }
}

/// Outcome of the pre-bind auth phase: SASL authenticates a bare JID and
/// still needs a separate `<bind/>`; XEP-0078 legacy auth folds username,
/// password, and resource into a single request/response.
enum AuthOutcome {
    Sasl(BareJid),
    Legacy(FullJid),
}

/// State that only exists once a stream is bound to a full JID.
struct BoundState {
    jid: FullJid,
    /// IPC channel this resource owns for as long as it's bound.
    channel_id: crate::ipc::ChannelId,
    /// Full JIDs this resource has sent directed (non-roster) presence to.
    directed_presence: std::sync::Mutex<Vec<FullJid>>,
}

/// Drives a single client connection from stream-open to teardown.
pub struct ConnectionActor<A: AuthHook, R: RosterHook, S: SessionHook> {
    deps: ConnectionDeps<A, R, S>,
    peer_addr: SocketAddr,
}

impl<A: AuthHook, R: RosterHook, S: SessionHook> ConnectionActor<A, R, S> {
    /// Accept and run one TCP connection to completion. Errors are logged by
    /// the caller; this never panics on protocol errors, only propagates
    /// them so the caller can log and drop the connection.
    #[instrument(skip_all, fields(peer = %peer_addr))]
    pub async fn handle_connection(
        tcp: TcpStream,
        peer_addr: SocketAddr,
        tls_acceptor: Option<TlsAcceptor>,
        domain: String,
        deps: ConnectionDeps<A, R, S>,
        shutdown: CancellationToken,
    ) -> Result<(), XmppError> {
        let actor = ConnectionActor { deps, peer_addr };
        let mut xmpp_stream = XmppStream::new(tcp, domain);

        xmpp_stream.read_stream_header().await?;

        if actor.deps.config.tcp_require_tls && tls_acceptor.is_some() {
            xmpp_stream.send_features_starttls(true).await?;
        } else if let Some(_acceptor) = tls_acceptor.as_ref() {
            xmpp_stream.send_features_starttls(false).await?;
        }

        let mut xmpp_stream = if tls_acceptor.is_some() && actor.deps.config.tcp_require_tls {
            actor.negotiate_starttls(xmpp_stream, tls_acceptor.clone().unwrap()).await?
        } else {
            xmpp_stream
        };

        xmpp_stream.send_features_sasl(&actor.deps.config).await?;

        let full_jid = match actor.run_auth_phase(&mut xmpp_stream).await? {
            AuthOutcome::Sasl(bare_jid) => {
                actor.deps.auth_hook.bind(&bare_jid).await;
                xmpp_stream.send_features_bind().await?;
                actor.bind_resource(&mut xmpp_stream, &bare_jid).await?
            }
            AuthOutcome::Legacy(full_jid) => full_jid,
        };

        let (channel_id, ipc_rx) = actor.deps.ipc_bus.open_channel(64);
        let (reg_tx, reg_rx) = tokio::sync::mpsc::channel(64);
        actor.deps.connection_registry.register(full_jid.clone(), reg_tx);
        let group = IpcBus::user_group(full_jid.node().unwrap_or(""));
        actor.deps.ipc_bus.group_add(&group, channel_id);

        let bound = BoundState {
            jid: full_jid,
            channel_id,
            directed_presence: std::sync::Mutex::new(Vec::new()),
        };

        let result = actor.bound_loop(&mut xmpp_stream, &bound, ipc_rx, reg_rx, shutdown).await;

        actor.teardown(&bound).await;
        xmpp_stream.close().await.ok();

        result
    }

    /// Loop the pre-TLS stream until `<starttls/>` arrives, then upgrade.
    async fn negotiate_starttls(
        &self,
        mut xmpp_stream: XmppStream,
        tls_acceptor: TlsAcceptor,
    ) -> Result<XmppStream, XmppError> {
        loop {
            match xmpp_stream.read_pre_auth_event().await? {
                PreAuthEvent::StartTls => {
                    xmpp_stream.complete_starttls(tls_acceptor).await?;
                    xmpp_stream.read_stream_header().await?;
                    return Ok(xmpp_stream);
                }
                PreAuthEvent::Auth(_) | PreAuthEvent::Iq(_) => {
                    return Err(XmppError::stream("policy-violation: TLS required before authentication"));
                }
            }
        }
    }

    /// Drive SASL, legacy auth, and in-band registration until a client is
    /// either SASL-authenticated (still needs a `<bind/>`) or fully bound
    /// via XEP-0078, which folds authentication and binding into one step.
    async fn run_auth_phase(&self, xmpp_stream: &mut XmppStream) -> Result<AuthOutcome, XmppError> {
        loop {
            match xmpp_stream.read_pre_auth_event().await? {
                PreAuthEvent::StartTls => {
                    return Err(XmppError::stream("bad-format: unexpected starttls after negotiation"));
                }
                PreAuthEvent::Auth(req) => {
                    match self.try_sasl(xmpp_stream, req).await? {
                        Some(bare) => return Ok(AuthOutcome::Sasl(bare)),
                        None => continue,
                    }
                }
                PreAuthEvent::Iq(elem) => {
                    if let Some(full_jid) = self.handle_pre_auth_iq(xmpp_stream, elem).await? {
                        return Ok(AuthOutcome::Legacy(full_jid));
                    }
                }
            }
        }
    }

    /// Handle a pre-auth `<iq/>`: either XEP-0077 registration or XEP-0078
    /// legacy auth. Any other pre-auth IQ gets `service-unavailable`.
    /// Returns `Some(full_jid)` once XEP-0078 legacy auth has fully
    /// authenticated and bound a resource.
    async fn handle_pre_auth_iq(&self, xmpp_stream: &mut XmppStream, elem: Element) -> Result<Option<FullJid>, XmppError> {
        let id = elem.attr("id").unwrap_or("").to_string();

        if xep0077::is_registration_query_element(&elem) {
            if !self.deps.config.allow_registration {
                let err = xep0077::build_registration_error(&id, &xep0077::RegistrationError::NotAllowed);
                xmpp_stream.write_raw(&err).await?;
                return Ok(None);
            }
            match xep0077::parse_registration_element(&elem, &id) {
                Ok(None) => {
                    let resp = xep0077::build_registration_fields_response(&id, None, false);
                    xmpp_stream.write_raw(&resp).await?;
                }
                Ok(Some(req)) => {
                    match self.deps.auth_hook.create_user(&req.username, &req.password).await {
                        Ok(true) => {
                            xmpp_stream.write_raw(&xep0077::build_registration_success(&id)).await?;
                        }
                        Ok(false) => {
                            let err = xep0077::build_registration_error(&id, &xep0077::RegistrationError::Conflict);
                            xmpp_stream.write_raw(&err).await?;
                        }
                        Err(e) => {
                            warn!(error = %e, "registration create_user failed");
                            let err = xep0077::build_registration_error(
                                &id,
                                &xep0077::RegistrationError::InternalError(e.to_string()),
                            );
                            xmpp_stream.write_raw(&err).await?;
                        }
                    }
                }
                Err(e) => {
                    let err = xep0077::build_registration_error(&id, &e);
                    xmpp_stream.write_raw(&err).await?;
                }
            }
            return Ok(None);
        }

        if elem.name() != "iq" || elem.get_child("query", legacy_auth::NS_AUTH).is_none() {
            let resp = format!(
                "<iq type='error' id='{id}'><error type='cancel'><service-unavailable xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error></iq>"
            );
            xmpp_stream.write_raw(&resp).await?;
            return Ok(None);
        }

        if !auth::legacy_auth_available(&self.deps.config) {
            xmpp_stream.write_raw(&legacy_auth::build_error(&id, "not-allowed", "cancel")).await?;
            return Ok(None);
        }

        match elem.attr("type").unwrap_or("") {
            "get" => {
                xmpp_stream.write_raw(&legacy_auth::build_fields_response(&id)).await?;
                Ok(None)
            }
            "set" => {
                let Some(req) = legacy_auth::parse_request(&elem) else {
                    xmpp_stream.write_raw(&legacy_auth::build_error(&id, "not-acceptable", "modify")).await?;
                    return Ok(None);
                };

                if !self.deps.auth_hook.check_password(&req.username, &req.password).await {
                    xmpp_stream.write_raw(&legacy_auth::build_error(&id, "not-authorized", "auth")).await?;
                    return Ok(None);
                }

                let server_host = xmpp_stream.client_header().and_then(|h| h.to.clone()).unwrap_or_default();
                let bare: BareJid = match format!("{}@{server_host}", req.username).parse() {
                    Ok(j) => j,
                    Err(_) => {
                        xmpp_stream.write_raw(&legacy_auth::build_error(&id, "not-acceptable", "modify")).await?;
                        return Ok(None);
                    }
                };
                let full_jid = match bare.with_resource_str(&req.resource) {
                    Ok(j) => j,
                    Err(_) => {
                        xmpp_stream.write_raw(&legacy_auth::build_error(&id, "not-acceptable", "modify")).await?;
                        return Ok(None);
                    }
                };

                self.deps.auth_hook.bind(&bare).await;
                match self.deps.session_hook.bind(&full_jid).await {
                    Ok(true) => {}
                    Ok(false) => {
                        xmpp_stream.write_raw(&legacy_auth::build_error(&id, "conflict", "cancel")).await?;
                        return Ok(None);
                    }
                    Err(e) => {
                        warn!(error = %e, "legacy auth bind failed");
                        xmpp_stream.write_raw(&legacy_auth::build_error(&id, "internal-server-error", "wait")).await?;
                        return Ok(None);
                    }
                }
                self.deps.roster_hook.bind(&full_jid).await;

                xmpp_stream.write_raw(&legacy_auth::build_success(&id)).await?;
                Ok(Some(full_jid))
            }
            _ => {
                let resp = format!(
                    "<iq type='error' id='{id}'><error type='cancel'><service-unavailable xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error></iq>"
                );
                xmpp_stream.write_raw(&resp).await?;
                Ok(None)
            }
        }
    }

    /// Attempt one SASL mechanism. Returns `Ok(Some(bare_jid))` on success,
    /// `Ok(None)` if the client aborted (caller should go back to reading
    /// pre-auth events), or `Err` on a fatal stream error.
    async fn try_sasl(&self, xmpp_stream: &mut XmppStream, req: SaslAuthRequest) -> Result<Option<BareJid>, XmppError> {
        let mechanism = match SaslMechanism::from_name(&req.mechanism) {
            Some(m) => m,
            None => {
                xmpp_stream.send_sasl_failure("invalid-mechanism").await?;
                return Ok(None);
            }
        };

        if !auth::available_mechanisms(&self.deps.config).contains(&mechanism) {
            xmpp_stream.send_sasl_failure("invalid-mechanism").await?;
            return Ok(None);
        }

        match mechanism {
            SaslMechanism::Anonymous => {
                let username = format!("anon-{}", Uuid::new_v4());
                let domain = xmpp_stream.client_header().and_then(|h| h.to.clone()).unwrap_or_default();
                let bare: BareJid = format!("{username}@{domain}").parse().map_err(|_| {
                    XmppError::auth_failed(Some("anonymous JID construction failed".to_string()))
                })?;
                xmpp_stream.send_sasl_success().await?;
                Ok(Some(bare))
            }
            SaslMechanism::External => {
                xmpp_stream.send_sasl_failure("invalid-mechanism").await?;
                Ok(None)
            }
            SaslMechanism::Plain => {
                let creds = match auth::parse_plain(&req.initial_response) {
                    Ok(c) => c,
                    Err(_) => {
                        xmpp_stream.send_sasl_failure("malformed-request").await?;
                        return Ok(None);
                    }
                };
                self.try_plain(xmpp_stream, creds).await
            }
            SaslMechanism::Legacy => unreachable!("Legacy is never produced by SaslMechanism::from_name"),
        }
    }

    async fn try_plain(&self, xmpp_stream: &mut XmppStream, creds: SaslCredentials) -> Result<Option<BareJid>, XmppError> {
        let server_host = xmpp_stream.client_header().and_then(|h| h.to.clone()).unwrap_or_default();

        if !auth::authzid_is_valid(creds.authzid.as_deref(), &creds.authcid, &server_host) {
            xmpp_stream.send_sasl_failure("invalid-authzid").await?;
            return Ok(None);
        }

        let ok = match auth::classify_plain_password(&creds.password) {
            PlainCredentialKind::WebUser => {
                if !self.deps.config.allow_webuser_login {
                    false
                } else {
                    self.deps.auth_hook.check_webuser(&creds.authcid).await
                }
            }
            PlainCredentialKind::Token(token) => self.deps.auth_hook.check_token(&creds.authcid, &token).await,
            PlainCredentialKind::Password(password) => {
                if !self.deps.config.allow_plain_password {
                    false
                } else {
                    self.deps.auth_hook.check_password(&creds.authcid, &password).await
                }
            }
        };

        if !ok {
            xmpp_stream.send_sasl_failure("not-authorized").await?;
            return Ok(None);
        }

        let bare: BareJid = format!("{}@{}", creds.authcid, server_host).parse().map_err(|_| {
            XmppError::auth_failed(Some("invalid username for JID construction".to_string()))
        })?;
        xmpp_stream.send_sasl_success().await?;
        Ok(Some(bare))
    }

    /// Drive resource binding to a success, retrying with a fresh resource
    /// on conflict (§4.D / §4.E). Does not yet touch the registry or IPC bus
    /// — those are wired up once the bound loop actually starts, so their
    /// lifetime matches the loop that drains them.
    async fn bind_resource(&self, xmpp_stream: &mut XmppStream, bare_jid: &BareJid) -> Result<FullJid, XmppError> {
        let session_hook = Arc::clone(&self.deps.session_hook);
        let bare = bare_jid.clone();
        let full_jid = xmpp_stream
            .handle_bind(bare_jid, move |candidate: FullJid| {
                let session_hook = Arc::clone(&session_hook);
                let bare = bare.clone();
                async move {
                    debug_assert_eq!(candidate.to_bare(), bare);
                    session_hook.bind(&candidate).await
                }
            })
            .await?;

        self.deps.roster_hook.bind(&full_jid).await;

        Ok(full_jid)
    }

    /// The bound dispatch loop: read client stanzas, dispatch IPC events,
    /// until the client disconnects or the stream is cancelled.
    #[instrument(skip_all, fields(jid = %bound.jid))]
    async fn bound_loop(
        &self,
        xmpp_stream: &mut XmppStream,
        bound: &BoundState,
        mut ipc_rx: tokio::sync::mpsc::Receiver<IpcEvent>,
        mut reg_rx: tokio::sync::mpsc::Receiver<crate::registry::OutboundStanza>,
        shutdown: CancellationToken,
    ) -> Result<(), XmppError> {
        let initial = build_available_presence(&bound.jid, &bound.jid.to_bare(), None, None, 0);
        self.broadcast_initial_presence(bound, &initial).await;
        self.replay_pending_subscriptions(xmpp_stream, bound).await?;

        let carbons_enabled = AtomicBool::new(false);
        let interested = AtomicBool::new(false);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, closing connection");
                    break;
                }
                event = ipc_rx.recv() => {
                    match event {
                        Some(ev) => self.handle_ipc_event(xmpp_stream, bound, &carbons_enabled, ev).await?,
                        None => break,
                    }
                }
                outbound = reg_rx.recv() => {
                    match outbound {
                        Some(crate::registry::OutboundStanza { stanza }) => {
                            xmpp_stream.write_raw(&crate::parser::element_to_string(&stanza.to_element())?).await?;
                        }
                        None => break,
                    }
                }
                stanza = xmpp_stream.read_stanza() => {
                    match stanza? {
                        Some(Stanza::Message(msg)) => {
                            self.handle_message(xmpp_stream, bound, msg).await?;
                        }
                        Some(Stanza::Presence(pres)) => {
                            self.handle_presence(xmpp_stream, bound, pres).await?;
                        }
                        Some(Stanza::Iq(iq)) => {
                            self.handle_iq(xmpp_stream, bound, &carbons_enabled, &interested, iq).await?;
                        }
                        None => {
                            debug!("peer closed stream");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn broadcast_initial_presence(&self, bound: &BoundState, available: &Presence) {
        let group = IpcBus::user_group(bound.jid.node().unwrap_or(""));
        let xml: Element = available.clone().into();
        self.deps
            .ipc_bus
            .group_send(
                &group,
                IpcEvent {
                    kind: IpcEventKind::PresenceAvailable,
                    origin: bound.channel_id,
                    from: bound.jid.clone(),
                    xml: Some(xml),
                },
            )
            .await;
    }

    /// Replay stored `<presence type='subscribe'/>` requests still pending
    /// approval, after the initial presence broadcast (§4.G).
    async fn replay_pending_subscriptions(
        &self,
        xmpp_stream: &mut XmppStream,
        bound: &BoundState,
    ) -> Result<(), XmppError> {
        let owner = bound.jid.to_bare();
        if let Some(pending) = self.deps.roster_hook.get_pending(&owner).await {
            for contact in pending {
                xmpp_stream.write_raw(&contact.stanza).await?;
            }
        }
        Ok(())
    }

    // ---- message handling (§4.H) ----

    async fn handle_message(
        &self,
        xmpp_stream: &mut XmppStream,
        bound: &BoundState,
        mut msg: Message,
    ) -> Result<(), XmppError> {
        let from = bound.jid.clone();
        msg.from = Some(Jid::Full(from.clone()));

        let to = match msg.to.clone() {
            Some(to) => to,
            None => {
                return self.send_stanza_error(xmpp_stream, msg.into(), XmppError::bad_request(Some(
                    "message has no 'to'".to_string(),
                ))).await;
            }
        };

        let to = if to.node().is_none() {
            Jid::Bare(format!("{}@{}", to.domain().as_str(), bound.jid.domain().as_str()).parse().map_err(|_| {
                XmppError::bad_request(Some("invalid coerced local JID".to_string()))
            })?)
        } else {
            to
        };

        if to.domain().as_str() != bound.jid.domain().as_str() {
            return self
                .send_stanza_error(xmpp_stream, msg.into(), XmppError::remote_server_not_found(None))
                .await;
        }

        let is_private = msg.payloads.iter().any(|p| p.name() == "private" && p.ns() == carbons::CARBONS_NS);
        let group = IpcBus::user_group(to.node().map(|n| n.as_str()).unwrap_or(""));

        let kind = if is_private { IpcEventKind::MessagingPrivate } else { IpcEventKind::MessagingMessage };
        let xml: Element = msg.clone().into();
        self.deps
            .ipc_bus
            .group_send(
                &group,
                IpcEvent { kind, origin: bound.channel_id, from: from.clone(), xml: Some(xml) },
            )
            .await;

        if !is_private && carbons::should_copy_message(&msg) {
            let self_group = IpcBus::user_group(bound.jid.node().unwrap_or(""));
            let xml: Element = msg.into();
            self.deps
                .ipc_bus
                .group_send(
                    &self_group,
                    IpcEvent { kind: IpcEventKind::MessagingCarbon, origin: bound.channel_id, from, xml: Some(xml) },
                )
                .await;
        }

        Ok(())
    }

    // ---- presence handling (§4.G) ----

    async fn handle_presence(&self, xmpp_stream: &mut XmppStream, bound: &BoundState, mut pres: Presence) -> Result<(), XmppError> {
        pres.from = Some(Jid::Full(bound.jid.clone()));
        let bare = bound.jid.to_bare();

        let action = match parse_subscription_presence(&pres, &bare) {
            Ok(a) => a,
            Err(e) => return self.send_stanza_error(xmpp_stream, pres.into(), e).await,
        };

        match action {
            PresenceAction::PresenceUpdate(p) => self.handle_presence_update(bound, p).await,
            PresenceAction::Probe { from: _, to } => {
                let group = IpcBus::user_group(to.node().map(|n| n.as_str()).unwrap_or(""));
                let xml: Element = pres.into();
                self.deps
                    .ipc_bus
                    .group_send(
                        &group,
                        IpcEvent {
                            kind: IpcEventKind::PresenceProbe,
                            origin: bound.channel_id,
                            from: bound.jid.clone(),
                            xml: Some(xml),
                        },
                    )
                    .await;
                Ok(())
            }
            PresenceAction::Subscription(req) => self.handle_subscription(bound, req).await,
        }
    }

    async fn handle_presence_update(&self, bound: &BoundState, pres: Presence) -> Result<(), XmppError> {
        match pres.type_ {
            PresenceType::None => {
                if let Some(to) = pres.to.clone() {
                    // Directed presence: record it and send only to the target.
                    if let Ok(full) = to.try_into_full() {
                        bound.directed_presence.lock().unwrap().push(full.clone());
                        self.deps
                            .connection_registry
                            .send_to(&full, Stanza::Presence(pres))
                            .await;
                    }
                    return Ok(());
                }

                let priority = Some(pres.priority as i16);
                let stanza_xml = crate::parser::element_to_string(&pres.clone().into()).ok();
                self.deps.session_hook.set_presence(&bound.jid, priority, stanza_xml).await;

                let contacts = self.deps.roster_hook.get_contacts(&bound.jid.to_bare()).await.unwrap_or_default();

                let group = IpcBus::user_group(bound.jid.node().unwrap_or(""));
                let xml: Element = pres.clone().into();
                self.deps
                    .ipc_bus
                    .group_send(
                        &group,
                        IpcEvent {
                            kind: IpcEventKind::PresenceAvailable,
                            origin: bound.channel_id,
                            from: bound.jid.clone(),
                            xml: Some(xml.clone()),
                        },
                    )
                    .await;

                for contact in &contacts {
                    if matches!(contact.subscription, Subscription::From | Subscription::Both) {
                        let group = IpcBus::user_group(contact.jid.node().map(|n| n.as_str()).unwrap_or(""));
                        self.deps
                            .ipc_bus
                            .group_send(
                                &group,
                                IpcEvent {
                                    kind: IpcEventKind::PresenceAvailable,
                                    origin: bound.channel_id,
                                    from: bound.jid.clone(),
                                    xml: Some(xml.clone()),
                                },
                            )
                            .await;
                    }
                }

                for contact in &contacts {
                    if matches!(contact.subscription, Subscription::To | Subscription::Both) {
                        let group = IpcBus::user_group(contact.jid.node().map(|n| n.as_str()).unwrap_or(""));
                        let probe = Presence {
                            from: Some(Jid::Full(bound.jid.clone())),
                            to: Some(Jid::Bare(contact.jid.clone())),
                            ..Presence::new(PresenceType::None)
                        };
                        let mut probe = probe;
                        probe.type_ = xmpp_parsers::presence::Type::Probe;
                        let xml: Element = probe.into();
                        self.deps
                            .ipc_bus
                            .group_send(
                                &group,
                                IpcEvent {
                                    kind: IpcEventKind::PresenceProbe,
                                    origin: bound.channel_id,
                                    from: bound.jid.clone(),
                                    xml: Some(xml),
                                },
                            )
                            .await;
                    }
                }

                Ok(())
            }
            PresenceType::Unavailable => {
                let stanza_xml = crate::parser::element_to_string(&pres.clone().into()).ok();
                self.deps.session_hook.set_presence(&bound.jid, None, stanza_xml).await;

                let group = IpcBus::user_group(bound.jid.node().unwrap_or(""));
                let xml: Element = pres.into();
                self.deps
                    .ipc_bus
                    .group_send(
                        &group,
                        IpcEvent {
                            kind: IpcEventKind::PresenceUnavailable,
                            origin: bound.channel_id,
                            from: bound.jid.clone(),
                            xml: Some(xml.clone()),
                        },
                    )
                    .await;

                let contacts = self.deps.roster_hook.get_contacts(&bound.jid.to_bare()).await.unwrap_or_default();
                for contact in &contacts {
                    if matches!(contact.subscription, Subscription::From | Subscription::Both) {
                        let group = IpcBus::user_group(contact.jid.node().map(|n| n.as_str()).unwrap_or(""));
                        self.deps
                            .ipc_bus
                            .group_send(
                                &group,
                                IpcEvent {
                                    kind: IpcEventKind::PresenceUnavailable,
                                    origin: bound.channel_id,
                                    from: bound.jid.clone(),
                                    xml: Some(xml.clone()),
                                },
                            )
                            .await;
                    }
                }

                self.teardown_directed_presence(bound).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn teardown_directed_presence(&self, bound: &BoundState) {
        let targets = std::mem::take(&mut *bound.directed_presence.lock().unwrap());
        for target in targets {
            let unavailable = build_unavailable_presence(&bound.jid.to_bare(), &target.to_bare());
            self.deps
                .connection_registry
                .send_to(&target, Stanza::Presence(unavailable))
                .await;
        }
    }

    async fn handle_subscription(
        &self,
        bound: &BoundState,
        req: crate::presence::subscription::PresenceSubscriptionRequest,
    ) -> Result<(), XmppError> {
        let owner = bound.jid.to_bare();
        let contact = req.to.clone();
        let is_local = contact.domain() == bound.jid.domain();

        match req.subscription_type {
            SubscriptionType::Subscribe => {
                if is_local && !self.deps.auth_hook.valid_contact(contact.node().map(|n| n.as_str()).unwrap_or("")).await {
                    return Ok(());
                }
                let stanza_xml: Element = build_subscription_presence(
                    SubscriptionType::Subscribe,
                    &owner,
                    &contact,
                    req.status.as_deref(),
                ).into();
                let stanza_text = crate::parser::element_to_string(&stanza_xml).unwrap_or_default();
                let changed = matches!(
                    self.deps.roster_hook.outbound_subscribe(&owner, &contact, &stanza_text).await,
                    Ok(Some(_))
                );

                let pres = build_subscription_presence(SubscriptionType::Subscribe, &owner, &contact, req.status.as_deref());
                if is_local {
                    let group = IpcBus::user_group(contact.node().map(|n| n.as_str()).unwrap_or(""));
                    let xml: Element = pres.into();
                    self.deps
                        .ipc_bus
                        .group_send(
                            &group,
                            IpcEvent {
                                kind: IpcEventKind::PresenceSubscription,
                                origin: bound.channel_id,
                                from: bound.jid.clone(),
                                xml: Some(xml),
                            },
                        )
                        .await;
                }
                if changed {
                    self.push_roster_to_owner(bound, &owner).await;
                }
            }
            SubscriptionType::Subscribed => {
                if let Ok(Some(_)) = self.deps.roster_hook.outbound_subscribed(&owner, &contact).await {
                    let pres = build_subscription_presence(SubscriptionType::Subscribed, &owner, &contact, None);
                    let group = IpcBus::user_group(contact.node().map(|n| n.as_str()).unwrap_or(""));
                    let xml: Element = pres.into();
                    self.deps
                        .ipc_bus
                        .group_send(
                            &group,
                            IpcEvent {
                                kind: IpcEventKind::PresenceSubscribed,
                                origin: bound.channel_id,
                                from: bound.jid.clone(),
                                xml: Some(xml),
                            },
                        )
                        .await;
                    self.push_roster_to_owner(bound, &owner).await;
                }
            }
            SubscriptionType::Unsubscribe => {
                if let Ok(Some(_)) = self.deps.roster_hook.outbound_unsubscribe(&owner, &contact).await {
                    let pres = build_subscription_presence(SubscriptionType::Unsubscribe, &owner, &contact, None);
                    let group = IpcBus::user_group(contact.node().map(|n| n.as_str()).unwrap_or(""));
                    let xml: Element = pres.into();
                    self.deps
                        .ipc_bus
                        .group_send(
                            &group,
                            IpcEvent {
                                kind: IpcEventKind::PresenceSubscription,
                                origin: bound.channel_id,
                                from: bound.jid.clone(),
                                xml: Some(xml),
                            },
                        )
                        .await;
                    self.push_roster_to_owner(bound, &owner).await;
                }
            }
            SubscriptionType::Unsubscribed => {
                if let Ok(Some(_)) = self.deps.roster_hook.outbound_unsubscribed(&owner, &contact).await {
                    let pres = build_subscription_presence(SubscriptionType::Unsubscribed, &owner, &contact, None);
                    let group = IpcBus::user_group(contact.node().map(|n| n.as_str()).unwrap_or(""));
                    let xml: Element = pres.into();
                    self.deps
                        .ipc_bus
                        .group_send(
                            &group,
                            IpcEvent {
                                kind: IpcEventKind::PresenceUnsubscribed,
                                origin: bound.channel_id,
                                from: bound.jid.clone(),
                                xml: Some(xml),
                            },
                        )
                        .await;
                    self.push_roster_to_owner(bound, &owner).await;
                }
            }
        }
        Ok(())
    }

    /// Push a fresh roster snapshot to every resource of `owner` (§4.F).
    /// Peers re-fetch from the hook rather than trusting the push payload.
    async fn push_roster_to_owner(&self, bound: &BoundState, owner: &BareJid) {
        let group = IpcBus::user_group(owner.node().map(|n| n.as_str()).unwrap_or(""));
        self.deps
            .ipc_bus
            .group_send(
                &group,
                IpcEvent {
                    kind: IpcEventKind::RosterPush,
                    origin: bound.channel_id,
                    from: bound.jid.clone(),
                    xml: None,
                },
            )
            .await;
    }

    // ---- IPC inbound (§4.M) ----

    async fn handle_ipc_event(
        &self,
        xmpp_stream: &mut XmppStream,
        bound: &BoundState,
        carbons_enabled: &AtomicBool,
        event: IpcEvent,
    ) -> Result<(), XmppError> {
        match event.kind {
            IpcEventKind::PresenceAvailable | IpcEventKind::PresenceUnavailable => {
                if let Some(mut xml) = event.xml {
                    xml.set_attr("to", bound.jid.to_bare().to_string());
                    xmpp_stream.write_raw(&crate::parser::element_to_string(&xml)?).await?;
                }
            }
            IpcEventKind::PresenceProbe => {
                if event.from.to_bare() != bound.jid.to_bare() {
                    let available = build_available_presence(&bound.jid, &event.from.to_bare(), None, None, 0);
                    let group = IpcBus::user_group(event.from.node().map(|n| n.as_str()).unwrap_or(""));
                    let xml: Element = available.into();
                    self.deps
                        .ipc_bus
                        .group_send(
                            &group,
                            IpcEvent {
                                kind: IpcEventKind::PresenceAvailable,
                                origin: bound.channel_id,
                                from: bound.jid.clone(),
                                xml: Some(xml),
                            },
                        )
                        .await;
                }
            }
            IpcEventKind::PresenceSubscribed => {
                let owner = bound.jid.to_bare();
                let from = event.from.to_bare();
                if let Ok(Some(_)) = self.deps.roster_hook.inbound_subscribed(&owner, &from).await {
                    let available = build_available_presence(&bound.jid, &from, None, None, 0);
                    let xml: Element = available.into();
                    xmpp_stream.write_raw(&crate::parser::element_to_string(&xml)?).await?;
                    self.push_roster_to_owner(bound, &owner).await;
                }
            }
            IpcEventKind::PresenceUnsubscribed => {
                let owner = bound.jid.to_bare();
                let from = event.from.to_bare();
                if let Ok(Some(_)) = self.deps.roster_hook.inbound_unsubscribed(&owner, &from).await {
                    let unavailable = build_unavailable_presence(&owner, &from);
                    let xml: Element = unavailable.into();
                    xmpp_stream.write_raw(&crate::parser::element_to_string(&xml)?).await?;
                    self.push_roster_to_owner(bound, &owner).await;
                }
            }
            IpcEventKind::PresenceSubscription => {
                let Some(xml) = event.xml else { return Ok(()) };
                let Ok(pres) = Presence::try_from(xml.clone()) else { return Ok(()) };
                let owner = bound.jid.to_bare();
                let from = event.from.to_bare();
                let stanza_text = crate::parser::element_to_string(&xml).unwrap_or_default();

                match pres.type_ {
                    PresenceType::Subscribe => {
                        match self.deps.roster_hook.inbound_subscribe(&owner, &from, &stanza_text).await {
                            Ok(Some(crate::hooks::InboundSubscribeOutcome::PreApproved(_))) => {
                                let subscribed = build_subscription_presence(SubscriptionType::Subscribed, &owner, &from, None);
                                let reply_xml: Element = subscribed.into();
                                self.deps
                                    .ipc_bus
                                    .send(
                                        event.origin,
                                        IpcEvent {
                                            kind: IpcEventKind::PresenceSubscribed,
                                            origin: bound.channel_id,
                                            from: bound.jid.clone(),
                                            xml: Some(reply_xml),
                                        },
                                    )
                                    .await;
                                self.push_roster_to_owner(bound, &owner).await;
                            }
                            Ok(Some(_)) => {
                                xmpp_stream.write_raw(&stanza_text).await?;
                            }
                            Ok(None) | Err(_) => {}
                        }
                    }
                    PresenceType::Unsubscribe => {
                        if let Ok(Some(_)) = self.deps.roster_hook.inbound_unsubscribe(&owner, &from).await {
                            self.push_roster_to_owner(bound, &owner).await;
                        }
                    }
                    _ => {}
                }
            }
            IpcEventKind::RosterPush => {
                self.send_roster_push(xmpp_stream, bound).await?;
            }
            IpcEventKind::MessagingMessage | IpcEventKind::MessagingPrivate => {
                if event.origin == bound.channel_id {
                    return Ok(());
                }
                if let Some(mut xml) = event.xml {
                    let deliver = xml
                        .attr("to")
                        .and_then(|t| t.parse::<Jid>().ok())
                        .and_then(|j| j.try_into_full().ok())
                        .map(|full| full.resource() == bound.jid.resource())
                        .unwrap_or(true);

                    if deliver {
                        xml.set_attr("to", bound.jid.to_string());
                        xmpp_stream.write_raw(&crate::parser::element_to_string(&xml)?).await?;
                    } else if carbons_enabled.load(Ordering::Relaxed) && matches!(event.kind, IpcEventKind::MessagingMessage) {
                        if let Ok(msg) = Message::try_from(xml) {
                            let carbon = carbons::build_received_carbon(
                                &msg,
                                &bound.jid.to_bare().to_string(),
                                &bound.jid.to_string(),
                            );
                            let carbon_xml: Element = carbon.into();
                            xmpp_stream.write_raw(&crate::parser::element_to_string(&carbon_xml)?).await?;
                        }
                    }
                }
            }
            IpcEventKind::Iq => {
                if event.origin == bound.channel_id {
                    return Ok(());
                }
                if let Some(mut xml) = event.xml {
                    let deliver = xml
                        .attr("to")
                        .and_then(|t| t.parse::<Jid>().ok())
                        .and_then(|j| j.try_into_full().ok())
                        .map(|full| full.resource() == bound.jid.resource())
                        .unwrap_or(true);

                    if deliver {
                        xml.set_attr("to", bound.jid.to_string());
                        xmpp_stream.write_raw(&crate::parser::element_to_string(&xml)?).await?;
                    }
                }
            }
            IpcEventKind::MessagingCarbon => {
                if event.origin == bound.channel_id || event.from == bound.jid {
                    return Ok(());
                }
                if carbons_enabled.load(Ordering::Relaxed) {
                    if let Some(xml) = event.xml {
                        if let Ok(msg) = Message::try_from(xml) {
                            let carbon = carbons::build_sent_carbon(
                                &msg,
                                &bound.jid.to_bare().to_string(),
                                &bound.jid.to_string(),
                            );
                            let carbon_xml: Element = carbon.into();
                            xmpp_stream.write_raw(&crate::parser::element_to_string(&carbon_xml)?).await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn send_roster_push(&self, xmpp_stream: &mut XmppStream, bound: &BoundState) -> Result<(), XmppError> {
        let contacts = self.deps.roster_hook.get_contacts(&bound.jid.to_bare()).await.unwrap_or_default();
        for item in &contacts {
            let push_id = format!("push-{}", Uuid::new_v4());
            if let Ok(iq) = roster::build_roster_push(&push_id, &bound.jid.to_string(), item, None) {
                let xml: Element = iq.into();
                xmpp_stream.write_raw(&crate::parser::element_to_string(&xml)?).await.ok();
            }
        }
        Ok(())
    }

    // ---- IQ dispatch (roster, disco, ping, vcard, private storage, carbons, bind) ----

    async fn handle_iq(
        &self,
        xmpp_stream: &mut XmppStream,
        bound: &BoundState,
        carbons_enabled: &AtomicBool,
        interested: &AtomicBool,
        mut iq: Iq,
    ) -> Result<(), XmppError> {
        iq.from = Some(Jid::Full(bound.jid.clone()));

        if roster::is_roster_get(&iq) {
            interested.store(true, Ordering::Relaxed);
            let items = self.deps.roster_hook.get_contacts(&bound.jid.to_bare()).await.unwrap_or_default();
            let result = roster::build_roster_result(&iq, &items, None);
            return self.write_iq(xmpp_stream, result).await;
        }

        if roster::is_roster_set(&iq) {
            return self.handle_roster_set(xmpp_stream, bound, iq).await;
        }

        if disco::is_disco_info_query(&iq) {
            return self.handle_disco_info(xmpp_stream, bound, iq).await;
        }

        if disco::is_disco_items_query(&iq) {
            return self.handle_disco_items(xmpp_stream, bound, iq).await;
        }

        if xep0199::is_ping(&iq) {
            return self.write_iq(xmpp_stream, xep0199::build_ping_result(&iq)).await;
        }

        if xep0054::is_vcard_query(&iq) {
            return self.handle_vcard(xmpp_stream, iq).await;
        }

        if xep0049::is_private_storage_query(&iq) {
            return self.handle_private_storage(xmpp_stream, iq).await;
        }

        if carbons::is_carbons_enable(&iq) {
            carbons_enabled.store(true, Ordering::Relaxed);
            return self.write_iq(xmpp_stream, carbons::build_carbons_result(&iq)).await;
        }

        if carbons::is_carbons_disable(&iq) {
            carbons_enabled.store(false, Ordering::Relaxed);
            return self.write_iq(xmpp_stream, carbons::build_carbons_result(&iq)).await;
        }

        // Addressed to another local user's bare JID: relay through IPC.
        if let Some(to) = iq.to.clone() {
            if to.domain().as_str() == bound.jid.domain().as_str() && to.to_bare() != bound.jid.to_bare() {
                let group = IpcBus::user_group(to.node().map(|n| n.as_str()).unwrap_or(""));
                let xml: Element = iq.into();
                self.deps
                    .ipc_bus
                    .group_send(
                        &group,
                        IpcEvent {
                            kind: IpcEventKind::Iq,
                            origin: bound.channel_id,
                            from: bound.jid.clone(),
                            xml: Some(xml),
                        },
                    )
                    .await;
                return Ok(());
            }
        }

        let error = Iq {
            from: iq.to.clone(),
            to: iq.from.clone(),
            id: iq.id.clone(),
            payload: IqType::Error(
                XmppError::service_unavailable(None)
                    .to_error_element()
                    .unwrap_or_else(|| Element::builder("error", "jabber:client").build()),
            ),
        };
        self.write_iq(xmpp_stream, error).await
    }

    async fn handle_roster_set(&self, xmpp_stream: &mut XmppStream, bound: &BoundState, iq: Iq) -> Result<(), XmppError> {
        let owner = bound.jid.to_bare();
        let query: RosterQuery = match roster::parse_roster_set(&iq) {
            Ok(q) => q,
            Err(e) => return self.send_stanza_error(xmpp_stream, iq.into(), e).await,
        };

        let item = match query.items.first() {
            Some(i) => i.clone(),
            None => {
                return self
                    .send_stanza_error(xmpp_stream, iq.into(), XmppError::bad_request(Some("empty roster set".to_string())))
                    .await
            }
        };

        if item.jid == owner {
            return self
                .send_stanza_error(xmpp_stream, iq.into(), XmppError::not_allowed(None))
                .await;
        }

        let result: Result<RosterSetResult, XmppError> = if item.subscription.is_remove() {
            match self.deps.roster_hook.remove_contact(&owner, &item.jid).await {
                Ok(Some(true)) => Ok(RosterSetResult::Removed(item.jid.clone())),
                Ok(Some(false)) => Err(XmppError::not_allowed(Some("cannot remove contact with active subscription".to_string()))),
                Ok(None) => Ok(RosterSetResult::Removed(item.jid.clone())),
                Err(e) => Err(e),
            }
        } else {
            self.deps
                .roster_hook
                .update_contact(&owner, &item.jid, item.name.clone(), item.groups.clone())
                .await
                .map(RosterSetResult::Updated)
        };

        match result {
            Ok(set_result) => {
                self.write_iq(xmpp_stream, roster::build_roster_result_empty(&iq)).await?;
                self.push_roster_to_owner(bound, &owner).await;
                let _ = set_result;
                Ok(())
            }
            Err(e) => self.send_stanza_error(xmpp_stream, iq.into(), e).await,
        }
    }

    async fn handle_disco_info(&self, xmpp_stream: &mut XmppStream, bound: &BoundState, iq: Iq) -> Result<(), XmppError> {
        let query: DiscoInfoQuery = match disco::parse_disco_info_query(&iq) {
            Ok(q) => q,
            Err(e) => return self.send_stanza_error(xmpp_stream, iq.into(), e).await,
        };

        let target = query.target.clone().unwrap_or_default();
        let is_server = target.is_empty() || target == bound.jid.domain().as_str();

        if is_server {
            let identities = vec![Identity::server(Some(&self.deps.config.effective_domain(bound.jid.domain().as_str())))];
            let features = disco::server_features(self.deps.config.allow_registration);
            let resp = disco::build_disco_info_response(&iq, &identities, &features, query.node.as_deref());
            return self.write_iq(xmpp_stream, resp).await;
        }

        let target_bare: BareJid = match target.parse() {
            Ok(j) => j,
            Err(_) => return self.send_stanza_error(xmpp_stream, iq.into(), XmppError::item_not_found(None)).await,
        };

        if target_bare != bound.jid.to_bare() {
            let contact = self.deps.roster_hook.get_contact(&bound.jid.to_bare(), &target_bare).await.unwrap_or(None);
            let authorized = contact
                .map(|c| matches!(c.subscription, Subscription::To | Subscription::Both))
                .unwrap_or(false);
            if !authorized {
                return self.send_stanza_error(xmpp_stream, iq.into(), XmppError::forbidden(None)).await;
            }
        }

        let identities = vec![Identity::new("account", "registered", None)];
        let features = vec![Feature::disco_info()];
        let resp = disco::build_disco_info_response(&iq, &identities, &features, query.node.as_deref());
        self.write_iq(xmpp_stream, resp).await
    }

    async fn handle_disco_items(&self, xmpp_stream: &mut XmppStream, bound: &BoundState, iq: Iq) -> Result<(), XmppError> {
        let query: DiscoItemsQuery = match disco::parse_disco_items_query(&iq) {
            Ok(q) => q,
            Err(e) => return self.send_stanza_error(xmpp_stream, iq.into(), e).await,
        };

        let target = query.target.clone().unwrap_or_default();
        if target.is_empty() || target == bound.jid.domain().as_str() {
            let resp = disco::build_disco_items_response(&iq, &[], query.node.as_deref());
            return self.write_iq(xmpp_stream, resp).await;
        }

        let target_bare: BareJid = match target.parse() {
            Ok(j) => j,
            Err(_) => return self.send_stanza_error(xmpp_stream, iq.into(), XmppError::item_not_found(None)).await,
        };

        let resources = self.deps.session_hook.get_all_resources(target_bare.node().unwrap_or("")).await;
        let items: Vec<_> = resources
            .into_iter()
            .map(|(resource, _priority)| {
                crate::disco::DiscoItem::new(&format!("{target_bare}/{resource}"), None, None)
            })
            .collect();
        let resp = disco::build_disco_items_response(&iq, &items, query.node.as_deref());
        self.write_iq(xmpp_stream, resp).await
    }

    async fn handle_vcard(&self, xmpp_stream: &mut XmppStream, iq: Iq) -> Result<(), XmppError> {
        match xep0054::is_vcard_get(&iq) {
            true => self.write_iq(xmpp_stream, xep0054::build_empty_vcard_response(&iq)).await,
            false => self.write_iq(xmpp_stream, xep0054::build_vcard_success(&iq)).await,
        }
    }

    async fn handle_private_storage(&self, xmpp_stream: &mut XmppStream, iq: Iq) -> Result<(), XmppError> {
        if let Some(key) = xep0049::parse_private_storage_get(&iq) {
            let resp = xep0049::build_private_storage_result(&iq, None, &key);
            return self.write_iq(xmpp_stream, resp).await;
        }
        if xep0049::parse_private_storage_set(&iq).is_some() {
            return self.write_iq(xmpp_stream, xep0049::build_private_storage_success(&iq)).await;
        }
        self.send_stanza_error(xmpp_stream, iq.into(), XmppError::bad_request(None)).await
    }

    async fn write_iq(&self, xmpp_stream: &mut XmppStream, iq: Iq) -> Result<(), XmppError> {
        xmpp_stream.write_stanza(&Stanza::Iq(iq)).await
    }

    async fn send_stanza_error(&self, xmpp_stream: &mut XmppStream, elem: Element, error: XmppError) -> Result<(), XmppError> {
        let Some(error_elem) = error.to_error_element() else {
            warn!(error = %error, "non-stanza error surfaced at stanza boundary, dropping");
            return Ok(());
        };

        let mut reply = elem;
        let to = reply.attr("from").map(|s| s.to_string());
        let from = reply.attr("to").map(|s| s.to_string());
        reply.set_attr("type", "error");
        if let Some(to) = to {
            reply.set_attr("to", to);
        }
        if let Some(from) = from {
            reply.set_attr("from", from);
        }
        reply.append_child(error_elem);
        xmpp_stream.write_raw(&crate::parser::element_to_string(&reply)?).await
    }

    async fn teardown(&self, bound: &BoundState) {
        self.deps.connection_registry.unregister(&bound.jid);
        let group = IpcBus::user_group(bound.jid.node().unwrap_or(""));
        self.deps.ipc_bus.group_remove(&group, bound.channel_id);
        self.deps.ipc_bus.close_channel(bound.channel_id);
        self.deps.session_hook.unbind(&bound.jid).await;
        self.deps.roster_hook.unbind(&bound.jid).await;
        self.deps.auth_hook.unbind(&bound.jid.to_bare()).await;
        info!(peer = %self.peer_addr, "connection torn down");
    }
}

/// XEP-0078 Non-SASL (legacy) authentication. Small enough, and specific
/// enough to this server's pre-auth `<iq/>` dispatch, not to warrant its
/// own module alongside the XEPs in `crate::xep`.
mod legacy_auth {
    use minidom::Element;

    pub const NS_AUTH: &str = "jabber:iq:auth";

    pub struct LegacyAuthRequest {
        pub username: String,
        pub password: String,
        pub resource: String,
    }

    /// Parse a `jabber:iq:auth` `set` request. `None` if username, password,
    /// or resource is missing.
    pub fn parse_request(elem: &Element) -> Option<LegacyAuthRequest> {
        let query = elem.get_child("query", NS_AUTH)?;
        let username = query.get_child("username", NS_AUTH).map(|e| e.text()).filter(|s| !s.is_empty())?;
        let password = query.get_child("password", NS_AUTH).map(|e| e.text()).unwrap_or_default();
        let resource = query.get_child("resource", NS_AUTH).map(|e| e.text()).filter(|s| !s.is_empty())?;
        Some(LegacyAuthRequest { username, password, resource })
    }

    /// Build the fields response to a `jabber:iq:auth` `get` request.
    pub fn build_fields_response(id: &str) -> String {
        format!(
            "<iq type='result' id='{id}'>\
                <query xmlns='{NS_AUTH}'>\
                    <username/>\
                    <password/>\
                    <resource/>\
                </query>\
            </iq>"
        )
    }

    pub fn build_success(id: &str) -> String {
        format!("<iq type='result' id='{id}'/>")
    }

    pub fn build_error(id: &str, condition: &str, error_type: &str) -> String {
        format!(
            "<iq type='error' id='{id}'>\
                <query xmlns='{NS_AUTH}'/>\
                <error type='{error_type}'>\
                    <{condition} xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
                </error>\
            </iq>"
        )
    }
}

/// Parsed stanza types shared across the connection and registry layers.
#[derive(Debug, Clone)]
pub enum Stanza {
    Message(xmpp_parsers::message::Message),
    Presence(xmpp_parsers::presence::Presence),
    Iq(xmpp_parsers::iq::Iq),
}

impl Stanza {
    /// Get the stanza type name for tracing.
    pub fn name(&self) -> &'static str {
        match self {
            Stanza::Message(_) => "message",
            Stanza::Presence(_) => "presence",
            Stanza::Iq(_) => "iq",
        }
    }

    /// Convert the stanza to a minidom Element.
    pub fn to_element(&self) -> minidom::Element {
        match self {
            Stanza::Message(m) => m.clone().into(),
            Stanza::Presence(p) => p.clone().into(),
            Stanza::Iq(i) => i.clone().into(),
        }
    }
}
