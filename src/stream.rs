//! XML stream handling for XMPP connections (§4.C, §4.D).
//!
//! This module owns the wire-level framing: stream header exchange,
//! STARTTLS upgrade, feature advertisement, and the SASL `<auth>`/
//! `<response>`/`<abort>` exchange. Credential verification against an
//! [`crate::hooks::AuthHook`] and the post-auth stanza dispatch loop belong
//! to [`crate::connection`], which is async over the hook traits in a way
//! this module (plain read/write framing) does not need to be.

use base64::prelude::*;
use jid::{BareJid, FullJid};
use minidom::Element;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, instrument};
use xmpp_parsers::iq::Iq;
use xmpp_parsers::message::Message;
use xmpp_parsers::presence::Presence;

use crate::config::ServerConfig;
use crate::connection::Stanza;
use crate::parser::{element_to_string, ns, ParsedStanza, StreamHeader, XmlParser};
use crate::XmppError;

/// A client's `<auth/>` request, as read off the wire: the mechanism name
/// has already been validated against [`crate::auth::available_mechanisms`]
/// and [`crate::auth::SaslMechanism::from_name`] by the caller is not
/// assumed here — `mechanism` carries the raw wire name so the caller can
/// reject mechanisms it never advertised.
#[derive(Debug)]
pub struct SaslAuthRequest {
    pub mechanism: String,
    /// Base64-decoded initial response. Empty for a bare `<auth/>` with no
    /// content (used by ANONYMOUS and sometimes EXTERNAL).
    pub initial_response: Vec<u8>,
}

/// Outcome of reading the stanza that follows a `<challenge/>`.
#[derive(Debug)]
pub enum SaslContinuation {
    /// Base64-decoded `<response/>` content.
    Response(Vec<u8>),
    /// The client sent `<abort/>`.
    Aborted,
}

/// The next thing a client sends before authentication completes: a
/// STARTTLS request, a SASL `<auth/>`, or any other pre-auth `<iq/>`
/// (XEP-0077 registration, legacy XEP-0078 `<auth/>`). Unifying these into
/// one read loop lets the caller honor `tcp_require_tls` without the
/// stream forcing STARTTLS to come first when it is merely advertised,
/// not required.
#[derive(Debug)]
pub enum PreAuthEvent {
    StartTls,
    Auth(SaslAuthRequest),
    /// A pre-auth `<iq/>`, handed back as a raw element since its payload
    /// (register vs. legacy auth) is the caller's to interpret.
    Iq(Element),
}

/// XMPP stream handler.
///
/// Manages the XML stream lifecycle including STARTTLS upgrade,
/// SASL authentication, and stanza reading/writing.
pub struct XmppStream {
    /// The underlying stream (either TCP or TLS)
    inner: StreamInner,
    /// Incremental XML parser
    parser: XmlParser,
    /// Server domain
    domain: String,
    /// Current stream ID
    stream_id: String,
    /// Parsed client stream header
    client_header: Option<StreamHeader>,
}

#[derive(Default)]
enum StreamInner {
    #[default]
    None,
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl XmppStream {
    /// Create a new XMPP stream from a TCP connection.
    pub fn new(stream: TcpStream, domain: String) -> Self {
        Self {
            inner: StreamInner::Tcp(stream),
            parser: XmlParser::new(),
            domain,
            stream_id: uuid::Uuid::new_v4().to_string(),
            client_header: None,
        }
    }

    /// Get the parsed client stream header.
    pub fn client_header(&self) -> Option<&StreamHeader> {
        self.client_header.as_ref()
    }

    /// Get the current stream ID.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Whether the underlying transport is TLS-secured.
    pub fn is_tls(&self) -> bool {
        matches!(self.inner, StreamInner::Tls(_))
    }

    /// Read bytes from the underlying stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, XmppError> {
        match &mut self.inner {
            StreamInner::None => Err(XmppError::internal("Stream not initialized")),
            StreamInner::Tcp(s) => Ok(s.read(buf).await?),
            StreamInner::Tls(s) => Ok(s.read(buf).await?),
        }
    }

    /// Write bytes to the underlying stream.
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), XmppError> {
        match &mut self.inner {
            StreamInner::None => Err(XmppError::internal("Stream not initialized")),
            StreamInner::Tcp(s) => Ok(s.write_all(buf).await?),
            StreamInner::Tls(s) => Ok(s.write_all(buf).await?),
        }
    }

    /// Flush the write buffer.
    async fn flush(&mut self) -> Result<(), XmppError> {
        match &mut self.inner {
            StreamInner::None => Err(XmppError::internal("Stream not initialized")),
            StreamInner::Tcp(s) => Ok(s.flush().await?),
            StreamInner::Tls(s) => Ok(s.flush().await?),
        }
    }

    /// Read data into the parser buffer until we have a complete stream header.
    #[instrument(skip(self), name = "xmpp.stream.read_header")]
    pub async fn read_stream_header(&mut self) -> Result<StreamHeader, XmppError> {
        // Reset parser for new stream
        self.parser.reset();
        self.stream_id = uuid::Uuid::new_v4().to_string();

        let mut buf = [0u8; 4096];

        // Read until we have a complete stream header
        loop {
            let n = self.read(&mut buf).await?;

            if n == 0 {
                return Err(XmppError::stream("Connection closed during header"));
            }

            self.parser.feed(&buf[..n]);

            if self.parser.has_stream_header() {
                break;
            }
        }

        let header = self.parser.take_stream_header()?;
        header.validate()?;

        debug!(
            to = ?header.to,
            from = ?header.from,
            version = ?header.version,
            "Received stream header"
        );

        self.client_header = Some(header.clone());

        // Send our stream header response
        self.send_stream_header().await?;

        Ok(header)
    }

    /// Send the server's stream header.
    async fn send_stream_header(&mut self) -> Result<(), XmppError> {
        let response = format!(
            "<?xml version='1.0'?>\
            <stream:stream xmlns='jabber:client' \
            xmlns:stream='http://etherx.jabber.org/streams' \
            id='{}' from='{}' version='1.0'>",
            self.stream_id, self.domain
        );

        self.write_all(response.as_bytes()).await?;
        self.flush().await?;

        debug!(stream_id = %self.stream_id, "Sent stream header");
        Ok(())
    }

    /// Send stream features advertising STARTTLS.
    ///
    /// Per §4.C/§4.L, while `tcp_require_tls` is true and TLS is not yet up,
    /// `starttls` is the *only* feature advertised (with `<required/>`).
    #[instrument(skip(self), name = "xmpp.stream.send_features_starttls")]
    pub async fn send_features_starttls(&mut self, required: bool) -> Result<(), XmppError> {
        let required_elem = if required { "<required/>" } else { "" };
        let features = format!(
            "<stream:features>\
                <starttls xmlns='{}'>{}</starttls>\
            </stream:features>",
            ns::TLS, required_elem
        );

        self.write_all(features.as_bytes()).await?;
        self.flush().await?;

        debug!(required, "Sent STARTTLS features");
        Ok(())
    }

    /// Complete a STARTTLS upgrade after [`PreAuthEvent::StartTls`] has been
    /// observed: sends `<proceed/>` and upgrades the transport in place.
    #[instrument(skip(self, tls_acceptor), name = "xmpp.stream.starttls")]
    pub async fn complete_starttls(&mut self, tls_acceptor: TlsAcceptor) -> Result<(), XmppError> {
        let proceed = format!("<proceed xmlns='{}'/>", ns::TLS);
        match &mut self.inner {
            StreamInner::None => return Err(XmppError::internal("Stream not initialized")),
            StreamInner::Tcp(s) => {
                s.write_all(proceed.as_bytes()).await?;
                s.flush().await?;
            }
            StreamInner::Tls(_) => return Err(XmppError::stream("Already using TLS")),
        }

        let tcp_stream = match std::mem::take(&mut self.inner) {
            StreamInner::Tcp(s) => s,
            StreamInner::Tls(_) => return Err(XmppError::stream("Already using TLS")),
            StreamInner::None => return Err(XmppError::internal("Stream already taken")),
        };

        let tls_stream = tls_acceptor
            .accept(tcp_stream)
            .await
            .map_err(|e| XmppError::internal(format!("TLS accept error: {}", e)))?;

        self.inner = StreamInner::Tls(Box::new(tls_stream));
        self.parser.reset();

        debug!("TLS upgrade complete");

        Ok(())
    }

    /// Send pre-authentication stream features: SASL `mechanisms`, and
    /// optionally legacy `auth` (XEP-0078) and `register` (XEP-0077), per
    /// §4.C's feature-advertisement rules.
    #[instrument(skip(self, cfg), name = "xmpp.stream.send_features_sasl")]
    pub async fn send_features_sasl(&mut self, cfg: &ServerConfig) -> Result<(), XmppError> {
        let mechanisms = crate::auth::available_mechanisms(cfg);
        let mechanism_elems: String = mechanisms
            .iter()
            .map(|m| format!("<mechanism>{}</mechanism>", m))
            .collect();

        let mut features = format!(
            "<stream:features><mechanisms xmlns='{}'>{}</mechanisms>",
            ns::SASL, mechanism_elems
        );

        if crate::auth::legacy_auth_available(cfg) {
            features.push_str("<auth xmlns='http://jabber.org/features/iq-auth'/>");
        }
        if cfg.allow_registration {
            features.push_str(&format!(
                "<register xmlns='{}'/>",
                crate::xep::xep0077::NS_REGISTER
            ));
        }
        features.push_str("</stream:features>");

        self.write_all(features.as_bytes()).await?;
        self.flush().await?;

        debug!(mechanisms = ?mechanisms, "Sent SASL features");
        Ok(())
    }

    /// Read whichever pre-auth event the client sends next: STARTTLS,
    /// SASL `<auth/>`, or a pre-auth `<iq/>` (registration, legacy auth).
    ///
    /// Replaces a fixed "STARTTLS must come first" read loop: when TLS is
    /// merely advertised rather than required (`tcp_require_tls = false`),
    /// a client may go straight to SASL or legacy auth, and this method lets
    /// the caller honor that without blocking on a stanza kind that never
    /// arrives. Mechanism/credential validation is the caller's job.
    #[instrument(skip(self), name = "xmpp.stream.read_pre_auth")]
    pub async fn read_pre_auth_event(&mut self) -> Result<PreAuthEvent, XmppError> {
        let mut buf = [0u8; 4096];

        loop {
            if self.parser.has_complete_stanza() {
                match self.parser.next_stanza()? {
                    Some(ParsedStanza::StartTls) => {
                        debug!("Received STARTTLS request");
                        return Ok(PreAuthEvent::StartTls);
                    }
                    Some(ParsedStanza::SaslAuth { mechanism, data }) => {
                        debug!(mechanism = %mechanism, "Received SASL auth");
                        let initial_response = if data.trim().is_empty() {
                            Vec::new()
                        } else {
                            BASE64_STANDARD
                                .decode(data.trim())
                                .map_err(|e| XmppError::auth_failed(format!("Invalid base64: {}", e)))?
                        };
                        return Ok(PreAuthEvent::Auth(SaslAuthRequest { mechanism, initial_response }));
                    }
                    Some(ParsedStanza::SaslAbort) => {
                        return Err(XmppError::auth_failure(
                            crate::error::AuthFailureCondition::Aborted,
                        ));
                    }
                    Some(ParsedStanza::Iq(element)) => {
                        return Ok(PreAuthEvent::Iq(element));
                    }
                    _ => {}
                }
            }

            let n = self.read(&mut buf).await?;

            if n == 0 {
                return Err(XmppError::stream("Connection closed before authentication"));
            }

            self.parser.feed(&buf[..n]);
        }
    }

    /// Send a `<challenge/>` and suspend for the client's `<response/>` or
    /// `<abort/>` (§4.D). None of the four supported mechanisms currently
    /// require a multi-step exchange, but the primitive is exposed for
    /// mechanisms that do.
    pub async fn challenge(&mut self, data: &[u8]) -> Result<SaslContinuation, XmppError> {
        let challenge = format!(
            "<challenge xmlns='{}'>{}</challenge>",
            ns::SASL,
            BASE64_STANDARD.encode(data)
        );
        self.write_all(challenge.as_bytes()).await?;
        self.flush().await?;

        let mut buf = [0u8; 4096];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Err(XmppError::stream("Connection closed during SASL challenge"));
            }
            self.parser.feed(&buf[..n]);

            if self.parser.has_complete_stanza() {
                match self.parser.next_stanza()? {
                    Some(ParsedStanza::SaslResponse { data }) => {
                        let decoded = if data.trim().is_empty() {
                            Vec::new()
                        } else {
                            BASE64_STANDARD
                                .decode(data.trim())
                                .map_err(|e| XmppError::auth_failed(format!("Invalid base64: {}", e)))?
                        };
                        return Ok(SaslContinuation::Response(decoded));
                    }
                    Some(ParsedStanza::SaslAbort) => return Ok(SaslContinuation::Aborted),
                    _ => {}
                }
            }
        }
    }

    /// Send SASL success response.
    pub async fn send_sasl_success(&mut self) -> Result<(), XmppError> {
        let success = format!("<success xmlns='{}'/>", ns::SASL);
        self.write_all(success.as_bytes()).await?;
        self.flush().await?;
        debug!("Sent SASL success");
        Ok(())
    }

    /// Send SASL failure response with the given defined condition.
    pub async fn send_sasl_failure(&mut self, condition: &str) -> Result<(), XmppError> {
        let failure = format!("<failure xmlns='{}'><{}/></failure>", ns::SASL, condition);
        self.write_all(failure.as_bytes()).await?;
        self.flush().await?;
        Ok(())
    }

    /// Re-send post-authentication stream features after a stream restart:
    /// `bind`, `session` (optional), carbons (XEP-0280), and
    /// `feature_preapproval` (§4.C).
    #[instrument(skip(self), name = "xmpp.stream.send_features_bind")]
    pub async fn send_features_bind(&mut self) -> Result<(), XmppError> {
        let features = format!(
            "<stream:features>\
                <bind xmlns='{}'/>\
                <session xmlns='{}'>\
                    <optional/>\
                </session>\
                <xep_0280 xmlns='urn:xmpp:carbons:2'/>\
                <feature_preapproval xmlns='urn:xmpp:features:preapproval'/>\
            </stream:features>",
            ns::BIND, ns::SESSION
        );

        self.write_all(features.as_bytes()).await?;
        self.flush().await?;

        debug!("Sent post-auth features (bind, session, carbons, preapproval)");
        Ok(())
    }

    /// Handle resource binding. Retries with a fresh UUIDv4 resource on
    /// conflict via `try_bind`, until it reports success (§4.D, §4.E).
    #[instrument(skip(self, try_bind), name = "xmpp.stream.bind")]
    pub async fn handle_bind<F, Fut>(
        &mut self,
        bare_jid: &BareJid,
        try_bind: F,
    ) -> Result<FullJid, XmppError>
    where
        F: Fn(FullJid) -> Fut,
        Fut: std::future::Future<Output = Result<bool, XmppError>>,
    {
        let mut buf = [0u8; 4096];

        loop {
            let n = self.read(&mut buf).await?;

            if n == 0 {
                return Err(XmppError::stream("Connection closed during bind"));
            }

            self.parser.feed(&buf[..n]);

            if self.parser.has_complete_stanza() {
                if let Some(ParsedStanza::Iq(element)) = self.parser.next_stanza()? {
                    debug!("Received bind request");

                    let id = element.attr("id").unwrap_or("bind_1").to_string();
                    let iq_type = element.attr("type").unwrap_or("");

                    if iq_type != "set" {
                        return Err(XmppError::stream("Bind must be an IQ set"));
                    }

                    let requested_resource = element
                        .get_child("bind", ns::BIND)
                        .and_then(|bind| bind.get_child("resource", ns::BIND))
                        .map(|r| r.text());

                    let mut resource = requested_resource
                        .clone()
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

                    let full_jid = loop {
                        let candidate = bare_jid
                            .with_resource_str(&resource)
                            .map_err(|e| XmppError::stream(format!("Invalid resource: {}", e)))?;

                        if try_bind(candidate.clone()).await? {
                            break candidate;
                        }
                        // Conflict: generate a fresh resource and retry.
                        resource = uuid::Uuid::new_v4().to_string();
                    };

                    let result = format!(
                        "<iq type='result' id='{}'>\
                            <bind xmlns='{}'>\
                                <jid>{}</jid>\
                            </bind>\
                        </iq>",
                        id, ns::BIND, full_jid
                    );

                    self.write_all(result.as_bytes()).await?;
                    self.flush().await?;

                    debug!(jid = %full_jid, "Resource bound");
                    return Ok(full_jid);
                }
            }
        }
    }

    /// Read the next stanza from the stream.
    #[instrument(skip(self), name = "xmpp.stanza.read")]
    pub async fn read_stanza(&mut self) -> Result<Option<Stanza>, XmppError> {
        let mut buf = [0u8; 8192];

        loop {
            // First check if we already have a complete stanza buffered
            if self.parser.has_complete_stanza() {
                return self.process_parsed_stanza();
            }

            // Read more data
            let n = self.read(&mut buf).await?;

            if n == 0 {
                return Ok(None); // Connection closed
            }

            self.parser.feed(&buf[..n]);

            // Check again
            if self.parser.has_complete_stanza() {
                return self.process_parsed_stanza();
            }
        }
    }

    /// Process a parsed stanza from the parser.
    fn process_parsed_stanza(&mut self) -> Result<Option<Stanza>, XmppError> {
        match self.parser.next_stanza()? {
            Some(ParsedStanza::StreamEnd) => Ok(None),
            Some(ParsedStanza::Message(element)) => {
                let msg = element_to_message(element)?;
                Ok(Some(Stanza::Message(msg)))
            }
            Some(ParsedStanza::Presence(element)) => {
                let pres = element_to_presence(element)?;
                Ok(Some(Stanza::Presence(pres)))
            }
            Some(ParsedStanza::Iq(element)) => {
                let iq = element_to_iq(element)?;
                Ok(Some(Stanza::Iq(iq)))
            }
            Some(_) => {
                // Other stanza types (shouldn't happen at this point)
                debug!("Unexpected stanza type in established session");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Write a stanza to the stream.
    pub async fn write_stanza(&mut self, stanza: &Stanza) -> Result<(), XmppError> {
        let xml = stanza_to_xml(stanza)?;
        self.write_all(xml.as_bytes()).await?;
        self.flush().await?;
        Ok(())
    }

    /// Write raw XML to the stream.
    pub async fn write_raw(&mut self, xml: &str) -> Result<(), XmppError> {
        self.write_all(xml.as_bytes()).await?;
        self.flush().await?;
        Ok(())
    }

    /// Close the stream gracefully.
    pub async fn close(&mut self) -> Result<(), XmppError> {
        self.write_all(b"</stream:stream>").await?;
        self.flush().await?;
        Ok(())
    }
}

/// Convert a minidom Element to an xmpp_parsers Message.
fn element_to_message(element: Element) -> Result<Message, XmppError> {
    Message::try_from(element).map_err(|e| XmppError::xml_parse(format!("Invalid message: {:?}", e)))
}

/// Convert a minidom Element to an xmpp_parsers Presence.
fn element_to_presence(element: Element) -> Result<Presence, XmppError> {
    Presence::try_from(element)
        .map_err(|e| XmppError::xml_parse(format!("Invalid presence: {:?}", e)))
}

/// Convert a minidom Element to an xmpp_parsers Iq.
fn element_to_iq(element: Element) -> Result<Iq, XmppError> {
    Iq::try_from(element).map_err(|e| XmppError::xml_parse(format!("Invalid iq: {:?}", e)))
}

/// Convert a Stanza to XML string.
fn stanza_to_xml(stanza: &Stanza) -> Result<String, XmppError> {
    match stanza {
        Stanza::Message(msg) => {
            let element: Element = msg.clone().into();
            element_to_string(&element)
        }
        Stanza::Presence(pres) => {
            let element: Element = pres.clone().into();
            element_to_string(&element)
        }
        Stanza::Iq(iq) => {
            let element: Element = iq.clone().into();
            element_to_string(&element)
        }
    }
}
