//! Error types for the XMPP server.

use thiserror::Error;

/// RFC 6120 §8.3.3 defined-condition element names for stanza errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorCondition {
    BadRequest,
    Conflict,
    Forbidden,
    ItemNotFound,
    NotAcceptable,
    NotAllowed,
    NotAuthorized,
    RemoteServerNotFound,
    RemoteConnectionFailed,
    ServiceUnavailable,
    InternalServerError,
}

impl StanzaErrorCondition {
    /// The element name as it appears inside `<error/>`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::Conflict => "conflict",
            Self::Forbidden => "forbidden",
            Self::ItemNotFound => "item-not-found",
            Self::NotAcceptable => "not-acceptable",
            Self::NotAllowed => "not-allowed",
            Self::NotAuthorized => "not-authorized",
            Self::RemoteServerNotFound => "remote-server-not-found",
            Self::RemoteConnectionFailed => "remote-connection-failed",
            Self::ServiceUnavailable => "service-unavailable",
            Self::InternalServerError => "internal-server-error",
        }
    }
}

/// SASL `<failure/>` condition names (RFC 6120 §6.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureCondition {
    Aborted,
    IncorrectEncoding,
    InvalidAuthzid,
    InvalidMechanism,
    MalformedRequest,
    NotAuthorized,
    TemporaryAuthFailure,
}

impl AuthFailureCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aborted => "aborted",
            Self::IncorrectEncoding => "incorrect-encoding",
            Self::InvalidAuthzid => "invalid-authzid",
            Self::InvalidMechanism => "invalid-mechanism",
            Self::MalformedRequest => "malformed-request",
            Self::NotAuthorized => "not-authorized",
            Self::TemporaryAuthFailure => "temporary-auth-failure",
        }
    }
}

/// XMPP server errors.
#[derive(Debug, Error)]
pub enum XmppError {
    /// IO error (network, file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// XML parsing error
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// Fatal stream-level error (§7): malformed XML, version mismatch,
    /// policy violation. The stream is closed after this is sent.
    #[error("Stream error: {0}")]
    Stream { condition: String },

    /// Per-stanza error answered with `<iq/message/presence type='error'>`;
    /// the stream stays open.
    #[error("Stanza error: {condition:?}{}", text.as_deref().map(|t| format!(" ({t})")).unwrap_or_default())]
    Stanza {
        condition: StanzaErrorCondition,
        text: Option<String>,
    },

    /// SASL authentication failure; answered with `<failure/>`, stream stays open.
    #[error("Authentication failed: {condition:?}")]
    Auth { condition: AuthFailureCondition },

    /// Terminal BOSH protocol error; answered with `<body type='terminate'>`.
    #[error("BOSH error: {condition}")]
    Bosh { condition: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error, not attributable to client input.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl XmppError {
    pub fn xml_parse(msg: impl Into<String>) -> Self {
        Self::XmlParse(msg.into())
    }

    pub fn stream(condition: impl Into<String>) -> Self {
        Self::Stream {
            condition: condition.into(),
        }
    }

    pub fn bosh(condition: impl Into<String>) -> Self {
        Self::Bosh {
            condition: condition.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn auth_failed(_msg: impl Into<String>) -> Self {
        Self::Auth {
            condition: AuthFailureCondition::NotAuthorized,
        }
    }

    pub fn auth_failure(condition: AuthFailureCondition) -> Self {
        Self::Auth { condition }
    }

    pub fn bad_request(text: Option<String>) -> Self {
        Self::Stanza {
            condition: StanzaErrorCondition::BadRequest,
            text,
        }
    }

    pub fn not_acceptable(text: Option<String>) -> Self {
        Self::Stanza {
            condition: StanzaErrorCondition::NotAcceptable,
            text,
        }
    }

    pub fn not_allowed(text: Option<String>) -> Self {
        Self::Stanza {
            condition: StanzaErrorCondition::NotAllowed,
            text,
        }
    }

    pub fn not_authorized(text: Option<String>) -> Self {
        Self::Stanza {
            condition: StanzaErrorCondition::NotAuthorized,
            text,
        }
    }

    pub fn forbidden(text: Option<String>) -> Self {
        Self::Stanza {
            condition: StanzaErrorCondition::Forbidden,
            text,
        }
    }

    pub fn conflict(text: Option<String>) -> Self {
        Self::Stanza {
            condition: StanzaErrorCondition::Conflict,
            text,
        }
    }

    pub fn item_not_found(text: Option<String>) -> Self {
        Self::Stanza {
            condition: StanzaErrorCondition::ItemNotFound,
            text,
        }
    }

    pub fn service_unavailable(text: Option<String>) -> Self {
        Self::Stanza {
            condition: StanzaErrorCondition::ServiceUnavailable,
            text,
        }
    }

    pub fn remote_server_not_found(text: Option<String>) -> Self {
        Self::Stanza {
            condition: StanzaErrorCondition::RemoteServerNotFound,
            text,
        }
    }

    pub fn internal_server_error(text: Option<String>) -> Self {
        Self::Stanza {
            condition: StanzaErrorCondition::InternalServerError,
            text,
        }
    }

    /// Build the `<error/>` child element for a stanza-level error reply.
    pub fn to_error_element(&self) -> Option<minidom::Element> {
        match self {
            Self::Stanza { condition, text } => {
                let mut builder = minidom::Element::builder("error", "jabber:client").attr(
                    "type",
                    match condition {
                        StanzaErrorCondition::BadRequest
                        | StanzaErrorCondition::NotAcceptable
                        | StanzaErrorCondition::ItemNotFound
                        | StanzaErrorCondition::RemoteServerNotFound
                        | StanzaErrorCondition::RemoteConnectionFailed => "modify",
                        StanzaErrorCondition::Forbidden
                        | StanzaErrorCondition::NotAllowed
                        | StanzaErrorCondition::NotAuthorized => "auth",
                        StanzaErrorCondition::Conflict
                        | StanzaErrorCondition::ServiceUnavailable => "cancel",
                        StanzaErrorCondition::InternalServerError => "wait",
                    },
                );
                builder = builder.append(
                    minidom::Element::builder(
                        condition.as_str(),
                        "urn:ietf:params:xml:ns:xmpp-stanzas",
                    )
                    .build(),
                );
                if let Some(text) = text {
                    builder = builder.append(
                        minidom::Element::builder("text", "urn:ietf:params:xml:ns:xmpp-stanzas")
                            .append(text.as_str())
                            .build(),
                    );
                }
                Some(builder.build())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stanza_condition_names_match_rfc() {
        assert_eq!(StanzaErrorCondition::BadRequest.as_str(), "bad-request");
        assert_eq!(
            StanzaErrorCondition::RemoteServerNotFound.as_str(),
            "remote-server-not-found"
        );
    }

    #[test]
    fn to_error_element_builds_condition_child() {
        let err = XmppError::not_acceptable(Some("nope".to_string()));
        let elem = err.to_error_element().unwrap();
        assert_eq!(elem.name(), "error");
        assert!(elem.attr("type").is_some());
        assert!(elem
            .children()
            .any(|c| c.name() == "not-acceptable" && c.ns() == "urn:ietf:params:xml:ns:xmpp-stanzas"));
    }

    #[test]
    fn auth_failure_condition_names() {
        assert_eq!(AuthFailureCondition::Aborted.as_str(), "aborted");
        assert_eq!(
            AuthFailureCondition::TemporaryAuthFailure.as_str(),
            "temporary-auth-failure"
        );
    }
}
