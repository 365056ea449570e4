//! WebSocket transport framing (§4.K, RFC 7395).
//!
//! Grounded in `xmpp.websockets.WSOpen`/`WSClose`/`WSStream.send_init`: the
//! `<open/>`/`<close/>` framing elements replace the TCP stream header and
//! closing tag, and carry the same attributes (`from`, `id`, `version`) the
//! TCP prolog would. Everything else about the stream (features, stanzas)
//! is identical to [`crate::parser`]/[`crate::stream`]; only the prolog and
//! epilogue differ, so this module only builds/recognizes those two
//! elements plus the subprotocol check.

use minidom::Element;

/// Namespace for the WebSocket framing elements (RFC 7395 §3.3.1, §3.3.2).
pub const FRAMING_NS: &str = "urn:ietf:params:xml:ns:xmpp-framing";

/// The `Sec-WebSocket-Protocol` token an RFC 7395 client/server must
/// negotiate. A handshake lacking this in its requested protocol list MUST
/// be rejected before any XMPP framing is attempted.
pub const SUBPROTOCOL: &str = "xmpp";

/// Whether the client's requested subprotocol list includes `xmpp`
/// (case-insensitive, comma-separated per RFC 6455 §11.3.4).
pub fn negotiates_xmpp_subprotocol(requested: &str) -> bool {
    requested
        .split(',')
        .map(|s| s.trim())
        .any(|s| s.eq_ignore_ascii_case(SUBPROTOCOL))
}

/// Build the `<open/>` framing element that opens a WebSocket-transported
/// stream (replaces the TCP `<stream:stream>` prolog).
pub fn build_open(from: &str, id: &str, version: &str) -> Element {
    Element::builder("open", FRAMING_NS)
        .attr("from", from)
        .attr("id", id)
        .attr("version", version)
        .build()
}

/// Build the `<close/>` framing element that ends a WebSocket-transported
/// stream (replaces the TCP `</stream:stream>` epilogue).
pub fn build_close() -> Element {
    Element::builder("close", FRAMING_NS).build()
}

/// Build a `<close/>` carrying a `see-other-uri` for stream redirection.
pub fn build_close_redirect(uri: &str) -> Element {
    Element::builder("close", FRAMING_NS)
        .append(Element::builder("see-other-uri", FRAMING_NS).append(uri).build())
        .build()
}

/// Whether `elem` is a framing `<open/>` element.
pub fn is_open(elem: &Element) -> bool {
    elem.name() == "open" && elem.ns() == FRAMING_NS
}

/// Whether `elem` is a framing `<close/>` element.
pub fn is_close(elem: &Element) -> bool {
    elem.name() == "close" && elem.ns() == FRAMING_NS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subprotocol_negotiation_is_case_insensitive_and_list_aware() {
        assert!(negotiates_xmpp_subprotocol("XMPP"));
        assert!(negotiates_xmpp_subprotocol("chat, xmpp, other"));
        assert!(!negotiates_xmpp_subprotocol("soap"));
    }

    #[test]
    fn open_element_carries_framing_attributes() {
        let open = build_open("example.com", "abc123", "1.0");
        assert!(is_open(&open));
        assert_eq!(open.attr("from"), Some("example.com"));
        assert_eq!(open.attr("id"), Some("abc123"));
        assert_eq!(open.attr("version"), Some("1.0"));
    }

    #[test]
    fn close_element_is_recognized() {
        let close = build_close();
        assert!(is_close(&close));
        assert!(!is_open(&close));
    }

    #[test]
    fn close_redirect_carries_see_other_uri() {
        let close = build_close_redirect("wss://other.example.com/ws");
        assert!(close
            .children()
            .any(|c| c.name() == "see-other-uri" && c.text() == "wss://other.example.com/ws"));
    }
}
