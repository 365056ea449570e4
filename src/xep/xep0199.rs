//! XEP-0199: XMPP Ping
//!
//! A liveness check: an empty `<ping/>` IQ get answered with an empty
//! result. No state, no configuration — it exists so idle connections can
//! be probed without relying on whitespace keepalives.

use minidom::Element;
use xmpp_parsers::iq::Iq;

/// Namespace for XMPP Ping.
pub const NS_PING: &str = "urn:xmpp:ping";

/// Whether an IQ is a ping request.
pub fn is_ping(iq: &Iq) -> bool {
    matches!(&iq.payload, xmpp_parsers::iq::IqType::Get(elem) if elem.name() == "ping" && elem.ns() == NS_PING)
}

/// Build the empty result IQ that answers a ping.
pub fn build_ping_result(original_iq: &Iq) -> Iq {
    Iq {
        from: original_iq.to.clone(),
        to: original_iq.from.clone(),
        id: original_iq.id.clone(),
        payload: xmpp_parsers::iq::IqType::Result(None),
    }
}

/// Build a ping IQ to send to `to` (server-initiated liveness check).
pub fn build_ping_request(to: &str, id: &str) -> Element {
    Element::builder("iq", "jabber:client")
        .attr("type", "get")
        .attr("to", to)
        .attr("id", id)
        .append(Element::builder("ping", NS_PING).build())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping_iq() -> Iq {
        Iq {
            from: Some("alice@example.com/phone".parse().unwrap()),
            to: Some("example.com".parse().unwrap()),
            id: "ping1".to_string(),
            payload: xmpp_parsers::iq::IqType::Get(Element::builder("ping", NS_PING).build()),
        }
    }

    #[test]
    fn recognizes_ping_request() {
        assert!(is_ping(&ping_iq()));
    }

    #[test]
    fn rejects_wrong_namespace() {
        let mut iq = ping_iq();
        iq.payload = xmpp_parsers::iq::IqType::Get(Element::builder("ping", "wrong:ns").build());
        assert!(!is_ping(&iq));
    }

    #[test]
    fn result_swaps_from_and_to_and_keeps_id() {
        let iq = ping_iq();
        let result = build_ping_result(&iq);
        assert_eq!(result.id, "ping1");
        assert_eq!(result.from, iq.to);
        assert_eq!(result.to, iq.from);
        assert!(matches!(result.payload, xmpp_parsers::iq::IqType::Result(None)));
    }

    #[test]
    fn request_carries_ping_child() {
        let elem = build_ping_request("example.com", "s2c1");
        assert_eq!(elem.attr("type"), Some("get"));
        assert!(elem.get_child("ping", NS_PING).is_some());
    }
}
