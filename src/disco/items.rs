//! Service Discovery: disco#items handling.
//!
//! Implements XEP-0030 disco#items for querying entity items/services.

use minidom::Element;
use tracing::debug;
use xmpp_parsers::iq::Iq;

use crate::XmppError;

/// Service Discovery items namespace (XEP-0030).
pub const DISCO_ITEMS_NS: &str = "http://jabber.org/protocol/disco#items";

/// Parsed disco#items query.
#[derive(Debug, Clone)]
pub struct DiscoItemsQuery {
    /// Target JID (from IQ 'to' attribute)
    pub target: Option<String>,
    /// Optional node being queried
    pub node: Option<String>,
}

/// Item element for disco#items response.
#[derive(Debug, Clone)]
pub struct DiscoItem {
    /// JID of the item
    pub jid: String,
    /// Optional name (human-readable)
    pub name: Option<String>,
    /// Optional node identifier
    pub node: Option<String>,
}

impl DiscoItem {
    /// Create a new disco item.
    pub fn new(jid: &str, name: Option<&str>, node: Option<&str>) -> Self {
        Self {
            jid: jid.to_string(),
            name: name.map(|s| s.to_string()),
            node: node.map(|s| s.to_string()),
        }
    }

}

/// Check if an IQ is a disco#items query.
pub fn is_disco_items_query(iq: &Iq) -> bool {
    match &iq.payload {
        xmpp_parsers::iq::IqType::Get(elem) => {
            elem.name() == "query" && elem.ns() == DISCO_ITEMS_NS
        }
        _ => false,
    }
}

/// Parse a disco#items query from an IQ stanza.
pub fn parse_disco_items_query(iq: &Iq) -> Result<DiscoItemsQuery, XmppError> {
    let query_elem = match &iq.payload {
        xmpp_parsers::iq::IqType::Get(elem) => {
            if elem.name() == "query" && elem.ns() == DISCO_ITEMS_NS {
                elem
            } else {
                return Err(XmppError::bad_request(Some(
                    "Missing disco#items query element".to_string(),
                )));
            }
        }
        _ => {
            return Err(XmppError::bad_request(Some(
                "disco#items must be IQ get".to_string(),
            )))
        }
    };

    let node = query_elem.attr("node").map(|s| s.to_string());
    let target = iq.to.as_ref().map(|j| j.to_string());

    debug!(target = ?target, node = ?node, "Parsed disco#items query");

    Ok(DiscoItemsQuery { target, node })
}

/// Build a disco#items response IQ.
///
/// The response includes items available at the queried entity.
pub fn build_disco_items_response(
    original_iq: &Iq,
    items: &[DiscoItem],
    node: Option<&str>,
) -> Iq {
    let mut query_builder = Element::builder("query", DISCO_ITEMS_NS);

    // Add node attribute if present
    if let Some(n) = node {
        query_builder = query_builder.attr("node", n);
    }

    // Add items
    for item in items {
        let mut item_builder =
            Element::builder("item", DISCO_ITEMS_NS).attr("jid", &item.jid);

        if let Some(ref name) = item.name {
            item_builder = item_builder.attr("name", name);
        }

        if let Some(ref node) = item.node {
            item_builder = item_builder.attr("node", node);
        }

        query_builder = query_builder.append(item_builder.build());
    }

    let query = query_builder.build();

    // Build response IQ
    Iq {
        from: original_iq.to.clone(),
        to: original_iq.from.clone(),
        id: original_iq.id.clone(),
        payload: xmpp_parsers::iq::IqType::Result(Some(query)),
    }
}
