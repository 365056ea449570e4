//! Service Discovery (XEP-0030) implementation.
//!
//! Implements disco#info and disco#items for the server's own JID: identity,
//! roster/carbons/vcard/private-storage/ping/registration features, and any
//! configured items (e.g. an HTTP upload component would appear here, were
//! one configured).
//!
//! ## Features Advertised
//!
//! - `http://jabber.org/protocol/disco#info`
//! - `http://jabber.org/protocol/disco#items`
//! - `jabber:iq:roster`
//! - `urn:xmpp:carbons:2`
//! - `vcard-temp`
//! - `urn:xmpp:ping`
//! - `jabber:iq:private`
//! - `jabber:iq:register` (when registration is enabled)

pub mod info;
pub mod items;

pub use info::{
    build_disco_info_response, is_disco_info_query, parse_disco_info_query, DiscoInfoQuery,
    Feature, Identity, DISCO_INFO_NS,
};
pub use items::{
    build_disco_items_response, is_disco_items_query, parse_disco_items_query, DiscoItem,
    DiscoItemsQuery, DISCO_ITEMS_NS,
};
