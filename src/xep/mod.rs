//! XMPP Extension Protocols (XEPs) Implementation
//!
//! This module contains implementations of the XMPP Extension Protocols
//! that sit alongside the core (RFC 6120/6121) stanza handling.
//!
//! ## Implemented XEPs
//!
//! - **XEP-0049**: Private XML Storage - arbitrary namespaced XML blobs
//!   stashed per-user on the server.
//! - **XEP-0054**: vcard-temp - user profile information via vCard format.
//! - **XEP-0077**: In-Band Registration - allows users to register accounts
//!   directly through the XMPP connection before authentication.
//! - **XEP-0199**: XMPP Ping - liveness checks over an existing stream.

pub mod xep0049;
pub mod xep0054;
pub mod xep0077;
pub mod xep0199;

pub use xep0049::{
    build_private_storage_result, build_private_storage_success, is_private_storage_query,
    parse_private_storage_get, parse_private_storage_set, PrivateStorageKey, NS_PRIVATE,
};

pub use xep0054::{
    build_empty_vcard_response, build_vcard_element, build_vcard_error, build_vcard_response,
    build_vcard_success, is_vcard_get, is_vcard_query, is_vcard_set, parse_vcard_element,
    parse_vcard_from_iq, VCard, VCardError, VCardPhoto, NS_VCARD,
};

pub use xep0077::{
    build_registration_error, build_registration_fields_response, build_registration_success,
    is_registration_query, parse_registration_iq, RegistrationError, RegistrationRequest,
};

pub use xep0199::{build_ping_result, is_ping, NS_PING};
