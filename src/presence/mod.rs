//! Presence management.
//!
//! Handles XMPP presence stanzas including online/offline status and
//! RFC 6121 presence subscription management. Presence *state* (who's
//! online, at what priority, with what last stanza) is owned by the host
//! application through [`crate::hooks::SessionHook`] and
//! [`crate::hooks::PresenceRecord`] — this module only parses and builds
//! the wire stanzas.

pub mod subscription;

pub use subscription::{
    build_available_presence, build_subscription_presence, build_unavailable_presence,
    parse_subscription_presence, PresenceAction, PresenceSubscriptionRequest, SubscriptionType,
};
