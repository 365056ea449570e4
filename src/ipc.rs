//! Process-local IPC bus (§4.M): group delivery of cross-stream events,
//! keyed by user, with one channel per bound resource.
//!
//! Grounded in the teacher's [`crate::registry::ConnectionRegistry`]
//! (`DashMap<FullJid, mpsc::Sender<...>>`, `SendResult`, stale-entry
//! cleanup), generalized from "one entry per full JID, message type
//! `Stanza`" to "one entry per channel, message type `IpcEvent`, with a
//! group layer on top" per the original's `group_add`/`group_send`/`send`
//! bus. Delivery is at-least-once and unordered with respect to database
//! writes — consumers that depend on hook state must re-read before acting.

use dashmap::{DashMap, DashSet};
use jid::FullJid;
use minidom::Element;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// Dispatch key for an [`IpcEvent`], replacing the original's dotted-string
/// `type` field with a static enum matched once at the receive task instead
/// of re-parsed per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcEventKind {
    PresenceAvailable,
    PresenceUnavailable,
    PresenceProbe,
    PresenceSubscribed,
    PresenceUnsubscribed,
    PresenceSubscription,
    RosterPush,
    MessagingMessage,
    MessagingPrivate,
    MessagingCarbon,
    /// An `<iq/>` relayed to another local user's bare or full JID. Delivered
    /// verbatim to the matching resource (or every resource, if bare-addressed)
    /// with no carbon-copy fallback — an IQ is never forwarded-as-a-copy.
    Iq,
}

/// An untyped key-value record carried over the IPC bus (§4.M).
#[derive(Debug, Clone)]
pub struct IpcEvent {
    pub kind: IpcEventKind,
    /// Channel to reply to directly via [`IpcBus::send`], bypassing the group.
    pub origin: ChannelId,
    /// The JID on whose behalf this event was raised.
    pub from: FullJid,
    /// The payload stanza, if any (absent for bare probes).
    pub xml: Option<Element>,
}

/// Opaque per-stream channel identity. Each bound stream owns exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

/// Result of [`IpcBus::send`]/[`IpcBus::group_send`].
#[derive(Debug)]
pub enum IpcSendResult {
    Sent,
    ChannelFull,
    ChannelClosed,
    NotFound,
}

/// Process-local IPC bus. A cross-process deployment would swap this for a
/// backend keyed the same way (group name -> member channels, channel id ->
/// transport); the dispatch and group semantics above do not change.
pub struct IpcBus {
    next_channel: std::sync::atomic::AtomicU64,
    channels: DashMap<ChannelId, mpsc::Sender<IpcEvent>>,
    groups: DashMap<String, DashSet<ChannelId>>,
}

impl IpcBus {
    pub fn new() -> Self {
        Self {
            next_channel: std::sync::atomic::AtomicU64::new(1),
            channels: DashMap::new(),
            groups: DashMap::new(),
        }
    }

    /// The IPC group for a user's bound streams (§4.M: `xmpp.user.<user>`).
    pub fn user_group(user: &str) -> String {
        format!("xmpp.user.{user}")
    }

    /// Allocate a new channel and its receiver. The caller owns the
    /// receiver for the lifetime of its bound stream.
    pub fn open_channel(&self, buffer: usize) -> (ChannelId, mpsc::Receiver<IpcEvent>) {
        let id = ChannelId(self.next_channel.fetch_add(1, std::sync::atomic::Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(buffer);
        self.channels.insert(id, tx);
        (id, rx)
    }

    /// Drop a channel, removing it from every group it belonged to.
    pub fn close_channel(&self, channel: ChannelId) {
        self.channels.remove(&channel);
        for group in self.groups.iter() {
            group.remove(&channel);
        }
    }

    /// Join `channel` to `group`, creating the group if needed.
    #[instrument(skip(self))]
    pub fn group_add(&self, group: &str, channel: ChannelId) {
        self.groups.entry(group.to_string()).or_default().insert(channel);
    }

    /// Leave `group`. A no-op if the channel was not a member.
    pub fn group_remove(&self, group: &str, channel: ChannelId) {
        if let Some(members) = self.groups.get(group) {
            members.remove(&channel);
        }
    }

    /// Deliver `event` to every member of `group` except `event.origin`
    /// itself, so a stream never receives its own broadcast.
    #[instrument(skip(self, event), fields(group = %group))]
    pub async fn group_send(&self, group: &str, event: IpcEvent) -> Vec<(ChannelId, IpcSendResult)> {
        let Some(members) = self.groups.get(group).map(|m| m.iter().map(|c| *c).collect::<Vec<_>>()) else {
            return Vec::new();
        };
        let mut results = Vec::with_capacity(members.len());
        for member in members {
            if member == event.origin {
                continue;
            }
            results.push((member, self.send(member, event.clone()).await));
        }
        results
    }

    /// Deliver `event` directly to one channel, bypassing group membership.
    /// Used for probe replies (`send(origin, ...)`).
    pub async fn send(&self, channel: ChannelId, event: IpcEvent) -> IpcSendResult {
        let sender = match self.channels.get(&channel) {
            Some(entry) => entry.value().clone(),
            None => return IpcSendResult::NotFound,
        };
        match sender.try_send(event) {
            Ok(()) => IpcSendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("IPC channel full, applying backpressure");
                IpcSendResult::ChannelFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("IPC channel closed, removing stale entry");
                self.channels.remove(&channel);
                IpcSendResult::ChannelClosed
            }
        }
    }

    /// Number of channels currently registered.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of members in a group (0 if the group doesn't exist).
    pub fn group_size(&self, group: &str) -> usize {
        self.groups.get(group).map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for IpcBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jid() -> FullJid {
        "alice@example.com/phone".parse().unwrap()
    }

    fn event(origin: ChannelId) -> IpcEvent {
        IpcEvent {
            kind: IpcEventKind::PresenceAvailable,
            origin,
            from: fake_jid(),
            xml: None,
        }
    }

    #[tokio::test]
    async fn group_send_skips_origin() {
        let bus = IpcBus::new();
        let (a, mut a_rx) = bus.open_channel(8);
        let (b, mut b_rx) = bus.open_channel(8);
        bus.group_add("xmpp.user.alice", a);
        bus.group_add("xmpp.user.alice", b);

        bus.group_send("xmpp.user.alice", event(a)).await;

        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_to_unknown_channel_is_not_found() {
        let bus = IpcBus::new();
        let (a, _rx) = bus.open_channel(8);
        bus.close_channel(a);
        assert!(matches!(bus.send(a, event(a)).await, IpcSendResult::NotFound));
    }

    #[tokio::test]
    async fn group_remove_stops_future_delivery() {
        let bus = IpcBus::new();
        let (a, _a_rx) = bus.open_channel(8);
        let (b, mut b_rx) = bus.open_channel(8);
        bus.group_add("xmpp.user.alice", a);
        bus.group_add("xmpp.user.alice", b);
        bus.group_remove("xmpp.user.alice", b);

        bus.group_send("xmpp.user.alice", event(a)).await;
        assert!(b_rx.try_recv().is_err());
    }

    #[test]
    fn user_group_formats_dotted_name() {
        assert_eq!(IpcBus::user_group("alice"), "xmpp.user.alice");
    }
}
