//! BOSH transport (§4.J, XEP-0124/XEP-0206).
//!
//! Grounded in `xmpp.bosh`: a BOSH session is a durable logical stream
//! mapped onto a sequence of short HTTP POSTs. This module owns the
//! session's protocol state machine (rid windowing, ack bookkeeping,
//! consumer holding, response framing) independent of the HTTP server that
//! actually accepts the POSTs — admission/routing of BOSH HTTP requests is
//! out of scope for this crate (§1); an embedder drives
//! [`BoshSession::accept_request`] and [`BoshSession::queue_stanza`] from
//! its own HTTP handler.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use dashmap::DashMap;
use minidom::Element;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::config::ServerConfig;

pub const BOSH_NS: &str = "http://jabber.org/protocol/httpbind";
pub const XBOSH_NS: &str = "urn:xmpp:xbosh";

/// Terminate condition used when a session is torn down by the inactivity
/// timer (§4.J Timers (b)) rather than by an explicit client terminate.
pub const INACTIVITY_CONDITION: &str = "remote-connection-failed";

/// Result of [`BoshSession::accept_request`].
#[derive(Debug)]
pub enum AcceptOutcome {
    /// The request's stanzas were applied in order; a consumer is now
    /// parked awaiting a reply body. Await `reply_rx`, falling back to an
    /// empty body once `deadline` passes (the per-consumer `wait` timer).
    Queued {
        reply_rx: oneshot::Receiver<Element>,
        deadline: Instant,
    },
    /// `rid` matches an already-answered request; return the cached body.
    Retransmit(Element),
    /// A previously-registered consumer for this rid was evicted and
    /// replaced by this one. Send `evicted_reply` a recoverable
    /// `<body type='error'/>`, then await `reply_rx` for the new consumer.
    Evicted {
        evicted_reply: oneshot::Sender<Element>,
        reply_rx: oneshot::Receiver<Element>,
        deadline: Instant,
    },
    /// Fatal protocol violation; the caller must answer with
    /// `<body type='terminate' condition='…'/>` and drop the session.
    Terminate(&'static str),
}

/// One BOSH-transported logical stream.
pub struct BoshSession {
    pub sid: String,
    pub host: Option<String>,
    pub origin: Option<String>,
    wait: u32,
    hold: u32,
    requests: u32,
    /// Next rid this session expects to process, in order.
    rid_in: u64,
    /// Next rid this session will assign to an outbound response.
    rid_out: u64,
    /// Requests that arrived ahead of `rid_in`, parked until their turn.
    pending_requests: BTreeMap<u64, Element>,
    /// Cached reply bodies, retained until acked, for retransmit support.
    replies: BTreeMap<u64, Element>,
    /// Consumers (HTTP long-polls) currently held open, oldest first.
    consumers: VecDeque<Consumer>,
    /// Stanzas accumulated for the next response while frozen.
    current_body: Vec<Element>,
    /// Incremented while a request is mid-processing or auth is pending;
    /// responses are withheld until this drops to zero.
    frozen: u32,
    pub restarting: bool,
    terminated: bool,
    /// Condition reported to any further request once `terminated` is set;
    /// `None` means the generic `item-not-found` (rid out of range on a
    /// dead session).
    terminate_condition: Option<&'static str>,
    /// How long this session may go without a request before the
    /// inactivity timer tears it down (§4.J Timers (b)).
    inactivity: Duration,
    last_activity: Instant,
}

struct Consumer {
    rid: u64,
    reply_tx: oneshot::Sender<Element>,
    deadline: Instant,
}

impl BoshSession {
    /// Create a new session from a client's initial request attributes,
    /// clamping `wait`/`hold` into the configured bounds (§4.J step 1).
    pub fn new(sid: String, cfg: &ServerConfig, requested_wait: u32, requested_hold: u32, host: Option<String>, origin: Option<String>) -> Self {
        let rid_in = 1 + (rid_seed() % 1_000_000);
        Self {
            sid,
            host,
            origin,
            wait: cfg.clamp_bosh_wait(requested_wait),
            hold: cfg.clamp_bosh_hold(requested_hold),
            requests: cfg.bosh_max_hold.max(1) + 1,
            rid_in,
            rid_out: rid_in,
            pending_requests: BTreeMap::new(),
            replies: BTreeMap::new(),
            consumers: VecDeque::new(),
            current_body: Vec::new(),
            frozen: 0,
            restarting: false,
            terminated: false,
            terminate_condition: None,
            inactivity: Duration::from_secs(cfg.bosh_max_inactivity),
            last_activity: Instant::now(),
        }
    }

    pub fn wait(&self) -> u32 {
        self.wait
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Whether this session's inactivity timer has elapsed as of `now`.
    pub fn is_inactive(&self, now: Instant) -> bool {
        !self.terminated && now.saturating_duration_since(self.last_activity) >= self.inactivity
    }

    /// §4.J request-acceptance algorithm, steps 2-6 (step 1, session
    /// lookup/creation, happens in [`BoshSessionTable`]).
    ///
    /// `stanzas` are the child elements of the request's `<body/>`, already
    /// extracted by the caller; they are applied to `process` in rid order.
    #[instrument(skip(self, stanzas, process), fields(sid = %self.sid, rid))]
    pub fn accept_request<F: FnMut(&Element)>(
        &mut self,
        rid: u64,
        ack: Option<u64>,
        restart: bool,
        stanzas: Vec<Element>,
        mut process: F,
    ) -> AcceptOutcome {
        if self.terminated {
            return AcceptOutcome::Terminate(self.terminate_condition.unwrap_or("item-not-found"));
        }

        self.last_activity = Instant::now();

        // Step 3: RID window.
        if rid < self.rid_in || rid >= self.rid_in + self.requests as u64 {
            if let Some(cached) = self.replies.get(&rid) {
                return AcceptOutcome::Retransmit(cached.clone());
            }
            return AcceptOutcome::Terminate("item-not-found");
        }
        if let Some(cached) = self.replies.get(&rid) {
            return AcceptOutcome::Retransmit(cached.clone());
        }

        // Step 4: duplicate rid eviction. Evict any existing consumer for
        // this rid before registering the new one.
        let evicted = self
            .consumers
            .iter()
            .position(|c| c.rid == rid)
            .map(|pos| self.consumers.remove(pos).unwrap());

        // Step 5: acknowledgement. Infer ack as rid - requests when absent.
        let effective_ack = ack.unwrap_or(rid.saturating_sub(self.requests as u64));
        self.replies.retain(|&rid_ack, _| rid_ack > effective_ack);

        if restart {
            self.restarting = true;
        }

        // Step 6: ordering.
        if rid > self.rid_in {
            self.pending_requests.insert(rid, bundle(stanzas));
        } else {
            for stanza in stanzas {
                process(&stanza);
            }
            self.rid_in += 1;
            while let Some(bundled) = self.pending_requests.remove(&self.rid_in) {
                for stanza in unbundle(bundled) {
                    process(&stanza);
                }
                self.rid_in += 1;
            }
        }

        let (reply_rx, deadline) = self.register_consumer(rid);
        match evicted {
            Some(evicted) => AcceptOutcome::Evicted {
                evicted_reply: evicted.reply_tx,
                reply_rx,
                deadline,
            },
            None => AcceptOutcome::Queued { reply_rx, deadline },
        }
    }

    fn register_consumer(&mut self, rid: u64) -> (oneshot::Receiver<Element>, Instant) {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + std::time::Duration::from_secs(self.wait as u64);
        self.consumers.push_back(Consumer { rid, reply_tx: tx, deadline });
        (rx, deadline)
    }

    /// Queue an outbound stanza (roster push, message relay, presence) for
    /// delivery on the next un-frozen response (§4.J "Response dispatch").
    pub fn queue_stanza(&mut self, stanza: Element) {
        self.current_body.push(stanza);
        self.try_flush();
    }

    /// Increment the freeze counter: withhold responses while a request is
    /// mid-processing or authentication is pending.
    pub fn freeze(&mut self) {
        self.frozen += 1;
    }

    /// Decrement the freeze counter and flush if it reaches zero.
    pub fn thaw(&mut self) {
        self.frozen = self.frozen.saturating_sub(1);
        if self.frozen == 0 {
            self.try_flush();
        }
    }

    /// Bind `current_body` to the oldest queued consumer once un-frozen,
    /// attaching `ack` when it differs from the consumer's own rid.
    fn try_flush(&mut self) {
        if self.frozen > 0 || self.current_body.is_empty() {
            return;
        }
        let Some(consumer) = self.consumers.pop_front() else {
            return;
        };
        let mut body = Element::builder("body", BOSH_NS).attr("sid", self.sid.clone());
        if self.rid_in.saturating_sub(1) != consumer.rid {
            body = body.attr("ack", (self.rid_in - 1).to_string());
        }
        for stanza in self.current_body.drain(..) {
            body = body.append(stanza);
        }
        let built = body.build();
        self.replies.insert(self.rid_out, built.clone());
        self.rid_out += 1;
        let _ = consumer.reply_tx.send(built);

        // More consumers than `hold`: prune the queue with empty bodies.
        while self.consumers.len() > self.hold as usize {
            if let Some(extra) = self.consumers.pop_front() {
                let empty = Element::builder("body", BOSH_NS).attr("sid", self.sid.clone()).build();
                let _ = extra.reply_tx.send(empty);
            }
        }
    }

    /// Terminate the session: queue a final terminate body, flush every
    /// queued consumer with an empty body, and mark dead.
    pub fn terminate(&mut self, condition: Option<&'static str>) {
        self.terminated = true;
        self.terminate_condition = condition;
        let mut body = Element::builder("body", BOSH_NS)
            .attr("sid", self.sid.clone())
            .attr("type", "terminate");
        if let Some(condition) = condition {
            body = body.attr("condition", condition);
        }
        let built = body.build();
        while let Some(consumer) = self.consumers.pop_front() {
            let _ = consumer.reply_tx.send(built.clone());
        }
    }
}

fn bundle(stanzas: Vec<Element>) -> Element {
    let mut holder = Element::builder("body", BOSH_NS);
    for s in stanzas {
        holder = holder.append(s);
    }
    holder.build()
}

fn unbundle(holder: Element) -> Vec<Element> {
    holder.children().cloned().collect()
}

fn rid_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(1)
}

/// Table of live BOSH sessions, keyed by session id. Owns pre-binding: a
/// privileged caller may insert a session before any client POST arrives.
#[derive(Default)]
pub struct BoshSessionTable {
    sessions: DashMap<String, std::sync::Arc<tokio::sync::Mutex<BoshSession>>>,
}

impl BoshSessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: BoshSession) -> std::sync::Arc<tokio::sync::Mutex<BoshSession>> {
        let handle = std::sync::Arc::new(tokio::sync::Mutex::new(session));
        let sid = {
            // Safe: just constructed, no contention yet.
            handle.try_lock().expect("freshly created session").sid.clone()
        };
        self.sessions.insert(sid, handle.clone());
        handle
    }

    pub fn get(&self, sid: &str) -> Option<std::sync::Arc<tokio::sync::Mutex<BoshSession>>> {
        self.sessions.get(sid).map(|e| e.value().clone())
    }

    pub fn remove(&self, sid: &str) {
        self.sessions.remove(sid);
        debug!(sid, "removed BOSH session");
    }

    pub fn generate_sid() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Terminate, in place, any session whose inactivity timer has elapsed.
    /// Sessions are left in the table rather than removed, so a late POST
    /// against that `sid` still finds the session and gets back its
    /// `<body type='terminate' condition='remote-connection-failed'/>`
    /// instead of an unknown-sid error. A session already busy with a
    /// request is skipped this round and re-checked on the next sweep.
    pub fn sweep_inactive(&self) {
        let now = Instant::now();
        for entry in self.sessions.iter() {
            if let Ok(mut session) = entry.value().try_lock() {
                if session.is_inactive(now) {
                    session.terminate(Some(INACTIVITY_CONDITION));
                    debug!(sid = %entry.key(), "terminated BOSH session for inactivity");
                }
            }
        }
    }

    /// Spawn the background task that drives [`Self::sweep_inactive`] on a
    /// fixed tick (§4.J Timers (b)). The caller owns the returned handle and
    /// should abort it on shutdown.
    pub fn spawn_inactivity_sweeper(
        table: std::sync::Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                table.sweep_inactive();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ServerConfig {
        ServerConfig::default()
    }

    #[test]
    fn new_session_clamps_wait_and_hold() {
        let session = BoshSession::new("sid1".into(), &cfg(), 1000, 99, None, None);
        assert_eq!(session.wait(), 60);
    }

    #[test]
    fn out_of_range_rid_terminates() {
        let mut session = BoshSession::new("sid1".into(), &cfg(), 30, 1, None, None);
        let rid_in = session.rid_in;
        let outcome = session.accept_request(rid_in + 1000, None, false, vec![], |_| {});
        assert!(matches!(outcome, AcceptOutcome::Terminate("item-not-found")));
    }

    #[test]
    fn in_order_request_advances_rid_in() {
        let mut session = BoshSession::new("sid1".into(), &cfg(), 30, 1, None, None);
        let rid_in = session.rid_in;
        let mut seen = Vec::new();
        let outcome = session.accept_request(rid_in, None, false, vec![], |e| seen.push(e.name().to_string()));
        assert!(matches!(outcome, AcceptOutcome::Queued { .. }));
        assert_eq!(session.rid_in, rid_in + 1);
    }

    #[test]
    fn out_of_order_request_is_parked_until_its_turn() {
        let mut session = BoshSession::new("sid1".into(), &cfg(), 30, 2, None, None);
        let rid_in = session.rid_in;
        let mut seen = Vec::new();

        session.accept_request(rid_in + 1, None, false, vec![], |e| seen.push(e.name().to_string()));
        assert_eq!(session.rid_in, rid_in);
        assert!(seen.is_empty());

        session.accept_request(rid_in, None, false, vec![], |e| seen.push(e.name().to_string()));
        assert_eq!(session.rid_in, rid_in + 2);
    }

    #[test]
    fn terminate_flushes_queued_consumers() {
        let mut session = BoshSession::new("sid1".into(), &cfg(), 30, 1, None, None);
        session.terminate(Some("remote-connection-failed"));
        assert!(session.is_terminated());
    }

    #[test]
    fn fresh_session_is_not_inactive() {
        let session = BoshSession::new("sid1".into(), &cfg(), 30, 1, None, None);
        assert!(!session.is_inactive(Instant::now()));
    }

    #[test]
    fn zero_inactivity_window_is_immediately_inactive() {
        let mut cfg = cfg();
        cfg.bosh_max_inactivity = 0;
        let session = BoshSession::new("sid1".into(), &cfg, 30, 1, None, None);
        assert!(session.is_inactive(Instant::now()));
    }

    #[test]
    fn terminated_for_inactivity_reports_remote_connection_failed() {
        let mut session = BoshSession::new("sid1".into(), &cfg(), 30, 1, None, None);
        session.terminate(Some(INACTIVITY_CONDITION));

        let outcome = session.accept_request(999, None, false, vec![], |_| {});
        assert!(matches!(outcome, AcceptOutcome::Terminate(INACTIVITY_CONDITION)));
    }

    #[test]
    fn table_sweep_leaves_session_queryable_after_inactivity() {
        let mut cfg = cfg();
        cfg.bosh_max_inactivity = 0;
        let table = BoshSessionTable::new();
        table.insert(BoshSession::new("sid1".into(), &cfg, 30, 1, None, None));

        table.sweep_inactive();

        let handle = table.get("sid1").expect("session stays in the table after a sweep");
        let mut session = handle.try_lock().expect("uncontended in this test");
        assert!(session.is_terminated());
        let outcome = session.accept_request(999, None, false, vec![], |_| {});
        assert!(matches!(outcome, AcceptOutcome::Terminate(INACTIVITY_CONDITION)));
    }
}
