//! External hook traits (§6): the seams through which this crate delegates
//! identity, roster storage, and presence/session bookkeeping to a host
//! application.
//!
//! Grounded in `hooks.base.BaseAuthHook` / `BaseRosterHook` / `BaseSessionHook`
//! from the original implementation, which keeps these as three separate
//! hook types (`stream.auth_hook`, `stream.roster_hook`, `stream.session_hook`)
//! rather than one monolith. The teacher's `AppState` trait folds a much
//! wider surface (ATProto sessions, SCRAM, vCards, upload slots, MUC
//! affiliations) into a single trait; here that seam is redrawn along the
//! original's three-hook boundary, keeping the teacher's `impl Future`
//! trait-method style.

use std::future::Future;

use jid::{BareJid, FullJid};

use crate::roster::RosterItem;
use crate::XmppError;

/// A contact presence-stanza pair recorded while a subscription request
/// from `jid` sits in the Pending-In state, as returned by
/// [`RosterHook::get_pending`].
#[derive(Debug, Clone)]
pub struct PendingContact {
    pub jid: BareJid,
    /// The original `<presence type='subscribe'/>` stanza, as XML text.
    pub stanza: String,
}

/// Outcome of [`RosterHook::inbound_subscribe`].
#[derive(Debug, Clone)]
pub enum InboundSubscribeOutcome {
    /// The contact was pre-approved; the `from` subscription was granted
    /// immediately. Carries the contact's new roster fields.
    PreApproved(RosterItem),
    /// The contact is now in the Pending-In state.
    NowPending,
    /// The contact was already in the Pending-In state.
    AlreadyPending,
}

/// Priority and last-known presence of a single resource, as tracked by a
/// [`SessionHook`].
#[derive(Debug, Clone)]
pub struct PresenceRecord {
    pub priority: i16,
    /// The last `<presence/>` stanza sent for this resource, as XML text.
    /// `None` for an available resource that has not yet sent directed
    /// presence fields beyond availability.
    pub stanza: Option<String>,
}

/// A bound resource's session record (§3), keyed by `(user, resource)`.
/// Exists iff the resource is bound; `priority: None` means bound but
/// unavailable.
#[derive(Debug, Clone)]
pub struct Session {
    pub priority: Option<i16>,
    pub last_presence_stanza: String,
    pub login_time: chrono::DateTime<chrono::Utc>,
    pub update_time: chrono::DateTime<chrono::Utc>,
    /// Identifies the process that owns this session, so a restarted
    /// process can recognize and purge its own stale records.
    pub server_id: String,
}

/// Hook covering authentication and account lifecycle (§4.D, §4.E).
///
/// Implementations back SASL PLAIN/ANONYMOUS/EXTERNAL/legacy authentication
/// and XEP-0077 in-band registration. All methods default to the
/// conservative original behavior (deny) where the original hook contract
/// does too.
pub trait AuthHook: Send + Sync + 'static {
    /// The stream authenticated; about to request a resource bind.
    fn bind(&self, user: &BareJid) -> impl Future<Output = ()> + Send {
        let _ = user;
        async {}
    }

    /// The stream has closed or been lost.
    fn unbind(&self, user: &BareJid) -> impl Future<Output = ()> + Send {
        let _ = user;
        async {}
    }

    /// Authenticate with an empty password via an external web session,
    /// gated by `ServerConfig::allow_webuser_login`.
    fn check_webuser(&self, username: &str) -> impl Future<Output = bool> + Send;

    /// Authenticate a session token carried as a `//jid/`-prefixed password,
    /// gated by `ServerConfig::credentials_max_age`.
    fn check_token(&self, username: &str, token: &str) -> impl Future<Output = bool> + Send;

    /// Authenticate a plaintext password, gated by `allow_plain_password`.
    fn check_password(&self, username: &str, password: &str) -> impl Future<Output = bool> + Send;

    /// Whether `username` exists and may be contacted: roster additions,
    /// disco queries, and subscription requests all consult this.
    fn valid_contact(&self, username: &str) -> impl Future<Output = bool> + Send;

    /// Register a new account (XEP-0077), gated by `allow_registration`.
    /// Returns `Ok(false)` if the username is already taken.
    fn create_user(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<bool, XmppError>> + Send;

    /// Change the password of an already-authenticated user.
    fn change_password(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), XmppError>> + Send;

    /// Delete an already-authenticated user's account.
    fn delete_user(&self, username: &str) -> impl Future<Output = Result<(), XmppError>> + Send;
}

/// Hook covering roster storage and the RFC 6121 subscription state
/// machine (§4.F).
///
/// The ten `inbound_*`/`outbound_*` methods mirror
/// `hooks.base.BaseRosterHook` exactly: each performs one legal transition
/// of the subscription automaton and reports whether it actually fired.
pub trait RosterHook: Send + Sync + 'static {
    fn bind(&self, user: &BareJid) -> impl Future<Output = ()> + Send {
        let _ = user;
        async {}
    }

    fn unbind(&self, user: &BareJid) -> impl Future<Output = ()> + Send {
        let _ = user;
        async {}
    }

    /// Every contact's roster fields, or `None` if the user has no roster.
    fn get_contacts(&self, user: &BareJid) -> impl Future<Output = Option<Vec<RosterItem>>> + Send;

    /// One contact's roster fields. `subscription` is always populated,
    /// even when it is `none`.
    fn get_contact(
        &self,
        user: &BareJid,
        jid: &BareJid,
    ) -> impl Future<Output = Result<Option<RosterItem>, XmppError>> + Send;

    /// Create or update a contact's name/groups. Must not alter subscription
    /// state.
    fn update_contact(
        &self,
        user: &BareJid,
        jid: &BareJid,
        name: Option<String>,
        groups: Vec<String>,
    ) -> impl Future<Output = Result<RosterItem, XmppError>> + Send;

    /// Delete a contact. Returns `Some(false)` if active subscriptions or a
    /// pending-out request block the removal, `None` if the contact does
    /// not exist.
    fn remove_contact(
        &self,
        user: &BareJid,
        jid: &BareJid,
    ) -> impl Future<Output = Result<Option<bool>, XmppError>> + Send;

    /// Contacts currently in the Pending-In state for `user`.
    fn get_pending(
        &self,
        user: &BareJid,
    ) -> impl Future<Output = Option<Vec<PendingContact>>> + Send;

    /// Whether `jid` is currently Pending-In for `user`, or `None` if
    /// `jid` is not a tracked (potential) contact at all.
    fn is_pending(&self, user: &BareJid, jid: &BareJid) -> impl Future<Output = Option<bool>> + Send;

    /// A subscription request arrived from `jid`. Transitions `jid` into
    /// Pending-In unless already subscribed `from`/`both`, or grants the
    /// `from` subscription immediately if `jid` was pre-approved.
    fn inbound_subscribe(
        &self,
        user: &BareJid,
        jid: &BareJid,
        stanza: &str,
    ) -> impl Future<Output = Result<Option<InboundSubscribeOutcome>, XmppError>> + Send;

    /// `jid` approved `user`'s outbound subscription request: leave
    /// Pending-Out and grant the `to` subscription.
    fn inbound_subscribed(
        &self,
        user: &BareJid,
        jid: &BareJid,
    ) -> impl Future<Output = Result<Option<RosterItem>, XmppError>> + Send;

    /// `jid` cancelled a pending or active `from` subscription on `user`.
    fn inbound_unsubscribe(
        &self,
        user: &BareJid,
        jid: &BareJid,
    ) -> impl Future<Output = Result<Option<RosterItem>, XmppError>> + Send;

    /// `jid` cancelled `user`'s pending-out request or active `to`
    /// subscription.
    fn inbound_unsubscribed(
        &self,
        user: &BareJid,
        jid: &BareJid,
    ) -> impl Future<Output = Result<Option<RosterItem>, XmppError>> + Send;

    /// `user` asked to subscribe to `jid`'s presence: creates the contact
    /// if needed and enters Pending-Out, unless already subscribed.
    fn outbound_subscribe(
        &self,
        user: &BareJid,
        jid: &BareJid,
        stanza: &str,
    ) -> impl Future<Output = Result<Option<RosterItem>, XmppError>> + Send;

    /// `user` approved `jid`'s inbound subscription request, or
    /// pre-approves it if none is pending yet.
    fn outbound_subscribed(
        &self,
        user: &BareJid,
        jid: &BareJid,
    ) -> impl Future<Output = Result<Option<RosterItem>, XmppError>> + Send;

    /// `user` cancelled their Pending-Out request, or their active `to`
    /// subscription, to `jid`.
    fn outbound_unsubscribe(
        &self,
        user: &BareJid,
        jid: &BareJid,
    ) -> impl Future<Output = Result<Option<RosterItem>, XmppError>> + Send;

    /// `user` cancelled `jid`'s Pending-In request, active `from`
    /// subscription, or pre-approval.
    fn outbound_unsubscribed(
        &self,
        user: &BareJid,
        jid: &BareJid,
    ) -> impl Future<Output = Result<Option<RosterItem>, XmppError>> + Send;
}

/// Hook covering resource binding and presence bookkeeping across all of a
/// user's connected resources (§4.B, §4.G).
pub trait SessionHook: Send + Sync + 'static {
    /// Bind a freshly authenticated resource. Returns `false` if the
    /// requested resource is already bound elsewhere.
    fn bind(&self, jid: &FullJid) -> impl Future<Output = Result<bool, XmppError>> + Send;

    /// The stream for `jid` has closed or been lost.
    fn unbind(&self, jid: &FullJid) -> impl Future<Output = ()> + Send;

    /// Record priority and last presence of a bound resource.
    /// `priority: None` marks the resource unavailable.
    fn set_presence(
        &self,
        jid: &FullJid,
        priority: Option<i16>,
        stanza: Option<String>,
    ) -> impl Future<Output = ()> + Send;

    /// Priority and presence of one resource, or `None` if unavailable.
    fn get_presence(&self, jid: &FullJid) -> impl Future<Output = Option<PresenceRecord>> + Send;

    /// Priority and presence of every available resource of `username`.
    fn get_all_presences(
        &self,
        username: &str,
    ) -> impl Future<Output = Vec<(String, PresenceRecord)>> + Send;

    /// Priority and presence of every available resource across all of
    /// `usernames`. Optional: implementing this may speed up roster-wide
    /// presence queries, but the default `None` tells callers to fall back
    /// to per-user `get_all_presences`.
    fn get_all_roster_presences(
        &self,
        usernames: &[String],
    ) -> impl Future<Output = Option<Vec<(String, String, PresenceRecord)>>> + Send {
        let _ = usernames;
        async { None }
    }

    /// Priority of one resource, or `None` if unavailable.
    fn get_resource(&self, jid: &FullJid) -> impl Future<Output = Option<i16>> + Send;

    /// Priority of every resource belonging to `username`, available or not.
    fn get_all_resources(&self, username: &str) -> impl Future<Output = Vec<(String, i16)>> + Send;

    /// The resource with the highest non-negative priority among
    /// `username`'s available resources, or `Some("")` to broadcast to all
    /// of them, or `None` if none qualify.
    fn get_preferred_resource(&self, username: &str) -> impl Future<Output = Option<String>> + Send;

    /// Forcibly remove binding records for `jid`, used when the server
    /// hosting its stream is presumed to have crashed.
    fn kill_resource(&self, jid: &FullJid) -> impl Future<Output = ()> + Send;
}

pub mod memory {
    //! In-memory reference implementations of the three hooks, for tests
    //! and single-process demo deployments.
    //!
    //! Grounded in `rosterdb.hook`'s `XMPPContact`-backed `RosterHook`:
    //! contacts not yet added to the roster are tracked in a side table
    //! (`pending`) exactly as the original keeps unapproved subscribers
    //! outside the roster proper.

    use std::future::Future;
    use std::sync::atomic::{AtomicI16, Ordering};

    use dashmap::DashMap;
    use jid::{BareJid, FullJid};

    use super::{InboundSubscribeOutcome, PendingContact, PresenceRecord, SessionHook};
    use crate::roster::{RosterItem, Subscription};
    use crate::XmppError;
    use crate::hooks::{AuthHook, RosterHook};

    /// In-memory user directory: username -> password, plus a contactable
    /// flag (every registered user is contactable).
    #[derive(Default)]
    pub struct InMemoryAuthHook {
        users: DashMap<String, String>,
    }

    impl InMemoryAuthHook {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a user directly, bypassing `create_user`'s registration gate.
        pub fn add_user(&self, username: impl Into<String>, password: impl Into<String>) {
            self.users.insert(username.into(), password.into());
        }
    }

    impl AuthHook for InMemoryAuthHook {
        async fn check_webuser(&self, _username: &str) -> bool {
            false
        }

        async fn check_token(&self, _username: &str, _token: &str) -> bool {
            false
        }

        async fn check_password(&self, username: &str, password: &str) -> bool {
            self.users
                .get(username)
                .map(|p| p.value() == password)
                .unwrap_or(false)
        }

        async fn valid_contact(&self, username: &str) -> bool {
            self.users.contains_key(username)
        }

        async fn create_user(&self, username: &str, password: &str) -> Result<bool, XmppError> {
            if self.users.contains_key(username) {
                return Ok(false);
            }
            self.users.insert(username.to_string(), password.to_string());
            Ok(true)
        }

        async fn change_password(&self, username: &str, password: &str) -> Result<(), XmppError> {
            self.users.insert(username.to_string(), password.to_string());
            Ok(())
        }

        async fn delete_user(&self, username: &str) -> Result<(), XmppError> {
            self.users.remove(username);
            Ok(())
        }
    }

    #[derive(Debug, Clone)]
    struct ContactRecord {
        item: RosterItem,
        /// Pre-approved for a `from` subscription, but hasn't asked yet.
        preapproved: bool,
        /// The contact asked to subscribe to us; we haven't answered.
        pending_in: Option<String>,
    }

    /// In-memory roster store, keyed by owning user then contact JID.
    #[derive(Default)]
    pub struct InMemoryRosterHook {
        rosters: DashMap<BareJid, DashMap<BareJid, ContactRecord>>,
    }

    impl InMemoryRosterHook {
        pub fn new() -> Self {
            Self::default()
        }

        fn entries(&self, user: &BareJid) -> dashmap::mapref::one::RefMut<'_, BareJid, DashMap<BareJid, ContactRecord>> {
            self.rosters.entry(user.clone()).or_default()
        }
    }

    impl RosterHook for InMemoryRosterHook {
        async fn get_contacts(&self, user: &BareJid) -> Option<Vec<RosterItem>> {
            let roster = self.rosters.get(user)?;
            Some(
                roster
                    .iter()
                    .filter(|e| e.item.subscription != Subscription::None || e.preapproved)
                    .map(|e| e.item.clone())
                    .collect(),
            )
        }

        async fn get_contact(
            &self,
            user: &BareJid,
            jid: &BareJid,
        ) -> Result<Option<RosterItem>, XmppError> {
            Ok(self
                .rosters
                .get(user)
                .and_then(|roster| roster.get(jid).map(|e| e.item.clone())))
        }

        async fn update_contact(
            &self,
            user: &BareJid,
            jid: &BareJid,
            name: Option<String>,
            groups: Vec<String>,
        ) -> Result<RosterItem, XmppError> {
            let roster = self.entries(user);
            let mut entry = roster.entry(jid.clone()).or_insert_with(|| ContactRecord {
                item: RosterItem::new(jid.clone()),
                preapproved: false,
                pending_in: None,
            });
            entry.item.name = name;
            entry.item.groups = groups;
            Ok(entry.item.clone())
        }

        async fn remove_contact(
            &self,
            user: &BareJid,
            jid: &BareJid,
        ) -> Result<Option<bool>, XmppError> {
            let roster = self.entries(user);
            let Some((_, entry)) = roster.remove(jid) else {
                return Ok(None);
            };
            if entry.item.subscription != Subscription::None || entry.item.ask.is_some() {
                roster.insert(jid.clone(), entry);
                return Ok(Some(false));
            }
            Ok(Some(true))
        }

        async fn get_pending(&self, user: &BareJid) -> Option<Vec<PendingContact>> {
            let roster = self.rosters.get(user)?;
            Some(
                roster
                    .iter()
                    .filter_map(|e| {
                        e.pending_in.clone().map(|stanza| PendingContact {
                            jid: e.key().clone(),
                            stanza,
                        })
                    })
                    .collect(),
            )
        }

        async fn is_pending(&self, user: &BareJid, jid: &BareJid) -> Option<bool> {
            let roster = self.rosters.get(user)?;
            Some(roster.get(jid)?.pending_in.is_some())
        }

        async fn inbound_subscribe(
            &self,
            user: &BareJid,
            jid: &BareJid,
            stanza: &str,
        ) -> Result<Option<InboundSubscribeOutcome>, XmppError> {
            let roster = self.entries(user);
            let mut entry = roster.entry(jid.clone()).or_insert_with(|| ContactRecord {
                item: RosterItem::new(jid.clone()),
                preapproved: false,
                pending_in: None,
            });
            if matches!(entry.item.subscription, Subscription::From | Subscription::Both) {
                return Ok(None);
            }
            if entry.preapproved {
                entry.preapproved = false;
                entry.item.subscription = match entry.item.subscription {
                    Subscription::To => Subscription::Both,
                    _ => Subscription::From,
                };
                return Ok(Some(InboundSubscribeOutcome::PreApproved(entry.item.clone())));
            }
            if entry.pending_in.is_some() {
                return Ok(Some(InboundSubscribeOutcome::AlreadyPending));
            }
            entry.pending_in = Some(stanza.to_string());
            Ok(Some(InboundSubscribeOutcome::NowPending))
        }

        async fn inbound_subscribed(
            &self,
            user: &BareJid,
            jid: &BareJid,
        ) -> Result<Option<RosterItem>, XmppError> {
            let roster = self.entries(user);
            let Some(mut entry) = roster.get_mut(jid) else {
                return Ok(None);
            };
            if entry.item.ask != Some(crate::roster::AskType::Subscribe) {
                return Ok(None);
            }
            entry.item.ask = None;
            entry.item.subscription = match entry.item.subscription {
                Subscription::From => Subscription::Both,
                _ => Subscription::To,
            };
            Ok(Some(entry.item.clone()))
        }

        async fn inbound_unsubscribe(
            &self,
            user: &BareJid,
            jid: &BareJid,
        ) -> Result<Option<RosterItem>, XmppError> {
            let roster = self.entries(user);
            let Some(mut entry) = roster.get_mut(jid) else {
                return Ok(None);
            };
            let old = entry.item.clone();
            let had_from = matches!(entry.item.subscription, Subscription::From | Subscription::Both);
            let was_pending = entry.pending_in.take().is_some();
            if !had_from && !was_pending {
                return Ok(None);
            }
            entry.item.subscription = match entry.item.subscription {
                Subscription::Both => Subscription::To,
                Subscription::From => Subscription::None,
                other => other,
            };
            Ok(Some(old))
        }

        async fn inbound_unsubscribed(
            &self,
            user: &BareJid,
            jid: &BareJid,
        ) -> Result<Option<RosterItem>, XmppError> {
            let roster = self.entries(user);
            let Some(mut entry) = roster.get_mut(jid) else {
                return Ok(None);
            };
            let old = entry.item.clone();
            let had_to = matches!(entry.item.subscription, Subscription::To | Subscription::Both);
            let was_asking = entry.item.ask == Some(crate::roster::AskType::Subscribe);
            if !had_to && !was_asking {
                return Ok(None);
            }
            entry.item.ask = None;
            entry.item.subscription = match entry.item.subscription {
                Subscription::Both => Subscription::From,
                Subscription::To => Subscription::None,
                other => other,
            };
            Ok(Some(old))
        }

        async fn outbound_subscribe(
            &self,
            user: &BareJid,
            jid: &BareJid,
            _stanza: &str,
        ) -> Result<Option<RosterItem>, XmppError> {
            let roster = self.entries(user);
            let mut entry = roster.entry(jid.clone()).or_insert_with(|| ContactRecord {
                item: RosterItem::new(jid.clone()),
                preapproved: false,
                pending_in: None,
            });
            if matches!(entry.item.subscription, Subscription::To | Subscription::Both)
                || entry.item.ask == Some(crate::roster::AskType::Subscribe)
            {
                return Ok(None);
            }
            entry.item.ask = Some(crate::roster::AskType::Subscribe);
            Ok(Some(entry.item.clone()))
        }

        async fn outbound_subscribed(
            &self,
            user: &BareJid,
            jid: &BareJid,
        ) -> Result<Option<RosterItem>, XmppError> {
            let roster = self.entries(user);
            let mut entry = roster.entry(jid.clone()).or_insert_with(|| ContactRecord {
                item: RosterItem::new(jid.clone()),
                preapproved: false,
                pending_in: None,
            });
            if matches!(entry.item.subscription, Subscription::From | Subscription::Both) {
                return Ok(None);
            }
            if entry.pending_in.take().is_none() {
                entry.preapproved = true;
                return Ok(Some(entry.item.clone()));
            }
            entry.item.subscription = match entry.item.subscription {
                Subscription::To => Subscription::Both,
                _ => Subscription::From,
            };
            Ok(Some(entry.item.clone()))
        }

        async fn outbound_unsubscribe(
            &self,
            user: &BareJid,
            jid: &BareJid,
        ) -> Result<Option<RosterItem>, XmppError> {
            let roster = self.entries(user);
            let Some(mut entry) = roster.get_mut(jid) else {
                return Ok(None);
            };
            let old = entry.item.clone();
            let had_to = matches!(entry.item.subscription, Subscription::To | Subscription::Both);
            let was_asking = entry.item.ask == Some(crate::roster::AskType::Subscribe);
            if !had_to && !was_asking {
                return Ok(None);
            }
            entry.item.ask = None;
            entry.item.subscription = match entry.item.subscription {
                Subscription::Both => Subscription::From,
                Subscription::To => Subscription::None,
                other => other,
            };
            Ok(Some(old))
        }

        async fn outbound_unsubscribed(
            &self,
            user: &BareJid,
            jid: &BareJid,
        ) -> Result<Option<RosterItem>, XmppError> {
            let roster = self.entries(user);
            let Some(mut entry) = roster.get_mut(jid) else {
                return Ok(None);
            };
            let old = entry.item.clone();
            let had_from = matches!(entry.item.subscription, Subscription::From | Subscription::Both);
            let was_pending = entry.pending_in.take().is_some();
            let was_preapproved = std::mem::replace(&mut entry.preapproved, false);
            if !had_from && !was_pending && !was_preapproved {
                return Ok(None);
            }
            entry.item.subscription = match entry.item.subscription {
                Subscription::Both => Subscription::To,
                Subscription::From => Subscription::None,
                other => other,
            };
            Ok(Some(old))
        }
    }

    #[derive(Debug)]
    struct ResourceState {
        priority: AtomicI16,
        available: std::sync::atomic::AtomicBool,
        stanza: std::sync::Mutex<Option<String>>,
    }

    /// In-memory presence/session store, keyed by full JID.
    #[derive(Default)]
    pub struct InMemorySessionHook {
        resources: DashMap<FullJid, ResourceState>,
    }

    impl InMemorySessionHook {
        pub fn new() -> Self {
            Self::default()
        }

        fn username_of(jid: &FullJid) -> String {
            jid.node().map(|n| n.to_string()).unwrap_or_default()
        }
    }

    impl SessionHook for InMemorySessionHook {
        async fn bind(&self, jid: &FullJid) -> Result<bool, XmppError> {
            if self.resources.contains_key(jid) {
                return Ok(false);
            }
            self.resources.insert(
                jid.clone(),
                ResourceState {
                    priority: AtomicI16::new(0),
                    available: std::sync::atomic::AtomicBool::new(false),
                    stanza: std::sync::Mutex::new(None),
                },
            );
            Ok(true)
        }

        async fn unbind(&self, jid: &FullJid) {
            self.resources.remove(jid);
        }

        async fn set_presence(&self, jid: &FullJid, priority: Option<i16>, stanza: Option<String>) {
            let Some(state) = self.resources.get(jid) else {
                return;
            };
            match priority {
                Some(p) => {
                    state.priority.store(p, Ordering::SeqCst);
                    state.available.store(true, Ordering::SeqCst);
                }
                None => state.available.store(false, Ordering::SeqCst),
            }
            *state.stanza.lock().unwrap() = stanza;
        }

        async fn get_presence(&self, jid: &FullJid) -> Option<PresenceRecord> {
            let state = self.resources.get(jid)?;
            if !state.available.load(Ordering::SeqCst) {
                return None;
            }
            Some(PresenceRecord {
                priority: state.priority.load(Ordering::SeqCst),
                stanza: state.stanza.lock().unwrap().clone(),
            })
        }

        async fn get_all_presences(&self, username: &str) -> Vec<(String, PresenceRecord)> {
            self.resources
                .iter()
                .filter(|e| Self::username_of(e.key()) == username && e.available.load(Ordering::SeqCst))
                .map(|e| {
                    (
                        e.key().resource().to_string(),
                        PresenceRecord {
                            priority: e.priority.load(Ordering::SeqCst),
                            stanza: e.stanza.lock().unwrap().clone(),
                        },
                    )
                })
                .collect()
        }

        async fn get_resource(&self, jid: &FullJid) -> Option<i16> {
            let state = self.resources.get(jid)?;
            state
                .available
                .load(Ordering::SeqCst)
                .then(|| state.priority.load(Ordering::SeqCst))
        }

        async fn get_all_resources(&self, username: &str) -> Vec<(String, i16)> {
            self.resources
                .iter()
                .filter(|e| Self::username_of(e.key()) == username)
                .map(|e| (e.key().resource().to_string(), e.priority.load(Ordering::SeqCst)))
                .collect()
        }

        async fn get_preferred_resource(&self, username: &str) -> Option<String> {
            self.get_all_resources(username)
                .await
                .into_iter()
                .filter(|(_, p)| *p >= 0)
                .max_by_key(|(_, p)| *p)
                .map(|(r, _)| r)
        }

        async fn kill_resource(&self, jid: &FullJid) {
            self.resources.remove(jid);
        }
    }

}
