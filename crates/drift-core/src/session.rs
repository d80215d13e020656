//! The session/pairing state machine.
//!
//! One `ChatState` owns everything the relay mutates: the consent set, the
//! identity map, the waiting queue, the partner map, report tallies, the
//! ban table, and the pending media offers. Handlers never touch these
//! collections directly; they call the operations below, which return an
//! explicit effect list for the transport layer to deliver. The relay
//! serializes all calls behind one coarse lock, so every operation runs to
//! completion before the next is handled.
//!
//! Invariants maintained by every operation:
//! - the partner map is symmetric: `partner(partner(x)) == x`
//! - no connection is ever its own partner
//! - a connection is never both queued and paired
//! - a connection appears at most once in the queue
//! - at most one pending offer per receiver and media kind

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::protocol::{MediaKind, ServerEvent};

/// Opaque handle for one live transport session.
pub type ConnId = Uuid;

/// Distinct reporters required before an identity is banned.
pub const REPORT_THRESHOLD: usize = 10;

/// How long a community ban lasts.
pub const BAN_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// An instruction for the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Deliver `event` to `to` if it is still connected.
    Send { to: ConnId, event: ServerEvent },
    /// Forcibly close the connection.
    Close { conn: ConnId },
}

impl Effect {
    fn send(to: ConnId, event: ServerEvent) -> Self {
        Effect::Send { to, event }
    }
}

/// An unconfirmed media handoff awaiting receiver accept/decline.
#[derive(Debug, Clone)]
struct MediaOffer {
    from: ConnId,
    payload: String,
}

/// All mutable relay state. See module docs.
#[derive(Debug, Default)]
pub struct ChatState {
    /// Moderation identity per live connection, set once at connect.
    identities: HashMap<ConnId, String>,
    /// Connections that granted consent. Never survives reconnect.
    agreed: HashSet<ConnId>,
    /// FIFO of connections awaiting a partner.
    waiting: VecDeque<ConnId>,
    /// Symmetric pairing map.
    partners: HashMap<ConnId, ConnId>,
    /// Distinct reporter identities per reported identity.
    reports: HashMap<String, HashSet<String>>,
    /// Ban expiry per identity. Purged lazily and by `sweep`.
    bans: HashMap<String, Instant>,
    /// Pending offers keyed by the receiving connection, per media kind.
    pending: HashMap<MediaKind, HashMap<ConnId, MediaOffer>>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection.
    ///
    /// The ban check runs before any other state is established: a banned
    /// identity gets the notice and a forced close, and is never asked for
    /// consent. An expired ban entry is purged on the read that finds it.
    pub fn connect(&mut self, id: ConnId, identity: String, now: Instant) -> Vec<Effect> {
        if let Some(&expiry) = self.bans.get(&identity) {
            if now < expiry {
                return vec![
                    Effect::send(id, ServerEvent::Banned),
                    Effect::Close { conn: id },
                ];
            }
            self.bans.remove(&identity);
        }

        self.agreed.remove(&id);
        self.identities.insert(id, identity);
        vec![Effect::send(id, ServerEvent::NeedAgree)]
    }

    /// Record consent for this connection lifetime.
    ///
    /// An id `connect` never registered (e.g. a refused banned connection
    /// whose frames raced the socket close) cannot consent: the consent
    /// set only ever holds registered connections.
    pub fn agree(&mut self, id: ConnId) -> Vec<Effect> {
        if !self.identities.contains_key(&id) {
            return Vec::new();
        }
        self.agreed.insert(id);
        vec![Effect::send(id, ServerEvent::AgreedOk)]
    }

    /// Queue or pair the caller.
    ///
    /// Post-condition: the caller is in exactly one of {queued, paired},
    /// unless the call was a no-op because it already was.
    pub fn find(&mut self, id: ConnId) -> Vec<Effect> {
        if !self.agreed.contains(&id) {
            return vec![Effect::send(id, ServerEvent::NeedAgree)];
        }
        if self.partners.contains_key(&id) || self.waiting.contains(&id) {
            return Vec::new();
        }
        self.match_or_enqueue(id)
    }

    /// Tear down the caller's pairing and/or queue membership.
    pub fn stop(&mut self, id: ConnId) -> Vec<Effect> {
        if !self.agreed.contains(&id) {
            return vec![Effect::send(id, ServerEvent::NeedAgree)];
        }
        let was_active = self.partners.contains_key(&id) || self.waiting.contains(&id);
        let mut effects = self.leave(id);
        if was_active {
            effects.push(Effect::send(id, ServerEvent::Stopped));
        }
        effects
    }

    /// Stop, then immediately look for a new partner.
    ///
    /// Teardown notifications go out before the re-queue, so the caller
    /// observes `stopped` (if anything was torn down) before
    /// `searching`/`matched`.
    pub fn next(&mut self, id: ConnId) -> Vec<Effect> {
        if !self.agreed.contains(&id) {
            return vec![Effect::send(id, ServerEvent::NeedAgree)];
        }
        let mut effects = self.stop(id);
        effects.extend(self.match_or_enqueue(id));
        effects
    }

    /// Relay trimmed text to the current partner.
    ///
    /// Empty-after-trim input is dropped without notice; so is a message
    /// while unpaired.
    pub fn message(&mut self, id: ConnId, text: &str) -> Vec<Effect> {
        if !self.agreed.contains(&id) {
            return vec![Effect::send(id, ServerEvent::NeedAgree)];
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        match self.partners.get(&id) {
            Some(&partner) => vec![Effect::send(
                partner,
                ServerEvent::Message {
                    text: trimmed.to_string(),
                },
            )],
            None => Vec::new(),
        }
    }

    /// Report the current partner.
    ///
    /// Records the reporter's identity against the target's tally
    /// (deduplicated by reporter), tears the pairing down as a safety
    /// measure, and bans the target once `REPORT_THRESHOLD` distinct
    /// reporters have filed.
    pub fn report(&mut self, id: ConnId, now: Instant) -> Vec<Effect> {
        if !self.agreed.contains(&id) {
            return vec![Effect::send(id, ServerEvent::NeedAgree)];
        }
        let Some(&partner) = self.partners.get(&id) else {
            return Vec::new();
        };
        let (Some(reporter_ident), Some(target_ident)) = (
            self.identities.get(&id).cloned(),
            self.identities.get(&partner).cloned(),
        ) else {
            return Vec::new();
        };

        let mut effects = self.leave(id);
        effects.push(Effect::send(id, ServerEvent::ReportReceived));

        let reached = {
            let tally = self.reports.entry(target_ident.clone()).or_default();
            tally.insert(reporter_ident);
            tally.len() >= REPORT_THRESHOLD
        };

        if reached {
            self.reports.remove(&target_ident);
            self.bans.insert(target_ident.clone(), now + BAN_DURATION);
            // The tipping reporter learns their report banned the target.
            effects.push(Effect::send(id, ServerEvent::ReportedAndBanned));

            // Every online connection bearing the identity goes down with it.
            let online: Vec<ConnId> = self
                .identities
                .iter()
                .filter(|(_, ident)| **ident == target_ident)
                .map(|(conn, _)| *conn)
                .collect();
            for conn in online {
                effects.extend(self.leave(conn));
                effects.push(Effect::send(conn, ServerEvent::ReportedAndBanned));
                effects.push(Effect::Close { conn });
            }
        }

        effects
    }

    /// Store a media offer for the current partner (last offer wins).
    ///
    /// A payload without the expected media-type tag is dropped silently.
    pub fn media_offer(&mut self, id: ConnId, kind: MediaKind, payload: String) -> Vec<Effect> {
        if !self.agreed.contains(&id) {
            return vec![Effect::send(id, ServerEvent::NeedAgree)];
        }
        let Some(&partner) = self.partners.get(&id) else {
            return Vec::new();
        };
        if !kind.accepts(&payload) {
            return Vec::new();
        }
        self.pending
            .entry(kind)
            .or_default()
            .insert(partner, MediaOffer { from: id, payload });
        vec![
            Effect::send(partner, kind.request_event()),
            Effect::send(id, kind.sent_event()),
        ]
    }

    /// Deliver the payload pending under the accepter's own id, if any.
    pub fn media_accept(&mut self, id: ConnId, kind: MediaKind) -> Vec<Effect> {
        if !self.agreed.contains(&id) {
            return vec![Effect::send(id, ServerEvent::NeedAgree)];
        }
        match self.pending.entry(kind).or_default().remove(&id) {
            Some(offer) => vec![Effect::send(id, kind.deliver_event(offer.payload))],
            None => Vec::new(),
        }
    }

    /// Discard the payload pending under the decliner's own id, if any.
    pub fn media_decline(&mut self, id: ConnId, kind: MediaKind) -> Vec<Effect> {
        if !self.agreed.contains(&id) {
            return vec![Effect::send(id, ServerEvent::NeedAgree)];
        }
        self.pending.entry(kind).or_default().remove(&id);
        Vec::new()
    }

    /// Full teardown on socket close. Safe to call for ids already gone.
    pub fn disconnect(&mut self, id: ConnId) -> Vec<Effect> {
        let effects = self.leave(id);
        for offers in self.pending.values_mut() {
            offers.remove(&id);
        }
        self.agreed.remove(&id);
        self.identities.remove(&id);
        effects
    }

    /// Periodic hardening pass: purge expired bans and drop report tallies
    /// for identities with no live connection.
    pub fn sweep(&mut self, now: Instant) {
        self.bans.retain(|_, expiry| now < *expiry);
        let online: HashSet<String> = self.identities.values().cloned().collect();
        self.reports.retain(|ident, _| online.contains(ident));
    }

    // ── introspection (stats endpoint, tests) ──

    pub fn partner_of(&self, id: ConnId) -> Option<ConnId> {
        self.partners.get(&id).copied()
    }

    pub fn is_waiting(&self, id: ConnId) -> bool {
        self.waiting.contains(&id)
    }

    pub fn online(&self) -> usize {
        self.identities.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn paired_count(&self) -> usize {
        self.partners.len() / 2
    }

    pub fn banned_count(&self, now: Instant) -> usize {
        self.bans.values().filter(|&&expiry| now < expiry).count()
    }

    // ── internals ──

    /// Pop queue entries until an eligible partner turns up, else enqueue.
    ///
    /// A popped id that has since been paired through another path is
    /// skipped, not matched: the queue may hold a stale entry when two
    /// `find` calls race through the command path back to back.
    fn match_or_enqueue(&mut self, id: ConnId) -> Vec<Effect> {
        while let Some(candidate) = self.waiting.pop_front() {
            if candidate == id || self.partners.contains_key(&candidate) {
                continue;
            }
            self.partners.insert(id, candidate);
            self.partners.insert(candidate, id);
            return vec![
                Effect::send(id, ServerEvent::Matched),
                Effect::send(candidate, ServerEvent::Matched),
            ];
        }
        self.waiting.push_back(id);
        vec![Effect::send(id, ServerEvent::Searching)]
    }

    /// Remove `id` from its pairing and from the queue.
    ///
    /// Called from stop, next, report and disconnect; must never
    /// double-notify or error on missing state.
    fn leave(&mut self, id: ConnId) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(partner) = self.partners.remove(&id) {
            self.partners.remove(&partner);
            effects.push(Effect::send(partner, ServerEvent::PartnerLeft));
        }
        self.waiting.retain(|&queued| queued != id);
        effects
    }

    /// Test hook: plant a queue entry without going through `find`, to
    /// exercise the stale-entry skip in `match_or_enqueue`.
    #[cfg(test)]
    fn force_enqueue(&mut self, id: ConnId) {
        self.waiting.push_back(id);
    }
}
