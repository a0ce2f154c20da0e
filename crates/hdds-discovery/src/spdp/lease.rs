// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant lease table.
//!
//! One entry per remote participant seen by an engine: its latest
//! announcement, effective lease, last-seen time and the SPDP sequence
//! bookkeeping used to detect a restarted peer. Expiry is driven by the
//! engine's lease-check timer; this table only answers "who expired".

use crate::core::{GuidPrefix, GUID};
use crate::protocol::ParticipantData;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Authentication progress of a remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Local participant is not secure.
    NotRequired,
    /// Admitted without identity token.
    Unauthenticated,
    /// Handshake in progress; `initiator` is true on the lower-prefix side.
    Pending { initiator: bool, started: Instant },
    Authenticated,
}

impl AuthState {
    /// Whether SEDP may run with this peer.
    pub fn admits(&self) -> bool {
        !matches!(self, AuthState::Pending { .. })
    }
}

/// Remote participant record.
#[derive(Debug, Clone)]
pub struct ParticipantEntry {
    pub data: ParticipantData,
    /// Source address of the latest announcement.
    pub source: SocketAddr,
    /// Announced lease clamped to the configured maximum.
    pub lease: Duration,
    pub discovered_at: Instant,
    pub last_seen: Instant,
    pub last_seq: u64,
    /// Backward-sequence counter; reaching the configured limit means a restart.
    pub seq_resets: u32,
    pub auth: AuthState,
    /// Last handshake token sent to this peer (re-sent on retry).
    pub last_token: Option<Vec<u8>>,
    /// Latest announcement came through the RTPS relay.
    pub via_relay: bool,
}

impl ParticipantEntry {
    pub fn new(data: ParticipantData, source: SocketAddr, lease: Duration, seq: u64, now: Instant) -> Self {
        Self {
            data,
            source,
            lease,
            discovered_at: now,
            last_seen: now,
            last_seq: seq,
            seq_resets: 0,
            auth: AuthState::NotRequired,
            last_token: None,
            via_relay: false,
        }
    }

    pub fn guid(&self) -> GUID {
        self.data.guid
    }

    /// Lease actually enforced; unauthenticated peers get at most `unsecure_cap`.
    pub fn effective_lease(&self, unsecure_cap: Duration) -> Duration {
        match self.auth {
            AuthState::Pending { .. } => self.lease.min(unsecure_cap),
            _ => self.lease,
        }
    }

    pub fn expires_at(&self, extension: Duration, unsecure_cap: Duration) -> Instant {
        self.last_seen
            .checked_add(self.effective_lease(unsecure_cap).saturating_add(extension))
            .unwrap_or_else(|| self.last_seen + Duration::from_secs(u32::MAX as u64))
    }
}

/// Remote participants keyed by GUID prefix.
#[derive(Debug, Default)]
pub struct ParticipantLeaseTable {
    entries: HashMap<GuidPrefix, ParticipantEntry>,
}

impl ParticipantLeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ParticipantEntry) -> Option<ParticipantEntry> {
        self.entries.insert(entry.data.guid.prefix, entry)
    }

    pub fn get(&self, prefix: &GuidPrefix) -> Option<&ParticipantEntry> {
        self.entries.get(prefix)
    }

    pub fn get_mut(&mut self, prefix: &GuidPrefix) -> Option<&mut ParticipantEntry> {
        self.entries.get_mut(prefix)
    }

    pub fn remove(&mut self, prefix: &GuidPrefix) -> Option<ParticipantEntry> {
        self.entries.remove(prefix)
    }

    pub fn contains(&self, prefix: &GuidPrefix) -> bool {
        self.entries.contains_key(prefix)
    }

    /// Record an announcement arrival.
    pub fn touch(&mut self, prefix: &GuidPrefix, now: Instant) -> bool {
        match self.entries.get_mut(prefix) {
            Some(entry) => {
                entry.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Participants whose lease (plus `extension`) elapsed at `now`.
    pub fn expired(&self, now: Instant, extension: Duration, unsecure_cap: Duration) -> Vec<GuidPrefix> {
        self.entries
            .iter()
            .filter(|(_, e)| e.expires_at(extension, unsecure_cap) <= now)
            .map(|(prefix, _)| *prefix)
            .collect()
    }

    /// Earliest expiry, for scheduling the next lease check.
    pub fn next_expiry(&self, extension: Duration, unsecure_cap: Duration) -> Option<Instant> {
        self.entries
            .values()
            .map(|e| e.expires_at(extension, unsecure_cap))
            .min()
    }

    /// Participants still negotiating authentication.
    pub fn pending_auth(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e.auth, AuthState::Pending { .. }))
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticipantEntry> {
        self.entries.values()
    }

    pub fn prefixes(&self) -> Vec<GuidPrefix> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(prefix: u8, lease: Duration, now: Instant) -> ParticipantEntry {
        let data = ParticipantData::new(GUID::participant([prefix; 12]), 0, lease);
        ParticipantEntry::new(data, "127.0.0.1:7410".parse().unwrap(), lease, 1, now)
    }

    #[test]
    fn test_expiry_honours_extension() {
        let start = Instant::now();
        let mut table = ParticipantLeaseTable::new();
        table.insert(entry(1, Duration::from_secs(2), start));
        table.insert(entry(2, Duration::from_secs(10), start));

        let cap = Duration::from_secs(30);
        let at = start + Duration::from_secs(3);
        assert_eq!(table.expired(at, Duration::ZERO, cap), vec![[1; 12]]);
        assert!(table.expired(at, Duration::from_secs(5), cap).is_empty());
        assert_eq!(
            table.next_expiry(Duration::ZERO, cap),
            Some(start + Duration::from_secs(2))
        );
    }

    #[test]
    fn test_touch_extends_lease() {
        let start = Instant::now();
        let mut table = ParticipantLeaseTable::new();
        table.insert(entry(1, Duration::from_secs(2), start));
        assert!(table.touch(&[1; 12], start + Duration::from_secs(1)));
        assert!(!table.touch(&[9; 12], start));
        let cap = Duration::from_secs(30);
        assert!(table
            .expired(start + Duration::from_millis(2500), Duration::ZERO, cap)
            .is_empty());
    }

    #[test]
    fn test_pending_auth_lease_capped() {
        let start = Instant::now();
        let mut e = entry(1, Duration::from_secs(300), start);
        e.auth = AuthState::Pending {
            initiator: true,
            started: start,
        };
        assert_eq!(e.effective_lease(Duration::from_secs(30)), Duration::from_secs(30));
        assert!(!e.auth.admits());
        e.auth = AuthState::Authenticated;
        assert_eq!(e.effective_lease(Duration::from_secs(30)), Duration::from_secs(300));
    }

    #[test]
    fn test_infinite_lease_never_expires() {
        let start = Instant::now();
        let mut table = ParticipantLeaseTable::new();
        table.insert(entry(1, Duration::MAX, start));
        assert!(table
            .expired(start + Duration::from_secs(1_000_000), Duration::ZERO, Duration::MAX)
            .is_empty());
    }
}
