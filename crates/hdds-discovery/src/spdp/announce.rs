// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SPDP announcements and the remote participant lifecycle.

use super::engine::{Effects, Engine, Route};
use super::lease::{AuthState, ParticipantEntry};
use super::timers::TimerKey;
use crate::bit::{BitKind, BitSample};
use crate::core::*;
use crate::protocol::{Datagram, ParticipantData, Payload, Submessage};
use std::net::SocketAddr;
use std::time::Instant;

impl Engine {
    /// Local announcement; user data is withheld from undirected copies when
    /// `secure_participant_user_data` is set.
    fn announcement(&self, directed: bool) -> ParticipantData {
        let mut data = self.local.clone();
        if self.cfg.secure_participant_user_data && !directed {
            data.qos.user_data.clear();
        }
        data
    }

    fn spdp_datagram(&mut self, data: ParticipantData) -> Datagram {
        let seq = self.next_spdp_seq();
        Datagram::new(
            self.guid.prefix,
            vec![Submessage::Data {
                reader: ENTITYID_SPDP_READER,
                writer: ENTITYID_SPDP_WRITER,
                seq,
                payload: Payload::Participant(Box::new(data)),
            }],
        )
    }

    /// Multicast, configured send addresses and relay, per the current flags.
    pub(crate) fn undirected_destinations(&self) -> Vec<SocketAddr> {
        if self.cfg.rtps_relay_only {
            return self.cfg.spdp_rtps_relay_address.into_iter().collect();
        }
        let mut dests = Vec::new();
        if self.cfg.undirected_spdp {
            dests.extend(self.spdp_multicast);
        }
        dests.extend(self.cfg.spdp_send_addrs.iter().copied());
        if self.cfg.use_rtps_relay {
            dests.extend(self.cfg.spdp_rtps_relay_address);
        }
        dests
    }

    /// Where a directed announcement reaches `prefix`.
    ///
    /// The ICE-elected address wins over announced locators; the source of
    /// the latest announcement is the last resort.
    pub(crate) fn peer_spdp_destinations(&self, prefix: &GuidPrefix) -> Vec<SocketAddr> {
        if self.cfg.rtps_relay_only {
            return Vec::new();
        }
        let Some(entry) = self.leases.get(prefix) else {
            return Vec::new();
        };
        if let Some(addr) = self.ice_selected(entry.guid()) {
            return vec![addr];
        }
        if !entry.data.spdp_unicast.is_empty() {
            return entry.data.spdp_unicast.clone();
        }
        if entry.via_relay {
            return Vec::new();
        }
        vec![entry.source]
    }

    pub(crate) fn ice_selected(&self, remote: GUID) -> Option<SocketAddr> {
        if !self.cfg.use_ice {
            return None;
        }
        self.ice.as_ref().and_then(|ice| ice.selected_address(remote))
    }

    /// Periodic announcement.
    pub(crate) fn announce(&mut self, fx: &mut Effects) {
        crate::trace_fn!("Engine::announce");
        let data = self.announcement(false);
        let datagram = self.spdp_datagram(data);
        let dests = self.undirected_destinations();
        fx.send_all(Route::Spdp, &dests, &datagram);

        if self.cfg.periodic_directed_spdp {
            for prefix in self.leases.prefixes() {
                self.directed_announce(&prefix, fx);
            }
        }
    }

    /// Announcement sent only to the relay (keeps relay state alive).
    pub(crate) fn relay_announce(&mut self, fx: &mut Effects) {
        if let Some(relay) = self.cfg.spdp_rtps_relay_address {
            let data = self.announcement(false);
            let datagram = self.spdp_datagram(data);
            fx.send(Route::Spdp, relay, datagram);
        }
    }

    pub(crate) fn directed_announce(&mut self, prefix: &GuidPrefix, fx: &mut Effects) {
        let dests = self.peer_spdp_destinations(prefix);
        if dests.is_empty() {
            return;
        }
        let authenticated = self
            .leases
            .get(prefix)
            .is_some_and(|e| e.auth == AuthState::Authenticated);
        let data = self.announcement(authenticated || self.security.is_none());
        let datagram = self.spdp_datagram(data);
        fx.send_all(Route::Spdp, &dests, &datagram);
    }

    /// One extra announcement soon, without touching the periodic timer.
    pub(crate) fn schedule_quick_resend(&mut self, now: Instant) {
        self.timers
            .schedule_earlier(TimerKey::SpdpQuick, now + self.cfg.quick_resend_delay());
    }

    fn schedule_lease_check(&mut self) {
        let cap = self.cfg.security_unsecure_lease_duration;
        if let Some(at) = self.leases.next_expiry(self.cfg.lease_extension, cap) {
            self.timers.schedule_earlier(TimerKey::LeaseCheck, at);
        }
    }

    pub(crate) fn on_spdp_data(
        &mut self,
        source: SocketAddr,
        sender: GuidPrefix,
        seq: u64,
        payload: Payload,
        now: Instant,
        fx: &mut Effects,
    ) {
        match payload {
            Payload::Participant(data) => self.on_announcement(source, sender, seq, *data, now, fx),
            Payload::ParticipantDispose(guid) => {
                if guid.prefix == sender && self.leases.contains(&sender) {
                    self.remove_participant(&sender, "disposed", fx);
                }
            }
            other => log::debug!("[spdp] unexpected payload on SPDP writer: {:?}", other.key()),
        }
    }

    fn on_announcement(
        &mut self,
        source: SocketAddr,
        sender: GuidPrefix,
        seq: u64,
        data: ParticipantData,
        now: Instant,
        fx: &mut Effects,
    ) {
        let prefix = data.guid.prefix;
        if prefix != sender || prefix == self.guid.prefix || self.ignored.contains(&data.guid) {
            return;
        }
        if data.domain_id != self.domain_id {
            log::debug!(
                "[spdp] ignoring {} from domain {} (local domain {})",
                data.guid,
                data.domain_id,
                self.domain_id
            );
            return;
        }
        if data.lease_duration.is_zero() {
            log::debug!("[spdp] ignoring {} with zero lease", data.guid);
            return;
        }

        let via_relay = self.cfg.spdp_rtps_relay_address == Some(source);
        if self.cfg.check_source_ip
            && !via_relay
            && !data.all_locators().any(|l| l.ip() == source.ip())
        {
            log::debug!(
                "[spdp] ignoring {}: source {} not among announced locators",
                data.guid,
                source
            );
            return;
        }

        if self.leases.contains(&prefix) {
            self.update_participant(source, seq, data, via_relay, now, fx);
        } else {
            self.add_participant(source, seq, data, via_relay, now, fx);
        }
    }

    fn add_participant(
        &mut self,
        source: SocketAddr,
        seq: u64,
        data: ParticipantData,
        via_relay: bool,
        now: Instant,
        fx: &mut Effects,
    ) {
        let prefix = data.guid.prefix;
        let auth = match (&self.security, &data.identity_token) {
            (None, _) => AuthState::NotRequired,
            (Some(security), None) => {
                if !security.allow_unauthenticated() {
                    log::debug!("[spdp] rejecting unauthenticated participant {}", data.guid);
                    return;
                }
                AuthState::Unauthenticated
            }
            (Some(_), Some(_)) => {
                let limit = self.cfg.max_participants_in_authentication;
                if limit > 0 && self.leases.pending_auth() >= limit {
                    log::debug!(
                        "[spdp] deferring {}: {} authentications in progress",
                        data.guid,
                        limit
                    );
                    return;
                }
                AuthState::Pending {
                    initiator: self.guid.prefix < prefix,
                    started: now,
                }
            }
        };

        let lease = data.lease_duration.min(self.cfg.max_lease_duration);
        let guid = data.guid;
        let mut entry = ParticipantEntry::new(data, source, lease, seq, now);
        entry.auth = auth;
        entry.via_relay = via_relay;
        let admitted = entry.auth.admits();
        let sample = entry.data.clone();
        self.leases.insert(entry);
        self.schedule_lease_check();
        log::debug!(
            "[spdp] discovered participant {} at {} (lease {:?})",
            guid,
            source,
            lease
        );

        if self.cfg.use_ice {
            if let Some(ice) = self.ice.clone() {
                let candidates = sample.ice_candidates.clone();
                fx.call(move || ice.add_remote_candidates(guid, &candidates));
            }
        }
        self.directed_announce(&prefix, fx);
        self.schedule_quick_resend(now);

        if admitted {
            self.bit_publish(fx, BitSample::Participant(sample));
            self.sedp_start_session(prefix, now, fx);
        } else {
            self.begin_auth(prefix, now, fx);
        }
    }

    fn update_participant(
        &mut self,
        source: SocketAddr,
        seq: u64,
        data: ParticipantData,
        via_relay: bool,
        now: Instant,
        fx: &mut Effects,
    ) {
        let prefix = data.guid.prefix;
        let reset_limit = self.cfg.max_spdp_sequence_msg_reset_check;
        let honeymoon = self.cfg.min_resend_delay;
        let Some(entry) = self.leases.get_mut(&prefix) else {
            return;
        };

        if seq <= entry.last_seq {
            entry.last_seen = now;
            if seq == entry.last_seq || now.duration_since(entry.discovered_at) < honeymoon {
                return;
            }
            entry.seq_resets += 1;
            if entry.seq_resets < reset_limit {
                return;
            }
            log::debug!(
                "[spdp] participant {} restarted (sequence {} after {})",
                data.guid,
                seq,
                entry.last_seq
            );
            self.remove_participant(&prefix, "restarted", fx);
            self.add_participant(source, seq, data, via_relay, now, fx);
            return;
        }

        entry.last_seq = seq;
        entry.seq_resets = 0;
        entry.last_seen = now;
        entry.source = source;
        entry.via_relay = via_relay;
        entry.lease = data.lease_duration.min(self.cfg.max_lease_duration);
        if entry.data == data {
            return;
        }

        let locators_changed = !entry.data.same_locators(&data);
        let candidates_changed = entry.data.ice_candidates != data.ice_candidates;
        let token_arrived = entry.data.identity_token.is_none() && data.identity_token.is_some();
        let admitted = entry.auth.admits();
        entry.data = data.clone();

        if candidates_changed && self.cfg.use_ice {
            if let Some(ice) = self.ice.clone() {
                let guid = data.guid;
                let candidates = data.ice_candidates.clone();
                fx.call(move || ice.add_remote_candidates(guid, &candidates));
            }
        }
        if token_arrived {
            log::debug!("[spdp] {} announced an identity token after discovery", data.guid);
        }
        if admitted {
            self.bit_publish(fx, BitSample::Participant(data));
        }
        if locators_changed {
            self.sedp_locators_changed(prefix, fx);
        }
    }

    /// Drop participants whose lease elapsed and re-arm the check.
    pub(crate) fn check_leases(&mut self, now: Instant, fx: &mut Effects) {
        let cap = self.cfg.security_unsecure_lease_duration;
        for prefix in self.leases.expired(now, self.cfg.lease_extension, cap) {
            self.remove_participant(&prefix, "lease expired", fx);
        }
        self.schedule_lease_check();
    }

    /// Forget a remote participant and everything learned from it.
    pub(crate) fn remove_participant(&mut self, prefix: &GuidPrefix, reason: &str, fx: &mut Effects) {
        let Some(entry) = self.leases.remove(prefix) else {
            return;
        };
        let guid = entry.guid();
        log::debug!("[spdp] lost participant {} ({})", guid, reason);

        self.timers.cancel_peer(prefix);
        self.sedp_end_session(*prefix, fx);
        self.sedp.fragments.remove_participant(&guid);
        if entry.auth.admits() {
            self.bit_dispose(fx, BitKind::Participant, guid);
        }

        if let Some(ice) = self.ice.clone() {
            fx.call(move || ice.remove_remote(guid));
        }
        if let (Some(security), true) = (self.security.clone(), entry.data.identity_token.is_some()) {
            let local = self.guid;
            fx.call(move || security.end_handshake(local, guid));
        }
    }

    /// Permanently ignore a participant; an existing record is dropped.
    pub(crate) fn ignore_participant(&mut self, guid: GUID, fx: &mut Effects) {
        let participant = guid.participant_guid();
        self.ignored.insert(participant);
        self.remove_participant(&participant.prefix, "ignored", fx);
    }

    pub(crate) fn discovered_participants(&self) -> Vec<ParticipantData> {
        self.leases
            .iter()
            .filter(|e| e.auth.admits())
            .map(|e| e.data.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::engine::tests::{engine, remote_announcement};
    use super::*;
    use crate::transport::{Channel, Inbound};
    use std::time::Duration;

    fn inbound(engine: &Engine, data: &ParticipantData, seq: u64) -> Inbound {
        let datagram = Datagram::new(
            data.guid.prefix,
            vec![Submessage::Data {
                reader: ENTITYID_SPDP_READER,
                writer: ENTITYID_SPDP_WRITER,
                seq,
                payload: Payload::Participant(Box::new(data.clone())),
            }],
        );
        Inbound {
            channel: Channel::Spdp,
            source: data.spdp_unicast[0],
            payload: engine.codec.encode(&datagram).unwrap(),
        }
    }

    #[test]
    fn test_repeated_announcement_is_idempotent() {
        let now = Instant::now();
        let mut engine = engine(0);
        engine.start(now);
        let remote = remote_announcement(2, 0);

        let first = engine.handle_inbound(inbound(&engine, &remote, 1), now);
        assert_eq!(engine.leases.len(), 1);
        assert!(!first.sends.is_empty());

        for _ in 0..5 {
            let fx = engine.handle_inbound(inbound(&engine, &remote, 1), now);
            assert!(fx.is_empty());
        }
        assert_eq!(engine.leases.len(), 1);
        assert_eq!(engine.sedp.sessions.len(), 1);
    }

    #[test]
    fn test_foreign_domain_and_zero_lease_dropped() {
        let now = Instant::now();
        let mut engine = engine(0);
        engine.start(now);

        let other_domain = remote_announcement(2, 7);
        engine.handle_inbound(inbound(&engine, &other_domain, 1), now);

        let mut no_lease = remote_announcement(3, 0);
        no_lease.lease_duration = Duration::ZERO;
        engine.handle_inbound(inbound(&engine, &no_lease, 1), now);

        assert!(engine.leases.is_empty());
    }

    #[test]
    fn test_source_ip_check() {
        let now = Instant::now();
        let mut engine = engine(0);
        engine.start(now);
        let remote = remote_announcement(2, 0);
        let mut msg = inbound(&engine, &remote, 1);
        msg.source = "10.9.9.9:7410".parse().unwrap();
        engine.handle_inbound(msg, now);
        assert!(engine.leases.is_empty());

        engine.cfg.check_source_ip = false;
        let mut msg = inbound(&engine, &remote, 1);
        msg.source = "10.9.9.9:7410".parse().unwrap();
        engine.handle_inbound(msg, now);
        assert_eq!(engine.leases.len(), 1);
    }

    #[test]
    fn test_lease_is_clamped_and_expires() {
        let now = Instant::now();
        let mut engine = engine(0);
        engine.cfg.max_lease_duration = Duration::from_secs(5);
        engine.start(now);
        let mut remote = remote_announcement(2, 0);
        remote.lease_duration = Duration::from_secs(600);
        engine.handle_inbound(inbound(&engine, &remote, 1), now);
        assert_eq!(
            engine.leases.get(&remote.guid.prefix).map(|e| e.lease),
            Some(Duration::from_secs(5))
        );

        engine.on_timers(now + Duration::from_secs(4));
        assert_eq!(engine.leases.len(), 1);
        engine.on_timers(now + Duration::from_secs(6));
        assert!(engine.leases.is_empty());
        assert!(engine.sedp.sessions.is_empty());
    }

    #[test]
    fn test_sequence_reset_reincarnates_peer() {
        let now = Instant::now();
        let mut engine = engine(0);
        engine.start(now);
        let remote = remote_announcement(2, 0);
        engine.handle_inbound(inbound(&engine, &remote, 40), now);

        let later = now + Duration::from_secs(1);
        engine.handle_inbound(inbound(&engine, &remote, 1), later);
        engine.handle_inbound(inbound(&engine, &remote, 2), later);
        let entry = engine.leases.get(&remote.guid.prefix).unwrap();
        assert_eq!(entry.seq_resets, 2);
        assert_eq!(entry.last_seq, 40);

        engine.handle_inbound(inbound(&engine, &remote, 3), later);
        let entry = engine.leases.get(&remote.guid.prefix).unwrap();
        assert_eq!(entry.last_seq, 3);
        assert_eq!(entry.seq_resets, 0);
        assert_eq!(entry.discovered_at, later);
    }

    #[test]
    fn test_dispose_removes_peer() {
        let now = Instant::now();
        let mut engine = engine(0);
        engine.start(now);
        let remote = remote_announcement(2, 0);
        engine.handle_inbound(inbound(&engine, &remote, 1), now);

        let dispose = Datagram::new(
            remote.guid.prefix,
            vec![Submessage::Data {
                reader: ENTITYID_SPDP_READER,
                writer: ENTITYID_SPDP_WRITER,
                seq: 2,
                payload: Payload::ParticipantDispose(remote.guid),
            }],
        );
        let msg = Inbound {
            channel: Channel::Spdp,
            source: remote.spdp_unicast[0],
            payload: engine.codec.encode(&dispose).unwrap(),
        };
        engine.handle_inbound(msg, now);
        assert!(engine.leases.is_empty());
    }

    #[test]
    fn test_relay_only_sends_to_relay() {
        let now = Instant::now();
        let mut engine = engine(0);
        let relay: SocketAddr = "192.0.2.1:4444".parse().unwrap();
        engine.cfg.spdp_rtps_relay_address = Some(relay);
        engine.cfg.rtps_relay_only = true;
        let fx = engine.start(now);
        let dests: Vec<SocketAddr> = fx.sends.iter().map(|s| s.dest).collect();
        assert_eq!(dests, vec![relay]);
    }

    #[test]
    fn test_secure_user_data_withheld_from_multicast() {
        let mut engine = engine(0);
        engine.local.qos.user_data = b"secret".to_vec();
        engine.cfg.secure_participant_user_data = true;
        assert!(engine.announcement(false).qos.user_data.is_empty());
        assert_eq!(engine.announcement(true).qos.user_data, b"secret".to_vec());
    }
}
