// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-peer SEDP reliability.
//!
//! A session starts when SPDP admits a peer: every builtin history is
//! replayed to it, followed by a HEARTBEAT. Afterwards the usual RTPS
//! exchange keeps both sides in sync: HEARTBEAT announces what a writer
//! holds, ACKNACK asks for what is missing, GAP covers superseded samples.

use super::{Builtin, PeerSession};
use crate::bit::BitKind;
use crate::core::*;
use crate::protocol::{split_payload, Datagram, Payload, Submessage};
use crate::spdp::engine::{Effects, Engine, Route};
use crate::spdp::timers::TimerKey;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Instant;

/// Room left for the RTPS header and one submessage header in a datagram.
const FRAME_OVERHEAD: usize = 64;
/// Size charged for a control submessage when batching.
const CONTROL_SUBMESSAGE_SIZE: usize = 32;
/// Fully acknowledged peers still get a HEARTBEAT every this many rounds,
/// so a peer that rebuilt its reader state learns what it lost.
const IDLE_HEARTBEAT_ROUNDS: u32 = 10;

impl Engine {
    /// SEDP destinations for a peer.
    pub(crate) fn sedp_destinations(&self, prefix: &GuidPrefix) -> Vec<SocketAddr> {
        if self.cfg.rtps_relay_only {
            return self.cfg.sedp_rtps_relay_address.into_iter().collect();
        }
        let Some(entry) = self.leases.get(prefix) else {
            return Vec::new();
        };
        let mut dests = if let Some(addr) = self.ice_selected(entry.guid()) {
            vec![addr]
        } else if !entry.data.metatraffic_unicast.is_empty() {
            entry.data.metatraffic_unicast.clone()
        } else {
            entry.data.default_unicast.clone()
        };
        if self.cfg.use_rtps_relay {
            dests.extend(self.cfg.sedp_rtps_relay_address);
        }
        dests
    }

    /// Queue submessages for `dests`, batching small ones and fragmenting
    /// payloads larger than `sedp_max_message_size`.
    pub(crate) fn push_sedp(&self, dests: &[SocketAddr], subs: Vec<Submessage>, fx: &mut Effects) {
        if dests.is_empty() || subs.is_empty() {
            return;
        }
        let limit = self
            .cfg
            .sedp_max_message_size
            .saturating_sub(FRAME_OVERHEAD)
            .max(FRAME_OVERHEAD);
        let mut batch = Vec::new();
        let mut batch_size = 0usize;

        for sub in subs {
            let size = match &sub {
                Submessage::Data { payload, .. } => self.codec.encode_payload(payload).len(),
                _ => CONTROL_SUBMESSAGE_SIZE,
            };
            if size > limit {
                if let Submessage::Data {
                    reader,
                    writer,
                    seq,
                    payload,
                } = sub
                {
                    self.flush_batch(dests, &mut batch, &mut batch_size, fx);
                    self.push_fragments(dests, reader, writer, seq, &payload, limit, fx);
                }
                continue;
            }
            if batch_size + size > limit {
                self.flush_batch(dests, &mut batch, &mut batch_size, fx);
            }
            batch_size += size;
            batch.push(sub);
        }
        self.flush_batch(dests, &mut batch, &mut batch_size, fx);
    }

    fn flush_batch(
        &self,
        dests: &[SocketAddr],
        batch: &mut Vec<Submessage>,
        batch_size: &mut usize,
        fx: &mut Effects,
    ) {
        if batch.is_empty() {
            return;
        }
        let datagram = Datagram::new(self.guid.prefix, std::mem::take(batch));
        fx.send_all(Route::Sedp, dests, &datagram);
        *batch_size = 0;
    }

    fn push_fragments(
        &self,
        dests: &[SocketAddr],
        reader: [u8; 4],
        writer: [u8; 4],
        seq: u64,
        payload: &Payload,
        limit: usize,
        fx: &mut Effects,
    ) {
        let bytes = self.codec.encode_payload(payload);
        let pieces = split_payload(&bytes, limit);
        let total = pieces.len() as u32;
        log::debug!(
            "[sedp] seq={} is {} bytes, sending {} fragments",
            seq,
            bytes.len(),
            total
        );
        for (i, piece) in pieces.into_iter().enumerate() {
            let datagram = Datagram::new(
                self.guid.prefix,
                vec![Submessage::DataFrag {
                    reader,
                    writer,
                    seq,
                    fragment: i as u32 + 1,
                    total_fragments: total,
                    sample_size: bytes.len() as u32,
                    bytes: piece.to_vec(),
                }],
            );
            fx.send_all(Route::Sedp, dests, &datagram);
        }
    }

    /// Start the reliable exchange with an admitted peer.
    pub(crate) fn sedp_start_session(&mut self, prefix: GuidPrefix, now: Instant, fx: &mut Effects) {
        if self.sedp.sessions.contains_key(&prefix) {
            return;
        }
        let dests = self.sedp_destinations(&prefix);
        log::debug!(
            "[sedp] session with {} via {:?}",
            GUID::participant(prefix),
            dests
        );
        self.sedp
            .sessions
            .insert(prefix, PeerSession::new(dests.clone(), now));
        self.timers.schedule(
            TimerKey::PassiveConnect(prefix),
            now + self.cfg.sedp_passive_connect_duration,
        );

        self.sedp.heartbeat_count += 1;
        let count = self.sedp.heartbeat_count;
        let mut subs = Vec::new();
        for history in self.sedp.histories.values() {
            subs.extend(history.replay(1, history.last_seq()));
            subs.push(history.heartbeat(count));
        }
        self.push_sedp(&dests, subs, fx);
    }

    /// Tear down a session and everything learned through it.
    pub(crate) fn sedp_end_session(&mut self, prefix: GuidPrefix, fx: &mut Effects) {
        let had_session = self.sedp.sessions.remove(&prefix).is_some();

        let writers: Vec<GUID> = self
            .sedp
            .remote_writers
            .keys()
            .filter(|g| g.prefix == prefix)
            .copied()
            .collect();
        for guid in writers {
            self.sedp.remote_writers.remove(&guid);
            self.unmatch_endpoint(guid, fx);
            self.bit_dispose(fx, BitKind::Publication, guid);
        }
        let readers: Vec<GUID> = self
            .sedp
            .remote_readers
            .keys()
            .filter(|g| g.prefix == prefix)
            .copied()
            .collect();
        for guid in readers {
            self.sedp.remote_readers.remove(&guid);
            self.unmatch_endpoint(guid, fx);
            self.bit_dispose(fx, BitKind::Subscription, guid);
        }
        let topics: Vec<GUID> = self
            .sedp
            .remote_topics
            .keys()
            .filter(|g| g.prefix == prefix)
            .copied()
            .collect();
        for guid in topics {
            self.sedp.remote_topics.remove(&guid);
            self.bit_dispose(fx, BitKind::Topic, guid);
        }
        for topic in self.sedp.topics.values_mut() {
            topic.inconsistent.retain(|g| g.prefix != prefix);
        }
        let lookups: Vec<u64> = self
            .sedp
            .lookups
            .iter()
            .filter(|(_, l)| l.peer == prefix)
            .map(|(id, _)| *id)
            .collect();
        for id in lookups {
            self.sedp.lookups.remove(&id);
            self.timers.cancel(TimerKey::TypeLookupTimeout(id));
        }
        if had_session {
            log::debug!("[sedp] session with {} closed", GUID::participant(prefix));
        }
    }

    /// Peer announced new locators: refresh destinations and associations.
    pub(crate) fn sedp_locators_changed(&mut self, prefix: GuidPrefix, fx: &mut Effects) {
        let dests = self.sedp_destinations(&prefix);
        if let Some(session) = self.sedp.sessions.get_mut(&prefix) {
            session.dests = dests;
        }
        let endpoints: Vec<GUID> = self
            .sedp
            .remote_writers
            .keys()
            .chain(self.sedp.remote_readers.keys())
            .filter(|g| g.prefix == prefix)
            .copied()
            .collect();
        for guid in endpoints {
            self.refresh_pair_locators(guid, fx);
        }
    }

    /// Relay settings changed: re-route every session and announce the
    /// histories on the new path so the peer can catch up.
    pub(crate) fn sedp_relay_changed(&mut self, fx: &mut Effects) {
        let prefixes: Vec<GuidPrefix> = self.sedp.sessions.keys().copied().collect();
        let mut rerouted = Vec::new();
        for prefix in prefixes {
            let dests = self.sedp_destinations(&prefix);
            if let Some(session) = self.sedp.sessions.get_mut(&prefix) {
                if session.dests != dests {
                    log::debug!(
                        "[sedp] session with {} now via {:?}",
                        GUID::participant(prefix),
                        dests
                    );
                    session.dests = dests.clone();
                    rerouted.push(dests);
                }
            }
        }
        if rerouted.is_empty() {
            return;
        }

        self.sedp.heartbeat_count += 1;
        let count = self.sedp.heartbeat_count;
        let beats: Vec<Submessage> = self
            .sedp
            .histories
            .values()
            .filter(|h| h.last_seq() > 0)
            .map(|h| h.heartbeat(count))
            .collect();
        for dests in rerouted {
            self.push_sedp(&dests, beats.clone(), fx);
        }
    }

    pub(crate) fn passive_connect_expired(&mut self, prefix: GuidPrefix) {
        if let Some(session) = self.sedp.sessions.get(&prefix) {
            if !session.responded {
                log::warn!(
                    "[sedp] participant {} silent for {:?} after discovery",
                    GUID::participant(prefix),
                    self.cfg.sedp_passive_connect_duration
                );
            }
        }
    }

    /// Store a local sample and send it now or after `sedp_send_delay`.
    pub(crate) fn publish_builtin(
        &mut self,
        builtin: Builtin,
        payload: Payload,
        now: Instant,
        fx: &mut Effects,
    ) {
        let seq = self.sedp.history(builtin).write(payload);
        self.sedp.outbox.push((builtin, seq));
        self.prune_acked_disposes(builtin);
        if self.cfg.sedp_send_delay.is_zero() {
            self.flush_outbox(fx);
        } else {
            self.timers
                .schedule_earlier(TimerKey::SedpFlush, now + self.cfg.sedp_send_delay);
        }
    }

    /// Forget dispose samples every open session has acknowledged. Peers
    /// that connect later never knew the instance and get a GAP instead.
    fn prune_acked_disposes(&mut self, builtin: Builtin) {
        let Some(history) = self.sedp.histories.get(&builtin) else {
            return;
        };
        let floor = self
            .sedp
            .sessions
            .values()
            .map(|s| s.acked.get(&builtin).copied().unwrap_or(0))
            .min()
            .unwrap_or_else(|| history.last_seq());
        let pruned = self.sedp.history(builtin).prune_disposed(floor);
        if pruned > 0 {
            log::trace!("[sedp] pruned {} acknowledged disposes from {:?}", pruned, builtin);
        }
    }

    pub(crate) fn flush_outbox(&mut self, fx: &mut Effects) {
        let outbox = std::mem::take(&mut self.sedp.outbox);
        if outbox.is_empty() || self.sedp.sessions.is_empty() {
            return;
        }
        self.sedp.heartbeat_count += 1;
        let count = self.sedp.heartbeat_count;

        let mut subs = Vec::new();
        let mut touched = BTreeSet::new();
        for (builtin, seq) in outbox {
            if let Some(history) = self.sedp.histories.get(&builtin) {
                subs.extend(history.replay(seq, seq));
                touched.insert(builtin);
            }
        }
        for builtin in touched {
            if let Some(history) = self.sedp.histories.get(&builtin) {
                subs.push(history.heartbeat(count));
            }
        }

        match self.sedp_multicast_target() {
            Some(group) => self.push_sedp(&[group], subs, fx),
            None => {
                for session in self.sedp.sessions.values() {
                    self.push_sedp(&session.dests, subs.clone(), fx);
                }
            }
        }
    }

    /// Multicast pays off only with several peers that all listen on it.
    fn sedp_multicast_target(&self) -> Option<SocketAddr> {
        if !self.cfg.sedp_multicast || self.cfg.rtps_relay_only || self.sedp.sessions.len() < 2 {
            return None;
        }
        let all_listen = self.sedp.sessions.keys().all(|prefix| {
            self.leases
                .get(prefix)
                .is_some_and(|e| !e.data.metatraffic_multicast.is_empty())
        });
        if all_listen {
            self.sedp_multicast
        } else {
            None
        }
    }

    /// Periodic HEARTBEAT to peers that have not acknowledged everything,
    /// and to every peer once per idle round.
    pub(crate) fn send_heartbeats(&mut self, fx: &mut Effects) {
        if self.sedp.sessions.is_empty() {
            return;
        }
        self.sedp.heartbeat_rounds = self.sedp.heartbeat_rounds.wrapping_add(1);
        let idle = self.sedp.heartbeat_rounds % IDLE_HEARTBEAT_ROUNDS == 0;
        self.sedp.heartbeat_count += 1;
        let count = self.sedp.heartbeat_count;
        let beats: Vec<(Builtin, u64, Submessage)> = self
            .sedp
            .histories
            .iter()
            .filter(|(_, h)| h.last_seq() > 0)
            .map(|(b, h)| (*b, h.last_seq(), h.heartbeat(count)))
            .collect();

        for session in self.sedp.sessions.values() {
            let subs: Vec<Submessage> = beats
                .iter()
                .filter(|(b, last, _)| idle || session.acked.get(b).copied().unwrap_or(0) < *last)
                .map(|(_, _, hb)| hb.clone())
                .collect();
            self.push_sedp(&session.dests, subs, fx);
        }
    }

    fn schedule_acknack(&mut self, prefix: GuidPrefix, now: Instant, fx: &mut Effects) {
        if self.cfg.sedp_responsive_mode {
            self.send_acknacks(prefix, fx);
        } else {
            self.timers.schedule_earlier(
                TimerKey::AckNack(prefix),
                now + self.cfg.sedp_nak_response_delay,
            );
        }
    }

    pub(crate) fn send_acknacks(&mut self, prefix: GuidPrefix, fx: &mut Effects) {
        let Some(session) = self.sedp.sessions.get_mut(&prefix) else {
            return;
        };
        let mut subs = Vec::new();
        for (builtin, proxy) in session.proxies.iter_mut() {
            if !proxy.ack_requested {
                continue;
            }
            proxy.ack_requested = false;
            proxy.acknack_count += 1;
            subs.push(Submessage::AckNack {
                reader: builtin.reader_id(),
                writer: builtin.writer_id(),
                base: proxy.base(),
                missing: proxy.missing(),
                count: proxy.acknack_count,
            });
        }
        let dests = session.dests.clone();
        self.push_sedp(&dests, subs, fx);
    }

    /// Mark the session alive and hand back the proxy for `writer`.
    fn proxy_input(
        &mut self,
        sender: GuidPrefix,
        writer: [u8; 4],
        apply: impl FnOnce(&mut super::ReaderProxy) -> Vec<Payload>,
    ) -> Option<(Builtin, Vec<Payload>)> {
        let builtin = Builtin::from_writer_id(writer)?;
        let Some(session) = self.sedp.sessions.get_mut(&sender) else {
            log::debug!(
                "[sedp] dropping traffic from {} without session",
                GUID::participant(sender)
            );
            return None;
        };
        session.responded = true;
        let proxy = session.proxies.get_mut(&builtin)?;
        let delivered = apply(proxy);
        self.timers.cancel(TimerKey::PassiveConnect(sender));
        Some((builtin, delivered))
    }

    fn ack_pending(&self, sender: &GuidPrefix) -> bool {
        self.sedp
            .sessions
            .get(sender)
            .is_some_and(|s| s.proxies.values().any(|p| p.ack_requested))
    }

    pub(crate) fn on_sedp_data(
        &mut self,
        sender: GuidPrefix,
        writer: [u8; 4],
        seq: u64,
        payload: Payload,
        now: Instant,
        fx: &mut Effects,
    ) {
        let Some((builtin, delivered)) = self.proxy_input(sender, writer, |p| p.receive(seq, payload))
        else {
            return;
        };
        if self.ack_pending(&sender) {
            self.schedule_acknack(sender, now, fx);
        }
        for sample in delivered {
            self.process_remote_sample(sender, builtin, sample, now, fx);
        }
    }

    pub(crate) fn on_sedp_fragment(
        &mut self,
        sender: GuidPrefix,
        writer: [u8; 4],
        seq: u64,
        (fragment, total, sample_size): (u32, u32, u32),
        bytes: Vec<u8>,
        now: Instant,
        fx: &mut Effects,
    ) {
        if !self.sedp.sessions.contains_key(&sender) {
            return;
        }
        let writer_guid = GUID::new(sender, writer);
        let Some(full) =
            self.sedp
                .fragments
                .insert(writer_guid, seq, fragment, total, sample_size, bytes, now)
        else {
            return;
        };
        match self.codec.decode_payload(writer, &full) {
            Ok(payload) => self.on_sedp_data(sender, writer, seq, payload, now, fx),
            Err(e) => log::debug!("[sedp] reassembled seq={} undecodable: {}", seq, e),
        }
    }

    pub(crate) fn on_heartbeat(
        &mut self,
        sender: GuidPrefix,
        writer: [u8; 4],
        first: u64,
        last: u64,
        now: Instant,
        fx: &mut Effects,
    ) {
        let Some((builtin, delivered)) = self.proxy_input(sender, writer, |p| p.heartbeat(first, last))
        else {
            return;
        };
        self.schedule_acknack(sender, now, fx);
        for sample in delivered {
            self.process_remote_sample(sender, builtin, sample, now, fx);
        }
    }

    pub(crate) fn on_gap(
        &mut self,
        sender: GuidPrefix,
        writer: [u8; 4],
        start: u64,
        end: u64,
        now: Instant,
        fx: &mut Effects,
    ) {
        let Some((builtin, delivered)) = self.proxy_input(sender, writer, |p| p.gap(start, end))
        else {
            return;
        };
        if self.ack_pending(&sender) {
            self.schedule_acknack(sender, now, fx);
        }
        for sample in delivered {
            self.process_remote_sample(sender, builtin, sample, now, fx);
        }
    }

    /// ACKNACK for one of our builtin writers.
    pub(crate) fn on_acknack(
        &mut self,
        sender: GuidPrefix,
        writer: [u8; 4],
        base: u64,
        missing: &[u64],
        fx: &mut Effects,
    ) {
        let Some(builtin) = Builtin::from_writer_id(writer) else {
            return;
        };
        let Some(session) = self.sedp.sessions.get_mut(&sender) else {
            return;
        };
        session.responded = true;
        if let Some(acked) = session.acked.get_mut(&builtin) {
            *acked = (*acked).max(base.saturating_sub(1));
        }
        let dests = session.dests.clone();
        self.timers.cancel(TimerKey::PassiveConnect(sender));
        self.prune_acked_disposes(builtin);
        if missing.is_empty() {
            return;
        }
        let resend = match self.sedp.histories.get(&builtin) {
            Some(history) => history.resend(missing),
            None => return,
        };
        log::debug!(
            "[sedp] resending {} submessages to {}",
            resend.len(),
            GUID::participant(sender)
        );
        self.push_sedp(&dests, resend, fx);
    }

    /// Route an in-order sample from a peer to the matching logic.
    fn process_remote_sample(
        &mut self,
        sender: GuidPrefix,
        builtin: Builtin,
        payload: Payload,
        now: Instant,
        fx: &mut Effects,
    ) {
        if payload.key().prefix != sender {
            log::debug!(
                "[sedp] {} announced foreign entity {}",
                GUID::participant(sender),
                payload.key()
            );
            return;
        }
        match payload {
            Payload::Topic(topic) => self.remote_topic(topic, fx),
            Payload::Publication(publication) => self.remote_publication(publication, now, fx),
            Payload::Subscription(subscription) => self.remote_subscription(subscription, now, fx),
            Payload::EndpointDispose(guid) => self.remote_dispose(builtin, guid, fx),
            Payload::ParticipantMessage(message) => self.remote_liveliness(message, fx),
            Payload::Participant(_) | Payload::ParticipantDispose(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::IDLE_HEARTBEAT_ROUNDS;
    use crate::config::ConfigEvent;
    use crate::protocol::{ParticipantData, Payload, PublicationData, Submessage, TopicData};
    use crate::qos::QoS;
    use crate::sedp::Builtin;
    use crate::spdp::engine::tests::{engine, remote_announcement};
    use crate::spdp::engine::{Engine, Route};
    use crate::spdp::lease::ParticipantEntry;
    use crate::core::*;
    use std::net::SocketAddr;
    use std::time::Instant;

    fn topic(prefix: u8, key: u32) -> Payload {
        Payload::Topic(TopicData {
            guid: GUID::entity([prefix; 12], key, EntityKind::Topic),
            name: format!("T{}", key),
            type_name: "X".to_string(),
            qos: QoS::default(),
        })
    }

    #[test]
    fn test_session_replays_history() {
        let now = Instant::now();
        let mut engine = engine(0);
        engine.cfg.sedp_send_delay = std::time::Duration::ZERO;
        engine.start(now);
        let mut fx = Default::default();
        engine.publish_builtin(Builtin::Topics, topic(1, 1), now, &mut fx);
        engine.publish_builtin(Builtin::Topics, topic(1, 2), now, &mut fx);

        let remote = remote_announcement(2, 0);
        engine.leases.insert(ParticipantEntry::new(
            remote.clone(),
            remote.spdp_unicast[0],
            remote.lease_duration,
            1,
            now,
        ));
        let mut fx = Default::default();
        engine.sedp_start_session(remote.guid.prefix, now, &mut fx);

        let data: usize = fx
            .sends
            .iter()
            .filter(|s| s.route == Route::Sedp)
            .flat_map(|s| s.datagram.submessages.iter())
            .filter(|m| matches!(m, Submessage::Data { .. }))
            .count();
        assert_eq!(data, 2);
        assert!(fx
            .sends
            .iter()
            .all(|s| remote.metatraffic_unicast.contains(&s.dest)));
    }

    fn session_with(engine: &mut Engine, prefix: u8, now: Instant) -> ParticipantData {
        let remote = remote_announcement(prefix, 0);
        engine.leases.insert(ParticipantEntry::new(
            remote.clone(),
            remote.spdp_unicast[0],
            remote.lease_duration,
            1,
            now,
        ));
        let mut fx = Default::default();
        engine.sedp_start_session(remote.guid.prefix, now, &mut fx);
        remote
    }

    #[test]
    fn test_relay_only_reroutes_open_sessions() {
        let now = Instant::now();
        let mut engine = engine(0);
        engine.cfg.sedp_send_delay = std::time::Duration::ZERO;
        engine.start(now);
        let mut fx = Default::default();
        engine.publish_builtin(Builtin::Topics, topic(1, 1), now, &mut fx);
        let remote = session_with(&mut engine, 2, now);
        let relay: SocketAddr = "127.0.0.60:5555".parse().unwrap();

        let fx = engine.apply_config(ConfigEvent::SedpRtpsRelayAddress(Some(relay)), now);
        assert!(fx.sends.iter().all(|s| s.route != Route::Sedp));
        assert_eq!(
            engine.sedp.sessions[&remote.guid.prefix].dests,
            remote.metatraffic_unicast
        );

        let fx = engine.apply_config(ConfigEvent::RtpsRelayOnly(true), now);
        assert_eq!(engine.sedp.sessions[&remote.guid.prefix].dests, vec![relay]);
        let sedp: Vec<_> = fx.sends.iter().filter(|s| s.route == Route::Sedp).collect();
        assert!(!sedp.is_empty());
        assert!(sedp.iter().all(|s| s.dest == relay));
        assert!(sedp
            .iter()
            .flat_map(|s| s.datagram.submessages.iter())
            .any(|m| matches!(m, Submessage::Heartbeat { last: 1, .. })));

        let mut fx = Default::default();
        engine.publish_builtin(Builtin::Topics, topic(1, 2), now, &mut fx);
        assert!(!fx.sends.is_empty());
        assert!(fx
            .sends
            .iter()
            .all(|s| s.route == Route::Sedp && s.dest == relay));
    }

    #[test]
    fn test_acked_peer_still_gets_idle_heartbeat() {
        let now = Instant::now();
        let mut engine = engine(0);
        engine.cfg.sedp_send_delay = std::time::Duration::ZERO;
        engine.start(now);
        let mut fx = Default::default();
        engine.publish_builtin(Builtin::Topics, topic(1, 1), now, &mut fx);
        let remote = session_with(&mut engine, 2, now);
        let prefix = remote.guid.prefix;

        let mut fx = Default::default();
        engine.on_acknack(prefix, Builtin::Topics.writer_id(), 2, &[], &mut fx);
        assert_eq!(engine.sedp.sessions[&prefix].acked[&Builtin::Topics], 1);

        let mut rounds = 0;
        loop {
            rounds += 1;
            let mut fx = Default::default();
            engine.send_heartbeats(&mut fx);
            if !fx.sends.is_empty() {
                assert!(fx
                    .sends
                    .iter()
                    .all(|s| remote.metatraffic_unicast.contains(&s.dest)));
                break;
            }
            assert!(rounds < IDLE_HEARTBEAT_ROUNDS, "acked peer never heard a heartbeat");
        }

        // A peer that lost its reader state asks again from the start.
        let mut fx = Default::default();
        engine.on_acknack(prefix, Builtin::Topics.writer_id(), 1, &[1], &mut fx);
        assert!(fx
            .sends
            .iter()
            .flat_map(|s| s.datagram.submessages.iter())
            .any(|m| matches!(m, Submessage::Data { seq: 1, .. })));
    }

    #[test]
    fn test_disposes_pruned_once_acknowledged() {
        let now = Instant::now();
        let mut engine = engine(0);
        engine.cfg.sedp_send_delay = std::time::Duration::ZERO;
        engine.start(now);
        let mut fx = Default::default();
        for key in 0..50 {
            engine.publish_builtin(Builtin::Topics, topic(1, key), now, &mut fx);
            let gone = Payload::EndpointDispose(GUID::entity([1; 12], key, EntityKind::Topic));
            engine.publish_builtin(Builtin::Topics, gone, now, &mut fx);
        }
        assert_eq!(engine.sedp.histories[&Builtin::Topics].len(), 0);

        let remote = session_with(&mut engine, 2, now);
        let gone = Payload::EndpointDispose(GUID::entity([1; 12], 7, EntityKind::Topic));
        engine.publish_builtin(Builtin::Topics, topic(1, 7), now, &mut fx);
        engine.publish_builtin(Builtin::Topics, gone, now, &mut fx);
        assert_eq!(engine.sedp.histories[&Builtin::Topics].len(), 1);

        let last = engine.sedp.histories[&Builtin::Topics].last_seq();
        engine.on_acknack(
            remote.guid.prefix,
            Builtin::Topics.writer_id(),
            last + 1,
            &[],
            &mut fx,
        );
        assert_eq!(engine.sedp.histories[&Builtin::Topics].len(), 0);
    }

    #[test]
    fn test_large_payload_is_fragmented() {
        let now = Instant::now();
        let mut engine = engine(0);
        engine.cfg.sedp_max_message_size = 512;
        let mut qos = QoS::default();
        qos.user_data = vec![7u8; 2000];
        let payload = Payload::Publication(PublicationData {
            guid: GUID::entity([1; 12], 9, EntityKind::WriterWithKey),
            participant_guid: GUID::participant([1; 12]),
            topic_name: "T".to_string(),
            type_name: "X".to_string(),
            qos,
            locators: Vec::new(),
            type_info: None,
        });
        let dest = "127.0.0.2:7412".parse().unwrap();
        let mut fx = Default::default();
        engine.push_sedp(
            &[dest],
            vec![Submessage::Data {
                reader: ENTITYID_SEDP_PUBLICATIONS_READER,
                writer: ENTITYID_SEDP_PUBLICATIONS_WRITER,
                seq: 1,
                payload,
            }],
            &mut fx,
        );
        let frags: Vec<u32> = fx
            .sends
            .iter()
            .filter_map(|s| match &s.datagram.submessages[0] {
                Submessage::DataFrag { fragment, .. } => Some(*fragment),
                _ => None,
            })
            .collect();
        assert!(frags.len() >= 4);
        assert_eq!(frags[0], 1);
        assert_eq!(frags.len(), fx.sends.len());
    }
}
