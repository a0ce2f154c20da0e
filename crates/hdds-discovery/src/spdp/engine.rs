// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-participant discovery state machine.
//!
//! [`Engine`] holds everything one local participant knows: its own
//! announcement, the lease table, SEDP sessions and local entities. It never
//! touches sockets or user callbacks directly. Every handler records what must
//! happen in an [`Effects`] value, which the owner executes once the engine
//! lock has been released.

use super::lease::ParticipantLeaseTable;
use super::timers::{TimerKey, TimerQueue};
use super::SpdpState;
use crate::bit::{BitKind, BitPublisher, BitSample};
use crate::callbacks::{IceAgent, SecurityProvider, TypeLookupService};
use crate::config::{ConfigEvent, ConfigValues};
use crate::core::*;
use crate::protocol::{Datagram, DiscoveryCodec, ParticipantData, Payload, Submessage};
use crate::sedp::SedpState;
use crate::transport::Inbound;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Socket a datagram leaves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Spdp,
    Sedp,
}

pub(crate) struct Outbound {
    pub(crate) route: Route,
    pub(crate) dest: SocketAddr,
    pub(crate) datagram: Datagram,
}

pub(crate) type Call = Box<dyn FnOnce() + Send>;

/// Sends and callbacks produced under the engine lock.
#[derive(Default)]
pub(crate) struct Effects {
    pub(crate) sends: Vec<Outbound>,
    pub(crate) calls: Vec<Call>,
}

impl Effects {
    pub(crate) fn send(&mut self, route: Route, dest: SocketAddr, datagram: Datagram) {
        self.sends.push(Outbound {
            route,
            dest,
            datagram,
        });
    }

    pub(crate) fn send_all(&mut self, route: Route, dests: &[SocketAddr], datagram: &Datagram) {
        for dest in dests {
            self.send(route, *dest, datagram.clone());
        }
    }

    pub(crate) fn call(&mut self, f: impl FnOnce() + Send + 'static) {
        self.calls.push(Box::new(f));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sends.is_empty() && self.calls.is_empty()
    }
}

/// Construction inputs, resolved by the owning [`Spdp`](super::Spdp).
pub(crate) struct EngineSetup {
    pub(crate) guid: GUID,
    pub(crate) domain_id: u32,
    pub(crate) cfg: ConfigValues,
    pub(crate) codec: Arc<dyn DiscoveryCodec>,
    pub(crate) local: ParticipantData,
    pub(crate) security: Option<Arc<dyn SecurityProvider>>,
    pub(crate) ice: Option<Arc<dyn IceAgent>>,
    pub(crate) type_lookup: Option<Arc<dyn TypeLookupService>>,
    pub(crate) spdp_multicast: Option<SocketAddr>,
    pub(crate) sedp_multicast: Option<SocketAddr>,
}

pub(crate) struct Engine {
    pub(crate) guid: GUID,
    pub(crate) domain_id: u32,
    pub(crate) cfg: ConfigValues,
    pub(crate) state: SpdpState,
    pub(crate) codec: Arc<dyn DiscoveryCodec>,
    pub(crate) local: ParticipantData,
    pub(crate) spdp_seq: u64,
    pub(crate) leases: ParticipantLeaseTable,
    /// Ignored participants and entities; never revoked.
    pub(crate) ignored: HashSet<GUID>,
    pub(crate) timers: TimerQueue,
    pub(crate) sedp: SedpState,
    pub(crate) security: Option<Arc<dyn SecurityProvider>>,
    pub(crate) ice: Option<Arc<dyn IceAgent>>,
    pub(crate) type_lookup: Option<Arc<dyn TypeLookupService>>,
    pub(crate) bit: BitPublisher,
    pub(crate) spdp_multicast: Option<SocketAddr>,
    pub(crate) sedp_multicast: Option<SocketAddr>,
}

impl Engine {
    pub(crate) fn new(setup: EngineSetup) -> Self {
        let sedp = SedpState::new(setup.cfg.sedp_fragment_reassembly_timeout);
        Self {
            guid: setup.guid,
            domain_id: setup.domain_id,
            cfg: setup.cfg,
            state: SpdpState::Initializing,
            codec: setup.codec,
            local: setup.local,
            spdp_seq: 0,
            leases: ParticipantLeaseTable::new(),
            ignored: HashSet::new(),
            timers: TimerQueue::default(),
            sedp,
            security: setup.security,
            ice: setup.ice,
            type_lookup: setup.type_lookup,
            bit: BitPublisher::default(),
            spdp_multicast: setup.spdp_multicast,
            sedp_multicast: setup.sedp_multicast,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(self.state, SpdpState::Announcing | SpdpState::Operational)
    }

    /// Queue the first announcement and arm the periodic timers.
    pub(crate) fn start(&mut self, now: Instant) -> Effects {
        crate::trace_fn!("Engine::start");
        let mut fx = Effects::default();
        self.state = SpdpState::Announcing;
        self.announce(&mut fx);
        self.timers.schedule(TimerKey::SpdpResend, now + self.cfg.resend_period);
        self.timers
            .schedule(TimerKey::Heartbeat, now + self.cfg.sedp_heartbeat_period);
        self.timers.schedule(
            TimerKey::FragmentSweep,
            now + self.cfg.sedp_fragment_reassembly_timeout,
        );
        if self.cfg.use_rtps_relay || self.cfg.rtps_relay_only {
            self.timers.schedule(
                TimerKey::RelayAnnounce,
                now + self.cfg.spdp_rtps_relay_send_period,
            );
        }
        if self.cfg.use_ice && self.ice.is_some() {
            self.timers
                .schedule(TimerKey::IceCheck, now + self.cfg.ice_check_period);
        }
        log::debug!(
            "[spdp] participant {} announcing in domain {}",
            self.guid,
            self.domain_id
        );
        fx
    }

    /// Decode and dispatch one received datagram.
    pub(crate) fn handle_inbound(&mut self, inbound: Inbound, now: Instant) -> Effects {
        crate::trace_fn!("Engine::handle_inbound");
        let mut fx = Effects::default();
        if !self.is_running() {
            return fx;
        }
        let datagram = match self.codec.decode(&inbound.payload) {
            Ok(d) => d,
            Err(e) => {
                log::debug!("[spdp] dropping datagram from {}: {}", inbound.source, e);
                return fx;
            }
        };
        let sender = datagram.sender;
        if sender == self.guid.prefix || self.ignored.contains(&GUID::participant(sender)) {
            return fx;
        }

        for sub in datagram.submessages {
            match sub {
                Submessage::Data {
                    writer, seq, payload, ..
                } if writer == ENTITYID_SPDP_WRITER => {
                    self.on_spdp_data(inbound.source, sender, seq, payload, now, &mut fx);
                }
                Submessage::Data {
                    writer, seq, payload, ..
                } => self.on_sedp_data(sender, writer, seq, payload, now, &mut fx),
                Submessage::DataFrag {
                    writer,
                    seq,
                    fragment,
                    total_fragments,
                    sample_size,
                    bytes,
                    ..
                } => self.on_sedp_fragment(
                    sender,
                    writer,
                    seq,
                    (fragment, total_fragments, sample_size),
                    bytes,
                    now,
                    &mut fx,
                ),
                Submessage::Heartbeat {
                    writer,
                    first,
                    last,
                    ..
                } => self.on_heartbeat(sender, writer, first, last, now, &mut fx),
                Submessage::AckNack {
                    writer,
                    base,
                    missing,
                    ..
                } => self.on_acknack(sender, writer, base, &missing, &mut fx),
                Submessage::Gap {
                    writer, start, end, ..
                } => self.on_gap(sender, writer, start, end, now, &mut fx),
                Submessage::Handshake { destination, token } => {
                    if destination == self.guid.prefix {
                        self.on_handshake(sender, &token, now, &mut fx);
                    }
                }
                Submessage::TypeLookupRequest {
                    destination,
                    request_id,
                    hashes,
                } => {
                    if destination == self.guid.prefix {
                        self.on_type_lookup_request(sender, request_id, &hashes, &mut fx);
                    }
                }
                Submessage::TypeLookupReply {
                    destination,
                    request_id,
                    types,
                } => {
                    if destination == self.guid.prefix {
                        self.on_type_lookup_reply(request_id, types, now, &mut fx);
                    }
                }
            }
        }
        fx
    }

    /// Fire every timer due at `now`.
    pub(crate) fn on_timers(&mut self, now: Instant) -> Effects {
        let mut fx = Effects::default();
        if !self.is_running() {
            return fx;
        }
        for key in self.timers.pop_due(now) {
            match key {
                TimerKey::SpdpResend => {
                    self.announce(&mut fx);
                    self.timers
                        .schedule(TimerKey::SpdpResend, now + self.cfg.resend_period);
                }
                TimerKey::SpdpQuick => self.announce(&mut fx),
                TimerKey::RelayAnnounce => {
                    if self.cfg.use_rtps_relay || self.cfg.rtps_relay_only {
                        self.relay_announce(&mut fx);
                        self.timers.schedule(
                            TimerKey::RelayAnnounce,
                            now + self.cfg.spdp_rtps_relay_send_period,
                        );
                    }
                }
                TimerKey::LeaseCheck => self.check_leases(now, &mut fx),
                TimerKey::IceCheck => {
                    if let (true, Some(ice)) = (self.cfg.use_ice, self.ice.clone()) {
                        fx.call(move || ice.check());
                        self.timers
                            .schedule(TimerKey::IceCheck, now + self.cfg.ice_check_period);
                    }
                }
                TimerKey::Heartbeat => {
                    self.send_heartbeats(&mut fx);
                    self.timers
                        .schedule(TimerKey::Heartbeat, now + self.cfg.sedp_heartbeat_period);
                }
                TimerKey::SedpFlush => self.flush_outbox(&mut fx),
                TimerKey::FragmentSweep => {
                    self.sedp.fragments.sweep(now);
                    self.timers.schedule(
                        TimerKey::FragmentSweep,
                        now + self.cfg.sedp_fragment_reassembly_timeout,
                    );
                }
                TimerKey::AckNack(prefix) => self.send_acknacks(prefix, &mut fx),
                TimerKey::AuthResend(prefix) => self.resend_handshake(prefix, now, &mut fx),
                TimerKey::AuthTimeout(prefix) => self.auth_timeout(prefix, &mut fx),
                TimerKey::PassiveConnect(prefix) => self.passive_connect_expired(prefix),
                TimerKey::TypeLookupTimeout(id) => {
                    log::debug!("[sedp] type lookup {} timed out", id);
                    self.resolve_type_lookup(id, now, &mut fx);
                }
            }
        }
        fx
    }

    /// Apply a live configuration change.
    pub(crate) fn apply_config(&mut self, event: ConfigEvent, now: Instant) -> Effects {
        let mut fx = Effects::default();
        log::debug!("[spdp] {} live config {:?}", self.guid, event);
        match event {
            ConfigEvent::UseRtpsRelay(on) => {
                self.cfg.use_rtps_relay = on;
                self.relay_mode_changed(now, &mut fx);
                self.sedp_relay_changed(&mut fx);
            }
            ConfigEvent::RtpsRelayOnly(on) => {
                self.cfg.rtps_relay_only = on;
                self.relay_mode_changed(now, &mut fx);
                self.sedp_relay_changed(&mut fx);
            }
            ConfigEvent::UseIce(on) => {
                self.cfg.use_ice = on;
                if on && self.ice.is_some() {
                    self.timers.schedule_earlier(TimerKey::IceCheck, now);
                } else {
                    self.timers.cancel(TimerKey::IceCheck);
                }
            }
            ConfigEvent::SpdpRtpsRelayAddress(addr) => {
                self.cfg.spdp_rtps_relay_address = addr;
                self.relay_mode_changed(now, &mut fx);
            }
            ConfigEvent::SedpRtpsRelayAddress(addr) => {
                self.cfg.sedp_rtps_relay_address = addr;
                self.sedp_relay_changed(&mut fx);
            }
            ConfigEvent::SpdpStunServerAddress(addr) => {
                self.cfg.spdp_stun_server_address = addr;
                if let Some(ice) = self.ice.clone() {
                    fx.call(move || ice.set_stun_server(addr));
                }
            }
            ConfigEvent::SedpStunServerAddress(addr) => self.cfg.sedp_stun_server_address = addr,
        }
        fx
    }

    fn relay_mode_changed(&mut self, now: Instant, fx: &mut Effects) {
        let relay = self.cfg.use_rtps_relay || self.cfg.rtps_relay_only;
        if relay {
            self.local.flags |= crate::protocol::PARTICIPANT_FLAG_RELAY;
            self.relay_announce(fx);
            self.timers.schedule(
                TimerKey::RelayAnnounce,
                now + self.cfg.spdp_rtps_relay_send_period,
            );
        } else {
            self.local.flags &= !crate::protocol::PARTICIPANT_FLAG_RELAY;
            self.timers.cancel(TimerKey::RelayAnnounce);
        }
    }

    /// Mirror a sample to the BIT sink, if one is attached.
    pub(crate) fn bit_publish(&self, fx: &mut Effects, sample: BitSample) {
        if let Some(sink) = self.bit.live_sink() {
            fx.call(move || sink.publish(sample));
        }
    }

    pub(crate) fn bit_dispose(&self, fx: &mut Effects, kind: BitKind, key: GUID) {
        if let Some(sink) = self.bit.live_sink() {
            fx.call(move || sink.dispose(kind, key));
        }
    }

    /// Dispose announcement and state teardown for a graceful exit.
    pub(crate) fn shutdown(&mut self) -> Effects {
        let mut fx = Effects::default();
        if !self.is_running() {
            return fx;
        }
        self.state = SpdpState::ShuttingDown;
        let dispose = Datagram::new(
            self.guid.prefix,
            vec![Submessage::Data {
                reader: ENTITYID_SPDP_READER,
                writer: ENTITYID_SPDP_WRITER,
                seq: self.next_spdp_seq(),
                payload: Payload::ParticipantDispose(self.guid),
            }],
        );
        let mut dests = self.undirected_destinations();
        for prefix in self.leases.prefixes() {
            dests.extend(self.peer_spdp_destinations(&prefix));
        }
        dests.sort();
        dests.dedup();
        fx.send_all(Route::Spdp, &dests, &dispose);

        if let Some(security) = self.security.clone() {
            let local = self.guid;
            let peers: Vec<GUID> = self.leases.iter().map(|e| e.guid()).collect();
            fx.call(move || {
                for remote in peers {
                    security.end_handshake(local, remote);
                }
            });
        }
        self.timers.clear();
        log::debug!("[spdp] participant {} shutting down", self.guid);
        fx
    }

    pub(crate) fn next_spdp_seq(&mut self) -> u64 {
        self.spdp_seq += 1;
        self.spdp_seq
    }
}
