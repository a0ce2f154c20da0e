// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Authentication handshake gating SEDP with secure peers.
//!
//! The participant with the lower GUID prefix initiates. Tokens travel as
//! HANDSHAKE submessages on the SPDP route; the last token is re-sent every
//! `auth_resend_period` until the provider reports completion or
//! `max_auth_time` elapses.

use super::engine::{Effects, Engine, Route};
use super::lease::AuthState;
use super::timers::TimerKey;
use crate::bit::BitSample;
use crate::callbacks::HandshakeStep;
use crate::core::*;
use crate::protocol::{Datagram, Submessage};
use std::time::Instant;

impl Engine {
    pub(crate) fn begin_auth(&mut self, prefix: GuidPrefix, now: Instant, fx: &mut Effects) {
        let Some(security) = self.security.clone() else {
            return;
        };
        let Some(entry) = self.leases.get(&prefix) else {
            return;
        };
        let AuthState::Pending { initiator, .. } = entry.auth else {
            return;
        };
        let remote = entry.guid();
        let identity = entry.data.identity_token.clone().unwrap_or_default();

        self.timers
            .schedule(TimerKey::AuthTimeout(prefix), now + self.cfg.max_auth_time);
        if initiator {
            log::debug!("[spdp] starting handshake with {}", remote);
            let step = security.begin_handshake(self.guid, remote, &identity);
            self.apply_handshake_step(prefix, step, now, fx);
        }
    }

    pub(crate) fn on_handshake(
        &mut self,
        sender: GuidPrefix,
        token: &[u8],
        now: Instant,
        fx: &mut Effects,
    ) {
        let Some(security) = self.security.clone() else {
            return;
        };
        let Some(entry) = self.leases.get(&sender) else {
            log::debug!("[spdp] handshake from unknown participant, dropped");
            return;
        };
        let remote = entry.guid();
        let auth = entry.auth.clone();
        let last = entry.last_token.clone();
        match auth {
            AuthState::Pending { .. } => {
                let step = security.process_handshake(self.guid, remote, token);
                self.apply_handshake_step(sender, step, now, fx);
            }
            // Peer missed our final token.
            AuthState::Authenticated => {
                if let Some(last) = last {
                    self.send_handshake(sender, last, fx);
                }
            }
            _ => {}
        }
    }

    fn apply_handshake_step(
        &mut self,
        prefix: GuidPrefix,
        step: HandshakeStep,
        now: Instant,
        fx: &mut Effects,
    ) {
        match step {
            HandshakeStep::Continue(token) => {
                if let Some(entry) = self.leases.get_mut(&prefix) {
                    entry.last_token = Some(token.clone());
                }
                self.send_handshake(prefix, token, fx);
                self.timers
                    .schedule(TimerKey::AuthResend(prefix), now + self.cfg.auth_resend_period);
            }
            HandshakeStep::Final(token) => {
                if let Some(entry) = self.leases.get_mut(&prefix) {
                    entry.last_token = Some(token.clone());
                }
                self.send_handshake(prefix, token, fx);
                self.authenticated(prefix, now, fx);
            }
            HandshakeStep::Complete => self.authenticated(prefix, now, fx),
            HandshakeStep::Failed(reason) => {
                log::warn!("[spdp] authentication failed: {}", reason);
                self.remove_participant(&prefix, "authentication failed", fx);
            }
        }
    }

    fn authenticated(&mut self, prefix: GuidPrefix, now: Instant, fx: &mut Effects) {
        let Some(entry) = self.leases.get_mut(&prefix) else {
            return;
        };
        entry.auth = AuthState::Authenticated;
        log::debug!("[spdp] participant {} authenticated", entry.guid());
        let sample = BitSample::Participant(entry.data.clone());
        self.timers.cancel(TimerKey::AuthResend(prefix));
        self.timers.cancel(TimerKey::AuthTimeout(prefix));
        // Full lease applies from now on.
        self.timers.schedule_earlier(TimerKey::LeaseCheck, now);

        if self.cfg.secure_participant_user_data {
            self.directed_announce(&prefix, fx);
        }
        self.bit_publish(fx, sample);
        self.sedp_start_session(prefix, now, fx);
    }

    fn send_handshake(&mut self, prefix: GuidPrefix, token: Vec<u8>, fx: &mut Effects) {
        let dests = self.peer_spdp_destinations(&prefix);
        let datagram = Datagram::new(
            self.guid.prefix,
            vec![Submessage::Handshake {
                destination: prefix,
                token,
            }],
        );
        fx.send_all(Route::Spdp, &dests, &datagram);
    }

    pub(crate) fn resend_handshake(&mut self, prefix: GuidPrefix, now: Instant, fx: &mut Effects) {
        let Some(entry) = self.leases.get(&prefix) else {
            return;
        };
        if !matches!(entry.auth, AuthState::Pending { .. }) {
            return;
        }
        if let Some(token) = entry.last_token.clone() {
            self.send_handshake(prefix, token, fx);
        }
        self.timers
            .schedule(TimerKey::AuthResend(prefix), now + self.cfg.auth_resend_period);
    }

    pub(crate) fn auth_timeout(&mut self, prefix: GuidPrefix, fx: &mut Effects) {
        let pending = self
            .leases
            .get(&prefix)
            .is_some_and(|e| matches!(e.auth, AuthState::Pending { .. }));
        if pending {
            log::warn!(
                "[spdp] authentication with {} timed out",
                GUID::participant(prefix)
            );
            self.remove_participant(&prefix, "authentication timed out", fx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::engine::tests::{engine, remote_announcement};
    use super::*;
    use crate::bit::{BitCache, BitKind, BitSink, InstanceState};
    use crate::callbacks::SecurityProvider;
    use crate::protocol::Payload;
    use crate::transport::{Channel, Inbound};
    use std::sync::Arc;
    use std::time::Duration;

    /// Two-step handshake: "hello" then "done".
    struct TwoStep;

    impl SecurityProvider for TwoStep {
        fn identity_token(&self, _local: GUID) -> crate::Result<Vec<u8>> {
            Ok(b"id".to_vec())
        }

        fn begin_handshake(&self, _local: GUID, _remote: GUID, _identity: &[u8]) -> HandshakeStep {
            HandshakeStep::Continue(b"hello".to_vec())
        }

        fn process_handshake(&self, _local: GUID, _remote: GUID, token: &[u8]) -> HandshakeStep {
            match token {
                b"hello" => HandshakeStep::Final(b"done".to_vec()),
                b"done" => HandshakeStep::Complete,
                _ => HandshakeStep::Failed("unexpected token".to_string()),
            }
        }
    }

    fn secure_engine() -> Engine {
        let mut engine = engine(0);
        engine.security = Some(Arc::new(TwoStep));
        engine.local.identity_token = Some(b"id".to_vec());
        engine
    }

    fn spdp(engine: &Engine, sender: GuidPrefix, sub: Submessage) -> Inbound {
        Inbound {
            channel: Channel::Spdp,
            source: "127.0.0.2:7410".parse().unwrap(),
            payload: engine.codec.encode(&Datagram::new(sender, vec![sub])).unwrap(),
        }
    }

    fn announce(engine: &Engine, data: &crate::protocol::ParticipantData) -> Inbound {
        spdp(
            engine,
            data.guid.prefix,
            Submessage::Data {
                reader: ENTITYID_SPDP_READER,
                writer: ENTITYID_SPDP_WRITER,
                seq: 1,
                payload: Payload::Participant(Box::new(data.clone())),
            },
        )
    }

    #[test]
    fn test_initiator_completes_handshake() {
        let now = Instant::now();
        let mut engine = secure_engine();
        engine.start(now);
        let mut remote = remote_announcement(2, 0);
        remote.identity_token = Some(b"id".to_vec());

        engine.handle_inbound(announce(&engine, &remote), now);
        let entry = engine.leases.get(&remote.guid.prefix).unwrap();
        assert!(matches!(entry.auth, AuthState::Pending { initiator: true, .. }));
        assert_eq!(entry.last_token.as_deref(), Some(&b"hello"[..]));
        assert!(engine.sedp.sessions.is_empty());
        assert!(engine.discovered_participants().is_empty());

        let reply = Submessage::Handshake {
            destination: engine.guid.prefix,
            token: b"done".to_vec(),
        };
        engine.handle_inbound(spdp(&engine, remote.guid.prefix, reply), now);
        let entry = engine.leases.get(&remote.guid.prefix).unwrap();
        assert_eq!(entry.auth, AuthState::Authenticated);
        assert_eq!(engine.sedp.sessions.len(), 1);
    }

    #[test]
    fn test_participant_bit_waits_for_authentication() {
        let now = Instant::now();
        let mut engine = secure_engine();
        let cache = BitCache::new();
        let sink: Arc<dyn BitSink> = cache.clone();
        engine.bit.attach(&sink);
        engine.start(now);
        let mut remote = remote_announcement(2, 0);
        remote.identity_token = Some(b"id".to_vec());

        let fx = engine.handle_inbound(announce(&engine, &remote), now);
        fx.calls.into_iter().for_each(|call| call());
        assert!(cache.state(BitKind::Participant, remote.guid).is_none());

        let reply = Submessage::Handshake {
            destination: engine.guid.prefix,
            token: b"done".to_vec(),
        };
        let fx = engine.handle_inbound(spdp(&engine, remote.guid.prefix, reply), now);
        fx.calls.into_iter().for_each(|call| call());
        assert_eq!(
            cache.state(BitKind::Participant, remote.guid),
            Some(InstanceState::Alive)
        );
    }

    #[test]
    fn test_failed_handshake_leaves_no_bit_record() {
        let now = Instant::now();
        let mut engine = secure_engine();
        let cache = BitCache::new();
        let sink: Arc<dyn BitSink> = cache.clone();
        engine.bit.attach(&sink);
        engine.start(now);
        let mut remote = remote_announcement(2, 0);
        remote.identity_token = Some(b"id".to_vec());

        let fx = engine.handle_inbound(announce(&engine, &remote), now);
        fx.calls.into_iter().for_each(|call| call());
        let bogus = Submessage::Handshake {
            destination: engine.guid.prefix,
            token: b"bogus".to_vec(),
        };
        let fx = engine.handle_inbound(spdp(&engine, remote.guid.prefix, bogus), now);
        fx.calls.into_iter().for_each(|call| call());
        assert!(engine.leases.is_empty());
        assert!(cache.get(BitKind::Participant, remote.guid).is_none());
    }

    #[test]
    fn test_handshake_timeout_drops_peer() {
        let now = Instant::now();
        let mut engine = secure_engine();
        engine.cfg.max_auth_time = Duration::from_secs(2);
        engine.start(now);
        let mut remote = remote_announcement(2, 0);
        remote.identity_token = Some(b"id".to_vec());
        engine.handle_inbound(announce(&engine, &remote), now);
        assert_eq!(engine.leases.len(), 1);

        let resend = engine.on_timers(now + Duration::from_millis(1100));
        assert!(resend
            .sends
            .iter()
            .any(|s| matches!(s.datagram.submessages[0], Submessage::Handshake { .. })));

        engine.on_timers(now + Duration::from_secs(3));
        assert!(engine.leases.is_empty());
    }

    #[test]
    fn test_unauthenticated_peer_rejected_by_default() {
        let now = Instant::now();
        let mut engine = secure_engine();
        engine.start(now);
        let remote = remote_announcement(2, 0);
        engine.handle_inbound(announce(&engine, &remote), now);
        assert!(engine.leases.is_empty());
    }
}
