// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! XTypes type compatibility for matching.
//!
//! - `XTypesMode::None`, or either side without type information: type names
//!   must be equal.
//! - `Minimal`: equal minimal hashes, else the type service decides.
//! - `Complete`: equal complete hashes; otherwise the remote complete type is
//!   fetched from its owner before the type service decides. A lookup that
//!   times out falls back to minimal hash equality.

use super::matching::EndpointView;
use super::{PairState, PendingLookup};
use crate::config::XTypesMode;
use crate::core::*;
use crate::protocol::{Submessage, TypeHash, TypeInformation};
use crate::spdp::engine::{Effects, Engine};
use crate::spdp::timers::TimerKey;
use std::collections::HashSet;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeVerdict {
    Compatible,
    Incompatible,
    /// Waiting for lookup `id`.
    Pending(u64),
}

impl TypeVerdict {
    fn from_bool(ok: bool) -> Self {
        if ok {
            TypeVerdict::Compatible
        } else {
            TypeVerdict::Incompatible
        }
    }
}

fn minimal_equal(writer: &TypeInformation, reader: &TypeInformation) -> bool {
    writer.minimal.is_some() && writer.minimal == reader.minimal
}

impl Engine {
    pub(crate) fn check_types(
        &mut self,
        w: &EndpointView,
        r: &EndpointView,
        now: Instant,
        fx: &mut Effects,
    ) -> TypeVerdict {
        let (Some(wi), Some(ri)) = (&w.type_info, &r.type_info) else {
            return TypeVerdict::from_bool(w.type_name == r.type_name);
        };
        match self.cfg.use_xtypes {
            XTypesMode::None => TypeVerdict::from_bool(w.type_name == r.type_name),
            XTypesMode::Minimal => self.minimal_verdict(wi, ri),
            XTypesMode::Complete => self.complete_verdict(w, r, wi, ri, now, fx),
        }
    }

    fn minimal_verdict(&self, wi: &TypeInformation, ri: &TypeInformation) -> TypeVerdict {
        if minimal_equal(wi, ri) {
            return TypeVerdict::Compatible;
        }
        let assignable = self
            .type_lookup
            .as_ref()
            .is_some_and(|service| service.is_assignable(ri, wi));
        TypeVerdict::from_bool(assignable)
    }

    fn complete_verdict(
        &mut self,
        w: &EndpointView,
        r: &EndpointView,
        wi: &TypeInformation,
        ri: &TypeInformation,
        now: Instant,
        fx: &mut Effects,
    ) -> TypeVerdict {
        if wi.complete.is_some() && wi.complete == ri.complete {
            return TypeVerdict::Compatible;
        }
        let Some(service) = self.type_lookup.clone() else {
            return self.minimal_verdict(wi, ri);
        };
        let (remote_info, remote_participant) = if w.local { (ri, r.participant) } else { (wi, w.participant) };
        let Some(hash) = remote_info.complete else {
            return self.minimal_verdict(wi, ri);
        };

        if (w.local && r.local) || service.has_type(&hash) {
            return TypeVerdict::from_bool(service.is_assignable(ri, wi));
        }
        if self.sedp.resolved_hashes.contains(&hash) {
            return TypeVerdict::from_bool(minimal_equal(wi, ri));
        }
        let id = self.request_type(remote_participant.prefix, hash, (w.guid, r.guid), now, fx);
        TypeVerdict::Pending(id)
    }

    /// Ask `peer` for a type object; concurrent requests for one hash share an id.
    fn request_type(
        &mut self,
        peer: GuidPrefix,
        hash: TypeHash,
        pair: (GUID, GUID),
        now: Instant,
        fx: &mut Effects,
    ) -> u64 {
        if let Some((id, lookup)) = self
            .sedp
            .lookups
            .iter_mut()
            .find(|(_, l)| l.peer == peer && l.hash == hash)
        {
            lookup.pairs.insert(pair);
            return *id;
        }

        let id = self.sedp.next_lookup_id;
        self.sedp.next_lookup_id += 1;
        self.sedp.lookups.insert(
            id,
            PendingLookup {
                peer,
                hash,
                pairs: HashSet::from([pair]),
            },
        );
        self.timers.schedule(
            TimerKey::TypeLookupTimeout(id),
            now + self.cfg.max_type_lookup_service_reply_period,
        );
        log::debug!(
            "[sedp] type lookup {} for {:02x?} from {}",
            id,
            hash,
            GUID::participant(peer)
        );

        let dests = self
            .sedp
            .sessions
            .get(&peer)
            .map(|s| s.dests.clone())
            .unwrap_or_default();
        let request = Submessage::TypeLookupRequest {
            destination: peer,
            request_id: id,
            hashes: vec![hash],
        };
        self.push_sedp(&dests, vec![request], fx);
        id
    }

    /// Finish lookup `id` (answered or timed out) and re-evaluate its pairs.
    pub(crate) fn resolve_type_lookup(&mut self, id: u64, now: Instant, fx: &mut Effects) {
        let Some(lookup) = self.sedp.lookups.remove(&id) else {
            return;
        };
        self.timers.cancel(TimerKey::TypeLookupTimeout(id));
        self.sedp.resolved_hashes.insert(lookup.hash);
        for (writer, reader) in lookup.pairs {
            if self.sedp.pairs.get(&(writer, reader)) == Some(&PairState::TypePending(id)) {
                self.evaluate_pair(writer, reader, now, fx);
            }
        }
    }

    pub(crate) fn on_type_lookup_request(
        &mut self,
        sender: GuidPrefix,
        request_id: u64,
        hashes: &[TypeHash],
        fx: &mut Effects,
    ) {
        let Some(session) = self.sedp.sessions.get(&sender) else {
            return;
        };
        let types: Vec<(TypeHash, Vec<u8>)> = match &self.type_lookup {
            Some(service) => hashes
                .iter()
                .filter_map(|h| service.type_object(h).map(|obj| (*h, obj)))
                .collect(),
            None => Vec::new(),
        };
        let reply = Submessage::TypeLookupReply {
            destination: sender,
            request_id,
            types,
        };
        self.push_sedp(&session.dests, vec![reply], fx);
    }

    pub(crate) fn on_type_lookup_reply(
        &mut self,
        request_id: u64,
        types: Vec<(TypeHash, Vec<u8>)>,
        now: Instant,
        fx: &mut Effects,
    ) {
        if let Some(service) = &self.type_lookup {
            for (hash, object) in types {
                service.add_type_object(hash, object);
            }
        }
        self.resolve_type_lookup(request_id, now, fx);
    }

    /// Type object delivered out of band.
    pub(crate) fn type_lookup_reply_received(
        &mut self,
        hash: TypeHash,
        object: Vec<u8>,
        now: Instant,
        fx: &mut Effects,
    ) {
        if let Some(service) = &self.type_lookup {
            service.add_type_object(hash, object);
        }
        let ids: Vec<u64> = self
            .sedp
            .lookups
            .iter()
            .filter(|(_, l)| l.hash == hash)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.resolve_type_lookup(id, now, fx);
        }
    }
}
