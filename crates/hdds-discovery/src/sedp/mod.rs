// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simple Endpoint Discovery.
//!
//! One reliable session per admitted peer exchanges the local topic,
//! publication, subscription and participant-message records. Matching runs
//! over every (writer, reader) pair on the same topic name; each pair sits in
//! exactly one [`PairState`] and callbacks fire only on state transitions.
//!
//! # Module Layout
//!
//! - `history`: builtin writer histories and reader proxies
//! - `session`: per-peer reliability (DATA/HEARTBEAT/ACKNACK/GAP, fragments)
//! - `local`: operations on local topics and endpoints
//! - `matching`: pair evaluation and association callbacks
//! - `type_lookup`: XTypes type checks and remote type lookups

mod history;
mod local;
mod matching;
mod session;
mod type_lookup;

pub(crate) use history::{Builtin, ReaderProxy, WriterHistory};

use crate::callbacks::{DataReaderCallbacks, DataWriterCallbacks, TopicCallbacks};
use crate::core::*;
use crate::protocol::{
    FragmentBuffer, PublicationData, SubscriptionData, TopicData, TypeHash, DEFAULT_MAX_PENDING,
};
use crate::qos::{IncompatibleQosStatus, QoS};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of `assert_topic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicStatus {
    /// A new topic record was created.
    Created,
    /// An identical topic already existed and is shared.
    Found,
}

/// Answer of `find_topic`.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicInfo {
    pub guid: GUID,
    pub name: String,
    pub type_name: String,
    pub qos: QoS,
    /// Record owned by the local participant (as opposed to discovered).
    pub local: bool,
}

/// Local topic record.
pub(crate) struct LocalTopic {
    pub(crate) data: TopicData,
    pub(crate) has_key: bool,
    pub(crate) callbacks: Option<Arc<dyn TopicCallbacks>>,
    /// `assert_topic` calls not yet balanced by `remove_topic`.
    pub(crate) refs: u32,
    /// Endpoints created on this topic.
    pub(crate) endpoints: u32,
    /// Remote topic guids announced with another type name.
    pub(crate) inconsistent: HashSet<GUID>,
}

pub(crate) struct LocalWriter {
    pub(crate) data: PublicationData,
    pub(crate) topic: GUID,
    pub(crate) callbacks: Arc<dyn DataWriterCallbacks>,
    pub(crate) incompatible: IncompatibleQosStatus,
}

pub(crate) struct LocalReader {
    pub(crate) data: SubscriptionData,
    pub(crate) topic: GUID,
    pub(crate) callbacks: Arc<dyn DataReaderCallbacks>,
    pub(crate) incompatible: IncompatibleQosStatus,
}

/// Reliable exchange with one remote participant.
pub(crate) struct PeerSession {
    /// SEDP destinations (elected ICE address, relay or metatraffic unicast).
    pub(crate) dests: Vec<SocketAddr>,
    pub(crate) proxies: BTreeMap<Builtin, ReaderProxy>,
    /// Highest sequence the peer acknowledged, per local builtin writer.
    pub(crate) acked: BTreeMap<Builtin, u64>,
    /// Peer sent anything on SEDP since the session started.
    pub(crate) responded: bool,
    pub(crate) started: Instant,
}

impl PeerSession {
    pub(crate) fn new(dests: Vec<SocketAddr>, now: Instant) -> Self {
        Self {
            dests,
            proxies: Builtin::ALL
                .into_iter()
                .map(|b| (b, ReaderProxy::default()))
                .collect(),
            acked: Builtin::ALL.into_iter().map(|b| (b, 0)).collect(),
            responded: false,
            started: now,
        }
    }
}

/// State of one (writer, reader) candidate pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PairState {
    QosIncompatible,
    /// Waiting for type lookup `id`.
    TypePending(u64),
    TypeIncompatible,
    Matched,
}

/// Outstanding type-lookup request.
pub(crate) struct PendingLookup {
    pub(crate) peer: GuidPrefix,
    pub(crate) hash: TypeHash,
    pub(crate) pairs: HashSet<(GUID, GUID)>,
}

/// Everything SEDP tracks for one local participant.
pub(crate) struct SedpState {
    pub(crate) histories: BTreeMap<Builtin, WriterHistory>,
    pub(crate) sessions: HashMap<GuidPrefix, PeerSession>,
    pub(crate) topics: HashMap<GUID, LocalTopic>,
    pub(crate) writers: HashMap<GUID, LocalWriter>,
    pub(crate) readers: HashMap<GUID, LocalReader>,
    pub(crate) remote_topics: HashMap<GUID, TopicData>,
    pub(crate) remote_writers: HashMap<GUID, PublicationData>,
    pub(crate) remote_readers: HashMap<GUID, SubscriptionData>,
    /// Keyed by (writer, reader).
    pub(crate) pairs: HashMap<(GUID, GUID), PairState>,
    pub(crate) lookups: HashMap<u64, PendingLookup>,
    /// Hashes whose lookup finished (answered or timed out).
    pub(crate) resolved_hashes: HashSet<TypeHash>,
    pub(crate) next_lookup_id: u64,
    pub(crate) next_entity_key: u32,
    /// Samples written but not yet sent (coalesced by `sedp_send_delay`).
    pub(crate) outbox: Vec<(Builtin, u64)>,
    pub(crate) fragments: FragmentBuffer,
    pub(crate) heartbeat_count: u32,
    /// Periodic heartbeat rounds, for the idle heartbeat cadence.
    pub(crate) heartbeat_rounds: u32,
}

impl SedpState {
    pub(crate) fn new(reassembly_timeout: Duration) -> Self {
        Self {
            histories: Builtin::ALL
                .into_iter()
                .map(|b| (b, WriterHistory::new(b)))
                .collect(),
            sessions: HashMap::new(),
            topics: HashMap::new(),
            writers: HashMap::new(),
            readers: HashMap::new(),
            remote_topics: HashMap::new(),
            remote_writers: HashMap::new(),
            remote_readers: HashMap::new(),
            pairs: HashMap::new(),
            lookups: HashMap::new(),
            resolved_hashes: HashSet::new(),
            next_lookup_id: 1,
            next_entity_key: 1,
            outbox: Vec::new(),
            fragments: FragmentBuffer::new(DEFAULT_MAX_PENDING, reassembly_timeout),
            heartbeat_count: 0,
            heartbeat_rounds: 0,
        }
    }

    pub(crate) fn local_topic_by_name(&self, name: &str) -> Option<(&GUID, &LocalTopic)> {
        self.topics.iter().find(|(_, t)| t.data.name == name)
    }

    pub(crate) fn history(&mut self, builtin: Builtin) -> &mut WriterHistory {
        self.histories
            .entry(builtin)
            .or_insert_with(|| WriterHistory::new(builtin))
    }

    /// Incompatible-QoS status of a local endpoint.
    #[cfg(test)]
    pub(crate) fn incompatible_status(&self, endpoint: &GUID) -> Option<IncompatibleQosStatus> {
        self.writers
            .get(endpoint)
            .map(|w| w.incompatible.clone())
            .or_else(|| self.readers.get(endpoint).map(|r| r.incompatible.clone()))
    }

    /// Incompatible-QoS status of a local endpoint, resetting the change counter.
    pub(crate) fn take_incompatible_status(&mut self, endpoint: &GUID) -> Option<IncompatibleQosStatus> {
        if let Some(w) = self.writers.get_mut(endpoint) {
            return Some(w.incompatible.take_change());
        }
        self.readers.get_mut(endpoint).map(|r| r.incompatible.take_change())
    }
}
