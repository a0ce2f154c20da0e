// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery datagram model.

use super::types::{
    ParticipantData, ParticipantMessageData, PublicationData, SubscriptionData, TopicData,
    TypeHash,
};
use crate::core::{GuidPrefix, GUID};

/// One datagram: sender prefix plus submessages.
#[derive(Debug, Clone, PartialEq)]
pub struct Datagram {
    pub sender: GuidPrefix,
    pub vendor_id: [u8; 2],
    pub submessages: Vec<Submessage>,
}

impl Datagram {
    pub fn new(sender: GuidPrefix, submessages: Vec<Submessage>) -> Self {
        Self {
            sender,
            vendor_id: crate::core::VENDOR_ID,
            submessages,
        }
    }
}

/// Serialized sample carried by DATA.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Participant(Box<ParticipantData>),
    /// Participant left (dispose + unregister).
    ParticipantDispose(GUID),
    Topic(TopicData),
    Publication(PublicationData),
    Subscription(SubscriptionData),
    /// Topic/publication/subscription removed; the writer id tells which.
    EndpointDispose(GUID),
    ParticipantMessage(ParticipantMessageData),
}

impl Payload {
    /// Instance key of the sample.
    pub fn key(&self) -> GUID {
        match self {
            Payload::Participant(p) => p.guid,
            Payload::ParticipantDispose(g) | Payload::EndpointDispose(g) => *g,
            Payload::Topic(t) => t.guid,
            Payload::Publication(p) => p.guid,
            Payload::Subscription(s) => s.guid,
            Payload::ParticipantMessage(m) => m.participant,
        }
    }

    pub fn is_dispose(&self) -> bool {
        matches!(
            self,
            Payload::ParticipantDispose(_) | Payload::EndpointDispose(_)
        )
    }
}

/// Submessages understood by the discovery engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Submessage {
    Data {
        reader: [u8; 4],
        writer: [u8; 4],
        seq: u64,
        payload: Payload,
    },
    /// One fragment (1-based) of a serialized payload.
    DataFrag {
        reader: [u8; 4],
        writer: [u8; 4],
        seq: u64,
        fragment: u32,
        total_fragments: u32,
        sample_size: u32,
        bytes: Vec<u8>,
    },
    Heartbeat {
        reader: [u8; 4],
        writer: [u8; 4],
        first: u64,
        last: u64,
        count: u32,
    },
    /// `base` is the next expected sequence; `missing` lists requested ones.
    AckNack {
        reader: [u8; 4],
        writer: [u8; 4],
        base: u64,
        missing: Vec<u64>,
        count: u32,
    },
    /// Sequence numbers in `[start, end)` carry nothing relevant.
    Gap {
        reader: [u8; 4],
        writer: [u8; 4],
        start: u64,
        end: u64,
    },
    /// Authentication handshake token addressed to one participant.
    Handshake {
        destination: GuidPrefix,
        token: Vec<u8>,
    },
    TypeLookupRequest {
        destination: GuidPrefix,
        request_id: u64,
        hashes: Vec<TypeHash>,
    },
    TypeLookupReply {
        destination: GuidPrefix,
        request_id: u64,
        types: Vec<(TypeHash, Vec<u8>)>,
    },
}
