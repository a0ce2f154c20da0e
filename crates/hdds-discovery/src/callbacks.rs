// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entity-layer collaborators.
//!
//! Discovery never owns DataWriters or DataReaders. It reports matches
//! through these traits, always after the engine lock has been released, so
//! implementations may call back into the facade.

use crate::core::GUID;
use crate::filter::ContentFilterProperty;
use crate::protocol::{TypeHash, TypeInformation};
use crate::qos::{IncompatibleQosStatus, QoS};
use dashmap::DashMap;
use std::net::SocketAddr;

/// A reader matched with a local writer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderAssociation {
    pub reader: GUID,
    pub participant: GUID,
    pub locators: Vec<SocketAddr>,
    pub qos: QoS,
    /// Filter the writer may evaluate on the reader's behalf.
    pub content_filter: Option<ContentFilterProperty>,
}

/// A writer matched with a local reader.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterAssociation {
    pub writer: GUID,
    pub participant: GUID,
    pub locators: Vec<SocketAddr>,
    pub qos: QoS,
}

/// Match notifications for a local DataWriter.
pub trait DataWriterCallbacks: Send + Sync {
    fn add_association(&self, writer: GUID, reader: &ReaderAssociation);

    fn remove_associations(&self, writer: GUID, readers: &[GUID]);

    /// Cumulative incompatible-QoS status (counts and last policy).
    fn update_incompatible_qos(&self, writer: GUID, status: &IncompatibleQosStatus);

    /// Matched reader changed its filter parameters; the match is kept.
    fn update_subscription_params(&self, _writer: GUID, _reader: GUID, _params: &[String]) {}

    fn update_locators(&self, _writer: GUID, _reader: GUID, _locators: &[SocketAddr]) {}
}

/// Match notifications for a local DataReader.
pub trait DataReaderCallbacks: Send + Sync {
    fn add_association(&self, reader: GUID, writer: &WriterAssociation);

    fn remove_associations(&self, reader: GUID, writers: &[GUID]);

    fn update_incompatible_qos(&self, reader: GUID, status: &IncompatibleQosStatus);

    /// A participant with matched writers asserted liveliness.
    fn signal_liveliness(&self, _reader: GUID, _remote_participant: GUID) {}

    fn update_locators(&self, _reader: GUID, _writer: GUID, _locators: &[SocketAddr]) {}
}

/// Topic-level notifications.
pub trait TopicCallbacks: Send + Sync {
    /// A remote participant announced this topic name with another type.
    fn inconsistent_topic(&self, topic: GUID, total_count: u32);
}

/// XTypes type object store consulted during matching.
pub trait TypeLookupService: Send + Sync {
    /// Serialized type object for a hash, if known locally.
    fn type_object(&self, hash: &TypeHash) -> Option<Vec<u8>>;

    /// Remember a type object learned from a remote participant.
    fn add_type_object(&self, hash: TypeHash, object: Vec<u8>);

    fn has_type(&self, hash: &TypeHash) -> bool {
        self.type_object(hash).is_some()
    }

    /// Whether data of `remote` type can be read as `local` type.
    ///
    /// Called once both complete types are known.
    fn is_assignable(&self, local: &TypeInformation, remote: &TypeInformation) -> bool;
}

/// Type store that treats equal hashes as assignable.
///
/// Applications with real type objects supply their own assignability rules.
#[derive(Default)]
pub struct TypeObjectRegistry {
    objects: DashMap<TypeHash, Vec<u8>>,
}

impl TypeObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local type under its hash.
    pub fn register(&self, hash: TypeHash, object: Vec<u8>) {
        self.objects.insert(hash, object);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl TypeLookupService for TypeObjectRegistry {
    fn type_object(&self, hash: &TypeHash) -> Option<Vec<u8>> {
        self.objects.get(hash).map(|o| o.value().clone())
    }

    fn add_type_object(&self, hash: TypeHash, object: Vec<u8>) {
        self.objects.entry(hash).or_insert(object);
    }

    fn is_assignable(&self, local: &TypeInformation, remote: &TypeInformation) -> bool {
        let same_complete = local.complete.is_some() && local.complete == remote.complete;
        let same_object = match (&local.complete, &remote.complete) {
            (Some(l), Some(r)) => match (self.objects.get(l), self.objects.get(r)) {
                (Some(a), Some(b)) => a.value() == b.value(),
                _ => false,
            },
            _ => false,
        };
        same_complete || same_object || (local.minimal.is_some() && local.minimal == remote.minimal)
    }
}

/// Result of one authentication handshake step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Send this token and wait for the peer's answer.
    Continue(Vec<u8>),
    /// Send this token; the peer is authenticated.
    Final(Vec<u8>),
    /// Authenticated, nothing more to send.
    Complete,
    Failed(String),
}

/// Authentication plugin boundary.
///
/// Handshake steps are called on the engine thread with the engine locked;
/// they must not call back into discovery.
pub trait SecurityProvider: Send + Sync {
    /// Identity token announced in SPDP.
    fn identity_token(&self, local: GUID) -> crate::Result<Vec<u8>>;

    /// Admit remote participants that announce no identity token.
    fn allow_unauthenticated(&self) -> bool {
        false
    }

    /// First step; called on the side with the lower GUID prefix.
    fn begin_handshake(&self, local: GUID, remote: GUID, remote_identity: &[u8]) -> HandshakeStep;

    /// Process a token received from `remote`.
    fn process_handshake(&self, local: GUID, remote: GUID, token: &[u8]) -> HandshakeStep;

    /// Forget per-peer state (peer lost or handshake abandoned).
    fn end_handshake(&self, _local: GUID, _remote: GUID) {}
}

/// NAT traversal agent boundary.
pub trait IceAgent: Send + Sync {
    /// Candidates announced in SPDP.
    fn local_candidates(&self) -> Vec<SocketAddr>;

    fn add_remote_candidates(&self, remote: GUID, candidates: &[SocketAddr]);

    fn remove_remote(&self, remote: GUID);

    /// Elected address for a peer, preferred over its announced locators.
    fn selected_address(&self, remote: GUID) -> Option<SocketAddr>;

    /// Periodic connectivity checks.
    fn check(&self) {}

    fn set_stun_server(&self, _server: Option<SocketAddr>) {}
}
