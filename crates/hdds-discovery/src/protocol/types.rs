// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Records exchanged by SPDP and SEDP.

use crate::core::GUID;
use crate::filter::ContentFilterProperty;
use crate::qos::{LivelinessKind, ParticipantQos, QoS};
use std::net::SocketAddr;
use std::time::Duration;

/// Builtin endpoint bits announced in SPDP.
pub mod builtin_endpoints {
    pub const PARTICIPANT_ANNOUNCER: u32 = 1 << 0;
    pub const PARTICIPANT_DETECTOR: u32 = 1 << 1;
    pub const PUBLICATIONS_ANNOUNCER: u32 = 1 << 2;
    pub const PUBLICATIONS_DETECTOR: u32 = 1 << 3;
    pub const SUBSCRIPTIONS_ANNOUNCER: u32 = 1 << 4;
    pub const SUBSCRIPTIONS_DETECTOR: u32 = 1 << 5;
    pub const PARTICIPANT_MESSAGE_WRITER: u32 = 1 << 10;
    pub const PARTICIPANT_MESSAGE_READER: u32 = 1 << 11;
    pub const TOPICS_ANNOUNCER: u32 = 1 << 28;
    pub const TOPICS_DETECTOR: u32 = 1 << 29;

    /// Everything this implementation runs.
    pub const ALL: u32 = PARTICIPANT_ANNOUNCER
        | PARTICIPANT_DETECTOR
        | PUBLICATIONS_ANNOUNCER
        | PUBLICATIONS_DETECTOR
        | SUBSCRIPTIONS_ANNOUNCER
        | SUBSCRIPTIONS_DETECTOR
        | PARTICIPANT_MESSAGE_WRITER
        | PARTICIPANT_MESSAGE_READER
        | TOPICS_ANNOUNCER
        | TOPICS_DETECTOR;
}

/// Participant flag: announcements also travel through an RTPS relay.
pub const PARTICIPANT_FLAG_RELAY: u32 = 1 << 0;

/// SPDP participant announcement.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantData {
    pub guid: GUID,
    pub domain_id: u32,
    pub vendor_id: [u8; 2],
    pub lease_duration: Duration,
    pub qos: ParticipantQos,
    /// SEDP unicast locators.
    pub metatraffic_unicast: Vec<SocketAddr>,
    /// SEDP multicast locators.
    pub metatraffic_multicast: Vec<SocketAddr>,
    pub default_unicast: Vec<SocketAddr>,
    pub default_multicast: Vec<SocketAddr>,
    /// Where directed SPDP announcements reach this participant.
    pub spdp_unicast: Vec<SocketAddr>,
    pub builtin_endpoints: u32,
    /// Security identity token; present only for secure participants.
    pub identity_token: Option<Vec<u8>>,
    pub ice_candidates: Vec<SocketAddr>,
    pub user_tag: u32,
    pub flags: u32,
}

impl ParticipantData {
    /// Minimal record; locators are filled in by the engine.
    pub fn new(guid: GUID, domain_id: u32, lease_duration: Duration) -> Self {
        Self {
            guid,
            domain_id,
            vendor_id: crate::core::VENDOR_ID,
            lease_duration,
            qos: ParticipantQos::default(),
            metatraffic_unicast: Vec::new(),
            metatraffic_multicast: Vec::new(),
            default_unicast: Vec::new(),
            default_multicast: Vec::new(),
            spdp_unicast: Vec::new(),
            builtin_endpoints: builtin_endpoints::ALL,
            identity_token: None,
            ice_candidates: Vec::new(),
            user_tag: 0,
            flags: 0,
        }
    }

    /// Every announced address (used for source-IP checks).
    pub fn all_locators(&self) -> impl Iterator<Item = &SocketAddr> {
        self.metatraffic_unicast
            .iter()
            .chain(&self.metatraffic_multicast)
            .chain(&self.default_unicast)
            .chain(&self.spdp_unicast)
            .chain(&self.ice_candidates)
    }

    /// Same peer addresses (the part SEDP cares about).
    pub fn same_locators(&self, other: &ParticipantData) -> bool {
        self.metatraffic_unicast == other.metatraffic_unicast
            && self.metatraffic_multicast == other.metatraffic_multicast
            && self.default_unicast == other.default_unicast
            && self.spdp_unicast == other.spdp_unicast
            && self.ice_candidates == other.ice_candidates
    }
}

/// 14-byte XTypes equivalence hash.
pub type TypeHash = [u8; 14];

/// XTypes type identifiers attached to an endpoint announcement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeInformation {
    pub minimal: Option<TypeHash>,
    pub complete: Option<TypeHash>,
}

impl TypeInformation {
    pub fn new(minimal: Option<TypeHash>, complete: Option<TypeHash>) -> Self {
        Self { minimal, complete }
    }

    /// Hash both serialized type objects the way XTypes does (MD5, first 14 bytes).
    #[cfg(feature = "xtypes")]
    pub fn from_type_objects(minimal: &[u8], complete: &[u8]) -> Self {
        Self {
            minimal: Some(hash_type_object(minimal)),
            complete: Some(hash_type_object(complete)),
        }
    }
}

/// XTypes equivalence hash of a serialized type object.
#[cfg(feature = "xtypes")]
pub fn hash_type_object(bytes: &[u8]) -> TypeHash {
    use md5::{Digest, Md5};
    let digest = Md5::digest(bytes);
    let mut hash = [0u8; 14];
    hash.copy_from_slice(&digest[..14]);
    hash
}

/// SEDP topic record.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicData {
    pub guid: GUID,
    pub name: String,
    pub type_name: String,
    pub qos: QoS,
}

/// SEDP publication (DataWriter) record.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicationData {
    pub guid: GUID,
    pub participant_guid: GUID,
    pub topic_name: String,
    pub type_name: String,
    pub qos: QoS,
    pub locators: Vec<SocketAddr>,
    pub type_info: Option<TypeInformation>,
}

/// SEDP subscription (DataReader) record.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionData {
    pub guid: GUID,
    pub participant_guid: GUID,
    pub topic_name: String,
    pub type_name: String,
    pub qos: QoS,
    pub locators: Vec<SocketAddr>,
    pub type_info: Option<TypeInformation>,
    pub content_filter: Option<ContentFilterProperty>,
}

/// Participant liveliness assertion (participant message writer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantMessageData {
    pub participant: GUID,
    pub kind: LivelinessKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_defaults() {
        let data = ParticipantData::new(GUID::participant([3; 12]), 4, Duration::from_secs(10));
        assert_eq!(data.builtin_endpoints, builtin_endpoints::ALL);
        assert_eq!(data.vendor_id, crate::core::VENDOR_ID);
        assert_eq!(data.all_locators().count(), 0);
    }

    #[test]
    fn test_same_locators_ignores_qos() {
        let mut a = ParticipantData::new(GUID::participant([3; 12]), 0, Duration::from_secs(1));
        a.metatraffic_unicast.push("10.0.0.1:7412".parse().unwrap());
        let mut b = a.clone();
        b.qos.user_data = vec![1, 2];
        assert!(a.same_locators(&b));
        b.metatraffic_unicast[0] = "10.0.0.2:7412".parse().unwrap();
        assert!(!a.same_locators(&b));
    }

    #[cfg(feature = "xtypes")]
    #[test]
    fn test_hash_type_object_is_stable() {
        let a = hash_type_object(b"struct X { long key; }");
        let b = hash_type_object(b"struct X { long key; }");
        let c = hash_type_object(b"struct X { short key; }");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
