// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant and entity identifiers.

use std::fmt;

/// 12-byte participant-unique prefix shared by every entity of a participant.
pub type GuidPrefix = [u8; 12];

/// Entity id of the participant itself.
pub const ENTITYID_PARTICIPANT: [u8; 4] = [0x00, 0x00, 0x01, 0xc1];
/// SPDP builtin participant writer.
pub const ENTITYID_SPDP_WRITER: [u8; 4] = [0x00, 0x01, 0x00, 0xc2];
/// SPDP builtin participant reader.
pub const ENTITYID_SPDP_READER: [u8; 4] = [0x00, 0x01, 0x00, 0xc7];
/// SEDP builtin topics writer.
pub const ENTITYID_SEDP_TOPICS_WRITER: [u8; 4] = [0x00, 0x00, 0x02, 0xc2];
/// SEDP builtin topics reader.
pub const ENTITYID_SEDP_TOPICS_READER: [u8; 4] = [0x00, 0x00, 0x02, 0xc7];
/// SEDP builtin publications writer.
pub const ENTITYID_SEDP_PUBLICATIONS_WRITER: [u8; 4] = [0x00, 0x00, 0x03, 0xc2];
/// SEDP builtin publications reader.
pub const ENTITYID_SEDP_PUBLICATIONS_READER: [u8; 4] = [0x00, 0x00, 0x03, 0xc7];
/// SEDP builtin subscriptions writer.
pub const ENTITYID_SEDP_SUBSCRIPTIONS_WRITER: [u8; 4] = [0x00, 0x00, 0x04, 0xc2];
/// SEDP builtin subscriptions reader.
pub const ENTITYID_SEDP_SUBSCRIPTIONS_READER: [u8; 4] = [0x00, 0x00, 0x04, 0xc7];
/// Participant message (liveliness) writer.
pub const ENTITYID_P2P_MESSAGE_WRITER: [u8; 4] = [0x00, 0x02, 0x00, 0xc2];
/// Participant message (liveliness) reader.
pub const ENTITYID_P2P_MESSAGE_READER: [u8; 4] = [0x00, 0x02, 0x00, 0xc7];

/// Kind octet (last byte of an entity id) for locally allocated entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntityKind {
    /// Participant (0xc1).
    Participant = 0xc1,
    /// Topic (vendor-specific 0x45).
    Topic = 0x45,
    /// Writer with key (0x02).
    WriterWithKey = 0x02,
    /// Writer without key (0x03).
    WriterNoKey = 0x03,
    /// Reader without key (0x04).
    ReaderNoKey = 0x04,
    /// Reader with key (0x07).
    ReaderWithKey = 0x07,
}

impl EntityKind {
    /// Writer kind for a topic with or without key.
    pub fn writer(has_key: bool) -> Self {
        if has_key {
            EntityKind::WriterWithKey
        } else {
            EntityKind::WriterNoKey
        }
    }

    /// Reader kind for a topic with or without key.
    pub fn reader(has_key: bool) -> Self {
        if has_key {
            EntityKind::ReaderWithKey
        } else {
            EntityKind::ReaderNoKey
        }
    }
}

/// RTPS GUID (Globally Unique Identifier)
///
/// 16 bytes: a 12-byte prefix unique per participant and a 4-byte entity id
/// (3-byte key + kind octet).
///
/// # Display Format
/// Hex with dots: "01.aa.c0.a8.00.01.00.00.12.34.00.01.00.00.01.c1"
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GUID {
    pub prefix: GuidPrefix,
    pub entity_id: [u8; 4],
}

impl GUID {
    /// Create GUID from raw bytes (16 bytes total)
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; 12];
        let mut entity_id = [0u8; 4];
        prefix.copy_from_slice(&bytes[0..12]);
        entity_id.copy_from_slice(&bytes[12..16]);
        Self { prefix, entity_id }
    }

    /// Create GUID from separate prefix and entity ID
    pub fn new(prefix: GuidPrefix, entity_id: [u8; 4]) -> Self {
        Self { prefix, entity_id }
    }

    /// Participant GUID for a prefix.
    pub fn participant(prefix: GuidPrefix) -> Self {
        Self::new(prefix, ENTITYID_PARTICIPANT)
    }

    /// Entity GUID built from a 24-bit key and a kind.
    pub fn entity(prefix: GuidPrefix, key: u32, kind: EntityKind) -> Self {
        let k = key.to_be_bytes();
        Self::new(prefix, [k[1], k[2], k[3], kind as u8])
    }

    /// Convert GUID to 16-byte array
    pub fn as_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..12].copy_from_slice(&self.prefix);
        bytes[12..16].copy_from_slice(&self.entity_id);
        bytes
    }

    /// GUID with all zeros: the "not found / failed" sentinel.
    pub fn zero() -> Self {
        Self {
            prefix: [0; 12],
            entity_id: [0; 4],
        }
    }

    /// Check if GUID is zero (invalid)
    pub fn is_zero(&self) -> bool {
        self.prefix.iter().all(|&b| b == 0) && self.entity_id.iter().all(|&b| b == 0)
    }

    /// Owning participant's GUID.
    pub fn participant_guid(&self) -> Self {
        Self::participant(self.prefix)
    }

    /// Kind octet of the entity id.
    pub fn kind_octet(&self) -> u8 {
        self.entity_id[3]
    }

    /// True for writer entity kinds (user or builtin).
    pub fn is_writer(&self) -> bool {
        matches!(self.kind_octet() & 0x3f, 0x02 | 0x03)
    }

    /// True for reader entity kinds (user or builtin).
    pub fn is_reader(&self) -> bool {
        matches!(self.kind_octet() & 0x3f, 0x04 | 0x07)
    }
}

impl Default for GUID {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for GUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.prefix.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        for byte in &self.entity_id {
            write!(f, ".{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for GUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GUID({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_display() {
        let guid = GUID::new([1, 0xaa, 192, 168, 0, 1, 0, 0, 0x12, 0x34, 0, 1], ENTITYID_PARTICIPANT);
        assert_eq!(
            guid.to_string(),
            "01.aa.c0.a8.00.01.00.00.12.34.00.01.00.00.01.c1"
        );
    }

    #[test]
    fn test_entity_kinds() {
        let prefix = [7u8; 12];
        let writer = GUID::entity(prefix, 0x010203, EntityKind::WriterWithKey);
        assert_eq!(writer.entity_id, [0x01, 0x02, 0x03, 0x02]);
        assert!(writer.is_writer());
        assert!(!writer.is_reader());

        let reader = GUID::entity(prefix, 1, EntityKind::reader(false));
        assert!(reader.is_reader());
        assert_eq!(reader.participant_guid(), GUID::participant(prefix));

        let builtin = GUID::new(prefix, ENTITYID_SEDP_PUBLICATIONS_WRITER);
        assert!(builtin.is_writer());
    }

    #[test]
    fn test_guid_zero() {
        assert!(GUID::zero().is_zero());
        assert!(GUID::default().is_zero());
        assert!(!GUID::participant([1; 12]).is_zero());
    }
}
