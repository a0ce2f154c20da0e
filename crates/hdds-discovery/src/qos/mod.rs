// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS policies exchanged by discovery and the RxO compatibility check.
//!
//! Only the policies that travel in SEDP announcements are modeled here.
//! Durations use `Duration::MAX` for INFINITE.

mod compat;

pub use compat::{check_compatibility, IncompatibleQosStatus, QosPolicyId};

use std::time::Duration;

/// INFINITE duration.
pub const DURATION_INFINITE: Duration = Duration::MAX;

/// Reliability kind (ordered: BestEffort < Reliable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Reliability {
    #[default]
    BestEffort,
    Reliable,
}

/// Durability kind (ordered by strength).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Durability {
    #[default]
    Volatile,
    TransientLocal,
    Transient,
    Persistent,
}

/// History policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum History {
    KeepLast(u32),
    KeepAll,
}

impl Default for History {
    fn default() -> Self {
        History::KeepLast(1)
    }
}

/// Liveliness kind (ordered by strength).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LivelinessKind {
    #[default]
    Automatic,
    ManualByParticipant,
    ManualByTopic,
}

/// Liveliness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveliness {
    pub kind: LivelinessKind,
    pub lease_duration: Duration,
}

impl Default for Liveliness {
    fn default() -> Self {
        Self {
            kind: LivelinessKind::Automatic,
            lease_duration: DURATION_INFINITE,
        }
    }
}

/// Ownership kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipKind {
    #[default]
    Shared,
    Exclusive,
}

/// Destination order kind (ordered: reception < source timestamp).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DestinationOrder {
    #[default]
    ByReceptionTimestamp,
    BySourceTimestamp,
}

/// Endpoint/topic QoS as announced through SEDP.
#[derive(Debug, Clone, PartialEq)]
pub struct QoS {
    pub reliability: Reliability,
    pub durability: Durability,
    pub history: History,
    pub deadline: Duration,
    pub liveliness: Liveliness,
    pub ownership: OwnershipKind,
    pub destination_order: DestinationOrder,
    pub partition: Vec<String>,
    pub user_data: Vec<u8>,
    pub topic_data: Vec<u8>,
}

impl Default for QoS {
    fn default() -> Self {
        Self {
            reliability: Reliability::BestEffort,
            durability: Durability::Volatile,
            history: History::default(),
            deadline: DURATION_INFINITE,
            liveliness: Liveliness::default(),
            ownership: OwnershipKind::Shared,
            destination_order: DestinationOrder::ByReceptionTimestamp,
            partition: Vec::new(),
            user_data: Vec::new(),
            topic_data: Vec::new(),
        }
    }
}

impl QoS {
    /// BEST_EFFORT, VOLATILE, KEEP_LAST(1).
    pub fn best_effort() -> Self {
        Self::default()
    }

    /// RELIABLE, VOLATILE, KEEP_LAST(1).
    pub fn reliable() -> Self {
        Self {
            reliability: Reliability::Reliable,
            ..Self::default()
        }
    }

    pub fn transient_local(mut self) -> Self {
        self.durability = Durability::TransientLocal;
        self
    }

    pub fn volatile(mut self) -> Self {
        self.durability = Durability::Volatile;
        self
    }

    pub fn keep_last(mut self, depth: u32) -> Self {
        self.history = History::KeepLast(depth);
        self
    }

    pub fn keep_all(mut self) -> Self {
        self.history = History::KeepAll;
        self
    }

    pub fn deadline(mut self, period: Duration) -> Self {
        self.deadline = period;
        self
    }

    pub fn liveliness(mut self, kind: LivelinessKind, lease_duration: Duration) -> Self {
        self.liveliness = Liveliness {
            kind,
            lease_duration,
        };
        self
    }

    pub fn exclusive_ownership(mut self) -> Self {
        self.ownership = OwnershipKind::Exclusive;
        self
    }

    pub fn partition<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition = names.into_iter().map(Into::into).collect();
        self
    }

    /// Reject values no peer could match against.
    pub fn validate(&self) -> crate::Result<()> {
        if matches!(self.history, History::KeepLast(0)) {
            return Err(crate::Error::InvalidQos(
                "KEEP_LAST depth must be >= 1".to_string(),
            ));
        }
        if self.deadline.is_zero() {
            return Err(crate::Error::InvalidQos(
                "deadline period must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Participant-level QoS carried in SPDP.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParticipantQos {
    pub user_data: Vec<u8>,
    /// Liveliness kind asserted at participant level.
    pub liveliness: LivelinessKind,
}

impl ParticipantQos {
    pub fn with_user_data(mut self, user_data: impl Into<Vec<u8>>) -> Self {
        self.user_data = user_data.into();
        self
    }
}
