// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS compatibility checking (RxO - Requested vs Offered).
//!
//! | Policy           | Rule                                            |
//! |------------------|-------------------------------------------------|
//! | Reliability      | offered >= requested (Reliable > BestEffort)    |
//! | Durability       | offered >= requested                            |
//! | Deadline         | offered period <= requested period              |
//! | Liveliness       | offered kind >= requested, lease <= requested   |
//! | Ownership        | kinds equal                                     |
//! | DestinationOrder | offered >= requested                            |
//! | Partition        | both default, or at least one common name       |

use super::QoS;

/// DDS QoS policy ids reported in incompatible-QoS status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum QosPolicyId {
    Durability = 2,
    Deadline = 4,
    Ownership = 6,
    Liveliness = 8,
    Partition = 10,
    Reliability = 11,
    DestinationOrder = 12,
    /// Type mismatch after XTypes resolution.
    TypeConsistency = 24,
}

/// Policies that make `offered` (writer) unable to serve `requested` (reader).
///
/// Returns an empty list when the pair is compatible.
pub fn check_compatibility(offered: &QoS, requested: &QoS) -> Vec<QosPolicyId> {
    crate::trace_fn!("qos::check_compatibility");
    let mut failed = Vec::new();

    if offered.reliability < requested.reliability {
        log::debug!(
            "[MATCH-QOS] Reliability mismatch (writer={:?}, reader={:?})",
            offered.reliability,
            requested.reliability
        );
        failed.push(QosPolicyId::Reliability);
    }

    if offered.durability < requested.durability {
        log::debug!(
            "[MATCH-QOS] Durability mismatch (writer={:?}, reader={:?})",
            offered.durability,
            requested.durability
        );
        failed.push(QosPolicyId::Durability);
    }

    if offered.deadline > requested.deadline {
        log::debug!(
            "[MATCH-QOS] Deadline mismatch (writer={:?}, reader={:?})",
            offered.deadline,
            requested.deadline
        );
        failed.push(QosPolicyId::Deadline);
    }

    if offered.liveliness.kind < requested.liveliness.kind
        || offered.liveliness.lease_duration > requested.liveliness.lease_duration
    {
        log::debug!(
            "[MATCH-QOS] Liveliness mismatch (writer={:?}, reader={:?})",
            offered.liveliness,
            requested.liveliness
        );
        failed.push(QosPolicyId::Liveliness);
    }

    if offered.ownership != requested.ownership {
        log::debug!(
            "[MATCH-QOS] Ownership mismatch (writer={:?}, reader={:?})",
            offered.ownership,
            requested.ownership
        );
        failed.push(QosPolicyId::Ownership);
    }

    if offered.destination_order < requested.destination_order {
        failed.push(QosPolicyId::DestinationOrder);
    }

    if !partitions_intersect(&offered.partition, &requested.partition) {
        log::debug!(
            "[MATCH-QOS] Partition mismatch (writer={:?}, reader={:?})",
            offered.partition,
            requested.partition
        );
        failed.push(QosPolicyId::Partition);
    }

    failed
}

fn partitions_intersect(offered: &[String], requested: &[String]) -> bool {
    match (offered.is_empty(), requested.is_empty()) {
        (true, true) => true,
        (true, false) | (false, true) => false,
        (false, false) => offered.iter().any(|name| requested.contains(name)),
    }
}

/// Offered/requested incompatible-QoS status of one local endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IncompatibleQosStatus {
    pub total_count: u32,
    /// Increments since the status was last read with [`take_change`](Self::take_change).
    pub total_count_change: u32,
    pub last_policy_id: Option<QosPolicyId>,
    /// Per-policy failure counts.
    pub policies: Vec<(QosPolicyId, u32)>,
}

impl IncompatibleQosStatus {
    /// Count one incompatible remote endpoint failing on `policies`.
    pub fn record(&mut self, policies: &[QosPolicyId]) {
        self.total_count += 1;
        self.total_count_change += 1;
        self.last_policy_id = policies.first().copied();
        for id in policies {
            match self.policies.iter_mut().find(|(p, _)| p == id) {
                Some((_, count)) => *count += 1,
                None => self.policies.push((*id, 1)),
            }
        }
    }

    /// Copy of the status with the change counter reset on `self`.
    pub fn take_change(&mut self) -> IncompatibleQosStatus {
        let snapshot = self.clone();
        self.total_count_change = 0;
        snapshot
    }

    /// Failure count for one policy.
    pub fn count_for(&self, id: QosPolicyId) -> u32 {
        self.policies
            .iter()
            .find(|(p, _)| *p == id)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }
}
