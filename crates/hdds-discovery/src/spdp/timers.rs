// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine timer queue.
//!
//! Owned by the engine state and serviced by the engine thread only. A timer
//! is a key plus a deadline; re-scheduling a key replaces its deadline, and
//! removing a peer cancels every key that names it. Dropping the engine drops
//! the queue, so nothing can fire afterwards.

use crate::core::GuidPrefix;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKey {
    SpdpResend,
    SpdpQuick,
    RelayAnnounce,
    LeaseCheck,
    IceCheck,
    Heartbeat,
    SedpFlush,
    FragmentSweep,
    AckNack(GuidPrefix),
    AuthResend(GuidPrefix),
    AuthTimeout(GuidPrefix),
    PassiveConnect(GuidPrefix),
    TypeLookupTimeout(u64),
}

impl TimerKey {
    fn peer(&self) -> Option<&GuidPrefix> {
        match self {
            TimerKey::AckNack(p)
            | TimerKey::AuthResend(p)
            | TimerKey::AuthTimeout(p)
            | TimerKey::PassiveConnect(p) => Some(p),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    deadlines: HashMap<TimerKey, Instant>,
}

impl TimerQueue {
    pub(crate) fn schedule(&mut self, key: TimerKey, at: Instant) {
        self.deadlines.insert(key, at);
    }

    /// Schedule unless the key is already due sooner.
    pub(crate) fn schedule_earlier(&mut self, key: TimerKey, at: Instant) {
        let slot = self.deadlines.entry(key).or_insert(at);
        if at < *slot {
            *slot = at;
        }
    }

    pub(crate) fn cancel(&mut self, key: TimerKey) -> bool {
        self.deadlines.remove(&key).is_some()
    }

    pub(crate) fn is_scheduled(&self, key: TimerKey) -> bool {
        self.deadlines.contains_key(&key)
    }

    pub(crate) fn cancel_peer(&mut self, prefix: &GuidPrefix) {
        self.deadlines.retain(|key, _| key.peer() != Some(prefix));
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every key due at `now`, earliest first.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<TimerKey> {
        let mut due: Vec<(Instant, TimerKey)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, at)| (*at, *key))
            .collect();
        due.sort_by_key(|(at, _)| *at);
        for (_, key) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.deadlines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pop_due_in_deadline_order() {
        let now = Instant::now();
        let mut q = TimerQueue::default();
        q.schedule(TimerKey::Heartbeat, now + Duration::from_millis(20));
        q.schedule(TimerKey::SpdpResend, now + Duration::from_millis(10));
        q.schedule(TimerKey::LeaseCheck, now + Duration::from_secs(5));

        let due = q.pop_due(now + Duration::from_millis(30));
        assert_eq!(due, vec![TimerKey::SpdpResend, TimerKey::Heartbeat]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_schedule_earlier_keeps_sooner_deadline() {
        let now = Instant::now();
        let mut q = TimerQueue::default();
        q.schedule_earlier(TimerKey::SpdpQuick, now + Duration::from_millis(5));
        q.schedule_earlier(TimerKey::SpdpQuick, now + Duration::from_millis(50));
        assert_eq!(q.next_deadline(), Some(now + Duration::from_millis(5)));
        q.schedule_earlier(TimerKey::SpdpQuick, now);
        assert_eq!(q.next_deadline(), Some(now));
    }

    #[test]
    fn test_cancel_peer_leaves_others() {
        let now = Instant::now();
        let mut q = TimerQueue::default();
        q.schedule(TimerKey::AckNack([1; 12]), now);
        q.schedule(TimerKey::AuthTimeout([1; 12]), now);
        q.schedule(TimerKey::AckNack([2; 12]), now);
        q.schedule(TimerKey::Heartbeat, now);
        q.cancel_peer(&[1; 12]);
        assert!(q.is_scheduled(TimerKey::AckNack([2; 12])));
        assert!(q.is_scheduled(TimerKey::Heartbeat));
        assert!(!q.is_scheduled(TimerKey::AuthTimeout([1; 12])));
        assert!(q.cancel(TimerKey::Heartbeat));
        assert!(!q.cancel(TimerKey::Heartbeat));
    }
}
