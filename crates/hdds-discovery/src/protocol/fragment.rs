// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SEDP payload fragmentation and DATA_FRAG reassembly.
//!
//! Fragments are keyed by (writer GUID, sequence number). Incomplete payloads
//! are dropped once they are older than the reassembly timeout, or when the
//! buffer is full (least recently touched first).

use crate::core::GUID;
use lru::LruCache;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Default bound on concurrently reassembled payloads.
pub const DEFAULT_MAX_PENDING: usize = 256;

/// Split a serialized payload into chunks of at most `max_fragment` bytes.
pub fn split_payload(payload: &[u8], max_fragment: usize) -> Vec<&[u8]> {
    if payload.is_empty() {
        return vec![payload];
    }
    payload.chunks(max_fragment.max(1)).collect()
}

struct FragmentSet {
    fragments: BTreeMap<u32, Vec<u8>>,
    total_fragments: u32,
    sample_size: u32,
    first_seen: Instant,
}

/// Reassembly buffer for DATA_FRAG submessages.
pub struct FragmentBuffer {
    pending: LruCache<(GUID, u64), FragmentSet>,
    timeout: Duration,
}

impl FragmentBuffer {
    pub fn new(max_pending: usize, timeout: Duration) -> Self {
        let cap = NonZeroUsize::new(max_pending).unwrap_or(NonZeroUsize::MIN);
        Self {
            pending: LruCache::new(cap),
            timeout,
        }
    }

    /// Store one fragment (1-based). Returns the payload once every fragment arrived.
    pub fn insert(
        &mut self,
        writer: GUID,
        seq: u64,
        fragment: u32,
        total_fragments: u32,
        sample_size: u32,
        bytes: Vec<u8>,
        now: Instant,
    ) -> Option<Vec<u8>> {
        crate::trace_fn!("FragmentBuffer::insert");
        if fragment == 0 || fragment > total_fragments {
            log::debug!(
                "[frag] {} seq={} fragment {}/{} out of range",
                writer,
                seq,
                fragment,
                total_fragments
            );
            return None;
        }

        let key = (writer, seq);
        let restart = match self.pending.get(&key) {
            Some(set) => {
                set.total_fragments != total_fragments || set.sample_size != sample_size
            }
            None => true,
        };
        if restart {
            if let Some((evicted, _)) = self.pending.push(
                key,
                FragmentSet {
                    fragments: BTreeMap::new(),
                    total_fragments,
                    sample_size,
                    first_seen: now,
                },
            ) {
                if evicted != key {
                    log::debug!("[frag] evicted {} seq={} (buffer full)", evicted.0, evicted.1);
                }
            }
        }

        let set = self.pending.get_mut(&key)?;
        set.fragments.insert(fragment, bytes);
        if set.fragments.len() < set.total_fragments as usize {
            return None;
        }

        let set = self.pending.pop(&key)?;
        let payload: Vec<u8> = set.fragments.into_values().flatten().collect();
        if payload.len() != set.sample_size as usize {
            log::debug!(
                "[frag] {} seq={} reassembled {} bytes, expected {}",
                writer,
                seq,
                payload.len(),
                set.sample_size
            );
            return None;
        }
        Some(payload)
    }

    /// Drop incomplete payloads older than the timeout. Returns how many were dropped.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<(GUID, u64)> = self
            .pending
            .iter()
            .filter(|(_, set)| now.saturating_duration_since(set.first_seen) >= self.timeout)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            self.pending.pop(key);
        }
        if !expired.is_empty() {
            log::debug!("[frag] dropped {} incomplete payload(s)", expired.len());
        }
        expired.len()
    }

    /// Forget everything a participant's writers sent.
    pub fn remove_participant(&mut self, participant: &GUID) {
        let keys: Vec<(GUID, u64)> = self
            .pending
            .iter()
            .filter(|((writer, _), _)| writer.prefix == participant.prefix)
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            self.pending.pop(key);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ENTITYID_SEDP_PUBLICATIONS_WRITER;

    fn writer() -> GUID {
        GUID::new([1; 12], ENTITYID_SEDP_PUBLICATIONS_WRITER)
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let payload: Vec<u8> = (0..=250).collect();
        let chunks = split_payload(&payload, 100);
        assert_eq!(chunks.len(), 3);

        let mut buf = FragmentBuffer::new(8, Duration::from_millis(300));
        let now = Instant::now();
        let size = payload.len() as u32;
        assert!(buf.insert(writer(), 1, 3, 3, size, chunks[2].to_vec(), now).is_none());
        assert!(buf.insert(writer(), 1, 1, 3, size, chunks[0].to_vec(), now).is_none());
        // Duplicate fragment does not complete anything.
        assert!(buf.insert(writer(), 1, 1, 3, size, chunks[0].to_vec(), now).is_none());
        let done = buf.insert(writer(), 1, 2, 3, size, chunks[1].to_vec(), now);
        assert_eq!(done, Some(payload));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_sweep_drops_stale_sets() {
        let mut buf = FragmentBuffer::new(8, Duration::from_millis(300));
        let start = Instant::now();
        buf.insert(writer(), 1, 1, 2, 8, vec![0; 4], start);
        assert_eq!(buf.sweep(start + Duration::from_millis(100)), 0);
        assert_eq!(buf.sweep(start + Duration::from_millis(300)), 1);
        // Late fragment starts over instead of completing.
        assert!(buf
            .insert(writer(), 1, 2, 2, 8, vec![0; 4], start + Duration::from_millis(301))
            .is_none());
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let mut buf = FragmentBuffer::new(2, Duration::from_secs(1));
        let now = Instant::now();
        buf.insert(writer(), 1, 1, 2, 2, vec![1], now);
        buf.insert(writer(), 2, 1, 2, 2, vec![1], now);
        buf.insert(writer(), 3, 1, 2, 2, vec![1], now);
        assert_eq!(buf.len(), 2);
        assert!(buf.insert(writer(), 1, 2, 2, 2, vec![2], now).is_none());
        assert_eq!(buf.insert(writer(), 3, 2, 2, 2, vec![2], now), Some(vec![1, 2]));
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut buf = FragmentBuffer::new(2, Duration::from_secs(1));
        let now = Instant::now();
        buf.insert(writer(), 1, 1, 2, 10, vec![1], now);
        assert!(buf.insert(writer(), 1, 2, 2, 10, vec![2], now).is_none());
    }
}
