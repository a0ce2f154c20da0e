// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliability state of the builtin SEDP endpoints.
//!
//! [`WriterHistory`] keeps the latest sample per instance; a sequence number
//! whose sample was superseded is answered with GAP. [`ReaderProxy`] tracks one
//! remote builtin writer: it releases samples strictly in sequence order and
//! reports what is still missing.

use crate::core::*;
use crate::protocol::{Payload, Submessage};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Longest missing-sequence list put in one ACKNACK.
const MAX_MISSING_PER_ACKNACK: usize = 256;

/// Builtin SEDP writer/reader pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Builtin {
    Topics,
    Publications,
    Subscriptions,
    ParticipantMessage,
}

impl Builtin {
    pub(crate) const ALL: [Builtin; 4] = [
        Builtin::Topics,
        Builtin::Publications,
        Builtin::Subscriptions,
        Builtin::ParticipantMessage,
    ];

    pub(crate) fn writer_id(self) -> [u8; 4] {
        match self {
            Builtin::Topics => ENTITYID_SEDP_TOPICS_WRITER,
            Builtin::Publications => ENTITYID_SEDP_PUBLICATIONS_WRITER,
            Builtin::Subscriptions => ENTITYID_SEDP_SUBSCRIPTIONS_WRITER,
            Builtin::ParticipantMessage => ENTITYID_P2P_MESSAGE_WRITER,
        }
    }

    pub(crate) fn reader_id(self) -> [u8; 4] {
        match self {
            Builtin::Topics => ENTITYID_SEDP_TOPICS_READER,
            Builtin::Publications => ENTITYID_SEDP_PUBLICATIONS_READER,
            Builtin::Subscriptions => ENTITYID_SEDP_SUBSCRIPTIONS_READER,
            Builtin::ParticipantMessage => ENTITYID_P2P_MESSAGE_READER,
        }
    }

    pub(crate) fn from_writer_id(id: [u8; 4]) -> Option<Self> {
        Builtin::ALL.into_iter().find(|b| b.writer_id() == id)
    }
}

/// Keyed history of one builtin writer.
#[derive(Debug)]
pub(crate) struct WriterHistory {
    builtin: Builtin,
    next_seq: u64,
    samples: BTreeMap<u64, Payload>,
    by_key: HashMap<GUID, u64>,
    /// Held samples that dispose their instance.
    disposed: BTreeSet<u64>,
}

impl WriterHistory {
    pub(crate) fn new(builtin: Builtin) -> Self {
        Self {
            builtin,
            next_seq: 1,
            samples: BTreeMap::new(),
            by_key: HashMap::new(),
            disposed: BTreeSet::new(),
        }
    }

    /// Store a sample, superseding the previous one of the same instance.
    pub(crate) fn write(&mut self, payload: Payload) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(old) = self.by_key.insert(payload.key(), seq) {
            self.samples.remove(&old);
            self.disposed.remove(&old);
        }
        if payload.is_dispose() {
            self.disposed.insert(seq);
        }
        self.samples.insert(seq, payload);
        seq
    }

    /// Drop dispose samples up to `upto`; readers see a GAP instead.
    pub(crate) fn prune_disposed(&mut self, upto: u64) -> usize {
        let done: Vec<u64> = self.disposed.range(..=upto).copied().collect();
        for seq in &done {
            self.disposed.remove(seq);
            if let Some(payload) = self.samples.remove(seq) {
                self.by_key.remove(&payload.key());
            }
        }
        done.len()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, seq: u64) -> Option<&Payload> {
        self.samples.get(&seq)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    /// Lowest sequence still held (or the next one when empty).
    pub(crate) fn first_seq(&self) -> u64 {
        self.samples.keys().next().copied().unwrap_or(self.next_seq)
    }

    pub(crate) fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    pub(crate) fn heartbeat(&self, count: u32) -> Submessage {
        Submessage::Heartbeat {
            reader: self.builtin.reader_id(),
            writer: self.builtin.writer_id(),
            first: self.first_seq(),
            last: self.last_seq(),
            count,
        }
    }

    /// DATA for held samples and GAP for superseded ranges in `[from, to]`.
    pub(crate) fn replay(&self, from: u64, to: u64) -> Vec<Submessage> {
        let mut out = Vec::new();
        let mut gap_start: Option<u64> = None;
        for seq in from.max(1)..=to.min(self.last_seq()) {
            match self.samples.get(&seq) {
                Some(payload) => {
                    if let Some(start) = gap_start.take() {
                        out.push(self.gap(start, seq));
                    }
                    out.push(self.data(seq, payload.clone()));
                }
                None => {
                    gap_start.get_or_insert(seq);
                }
            }
        }
        if let Some(start) = gap_start {
            out.push(self.gap(start, to.min(self.last_seq()) + 1));
        }
        out
    }

    /// Answer to explicitly requested sequence numbers.
    pub(crate) fn resend(&self, missing: &[u64]) -> Vec<Submessage> {
        missing
            .iter()
            .filter(|seq| **seq >= 1 && **seq <= self.last_seq())
            .map(|seq| match self.samples.get(seq) {
                Some(payload) => self.data(*seq, payload.clone()),
                None => self.gap(*seq, seq + 1),
            })
            .collect()
    }

    pub(crate) fn data(&self, seq: u64, payload: Payload) -> Submessage {
        Submessage::Data {
            reader: self.builtin.reader_id(),
            writer: self.builtin.writer_id(),
            seq,
            payload,
        }
    }

    fn gap(&self, start: u64, end: u64) -> Submessage {
        Submessage::Gap {
            reader: self.builtin.reader_id(),
            writer: self.builtin.writer_id(),
            start,
            end,
        }
    }
}

/// Receive state for one remote builtin writer.
#[derive(Debug)]
pub(crate) struct ReaderProxy {
    next_expected: u64,
    /// Out-of-order arrivals; `None` marks a sequence covered by GAP.
    pending: BTreeMap<u64, Option<Payload>>,
    highest_announced: u64,
    pub(crate) ack_requested: bool,
    pub(crate) acknack_count: u32,
}

impl Default for ReaderProxy {
    fn default() -> Self {
        Self {
            next_expected: 1,
            pending: BTreeMap::new(),
            highest_announced: 0,
            ack_requested: false,
            acknack_count: 0,
        }
    }
}

impl ReaderProxy {
    /// Accept a sample; returns everything now deliverable in order.
    pub(crate) fn receive(&mut self, seq: u64, payload: Payload) -> Vec<Payload> {
        if seq < self.next_expected {
            return Vec::new();
        }
        self.highest_announced = self.highest_announced.max(seq);
        self.pending.entry(seq).or_insert(Some(payload));
        if seq > self.next_expected {
            self.ack_requested = true;
        }
        self.release()
    }

    /// `[start, end)` carries nothing for this reader.
    pub(crate) fn gap(&mut self, start: u64, end: u64) -> Vec<Payload> {
        let from = start.max(self.next_expected);
        if end > from {
            self.highest_announced = self.highest_announced.max(end - 1);
            // Large gaps are applied by moving the cursor instead of marking each slot.
            if from == self.next_expected {
                let skipped: Vec<u64> = self.pending.range(..end).map(|(s, _)| *s).collect();
                let mut out = Vec::new();
                for s in skipped {
                    if let Some(Some(p)) = self.pending.remove(&s) {
                        out.push(p);
                    }
                }
                self.next_expected = end;
                out.extend(self.release());
                return out;
            }
            let window = from.saturating_add(MAX_MISSING_PER_ACKNACK as u64);
            for seq in from..end.min(window) {
                self.pending.entry(seq).or_insert(None);
            }
        }
        self.release()
    }

    /// Writer holds `[first, last]`; anything older is gone for good.
    pub(crate) fn heartbeat(&mut self, first: u64, last: u64) -> Vec<Payload> {
        self.highest_announced = self.highest_announced.max(last);
        self.ack_requested = true;
        if first > self.next_expected {
            self.gap(self.next_expected, first)
        } else {
            Vec::new()
        }
    }

    /// Sequence numbers announced but not received.
    pub(crate) fn missing(&self) -> Vec<u64> {
        (self.next_expected..=self.highest_announced)
            .filter(|seq| !self.pending.contains_key(seq))
            .take(MAX_MISSING_PER_ACKNACK)
            .collect()
    }

    pub(crate) fn base(&self) -> u64 {
        self.next_expected
    }

    #[cfg(test)]
    pub(crate) fn is_complete(&self) -> bool {
        self.next_expected > self.highest_announced
    }

    fn release(&mut self) -> Vec<Payload> {
        let mut out = Vec::new();
        while let Some(slot) = self.pending.remove(&self.next_expected) {
            if let Some(payload) = slot {
                out.push(payload);
            }
            self.next_expected += 1;
        }
        out
    }
}
