// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in topic mirroring.
//!
//! Engines publish every participant/topic/endpoint transition to an optional
//! [`BitSink`]. The engine holds the sink weakly: a dropped sink simply stops
//! receiving samples and never fails a discovery operation. [`BitCache`] is an
//! in-memory sink keeping the latest sample per instance.

use crate::core::GUID;
use crate::protocol::{ParticipantData, PublicationData, SubscriptionData, TopicData};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Built-in topic a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitKind {
    Participant,
    Topic,
    Publication,
    Subscription,
}

/// One built-in topic sample.
#[derive(Debug, Clone, PartialEq)]
pub enum BitSample {
    Participant(ParticipantData),
    Topic(TopicData),
    Publication(PublicationData),
    Subscription(SubscriptionData),
}

impl BitSample {
    pub fn kind(&self) -> BitKind {
        match self {
            BitSample::Participant(_) => BitKind::Participant,
            BitSample::Topic(_) => BitKind::Topic,
            BitSample::Publication(_) => BitKind::Publication,
            BitSample::Subscription(_) => BitKind::Subscription,
        }
    }

    pub fn key(&self) -> GUID {
        match self {
            BitSample::Participant(p) => p.guid,
            BitSample::Topic(t) => t.guid,
            BitSample::Publication(p) => p.guid,
            BitSample::Subscription(s) => s.guid,
        }
    }
}

/// Receiver of built-in topic samples.
pub trait BitSink: Send + Sync {
    fn publish(&self, sample: BitSample);
    fn dispose(&self, kind: BitKind, key: GUID);
}

/// Engine-side handle to the sink.
#[derive(Default, Clone)]
pub(crate) struct BitPublisher {
    sink: Option<Weak<dyn BitSink>>,
}

impl BitPublisher {
    pub(crate) fn attach(&mut self, sink: &Arc<dyn BitSink>) {
        self.sink = Some(Arc::downgrade(sink));
    }

    pub(crate) fn detach(&mut self) {
        self.sink = None;
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    /// Sink to call once the engine lock is released.
    pub(crate) fn live_sink(&self) -> Option<Arc<dyn BitSink>> {
        let sink = self.sink.as_ref()?.upgrade();
        if sink.is_none() {
            log::debug!("[bit] sink dropped, sample not mirrored");
        }
        sink
    }
}

/// Instance state of a cached sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Alive,
    Disposed,
}

/// Latest sample of one instance.
#[derive(Debug, Clone)]
pub struct BitEntry {
    pub sample: BitSample,
    pub state: InstanceState,
    /// Samples received for this instance (dispositions excluded).
    pub sample_count: u64,
}

/// In-memory [`BitSink`].
#[derive(Default)]
pub struct BitCache {
    entries: RwLock<HashMap<(BitKind, GUID), BitEntry>>,
}

impl BitCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, kind: BitKind, key: GUID) -> Option<BitEntry> {
        self.entries.read().get(&(kind, key)).cloned()
    }

    pub fn state(&self, kind: BitKind, key: GUID) -> Option<InstanceState> {
        self.entries.read().get(&(kind, key)).map(|e| e.state)
    }

    /// Alive instances of one built-in topic.
    pub fn alive(&self, kind: BitKind) -> Vec<BitSample> {
        self.entries
            .read()
            .iter()
            .filter(|((k, _), e)| *k == kind && e.state == InstanceState::Alive)
            .map(|(_, e)| e.sample.clone())
            .collect()
    }

    pub fn participants(&self) -> Vec<ParticipantData> {
        self.alive(BitKind::Participant)
            .into_iter()
            .filter_map(|s| match s {
                BitSample::Participant(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn publications(&self) -> Vec<PublicationData> {
        self.alive(BitKind::Publication)
            .into_iter()
            .filter_map(|s| match s {
                BitSample::Publication(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionData> {
        self.alive(BitKind::Subscription)
            .into_iter()
            .filter_map(|s| match s {
                BitSample::Subscription(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Total samples received for a kind (dispositions excluded).
    pub fn sample_count(&self, kind: BitKind) -> u64 {
        self.entries
            .read()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, e)| e.sample_count)
            .sum()
    }
}

impl BitSink for BitCache {
    fn publish(&self, sample: BitSample) {
        let key = (sample.kind(), sample.key());
        let mut entries = self.entries.write();
        match entries.get_mut(&key) {
            Some(entry) => {
                entry.sample = sample;
                entry.state = InstanceState::Alive;
                entry.sample_count += 1;
            }
            None => {
                entries.insert(
                    key,
                    BitEntry {
                        sample,
                        state: InstanceState::Alive,
                        sample_count: 1,
                    },
                );
            }
        }
    }

    fn dispose(&self, kind: BitKind, key: GUID) {
        if let Some(entry) = self.entries.write().get_mut(&(kind, key)) {
            entry.state = InstanceState::Disposed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cache_tracks_state() {
        let cache = BitCache::new();
        let guid = GUID::participant([1; 12]);
        let data = ParticipantData::new(guid, 0, Duration::from_secs(5));

        cache.publish(BitSample::Participant(data.clone()));
        cache.publish(BitSample::Participant(data));
        assert_eq!(cache.participants().len(), 1);
        assert_eq!(cache.sample_count(BitKind::Participant), 2);

        cache.dispose(BitKind::Participant, guid);
        assert_eq!(cache.state(BitKind::Participant, guid), Some(InstanceState::Disposed));
        assert!(cache.participants().is_empty());
    }

    #[test]
    fn test_publisher_tolerates_dropped_sink() {
        let mut publisher = BitPublisher::default();
        {
            let sink: Arc<dyn BitSink> = BitCache::new();
            publisher.attach(&sink);
            assert!(publisher.live_sink().is_some());
        }
        assert!(publisher.is_attached());
        assert!(publisher.live_sink().is_none());
        publisher.detach();
        assert!(!publisher.is_attached());
    }
}
