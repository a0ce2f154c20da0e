// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Update-event bus for live configuration settings.
//!
//! Each running engine holds one subscription. Publishing never blocks; a
//! subscriber whose receiver was dropped is pruned on the next publish.

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::net::SocketAddr;

/// A live setting that changed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    UseRtpsRelay(bool),
    RtpsRelayOnly(bool),
    UseIce(bool),
    SpdpRtpsRelayAddress(Option<SocketAddr>),
    SedpRtpsRelayAddress(Option<SocketAddr>),
    SpdpStunServerAddress(Option<SocketAddr>),
    SedpStunServerAddress(Option<SocketAddr>),
}

/// Fan-out of [`ConfigEvent`]s to engine subscriptions.
#[derive(Default)]
pub struct ConfigEventBus {
    subscribers: Mutex<Vec<Sender<ConfigEvent>>>,
}

impl ConfigEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// New subscription receiving every event published from now on.
    pub fn subscribe(&self) -> Receiver<ConfigEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber.
    pub fn publish(&self, event: ConfigEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
        log::debug!("[config] published {:?} to {} engine(s)", event, subs.len());
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let bus = ConfigEventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(ConfigEvent::UseIce(true));

        assert_eq!(a.try_recv().ok(), Some(ConfigEvent::UseIce(true)));
        assert_eq!(b.try_recv().ok(), Some(ConfigEvent::UseIce(true)));
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let bus = ConfigEventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(ConfigEvent::RtpsRelayOnly(false));
        assert_eq!(bus.subscriber_count(), 1);
        assert!(keep.try_recv().is_ok());
    }
}
