// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for the in-process discovery tests.

#![allow(dead_code)]

use hdds_discovery::{
    DataReaderCallbacks, DataWriterCallbacks, DiscoveryConfig, IncompatibleQosStatus, MemoryNetwork,
    ReaderAssociation, RtpsDiscovery, WriterAssociation, GUID,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `cond` every 10ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// One facade per simulated process, all sharing `network`.
pub fn process(network: &MemoryNetwork, key: &str) -> RtpsDiscovery {
    RtpsDiscovery::with_transport(key, DiscoveryConfig::default(), Arc::new(network.clone()))
}

pub fn locator(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    WriterMatched(GUID, ReaderAssociation),
    WriterUnmatched(GUID, Vec<GUID>),
    WriterIncompatible(GUID, IncompatibleQosStatus),
    ParamsChanged(GUID, GUID, Vec<String>),
    ReaderMatched(GUID, WriterAssociation),
    ReaderUnmatched(GUID, Vec<GUID>),
    ReaderIncompatible(GUID, IncompatibleQosStatus),
}

/// Records every callback it receives.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Association this writer got for `reader`, if matched.
    pub fn reader_match(&self, reader: GUID) -> Option<ReaderAssociation> {
        self.events.lock().iter().rev().find_map(|e| match e {
            Event::WriterMatched(_, a) if a.reader == reader => Some(a.clone()),
            _ => None,
        })
    }

    /// Association this reader got for `writer`, if matched.
    pub fn writer_match(&self, writer: GUID) -> Option<WriterAssociation> {
        self.events.lock().iter().rev().find_map(|e| match e {
            Event::ReaderMatched(_, a) if a.writer == writer => Some(a.clone()),
            _ => None,
        })
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl DataWriterCallbacks for Recorder {
    fn add_association(&self, writer: GUID, reader: &ReaderAssociation) {
        self.push(Event::WriterMatched(writer, reader.clone()));
    }

    fn remove_associations(&self, writer: GUID, readers: &[GUID]) {
        self.push(Event::WriterUnmatched(writer, readers.to_vec()));
    }

    fn update_incompatible_qos(&self, writer: GUID, status: &IncompatibleQosStatus) {
        self.push(Event::WriterIncompatible(writer, status.clone()));
    }

    fn update_subscription_params(&self, writer: GUID, reader: GUID, params: &[String]) {
        self.push(Event::ParamsChanged(writer, reader, params.to_vec()));
    }
}

impl DataReaderCallbacks for Recorder {
    fn add_association(&self, reader: GUID, writer: &WriterAssociation) {
        self.push(Event::ReaderMatched(reader, writer.clone()));
    }

    fn remove_associations(&self, reader: GUID, writers: &[GUID]) {
        self.push(Event::ReaderUnmatched(reader, writers.to_vec()));
    }

    fn update_incompatible_qos(&self, reader: GUID, status: &IncompatibleQosStatus) {
        self.push(Event::ReaderIncompatible(reader, status.clone()));
    }
}
