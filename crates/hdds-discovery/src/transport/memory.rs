// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process datagram network.
//!
//! Routes unicast datagrams by exact address and multicast datagrams to every
//! member bound to the group port. Wildcard binds are registered under the
//! network's host address. Loss and duplication can be injected to exercise
//! the reliability paths.

use super::{BindRequest, DiscoveryTransport, Inbound, LocatorSource, TransportFactory};
use crate::{Error, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

const EPHEMERAL_PORT_START: u16 = 49152;

struct Member {
    id: u64,
    channel: super::Channel,
    sink: Sender<Inbound>,
}

struct Hub {
    host: IpAddr,
    unicast: HashMap<SocketAddr, Member>,
    /// (group, port) -> members
    groups: HashMap<SocketAddr, Vec<Member>>,
    /// Taps registered with [`MemoryNetwork::listen`].
    taps: HashMap<SocketAddr, Sender<Inbound>>,
    next_ephemeral: u16,
    loss: f64,
    duplicate: f64,
    rng: fastrand::Rng,
    delivered: u64,
}

impl Hub {
    fn resolve_local(&mut self, local: SocketAddr) -> SocketAddr {
        let ip = if local.ip().is_unspecified() {
            self.host
        } else {
            local.ip()
        };
        let port = if local.port() == 0 {
            loop {
                let port = self.next_ephemeral;
                self.next_ephemeral = self.next_ephemeral.checked_add(1).unwrap_or(EPHEMERAL_PORT_START);
                let candidate = SocketAddr::new(ip, port);
                if !self.unicast.contains_key(&candidate) {
                    break port;
                }
            }
        } else {
            local.port()
        };
        SocketAddr::new(ip, port)
    }
}

/// Shared in-process network. Clone handles to the same hub.
#[derive(Clone)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
    ids: Arc<AtomicU64>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Network whose wildcard binds resolve to 127.0.0.1.
    pub fn new() -> Self {
        Self::with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    pub fn with_host(host: IpAddr) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                host,
                unicast: HashMap::new(),
                groups: HashMap::new(),
                taps: HashMap::new(),
                next_ephemeral: EPHEMERAL_PORT_START,
                loss: 0.0,
                duplicate: 0.0,
                rng: fastrand::Rng::new(),
                delivered: 0,
            })),
            ids: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Drop each datagram with probability `p`.
    pub fn set_loss(&self, p: f64) {
        self.hub.lock().loss = p.clamp(0.0, 1.0);
    }

    /// Deliver each datagram twice with probability `p`.
    pub fn set_duplicate(&self, p: f64) {
        self.hub.lock().duplicate = p.clamp(0.0, 1.0);
    }

    /// Seed the loss/duplication generator for reproducible runs.
    pub fn seed(&self, seed: u64) {
        self.hub.lock().rng = fastrand::Rng::with_seed(seed);
    }

    /// Receive a copy of everything sent to `addr` (e.g. a relay address).
    pub fn listen(&self, addr: SocketAddr) -> Receiver<Inbound> {
        let (tx, rx) = unbounded();
        self.hub.lock().taps.insert(addr, tx);
        rx
    }

    /// Inject a datagram as if `source` had sent it.
    pub fn inject(&self, source: SocketAddr, dest: SocketAddr, bytes: &[u8]) {
        route(&self.hub, source, dest, bytes);
    }

    /// Datagrams delivered so far.
    pub fn delivered(&self) -> u64 {
        self.hub.lock().delivered
    }

    /// Number of bound unicast sockets.
    pub fn bound_count(&self) -> usize {
        self.hub.lock().unicast.len()
    }
}

impl LocatorSource for MemoryNetwork {
    fn local_addresses(&self) -> Vec<IpAddr> {
        vec![self.hub.lock().host]
    }
}

impl TransportFactory for MemoryNetwork {
    fn bind(&self, request: &BindRequest, sink: Sender<Inbound>) -> Result<Arc<dyn DiscoveryTransport>> {
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        let member = Member {
            id,
            channel: request.channel,
            sink,
        };
        let mut hub = self.hub.lock();

        let (local, group) = match request.multicast_group {
            Some(group) => {
                let key = SocketAddr::new(group, request.local.port());
                hub.groups.entry(key).or_default().push(member);
                (SocketAddr::new(hub.host, request.local.port()), Some(key))
            }
            None => {
                let local = hub.resolve_local(request.local);
                if hub.unicast.contains_key(&local) {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("{} already bound", local),
                    )));
                }
                hub.unicast.insert(local, member);
                (local, None)
            }
        };
        log::debug!("[mem] bound {:?} {} group={:?}", request.channel, local, group);

        Ok(Arc::new(MemoryTransport {
            hub: Arc::downgrade(&self.hub),
            id,
            local,
            group,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Socket handle on a [`MemoryNetwork`].
pub struct MemoryTransport {
    hub: Weak<Mutex<Hub>>,
    id: u64,
    local: SocketAddr,
    group: Option<SocketAddr>,
    closed: AtomicBool,
}

impl DiscoveryTransport for MemoryTransport {
    fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SendFailed("transport closed".to_string()));
        }
        let hub = self
            .hub
            .upgrade()
            .ok_or_else(|| Error::SendFailed("network dropped".to_string()))?;
        route(&hub, self.local, dest, bytes);
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let mut hub = hub.lock();
        match self.group {
            Some(key) => {
                if let Some(members) = hub.groups.get_mut(&key) {
                    members.retain(|m| m.id != self.id);
                }
            }
            None => {
                if hub.unicast.get(&self.local).map(|m| m.id) == Some(self.id) {
                    hub.unicast.remove(&self.local);
                }
            }
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn route(hub: &Mutex<Hub>, source: SocketAddr, dest: SocketAddr, bytes: &[u8]) {
    let mut hub = hub.lock();
    if hub.loss > 0.0 && hub.rng.f64() < hub.loss {
        return;
    }
    let copies = if hub.duplicate > 0.0 && hub.rng.f64() < hub.duplicate {
        2
    } else {
        1
    };

    let mut sinks: Vec<(Sender<Inbound>, super::Channel)> = Vec::new();
    if let Some(tap) = hub.taps.get(&dest) {
        sinks.push((tap.clone(), super::Channel::Spdp));
    }
    if dest.ip().is_multicast() {
        if let Some(members) = hub.groups.get(&dest) {
            sinks.extend(members.iter().map(|m| (m.sink.clone(), m.channel)));
        }
    } else if let Some(member) = hub.unicast.get(&dest) {
        sinks.push((member.sink.clone(), member.channel));
    }

    for (sink, channel) in sinks {
        for _ in 0..copies {
            let inbound = Inbound {
                channel,
                source,
                payload: bytes.to_vec(),
            };
            if sink.send(inbound).is_ok() {
                hub.delivered += 1;
            }
        }
    }
}
