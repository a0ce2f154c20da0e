// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram transports used by the discovery engines.
//!
//! An engine asks its [`TransportFactory`] for one transport per socket it
//! needs (SPDP unicast, SPDP multicast, SEDP unicast, SEDP multicast). Every
//! received datagram is pushed as an [`Inbound`] onto the crossbeam channel the
//! engine thread selects on.
//!
//! - [`UdpTransportFactory`]: socket2-backed UDP with a receive thread per socket
//! - [`MemoryNetwork`]: in-process hub routing by address and multicast group

mod memory;
mod udp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::{UdpTransport, UdpTransportFactory};

use crate::Result;
use crossbeam::channel::Sender;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Which discovery protocol a socket serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Spdp,
    Sedp,
}

/// A received datagram.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub channel: Channel,
    pub source: SocketAddr,
    pub payload: Vec<u8>,
}

/// What to bind.
#[derive(Debug, Clone)]
pub struct BindRequest {
    pub channel: Channel,
    /// Local address; port 0 picks an ephemeral port.
    pub local: SocketAddr,
    /// Multicast group to join (the socket then shares its port).
    pub multicast_group: Option<IpAddr>,
    /// Interface name or address used for the multicast join.
    pub multicast_interface: Option<String>,
    pub ttl: u32,
}

impl BindRequest {
    pub fn unicast(channel: Channel, local: SocketAddr, ttl: u32) -> Self {
        Self {
            channel,
            local,
            multicast_group: None,
            multicast_interface: None,
            ttl,
        }
    }

    pub fn multicast(
        channel: Channel,
        local: SocketAddr,
        group: IpAddr,
        interface: Option<String>,
        ttl: u32,
    ) -> Self {
        Self {
            channel,
            local,
            multicast_group: Some(group),
            multicast_interface: interface,
            ttl,
        }
    }
}

/// Source of the host addresses advertised in locators.
pub trait LocatorSource: Send + Sync {
    /// Addresses substituted for an unspecified bind address.
    fn local_addresses(&self) -> Vec<IpAddr>;
}

/// A bound datagram socket.
pub trait DiscoveryTransport: Send + Sync {
    fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<()>;

    /// Bound address (may be unspecified for wildcard binds).
    fn local_addr(&self) -> SocketAddr;

    /// Stop receiving. Idempotent.
    fn close(&self);
}

/// Creates transports; the engine binds through this seam only.
pub trait TransportFactory: LocatorSource {
    /// Bind a socket and start delivering its datagrams to `sink`.
    ///
    /// A taken unicast port must fail with `Error::Io` of kind `AddrInUse` so
    /// the engine can probe the next participant index.
    fn bind(&self, request: &BindRequest, sink: Sender<Inbound>) -> Result<Arc<dyn DiscoveryTransport>>;
}

/// True when a bind failed only because the port is taken.
pub(crate) fn is_addr_in_use(err: &crate::Error) -> bool {
    matches!(err, crate::Error::Io(e) if e.kind() == std::io::ErrorKind::AddrInUse)
}
