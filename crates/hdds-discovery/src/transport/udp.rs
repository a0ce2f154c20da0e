// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP discovery sockets.
//!
//! Unicast sockets are bound exclusively so a taken port reports `AddrInUse`
//! (participant index probing relies on it). Multicast sockets set
//! SO_REUSEADDR so every participant on the host shares the well-known port,
//! and join the group on the configured interface or on every non-loopback
//! IPv4 interface.

use super::{BindRequest, DiscoveryTransport, Inbound, LocatorSource, TransportFactory};
use crate::{Error, Result};
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Receive poll interval; bounds how long `close()` waits for the thread.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);
const RECV_BUFFER_SIZE: usize = 65536;

/// Factory for [`UdpTransport`] sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpTransportFactory;

impl UdpTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

impl LocatorSource for UdpTransportFactory {
    fn local_addresses(&self) -> Vec<IpAddr> {
        let mut addrs: Vec<IpAddr> = match local_ip_address::list_afinet_netifas() {
            Ok(list) => list
                .into_iter()
                .map(|(_, ip)| ip)
                .filter(|ip| ip.is_ipv4() && !ip.is_loopback())
                .collect(),
            Err(e) => {
                log::debug!("[udp] interface listing failed: {}", e);
                Vec::new()
            }
        };
        if addrs.is_empty() {
            addrs.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        addrs
    }
}

impl TransportFactory for UdpTransportFactory {
    fn bind(&self, request: &BindRequest, sink: Sender<Inbound>) -> Result<Arc<dyn DiscoveryTransport>> {
        Ok(Arc::new(UdpTransport::bind(request, sink)?))
    }
}

/// One bound UDP socket plus its receive thread.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    pub fn bind(request: &BindRequest, sink: Sender<Inbound>) -> Result<Self> {
        crate::trace_fn!("UdpTransport::bind");
        let domain = if request.local.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        if request.multicast_group.is_some() {
            socket.set_reuse_address(true)?;
        }
        if let Err(e) = socket.bind(&request.local.into()) {
            if e.kind() == io::ErrorKind::AddrInUse {
                return Err(Error::Io(e));
            }
            return Err(Error::BindFailed(format!("{}: {}", request.local, e)));
        }

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        if let Some(group) = request.multicast_group {
            join_group(&socket, group, request.multicast_interface.as_deref(), request.ttl)?;
        } else if request.local.is_ipv4() {
            if let Err(e) = socket.set_ttl(request.ttl) {
                log::warn!("[udp] failed to set TTL {} on {}: {}", request.ttl, request.local, e);
            }
        }

        let local = socket.local_addr()?;
        log::debug!(
            "[udp] bound {:?} socket {} (multicast={:?})",
            request.channel,
            local,
            request.multicast_group
        );

        let socket = Arc::new(socket);
        let stop = Arc::new(AtomicBool::new(false));
        let thread = spawn_receiver(Arc::clone(&socket), Arc::clone(&stop), request.channel, sink)?;

        Ok(Self {
            socket,
            local,
            stop,
            thread: Mutex::new(Some(thread)),
        })
    }
}

impl DiscoveryTransport for UdpTransport {
    fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<()> {
        if dest.is_ipv4() != self.local.is_ipv4() {
            return Err(Error::SendFailed(format!(
                "{} not reachable from {}",
                dest, self.local
            )));
        }
        self.socket
            .send_to(bytes, dest)
            .map(|_| ())
            .map_err(|e| Error::SendFailed(format!("{}: {}", dest, e)))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn close(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_receiver(
    socket: Arc<UdpSocket>,
    stop: Arc<AtomicBool>,
    channel: super::Channel,
    sink: Sender<Inbound>,
) -> Result<JoinHandle<()>> {
    let name = format!("hdds-disc-rx-{:?}", channel).to_lowercase();
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            while !stop.load(Ordering::Acquire) {
                match socket.recv_from(&mut buf) {
                    Ok((len, source)) => {
                        let inbound = Inbound {
                            channel,
                            source,
                            payload: buf[..len].to_vec(),
                        };
                        if sink.send(inbound).is_err() {
                            break;
                        }
                    }
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut
                            || e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        log::debug!("[udp] recv error: {}", e);
                    }
                }
            }
        })
        .map_err(Error::Io)
}

fn join_group(socket: &UdpSocket, group: IpAddr, interface: Option<&str>, ttl: u32) -> Result<()> {
    match group {
        IpAddr::V4(group) => {
            let interfaces = match interface {
                Some(name) => vec![resolve_interface_v4(name)?],
                None => multicast_interfaces_v4(),
            };
            let mut joined = 0;
            for iface in &interfaces {
                match socket.join_multicast_v4(&group, iface) {
                    Ok(()) => {
                        joined += 1;
                        log::debug!("[udp] joined {} on {}", group, iface);
                    }
                    Err(e) => log::debug!("[udp] join {} on {} failed: {}", group, iface, e),
                }
            }
            if joined == 0 {
                socket
                    .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
                    .map_err(|e| Error::MulticastJoinFailed(format!("{}: {}", group, e)))?;
            }
            socket.set_multicast_loop_v4(true)?;
            socket.set_multicast_ttl_v4(ttl)?;
        }
        IpAddr::V6(group) => {
            socket
                .join_multicast_v6(&group, 0)
                .map_err(|e| Error::MulticastJoinFailed(format!("{}: {}", group, e)))?;
            socket.set_multicast_loop_v6(true)?;
        }
    }
    Ok(())
}

/// Interface given as an address or as a name.
fn resolve_interface_v4(name: &str) -> Result<Ipv4Addr> {
    if let Ok(addr) = name.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    let list = local_ip_address::list_afinet_netifas()
        .map_err(|e| Error::MulticastJoinFailed(format!("interface {}: {}", name, e)))?;
    list.into_iter()
        .find_map(|(iface, ip)| match ip {
            IpAddr::V4(v4) if iface == name => Some(v4),
            _ => None,
        })
        .ok_or_else(|| Error::MulticastJoinFailed(format!("no IPv4 address on interface {}", name)))
}

fn multicast_interfaces_v4() -> Vec<Ipv4Addr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(list) => list
            .into_iter()
            .filter_map(|(_, ip)| match ip {
                IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_link_local() => Some(v4),
                _ => None,
            })
            .collect(),
        Err(e) => {
            log::debug!("[udp] interface listing failed: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::Channel;
    use super::*;
    use crossbeam::channel::unbounded;

    #[test]
    fn test_unicast_loopback_delivery() {
        let (tx, rx) = unbounded();
        let local: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = UdpTransport::bind(&BindRequest::unicast(Channel::Spdp, local, 1), tx).unwrap();
        let (tx2, _rx2) = unbounded();
        let b = UdpTransport::bind(&BindRequest::unicast(Channel::Sedp, local, 1), tx2).unwrap();

        b.send_to(b"hello", a.local_addr()).unwrap();
        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got.payload, b"hello");
        assert_eq!(got.channel, Channel::Spdp);
        assert_eq!(got.source, b.local_addr());
        a.close();
        b.close();
    }

    #[test]
    fn test_unicast_socket_carries_requested_ttl() {
        let (tx, _rx) = unbounded();
        let local: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = UdpTransport::bind(&BindRequest::unicast(Channel::Spdp, local, 7), tx).unwrap();
        assert_eq!(a.socket.ttl().unwrap(), 7);
        a.close();
    }

    #[test]
    fn test_taken_unicast_port_is_addr_in_use() {
        let (tx, _rx) = unbounded();
        let local: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = UdpTransport::bind(&BindRequest::unicast(Channel::Spdp, local, 1), tx.clone()).unwrap();
        let err = UdpTransport::bind(&BindRequest::unicast(Channel::Spdp, a.local_addr(), 1), tx)
            .err()
            .unwrap();
        assert!(super::super::is_addr_in_use(&err));
    }
}
