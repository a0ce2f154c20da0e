// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! GUID prefix generation.
//!
//! Prefix layout (12 bytes):
//!
//! ```text
//! +---------+-------------------+-------------------+-----------+
//! | vendor  | host (4)          | process id (4)    | counter   |
//! | 01 aa   | interface IPv4    | big-endian        | (2)       |
//! +---------+-------------------+-------------------+-----------+
//! ```
//!
//! The host bytes come from the configured interface (or the default route
//! address). When no address can be resolved, random bytes are used and a
//! warning is logged; participant creation never fails on this.

use super::guid::{GuidPrefix, ENTITYID_PARTICIPANT, GUID};
use std::net::IpAddr;

/// HDDS vendor id.
pub const VENDOR_ID: [u8; 2] = [0x01, 0xaa];

/// Produces unique participant GUIDs.
#[derive(Debug)]
pub struct GuidGenerator {
    host: [u8; 4],
    pid: [u8; 4],
    counter: u16,
}

impl GuidGenerator {
    /// Create a generator drawing host entropy from `interface` (by name or
    /// address), or from the default route when `None`.
    pub fn new(interface: Option<&str>) -> Self {
        let host = match resolve_host_bytes(interface) {
            Some(bytes) => bytes,
            None => {
                log::warn!(
                    "[guid] could not resolve interface {:?}, using random host id",
                    interface
                );
                fastrand::u32(..).to_be_bytes()
            }
        };

        Self {
            host,
            pid: std::process::id().to_be_bytes(),
            // Random start keeps two generators of one process apart.
            counter: fastrand::u16(..),
        }
    }

    /// Fill the prefix of `guid` and set its entity id to the participant id.
    pub fn populate(&mut self, guid: &mut GUID) {
        crate::trace_fn!("GuidGenerator::populate");
        guid.prefix = self.next_prefix();
        guid.entity_id = ENTITYID_PARTICIPANT;
    }

    /// Fresh participant GUID.
    pub fn generate(&mut self) -> GUID {
        let mut guid = GUID::zero();
        self.populate(&mut guid);
        guid
    }

    fn next_prefix(&mut self) -> GuidPrefix {
        self.counter = self.counter.wrapping_add(1);
        let c = self.counter.to_be_bytes();
        let prefix = [
            VENDOR_ID[0],
            VENDOR_ID[1],
            self.host[0],
            self.host[1],
            self.host[2],
            self.host[3],
            self.pid[0],
            self.pid[1],
            self.pid[2],
            self.pid[3],
            c[0],
            c[1],
        ];
        log::debug!("[guid] generated prefix {:02x?}", prefix);
        prefix
    }
}

impl Default for GuidGenerator {
    fn default() -> Self {
        Self::new(None)
    }
}

fn resolve_host_bytes(interface: Option<&str>) -> Option<[u8; 4]> {
    let addr = match interface {
        Some(name) => {
            if let Ok(ip) = name.parse::<IpAddr>() {
                Some(ip)
            } else {
                local_ip_address::list_afinet_netifas()
                    .ok()?
                    .into_iter()
                    .find(|(ifname, ip)| ifname == name && ip.is_ipv4())
                    .map(|(_, ip)| ip)
            }
        }
        None => local_ip_address::local_ip().ok(),
    }?;

    Some(match addr {
        IpAddr::V4(v4) => v4.octets(),
        IpAddr::V6(v6) => {
            let o = v6.octets();
            [o[12], o[13], o[14], o[15]]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_guids_are_unique() {
        let mut gen = GuidGenerator::new(Some("127.0.0.1"));
        let guids: HashSet<GUID> = (0..1000).map(|_| gen.generate()).collect();
        assert_eq!(guids.len(), 1000);
    }

    #[test]
    fn test_prefix_layout() {
        let mut gen = GuidGenerator::new(Some("10.1.2.3"));
        let guid = gen.generate();
        assert_eq!(&guid.prefix[0..2], &VENDOR_ID);
        assert_eq!(&guid.prefix[2..6], &[10, 1, 2, 3]);
        assert_eq!(&guid.prefix[6..10], &std::process::id().to_be_bytes());
        assert_eq!(guid.entity_id, ENTITYID_PARTICIPANT);
    }

    #[test]
    fn test_unknown_interface_falls_back() {
        let mut gen = GuidGenerator::new(Some("no-such-interface0"));
        let mut guid = GUID::zero();
        gen.populate(&mut guid);
        assert!(!guid.is_zero());
        assert_eq!(&guid.prefix[0..2], &VENDOR_ID);
    }
}
