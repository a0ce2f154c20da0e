// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery tunables and their defaults.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

/// RTPS port base (PB).
pub const PORT_BASE: u16 = 7400;
/// Domain id gain (DG).
pub const DOMAIN_ID_GAIN: u16 = 250;
/// Participant id gain (PG).
pub const PARTICIPANT_ID_GAIN: u16 = 2;
/// SPDP multicast offset (D0).
pub const SPDP_MULTICAST_OFFSET: u16 = 0;
/// SPDP unicast offset (D1).
pub const SPDP_UNICAST_OFFSET: u16 = 10;
/// SEDP multicast offset (DX).
pub const SEDP_MULTICAST_OFFSET: u16 = 2;
/// SEDP unicast offset (DY).
pub const SEDP_UNICAST_OFFSET: u16 = 12;
/// Largest payload of a UDP datagram.
pub const UDP_MAX_MESSAGE_SIZE: usize = 65466;
/// Default SPDP/SEDP multicast group.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);
/// Default IPv6 multicast group.
pub const DEFAULT_MULTICAST_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff03, 0, 0, 0, 0, 0, 0, 1);

/// XTypes usage level for endpoint type matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum XTypesMode {
    /// Match on type name only.
    None,
    /// Compare minimal type hashes.
    Minimal,
    /// Compare complete type hashes, resolving unknown types via type lookup.
    Complete,
}

/// Every discovery tunable. Cloned into engines as an immutable snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValues {
    // Timers
    pub resend_period: Duration,
    pub quick_resend_ratio: f64,
    pub min_resend_delay: Duration,
    pub lease_duration: Duration,
    pub max_lease_duration: Duration,
    pub lease_extension: Duration,
    pub security_unsecure_lease_duration: Duration,
    pub max_auth_time: Duration,
    pub auth_resend_period: Duration,
    pub sedp_heartbeat_period: Duration,
    pub sedp_nak_response_delay: Duration,
    pub sedp_send_delay: Duration,
    pub sedp_fragment_reassembly_timeout: Duration,
    pub sedp_passive_connect_duration: Duration,
    pub max_type_lookup_service_reply_period: Duration,
    pub spdp_rtps_relay_send_period: Duration,
    pub ice_check_period: Duration,

    // Port formula
    pub pb: u16,
    pub dg: u16,
    pub pg: u16,
    pub d0: u16,
    pub d1: u16,
    pub dx: u16,
    pub dy: u16,
    pub ttl: u32,

    // Addresses
    /// Local SPDP unicast bind address; a non-zero port disables the formula.
    pub spdp_local_address: SocketAddr,
    pub sedp_local_address: SocketAddr,
    /// IPv6 unicast bind addresses; IPv6 discovery is off when `None`.
    pub ipv6_spdp_local_address: Option<SocketAddr>,
    pub ipv6_sedp_local_address: Option<SocketAddr>,
    /// Address advertised in SEDP locators instead of the bound one.
    pub sedp_advertised_address: Option<SocketAddr>,
    pub default_multicast_group: IpAddr,
    pub ipv6_default_multicast_group: IpAddr,
    pub multicast_interface: Option<String>,
    pub guid_interface: Option<String>,
    pub spdp_rtps_relay_address: Option<SocketAddr>,
    pub sedp_rtps_relay_address: Option<SocketAddr>,
    pub spdp_stun_server_address: Option<SocketAddr>,
    pub sedp_stun_server_address: Option<SocketAddr>,
    /// Extra destinations for every SPDP announcement.
    pub spdp_send_addrs: Vec<SocketAddr>,

    // Sizes
    pub sedp_max_message_size: usize,
    pub sedp_receive_preallocated_message_blocks: usize,
    pub sedp_receive_preallocated_data_blocks: usize,
    pub max_spdp_sequence_msg_reset_check: u32,
    pub max_participants_in_authentication: usize,

    // Feature flags
    pub sedp_multicast: bool,
    pub use_rtps_relay: bool,
    pub rtps_relay_only: bool,
    pub use_ice: bool,
    pub use_xtypes: XTypesMode,
    pub sedp_responsive_mode: bool,
    pub check_source_ip: bool,
    pub undirected_spdp: bool,
    pub periodic_directed_spdp: bool,
    pub secure_participant_user_data: bool,
    pub spdp_user_tag: u32,
}

impl Default for ConfigValues {
    fn default() -> Self {
        let any_v4 = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        Self {
            resend_period: Duration::from_secs(30),
            quick_resend_ratio: 0.1,
            min_resend_delay: Duration::from_millis(100),
            lease_duration: Duration::from_secs(300),
            max_lease_duration: Duration::from_secs(300),
            lease_extension: Duration::ZERO,
            security_unsecure_lease_duration: Duration::from_secs(30),
            max_auth_time: Duration::from_secs(300),
            auth_resend_period: Duration::from_secs(1),
            sedp_heartbeat_period: Duration::from_millis(200),
            sedp_nak_response_delay: Duration::from_millis(100),
            sedp_send_delay: Duration::from_millis(10),
            sedp_fragment_reassembly_timeout: Duration::from_millis(300),
            sedp_passive_connect_duration: Duration::from_secs(60),
            max_type_lookup_service_reply_period: Duration::from_secs(5),
            spdp_rtps_relay_send_period: Duration::from_secs(30),
            ice_check_period: Duration::from_secs(1),
            pb: PORT_BASE,
            dg: DOMAIN_ID_GAIN,
            pg: PARTICIPANT_ID_GAIN,
            d0: SPDP_MULTICAST_OFFSET,
            d1: SPDP_UNICAST_OFFSET,
            dx: SEDP_MULTICAST_OFFSET,
            dy: SEDP_UNICAST_OFFSET,
            ttl: 1,
            spdp_local_address: any_v4,
            sedp_local_address: any_v4,
            ipv6_spdp_local_address: None,
            ipv6_sedp_local_address: None,
            sedp_advertised_address: None,
            default_multicast_group: IpAddr::V4(DEFAULT_MULTICAST_GROUP),
            ipv6_default_multicast_group: IpAddr::V6(DEFAULT_MULTICAST_GROUP_V6),
            multicast_interface: None,
            guid_interface: None,
            spdp_rtps_relay_address: None,
            sedp_rtps_relay_address: None,
            spdp_stun_server_address: None,
            sedp_stun_server_address: None,
            spdp_send_addrs: Vec::new(),
            sedp_max_message_size: UDP_MAX_MESSAGE_SIZE,
            sedp_receive_preallocated_message_blocks: 0,
            sedp_receive_preallocated_data_blocks: 0,
            max_spdp_sequence_msg_reset_check: 3,
            max_participants_in_authentication: 0,
            sedp_multicast: true,
            use_rtps_relay: false,
            rtps_relay_only: false,
            use_ice: false,
            use_xtypes: XTypesMode::Minimal,
            sedp_responsive_mode: false,
            check_source_ip: true,
            undirected_spdp: true,
            periodic_directed_spdp: false,
            secure_participant_user_data: false,
            spdp_user_tag: 0,
        }
    }
}

impl ConfigValues {
    /// Defaults with environment overrides applied.
    ///
    /// - `HDDS_DISCOVERY_GUID_INTERFACE`: interface name or address for GUID entropy
    /// - `HDDS_SPDP_SEND_ADDRS`: comma-separated `ip:port` list
    /// - `HDDS_MULTICAST_IF`: multicast interface address
    pub fn from_env() -> Self {
        let mut values = Self::default();

        if let Ok(iface) = std::env::var("HDDS_DISCOVERY_GUID_INTERFACE") {
            if !iface.trim().is_empty() {
                log::debug!("[config] guid_interface from env: {}", iface);
                values.guid_interface = Some(iface.trim().to_string());
            }
        }

        if let Ok(list) = std::env::var("HDDS_SPDP_SEND_ADDRS") {
            values.spdp_send_addrs = parse_addr_list(&list);
        }

        if let Ok(iface) = std::env::var("HDDS_MULTICAST_IF") {
            if !iface.trim().is_empty() {
                values.multicast_interface = Some(iface.trim().to_string());
            }
        }

        values
    }

    /// Quick-resend delay: `max(resend_period * quick_resend_ratio, min_resend_delay)`.
    pub fn quick_resend_delay(&self) -> Duration {
        let scaled = self.resend_period.mul_f64(self.quick_resend_ratio.max(0.0));
        scaled.max(self.min_resend_delay)
    }

    /// Check ranges the engine relies on.
    pub fn validate(&self) -> crate::Result<()> {
        if self.resend_period.is_zero() {
            return Err(crate::Error::InvalidConfig(
                "resend_period must be non-zero".to_string(),
            ));
        }
        if self.lease_duration.is_zero() {
            return Err(crate::Error::InvalidConfig(
                "lease_duration must be non-zero".to_string(),
            ));
        }
        if self.sedp_max_message_size < 512 {
            return Err(crate::Error::InvalidConfig(format!(
                "sedp_max_message_size {} below 512",
                self.sedp_max_message_size
            )));
        }
        if !(0.0..=1.0).contains(&self.quick_resend_ratio) {
            return Err(crate::Error::InvalidConfig(format!(
                "quick_resend_ratio {} outside [0, 1]",
                self.quick_resend_ratio
            )));
        }
        Ok(())
    }
}

/// Parse "a:p,b:q" skipping (and logging) bad entries.
pub(crate) fn parse_addr_list(list: &str) -> Vec<SocketAddr> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<SocketAddr>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                log::warn!("[config] ignoring send address '{}': {}", s, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let v = ConfigValues::default();
        assert_eq!(v.resend_period, Duration::from_secs(30));
        assert_eq!(v.lease_duration, Duration::from_secs(300));
        assert_eq!(v.max_spdp_sequence_msg_reset_check, 3);
        assert_eq!((v.pb, v.dg, v.pg, v.d0, v.d1, v.dx, v.dy), (7400, 250, 2, 0, 10, 2, 12));
        assert!(v.validate().is_ok());
    }

    #[test]
    fn test_quick_resend_delay_bounds() {
        let mut v = ConfigValues::default();
        assert_eq!(v.quick_resend_delay(), Duration::from_secs(3));

        v.resend_period = Duration::from_millis(500);
        assert_eq!(v.quick_resend_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_addr_list_skips_garbage() {
        let addrs = parse_addr_list("10.0.0.1:7400, nonsense ,10.0.0.2:7410,");
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[1].port(), 7410);
    }

    #[test]
    fn test_validate_rejects_zero_lease() {
        let v = ConfigValues {
            lease_duration: Duration::ZERO,
            ..ConfigValues::default()
        };
        assert!(v.validate().is_err());
    }
}
