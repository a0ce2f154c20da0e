// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared discovery configuration.
//!
//! [`DiscoveryConfig`] holds a [`ConfigValues`] snapshot behind an `ArcSwap`.
//! Engines read the snapshot lock-free when they start. Most setters only
//! affect engines created afterwards; the live settings (relay, ICE, STUN)
//! additionally publish a [`ConfigEvent`] to every running engine, and only
//! when the value actually changed.
//!
//! Setter sequence: take the write lock, compare, store the new snapshot,
//! release, then publish. Engines apply the event on their own thread.

mod events;
mod ports;
mod values;

pub use events::{ConfigEvent, ConfigEventBus};
pub use ports::{PortSet, MAX_PARTICIPANT_INDEX};
pub use values::*;

use arc_swap::ArcSwap;
use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Generates a getter and a construction-time setter per field.
macro_rules! config_accessors {
    ($($field:ident, $setter:ident: $ty:ty;)*) => {
        $(
            pub fn $field(&self) -> $ty {
                self.values.load().$field.clone()
            }

            pub fn $setter(&self, value: $ty) {
                self.store(|v| v.$field = value);
            }
        )*
    };
}

/// Generates a getter and a live setter that broadcasts on change.
macro_rules! live_accessors {
    ($($field:ident, $setter:ident: $ty:ty => $event:ident;)*) => {
        $(
            pub fn $field(&self) -> $ty {
                self.values.load().$field.clone()
            }

            /// Live setting: running engines are notified when the value changes.
            pub fn $setter(&self, value: $ty) {
                self.store_live(value.clone(), |v| &mut v.$field, ConfigEvent::$event(value));
            }
        )*
    };
}

/// Process-scope discovery settings shared by a facade and its engines.
pub struct DiscoveryConfig {
    values: ArcSwap<ConfigValues>,
    write_lock: Mutex<()>,
    events: ConfigEventBus,
}

impl DiscoveryConfig {
    pub fn new(values: ConfigValues) -> Self {
        Self {
            values: ArcSwap::from_pointee(values),
            write_lock: Mutex::new(()),
            events: ConfigEventBus::new(),
        }
    }

    /// Current values. Engines keep the snapshot they were created with.
    pub fn snapshot(&self) -> Arc<ConfigValues> {
        self.values.load_full()
    }

    /// Apply several non-live changes at once.
    pub fn update(&self, apply: impl FnOnce(&mut ConfigValues)) {
        self.store(apply);
    }

    /// Subscribe to live-setting changes.
    pub fn subscribe(&self) -> Receiver<ConfigEvent> {
        self.events.subscribe()
    }

    fn store(&self, apply: impl FnOnce(&mut ConfigValues)) {
        let _guard = self.write_lock.lock();
        let mut next = ConfigValues::clone(&self.values.load());
        apply(&mut next);
        self.values.store(Arc::new(next));
    }

    fn store_live<T: PartialEq>(
        &self,
        value: T,
        slot: impl Fn(&mut ConfigValues) -> &mut T,
        event: ConfigEvent,
    ) {
        let changed = {
            let _guard = self.write_lock.lock();
            let mut next = ConfigValues::clone(&self.values.load());
            let field = slot(&mut next);
            if *field == value {
                false
            } else {
                *field = value;
                self.values.store(Arc::new(next));
                true
            }
        };

        if changed {
            self.events.publish(event);
        }
    }

    config_accessors! {
        resend_period, set_resend_period: Duration;
        quick_resend_ratio, set_quick_resend_ratio: f64;
        min_resend_delay, set_min_resend_delay: Duration;
        lease_duration, set_lease_duration: Duration;
        max_lease_duration, set_max_lease_duration: Duration;
        lease_extension, set_lease_extension: Duration;
        security_unsecure_lease_duration, set_security_unsecure_lease_duration: Duration;
        max_auth_time, set_max_auth_time: Duration;
        auth_resend_period, set_auth_resend_period: Duration;
        sedp_heartbeat_period, set_sedp_heartbeat_period: Duration;
        sedp_nak_response_delay, set_sedp_nak_response_delay: Duration;
        sedp_send_delay, set_sedp_send_delay: Duration;
        sedp_fragment_reassembly_timeout, set_sedp_fragment_reassembly_timeout: Duration;
        sedp_passive_connect_duration, set_sedp_passive_connect_duration: Duration;
        max_type_lookup_service_reply_period, set_max_type_lookup_service_reply_period: Duration;
        spdp_rtps_relay_send_period, set_spdp_rtps_relay_send_period: Duration;
        pb, set_pb: u16;
        dg, set_dg: u16;
        pg, set_pg: u16;
        d0, set_d0: u16;
        d1, set_d1: u16;
        dx, set_dx: u16;
        dy, set_dy: u16;
        ttl, set_ttl: u32;
        spdp_local_address, set_spdp_local_address: SocketAddr;
        sedp_local_address, set_sedp_local_address: SocketAddr;
        ipv6_spdp_local_address, set_ipv6_spdp_local_address: Option<SocketAddr>;
        ipv6_sedp_local_address, set_ipv6_sedp_local_address: Option<SocketAddr>;
        sedp_advertised_address, set_sedp_advertised_address: Option<SocketAddr>;
        default_multicast_group, set_default_multicast_group: IpAddr;
        ipv6_default_multicast_group, set_ipv6_default_multicast_group: IpAddr;
        multicast_interface, set_multicast_interface: Option<String>;
        guid_interface, set_guid_interface: Option<String>;
        spdp_send_addrs, set_spdp_send_addrs: Vec<SocketAddr>;
        sedp_max_message_size, set_sedp_max_message_size: usize;
        sedp_receive_preallocated_message_blocks, set_sedp_receive_preallocated_message_blocks: usize;
        sedp_receive_preallocated_data_blocks, set_sedp_receive_preallocated_data_blocks: usize;
        max_spdp_sequence_msg_reset_check, set_max_spdp_sequence_msg_reset_check: u32;
        max_participants_in_authentication, set_max_participants_in_authentication: usize;
        sedp_multicast, set_sedp_multicast: bool;
        use_xtypes, set_use_xtypes: XTypesMode;
        sedp_responsive_mode, set_sedp_responsive_mode: bool;
        check_source_ip, set_check_source_ip: bool;
        undirected_spdp, set_undirected_spdp: bool;
        periodic_directed_spdp, set_periodic_directed_spdp: bool;
        secure_participant_user_data, set_secure_participant_user_data: bool;
        spdp_user_tag, set_spdp_user_tag: u32;
    }

    live_accessors! {
        use_rtps_relay, set_use_rtps_relay: bool => UseRtpsRelay;
        rtps_relay_only, set_rtps_relay_only: bool => RtpsRelayOnly;
        use_ice, set_use_ice: bool => UseIce;
        spdp_rtps_relay_address, set_spdp_rtps_relay_address: Option<SocketAddr> => SpdpRtpsRelayAddress;
        sedp_rtps_relay_address, set_sedp_rtps_relay_address: Option<SocketAddr> => SedpRtpsRelayAddress;
        spdp_stun_server_address, set_spdp_stun_server_address: Option<SocketAddr> => SpdpStunServerAddress;
        sedp_stun_server_address, set_sedp_stun_server_address: Option<SocketAddr> => SedpStunServerAddress;
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self::new(ConfigValues::default())
    }
}

impl std::fmt::Debug for DiscoveryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryConfig")
            .field("values", &*self.values.load())
            .finish()
    }
}
