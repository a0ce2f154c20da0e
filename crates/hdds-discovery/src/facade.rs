// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS discovery facade.
//!
//! [`RtpsDiscovery`] owns the shared [`DiscoveryConfig`], the GUID generator
//! and one [`DiscoveryEngine`] per local participant, keyed by
//! `(domain_id, participant_guid)`. Every entity operation is routed to the
//! owning engine; an unknown participant yields a sentinel (`false`, `0`,
//! `None`, or `Error::ParticipantNotFound`), never a panic.
//!
//! The map is a `DashMap`: a lookup clones the engine `Arc` and drops the
//! shard guard before the engine is called, so slow engine work (shutdown,
//! callbacks) never runs under the registry lock.

use crate::bit::BitSink;
use crate::callbacks::{
    DataReaderCallbacks, DataWriterCallbacks, IceAgent, SecurityProvider, TopicCallbacks,
    TypeLookupService,
};
use crate::config::DiscoveryConfig;
use crate::core::{GuidGenerator, GUID};
use crate::error::{Error, Result};
use crate::filter::ContentFilterProperty;
use crate::protocol::{DiscoveryCodec, ParticipantData, PlCodec, TypeHash, TypeInformation};
use crate::qos::{IncompatibleQosStatus, LivelinessKind, ParticipantQos, QoS};
use crate::sedp::{TopicInfo, TopicStatus};
use crate::spdp::{DiscoveryEngine, Spdp, SpdpParams};
use crate::transport::{TransportFactory, UdpTransportFactory};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;

/// Registry key used when no strategy name is given.
pub const DEFAULT_DISCOVERY_KEY: &str = "DEFAULT_RTPS_DISCOVERY";

type ParticipantKey = (u32, GUID);

/// Peer-to-peer RTPS discovery for any number of local participants.
pub struct RtpsDiscovery {
    key: String,
    config: Arc<DiscoveryConfig>,
    factory: Arc<dyn TransportFactory>,
    codec: Arc<dyn DiscoveryCodec>,
    ice: Option<Arc<dyn IceAgent>>,
    generator: Mutex<GuidGenerator>,
    participants: DashMap<ParticipantKey, Arc<dyn DiscoveryEngine>>,
}

impl RtpsDiscovery {
    /// Facade over UDP sockets.
    pub fn new(key: impl Into<String>, config: DiscoveryConfig) -> Self {
        Self::with_transport(key, config, Arc::new(UdpTransportFactory::new()))
    }

    /// Facade over a custom transport (e.g. [`MemoryNetwork`](crate::transport::MemoryNetwork)).
    pub fn with_transport(
        key: impl Into<String>,
        config: DiscoveryConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let generator = GuidGenerator::new(config.guid_interface().as_deref());
        Self {
            key: key.into(),
            config: Arc::new(config),
            factory,
            codec: Arc::new(PlCodec),
            ice: None,
            generator: Mutex::new(generator),
            participants: DashMap::new(),
        }
    }

    /// Replace the datagram codec used by participants created afterwards.
    pub fn with_codec(mut self, codec: Arc<dyn DiscoveryCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// NAT traversal agent consulted when `use_ice` is on.
    pub fn with_ice_agent(mut self, ice: Arc<dyn IceAgent>) -> Self {
        self.ice = Some(ice);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &Arc<DiscoveryConfig> {
        &self.config
    }

    fn engine(&self, domain_id: u32, participant: GUID) -> Option<Arc<dyn DiscoveryEngine>> {
        self.participants
            .get(&(domain_id, participant))
            .map(|e| Arc::clone(e.value()))
    }

    fn routed<T>(
        &self,
        domain_id: u32,
        participant: GUID,
        op: impl FnOnce(&dyn DiscoveryEngine) -> Result<T>,
    ) -> Result<T> {
        match self.engine(domain_id, participant) {
            Some(engine) => op(engine.as_ref()),
            None => Err(Error::ParticipantNotFound),
        }
    }

    // ========================================================================
    // Participants
    // ========================================================================

    /// A fresh participant GUID.
    pub fn generate_participant_guid(&self) -> GUID {
        self.generator.lock().generate()
    }

    /// Create and start discovery for a new local participant.
    ///
    /// Returns the participant GUID (zero on failure) and whether discovery is
    /// federated, which peer-to-peer RTPS never is.
    pub fn add_domain_participant(
        &self,
        domain_id: u32,
        qos: ParticipantQos,
        type_lookup: Option<Arc<dyn TypeLookupService>>,
    ) -> (GUID, bool) {
        let guid = self.generate_participant_guid();
        (self.start_participant(domain_id, guid, qos, type_lookup, None), false)
    }

    /// Like [`add_domain_participant`](Self::add_domain_participant) with a
    /// caller-supplied GUID and an authentication provider.
    pub fn add_domain_participant_secure(
        &self,
        domain_id: u32,
        qos: ParticipantQos,
        type_lookup: Option<Arc<dyn TypeLookupService>>,
        guid: GUID,
        security: Arc<dyn SecurityProvider>,
    ) -> (GUID, bool) {
        (
            self.start_participant(domain_id, guid, qos, type_lookup, Some(security)),
            false,
        )
    }

    fn start_participant(
        &self,
        domain_id: u32,
        guid: GUID,
        qos: ParticipantQos,
        type_lookup: Option<Arc<dyn TypeLookupService>>,
        security: Option<Arc<dyn SecurityProvider>>,
    ) -> GUID {
        crate::trace_fn!("RtpsDiscovery::start_participant");
        if guid.is_zero() || self.participants.contains_key(&(domain_id, guid)) {
            log::error!(
                "[disco] participant {} rejected in domain {}: null or duplicate GUID",
                guid,
                domain_id
            );
            return GUID::zero();
        }
        let params = SpdpParams {
            guid,
            domain_id,
            qos,
            config: Arc::clone(&self.config),
            factory: Arc::clone(&self.factory),
            codec: Arc::clone(&self.codec),
            security,
            ice: self.ice.clone(),
            type_lookup,
        };
        let spdp = match Spdp::start(params) {
            Ok(spdp) => spdp,
            Err(e) => {
                log::error!(
                    "[disco] cannot start participant {} in domain {}: {}",
                    guid,
                    domain_id,
                    e
                );
                return GUID::zero();
            }
        };

        let engine: Arc<dyn DiscoveryEngine> = spdp;
        let displaced = match self.participants.entry((domain_id, guid)) {
            dashmap::mapref::entry::Entry::Occupied(_) => Some(engine),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(engine);
                None
            }
        };
        if let Some(engine) = displaced {
            engine.shutdown();
            log::error!("[disco] participant {} registered concurrently", guid);
            return GUID::zero();
        }
        log::debug!("[disco] participant {} added to domain {}", guid, domain_id);
        guid
    }

    /// Stop and forget a participant. False when it is unknown.
    pub fn remove_domain_participant(&self, domain_id: u32, participant: GUID) -> bool {
        let Some((_, engine)) = self.participants.remove(&(domain_id, participant)) else {
            return false;
        };
        engine.shutdown();
        log::debug!("[disco] participant {} removed from domain {}", participant, domain_id);
        true
    }

    pub fn has_domain_participant(&self, domain_id: u32, participant: GUID) -> bool {
        self.participants.contains_key(&(domain_id, participant))
    }

    /// Local participants of `domain_id`.
    pub fn domain_participants(&self, domain_id: u32) -> Vec<GUID> {
        self.participants
            .iter()
            .filter(|e| e.key().0 == domain_id)
            .map(|e| e.key().1)
            .collect()
    }

    /// Stop listening to `remote` (and its entities) for good.
    pub fn ignore_domain_participant(&self, domain_id: u32, participant: GUID, remote: GUID) -> bool {
        match self.engine(domain_id, participant) {
            Some(engine) => {
                engine.ignore_participant(remote);
                true
            }
            None => false,
        }
    }

    pub fn discovered_participants(&self, domain_id: u32, participant: GUID) -> Vec<ParticipantData> {
        self.engine(domain_id, participant)
            .map(|e| e.discovered_participants())
            .unwrap_or_default()
    }

    pub fn signal_liveliness(&self, domain_id: u32, participant: GUID, kind: LivelinessKind) -> Result<()> {
        self.routed(domain_id, participant, |e| e.signal_liveliness(kind))
    }

    // ========================================================================
    // Topics
    // ========================================================================

    pub fn assert_topic(
        &self,
        domain_id: u32,
        participant: GUID,
        name: &str,
        type_name: &str,
        qos: QoS,
        has_key: bool,
        callbacks: Option<Arc<dyn TopicCallbacks>>,
    ) -> Result<(GUID, TopicStatus)> {
        self.routed(domain_id, participant, |e| {
            e.assert_topic(name, type_name, qos, has_key, callbacks)
        })
    }

    pub fn find_topic(&self, domain_id: u32, participant: GUID, name: &str) -> Option<TopicInfo> {
        self.engine(domain_id, participant)?.find_topic(name)
    }

    pub fn remove_topic(&self, domain_id: u32, participant: GUID, topic: GUID) -> Result<()> {
        self.routed(domain_id, participant, |e| e.remove_topic(topic))
    }

    pub fn ignore_topic(&self, domain_id: u32, participant: GUID, topic: GUID) -> bool {
        match self.engine(domain_id, participant) {
            Some(engine) => {
                engine.ignore_topic(topic);
                true
            }
            None => false,
        }
    }

    pub fn update_topic_qos(&self, domain_id: u32, participant: GUID, topic: GUID, qos: QoS) -> Result<()> {
        self.routed(domain_id, participant, |e| e.update_topic_qos(topic, qos))
    }

    // ========================================================================
    // Publications
    // ========================================================================

    pub fn add_publication(
        &self,
        domain_id: u32,
        participant: GUID,
        topic: GUID,
        qos: QoS,
        locators: Vec<SocketAddr>,
        type_info: Option<TypeInformation>,
        callbacks: Arc<dyn DataWriterCallbacks>,
    ) -> Result<GUID> {
        self.routed(domain_id, participant, |e| {
            e.add_publication(topic, qos, locators, type_info, callbacks)
        })
    }

    pub fn remove_publication(&self, domain_id: u32, participant: GUID, writer: GUID) -> Result<()> {
        self.routed(domain_id, participant, |e| e.remove_publication(writer))
    }

    pub fn ignore_publication(&self, domain_id: u32, participant: GUID, writer: GUID) -> bool {
        match self.engine(domain_id, participant) {
            Some(engine) => {
                engine.ignore_publication(writer);
                true
            }
            None => false,
        }
    }

    pub fn update_publication_qos(&self, domain_id: u32, participant: GUID, writer: GUID, qos: QoS) -> Result<()> {
        self.routed(domain_id, participant, |e| e.update_publication_qos(writer, qos))
    }

    pub fn update_publication_locators(
        &self,
        domain_id: u32,
        participant: GUID,
        writer: GUID,
        locators: Vec<SocketAddr>,
    ) -> Result<()> {
        self.routed(domain_id, participant, |e| {
            e.update_publication_locators(writer, locators)
        })
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub fn add_subscription(
        &self,
        domain_id: u32,
        participant: GUID,
        topic: GUID,
        qos: QoS,
        locators: Vec<SocketAddr>,
        type_info: Option<TypeInformation>,
        content_filter: Option<ContentFilterProperty>,
        callbacks: Arc<dyn DataReaderCallbacks>,
    ) -> Result<GUID> {
        self.routed(domain_id, participant, |e| {
            e.add_subscription(topic, qos, locators, type_info, content_filter, callbacks)
        })
    }

    pub fn remove_subscription(&self, domain_id: u32, participant: GUID, reader: GUID) -> Result<()> {
        self.routed(domain_id, participant, |e| e.remove_subscription(reader))
    }

    pub fn ignore_subscription(&self, domain_id: u32, participant: GUID, reader: GUID) -> bool {
        match self.engine(domain_id, participant) {
            Some(engine) => {
                engine.ignore_subscription(reader);
                true
            }
            None => false,
        }
    }

    pub fn update_subscription_qos(&self, domain_id: u32, participant: GUID, reader: GUID, qos: QoS) -> Result<()> {
        self.routed(domain_id, participant, |e| e.update_subscription_qos(reader, qos))
    }

    /// New content-filter parameters. Associations are kept.
    pub fn update_subscription_params(
        &self,
        domain_id: u32,
        participant: GUID,
        reader: GUID,
        params: Vec<String>,
    ) -> Result<()> {
        self.routed(domain_id, participant, |e| {
            e.update_subscription_params(reader, params)
        })
    }

    pub fn update_subscription_locators(
        &self,
        domain_id: u32,
        participant: GUID,
        reader: GUID,
        locators: Vec<SocketAddr>,
    ) -> Result<()> {
        self.routed(domain_id, participant, |e| {
            e.update_subscription_locators(reader, locators)
        })
    }

    // ========================================================================
    // Status, types and BIT
    // ========================================================================

    pub fn incompatible_qos_status(
        &self,
        domain_id: u32,
        participant: GUID,
        endpoint: GUID,
    ) -> Option<IncompatibleQosStatus> {
        self.engine(domain_id, participant)?
            .incompatible_qos_status(endpoint)
    }

    /// Type object obtained outside discovery; pending matches re-evaluate.
    pub fn type_lookup_reply_received(
        &self,
        domain_id: u32,
        participant: GUID,
        hash: TypeHash,
        object: Vec<u8>,
    ) -> bool {
        match self.engine(domain_id, participant) {
            Some(engine) => {
                engine.type_lookup_reply_received(hash, object);
                true
            }
            None => false,
        }
    }

    /// Mirror the participant's discovery state to `sink`.
    pub fn init_bit(&self, domain_id: u32, participant: GUID, sink: Arc<dyn BitSink>) -> bool {
        match self.engine(domain_id, participant) {
            Some(engine) => {
                engine.attach_bit(sink);
                true
            }
            None => false,
        }
    }

    pub fn fini_bit(&self, domain_id: u32, participant: GUID) -> bool {
        match self.engine(domain_id, participant) {
            Some(engine) => {
                engine.detach_bit();
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Ports
    // ========================================================================

    pub fn get_spdp_port(&self, domain_id: u32, participant: GUID) -> u16 {
        self.engine(domain_id, participant).map_or(0, |e| e.ports().spdp)
    }

    pub fn get_sedp_port(&self, domain_id: u32, participant: GUID) -> u16 {
        self.engine(domain_id, participant).map_or(0, |e| e.ports().sedp)
    }

    pub fn get_ipv6_spdp_port(&self, domain_id: u32, participant: GUID) -> u16 {
        self.engine(domain_id, participant).map_or(0, |e| e.ports().spdp_v6)
    }

    pub fn get_ipv6_sedp_port(&self, domain_id: u32, participant: GUID) -> u16 {
        self.engine(domain_id, participant).map_or(0, |e| e.ports().sedp_v6)
    }

    // ========================================================================
    // Live settings (running participants are notified on change)
    // ========================================================================

    pub fn set_use_rtps_relay(&self, on: bool) {
        self.config.set_use_rtps_relay(on);
    }

    pub fn set_rtps_relay_only(&self, on: bool) {
        self.config.set_rtps_relay_only(on);
    }

    pub fn set_use_ice(&self, on: bool) {
        self.config.set_use_ice(on);
    }

    pub fn set_spdp_rtps_relay_address(&self, addr: Option<SocketAddr>) {
        self.config.set_spdp_rtps_relay_address(addr);
    }

    pub fn set_sedp_rtps_relay_address(&self, addr: Option<SocketAddr>) {
        self.config.set_sedp_rtps_relay_address(addr);
    }

    pub fn set_spdp_stun_server_address(&self, addr: Option<SocketAddr>) {
        self.config.set_spdp_stun_server_address(addr);
    }

    pub fn set_sedp_stun_server_address(&self, addr: Option<SocketAddr>) {
        self.config.set_sedp_stun_server_address(addr);
    }
}

impl Drop for RtpsDiscovery {
    fn drop(&mut self) {
        let engines: Vec<Arc<dyn DiscoveryEngine>> =
            self.participants.iter().map(|e| Arc::clone(e.value())).collect();
        self.participants.clear();
        for engine in engines {
            engine.shutdown();
        }
    }
}

impl std::fmt::Debug for RtpsDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpsDiscovery")
            .field("key", &self.key)
            .field("participants", &self.participants.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;

    fn facade(network: &MemoryNetwork) -> RtpsDiscovery {
        RtpsDiscovery::with_transport(
            DEFAULT_DISCOVERY_KEY,
            DiscoveryConfig::default(),
            Arc::new(network.clone()),
        )
    }

    #[test]
    fn test_unknown_participant_sentinels() {
        let network = MemoryNetwork::new();
        let disco = facade(&network);
        let ghost = GUID::participant([9; 12]);

        assert!(!disco.remove_domain_participant(0, ghost));
        assert!(!disco.has_domain_participant(0, ghost));
        assert!(!disco.ignore_topic(0, ghost, ghost));
        assert!(disco.find_topic(0, ghost, "T").is_none());
        assert_eq!(disco.get_spdp_port(0, ghost), 0);
        assert_eq!(disco.get_ipv6_sedp_port(0, ghost), 0);
        assert!(disco.discovered_participants(0, ghost).is_empty());
        assert!(matches!(
            disco.assert_topic(0, ghost, "T", "X", QoS::default(), true, None),
            Err(Error::ParticipantNotFound)
        ));
    }

    #[test]
    fn test_add_and_remove_participant() {
        let network = MemoryNetwork::new();
        let disco = facade(&network);
        let (guid, federated) = disco.add_domain_participant(3, ParticipantQos::default(), None);

        assert!(!guid.is_zero());
        assert!(!federated);
        assert!(disco.has_domain_participant(3, guid));
        assert!(!disco.has_domain_participant(4, guid));
        assert_eq!(disco.get_spdp_port(3, guid), 7400 + 250 * 3 + 10);
        assert_eq!(disco.domain_participants(3), vec![guid]);

        assert!(disco.remove_domain_participant(3, guid));
        assert!(!disco.remove_domain_participant(3, guid));
        assert_eq!(network.bound_count(), 0);
    }

    #[test]
    fn test_duplicate_guid_rejected() {
        let network = MemoryNetwork::new();
        let disco = facade(&network);
        let guid = disco.generate_participant_guid();
        let security: Arc<dyn SecurityProvider> = Arc::new(Open);

        let (first, _) = disco.add_domain_participant_secure(0, ParticipantQos::default(), None, guid, Arc::clone(&security));
        let (second, _) = disco.add_domain_participant_secure(0, ParticipantQos::default(), None, guid, security);
        assert_eq!(first, guid);
        assert!(second.is_zero());
        assert_eq!(disco.domain_participants(0).len(), 1);
    }

    #[test]
    fn test_security_init_failure_returns_null_guid() {
        let network = MemoryNetwork::new();
        let disco = facade(&network);
        let guid = disco.generate_participant_guid();
        let (got, _) = disco.add_domain_participant_secure(0, ParticipantQos::default(), None, guid, Arc::new(Broken));
        assert!(got.is_zero());
        assert!(!disco.has_domain_participant(0, guid));
        assert_eq!(network.bound_count(), 0);
    }

    struct Open;

    impl SecurityProvider for Open {
        fn identity_token(&self, _local: GUID) -> Result<Vec<u8>> {
            Ok(b"open".to_vec())
        }
        fn begin_handshake(&self, _l: GUID, _r: GUID, _id: &[u8]) -> crate::callbacks::HandshakeStep {
            crate::callbacks::HandshakeStep::Complete
        }
        fn process_handshake(&self, _l: GUID, _r: GUID, _t: &[u8]) -> crate::callbacks::HandshakeStep {
            crate::callbacks::HandshakeStep::Complete
        }
    }

    struct Broken;

    impl SecurityProvider for Broken {
        fn identity_token(&self, _local: GUID) -> Result<Vec<u8>> {
            Err(Error::InvalidConfig("no certificate".to_string()))
        }
        fn begin_handshake(&self, _l: GUID, _r: GUID, _id: &[u8]) -> crate::callbacks::HandshakeStep {
            crate::callbacks::HandshakeStep::Failed("unused".to_string())
        }
        fn process_handshake(&self, _l: GUID, _r: GUID, _t: &[u8]) -> crate::callbacks::HandshakeStep {
            crate::callbacks::HandshakeStep::Failed("unused".to_string())
        }
    }
}
