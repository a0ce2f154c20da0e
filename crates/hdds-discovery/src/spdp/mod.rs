// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simple Participant Discovery.
//!
//! One [`Spdp`] per local participant. It binds the discovery sockets, owns
//! the [`Engine`](engine::Engine) behind a mutex and runs one thread that
//! services received datagrams, live configuration events and the timer
//! queue.
//!
//! # Architecture
//!
//! ```text
//! sockets ──Inbound──┐
//! config bus ────────┼──> engine thread ──lock──> Engine ──Effects──> sockets
//! control (wake/stop)┘                                       └──────> callbacks
//! ```
//!
//! Facade calls take the same lock, collect [`Effects`](engine::Effects) and
//! execute them after releasing it, so entity-layer callbacks never run under
//! the engine lock.

mod announce;
mod auth;
pub(crate) mod engine;
pub mod lease;
pub(crate) mod timers;

use self::engine::{Effects, Engine, EngineSetup, Route};
use crate::bit::BitSink;
use crate::callbacks::{
    DataReaderCallbacks, DataWriterCallbacks, IceAgent, SecurityProvider, TopicCallbacks,
    TypeLookupService,
};
use crate::config::{ConfigEvent, ConfigValues, DiscoveryConfig, MAX_PARTICIPANT_INDEX};
use crate::core::GUID;
use crate::error::{Error, Result};
use crate::filter::ContentFilterProperty;
use crate::protocol::{
    DiscoveryCodec, ParticipantData, TypeHash, TypeInformation, PARTICIPANT_FLAG_RELAY,
};
use crate::qos::{IncompatibleQosStatus, LivelinessKind, ParticipantQos, QoS};
use crate::sedp::{TopicInfo, TopicStatus};
use crate::transport::{
    is_addr_in_use, BindRequest, Channel, DiscoveryTransport, Inbound, TransportFactory,
};
use crossbeam::channel::{never, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest the engine thread sleeps without a timer due.
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Lifecycle of a local participant's discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpdpState {
    Initializing,
    Announcing,
    Operational,
    ShuttingDown,
    Terminated,
}

/// Bound discovery ports (0 when not bound).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscoveryPorts {
    pub spdp: u16,
    pub sedp: u16,
    pub spdp_v6: u16,
    pub sedp_v6: u16,
    pub participant_index: u16,
}

/// Discovery of one local participant, as seen by the facade.
pub trait DiscoveryEngine: Send + Sync {
    fn guid(&self) -> GUID;
    fn domain_id(&self) -> u32;
    fn state(&self) -> SpdpState;
    fn ports(&self) -> DiscoveryPorts;

    fn signal_liveliness(&self, kind: LivelinessKind) -> Result<()>;

    fn assert_topic(
        &self,
        name: &str,
        type_name: &str,
        qos: QoS,
        has_key: bool,
        callbacks: Option<Arc<dyn TopicCallbacks>>,
    ) -> Result<(GUID, TopicStatus)>;
    fn find_topic(&self, name: &str) -> Option<TopicInfo>;
    fn remove_topic(&self, topic: GUID) -> Result<()>;
    fn ignore_topic(&self, topic: GUID);
    fn update_topic_qos(&self, topic: GUID, qos: QoS) -> Result<()>;

    fn add_publication(
        &self,
        topic: GUID,
        qos: QoS,
        locators: Vec<SocketAddr>,
        type_info: Option<TypeInformation>,
        callbacks: Arc<dyn DataWriterCallbacks>,
    ) -> Result<GUID>;
    fn remove_publication(&self, writer: GUID) -> Result<()>;
    fn ignore_publication(&self, writer: GUID);
    fn update_publication_qos(&self, writer: GUID, qos: QoS) -> Result<()>;
    fn update_publication_locators(&self, writer: GUID, locators: Vec<SocketAddr>) -> Result<()>;

    fn add_subscription(
        &self,
        topic: GUID,
        qos: QoS,
        locators: Vec<SocketAddr>,
        type_info: Option<TypeInformation>,
        content_filter: Option<ContentFilterProperty>,
        callbacks: Arc<dyn DataReaderCallbacks>,
    ) -> Result<GUID>;
    fn remove_subscription(&self, reader: GUID) -> Result<()>;
    fn ignore_subscription(&self, reader: GUID);
    fn update_subscription_qos(&self, reader: GUID, qos: QoS) -> Result<()>;
    fn update_subscription_params(&self, reader: GUID, params: Vec<String>) -> Result<()>;
    fn update_subscription_locators(&self, reader: GUID, locators: Vec<SocketAddr>) -> Result<()>;

    fn ignore_participant(&self, participant: GUID);
    fn discovered_participants(&self) -> Vec<ParticipantData>;
    /// Status of a local endpoint; reading it resets the change counter.
    fn incompatible_qos_status(&self, endpoint: GUID) -> Option<IncompatibleQosStatus>;
    fn type_lookup_reply_received(&self, hash: TypeHash, object: Vec<u8>);

    /// Mirror current and future discovery state to `sink`.
    fn attach_bit(&self, sink: Arc<dyn BitSink>);
    fn detach_bit(&self);

    /// Announce departure, stop the engine thread and close the sockets.
    fn shutdown(&self);
}

/// Everything needed to start one participant.
pub(crate) struct SpdpParams {
    pub(crate) guid: GUID,
    pub(crate) domain_id: u32,
    pub(crate) qos: ParticipantQos,
    pub(crate) config: Arc<DiscoveryConfig>,
    pub(crate) factory: Arc<dyn TransportFactory>,
    pub(crate) codec: Arc<dyn DiscoveryCodec>,
    pub(crate) security: Option<Arc<dyn SecurityProvider>>,
    pub(crate) ice: Option<Arc<dyn IceAgent>>,
    pub(crate) type_lookup: Option<Arc<dyn TypeLookupService>>,
}

enum Control {
    Wake,
    Stop,
}

/// Sockets of one participant plus the codec used to fill them.
struct Links {
    codec: Arc<dyn DiscoveryCodec>,
    spdp: Arc<dyn DiscoveryTransport>,
    sedp: Arc<dyn DiscoveryTransport>,
    spdp_v6: Option<Arc<dyn DiscoveryTransport>>,
    sedp_v6: Option<Arc<dyn DiscoveryTransport>>,
    /// Receive-only multicast sockets.
    multicast: Vec<Arc<dyn DiscoveryTransport>>,
}

impl Links {
    fn transport(&self, route: Route, dest: &SocketAddr) -> &Arc<dyn DiscoveryTransport> {
        match (route, dest.is_ipv6()) {
            (Route::Spdp, true) => self.spdp_v6.as_ref().unwrap_or(&self.spdp),
            (Route::Sedp, true) => self.sedp_v6.as_ref().unwrap_or(&self.sedp),
            (Route::Spdp, false) => &self.spdp,
            (Route::Sedp, false) => &self.sedp,
        }
    }

    /// Send everything, then run the callbacks. Called without the engine lock.
    fn execute(&self, fx: Effects) {
        for out in fx.sends {
            let bytes = match self.codec.encode(&out.datagram) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::debug!("[disco] cannot encode datagram for {}: {}", out.dest, e);
                    continue;
                }
            };
            if let Err(e) = self.transport(out.route, &out.dest).send_to(&bytes, out.dest) {
                log::debug!("[disco] send to {} failed: {}", out.dest, e);
            }
        }
        for call in fx.calls {
            call();
        }
    }

    fn close(&self) {
        self.spdp.close();
        self.sedp.close();
        for t in self.spdp_v6.iter().chain(&self.sedp_v6).chain(&self.multicast) {
            t.close();
        }
    }
}

/// Running discovery of one local participant.
pub struct Spdp {
    guid: GUID,
    domain_id: u32,
    ports: DiscoveryPorts,
    engine: Arc<Mutex<Engine>>,
    links: Arc<Links>,
    control: Sender<Control>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Strong reference keeping the attached BIT sink alive.
    bit_sink: Mutex<Option<Arc<dyn BitSink>>>,
    stopped: AtomicBool,
}

struct Unicast {
    index: u16,
    spdp: Arc<dyn DiscoveryTransport>,
    sedp: Arc<dyn DiscoveryTransport>,
}

fn fixed_or(configured: SocketAddr, port: u16) -> SocketAddr {
    if configured.port() != 0 {
        configured
    } else {
        SocketAddr::new(configured.ip(), port)
    }
}

/// Bind SPDP+SEDP unicast on the first free participant index.
fn bind_unicast(
    factory: &dyn TransportFactory,
    cfg: &ConfigValues,
    domain_id: u32,
    sink: &Sender<Inbound>,
) -> Result<Unicast> {
    for index in 0..MAX_PARTICIPANT_INDEX {
        let ports = cfg.port_set(domain_id, index)?;
        let spdp_addr = fixed_or(cfg.spdp_local_address, ports.spdp_unicast);
        let sedp_addr = fixed_or(cfg.sedp_local_address, ports.sedp_unicast);

        let spdp = match factory.bind(
            &BindRequest::unicast(Channel::Spdp, spdp_addr, cfg.ttl),
            sink.clone(),
        ) {
            Ok(t) => t,
            Err(e) if is_addr_in_use(&e) && cfg.spdp_local_address.port() == 0 => continue,
            Err(e) => return Err(e),
        };
        let sedp = match factory.bind(
            &BindRequest::unicast(Channel::Sedp, sedp_addr, cfg.ttl),
            sink.clone(),
        ) {
            Ok(t) => t,
            Err(e) if is_addr_in_use(&e) && cfg.sedp_local_address.port() == 0 => {
                spdp.close();
                continue;
            }
            Err(e) => {
                spdp.close();
                return Err(e);
            }
        };
        log::debug!(
            "[spdp] domain {} participant index {}: spdp {} sedp {}",
            domain_id,
            index,
            spdp.local_addr(),
            sedp.local_addr()
        );
        return Ok(Unicast { index, spdp, sedp });
    }
    Err(Error::NoAvailableParticipantIndex(domain_id))
}

/// Join `group:port`; failure leaves the participant unicast-only.
fn bind_multicast(
    factory: &dyn TransportFactory,
    cfg: &ConfigValues,
    channel: Channel,
    group: IpAddr,
    port: u16,
    sink: &Sender<Inbound>,
) -> Option<Arc<dyn DiscoveryTransport>> {
    let any = match group {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let request = BindRequest::multicast(
        channel,
        SocketAddr::new(any, port),
        group,
        cfg.multicast_interface.clone(),
        cfg.ttl,
    );
    match factory.bind(&request, sink.clone()) {
        Ok(t) => Some(t),
        Err(e) => {
            log::warn!("[spdp] {:?} multicast {}:{} unavailable: {}", channel, group, port, e);
            None
        }
    }
}

fn bind_optional(
    factory: &dyn TransportFactory,
    channel: Channel,
    addr: Option<SocketAddr>,
    ttl: u32,
    sink: &Sender<Inbound>,
) -> Option<Arc<dyn DiscoveryTransport>> {
    let addr = addr?;
    match factory.bind(&BindRequest::unicast(channel, addr, ttl), sink.clone()) {
        Ok(t) => Some(t),
        Err(e) => {
            log::warn!("[spdp] {:?} IPv6 socket {} unavailable: {}", channel, addr, e);
            None
        }
    }
}

/// Host addresses substituted for a wildcard bind.
fn advertised(factory: &dyn TransportFactory, bound: SocketAddr) -> Vec<SocketAddr> {
    if !bound.ip().is_unspecified() {
        return vec![bound];
    }
    factory
        .local_addresses()
        .into_iter()
        .filter(|ip| ip.is_ipv4() == bound.is_ipv4())
        .map(|ip| SocketAddr::new(ip, bound.port()))
        .collect()
}

impl Spdp {
    /// Bind sockets, build the engine, queue the first announcement and start
    /// the engine thread.
    pub(crate) fn start(params: SpdpParams) -> Result<Arc<Spdp>> {
        crate::trace_fn!("Spdp::start");
        let cfg = ConfigValues::clone(&params.config.snapshot());
        cfg.validate()?;
        let factory = params.factory.as_ref();

        let identity_token = match &params.security {
            Some(security) => Some(
                security
                    .identity_token(params.guid)
                    .map_err(|e| Error::SecurityInit(e.to_string()))?,
            ),
            None => None,
        };

        let (inbound_tx, inbound_rx) = unbounded();
        let unicast = bind_unicast(factory, &cfg, params.domain_id, &inbound_tx)?;
        let ports = cfg.port_set(params.domain_id, unicast.index)?;

        let mut multicast = Vec::new();
        let spdp_group = bind_multicast(
            factory,
            &cfg,
            Channel::Spdp,
            cfg.default_multicast_group,
            ports.spdp_multicast,
            &inbound_tx,
        )
        .map(|t| {
            multicast.push(t);
            SocketAddr::new(cfg.default_multicast_group, ports.spdp_multicast)
        });
        let sedp_group = if cfg.sedp_multicast {
            bind_multicast(
                factory,
                &cfg,
                Channel::Sedp,
                cfg.default_multicast_group,
                ports.sedp_multicast,
                &inbound_tx,
            )
            .map(|t| {
                multicast.push(t);
                SocketAddr::new(cfg.default_multicast_group, ports.sedp_multicast)
            })
        } else {
            None
        };
        let spdp_v6 = bind_optional(
            factory,
            Channel::Spdp,
            cfg.ipv6_spdp_local_address,
            cfg.ttl,
            &inbound_tx,
        );
        let sedp_v6 = bind_optional(
            factory,
            Channel::Sedp,
            cfg.ipv6_sedp_local_address,
            cfg.ttl,
            &inbound_tx,
        );
        drop(inbound_tx);

        let mut local = ParticipantData::new(params.guid, params.domain_id, cfg.lease_duration);
        local.qos = params.qos;
        local.identity_token = identity_token;
        local.user_tag = cfg.spdp_user_tag;
        local.spdp_unicast = advertised(factory, unicast.spdp.local_addr());
        local.metatraffic_unicast = match cfg.sedp_advertised_address {
            Some(addr) => vec![addr],
            None => advertised(factory, unicast.sedp.local_addr()),
        };
        if let Some(t) = &spdp_v6 {
            local.spdp_unicast.extend(advertised(factory, t.local_addr()));
        }
        if let Some(t) = &sedp_v6 {
            local.metatraffic_unicast.extend(advertised(factory, t.local_addr()));
        }
        local.metatraffic_multicast = sedp_group.into_iter().collect();
        if cfg.use_rtps_relay || cfg.rtps_relay_only {
            local.flags |= PARTICIPANT_FLAG_RELAY;
        }
        if let (true, Some(ice)) = (cfg.use_ice, &params.ice) {
            local.ice_candidates = ice.local_candidates();
            ice.set_stun_server(cfg.spdp_stun_server_address);
        }

        let discovery_ports = DiscoveryPorts {
            spdp: unicast.spdp.local_addr().port(),
            sedp: unicast.sedp.local_addr().port(),
            spdp_v6: spdp_v6.as_ref().map_or(0, |t| t.local_addr().port()),
            sedp_v6: sedp_v6.as_ref().map_or(0, |t| t.local_addr().port()),
            participant_index: unicast.index,
        };
        let links = Arc::new(Links {
            codec: Arc::clone(&params.codec),
            spdp: unicast.spdp,
            sedp: unicast.sedp,
            spdp_v6,
            sedp_v6,
            multicast,
        });

        let mut engine = Engine::new(EngineSetup {
            guid: params.guid,
            domain_id: params.domain_id,
            cfg,
            codec: params.codec,
            local,
            security: params.security,
            ice: params.ice,
            type_lookup: params.type_lookup,
            spdp_multicast: spdp_group,
            sedp_multicast: sedp_group,
        });
        let first = engine.start(Instant::now());
        let engine = Arc::new(Mutex::new(engine));

        let (control_tx, control_rx) = unbounded();
        let config_rx = params.config.subscribe();
        let worker = {
            let engine = Arc::clone(&engine);
            let links = Arc::clone(&links);
            thread::Builder::new()
                .name(format!("hdds-disco-{}", params.domain_id))
                .spawn(move || run(engine, links, inbound_rx, config_rx, control_rx))
        };
        let worker = match worker {
            Ok(handle) => handle,
            Err(e) => {
                links.close();
                return Err(Error::Io(e));
            }
        };
        links.execute(first);

        log::debug!(
            "[spdp] participant {} started in domain {} (spdp {}, sedp {})",
            params.guid,
            params.domain_id,
            discovery_ports.spdp,
            discovery_ports.sedp
        );
        Ok(Arc::new(Spdp {
            guid: params.guid,
            domain_id: params.domain_id,
            ports: discovery_ports,
            engine,
            links,
            control: control_tx,
            worker: Mutex::new(Some(worker)),
            bit_sink: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Run `op` under the engine lock, then execute its effects.
    fn with_engine<T>(&self, op: impl FnOnce(&mut Engine, Instant, &mut Effects) -> T) -> T {
        let mut fx = Effects::default();
        let out = {
            let mut engine = self.engine.lock();
            op(&mut engine, Instant::now(), &mut fx)
        };
        self.links.execute(fx);
        // Timers may now be due earlier than the thread's current wait.
        let _ = self.control.send(Control::Wake);
        out
    }
}

/// Engine thread: datagrams, live config and timers until stopped.
fn run(
    engine: Arc<Mutex<Engine>>,
    links: Arc<Links>,
    inbound: Receiver<Inbound>,
    mut config: Receiver<ConfigEvent>,
    control: Receiver<Control>,
) {
    {
        let mut engine = engine.lock();
        if engine.state == SpdpState::Announcing {
            engine.state = SpdpState::Operational;
        }
    }
    loop {
        let wait = match engine.lock().timers.next_deadline() {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => IDLE_WAIT,
        };
        let mut config_closed = false;
        crossbeam::select! {
            recv(inbound) -> msg => match msg {
                Ok(inbound) => {
                    let fx = engine.lock().handle_inbound(inbound, Instant::now());
                    links.execute(fx);
                }
                Err(_) => break,
            },
            recv(config) -> event => match event {
                Ok(event) => {
                    let fx = engine.lock().apply_config(event, Instant::now());
                    links.execute(fx);
                }
                Err(_) => config_closed = true,
            },
            recv(control) -> msg => match msg {
                Ok(Control::Wake) => {}
                Ok(Control::Stop) | Err(_) => break,
            },
            default(wait) => {}
        }
        if config_closed {
            config = never();
        }
        let fx = engine.lock().on_timers(Instant::now());
        links.execute(fx);
    }
    log::debug!("[spdp] engine thread exiting");
}

impl DiscoveryEngine for Spdp {
    fn guid(&self) -> GUID {
        self.guid
    }

    fn domain_id(&self) -> u32 {
        self.domain_id
    }

    fn state(&self) -> SpdpState {
        self.engine.lock().state
    }

    fn ports(&self) -> DiscoveryPorts {
        self.ports
    }

    fn signal_liveliness(&self, kind: LivelinessKind) -> Result<()> {
        self.with_engine(|e, now, fx| e.signal_liveliness(kind, now, fx))
    }

    fn assert_topic(
        &self,
        name: &str,
        type_name: &str,
        qos: QoS,
        has_key: bool,
        callbacks: Option<Arc<dyn TopicCallbacks>>,
    ) -> Result<(GUID, TopicStatus)> {
        self.with_engine(|e, now, fx| e.assert_topic(name, type_name, qos, has_key, callbacks, now, fx))
    }

    fn find_topic(&self, name: &str) -> Option<TopicInfo> {
        self.engine.lock().find_topic(name)
    }

    fn remove_topic(&self, topic: GUID) -> Result<()> {
        self.with_engine(|e, now, fx| e.remove_topic(topic, now, fx))
    }

    fn ignore_topic(&self, topic: GUID) {
        self.with_engine(|e, _, fx| e.ignore_topic(topic, fx));
    }

    fn update_topic_qos(&self, topic: GUID, qos: QoS) -> Result<()> {
        self.with_engine(|e, now, fx| e.update_topic_qos(topic, qos, now, fx))
    }

    fn add_publication(
        &self,
        topic: GUID,
        qos: QoS,
        locators: Vec<SocketAddr>,
        type_info: Option<TypeInformation>,
        callbacks: Arc<dyn DataWriterCallbacks>,
    ) -> Result<GUID> {
        self.with_engine(|e, now, fx| {
            e.add_publication(topic, qos, locators, type_info, callbacks, now, fx)
        })
    }

    fn remove_publication(&self, writer: GUID) -> Result<()> {
        self.with_engine(|e, now, fx| e.remove_publication(writer, now, fx))
    }

    fn ignore_publication(&self, writer: GUID) {
        self.with_engine(|e, _, fx| e.ignore_publication(writer, fx));
    }

    fn update_publication_qos(&self, writer: GUID, qos: QoS) -> Result<()> {
        self.with_engine(|e, now, fx| e.update_publication_qos(writer, qos, now, fx))
    }

    fn update_publication_locators(&self, writer: GUID, locators: Vec<SocketAddr>) -> Result<()> {
        self.with_engine(|e, now, fx| e.update_publication_locators(writer, locators, now, fx))
    }

    fn add_subscription(
        &self,
        topic: GUID,
        qos: QoS,
        locators: Vec<SocketAddr>,
        type_info: Option<TypeInformation>,
        content_filter: Option<ContentFilterProperty>,
        callbacks: Arc<dyn DataReaderCallbacks>,
    ) -> Result<GUID> {
        self.with_engine(|e, now, fx| {
            e.add_subscription(topic, qos, locators, type_info, content_filter, callbacks, now, fx)
        })
    }

    fn remove_subscription(&self, reader: GUID) -> Result<()> {
        self.with_engine(|e, now, fx| e.remove_subscription(reader, now, fx))
    }

    fn ignore_subscription(&self, reader: GUID) {
        self.with_engine(|e, _, fx| e.ignore_subscription(reader, fx));
    }

    fn update_subscription_qos(&self, reader: GUID, qos: QoS) -> Result<()> {
        self.with_engine(|e, now, fx| e.update_subscription_qos(reader, qos, now, fx))
    }

    fn update_subscription_params(&self, reader: GUID, params: Vec<String>) -> Result<()> {
        self.with_engine(|e, now, fx| e.update_subscription_params(reader, params, now, fx))
    }

    fn update_subscription_locators(&self, reader: GUID, locators: Vec<SocketAddr>) -> Result<()> {
        self.with_engine(|e, now, fx| e.update_subscription_locators(reader, locators, now, fx))
    }

    fn ignore_participant(&self, participant: GUID) {
        self.with_engine(|e, _, fx| e.ignore_participant(participant, fx));
    }

    fn discovered_participants(&self) -> Vec<ParticipantData> {
        self.engine.lock().discovered_participants()
    }

    fn incompatible_qos_status(&self, endpoint: GUID) -> Option<IncompatibleQosStatus> {
        self.engine.lock().sedp.take_incompatible_status(&endpoint)
    }

    fn type_lookup_reply_received(&self, hash: TypeHash, object: Vec<u8>) {
        self.with_engine(|e, now, fx| e.type_lookup_reply_received(hash, object, now, fx));
    }

    fn attach_bit(&self, sink: Arc<dyn BitSink>) {
        self.with_engine(|e, _, fx| {
            e.bit.attach(&sink);
            e.bit_snapshot(fx);
        });
        *self.bit_sink.lock() = Some(sink);
    }

    fn detach_bit(&self) {
        self.engine.lock().bit.detach();
        self.bit_sink.lock().take();
    }

    fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let fx = self.engine.lock().shutdown();
        self.links.execute(fx);
        let _ = self.control.send(Control::Stop);
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                log::error!("[spdp] engine thread of {} panicked", self.guid);
            }
        }
        self.links.close();
        self.engine.lock().state = SpdpState::Terminated;
        self.bit_sink.lock().take();
        log::debug!("[spdp] participant {} terminated", self.guid);
    }
}

impl Drop for Spdp {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PlCodec;
    use crate::transport::MemoryNetwork;

    fn params(network: &MemoryNetwork, config: &Arc<DiscoveryConfig>, prefix: u8) -> SpdpParams {
        SpdpParams {
            guid: GUID::participant([prefix; 12]),
            domain_id: 0,
            qos: ParticipantQos::default(),
            config: Arc::clone(config),
            factory: Arc::new(network.clone()),
            codec: Arc::new(PlCodec),
            security: None,
            ice: None,
            type_lookup: None,
        }
    }

    #[test]
    fn test_participant_index_probing() {
        let network = MemoryNetwork::new();
        let config = Arc::new(DiscoveryConfig::default());
        let a = Spdp::start(params(&network, &config, 1)).unwrap();
        let b = Spdp::start(params(&network, &config, 2)).unwrap();

        assert_eq!(a.ports().participant_index, 0);
        assert_eq!(a.ports().spdp, 7410);
        assert_eq!(a.ports().sedp, 7412);
        assert!(b.ports().participant_index > 0);
        assert_ne!(a.ports().spdp, b.ports().spdp);
        assert_ne!(a.ports().sedp, b.ports().spdp);
    }

    #[test]
    fn test_fixed_port_conflict_is_fatal() {
        let network = MemoryNetwork::new();
        let config = Arc::new(DiscoveryConfig::default());
        config.set_spdp_local_address("0.0.0.0:9000".parse().unwrap());
        let _a = Spdp::start(params(&network, &config, 1)).unwrap();
        let err = Spdp::start(params(&network, &config, 2)).err().unwrap();
        assert!(is_addr_in_use(&err));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let network = MemoryNetwork::new();
        let config = Arc::new(DiscoveryConfig::default());
        let a = Spdp::start(params(&network, &config, 1)).unwrap();
        assert!(matches!(a.state(), SpdpState::Announcing | SpdpState::Operational));
        a.shutdown();
        a.shutdown();
        assert_eq!(a.state(), SpdpState::Terminated);
        assert_eq!(network.bound_count(), 0);
        assert!(matches!(
            a.assert_topic("T", "X", QoS::default(), true, None),
            Err(Error::InvalidState(_))
        ));
    }
}
