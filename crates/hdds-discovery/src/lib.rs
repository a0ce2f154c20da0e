// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hdds-discovery - RTPS participant and endpoint discovery
//!
//! Brokerless discovery for publish/subscribe participants: SPDP announces
//! participants and tracks their leases, SEDP reliably exchanges topic and
//! endpoint records with every admitted peer and matches writers with
//! readers (QoS request/offer rules, XTypes compatibility, content filters).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hdds_discovery::{DiscoveryConfig, ParticipantQos, QoS, RtpsDiscovery};
//!
//! let disco = RtpsDiscovery::new("app", DiscoveryConfig::default());
//! let (participant, _) = disco.add_domain_participant(0, ParticipantQos::default(), None);
//! let (topic, _) = disco
//!     .assert_topic(0, participant, "sensors/temperature", "Temperature", QoS::reliable(), true, None)
//!     .unwrap();
//! # let _ = topic;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  RtpsDiscovery (facade)   DiscoveryRegistry   DiscoveryConfig       |
//! +---------------------------------------------------------------------+
//! |  Spdp: one engine thread per local participant                      |
//! |    announce / lease table / auth  ->  SEDP sessions / matching      |
//! +---------------------------------------------------------------------+
//! |  DiscoveryCodec (PlCodec)          TransportFactory (UDP, memory)   |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`facade`] - per-strategy entry point, routes calls to engines
//! - [`config`] - shared settings and the live-update event bus
//! - [`spdp`] / [`sedp`] - the two discovery protocols
//! - [`protocol`] - records, datagrams, codec and fragmentation
//! - [`transport`] - UDP and in-memory datagram sockets
//! - [`callbacks`] - entity-layer, type lookup, security and ICE boundaries
//! - [`bit`] - built-in topic mirroring

pub mod bit;
pub mod callbacks;
pub mod config;
pub mod core;
mod error;
pub mod facade;
pub mod filter;
pub mod logging;
pub mod protocol;
pub mod qos;
pub mod registry;
pub mod sedp;
pub mod spdp;
pub mod transport;

pub use bit::{BitCache, BitKind, BitSample, BitSink, InstanceState};
pub use callbacks::{
    DataReaderCallbacks, DataWriterCallbacks, HandshakeStep, IceAgent, ReaderAssociation,
    SecurityProvider, TopicCallbacks, TypeLookupService, TypeObjectRegistry, WriterAssociation,
};
pub use config::{ConfigEvent, ConfigValues, DiscoveryConfig, XTypesMode};
pub use crate::core::{EntityKind, GuidGenerator, GuidPrefix, GUID};
pub use error::{Error, Result};
pub use facade::{RtpsDiscovery, DEFAULT_DISCOVERY_KEY};
pub use filter::{ContentFilterProperty, FieldValue, FilterError};
pub use protocol::{ParticipantData, PublicationData, SubscriptionData, TopicData, TypeInformation};
pub use qos::{IncompatibleQosStatus, LivelinessKind, ParticipantQos, QoS, QosPolicyId};
pub use registry::DiscoveryRegistry;
pub use sedp::{TopicInfo, TopicStatus};
pub use spdp::{DiscoveryEngine, DiscoveryPorts, SpdpState};
pub use transport::{MemoryNetwork, TransportFactory, UdpTransportFactory};
