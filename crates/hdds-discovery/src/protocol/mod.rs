// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery wire model: records, datagrams, codec and fragmentation.

mod codec;
mod fragment;
mod message;
pub mod params;
mod types;

pub use codec::{DiscoveryCodec, PlCodec};
pub use fragment::{split_payload, FragmentBuffer, DEFAULT_MAX_PENDING};
pub use message::{Datagram, Payload, Submessage};
#[cfg(feature = "xtypes")]
pub use types::hash_type_object;
pub use types::{
    builtin_endpoints, ParticipantData, ParticipantMessageData, PublicationData,
    SubscriptionData, TopicData, TypeHash, TypeInformation, PARTICIPANT_FLAG_RELAY,
};
