// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram encoding.
//!
//! ```text
//! +------+---------+--------+----------------+
//! | RTPS | ver 2.4 | vendor | sender prefix  |   20-byte header
//! +------+---------+--------+----------------+
//! | id | flags | len u16 | body (4-aligned)  |   repeated submessages
//! +----+-------+---------+-------------------+
//! ```
//!
//! DATA payloads are an encapsulation header (PL_CDR_LE) followed by a
//! parameter list. The payload type follows from the writer entity id; a
//! STATUS_INFO with dispose/unregister bits turns the sample into a dispose.

use super::message::{Datagram, Payload, Submessage};
use super::params::*;
use super::types::{
    ParticipantData, ParticipantMessageData, PublicationData, SubscriptionData, TopicData,
    TypeHash, TypeInformation,
};
use crate::core::*;
use crate::filter::ContentFilterProperty;
use crate::qos::{
    DestinationOrder, Durability, History, Liveliness, LivelinessKind, OwnershipKind,
    ParticipantQos, QoS, Reliability,
};
use crate::{Error, Result};
use std::time::Duration;

const MAGIC: &[u8; 4] = b"RTPS";
const PROTOCOL_VERSION: [u8; 2] = [2, 4];
const HEADER_LEN: usize = 20;
const ENCAPSULATION_PL_CDR_LE: [u8; 4] = [0x00, 0x03, 0x00, 0x00];
const FLAG_LITTLE_ENDIAN: u8 = 0x01;

const SUBMSG_ACKNACK: u8 = 0x06;
const SUBMSG_HEARTBEAT: u8 = 0x07;
const SUBMSG_GAP: u8 = 0x08;
const SUBMSG_DATA: u8 = 0x15;
const SUBMSG_DATA_FRAG: u8 = 0x16;
const SUBMSG_HDDS_HANDSHAKE: u8 = 0x80;
const SUBMSG_HDDS_TL_REQUEST: u8 = 0x81;
const SUBMSG_HDDS_TL_REPLY: u8 = 0x82;

/// Participant lease assumed when the announcement omits one.
const DEFAULT_PARTICIPANT_LEASE: Duration = Duration::from_secs(100);

/// Wire encoding seam used by the engines.
pub trait DiscoveryCodec: Send + Sync {
    fn encode(&self, datagram: &Datagram) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Datagram>;
    /// Serialized form of a DATA payload (what DATA_FRAG splits).
    fn encode_payload(&self, payload: &Payload) -> Vec<u8>;
    fn decode_payload(&self, writer: [u8; 4], bytes: &[u8]) -> Result<Payload>;
}

/// Parameter-list codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlCodec;

impl DiscoveryCodec for PlCodec {
    fn encode(&self, datagram: &Datagram) -> Result<Vec<u8>> {
        crate::trace_fn!("PlCodec::encode");
        let mut out = Writer::new();
        out.bytes(MAGIC)
            .bytes(&PROTOCOL_VERSION)
            .bytes(&datagram.vendor_id)
            .bytes(&datagram.sender);

        for sub in &datagram.submessages {
            let (id, body) = self.encode_submessage(sub);
            if body.len() > usize::from(u16::MAX) {
                return Err(Error::MessageTooLarge {
                    size: body.len(),
                    limit: usize::from(u16::MAX),
                });
            }
            out.u8(id)
                .u8(FLAG_LITTLE_ENDIAN)
                .u16(body.len() as u16)
                .bytes(&body);
        }
        Ok(out.into_inner())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Datagram> {
        crate::trace_fn!("PlCodec::decode");
        if bytes.len() < HEADER_LEN {
            return Err(Error::Malformed(format!("datagram of {} bytes", bytes.len())));
        }
        let mut c = Cursor::new(bytes);
        if c.take(4)? != MAGIC {
            return Err(Error::Malformed("bad magic".to_string()));
        }
        let version: [u8; 2] = c.array()?;
        if version[0] != PROTOCOL_VERSION[0] {
            return Err(Error::Malformed(format!("protocol version {:?}", version)));
        }
        let vendor_id: [u8; 2] = c.array()?;
        let sender: GuidPrefix = c.array()?;

        let mut submessages = Vec::new();
        while c.remaining() >= 4 {
            let id = c.u8()?;
            let flags = c.u8()?;
            let len = c.u16()? as usize;
            let body = c.take(len)?;
            if flags & FLAG_LITTLE_ENDIAN == 0 {
                return Err(Error::Malformed("big-endian submessage".to_string()));
            }
            if let Some(sub) = self.decode_submessage(id, body)? {
                submessages.push(sub);
            }
        }

        Ok(Datagram {
            sender,
            vendor_id,
            submessages,
        })
    }

    fn encode_payload(&self, payload: &Payload) -> Vec<u8> {
        let mut pl = ParamListWriter::new();
        match payload {
            Payload::Participant(p) => write_participant(&mut pl, p),
            Payload::ParticipantDispose(key) | Payload::EndpointDispose(key) => {
                pl.param(PID_KEY_HASH, |v| {
                    v.guid(key);
                });
                pl.param(PID_STATUS_INFO, |v| {
                    v.u32(STATUS_INFO_DISPOSED | STATUS_INFO_UNREGISTERED);
                });
            }
            Payload::Topic(t) => {
                pl.param(PID_ENDPOINT_GUID, |v| {
                    v.guid(&t.guid);
                });
                write_names(&mut pl, &t.name, &t.type_name);
                write_qos(&mut pl, &t.qos);
            }
            Payload::Publication(p) => {
                write_endpoint_header(&mut pl, &p.guid, &p.participant_guid, &p.topic_name, &p.type_name);
                write_qos(&mut pl, &p.qos);
                write_endpoint_tail(&mut pl, &p.locators, p.type_info.as_ref());
            }
            Payload::Subscription(s) => {
                write_endpoint_header(&mut pl, &s.guid, &s.participant_guid, &s.topic_name, &s.type_name);
                write_qos(&mut pl, &s.qos);
                write_endpoint_tail(&mut pl, &s.locators, s.type_info.as_ref());
                if let Some(cf) = &s.content_filter {
                    pl.param(PID_CONTENT_FILTER_PROPERTY, |v| {
                        v.string(&cf.content_filtered_topic_name)
                            .string(&cf.related_topic_name)
                            .string(&cf.filter_class_name)
                            .string(&cf.filter_expression)
                            .string_seq(&cf.expression_parameters);
                    });
                }
            }
            Payload::ParticipantMessage(m) => {
                pl.param(PID_PARTICIPANT_GUID, |v| {
                    v.guid(&m.participant);
                });
                pl.param(PID_HDDS_LIVELINESS_KIND, |v| {
                    v.u32(liveliness_kind_code(m.kind));
                });
            }
        }

        let mut out = ENCAPSULATION_PL_CDR_LE.to_vec();
        out.extend(pl.finish());
        out
    }

    fn decode_payload(&self, writer: [u8; 4], bytes: &[u8]) -> Result<Payload> {
        if bytes.len() < 4 || bytes[0..2] != ENCAPSULATION_PL_CDR_LE[0..2] {
            return Err(Error::Malformed("payload is not PL_CDR_LE".to_string()));
        }
        let params = read_param_list(&bytes[4..])?;

        let status = find(&params, PID_STATUS_INFO)
            .map(|v| Cursor::new(v).u32())
            .transpose()?
            .unwrap_or(0);
        if status & (STATUS_INFO_DISPOSED | STATUS_INFO_UNREGISTERED) != 0 {
            let key = require(&params, PID_KEY_HASH)
                .and_then(|v| Cursor::new(v).guid())?;
            return Ok(if writer == ENTITYID_SPDP_WRITER {
                Payload::ParticipantDispose(key)
            } else {
                Payload::EndpointDispose(key)
            });
        }

        match writer {
            ENTITYID_SPDP_WRITER => Ok(Payload::Participant(Box::new(read_participant(&params)?))),
            ENTITYID_SEDP_TOPICS_WRITER => {
                let (name, type_name) = read_names(&params)?;
                Ok(Payload::Topic(TopicData {
                    guid: require(&params, PID_ENDPOINT_GUID).and_then(|v| Cursor::new(v).guid())?,
                    name,
                    type_name,
                    qos: read_qos(&params)?,
                }))
            }
            ENTITYID_SEDP_PUBLICATIONS_WRITER => {
                let (guid, participant_guid, topic_name, type_name) = read_endpoint_header(&params)?;
                Ok(Payload::Publication(PublicationData {
                    guid,
                    participant_guid,
                    topic_name,
                    type_name,
                    qos: read_qos(&params)?,
                    locators: read_locators(&params, PID_UNICAST_LOCATOR)?,
                    type_info: read_type_info(&params)?,
                }))
            }
            ENTITYID_SEDP_SUBSCRIPTIONS_WRITER => {
                let (guid, participant_guid, topic_name, type_name) = read_endpoint_header(&params)?;
                let content_filter = find(&params, PID_CONTENT_FILTER_PROPERTY)
                    .map(|v| {
                        let mut c = Cursor::new(v);
                        Ok::<_, Error>(ContentFilterProperty {
                            content_filtered_topic_name: c.string()?,
                            related_topic_name: c.string()?,
                            filter_class_name: c.string()?,
                            filter_expression: c.string()?,
                            expression_parameters: c.string_seq()?,
                        })
                    })
                    .transpose()?;
                Ok(Payload::Subscription(SubscriptionData {
                    guid,
                    participant_guid,
                    topic_name,
                    type_name,
                    qos: read_qos(&params)?,
                    locators: read_locators(&params, PID_UNICAST_LOCATOR)?,
                    type_info: read_type_info(&params)?,
                    content_filter,
                }))
            }
            ENTITYID_P2P_MESSAGE_WRITER => Ok(Payload::ParticipantMessage(ParticipantMessageData {
                participant: require(&params, PID_PARTICIPANT_GUID)
                    .and_then(|v| Cursor::new(v).guid())?,
                kind: liveliness_kind_from(
                    require(&params, PID_HDDS_LIVELINESS_KIND).and_then(|v| Cursor::new(v).u32())?,
                )?,
            })),
            other => Err(Error::Malformed(format!("DATA from unknown writer {:02x?}", other))),
        }
    }
}

impl PlCodec {
    fn encode_submessage(&self, sub: &Submessage) -> (u8, Vec<u8>) {
        let mut w = Writer::new();
        let id = match sub {
            Submessage::Data {
                reader,
                writer,
                seq,
                payload,
            } => {
                w.bytes(reader).bytes(writer).u64(*seq);
                w.bytes(&self.encode_payload(payload));
                SUBMSG_DATA
            }
            Submessage::DataFrag {
                reader,
                writer,
                seq,
                fragment,
                total_fragments,
                sample_size,
                bytes,
            } => {
                w.bytes(reader)
                    .bytes(writer)
                    .u64(*seq)
                    .u32(*fragment)
                    .u32(*total_fragments)
                    .u32(*sample_size)
                    .octets(bytes);
                SUBMSG_DATA_FRAG
            }
            Submessage::Heartbeat {
                reader,
                writer,
                first,
                last,
                count,
            } => {
                w.bytes(reader).bytes(writer).u64(*first).u64(*last).u32(*count);
                SUBMSG_HEARTBEAT
            }
            Submessage::AckNack {
                reader,
                writer,
                base,
                missing,
                count,
            } => {
                w.bytes(reader)
                    .bytes(writer)
                    .u64(*base)
                    .u32(*count)
                    .u32(missing.len() as u32);
                for seq in missing {
                    w.u64(*seq);
                }
                SUBMSG_ACKNACK
            }
            Submessage::Gap {
                reader,
                writer,
                start,
                end,
            } => {
                w.bytes(reader).bytes(writer).u64(*start).u64(*end);
                SUBMSG_GAP
            }
            Submessage::Handshake { destination, token } => {
                w.bytes(destination).octets(token);
                SUBMSG_HDDS_HANDSHAKE
            }
            Submessage::TypeLookupRequest {
                destination,
                request_id,
                hashes,
            } => {
                w.bytes(destination).u64(*request_id).u32(hashes.len() as u32);
                for hash in hashes {
                    w.bytes(hash);
                }
                SUBMSG_HDDS_TL_REQUEST
            }
            Submessage::TypeLookupReply {
                destination,
                request_id,
                types,
            } => {
                w.bytes(destination).u64(*request_id).u32(types.len() as u32);
                for (hash, object) in types {
                    w.bytes(hash).octets(object);
                }
                SUBMSG_HDDS_TL_REPLY
            }
        };
        w.align(4);
        (id, w.into_inner())
    }

    fn decode_submessage(&self, id: u8, body: &[u8]) -> Result<Option<Submessage>> {
        let mut c = Cursor::new(body);
        let sub = match id {
            SUBMSG_DATA => {
                let reader = c.array()?;
                let writer = c.array()?;
                let seq = c.u64()?;
                let payload = self.decode_payload(writer, c.rest())?;
                Submessage::Data {
                    reader,
                    writer,
                    seq,
                    payload,
                }
            }
            SUBMSG_DATA_FRAG => {
                let sub = Submessage::DataFrag {
                    reader: c.array()?,
                    writer: c.array()?,
                    seq: c.u64()?,
                    fragment: c.u32()?,
                    total_fragments: c.u32()?,
                    sample_size: c.u32()?,
                    bytes: c.octets()?,
                };
                if let Submessage::DataFrag {
                    fragment,
                    total_fragments,
                    ..
                } = &sub
                {
                    if *fragment == 0 || fragment > total_fragments {
                        return Err(Error::Malformed(format!(
                            "fragment {}/{}",
                            fragment, total_fragments
                        )));
                    }
                }
                sub
            }
            SUBMSG_HEARTBEAT => Submessage::Heartbeat {
                reader: c.array()?,
                writer: c.array()?,
                first: c.u64()?,
                last: c.u64()?,
                count: c.u32()?,
            },
            SUBMSG_ACKNACK => {
                let reader = c.array()?;
                let writer = c.array()?;
                let base = c.u64()?;
                let count = c.u32()?;
                let n = c.u32()? as usize;
                if n * 8 > c.remaining() {
                    return Err(Error::Malformed(format!("ACKNACK with {} missing", n)));
                }
                let missing = (0..n).map(|_| c.u64()).collect::<Result<Vec<_>>>()?;
                Submessage::AckNack {
                    reader,
                    writer,
                    base,
                    missing,
                    count,
                }
            }
            SUBMSG_GAP => Submessage::Gap {
                reader: c.array()?,
                writer: c.array()?,
                start: c.u64()?,
                end: c.u64()?,
            },
            SUBMSG_HDDS_HANDSHAKE => Submessage::Handshake {
                destination: c.array()?,
                token: c.octets()?,
            },
            SUBMSG_HDDS_TL_REQUEST => {
                let destination = c.array()?;
                let request_id = c.u64()?;
                let n = c.u32()? as usize;
                if n * 14 > c.remaining() {
                    return Err(Error::Malformed(format!("type lookup of {} hashes", n)));
                }
                let hashes = (0..n)
                    .map(|_| c.array::<14>())
                    .collect::<Result<Vec<TypeHash>>>()?;
                Submessage::TypeLookupRequest {
                    destination,
                    request_id,
                    hashes,
                }
            }
            SUBMSG_HDDS_TL_REPLY => {
                let destination = c.array()?;
                let request_id = c.u64()?;
                let n = c.u32()? as usize;
                if n * 18 > c.remaining() {
                    return Err(Error::Malformed(format!("type lookup reply of {} types", n)));
                }
                let mut types = Vec::with_capacity(n);
                for _ in 0..n {
                    let hash: TypeHash = c.array()?;
                    types.push((hash, c.octets()?));
                }
                Submessage::TypeLookupReply {
                    destination,
                    request_id,
                    types,
                }
            }
            other => {
                log::debug!("[codec] skipping submessage id 0x{:02x}", other);
                return Ok(None);
            }
        };
        Ok(Some(sub))
    }
}

fn find<'a>(params: &[(u16, &'a [u8])], pid: u16) -> Option<&'a [u8]> {
    params.iter().find(|(p, _)| *p == pid).map(|(_, v)| *v)
}

fn require<'a>(params: &[(u16, &'a [u8])], pid: u16) -> Result<&'a [u8]> {
    find(params, pid).ok_or_else(|| Error::Malformed(format!("missing parameter 0x{:04x}", pid)))
}

fn read_locators(params: &[(u16, &[u8])], pid: u16) -> Result<Vec<std::net::SocketAddr>> {
    params
        .iter()
        .filter(|(p, _)| *p == pid)
        .map(|(_, v)| Cursor::new(v).locator())
        .collect()
}

fn write_names(pl: &mut ParamListWriter, topic: &str, type_name: &str) {
    pl.param(PID_TOPIC_NAME, |v| {
        v.string(topic);
    });
    pl.param(PID_TYPE_NAME, |v| {
        v.string(type_name);
    });
}

fn read_names(params: &[(u16, &[u8])]) -> Result<(String, String)> {
    Ok((
        require(params, PID_TOPIC_NAME).and_then(|v| Cursor::new(v).string())?,
        require(params, PID_TYPE_NAME).and_then(|v| Cursor::new(v).string())?,
    ))
}

fn write_endpoint_header(
    pl: &mut ParamListWriter,
    guid: &GUID,
    participant: &GUID,
    topic: &str,
    type_name: &str,
) {
    pl.param(PID_ENDPOINT_GUID, |v| {
        v.guid(guid);
    });
    pl.param(PID_PARTICIPANT_GUID, |v| {
        v.guid(participant);
    });
    write_names(pl, topic, type_name);
}

fn read_endpoint_header(params: &[(u16, &[u8])]) -> Result<(GUID, GUID, String, String)> {
    let guid = require(params, PID_ENDPOINT_GUID).and_then(|v| Cursor::new(v).guid())?;
    let participant = match find(params, PID_PARTICIPANT_GUID) {
        Some(v) => Cursor::new(v).guid()?,
        None => guid.participant_guid(),
    };
    let (topic, type_name) = read_names(params)?;
    Ok((guid, participant, topic, type_name))
}

fn write_endpoint_tail(
    pl: &mut ParamListWriter,
    locators: &[std::net::SocketAddr],
    type_info: Option<&TypeInformation>,
) {
    for addr in locators {
        pl.param(PID_UNICAST_LOCATOR, |v| {
            v.locator(addr);
        });
    }
    if let Some(ti) = type_info {
        pl.param(PID_TYPE_INFORMATION, |v| {
            let flags = u32::from(ti.minimal.is_some()) | (u32::from(ti.complete.is_some()) << 1);
            v.u32(flags);
            if let Some(h) = &ti.minimal {
                v.bytes(h);
            }
            if let Some(h) = &ti.complete {
                v.bytes(h);
            }
        });
    }
}

fn read_type_info(params: &[(u16, &[u8])]) -> Result<Option<TypeInformation>> {
    let Some(value) = find(params, PID_TYPE_INFORMATION) else {
        return Ok(None);
    };
    let mut c = Cursor::new(value);
    let flags = c.u32()?;
    let minimal = if flags & 1 != 0 { Some(c.array()?) } else { None };
    let complete = if flags & 2 != 0 { Some(c.array()?) } else { None };
    Ok(Some(TypeInformation { minimal, complete }))
}

fn liveliness_kind_code(kind: LivelinessKind) -> u32 {
    match kind {
        LivelinessKind::Automatic => 0,
        LivelinessKind::ManualByParticipant => 1,
        LivelinessKind::ManualByTopic => 2,
    }
}

fn liveliness_kind_from(code: u32) -> Result<LivelinessKind> {
    match code {
        0 => Ok(LivelinessKind::Automatic),
        1 => Ok(LivelinessKind::ManualByParticipant),
        2 => Ok(LivelinessKind::ManualByTopic),
        other => Err(Error::Malformed(format!("liveliness kind {}", other))),
    }
}

fn write_qos(pl: &mut ParamListWriter, qos: &QoS) {
    pl.param(PID_RELIABILITY, |v| {
        v.u32(match qos.reliability {
            Reliability::BestEffort => 1,
            Reliability::Reliable => 2,
        })
        .duration(Duration::from_millis(100));
    });
    pl.param(PID_DURABILITY, |v| {
        v.u32(qos.durability as u32);
    });
    pl.param(PID_HISTORY, |v| {
        match qos.history {
            History::KeepLast(depth) => v.u32(0).u32(depth),
            History::KeepAll => v.u32(1).u32(0),
        };
    });
    pl.param(PID_DEADLINE, |v| {
        v.duration(qos.deadline);
    });
    pl.param(PID_LIVELINESS, |v| {
        v.u32(liveliness_kind_code(qos.liveliness.kind))
            .duration(qos.liveliness.lease_duration);
    });
    pl.param(PID_OWNERSHIP, |v| {
        v.u32(match qos.ownership {
            OwnershipKind::Shared => 0,
            OwnershipKind::Exclusive => 1,
        });
    });
    pl.param(PID_DESTINATION_ORDER, |v| {
        v.u32(qos.destination_order as u32);
    });
    if !qos.partition.is_empty() {
        pl.param(PID_PARTITION, |v| {
            v.string_seq(&qos.partition);
        });
    }
    if !qos.user_data.is_empty() {
        pl.param(PID_USER_DATA, |v| {
            v.octets(&qos.user_data);
        });
    }
    if !qos.topic_data.is_empty() {
        pl.param(PID_TOPIC_DATA, |v| {
            v.octets(&qos.topic_data);
        });
    }
}

fn read_qos(params: &[(u16, &[u8])]) -> Result<QoS> {
    let mut qos = QoS::default();
    for (pid, value) in params {
        let mut c = Cursor::new(value);
        match *pid {
            PID_RELIABILITY => {
                qos.reliability = match c.u32()? {
                    1 => Reliability::BestEffort,
                    2 => Reliability::Reliable,
                    other => return Err(Error::Malformed(format!("reliability kind {}", other))),
                }
            }
            PID_DURABILITY => {
                qos.durability = match c.u32()? {
                    0 => Durability::Volatile,
                    1 => Durability::TransientLocal,
                    2 => Durability::Transient,
                    3 => Durability::Persistent,
                    other => return Err(Error::Malformed(format!("durability kind {}", other))),
                }
            }
            PID_HISTORY => {
                let kind = c.u32()?;
                let depth = c.u32()?;
                qos.history = if kind == 1 {
                    History::KeepAll
                } else {
                    History::KeepLast(depth)
                };
            }
            PID_DEADLINE => qos.deadline = c.duration()?,
            PID_LIVELINESS => {
                qos.liveliness = Liveliness {
                    kind: liveliness_kind_from(c.u32()?)?,
                    lease_duration: c.duration()?,
                }
            }
            PID_OWNERSHIP => {
                qos.ownership = if c.u32()? == 1 {
                    OwnershipKind::Exclusive
                } else {
                    OwnershipKind::Shared
                }
            }
            PID_DESTINATION_ORDER => {
                qos.destination_order = if c.u32()? == 1 {
                    DestinationOrder::BySourceTimestamp
                } else {
                    DestinationOrder::ByReceptionTimestamp
                }
            }
            PID_PARTITION => qos.partition = c.string_seq()?,
            PID_USER_DATA => qos.user_data = c.octets()?,
            PID_TOPIC_DATA => qos.topic_data = c.octets()?,
            _ => {}
        }
    }
    Ok(qos)
}

fn write_participant(pl: &mut ParamListWriter, p: &ParticipantData) {
    pl.param(PID_PROTOCOL_VERSION, |v| {
        v.bytes(&PROTOCOL_VERSION);
    });
    pl.param(PID_VENDORID, |v| {
        v.bytes(&p.vendor_id);
    });
    pl.param(PID_PARTICIPANT_GUID, |v| {
        v.guid(&p.guid);
    });
    pl.param(PID_DOMAIN_ID, |v| {
        v.u32(p.domain_id);
    });
    pl.param(PID_PARTICIPANT_LEASE_DURATION, |v| {
        v.duration(p.lease_duration);
    });
    pl.param(PID_BUILTIN_ENDPOINT_SET, |v| {
        v.u32(p.builtin_endpoints);
    });
    let locator_sets = [
        (PID_METATRAFFIC_UNICAST_LOCATOR, &p.metatraffic_unicast),
        (PID_METATRAFFIC_MULTICAST_LOCATOR, &p.metatraffic_multicast),
        (PID_DEFAULT_UNICAST_LOCATOR, &p.default_unicast),
        (PID_DEFAULT_MULTICAST_LOCATOR, &p.default_multicast),
        (PID_HDDS_SPDP_UNICAST_LOCATOR, &p.spdp_unicast),
        (PID_HDDS_ICE_CANDIDATE, &p.ice_candidates),
    ];
    for (pid, addrs) in locator_sets {
        for addr in addrs {
            pl.param(pid, |v| {
                v.locator(addr);
            });
        }
    }
    if !p.qos.user_data.is_empty() {
        pl.param(PID_USER_DATA, |v| {
            v.octets(&p.qos.user_data);
        });
    }
    pl.param(PID_HDDS_LIVELINESS_KIND, |v| {
        v.u32(liveliness_kind_code(p.qos.liveliness));
    });
    if let Some(token) = &p.identity_token {
        pl.param(PID_IDENTITY_TOKEN, |v| {
            v.octets(token);
        });
    }
    if p.user_tag != 0 {
        pl.param(PID_HDDS_USER_TAG, |v| {
            v.u32(p.user_tag);
        });
    }
    if p.flags != 0 {
        pl.param(PID_HDDS_PARTICIPANT_FLAGS, |v| {
            v.u32(p.flags);
        });
    }
}

fn read_participant(params: &[(u16, &[u8])]) -> Result<ParticipantData> {
    let guid = require(params, PID_PARTICIPANT_GUID).and_then(|v| Cursor::new(v).guid())?;
    let mut data = ParticipantData::new(guid, 0, DEFAULT_PARTICIPANT_LEASE);
    let mut qos = ParticipantQos::default();

    for (pid, value) in params {
        let mut c = Cursor::new(value);
        match *pid {
            PID_VENDORID => data.vendor_id = c.array()?,
            PID_DOMAIN_ID => data.domain_id = c.u32()?,
            PID_PARTICIPANT_LEASE_DURATION => data.lease_duration = c.duration()?,
            PID_BUILTIN_ENDPOINT_SET => data.builtin_endpoints = c.u32()?,
            PID_METATRAFFIC_UNICAST_LOCATOR => data.metatraffic_unicast.push(c.locator()?),
            PID_METATRAFFIC_MULTICAST_LOCATOR => data.metatraffic_multicast.push(c.locator()?),
            PID_DEFAULT_UNICAST_LOCATOR => data.default_unicast.push(c.locator()?),
            PID_DEFAULT_MULTICAST_LOCATOR => data.default_multicast.push(c.locator()?),
            PID_HDDS_SPDP_UNICAST_LOCATOR => data.spdp_unicast.push(c.locator()?),
            PID_HDDS_ICE_CANDIDATE => data.ice_candidates.push(c.locator()?),
            PID_USER_DATA => qos.user_data = c.octets()?,
            PID_HDDS_LIVELINESS_KIND => qos.liveliness = liveliness_kind_from(c.u32()?)?,
            PID_IDENTITY_TOKEN => data.identity_token = Some(c.octets()?),
            PID_HDDS_USER_TAG => data.user_tag = c.u32()?,
            PID_HDDS_PARTICIPANT_FLAGS => data.flags = c.u32()?,
            _ => {}
        }
    }

    data.qos = qos;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::ParticipantData;

    fn sample_subscription() -> SubscriptionData {
        let prefix = [9u8; 12];
        SubscriptionData {
            guid: GUID::entity(prefix, 1, EntityKind::ReaderWithKey),
            participant_guid: GUID::participant(prefix),
            topic_name: "T".to_string(),
            type_name: "X".to_string(),
            qos: QoS::reliable().partition(["a"]).keep_last(4),
            locators: vec!["10.0.0.2:7411".parse().unwrap()],
            type_info: Some(TypeInformation::new(Some([1; 14]), None)),
            content_filter: Some(ContentFilterProperty::sql(
                "cft",
                "T",
                "key > %0",
                vec!["5".to_string()],
            )),
        }
    }

    #[test]
    fn test_subscription_survives_wire() {
        let codec = PlCodec;
        let sub = sample_subscription();
        let datagram = Datagram::new(
            [9; 12],
            vec![Submessage::Data {
                reader: ENTITYID_SEDP_SUBSCRIPTIONS_READER,
                writer: ENTITYID_SEDP_SUBSCRIPTIONS_WRITER,
                seq: 3,
                payload: Payload::Subscription(sub.clone()),
            }],
        );

        let bytes = codec.encode(&datagram).unwrap();
        assert_eq!(&bytes[0..4], b"RTPS");
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, datagram);
    }

    #[test]
    fn test_participant_dispose_from_status_info() {
        let codec = PlCodec;
        let key = GUID::participant([4; 12]);
        let bytes = codec.encode_payload(&Payload::ParticipantDispose(key));
        assert_eq!(
            codec.decode_payload(ENTITYID_SPDP_WRITER, &bytes).unwrap(),
            Payload::ParticipantDispose(key)
        );
        assert_eq!(
            codec
                .decode_payload(ENTITYID_SEDP_PUBLICATIONS_WRITER, &bytes)
                .unwrap(),
            Payload::EndpointDispose(key)
        );
    }

    #[test]
    fn test_participant_without_guid_is_malformed() {
        let codec = PlCodec;
        let mut pl = ParamListWriter::new();
        pl.param(PID_DOMAIN_ID, |v| {
            v.u32(0);
        });
        let mut bytes = ENCAPSULATION_PL_CDR_LE.to_vec();
        bytes.extend(pl.finish());
        assert!(matches!(
            codec.decode_payload(ENTITYID_SPDP_WRITER, &bytes),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_participant_params_skipped() {
        let codec = PlCodec;
        let mut data = ParticipantData::new(GUID::participant([5; 12]), 7, Duration::from_secs(9));
        data.metatraffic_unicast.push("127.0.0.1:7412".parse().unwrap());
        let mut bytes = codec.encode_payload(&Payload::Participant(Box::new(data.clone())));
        // Splice a vendor parameter in front of the list.
        let extra = [0x99, 0x80, 0x04, 0x00, 1, 2, 3, 4];
        bytes.splice(4..4, extra);

        match codec.decode_payload(ENTITYID_SPDP_WRITER, &bytes).unwrap() {
            Payload::Participant(p) => assert_eq!(*p, data),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_garbage_never_panics() {
        let codec = PlCodec;
        let mut rng = fastrand::Rng::with_seed(7);
        for len in 0..256 {
            let mut bytes: Vec<u8> = (0..len).map(|_| rng.u8(..)).collect();
            if len >= 4 && rng.bool() {
                bytes[0..4].copy_from_slice(b"RTPS");
            }
            let _ = codec.decode(&bytes);
        }
    }

    #[test]
    fn test_bad_fragment_number() {
        let codec = PlCodec;
        let datagram = Datagram::new(
            [1; 12],
            vec![Submessage::DataFrag {
                reader: ENTITYID_SEDP_TOPICS_READER,
                writer: ENTITYID_SEDP_TOPICS_WRITER,
                seq: 1,
                fragment: 3,
                total_fragments: 2,
                sample_size: 10,
                bytes: vec![0; 4],
            }],
        );
        let bytes = codec.encode(&datagram).unwrap();
        assert!(matches!(codec.decode(&bytes), Err(Error::Malformed(_))));
    }
}
