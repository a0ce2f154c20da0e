// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint discovery across two in-process participants
//!
//! Each test runs two facades on one `MemoryNetwork`, as two processes on the
//! same host would, and observes SEDP matching through recording callbacks.

mod common;

use common::{locator, process, wait_until, Event, Recorder, WAIT};
use hdds_discovery::core::{ENTITYID_SPDP_READER, ENTITYID_SPDP_WRITER};
use hdds_discovery::protocol::{Datagram, DiscoveryCodec, Payload, PlCodec, Submessage};
use hdds_discovery::{
    ConfigValues, ContentFilterProperty, DiscoveryConfig, Error, FieldValue, MemoryNetwork, ParticipantQos, QoS, QosPolicyId,
    RtpsDiscovery, TopicStatus, GUID,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const DOMAIN: u32 = 4;

struct Side {
    disco: RtpsDiscovery,
    participant: GUID,
    topic: GUID,
    recorder: Arc<Recorder>,
}

fn side(network: &MemoryNetwork, key: &str) -> Side {
    side_on(process(network, key))
}

fn side_on(disco: RtpsDiscovery) -> Side {
    let (participant, federated) = disco.add_domain_participant(DOMAIN, ParticipantQos::default(), None);
    assert!(!participant.is_zero());
    assert!(!federated);
    let (topic, status) = disco
        .assert_topic(DOMAIN, participant, "Square", "ShapeType", QoS::reliable(), true, None)
        .expect("assert topic");
    assert_eq!(status, TopicStatus::Created);
    Side {
        disco,
        participant,
        topic,
        recorder: Recorder::new(),
    }
}

fn add_writer(side: &Side, qos: QoS, port: u16) -> GUID {
    side.disco
        .add_publication(
            DOMAIN,
            side.participant,
            side.topic,
            qos,
            vec![locator(port)],
            None,
            side.recorder.clone(),
        )
        .expect("add publication")
}

fn add_reader(side: &Side, qos: QoS, port: u16, filter: Option<ContentFilterProperty>) -> GUID {
    side.disco
        .add_subscription(
            DOMAIN,
            side.participant,
            side.topic,
            qos,
            vec![locator(port)],
            None,
            filter,
            side.recorder.clone(),
        )
        .expect("add subscription")
}

fn wait_matched(a: &Side, writer: GUID, b: &Side, reader: GUID) {
    assert!(
        wait_until(WAIT, || a.recorder.reader_match(reader).is_some()
            && b.recorder.writer_match(writer).is_some()),
        "writer {} and reader {} never matched",
        writer,
        reader
    );
}

#[test]
fn test_writer_and_reader_match_across_participants() {
    let network = MemoryNetwork::new();
    let a = side(&network, "a");
    let b = side(&network, "b");

    let writer = add_writer(&a, QoS::reliable(), 20000);
    let reader = add_reader(&b, QoS::reliable(), 20001, None);
    wait_matched(&a, writer, &b, reader);

    let seen_by_writer = a.recorder.reader_match(reader).unwrap();
    assert_eq!(seen_by_writer.participant, b.participant);
    assert_eq!(seen_by_writer.locators, vec![locator(20001)]);
    assert!(seen_by_writer.content_filter.is_none());

    let seen_by_reader = b.recorder.writer_match(writer).unwrap();
    assert_eq!(seen_by_reader.participant, a.participant);
    assert_eq!(seen_by_reader.locators, vec![locator(20000)]);

    // Periodic SPDP/SEDP traffic must not produce a second association.
    thread::sleep(Duration::from_millis(300));
    assert_eq!(a.recorder.count(|e| matches!(e, Event::WriterMatched(..))), 1);
    assert_eq!(b.recorder.count(|e| matches!(e, Event::ReaderMatched(..))), 1);

    let discovered: Vec<GUID> = a
        .disco
        .discovered_participants(DOMAIN, a.participant)
        .into_iter()
        .map(|p| p.guid)
        .collect();
    assert_eq!(discovered, vec![b.participant]);
}

#[test]
fn test_incompatible_reliability_is_reported() {
    let network = MemoryNetwork::new();
    let a = side(&network, "a");
    let b = side(&network, "b");

    let writer = add_writer(&a, QoS::best_effort(), 20010);
    let reader = add_reader(&b, QoS::reliable(), 20011, None);

    assert!(wait_until(WAIT, || {
        b.recorder
            .count(|e| matches!(e, Event::ReaderIncompatible(r, _) if *r == reader))
            > 0
            && a.recorder
                .count(|e| matches!(e, Event::WriterIncompatible(w, _) if *w == writer))
                > 0
    }));

    let status = b
        .disco
        .incompatible_qos_status(DOMAIN, b.participant, reader)
        .expect("reader status");
    assert!(status.count_for(QosPolicyId::Reliability) >= 1);
    assert_eq!(status.last_policy_id, Some(QosPolicyId::Reliability));
    assert!(status.total_count_change >= 1);

    // Reading the status resets the change counter, not the total.
    let again = b
        .disco
        .incompatible_qos_status(DOMAIN, b.participant, reader)
        .expect("reader status");
    assert_eq!(again.total_count_change, 0);
    assert_eq!(again.total_count, status.total_count);

    thread::sleep(Duration::from_millis(200));
    assert_eq!(a.recorder.count(|e| matches!(e, Event::WriterMatched(..))), 0);
    assert_eq!(b.recorder.count(|e| matches!(e, Event::ReaderMatched(..))), 0);
}

#[test]
fn test_filter_parameter_update_keeps_association() {
    let network = MemoryNetwork::new();
    let a = side(&network, "a");
    let b = side(&network, "b");

    let filter = ContentFilterProperty::sql("SquareAbove", "Square", "key > %0", vec!["10".to_string()]);
    let writer = add_writer(&a, QoS::reliable(), 20020);
    let reader = add_reader(&b, QoS::reliable(), 20021, Some(filter));
    wait_matched(&a, writer, &b, reader);

    let association = a.recorder.reader_match(reader).unwrap();
    let property = association.content_filter.expect("filter propagated to writer");
    assert_eq!(property.expression_parameters, vec!["10".to_string()]);

    let mut compiled = property.compile().expect("filter compiles");
    let sample: HashMap<String, FieldValue> = [("key".to_string(), FieldValue::from(15))].into();
    assert!(compiled.matches(&sample).unwrap());

    a.recorder.clear();
    b.recorder.clear();
    b.disco
        .update_subscription_params(DOMAIN, b.participant, reader, vec!["20".to_string()])
        .expect("update params");

    assert!(wait_until(WAIT, || a.recorder.count(|e| matches!(
        e,
        Event::ParamsChanged(w, r, p) if *w == writer && *r == reader && p == &["20".to_string()]
    )) == 1));

    thread::sleep(Duration::from_millis(200));
    let churn = |e: &Event| {
        matches!(
            e,
            Event::WriterMatched(..)
                | Event::WriterUnmatched(..)
                | Event::ReaderMatched(..)
                | Event::ReaderUnmatched(..)
        )
    };
    assert_eq!(a.recorder.count(churn), 0);
    assert_eq!(b.recorder.count(churn), 0);
    assert_eq!(a.recorder.count(|e| matches!(e, Event::ParamsChanged(..))), 1);

    compiled.set_parameters(vec!["20".to_string()]);
    assert!(!compiled.matches(&sample).unwrap());
}

#[test]
fn test_invalid_filter_is_rejected() {
    let network = MemoryNetwork::new();
    let a = side(&network, "a");
    let filter = ContentFilterProperty::sql("Broken", "Square", "key > > %0", vec!["1".to_string()]);
    let result = a.disco.add_subscription(
        DOMAIN,
        a.participant,
        a.topic,
        QoS::reliable(),
        vec![locator(20030)],
        None,
        Some(filter),
        a.recorder.clone(),
    );
    assert!(matches!(result, Err(Error::InvalidQos(_))));
}

#[test]
fn test_assert_topic_idempotent_and_type_mismatch() {
    let network = MemoryNetwork::new();
    let a = side(&network, "a");

    let (again, status) = a
        .disco
        .assert_topic(DOMAIN, a.participant, "Square", "ShapeType", QoS::reliable(), true, None)
        .unwrap();
    assert_eq!(again, a.topic);
    assert_eq!(status, TopicStatus::Found);

    let mismatch = a
        .disco
        .assert_topic(DOMAIN, a.participant, "Square", "OtherType", QoS::reliable(), true, None);
    assert!(matches!(mismatch, Err(Error::TopicTypeMismatch { .. })));

    let info = a.disco.find_topic(DOMAIN, a.participant, "Square").expect("topic");
    assert_eq!(info.type_name, "ShapeType");
    assert!(info.local);

    // Two assertions hold two references.
    a.disco.remove_topic(DOMAIN, a.participant, a.topic).unwrap();
    assert!(a.disco.find_topic(DOMAIN, a.participant, "Square").is_some());
    a.disco.remove_topic(DOMAIN, a.participant, a.topic).unwrap();
    assert!(a.disco.find_topic(DOMAIN, a.participant, "Square").is_none());
}

#[test]
fn test_removed_participant_tears_down_matches() {
    let network = MemoryNetwork::new();
    let a = side(&network, "a");
    let b = side(&network, "b");

    let writer = add_writer(&a, QoS::reliable(), 20040);
    let reader = add_reader(&b, QoS::reliable(), 20041, None);
    wait_matched(&a, writer, &b, reader);

    assert!(b.disco.remove_domain_participant(DOMAIN, b.participant));
    assert!(!b.disco.has_domain_participant(DOMAIN, b.participant));

    assert!(wait_until(WAIT, || a.recorder.count(|e| matches!(
        e,
        Event::WriterUnmatched(w, readers) if *w == writer && readers.contains(&reader)
    )) == 1));
    assert!(wait_until(WAIT, || a
        .disco
        .discovered_participants(DOMAIN, a.participant)
        .is_empty()));
}

#[test]
fn test_removed_publication_unmatches_remote_reader() {
    let network = MemoryNetwork::new();
    let a = side(&network, "a");
    let b = side(&network, "b");

    let writer = add_writer(&a, QoS::reliable(), 20050);
    let reader = add_reader(&b, QoS::reliable(), 20051, None);
    wait_matched(&a, writer, &b, reader);

    a.disco.remove_publication(DOMAIN, a.participant, writer).unwrap();
    assert!(wait_until(WAIT, || b.recorder.count(|e| matches!(
        e,
        Event::ReaderUnmatched(r, writers) if *r == reader && writers.contains(&writer)
    )) == 1));
    assert!(matches!(
        a.disco.remove_publication(DOMAIN, a.participant, writer),
        Err(Error::EndpointNotFound)
    ));
}

fn announces_publication(bytes: &[u8], writer: GUID) -> bool {
    let Ok(datagram) = PlCodec.decode(bytes) else {
        return false;
    };
    datagram.submessages.iter().any(|s| match s {
        Submessage::Data {
            payload: Payload::Publication(p),
            ..
        } => p.guid == writer,
        _ => false,
    })
}

#[test]
fn test_relay_only_reaches_existing_sedp_sessions() {
    let network = MemoryNetwork::new();
    let a = side(&network, "a");
    let b = side(&network, "b");
    let writer = add_writer(&a, QoS::reliable(), 20090);
    let reader = add_reader(&b, QoS::reliable(), 20091, None);
    wait_matched(&a, writer, &b, reader);

    let relay = SocketAddr::from(([127, 0, 0, 60], 5555));
    let tap = network.listen(relay);
    a.disco.set_sedp_rtps_relay_address(Some(relay));
    a.disco.set_rtps_relay_only(true);
    thread::sleep(Duration::from_millis(100));

    let late = add_writer(&a, QoS::reliable(), 20092);
    let mut seen = false;
    let deadline = std::time::Instant::now() + WAIT;
    while !seen && std::time::Instant::now() < deadline {
        match tap.recv_timeout(Duration::from_millis(100)) {
            Ok(datagram) => seen = announces_publication(&datagram.payload, late),
            Err(_) => continue,
        }
    }
    assert!(seen, "publication {} never reached the relay", late);
}

#[test]
fn test_peer_that_forgot_us_rematches() {
    let network = MemoryNetwork::new();
    let config = DiscoveryConfig::new(ConfigValues {
        resend_period: Duration::from_millis(300),
        ..ConfigValues::default()
    });
    let a = side_on(RtpsDiscovery::with_transport("a", config, Arc::new(network.clone())));
    let b = side(&network, "b");
    let writer = add_writer(&a, QoS::reliable(), 20095);
    let reader = add_reader(&b, QoS::reliable(), 20096, None);
    wait_matched(&a, writer, &b, reader);

    // Only b drops a; a keeps its session with everything acknowledged.
    let forged = Datagram::new(
        a.participant.prefix,
        vec![Submessage::Data {
            reader: ENTITYID_SPDP_READER,
            writer: ENTITYID_SPDP_WRITER,
            seq: 1_000_000,
            payload: Payload::ParticipantDispose(a.participant),
        }],
    );
    let source = locator(a.disco.get_spdp_port(DOMAIN, a.participant));
    let dest = locator(b.disco.get_spdp_port(DOMAIN, b.participant));
    network.inject(source, dest, &PlCodec.encode(&forged).expect("encode dispose"));
    assert!(wait_until(WAIT, || b.recorder.count(
        |e| matches!(e, Event::ReaderUnmatched(r, ws) if *r == reader && ws.contains(&writer))
    ) > 0));

    assert!(
        wait_until(WAIT, || b.recorder.count(
            |e| matches!(e, Event::ReaderMatched(r, w) if *r == reader && w.writer == writer)
        ) >= 2),
        "reader {} never matched writer {} again",
        reader,
        writer
    );
}
