// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local topics and endpoints.
//!
//! Every change is written to the matching builtin history (and so reaches
//! peers), mirrored to the BIT sink, and followed by a re-evaluation of the
//! affected pairs.

use super::{Builtin, LocalReader, LocalTopic, LocalWriter, TopicInfo, TopicStatus};
use crate::bit::{BitKind, BitSample};
use crate::callbacks::{DataReaderCallbacks, DataWriterCallbacks, TopicCallbacks};
use crate::core::*;
use crate::error::{Error, Result};
use crate::filter::{ContentFilterProperty, DDSSQL_FILTER_CLASS};
use crate::protocol::{
    ParticipantMessageData, Payload, PublicationData, SubscriptionData, TopicData, TypeInformation,
};
use crate::qos::{LivelinessKind, QoS};
use crate::spdp::engine::{Effects, Engine};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

impl Engine {
    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "participant {} is {:?}",
                self.guid, self.state
            )))
        }
    }

    fn next_entity(&mut self, kind: EntityKind) -> GUID {
        let key = self.sedp.next_entity_key;
        self.sedp.next_entity_key += 1;
        GUID::entity(self.guid.prefix, key, kind)
    }

    /// A local record changed: peers hear about it through SEDP, and one
    /// early SPDP announcement helps late joiners.
    fn local_changed(&mut self, builtin: Builtin, payload: Payload, now: Instant, fx: &mut Effects) {
        self.publish_builtin(builtin, payload, now, fx);
        self.schedule_quick_resend(now);
    }

    /// Create or share the topic `name`.
    ///
    /// The first registration is authoritative; a later call with another
    /// type name fails without touching it.
    pub(crate) fn assert_topic(
        &mut self,
        name: &str,
        type_name: &str,
        qos: QoS,
        has_key: bool,
        callbacks: Option<Arc<dyn TopicCallbacks>>,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<(GUID, TopicStatus)> {
        crate::trace_fn!("Engine::assert_topic");
        self.ensure_running()?;
        if let Some((guid, _)) = self.sedp.local_topic_by_name(name) {
            let guid = *guid;
            let Some(topic) = self.sedp.topics.get_mut(&guid) else {
                return Err(Error::TopicNotFound);
            };
            if topic.data.type_name != type_name {
                return Err(Error::TopicTypeMismatch {
                    topic: name.to_string(),
                    existing: topic.data.type_name.clone(),
                    requested: type_name.to_string(),
                });
            }
            topic.refs += 1;
            if topic.callbacks.is_none() {
                topic.callbacks = callbacks;
            }
            return Ok((guid, TopicStatus::Found));
        }

        qos.validate()?;
        let guid = self.next_entity(EntityKind::Topic);
        let data = TopicData {
            guid,
            name: name.to_string(),
            type_name: type_name.to_string(),
            qos,
        };
        self.sedp.topics.insert(
            guid,
            LocalTopic {
                data: data.clone(),
                has_key,
                callbacks,
                refs: 1,
                endpoints: 0,
                inconsistent: HashSet::new(),
            },
        );
        log::debug!("[sedp] topic '{}' ({}) created as {}", name, type_name, guid);
        self.bit_publish(fx, BitSample::Topic(data.clone()));
        self.local_changed(Builtin::Topics, Payload::Topic(data), now, fx);
        self.detect_inconsistent_topics(fx);
        Ok((guid, TopicStatus::Created))
    }

    /// Local topic first, then one announced by a peer.
    pub(crate) fn find_topic(&self, name: &str) -> Option<TopicInfo> {
        if let Some((guid, topic)) = self.sedp.local_topic_by_name(name) {
            return Some(TopicInfo {
                guid: *guid,
                name: topic.data.name.clone(),
                type_name: topic.data.type_name.clone(),
                qos: topic.data.qos.clone(),
                local: true,
            });
        }
        self.sedp
            .remote_topics
            .values()
            .find(|t| t.name == name)
            .map(|t| TopicInfo {
                guid: t.guid,
                name: t.name.clone(),
                type_name: t.type_name.clone(),
                qos: t.qos.clone(),
                local: false,
            })
    }

    /// Release one `assert_topic` reference; the record goes with the last one.
    pub(crate) fn remove_topic(&mut self, guid: GUID, now: Instant, fx: &mut Effects) -> Result<()> {
        let Some(topic) = self.sedp.topics.get_mut(&guid) else {
            return Err(Error::TopicNotFound);
        };
        if topic.refs > 1 {
            topic.refs -= 1;
            return Ok(());
        }
        if topic.endpoints > 0 {
            return Err(Error::InvalidState(format!(
                "topic '{}' still has {} endpoints",
                topic.data.name, topic.endpoints
            )));
        }
        self.sedp.topics.remove(&guid);
        log::debug!("[sedp] topic {} removed", guid);
        self.bit_dispose(fx, BitKind::Topic, guid);
        self.local_changed(Builtin::Topics, Payload::EndpointDispose(guid), now, fx);
        Ok(())
    }

    pub(crate) fn ignore_topic(&mut self, guid: GUID, fx: &mut Effects) {
        self.ignored.insert(guid);
        if self.sedp.remote_topics.remove(&guid).is_some() {
            for topic in self.sedp.topics.values_mut() {
                topic.inconsistent.remove(&guid);
            }
            self.bit_dispose(fx, BitKind::Topic, guid);
        }
    }

    pub(crate) fn update_topic_qos(
        &mut self,
        guid: GUID,
        qos: QoS,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<()> {
        qos.validate()?;
        let Some(topic) = self.sedp.topics.get_mut(&guid) else {
            return Err(Error::TopicNotFound);
        };
        if topic.data.qos == qos {
            return Ok(());
        }
        topic.data.qos = qos;
        let data = topic.data.clone();
        self.bit_publish(fx, BitSample::Topic(data.clone()));
        self.local_changed(Builtin::Topics, Payload::Topic(data), now, fx);
        Ok(())
    }

    /// Register a DataWriter on a local topic.
    pub(crate) fn add_publication(
        &mut self,
        topic: GUID,
        qos: QoS,
        locators: Vec<SocketAddr>,
        type_info: Option<TypeInformation>,
        callbacks: Arc<dyn DataWriterCallbacks>,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<GUID> {
        crate::trace_fn!("Engine::add_publication");
        self.ensure_running()?;
        qos.validate()?;
        let (topic_name, type_name, has_key) = match self.sedp.topics.get(&topic) {
            Some(t) => (t.data.name.clone(), t.data.type_name.clone(), t.has_key),
            None => return Err(Error::TopicNotFound),
        };
        let guid = self.next_entity(EntityKind::writer(has_key));
        let data = PublicationData {
            guid,
            participant_guid: self.guid,
            topic_name,
            type_name,
            qos,
            locators,
            type_info,
        };
        if let Some(t) = self.sedp.topics.get_mut(&topic) {
            t.endpoints += 1;
        }
        self.sedp.writers.insert(
            guid,
            LocalWriter {
                data: data.clone(),
                topic,
                callbacks,
                incompatible: Default::default(),
            },
        );
        log::debug!("[sedp] publication {} on '{}'", guid, data.topic_name);
        self.bit_publish(fx, BitSample::Publication(data.clone()));
        self.local_changed(Builtin::Publications, Payload::Publication(data), now, fx);
        self.evaluate_writer(guid, now, fx);
        Ok(guid)
    }

    /// Register a DataReader on a local topic.
    pub(crate) fn add_subscription(
        &mut self,
        topic: GUID,
        qos: QoS,
        locators: Vec<SocketAddr>,
        type_info: Option<TypeInformation>,
        content_filter: Option<ContentFilterProperty>,
        callbacks: Arc<dyn DataReaderCallbacks>,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<GUID> {
        crate::trace_fn!("Engine::add_subscription");
        self.ensure_running()?;
        qos.validate()?;
        if let Some(filter) = &content_filter {
            validate_filter(filter)?;
        }
        let (topic_name, type_name, has_key) = match self.sedp.topics.get(&topic) {
            Some(t) => (t.data.name.clone(), t.data.type_name.clone(), t.has_key),
            None => return Err(Error::TopicNotFound),
        };
        let guid = self.next_entity(EntityKind::reader(has_key));
        let data = SubscriptionData {
            guid,
            participant_guid: self.guid,
            topic_name,
            type_name,
            qos,
            locators,
            type_info,
            content_filter,
        };
        if let Some(t) = self.sedp.topics.get_mut(&topic) {
            t.endpoints += 1;
        }
        self.sedp.readers.insert(
            guid,
            LocalReader {
                data: data.clone(),
                topic,
                callbacks,
                incompatible: Default::default(),
            },
        );
        log::debug!("[sedp] subscription {} on '{}'", guid, data.topic_name);
        self.bit_publish(fx, BitSample::Subscription(data.clone()));
        self.local_changed(Builtin::Subscriptions, Payload::Subscription(data), now, fx);
        self.evaluate_reader(guid, now, fx);
        Ok(guid)
    }

    pub(crate) fn remove_publication(&mut self, guid: GUID, now: Instant, fx: &mut Effects) -> Result<()> {
        if !self.sedp.writers.contains_key(&guid) {
            return Err(Error::EndpointNotFound);
        }
        self.unmatch_endpoint(guid, fx);
        if let Some(writer) = self.sedp.writers.remove(&guid) {
            if let Some(t) = self.sedp.topics.get_mut(&writer.topic) {
                t.endpoints = t.endpoints.saturating_sub(1);
            }
        }
        self.bit_dispose(fx, BitKind::Publication, guid);
        self.local_changed(Builtin::Publications, Payload::EndpointDispose(guid), now, fx);
        Ok(())
    }

    pub(crate) fn remove_subscription(&mut self, guid: GUID, now: Instant, fx: &mut Effects) -> Result<()> {
        if !self.sedp.readers.contains_key(&guid) {
            return Err(Error::EndpointNotFound);
        }
        self.unmatch_endpoint(guid, fx);
        if let Some(reader) = self.sedp.readers.remove(&guid) {
            if let Some(t) = self.sedp.topics.get_mut(&reader.topic) {
                t.endpoints = t.endpoints.saturating_sub(1);
            }
        }
        self.bit_dispose(fx, BitKind::Subscription, guid);
        self.local_changed(Builtin::Subscriptions, Payload::EndpointDispose(guid), now, fx);
        Ok(())
    }

    /// Permanently ignore a remote publication.
    pub(crate) fn ignore_publication(&mut self, guid: GUID, fx: &mut Effects) {
        self.ignored.insert(guid);
        if self.sedp.remote_writers.remove(&guid).is_some() {
            self.unmatch_endpoint(guid, fx);
            self.bit_dispose(fx, BitKind::Publication, guid);
        }
    }

    /// Permanently ignore a remote subscription.
    pub(crate) fn ignore_subscription(&mut self, guid: GUID, fx: &mut Effects) {
        self.ignored.insert(guid);
        if self.sedp.remote_readers.remove(&guid).is_some() {
            self.unmatch_endpoint(guid, fx);
            self.bit_dispose(fx, BitKind::Subscription, guid);
        }
    }

    pub(crate) fn update_publication_qos(
        &mut self,
        guid: GUID,
        qos: QoS,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<()> {
        qos.validate()?;
        let Some(writer) = self.sedp.writers.get_mut(&guid) else {
            return Err(Error::EndpointNotFound);
        };
        if writer.data.qos == qos {
            return Ok(());
        }
        writer.data.qos = qos;
        let data = writer.data.clone();
        self.bit_publish(fx, BitSample::Publication(data.clone()));
        self.local_changed(Builtin::Publications, Payload::Publication(data), now, fx);
        self.evaluate_writer(guid, now, fx);
        Ok(())
    }

    pub(crate) fn update_publication_locators(
        &mut self,
        guid: GUID,
        locators: Vec<SocketAddr>,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<()> {
        let Some(writer) = self.sedp.writers.get_mut(&guid) else {
            return Err(Error::EndpointNotFound);
        };
        if writer.data.locators == locators {
            return Ok(());
        }
        writer.data.locators = locators;
        let data = writer.data.clone();
        self.bit_publish(fx, BitSample::Publication(data.clone()));
        self.local_changed(Builtin::Publications, Payload::Publication(data), now, fx);
        self.refresh_pair_locators(guid, fx);
        Ok(())
    }

    pub(crate) fn update_subscription_qos(
        &mut self,
        guid: GUID,
        qos: QoS,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<()> {
        qos.validate()?;
        let Some(reader) = self.sedp.readers.get_mut(&guid) else {
            return Err(Error::EndpointNotFound);
        };
        if reader.data.qos == qos {
            return Ok(());
        }
        reader.data.qos = qos;
        let data = reader.data.clone();
        self.bit_publish(fx, BitSample::Subscription(data.clone()));
        self.local_changed(Builtin::Subscriptions, Payload::Subscription(data), now, fx);
        self.evaluate_reader(guid, now, fx);
        Ok(())
    }

    /// New filter parameters; matched writers keep their association.
    pub(crate) fn update_subscription_params(
        &mut self,
        guid: GUID,
        params: Vec<String>,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<()> {
        let Some(reader) = self.sedp.readers.get_mut(&guid) else {
            return Err(Error::EndpointNotFound);
        };
        let Some(filter) = reader.data.content_filter.as_mut() else {
            return Err(Error::InvalidState(format!(
                "subscription {} has no content filter",
                guid
            )));
        };
        if filter.expression_parameters == params {
            return Ok(());
        }
        let candidate = ContentFilterProperty {
            expression_parameters: params.clone(),
            ..filter.clone()
        };
        validate_filter(&candidate)?;
        filter.expression_parameters = params.clone();
        let data = reader.data.clone();
        self.bit_publish(fx, BitSample::Subscription(data.clone()));
        self.local_changed(Builtin::Subscriptions, Payload::Subscription(data), now, fx);
        self.propagate_filter_params(guid, &params, fx);
        Ok(())
    }

    pub(crate) fn update_subscription_locators(
        &mut self,
        guid: GUID,
        locators: Vec<SocketAddr>,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<()> {
        let Some(reader) = self.sedp.readers.get_mut(&guid) else {
            return Err(Error::EndpointNotFound);
        };
        if reader.data.locators == locators {
            return Ok(());
        }
        reader.data.locators = locators;
        let data = reader.data.clone();
        self.bit_publish(fx, BitSample::Subscription(data.clone()));
        self.local_changed(Builtin::Subscriptions, Payload::Subscription(data), now, fx);
        self.refresh_pair_locators(guid, fx);
        Ok(())
    }

    /// Assert liveliness of the local participant.
    ///
    /// The participant message reaches readers matched with our writers; a
    /// kind equal to the participant's liveliness QoS also re-announces SPDP.
    pub(crate) fn signal_liveliness(
        &mut self,
        kind: LivelinessKind,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<()> {
        self.ensure_running()?;
        let message = ParticipantMessageData {
            participant: self.guid,
            kind,
        };
        self.publish_builtin(
            Builtin::ParticipantMessage,
            Payload::ParticipantMessage(message),
            now,
            fx,
        );
        if kind == self.local.qos.liveliness && kind != LivelinessKind::ManualByTopic {
            self.announce(fx);
        }
        Ok(())
    }

    /// Replay current records into a newly attached BIT sink.
    pub(crate) fn bit_snapshot(&self, fx: &mut Effects) {
        for data in self.discovered_participants() {
            self.bit_publish(fx, BitSample::Participant(data));
        }
        let topics = self
            .sedp
            .topics
            .values()
            .map(|t| t.data.clone())
            .chain(self.sedp.remote_topics.values().cloned());
        for topic in topics {
            self.bit_publish(fx, BitSample::Topic(topic));
        }
        let publications = self
            .sedp
            .writers
            .values()
            .map(|w| w.data.clone())
            .chain(self.sedp.remote_writers.values().cloned());
        for publication in publications {
            self.bit_publish(fx, BitSample::Publication(publication));
        }
        let subscriptions = self
            .sedp
            .readers
            .values()
            .map(|r| r.data.clone())
            .chain(self.sedp.remote_readers.values().cloned());
        for subscription in subscriptions {
            self.bit_publish(fx, BitSample::Subscription(subscription));
        }
    }
}

/// DDSSQL filters must compile; other classes are passed through to writers.
fn validate_filter(filter: &ContentFilterProperty) -> Result<()> {
    if filter.effective_class() != DDSSQL_FILTER_CLASS {
        return Ok(());
    }
    filter
        .compile()
        .map(|_| ())
        .map_err(|e| Error::InvalidQos(format!("content filter: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{ReaderAssociation, WriterAssociation};
    use crate::qos::IncompatibleQosStatus;
    use crate::spdp::engine::tests::engine;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl DataWriterCallbacks for Recorder {
        fn add_association(&self, writer: GUID, reader: &ReaderAssociation) {
            self.events.lock().push(format!("w+ {} {}", writer, reader.reader));
        }
        fn remove_associations(&self, writer: GUID, readers: &[GUID]) {
            self.events.lock().push(format!("w- {} {}", writer, readers.len()));
        }
        fn update_incompatible_qos(&self, _writer: GUID, status: &IncompatibleQosStatus) {
            self.events.lock().push(format!("w! {}", status.total_count));
        }
        fn update_subscription_params(&self, _writer: GUID, _reader: GUID, params: &[String]) {
            self.events.lock().push(format!("w% {}", params.join(",")));
        }
    }

    impl DataReaderCallbacks for Recorder {
        fn add_association(&self, reader: GUID, writer: &WriterAssociation) {
            self.events.lock().push(format!("r+ {} {}", reader, writer.writer));
        }
        fn remove_associations(&self, reader: GUID, writers: &[GUID]) {
            self.events.lock().push(format!("r- {} {}", reader, writers.len()));
        }
        fn update_incompatible_qos(&self, _reader: GUID, status: &IncompatibleQosStatus) {
            self.events.lock().push(format!("r! {}", status.total_count));
        }
    }

    fn run(fx: Effects) {
        for call in fx.calls {
            call();
        }
    }

    fn started() -> Engine {
        let mut engine = engine(0);
        engine.start(Instant::now());
        engine
    }

    #[test]
    fn test_assert_topic_is_idempotent() {
        let now = Instant::now();
        let mut engine = started();
        let mut fx = Effects::default();
        let (a, status_a) = engine
            .assert_topic("T", "X", QoS::reliable(), true, None, now, &mut fx)
            .unwrap();
        let (b, status_b) = engine
            .assert_topic("T", "X", QoS::reliable(), true, None, now, &mut fx)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(status_a, TopicStatus::Created);
        assert_eq!(status_b, TopicStatus::Found);
        assert_eq!(engine.sedp.topics.len(), 1);
        assert_eq!(engine.sedp.histories[&Builtin::Topics].last_seq(), 1);
    }

    #[test]
    fn test_assert_topic_type_mismatch() {
        let now = Instant::now();
        let mut engine = started();
        let mut fx = Effects::default();
        let (guid, _) = engine
            .assert_topic("T", "X", QoS::default(), true, None, now, &mut fx)
            .unwrap();
        let err = engine
            .assert_topic("T", "Y", QoS::default(), true, None, now, &mut fx)
            .unwrap_err();
        assert!(matches!(err, Error::TopicTypeMismatch { .. }));
        let info = engine.find_topic("T").unwrap();
        assert_eq!(info.guid, guid);
        assert_eq!(info.type_name, "X");
        assert!(info.local);
    }

    #[test]
    fn test_remove_topic_refcount_and_endpoints() {
        let now = Instant::now();
        let mut engine = started();
        let mut fx = Effects::default();
        let recorder = Arc::new(Recorder::default());
        let (topic, _) = engine
            .assert_topic("T", "X", QoS::default(), false, None, now, &mut fx)
            .unwrap();
        engine
            .assert_topic("T", "X", QoS::default(), false, None, now, &mut fx)
            .unwrap();
        let writer = engine
            .add_publication(topic, QoS::default(), Vec::new(), None, recorder, now, &mut fx)
            .unwrap();
        assert_eq!(writer.kind_octet(), EntityKind::WriterNoKey as u8);

        assert!(engine.remove_topic(topic, now, &mut fx).is_ok());
        assert!(matches!(
            engine.remove_topic(topic, now, &mut fx),
            Err(Error::InvalidState(_))
        ));
        engine.remove_publication(writer, now, &mut fx).unwrap();
        engine.remove_topic(topic, now, &mut fx).unwrap();
        assert!(engine.find_topic("T").is_none());
        assert!(matches!(
            engine.remove_topic(topic, now, &mut fx),
            Err(Error::TopicNotFound)
        ));
    }

    #[test]
    fn test_local_pair_matches_once() {
        let now = Instant::now();
        let mut engine = started();
        let recorder = Arc::new(Recorder::default());
        let mut fx = Effects::default();
        let (topic, _) = engine
            .assert_topic("T", "X", QoS::default(), true, None, now, &mut fx)
            .unwrap();
        let writer = engine
            .add_publication(topic, QoS::reliable(), Vec::new(), None, recorder.clone(), now, &mut fx)
            .unwrap();
        let reader = engine
            .add_subscription(topic, QoS::reliable(), Vec::new(), None, None, recorder.clone(), now, &mut fx)
            .unwrap();
        engine.evaluate_reader(reader, now, &mut fx);
        engine.evaluate_writer(writer, now, &mut fx);
        run(fx);

        let events = recorder.events.lock().clone();
        assert_eq!(
            events,
            vec![
                format!("w+ {} {}", writer, reader),
                format!("r+ {} {}", reader, writer),
            ]
        );
    }

    #[test]
    fn test_qos_update_unmatches_and_counts() {
        let now = Instant::now();
        let mut engine = started();
        let recorder = Arc::new(Recorder::default());
        let mut fx = Effects::default();
        let (topic, _) = engine
            .assert_topic("T", "X", QoS::default(), true, None, now, &mut fx)
            .unwrap();
        let writer = engine
            .add_publication(topic, QoS::reliable(), Vec::new(), None, recorder.clone(), now, &mut fx)
            .unwrap();
        let reader = engine
            .add_subscription(topic, QoS::reliable(), Vec::new(), None, None, recorder.clone(), now, &mut fx)
            .unwrap();
        engine
            .update_publication_qos(writer, QoS::best_effort(), now, &mut fx)
            .unwrap();
        run(fx);

        let events = recorder.events.lock().clone();
        assert!(events.contains(&format!("w- {} 1", writer)));
        assert!(events.contains(&format!("r- {} 1", reader)));
        assert!(events.contains(&"w! 1".to_string()));
        let status = engine.sedp.incompatible_status(&reader).unwrap();
        assert_eq!(status.count_for(crate::qos::QosPolicyId::Reliability), 1);
    }

    #[test]
    fn test_bad_filter_rejected() {
        let now = Instant::now();
        let mut engine = started();
        let mut fx = Effects::default();
        let (topic, _) = engine
            .assert_topic("T", "X", QoS::default(), true, None, now, &mut fx)
            .unwrap();
        let filter = ContentFilterProperty::sql("cft", "T", "key >", Vec::new());
        let err = engine
            .add_subscription(
                topic,
                QoS::default(),
                Vec::new(),
                None,
                Some(filter),
                Arc::new(Recorder::default()),
                now,
                &mut fx,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQos(_)));
    }

    #[test]
    fn test_params_update_keeps_match() {
        let now = Instant::now();
        let mut engine = started();
        let recorder = Arc::new(Recorder::default());
        let mut fx = Effects::default();
        let (topic, _) = engine
            .assert_topic("T", "X", QoS::default(), true, None, now, &mut fx)
            .unwrap();
        engine
            .add_publication(topic, QoS::default(), Vec::new(), None, recorder.clone(), now, &mut fx)
            .unwrap();
        let filter = ContentFilterProperty::sql("cft", "T", "key > %0", vec!["10".to_string()]);
        let reader = engine
            .add_subscription(topic, QoS::default(), Vec::new(), None, Some(filter), recorder.clone(), now, &mut fx)
            .unwrap();
        run(std::mem::take(&mut fx));
        recorder.events.lock().clear();

        engine
            .update_subscription_params(reader, vec!["20".to_string()], now, &mut fx)
            .unwrap();
        run(fx);
        assert_eq!(recorder.events.lock().clone(), vec!["w% 20".to_string()]);
    }

    #[test]
    fn test_params_update_needs_every_placeholder() {
        let now = Instant::now();
        let mut engine = started();
        let recorder = Arc::new(Recorder::default());
        let mut fx = Effects::default();
        let (topic, _) = engine
            .assert_topic("T", "X", QoS::default(), true, None, now, &mut fx)
            .unwrap();
        let filter = ContentFilterProperty::sql(
            "cft",
            "T",
            "key BETWEEN %0 AND %1",
            vec!["1".to_string(), "9".to_string()],
        );
        let reader = engine
            .add_subscription(topic, QoS::default(), Vec::new(), None, Some(filter), recorder, now, &mut fx)
            .unwrap();

        let err = engine
            .update_subscription_params(reader, vec!["3".to_string()], now, &mut fx)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQos(_)));
        let kept = engine.sedp.readers[&reader].data.content_filter.clone().unwrap();
        assert_eq!(kept.expression_parameters, vec!["1".to_string(), "9".to_string()]);

        engine
            .update_subscription_params(reader, vec!["3".to_string(), "4".to_string()], now, &mut fx)
            .unwrap();
    }
}
