// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer/reader matching.
//!
//! Every (writer, reader) pair with the same topic name, at least one side
//! local, holds one [`PairState`]. Re-evaluation computes the next state and
//! fires callbacks only when it differs from the stored one, so reprocessing
//! an announcement never duplicates an association.

use super::type_lookup::TypeVerdict;
use super::{Builtin, PairState};
use crate::bit::{BitKind, BitSample};
use crate::callbacks::{ReaderAssociation, WriterAssociation};
use crate::core::*;
use crate::filter::ContentFilterProperty;
use crate::protocol::{
    ParticipantMessageData, PublicationData, SubscriptionData, TopicData, TypeInformation,
};
use crate::qos::{check_compatibility, QoS, QosPolicyId};
use crate::spdp::engine::{Effects, Engine};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Instant;

/// What the matcher needs from either side of a pair.
#[derive(Debug, Clone)]
pub(crate) struct EndpointView {
    pub(crate) guid: GUID,
    pub(crate) participant: GUID,
    pub(crate) topic_name: String,
    pub(crate) type_name: String,
    pub(crate) qos: QoS,
    /// Resolved locators (ICE election and participant defaults applied).
    pub(crate) locators: Vec<SocketAddr>,
    pub(crate) type_info: Option<TypeInformation>,
    pub(crate) content_filter: Option<ContentFilterProperty>,
    pub(crate) local: bool,
}

impl Engine {
    pub(crate) fn is_ignored(&self, guid: &GUID) -> bool {
        self.ignored.contains(guid) || self.ignored.contains(&guid.participant_guid())
    }

    fn local_locators(&self, announced: &[SocketAddr]) -> Vec<SocketAddr> {
        if !announced.is_empty() {
            announced.to_vec()
        } else if !self.local.default_unicast.is_empty() {
            self.local.default_unicast.clone()
        } else {
            self.local.metatraffic_unicast.clone()
        }
    }

    fn remote_locators(&self, participant: GUID, announced: &[SocketAddr]) -> Vec<SocketAddr> {
        if let Some(addr) = self.ice_selected(participant) {
            return vec![addr];
        }
        if !announced.is_empty() {
            return announced.to_vec();
        }
        match self.leases.get(&participant.prefix) {
            Some(entry) if !entry.data.default_unicast.is_empty() => {
                entry.data.default_unicast.clone()
            }
            Some(entry) => entry.data.metatraffic_unicast.clone(),
            None => Vec::new(),
        }
    }

    pub(crate) fn writer_view(&self, guid: &GUID) -> Option<EndpointView> {
        if let Some(w) = self.sedp.writers.get(guid) {
            return Some(EndpointView {
                guid: *guid,
                participant: w.data.participant_guid,
                topic_name: w.data.topic_name.clone(),
                type_name: w.data.type_name.clone(),
                qos: w.data.qos.clone(),
                locators: self.local_locators(&w.data.locators),
                type_info: w.data.type_info.clone(),
                content_filter: None,
                local: true,
            });
        }
        let w = self.sedp.remote_writers.get(guid)?;
        Some(EndpointView {
            guid: *guid,
            participant: w.participant_guid,
            topic_name: w.topic_name.clone(),
            type_name: w.type_name.clone(),
            qos: w.qos.clone(),
            locators: self.remote_locators(w.participant_guid, &w.locators),
            type_info: w.type_info.clone(),
            content_filter: None,
            local: false,
        })
    }

    pub(crate) fn reader_view(&self, guid: &GUID) -> Option<EndpointView> {
        if let Some(r) = self.sedp.readers.get(guid) {
            return Some(EndpointView {
                guid: *guid,
                participant: r.data.participant_guid,
                topic_name: r.data.topic_name.clone(),
                type_name: r.data.type_name.clone(),
                qos: r.data.qos.clone(),
                locators: self.local_locators(&r.data.locators),
                type_info: r.data.type_info.clone(),
                content_filter: r.data.content_filter.clone(),
                local: true,
            });
        }
        let r = self.sedp.remote_readers.get(guid)?;
        Some(EndpointView {
            guid: *guid,
            participant: r.participant_guid,
            topic_name: r.topic_name.clone(),
            type_name: r.type_name.clone(),
            qos: r.qos.clone(),
            locators: self.remote_locators(r.participant_guid, &r.locators),
            type_info: r.type_info.clone(),
            content_filter: r.content_filter.clone(),
            local: false,
        })
    }

    /// Re-evaluate every pair of a writer.
    pub(crate) fn evaluate_writer(&mut self, writer: GUID, now: Instant, fx: &mut Effects) {
        let Some(view) = self.writer_view(&writer) else {
            self.unmatch_endpoint(writer, fx);
            return;
        };
        let mut readers: Vec<GUID> = self
            .sedp
            .readers
            .iter()
            .filter(|(_, r)| r.data.topic_name == view.topic_name)
            .map(|(g, _)| *g)
            .collect();
        if view.local {
            readers.extend(
                self.sedp
                    .remote_readers
                    .iter()
                    .filter(|(_, r)| r.topic_name == view.topic_name)
                    .map(|(g, _)| *g),
            );
        }

        let stale: Vec<(GUID, GUID)> = self
            .sedp
            .pairs
            .keys()
            .filter(|(w, r)| *w == writer && !readers.contains(r))
            .copied()
            .collect();
        for key in stale {
            self.drop_pair(key, fx);
        }
        for reader in readers {
            self.evaluate_pair(writer, reader, now, fx);
        }
    }

    /// Re-evaluate every pair of a reader.
    pub(crate) fn evaluate_reader(&mut self, reader: GUID, now: Instant, fx: &mut Effects) {
        let Some(view) = self.reader_view(&reader) else {
            self.unmatch_endpoint(reader, fx);
            return;
        };
        let mut writers: Vec<GUID> = self
            .sedp
            .writers
            .iter()
            .filter(|(_, w)| w.data.topic_name == view.topic_name)
            .map(|(g, _)| *g)
            .collect();
        if view.local {
            writers.extend(
                self.sedp
                    .remote_writers
                    .iter()
                    .filter(|(_, w)| w.topic_name == view.topic_name)
                    .map(|(g, _)| *g),
            );
        }

        let stale: Vec<(GUID, GUID)> = self
            .sedp
            .pairs
            .keys()
            .filter(|(w, r)| *r == reader && !writers.contains(w))
            .copied()
            .collect();
        for key in stale {
            self.drop_pair(key, fx);
        }
        for writer in writers {
            self.evaluate_pair(writer, reader, now, fx);
        }
    }

    pub(crate) fn evaluate_pair(&mut self, writer: GUID, reader: GUID, now: Instant, fx: &mut Effects) {
        let (Some(w), Some(r)) = (self.writer_view(&writer), self.reader_view(&reader)) else {
            self.drop_pair((writer, reader), fx);
            return;
        };
        if w.topic_name != r.topic_name || !(w.local || r.local) {
            self.drop_pair((writer, reader), fx);
            return;
        }

        let policies = check_compatibility(&w.qos, &r.qos);
        let next = if !policies.is_empty() {
            PairState::QosIncompatible
        } else {
            match self.check_types(&w, &r, now, fx) {
                TypeVerdict::Compatible => PairState::Matched,
                TypeVerdict::Incompatible => PairState::TypeIncompatible,
                TypeVerdict::Pending(id) => PairState::TypePending(id),
            }
        };
        self.transition(&w, &r, next, &policies, fx);
    }

    fn transition(
        &mut self,
        w: &EndpointView,
        r: &EndpointView,
        next: PairState,
        policies: &[QosPolicyId],
        fx: &mut Effects,
    ) {
        let key = (w.guid, r.guid);
        let prev = self.sedp.pairs.insert(key, next.clone());
        if prev.as_ref() == Some(&next) {
            return;
        }
        if prev == Some(PairState::Matched) {
            self.notify_unmatched(key, fx);
        }
        match next {
            PairState::Matched => self.notify_matched(w, r, fx),
            PairState::QosIncompatible => {
                log::debug!(
                    "[sedp] writer {} / reader {} incompatible: {:?}",
                    w.guid,
                    r.guid,
                    policies
                );
                self.record_incompatible(w, r, policies, fx);
            }
            PairState::TypeIncompatible => {
                log::debug!(
                    "[sedp] writer {} / reader {} type mismatch ({} vs {})",
                    w.guid,
                    r.guid,
                    w.type_name,
                    r.type_name
                );
                self.record_incompatible(w, r, &[QosPolicyId::TypeConsistency], fx);
            }
            PairState::TypePending(_) => {}
        }
    }

    fn notify_matched(&self, w: &EndpointView, r: &EndpointView, fx: &mut Effects) {
        log::debug!("[sedp] matched writer {} with reader {}", w.guid, r.guid);
        if let Some(local) = self.sedp.writers.get(&w.guid) {
            let callbacks = local.callbacks.clone();
            let writer = w.guid;
            let association = ReaderAssociation {
                reader: r.guid,
                participant: r.participant,
                locators: r.locators.clone(),
                qos: r.qos.clone(),
                content_filter: r.content_filter.clone(),
            };
            fx.call(move || callbacks.add_association(writer, &association));
        }
        if let Some(local) = self.sedp.readers.get(&r.guid) {
            let callbacks = local.callbacks.clone();
            let reader = r.guid;
            let association = WriterAssociation {
                writer: w.guid,
                participant: w.participant,
                locators: w.locators.clone(),
                qos: w.qos.clone(),
            };
            fx.call(move || callbacks.add_association(reader, &association));
        }
    }

    fn notify_unmatched(&self, (writer, reader): (GUID, GUID), fx: &mut Effects) {
        log::debug!("[sedp] unmatched writer {} and reader {}", writer, reader);
        if let Some(local) = self.sedp.writers.get(&writer) {
            let callbacks = local.callbacks.clone();
            fx.call(move || callbacks.remove_associations(writer, &[reader]));
        }
        if let Some(local) = self.sedp.readers.get(&reader) {
            let callbacks = local.callbacks.clone();
            fx.call(move || callbacks.remove_associations(reader, &[writer]));
        }
    }

    fn record_incompatible(
        &mut self,
        w: &EndpointView,
        r: &EndpointView,
        policies: &[QosPolicyId],
        fx: &mut Effects,
    ) {
        if let Some(local) = self.sedp.writers.get_mut(&w.guid) {
            local.incompatible.record(policies);
            let status = local.incompatible.clone();
            let callbacks = local.callbacks.clone();
            let writer = w.guid;
            fx.call(move || callbacks.update_incompatible_qos(writer, &status));
        }
        if let Some(local) = self.sedp.readers.get_mut(&r.guid) {
            local.incompatible.record(policies);
            let status = local.incompatible.clone();
            let callbacks = local.callbacks.clone();
            let reader = r.guid;
            fx.call(move || callbacks.update_incompatible_qos(reader, &status));
        }
    }

    /// Forget a pair, removing the association if it was matched.
    pub(crate) fn drop_pair(&mut self, key: (GUID, GUID), fx: &mut Effects) {
        if self.sedp.pairs.remove(&key) == Some(PairState::Matched) {
            self.notify_unmatched(key, fx);
        }
    }

    /// Drop every pair involving `endpoint`.
    pub(crate) fn unmatch_endpoint(&mut self, endpoint: GUID, fx: &mut Effects) {
        let keys: Vec<(GUID, GUID)> = self
            .sedp
            .pairs
            .keys()
            .filter(|(w, r)| *w == endpoint || *r == endpoint)
            .copied()
            .collect();
        for key in keys {
            self.drop_pair(key, fx);
        }
    }

    fn matched_with(&self, endpoint: GUID) -> Vec<(GUID, GUID)> {
        self.sedp
            .pairs
            .iter()
            .filter(|((w, r), s)| **s == PairState::Matched && (*w == endpoint || *r == endpoint))
            .map(|(k, _)| *k)
            .collect()
    }

    /// Tell local counterparts that `endpoint`'s locators changed.
    pub(crate) fn refresh_pair_locators(&mut self, endpoint: GUID, fx: &mut Effects) {
        for (writer, reader) in self.matched_with(endpoint) {
            if endpoint == writer {
                let (Some(local), Some(view)) =
                    (self.sedp.readers.get(&reader), self.writer_view(&writer))
                else {
                    continue;
                };
                let callbacks = local.callbacks.clone();
                fx.call(move || callbacks.update_locators(reader, writer, &view.locators));
            } else {
                let (Some(local), Some(view)) =
                    (self.sedp.writers.get(&writer), self.reader_view(&reader))
                else {
                    continue;
                };
                let callbacks = local.callbacks.clone();
                fx.call(move || callbacks.update_locators(writer, reader, &view.locators));
            }
        }
    }

    /// Tell local writers matched with `reader` about new filter parameters.
    pub(crate) fn propagate_filter_params(&mut self, reader: GUID, params: &[String], fx: &mut Effects) {
        for (writer, _) in self.matched_with(reader) {
            if let Some(local) = self.sedp.writers.get(&writer) {
                let callbacks = local.callbacks.clone();
                let params = params.to_vec();
                fx.call(move || callbacks.update_subscription_params(writer, reader, &params));
            }
        }
    }

    /// Report local topics whose name a peer announced with another type.
    pub(crate) fn detect_inconsistent_topics(&mut self, fx: &mut Effects) {
        for (guid, topic) in self.sedp.topics.iter_mut() {
            for remote in self.sedp.remote_topics.values() {
                if remote.name != topic.data.name || remote.type_name == topic.data.type_name {
                    continue;
                }
                if !topic.inconsistent.insert(remote.guid) {
                    continue;
                }
                let count = topic.inconsistent.len() as u32;
                log::debug!(
                    "[sedp] inconsistent topic '{}': local type '{}', remote {} type '{}'",
                    topic.data.name,
                    topic.data.type_name,
                    remote.guid,
                    remote.type_name
                );
                if let Some(callbacks) = topic.callbacks.clone() {
                    let topic_guid = *guid;
                    fx.call(move || callbacks.inconsistent_topic(topic_guid, count));
                }
            }
        }
    }

    pub(crate) fn remote_topic(&mut self, topic: TopicData, fx: &mut Effects) {
        if self.is_ignored(&topic.guid) {
            return;
        }
        if self.sedp.remote_topics.get(&topic.guid) == Some(&topic) {
            return;
        }
        self.sedp.remote_topics.insert(topic.guid, topic.clone());
        self.bit_publish(fx, BitSample::Topic(topic));
        self.detect_inconsistent_topics(fx);
    }

    pub(crate) fn remote_publication(
        &mut self,
        publication: PublicationData,
        now: Instant,
        fx: &mut Effects,
    ) {
        let guid = publication.guid;
        if self.is_ignored(&guid) {
            return;
        }
        let prev = self.sedp.remote_writers.insert(guid, publication.clone());
        if prev.as_ref() == Some(&publication) {
            return;
        }
        self.bit_publish(fx, BitSample::Publication(publication.clone()));
        match prev {
            Some(old) if publication_locators_only(&old, &publication) => {
                self.refresh_pair_locators(guid, fx);
            }
            _ => self.evaluate_writer(guid, now, fx),
        }
    }

    pub(crate) fn remote_subscription(
        &mut self,
        subscription: SubscriptionData,
        now: Instant,
        fx: &mut Effects,
    ) {
        let guid = subscription.guid;
        if self.is_ignored(&guid) {
            return;
        }
        let prev = self.sedp.remote_readers.insert(guid, subscription.clone());
        if prev.as_ref() == Some(&subscription) {
            return;
        }
        self.bit_publish(fx, BitSample::Subscription(subscription.clone()));
        match prev {
            Some(old) if subscription_locators_only(&old, &subscription) => {
                self.refresh_pair_locators(guid, fx);
            }
            Some(old) if filter_params_only(&old, &subscription) => {
                let params = subscription
                    .content_filter
                    .as_ref()
                    .map(|f| f.expression_parameters.clone())
                    .unwrap_or_default();
                self.propagate_filter_params(guid, &params, fx);
            }
            Some(old) if filter_redefined(&old.content_filter, &subscription.content_filter) => {
                self.unmatch_endpoint(guid, fx);
                self.evaluate_reader(guid, now, fx);
            }
            _ => self.evaluate_reader(guid, now, fx),
        }
    }

    pub(crate) fn remote_dispose(&mut self, builtin: Builtin, guid: GUID, fx: &mut Effects) {
        match builtin {
            Builtin::Topics => {
                if self.sedp.remote_topics.remove(&guid).is_some() {
                    for topic in self.sedp.topics.values_mut() {
                        topic.inconsistent.remove(&guid);
                    }
                    self.bit_dispose(fx, BitKind::Topic, guid);
                }
            }
            Builtin::Publications => {
                if self.sedp.remote_writers.remove(&guid).is_some() {
                    self.unmatch_endpoint(guid, fx);
                    self.bit_dispose(fx, BitKind::Publication, guid);
                }
            }
            Builtin::Subscriptions => {
                if self.sedp.remote_readers.remove(&guid).is_some() {
                    self.unmatch_endpoint(guid, fx);
                    self.bit_dispose(fx, BitKind::Subscription, guid);
                }
            }
            Builtin::ParticipantMessage => {}
        }
    }

    /// A peer asserted liveliness: notify local readers matched with its writers.
    pub(crate) fn remote_liveliness(&mut self, message: ParticipantMessageData, fx: &mut Effects) {
        let participant = message.participant;
        let readers: BTreeSet<GUID> = self
            .sedp
            .pairs
            .iter()
            .filter(|((w, r), s)| {
                **s == PairState::Matched
                    && w.prefix == participant.prefix
                    && self.sedp.readers.contains_key(r)
            })
            .map(|((_, r), _)| *r)
            .collect();
        for reader in readers {
            if let Some(local) = self.sedp.readers.get(&reader) {
                let callbacks = local.callbacks.clone();
                fx.call(move || callbacks.signal_liveliness(reader, participant));
            }
        }
    }
}

fn publication_locators_only(old: &PublicationData, new: &PublicationData) -> bool {
    old.locators != new.locators
        && PublicationData {
            locators: new.locators.clone(),
            ..old.clone()
        } == *new
}

fn subscription_locators_only(old: &SubscriptionData, new: &SubscriptionData) -> bool {
    old.locators != new.locators
        && SubscriptionData {
            locators: new.locators.clone(),
            ..old.clone()
        } == *new
}

/// Same filter class and expression, different parameters, nothing else changed.
pub(crate) fn filter_params_only(old: &SubscriptionData, new: &SubscriptionData) -> bool {
    let (Some(a), Some(b)) = (&old.content_filter, &new.content_filter) else {
        return false;
    };
    a.expression_parameters != b.expression_parameters
        && ContentFilterProperty {
            expression_parameters: b.expression_parameters.clone(),
            ..a.clone()
        } == *b
        && SubscriptionData {
            content_filter: new.content_filter.clone(),
            ..old.clone()
        } == *new
}

/// Filter added, removed, or its class/expression changed.
pub(crate) fn filter_redefined(
    old: &Option<ContentFilterProperty>,
    new: &Option<ContentFilterProperty>,
) -> bool {
    match (old, new) {
        (None, None) => false,
        (Some(a), Some(b)) => {
            a.effective_class() != b.effective_class() || a.filter_expression != b.filter_expression
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(params: &[&str]) -> SubscriptionData {
        SubscriptionData {
            guid: GUID::entity([2; 12], 1, EntityKind::ReaderWithKey),
            participant_guid: GUID::participant([2; 12]),
            topic_name: "T".to_string(),
            type_name: "X".to_string(),
            qos: QoS::default(),
            locators: Vec::new(),
            type_info: None,
            content_filter: Some(ContentFilterProperty::sql(
                "cft",
                "T",
                "key > %0",
                params.iter().map(|p| p.to_string()).collect(),
            )),
        }
    }

    #[test]
    fn test_filter_change_classification() {
        let a = subscription(&["10"]);
        let b = subscription(&["20"]);
        assert!(filter_params_only(&a, &b));
        assert!(!filter_redefined(&a.content_filter, &b.content_filter));

        let mut c = b.clone();
        if let Some(f) = c.content_filter.as_mut() {
            f.filter_expression = "key < %0".to_string();
        }
        assert!(!filter_params_only(&b, &c));
        assert!(filter_redefined(&b.content_filter, &c.content_filter));

        let mut d = b.clone();
        d.qos = QoS::reliable();
        assert!(!filter_params_only(&a, &d));
    }

    #[test]
    fn test_locator_only_change() {
        let a = subscription(&["10"]);
        let mut b = a.clone();
        b.locators.push("10.0.0.2:7411".parse().unwrap());
        assert!(subscription_locators_only(&a, &b));
        assert!(!subscription_locators_only(&a, &a));
    }
}
