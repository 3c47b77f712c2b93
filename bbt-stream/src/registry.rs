/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Subscription registry keyed by topic identity, with wildcard fallback.

use crate::message::Topic;
use crate::subscription::Subscription;
use serde::Serialize;
use std::collections::HashMap;

/// Separator/wildcard pair of one transport family. Fixed for the lifetime of
/// a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TopicScheme {
    pub separator: char,
    pub wildcard: &'static str,
}

impl TopicScheme {
    /// Broker family: `channel/resource`, `#` for every resource.
    pub const BROKER: TopicScheme = TopicScheme {
        separator: '/',
        wildcard: "#",
    };

    /// Socket family: `channel.resource`, `*` for every resource.
    pub const SOCKET: TopicScheme = TopicScheme {
        separator: '.',
        wildcard: "*",
    };

    pub fn key(&self, channel: &str, resource: &str) -> String {
        format!("{channel}{}{resource}", self.separator)
    }

    pub fn wildcard_key(&self, channel: &str) -> String {
        self.key(channel, self.wildcard)
    }

    pub fn is_wildcard(&self, resource: &str) -> bool {
        resource == self.wildcard
    }

    /// Splits a wire topic into its channel and resource. Topics with more or
    /// fewer than two levels are not ours.
    pub fn parse_topic(&self, topic: &str) -> Option<Topic> {
        let mut parts = topic.split(self.separator);
        let channel = parts.next().filter(|part| !part.is_empty())?;
        let resource = parts.next().filter(|part| !part.is_empty())?;
        if parts.next().is_some() {
            return None;
        }
        Some(Topic::new(channel, resource))
    }
}

/// Exclusive owner of every [`Subscription`] of a stream.
#[derive(Debug)]
pub(crate) struct SubscriptionRegistry {
    scheme: TopicScheme,
    entries: HashMap<String, Subscription>,
}

impl SubscriptionRegistry {
    pub(crate) fn new(scheme: TopicScheme) -> Self {
        Self {
            scheme,
            entries: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn scheme(&self) -> TopicScheme {
        self.scheme
    }

    pub(crate) fn get(&self, channel: &str, resource: &str) -> Option<&Subscription> {
        self.entries.get(&self.scheme.key(channel, resource))
    }

    #[cfg(test)]
    pub(crate) fn get_mut(&mut self, channel: &str, resource: &str) -> Option<&mut Subscription> {
        let key = self.scheme.key(channel, resource);
        self.entries.get_mut(&key)
    }

    pub(crate) fn get_by_key(&self, key: &str) -> Option<&Subscription> {
        self.entries.get(key)
    }

    pub(crate) fn get_by_key_mut(&mut self, key: &str) -> Option<&mut Subscription> {
        self.entries.get_mut(key)
    }

    /// Exact identity first, then the channel's wildcard subscription.
    pub(crate) fn get_any(&self, channel: &str, resource: &str) -> Option<&Subscription> {
        self.entries
            .get(&self.scheme.key(channel, resource))
            .or_else(|| self.entries.get(&self.scheme.wildcard_key(channel)))
    }

    /// Key of the entry [`Self::get_any`] would return.
    pub(crate) fn resolve_key(&self, channel: &str, resource: &str) -> Option<String> {
        let exact = self.scheme.key(channel, resource);
        if self.entries.contains_key(&exact) {
            return Some(exact);
        }
        let wildcard = self.scheme.wildcard_key(channel);
        self.entries.contains_key(&wildcard).then_some(wildcard)
    }

    /// Like [`Self::get_any`], but the matched entry must currently hold the
    /// requested permissions. The exact entry shadows the wildcard one even
    /// when it lacks them.
    pub(crate) fn get_with_permission(
        &self,
        channel: &str,
        resource: &str,
        read: bool,
        write: bool,
    ) -> Option<&Subscription> {
        self.get_any(channel, resource).filter(|subscription| {
            (!read || subscription.has_read_permission())
                && (!write || subscription.has_write_permission())
        })
    }

    pub(crate) fn insert(&mut self, subscription: Subscription) -> Option<Subscription> {
        self.entries
            .insert(subscription.key().to_string(), subscription)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<Subscription> {
        self.entries.remove(key)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
