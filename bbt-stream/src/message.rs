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

//! Wire-facing value types: topics, quality of service, outbound envelopes
//! and normalized inbound messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A `(channel, resource)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub channel: String,
    pub resource: String,
}

impl Topic {
    pub fn new(channel: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.resource)
    }
}

/// Delivery guarantee requested for a broker subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
}

impl Qos {
    pub fn as_u8(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            other => Err(format!("unsupported qos level {other}")),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        qos.as_u8()
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Outbound publish/write envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub resource: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ispublic: Option<bool>,
    /// Persistent write rather than a transient publish.
    #[serde(default, skip_serializing_if = "is_false")]
    pub write: bool,
}

impl Envelope {
    pub fn topic(&self) -> Topic {
        Topic::new(self.channel.clone(), self.resource.clone())
    }
}

/// Optional fields for [`Stream::publish`](crate::Stream::publish) and
/// [`Stream::write`](crate::Stream::write).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub ts: Option<i64>,
    pub route: Option<String>,
    pub ispublic: Option<bool>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ts(mut self, ts: i64) -> Self {
        self.ts = Some(ts);
        self
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn ispublic(mut self, ispublic: bool) -> Self {
        self.ispublic = Some(ispublic);
        self
    }
}

/// Inbound message handed to subscription callbacks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub channel: String,
    pub resource: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    /// Any other envelope fields the service attached (`wts`, `ispublic`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Builds a message from a decoded JSON envelope; `None` when the envelope
    /// does not carry both a channel and a resource.
    pub fn from_value(value: Value) -> Option<Self> {
        let has_destination = value.get("channel").and_then(Value::as_str).is_some()
            && value.get("resource").and_then(Value::as_str).is_some();
        if !has_destination {
            return None;
        }
        serde_json::from_value(value).ok()
    }

    pub fn topic(&self) -> Topic {
        Topic::new(self.channel.clone(), self.resource.clone())
    }
}
