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

//! Transport contract shared by the broker-family and socket-family adapters.
//!
//! An adapter owns one wire link and translates between [`Stream`](crate::Stream)
//! operations and the link's primitives. Everything the wire reports
//! asynchronously (connection changes, acknowledgements, inbound messages) is
//! pushed to the stream as a [`TransportEvent`] over the channel handed to the
//! adapter at construction.

pub mod auth;
pub mod mqtt;
pub mod socketio;

use crate::config::{StreamConfig, TransportKind};
use crate::error::{Result, StreamError};
use crate::message::{Envelope, Message, Qos, Topic};
use crate::registry::TopicScheme;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use self::auth::SubscriptionAuthorizer;
use self::mqtt::{BrokerLink, MqttTransport};
use self::socketio::{SocketIoTransport, SocketLink};

/// Sending half handed to every adapter.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Asynchronous notifications raised by an adapter.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Connected,
    Reconnected,
    Disconnected,
    SubscribeAck {
        channel: String,
        resource: String,
        qos: Qos,
    },
    SubscribeRejected {
        channel: String,
        resource: String,
        reason: String,
    },
    UnsubscribeAck {
        channel: String,
        resource: String,
    },
    PublishRejected {
        envelope: Envelope,
        reason: String,
    },
    WriteRejected {
        envelope: Envelope,
        reason: String,
    },
    Message(Message),
    Error(String),
}

/// Everything an adapter needs to put one subscribe on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub channel: String,
    pub resource: String,
    pub read: bool,
    pub write: bool,
    pub ttl: u64,
    pub qos: Qos,
    pub username: Option<String>,
    pub userid: Option<String>,
}

impl SubscribeRequest {
    pub fn topic(&self) -> Topic {
        Topic::new(self.channel.clone(), self.resource.clone())
    }

    /// Whether the service expects a per-subscribe authorization.
    pub fn requires_auth(&self) -> bool {
        auth::auth_required(&self.channel, self.write)
    }
}

/// Authorization attached to a subscribe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscribeAuth {
    /// `keyId:signature` grant, optionally bound to a user id.
    Signature {
        sig: String,
        userid: Option<String>,
    },
    /// Channel token carried as is.
    Token {
        token: String,
        userid: Option<String>,
    },
}

/// Capability set every wire family implements.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn scheme(&self) -> TopicScheme {
        scheme_for(self.kind())
    }

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Per-subscribe authorization round trip. Families that authenticate at
    /// connect time keep the default.
    async fn authorize_subscribe(
        &self,
        _request: &SubscribeRequest,
    ) -> Result<Option<SubscribeAuth>> {
        Ok(None)
    }

    async fn subscribe(&self, request: &SubscribeRequest, auth: Option<SubscribeAuth>)
        -> Result<()>;

    async fn unsubscribe(&self, topic: &Topic) -> Result<()>;

    async fn publish(&self, envelope: &Envelope) -> Result<()>;

    async fn write(&self, envelope: &Envelope) -> Result<()>;

    /// True when publish/write must hold a granted write permission locally
    /// before anything is sent.
    fn enforces_write_permission(&self) -> bool;
}

pub fn scheme_for(kind: TransportKind) -> TopicScheme {
    match kind {
        TransportKind::Mqtt => TopicScheme::BROKER,
        TransportKind::SocketIo => TopicScheme::SOCKET,
    }
}

/// Black-box wire backend plugged into [`Stream::new`](crate::Stream::new).
#[derive(Clone)]
pub enum WireLink {
    Broker(Arc<dyn BrokerLink>),
    Socket(Arc<dyn SocketLink>),
}

impl WireLink {
    pub fn kind(&self) -> TransportKind {
        match self {
            WireLink::Broker(_) => TransportKind::Mqtt,
            WireLink::Socket(_) => TransportKind::SocketIo,
        }
    }
}

impl std::fmt::Debug for WireLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireLink::Broker(_) => f.write_str("WireLink::Broker"),
            WireLink::Socket(_) => f.write_str("WireLink::Socket"),
        }
    }
}

/// Selects and builds the adapter matching `config.transport.type`.
pub(crate) fn build_transport(
    config: &StreamConfig,
    link: WireLink,
    authorizer: Option<Arc<dyn SubscriptionAuthorizer>>,
    events: TransportEventSender,
) -> Result<Arc<dyn Transport>> {
    if link.kind() != config.transport.kind {
        return Err(StreamError::TransportMismatch(format!(
            "configured {:?} but the wire link is {:?}",
            config.transport.kind,
            link.kind()
        )));
    }

    match link {
        WireLink::Broker(link) => Ok(Arc::new(MqttTransport::new(
            &config.transport,
            link,
            events,
        )?)),
        WireLink::Socket(link) => Ok(Arc::new(SocketIoTransport::new(
            config,
            link,
            authorizer,
            events,
        )?)),
    }
}
