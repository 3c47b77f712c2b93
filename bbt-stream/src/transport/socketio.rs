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

//! Socket-family adapter: one bidirectional connection carrying versioned
//! JSON frames, with authorization negotiated per subscribe.

use crate::config::{ResolvedAuth, StreamConfig, TransportKind};
use crate::error::{Result, StreamError};
use crate::message::{Envelope, Message, Qos, Topic};
use crate::observability::{events, fields};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::auth::{AuthRequest, HttpAuthorizer, SecretKeyAuthorizer, SubscriptionAuthorizer};
use super::{SubscribeAuth, SubscribeRequest, Transport, TransportEvent, TransportEventSender};

const COMPONENT: &str = "socketio_transport";

pub const DEFAULT_WS_HOST: &str = "ws.beebotte.com";
pub const DEFAULT_WS_PORT: u16 = 80;
pub const DEFAULT_WS_TLS_PORT: u16 = 443;
pub const PROTOCOL_VERSION: u64 = 1;

pub const CONTROL_CHANNEL: &str = "control";
pub const STREAM_CHANNEL: &str = "stream";

/// What a socket link reports back.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketSignal {
    Connected,
    Reconnected,
    Disconnected,
    Error(String),
    /// One inbound JSON message, framed or bare.
    Message(Value),
}

/// Black-box bidirectional socket client.
#[async_trait]
pub trait SocketLink: Send + Sync {
    async fn open(&self, url: &str, query: &str) -> Result<mpsc::UnboundedReceiver<SocketSignal>>;

    async fn close(&self) -> Result<()>;

    async fn send(&self, frame: Value) -> Result<()>;

    /// Engine session id of the live connection.
    fn session_id(&self) -> Option<String>;
}

/// `{version, channel, event, data}` frame.
pub fn frame(channel: &str, event: &str, data: Value) -> Value {
    json!({
        "version": PROTOCOL_VERSION,
        "channel": channel,
        "event": event,
        "data": data,
    })
}

enum SocketAuth {
    Token(String),
    Authorizer(Arc<dyn SubscriptionAuthorizer>),
    Unavailable,
}

pub struct SocketIoTransport {
    link: Arc<dyn SocketLink>,
    url: String,
    query: String,
    auth: SocketAuth,
    confirm_on_send: bool,
    events: TransportEventSender,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SocketIoTransport {
    pub fn new(
        config: &StreamConfig,
        link: Arc<dyn SocketLink>,
        authorizer: Option<Arc<dyn SubscriptionAuthorizer>>,
        events: TransportEventSender,
    ) -> Result<Self> {
        let transport = &config.transport;
        if transport.kind != TransportKind::SocketIo {
            return Err(StreamError::TransportMismatch(format!(
                "{:?} configuration given to the socket adapter",
                transport.kind
            )));
        }
        transport.validate()?;

        let port = transport.port.unwrap_or(if transport.ssl {
            DEFAULT_WS_TLS_PORT
        } else {
            DEFAULT_WS_PORT
        });
        let url = format!(
            "{}://{}:{}",
            if transport.ssl { "https" } else { "http" },
            transport.host.as_deref().unwrap_or(DEFAULT_WS_HOST),
            port
        );

        let mut parsed = Url::parse(&url)
            .map_err(|e| StreamError::Configuration(format!("invalid socket url {url}: {e}")))?;
        {
            let username = config.userinfo.username.as_deref().unwrap_or_default();
            let mut pairs = parsed.query_pairs_mut();
            match transport.token.as_deref().filter(|t| !t.is_empty()) {
                Some(token) => pairs.append_pair("token", token),
                None => pairs.append_pair("key", transport.api_key.as_deref().unwrap_or_default()),
            };
            pairs.append_pair("username", username);
        }
        let query = parsed.query().unwrap_or_default().to_string();

        let auth = match (authorizer, transport.resolve_auth()) {
            (Some(authorizer), _) => SocketAuth::Authorizer(authorizer),
            (None, ResolvedAuth::SecretKey {
                api_key,
                secret_key,
            }) => SocketAuth::Authorizer(Arc::new(SecretKeyAuthorizer::new(
                &api_key,
                &secret_key,
            )?)),
            (None, ResolvedAuth::Token(token)) => SocketAuth::Token(token),
            (None, ResolvedAuth::Endpoint { method, url }) => {
                SocketAuth::Authorizer(Arc::new(HttpAuthorizer::new(url, method)?))
            }
            (None, ResolvedAuth::Function) => {
                return Err(StreamError::Configuration(
                    "the function auth method needs an authorizer".to_string(),
                ))
            }
            (None, ResolvedAuth::Unavailable) => SocketAuth::Unavailable,
        };

        Ok(Self {
            link,
            url,
            query,
            auth,
            confirm_on_send: false,
            events,
            pump: Mutex::new(None),
        })
    }

    /// Treats a successful send as the confirmation, for services that never
    /// acknowledge subscribe/unsubscribe on the control channel.
    pub fn with_confirm_on_send(mut self, confirm: bool) -> Self {
        self.confirm_on_send = confirm;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    fn confirm(&self, event: TransportEvent) {
        if self.confirm_on_send {
            let _ = self.events.send(event);
        }
    }

    async fn pump_signals(
        mut signals: mpsc::UnboundedReceiver<SocketSignal>,
        events_tx: TransportEventSender,
    ) {
        while let Some(signal) = signals.recv().await {
            let event = match signal {
                SocketSignal::Connected => Some(TransportEvent::Connected),
                SocketSignal::Reconnected => Some(TransportEvent::Reconnected),
                SocketSignal::Disconnected => Some(TransportEvent::Disconnected),
                SocketSignal::Error(err) => Some(TransportEvent::Error(err)),
                SocketSignal::Message(value) => inbound_event(value),
            };

            if let Some(event) = event {
                if events_tx.send(event).is_err() {
                    debug!(
                        event = events::LINK_CLOSED,
                        component = COMPONENT,
                        reason = fields::REASON_STREAM_DROPPED,
                        "stream dropped; stopping signal pump"
                    );
                    return;
                }
            }
        }

        debug!(
            event = events::LINK_CLOSED,
            component = COMPONENT,
            reason = fields::REASON_LINK_CLOSED,
            "socket link closed"
        );
    }
}

impl Drop for SocketIoTransport {
    fn drop(&mut self) {
        // The pump holds a sender clone and must not outlive the adapter.
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

fn reason_of(data: &Value) -> String {
    str_field(data, "error")
        .or_else(|| str_field(data, "message"))
        .or_else(|| {
            data.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "rejected by the service".to_string())
}

/// Maps an inbound message to a transport event. Framed control messages are
/// acknowledgements; framed stream messages and bare envelopes are data.
fn inbound_event(value: Value) -> Option<TransportEvent> {
    let framed = value.get("version").is_some() && value.get("event").is_some();
    if !framed {
        return data_event(value);
    }

    let channel = value.get("channel").and_then(Value::as_str).unwrap_or_default();
    let event = value.get("event").and_then(Value::as_str).unwrap_or_default();
    let data = value.get("data").cloned().unwrap_or(Value::Null);

    if channel == STREAM_CHANNEL {
        return data_event(data);
    }
    if channel != CONTROL_CHANNEL {
        warn!(
            event = events::LINK_SIGNAL_UNKNOWN,
            component = COMPONENT,
            frame_channel = channel,
            "frame on unknown channel"
        );
        return None;
    }

    let topic = || Some((str_field(&data, "channel")?, str_field(&data, "resource")?));
    let ack = match event {
        "subscribed" => topic().map(|(channel, resource)| TransportEvent::SubscribeAck {
            qos: data
                .get("qos")
                .and_then(Value::as_u64)
                .and_then(|q| u8::try_from(q).ok())
                .and_then(|q| Qos::try_from(q).ok())
                .unwrap_or_default(),
            channel,
            resource,
        }),
        "subscribeError" => topic().map(|(channel, resource)| TransportEvent::SubscribeRejected {
            channel,
            resource,
            reason: reason_of(&data),
        }),
        "unsubscribed" => {
            topic().map(|(channel, resource)| TransportEvent::UnsubscribeAck { channel, resource })
        }
        "publishError" | "writeError" => {
            let reason = reason_of(&data);
            let envelope = data.get("message").cloned().unwrap_or_else(|| data.clone());
            serde_json::from_value::<Envelope>(envelope)
                .ok()
                .map(|envelope| {
                    if event == "writeError" {
                        TransportEvent::WriteRejected { envelope, reason }
                    } else {
                        TransportEvent::PublishRejected { envelope, reason }
                    }
                })
        }
        other => {
            debug!(
                event = events::LINK_SIGNAL_UNKNOWN,
                component = COMPONENT,
                control_event = other,
                "ignoring control frame"
            );
            return None;
        }
    };

    if ack.is_none() {
        debug!(
            event = events::MESSAGE_DROP_UNPARSEABLE,
            component = COMPONENT,
            control_event = event,
            "control frame without a topic"
        );
    }
    ack
}

fn data_event(value: Value) -> Option<TransportEvent> {
    match Message::from_value(value) {
        Some(message) => Some(TransportEvent::Message(message)),
        None => {
            debug!(
                event = events::MESSAGE_DROP_UNPARSEABLE,
                component = COMPONENT,
                "dropping non-conforming message"
            );
            None
        }
    }
}

#[async_trait]
impl Transport for SocketIoTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::SocketIo
    }

    async fn connect(&self) -> Result<()> {
        info!(
            event = events::CONNECT_START,
            component = COMPONENT,
            url = self.url.as_str(),
            "opening socket connection"
        );

        let signals = self.link.open(&self.url, &self.query).await?;
        let handle = tokio::spawn(Self::pump_signals(signals, self.events.clone()));
        if let Some(previous) = self.pump.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        self.link.close().await
    }

    async fn authorize_subscribe(
        &self,
        request: &SubscribeRequest,
    ) -> Result<Option<SubscribeAuth>> {
        if !request.requires_auth() {
            return Ok(None);
        }

        let authorizer = match &self.auth {
            SocketAuth::Token(token) => {
                return Ok(Some(SubscribeAuth::Token {
                    token: token.clone(),
                    userid: request.userid.clone(),
                }))
            }
            SocketAuth::Authorizer(authorizer) => authorizer.clone(),
            SocketAuth::Unavailable => {
                return Err(StreamError::Authentication(
                    "missing authentication endpoint".to_string(),
                ))
            }
        };

        let sid = self
            .link
            .session_id()
            .filter(|sid| !sid.is_empty())
            .ok_or_else(|| StreamError::Connection("no session id on the socket".to_string()))?;

        let auth_request = AuthRequest {
            sid,
            channel: request.channel.clone(),
            resource: request.resource.clone(),
            ttl: request.ttl,
            read: request.read,
            write: request.write,
            username: request.username.clone(),
            userid: request.userid.clone(),
        };
        let grant = authorizer.authorize(&auth_request).await?;

        debug!(
            event = events::AUTH_OK,
            component = COMPONENT,
            channel = request.channel.as_str(),
            resource = request.resource.as_str(),
            "subscribe grant obtained"
        );
        Ok(Some(SubscribeAuth::Signature {
            sig: grant.auth,
            userid: grant.userid,
        }))
    }

    async fn subscribe(
        &self,
        request: &SubscribeRequest,
        auth: Option<SubscribeAuth>,
    ) -> Result<()> {
        let mut data = Map::new();
        data.insert("channel".into(), json!(request.channel));
        data.insert("resource".into(), json!(request.resource));
        data.insert("ttl".into(), json!(request.ttl));
        data.insert("read".into(), json!(request.read));
        data.insert("write".into(), json!(request.write));
        if request.username.is_some() || request.userid.is_some() {
            data.insert(
                "userinfo".into(),
                json!({ "username": request.username, "userid": request.userid }),
            );
        }
        match auth {
            Some(SubscribeAuth::Signature { sig, userid }) => {
                if let Some(sid) = self.link.session_id() {
                    data.insert("sid".into(), json!(sid));
                }
                data.insert("sig".into(), json!(sig));
                if let Some(userid) = userid {
                    data.insert("userid".into(), json!(userid));
                }
            }
            Some(SubscribeAuth::Token { token, userid }) => {
                data.insert("token".into(), json!(token));
                if let Some(userid) = userid {
                    data.insert("userid".into(), json!(userid));
                }
            }
            None => {}
        }

        self.link
            .send(frame(CONTROL_CHANNEL, "subscribe", Value::Object(data)))
            .await?;
        self.confirm(TransportEvent::SubscribeAck {
            channel: request.channel.clone(),
            resource: request.resource.clone(),
            qos: request.qos,
        });
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        self.link
            .send(frame(
                CONTROL_CHANNEL,
                "unsubscribe",
                json!({ "channel": topic.channel, "resource": topic.resource }),
            ))
            .await?;
        self.confirm(TransportEvent::UnsubscribeAck {
            channel: topic.channel.clone(),
            resource: topic.resource.clone(),
        });
        Ok(())
    }

    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        self.link
            .send(frame(STREAM_CHANNEL, "emit", serde_json::to_value(envelope)?))
            .await
    }

    async fn write(&self, envelope: &Envelope) -> Result<()> {
        self.link
            .send(frame(STREAM_CHANNEL, "write", serde_json::to_value(envelope)?))
            .await
    }

    fn enforces_write_permission(&self) -> bool {
        true
    }
}
