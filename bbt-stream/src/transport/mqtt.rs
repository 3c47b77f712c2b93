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

//! Broker-family adapter: connect-time credentials, per-topic QoS subscribes
//! acknowledged by SubAck return codes, JSON envelopes on `channel/resource`
//! topics.

use crate::config::{TransportConfig, TransportKind};
use crate::error::{Result, StreamError};
use crate::message::{Envelope, Message, Qos, Topic};
use crate::observability::{events, fields};
use crate::registry::TopicScheme;
use crate::signer::hmac_sha1_base64;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{SubscribeAuth, SubscribeRequest, Transport, TransportEvent, TransportEventSender};

const COMPONENT: &str = "mqtt_transport";

pub const DEFAULT_BROKER_HOST: &str = "mqtt.beebotte.com";
pub const DEFAULT_TLS_PORT: u16 = 8883;
pub const DEFAULT_PORT: u16 = 1883;

/// SubAck return code for a refused topic filter.
pub const SUBACK_FAILURE: u8 = 0x80;

/// Username/password pair presented on CONNECT.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl BrokerCredentials {
    /// Derives the CONNECT credential. With the API key, the secret key and
    /// the account username the signature form is used; otherwise the secret
    /// key, then the token.
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        if config.has_api_key() && config.has_secret_key() && config.has_username() {
            let api_key = config.api_key.as_deref().unwrap_or_default();
            let secret_key = config.secret_key.as_deref().unwrap_or_default();
            let username = config.username.as_deref().unwrap_or_default();
            let signature = hmac_sha1_base64(secret_key, username)?;
            return Ok(Self {
                username: api_key.to_string(),
                password: format!("{username}:{signature}"),
            });
        }
        if let Some(secret_key) = config.secret_key.as_deref().filter(|s| !s.is_empty()) {
            return Ok(Self {
                username: secret_key.to_string(),
                password: String::new(),
            });
        }
        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(Self {
                username: format!("token:{token}"),
                password: String::new(),
            });
        }
        Err(StreamError::Configuration(
            "missing secret key or authentication token".to_string(),
        ))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConnectOptions {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub client_id: Option<String>,
    pub clean: bool,
    pub credentials: BrokerCredentials,
}

impl BrokerConnectOptions {
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let default_port = if config.ssl {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PORT
        };
        Ok(Self {
            host: config
                .host
                .clone()
                .unwrap_or_else(|| DEFAULT_BROKER_HOST.to_string()),
            port: config.port.unwrap_or(default_port),
            tls: config.ssl,
            client_id: config.client_id.clone(),
            clean: config.clean,
            credentials: BrokerCredentials::from_config(config)?,
        })
    }
}

/// What a broker link reports back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerSignal {
    ConnAck,
    Disconnected,
    SubAck { packet_id: u16, return_codes: Vec<u8> },
    UnsubAck { packet_id: u16 },
    Publish { topic: String, payload: Vec<u8> },
    Error(String),
}

/// Black-box publish/subscribe broker client.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    /// Starts the session; acknowledgements and inbound traffic arrive on the
    /// returned receiver until the link closes.
    async fn open(
        &self,
        options: &BrokerConnectOptions,
    ) -> Result<mpsc::UnboundedReceiver<BrokerSignal>>;

    async fn close(&self) -> Result<()>;

    /// Returns the packet id the matching SubAck will carry.
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<u16>;

    async fn unsubscribe(&self, topic: &str) -> Result<u16>;

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<()>;
}

#[derive(Default)]
struct InFlight {
    subscribes: HashMap<u16, (Topic, Qos)>,
    unsubscribes: HashMap<u16, Topic>,
}

pub struct MqttTransport {
    link: Arc<dyn BrokerLink>,
    options: BrokerConnectOptions,
    publish_qos: Qos,
    enforce_write: bool,
    events: TransportEventSender,
    in_flight: Arc<Mutex<InFlight>>,
    session_seen: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn new(
        config: &TransportConfig,
        link: Arc<dyn BrokerLink>,
        events: TransportEventSender,
    ) -> Result<Self> {
        if config.kind != TransportKind::Mqtt {
            return Err(StreamError::TransportMismatch(format!(
                "{:?} configuration given to the broker adapter",
                config.kind
            )));
        }
        Ok(Self {
            link,
            options: BrokerConnectOptions::from_config(config)?,
            publish_qos: config.qos,
            enforce_write: true,
            events,
            in_flight: Arc::new(Mutex::new(InFlight::default())),
            session_seen: Arc::new(AtomicBool::new(false)),
            pump: Mutex::new(None),
        })
    }

    /// Lets publish/write through without a local write grant, leaving the
    /// decision to the broker's ACL.
    pub fn with_write_enforcement(mut self, enforce: bool) -> Self {
        self.enforce_write = enforce;
        self
    }

    pub fn options(&self) -> &BrokerConnectOptions {
        &self.options
    }

    async fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let topic = TopicScheme::BROKER.key(&envelope.channel, &envelope.resource);
        let payload = serde_json::to_vec(envelope)?;
        self.link.publish(&topic, payload, self.publish_qos).await
    }

    async fn pump_signals(
        mut signals: mpsc::UnboundedReceiver<BrokerSignal>,
        in_flight: Arc<Mutex<InFlight>>,
        session_seen: Arc<AtomicBool>,
        events_tx: TransportEventSender,
    ) {
        while let Some(signal) = signals.recv().await {
            let event = match signal {
                BrokerSignal::ConnAck => {
                    if session_seen.swap(true, Ordering::SeqCst) {
                        Some(TransportEvent::Reconnected)
                    } else {
                        Some(TransportEvent::Connected)
                    }
                }
                BrokerSignal::Disconnected => Some(TransportEvent::Disconnected),
                BrokerSignal::SubAck {
                    packet_id,
                    return_codes,
                } => {
                    let pending = in_flight.lock().await.subscribes.remove(&packet_id);
                    match pending {
                        Some((topic, _requested)) => Some(suback_event(topic, &return_codes)),
                        None => {
                            debug!(
                                event = events::SUBSCRIBE_ACK_IGNORED,
                                component = COMPONENT,
                                packet_id,
                                reason = fields::REASON_NO_PENDING_TIMER,
                                "suback for unknown packet"
                            );
                            None
                        }
                    }
                }
                BrokerSignal::UnsubAck { packet_id } => in_flight
                    .lock()
                    .await
                    .unsubscribes
                    .remove(&packet_id)
                    .map(|topic| TransportEvent::UnsubscribeAck {
                        channel: topic.channel,
                        resource: topic.resource,
                    }),
                BrokerSignal::Publish { topic, payload } => {
                    inbound_message(&topic, &payload).map(TransportEvent::Message)
                }
                BrokerSignal::Error(err) => Some(TransportEvent::Error(err)),
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
            "broker link closed"
        );
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        // The pump holds a sender clone and must not outlive the adapter.
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

/// The first return code decides: `0x80` or anything above QoS 2 is a refusal.
fn suback_event(topic: Topic, return_codes: &[u8]) -> TransportEvent {
    match return_codes.first().copied() {
        Some(code) if code <= 2 => TransportEvent::SubscribeAck {
            channel: topic.channel,
            resource: topic.resource,
            qos: if code == 0 {
                Qos::AtMostOnce
            } else {
                Qos::AtLeastOnce
            },
        },
        code => TransportEvent::SubscribeRejected {
            channel: topic.channel,
            resource: topic.resource,
            reason: match code {
                Some(code) => format!("grant denied (return code {code:#04x})"),
                None => "grant denied (empty suback)".to_string(),
            },
        },
    }
}

/// Inbound payloads must be JSON envelopes naming their channel and resource.
/// The envelope wins when it disagrees with the wire topic.
fn inbound_message(topic: &str, payload: &[u8]) -> Option<Message> {
    let Some(message) = serde_json::from_slice(payload)
        .ok()
        .and_then(Message::from_value)
    else {
        debug!(
            event = events::MESSAGE_DROP_UNPARSEABLE,
            component = COMPONENT,
            topic,
            "dropping non-conforming broker payload"
        );
        return None;
    };

    if TopicScheme::BROKER.parse_topic(topic).as_ref() != Some(&message.topic()) {
        debug!(
            event = events::MESSAGE_RECEIVE,
            component = COMPONENT,
            topic,
            envelope_topic = %message.topic(),
            "envelope destination differs from wire topic"
        );
    }
    Some(message)
}

#[async_trait]
impl Transport for MqttTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Mqtt
    }

    async fn connect(&self) -> Result<()> {
        info!(
            event = events::CONNECT_START,
            component = COMPONENT,
            host = self.options.host.as_str(),
            port = self.options.port,
            tls = self.options.tls,
            "opening broker session"
        );

        let signals = self.link.open(&self.options).await?;
        let handle = tokio::spawn(Self::pump_signals(
            signals,
            self.in_flight.clone(),
            self.session_seen.clone(),
            self.events.clone(),
        ));
        if let Some(previous) = self.pump.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        self.session_seen.store(false, Ordering::SeqCst);
        {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.subscribes.clear();
            in_flight.unsubscribes.clear();
        }
        self.link.close().await
    }

    async fn subscribe(
        &self,
        request: &SubscribeRequest,
        _auth: Option<SubscribeAuth>,
    ) -> Result<()> {
        let topic = request.topic();
        let key = TopicScheme::BROKER.key(&topic.channel, &topic.resource);

        // Held across the send so the SubAck cannot overtake the bookkeeping.
        let mut in_flight = self.in_flight.lock().await;
        let packet_id = self.link.subscribe(&key, request.qos).await?;
        in_flight.subscribes.insert(packet_id, (topic, request.qos));
        debug!(
            event = events::SUBSCRIBE_SEND,
            component = COMPONENT,
            topic = key.as_str(),
            packet_id,
            "broker subscribe sent"
        );
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        let key = TopicScheme::BROKER.key(&topic.channel, &topic.resource);

        let mut in_flight = self.in_flight.lock().await;
        let packet_id = self.link.unsubscribe(&key).await?;
        in_flight.unsubscribes.insert(packet_id, topic.clone());
        debug!(
            event = events::UNSUBSCRIBE_SEND,
            component = COMPONENT,
            topic = key.as_str(),
            packet_id,
            "broker unsubscribe sent"
        );
        Ok(())
    }

    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        self.send_envelope(envelope).await
    }

    async fn write(&self, envelope: &Envelope) -> Result<()> {
        self.send_envelope(envelope).await
    }

    fn enforces_write_permission(&self) -> bool {
        self.enforce_write
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TransportConfig {
        TransportConfig::new(TransportKind::Mqtt)
    }

    #[test]
    fn signature_credential_needs_all_three_values() {
        let creds = BrokerCredentials::from_config(
            &config()
                .api_key("access")
                .secret_key("secret")
                .username("alice"),
        )
        .unwrap();

        let signature = hmac_sha1_base64("secret", "alice").unwrap();
        assert_eq!(creds.username, "access");
        assert_eq!(creds.password, format!("alice:{signature}"));
    }

    #[test]
    fn secret_key_credential_has_empty_password() {
        let creds =
            BrokerCredentials::from_config(&config().api_key("access").secret_key("secret"))
                .unwrap();
        assert_eq!(creds.username, "secret");
        assert!(creds.password.is_empty());
    }

    #[test]
    fn token_credential_is_prefixed() {
        let creds = BrokerCredentials::from_config(&config().token("abc")).unwrap();
        assert_eq!(creds.username, "token:abc");
        assert!(BrokerCredentials::from_config(&config()).is_err());
    }

    #[test]
    fn connect_options_pick_port_from_tls() {
        let tls = BrokerConnectOptions::from_config(&config().secret_key("s")).unwrap();
        assert_eq!(tls.host, DEFAULT_BROKER_HOST);
        assert_eq!(tls.port, DEFAULT_TLS_PORT);

        let plain =
            BrokerConnectOptions::from_config(&config().secret_key("s").ssl(false)).unwrap();
        assert_eq!(plain.port, DEFAULT_PORT);

        let custom = BrokerConnectOptions::from_config(
            &config().secret_key("s").host("localhost").port(1884),
        )
        .unwrap();
        assert_eq!((custom.host.as_str(), custom.port), ("localhost", 1884));
    }

    #[test]
    fn suback_codes_map_to_grant_or_rejection() {
        let topic = Topic::new("chan", "res");
        assert_eq!(
            suback_event(topic.clone(), &[1]),
            TransportEvent::SubscribeAck {
                channel: "chan".to_string(),
                resource: "res".to_string(),
                qos: Qos::AtLeastOnce,
            }
        );
        assert!(matches!(
            suback_event(topic.clone(), &[SUBACK_FAILURE]),
            TransportEvent::SubscribeRejected { .. }
        ));
        assert!(matches!(
            suback_event(topic, &[]),
            TransportEvent::SubscribeRejected { .. }
        ));
    }

    #[test]
    fn inbound_payload_must_be_a_conforming_envelope() {
        let message = inbound_message(
            "chan/res",
            br#"{"channel":"chan","resource":"res","data":7}"#,
        )
        .unwrap();
        assert_eq!(message.data, serde_json::json!(7));

        assert!(inbound_message("chan/res", b"plain text").is_none());
        assert!(inbound_message("chan/res", br#"{"data":7}"#).is_none());
    }
}
