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

use async_trait::async_trait;
use bbt_stream::transport::mqtt::{BrokerConnectOptions, BrokerLink, BrokerSignal, SUBACK_FAILURE};
use bbt_stream::{Qos, Result, StreamError};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct BrokerState {
    signals: Option<mpsc::UnboundedSender<BrokerSignal>>,
    next_packet_id: u16,
    opened: Vec<BrokerConnectOptions>,
    closed: usize,
    subscribes: Vec<(String, Qos)>,
    unsubscribes: Vec<String>,
    publishes: Vec<(String, Vec<u8>, Qos)>,
    last_subscribe_packet: Option<u16>,
    auto_ack: bool,
    denied_topics: HashSet<String>,
    fail_sends: bool,
}

/// Scripted broker link. With auto-ack enabled it answers CONNECT, SUBSCRIBE
/// and UNSUBSCRIBE like a permissive broker; otherwise tests drive every
/// signal by hand.
#[derive(Clone, Default)]
pub struct FakeBrokerLink {
    state: Arc<Mutex<BrokerState>>,
}

impl FakeBrokerLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_ack() -> Self {
        let link = Self::default();
        link.state().auto_ack = true;
        link
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().expect("broker state poisoned")
    }

    /// SubAcks for `topic` carry the failure return code.
    pub fn deny(&self, topic: &str) {
        self.state().denied_topics.insert(topic.to_string());
    }

    /// Makes every subscribe/unsubscribe/publish call fail.
    pub fn fail_sends(&self, fail: bool) {
        self.state().fail_sends = fail;
    }

    /// Pushes a signal as if the broker had sent it.
    pub fn inject(&self, signal: BrokerSignal) {
        let state = self.state();
        if let Some(signals) = state.signals.as_ref() {
            let _ = signals.send(signal);
        }
    }

    pub fn connack(&self) {
        self.inject(BrokerSignal::ConnAck);
    }

    pub fn drop_connection(&self) {
        self.inject(BrokerSignal::Disconnected);
    }

    /// Acknowledges the most recent subscribe with `return_code`.
    pub fn ack_last_subscribe(&self, return_code: u8) {
        let packet_id = self.state().last_subscribe_packet;
        if let Some(packet_id) = packet_id {
            self.inject(BrokerSignal::SubAck {
                packet_id,
                return_codes: vec![return_code],
            });
        }
    }

    /// Delivers a JSON payload on `topic`.
    pub fn deliver(&self, topic: &str, payload: &Value) {
        self.inject(BrokerSignal::Publish {
            topic: topic.to_string(),
            payload: payload.to_string().into_bytes(),
        });
    }

    pub fn opened(&self) -> Vec<BrokerConnectOptions> {
        self.state().opened.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state().closed
    }

    pub fn subscribe_calls(&self) -> Vec<(String, Qos)> {
        self.state().subscribes.clone()
    }

    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.state().unsubscribes.clone()
    }

    pub fn publish_calls(&self) -> Vec<(String, Value, Qos)> {
        self.state()
            .publishes
            .iter()
            .map(|(topic, payload, qos)| {
                let value = serde_json::from_slice(payload).unwrap_or(Value::Null);
                (topic.clone(), value, *qos)
            })
            .collect()
    }

    fn next_packet_id(state: &mut BrokerState) -> u16 {
        state.next_packet_id = state.next_packet_id.wrapping_add(1).max(1);
        state.next_packet_id
    }
}

fn refused(what: &str) -> StreamError {
    StreamError::Connection(format!("fake broker refused {what}"))
}

#[async_trait]
impl BrokerLink for FakeBrokerLink {
    async fn open(
        &self,
        options: &BrokerConnectOptions,
    ) -> Result<mpsc::UnboundedReceiver<BrokerSignal>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        debug!(host = options.host.as_str(), "fake broker open");
        state.opened.push(options.clone());
        if state.auto_ack {
            let _ = tx.send(BrokerSignal::ConnAck);
        }
        state.signals = Some(tx);
        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state();
        state.closed += 1;
        state.signals = None;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<u16> {
        let mut state = self.state();
        if state.fail_sends {
            return Err(refused("subscribe"));
        }
        let packet_id = Self::next_packet_id(&mut state);
        state.subscribes.push((topic.to_string(), qos));
        state.last_subscribe_packet = Some(packet_id);

        if state.auto_ack {
            let code = if state.denied_topics.contains(topic) {
                SUBACK_FAILURE
            } else {
                qos.as_u8()
            };
            if let Some(signals) = state.signals.as_ref() {
                let _ = signals.send(BrokerSignal::SubAck {
                    packet_id,
                    return_codes: vec![code],
                });
            }
        }
        Ok(packet_id)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<u16> {
        let mut state = self.state();
        if state.fail_sends {
            return Err(refused("unsubscribe"));
        }
        let packet_id = Self::next_packet_id(&mut state);
        state.unsubscribes.push(topic.to_string());

        if state.auto_ack {
            if let Some(signals) = state.signals.as_ref() {
                let _ = signals.send(BrokerSignal::UnsubAck { packet_id });
            }
        }
        Ok(packet_id)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<()> {
        let mut state = self.state();
        if state.fail_sends {
            return Err(refused("publish"));
        }
        state.publishes.push((topic.to_string(), payload, qos));
        Ok(())
    }
}
