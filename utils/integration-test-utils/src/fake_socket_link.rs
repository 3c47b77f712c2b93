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
use bbt_stream::transport::socketio::{frame, SocketLink, SocketSignal, CONTROL_CHANNEL};
use bbt_stream::{Result, StreamError};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct SocketState {
    signals: Option<mpsc::UnboundedSender<SocketSignal>>,
    session_id: Option<String>,
    opened: Vec<(String, String)>,
    closed: usize,
    sent: Vec<Value>,
    auto_ack: bool,
    denied_channels: HashSet<String>,
    fail_sends: bool,
}

/// Scripted socket link. With auto-ack enabled it reports the connection up
/// on open and answers control subscribe/unsubscribe frames.
#[derive(Clone, Default)]
pub struct FakeSocketLink {
    state: Arc<Mutex<SocketState>>,
}

impl FakeSocketLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_ack() -> Self {
        let link = Self::default();
        {
            let mut state = link.state();
            state.auto_ack = true;
            state.session_id = Some("fake-sid".to_string());
        }
        link
    }

    fn state(&self) -> MutexGuard<'_, SocketState> {
        self.state.lock().expect("socket state poisoned")
    }

    pub fn set_session_id(&self, sid: Option<&str>) {
        self.state().session_id = sid.map(str::to_string);
    }

    /// Subscribes on `channel` get a `subscribeError` reply.
    pub fn deny(&self, channel: &str) {
        self.state().denied_channels.insert(channel.to_string());
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state().fail_sends = fail;
    }

    pub fn inject(&self, signal: SocketSignal) {
        let state = self.state();
        if let Some(signals) = state.signals.as_ref() {
            let _ = signals.send(signal);
        }
    }

    pub fn connected(&self) {
        self.inject(SocketSignal::Connected);
    }

    pub fn reconnected(&self) {
        self.inject(SocketSignal::Reconnected);
    }

    pub fn drop_connection(&self) {
        self.inject(SocketSignal::Disconnected);
    }

    /// Sends a control frame to the client.
    pub fn control(&self, event: &str, data: Value) {
        self.inject(SocketSignal::Message(frame(CONTROL_CHANNEL, event, data)));
    }

    /// Delivers a bare data message.
    pub fn deliver(&self, message: Value) {
        self.inject(SocketSignal::Message(message));
    }

    pub fn opened(&self) -> Vec<(String, String)> {
        self.state().opened.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state().closed
    }

    pub fn sent(&self) -> Vec<Value> {
        self.state().sent.clone()
    }

    /// `data` of every sent frame whose event matches.
    pub fn sent_with_event(&self, event: &str) -> Vec<Value> {
        self.state()
            .sent
            .iter()
            .filter(|frame| frame["event"] == event)
            .map(|frame| frame["data"].clone())
            .collect()
    }
}

#[async_trait]
impl SocketLink for FakeSocketLink {
    async fn open(&self, url: &str, query: &str) -> Result<mpsc::UnboundedReceiver<SocketSignal>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        debug!(url, query, "fake socket open");
        state.opened.push((url.to_string(), query.to_string()));
        if state.auto_ack {
            let _ = tx.send(SocketSignal::Connected);
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

    async fn send(&self, sent: Value) -> Result<()> {
        let mut state = self.state();
        if state.fail_sends {
            return Err(StreamError::Connection("fake socket refused send".to_string()));
        }
        state.sent.push(sent.clone());

        if !state.auto_ack || sent["channel"] != CONTROL_CHANNEL {
            return Ok(());
        }
        let data = &sent["data"];
        let topic = json!({ "channel": data["channel"], "resource": data["resource"] });
        let reply = match sent["event"].as_str() {
            Some("subscribe") => {
                let denied = data["channel"]
                    .as_str()
                    .is_some_and(|channel| state.denied_channels.contains(channel));
                if denied {
                    let mut reply = topic;
                    reply["error"] = json!("permission denied");
                    Some(frame(CONTROL_CHANNEL, "subscribeError", reply))
                } else {
                    Some(frame(CONTROL_CHANNEL, "subscribed", topic))
                }
            }
            Some("unsubscribe") => Some(frame(CONTROL_CHANNEL, "unsubscribed", topic)),
            _ => None,
        };
        if let (Some(reply), Some(signals)) = (reply, state.signals.as_ref()) {
            let _ = signals.send(SocketSignal::Message(reply));
        }
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        self.state().session_id.clone()
    }
}
