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

use bbt_stream::{Message, Stream, StreamEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};

/// Upper bound for waiting on a single event. Under a paused clock the
/// runtime auto-advances, so keep it above the operation timeout only when a
/// timeout is what the test waits for.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(2);

/// Buffered view of a stream's event bus.
pub struct EventRecorder {
    receiver: broadcast::Receiver<StreamEvent>,
}

impl EventRecorder {
    pub fn new(stream: &Stream) -> Self {
        Self {
            receiver: stream.events(),
        }
    }

    /// Next event, or `None` when nothing arrives within `wait`.
    pub async fn next_within(&mut self, wait: Duration) -> Option<StreamEvent> {
        tokio::time::timeout(wait, self.receiver.recv())
            .await
            .ok()
            .and_then(|received| received.ok())
    }

    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.next_within(DEFAULT_WAIT).await
    }

    /// Skips events until one matches `predicate`.
    pub async fn wait_for<P>(&mut self, wait: Duration, predicate: P) -> Option<StreamEvent>
    where
        P: Fn(&StreamEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = self.next_within(remaining).await?;
            if predicate(&event) {
                return Some(event);
            }
        }
    }

    /// Everything already queued, without waiting.
    pub fn drain(&mut self) -> Vec<StreamEvent> {
        let mut drained = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => drained.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => return drained,
            }
        }
    }
}

/// Collects the messages a subscription callback receives.
#[derive(Clone, Default)]
pub struct MessageCollector {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl MessageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl Fn(Message) + Send + Sync + 'static {
        let messages = self.messages.clone();
        move |message| {
            messages
                .lock()
                .expect("collector poisoned")
                .push(message)
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().expect("collector poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().expect("collector poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
