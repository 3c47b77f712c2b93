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

//! Events broadcast by a [`Stream`](crate::Stream).

use crate::error::StreamError;
use crate::message::{Envelope, Topic};
use crate::subscription::SubscriptionInfo;

/// Everything a stream reports after I/O has started.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Connected,
    Reconnected,
    Disconnected,
    /// A subscribe was confirmed; carries the granted snapshot.
    Subscribed(SubscriptionInfo),
    SubscribeError {
        topic: Topic,
        error: StreamError,
    },
    Unsubscribed(Topic),
    UnsubscribeError {
        topic: Topic,
        error: StreamError,
    },
    Published(Envelope),
    PublishError {
        envelope: Envelope,
        error: StreamError,
    },
    Written(Envelope),
    WriteError {
        envelope: Envelope,
        error: StreamError,
    },
    /// Transport-level failure not tied to one operation.
    Error(StreamError),
}

impl StreamEvent {
    /// Short name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Connected => "connected",
            StreamEvent::Reconnected => "reconnected",
            StreamEvent::Disconnected => "disconnected",
            StreamEvent::Subscribed(_) => "subscribed",
            StreamEvent::SubscribeError { .. } => "subscribe_error",
            StreamEvent::Unsubscribed(_) => "unsubscribed",
            StreamEvent::UnsubscribeError { .. } => "unsubscribe_error",
            StreamEvent::Published(_) => "published",
            StreamEvent::PublishError { .. } => "publish_error",
            StreamEvent::Written(_) => "written",
            StreamEvent::WriteError { .. } => "write_error",
            StreamEvent::Error(_) => "error",
        }
    }
}
