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

//! # bbt-stream
//!
//! `bbt-stream` is a real-time stream client for a hosted publish/subscribe
//! service. A [`Stream`] keeps one persistent connection over either a
//! broker-style (MQTT) or socket-style (Socket.IO) wire link and tracks every
//! topic subscription together with the read/write permissions the service
//! granted for it.
//!
//! The wire links themselves are black boxes: implement
//! [`transport::mqtt::BrokerLink`] or [`transport::socketio::SocketLink`] over
//! the client library of your choice and hand it to [`Stream::new`] as a
//! [`WireLink`].
//!
//! ## Subscription lifecycle
//!
//! ```text
//! UNSUBSCRIBED --subscribe--> PENDING --ack--> SUBSCRIBED
//!                                |--reject/timeout--> UNSUBSCRIBED (kept)
//! SUBSCRIBED --unsubscribe--> PENDING_UNSUBSCRIBE --ack--> removed
//! ```
//!
//! Every pending operation arms a timer (6 s by default). Exactly one of
//! confirmation, rejection or timeout is reported per attempt; confirmations
//! arriving after the timer fired are ignored.
//!
//! ## Configuration
//!
//! ```
//! use bbt_stream::{StreamConfig, TransportKind};
//!
//! let config = StreamConfig::from_json5_str(
//!     r#"{
//!         transport: { type: 'mqtt', secretKey: 'my-secret', ssl: true },
//!         operation_timeout_ms: 3000,
//!     }"#,
//! )
//! .unwrap();
//! assert_eq!(config.transport.kind, TransportKind::Mqtt);
//! ```
//!
//! ## Logging
//!
//! The crate uses `tracing` for logs/events. Library code emits structured
//! events named in [`observability::events`] and never installs a global
//! subscriber; binaries and tests are responsible for `tracing_subscriber`
//! initialization.

mod config;
pub use config::{
    AuthMethod, ResolvedAuth, StreamConfig, TransportConfig, TransportKind, UserInfo,
    DEFAULT_EVENT_CAPACITY,
};

mod error;
pub use error::{Result, StreamError};

mod events;
pub use events::StreamEvent;

mod message;
pub use message::{Envelope, Message, PublishOptions, Qos, Topic};

#[doc(hidden)]
pub mod observability;

mod registry;
pub use registry::TopicScheme;

pub mod signer;
pub use signer::Signer;

mod stream;
pub use stream::{Stream, StreamBuilder};

mod subscription;
pub use subscription::{
    MessageCallback, SubscribeOptions, Subscription, SubscriptionInfo, DEFAULT_OPERATION_TIMEOUT,
};

pub mod transport;
pub use transport::{
    SubscribeAuth, SubscribeRequest, Transport, TransportEvent, TransportEventSender, WireLink,
};
