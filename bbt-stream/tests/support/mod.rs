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

use bbt_stream::{
    Stream, StreamConfig, StreamEvent, SubscribeOptions, TransportConfig, TransportKind, UserInfo,
    WireLink,
};
use integration_test_utils::{EventRecorder, FakeBrokerLink, FakeSocketLink, MessageCollector};
use std::sync::Arc;
use std::time::Duration;

pub(crate) const WAIT: Duration = Duration::from_secs(2);

/// Long enough for a 6 s operation timer under a paused clock.
#[allow(dead_code)]
pub(crate) const TIMEOUT_WAIT: Duration = Duration::from_secs(10);

#[allow(dead_code)]
pub(crate) fn broker_config() -> StreamConfig {
    StreamConfig::new(
        TransportConfig::new(TransportKind::Mqtt)
            .api_key("access")
            .secret_key("secret"),
    )
}

#[allow(dead_code)]
pub(crate) fn socket_config(transport: TransportConfig) -> StreamConfig {
    StreamConfig::new(transport).userinfo(UserInfo {
        username: Some("alice".to_string()),
        userid: None,
    })
}

#[allow(dead_code)]
pub(crate) fn signing_socket_config() -> StreamConfig {
    socket_config(
        TransportConfig::new(TransportKind::SocketIo)
            .api_key("access")
            .secret_key("secret"),
    )
}

#[allow(dead_code)]
pub(crate) fn broker_stream(link: &FakeBrokerLink) -> Stream {
    Stream::new(broker_config(), WireLink::Broker(Arc::new(link.clone())))
        .expect("stream creation should succeed")
}

#[allow(dead_code)]
pub(crate) fn socket_stream(config: StreamConfig, link: &FakeSocketLink) -> Stream {
    Stream::new(config, WireLink::Socket(Arc::new(link.clone())))
        .expect("stream creation should succeed")
}

pub(crate) async fn connect(stream: &Stream, recorder: &mut EventRecorder) {
    stream.connect().await.expect("connect should succeed");
    recorder
        .wait_for(WAIT, |event| matches!(event, StreamEvent::Connected))
        .await
        .expect("connected event");
}

pub(crate) fn read_options(collector: &MessageCollector) -> SubscribeOptions {
    SubscribeOptions::new().on_message(collector.callback())
}

/// Subscribes and waits for the grant.
pub(crate) async fn subscribe_granted(
    stream: &Stream,
    recorder: &mut EventRecorder,
    channel: &str,
    resource: &str,
    options: SubscribeOptions,
) {
    stream
        .subscribe(channel, resource, options)
        .await
        .expect("subscribe arguments are valid");
    let (channel, resource) = (channel.to_string(), resource.to_string());
    recorder
        .wait_for(WAIT, move |event| {
            matches!(event, StreamEvent::Subscribed(info)
                if info.channel == channel && info.resource == resource)
        })
        .await
        .expect("subscribed event");
}
