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

mod support;

use bbt_stream::transport::mqtt::{BrokerSignal, MqttTransport, SUBACK_FAILURE};
use bbt_stream::{
    PublishOptions, Qos, StreamError, StreamEvent, SubscribeOptions, Topic, Transport,
    TransportEvent, DEFAULT_OPERATION_TIMEOUT,
};
use integration_test_utils::{wait_until, EventRecorder, FakeBrokerLink, MessageCollector};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{
    broker_config, broker_stream, connect, read_options, subscribe_granted, TIMEOUT_WAIT, WAIT,
};

#[tokio::test]
async fn grant_promotes_requested_permissions() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    connect(&stream, &mut recorder).await;

    let collector = MessageCollector::new();
    subscribe_granted(
        &stream,
        &mut recorder,
        "chan",
        "res",
        read_options(&collector).write(false),
    )
    .await;

    let info = stream.get_subscription("chan", "res").await.unwrap();
    assert!(info.subscribed);
    assert!(info.read_permission);
    assert!(!info.write_permission);
    assert_eq!(link.subscribe_calls(), vec![("chan/res".to_string(), Qos::AtMostOnce)]);
}

#[tokio::test]
async fn identical_resubscribe_sends_once() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    connect(&stream, &mut recorder).await;

    let collector = MessageCollector::new();
    stream
        .subscribe("chan", "res", read_options(&collector))
        .await
        .unwrap();
    stream
        .subscribe("chan", "res", read_options(&collector))
        .await
        .unwrap();
    recorder
        .wait_for(WAIT, |event| matches!(event, StreamEvent::Subscribed(_)))
        .await
        .expect("subscribed event");
    stream
        .subscribe("chan", "res", read_options(&collector))
        .await
        .unwrap();

    assert_eq!(recorder.next_within(Duration::from_millis(100)).await, None);
    assert_eq!(link.subscribe_calls().len(), 1);
}

#[tokio::test]
async fn permission_change_while_pending_is_refused() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::new();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    stream.connect().await.unwrap();
    link.connack();
    recorder
        .wait_for(WAIT, |event| matches!(event, StreamEvent::Connected))
        .await
        .unwrap();

    let collector = MessageCollector::new();
    stream
        .subscribe("chan", "res", read_options(&collector))
        .await
        .unwrap();

    let refused = stream
        .subscribe("chan", "res", read_options(&collector).write(true))
        .await;
    assert!(matches!(
        refused,
        Err(StreamError::OperationPending {
            operation: "subscribe",
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn subscribe_timeout_reports_once_and_ignores_late_grant() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::new();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    stream.connect().await.unwrap();
    link.connack();
    recorder
        .wait_for(WAIT, |event| matches!(event, StreamEvent::Connected))
        .await
        .unwrap();

    let collector = MessageCollector::new();
    stream
        .subscribe("chan", "res", read_options(&collector))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || link.subscribe_calls().len() == 1).await);

    let started = tokio::time::Instant::now();
    let event = recorder.next_within(TIMEOUT_WAIT).await.expect("timeout event");
    match event {
        StreamEvent::SubscribeError { topic, error } => {
            assert_eq!(topic, Topic::new("chan", "res"));
            assert!(error.is_timeout());
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(started.elapsed() >= DEFAULT_OPERATION_TIMEOUT - WAIT);

    link.ack_last_subscribe(0);
    assert_eq!(recorder.next_within(Duration::from_secs(1)).await, None);

    let info = stream.get_subscription("chan", "res").await.unwrap();
    assert!(!info.subscribed);
    assert!(!info.read_permission);
}

#[tokio::test(start_paused = true)]
async fn subscribe_retry_after_timeout_sends_again() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::new();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    stream.connect().await.unwrap();
    link.connack();
    recorder.next().await.unwrap();

    let collector = MessageCollector::new();
    stream
        .subscribe("chan", "res", read_options(&collector))
        .await
        .unwrap();
    recorder
        .wait_for(TIMEOUT_WAIT, |event| {
            matches!(event, StreamEvent::SubscribeError { .. })
        })
        .await
        .unwrap();

    stream
        .subscribe("chan", "res", read_options(&collector))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || link.subscribe_calls().len() == 2).await);
    link.ack_last_subscribe(0);

    assert!(matches!(
        recorder.next().await,
        Some(StreamEvent::Subscribed(_))
    ));
}

#[tokio::test]
async fn suback_failure_code_is_a_rejection() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    link.deny("private-chan/res");
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    connect(&stream, &mut recorder).await;

    let collector = MessageCollector::new();
    stream
        .subscribe("private-chan", "res", read_options(&collector))
        .await
        .unwrap();

    match recorder.next().await {
        Some(StreamEvent::SubscribeError { error, .. }) => {
            assert!(matches!(error, StreamError::PermissionDenied(reason)
                if reason.contains(&format!("{SUBACK_FAILURE:#04x}"))));
        }
        other => panic!("unexpected event {other:?}"),
    }
    let info = stream.get_subscription("private-chan", "res").await.unwrap();
    assert!(!info.subscribed);
}

#[tokio::test]
async fn wildcard_and_exact_routing() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    connect(&stream, &mut recorder).await;

    let wildcard = MessageCollector::new();
    let exact = MessageCollector::new();
    stream
        .subscribe_channel("chan", read_options(&wildcard))
        .await
        .unwrap();
    subscribe_granted(&stream, &mut recorder, "chan", "x", read_options(&exact)).await;

    link.deliver(
        "chan/x",
        &json!({"channel": "chan", "resource": "x", "data": 1}),
    );
    link.deliver(
        "chan/anything",
        &json!({"channel": "chan", "resource": "anything", "data": 2}),
    );
    link.deliver(
        "other/x",
        &json!({"channel": "other", "resource": "x", "data": 3}),
    );
    link.inject(BrokerSignal::Publish {
        topic: "chan/x".to_string(),
        payload: b"not json".to_vec(),
    });

    assert!(wait_until(WAIT, || exact.len() == 1 && wildcard.len() == 1).await);
    assert_eq!(exact.messages()[0].data, json!(1));
    assert_eq!(wildcard.messages()[0].resource, "anything");

    let routed = stream.get_any_subscription("chan", "anything").await.unwrap();
    assert_eq!(routed.resource, "#");
    let exact_info = stream.get_any_subscription("chan", "x").await.unwrap();
    assert_eq!(exact_info.resource, "x");
}

#[tokio::test]
async fn publish_without_write_grant_never_reaches_the_wire() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    connect(&stream, &mut recorder).await;

    stream
        .publish("chan", "res", json!(42), PublishOptions::new())
        .await
        .unwrap();

    match recorder.next().await {
        Some(StreamEvent::PublishError { envelope, error }) => {
            assert_eq!(envelope.data, json!(42));
            assert!(matches!(error, StreamError::PermissionDenied(_)));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(link.publish_calls().is_empty());
}

#[tokio::test]
async fn write_with_grant_is_sent_as_flagged_envelope() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    connect(&stream, &mut recorder).await;

    subscribe_granted(
        &stream,
        &mut recorder,
        "chan",
        "res",
        SubscribeOptions::new().read(false).write(true),
    )
    .await;

    stream
        .write("chan", "res", json!({"t": 21}), PublishOptions::new().ts(1000))
        .await
        .unwrap();
    assert!(matches!(recorder.next().await, Some(StreamEvent::Written(_))));

    stream
        .publish("chan", "res", json!("hi"), PublishOptions::new())
        .await
        .unwrap();
    assert!(matches!(recorder.next().await, Some(StreamEvent::Published(_))));

    let calls = link.publish_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "chan/res");
    assert_eq!(
        calls[0].1,
        json!({"channel": "chan", "resource": "res", "data": {"t": 21}, "ts": 1000, "write": true})
    );
    assert_eq!(calls[1].1.get("write"), None);
}

#[tokio::test]
async fn send_failure_surfaces_as_publish_error() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    connect(&stream, &mut recorder).await;
    subscribe_granted(
        &stream,
        &mut recorder,
        "chan",
        "res",
        SubscribeOptions::new().read(false).write(true),
    )
    .await;

    link.fail_sends(true);
    stream
        .publish("chan", "res", json!(1), PublishOptions::new())
        .await
        .unwrap();

    assert!(matches!(
        recorder.next().await,
        Some(StreamEvent::PublishError {
            error: StreamError::Connection(_),
            ..
        })
    ));
}

#[tokio::test]
async fn subscribe_send_failure_is_reported() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    connect(&stream, &mut recorder).await;

    link.fail_sends(true);
    let collector = MessageCollector::new();
    stream
        .subscribe("chan", "res", read_options(&collector))
        .await
        .unwrap();

    assert!(matches!(
        recorder.next().await,
        Some(StreamEvent::SubscribeError {
            error: StreamError::Connection(_),
            ..
        })
    ));
    let info = stream.get_subscription("chan", "res").await.unwrap();
    assert!(!info.subscribed);
}

#[tokio::test]
async fn unsubscribe_round_trip_removes_the_entry() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    connect(&stream, &mut recorder).await;

    let collector = MessageCollector::new();
    subscribe_granted(&stream, &mut recorder, "chan", "res", read_options(&collector)).await;

    stream.unsubscribe("chan", "res").await.unwrap();
    assert_eq!(
        recorder.next().await,
        Some(StreamEvent::Unsubscribed(Topic::new("chan", "res")))
    );
    assert_eq!(stream.get_subscription("chan", "res").await, None);
    assert_eq!(link.unsubscribe_calls(), vec!["chan/res".to_string()]);

    assert!(matches!(
        stream.unsubscribe("chan", "res").await,
        Err(StreamError::NotSubscribed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_timeout_keeps_the_subscription() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::new();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    stream.connect().await.unwrap();
    link.connack();
    recorder.next().await.unwrap();

    let collector = MessageCollector::new();
    stream
        .subscribe("chan", "res", read_options(&collector))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || link.subscribe_calls().len() == 1).await);
    link.ack_last_subscribe(0);
    assert!(matches!(
        recorder.next().await,
        Some(StreamEvent::Subscribed(_))
    ));

    stream.unsubscribe("chan", "res").await.unwrap();
    match recorder.next_within(TIMEOUT_WAIT).await {
        Some(StreamEvent::UnsubscribeError { topic, error }) => {
            assert_eq!(topic, Topic::new("chan", "res"));
            assert!(error.is_timeout());
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(stream.get_subscription("chan", "res").await.is_some());
}

#[tokio::test]
async fn offline_subscriptions_are_sent_on_connect() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);

    let collector = MessageCollector::new();
    stream
        .subscribe("chan", "res", read_options(&collector))
        .await
        .unwrap();
    assert!(link.subscribe_calls().is_empty());

    stream.connect().await.unwrap();
    assert_eq!(recorder.next().await, Some(StreamEvent::Connected));
    assert!(matches!(
        recorder.next().await,
        Some(StreamEvent::Subscribed(_))
    ));
    assert_eq!(link.subscribe_calls().len(), 1);
}

#[tokio::test]
async fn offline_unsubscribe_is_local() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);

    let collector = MessageCollector::new();
    stream
        .subscribe_channel("chan", read_options(&collector))
        .await
        .unwrap();
    stream.unsubscribe("chan", "whatever").await.unwrap();

    assert_eq!(
        recorder.next().await,
        Some(StreamEvent::Unsubscribed(Topic::new("chan", "#")))
    );
    assert!(stream.subscriptions().await.is_empty());
    assert!(link.unsubscribe_calls().is_empty());
}

#[tokio::test]
async fn reconnect_resubscribes_everything() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    connect(&stream, &mut recorder).await;

    let collector = MessageCollector::new();
    subscribe_granted(&stream, &mut recorder, "chan", "a", read_options(&collector)).await;
    subscribe_granted(&stream, &mut recorder, "chan", "b", read_options(&collector)).await;

    link.drop_connection();
    assert_eq!(recorder.next().await, Some(StreamEvent::Disconnected));
    assert!(!stream.is_connected());

    link.connack();
    assert_eq!(recorder.next().await, Some(StreamEvent::Reconnected));
    let mut regranted = Vec::new();
    for _ in 0..2 {
        match recorder.next().await {
            Some(StreamEvent::Subscribed(info)) => regranted.push(info.resource),
            other => panic!("unexpected event {other:?}"),
        }
    }
    regranted.sort();
    assert_eq!(regranted, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(link.subscribe_calls().len(), 4);
}

#[tokio::test]
async fn unsubscribe_all_tears_down_every_topic() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    connect(&stream, &mut recorder).await;

    let collector = MessageCollector::new();
    subscribe_granted(&stream, &mut recorder, "chan", "a", read_options(&collector)).await;
    subscribe_granted(&stream, &mut recorder, "other", "b", read_options(&collector)).await;

    stream.unsubscribe_all().await.unwrap();
    for _ in 0..2 {
        assert!(matches!(
            recorder.next().await,
            Some(StreamEvent::Unsubscribed(_))
        ));
    }
    assert!(stream.subscriptions().await.is_empty());
}

#[tokio::test]
async fn disconnect_closes_the_link() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    connect(&stream, &mut recorder).await;

    stream.disconnect().await.unwrap();
    assert_eq!(recorder.next().await, Some(StreamEvent::Disconnected));
    assert_eq!(link.close_count(), 1);
    assert!(!stream.is_connected());

    let options = &link.opened()[0];
    assert_eq!(options.credentials.username, "secret");
    assert_eq!(options.port, 8883);
}

#[tokio::test]
async fn argument_errors_are_returned_synchronously() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::auto_ack();
    let stream = broker_stream(&link);

    assert_eq!(
        stream
            .subscribe("chan", "res", SubscribeOptions::new())
            .await,
        Err(StreamError::MissingCallback)
    );
    assert!(matches!(
        stream
            .subscribe("", "res", SubscribeOptions::new().read(false))
            .await,
        Err(StreamError::InvalidArgument(_))
    ));
    assert!(matches!(
        stream
            .publish("chan", "", json!(1), PublishOptions::new())
            .await,
        Err(StreamError::InvalidArgument(_))
    ));
    assert!(stream.subscriptions().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn resync_timeout_revokes_write_grant() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::new();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    stream.connect().await.unwrap();
    link.connack();
    assert_eq!(recorder.next().await, Some(StreamEvent::Connected));

    stream
        .subscribe("chan", "res", SubscribeOptions::new().read(false).write(true))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || link.subscribe_calls().len() == 1).await);
    link.ack_last_subscribe(0);
    assert!(matches!(
        recorder.next().await,
        Some(StreamEvent::Subscribed(_))
    ));

    link.drop_connection();
    assert_eq!(recorder.next().await, Some(StreamEvent::Disconnected));
    link.connack();
    assert_eq!(recorder.next().await, Some(StreamEvent::Reconnected));
    assert!(wait_until(WAIT, || link.subscribe_calls().len() == 2).await);

    match recorder.next_within(TIMEOUT_WAIT).await {
        Some(StreamEvent::SubscribeError { error, .. }) => assert!(error.is_timeout()),
        other => panic!("unexpected event {other:?}"),
    }
    let info = stream.get_subscription("chan", "res").await.unwrap();
    assert!(!info.subscribed);
    assert!(!info.write_permission);
    assert_eq!(
        stream
            .get_subscription_with_permission("chan", "res", false, true)
            .await,
        None
    );

    stream
        .publish("chan", "res", json!(1), PublishOptions::new())
        .await
        .unwrap();
    assert!(matches!(
        recorder.next().await,
        Some(StreamEvent::PublishError {
            error: StreamError::PermissionDenied(_),
            ..
        })
    ));
    assert!(link.publish_calls().is_empty());
}

#[tokio::test]
async fn subscribe_during_pending_unsubscribe_is_refused() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::new();
    let stream = broker_stream(&link);
    let mut recorder = EventRecorder::new(&stream);
    stream.connect().await.unwrap();
    link.connack();
    assert_eq!(recorder.next().await, Some(StreamEvent::Connected));

    let collector = MessageCollector::new();
    stream
        .subscribe("chan", "res", read_options(&collector))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || link.subscribe_calls().len() == 1).await);
    link.ack_last_subscribe(0);
    assert!(matches!(
        recorder.next().await,
        Some(StreamEvent::Subscribed(_))
    ));

    stream.unsubscribe("chan", "res").await.unwrap();
    let refused = stream
        .subscribe("chan", "res", read_options(&collector))
        .await;

    assert!(matches!(
        refused,
        Err(StreamError::OperationPending {
            operation: "unsubscribe",
            ..
        })
    ));
    assert_eq!(link.subscribe_calls().len(), 1);
}

#[tokio::test]
async fn dropping_the_adapter_stops_its_signal_pump() {
    integration_test_utils::init_logging();
    let link = FakeBrokerLink::new();
    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let transport = MqttTransport::new(
        &broker_config().transport,
        Arc::new(link.clone()),
        events_tx,
    )
    .unwrap();
    transport.connect().await.unwrap();
    link.connack();
    assert_eq!(events_rx.recv().await, Some(TransportEvent::Connected));

    drop(transport);

    let closed = tokio::time::timeout(WAIT, events_rx.recv()).await;
    assert!(matches!(closed, Ok(None)));
    assert_eq!(link.close_count(), 0);
}
