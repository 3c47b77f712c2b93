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

//! The public [`Stream`] orchestrator.
//!
//! A stream owns the subscription registry and one transport adapter. Caller
//! operations validate their arguments synchronously, update the registry and
//! hand wire work to the adapter; acknowledgements, inbound messages and
//! connection changes come back through a dispatcher task that drives the
//! registry and publishes [`StreamEvent`]s.

use crate::config::{StreamConfig, UserInfo};
use crate::error::{Result, StreamError};
use crate::events::StreamEvent;
use crate::message::{Envelope, Message, PublishOptions, Qos, Topic};
use crate::observability::{events, fields};
use crate::registry::{SubscriptionRegistry, TopicScheme};
use crate::subscription::{SubscribeOptions, Subscription, SubscriptionInfo};
use crate::transport::auth::SubscriptionAuthorizer;
use crate::transport::{
    build_transport, SubscribeRequest, Transport, TransportEvent, TransportEventSender, WireLink,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

const COMPONENT: &str = "stream";

type TransportFactory = Box<dyn FnOnce(TransportEventSender) -> Result<Arc<dyn Transport>> + Send>;

/// Builder for a [`Stream`] with a custom adapter or authorizer.
pub struct StreamBuilder {
    config: StreamConfig,
    link: Option<WireLink>,
    authorizer: Option<Arc<dyn SubscriptionAuthorizer>>,
    transport: Option<TransportFactory>,
    event_capacity: Option<usize>,
}

impl StreamBuilder {
    fn new(config: StreamConfig) -> Self {
        Self {
            config,
            link: None,
            authorizer: None,
            transport: None,
            event_capacity: None,
        }
    }

    /// Wire backend for the built-in adapter matching the configured type.
    pub fn link(mut self, link: WireLink) -> Self {
        self.link = Some(link);
        self
    }

    /// Authorizer used by the socket adapter for private, presence and write
    /// subscriptions. Required by the `fct` auth method.
    pub fn authorizer(mut self, authorizer: Arc<dyn SubscriptionAuthorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Replaces the built-in adapters. The factory receives the sender the
    /// adapter must report its [`TransportEvent`]s on.
    pub fn transport<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(TransportEventSender) -> Result<Arc<dyn Transport>> + Send + 'static,
    {
        self.transport = Some(Box::new(factory));
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    /// Builds the adapter and starts the dispatcher. Must be called from
    /// within a tokio runtime.
    pub fn build(self) -> Result<Stream> {
        let StreamBuilder {
            mut config,
            link,
            authorizer,
            transport,
            event_capacity,
        } = self;
        if let Some(capacity) = event_capacity {
            config.event_capacity = capacity;
        }
        config.validate()?;

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let transport = match (transport, link) {
            (Some(factory), _) => factory(transport_tx)?,
            (None, Some(link)) => build_transport(&config, link, authorizer, transport_tx)?,
            (None, None) => {
                return Err(StreamError::Configuration(
                    "a wire link or a custom transport is required".to_string(),
                ))
            }
        };
        if transport.kind() != config.transport.kind {
            return Err(StreamError::TransportMismatch(format!(
                "configured {:?} but the adapter is {:?}",
                config.transport.kind,
                transport.kind()
            )));
        }

        let scheme = transport.scheme();
        let (events_tx, _) = broadcast::channel(config.event_capacity);
        let shared = Arc::new(StreamShared {
            scheme,
            transport,
            registry: Mutex::new(SubscriptionRegistry::new(scheme)),
            events: events_tx,
            connected: AtomicBool::new(false),
            userinfo: RwLock::new(config.userinfo.clone()),
            operation_timeout: config.operation_timeout_duration(),
        });

        tokio::spawn(dispatch_loop(Arc::downgrade(&shared), transport_rx));

        debug!(
            event = events::STREAM_BUILD,
            component = COMPONENT,
            transport = ?shared.transport.kind(),
            operation_timeout_ms = config.operation_timeout_ms,
            "stream built"
        );
        Ok(Stream { shared })
    }
}

struct StreamShared {
    transport: Arc<dyn Transport>,
    scheme: TopicScheme,
    registry: Mutex<SubscriptionRegistry>,
    events: broadcast::Sender<StreamEvent>,
    connected: AtomicBool,
    userinfo: RwLock<UserInfo>,
    operation_timeout: Duration,
}

/// Real-time stream client.
///
/// Cloning is cheap; every clone drives the same connection and registry.
/// Argument errors are returned from the calling method, while outcomes of
/// wire operations (grants, rejections, timeouts, send failures) arrive as
/// [`StreamEvent`]s on [`Stream::events`].
///
/// ```no_run
/// # use bbt_stream::{Stream, StreamConfig, SubscribeOptions, TransportConfig, TransportKind, WireLink};
/// # async fn demo(link: WireLink) -> bbt_stream::Result<()> {
/// let config = StreamConfig::new(TransportConfig::new(TransportKind::SocketIo).api_key("key"));
/// let stream = Stream::new(config, link)?;
/// let mut events = stream.events();
///
/// stream.connect().await?;
/// stream
///     .subscribe("chan", "res", SubscribeOptions::new().on_message(|msg| println!("{msg:?}")))
///     .await?;
/// while let Ok(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Stream {
    shared: Arc<StreamShared>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("transport", &self.shared.transport.kind())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Stream {
    /// Builds a stream over one of the built-in adapters.
    pub fn new(config: StreamConfig, link: WireLink) -> Result<Self> {
        Self::builder(config).link(link).build()
    }

    pub fn builder(config: StreamConfig) -> StreamBuilder {
        StreamBuilder::new(config)
    }

    /// New receiver on the event bus. Events emitted before the call are not
    /// replayed.
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.events.subscribe()
    }

    pub fn scheme(&self) -> TopicScheme {
        self.shared.scheme
    }

    pub fn operation_timeout(&self) -> Duration {
        self.shared.operation_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Opens the wire link. [`StreamEvent::Connected`] follows once the link
    /// reports the session up; subscriptions registered while offline are
    /// sent at that point.
    pub async fn connect(&self) -> Result<()> {
        info!(
            event = events::CONNECT_START,
            component = COMPONENT,
            transport = ?self.shared.transport.kind(),
            "connecting"
        );
        self.shared.transport.connect().await.map_err(|err| {
            warn!(
                event = events::CONNECT_FAILED,
                component = COMPONENT,
                err = %err,
                "connect failed"
            );
            err
        })
    }

    /// Closes the wire link and emits [`StreamEvent::Disconnected`]. The
    /// registry is kept; the next connect re-subscribes everything.
    pub async fn disconnect(&self) -> Result<()> {
        let result = self.shared.transport.disconnect().await;
        if let Err(err) = &result {
            warn!(
                event = events::DISCONNECT_FAILED,
                component = COMPONENT,
                err = %err,
                "link close failed"
            );
        }
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.shared.emit(StreamEvent::Disconnected);
        }
        result
    }

    pub async fn set_username(&self, username: impl Into<String>) {
        self.shared.userinfo.write().await.username = Some(username.into());
    }

    pub async fn set_userid(&self, userid: impl Into<String>) {
        self.shared.userinfo.write().await.userid = Some(userid.into());
    }

    pub async fn user_info(&self) -> UserInfo {
        self.shared.userinfo.read().await.clone()
    }

    /// Subscribes to one resource of a channel, or re-negotiates the
    /// permissions of an existing subscription.
    ///
    /// Asking again with the permissions already requested sends nothing. A
    /// changed request while a subscribe is still pending, or any request
    /// while an unsubscribe is in flight, is refused with
    /// [`StreamError::OperationPending`].
    pub async fn subscribe(
        &self,
        channel: &str,
        resource: &str,
        options: SubscribeOptions,
    ) -> Result<()> {
        validate_topic(channel, resource)?;
        if options.read && options.callback.is_none() {
            return Err(StreamError::MissingCallback);
        }

        let shared = &self.shared;
        let user = shared.userinfo.read().await.clone();
        let mut registry = shared.registry.lock().await;
        let key = shared.scheme.key(channel, resource);

        let needs_send = match registry.get_by_key_mut(&key) {
            Some(subscription) => {
                if subscription.is_unsubscribe_pending() {
                    return Err(StreamError::OperationPending {
                        operation: "unsubscribe",
                        topic: key,
                    });
                }
                let changed = (subscription.read(), subscription.write())
                    != (options.read, options.write);
                if changed && subscription.is_subscribe_pending() {
                    return Err(StreamError::OperationPending {
                        operation: "subscribe",
                        topic: key,
                    });
                }
                if let Some(callback) = options.callback.clone() {
                    subscription.set_callback(callback);
                }
                subscription.set_ttl(options.ttl);
                subscription.set_qos(options.qos);

                subscription.update(options.read, options.write)
                    || (!subscription.is_subscribed() && !subscription.is_subscribe_pending())
            }
            None => {
                registry.insert(Subscription::new(
                    key.clone(),
                    Topic::new(channel, resource),
                    &options,
                ));
                true
            }
        };

        if !needs_send {
            debug!(
                event = events::SUBSCRIBE_SKIPPED,
                component = COMPONENT,
                topic = key.as_str(),
                reason = fields::REASON_ALREADY_GRANTED,
                "subscription unchanged; nothing to send"
            );
            return Ok(());
        }
        if !self.is_connected() {
            debug!(
                event = events::SUBSCRIBE_QUEUED,
                component = COMPONENT,
                topic = key.as_str(),
                reason = fields::REASON_NOT_CONNECTED,
                "subscription queued until connected"
            );
            return Ok(());
        }

        shared.start_subscribe(&mut registry, &key, &user);
        Ok(())
    }

    /// Subscribes to every resource of a channel.
    pub async fn subscribe_channel(&self, channel: &str, options: SubscribeOptions) -> Result<()> {
        let wildcard = self.shared.scheme.wildcard;
        self.subscribe(channel, wildcard, options).await
    }

    /// Tears down the subscription matching `(channel, resource)`, exactly or
    /// through the channel's wildcard entry. The entry leaves the registry
    /// once the transport confirms; offline streams drop it immediately.
    pub async fn unsubscribe(&self, channel: &str, resource: &str) -> Result<()> {
        validate_topic(channel, resource)?;
        let shared = &self.shared;

        let mut registry = shared.registry.lock().await;
        let key = registry
            .resolve_key(channel, resource)
            .ok_or_else(|| StreamError::NotSubscribed(shared.scheme.key(channel, resource)))?;

        if !self.is_connected() {
            let removed = registry.remove(&key);
            drop(registry);
            if let Some(mut subscription) = removed {
                subscription.unsubscribe();
                debug!(
                    event = events::UNSUBSCRIBE_LOCAL,
                    component = COMPONENT,
                    topic = key.as_str(),
                    reason = fields::REASON_NOT_CONNECTED,
                    "removed offline subscription"
                );
                shared.emit(StreamEvent::Unsubscribed(subscription.topic()));
            }
            return Ok(());
        }

        let Some(subscription) = registry.get_by_key_mut(&key) else {
            return Ok(());
        };
        if subscription.is_unsubscribe_pending() {
            return Err(StreamError::OperationPending {
                operation: "unsubscribe",
                topic: key,
            });
        }

        let weak = Arc::downgrade(shared);
        let timer_key = key.clone();
        let timer_id = subscription.set_unsubscribe_timer(shared.operation_timeout, move |id| {
            async move {
                if let Some(shared) = weak.upgrade() {
                    shared.on_unsubscribe_timeout(&timer_key, id).await;
                }
            }
        });
        let topic = subscription.topic();
        drop(registry);

        debug!(
            event = events::UNSUBSCRIBE_SEND,
            component = COMPONENT,
            topic = key.as_str(),
            timer_id,
            "sending unsubscribe"
        );
        if let Err(err) = shared.transport.unsubscribe(&topic).await {
            let mut registry = shared.registry.lock().await;
            let failed = registry
                .get_by_key_mut(&key)
                .is_some_and(|subscription| subscription.expire_unsubscribe_timer(timer_id));
            drop(registry);
            if failed {
                warn!(
                    event = events::UNSUBSCRIBE_SEND_FAILED,
                    component = COMPONENT,
                    topic = key.as_str(),
                    err = %err,
                    "unsubscribe send failed"
                );
                shared.emit(StreamEvent::UnsubscribeError { topic, error: err });
            }
        }
        Ok(())
    }

    /// Unsubscribes the channel's wildcard entry (or, failing that, nothing).
    pub async fn unsubscribe_channel(&self, channel: &str) -> Result<()> {
        let wildcard = self.shared.scheme.wildcard;
        self.unsubscribe(channel, wildcard).await
    }

    /// Unsubscribes every registered topic. Per-topic failures surface as
    /// events; topics with an unsubscribe already in flight are skipped.
    pub async fn unsubscribe_all(&self) -> Result<()> {
        let topics: Vec<Topic> = {
            let registry = self.shared.registry.lock().await;
            registry.iter().map(Subscription::topic).collect()
        };
        for topic in topics {
            if let Err(err) = self.unsubscribe(&topic.channel, &topic.resource).await {
                debug!(
                    event = events::UNSUBSCRIBE_SKIPPED,
                    component = COMPONENT,
                    topic = %topic,
                    reason = skip_reason(&err),
                    err = %err,
                    "skipping topic during unsubscribe_all"
                );
            }
        }
        Ok(())
    }

    /// Transient publish. Needs a granted write permission on adapters that
    /// enforce it locally.
    pub async fn publish(
        &self,
        channel: &str,
        resource: &str,
        data: Value,
        options: PublishOptions,
    ) -> Result<()> {
        validate_topic(channel, resource)?;
        let envelope = build_envelope(channel, resource, data, options, false);
        self.shared.send_data(envelope).await;
        Ok(())
    }

    /// Persistent write.
    pub async fn write(
        &self,
        channel: &str,
        resource: &str,
        data: Value,
        options: PublishOptions,
    ) -> Result<()> {
        validate_topic(channel, resource)?;
        let envelope = build_envelope(channel, resource, data, options, true);
        self.shared.send_data(envelope).await;
        Ok(())
    }

    /// Exact lookup.
    pub async fn get_subscription(&self, channel: &str, resource: &str) -> Option<SubscriptionInfo> {
        let registry = self.shared.registry.lock().await;
        registry.get(channel, resource).map(Subscription::info)
    }

    /// Exact lookup falling back to the channel's wildcard entry.
    pub async fn get_any_subscription(
        &self,
        channel: &str,
        resource: &str,
    ) -> Option<SubscriptionInfo> {
        let registry = self.shared.registry.lock().await;
        registry.get_any(channel, resource).map(Subscription::info)
    }

    pub async fn get_subscription_with_permission(
        &self,
        channel: &str,
        resource: &str,
        read: bool,
        write: bool,
    ) -> Option<SubscriptionInfo> {
        let registry = self.shared.registry.lock().await;
        registry
            .get_with_permission(channel, resource, read, write)
            .map(Subscription::info)
    }

    pub async fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let registry = self.shared.registry.lock().await;
        registry.iter().map(Subscription::info).collect()
    }
}

fn validate_topic(channel: &str, resource: &str) -> Result<()> {
    if channel.is_empty() {
        return Err(StreamError::invalid("channel must be a non-empty string"));
    }
    if resource.is_empty() {
        return Err(StreamError::invalid("resource must be a non-empty string"));
    }
    Ok(())
}

/// Log reason for a topic `unsubscribe_all` could not tear down.
fn skip_reason(err: &StreamError) -> &'static str {
    match err {
        StreamError::OperationPending { .. } => fields::REASON_ALREADY_PENDING,
        StreamError::NotSubscribed(_) => fields::REASON_NO_SUBSCRIPTION,
        _ => fields::REASON_REFUSED,
    }
}

fn build_envelope(
    channel: &str,
    resource: &str,
    data: Value,
    options: PublishOptions,
    write: bool,
) -> Envelope {
    Envelope {
        channel: channel.to_string(),
        resource: resource.to_string(),
        data,
        ts: options.ts,
        route: options.route,
        ispublic: options.ispublic,
        write,
    }
}

impl StreamShared {
    fn emit(&self, event: StreamEvent) {
        let name = event.name();
        if self.events.send(event).is_err() {
            debug!(
                event = events::EVENT_BUS_NO_RECEIVERS,
                component = COMPONENT,
                stream_event = name,
                "no event receivers"
            );
        }
    }

    /// Arms the subscribe timer of `key` and hands the wire work to a task.
    fn start_subscribe(
        self: &Arc<Self>,
        registry: &mut SubscriptionRegistry,
        key: &str,
        user: &UserInfo,
    ) {
        let Some(subscription) = registry.get_by_key_mut(key) else {
            return;
        };

        let weak = Arc::downgrade(self);
        let timer_key = key.to_string();
        let timer_id = subscription.set_subscribe_timer(self.operation_timeout, move |id| {
            async move {
                if let Some(shared) = weak.upgrade() {
                    shared.on_subscribe_timeout(&timer_key, id).await;
                }
            }
        });

        let request = SubscribeRequest {
            channel: subscription.channel().to_string(),
            resource: subscription.resource().to_string(),
            read: subscription.read(),
            write: subscription.write(),
            ttl: subscription.ttl(),
            qos: subscription.qos(),
            username: user.username.clone(),
            userid: user.userid.clone(),
        };

        tokio::spawn(self.clone().send_subscribe(request, key.to_string(), timer_id));
    }

    async fn send_subscribe(self: Arc<Self>, request: SubscribeRequest, key: String, timer_id: u64) {
        let auth = match self.transport.authorize_subscribe(&request).await {
            Ok(auth) => auth,
            Err(err) => {
                warn!(
                    event = events::AUTH_FAILED,
                    component = COMPONENT,
                    topic = key.as_str(),
                    err = %err,
                    "subscribe authorization failed"
                );
                self.fail_subscribe(&key, timer_id, request.topic(), err).await;
                return;
            }
        };

        let still_armed = {
            let registry = self.registry.lock().await;
            registry
                .get_by_key(&key)
                .and_then(Subscription::subscribe_timer_id)
                == Some(timer_id)
        };
        if !still_armed {
            debug!(
                event = events::SUBSCRIBE_AUTH_LATE,
                component = COMPONENT,
                topic = key.as_str(),
                timer_id,
                "subscribe no longer pending; dropping grant"
            );
            return;
        }

        debug!(
            event = events::SUBSCRIBE_SEND,
            component = COMPONENT,
            topic = key.as_str(),
            timer_id,
            read = request.read,
            write = request.write,
            "sending subscribe"
        );
        if let Err(err) = self.transport.subscribe(&request, auth).await {
            warn!(
                event = events::SUBSCRIBE_SEND_FAILED,
                component = COMPONENT,
                topic = key.as_str(),
                err = %err,
                "subscribe send failed"
            );
            self.fail_subscribe(&key, timer_id, request.topic(), err).await;
        }
    }

    /// Drops the pending subscribe armed as `timer_id` and reports `error`.
    /// Nothing is reported when that timer already fired or was replaced.
    async fn fail_subscribe(&self, key: &str, timer_id: u64, topic: Topic, error: StreamError) {
        let rejected = {
            let mut registry = self.registry.lock().await;
            match registry.get_by_key_mut(key) {
                Some(subscription) if subscription.subscribe_timer_id() == Some(timer_id) => {
                    subscription.reject_subscribe()
                }
                _ => false,
            }
        };
        if rejected {
            self.emit(StreamEvent::SubscribeError { topic, error });
        }
    }

    async fn on_subscribe_timeout(&self, key: &str, timer_id: u64) {
        let topic = {
            let mut registry = self.registry.lock().await;
            registry
                .get_by_key_mut(key)
                .and_then(|subscription| {
                    subscription
                        .expire_subscribe_timer(timer_id)
                        .then(|| subscription.topic())
                })
        };
        let Some(topic) = topic else {
            return;
        };

        warn!(
            event = events::SUBSCRIBE_TIMEOUT,
            component = COMPONENT,
            topic = key,
            timer_id,
            "no subscribe confirmation in time"
        );
        self.emit(StreamEvent::SubscribeError {
            topic,
            error: self.timeout_error("subscribe"),
        });
    }

    async fn on_unsubscribe_timeout(&self, key: &str, timer_id: u64) {
        let topic = {
            let mut registry = self.registry.lock().await;
            registry
                .get_by_key_mut(key)
                .and_then(|subscription| {
                    subscription
                        .expire_unsubscribe_timer(timer_id)
                        .then(|| subscription.topic())
                })
        };
        let Some(topic) = topic else {
            return;
        };

        warn!(
            event = events::UNSUBSCRIBE_TIMEOUT,
            component = COMPONENT,
            topic = key,
            timer_id,
            "no unsubscribe confirmation in time; subscription kept"
        );
        self.emit(StreamEvent::UnsubscribeError {
            topic,
            error: self.timeout_error("unsubscribe"),
        });
    }

    fn timeout_error(&self, operation: &'static str) -> StreamError {
        StreamError::Timeout {
            operation,
            timeout_ms: self.operation_timeout.as_millis() as u64,
        }
    }

    async fn send_data(&self, envelope: Envelope) {
        let topic = envelope.topic();
        let permitted = {
            let registry = self.registry.lock().await;
            registry
                .get_with_permission(&envelope.channel, &envelope.resource, false, true)
                .is_some()
        };

        let denial = if !self.connected.load(Ordering::SeqCst) {
            Some(StreamError::Connection(format!(
                "not connected; cannot send to {topic}"
            )))
        } else if self.transport.enforces_write_permission() && !permitted {
            Some(StreamError::PermissionDenied(format!(
                "no write permission on {topic}"
            )))
        } else {
            None
        };
        if let Some(error) = denial {
            warn!(
                event = events::PUBLISH_DENIED,
                component = COMPONENT,
                topic = %topic,
                write = envelope.write,
                err = %error,
                "send refused before reaching the transport"
            );
            self.emit(data_error(envelope, error));
            return;
        }

        debug!(
            event = events::PUBLISH_SEND,
            component = COMPONENT,
            topic = %topic,
            write = envelope.write,
            "sending data"
        );
        let sent = if envelope.write {
            self.transport.write(&envelope).await
        } else {
            self.transport.publish(&envelope).await
        };
        match sent {
            Ok(()) if envelope.write => self.emit(StreamEvent::Written(envelope)),
            Ok(()) => self.emit(StreamEvent::Published(envelope)),
            Err(error) => {
                warn!(
                    event = events::PUBLISH_FAILED,
                    component = COMPONENT,
                    topic = %topic,
                    err = %error,
                    "data send failed"
                );
                self.emit(data_error(envelope, error));
            }
        }
    }

    /// (Re)sends every registered subscription except those being torn down.
    async fn resubscribe_all(self: &Arc<Self>) {
        let user = self.userinfo.read().await.clone();
        let mut registry = self.registry.lock().await;
        let keys: Vec<String> = registry
            .iter()
            .filter(|subscription| !subscription.is_unsubscribe_pending())
            .map(|subscription| subscription.key().to_string())
            .collect();

        info!(
            event = events::RESUBSCRIBE_ALL,
            component = COMPONENT,
            count = keys.len(),
            registered = registry.len(),
            "subscribing registered topics"
        );
        for key in keys {
            self.start_subscribe(&mut registry, &key, &user);
        }
    }

    async fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected(false).await,
            TransportEvent::Reconnected => self.on_connected(true).await,
            TransportEvent::Disconnected => {
                if self.connected.swap(false, Ordering::SeqCst) {
                    info!(
                        event = events::DISCONNECTED,
                        component = COMPONENT,
                        "transport disconnected"
                    );
                    self.emit(StreamEvent::Disconnected);
                }
            }
            TransportEvent::SubscribeAck {
                channel,
                resource,
                qos,
            } => self.on_subscribe_ack(&channel, &resource, qos).await,
            TransportEvent::SubscribeRejected {
                channel,
                resource,
                reason,
            } => {
                let key = self.scheme.key(&channel, &resource);
                let rejected = {
                    let mut registry = self.registry.lock().await;
                    registry
                        .get_by_key_mut(&key)
                        .is_some_and(Subscription::reject_subscribe)
                };
                if rejected {
                    warn!(
                        event = events::SUBSCRIBE_REJECTED,
                        component = COMPONENT,
                        topic = key.as_str(),
                        reason = reason.as_str(),
                        "subscribe rejected"
                    );
                    self.emit(StreamEvent::SubscribeError {
                        topic: Topic::new(channel, resource),
                        error: StreamError::PermissionDenied(reason),
                    });
                } else {
                    debug!(
                        event = events::SUBSCRIBE_ACK_IGNORED,
                        component = COMPONENT,
                        topic = key.as_str(),
                        reason = fields::REASON_NO_PENDING_TIMER,
                        "late subscribe rejection ignored"
                    );
                }
            }
            TransportEvent::UnsubscribeAck { channel, resource } => {
                let key = self.scheme.key(&channel, &resource);
                let removed = {
                    let mut registry = self.registry.lock().await;
                    let pending = registry
                        .get_by_key(&key)
                        .is_some_and(Subscription::is_unsubscribe_pending);
                    if pending {
                        registry.remove(&key)
                    } else {
                        None
                    }
                };
                match removed {
                    Some(mut subscription) => {
                        subscription.unsubscribe();
                        info!(
                            event = events::UNSUBSCRIBE_ACK,
                            component = COMPONENT,
                            topic = key.as_str(),
                            "unsubscribed"
                        );
                        self.emit(StreamEvent::Unsubscribed(subscription.topic()));
                    }
                    None => debug!(
                        event = events::UNSUBSCRIBE_ACK_IGNORED,
                        component = COMPONENT,
                        topic = key.as_str(),
                        reason = fields::REASON_NO_PENDING_TIMER,
                        "unsolicited unsubscribe confirmation"
                    ),
                }
            }
            TransportEvent::PublishRejected { envelope, reason }
            | TransportEvent::WriteRejected { envelope, reason } => {
                warn!(
                    event = events::PUBLISH_REJECTED,
                    component = COMPONENT,
                    topic = %envelope.topic(),
                    write = envelope.write,
                    reason = reason.as_str(),
                    "service rejected data"
                );
                self.emit(data_error(envelope, StreamError::PermissionDenied(reason)));
            }
            TransportEvent::Message(message) => self.deliver(message).await,
            TransportEvent::Error(err) => {
                warn!(
                    event = events::TRANSPORT_ERROR,
                    component = COMPONENT,
                    err = err.as_str(),
                    "transport error"
                );
                self.emit(StreamEvent::Error(StreamError::Connection(err)));
            }
        }
    }

    async fn on_connected(self: &Arc<Self>, reconnected: bool) {
        self.connected.store(true, Ordering::SeqCst);
        let (name, event) = if reconnected {
            (events::RECONNECTED, StreamEvent::Reconnected)
        } else {
            (events::CONNECT_OK, StreamEvent::Connected)
        };
        info!(event = name, component = COMPONENT, "transport connected");
        self.emit(event);
        self.resubscribe_all().await;
    }

    async fn on_subscribe_ack(&self, channel: &str, resource: &str, qos: Qos) {
        let key = self.scheme.key(channel, resource);
        let granted = {
            let mut registry = self.registry.lock().await;
            match registry.get_by_key_mut(&key) {
                Some(subscription) => {
                    if subscription.subscribe() {
                        subscription.set_qos(qos);
                        Some(subscription.info())
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        match granted {
            Some(info) => {
                info!(
                    event = events::SUBSCRIBE_ACK,
                    component = COMPONENT,
                    topic = key.as_str(),
                    read = info.read_permission,
                    write = info.write_permission,
                    "subscribed"
                );
                self.emit(StreamEvent::Subscribed(info));
            }
            None => debug!(
                event = events::SUBSCRIBE_ACK_IGNORED,
                component = COMPONENT,
                topic = key.as_str(),
                reason = fields::REASON_NO_PENDING_TIMER,
                "late or unsolicited subscribe confirmation ignored"
            ),
        }
    }

    /// Routes an inbound message to the exact subscription, else the
    /// channel's wildcard one. Unmatched messages are dropped.
    async fn deliver(&self, message: Message) {
        let callback = {
            let registry = self.registry.lock().await;
            registry
                .get_any(&message.channel, &message.resource)
                .and_then(Subscription::callback)
        };

        match callback {
            Some(callback) => {
                debug!(
                    event = events::MESSAGE_RECEIVE,
                    component = COMPONENT,
                    channel = message.channel.as_str(),
                    resource = message.resource.as_str(),
                    "delivering message"
                );
                callback(message);
            }
            None => debug!(
                event = events::MESSAGE_DROP_UNROUTED,
                component = COMPONENT,
                channel = message.channel.as_str(),
                resource = message.resource.as_str(),
                reason = fields::REASON_NO_SUBSCRIPTION,
                "no subscription for inbound message"
            ),
        }
    }
}

fn data_error(envelope: Envelope, error: StreamError) -> StreamEvent {
    if envelope.write {
        StreamEvent::WriteError { envelope, error }
    } else {
        StreamEvent::PublishError { envelope, error }
    }
}

/// Drains adapter events until the adapter side closes or the stream is gone.
async fn dispatch_loop(
    shared: Weak<StreamShared>,
    mut events_rx: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events_rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle_transport_event(event).await;
    }
    debug!(
        event = events::LINK_CLOSED,
        component = COMPONENT,
        reason = fields::REASON_STREAM_DROPPED,
        "dispatcher stopped"
    );
}
