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

//! Per-topic subscription record: requested intents, granted permissions and
//! the two single-slot operation timers.

use crate::message::{Message, Qos, Topic};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Confirmation window applied when the configuration does not override it.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(6000);

/// Sink for messages delivered to a subscription.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// One armed timeout. Dropping it aborts the sleeping task.
struct PendingTimer {
    id: u64,
    handle: Option<JoinHandle<()>>,
}

impl PendingTimer {
    fn spawn<F, Fut>(timeout: Duration, on_expiry: F) -> Self
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_expiry(id).await;
        });

        Self {
            id,
            handle: Some(handle),
        }
    }

    /// Releases the slot without aborting; used from inside the expiry task.
    fn disarm(mut self) {
        self.handle.take();
    }
}

impl Drop for PendingTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Options for [`Stream::subscribe`](crate::Stream::subscribe).
///
/// Replaces the positional `(channel, resource?, args?, callback?)` forms with
/// one typed record. `read` defaults to `true`, `write` to `false`.
#[derive(Clone)]
pub struct SubscribeOptions {
    pub read: bool,
    pub write: bool,
    pub ttl: u64,
    pub qos: Qos,
    pub callback: Option<MessageCallback>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            ttl: 0,
            qos: Qos::default(),
            callback: None,
        }
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("read", &self.read)
            .field("write", &self.write)
            .field("ttl", &self.ttl)
            .field("qos", &self.qos)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }
}

/// Plain snapshot of a [`Subscription`], safe to hand out of the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub channel: String,
    pub resource: String,
    pub read: bool,
    pub write: bool,
    pub read_permission: bool,
    pub write_permission: bool,
    pub subscribed: bool,
    pub qos: Qos,
    pub ttl: u64,
}

impl SubscriptionInfo {
    pub fn topic(&self) -> Topic {
        Topic::new(self.channel.clone(), self.resource.clone())
    }
}

/// Client-side record of one `(channel, resource)` subscription.
///
/// Granted permissions only become `true` through [`Subscription::subscribe`],
/// which requires an armed subscribe timer, so a confirmation arriving after a
/// timeout (or twice) is ignored.
pub struct Subscription {
    key: String,
    channel: String,
    resource: String,
    read: bool,
    write: bool,
    read_permission: bool,
    write_permission: bool,
    subscribed: bool,
    qos: Qos,
    ttl: u64,
    callback: Option<MessageCallback>,
    subscribe_timer: Option<PendingTimer>,
    unsubscribe_timer: Option<PendingTimer>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("read", &self.read)
            .field("write", &self.write)
            .field("read_permission", &self.read_permission)
            .field("write_permission", &self.write_permission)
            .field("subscribed", &self.subscribed)
            .field("subscribe_pending", &self.is_subscribe_pending())
            .field("unsubscribe_pending", &self.is_unsubscribe_pending())
            .finish()
    }
}

impl Subscription {
    pub(crate) fn new(key: String, topic: Topic, options: &SubscribeOptions) -> Self {
        Self {
            key,
            channel: topic.channel,
            resource: topic.resource,
            read: options.read,
            write: options.write,
            read_permission: false,
            write_permission: false,
            subscribed: false,
            qos: options.qos,
            ttl: options.ttl,
            callback: options.callback.clone(),
            subscribe_timer: None,
            unsubscribe_timer: None,
        }
    }

    /// Identity string (`channel + separator + resource`).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn topic(&self) -> Topic {
        Topic::new(self.channel.clone(), self.resource.clone())
    }

    pub fn read(&self) -> bool {
        self.read
    }

    pub fn write(&self) -> bool {
        self.write
    }

    pub fn qos(&self) -> Qos {
        self.qos
    }

    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn has_read_permission(&self) -> bool {
        self.read_permission
    }

    pub fn has_write_permission(&self) -> bool {
        self.write_permission
    }

    pub fn callback(&self) -> Option<MessageCallback> {
        self.callback.clone()
    }

    pub(crate) fn set_callback(&mut self, callback: MessageCallback) {
        self.callback = Some(callback);
    }

    pub(crate) fn set_qos(&mut self, qos: Qos) {
        self.qos = qos;
    }

    pub(crate) fn set_ttl(&mut self, ttl: u64) {
        self.ttl = ttl;
    }

    /// Applies new permission intents.
    ///
    /// Returns `false` without touching anything when they equal the current
    /// ones. Otherwise the subscription drops back to unsubscribed with no
    /// granted permission until the next confirmation.
    pub fn update(&mut self, read: bool, write: bool) -> bool {
        if read == self.read && write == self.write {
            return false;
        }

        self.subscribed = false;
        self.read = read;
        self.write = write;
        self.read_permission = false;
        self.write_permission = false;
        true
    }

    /// Arms the subscribe timer and returns its id. Re-arming replaces (and
    /// aborts) a previously armed timer.
    pub fn set_subscribe_timer<F, Fut>(&mut self, timeout: Duration, on_expiry: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let timer = PendingTimer::spawn(timeout, on_expiry);
        let id = timer.id;
        self.subscribe_timer = Some(timer);
        id
    }

    /// Cancels the subscribe timer. Returns whether one was armed.
    pub fn unset_subscribe_timer(&mut self) -> bool {
        self.subscribe_timer.take().is_some()
    }

    pub fn is_subscribe_pending(&self) -> bool {
        self.subscribe_timer.is_some()
    }

    pub(crate) fn subscribe_timer_id(&self) -> Option<u64> {
        self.subscribe_timer.as_ref().map(|timer| timer.id)
    }

    /// Clears the subscribe slot if `timer_id` is still the armed one.
    pub(crate) fn expire_subscribe_timer(&mut self, timer_id: u64) -> bool {
        match self.subscribe_timer.take() {
            Some(timer) if timer.id == timer_id => {
                timer.disarm();
                self.subscribed = false;
                self.read_permission = false;
                self.write_permission = false;
                true
            }
            other => {
                self.subscribe_timer = other;
                false
            }
        }
    }

    pub fn set_unsubscribe_timer<F, Fut>(&mut self, timeout: Duration, on_expiry: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let timer = PendingTimer::spawn(timeout, on_expiry);
        let id = timer.id;
        self.unsubscribe_timer = Some(timer);
        id
    }

    pub fn unset_unsubscribe_timer(&mut self) -> bool {
        self.unsubscribe_timer.take().is_some()
    }

    pub fn is_unsubscribe_pending(&self) -> bool {
        self.unsubscribe_timer.is_some()
    }

    pub(crate) fn expire_unsubscribe_timer(&mut self, timer_id: u64) -> bool {
        match self.unsubscribe_timer.take() {
            Some(timer) if timer.id == timer_id => {
                timer.disarm();
                true
            }
            other => {
                self.unsubscribe_timer = other;
                false
            }
        }
    }

    /// Confirms a pending subscribe and grants the requested permissions.
    ///
    /// Returns `false` when no subscribe is pending (late or duplicate
    /// confirmation); nothing changes in that case.
    pub fn subscribe(&mut self) -> bool {
        if !self.unset_subscribe_timer() {
            return false;
        }

        self.subscribed = true;
        self.read_permission = self.read;
        self.write_permission = self.write;
        true
    }

    /// Drops a pending subscribe after a rejection or a send failure.
    pub(crate) fn reject_subscribe(&mut self) -> bool {
        if !self.unset_subscribe_timer() {
            return false;
        }

        self.subscribed = false;
        self.read_permission = false;
        self.write_permission = false;
        true
    }

    /// Tears the subscription down and revokes every granted permission.
    pub fn unsubscribe(&mut self) {
        self.unset_unsubscribe_timer();
        self.unset_subscribe_timer();
        self.subscribed = false;
        self.read_permission = false;
        self.write_permission = false;
    }

    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            channel: self.channel.clone(),
            resource: self.resource.clone(),
            read: self.read,
            write: self.write,
            read_permission: self.read_permission,
            write_permission: self.write_permission,
            subscribed: self.subscribed,
            qos: self.qos,
            ttl: self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SubscribeOptions, Subscription};
    use crate::message::Topic;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn subscription(read: bool, write: bool) -> Subscription {
        Subscription::new(
            "chan.res".to_string(),
            Topic::new("chan", "res"),
            &SubscribeOptions::new().read(read).write(write),
        )
    }

    fn noop_timer(_: u64) -> std::future::Ready<()> {
        std::future::ready(())
    }

    #[tokio::test]
    async fn confirmation_promotes_requested_permissions() {
        let mut sub = subscription(true, false);
        sub.set_subscribe_timer(Duration::from_secs(6), noop_timer);

        assert!(sub.subscribe());
        assert!(sub.is_subscribed());
        assert!(sub.has_read_permission());
        assert!(!sub.has_write_permission());
        assert!(!sub.is_subscribe_pending());
    }

    #[test]
    fn confirmation_without_pending_timer_is_ignored() {
        let mut sub = subscription(true, true);

        assert!(!sub.subscribe());
        assert!(!sub.is_subscribed());
        assert!(!sub.has_write_permission());
    }

    #[tokio::test]
    async fn update_with_same_permissions_is_noop() {
        let mut sub = subscription(true, false);
        sub.set_subscribe_timer(Duration::from_secs(6), noop_timer);
        sub.subscribe();

        assert!(!sub.update(true, false));
        assert!(sub.is_subscribed());
        assert!(sub.has_read_permission());
    }

    #[tokio::test]
    async fn update_with_new_permissions_revokes_grants() {
        let mut sub = subscription(true, false);
        sub.set_subscribe_timer(Duration::from_secs(6), noop_timer);
        sub.subscribe();

        assert!(sub.update(true, true));
        assert!(!sub.is_subscribed());
        assert!(!sub.has_read_permission());
        assert!(!sub.has_write_permission());
        assert!(sub.write());
    }

    #[tokio::test]
    async fn unsubscribe_resets_everything() {
        let mut sub = subscription(true, true);
        sub.set_subscribe_timer(Duration::from_secs(6), noop_timer);
        sub.subscribe();
        sub.set_unsubscribe_timer(Duration::from_secs(6), noop_timer);

        sub.unsubscribe();

        assert!(!sub.is_subscribed());
        assert!(!sub.has_read_permission());
        assert!(!sub.has_write_permission());
        assert!(!sub.is_unsubscribe_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_runs_once_with_matching_id() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_timer = fired.clone();
        let mut sub = subscription(true, false);

        let id = sub.set_subscribe_timer(Duration::from_millis(6000), move |_| async move {
            fired_in_timer.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(6001)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(sub.subscribe_timer_id(), Some(id));
        assert!(!sub.expire_subscribe_timer(id + 1));
        assert!(sub.expire_subscribe_timer(id));
        assert!(!sub.subscribe());
    }

    #[tokio::test]
    async fn resync_expiry_revokes_earlier_grants() {
        let mut sub = subscription(true, true);
        sub.set_subscribe_timer(Duration::from_secs(6), noop_timer);
        sub.subscribe();
        let id = sub.set_subscribe_timer(Duration::from_secs(6), noop_timer);

        assert!(sub.expire_subscribe_timer(id));
        assert!(!sub.is_subscribed());
        assert!(!sub.has_read_permission());
        assert!(!sub.has_write_permission());
    }

    #[tokio::test(start_paused = true)]
    async fn unset_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_timer = fired.clone();
        let mut sub = subscription(true, false);

        sub.set_subscribe_timer(Duration::from_millis(100), move |_| async move {
            fired_in_timer.fetch_add(1, Ordering::SeqCst);
        });
        assert!(sub.unset_subscribe_timer());
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!sub.unset_subscribe_timer());
    }
}
