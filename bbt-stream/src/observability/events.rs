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

//! Canonical structured event names used across `bbt-stream`.

// Connection lifecycle.
pub const STREAM_BUILD: &str = "stream_build";
pub const CONNECT_START: &str = "connect_start";
pub const CONNECT_OK: &str = "connect_ok";
pub const CONNECT_FAILED: &str = "connect_failed";
pub const RECONNECTED: &str = "reconnected";
pub const DISCONNECTED: &str = "disconnected";
pub const DISCONNECT_FAILED: &str = "disconnect_failed";

// Subscribe/unsubscribe round trips.
pub const SUBSCRIBE_QUEUED: &str = "subscribe_queued";
pub const SUBSCRIBE_SEND: &str = "subscribe_send";
pub const SUBSCRIBE_SEND_FAILED: &str = "subscribe_send_failed";
pub const SUBSCRIBE_SKIPPED: &str = "subscribe_skipped";
pub const SUBSCRIBE_ACK: &str = "subscribe_ack";
pub const SUBSCRIBE_ACK_IGNORED: &str = "subscribe_ack_ignored";
pub const SUBSCRIBE_REJECTED: &str = "subscribe_rejected";
pub const SUBSCRIBE_TIMEOUT: &str = "subscribe_timeout";
pub const SUBSCRIBE_AUTH_LATE: &str = "subscribe_auth_late";
pub const RESUBSCRIBE_ALL: &str = "resubscribe_all";
pub const UNSUBSCRIBE_SEND: &str = "unsubscribe_send";
pub const UNSUBSCRIBE_SEND_FAILED: &str = "unsubscribe_send_failed";
pub const UNSUBSCRIBE_ACK: &str = "unsubscribe_ack";
pub const UNSUBSCRIBE_ACK_IGNORED: &str = "unsubscribe_ack_ignored";
pub const UNSUBSCRIBE_TIMEOUT: &str = "unsubscribe_timeout";
pub const UNSUBSCRIBE_LOCAL: &str = "unsubscribe_local";
pub const UNSUBSCRIBE_SKIPPED: &str = "unsubscribe_skipped";

// Authorization.
pub const AUTH_REQUEST: &str = "auth_request";
pub const AUTH_OK: &str = "auth_ok";
pub const AUTH_FAILED: &str = "auth_failed";

// Data path.
pub const PUBLISH_SEND: &str = "publish_send";
pub const PUBLISH_DENIED: &str = "publish_denied";
pub const PUBLISH_FAILED: &str = "publish_failed";
pub const PUBLISH_REJECTED: &str = "publish_rejected";
pub const MESSAGE_RECEIVE: &str = "message_receive";
pub const MESSAGE_DROP_UNROUTED: &str = "message_drop_unrouted";
pub const MESSAGE_DROP_UNPARSEABLE: &str = "message_drop_unparseable";
pub const EVENT_BUS_NO_RECEIVERS: &str = "event_bus_no_receivers";

// Wire adapters.
pub const LINK_SIGNAL_UNKNOWN: &str = "link_signal_unknown";
pub const LINK_CLOSED: &str = "link_closed";
pub const TRANSPORT_ERROR: &str = "transport_error";
