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

//! Canonical `reason` values for structured log fields.

pub const REASON_NOT_CONNECTED: &str = "not_connected";
pub const REASON_ALREADY_GRANTED: &str = "already_granted";
pub const REASON_ALREADY_PENDING: &str = "already_pending";
pub const REASON_NO_PENDING_TIMER: &str = "no_pending_timer";
pub const REASON_NO_SUBSCRIPTION: &str = "no_subscription";
pub const REASON_REFUSED: &str = "refused";
pub const REASON_STREAM_DROPPED: &str = "stream_dropped";
pub const REASON_LINK_CLOSED: &str = "link_closed";
