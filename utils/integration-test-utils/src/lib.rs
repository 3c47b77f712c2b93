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

mod fake_broker_link;
pub use fake_broker_link::FakeBrokerLink;

mod fake_socket_link;
pub use fake_socket_link::FakeSocketLink;

mod event_recorder;
pub use event_recorder::{EventRecorder, MessageCollector, DEFAULT_WAIT};

use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Installs a test-writer subscriber once per process; honours `RUST_LOG`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` every few milliseconds until it holds or `wait` elapses.
pub async fn wait_until<F>(wait: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + wait;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
