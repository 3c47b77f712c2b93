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

//! Error taxonomy shared by the stream, the transports and the signer.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Failures surfaced by a [`Stream`](crate::Stream).
///
/// Argument problems are returned synchronously from the calling method.
/// Everything that happens after I/O has started is delivered as a
/// [`StreamEvent`](crate::StreamEvent) carrying one of these values, which is
/// why the type is `Clone`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("a message callback is mandatory for read access")]
    MissingCallback,

    #[error("a {operation} is already pending for {topic}")]
    OperationPending {
        operation: &'static str,
        topic: String,
    },

    #[error("no subscription for {0}")]
    NotSubscribed(String),

    #[error("transport mismatch: {0}")]
    TransportMismatch(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StreamError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StreamError::InvalidArgument(msg.into())
    }

    /// True for errors produced by an expired subscribe/unsubscribe timer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StreamError::Timeout { .. })
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Serialization(err.to_string())
    }
}

impl From<json5::Error> for StreamError {
    fn from(err: json5::Error) -> Self {
        StreamError::Configuration(err.to_string())
    }
}
