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

//! Stream configuration, loadable from JSON5.

use crate::error::{Result, StreamError};
use crate::message::Qos;
use crate::subscription::DEFAULT_OPERATION_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

fn default_operation_timeout_ms() -> u64 {
    DEFAULT_OPERATION_TIMEOUT.as_millis() as u64
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    pub transport: TransportConfig,
    #[serde(default)]
    pub userinfo: UserInfo,
    /// Confirmation window for subscribe/unsubscribe round trips.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Transport family discriminator.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    #[serde(rename = "mqtt")]
    Mqtt,
    #[serde(rename = "socketio")]
    SocketIo,
}

/// How the socket transport authorizes private, presence and write
/// subscriptions when neither a secret key nor a token is configured.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Get,
    Post,
    /// Caller-supplied authorizer.
    #[serde(rename = "fct", alias = "function")]
    Function,
}

/// Subscribe-time authorization source after applying the precedence
/// secret key, then token, then the configured endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAuth {
    /// Sign locally with the API key and secret key.
    SecretKey { api_key: String, secret_key: String },
    /// Pass the channel token along with each subscribe.
    Token(String),
    /// Ask an external endpoint.
    Endpoint { method: AuthMethod, url: String },
    /// Ask the authorizer injected through the builder.
    Function,
    /// Nothing configured; authorized subscriptions fail.
    Unavailable,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    #[serde(rename = "type")]
    pub kind: TransportKind,
    #[serde(default, alias = "apiKey", alias = "key", alias = "keyId")]
    pub api_key: Option<String>,
    #[serde(default, alias = "secretKey")]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    /// Account username; together with both keys selects the broker
    /// signature credential.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "mqtt_host", alias = "ws_host")]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_true")]
    pub ssl: bool,
    #[serde(default)]
    pub auth_endpoint: Option<String>,
    #[serde(default)]
    pub auth_method: Option<AuthMethod>,
    #[serde(default, alias = "clientId")]
    pub client_id: Option<String>,
    #[serde(default = "default_true")]
    pub clean: bool,
    #[serde(default)]
    pub qos: Qos,
}

impl TransportConfig {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            api_key: None,
            secret_key: None,
            token: None,
            username: None,
            host: None,
            port: None,
            ssl: true,
            auth_endpoint: None,
            auth_method: None,
            client_id: None,
            clean: true,
            qos: Qos::default(),
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn auth_endpoint(mut self, endpoint: impl Into<String>, method: AuthMethod) -> Self {
        self.auth_endpoint = Some(endpoint.into());
        self.auth_method = Some(method);
        self
    }

    pub fn auth_method(mut self, method: AuthMethod) -> Self {
        self.auth_method = Some(method);
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    fn present(value: &Option<String>) -> bool {
        value.as_deref().is_some_and(|v| !v.is_empty())
    }

    pub(crate) fn has_api_key(&self) -> bool {
        Self::present(&self.api_key)
    }

    pub(crate) fn has_secret_key(&self) -> bool {
        Self::present(&self.secret_key)
    }

    pub(crate) fn has_token(&self) -> bool {
        Self::present(&self.token)
    }

    pub(crate) fn has_username(&self) -> bool {
        Self::present(&self.username)
    }

    /// Picks the subscribe-time authorization source.
    pub fn resolve_auth(&self) -> ResolvedAuth {
        if let (true, Some(api_key), Some(secret_key)) =
            (self.has_secret_key(), &self.api_key, &self.secret_key)
        {
            if !api_key.is_empty() {
                return ResolvedAuth::SecretKey {
                    api_key: api_key.clone(),
                    secret_key: secret_key.clone(),
                };
            }
        }
        if let Some(token) = self.token.as_ref().filter(|t| !t.is_empty()) {
            return ResolvedAuth::Token(token.clone());
        }
        match (self.auth_method.unwrap_or_default(), &self.auth_endpoint) {
            (AuthMethod::Function, _) => ResolvedAuth::Function,
            (method, Some(url)) if !url.is_empty() => ResolvedAuth::Endpoint {
                method,
                url: url.clone(),
            },
            _ => ResolvedAuth::Unavailable,
        }
    }

    /// Checks the credentials each family needs before anything is built.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            TransportKind::SocketIo if !self.has_api_key() && !self.has_token() => {
                Err(StreamError::Configuration(
                    "missing API access key or channel token".to_string(),
                ))
            }
            TransportKind::Mqtt if !self.has_secret_key() && !self.has_token() => {
                Err(StreamError::Configuration(
                    "missing secret key or authentication token".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Friendly identity attached to subscriptions.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UserInfo {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub userid: Option<String>,
}

impl StreamConfig {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            userinfo: UserInfo::default(),
            operation_timeout_ms: default_operation_timeout_ms(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn userinfo(mut self, userinfo: UserInfo) -> Self {
        self.userinfo = userinfo;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn operation_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn from_json5_str(contents: &str) -> Result<Self> {
        Ok(json5::from_str(contents)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StreamError::Configuration(format!("unable to read {}: {e}", path.display()))
        })?;
        Self::from_json5_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.operation_timeout_ms == 0 {
            return Err(StreamError::Configuration(
                "operation_timeout_ms must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(StreamError::Configuration(
                "event_capacity must be positive".to_string(),
            ));
        }
        self.transport.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthMethod, ResolvedAuth, StreamConfig, TransportConfig, TransportKind};
    use crate::message::Qos;

    #[test]
    fn parses_json5_with_camel_case_aliases() {
        let config = StreamConfig::from_json5_str(
            r#"{
                // socket transport with an external endpoint
                transport: {
                    type: 'socketio',
                    apiKey: 'access',
                    auth_endpoint: 'https://example.com/auth',
                    auth_method: 'post',
                    ssl: false,
                },
                userinfo: { username: 'alice' },
            }"#,
        )
        .expect("config should parse");

        assert_eq!(config.transport.kind, TransportKind::SocketIo);
        assert_eq!(config.transport.api_key.as_deref(), Some("access"));
        assert_eq!(config.transport.auth_method, Some(AuthMethod::Post));
        assert!(!config.transport.ssl);
        assert!(config.transport.clean);
        assert_eq!(config.userinfo.username.as_deref(), Some("alice"));
        assert_eq!(config.operation_timeout_ms, 6000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn broker_config_reads_qos_and_host_alias() {
        let config = StreamConfig::from_json5_str(
            r#"{ transport: { type: 'mqtt', secretKey: 's', mqtt_host: 'localhost', qos: 1 } }"#,
        )
        .unwrap();

        assert_eq!(config.transport.host.as_deref(), Some("localhost"));
        assert_eq!(config.transport.qos, Qos::AtLeastOnce);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(StreamConfig::from_json5_str(
            r#"{ transport: { type: 'mqtt', secretKey: 's', bogus: 1 } }"#
        )
        .is_err());
    }

    #[test]
    fn socket_transport_needs_key_or_token() {
        let transport = TransportConfig::new(TransportKind::SocketIo);
        assert!(transport.validate().is_err());
        assert!(transport.clone().token("tok").validate().is_ok());
        assert!(transport.api_key("key").validate().is_ok());
    }

    #[test]
    fn auth_resolution_prefers_secret_then_token_then_endpoint() {
        let endpoint = TransportConfig::new(TransportKind::SocketIo)
            .api_key("key")
            .auth_endpoint("https://example.com/auth", AuthMethod::Get);
        assert_eq!(
            endpoint.resolve_auth(),
            ResolvedAuth::Endpoint {
                method: AuthMethod::Get,
                url: "https://example.com/auth".to_string()
            }
        );

        let token = endpoint.clone().token("tok");
        assert_eq!(token.resolve_auth(), ResolvedAuth::Token("tok".to_string()));

        let secret = token.secret_key("secret");
        assert_eq!(
            secret.resolve_auth(),
            ResolvedAuth::SecretKey {
                api_key: "key".to_string(),
                secret_key: "secret".to_string()
            }
        );
    }

    #[test]
    fn function_method_needs_no_endpoint() {
        let transport = TransportConfig::new(TransportKind::SocketIo)
            .api_key("key")
            .auth_method(AuthMethod::Function);
        assert_eq!(transport.resolve_auth(), ResolvedAuth::Function);
        assert_eq!(
            TransportConfig::new(TransportKind::SocketIo).resolve_auth(),
            ResolvedAuth::Unavailable
        );
    }

    #[test]
    fn broker_transport_needs_secret_or_token() {
        let transport = TransportConfig::new(TransportKind::Mqtt).api_key("key");
        assert!(transport.validate().is_err());
        assert!(transport.secret_key("secret").validate().is_ok());
    }
}
