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

//! Per-subscribe authorization for the socket family.

use crate::config::AuthMethod;
use crate::error::{Result, StreamError};
use crate::signer::Signer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::observability::events;

const COMPONENT: &str = "subscribe_auth";

const PRIVATE_PREFIX: &str = "private-";
const PRESENCE_PREFIX: &str = "presence-";

/// Write access, and any access to private or presence channels, needs a
/// grant.
pub fn auth_required(channel: &str, write: bool) -> bool {
    write || channel.starts_with(PRIVATE_PREFIX) || channel.starts_with(PRESENCE_PREFIX)
}

/// What is sent to an authorizer for one subscribe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthRequest {
    /// Session id of the live socket connection.
    pub sid: String,
    pub channel: String,
    pub resource: String,
    pub ttl: u64,
    pub read: bool,
    pub write: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userid: Option<String>,
}

impl AuthRequest {
    /// Canonical string the service verifies the grant against.
    pub fn string_to_sign(&self) -> String {
        let mut to_sign = format!(
            "{}:{}.{}:ttl={}:read={}:write={}",
            self.sid, self.channel, self.resource, self.ttl, self.read, self.write
        );
        if let Some(userid) = self.userid.as_deref() {
            to_sign.push_str(":userid=");
            to_sign.push_str(userid);
        }
        to_sign
    }
}

/// Grant returned by an authorizer.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AuthGrant {
    pub auth: String,
    #[serde(default)]
    pub userid: Option<String>,
}

#[async_trait]
pub trait SubscriptionAuthorizer: Send + Sync {
    async fn authorize(&self, request: &AuthRequest) -> Result<AuthGrant>;
}

/// Signs grants locally with the account secret key.
#[derive(Debug)]
pub struct SecretKeyAuthorizer {
    signer: Signer,
}

impl SecretKeyAuthorizer {
    pub fn new(api_key: &str, secret_key: &str) -> Result<Self> {
        Ok(Self {
            signer: Signer::new(api_key, secret_key)?,
        })
    }
}

#[async_trait]
impl SubscriptionAuthorizer for SecretKeyAuthorizer {
    async fn authorize(&self, request: &AuthRequest) -> Result<AuthGrant> {
        Ok(AuthGrant {
            auth: self.signer.signature(&request.string_to_sign()),
            userid: request.userid.clone(),
        })
    }
}

/// Delegates grants to an external HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpAuthorizer {
    client: reqwest::Client,
    endpoint: String,
    method: AuthMethod,
}

impl HttpAuthorizer {
    pub fn new(endpoint: impl Into<String>, method: AuthMethod) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), endpoint, method)
    }

    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        method: AuthMethod,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        if endpoint.is_empty() {
            return Err(StreamError::Authentication(
                "missing authentication endpoint".to_string(),
            ));
        }
        if method == AuthMethod::Function {
            return Err(StreamError::Configuration(
                "the function method has no HTTP endpoint".to_string(),
            ));
        }
        Ok(Self {
            client,
            endpoint,
            method,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SubscriptionAuthorizer for HttpAuthorizer {
    async fn authorize(&self, request: &AuthRequest) -> Result<AuthGrant> {
        debug!(
            event = events::AUTH_REQUEST,
            component = COMPONENT,
            channel = request.channel.as_str(),
            resource = request.resource.as_str(),
            method = ?self.method,
            "requesting subscribe grant"
        );

        let builder = match self.method {
            AuthMethod::Post => self.client.post(&self.endpoint).json(request),
            _ => self.client.get(&self.endpoint).query(request),
        };

        let response = builder.send().await.map_err(|err| {
            warn!(
                event = events::AUTH_FAILED,
                component = COMPONENT,
                err = %err,
                "authentication endpoint unreachable"
            );
            StreamError::Authentication(format!("unable to authenticate client: {err}"))
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|err| {
            StreamError::Authentication(format!("unable to read grant: {err}"))
        })?;

        grant_from_response(status, &body)
    }
}

/// Interprets an endpoint reply: HTTP 200 with a JSON `{auth, userid?}` body.
pub fn grant_from_response(status: u16, body: &str) -> Result<AuthGrant> {
    if status != 200 {
        warn!(
            event = events::AUTH_FAILED,
            component = COMPONENT,
            status,
            "authentication endpoint refused the subscribe"
        );
        return Err(StreamError::Authentication(format!(
            "unable to authenticate client: status {status}"
        )));
    }

    let grant: AuthGrant = serde_json::from_str(body).map_err(|err| {
        StreamError::Authentication(format!("unable to authenticate client: {err}"))
    })?;
    if grant.auth.is_empty() {
        return Err(StreamError::Authentication(
            "unable to authenticate client: empty grant".to_string(),
        ));
    }
    Ok(grant)
}

/// Caller-supplied signing function.
pub struct FnAuthorizer {
    sign: Box<dyn Fn(&AuthRequest) -> Result<AuthGrant> + Send + Sync>,
}

impl FnAuthorizer {
    pub fn new<F>(sign: F) -> Self
    where
        F: Fn(&AuthRequest) -> Result<AuthGrant> + Send + Sync + 'static,
    {
        Self {
            sign: Box::new(sign),
        }
    }
}

impl fmt::Debug for FnAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnAuthorizer")
    }
}

#[async_trait]
impl SubscriptionAuthorizer for FnAuthorizer {
    async fn authorize(&self, request: &AuthRequest) -> Result<AuthGrant> {
        (self.sign)(request)
    }
}
