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

//! HMAC-SHA1 request and subscription signing.
//!
//! The same primitive backs three call sites: REST request signing
//! (`Authorization: keyId:signature`), the subscribe-time signature of the
//! socket transport, and the signature credential of the broker transport.

use crate::error::{Result, StreamError};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;
use std::fmt;

type HmacSha1 = Hmac<Sha1>;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// HMAC-SHA1 of `data` keyed with `key`, base64 encoded.
pub fn hmac_sha1_base64(key: &str, data: &str) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| StreamError::Authentication(format!("unusable signing key: {e}")))?;
    mac.update(data.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Base64 MD5 digest of a request body, as carried by `Content-MD5`.
pub fn content_md5(body: &[u8]) -> String {
    STANDARD.encode(Md5::digest(body))
}

/// RFC 1123 rendering used for the `Date` header.
pub fn http_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Header values produced by [`Signer::sign_request`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedHeaders {
    pub date: String,
    pub content_md5: Option<String>,
    pub content_type: Option<String>,
    pub authorization: String,
}

/// Stateless signer bound to one API key pair.
#[derive(Clone)]
pub struct Signer {
    key_id: String,
    mac: HmacSha1,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(key_id: &str, secret_key: &str) -> Result<Self> {
        if key_id.is_empty() || secret_key.is_empty() {
            return Err(StreamError::invalid(
                "signer requires both a key id and a secret key",
            ));
        }
        let mac = HmacSha1::new_from_slice(secret_key.as_bytes())
            .map_err(|e| StreamError::Authentication(format!("unusable signing key: {e}")))?;

        Ok(Self {
            key_id: key_id.to_string(),
            mac,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    fn digest(&self, to_sign: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(to_sign.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Signs the canonical request string and returns `keyId:signature`.
    pub fn sign(
        &self,
        http_verb: &str,
        content_md5: &str,
        content_type: &str,
        date: &str,
        uri: &str,
    ) -> String {
        let to_sign = format!(
            "{}\n{}\n{}\n{}\n{}",
            http_verb.to_uppercase(),
            content_md5,
            content_type,
            date,
            uri
        );
        format!("{}:{}", self.key_id, self.digest(&to_sign))
    }

    /// `keyId:signature` over an arbitrary string.
    pub fn signature(&self, to_sign: &str) -> String {
        format!("{}:{}", self.key_id, self.digest(to_sign))
    }

    /// Computes every header a signed REST call needs.
    ///
    /// `uri` is the path plus query string. A body is mandatory for `POST` and
    /// `PUT` because `Content-MD5` is part of their signature.
    pub fn sign_request(
        &self,
        method: &str,
        uri: &str,
        body: Option<&[u8]>,
        date: Option<DateTime<Utc>>,
    ) -> Result<SignedHeaders> {
        let method = method.to_uppercase();
        let date = http_date(date.unwrap_or_else(Utc::now));

        let (content_md5, content_type) = match body {
            Some(body) => (
                Some(content_md5(body)),
                Some(CONTENT_TYPE_JSON.to_string()),
            ),
            None if method == "POST" || method == "PUT" => {
                return Err(StreamError::invalid(format!(
                    "Content-MD5 is required for {method} requests"
                )));
            }
            None => (None, None),
        };

        let authorization = self.sign(
            &method,
            content_md5.as_deref().unwrap_or(""),
            content_type.as_deref().unwrap_or(""),
            &date,
            uri,
        );

        Ok(SignedHeaders {
            date,
            content_md5,
            content_type,
            authorization,
        })
    }
}
