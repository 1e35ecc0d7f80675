// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Outbound HTTP seam.
//!
//! Step handlers build an [`HttpRequest`] and hand it to an [`HttpTransport`];
//! the reqwest implementation lives in `infrastructure::http_transport`.
//! Timeouts are not a transport concern: the step executor wraps the whole
//! handler future in one deadline.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::plan::HttpMethod;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), headers: BTreeMap::new(), body: None }
    }

    /// Case-insensitive header presence.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }

    /// Set `name` unless a header with the same name (any case) is present.
    pub fn header_if_absent(&mut self, name: &str, value: impl Into<String>) {
        if !self.has_header(name) {
            self.headers.insert(name.to_string(), value.into());
        }
    }

    /// Attach `payload` as the body. GET and HEAD never carry one; strings
    /// are sent verbatim, anything else is JSON with a default content type.
    pub fn with_payload(mut self, payload: &Value) -> Self {
        if !self.method.carries_body() {
            return self;
        }
        match payload {
            Value::String(text) => self.body = Some(text.clone()),
            other => {
                self.body = Some(other.to_string());
                self.header_if_absent("Content-Type", "application/json");
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// 2xx, the same notion of "ok" as a fetch response.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body parsed as JSON whatever the content type, falling back to the
    /// raw text. An empty body is `null`.
    pub fn parsed_body(&self) -> Value {
        if self.body.trim().is_empty() {
            return Value::Null;
        }
        serde_json::from_str(&self.body).unwrap_or_else(|_| Value::String(self.body.clone()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}
