// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Collector Transport - HTTP delivery to a VES event listener
//
// POSTs serialized events to /{path}/eventListener/v5[/{topic}] with basic
// auth. Connection failures and 5xx/408/429 responses are transient; other
// 4xx responses mean the collector will never accept this payload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::domain::transport::{Transport, TransportError};

/// Collector endpoint parameters, normally filled from the CLI.
#[derive(Debug, Clone, Default)]
pub struct CollectorConfig {
    pub fqdn: String,
    pub port: u16,
    pub secure: bool,
    /// Optional path prefix in front of the listener route.
    pub path: Option<String>,
    /// Optional topic segment appended to the listener route.
    pub topic: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl CollectorConfig {
    /// Full event listener URL for this configuration.
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        let mut url = format!("{}://{}:{}", scheme, self.fqdn, self.port);
        if let Some(path) = &self.path {
            let trimmed = path.trim_matches('/');
            if !trimmed.is_empty() {
                url.push('/');
                url.push_str(trimmed);
            }
        }
        url.push_str("/eventListener/v5");
        if let Some(topic) = &self.topic {
            let trimmed = topic.trim_matches('/');
            if !trimmed.is_empty() {
                url.push('/');
                url.push_str(trimmed);
            }
        }
        url
    }
}

pub struct CollectorTransport {
    client: reqwest::Client,
    endpoint: String,
    username: Option<String>,
    password: Option<String>,
    torn_down: AtomicBool,
}

impl CollectorTransport {
    /// Build the HTTP client for the configured collector.
    ///
    /// Failure here is the one startup error that is fatal to the whole
    /// process.
    pub fn new(config: CollectorConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| {
                TransportError::Permanent(format!("failed to build http client: {err}"))
            })?;
        Ok(Self {
            client,
            endpoint: config.endpoint_url(),
            username: config.username,
            password: config.password,
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for CollectorTransport {
    async fn send(&self, body: &[u8]) -> Result<(), TransportError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|err| TransportError::Transient(format!("request failed: {err}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = %status, "collector accepted event");
            return Ok(());
        }

        let reason = format!("collector returned {status}");
        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            Err(TransportError::Transient(reason))
        } else {
            Err(TransportError::Permanent(reason))
        }
    }

    async fn teardown(&self) {
        if !self.torn_down.swap(true, Ordering::SeqCst) {
            info!(endpoint = %self.endpoint, "collector transport released");
        }
    }
}
