// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use thiserror::Error;

/// Delivery failure classes.
///
/// Transient failures (network errors, 5xx, timeouts) are retried with
/// backoff; permanent failures (4xx, rejected payloads) discard the event
/// on the first attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transient delivery failure: {0}")]
    Transient(String),
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// Boundary to the collaborator that owns wire encoding, authentication and
/// endpoint configuration. The core only ever hands it serialized bytes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, body: &[u8]) -> Result<(), TransportError>;

    /// Release transport resources. Called exactly once at `Stopped`; must be
    /// idempotent.
    async fn teardown(&self);
}
