// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the stream replicator.
//!
//! Errors are categorized by where they occur (remote probes, record
//! decoding, local publishing) and carry enough context to diagnose a
//! misbehaving remote without packet captures.
//!
//! # Error Categories
//!
//! | Error Type | Loop retries | Description |
//! |------------|--------------|-------------|
//! | `SchemaMismatch` | Yes | Remote serves a different entry type |
//! | `EndpointUnreachable` | Yes | Transport failure or non-2xx probe |
//! | `BadResponse` | Yes | 2xx probe with an unparseable body |
//! | `MalformedChunk` | Yes | A framed record failed to decode |
//! | `SubscriberEnded` | No | The sink asked to stop (internal signal) |
//! | `SubscriberCancelled` | No | The subscription was cancelled (internal signal) |
//! | `InvalidState` | No | Write-authority misuse on the local stream |
//! | `Publish` | No | The local publisher rejected a record |
//! | `Config` | No | Configuration invalid |
//!
//! # Retry Behavior
//!
//! [`ReplicationError::is_retryable()`] mirrors the subscription loop's
//! policy: transport and decode failures cause a reconnect at the same
//! expected index, while the internal signals and local-side errors end the
//! subscription or indicate a caller bug. `SchemaMismatch` is retryable from
//! the loop's point of view (the remote may be redeployed in place) but is
//! surfaced as a hard failure at construction time.

use crate::schema::SchemaDescriptor;
use thiserror::Error;

/// Result type alias for replicator operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur while replicating a remote stream.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// The remote stream serves entries of a different type.
    ///
    /// Detected by the schema probe, both at construction time and before
    /// every subscription attempt.
    #[error("remote schema mismatch: expected {expected}, got {actual}")]
    SchemaMismatch {
        expected: SchemaDescriptor,
        actual: SchemaDescriptor,
    },

    /// The remote endpoint did not produce a usable response.
    ///
    /// Covers transport failures and non-2xx statuses on any of the
    /// endpoint's operations.
    #[error("remote endpoint unreachable ({url}): {message}")]
    EndpointUnreachable {
        url: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// A probe returned 2xx but its body could not be interpreted.
    #[error("unexpected response from {url}: {message}")]
    BadResponse { url: String, message: String },

    /// A framed record violated the wire encoding.
    ///
    /// Includes index mismatches in checked mode. The in-flight response is
    /// abandoned and the loop reconnects at the same expected index.
    #[error("malformed record: {reason}")]
    MalformedChunk { reason: String },

    /// The subscriber returned `Done` from a record callback.
    ///
    /// Internal signal used to unwind the chunked response cleanly.
    #[error("subscription ended by the subscriber")]
    SubscriberEnded,

    /// The subscription was cancelled from outside the worker.
    ///
    /// Internal signal; the worker drains and exits.
    #[error("subscription cancelled")]
    SubscriberCancelled,

    /// Write-authority state machine violation on the local stream.
    ///
    /// E.g. requesting a second exclusive publisher, or reacquiring
    /// authority while a publisher is still alive.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The local publisher rejected a record.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ReplicationError {
    /// Unreachable endpoint with a transport-level cause.
    pub fn unreachable(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::EndpointUnreachable {
            url: url.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Unreachable endpoint without a transport-level cause (e.g. bad status).
    pub fn unreachable_msg(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EndpointUnreachable {
            url: url.into(),
            message: message.into(),
            source: None,
        }
    }

    /// A record that violates the wire encoding.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedChunk {
            reason: reason.into(),
        }
    }

    /// Check if the subscription loop retries after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SchemaMismatch { .. } => true,
            Self::EndpointUnreachable { .. } => true,
            Self::BadResponse { .. } => true,
            Self::MalformedChunk { .. } => true,
            Self::SubscriberEnded => false,
            Self::SubscriberCancelled => false,
            Self::InvalidState { .. } => false,
            Self::Publish(_) => false,
            Self::Config(_) => false,
        }
    }
}
