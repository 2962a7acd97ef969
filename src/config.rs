//! Configuration for remote stream subscriptions.
//!
//! Configuration is passed to
//! [`SubscribableRemoteStream::connect_with()`](crate::SubscribableRemoteStream::connect_with)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use stream_replicator::config::{ReconnectConfig, RemoteStreamConfig};
//!
//! let config = RemoteStreamConfig {
//!     namespace_name: Some("telemetry".into()),
//!     reconnect: ReconnectConfig::exponential(),
//!     ..Default::default()
//! };
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! entry_name: "SensorReading"
//! namespace_name: "telemetry"
//! probe_timeout_ms: 10000
//! reconnect:
//!   initial_delay_ms: 100
//!   max_delay_ms: 30000
//!   backoff_factor: 2.0
//! ```

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one remote stream client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStreamConfig {
    /// Entry name to expect in the schema handshake.
    /// Defaults to the bare Rust type name of the entry.
    #[serde(default)]
    pub entry_name: Option<String>,

    /// Namespace to expect in the schema handshake.
    #[serde(default)]
    pub namespace_name: Option<String>,

    /// Delay policy between reconnection attempts.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Timeout for the short probes (schema check, entry count).
    /// The long-lived chunked subscription itself carries no timeout.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

impl Default for RemoteStreamConfig {
    fn default() -> Self {
        Self {
            entry_name: None,
            namespace_name: None,
            reconnect: ReconnectConfig::default(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl RemoteStreamConfig {
    /// Fast-moving settings for tests: short probes, small reconnect delays.
    pub fn for_testing() -> Self {
        Self {
            entry_name: None,
            namespace_name: None,
            reconnect: ReconnectConfig::for_testing(),
            probe_timeout_ms: 1_000,
        }
    }

    /// Probe timeout as a [`Duration`].
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.reconnect.validate()?;
        if self.probe_timeout_ms == 0 {
            return Err(ReplicationError::Config(
                "probe_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Delay policy between reconnection attempts of the subscription loop.
///
/// The default reconnects immediately: the loop goes straight back to the
/// schema probe after any failure, and a persistently failing remote is
/// hammered at full speed. Set `initial_delay_ms` to enable exponential
/// backoff capped at `max_delay_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry. Zero disables backoff entirely.
    #[serde(default)]
    pub initial_delay_ms: u64,

    /// Ceiling for the exponential backoff.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (e.g. 2.0 = double the delay each retry).
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::immediate()
    }
}

impl ReconnectConfig {
    /// Reconnect with no delay at all.
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }

    /// Exponential backoff from 100ms up to 30s.
    pub fn exponential() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }

    /// Tiny delays for tests.
    pub fn for_testing() -> Self {
        Self {
            initial_delay_ms: 2,
            max_delay_ms: 20,
            backoff_factor: 2.0,
        }
    }

    /// Delay before reconnection attempt number `attempt`.
    ///
    /// `attempt` counts consecutive failures; zero means the previous
    /// connection streamed successfully and the loop reconnects at once.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.initial_delay_ms == 0 {
            return Duration::ZERO;
        }
        let multiplier = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let delay_ms = (self.initial_delay_ms as f64 * multiplier).min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<()> {
        if self.backoff_factor < 1.0 {
            return Err(ReplicationError::Config(
                "backoff_factor must be >= 1.0".to_string(),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ReplicationError::Config(
                "max_delay_ms must be >= initial_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}
