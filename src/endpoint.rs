//! The remote endpoint: URL construction and the short probes.
//!
//! A [`RemoteEndpoint`] holds the stream's base URL and the schema
//! descriptor the local side expects. It is immutable after construction,
//! holds no connection of its own, and is shared via `Arc` by every
//! subscription loop spawned against it.
//!
//! # Operations
//!
//! | Request | Purpose |
//! |---|---|
//! | `GET {base}/schema.simple` | schema handshake |
//! | `GET {base}?sizeonly` | entry count |
//! | `GET {base}?i={index}[&checked]` | open the chunked subscription |
//! | `GET {base}?terminate={id}` | cancel an open subscription |

use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::schema::SchemaDescriptor;
use std::time::Duration;

/// Immutable description of one remote stream.
#[derive(Debug)]
pub struct RemoteEndpoint {
    url: String,
    schema: SchemaDescriptor,
    probe_timeout: Duration,
}

impl RemoteEndpoint {
    pub fn new(url: impl Into<String>, schema: SchemaDescriptor, probe_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            schema,
            probe_timeout,
        }
    }

    /// The stream's base URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The schema the local side expects the remote to serve.
    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    /// URL opening a chunked subscription from `index`.
    ///
    /// `checked` asks the server to include and validate per-record indices.
    pub fn subscribe_url(&self, index: u64, checked: bool) -> String {
        format!(
            "{}?i={}{}",
            self.url,
            index,
            if checked { "&checked" } else { "" }
        )
    }

    /// URL cancelling the subscription identified by `subscription_id`.
    pub fn terminate_url(&self, subscription_id: &str) -> String {
        format!("{}?terminate={}", self.url, subscription_id)
    }

    /// Probe the remote schema and compare it to the local one.
    pub async fn check_schema(&self, client: &reqwest::Client) -> Result<()> {
        let result = self.check_schema_inner(client).await;
        metrics::record_schema_check(&self.url, result.is_ok());
        result
    }

    async fn check_schema_inner(&self, client: &reqwest::Client) -> Result<()> {
        let url = format!("{}/schema.simple", self.url);
        let body = self.probe(client, &url).await?;
        let remote: SchemaDescriptor = serde_json::from_str(&body).map_err(|e| {
            ReplicationError::BadResponse {
                url: url.clone(),
                message: format!("invalid schema descriptor: {}", e),
            }
        })?;
        if remote != self.schema {
            return Err(ReplicationError::SchemaMismatch {
                expected: self.schema.clone(),
                actual: remote,
            });
        }
        Ok(())
    }

    /// Ask the remote how many entries the stream currently holds.
    pub async fn entry_count(&self, client: &reqwest::Client) -> Result<u64> {
        let url = format!("{}?sizeonly", self.url);
        let body = self.probe(client, &url).await?;
        body.trim()
            .parse::<u64>()
            .map_err(|e| ReplicationError::BadResponse {
                url,
                message: format!("invalid entry count: {}", e),
            })
    }

    /// One short GET with the probe timeout; 2xx bodies only.
    async fn probe(&self, client: &reqwest::Client, url: &str) -> Result<String> {
        let response = client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| ReplicationError::unreachable(url, e))?;
        if !response.status().is_success() {
            return Err(ReplicationError::unreachable_msg(
                url,
                format!("status {}", response.status()),
            ));
        }
        response
            .text()
            .await
            .map_err(|e| ReplicationError::unreachable(url, e))
    }
}
