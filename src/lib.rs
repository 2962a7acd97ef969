//! # Stream Replicator
//!
//! A client for replicating a remote append-only log into a local stream.
//!
//! ## Architecture
//!
//! The replicator subscribes to a monotonically indexed log served over
//! HTTP, reconstructs typed entries from the chunked response, and
//! republishes them locally as the stream's exclusive writer:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          stream-replicator                           │
//! │                                                                      │
//! │  ┌────────────────┐   ┌─────────────┐   ┌───────────────────────┐   │
//! │  │ RemoteEndpoint │──►│ ChunkFramer │──►│ RecordDecoder         │   │
//! │  │ (chunked GET)  │   │ (records)   │   │ (checked / unchecked) │   │
//! │  └────────────────┘   └─────────────┘   └───────────┬───────────┘   │
//! │          ▲                                          ▼               │
//! │  ┌───────┴────────┐                     ┌───────────────────────┐   │
//! │  │ schema.simple  │                     │ StreamReplicator      │   │
//! │  │ (handshake)    │                     │ (exclusive publisher) │   │
//! │  └────────────────┘                     └───────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each subscription runs on one background worker; the worker retries all
//! transport and decode failures, resuming at the same expected index, and
//! honours cooperative cancellation through the server-assigned subscription
//! id.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use stream_replicator::{
//!     FollowableStream, MemoryStream, StreamEntry, StreamReplicator,
//!     SubscribableRemoteStream, SubscribeOptions,
//! };
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Reading {
//!     sensor: String,
//!     value: i64,
//! }
//!
//! impl StreamEntry for Reading {
//!     fn type_signature() -> String {
//!         "sensor:string,value:i64".to_string()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> stream_replicator::Result<()> {
//!     let remote =
//!         SubscribableRemoteStream::<Reading>::connect("http://node:8080/stream").await?;
//!     let local = Arc::new(MemoryStream::<Reading>::new());
//!     let replicator = StreamReplicator::new(Arc::clone(&local))?;
//!     let handle = remote.subscribe(replicator, SubscribeOptions::new());
//!
//!     // ... the worker replicates in the background until the handle drops.
//!     drop(handle);
//!     // Write authority is NOT restored automatically:
//!     local.become_authoritative()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod framer;
pub mod local;
pub mod metrics;
pub mod record;
pub mod replicator;
pub mod schema;
pub mod subscriber;
pub mod subscription;

// Re-exports for convenience
pub use config::{ReconnectConfig, RemoteStreamConfig};
pub use endpoint::RemoteEndpoint;
pub use error::{ReplicationError, Result};
pub use framer::ChunkFramer;
pub use local::{FollowableStream, MemoryPublisher, MemoryStream, StreamPublisher, WriteAuthority};
pub use record::{DecodeMode, IdxTs, Micros, RecordDecoder, TsOnly, TsOptIdx};
pub use replicator::StreamReplicator;
pub use schema::{reflect, SchemaDescriptor, StreamEntry};
pub use subscriber::{EntryResponse, Subscriber, TerminationResponse};
pub use subscription::{
    replicate, DoneCallback, SubscribableRemoteStream, SubscriberHandle, SubscribeOptions,
    SUBSCRIPTION_ID_HEADER,
};
