//! The pre-built sink that republishes a remote stream locally.
//!
//! A [`StreamReplicator`] implements [`Subscriber`] by forwarding every
//! decoded event into a local stream's exclusive publisher. It acquires the
//! publisher by switching the stream into following mode at construction,
//! and releases it on drop — without restoring write authority, which stays
//! an explicit application action.

use crate::error::Result;
use crate::local::{FollowableStream, StreamPublisher};
use crate::record::{IdxTs, Micros};
use crate::subscriber::{EntryResponse, Subscriber, TerminationResponse};
use std::sync::Arc;
use tracing::error;

/// Sink that publishes every received event into a local stream.
pub struct StreamReplicator<S: FollowableStream> {
    stream: Arc<S>,
    // `Option` so the publisher is dropped before the stream reference.
    publisher: Option<S::Publisher>,
}

impl<S: FollowableStream> StreamReplicator<S> {
    /// Switch `stream` into following mode and take its publisher.
    pub fn new(stream: Arc<S>) -> Result<Self> {
        let publisher = stream.become_following()?;
        Ok(Self {
            stream,
            publisher: Some(publisher),
        })
    }

    /// The stream this replicator publishes into.
    pub fn stream(&self) -> &Arc<S> {
        &self.stream
    }

    fn with_publisher(
        &mut self,
        operation: &str,
        apply: impl FnOnce(&mut S::Publisher) -> Result<()>,
    ) -> EntryResponse {
        let Some(publisher) = self.publisher.as_mut() else {
            return EntryResponse::Done;
        };
        match apply(publisher) {
            Ok(()) => EntryResponse::More,
            Err(e) => {
                error!(operation, error = %e, "local publish failed; ending subscription");
                EntryResponse::Done
            }
        }
    }
}

impl<S: FollowableStream> Subscriber<S::Entry> for StreamReplicator<S> {
    fn on_entry(&mut self, entry: S::Entry, current: IdxTs) -> EntryResponse {
        self.with_publisher("publish", |p| p.publish(entry, current.us))
    }

    fn on_raw_line(&mut self, raw_line: &str, _index: u64) -> EntryResponse {
        self.with_publisher("publish_unsafe", |p| p.publish_unsafe(raw_line))
    }

    fn on_head_update(&mut self, us: Micros) -> EntryResponse {
        self.with_publisher("update_head", |p| p.update_head(us))
    }

    fn terminate(&mut self) -> TerminationResponse {
        TerminationResponse::Terminate
    }
}

impl<S: FollowableStream> Drop for StreamReplicator<S> {
    fn drop(&mut self) {
        // Release the publisher first. The stream stays in following mode;
        // becoming authoritative again is the application's explicit call.
        self.publisher = None;
    }
}
