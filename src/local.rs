// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local stream integration traits.
//!
//! Defines the interface the replicator needs from the local storage side:
//! a stream that can hand out an exclusive publisher while it is in
//! "following" mode, and the publisher itself. The traits decouple the
//! replicator from any particular storage engine and allow testing with the
//! bundled [`MemoryStream`].
//!
//! # Write Authority
//!
//! A stream is either *authoritative* (the application appends to it) or
//! *following* (only the replicator's publisher appends). The transitions
//! are deliberate and asymmetric:
//!
//! - [`become_following()`](FollowableStream::become_following) switches to
//!   following mode and hands out the one exclusive publisher.
//! - Dropping the publisher releases the write capability but leaves the
//!   stream in following mode.
//! - [`become_authoritative()`](FollowableStream::become_authoritative) is
//!   an explicit application action and is refused while a publisher is
//!   still alive.

use crate::error::{ReplicationError, Result};
use crate::record::{Micros, TsOptIdx};
use crate::schema::StreamEntry;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

/// Exclusive capability to append to a local stream in following mode.
pub trait StreamPublisher: Send + 'static {
    type Entry: StreamEntry;

    /// Append one entry with the given timestamp.
    fn publish(&mut self, entry: Self::Entry, us: Micros) -> Result<()>;

    /// Append a pre-rendered log line verbatim, skipping validation.
    fn publish_unsafe(&mut self, raw_line: &str) -> Result<()>;

    /// Advance the stream's logical clock without appending an entry.
    fn update_head(&mut self, us: Micros) -> Result<()>;
}

/// A local stream the replicator can drive.
pub trait FollowableStream: Send + Sync + 'static {
    type Entry: StreamEntry;
    type Publisher: StreamPublisher<Entry = Self::Entry>;

    /// Switch to following mode and hand out the exclusive publisher.
    ///
    /// Fails with `InvalidState` if a publisher is already outstanding.
    fn become_following(&self) -> Result<Self::Publisher>;

    /// Reacquire write authority for the application.
    ///
    /// Fails with `InvalidState` while a publisher is still alive. Never
    /// called by the replicator itself.
    fn become_authoritative(&self) -> Result<()>;

    /// Number of entries currently in the stream.
    fn number_of_entries(&self) -> u64;
}

/// Who may append to the stream right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAuthority {
    /// The application appends directly.
    Authoritative,
    /// Only the replicator's publisher appends.
    Following,
}

struct MemoryStreamInner {
    /// Rendered log lines, one per entry, in the wire framing.
    log_lines: Vec<String>,
    /// Logical clock; never decreases.
    head: Micros,
    authority: WriteAuthority,
    publisher_alive: bool,
}

/// In-memory append-only stream.
///
/// Stores entries as rendered log lines in the same
/// `{"us":..,"index":..}\t{entry}` framing the wire uses, which keeps
/// replicated streams byte-comparable to their source. Cloning is cheap and
/// shares the underlying log.
pub struct MemoryStream<E> {
    inner: Arc<Mutex<MemoryStreamInner>>,
    _entry: PhantomData<fn() -> E>,
}

impl<E> Clone for MemoryStream<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _entry: PhantomData,
        }
    }
}

impl<E: StreamEntry> Default for MemoryStream<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: StreamEntry> MemoryStream<E> {
    /// Create an empty stream in authoritative mode.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStreamInner {
                log_lines: Vec::new(),
                head: 0,
                authority: WriteAuthority::Authoritative,
                publisher_alive: false,
            })),
            _entry: PhantomData,
        }
    }

    /// Current write authority.
    pub fn authority(&self) -> WriteAuthority {
        lock(&self.inner).authority
    }

    /// Current head timestamp.
    pub fn head(&self) -> Micros {
        lock(&self.inner).head
    }

    /// Snapshot of the rendered log lines.
    pub fn log_lines(&self) -> Vec<String> {
        lock(&self.inner).log_lines.clone()
    }

    /// Append an entry as the authoritative writer.
    ///
    /// Fails with `InvalidState` while the stream is following.
    pub fn append(&self, entry: &E, us: Micros) -> Result<()> {
        let mut inner = lock(&self.inner);
        if inner.authority != WriteAuthority::Authoritative {
            return Err(ReplicationError::InvalidState {
                expected: "authoritative".to_string(),
                actual: "following".to_string(),
            });
        }
        append_entry(&mut inner, entry, us)
    }
}

fn lock(inner: &Arc<Mutex<MemoryStreamInner>>) -> MutexGuard<'_, MemoryStreamInner> {
    // A poisoned log is still structurally valid.
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

fn append_entry<E: StreamEntry>(
    inner: &mut MemoryStreamInner,
    entry: &E,
    us: Micros,
) -> Result<()> {
    if us < inner.head {
        return Err(ReplicationError::Publish(format!(
            "timestamp {}us is behind the head {}us",
            us, inner.head
        )));
    }
    let prefix = TsOptIdx {
        us,
        index: Some(inner.log_lines.len() as u64),
    };
    let line = format!(
        "{}\t{}",
        serde_json::to_string(&prefix).map_err(|e| ReplicationError::Publish(e.to_string()))?,
        serde_json::to_string(entry).map_err(|e| ReplicationError::Publish(e.to_string()))?
    );
    inner.log_lines.push(line);
    inner.head = us;
    Ok(())
}

impl<E: StreamEntry> FollowableStream for MemoryStream<E> {
    type Entry = E;
    type Publisher = MemoryPublisher<E>;

    fn become_following(&self) -> Result<Self::Publisher> {
        let mut inner = lock(&self.inner);
        if inner.publisher_alive {
            return Err(ReplicationError::InvalidState {
                expected: "no outstanding publisher".to_string(),
                actual: "publisher alive".to_string(),
            });
        }
        inner.authority = WriteAuthority::Following;
        inner.publisher_alive = true;
        Ok(MemoryPublisher {
            inner: Arc::clone(&self.inner),
            _entry: PhantomData,
        })
    }

    fn become_authoritative(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        if inner.publisher_alive {
            return Err(ReplicationError::InvalidState {
                expected: "no outstanding publisher".to_string(),
                actual: "publisher alive".to_string(),
            });
        }
        inner.authority = WriteAuthority::Authoritative;
        Ok(())
    }

    fn number_of_entries(&self) -> u64 {
        lock(&self.inner).log_lines.len() as u64
    }
}

/// The exclusive publisher handed out by [`MemoryStream::become_following`].
pub struct MemoryPublisher<E> {
    inner: Arc<Mutex<MemoryStreamInner>>,
    _entry: PhantomData<fn() -> E>,
}

impl<E: StreamEntry> StreamPublisher for MemoryPublisher<E> {
    type Entry = E;

    fn publish(&mut self, entry: E, us: Micros) -> Result<()> {
        append_entry(&mut lock(&self.inner), &entry, us)
    }

    fn publish_unsafe(&mut self, raw_line: &str) -> Result<()> {
        // Verbatim append; the head is not advanced and nothing is parsed.
        lock(&self.inner).log_lines.push(raw_line.to_string());
        Ok(())
    }

    fn update_head(&mut self, us: Micros) -> Result<()> {
        let mut inner = lock(&self.inner);
        if us < inner.head {
            return Err(ReplicationError::Publish(format!(
                "head update {}us is behind the head {}us",
                us, inner.head
            )));
        }
        inner.head = us;
        Ok(())
    }
}

impl<E> Drop for MemoryPublisher<E> {
    fn drop(&mut self) {
        // Releases the capability; the stream stays in following mode.
        lock(&self.inner).publisher_alive = false;
    }
}
