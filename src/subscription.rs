//! The remote subscription: client handle, background worker and
//! cancellation handshake.
//!
//! # Worker Lifecycle
//!
//! Each subscription runs on a dedicated OS thread driving a current-thread
//! tokio runtime:
//!
//! ```text
//! Idle → Connecting → Streaming ─┬→ Reconnecting → Connecting …
//!                                ├→ Terminating → Done
//!                                └→ Done (sink returned Done)
//! ```
//!
//! Every connection attempt re-probes the remote schema, opens the chunked
//! GET at the current expected index, and feeds chunks through the framer
//! and decoder. All transport and decode failures are swallowed and retried;
//! the expected index survives reconnection while the carry buffer and the
//! subscription id do not.
//!
//! # Cancellation
//!
//! The remote assigns each subscription an opaque id, delivered in the
//! `X-Current-Stream-Subscription-Id` response header and required to build
//! the terminate URL. Because the id is only learned mid-stream, both
//! cancellation paths funnel through one waitable cell
//! ([`SubscriptionShared`]): cancellers block until the cell holds an id (or
//! the worker is already done), fire `GET {base}?terminate={id}` best-effort,
//! and leave the join to the handle's drop.

use crate::config::{ReconnectConfig, RemoteStreamConfig};
use crate::endpoint::RemoteEndpoint;
use crate::error::{ReplicationError, Result};
use crate::framer::ChunkFramer;
use crate::metrics;
use crate::record::{DecodeMode, RecordDecoder};
use crate::replicator::StreamReplicator;
use crate::schema::{reflect, SchemaDescriptor, StreamEntry};
use crate::subscriber::{Subscriber, TerminationResponse};
use futures::StreamExt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread;
use tracing::{debug, error, info, info_span, warn};

/// Response header carrying the server-assigned subscription id.
pub const SUBSCRIPTION_ID_HEADER: &str = "X-Current-Stream-Subscription-Id";

/// Callback invoked exactly once when a subscription's worker finishes.
pub type DoneCallback = Box<dyn FnOnce() + Send + 'static>;

/// Options for [`SubscribableRemoteStream::subscribe`].
#[derive(Default)]
pub struct SubscribeOptions {
    start_index: u64,
    checked: bool,
    on_done: Option<DoneCallback>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the first entry to request (default 0).
    pub fn start_index(mut self, index: u64) -> Self {
        self.start_index = index;
        self
    }

    /// Ask the server to include and validate per-record indices.
    ///
    /// This is the server-side `&checked` URL flag; it is independent of the
    /// client-side decode mode chosen by `subscribe` vs `subscribe_unchecked`.
    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }

    /// Invoke `callback` once when the subscription's worker finishes, for
    /// any exit reason.
    pub fn on_done(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_done = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("start_index", &self.start_index)
            .field("checked", &self.checked)
            .field("on_done", &self.on_done.is_some())
            .finish()
    }
}

struct IdCell {
    subscription_id: Option<String>,
    done: bool,
}

/// State shared between a subscription's worker and its cancellers.
///
/// The id cell is single-producer (the worker) multi-observer; cancellers
/// wait on it with a predicate loop so that "id published" and "worker
/// finished" both wake them, which keeps cancellation from deadlocking when
/// the worker dies before an id ever arrives.
pub(crate) struct SubscriptionShared {
    cell: Mutex<IdCell>,
    cond: Condvar,
    terminate_requested: AtomicBool,
    endpoint: Arc<RemoteEndpoint>,
}

impl SubscriptionShared {
    fn new(endpoint: Arc<RemoteEndpoint>) -> Self {
        Self {
            cell: Mutex::new(IdCell {
                subscription_id: None,
                done: false,
            }),
            cond: Condvar::new(),
            terminate_requested: AtomicBool::new(false),
            endpoint,
        }
    }

    fn lock(&self) -> MutexGuard<'_, IdCell> {
        // A poisoned cell is still structurally valid.
        self.cell.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn terminate_requested(&self) -> bool {
        self.terminate_requested.load(Ordering::Acquire)
    }

    fn publish_id(&self, id: String) {
        self.lock().subscription_id = Some(id);
        self.cond.notify_all();
    }

    fn clear_id(&self) {
        self.lock().subscription_id = None;
        self.cond.notify_all();
    }

    fn finish(&self) {
        let mut cell = self.lock();
        cell.subscription_id = None;
        cell.done = true;
        drop(cell);
        self.cond.notify_all();
    }

    fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Cooperatively cancel the subscription.
    ///
    /// Blocks until one of: the worker already finished, a terminate was
    /// already issued, or the subscription id becomes known. In the last
    /// case this fires the terminate URL (errors swallowed) and returns
    /// without joining the worker.
    pub(crate) fn terminate_subscription(&self) {
        let mut cell = self.lock();
        loop {
            if cell.done || self.terminate_requested() {
                return;
            }
            if let Some(id) = cell.subscription_id.clone() {
                self.terminate_requested.store(true, Ordering::Release);
                drop(cell);
                metrics::record_terminate_request(self.endpoint.url());
                fire_terminate(self.endpoint.terminate_url(&id));
                return;
            }
            cell = self
                .cond
                .wait(cell)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Fire a terminate GET, swallowing every error.
///
/// Runs on a throwaway thread with its own runtime so callers may sit inside
/// or outside an async context.
fn fire_terminate(url: String) {
    let request = thread::Builder::new()
        .name("stream-terminate".to_string())
        .spawn(move || {
            let Ok(runtime) = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            else {
                return;
            };
            let _ = runtime.block_on(reqwest::Client::new().get(&url).send());
        });
    if let Ok(handle) = request {
        let _ = handle.join();
    }
}

/// Owned scope of one remote subscription.
///
/// Dropping the handle cancels the subscription cooperatively and joins the
/// background worker; after the drop returns no further sink calls happen.
pub struct SubscriberHandle {
    shared: Arc<SubscriptionShared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SubscriberHandle {
    /// True once the background worker has finished.
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.shared.terminate_subscription();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A typed client for a remote append-only stream.
///
/// Construction probes the remote schema and fails on any disagreement, so a
/// live value is always talking to a remote of the right entry type.
/// Subscriptions run on background workers and are scoped by the returned
/// [`SubscriberHandle`]s; dropping the client itself cancels every
/// outstanding subscription (without joining their workers).
pub struct SubscribableRemoteStream<E: StreamEntry> {
    endpoint: Arc<RemoteEndpoint>,
    client: reqwest::Client,
    config: RemoteStreamConfig,
    subscriptions: Mutex<Vec<Weak<SubscriptionShared>>>,
    _entry: PhantomData<fn() -> E>,
}

impl<E: StreamEntry> SubscribableRemoteStream<E> {
    /// Connect with default configuration.
    pub async fn connect(url: impl Into<String>) -> Result<Self> {
        Self::connect_with(url, RemoteStreamConfig::default()).await
    }

    /// Connect, probing the schema synchronously; fails with
    /// `SchemaMismatch` or `EndpointUnreachable` before any worker exists.
    pub async fn connect_with(
        url: impl Into<String>,
        config: RemoteStreamConfig,
    ) -> Result<Self> {
        config.validate()?;
        let schema = reflect::<E>(
            config.entry_name.as_deref(),
            config.namespace_name.as_deref(),
        );
        let endpoint = Arc::new(RemoteEndpoint::new(url, schema, config.probe_timeout()));
        let client = reqwest::Client::new();
        endpoint.check_schema(&client).await?;
        info!(url = %endpoint.url(), schema = %endpoint.schema(), "connected to remote stream");
        Ok(Self {
            endpoint,
            client,
            config,
            subscriptions: Mutex::new(Vec::new()),
            _entry: PhantomData,
        })
    }

    /// The stream's base URL.
    pub fn url(&self) -> &str {
        self.endpoint.url()
    }

    /// The schema this client expects the remote to serve.
    pub fn schema(&self) -> &SchemaDescriptor {
        self.endpoint.schema()
    }

    /// Ask the remote how many entries the stream currently holds.
    pub async fn number_of_entries(&self) -> Result<u64> {
        self.endpoint.entry_count(&self.client).await
    }

    /// Subscribe with full client-side decoding and index validation.
    pub fn subscribe<S: Subscriber<E>>(
        &self,
        subscriber: S,
        options: SubscribeOptions,
    ) -> SubscriberHandle {
        self.spawn(DecodeMode::Checked, subscriber, options)
    }

    /// Subscribe passing entry-carrying records through as raw log lines.
    ///
    /// `options.checked` still controls the server-side `&checked` URL flag,
    /// independent of the client-side decode mode.
    pub fn subscribe_unchecked<S: Subscriber<E>>(
        &self,
        subscriber: S,
        options: SubscribeOptions,
    ) -> SubscriberHandle {
        self.spawn(DecodeMode::Unchecked, subscriber, options)
    }

    fn spawn<S: Subscriber<E>>(
        &self,
        mode: DecodeMode,
        subscriber: S,
        options: SubscribeOptions,
    ) -> SubscriberHandle {
        let shared = Arc::new(SubscriptionShared::new(Arc::clone(&self.endpoint)));
        {
            let mut subscriptions = self
                .subscriptions
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            subscriptions.retain(|weak| weak.strong_count() > 0);
            subscriptions.push(Arc::downgrade(&shared));
        }

        // The callback lives outside the worker closure so that a failed
        // thread spawn can still honour the exactly-once contract.
        let on_done: Arc<Mutex<Option<DoneCallback>>> = Arc::new(Mutex::new(options.on_done));

        let worker = SubscriptionWorker {
            shared: Arc::clone(&shared),
            endpoint: Arc::clone(&self.endpoint),
            decoder: RecordDecoder::new(mode, options.start_index, subscriber),
            checked_url_flag: options.checked,
            reconnect: self.config.reconnect.clone(),
        };

        let worker_on_done = Arc::clone(&on_done);
        let spawned = thread::Builder::new()
            .name("remote-subscription".to_string())
            .spawn(move || worker.run(worker_on_done));

        match spawned {
            Ok(thread) => SubscriberHandle {
                shared,
                thread: Some(thread),
            },
            Err(e) => {
                error!(error = %e, "failed to spawn subscription worker");
                shared.finish();
                if let Some(callback) = on_done.lock().unwrap_or_else(|e| e.into_inner()).take() {
                    callback();
                }
                SubscriberHandle {
                    shared,
                    thread: None,
                }
            }
        }
    }
}

impl<E: StreamEntry> Drop for SubscribableRemoteStream<E> {
    fn drop(&mut self) {
        // Cancel every outstanding subscription; their handles still own the
        // joins.
        let subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for weak in subscriptions.iter() {
            if let Some(shared) = weak.upgrade() {
                shared.terminate_subscription();
            }
        }
    }
}

/// Replicate a remote stream into a local one.
///
/// Convenience composition of [`SubscribableRemoteStream::subscribe`] and
/// [`StreamReplicator`]: the returned handle scopes the whole replication.
pub fn replicate<L>(
    remote: &SubscribableRemoteStream<L::Entry>,
    local: Arc<L>,
    options: SubscribeOptions,
) -> Result<SubscriberHandle>
where
    L: crate::local::FollowableStream,
{
    let start_index = local.number_of_entries();
    let sink = StreamReplicator::new(local)?;
    Ok(remote.subscribe(sink, options.start_index(start_index)))
}

struct SubscriptionWorker<E: StreamEntry, S: Subscriber<E>> {
    shared: Arc<SubscriptionShared>,
    endpoint: Arc<RemoteEndpoint>,
    decoder: RecordDecoder<E, S>,
    checked_url_flag: bool,
    reconnect: ReconnectConfig,
}

/// Marks the subscription done and fires `on_done` when dropped, so the
/// exactly-once contract survives a panicking sink.
struct FinishGuard {
    shared: Arc<SubscriptionShared>,
    on_done: Arc<Mutex<Option<DoneCallback>>>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.shared.finish();
        if let Some(callback) = self
            .on_done
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            callback();
        }
    }
}

impl<E: StreamEntry, S: Subscriber<E>> SubscriptionWorker<E, S> {
    fn run(mut self, on_done: Arc<Mutex<Option<DoneCallback>>>) {
        let span = info_span!("remote_subscription", url = %self.endpoint.url());
        let _span_guard = span.enter();
        let _finish_guard = FinishGuard {
            shared: Arc::clone(&self.shared),
            on_done,
        };

        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(self.subscription_loop()),
            Err(e) => error!(error = %e, "failed to build subscription runtime"),
        }
    }

    async fn subscription_loop(&mut self) {
        let client = reqwest::Client::new();
        let mut terminate_sent = false;
        let mut failed_attempts: u32 = 0;

        let exit_reason = loop {
            if !terminate_sent && self.shared.terminate_requested() {
                terminate_sent = true;
                if self.decoder.terminate() != TerminationResponse::Wait {
                    break ReplicationError::SubscriberCancelled;
                }
            }

            match self.stream_once(&client).await {
                Ok(()) => {
                    // The remote closed the response; resume at the same
                    // expected index.
                    failed_attempts = 0;
                }
                Err(ReplicationError::SubscriberEnded) => {
                    break ReplicationError::SubscriberEnded;
                }
                Err(e @ ReplicationError::MalformedChunk { .. }) => {
                    failed_attempts += 1;
                    metrics::record_malformed_chunk(self.endpoint.url());
                    let streak = self.decoder.note_malformed();
                    if streak == 3 {
                        let url = self
                            .endpoint
                            .subscribe_url(self.decoder.expected_index(), self.checked_url_flag);
                        eprintln!("repeatedly receiving malformed records from \"{}\"", url);
                        warn!(error = %e, streak, "repeated malformed records; reconnecting");
                    } else {
                        debug!(error = %e, "malformed record; reconnecting");
                    }
                }
                Err(e) => {
                    failed_attempts += 1;
                    debug!(error = %e, "subscription attempt failed; reconnecting");
                }
            }

            self.shared.clear_id();
            metrics::record_reconnect(self.endpoint.url());
            let delay = self.reconnect.delay_for_attempt(failed_attempts);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        };

        info!(
            reason = %exit_reason,
            next_index = self.decoder.expected_index(),
            "subscription finished"
        );
    }

    /// One connection attempt: schema probe, chunked GET, stream to the end.
    async fn stream_once(&mut self, client: &reqwest::Client) -> Result<()> {
        self.endpoint.check_schema(client).await?;
        let url = self
            .endpoint
            .subscribe_url(self.decoder.expected_index(), self.checked_url_flag);
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| ReplicationError::unreachable(&url, e))?;
        if !response.status().is_success() {
            return Err(ReplicationError::unreachable_msg(
                &url,
                format!("status {}", response.status()),
            ));
        }

        if let Some(id) = response
            .headers()
            .get(SUBSCRIPTION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            self.shared.publish_id(id.to_string());
        }
        debug!(url = %url, "streaming");

        // A fresh response starts a fresh record boundary.
        let mut framer = ChunkFramer::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| ReplicationError::unreachable(&url, e))?;
            if self.shared.terminate_requested() {
                // Discard, but keep draining until the transport returns.
                continue;
            }
            let decoder = &mut self.decoder;
            framer.feed(&chunk, |record| decoder.decode(record))?;
        }
        Ok(())
    }
}
