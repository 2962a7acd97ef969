//! Shared helpers for the remote stream integration tests.
//!
//! Tests run against a wiremock server standing in for the remote node, so
//! no external services are required. The helpers here mount the standard
//! endpoints (schema handshake, log responses, terminate) and provide a
//! recording sink for asserting delivered event sequences.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use stream_replicator::{
    reflect, EntryResponse, IdxTs, Micros, SchemaDescriptor, StreamEntry, Subscriber,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// The entry type used by every integration test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor: String,
    pub value: i64,
}

impl StreamEntry for Reading {
    fn type_signature() -> String {
        "sensor:string,value:i64".to_string()
    }
}

pub fn reading(sensor: &str, value: i64) -> Reading {
    Reading {
        sensor: sensor.to_string(),
        value,
    }
}

/// Render one indexed log record the way the remote frames it.
pub fn log_line(index: u64, us: Micros, entry: &Reading) -> String {
    format!(
        "{{\"us\":{},\"index\":{}}}\t{}\n",
        us,
        index,
        serde_json::to_string(entry).unwrap()
    )
}

/// The descriptor the local `Reading` type reflects to.
pub fn local_schema() -> SchemaDescriptor {
    reflect::<Reading>(None, None)
}

/// Base URL of the stream on the mock server.
pub fn stream_url(server: &MockServer) -> String {
    format!("{}/stream", server.uri())
}

/// Mount a matching schema handshake.
pub async fn mount_schema(server: &MockServer) {
    mount_schema_descriptor(server, &local_schema()).await;
}

/// Mount an arbitrary schema descriptor.
pub async fn mount_schema_descriptor(server: &MockServer, descriptor: &SchemaDescriptor) {
    Mock::given(method("GET"))
        .and(path("/stream/schema.simple"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(serde_json::to_string(descriptor).unwrap()),
        )
        .mount(server)
        .await;
}

/// Mount the log response for subscriptions starting at `index`.
pub async fn mount_log(server: &MockServer, index: u64, sub_id: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path("/stream"))
        .and(query_param("i", index.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Current-Stream-Subscription-Id", sub_id)
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

/// Mount the terminate endpoint, asserting it is hit exactly `expected` times.
pub async fn mount_terminate(server: &MockServer, sub_id: &str, expected: u64) {
    Mock::given(method("GET"))
        .and(path("/stream"))
        .and(query_param("terminate", sub_id))
        .respond_with(ResponseTemplate::new(200))
        .expect(expected)
        .mount(server)
        .await;
}

/// One event delivered to the recording sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Entry(Reading, IdxTs),
    Raw(String, u64),
    Head(Micros),
}

/// A sink that records every delivery for later assertions.
///
/// Cloning shares the recorded events, so tests keep a clone while the
/// subscription owns the original.
#[derive(Clone, Default)]
pub struct RecordingSubscriber {
    events: Arc<Mutex<Vec<SinkEvent>>>,
    done_after: Option<usize>,
}

impl RecordingSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond `Done` once `n` events have been recorded.
    pub fn done_after(n: usize) -> Self {
        Self {
            events: Arc::default(),
            done_after: Some(n),
        }
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    fn push(&self, event: SinkEvent) -> EntryResponse {
        let mut events = self.events.lock().unwrap();
        events.push(event);
        match self.done_after {
            Some(n) if events.len() >= n => EntryResponse::Done,
            _ => EntryResponse::More,
        }
    }
}

impl Subscriber<Reading> for RecordingSubscriber {
    fn on_entry(&mut self, entry: Reading, current: IdxTs) -> EntryResponse {
        self.push(SinkEvent::Entry(entry, current))
    }

    fn on_raw_line(&mut self, raw_line: &str, index: u64) -> EntryResponse {
        self.push(SinkEvent::Raw(raw_line.to_string(), index))
    }

    fn on_head_update(&mut self, us: Micros) -> EntryResponse {
        self.push(SinkEvent::Head(us))
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
