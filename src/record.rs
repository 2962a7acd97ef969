// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire record types and the per-record decoder.
//!
//! Every framed record is one of two encodings:
//!
//! - an **indexed record**: a JSON timestamp-with-index, a TAB, and the
//!   JSON-encoded entry — `{"us":2,"index":1}\t{"sensor":"a","value":5}`
//! - a **head update**: a lone JSON timestamp — `{"us":9}`
//!
//! The decoder is the only place the discriminator between the two lives;
//! sinks never see the raw framing. It runs in one of two modes, fixed for
//! the lifetime of a subscription:
//!
//! - **Checked**: the timestamp prefix and the entry are fully parsed, and
//!   the record's index must equal the loop's expected next index.
//! - **Unchecked**: a record containing a TAB is handed to the sink as a raw
//!   log line; only head updates are parsed.
//!
//! The expected index survives reconnections (the loop resumes where it left
//! off), so the decoder outlives any single connection.

use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::schema::StreamEntry;
use crate::subscriber::{EntryResponse, Subscriber, TerminationResponse};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Microseconds since the epoch.
pub type Micros = u64;

/// Index and timestamp of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdxTs {
    pub index: u64,
    pub us: Micros,
}

/// A head-only timestamp record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsOnly {
    pub us: Micros,
}

/// The timestamp prefix of a record; `index` is present iff the record
/// carries an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsOptIdx {
    pub us: Micros,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
}

/// Client-side decode mode, fixed per subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Parse and validate every record.
    Checked,
    /// Pass entry-carrying records through as raw log lines.
    Unchecked,
}

/// Decodes framed records and drives the subscriber.
///
/// Owns the subscriber, the expected next index and the
/// consecutive-malformed counter.
pub struct RecordDecoder<E, S> {
    mode: DecodeMode,
    expected_index: u64,
    malformed_streak: u32,
    subscriber: S,
    _entry: PhantomData<fn() -> E>,
}

impl<E: StreamEntry, S: Subscriber<E>> RecordDecoder<E, S> {
    pub fn new(mode: DecodeMode, start_index: u64, subscriber: S) -> Self {
        Self {
            mode,
            expected_index: start_index,
            malformed_streak: 0,
            subscriber,
            _entry: PhantomData,
        }
    }

    /// The index the next indexed record must carry.
    pub fn expected_index(&self) -> u64 {
        self.expected_index
    }

    /// Record one malformed-chunk reconnect; returns the new streak length.
    pub fn note_malformed(&mut self) -> u32 {
        self.malformed_streak += 1;
        self.malformed_streak
    }

    /// Ask the subscriber whether to honour an external cancellation.
    pub fn terminate(&mut self) -> TerminationResponse {
        self.subscriber.terminate()
    }

    /// Decode one separator-free record and deliver it to the subscriber.
    ///
    /// Returns `MalformedChunk` on any encoding violation and
    /// `SubscriberEnded` when the sink replies `Done`.
    pub fn decode(&mut self, raw: &[u8]) -> Result<()> {
        let line = std::str::from_utf8(raw)
            .map_err(|_| ReplicationError::malformed("record is not valid UTF-8"))?;
        match self.mode {
            DecodeMode::Checked => self.decode_checked(line),
            DecodeMode::Unchecked => self.decode_unchecked(line),
        }
    }

    fn decode_checked(&mut self, line: &str) -> Result<()> {
        if line.is_empty() {
            return Err(ReplicationError::malformed("empty record"));
        }
        let mut fields = line.splitn(2, '\t');
        let prefix = fields.next().unwrap_or_default();
        let tail = fields.next();

        let ts: TsOptIdx = serde_json::from_str(prefix)
            .map_err(|e| ReplicationError::malformed(format!("bad timestamp prefix: {}", e)))?;

        match ts.index {
            Some(index) => {
                let Some(tail) = tail else {
                    return Err(ReplicationError::malformed(
                        "indexed record without an entry payload",
                    ));
                };
                if index != self.expected_index {
                    return Err(ReplicationError::malformed(format!(
                        "index {} does not match expected {}",
                        index, self.expected_index
                    )));
                }
                let entry: E = serde_json::from_str(tail)
                    .map_err(|e| ReplicationError::malformed(format!("bad entry payload: {}", e)))?;
                let current = IdxTs { index, us: ts.us };
                self.expected_index += 1;
                metrics::record_entry_delivered();
                if self.subscriber.on_entry(entry, current) == EntryResponse::Done {
                    return Err(ReplicationError::SubscriberEnded);
                }
            }
            None => {
                if tail.is_some() {
                    return Err(ReplicationError::malformed(
                        "head update with a trailing payload",
                    ));
                }
                metrics::record_head_update();
                if self.subscriber.on_head_update(ts.us) == EntryResponse::Done {
                    return Err(ReplicationError::SubscriberEnded);
                }
            }
        }
        self.malformed_streak = 0;
        Ok(())
    }

    fn decode_unchecked(&mut self, line: &str) -> Result<()> {
        if line.contains('\t') {
            let index = self.expected_index;
            self.expected_index += 1;
            metrics::record_entry_delivered();
            if self.subscriber.on_raw_line(line, index) == EntryResponse::Done {
                return Err(ReplicationError::SubscriberEnded);
            }
        } else {
            let ts: TsOnly = serde_json::from_str(line)
                .map_err(|e| ReplicationError::malformed(format!("bad head update: {}", e)))?;
            metrics::record_head_update();
            if self.subscriber.on_head_update(ts.us) == EntryResponse::Done {
                return Err(ReplicationError::SubscriberEnded);
            }
        }
        self.malformed_streak = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        value: i64,
    }

    impl StreamEntry for Reading {
        fn type_signature() -> String {
            "sensor:string,value:i64".to_string()
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Entry(Reading, IdxTs),
        Raw(String, u64),
        Head(Micros),
    }

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
        done_after: Option<usize>,
    }

    impl Recorder {
        fn done_after(n: usize) -> Self {
            Self {
                events: Arc::default(),
                done_after: Some(n),
            }
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: Event) -> EntryResponse {
            let mut events = self.events.lock().unwrap();
            events.push(event);
            match self.done_after {
                Some(n) if events.len() >= n => EntryResponse::Done,
                _ => EntryResponse::More,
            }
        }
    }

    impl Subscriber<Reading> for Recorder {
        fn on_entry(&mut self, entry: Reading, current: IdxTs) -> EntryResponse {
            self.push(Event::Entry(entry, current))
        }

        fn on_raw_line(&mut self, raw_line: &str, index: u64) -> EntryResponse {
            self.push(Event::Raw(raw_line.to_string(), index))
        }

        fn on_head_update(&mut self, us: Micros) -> EntryResponse {
            self.push(Event::Head(us))
        }
    }

    fn reading(sensor: &str, value: i64) -> Reading {
        Reading {
            sensor: sensor.to_string(),
            value,
        }
    }

    #[test]
    fn test_checked_decodes_indexed_records_in_order() {
        let recorder = Recorder::default();
        let mut decoder = RecordDecoder::new(DecodeMode::Checked, 0, recorder.clone());
        decoder
            .decode(br#"{"us":1,"index":0}	{"sensor":"a","value":1}"#)
            .unwrap();
        decoder
            .decode(br#"{"us":2,"index":1}	{"sensor":"b","value":2}"#)
            .unwrap();
        assert_eq!(decoder.expected_index(), 2);
        assert_eq!(
            recorder.events(),
            vec![
                Event::Entry(reading("a", 1), IdxTs { index: 0, us: 1 }),
                Event::Entry(reading("b", 2), IdxTs { index: 1, us: 2 }),
            ]
        );
    }

    #[test]
    fn test_checked_decodes_head_updates() {
        let recorder = Recorder::default();
        let mut decoder = RecordDecoder::new(DecodeMode::Checked, 0, recorder.clone());
        decoder.decode(br#"{"us":9}"#).unwrap();
        assert_eq!(recorder.events(), vec![Event::Head(9)]);
        assert_eq!(decoder.expected_index(), 0);
    }

    #[test]
    fn test_checked_rejects_index_mismatch() {
        let recorder = Recorder::default();
        let mut decoder = RecordDecoder::new(DecodeMode::Checked, 3, recorder.clone());
        let err = decoder
            .decode(br#"{"us":1,"index":5}	{"sensor":"a","value":1}"#)
            .unwrap_err();
        assert!(matches!(err, ReplicationError::MalformedChunk { .. }));
        assert_eq!(decoder.expected_index(), 3);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_checked_rejects_indexed_record_without_payload() {
        let mut decoder =
            RecordDecoder::new(DecodeMode::Checked, 0, Recorder::default());
        let err = decoder.decode(br#"{"us":1,"index":0}"#).unwrap_err();
        assert!(matches!(err, ReplicationError::MalformedChunk { .. }));
    }

    #[test]
    fn test_checked_rejects_head_update_with_payload() {
        let mut decoder =
            RecordDecoder::new(DecodeMode::Checked, 0, Recorder::default());
        let err = decoder.decode(b"{\"us\":1}\tgarbage").unwrap_err();
        assert!(matches!(err, ReplicationError::MalformedChunk { .. }));
    }

    #[test]
    fn test_checked_rejects_empty_and_garbage_records() {
        let mut decoder =
            RecordDecoder::new(DecodeMode::Checked, 0, Recorder::default());
        assert!(decoder.decode(b"").is_err());
        assert!(decoder.decode(b"not json").is_err());
        assert!(decoder.decode(&[0xFF, 0xFE]).is_err());
    }

    #[test]
    fn test_malformed_streak_resets_on_success() {
        let mut decoder =
            RecordDecoder::new(DecodeMode::Checked, 0, Recorder::default());
        assert_eq!(decoder.note_malformed(), 1);
        assert_eq!(decoder.note_malformed(), 2);
        decoder
            .decode(br#"{"us":1,"index":0}	{"sensor":"a","value":1}"#)
            .unwrap();
        assert_eq!(decoder.note_malformed(), 1);
    }

    #[test]
    fn test_done_surfaces_as_subscriber_ended() {
        let recorder = Recorder::done_after(1);
        let mut decoder = RecordDecoder::new(DecodeMode::Checked, 0, recorder);
        let err = decoder
            .decode(br#"{"us":1,"index":0}	{"sensor":"a","value":1}"#)
            .unwrap_err();
        assert!(matches!(err, ReplicationError::SubscriberEnded));
        // The index advanced before the sink was consulted.
        assert_eq!(decoder.expected_index(), 1);
    }

    #[test]
    fn test_unchecked_passes_raw_lines_through() {
        let recorder = Recorder::default();
        let mut decoder = RecordDecoder::new(DecodeMode::Unchecked, 7, recorder.clone());
        decoder.decode(b"anything\twith a tab").unwrap();
        decoder.decode(br#"{"us":42}"#).unwrap();
        assert_eq!(decoder.expected_index(), 8);
        assert_eq!(
            recorder.events(),
            vec![
                Event::Raw("anything\twith a tab".to_string(), 7),
                Event::Head(42),
            ]
        );
    }

    #[test]
    fn test_unchecked_rejects_garbage_head_update() {
        let mut decoder =
            RecordDecoder::new(DecodeMode::Unchecked, 0, Recorder::default());
        let err = decoder.decode(b"no tab and not json").unwrap_err();
        assert!(matches!(err, ReplicationError::MalformedChunk { .. }));
    }

    #[test]
    fn test_ts_optidx_serde() {
        let with_index: TsOptIdx = serde_json::from_str(r#"{"us":2,"index":1}"#).unwrap();
        assert_eq!(
            with_index,
            TsOptIdx {
                us: 2,
                index: Some(1)
            }
        );
        let head_only: TsOptIdx = serde_json::from_str(r#"{"us":9}"#).unwrap();
        assert_eq!(head_only, TsOptIdx { us: 9, index: None });
        // The index field is omitted, not null, when absent.
        assert_eq!(serde_json::to_string(&head_only).unwrap(), r#"{"us":9}"#);
    }
}
