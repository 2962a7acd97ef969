//! Fuzz target for the record decoder.
//!
//! Arbitrary records must produce a clean decode or a malformed-record
//! error, never a panic, in both decode modes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use serde::{Deserialize, Serialize};
use stream_replicator::{
    DecodeMode, EntryResponse, IdxTs, Micros, RecordDecoder, StreamEntry, Subscriber,
};

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    value: u64,
}

impl StreamEntry for Payload {
    fn type_signature() -> String {
        "value:u64".to_string()
    }
}

struct Discard;

impl Subscriber<Payload> for Discard {
    fn on_entry(&mut self, _entry: Payload, _current: IdxTs) -> EntryResponse {
        EntryResponse::More
    }

    fn on_head_update(&mut self, _us: Micros) -> EntryResponse {
        EntryResponse::More
    }
}

fuzz_target!(|data: &[u8]| {
    let mut checked = RecordDecoder::<Payload, _>::new(DecodeMode::Checked, 0, Discard);
    let _ = checked.decode(data);

    let mut unchecked = RecordDecoder::<Payload, _>::new(DecodeMode::Unchecked, 0, Discard);
    let _ = unchecked.decode(data);
});
