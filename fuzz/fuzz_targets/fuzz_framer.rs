//! Fuzz target for the chunk framer.
//!
//! The framer must never panic on arbitrary input, and must emit the same
//! records regardless of where the chunk boundary falls.

#![no_main]

use libfuzzer_sys::fuzz_target;
use stream_replicator::ChunkFramer;

fn collect(chunks: &[&[u8]]) -> Vec<Vec<u8>> {
    let mut framer = ChunkFramer::new();
    let mut records = Vec::new();
    for chunk in chunks {
        framer
            .feed(chunk, |record| {
                records.push(record.to_vec());
                Ok(())
            })
            .expect("framing never fails");
    }
    records
}

fuzz_target!(|data: &[u8]| {
    let Some((&first, body)) = data.split_first() else {
        return;
    };
    let split = first as usize % (body.len() + 1);
    let (left, right) = body.split_at(split);
    assert_eq!(collect(&[left, right]), collect(&[body]));
});
