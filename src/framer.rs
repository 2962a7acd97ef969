//! Incremental framing of a chunked byte stream into records.
//!
//! The remote serves the log as a chunked HTTP response whose body is a
//! sequence of records separated by `\n` or `\r` (single or doubled). Chunk
//! boundaries fall anywhere, including inside a record, so the framer keeps a
//! carry buffer holding the partial record at the tail of the previous chunk.
//!
//! Framing never fails on its own: every byte sequence partitions into
//! records somehow, and malformedness is the decoder's concern. Errors
//! returned by the `emit` callback abort the current chunk and propagate.
//!
//! A framer instance is tied to one connection. On reconnection a fresh
//! response starts a fresh record boundary, so the carry buffer must not
//! survive; the subscription loop constructs a new framer per attempt.

use crate::error::Result;

fn is_separator(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

/// Splits incoming chunks into separator-free records.
#[derive(Debug, Default)]
pub struct ChunkFramer {
    carry: Vec<u8>,
}

impl ChunkFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a partial record is buffered from a previous chunk.
    pub fn has_partial(&self) -> bool {
        !self.carry.is_empty()
    }

    /// Drop any buffered partial record.
    pub fn clear(&mut self) {
        self.carry.clear();
    }

    /// Feed one chunk, invoking `emit` for every completed record.
    ///
    /// Emitted records contain no `\n` or `\r`. An error from `emit` stops
    /// processing of this chunk immediately.
    pub fn feed<F>(&mut self, chunk: &[u8], mut emit: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut pos = 0;

        // Complete the carried-over record first.
        if !self.carry.is_empty() {
            match chunk.iter().position(|&b| is_separator(b)) {
                None => {
                    self.carry.extend_from_slice(chunk);
                    return Ok(());
                }
                Some(separator) => {
                    self.carry.extend_from_slice(&chunk[..separator]);
                    let record = std::mem::take(&mut self.carry);
                    emit(&record)?;
                    pos = separator;
                }
            }
        }

        loop {
            while pos < chunk.len() && is_separator(chunk[pos]) {
                pos += 1;
            }
            if pos == chunk.len() {
                return Ok(());
            }
            let start = pos;
            while pos < chunk.len() && !is_separator(chunk[pos]) {
                pos += 1;
            }
            if pos == chunk.len() {
                self.carry.extend_from_slice(&chunk[start..]);
                return Ok(());
            }
            emit(&chunk[start..pos])?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplicationError;

    /// Feed `chunks` through a fresh framer and collect emitted records.
    fn frame(chunks: &[&[u8]]) -> Vec<String> {
        let mut framer = ChunkFramer::new();
        let mut records = Vec::new();
        for chunk in chunks {
            framer
                .feed(chunk, |record| {
                    records.push(String::from_utf8_lossy(record).into_owned());
                    Ok(())
                })
                .unwrap();
        }
        records
    }

    #[test]
    fn test_single_chunk_multiple_records() {
        assert_eq!(frame(&[b"a\nb\nc\n"]), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_trailing_partial_is_carried() {
        let mut framer = ChunkFramer::new();
        let mut records = Vec::new();
        framer
            .feed(b"a\nbc", |r| {
                records.push(String::from_utf8_lossy(r).into_owned());
                Ok(())
            })
            .unwrap();
        assert_eq!(records, vec!["a"]);
        assert!(framer.has_partial());

        framer
            .feed(b"d\n", |r| {
                records.push(String::from_utf8_lossy(r).into_owned());
                Ok(())
            })
            .unwrap();
        assert_eq!(records, vec!["a", "bcd"]);
        assert!(!framer.has_partial());
    }

    #[test]
    fn test_record_split_across_three_chunks() {
        assert_eq!(frame(&[b"ab", b"cd", b"ef\n"]), vec!["abcdef"]);
    }

    #[test]
    fn test_crlf_and_doubled_separators_collapse() {
        assert_eq!(frame(&[b"a\r\nb\n\nc\r\r"]), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_chunk_starting_with_separator_flushes_carry() {
        assert_eq!(frame(&[b"abc", b"\ndef\n"]), vec!["abc", "def"]);
    }

    #[test]
    fn test_separator_only_chunks_emit_nothing() {
        assert_eq!(frame(&[b"\n", b"\r\n", b"\r"]), Vec::<String>::new());
    }

    #[test]
    fn test_empty_chunk_is_a_no_op() {
        assert_eq!(frame(&[b"a", b"", b"b\n"]), vec!["ab"]);
    }

    #[test]
    fn test_unterminated_tail_is_never_emitted() {
        assert_eq!(frame(&[b"a\nb"]), vec!["a"]);
    }

    #[test]
    fn test_clear_drops_partial() {
        let mut framer = ChunkFramer::new();
        framer.feed(b"partial", |_| Ok(())).unwrap();
        assert!(framer.has_partial());
        framer.clear();
        assert!(!framer.has_partial());

        let records = {
            let mut out = Vec::new();
            framer
                .feed(b"fresh\n", |r| {
                    out.push(String::from_utf8_lossy(r).into_owned());
                    Ok(())
                })
                .unwrap();
            out
        };
        assert_eq!(records, vec!["fresh"]);
    }

    #[test]
    fn test_emit_error_stops_the_chunk() {
        let mut framer = ChunkFramer::new();
        let mut emitted = 0;
        let result = framer.feed(b"a\nb\nc\n", |_| {
            emitted += 1;
            if emitted == 2 {
                Err(ReplicationError::malformed("boom"))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(emitted, 2);
    }

    #[test]
    fn test_framing_is_chunk_boundary_invariant() {
        let body = b"{\"us\":1,\"index\":0}\tA\n{\"us\":2,\"index\":1}\tB\r\n{\"us\":3}\n";
        let whole = frame(&[body]);
        for split in 0..=body.len() {
            let (left, right) = body.split_at(split);
            assert_eq!(frame(&[left, right]), whole, "split at {}", split);
        }
    }

    #[test]
    fn test_records_never_contain_separators() {
        let body = b"aa\rbb\ncc\r\ndd\n";
        for record in frame(&[body]) {
            assert!(!record.contains('\n'));
            assert!(!record.contains('\r'));
        }
    }
}
