// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A sink is an object to which bytes can be written.

use appx_common::Result;
use base64::{prelude::BASE64_STANDARD, Engine};
use flate2::{Compress, Compression, Crc, FlushCompress, Status};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::mem;

/// A byte consumer. `write` returns only once every byte has been accepted;
/// `close` flushes whatever the sink buffers and defaults to a no-op.
pub trait Sink {
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// In-memory sink appending to a byte vector.
impl Sink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

// Fan-out: a tuple of sinks duplicates every write to each element, in
// order, and closes each element.
macro_rules! impl_sink_for_tuple {
    ($($index:tt $name:ident),+) => {
        impl<$($name: Sink),+> Sink for ($($name,)+) {
            fn write(&mut self, bytes: &[u8]) -> Result<()> {
                $(self.$index.write(bytes)?;)+
                Ok(())
            }

            fn close(&mut self) -> Result<()> {
                $(self.$index.close()?;)+
                Ok(())
            }
        }
    };
}

impl_sink_for_tuple!(0 A, 1 B);
impl_sink_for_tuple!(0 A, 1 B, 2 C);
impl_sink_for_tuple!(0 A, 1 B, 2 C, 3 D);

/// A sink which writes to an [std::io::Write] stream.
pub struct StreamSink<W: Write> {
    stream: W,
}

impl<W: Write> StreamSink<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }
}

impl<W: Write> Sink for StreamSink<W> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }
}

/// A sink which counts the number of bytes written, discarding the data.
#[derive(Clone, Copy, Default)]
pub struct OffsetSink {
    offset: u64,
}

impl OffsetSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A counter resuming from a running offset.
    pub fn at(start: u64) -> Self {
        Self { offset: start }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Sink for OffsetSink {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.offset += bytes.len() as u64;
        Ok(())
    }
}

/// A sink which computes a running SHA-256 digest.
#[derive(Clone, Default)]
pub struct Sha256Sink {
    hasher: Sha256,
}

impl Sha256Sink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The digest over everything written so far. Does not consume the
    /// running state; may be read any number of times.
    pub fn digest(&self) -> [u8; 32] {
        self.hasher.clone().finalize().into()
    }
}

impl Sink for Sha256Sink {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.hasher.update(bytes);
        Ok(())
    }
}

/// A sink which computes a running ZIP (zlib) CRC-32.
pub struct Crc32Sink {
    crc: Crc,
}

impl Crc32Sink {
    pub fn new() -> Self {
        Self { crc: Crc::new() }
    }

    pub fn crc32(&self) -> u32 {
        self.crc.sum()
    }
}

impl Default for Crc32Sink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for Crc32Sink {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.crc.update(bytes);
        Ok(())
    }
}

/// A sink which encodes its input in base-64 (standard alphabet, no line
/// breaks). `close` flushes the trailing group with `=` padding.
#[derive(Default)]
pub struct Base64Sink {
    carry: Vec<u8>,
    encoded: String,
}

impl Base64Sink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl Sink for Base64Sink {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.carry.extend_from_slice(bytes);
        let full_groups = self.carry.len() / 3 * 3;
        self.encoded
            .push_str(&BASE64_STANDARD.encode(&self.carry[..full_groups]));
        self.carry.drain(..full_groups);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.carry.is_empty() {
            self.encoded.push_str(&BASE64_STANDARD.encode(&self.carry));
            self.carry.clear();
        }
        Ok(())
    }
}

/// A sink which compresses into another sink using raw DEFLATE (the ZIP
/// flavour: no zlib header, 32 KiB window). `close` must be called after
/// writing data.
pub struct DeflateSink<S: Sink> {
    compress: Compress,
    out: S,
    is_empty: bool,
}

impl<S: Sink> DeflateSink<S> {
    pub fn new(compression_level: u32, out: S) -> Self {
        Self {
            compress: Compress::new(Compression::new(compression_level), false),
            out,
            is_empty: true,
        }
    }

    /// Total compressed bytes produced so far.
    pub fn total_out(&self) -> u64 {
        self.compress.total_out()
    }

    /// Sync flush: aligns the compressed stream on a byte boundary by
    /// emitting an empty stored block, so the bytes produced so far decode
    /// to exactly the bytes written so far. Skipped while the stream is
    /// still empty.
    pub fn flush(&mut self) -> Result<()> {
        if !self.is_empty {
            self.run(&[], FlushCompress::Sync)?;
        }
        Ok(())
    }

    fn run(&mut self, mut input: &[u8], flush: FlushCompress) -> Result<()> {
        let mut buffer = [0u8; 4096];
        loop {
            let before_in = self.compress.total_in();
            let before_out = self.compress.total_out();
            let status = self.compress.compress(input, &mut buffer, flush)?;
            let consumed = (self.compress.total_in() - before_in) as usize;
            let produced = (self.compress.total_out() - before_out) as usize;
            if produced > 0 {
                self.out.write(&buffer[..produced])?;
            }
            input = &input[consumed..];
            let done = match status {
                Status::StreamEnd => true,
                // The encoder may still hold buffered output whenever it
                // filled our buffer to the brim.
                _ => input.is_empty() && produced < buffer.len(),
            };
            if done {
                return Ok(());
            }
        }
    }
}

impl<S: Sink> Sink for DeflateSink<S> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !bytes.is_empty() {
            self.is_empty = false;
        }
        self.run(bytes, FlushCompress::None)
    }

    fn close(&mut self) -> Result<()> {
        self.run(&[], FlushCompress::Finish)
    }
}

/// A sink which feeds data to freshly made child sinks in equal-sized
/// chunks. A chunk ends once exactly `chunk_size` bytes were absorbed; the
/// trailing partial chunk ends on `close`. Completed children are kept, in
/// order, for later inspection. Zero bytes of input produce zero chunks.
pub struct ChunkSink<S: Sink, F: FnMut() -> S> {
    chunk_size: u64,
    factory: F,
    current: S,
    written: u64,
    chunks: Vec<S>,
}

impl<S: Sink, F: FnMut() -> S> ChunkSink<S, F> {
    pub fn new(chunk_size: u64, mut factory: F) -> Self {
        let current = factory();
        Self {
            chunk_size,
            factory,
            current,
            written: 0,
            chunks: Vec::new(),
        }
    }

    pub fn chunks(&self) -> &[S] {
        &self.chunks
    }

    fn end_chunk(&mut self) -> Result<()> {
        if self.written == 0 {
            return Ok(());
        }
        self.current.close()?;
        let finished = mem::replace(&mut self.current, (self.factory)());
        self.chunks.push(finished);
        self.written = 0;
        Ok(())
    }
}

impl<S: Sink, F: FnMut() -> S> Sink for ChunkSink<S, F> {
    fn write(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            let room = (self.chunk_size - self.written) as usize;
            let take = room.min(bytes.len());
            self.current.write(&bytes[..take])?;
            self.written += take as u64;
            bytes = &bytes[take..];
            if self.written == self.chunk_size {
                self.end_chunk()?;
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.end_chunk()?;
        self.current.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Child sink for splitter tests: remembers exactly what it received.
    #[derive(Default)]
    struct Recorder {
        bytes: Vec<u8>,
        closed: bool,
    }

    impl Sink for Recorder {
        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            self.bytes.extend_from_slice(bytes);
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    #[test]
    fn offset_sink_counts_bytes() {
        let mut sink = OffsetSink::at(10);
        sink.write(b"hello").unwrap();
        sink.write(b"").unwrap();
        sink.write(b"world").unwrap();
        assert_eq!(sink.offset(), 20);
    }

    #[test]
    fn crc32_matches_zlib() {
        let mut sink = Crc32Sink::new();
        sink.write(b"123456789").unwrap();
        // The canonical CRC-32 check value.
        assert_eq!(sink.crc32(), 0xCBF43926);
        assert_eq!(Crc32Sink::new().crc32(), 0);
    }

    #[test]
    fn sha256_digest_does_not_consume_state() {
        let mut sink = Sha256Sink::new();
        sink.write(b"abc").unwrap();
        let first = sink.digest();
        assert_eq!(first, sink.digest());
        assert_eq!(
            first,
            <[u8; 32]>::from(Sha256::digest(b"abc")),
        );
    }

    #[test]
    fn base64_sink_pads_on_close() {
        for input in [&b""[..], b"f", b"fo", b"foo", b"foob", b"fooba", b"foobar"] {
            let mut sink = Base64Sink::new();
            for byte in input {
                sink.write(std::slice::from_ref(byte)).unwrap();
            }
            sink.close().unwrap();
            assert_eq!(sink.encoded(), BASE64_STANDARD.encode(input));
        }
    }

    #[test]
    fn fan_out_duplicates_writes() {
        let mut crc = Crc32Sink::new();
        let mut counter = OffsetSink::new();
        let mut buffer: Vec<u8> = Vec::new();
        {
            let mut tee = (&mut crc, &mut counter, &mut buffer);
            tee.write(b"dupli").unwrap();
            tee.write(b"cated").unwrap();
        }
        assert_eq!(buffer, b"duplicated");
        assert_eq!(counter.offset(), 10);
        let mut expected = Crc32Sink::new();
        expected.write(b"duplicated").unwrap();
        assert_eq!(crc.crc32(), expected.crc32());
    }

    #[test]
    fn chunk_sink_reassembles_input() {
        for (len, expected_chunks) in [(0usize, 0usize), (1, 1), (7, 1), (8, 1), (9, 2), (24, 3), (25, 4)] {
            let input: Vec<u8> = (0..len as u32).map(|i| i as u8).collect();
            let mut splitter = ChunkSink::new(8, Recorder::default);
            // Feed in awkward increments to exercise splitting.
            for piece in input.chunks(3) {
                splitter.write(piece).unwrap();
            }
            splitter.close().unwrap();
            assert_eq!(splitter.chunks().len(), expected_chunks, "len {len}");
            let reassembled: Vec<u8> = splitter
                .chunks()
                .iter()
                .flat_map(|chunk| chunk.bytes.iter().copied())
                .collect();
            assert_eq!(reassembled, input);
            for chunk in &splitter.chunks()[..expected_chunks.saturating_sub(1)] {
                assert_eq!(chunk.bytes.len(), 8);
            }
            assert!(splitter.chunks().iter().all(|chunk| chunk.closed));
        }
    }

    #[test]
    fn deflate_sink_round_trips() {
        let input: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let mut compressed: Vec<u8> = Vec::new();
        {
            let mut deflate = DeflateSink::new(9, &mut compressed);
            for piece in input.chunks(4097) {
                deflate.write(piece).unwrap();
            }
            deflate.flush().unwrap();
            deflate.close().unwrap();
        }
        let mut inflated = Vec::new();
        let mut decoder = flate2::read::DeflateDecoder::new(compressed.as_slice());
        std::io::Read::read_to_end(&mut decoder, &mut inflated).unwrap();
        assert_eq!(inflated, input);
    }

    #[test]
    fn deflate_sink_finishes_empty_stream_in_two_bytes() {
        let mut compressed: Vec<u8> = Vec::new();
        {
            let mut deflate = DeflateSink::new(9, &mut compressed);
            // flush on an empty stream stays silent
            deflate.flush().unwrap();
            assert_eq!(deflate.total_out(), 0);
            deflate.close().unwrap();
        }
        assert_eq!(compressed.len(), 2);
    }

    #[test]
    fn deflate_sync_flush_emits_pending_output() {
        let mut compressed: Vec<u8> = Vec::new();
        {
            let mut deflate = DeflateSink::new(6, &mut compressed);
            deflate.write(b"first half ").unwrap();
            let before_flush = deflate.total_out();
            deflate.flush().unwrap();
            // The sync flush drains everything the encoder was holding and
            // terminates the block with the empty-stored-block marker.
            assert!(deflate.total_out() > before_flush);
            deflate.write(b"second half").unwrap();
            deflate.close().unwrap();
        }
        let mut inflated = Vec::new();
        let mut decoder = flate2::read::DeflateDecoder::new(compressed.as_slice());
        std::io::Read::read_to_end(&mut decoder, &mut inflated).unwrap();
        assert_eq!(inflated, b"first half second half");
    }
}
