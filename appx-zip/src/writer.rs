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

use std::fs::File;
use std::io::Read;
use std::path::Path;

use appx_common::Result;

use crate::records::{CompressionMethod, ZipBlock, ZipFileEntry};
use crate::sink::{ChunkSink, Crc32Sink, DeflateSink, OffsetSink, Sha256Sink, Sink};

/// A DEFLATE sink that also maintains the 64 KiB block accounting: each
/// uncompressed slice is hashed, and the span of compressed bytes belonging
/// to it is recorded. Interior block boundaries end with a sync flush so
/// the spans are recoverable from the stream; the final block (full or
/// partial) is terminated by the finish on `close`, so the spans partition
/// the entire compressed stream.
struct DeflateBlockSink<S: Sink> {
    deflate: DeflateSink<S>,
    hasher: Sha256Sink,
    block_start: u64,
    bytes_in_block: u64,
    filled: bool,
    blocks: Vec<ZipBlock>,
}

impl<S: Sink> DeflateBlockSink<S> {
    fn new(compression_level: u32, out: S) -> Self {
        Self {
            deflate: DeflateSink::new(compression_level, out),
            hasher: Sha256Sink::new(),
            block_start: 0,
            bytes_in_block: 0,
            filled: false,
            blocks: Vec::new(),
        }
    }

    fn push_block(&mut self) {
        let end = self.deflate.total_out();
        self.blocks.push(ZipBlock {
            sha256: self.hasher.digest(),
            compressed_size: Some(end - self.block_start),
        });
        self.block_start = end;
        self.hasher = Sha256Sink::new();
        self.bytes_in_block = 0;
        self.filled = false;
    }

    fn compressed_size(&self) -> u64 {
        self.deflate.total_out()
    }

    fn into_blocks(self) -> Vec<ZipBlock> {
        self.blocks
    }
}

impl<S: Sink> Sink for DeflateBlockSink<S> {
    fn write(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            if self.filled {
                // More data follows, so the completed block is an interior
                // one: align the stream and record its span.
                self.deflate.flush()?;
                self.push_block();
            }
            let room = (ZipBlock::SIZE - self.bytes_in_block) as usize;
            let take = room.min(bytes.len());
            self.hasher.write(&bytes[..take])?;
            self.deflate.write(&bytes[..take])?;
            self.bytes_in_block += take as u64;
            bytes = &bytes[take..];
            if self.bytes_in_block == ZipBlock::SIZE {
                self.filled = true;
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.deflate.close()?;
        if self.bytes_in_block > 0 {
            self.push_block();
        }
        Ok(())
    }
}

/// Streams a local file into a sink through a 4 KiB copy buffer.
pub fn copy_file(path: &Path, sink: &mut dyn Sink) -> Result<()> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 4096];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            return Ok(());
        }
        sink.write(&buffer[..read])?;
    }
}

/// Writes one complete file record (local header followed by data) to
/// `sink`, reading the uncompressed bytes from `data_provider`.
///
/// `offset` is the absolute position of `sink` in the archive.
/// `data_provider` is called exactly once with a sink to write into; the
/// bytes are teed through the CRC-32, size, and block-hash accounting and
/// buffered in memory, because the local header carries the sizes and CRC
/// and is emitted first.
///
/// Sub-packages (names ending in `.appx`) are always stored, whatever the
/// compression level.
pub fn write_file_entry<F>(
    sink: &mut dyn Sink,
    offset: u64,
    archive_file_name: &str,
    compression_level: u32,
    data_provider: F,
) -> Result<ZipFileEntry>
where
    F: FnOnce(&mut dyn Sink) -> Result<()>,
{
    let store = compression_level == 0 || archive_file_name.ends_with(".appx");
    let mut crc = Crc32Sink::new();
    let mut data: Vec<u8> = Vec::new();

    let entry = if store {
        let mut size = OffsetSink::new();
        let mut chunks = ChunkSink::new(ZipBlock::SIZE, Sha256Sink::new);
        {
            let mut tee = (&mut crc, &mut size, &mut data, &mut chunks);
            data_provider(&mut tee)?;
        }
        chunks.close()?;
        let blocks = chunks
            .chunks()
            .iter()
            .map(|chunk| ZipBlock {
                sha256: chunk.digest(),
                compressed_size: None,
            })
            .collect();
        ZipFileEntry::new(
            archive_file_name,
            size.offset(),
            size.offset(),
            CompressionMethod::Store,
            offset,
            crc.crc32(),
            blocks,
            None,
        )
    } else {
        let mut size = OffsetSink::new();
        let mut body = DeflateBlockSink::new(compression_level, &mut data);
        {
            let mut tee = (&mut body, &mut size, &mut crc);
            data_provider(&mut tee)?;
        }
        body.close()?;
        let compressed_size = body.compressed_size();
        let blocks = body.into_blocks();
        ZipFileEntry::new(
            archive_file_name,
            compressed_size,
            size.offset(),
            CompressionMethod::Deflate,
            offset,
            crc.crc32(),
            blocks,
            None,
        )
    };

    entry.write_file_record_header(sink)?;
    sink.write(&data)?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use std::io::Read;

    fn deflate_round_trip(compressed: &[u8]) -> Vec<u8> {
        let mut inflated = Vec::new();
        let mut decoder = flate2::read::DeflateDecoder::new(compressed);
        decoder.read_to_end(&mut inflated).unwrap();
        inflated
    }

    #[test]
    fn stored_entry_keeps_bytes_and_blocks() {
        let input = b"Hello, stored bytes!".to_vec();
        let mut out: Vec<u8> = Vec::new();
        let entry = write_file_entry(&mut out, 0, "hello.txt", 0, |sink| sink.write(&input))
            .unwrap();
        assert_eq!(entry.method, CompressionMethod::Store);
        assert_eq!(entry.uncompressed_size, input.len() as u64);
        assert_eq!(entry.compressed_size, input.len() as u64);
        assert_eq!(entry.blocks.len(), 1);
        assert_eq!(entry.blocks[0].compressed_size, None);
        assert_eq!(
            entry.blocks[0].sha256,
            <[u8; 32]>::from(Sha256::digest(&input))
        );
        // header then raw data
        assert_eq!(out.len() as u64, entry.file_record_size());
        assert_eq!(&out[entry.file_record_header_size() as usize..], &input[..]);
    }

    #[test]
    fn deflated_entry_blocks_partition_the_stream() {
        // 100 KiB of zeros: exactly two blocks (65536 + 34464).
        let input = vec![0u8; 100 * 1024];
        let mut out: Vec<u8> = Vec::new();
        let entry =
            write_file_entry(&mut out, 0, "zeros.bin", 9, |sink| sink.write(&input)).unwrap();
        assert_eq!(entry.method, CompressionMethod::Deflate);
        assert_eq!(entry.uncompressed_size, input.len() as u64);
        assert_eq!(entry.blocks.len(), 2);
        let spans: Vec<u64> = entry
            .blocks
            .iter()
            .map(|block| block.compressed_size.unwrap())
            .collect();
        assert_eq!(spans.iter().sum::<u64>(), entry.compressed_size);
        assert_eq!(
            entry.blocks[0].sha256,
            <[u8; 32]>::from(Sha256::digest(&input[..65536]))
        );
        assert_eq!(
            entry.blocks[1].sha256,
            <[u8; 32]>::from(Sha256::digest(&input[65536..]))
        );
        let body = &out[entry.file_record_header_size() as usize..];
        assert_eq!(body.len() as u64, entry.compressed_size);
        assert_eq!(deflate_round_trip(body), input);
        // The interior boundary ends on a sync flush, whose empty stored
        // block is the last four bytes of the first span.
        assert_eq!(&body[spans[0] as usize - 4..spans[0] as usize], &[0x00, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn zero_byte_file_has_no_blocks() {
        let mut stored: Vec<u8> = Vec::new();
        let entry = write_file_entry(&mut stored, 0, "empty", 0, |_| Ok(())).unwrap();
        assert_eq!(entry.blocks.len(), 0);
        assert_eq!(entry.uncompressed_size, 0);
        assert_eq!(entry.compressed_size, 0);
        assert_eq!(entry.crc32, 0);

        let mut deflated: Vec<u8> = Vec::new();
        let entry = write_file_entry(&mut deflated, 0, "empty", 9, |_| Ok(())).unwrap();
        assert_eq!(entry.blocks.len(), 0);
        assert_eq!(entry.uncompressed_size, 0);
        // the finish emits the final empty block
        assert_eq!(entry.compressed_size, 2);
    }

    #[test]
    fn appx_members_are_always_stored() {
        let input = vec![7u8; 4096];
        let mut out: Vec<u8> = Vec::new();
        let entry =
            write_file_entry(&mut out, 0, "Sub.appx", 9, |sink| sink.write(&input)).unwrap();
        assert_eq!(entry.method, CompressionMethod::Store);
        assert_eq!(entry.compressed_size, entry.uncompressed_size);
    }

    #[test]
    fn exact_block_multiple_has_no_empty_trailing_block() {
        let input = vec![1u8; 65536 * 2];
        let mut out: Vec<u8> = Vec::new();
        let entry =
            write_file_entry(&mut out, 0, "twoblocks", 5, |sink| sink.write(&input)).unwrap();
        assert_eq!(entry.blocks.len(), 2);
        let spans: u64 = entry
            .blocks
            .iter()
            .map(|block| block.compressed_size.unwrap())
            .sum();
        assert_eq!(spans, entry.compressed_size);
    }

    #[test]
    fn header_offset_is_recorded() {
        let mut out: Vec<u8> = Vec::new();
        let entry = write_file_entry(&mut out, 4242, "x", 0, |sink| sink.write(b"y")).unwrap();
        assert_eq!(entry.header_offset, 4242);
        assert_eq!(entry.data_offset(), 4242 + 30 + 1);
    }
}
