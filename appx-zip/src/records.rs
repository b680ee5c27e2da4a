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

//! Byte layout of the archive structures (see the PKWARE APPNOTE).
//!
//! All timestamps and version numbers are hard-coded so archiving is
//! deterministic; the local clock is never read.

use appx_common::{fit, Result};
use deku::prelude::*;

use crate::sink::Sink;

/// MS-DOS timestamp for every file in the archive.
pub const FILE_TIME: u16 = 0x8706;
pub const FILE_DATE: u16 = 0x4722;

// Magic archiver numbers for files in the archive.
pub const ARCHIVER_VERSION: u16 = 45;
pub const FILE_EXTRACT_VERSION: u16 = 20;
pub const ARCHIVE_EXTRACT_VERSION: u16 = 45;

/// The one archive member whose name must not be percent-escaped.
pub const CONTENT_TYPES_FILE_NAME: &str = "[Content_Types].xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Store,
    Deflate,
}

impl CompressionMethod {
    pub fn code(self) -> u16 {
        match self {
            CompressionMethod::Store => 0,
            CompressionMethod::Deflate => 8,
        }
    }
}

/// Metadata for one 64 KiB slice of a file's uncompressed bytes, as listed
/// in AppxBlockMap.xml.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ZipBlock {
    /// Hash of the uncompressed slice.
    pub sha256: [u8; 32],
    /// Bytes the slice occupies in the DEFLATE stream; `None` for stored
    /// files.
    pub compressed_size: Option<u64>,
}

impl ZipBlock {
    /// Uncompressed bytes per block.
    /// <https://msdn.microsoft.com/en-us/library/windows/desktop/jj709947.aspx>
    pub const SIZE: u64 = 65536;
}

#[derive(Debug, PartialEq, DekuWrite, Clone)]
#[deku(endian = "little")]
struct LocalFileHeader {
    signature: u32,
    extract_version: u16,
    flags: u16,
    method: u16,
    mtime: u16,
    mdate: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    name_length: u16,
    extra_length: u16,
    name: Vec<u8>,
}

#[derive(Debug, PartialEq, DekuWrite, Clone)]
#[deku(endian = "little")]
struct CentralDirectoryHeader {
    signature: u32,
    archiver_version: u16,
    extract_version: u16,
    flags: u16,
    method: u16,
    mtime: u16,
    mdate: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    name_length: u16,
    extra_length: u16,
    comment_length: u16,
    start_disk: u16,
    internal_attributes: u16,
    external_attributes: u32,
    header_offset: u32,
    name: Vec<u8>,
}

/// The ZIP64 end-of-central-directory record, the ZIP64 locator, and the
/// classic end record, emitted back to back. The classic record's counts,
/// size, and offset are saturated so readers consult the ZIP64 record.
#[derive(Debug, PartialEq, DekuWrite, Clone)]
#[deku(endian = "little")]
struct EndOfCentralDirectory {
    zip64_signature: u32,
    zip64_record_size: u64,
    archiver_version: u16,
    extract_version: u16,
    disk: u32,
    directory_start_disk: u32,
    entries_on_disk: u64,
    entries_total: u64,
    directory_size: u64,
    directory_offset: u64,
    locator_signature: u32,
    directory_end_disk: u32,
    directory_end_offset: u64,
    disk_count: u32,
    classic_signature: u32,
    classic_disk: u16,
    classic_start_disk: u16,
    classic_entries_on_disk: u16,
    classic_entries_total: u16,
    classic_directory_size: u32,
    classic_directory_offset: u32,
    comment_length: u16,
}

/// Escapes an archive-relative name into the subset Windows accepts:
/// every byte outside `A-Z a-z 0-9 - . _ ~ /` becomes `%HH` (uppercase),
/// non-ASCII characters byte-by-byte over their UTF-8 encoding.
///
/// `[Content_Types].xml` is a special case: the `[]` in the name must not
/// be escaped, otherwise the package is invalid.
pub fn sanitize_file_name(file_name: &str) -> String {
    if file_name == CONTENT_TYPES_FILE_NAME {
        return file_name.to_owned();
    }
    let mut sanitized = String::with_capacity(file_name.len());
    for &byte in file_name.as_bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~' | b'/') {
            sanitized.push(byte as char);
        } else {
            sanitized.push_str(&format!("%{byte:02X}"));
        }
    }
    sanitized
}

/// Immutable description of one archive member, produced once its bytes
/// have been streamed in.
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    /// Archive-relative name as supplied by the caller (UTF-8, unescaped).
    pub file_name: String,
    /// The escaped name actually stored in the archive.
    pub sanitized_file_name: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub method: CompressionMethod,
    /// Absolute offset of the local file header in the output.
    pub header_offset: u64,
    pub crc32: u32,
    /// Block descriptors for payload files.
    pub blocks: Vec<ZipBlock>,
    /// Whole-content SHA-256, recorded only for \[Content_Types\].xml and
    /// AppxBlockMap.xml.
    pub sha256: Option<[u8; 32]>,
}

impl ZipFileEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_name: impl Into<String>,
        compressed_size: u64,
        uncompressed_size: u64,
        method: CompressionMethod,
        header_offset: u64,
        crc32: u32,
        blocks: Vec<ZipBlock>,
        sha256: Option<[u8; 32]>,
    ) -> Self {
        let file_name = file_name.into();
        let sanitized_file_name = sanitize_file_name(&file_name);
        Self {
            file_name,
            sanitized_file_name,
            compressed_size,
            uncompressed_size,
            method,
            header_offset,
            crc32,
            blocks,
            sha256,
        }
    }

    pub fn file_record_header_size(&self) -> u64 {
        30 + self.sanitized_file_name.len() as u64
    }

    pub fn file_record_size(&self) -> u64 {
        self.file_record_header_size() + self.compressed_size
    }

    pub fn directory_entry_size(&self) -> u64 {
        46 + self.sanitized_file_name.len() as u64
    }

    /// Absolute offset of the member's data, right behind its local header.
    pub fn data_offset(&self) -> u64 {
        self.header_offset + self.file_record_header_size()
    }

    pub fn write_file_record_header(&self, sink: &mut dyn Sink) -> Result<()> {
        let name = self.sanitized_file_name.as_bytes();
        let header = LocalFileHeader {
            signature: 0x04034B50,
            extract_version: FILE_EXTRACT_VERSION,
            flags: 0,
            method: self.method.code(),
            mtime: FILE_TIME,
            mdate: FILE_DATE,
            crc32: self.crc32,
            compressed_size: fit(self.compressed_size, "compressed size")?,
            uncompressed_size: fit(self.uncompressed_size, "uncompressed size")?,
            name_length: fit(name.len(), "file name length")?,
            extra_length: 0,
            name: name.to_vec(),
        };
        sink.write(&header.to_bytes()?)
    }

    pub fn write_directory_entry(&self, sink: &mut dyn Sink) -> Result<()> {
        let name = self.sanitized_file_name.as_bytes();
        let entry = CentralDirectoryHeader {
            signature: 0x02014B50,
            archiver_version: ARCHIVER_VERSION,
            extract_version: FILE_EXTRACT_VERSION,
            flags: 0,
            method: self.method.code(),
            mtime: FILE_TIME,
            mdate: FILE_DATE,
            crc32: self.crc32,
            compressed_size: fit(self.compressed_size, "compressed size")?,
            uncompressed_size: fit(self.uncompressed_size, "uncompressed size")?,
            name_length: fit(name.len(), "file name length")?,
            extra_length: 0,
            comment_length: 0,
            start_disk: 0,
            internal_attributes: 0,
            external_attributes: 0,
            header_offset: fit(self.header_offset, "local header offset")?,
            name: name.to_vec(),
        };
        sink.write(&entry.to_bytes()?)
    }
}

/// Writes the end-of-central-directory triple. `directory_end_offset` is
/// the absolute offset at which the ZIP64 end record itself begins, i.e.
/// right behind the last directory entry.
pub fn write_end_of_central_directory(
    sink: &mut dyn Sink,
    directory_end_offset: u64,
    entries: &[ZipFileEntry],
) -> Result<()> {
    let directory_size: u64 = entries.iter().map(ZipFileEntry::directory_entry_size).sum();
    let file_records_size: u64 = entries.iter().map(ZipFileEntry::file_record_size).sum();
    let record = EndOfCentralDirectory {
        zip64_signature: 0x06064B50,
        // Size of the ZIP64 record counted from after this field.
        zip64_record_size: 56 - 12,
        archiver_version: ARCHIVER_VERSION,
        extract_version: ARCHIVE_EXTRACT_VERSION,
        disk: 0,
        directory_start_disk: 0,
        entries_on_disk: entries.len() as u64,
        entries_total: entries.len() as u64,
        directory_size,
        // File records start at offset zero, so their total size is where
        // the directory begins.
        directory_offset: file_records_size,
        locator_signature: 0x07064B50,
        directory_end_disk: 0,
        directory_end_offset,
        disk_count: 1,
        classic_signature: 0x06054B50,
        classic_disk: 0,
        classic_start_disk: 0,
        classic_entries_on_disk: 0xFFFF,
        classic_entries_total: 0xFFFF,
        classic_directory_size: 0xFFFFFFFF,
        classic_directory_offset: 0xFFFFFFFF,
        comment_length: 0,
    };
    sink.write(&record.to_bytes()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> ZipFileEntry {
        ZipFileEntry::new(
            name,
            11,
            13,
            CompressionMethod::Deflate,
            0x1234,
            0xDEADBEEF,
            vec![],
            None,
        )
    }

    #[test]
    fn sanitize_keeps_unreserved_characters() {
        let clean = "Assets/Images-2.0_b~x.png";
        assert_eq!(sanitize_file_name(clean), clean);
        // Names already made of allowed bytes are fixed points.
        assert_eq!(sanitize_file_name(&sanitize_file_name(clean)), clean);
    }

    #[test]
    fn sanitize_escapes_reserved_bytes() {
        assert_eq!(sanitize_file_name("a b"), "a%20b");
        assert_eq!(sanitize_file_name("100%"), "100%25");
        assert_eq!(sanitize_file_name("~hello!world&'[x]"), "~hello%21world%26%27%5Bx%5D");
    }

    #[test]
    fn sanitize_escapes_utf8_byte_by_byte() {
        // U+00E9 LATIN SMALL LETTER E WITH ACUTE followed by a space.
        assert_eq!(sanitize_file_name("\u{e9} "), "%C3%A9%20");
    }

    #[test]
    fn sanitize_leaves_content_types_verbatim() {
        assert_eq!(
            sanitize_file_name(CONTENT_TYPES_FILE_NAME),
            CONTENT_TYPES_FILE_NAME
        );
    }

    #[test]
    fn file_record_header_layout() {
        let mut bytes: Vec<u8> = Vec::new();
        entry("hello.txt").write_file_record_header(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 30 + 9);
        assert_eq!(&bytes[..4], &[0x50, 0x4B, 0x03, 0x04]);
        // version 20, flags 0, method 8
        assert_eq!(&bytes[4..10], &[20, 0, 0, 0, 8, 0]);
        // fixed MS-DOS time and date
        assert_eq!(&bytes[10..14], &[0x06, 0x87, 0x22, 0x47]);
        assert_eq!(&bytes[14..18], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(&bytes[18..22], &[11, 0, 0, 0]);
        assert_eq!(&bytes[22..26], &[13, 0, 0, 0]);
        assert_eq!(&bytes[26..28], &[9, 0]);
        assert_eq!(&bytes[28..30], &[0, 0]);
        assert_eq!(&bytes[30..], b"hello.txt");
    }

    #[test]
    fn directory_entry_layout() {
        let mut bytes: Vec<u8> = Vec::new();
        entry("hello.txt").write_directory_entry(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 46 + 9);
        assert_eq!(&bytes[..4], &[0x50, 0x4B, 0x01, 0x02]);
        assert_eq!(&bytes[4..8], &[45, 0, 20, 0]);
        // local header offset lives at 42..46
        assert_eq!(&bytes[42..46], &[0x34, 0x12, 0, 0]);
        assert_eq!(&bytes[46..], b"hello.txt");
    }

    #[test]
    fn end_of_directory_triple_layout() {
        let entries = [entry("a"), entry("bb")];
        let mut bytes: Vec<u8> = Vec::new();
        write_end_of_central_directory(&mut bytes, 0x1000, &entries).unwrap();
        assert_eq!(bytes.len(), 56 + 20 + 22);
        assert_eq!(&bytes[..4], &[0x50, 0x4B, 0x06, 0x06]);
        // entry counts
        assert_eq!(&bytes[24..32], &2u64.to_le_bytes());
        assert_eq!(&bytes[32..40], &2u64.to_le_bytes());
        // directory size: (46 + 1) + (46 + 2)
        assert_eq!(&bytes[40..48], &95u64.to_le_bytes());
        // directory offset: (30 + 1 + 11) + (30 + 2 + 11)
        assert_eq!(&bytes[48..56], &85u64.to_le_bytes());
        // locator points at the ZIP64 record
        assert_eq!(&bytes[56..60], &[0x50, 0x4B, 0x06, 0x07]);
        assert_eq!(&bytes[64..72], &0x1000u64.to_le_bytes());
        assert_eq!(&bytes[72..76], &1u32.to_le_bytes());
        // classic record is fully saturated
        assert_eq!(&bytes[76..80], &[0x50, 0x4B, 0x05, 0x06]);
        assert_eq!(&bytes[84..96], &[0xFF; 12]);
        assert_eq!(&bytes[96..98], &[0, 0]);
    }

    #[test]
    fn oversized_name_is_rejected() {
        let entry = entry(&"n".repeat(0x10000));
        let mut bytes: Vec<u8> = Vec::new();
        assert!(matches!(
            entry.write_file_record_header(&mut bytes),
            Err(appx_common::AppxError::OutOfRange(_))
        ));
    }
}
