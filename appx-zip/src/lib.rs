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

//! Streaming, deterministic ZIP64 writing.
//!
//! Every heavy operation in the packager is expressed as "write the source
//! bytes once into a fan-out of [sinks](sink::Sink)": the same pass that
//! copies a file into the archive also computes its CRC-32, its per-block
//! SHA-256 hashes, and its compressed form. [writer::write_file_entry] owns
//! that wiring; [records] owns the exact byte layout of the archive
//! structures and the constants that keep output reproducible.

pub mod records;
pub mod sink;
pub mod writer;

pub use records::{
    sanitize_file_name, write_end_of_central_directory, CompressionMethod, ZipBlock, ZipFileEntry,
    CONTENT_TYPES_FILE_NAME,
};
pub use writer::{copy_file, write_file_entry};
