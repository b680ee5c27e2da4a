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

//! # APPX API
//!
//! This crate exposes the main public API through which other projects can
//! build (and optionally sign) Microsoft APPX and APPXBUNDLE packages for
//! Windows 10 and Windows 10 Mobile.
//!
//! ## Creating a package
//!
//! ```no_run
//! use appx_api::{write_package, InputMap, PackageOptions};
//!
//! let mut inputs = InputMap::new();
//! inputs.insert("AppxManifest.xml".into(), "./build/AppxManifest.xml".into());
//! inputs.insert("app.exe".into(), "./build/app.exe".into());
//!
//! let output = std::fs::File::create("app.appx")?;
//! write_package(output, &inputs, &PackageOptions::default())?;
//! # Ok::<(), appx_api::AppxError>(())
//! ```
//!
//! The package is written in one streaming pass: the same bytes that go to
//! the output feed the CRC and SHA-256 accounting, so nothing is read
//! twice and the output is byte-identical across runs for identical
//! inputs. When signing is requested, the pass pauses after the payload to
//! hash the not-yet-written central directory, obtains the PKCS#7
//! signature over the accumulated digests, inserts `AppxSignature.p7x` as
//! one more member, and only then emits the real directory. That layout is
//! the one Windows' verifier insists on.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use appx_sign::AppxDigests;
use appx_zip::sink::{OffsetSink, Sha256Sink, Sink, StreamSink};
use appx_zip::{copy_file, write_end_of_central_directory, write_file_entry, ZipFileEntry};

mod blockmap;
mod bundle;
mod content_types;
mod xml;

pub use appx_common::{AppxError, Result};
pub use appx_sign::SigningParams;
pub use blockmap::block_map_xml;
pub use bundle::populate_manifest_offsets;
pub use content_types::content_types_xml;

/// Archive-relative name -> local path. The ordered map makes the output
/// independent of filesystem enumeration order.
pub type InputMap = BTreeMap<String, PathBuf>;

/// Knobs for one packaging run.
#[derive(Debug, Clone, Default)]
pub struct PackageOptions {
    /// ZIP compression level: 0 stores files verbatim, 1-9 DEFLATE.
    pub compression_level: u32,
    /// Produce an APPXBUNDLE: requires an
    /// `AppxMetadata/AppxBundleManifest.xml` input, stores sub-packages
    /// uncompressed, and rewrites their offset placeholders.
    pub bundle: bool,
    /// Sign the package when set.
    pub signing: Option<SigningParams>,
}

/// Sub-packages and the bundle manifest keep their well-known names.
const BUNDLE_MANIFEST_SUFFIX: &str = "AppxBundleManifest.xml";

/// AppxSignature.p7x must be DEFLATEd whatever the package level.
const SIGNATURE_COMPRESSION_LEVEL: u32 = 9;

/// Writes the complete package to `output`.
///
/// Entries land in input-map order (payload, then for bundles the bundle
/// manifest, then `AppxBlockMap.xml`, `[Content_Types].xml`, and the
/// optional signature), followed by the central directory and the ZIP64
/// end records. On error the partially written output is abandoned; the
/// caller owns the stream and its cleanup.
pub fn write_package<W: Write>(output: W, inputs: &InputMap, options: &PackageOptions) -> Result<()> {
    let compression_level = options.compression_level;
    let mut raw = StreamSink::new(output);
    let mut offset = OffsetSink::new();
    let mut axpc = Sha256Sink::new();
    let mut entries: Vec<ZipFileEntry> = Vec::new();
    let mut bundle_manifest = None;

    // Payload file records, teed through the running file-records digest.
    for (archive_name, local_path) in inputs {
        if options.bundle && archive_name.ends_with(BUNDLE_MANIFEST_SUFFIX) {
            bundle_manifest = Some((archive_name, local_path));
            continue;
        }
        let start = offset.offset();
        let mut sink = (&mut raw, &mut offset, &mut axpc);
        entries.push(write_file_entry(
            &mut sink,
            start,
            archive_name,
            compression_level,
            |data| copy_file(local_path, data),
        )?);
    }

    // The bundle manifest goes last so every sub-package offset it refers
    // to is already known.
    if options.bundle {
        let (archive_name, local_path) =
            bundle_manifest.ok_or(AppxError::MissingBundleManifest)?;
        let manifest = fs::read_to_string(local_path)?;
        let manifest = populate_manifest_offsets(&manifest, &entries);
        let start = offset.offset();
        let mut sink = (&mut raw, &mut offset, &mut axpc);
        entries.push(write_file_entry(
            &mut sink,
            start,
            archive_name,
            compression_level,
            |data| data.write(manifest.as_bytes()),
        )?);
    }
    log::debug!("wrote {} payload entries", entries.len());

    let start = offset.offset();
    let mut sink = (&mut raw, &mut offset, &mut axpc);
    let block_map = blockmap::write_block_map_entry(
        &mut sink,
        start,
        &entries,
        options.bundle,
        compression_level,
    )?;
    let axbm = block_map.sha256.unwrap_or_default();
    entries.push(block_map);

    let start = offset.offset();
    let mut sink = (&mut raw, &mut offset, &mut axpc);
    let content_types = content_types::write_content_types_entry(
        &mut sink,
        start,
        &entries,
        options.bundle,
        compression_level,
    )?;
    let axct = content_types.sha256.unwrap_or_default();
    entries.push(content_types);

    // Hash (but do not write) the directory as it stands before the
    // signature entry exists; the signature's digests must describe
    // exactly this state.
    let mut axcd = Sha256Sink::new();
    {
        let mut simulated_offset = OffsetSink::at(offset.offset());
        {
            let mut sink = (&mut axcd, &mut simulated_offset);
            for entry in &entries {
                entry.write_directory_entry(&mut sink)?;
            }
        }
        let directory_end = simulated_offset.offset();
        let mut sink = (&mut axcd, &mut simulated_offset);
        write_end_of_central_directory(&mut sink, directory_end, &entries)?;
    }

    // The signature member is not covered by the file-records digest; the
    // platform hashes everything before it and checks against AXPC.
    if let Some(signing) = &options.signing {
        let digests = AppxDigests {
            axpc: axpc.digest(),
            axcd: axcd.digest(),
            axct,
            axbm,
            axci: [0; 32],
        };
        let payload = appx_sign::signature_bytes(&digests, signing)?;
        let start = offset.offset();
        let mut sink = (&mut raw, &mut offset);
        entries.push(write_file_entry(
            &mut sink,
            start,
            "AppxSignature.p7x",
            SIGNATURE_COMPRESSION_LEVEL,
            |data| data.write(&payload),
        )?);
    }

    // The real directory.
    for entry in &entries {
        let mut sink = (&mut raw, &mut offset);
        entry.write_directory_entry(&mut sink)?;
    }
    let directory_end = offset.offset();
    let mut sink = (&mut raw, &mut offset);
    write_end_of_central_directory(&mut sink, directory_end, &entries)?;

    raw.close()?;
    log::debug!("package complete at {} bytes", offset.offset());
    Ok(())
}
