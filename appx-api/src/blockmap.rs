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

//! Synthesises `AppxBlockMap.xml`, the per-file list of 64 KiB block
//! hashes Windows uses for streaming integrity checks.
//! <https://msdn.microsoft.com/en-us/library/windows/desktop/jj709951.aspx>

use appx_common::Result;
use appx_zip::sink::{Base64Sink, Sink};
use appx_zip::{write_file_entry, ZipFileEntry};
use sha2::{Digest, Sha256};

use crate::xml::xml_escape;

/// Builds the block map for the payload members written so far. File names
/// are the original (unescaped) ones with `/` flipped to `\`; a zero-byte
/// file lists no blocks at all, because a block only exists once a byte
/// was written into it. In a bundle, the sub-package members are covered
/// by their own inner block maps and are skipped here.
pub fn block_map_xml(entries: &[ZipFileEntry], bundle: bool) -> Result<String> {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\r\n\
         <BlockMap xmlns=\"http://schemas.microsoft.com/appx/2010/blockmap\" \
         HashMethod=\"http://www.w3.org/2001/04/xmlenc#sha256\">",
    );
    for entry in entries {
        if bundle && entry.file_name.ends_with(".appx") {
            continue;
        }
        let name = entry.file_name.replace('/', "\\");
        xml.push_str(&format!(
            "<File Name=\"{}\" Size=\"{}\" LfhSize=\"{}\">",
            xml_escape(&name),
            entry.uncompressed_size,
            entry.file_record_header_size()
        ));
        for block in &entry.blocks {
            let mut base64 = Base64Sink::new();
            base64.write(&block.sha256)?;
            base64.close()?;
            xml.push_str(&format!("<Block Hash=\"{}\"", base64.encoded()));
            if let Some(compressed_size) = block.compressed_size {
                xml.push_str(&format!(" Size=\"{compressed_size}\""));
            }
            xml.push_str("/>");
        }
        xml.push_str("</File>");
    }
    xml.push_str("</BlockMap>");
    Ok(xml)
}

/// Writes `AppxBlockMap.xml` as an archive member and records its
/// whole-file SHA-256 on the returned entry.
pub fn write_block_map_entry(
    sink: &mut dyn Sink,
    offset: u64,
    entries: &[ZipFileEntry],
    bundle: bool,
    compression_level: u32,
) -> Result<ZipFileEntry> {
    let xml = block_map_xml(entries, bundle)?;
    let digest: [u8; 32] = Sha256::digest(xml.as_bytes()).into();
    let mut entry = write_file_entry(sink, offset, "AppxBlockMap.xml", compression_level, |data| {
        data.write(xml.as_bytes())
    })?;
    entry.sha256 = Some(digest);
    Ok(entry)
}
