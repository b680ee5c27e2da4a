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

//! Synthesises `[Content_Types].xml`, the OPC part that maps file
//! extensions (and extension-less parts) to MIME types.

use appx_common::Result;
use appx_zip::sink::Sink;
use appx_zip::{write_file_entry, ZipFileEntry, CONTENT_TYPES_FILE_NAME};
use sha2::{Digest, Sha256};

use crate::xml::xml_escape;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn known_content_type(extension: &str, bundle: bool) -> Option<&'static str> {
    match extension {
        "appx" => Some("application/vnd.ms-appx"),
        "dll" | "exe" => Some("application/x-msdownload"),
        "png" => Some("image/png"),
        "xml" if bundle => Some("application/vnd.ms-appx.bundlemanifest+xml"),
        "xml" => Some("application/vnd.ms-appx.manifest+xml"),
        _ => None,
    }
}

/// Builds the `[Content_Types].xml` document for the members written so
/// far. Extensions are taken from the escaped names (the names the archive
/// actually stores), first occurrence wins, comparison is case-sensitive.
pub fn content_types_xml(entries: &[ZipFileEntry], bundle: bool) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n\
         <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">",
    );
    let mut written_extensions: Vec<&str> = Vec::new();
    for entry in entries {
        let name = entry.sanitized_file_name.as_str();
        let base_name_at = name.rfind('/').map_or(0, |slash| slash + 1);
        let extension_at = name.rfind('.').map_or(0, |dot| dot + 1);
        if extension_at > base_name_at {
            let extension = &name[extension_at..];
            if !written_extensions.contains(&extension) {
                let content_type =
                    known_content_type(extension, bundle).unwrap_or(DEFAULT_CONTENT_TYPE);
                xml.push_str(&format!(
                    "<Default Extension=\"{}\" ContentType=\"{}\"/>",
                    xml_escape(extension),
                    xml_escape(content_type)
                ));
                written_extensions.push(extension);
            }
        } else {
            xml.push_str(&format!(
                "<Override PartName=\"/{}\" ContentType=\"{}\"/>",
                xml_escape(name),
                xml_escape(DEFAULT_CONTENT_TYPE)
            ));
        }
    }
    xml.push_str(
        "<Override PartName=\"/AppxBlockMap.xml\" \
         ContentType=\"application/vnd.ms-appx.blockmap+xml\"/>",
    );
    xml.push_str(
        "<Override PartName=\"/AppxSignature.p7x\" \
         ContentType=\"application/vnd.ms-appx.signature\"/>",
    );
    xml.push_str(
        "<Override PartName=\"/AppxMetadata/CodeIntegrity.cat\" \
         ContentType=\"application/vnd.ms-pkiseccat\"/>",
    );
    xml.push_str("</Types>");
    xml
}

/// Writes `[Content_Types].xml` as an archive member and records its
/// whole-file SHA-256 on the returned entry.
pub fn write_content_types_entry(
    sink: &mut dyn Sink,
    offset: u64,
    entries: &[ZipFileEntry],
    bundle: bool,
    compression_level: u32,
) -> Result<ZipFileEntry> {
    let xml = content_types_xml(entries, bundle);
    let digest: [u8; 32] = Sha256::digest(xml.as_bytes()).into();
    let mut entry = write_file_entry(sink, offset, CONTENT_TYPES_FILE_NAME, compression_level, |data| {
        data.write(xml.as_bytes())
    })?;
    entry.sha256 = Some(digest);
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use appx_zip::CompressionMethod;

    fn entry(name: &str) -> ZipFileEntry {
        ZipFileEntry::new(name, 0, 0, CompressionMethod::Store, 0, 0, vec![], None)
    }

    #[test]
    fn known_and_unknown_extensions() {
        let xml = content_types_xml(&[entry("bin/app.exe"), entry("readme.txt")], false);
        assert!(xml.contains(
            "<Default Extension=\"exe\" ContentType=\"application/x-msdownload\"/>"
        ));
        assert!(xml.contains(
            "<Default Extension=\"txt\" ContentType=\"application/octet-stream\"/>"
        ));
    }

    #[test]
    fn duplicate_extensions_emit_once_case_sensitively() {
        let xml = content_types_xml(
            &[entry("a.png"), entry("b.png"), entry("c.PNG")],
            false,
        );
        assert_eq!(xml.matches("Extension=\"png\"").count(), 1);
        // the parser compares extensions case-sensitively, so the
        // upper-case variant gets its own Default node
        assert_eq!(xml.matches("Extension=\"PNG\"").count(), 1);
    }

    #[test]
    fn extension_less_members_get_overrides() {
        let xml = content_types_xml(&[entry("foo"), entry("dir.v2/bar")], false);
        assert!(xml.contains(
            "<Override PartName=\"/foo\" ContentType=\"application/octet-stream\"/>"
        ));
        // the dot in the directory name does not count as an extension
        assert!(xml.contains(
            "<Override PartName=\"/dir.v2/bar\" ContentType=\"application/octet-stream\"/>"
        ));
    }

    #[test]
    fn manifest_content_type_depends_on_package_kind() {
        let entries = [entry("AppxManifest.xml")];
        assert!(content_types_xml(&entries, false)
            .contains("ContentType=\"application/vnd.ms-appx.manifest+xml\""));
        assert!(content_types_xml(&entries, true)
            .contains("ContentType=\"application/vnd.ms-appx.bundlemanifest+xml\""));
    }

    #[test]
    fn fixed_overrides_are_always_present() {
        let xml = content_types_xml(&[], false);
        assert!(xml.starts_with(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n<Types"
        ));
        assert!(xml.contains("/AppxBlockMap.xml"));
        assert!(xml.contains("/AppxSignature.p7x"));
        assert!(xml.contains("/AppxMetadata/CodeIntegrity.cat"));
        assert!(xml.ends_with("</Types>"));
    }
}
