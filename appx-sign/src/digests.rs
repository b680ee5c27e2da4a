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

/// The set of digests Windows expects an APPX signature to cover, produced
/// by the packaging pass itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppxDigests {
    /// All file-record bytes (local headers plus data), in write order.
    pub axpc: [u8; 32],
    /// The central directory entries plus the end-of-directory records.
    pub axcd: [u8; 32],
    /// \[Content_Types\].xml, uncompressed.
    pub axct: [u8; 32],
    /// AppxBlockMap.xml, uncompressed.
    pub axbm: [u8; 32],
    /// AppxMetadata/CodeIntegrity.cat, uncompressed; zero when absent.
    pub axci: [u8; 32],
}

impl AppxDigests {
    /// Serialises the tag/digest list into the fixed 184-byte blob that
    /// becomes the `messageDigest` of the SPC indirect data.
    pub fn to_bytes(&self) -> Vec<u8> {
        let parts: [(&[u8; 4], &[u8; 32]); 5] = [
            (b"AXPC", &self.axpc),
            (b"AXCD", &self.axcd),
            (b"AXCT", &self.axct),
            (b"AXBM", &self.axbm),
            (b"AXCI", &self.axci),
        ];
        let mut bytes = Vec::with_capacity(4 + parts.len() * 36);
        bytes.extend_from_slice(b"APPX");
        for (tag, digest) in parts {
            bytes.extend_from_slice(tag);
            bytes.extend_from_slice(digest);
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digests() -> AppxDigests {
        AppxDigests {
            axpc: [0x11; 32],
            axcd: [0x22; 32],
            axct: [0x33; 32],
            axbm: [0x44; 32],
            axci: [0x00; 32],
        }
    }

    #[test]
    fn blob_is_184_bytes_and_tagged_in_order() {
        let bytes = digests().to_bytes();
        assert_eq!(bytes.len(), 184);
        assert_eq!(&bytes[..4], b"APPX");
        for (index, (tag, fill)) in [
            (b"AXPC", 0x11u8),
            (b"AXCD", 0x22),
            (b"AXCT", 0x33),
            (b"AXBM", 0x44),
            (b"AXCI", 0x00),
        ]
        .iter()
        .enumerate()
        {
            let at = 4 + index * 36;
            assert_eq!(&bytes[at..at + 4], &tag[..]);
            assert_eq!(&bytes[at + 4..at + 36], &[*fill; 32]);
        }
    }
}
