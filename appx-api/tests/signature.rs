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

//! Signed-package layout checks: member order, the PKCX wrapper, and the
//! digests embedded in the PKCS#7 blob.

use std::io::{Cursor, Read};

use appx_api::{write_package, InputMap, PackageOptions, SigningParams};
use rand::prelude::*;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use zip::ZipArchive;

fn write_testing_pfx(path: &std::path::Path) {
    let private_key = RsaPrivateKey::new(&mut thread_rng(), 2048).unwrap();
    let private_key_pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
    let key_pair = KeyPair::from_pem(&private_key_pem).unwrap();
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, "appx testing");
    let mut cert_params = CertificateParams::new(vec![]).unwrap();
    cert_params.distinguished_name = distinguished_name;
    let cert = cert_params.self_signed(&key_pair).unwrap();
    let key_der = private_key.to_pkcs8_der().unwrap();
    let pfx = p12::PFX::new(cert.der(), key_der.as_bytes(), None, "", "testing").unwrap();
    std::fs::write(path, pfx.to_der()).unwrap();
}

/// DER encoding of OID 1.3.6.1.4.1.311.2.1.<arc>.
fn ms_spc_oid(arc: u8) -> [u8; 12] {
    [0x06, 0x0A, 0x2B, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, arc]
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[test]
fn signed_package_layout() {
    let dir = tempfile::tempdir().unwrap();
    let pfx_path = dir.path().join("testing.pfx");
    write_testing_pfx(&pfx_path);

    let payload = b"This is a test file.\n";
    let payload_path = dir.path().join("README.txt");
    std::fs::write(&payload_path, payload).unwrap();
    let mut inputs = InputMap::new();
    inputs.insert("README.txt".into(), payload_path);

    let mut bytes = Vec::new();
    write_package(
        &mut bytes,
        &inputs,
        &PackageOptions {
            signing: Some(SigningParams::CertificateFile {
                path: pfx_path,
            }),
            ..Default::default()
        },
    )
    .unwrap();

    let mut zip = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
    let names: Vec<String> = (0..zip.len())
        .map(|index| zip.by_index(index).unwrap().name().to_string())
        .collect();
    // the signature is the last member before the central directory
    assert_eq!(
        names,
        [
            "README.txt",
            "AppxBlockMap.xml",
            "[Content_Types].xml",
            "AppxSignature.p7x"
        ]
    );

    let mut block_map = Vec::new();
    zip.by_name("AppxBlockMap.xml")
        .unwrap()
        .read_to_end(&mut block_map)
        .unwrap();
    let mut content_types = Vec::new();
    zip.by_name("[Content_Types].xml")
        .unwrap()
        .read_to_end(&mut content_types)
        .unwrap();

    let mut p7x = Vec::new();
    {
        let member = zip.by_name("AppxSignature.p7x").unwrap();
        // always DEFLATEd, whatever the package level
        assert_eq!(member.compression(), zip::CompressionMethod::Deflated);
        let mut raw = member;
        raw.read_to_end(&mut p7x).unwrap();
    }
    assert_eq!(&p7x[..4], b"PKCX");
    let pkcs7 = &p7x[4..];

    // the signed attributes carry the three Microsoft OIDs
    for arc in [0x04, 0x0B, 0x0C] {
        assert!(contains(pkcs7, &ms_spc_oid(arc)), "missing OID arc {arc}");
    }
    // and the statement type names the individual-signing purpose
    assert!(contains(pkcs7, &ms_spc_oid(0x15)));

    // the digest blob is embedded verbatim, with the real axct/axbm values
    let blob_at = pkcs7
        .windows(8)
        .position(|window| &window[..4] == b"APPX" && &window[4..] == b"AXPC")
        .expect("digest blob not found");
    let blob = &pkcs7[blob_at..blob_at + 184];
    assert_eq!(&blob[40..44], b"AXCD");
    assert_eq!(&blob[76..80], b"AXCT");
    assert_eq!(
        &blob[80..112],
        Sha256::digest(&content_types).as_slice()
    );
    assert_eq!(&blob[112..116], b"AXBM");
    assert_eq!(&blob[116..148], Sha256::digest(&block_map).as_slice());
    // code integrity digest is zero-filled when absent
    assert_eq!(&blob[148..152], b"AXCI");
    assert_eq!(&blob[152..184], &[0u8; 32]);
}
