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

//! Authenticode-style signing of APPX packages.
//!
//! The packaging pass hands over the five digests it accumulated
//! ([AppxDigests]); this crate wraps them into Microsoft's SPC indirect
//! data structure, signs it as a PKCS#7 `signedData` object with either a
//! PKCS#12 file or a PKCS#11 smartcard key, and returns the payload of the
//! `AppxSignature.p7x` archive member.

pub mod digests;
mod keys;
mod pkcs7;
pub mod spc;

pub use digests::AppxDigests;
pub use keys::SigningParams;

/// The four magic bytes ("PKCX") opening AppxSignature.p7x.
pub const P7X_MAGIC: &[u8; 4] = b"PKCX";

/// Produces the uncompressed contents of `AppxSignature.p7x`: the `PKCX`
/// magic followed by the DER PKCS#7 signature over `digests`.
///
/// The archive member itself must be DEFLATE-compressed by the caller
/// regardless of the package's compression level.
pub fn signature_bytes(digests: &AppxDigests, params: &SigningParams) -> appx_common::Result<Vec<u8>> {
    let signer = keys::Signer::open(params)?;
    let idc = spc::indirect_data_content(digests)?;
    let pkcs7 = pkcs7::build_signature(&idc, &signer)?;
    log::debug!("built a {} byte PKCS#7 signature", pkcs7.len());
    let mut bytes = Vec::with_capacity(P7X_MAGIC.len() + pkcs7.len());
    bytes.extend_from_slice(P7X_MAGIC);
    bytes.extend_from_slice(&pkcs7);
    Ok(bytes)
}
