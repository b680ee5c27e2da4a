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

//! Microsoft's SPC (Software Publishing Certificate) ASN.1 vocabulary, as
//! far as APPX signatures need it. See
//! <https://msdn.microsoft.com/en-us/gg463180.aspx>.

use appx_common::{AppxError, Result};
use rasn::types::{Any, Integer, ObjectIdentifier, OctetString, Oid};
use rasn::{AsnType, Decode, Encode};
use rasn_cms::AlgorithmIdentifier;

use crate::digests::AppxDigests;

// https://support.microsoft.com/en-us/kb/287547
pub const SPC_INDIRECT_DATA: &Oid = Oid::const_new(&[1, 3, 6, 1, 4, 1, 311, 2, 1, 4]);
pub const SPC_STATEMENT_TYPE: &Oid = Oid::const_new(&[1, 3, 6, 1, 4, 1, 311, 2, 1, 11]);
pub const SPC_SP_OPUS_INFO: &Oid = Oid::const_new(&[1, 3, 6, 1, 4, 1, 311, 2, 1, 12]);
pub const MS_CODE_INDIVIDUAL_SIGNING: &Oid = Oid::const_new(&[1, 3, 6, 1, 4, 1, 311, 2, 1, 21]);
pub const SPC_SIPINFO: &Oid = Oid::const_new(&[1, 3, 6, 1, 4, 1, 311, 2, 1, 30]);

const OID_SHA256: &Oid =
    Oid::JOINT_ISO_ITU_T_COUNTRY_US_ORGANIZATION_GOV_CSOR_NIST_ALGORITHMS_HASH_SHA256;

/// GUID of the APPX subject interface package,
/// 4BDFC50A-07CE-E24D-B76E-23C839A09FD1.
const APPX_SIP_GUID: [u8; 16] = [
    0x4B, 0xDF, 0xC5, 0x0A, 0x07, 0xCE, 0xE2, 0x4D, 0xB7, 0x6E, 0x23, 0xC8, 0x39, 0xA0, 0x9F,
    0xD1,
];

#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct SpcAttributeTypeAndOptionalValue {
    pub r#type: ObjectIdentifier,
    pub value: Any,
}

/// The SIP info value Windows expects for APPX packages. Only the version
/// and the SIP GUID carry information; the trailing integers are reserved.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct SpcSipInfo {
    pub version: Integer,
    pub sip_guid: OctetString,
    pub reserved1: Integer,
    pub reserved2: Integer,
    pub reserved3: Integer,
    pub reserved4: Integer,
    pub reserved5: Integer,
}

#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct DigestInfo {
    pub digest_algorithm: AlgorithmIdentifier,
    pub digest: OctetString,
}

#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct SpcIndirectDataContent {
    pub data: SpcAttributeTypeAndOptionalValue,
    pub message_digest: DigestInfo,
}

/// Program name and URL, both optional; APPX signatures leave them out.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct SpcSpOpusInfo {}

#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct SpcStatementType {
    pub r#type: ObjectIdentifier,
}

/// DER-encodes the `SpcIndirectDataContent` whose `messageDigest` octets
/// are the 184-byte APPX digest blob. This is not a hash: the blob goes in
/// verbatim, the field name is ASN.1 vocabulary.
pub fn indirect_data_content(digests: &AppxDigests) -> Result<Vec<u8>> {
    let sip_info = SpcSipInfo {
        version: Integer::Primitive(0x01010000),
        sip_guid: APPX_SIP_GUID.to_vec().into(),
        reserved1: Integer::Primitive(0),
        reserved2: Integer::Primitive(0),
        reserved3: Integer::Primitive(0),
        reserved4: Integer::Primitive(0),
        reserved5: Integer::Primitive(0),
    };
    let content = SpcIndirectDataContent {
        data: SpcAttributeTypeAndOptionalValue {
            r#type: SPC_SIPINFO.into(),
            value: Any::new(rasn::der::encode(&sip_info)?),
        },
        message_digest: DigestInfo {
            digest_algorithm: AlgorithmIdentifier {
                algorithm: OID_SHA256.into(),
                // explicit ASN.1 NULL
                parameters: Some(Any::new(vec![0x05, 0x00])),
            },
            digest: digests.to_bytes().into(),
        },
    };
    Ok(rasn::der::encode(&content)?)
}

/// Per RFC 2315 section 9.3, only the contents octets of the DER encoding
/// of the content field are digested, not the identifier octets or the
/// length octets. Strips the outer SEQUENCE header.
pub fn content_octets(der: &[u8]) -> Result<&[u8]> {
    let header_length = match der.get(1) {
        Some(length) if length & 0x80 == 0 => 2,
        Some(0x81) => 3,
        Some(0x82) => 4,
        Some(0x83) => 5,
        Some(0x84) => 6,
        _ => {
            return Err(AppxError::Crypto(
                "SPC content has a malformed DER header".into(),
            ))
        }
    };
    der.get(header_length..).ok_or_else(|| {
        AppxError::Crypto("SPC content is shorter than its DER header".into())
    })
}
