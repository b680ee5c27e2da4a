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

//! Assembly of the Authenticode-style PKCS#7 `signedData` object around an
//! `SpcIndirectDataContent`.

use appx_common::Result;
use rasn::types::Integer::Primitive;
use rasn::types::{Any, ObjectIdentifier, OctetString, Oid};
use rasn::{Decode, Encode};
use rasn_cms::algorithms::RSA;
use rasn_cms::pkcs7_compat::{EncapsulatedContentInfo, SignedData};
use rasn_cms::{
    AlgorithmIdentifier, Attribute, Certificate, CertificateChoices, ContentInfo,
    IssuerAndSerialNumber, SignedAttributes, SignerIdentifier, SignerInfo,
};
use sha2::{Digest, Sha256};

use crate::keys::Signer;
use crate::spc;

const OID_SHA256: &Oid =
    rasn::types::Oid::JOINT_ISO_ITU_T_COUNTRY_US_ORGANIZATION_GOV_CSOR_NIST_ALGORITHMS_HASH_SHA256;
const OID_PKCS7_SIGNED_DATA: &Oid = rasn::types::Oid::ISO_MEMBER_BODY_US_RSADSI_PKCS7_SIGNED_DATA;
const OID_PKCS9_CONTENT_TYPE: &Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 9, 3]);
const OID_PKCS9_MESSAGE_DIGEST: &Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 9, 4]);

fn attribute(oid: &Oid, value_der: Vec<u8>) -> Attribute {
    Attribute {
        r#type: oid.into(),
        values: vec![Any::new(value_der)].into(),
    }
}

fn sha256_algorithm() -> AlgorithmIdentifier {
    AlgorithmIdentifier {
        algorithm: OID_SHA256.into(),
        parameters: None,
    }
}

/// Builds the DER PKCS#7 object for an already-encoded
/// `SpcIndirectDataContent`.
///
/// The signed attributes carry the SPC content type, the SHA-256 of the
/// content octets, an empty `SPCSpOpusInfo`, and the individual
/// code-signing statement type; the signature covers the DER `SET OF`
/// those attributes. The full indirect-data encoding rides along as the
/// encapsulated content, and the signing certificate is embedded so the
/// platform can verify offline.
pub(crate) fn build_signature(idc_der: &[u8], signer: &Signer) -> Result<Vec<u8>> {
    let certificate = Certificate::decode(&mut rasn::ber::de::Decoder::new(
        signer.certificate_der(),
        rasn::ber::de::DecoderOptions::der(),
    ))
    .map_err(|err| appx_common::AppxError::Crypto(format!("certificate decoding failed: {err}")))?;

    let content_digest = Sha256::digest(spc::content_octets(idc_der)?);
    let content_type_oid: ObjectIdentifier = spc::SPC_INDIRECT_DATA.into();
    let signed_attrs: SignedAttributes = vec![
        attribute(
            OID_PKCS9_CONTENT_TYPE,
            rasn::der::encode(&content_type_oid)?,
        ),
        attribute(
            OID_PKCS9_MESSAGE_DIGEST,
            rasn::der::encode(&OctetString::from(content_digest.to_vec()))?,
        ),
        attribute(
            spc::SPC_SP_OPUS_INFO,
            rasn::der::encode(&spc::SpcSpOpusInfo {})?,
        ),
        attribute(
            spc::SPC_STATEMENT_TYPE,
            rasn::der::encode(&spc::SpcStatementType {
                r#type: spc::MS_CODE_INDIVIDUAL_SIGNING.into(),
            })?,
        ),
    ]
    .into();

    // RFC 5652: the signature is over the SET OF encoding of the signed
    // attributes, not over the [0] IMPLICIT form embedded in SignerInfo.
    let signature = signer.sign(&rasn::der::encode(&signed_attrs)?)?;

    let signer_info = SignerInfo {
        version: Primitive(1),
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: certificate.tbs_certificate.issuer.clone(),
            serial_number: certificate.tbs_certificate.serial_number.clone(),
        }),
        digest_algorithm: sha256_algorithm(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: AlgorithmIdentifier {
            algorithm: RSA.into(),
            parameters: None,
        },
        signature: signature.into(),
        unsigned_attrs: None,
    };

    let signed_data = SignedData {
        version: Primitive(1),
        digest_algorithms: vec![sha256_algorithm()].into(),
        encap_content_info: EncapsulatedContentInfo {
            content_type: spc::SPC_INDIRECT_DATA.into(),
            content: Some(Any::new(idc_der.to_vec())),
        },
        certificates: Some(vec![CertificateChoices::Certificate(Box::new(certificate))].into()),
        crls: None,
        signer_infos: vec![signer_info].into(),
    };

    let mut inner_encoder = rasn::der::enc::Encoder::new(rasn::der::enc::EncoderOptions::der());
    signed_data.encode(&mut inner_encoder)?;
    let inner = inner_encoder.output();

    let wrapper = ContentInfo {
        content_type: OID_PKCS7_SIGNED_DATA.into(),
        content: Any::new(inner),
    };
    Ok(rasn::der::encode(&wrapper)?)
}
