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

use std::fs;
use std::path::{Path, PathBuf};

use appx_common::{AppxError, Result};
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::AuthPin;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

/// Where the signing key material comes from.
#[derive(Debug, Clone)]
pub enum SigningParams {
    /// A PKCS#12 file holding the private key and its certificate,
    /// protected by an empty passphrase.
    CertificateFile { path: PathBuf },
    /// A PKCS#11 token. `slot_id` selects the slot, `key_id` is matched
    /// against the first byte of each private key's `CKA_ID`.
    SmartCard {
        module_path: PathBuf,
        slot_id: u32,
        key_id: u8,
        pin: String,
    },
}

enum SignerKey {
    Software(RsaPrivateKey),
    Token {
        // Keeps the module loaded for as long as the session lives.
        _context: Pkcs11,
        session: Session,
        key: ObjectHandle,
    },
}

/// A ready-to-use signing identity: the certificate to embed and a key
/// that signs with SHA-256 + RSA PKCS#1 v1.5.
pub(crate) struct Signer {
    certificate_der: Vec<u8>,
    key: SignerKey,
}

fn pkcs11_error(err: cryptoki::error::Error) -> AppxError {
    AppxError::Crypto(format!("PKCS#11: {err}"))
}

impl Signer {
    pub fn open(params: &SigningParams) -> Result<Self> {
        match params {
            SigningParams::CertificateFile { path } => Self::from_certificate_file(path),
            SigningParams::SmartCard {
                module_path,
                slot_id,
                key_id,
                pin,
            } => Self::from_smart_card(module_path, *slot_id, *key_id, pin),
        }
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    fn from_certificate_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let pfx = p12::PFX::parse(&bytes).map_err(|err| {
            AppxError::Crypto(format!("{}: not a PKCS#12 file: {err:?}", path.display()))
        })?;
        let key_bags = pfx.key_bags("").map_err(|err| {
            AppxError::Crypto(format!(
                "{}: PKCS#12 decryption failed: {err:?}",
                path.display()
            ))
        })?;
        let key_der = key_bags.first().ok_or_else(|| {
            AppxError::Crypto(format!("{}: no private key", path.display()))
        })?;
        let private_key = RsaPrivateKey::from_pkcs8_der(key_der)?;
        let cert_bags = pfx.cert_x509_bags("").map_err(|err| {
            AppxError::Crypto(format!(
                "{}: PKCS#12 decryption failed: {err:?}",
                path.display()
            ))
        })?;
        let certificate_der = match cert_bags.as_slice() {
            [certificate] => certificate.clone(),
            [] => {
                return Err(AppxError::Crypto(format!(
                    "{}: no certificate",
                    path.display()
                )))
            }
            _ => {
                return Err(AppxError::Crypto(format!(
                    "{}: expected exactly one certificate",
                    path.display()
                )))
            }
        };
        log::debug!("signing with the key from {}", path.display());
        Ok(Self {
            certificate_der,
            key: SignerKey::Software(private_key),
        })
    }

    fn from_smart_card(module_path: &Path, slot_id: u32, key_id: u8, pin: &str) -> Result<Self> {
        let context = Pkcs11::new(module_path).map_err(pkcs11_error)?;
        context
            .initialize(CInitializeArgs::OsThreads)
            .map_err(pkcs11_error)?;

        let slots = context.get_slots_with_token().map_err(pkcs11_error)?;
        let slot = slots
            .into_iter()
            .find(|slot| slot.id() == u64::from(slot_id))
            .ok_or_else(|| AppxError::Crypto(format!("no token in slot {slot_id}")))?;

        let session = context.open_ro_session(slot).map_err(pkcs11_error)?;
        session
            .login(UserType::User, Some(&AuthPin::new(pin.to_owned())))
            .map_err(pkcs11_error)?;

        let certificates = session
            .find_objects(&[Attribute::Class(ObjectClass::CERTIFICATE)])
            .map_err(pkcs11_error)?;
        let certificate = certificates.first().copied().ok_or_else(|| {
            AppxError::Crypto(format!("no certificate on the token in slot {slot_id}"))
        })?;
        let certificate_der = read_byte_attribute(&session, certificate, AttributeType::Value)?
            .ok_or_else(|| AppxError::Crypto("certificate value is not readable".into()))?;

        let mut key = None;
        for handle in session
            .find_objects(&[Attribute::Class(ObjectClass::PRIVATE_KEY)])
            .map_err(pkcs11_error)?
        {
            let id = read_byte_attribute(&session, handle, AttributeType::Id)?;
            if id.as_deref().and_then(|id| id.first().copied()) == Some(key_id) {
                key = Some(handle);
                break;
            }
        }
        let key = key.ok_or_else(|| {
            AppxError::Crypto(format!(
                "No usable key was found with slot {slot_id} and key id {key_id}"
            ))
        })?;

        verify_key_matches_certificate(&session, key, &certificate_der)?;
        log::debug!("signing with the smartcard key in slot {slot_id}");
        Ok(Self {
            certificate_der,
            key: SignerKey::Token {
                _context: context,
                session,
                key,
            },
        })
    }

    /// Signs `message` with SHA-256 and RSA PKCS#1 v1.5.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        match &self.key {
            SignerKey::Software(private_key) => {
                let digest = Sha256::digest(message);
                Ok(private_key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)?)
            }
            SignerKey::Token { session, key, .. } => session
                .sign(&Mechanism::Sha256RsaPkcs, *key, message)
                .map_err(pkcs11_error),
        }
    }
}

fn read_byte_attribute(
    session: &Session,
    object: ObjectHandle,
    attribute: AttributeType,
) -> Result<Option<Vec<u8>>> {
    let attributes = session
        .get_attributes(object, &[attribute])
        .map_err(pkcs11_error)?;
    Ok(attributes.into_iter().next().and_then(|value| match value {
        Attribute::Value(bytes) | Attribute::Id(bytes) | Attribute::Modulus(bytes) => Some(bytes),
        _ => None,
    }))
}

/// The token key and the certificate must form a pair. Without the private
/// key material in hand the check compares RSA moduli.
fn verify_key_matches_certificate(
    session: &Session,
    key: ObjectHandle,
    certificate_der: &[u8],
) -> Result<()> {
    let certificate = rasn::der::decode::<rasn_pkix::Certificate>(certificate_der)
        .map_err(|err| AppxError::Crypto(format!("certificate decoding failed: {err}")))?;
    let spki = &certificate
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key;
    let public_key = RsaPublicKey::from_pkcs1_der(spki.as_raw_slice()).map_err(|err| {
        AppxError::Crypto(format!("certificate carries no RSA public key: {err}"))
    })?;
    let certificate_modulus = public_key.n().to_bytes_be();

    let key_modulus = read_byte_attribute(session, key, AttributeType::Modulus)?
        .ok_or_else(|| AppxError::Crypto("smartcard key modulus is not readable".into()))?;

    if strip_leading_zeros(&key_modulus) != strip_leading_zeros(&certificate_modulus) {
        return Err(AppxError::Crypto(
            "certificate does not match the smartcard key".into(),
        ));
    }
    Ok(())
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&byte| byte != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
