// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key identity and signature verification for the three schemes this client supports:
//! Ed25519, RSA-PSS-SHA256 (>= 2048 bit modulus), and ECDSA-P256-SHA256.
//!
//! [`verify`] is the only entry point the trust layer calls; [`Sign`] is the signing-side
//! counterpart used by [`crate::builder`] to produce new metadata.

mod sign;

pub use sign::{parse_keypair, Signer, SigningKey};

use crate::error::{self, Result};
use crate::metadata::Key;
use aws_lc_rs::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use pkcs8::der::Decode;
use pkcs8::SubjectPublicKeyInfoRef;
use snafu::ensure;

/// Verifies `sig_hex` (a hex-encoded signature) over `data` using `key`.
///
/// Returns `Ok(false)` (never an error) for a structurally valid but cryptographically wrong
/// signature, so that callers accumulating a signature threshold can simply skip it; returns
/// `Err` only when the key/scheme/signature cannot even be decoded into something verifiable.
pub fn verify(key: &Key, data: &[u8], sig_hex: &str) -> Result<bool> {
    let sig = hex::decode(sig_hex).map_err(|_| {
        error::UnsupportedSchemeSnafu {
            keytype: key.keytype.clone(),
            scheme: key.scheme.clone(),
        }
        .build()
    })?;

    match (key.keytype.as_str(), key.scheme.as_str()) {
        ("ed25519", "ed25519") => {
            let public = decode_ed25519_public(&key.keyval.public)?;
            Ok(verify_with(&signature::ED25519, &public, data, &sig))
        }
        ("rsa", "rsassa-pss-sha256") => {
            let public = decode_spki_public(&key.keyval.public)?;
            ensure!(
                public.len() * 8 >= 2048 - 64, // DER framing overhead tolerance
                error::UnsupportedSchemeSnafu {
                    keytype: key.keytype.clone(),
                    scheme: key.scheme.clone(),
                }
            );
            Ok(verify_with(
                &signature::RSA_PSS_2048_8192_SHA256,
                &public,
                data,
                &sig,
            ))
        }
        ("ecdsa", "ecdsa-sha2-nistp256") => {
            let public = decode_spki_public(&key.keyval.public)?;
            Ok(verify_with(
                &signature::ECDSA_P256_SHA256_ASN1,
                &public,
                data,
                &sig,
            ))
        }
        (keytype, scheme) => error::UnsupportedSchemeSnafu {
            keytype: keytype.to_string(),
            scheme: scheme.to_string(),
        }
        .fail(),
    }
}

fn verify_with(
    alg: &'static dyn VerificationAlgorithm,
    public: &[u8],
    data: &[u8],
    sig: &[u8],
) -> bool {
    UnparsedPublicKey::new(alg, public).verify(data, sig).is_ok()
}

/// Ed25519 keys may be given as 32-byte hex or as a PEM SubjectPublicKeyInfo block.
fn decode_ed25519_public(public: &str) -> Result<Vec<u8>> {
    if let Ok(bytes) = hex::decode(public.trim()) {
        if bytes.len() == 32 {
            return Ok(bytes);
        }
    }
    decode_spki_public(public)
}

/// Extracts the raw `subjectPublicKey` BIT STRING contents from a PEM-encoded
/// SubjectPublicKeyInfo block. For RSA keys this is the DER `RSAPublicKey` (modulus + exponent)
/// that `aws-lc-rs` expects directly; for EC keys it is the uncompressed point.
fn decode_spki_public(pem_text: &str) -> Result<Vec<u8>> {
    let pem = pem::parse(pem_text.trim()).map_err(|_| {
        error::KeyParseSnafu {
            message: "key material is neither raw hex nor a valid PEM block".to_string(),
        }
        .build()
    })?;
    let spki = SubjectPublicKeyInfoRef::from_der(pem.contents()).map_err(|e| {
        error::KeyParseSnafu {
            message: format!("invalid SubjectPublicKeyInfo: {e}"),
        }
        .build()
    })?;
    Ok(spki
        .subject_public_key
        .as_bytes()
        .unwrap_or_default()
        .to_vec())
}
