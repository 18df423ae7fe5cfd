// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The signing-side counterpart of [`super::verify`], used only by [`crate::builder`].

use crate::error::{self, Result};
use crate::metadata::{Key, KeyVal};
use async_trait::async_trait;
use aws_lc_rs::rand::SecureRandom;
use aws_lc_rs::signature::{EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair};
use std::collections::HashMap;

/// Implemented for each key type the builder can sign with.
#[async_trait]
pub trait Signer: Sync + Send {
    /// The public half of this signer, in the form that belongs in `root.json`'s `keys` map.
    fn tuf_key(&self) -> Key;

    /// Signs `msg`, returning the raw signature bytes (hex-encoding is the caller's job, to
    /// match whatever the scheme's wire format wants - raw bytes for Ed25519/RSA, DER for
    /// ECDSA).
    async fn sign(
        &self,
        msg: &[u8],
        rng: &(dyn SecureRandom + Sync),
    ) -> std::result::Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync + 'static>>;
}

/// A concrete keypair of one of the three supported schemes.
#[allow(clippy::upper_case_acronyms)]
pub enum SigningKey {
    Ed25519(Ed25519KeyPair),
    Rsa(RsaKeyPair),
    Ecdsa(EcdsaKeyPair),
}

#[async_trait]
impl Signer for SigningKey {
    fn tuf_key(&self) -> Key {
        match self {
            SigningKey::Ed25519(k) => Key {
                keytype: "ed25519".to_string(),
                scheme: "ed25519".to_string(),
                keyval: KeyVal {
                    public: hex::encode(k.public_key().as_ref()),
                    _extra: HashMap::new(),
                },
                _extra: HashMap::new(),
            },
            SigningKey::Rsa(k) => Key {
                keytype: "rsa".to_string(),
                scheme: "rsassa-pss-sha256".to_string(),
                keyval: KeyVal {
                    public: pem_encode_spki(k.public_key().as_ref()),
                    _extra: HashMap::new(),
                },
                _extra: HashMap::new(),
            },
            SigningKey::Ecdsa(k) => Key {
                keytype: "ecdsa".to_string(),
                scheme: "ecdsa-sha2-nistp256".to_string(),
                keyval: KeyVal {
                    public: pem_encode_spki(k.public_key().as_ref()),
                    _extra: HashMap::new(),
                },
                _extra: HashMap::new(),
            },
        }
    }

    async fn sign(
        &self,
        msg: &[u8],
        rng: &(dyn SecureRandom + Sync),
    ) -> std::result::Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync + 'static>> {
        match self {
            SigningKey::Ed25519(k) => Ok(k.sign(msg).as_ref().to_vec()),
            SigningKey::Rsa(k) => {
                let mut sig = vec![0; k.public_modulus_len()];
                k.sign(&aws_lc_rs::signature::RSA_PSS_SHA256, rng, msg, &mut sig)?;
                Ok(sig)
            }
            SigningKey::Ecdsa(k) => Ok(k.sign(rng, msg)?.as_ref().to_vec()),
        }
    }
}

/// Wraps a raw SubjectPublicKeyInfo DER blob (as produced by `aws-lc-rs`'s `public_key()`) in a
/// PEM block. Real SPKI DER includes the AlgorithmIdentifier; this crate's key pairs already
/// return DER-wrapped bytes from `public_key()` so this is a plain base64-with-headers step.
fn pem_encode_spki(der: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let b64 = STANDARD.encode(der);
    let mut out = String::from("-----BEGIN PUBLIC KEY-----\n");
    for chunk in b64.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).expect("base64 is ASCII"));
        out.push('\n');
    }
    out.push_str("-----END PUBLIC KEY-----\n");
    out
}

/// Parses a PKCS8 (or, for RSA, PKCS1/PKCS8 PEM) private key into a [`SigningKey`].
pub fn parse_keypair(key: &[u8]) -> Result<SigningKey> {
    if let Ok(k) = Ed25519KeyPair::from_pkcs8(key) {
        return Ok(SigningKey::Ed25519(k));
    }
    if let Ok(k) = EcdsaKeyPair::from_pkcs8(
        &aws_lc_rs::signature::ECDSA_P256_SHA256_ASN1_SIGNING,
        key,
    ) {
        return Ok(SigningKey::Ecdsa(k));
    }
    if let Ok(pem) = pem::parse(key) {
        match pem.tag() {
            "PRIVATE KEY" => {
                if let Ok(k) = RsaKeyPair::from_pkcs8(pem.contents()) {
                    return Ok(SigningKey::Rsa(k));
                }
            }
            "RSA PRIVATE KEY" => {
                if let Ok(k) = RsaKeyPair::from_der(pem.contents()) {
                    return Ok(SigningKey::Rsa(k));
                }
            }
            _ => {}
        }
    }
    error::KeyParseSnafu {
        message: "key material did not parse as a recognized Ed25519/RSA/ECDSA private key"
            .to_string(),
    }
    .fail()
}
