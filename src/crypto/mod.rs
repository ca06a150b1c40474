// viaseal – DKIM signing and verification with ARC sealing
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

//! Cryptographic utilities.
//!
//! Signing and verification operate on a precomputed digest: for RSA the
//! digest is wrapped in PKCS#1 v1.5 `DigestInfo`, for Ed25519 the digest bytes
//! are themselves the message that is signed.

mod ed25519;
mod hash;
mod rsa;

pub use self::{
    ed25519::{read_ed25519_verifying_key, sign_ed25519, verify_ed25519},
    hash::{digest_slices, CountingHasher, HashStatus, InsufficientInput},
    rsa::{read_rsa_public_key, sign_rsa, verify_rsa},
};

use crate::{error::KeyFormatError, util::CanonicalStr};
use ::rsa::{pkcs1::DecodeRsaPrivateKey, traits::PublicKeyParts, RsaPrivateKey, RsaPublicKey};
use ed25519_dalek::{SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use pkcs8::{der::pem::PemLabel, Document, PrivateKeyInfo};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// A private key used for signing.
#[derive(Debug)]
pub enum SigningKey {
    Rsa(RsaPrivateKey),
    Ed25519(Ed25519SigningKey),
}

impl SigningKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Rsa(_) => KeyType::Rsa,
            Self::Ed25519(_) => KeyType::Ed25519,
        }
    }

    /// Reads a PKCS#8 PEM document containing an RSA or Ed25519 private key.
    pub fn from_pkcs8_pem(s: &str) -> Result<Self, KeyFormatError> {
        let (label, private_key_der) =
            Document::from_pem(s).map_err(|_| KeyFormatError::InvalidPrivateKey)?;

        PrivateKeyInfo::validate_pem_label(label)
            .map_err(|_| KeyFormatError::InvalidPrivateKey)?;

        let pk = PrivateKeyInfo::try_from(private_key_der.as_bytes())
            .map_err(|_| KeyFormatError::InvalidPrivateKey)?;

        if let Ok(rpk) = RsaPrivateKey::try_from(pk.clone()) {
            Ok(Self::Rsa(rpk))
        } else if let Ok(esk) = Ed25519SigningKey::try_from(pk) {
            Ok(Self::Ed25519(esk))
        } else {
            Err(KeyFormatError::UnsupportedKeyType)
        }
    }

    /// Reads a PKCS#1 PEM document (`BEGIN RSA PRIVATE KEY`).
    pub fn from_pkcs1_pem(s: &str) -> Result<Self, KeyFormatError> {
        RsaPrivateKey::from_pkcs1_pem(s)
            .map(Self::Rsa)
            .map_err(|_| KeyFormatError::InvalidPrivateKey)
    }

    /// Reads a private key in any of the supported PEM formats.
    pub fn from_pem(s: &str) -> Result<Self, KeyFormatError> {
        Self::from_pkcs8_pem(s).or_else(|e| Self::from_pkcs1_pem(s).map_err(|_| e))
    }

    /// Creates an Ed25519 key from the raw 32-byte secret key.
    pub fn ed25519_from_bytes(bytes: &[u8]) -> Result<Self, KeyFormatError> {
        let bytes: &[u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyFormatError::InvalidPrivateKey)?;
        Ok(Self::Ed25519(Ed25519SigningKey::from_bytes(bytes)))
    }

    /// Returns the length in bytes of signatures made with this key.
    pub fn signature_length(&self) -> usize {
        match self {
            Self::Rsa(k) => k.size(),
            Self::Ed25519(_) => ed25519_dalek::SIGNATURE_LENGTH,
        }
    }

    /// Returns the matching public key.
    pub fn to_verifying_key(&self) -> VerifyingKey {
        match self {
            Self::Rsa(k) => VerifyingKey::Rsa(RsaPublicKey::from(k)),
            Self::Ed25519(k) => VerifyingKey::Ed25519(k.verifying_key()),
        }
    }
}

impl AsRef<SigningKey> for SigningKey {
    fn as_ref(&self) -> &SigningKey {
        self
    }
}

/// A public key used for verification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerifyingKey {
    Rsa(RsaPublicKey),
    Ed25519(Ed25519VerifyingKey),
}

impl VerifyingKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Rsa(_) => KeyType::Rsa,
            Self::Ed25519(_) => KeyType::Ed25519,
        }
    }

    /// Returns the key size in bits.
    pub fn key_size(&self) -> usize {
        match self {
            Self::Rsa(public_key) => self::rsa::get_public_key_size(public_key),
            Self::Ed25519(_) => ed25519_dalek::PUBLIC_KEY_LENGTH * 8,
        }
    }

    pub fn from_key_data(key_type: KeyType, key_data: &[u8]) -> Result<Self, VerificationError> {
        match key_type {
            KeyType::Rsa => {
                let public_key = read_rsa_public_key(key_data)?;
                Ok(VerifyingKey::Rsa(public_key))
            }
            KeyType::Ed25519 => {
                let verifying_key = read_ed25519_verifying_key(key_data)?;
                Ok(VerifyingKey::Ed25519(verifying_key))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyType {
    Rsa,
    Ed25519,
}

impl CanonicalStr for KeyType {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ed25519 => "ed25519",
        }
    }
}

impl Display for KeyType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl CanonicalStr for HashAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl Display for HashAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("sha256") {
            Ok(Self::Sha256)
        } else if s.eq_ignore_ascii_case("sha1") {
            Ok(Self::Sha1)
        } else {
            Err("unknown hash algorithm")
        }
    }
}

impl HashAlgorithm {
    pub fn all() -> Vec<Self> {
        vec![Self::Sha1, Self::Sha256]
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VerificationError {
    InvalidKey,
    KeyTooSmall,
    InvalidSignature,
    VerificationFailure,
}

impl Display for VerificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid key data"),
            Self::KeyTooSmall => write!(f, "key too small"),
            Self::InvalidSignature => write!(f, "invalid signature data"),
            Self::VerificationFailure => write!(f, "signature verification failed"),
        }
    }
}

impl Error for VerificationError {}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SigningError {
    SigningFailure,
}

impl Display for SigningError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SigningFailure => write!(f, "signing failed"),
        }
    }
}

impl Error for SigningError {}

/// Signs a digest with the given key.
pub fn sign(
    signing_key: &SigningKey,
    hash_alg: HashAlgorithm,
    digest: &[u8],
) -> Result<Vec<u8>, SigningError> {
    match signing_key {
        SigningKey::Rsa(k) => sign_rsa(hash_alg, k, digest),
        SigningKey::Ed25519(k) => sign_ed25519(k, digest),
    }
}

/// Verifies a signature over a digest with the given key.
pub fn verify(
    verifying_key: &VerifyingKey,
    hash_alg: HashAlgorithm,
    digest: &[u8],
    signature_data: &[u8],
) -> Result<(), VerificationError> {
    match verifying_key {
        VerifyingKey::Rsa(pk) => verify_rsa(hash_alg, pk, digest, signature_data),
        VerifyingKey::Ed25519(pk) => verify_ed25519(pk, digest, signature_data),
    }
}
