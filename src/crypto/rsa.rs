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

//! RSA signing and verification, PKCS#1 v1.5 padding.

use crate::crypto::{HashAlgorithm, SigningError, VerificationError};
use rsa::{
    pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, traits::PublicKeyParts, Pkcs1v15Sign,
    RsaPrivateKey, RsaPublicKey,
};
use sha1::Sha1;
use sha2::Sha256;

// Length of the DER-encoded DigestInfo prefix for each hash algorithm.
const SHA1_DIGEST_INFO_PREFIX_LEN: usize = 15;
const SHA256_DIGEST_INFO_PREFIX_LEN: usize = 19;

pub fn get_public_key_size(k: &RsaPublicKey) -> usize {
    k.size() * 8
}

/// Reads RSA public key data. No minimum key size is enforced here, that is
/// a matter of policy left to callers.
pub fn read_rsa_public_key(key_data: &[u8]) -> Result<RsaPublicKey, VerificationError> {
    // first try reading data as SubjectPublicKeyInfo
    // (*de facto* procedure, as shown in examples in appendix of RFC)
    // then try reading data as RSAPublicKey
    // (what was actually specified in RFC, but not what is in appendix)
    RsaPublicKey::from_public_key_der(key_data)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(key_data))
        .map_err(|_| VerificationError::InvalidKey)
}

fn padded_digest_len(hash_alg: HashAlgorithm) -> usize {
    match hash_alg {
        HashAlgorithm::Sha1 => SHA1_DIGEST_INFO_PREFIX_LEN + 20,
        HashAlgorithm::Sha256 => SHA256_DIGEST_INFO_PREFIX_LEN + 32,
    }
}

pub fn verify_rsa(
    hash_alg: HashAlgorithm,
    public_key: &RsaPublicKey,
    msg: &[u8],
    signature_data: &[u8],
) -> Result<(), VerificationError> {
    // PKCS#1 v1.5 needs at least eleven bytes of padding around the DigestInfo
    if public_key.size() < padded_digest_len(hash_alg) + 11 {
        return Err(VerificationError::KeyTooSmall);
    }

    let result = match hash_alg {
        HashAlgorithm::Sha256 => {
            public_key.verify(Pkcs1v15Sign::new::<Sha256>(), msg, signature_data)
        }
        HashAlgorithm::Sha1 => public_key.verify(Pkcs1v15Sign::new::<Sha1>(), msg, signature_data),
    };

    result.map_err(|_| VerificationError::VerificationFailure)
}

pub fn sign_rsa(
    hash_alg: HashAlgorithm,
    private_key: &RsaPrivateKey,
    msg: &[u8],
) -> Result<Vec<u8>, SigningError> {
    let result = match hash_alg {
        HashAlgorithm::Sha256 => private_key.sign(Pkcs1v15Sign::new::<Sha256>(), msg),
        HashAlgorithm::Sha1 => private_key.sign(Pkcs1v15Sign::new::<Sha1>(), msg),
    };

    result.map_err(|_| SigningError::SigningFailure)
}
