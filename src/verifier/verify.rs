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

use crate::{
    canonicalize::{self, CanonicalizationAlgorithm},
    crypto::{self, HashAlgorithm, KeyType, VerificationError},
    error::{Error, KeyFormatError, ValidationError},
    header::HeaderFields,
    message_hash,
    record::PublicKeyRecord,
    signature::{DkimSignature, SignatureAlgorithm},
    tag_list::remove_b_tag_value,
};
use std::{
    error::Error as StdError,
    fmt::{self, Display, Formatter},
};
use tracing::trace;

/// The reason a signature did not verify.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerificationFailure {
    /// The cryptographic signature does not match the signed data.
    BadSignature,
    /// The signature could not be evaluated, or is unacceptable.
    Error(Error),
}

impl Display for VerificationFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSignature => write!(f, "signature did not verify"),
            Self::Error(e) => write!(f, "{e}"),
        }
    }
}

impl StdError for VerificationFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::BadSignature => None,
            Self::Error(e) => Some(e),
        }
    }
}

impl From<Error> for VerificationFailure {
    fn from(error: Error) -> Self {
        Self::Error(error)
    }
}

impl From<ValidationError> for VerificationFailure {
    fn from(error: ValidationError) -> Self {
        Self::Error(error.into())
    }
}

impl From<KeyFormatError> for VerificationFailure {
    fn from(error: KeyFormatError) -> Self {
        Self::Error(error.into())
    }
}

/// Checks that a public key record permits its use with a signature
/// algorithm.
pub fn check_key_record(
    record: &PublicKeyRecord,
    algorithm: SignatureAlgorithm,
) -> Result<(), KeyFormatError> {
    if record.key_type() != algorithm.key_type() {
        return Err(KeyFormatError::KeyTypeMismatch);
    }
    if !record.allows_hash_algorithm(algorithm.hash_algorithm()) {
        return Err(KeyFormatError::DisallowedHashAlgorithm);
    }
    if !record.allows_email() {
        return Err(KeyFormatError::DisallowedServiceType);
    }
    Ok(())
}

/// Verifies a signature over a data hash and applies the minimum key size.
///
/// The key size floor applies to RSA keys only and is checked after the
/// cryptographic verification succeeded.
pub fn verify_data_hash(
    record: &PublicKeyRecord,
    hash_alg: HashAlgorithm,
    data_hash: &[u8],
    signature_data: &[u8],
    min_key_bits: usize,
) -> Result<(), VerificationFailure> {
    match crypto::verify(&record.key, hash_alg, data_hash, signature_data) {
        Ok(()) => {
            trace!(key_type = %record.key_type(), "public key verification successful");
        }
        Err(e) => {
            trace!(key_type = %record.key_type(), "public key verification failed: {e}");
            return Err(match e {
                VerificationError::KeyTooSmall => {
                    KeyFormatError::KeyTooSmall(record.key_size).into()
                }
                VerificationError::InvalidKey => KeyFormatError::InvalidKey.into(),
                VerificationError::InvalidSignature | VerificationError::VerificationFailure => {
                    VerificationFailure::BadSignature
                }
            });
        }
    }

    if record.key_type() == KeyType::Rsa && record.key_size < min_key_bits {
        trace!(key_size = record.key_size, min_key_bits, "public key below minimum size");
        return Err(KeyFormatError::KeyTooSmall(record.key_size).into());
    }

    Ok(())
}

/// Computes the data hash of a DKIM signature header found in a message.
pub fn dkim_data_hash(
    headers: &HeaderFields,
    sig: &DkimSignature,
    name: &str,
    value: &str,
) -> Box<[u8]> {
    let selected = canonicalize::select_headers(headers, &sig.signed_headers);

    let canon_alg: CanonicalizationAlgorithm = sig.canonicalization.header;

    message_hash::compute_data_hash(
        sig.algorithm.hash_algorithm(),
        canon_alg,
        &selected,
        canon_alg,
        name,
        &remove_b_tag_value(value),
    )
}

/// Verifies a parsed DKIM signature against its public key record.
pub fn perform_verification(
    headers: &HeaderFields,
    record: &PublicKeyRecord,
    sig: &DkimSignature,
    name: &str,
    value: &str,
    min_key_bits: usize,
) -> Result<(), VerificationFailure> {
    check_key_record(record, sig.algorithm)?;

    if record.forbids_subdomains() && sig.identity.domain_part != sig.domain {
        return Err(KeyFormatError::DomainMismatch.into());
    }

    let data_hash = dkim_data_hash(headers, sig, name, value);

    verify_data_hash(
        record,
        sig.algorithm.hash_algorithm(),
        &data_hash,
        &sig.signature_data,
        min_key_bits,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorKind, record::PublicKeyRecord};

    const ED25519_RECORD: &str = "v=DKIM1; k=ed25519; p=9VXMCgG0fXGIzwV7eOxKhz+Pe6DRmOBYjyvVoVrc/Dw=";

    #[test]
    fn check_key_record_rules() {
        let record: PublicKeyRecord = ED25519_RECORD.parse().unwrap();
        assert_eq!(check_key_record(&record, SignatureAlgorithm::Ed25519Sha256), Ok(()));
        assert_eq!(
            check_key_record(&record, SignatureAlgorithm::RsaSha256),
            Err(KeyFormatError::KeyTypeMismatch)
        );

        let record: PublicKeyRecord = format!("{ED25519_RECORD}; s=tlsrpt").parse().unwrap();
        assert_eq!(
            check_key_record(&record, SignatureAlgorithm::Ed25519Sha256),
            Err(KeyFormatError::DisallowedServiceType)
        );

        let record: PublicKeyRecord = format!("{ED25519_RECORD}; h=sha1").parse().unwrap();
        assert_eq!(
            check_key_record(&record, SignatureAlgorithm::Ed25519Sha256),
            Err(KeyFormatError::DisallowedHashAlgorithm)
        );
    }

    #[test]
    fn bad_signature_is_not_an_error() {
        let record: PublicKeyRecord = ED25519_RECORD.parse().unwrap();

        let result = verify_data_hash(&record, HashAlgorithm::Sha256, &[1; 32], &[0; 64], 1024);

        assert_eq!(result, Err(VerificationFailure::BadSignature));

        let failure = VerificationFailure::from(KeyFormatError::NoKeyFound);
        assert!(matches!(failure, VerificationFailure::Error(e) if e.kind() == ErrorKind::KeyFormat));
    }
}
