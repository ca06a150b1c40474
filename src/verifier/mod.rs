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


//! Verifier and supporting types.

mod lookup;
mod verify;

pub use lookup::{look_up_key, LookupTxt};
pub use verify::{check_key_record, verify_data_hash, VerificationFailure};

use crate::{
    error::{Error, ErrorKind, ValidationError, ValidationErrorKind},
    header::{FieldName, HeaderFields},
    message_hash::{BodyHashError, BodyHasher, BodyHasherBuilder, BodyHasherKey, BodyHasherStance},
    record::PublicKeyRecord,
    signature::{self, DkimSignature, SignatureKind, DKIM_SIGNATURE_NAME},
    tag_list::SignatureTags,
};
use std::{
    str,
    time::{Duration, SystemTime},
};
use tracing::{debug, trace};

/// Configuration for a verifier process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The maximum duration of public key record lookups. When this duration is
    /// exceeded evaluation fails with a lookup timeout.
    pub lookup_timeout: Duration,

    /// Only validate at most this number of signatures, any extra signatures
    /// are ignored.
    pub max_signatures: usize,

    /// If given required headers are not signed in a DKIM signature, the
    /// signature will not validate. Note that the header `From` is always
    /// required independent of this configuration setting.
    pub required_signed_headers: Vec<FieldName>,

    /// Minimum acceptable key size in bits. When the key size of an RSA public
    /// key is below this limit, the signature will not validate even though
    /// the cryptographic verification succeeded.
    pub min_key_bits: usize,

    /// Tolerance applied to time values when checking signature expiration or
    /// timestamp validity, to allow for clock drift. Resolution is in seconds.
    pub time_tolerance: Duration,

    /// The `SystemTime` value to use as the instant ‘now’.
    pub fixed_system_time: Option<SystemTime>,
}

impl Config {
    pub(crate) fn current_timestamp(&self) -> u64 {
        self.fixed_system_time
            .unwrap_or_else(SystemTime::now)
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(5),
            max_signatures: 10,
            required_signed_headers: vec![],
            min_key_bits: 1024,
            time_tolerance: Duration::from_secs(10 * 60 * 60),
            fixed_system_time: None,
        }
    }
}

/// The verification status of an evaluated DKIM signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SignatureStatus {
    Success,
    Failure(VerificationFailure),
}

/// A verification result arrived at for some DKIM signature header.
#[derive(Clone, Debug, PartialEq)]
pub struct VerificationResult {
    /// The verification status.
    pub status: SignatureStatus,
    /// The index of the evaluated *DKIM-Signature* header in the original
    /// `HeaderFields` input.
    pub index: usize,
    /// The parsed DKIM signature data obtained from the *DKIM-Signature*
    /// header, if available.
    pub signature: Option<DkimSignature>,
    /// The size of the public key used in the verification, if one was found.
    pub key_size: Option<usize>,
    /// Whether the key record is flagged as being in testing mode (`t=y`).
    pub testing: bool,
}

struct VerifierTask {
    status: Result<(), VerificationFailure>,
    index: usize,
    signature: Option<DkimSignature>,
    key_record: Option<PublicKeyRecord>,
}

impl VerifierTask {
    fn body_hasher_key(&self) -> Option<Result<BodyHasherKey, Error>> {
        match (&self.status, &self.signature) {
            (Ok(()), Some(sig)) => Some(body_hasher_key(sig)),
            _ => None,
        }
    }
}

fn body_hasher_key(sig: &DkimSignature) -> Result<BodyHasherKey, Error> {
    let len = sig
        .body_length
        .map(usize::try_from)
        .transpose()
        .map_err(|_| ValidationError::new("l", ValidationErrorKind::InvalidNumber))?;
    Ok((len, sig.algorithm.hash_algorithm(), sig.canonicalization.body))
}

/// A verifier of DKIM signatures in an email message.
///
/// `Verifier` implements a three-phase, staged design that allows processing
/// the message in chunks, and shortcutting unnecessary body processing.
///
/// 1. **[`verify_header`][Verifier::verify_header]** (async): first, perform
///    signature verification on the message header and return a verifier that
///    carries the preliminary results; this is where the key lookups happen
/// 2. [`process_body_chunk`][Verifier::process_body_chunk]: then, any number of
///    chunks of the message body are fed to the verification process
/// 3. [`finish`][Verifier::finish]: finally, the body hashes are compared and
///    the final verification results are returned
///
/// Compare this with the similar but distinct procedure of
/// [`Signer`][crate::signer::Signer].
pub struct Verifier {
    tasks: Vec<VerifierTask>,
    body_hasher: BodyHasher,
}

impl Verifier {
    /// Initiates a message verification process by verifying the header of a
    /// message.
    ///
    /// Returns a verifier for all signatures in the given header, or `None` if
    /// the header contains no signatures.
    pub async fn verify_header<T>(
        resolver: &T,
        headers: &HeaderFields,
        config: &Config,
    ) -> Option<Self>
    where
        T: LookupTxt + ?Sized,
    {
        let now = config.current_timestamp();

        let mut tasks = vec![];
        let mut body_hasher = BodyHasherBuilder::new();

        let signature_headers = headers
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| *name == DKIM_SIGNATURE_NAME)
            .take(config.max_signatures);

        for (index, (name, value)) in signature_headers {
            let mut task = verify_signature_header(resolver, headers, config, now, index, name, value.as_ref()).await;

            match task.body_hasher_key() {
                Some(Ok((len, hash_alg, canon))) => {
                    body_hasher.register_canonicalization(len, hash_alg, canon);
                }
                Some(Err(e)) => task.status = Err(e.into()),
                None => {}
            }

            tasks.push(task);
        }

        if tasks.is_empty() {
            trace!("no DKIM signatures found");
            return None;
        }

        Some(Self {
            tasks,
            body_hasher: body_hasher.build(),
        })
    }

    /// Processes a chunk of the message body.
    ///
    /// Clients should pass the message body either whole or in chunks of
    /// arbitrary size to this method in order to calculate the body hash (the
    /// *bh=* value). After processing the body, call
    /// [`finish`][Verifier::finish] to perform the final verification.
    pub fn process_body_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        self.body_hasher.hash_chunk(chunk)
    }

    /// Performs the final verification and returns the verification results,
    /// in the order of the signature headers in the message.
    pub fn finish(self) -> Vec<VerificationResult> {
        let hashes = self.body_hasher.finish();

        self.tasks
            .into_iter()
            .map(|task| {
                let mut status = task.status.clone();

                if let (Ok(()), Some(Ok(key))) = (&status, task.body_hasher_key()) {
                    if let Some(sig) = &task.signature {
                        status = verify_body_hash(sig, hashes.get(&key));
                    }
                }

                let status = match status {
                    Ok(()) => SignatureStatus::Success,
                    Err(e) => SignatureStatus::Failure(e),
                };

                VerificationResult {
                    status,
                    index: task.index,
                    signature: task.signature,
                    key_size: task.key_record.as_ref().map(|r| r.key_size),
                    testing: task.key_record.as_ref().map_or(false, |r| r.is_testing()),
                }
            })
            .collect()
    }
}

fn verify_body_hash(
    sig: &DkimSignature,
    result: Result<(Box<[u8]>, usize), BodyHashError>,
) -> Result<(), VerificationFailure> {
    match result {
        Ok((hash, _)) => {
            if hash == sig.body_hash {
                trace!(domain = %sig.domain, "body hash matched");
                Ok(())
            } else {
                trace!(domain = %sig.domain, "body hash mismatch");
                Err(ValidationError::new("bh", ValidationErrorKind::BodyHashMismatch).into())
            }
        }
        Err(BodyHashError::InsufficientInput) => {
            trace!(domain = %sig.domain, "body shorter than l= length");
            Err(ValidationError::new("l", ValidationErrorKind::BodyLengthExceeded).into())
        }
        Err(BodyHashError::NotRegistered) => {
            Err(Error::Internal("body hasher not registered".into()).into())
        }
    }
}

async fn verify_signature_header<T>(
    resolver: &T,
    headers: &HeaderFields,
    config: &Config,
    now: u64,
    index: usize,
    name: &FieldName,
    value: &[u8],
) -> VerifierTask
where
    T: LookupTxt + ?Sized,
{
    let mut task = VerifierTask {
        status: Ok(()),
        index,
        signature: None,
        key_record: None,
    };

    let value = match str::from_utf8(value) {
        Ok(value) => value,
        Err(_) => {
            task.status = Err(Error::message_format("signature header not UTF-8").into());
            return task;
        }
    };

    let sig = match parse_signature(value, config, now) {
        Ok(sig) => sig,
        Err(e) => {
            debug!(index, "unusable DKIM signature: {e}");
            task.status = Err(e.into());
            return task;
        }
    };

    let record = match look_up_key(resolver, &sig.domain, &sig.selector, config.lookup_timeout).await {
        Ok(record) => record,
        Err(e) => {
            debug!(domain = %sig.domain, selector = %sig.selector, "key lookup failed: {e}");
            task.status = Err(e.into());
            task.signature = Some(sig);
            return task;
        }
    };

    task.status = verify::perform_verification(
        headers,
        &record,
        &sig,
        name.as_ref(),
        value,
        config.min_key_bits,
    );

    trace!(domain = %sig.domain, selector = %sig.selector, "header verification: {:?}", task.status);

    task.signature = Some(sig);
    task.key_record = Some(record);

    task
}

fn parse_signature(value: &str, config: &Config, now: u64) -> Result<DkimSignature, Error> {
    let tags = SignatureTags::parse(value)?;

    signature::validate_signature_fields(&tags, SignatureKind::Dkim, now, config.time_tolerance)?;

    let sig = DkimSignature::from_tags(&tags)?;

    for required in &config.required_signed_headers {
        if !sig.signed_headers.contains(required) {
            return Err(ValidationError::new("h", ValidationErrorKind::RequiredHeaderNotSigned).into());
        }
    }

    Ok(sig)
}

/// The overall status of a [`verify`] call.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VerificationStatus {
    /// The message carries no DKIM signature at the requested position.
    NoSignature,
    Valid,
    Invalid,
}

/// The outcome of verifying a single DKIM signature with [`verify`].
#[derive(Clone, Debug, PartialEq)]
pub struct VerificationOutcome {
    pub status: VerificationStatus,
    pub key_size: Option<usize>,
    /// Errors that caused the signature to be invalid. A signature that was
    /// understood but did not verify cryptographically has no errors.
    pub errors: Vec<Error>,
}

impl VerificationOutcome {
    pub fn is_valid(&self) -> bool {
        self.status == VerificationStatus::Valid
    }

    pub fn error_kinds(&self) -> Vec<ErrorKind> {
        self.errors.iter().map(|e| e.kind()).collect()
    }
}

/// Verifies the DKIM signature at position `index` (0 is the first
/// *DKIM-Signature* header) of a complete message.
pub async fn verify<T>(
    resolver: &T,
    headers: &HeaderFields,
    body: &[u8],
    config: &Config,
    index: usize,
) -> VerificationOutcome
where
    T: LookupTxt + ?Sized,
{
    let no_signature = VerificationOutcome {
        status: VerificationStatus::NoSignature,
        key_size: None,
        errors: vec![],
    };

    let mut config = config.clone();
    config.max_signatures = config.max_signatures.max(index.saturating_add(1));

    let Some(mut verifier) = Verifier::verify_header(resolver, headers, &config).await else {
        return no_signature;
    };

    let _ = verifier.process_body_chunk(body);

    let Some(result) = verifier.finish().into_iter().nth(index) else {
        return no_signature;
    };

    match result.status {
        SignatureStatus::Success => VerificationOutcome {
            status: VerificationStatus::Valid,
            key_size: result.key_size,
            errors: vec![],
        },
        SignatureStatus::Failure(failure) => VerificationOutcome {
            status: VerificationStatus::Invalid,
            key_size: result.key_size,
            errors: match failure {
                VerificationFailure::BadSignature => vec![],
                VerificationFailure::Error(e) => vec![e],
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = Config::default();

        assert_eq!(config.lookup_timeout, Duration::from_secs(5));
        assert_eq!(config.time_tolerance, Duration::from_secs(36000));
        assert_eq!(config.min_key_bits, 1024);
    }

    #[test]
    fn fixed_system_time() {
        let config = Config {
            fixed_system_time: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1234)),
            ..Default::default()
        };

        assert_eq!(config.current_timestamp(), 1234);
    }

    #[test]
    fn parse_signature_required_headers() {
        let value = "v=1; a=ed25519-sha256; d=example.com; s=sel; h=From:To; bh=YWJj; b=YWJj";
        let mut config = Config::default();

        assert!(parse_signature(value, &config, 0).is_ok());

        config.required_signed_headers = vec![FieldName::new("Subject").unwrap()];

        let e = parse_signature(value, &config, 0).unwrap_err();
        assert_eq!(
            e,
            Error::Validation(ValidationError::new("h", ValidationErrorKind::RequiredHeaderNotSigned))
        );
    }

    #[test]
    fn body_length_exceeded() {
        let value = "v=1; a=ed25519-sha256; d=example.com; s=sel; h=From; bh=YWJj; b=YWJj; l=5";
        let sig = DkimSignature::parse(value).unwrap();

        let result = verify_body_hash(&sig, Err(BodyHashError::InsufficientInput));

        assert_eq!(
            result,
            Err(ValidationError::new("l", ValidationErrorKind::BodyLengthExceeded).into())
        );
    }
}
