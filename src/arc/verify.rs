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


use super::{
    auth_results::AuthenticationResults,
    set::{self, ArcSet},
    signature::{ArcMessageSignature, ArcSeal},
    ChainValidationStatus,
};
use crate::{
    canonicalize::{self, CanonicalizationAlgorithm},
    error::{Error, ValidationError, ValidationErrorKind},
    header::{HeaderField, HeaderFields},
    message_hash::{self, BodyHashError},
    signature::{self as sig, DomainName, Selector, SignatureKind},
    tag_list::{remove_b_tag_value, SignatureTags},
    verifier::{self, Config, LookupTxt, VerificationFailure},
};
use std::str;
use tracing::{debug, trace};

/// The evaluation of one ARC set.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceResult {
    pub instance: u32,
    pub ams_valid: bool,
    pub as_valid: bool,
    /// The `cv=` value of the ARC-Seal, if it could be parsed.
    pub cv: Option<ChainValidationStatus>,
    pub ams_domain: Option<DomainName>,
    pub ams_selector: Option<Selector>,
    pub as_domain: Option<DomainName>,
    pub as_selector: Option<Selector>,
    /// The results recorded in the ARC-Authentication-Results header.
    pub authentication_results: Option<AuthenticationResults>,
    pub ams_failure: Option<VerificationFailure>,
    pub as_failure: Option<VerificationFailure>,
}

impl InstanceResult {
    fn new(instance: u32) -> Self {
        Self {
            instance,
            ams_valid: false,
            as_valid: false,
            cv: None,
            ams_domain: None,
            ams_selector: None,
            as_domain: None,
            as_selector: None,
            authentication_results: None,
            ams_failure: None,
            as_failure: None,
        }
    }
}

/// The result of validating an ARC chain.
#[derive(Clone, Debug, PartialEq)]
pub struct ArcVerificationResult {
    /// The chain verdict. *none* when the message carries no ARC sets, or when
    /// an intermediary terminated the chain with `cv=fail`.
    pub chain_status: ChainValidationStatus,
    /// Results per instance, from the highest instance to the lowest.
    pub per_instance_results: Vec<InstanceResult>,
    pub reason: String,
    /// The error that made the ARC header fields unusable, for example a
    /// missing set member (`ErrorKind::MessageFormat`).
    pub error: Option<Error>,
}

impl ArcVerificationResult {
    fn new(
        chain_status: ChainValidationStatus,
        per_instance_results: Vec<InstanceResult>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            chain_status,
            per_instance_results,
            reason: reason.into(),
            error: None,
        }
    }
}

/// Validates the ARC chain of a message.
///
/// All sets are evaluated, newest first. Structural problems with the ARC
/// header fields make the chain fail, with the error recorded in the result.
pub async fn verify_chain<T>(
    resolver: &T,
    headers: &HeaderFields,
    body: &[u8],
    config: &Config,
) -> ArcVerificationResult
where
    T: LookupTxt + ?Sized,
{
    let sets = match set::discover_arc_sets(headers) {
        Ok(sets) => sets,
        Err(e) => {
            debug!("invalid ARC header fields: {e}");
            let reason = e.to_string();
            return ArcVerificationResult {
                error: Some(e),
                ..ArcVerificationResult::new(ChainValidationStatus::Fail, vec![], reason)
            };
        }
    };

    let now = config.current_timestamp();

    let mut results = Vec::with_capacity(sets.len());

    for (k, set) in sets.iter().enumerate() {
        let mut result = InstanceResult::new(set.instance);

        result.authentication_results = parse_aar_value(set.authentication_results);

        match verify_message_signature(resolver, headers, body, set, config, now, &mut result).await {
            Ok(()) => result.ams_valid = true,
            Err(e) => {
                debug!(instance = set.instance, "ARC-Message-Signature did not verify: {e}");
                result.ams_failure = Some(e);
            }
        }

        match verify_seal(resolver, &sets[k..], config, now, &mut result).await {
            Ok(()) => result.as_valid = true,
            Err(e) => {
                debug!(instance = set.instance, "ARC-Seal did not verify: {e}");
                result.as_failure = Some(e);
            }
        }

        trace!(
            instance = result.instance,
            ams_valid = result.ams_valid,
            as_valid = result.as_valid,
            "evaluated ARC set"
        );

        results.push(result);
    }

    let (status, reason) = aggregate(&results);

    debug!(%status, "ARC chain validation: {reason}");

    ArcVerificationResult::new(status, results, reason)
}

fn aggregate(results: &[InstanceResult]) -> (ChainValidationStatus, String) {
    let Some(newest) = results.first() else {
        return (ChainValidationStatus::None, "message is not ARC signed".into());
    };

    if !newest.ams_valid {
        return (
            ChainValidationStatus::Fail,
            format!("most recent ARC-Message-Signature (i={}) did not validate", newest.instance),
        );
    }

    for result in results {
        let i = result.instance;

        if result.cv == Some(ChainValidationStatus::Fail) {
            return (ChainValidationStatus::None, format!("sealed chain terminated at i={i}"));
        }

        if !result.as_valid {
            return (ChainValidationStatus::Fail, format!("ARC-Seal (i={i}) did not validate"));
        }

        match (i, result.cv) {
            (1, Some(ChainValidationStatus::None)) => {}
            (1, _) => {
                return (ChainValidationStatus::Fail, "ARC-Seal (i=1) must have cv=none".into());
            }
            (_, Some(ChainValidationStatus::None)) => {
                return (ChainValidationStatus::Fail, format!("ARC-Seal (i={i}) has cv=none"));
            }
            _ => {}
        }
    }

    (ChainValidationStatus::Pass, "chain validated".into())
}

fn header_value(field: &HeaderField) -> Result<&str, Error> {
    str::from_utf8(field.1.as_ref())
        .map_err(|_| Error::message_format(format!("{} header not UTF-8", field.0)))
}

fn parse_aar_value(field: &HeaderField) -> Option<AuthenticationResults> {
    let value = header_value(field).ok()?;
    let (_, results) = value.split_once(';')?;
    AuthenticationResults::parse(results).ok()
}

fn parse_tags(value: &str, kind: SignatureKind, config: &Config, now: u64) -> Result<SignatureTags, Error> {
    let tags = SignatureTags::parse(value)?;
    sig::validate_signature_fields(&tags, kind, now, config.time_tolerance)?;
    Ok(tags)
}

async fn verify_message_signature<T>(
    resolver: &T,
    headers: &HeaderFields,
    body: &[u8],
    set: &ArcSet<'_>,
    config: &Config,
    now: u64,
    result: &mut InstanceResult,
) -> Result<(), VerificationFailure>
where
    T: LookupTxt + ?Sized,
{
    let (name, _) = set.message_signature;
    let value = header_value(set.message_signature)?;

    let tags = parse_tags(value, SignatureKind::ArcMessageSignature, config, now)?;
    let ams = ArcMessageSignature::from_tags(&tags)?;

    result.ams_domain = Some(ams.domain.clone());
    result.ams_selector = Some(ams.selector.clone());

    if ams.signed_headers.iter().any(|h| *h == sig::ARC_SEAL_NAME) {
        return Err(Error::parameter("ARC-Message-Signature signs ARC-Seal header").into());
    }

    let record =
        verifier::look_up_key(resolver, &ams.domain, &ams.selector, config.lookup_timeout).await?;

    verifier::check_key_record(&record, ams.algorithm)?;

    let hash_alg = ams.algorithm.hash_algorithm();

    let selected = canonicalize::select_headers(headers, &ams.signed_headers);

    let data_hash = message_hash::compute_data_hash(
        hash_alg,
        ams.canonicalization.header,
        &selected,
        CanonicalizationAlgorithm::Simple,
        name.as_ref(),
        &remove_b_tag_value(value),
    );

    verifier::verify_data_hash(&record, hash_alg, &data_hash, &ams.signature_data, config.min_key_bits)?;

    let len = ams
        .body_length
        .map(usize::try_from)
        .transpose()
        .map_err(|_| ValidationError::new("l", ValidationErrorKind::InvalidNumber))?;

    match message_hash::body_hash(ams.canonicalization.body, hash_alg, body, len) {
        Ok((hash, _)) if hash == ams.body_hash => {
            trace!(instance = ams.instance, "body hash matched");
            Ok(())
        }
        Ok(_) => Err(ValidationError::new("bh", ValidationErrorKind::BodyHashMismatch).into()),
        Err(BodyHashError::InsufficientInput) => {
            Err(ValidationError::new("l", ValidationErrorKind::BodyLengthExceeded).into())
        }
        Err(BodyHashError::NotRegistered) => {
            Err(Error::Internal("body hasher not registered".into()).into())
        }
    }
}

/// Verifies the ARC-Seal of the first set in `sets`; the remaining sets are
/// the older instances in descending order.
async fn verify_seal<T>(
    resolver: &T,
    sets: &[ArcSet<'_>],
    config: &Config,
    now: u64,
    result: &mut InstanceResult,
) -> Result<(), VerificationFailure>
where
    T: LookupTxt + ?Sized,
{
    let (current, prior) = sets
        .split_first()
        .ok_or_else(|| Error::Internal("no ARC set to verify".into()))?;

    let (name, _) = current.seal;
    let value = header_value(current.seal)?;

    let tags = parse_tags(value, SignatureKind::ArcSeal, config, now)?;
    let seal = ArcSeal::from_tags(&tags)?;

    result.cv = Some(seal.chain_validation_status);
    result.as_domain = Some(seal.domain.clone());
    result.as_selector = Some(seal.selector.clone());

    let record =
        verifier::look_up_key(resolver, &seal.domain, &seal.selector, config.lookup_timeout).await?;

    verifier::check_key_record(&record, seal.algorithm)?;

    let hash_alg = seal.algorithm.hash_algorithm();

    // an ARC-Seal with cv=fail covers only its own set
    let prior = match seal.chain_validation_status {
        ChainValidationStatus::Fail => &[][..],
        _ => prior,
    };

    let data_hash = set::seal_data_hash(
        hash_alg,
        prior.iter().rev(),
        current.authentication_results,
        name.as_ref(),
        &remove_b_tag_value(value),
    );

    verifier::verify_data_hash(&record, hash_alg, &data_hash, &seal.signature_data, config.min_key_bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(i: u32, ams_valid: bool, as_valid: bool, cv: ChainValidationStatus) -> InstanceResult {
        InstanceResult {
            ams_valid,
            as_valid,
            cv: Some(cv),
            ..InstanceResult::new(i)
        }
    }

    #[test]
    fn aggregate_rules() {
        use ChainValidationStatus::*;

        assert_eq!(aggregate(&[]).0, None);

        let chain = [instance(2, true, true, Pass), instance(1, false, true, None)];
        assert_eq!(aggregate(&chain).0, Pass);

        let chain = [instance(2, false, true, Pass), instance(1, true, true, None)];
        assert_eq!(aggregate(&chain).0, Fail);

        let chain = [instance(2, true, true, Pass), instance(1, true, false, None)];
        assert_eq!(aggregate(&chain).0, Fail);

        let chain = [instance(2, true, true, Fail), instance(1, true, false, None)];
        let (status, reason) = aggregate(&chain);
        assert_eq!(status, None);
        assert_eq!(reason, "sealed chain terminated at i=2");
    }

    #[test]
    fn aggregate_cv_position() {
        use ChainValidationStatus::*;

        assert_eq!(aggregate(&[instance(1, true, true, Pass)]).0, Fail);

        let chain = [instance(2, true, true, None), instance(1, true, true, None)];
        assert_eq!(aggregate(&chain).0, Fail);
    }
}
