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

//! Signature header fields: algorithms, tag validation, and the typed DKIM
//! signature.

mod format;
mod names;

pub use format::{encoded_base64_len, fold_header_value, format_signed_headers, FOLD_WIDTH};
pub use names::{DomainName, Identity, ParseDomainError, Selector};

use crate::{
    canonicalize::{Canonicalization, CanonicalizationAlgorithm},
    crypto::{HashAlgorithm, KeyType},
    error::{Error, ValidationError, ValidationErrorKind},
    header::FieldName,
    parse::{parse_decimal, trim_fws},
    tag_list::{parse_base64_tag_value, parse_colon_separated_tag_value, SignatureTags},
    util::{encode_base64, CanonicalStr},
};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
    time::Duration,
};

pub const DKIM_SIGNATURE_NAME: &str = "DKIM-Signature";
pub const ARC_MESSAGE_SIGNATURE_NAME: &str = "ARC-Message-Signature";
pub const ARC_SEAL_NAME: &str = "ARC-Seal";
pub const ARC_AUTHENTICATION_RESULTS_NAME: &str = "ARC-Authentication-Results";

/// The highest ARC instance number.
pub const MAX_ARC_INSTANCE: u32 = 50;

/// A signature algorithm.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureAlgorithm {
    /// The *rsa-sha1* signature algorithm.
    RsaSha1,
    /// The *rsa-sha256* signature algorithm.
    RsaSha256,
    /// The *ed25519-sha256* signature algorithm.
    Ed25519Sha256,
}

impl SignatureAlgorithm {
    /// Combines a key type and a hash algorithm, if the combination exists.
    pub fn new(key_type: KeyType, hash_alg: HashAlgorithm) -> Option<Self> {
        match (key_type, hash_alg) {
            (KeyType::Rsa, HashAlgorithm::Sha1) => Some(Self::RsaSha1),
            (KeyType::Rsa, HashAlgorithm::Sha256) => Some(Self::RsaSha256),
            (KeyType::Ed25519, HashAlgorithm::Sha256) => Some(Self::Ed25519Sha256),
            (KeyType::Ed25519, HashAlgorithm::Sha1) => None,
        }
    }

    /// Returns this signature algorithm’s key type.
    pub fn key_type(self) -> KeyType {
        match self {
            Self::RsaSha1 | Self::RsaSha256 => KeyType::Rsa,
            Self::Ed25519Sha256 => KeyType::Ed25519,
        }
    }

    /// Returns this signature algorithm’s hash algorithm.
    pub fn hash_algorithm(self) -> HashAlgorithm {
        match self {
            Self::RsaSha1 => HashAlgorithm::Sha1,
            Self::RsaSha256 | Self::Ed25519Sha256 => HashAlgorithm::Sha256,
        }
    }
}

impl CanonicalStr for SignatureAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "rsa-sha1",
            Self::RsaSha256 => "rsa-sha256",
            Self::Ed25519Sha256 => "ed25519-sha256",
        }
    }
}

impl Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("rsa-sha256") {
            Ok(Self::RsaSha256)
        } else if s.eq_ignore_ascii_case("ed25519-sha256") {
            Ok(Self::Ed25519Sha256)
        } else if s.eq_ignore_ascii_case("rsa-sha1") {
            Ok(Self::RsaSha1)
        } else {
            Err(ValidationError::new("a", ValidationErrorKind::UnsupportedAlgorithm))
        }
    }
}

/// The kind of a signature header, which determines its tag requirements.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureKind {
    Dkim,
    ArcMessageSignature,
    ArcSeal,
}

impl SignatureKind {
    pub fn header_name(self) -> &'static str {
        match self {
            Self::Dkim => DKIM_SIGNATURE_NAME,
            Self::ArcMessageSignature => ARC_MESSAGE_SIGNATURE_NAME,
            Self::ArcSeal => ARC_SEAL_NAME,
        }
    }

    pub fn mandatory_tags(self) -> &'static [&'static str] {
        match self {
            Self::Dkim => &["v", "a", "b", "bh", "d", "h", "s"],
            Self::ArcMessageSignature => &["i", "a", "b", "bh", "d", "h", "s"],
            Self::ArcSeal => &["i", "a", "b", "cv", "d", "s"],
        }
    }

    /// Whether signatures of this kind may use the given algorithm. ARC
    /// excludes *rsa-sha1*.
    pub fn allows_algorithm(self, algorithm: SignatureAlgorithm) -> bool {
        match self {
            Self::Dkim => true,
            Self::ArcMessageSignature | Self::ArcSeal => algorithm != SignatureAlgorithm::RsaSha1,
        }
    }

    fn default_canonicalization(self) -> Canonicalization {
        match self {
            Self::Dkim => Canonicalization::new(
                CanonicalizationAlgorithm::Simple,
                CanonicalizationAlgorithm::Simple,
            ),
            Self::ArcMessageSignature | Self::ArcSeal => Canonicalization::new(
                CanonicalizationAlgorithm::Relaxed,
                CanonicalizationAlgorithm::Relaxed,
            ),
        }
    }
}

/// Validates the tags of a signature header of the given kind.
///
/// `now` is the verification time in seconds since the Unix epoch; `tolerance`
/// is the allowance for clock skew applied to `t=` and `x=`.
pub fn validate_signature_fields(
    tags: &SignatureTags,
    kind: SignatureKind,
    now: u64,
    tolerance: Duration,
) -> Result<(), ValidationError> {
    use ValidationErrorKind::*;

    for &name in kind.mandatory_tags() {
        if !tags.contains(name) {
            return Err(ValidationError::new(name, MissingTag));
        }
    }

    if kind == SignatureKind::ArcSeal && tags.contains("h") {
        return Err(ValidationError::new("h", TagNotPermitted));
    }

    if let Some(v) = tags.get("v") {
        if trim_fws(v) != "1" {
            return Err(ValidationError::new("v", UnsupportedVersion));
        }
    }

    parse_algorithm(required(tags, "a")?, kind)?;

    parse_base64("b", required(tags, "b")?)?;
    if let Some(bh) = tags.get("bh") {
        parse_base64("bh", bh)?;
    }

    let domain = parse_domain(required(tags, "d")?)?;
    parse_selector(required(tags, "s")?)?;

    if let Some(h) = tags.get("h") {
        let names = parse_signed_headers(h)?;
        if kind != SignatureKind::ArcSeal && !names.iter().any(|n| *n == "From") {
            return Err(ValidationError::new("h", FromHeaderNotSigned));
        }
    }

    if let Some(i) = tags.get("i") {
        match kind {
            SignatureKind::Dkim => {
                parse_identity(i, &domain)?;
            }
            SignatureKind::ArcMessageSignature | SignatureKind::ArcSeal => {
                parse_instance(i)?;
            }
        }
    }

    if let Some(l) = tags.get("l") {
        parse_number("l", l)?;
    }

    if let Some(q) = tags.get("q") {
        if !trim_fws(q).eq_ignore_ascii_case("dns/txt") {
            return Err(ValidationError::new("q", UnsupportedQueryMethod));
        }
    }

    if let Some(cv) = tags.get("cv") {
        let cv = trim_fws(cv);
        if !["none", "pass", "fail"].iter().any(|s| cv.eq_ignore_ascii_case(s)) {
            return Err(ValidationError::new("cv", InvalidValue));
        }
    }

    let tolerance = tolerance.as_secs();

    let timestamp = tags.get("t").map(|t| parse_number("t", t)).transpose()?;
    if let Some(t) = timestamp {
        if t > now.saturating_add(tolerance) {
            return Err(ValidationError::new("t", TimestampInFuture));
        }
    }

    if let Some(x) = tags.get("x") {
        let x = parse_number("x", x)?;
        if x.saturating_add(tolerance) < now {
            return Err(ValidationError::new("x", SignatureExpired));
        }
        if matches!(timestamp, Some(t) if x <= t) {
            return Err(ValidationError::new("x", ExpirationNotAfterTimestamp));
        }
    }

    Ok(())
}

pub(crate) fn required<'a>(tags: &'a SignatureTags, name: &str) -> Result<&'a str, ValidationError> {
    tags.get(name)
        .ok_or_else(|| ValidationError::new(name, ValidationErrorKind::MissingTag))
}

pub(crate) fn parse_algorithm(
    value: &str,
    kind: SignatureKind,
) -> Result<SignatureAlgorithm, ValidationError> {
    let algorithm = trim_fws(value).parse()?;
    if !kind.allows_algorithm(algorithm) {
        return Err(ValidationError::new("a", ValidationErrorKind::UnsupportedAlgorithm));
    }
    Ok(algorithm)
}

pub(crate) fn parse_base64(name: &str, value: &str) -> Result<Box<[u8]>, ValidationError> {
    parse_base64_tag_value(value)
        .map(Into::into)
        .map_err(|_| ValidationError::new(name, ValidationErrorKind::InvalidBase64))
}

pub(crate) fn parse_domain(value: &str) -> Result<DomainName, ValidationError> {
    DomainName::new(trim_fws(value))
        .map_err(|_| ValidationError::new("d", ValidationErrorKind::InvalidValue))
}

pub(crate) fn parse_selector(value: &str) -> Result<Selector, ValidationError> {
    Selector::new(trim_fws(value))
        .map_err(|_| ValidationError::new("s", ValidationErrorKind::InvalidValue))
}

pub(crate) fn parse_identity(value: &str, domain: &DomainName) -> Result<Identity, ValidationError> {
    let identity = Identity::new(trim_fws(value))
        .map_err(|_| ValidationError::new("i", ValidationErrorKind::InvalidValue))?;
    if !identity.is_within_domain(domain) {
        return Err(ValidationError::new("i", ValidationErrorKind::DomainMismatch));
    }
    Ok(identity)
}

pub(crate) fn parse_instance(value: &str) -> Result<u32, ValidationError> {
    match parse_decimal(trim_fws(value)) {
        Some(n) if (1..=u64::from(MAX_ARC_INSTANCE)).contains(&n) => Ok(n as u32),
        _ => Err(ValidationError::new("i", ValidationErrorKind::InvalidValue)),
    }
}

pub(crate) fn parse_number(name: &str, value: &str) -> Result<u64, ValidationError> {
    parse_decimal(trim_fws(value))
        .ok_or_else(|| ValidationError::new(name, ValidationErrorKind::InvalidNumber))
}

pub(crate) fn parse_signed_headers(value: &str) -> Result<Box<[FieldName]>, ValidationError> {
    let mut names = vec![];
    for name in parse_colon_separated_tag_value(value) {
        let name = FieldName::new(name)
            .map_err(|_| ValidationError::new("h", ValidationErrorKind::InvalidValue))?;
        names.push(name);
    }
    Ok(names.into())
}

pub(crate) fn parse_canonicalization(
    tags: &SignatureTags,
    kind: SignatureKind,
) -> Result<Canonicalization, Error> {
    match tags.get("c") {
        Some(c) => Ok(trim_fws(c).parse()?),
        None => Ok(kind.default_canonicalization()),
    }
}

/// A DKIM signature as encoded in a `DKIM-Signature` header field.
#[derive(Clone, Eq, PartialEq)]
pub struct DkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub signature_data: Box<[u8]>,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,
    /// The `i=` tag; when absent, `@` followed by the signing domain.
    pub identity: Identity,
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
}

impl DkimSignature {
    /// Builds the typed signature from tags. The tags should have passed
    /// [`validate_signature_fields`], which also covers time validity.
    pub fn from_tags(tags: &SignatureTags) -> Result<Self, Error> {
        let kind = SignatureKind::Dkim;

        let algorithm = parse_algorithm(required(tags, "a")?, kind)?;
        let signature_data = parse_base64("b", required(tags, "b")?)?;
        let body_hash = parse_base64("bh", required(tags, "bh")?)?;
        let canonicalization = parse_canonicalization(tags, kind)?;
        let domain = parse_domain(required(tags, "d")?)?;
        let signed_headers = parse_signed_headers(required(tags, "h")?)?;
        let identity = match tags.get("i") {
            Some(i) => parse_identity(i, &domain)?,
            None => Identity::from_domain(domain.clone()),
        };
        let body_length = tags.get("l").map(|l| parse_number("l", l)).transpose()?;
        let selector = parse_selector(required(tags, "s")?)?;
        let timestamp = tags.get("t").map(|t| parse_number("t", t)).transpose()?;
        let expiration = tags.get("x").map(|x| parse_number("x", x)).transpose()?;

        Ok(Self {
            algorithm,
            signature_data,
            body_hash,
            canonicalization,
            domain,
            signed_headers,
            identity,
            body_length,
            selector,
            timestamp,
            expiration,
        })
    }

    /// Parses a `DKIM-Signature` header value, without time validation.
    pub fn parse(value: &str) -> Result<Self, Error> {
        let tags = SignatureTags::parse(value)?;
        Self::from_tags(&tags)
    }
}

impl fmt::Debug for DkimSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkimSignature")
            .field("algorithm", &self.algorithm)
            .field("signature_data", &encode_base64(&self.signature_data))
            .field("body_hash", &encode_base64(&self.body_hash))
            .field("canonicalization", &self.canonicalization)
            .field("domain", &self.domain)
            .field("signed_headers", &self.signed_headers)
            .field("identity", &self.identity)
            .field("body_length", &self.body_length)
            .field("selector", &self.selector)
            .field("timestamp", &self.timestamp)
            .field("expiration", &self.expiration)
            .finish()
    }
}
