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

//! Errors reported by signing and verification.

use crate::{
    canonicalize::InvalidCanonicalizationPolicy,
    crypto::SigningError,
    header::HeaderFieldError,
    record::DkimKeyRecordParseError,
    tag_list::TagListParseError,
};
use std::{
    error::Error as StdError,
    fmt::{self, Display, Formatter},
};

/// The kind of an error, without details.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    MessageFormat,
    KeyFormat,
    Validation,
    Parameter,
    InvalidCanonicalizationPolicy,
    InvalidTagValueList,
    UnknownKeyType,
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageFormat => write!(f, "message format error"),
            Self::KeyFormat => write!(f, "key format error"),
            Self::Validation => write!(f, "validation error"),
            Self::Parameter => write!(f, "parameter error"),
            Self::InvalidCanonicalizationPolicy => write!(f, "invalid canonicalization policy"),
            Self::InvalidTagValueList => write!(f, "invalid tag-value list"),
            Self::UnknownKeyType => write!(f, "unknown key type"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

/// An error that makes a single signing or verification operation fail.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    MessageFormat(Box<str>),
    KeyFormat(KeyFormatError),
    Validation(ValidationError),
    Parameter(Box<str>),
    InvalidCanonicalizationPolicy(InvalidCanonicalizationPolicy),
    InvalidTagValueList(TagListParseError),
    UnknownKeyType(Box<str>),
    Internal(Box<str>),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MessageFormat(_) => ErrorKind::MessageFormat,
            Self::KeyFormat(_) => ErrorKind::KeyFormat,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Parameter(_) => ErrorKind::Parameter,
            Self::InvalidCanonicalizationPolicy(_) => ErrorKind::InvalidCanonicalizationPolicy,
            Self::InvalidTagValueList(_) => ErrorKind::InvalidTagValueList,
            Self::UnknownKeyType(_) => ErrorKind::UnknownKeyType,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn message_format(msg: impl Into<Box<str>>) -> Self {
        Self::MessageFormat(msg.into())
    }

    pub fn parameter(msg: impl Into<Box<str>>) -> Self {
        Self::Parameter(msg.into())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageFormat(msg) => write!(f, "message format error: {msg}"),
            Self::KeyFormat(e) => write!(f, "key format error: {e}"),
            Self::Validation(e) => write!(f, "validation error: {e}"),
            Self::Parameter(msg) => write!(f, "parameter error: {msg}"),
            Self::InvalidCanonicalizationPolicy(e) => write!(f, "{e}"),
            Self::InvalidTagValueList(e) => write!(f, "invalid tag-value list: {e}"),
            Self::UnknownKeyType(k) => write!(f, "unknown key type: {k}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::KeyFormat(e) => Some(e),
            Self::Validation(e) => Some(e),
            Self::InvalidCanonicalizationPolicy(e) => Some(e),
            Self::InvalidTagValueList(e) => Some(e),
            _ => None,
        }
    }
}

impl From<KeyFormatError> for Error {
    fn from(error: KeyFormatError) -> Self {
        match error {
            KeyFormatError::UnknownKeyType(k) => Self::UnknownKeyType(k),
            error => Self::KeyFormat(error),
        }
    }
}

impl From<ValidationError> for Error {
    fn from(error: ValidationError) -> Self {
        Self::Validation(error)
    }
}

impl From<TagListParseError> for Error {
    fn from(error: TagListParseError) -> Self {
        Self::InvalidTagValueList(error)
    }
}

impl From<InvalidCanonicalizationPolicy> for Error {
    fn from(error: InvalidCanonicalizationPolicy) -> Self {
        Self::InvalidCanonicalizationPolicy(error)
    }
}

impl From<HeaderFieldError> for Error {
    fn from(error: HeaderFieldError) -> Self {
        Self::MessageFormat(error.to_string().into())
    }
}

impl From<SigningError> for Error {
    fn from(error: SigningError) -> Self {
        Self::Internal(error.to_string().into())
    }
}

/// An error concerning a public or private key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyFormatError {
    NoKeyFound,
    LookupTimeout,
    LookupFailure,
    InvalidKeyDomain,
    RecordSyntax(DkimKeyRecordParseError),
    KeyRevoked,
    InvalidKey,
    InvalidPrivateKey,
    KeyTooSmall(usize),
    KeyTypeMismatch,
    UnknownKeyType(Box<str>),
    UnsupportedKeyType,
    DisallowedHashAlgorithm,
    DisallowedServiceType,
    DomainMismatch,
}

impl Display for KeyFormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoKeyFound => write!(f, "no key found"),
            Self::LookupTimeout => write!(f, "key lookup timed out"),
            Self::LookupFailure => write!(f, "key lookup failed"),
            Self::InvalidKeyDomain => write!(f, "invalid key domain"),
            Self::RecordSyntax(e) => write!(f, "invalid key record: {e}"),
            Self::KeyRevoked => write!(f, "key revoked"),
            Self::InvalidKey => write!(f, "invalid key data"),
            Self::InvalidPrivateKey => write!(f, "invalid private key"),
            Self::KeyTooSmall(bits) => write!(f, "key too small ({bits} bits)"),
            Self::KeyTypeMismatch => write!(f, "key type does not match algorithm"),
            Self::UnknownKeyType(k) => write!(f, "unknown key type {k}"),
            Self::UnsupportedKeyType => write!(f, "unsupported key type"),
            Self::DisallowedHashAlgorithm => write!(f, "hash algorithm not allowed by key"),
            Self::DisallowedServiceType => write!(f, "key not valid for email"),
            Self::DomainMismatch => write!(f, "key does not allow subdomain identity"),
        }
    }
}

impl StdError for KeyFormatError {}

/// The semantic problem found in a tag value.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ValidationErrorKind {
    MissingTag,
    TagNotPermitted,
    UnsupportedVersion,
    UnsupportedAlgorithm,
    UnsupportedQueryMethod,
    InvalidBase64,
    InvalidNumber,
    InvalidValue,
    DomainMismatch,
    FromHeaderNotSigned,
    RequiredHeaderNotSigned,
    TimestampInFuture,
    SignatureExpired,
    ExpirationNotAfterTimestamp,
    BodyHashMismatch,
    BodyLengthExceeded,
}

impl Display for ValidationErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTag => write!(f, "tag missing"),
            Self::TagNotPermitted => write!(f, "tag not permitted"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::UnsupportedAlgorithm => write!(f, "unsupported algorithm"),
            Self::UnsupportedQueryMethod => write!(f, "unsupported query method"),
            Self::InvalidBase64 => write!(f, "invalid Base64 value"),
            Self::InvalidNumber => write!(f, "not a decimal number"),
            Self::InvalidValue => write!(f, "invalid value"),
            Self::DomainMismatch => write!(f, "domain mismatch"),
            Self::FromHeaderNotSigned => write!(f, "From header not signed"),
            Self::RequiredHeaderNotSigned => write!(f, "required header not signed"),
            Self::TimestampInFuture => write!(f, "timestamp in the future"),
            Self::SignatureExpired => write!(f, "signature expired"),
            Self::ExpirationNotAfterTimestamp => write!(f, "expiration not after timestamp"),
            Self::BodyHashMismatch => write!(f, "body hash mismatch"),
            Self::BodyLengthExceeded => write!(f, "body length exceeds body"),
        }
    }
}

/// An error in the value of a signature tag, naming the offending tag.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ValidationError {
    pub tag: Box<str>,
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(tag: impl Into<Box<str>>, kind: ValidationErrorKind) -> Self {
        Self {
            tag: tag.into(),
            kind,
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}= {}", self.tag, self.kind)
    }
}

impl StdError for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        let e = Error::from(ValidationError::new("bh", ValidationErrorKind::BodyHashMismatch));
        assert_eq!(e.kind(), ErrorKind::Validation);
        assert_eq!(e.to_string(), "validation error: bh= body hash mismatch");

        let e = Error::from(KeyFormatError::UnknownKeyType("dsa".into()));
        assert_eq!(e.kind(), ErrorKind::UnknownKeyType);

        let e = Error::from(KeyFormatError::KeyTooSmall(512));
        assert_eq!(e.kind(), ErrorKind::KeyFormat);
        assert_eq!(e.to_string(), "key format error: key too small (512 bits)");

        let e = Error::from(TagListParseError::DuplicateTag);
        assert_eq!(e.kind(), ErrorKind::InvalidTagValueList);
    }
}
