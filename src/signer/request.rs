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
    canonicalize::{Canonicalization, CanonicalizationAlgorithm},
    crypto::SigningKey,
    error::Error,
    header::{FieldName, HeaderFields},
    signature::{DomainName, Identity, Selector, SignatureAlgorithm},
};
use std::{collections::HashSet, time::Duration};

/// A generator for the body length limit tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum BodyLength {
    /// Do not limit the body length: no *l=* tag.
    #[default]
    NoLimit,
    /// Sign only the body as presented: set *l=* to the canonicalized body
    /// length.
    MessageContent,
}

/// A generator for the timestamp tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Timestamp {
    #[default]
    Now,
    Exact(u64),
}

/// Selection of headers to include in the h= tag.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum HeaderSelection {
    /// Select the headers present in the default set, see
    /// [`default_sign_headers`].
    #[default]
    Auto,
    /// Use exactly the headers given here as contents of the h= tag.
    Manual(Vec<FieldName>),
}

fn field_names(names: &[&'static str]) -> Vec<FieldName> {
    names
        .iter()
        .filter_map(|&n| FieldName::new(n).ok())
        .collect()
}

/// Returns the collection of headers that should be signed.
///
/// This is the list of the RFC 6376, section 5.4.1 examples, extended with
/// the MIME headers and the other originator and resent fields.
pub fn default_signed_headers() -> Vec<FieldName> {
    field_names(&[
        "From",
        "Sender",
        "Reply-To",
        "Subject",
        "Date",
        "Message-ID",
        "To",
        "Cc",
        "MIME-Version",
        "Content-Type",
        "Content-Transfer-Encoding",
        "Content-ID",
        "Content-Description",
        "Resent-Date",
        "Resent-From",
        "Resent-Sender",
        "Resent-To",
        "Resent-Cc",
        "Resent-Message-ID",
        "In-Reply-To",
        "References",
        "List-Id",
        "List-Help",
        "List-Unsubscribe",
        "List-Subscribe",
        "List-Post",
        "List-Owner",
        "List-Archive",
    ])
}

/// Returns the collection of headers that must not be signed.
pub fn default_unsigned_headers() -> Vec<FieldName> {
    field_names(&[
        "Return-Path",
        "Received",
        "Comments",
        "Keywords",
        "Bcc",
        "Resent-Bcc",
        "DKIM-Signature",
    ])
}

/// Returns the collection of headers that are signed one extra time, so that
/// another instance cannot be added without breaking the signature.
pub fn default_frozen_headers() -> Vec<FieldName> {
    field_names(&["From"])
}

/// Computes the default h= list for some headers.
///
/// The names of all header fields in the signed or frozen set are taken in
/// message order; the names in the frozen set are then appended once more for
/// each of their occurrences.
pub fn default_sign_headers(
    headers: &HeaderFields,
    signed: &[FieldName],
    frozen: &[FieldName],
) -> Vec<FieldName> {
    let signed: HashSet<_> = signed.iter().collect();
    let frozen: HashSet<_> = frozen.iter().collect();

    let mut result: Vec<FieldName> = headers
        .iter()
        .map(|(name, _)| name)
        .filter(|name| signed.contains(name) || frozen.contains(name))
        .cloned()
        .collect();

    let extra: Vec<_> = result
        .iter()
        .filter(|name| frozen.contains(name))
        .cloned()
        .collect();
    result.extend(extra);

    result
}

/// A request for creation of a DKIM signature.
pub struct SignRequest<T> {
    /// The key to use for producing the cryptographic signature.
    pub signing_key: T,

    /// The signature algorithm to use in the *a=* tag. Must be compatible with
    /// the signing key.
    pub algorithm: SignatureAlgorithm,
    /// The canonicalization to use in the *c=* tag.
    pub canonicalization: Canonicalization,
    /// The selection of headers to include in the *h=* tag.
    pub header_selection: HeaderSelection,
    /// The signing domain to use in the *d=* tag.
    pub domain: DomainName,
    /// The agent or user identifier to use in the *i=* tag. When not given,
    /// `@` followed by the signing domain.
    pub identity: Option<Identity>,
    /// The selector to use in the *s=* tag.
    pub selector: Selector,
    /// The strategy to use for generating the *l=* tag.
    pub body_length: BodyLength,
    /// The timestamp value to record in the *t=* tag.
    pub timestamp: Option<Timestamp>,
    /// The duration for which the signature will remain valid (*x=* tag).
    pub valid_duration: Option<Duration>,
    /// Headers that must not appear in the *h=* tag.
    pub unsigned_headers: Vec<FieldName>,
    /// Headers that are signed an extra time when headers are selected
    /// automatically.
    pub frozen_headers: Vec<FieldName>,
}

impl<T> SignRequest<T> {
    pub fn new(
        domain: DomainName,
        selector: Selector,
        algorithm: SignatureAlgorithm,
        signing_key: T,
    ) -> Self {
        Self {
            signing_key,
            algorithm,
            canonicalization: Canonicalization::new(
                CanonicalizationAlgorithm::Relaxed,
                CanonicalizationAlgorithm::Simple,
            ),
            header_selection: HeaderSelection::Auto,
            domain,
            identity: None,
            selector,
            body_length: BodyLength::NoLimit,
            timestamp: Some(Timestamp::Now),
            valid_duration: None,
            unsigned_headers: default_unsigned_headers(),
            frozen_headers: default_frozen_headers(),
        }
    }
}

/// Checks a request for consistency and returns the names for the h= tag.
pub fn validate_request<T: AsRef<SigningKey>>(
    request: &SignRequest<T>,
    headers: &HeaderFields,
) -> Result<Vec<FieldName>, Error> {
    if request.signing_key.as_ref().key_type() != request.algorithm.key_type() {
        return Err(Error::parameter("signing key does not match signature algorithm"));
    }

    if let Some(duration) = request.valid_duration {
        if duration.as_secs() == 0 {
            return Err(Error::parameter("zero validity duration"));
        }
    }

    if let Some(identity) = &request.identity {
        if !identity.is_within_domain(&request.domain) {
            return Err(Error::parameter("identity not in signing domain"));
        }
    }

    let signed_headers = match &request.header_selection {
        HeaderSelection::Auto => {
            default_sign_headers(headers, &default_signed_headers(), &request.frozen_headers)
        }
        HeaderSelection::Manual(names) => names.clone(),
    };

    check_signed_headers(&signed_headers, &request.unsigned_headers)?;

    Ok(signed_headers)
}

/// Checks that a list of names to sign includes `From` and none of the
/// headers that must not be signed.
pub fn check_signed_headers(
    signed_headers: &[FieldName],
    unsigned_headers: &[FieldName],
) -> Result<(), Error> {
    if !signed_headers.iter().any(|name| *name == "From") {
        return Err(Error::parameter("From header not signed"));
    }

    let forbidden: Vec<_> = signed_headers
        .iter()
        .filter(|name| unsigned_headers.contains(*name))
        .map(|name| name.as_ref())
        .collect();
    if !forbidden.is_empty() {
        return Err(Error::parameter(format!(
            "the following headers should not be signed: {}",
            forbidden.join(", ")
        )));
    }

    // names containing ; cannot be expressed in the h= tag
    if signed_headers.iter().any(|name| name.as_ref().contains(';')) {
        return Err(Error::parameter("invalid signed header name"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn names(names: &[&'static str]) -> Vec<FieldName> {
        field_names(names)
    }

    #[test]
    fn default_sign_headers_freezes_from() {
        let headers: HeaderFields = "\
Received: from a\n\
From: me@example.com\n\
To: you@example.org\n\
X-Mailer: x\n\
Subject: hi\n"
            .parse()
            .unwrap();

        let signed = default_sign_headers(&headers, &default_signed_headers(), &default_frozen_headers());

        assert_eq!(signed, names(&["From", "To", "Subject", "From"]));
    }

    #[test]
    fn check_signed_headers_rejects_should_not() {
        let e = check_signed_headers(&names(&["From", "Received"]), &default_unsigned_headers())
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Parameter);

        let e = check_signed_headers(&names(&["To", "Subject"]), &default_unsigned_headers())
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Parameter);

        assert!(check_signed_headers(&names(&["from", "to"]), &default_unsigned_headers()).is_ok());
    }
}
