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


use super::ChainValidationStatus;
use crate::{
    canonicalize::Canonicalization,
    error::Error,
    header::FieldName,
    parse::trim_fws,
    signature::{
        parse_algorithm, parse_base64, parse_canonicalization, parse_domain, parse_instance,
        parse_number, parse_selector, parse_signed_headers, required, DomainName, Selector,
        SignatureAlgorithm, SignatureKind,
    },
    tag_list::SignatureTags,
};

/// An *ARC-Message-Signature*: a DKIM-like signature over the message as the
/// sealer received it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArcMessageSignature {
    pub instance: u32,
    pub algorithm: SignatureAlgorithm,
    pub signature_data: Box<[u8]>,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,
    pub selector: Selector,
    pub body_length: Option<u64>,
    pub timestamp: Option<u64>,
}

impl ArcMessageSignature {
    pub fn from_tags(tags: &SignatureTags) -> Result<Self, Error> {
        let kind = SignatureKind::ArcMessageSignature;

        Ok(Self {
            instance: parse_instance(required(tags, "i")?)?,
            algorithm: parse_algorithm(required(tags, "a")?, kind)?,
            signature_data: parse_base64("b", required(tags, "b")?)?,
            body_hash: parse_base64("bh", required(tags, "bh")?)?,
            canonicalization: parse_canonicalization(tags, kind)?,
            domain: parse_domain(required(tags, "d")?)?,
            signed_headers: parse_signed_headers(required(tags, "h")?)?,
            selector: parse_selector(required(tags, "s")?)?,
            body_length: tags.get("l").map(|l| parse_number("l", l)).transpose()?,
            timestamp: tags.get("t").map(|t| parse_number("t", t)).transpose()?,
        })
    }
}

/// An *ARC-Seal*: a signature over the ARC header fields of the chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArcSeal {
    pub instance: u32,
    pub algorithm: SignatureAlgorithm,
    pub signature_data: Box<[u8]>,
    pub chain_validation_status: ChainValidationStatus,
    pub domain: DomainName,
    pub selector: Selector,
    pub timestamp: Option<u64>,
}

impl ArcSeal {
    pub fn from_tags(tags: &SignatureTags) -> Result<Self, Error> {
        let kind = SignatureKind::ArcSeal;

        Ok(Self {
            instance: parse_instance(required(tags, "i")?)?,
            algorithm: parse_algorithm(required(tags, "a")?, kind)?,
            signature_data: parse_base64("b", required(tags, "b")?)?,
            chain_validation_status: trim_fws(required(tags, "cv")?).parse()?,
            domain: parse_domain(required(tags, "d")?)?,
            selector: parse_selector(required(tags, "s")?)?,
            timestamp: tags.get("t").map(|t| parse_number("t", t)).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonicalize::CanonicalizationAlgorithm;

    #[test]
    fn message_signature_defaults_to_relaxed() {
        let tags = SignatureTags::parse(
            "i=2; a=rsa-sha256; d=example.org; s=arc; h=From:To; bh=YWJj; b=YWJj",
        )
        .unwrap();

        let ams = ArcMessageSignature::from_tags(&tags).unwrap();

        assert_eq!(ams.instance, 2);
        assert_eq!(
            ams.canonicalization,
            Canonicalization::new(
                CanonicalizationAlgorithm::Relaxed,
                CanonicalizationAlgorithm::Relaxed
            )
        );
        assert_eq!(ams.signed_headers.len(), 2);
    }

    #[test]
    fn seal_chain_validation_status() {
        let tags = SignatureTags::parse(
            "i=1; a=ed25519-sha256; cv=None; d=example.org; s=arc; b=YWJj",
        )
        .unwrap();

        let seal = ArcSeal::from_tags(&tags).unwrap();

        assert_eq!(seal.chain_validation_status, ChainValidationStatus::None);
        assert_eq!(seal.timestamp, None);
    }

    #[test]
    fn seal_rejects_sha1() {
        let tags =
            SignatureTags::parse("i=1; a=rsa-sha1; cv=none; d=example.org; s=arc; b=YWJj").unwrap();

        assert!(ArcSeal::from_tags(&tags).is_err());
    }
}
