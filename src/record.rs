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

//! DKIM public key records.
//!
//! Both DKIM signatures and ARC signatures locate their public key in a DNS
//! TXT record at `<selector>._domainkey.<domain>`, in this format.

use crate::{
    crypto::{HashAlgorithm, KeyType, VerifyingKey},
    error::KeyFormatError,
    tag_list::{parse_base64_tag_value, parse_colon_separated_tag_value, TagList, TagSpec},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceType {
    Any,
    Email,
    Tlsrpt,
    Other(Box<str>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Flags {
    Testing,
    NoSubdomains,
    Other(Box<str>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DkimKeyRecordParseError {
    RecordSyntax,  // fundamental syntax errors such as DNS record format or invalid UTF-8 data
    InvalidBase64,
    TagListSyntax,
    UnsupportedVersion,
    MisplacedVersionTag,
    UnknownKeyType(Box<str>),
    NoSupportedHashAlgorithms,
    RevokedKey,
    MissingKeyTag,
    ServiceTypesEmpty,
}

impl Display for DkimKeyRecordParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordSyntax => write!(f, "ill-formed key record"),
            Self::InvalidBase64 => write!(f, "invalid Base64 string"),
            Self::TagListSyntax => write!(f, "invalid tag-list"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::MisplacedVersionTag => write!(f, "v= tag not initial"),
            Self::UnknownKeyType(k) => write!(f, "unknown key type {k}"),
            Self::NoSupportedHashAlgorithms => write!(f, "no supported hash algorithms"),
            Self::RevokedKey => write!(f, "key revoked"),
            Self::MissingKeyTag => write!(f, "p= tag missing"),
            Self::ServiceTypesEmpty => write!(f, "service types empty"),
        }
    }
}

impl Error for DkimKeyRecordParseError {}

impl From<DkimKeyRecordParseError> for KeyFormatError {
    fn from(error: DkimKeyRecordParseError) -> Self {
        match error {
            DkimKeyRecordParseError::RevokedKey => Self::KeyRevoked,
            DkimKeyRecordParseError::UnknownKeyType(k) => Self::UnknownKeyType(k),
            error => Self::RecordSyntax(error),
        }
    }
}

/// A key record as published in DNS.
#[derive(Debug, PartialEq, Eq)]
pub struct DkimKeyRecord {
    pub hash_algorithms: Box<[HashAlgorithm]>,  // non-empty
    pub key_type: KeyType,
    pub notes: Option<Box<str>>,
    pub key_data: Box<[u8]>,
    pub service_types: Box<[ServiceType]>,  // non-empty
    pub flags: Box<[Flags]>,
}

impl DkimKeyRecord {
    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, DkimKeyRecordParseError> {
        let mut hash_algorithms = HashAlgorithm::all();
        let mut key_type = KeyType::Rsa;
        let mut notes = None;
        let mut key_data = None;
        let mut service_types = vec![ServiceType::Any];
        let mut flags = vec![];

        for (i, &TagSpec { name, value }) in tag_list.as_ref().iter().enumerate() {
            match name {
                "v" => {
                    if i != 0 {
                        return Err(DkimKeyRecordParseError::MisplacedVersionTag);
                    }
                    if value != "DKIM1" {
                        return Err(DkimKeyRecordParseError::UnsupportedVersion);
                    }
                }
                "h" => {
                    hash_algorithms.clear();

                    for s in parse_colon_separated_tag_value(value) {
                        if let Ok(alg) = HashAlgorithm::from_str(s) {
                            hash_algorithms.push(alg);
                        }
                    }

                    if hash_algorithms.is_empty() {
                        return Err(DkimKeyRecordParseError::NoSupportedHashAlgorithms);
                    }
                }
                "k" => {
                    if value.eq_ignore_ascii_case("ed25519") {
                        key_type = KeyType::Ed25519;
                    } else if value.eq_ignore_ascii_case("rsa") {
                        key_type = KeyType::Rsa;
                    } else {
                        return Err(DkimKeyRecordParseError::UnknownKeyType(value.into()));
                    }
                }
                "n" => {
                    notes = Some(value.into());
                }
                "p" => {
                    if value.is_empty() {
                        return Err(DkimKeyRecordParseError::RevokedKey);
                    }

                    let s = parse_base64_tag_value(value)
                        .map_err(|_| DkimKeyRecordParseError::InvalidBase64)?;

                    key_data = Some(s.into());
                }
                "s" => {
                    let mut st = vec![];

                    for s in parse_colon_separated_tag_value(value) {
                        if s.is_empty() {
                            continue;
                        }
                        if s == "*" {
                            st.push(ServiceType::Any);
                        } else if s.eq_ignore_ascii_case("email") {
                            st.push(ServiceType::Email);
                        } else if s.eq_ignore_ascii_case("tlsrpt") {
                            st.push(ServiceType::Tlsrpt);
                        } else {
                            st.push(ServiceType::Other(s.into()));
                        }
                    }

                    if st.is_empty() {
                        return Err(DkimKeyRecordParseError::ServiceTypesEmpty);
                    }

                    service_types = st;
                }
                "t" => {
                    let mut fs = vec![];

                    for s in parse_colon_separated_tag_value(value) {
                        if s.eq_ignore_ascii_case("y") {
                            fs.push(Flags::Testing);
                        } else if s.eq_ignore_ascii_case("s") {
                            fs.push(Flags::NoSubdomains);
                        } else if !s.is_empty() {
                            fs.push(Flags::Other(s.into()));
                        }
                    }

                    flags = fs;
                }
                // §3.6.1: ‘Other tags MAY be present and MUST be ignored by any
                // implementation that does not understand them.’
                _ => {}
            }
        }

        let key_data = key_data.ok_or(DkimKeyRecordParseError::MissingKeyTag)?;

        Ok(Self {
            hash_algorithms: hash_algorithms.into(),
            key_type,
            notes,
            key_data,
            service_types: service_types.into(),
            flags: flags.into(),
        })
    }
}

impl FromStr for DkimKeyRecord {
    type Err = DkimKeyRecordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list = match TagList::from_str(s) {
            Ok(r) => r,
            Err(_e) => {
                return Err(DkimKeyRecordParseError::TagListSyntax);
            }
        };

        Self::from_tag_list(&tag_list)
    }
}

/// A usable public key, together with the policy from its key record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyRecord {
    pub key: VerifyingKey,
    pub key_size: usize,
    pub hash_algorithms: Box<[HashAlgorithm]>,
    pub service_types: Box<[ServiceType]>,
    pub flags: Box<[Flags]>,
}

impl PublicKeyRecord {
    pub fn from_key_record(record: &DkimKeyRecord) -> Result<Self, KeyFormatError> {
        let key = VerifyingKey::from_key_data(record.key_type, &record.key_data)
            .map_err(|_| KeyFormatError::InvalidKey)?;

        Ok(Self {
            key_size: key.key_size(),
            key,
            hash_algorithms: record.hash_algorithms.clone(),
            service_types: record.service_types.clone(),
            flags: record.flags.clone(),
        })
    }

    pub fn key_type(&self) -> KeyType {
        self.key.key_type()
    }

    /// Whether the key may be used for email signatures.
    pub fn allows_email(&self) -> bool {
        self.service_types
            .iter()
            .any(|s| matches!(s, ServiceType::Any | ServiceType::Email))
    }

    pub fn allows_hash_algorithm(&self, hash_alg: HashAlgorithm) -> bool {
        self.hash_algorithms.contains(&hash_alg)
    }

    pub fn is_testing(&self) -> bool {
        self.flags.contains(&Flags::Testing)
    }

    pub fn forbids_subdomains(&self) -> bool {
        self.flags.contains(&Flags::NoSubdomains)
    }
}

impl FromStr for PublicKeyRecord {
    type Err = KeyFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let record = DkimKeyRecord::from_str(s)?;
        Self::from_key_record(&record)
    }
}
