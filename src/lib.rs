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


//! A library implementing *DomainKeys Identified Mail* (DKIM) signing and
//! verification as described in [RFC 6376], together with validation and
//! sealing of *Authenticated Received Chains* (ARC) as described in
//! [RFC 8617].
//!
//! The high-level API can be used to sign email messages using DKIM signatures
//! (module `signer`), to verify such signatures attached to email messages
//! (module `verifier`), and to validate and extend ARC chains (module `arc`).
//! For convenience, the relevant items are re-exported at the top level.
//!
//! The low-level building blocks are available in the additional modules:
//! canonicalization, tag lists, signature headers, key records, cryptography,
//! and hashing of message data.
//!
//! # Usage
//!
//! The types [`Signer`] and [`Verifier`] provide the staged entry points to
//! signing and verifying with viaseal; [`sign`], [`verify`],
//! [`verify_chain`], and [`seal`] process a complete message at once.
//!
//! Public key records are looked up through the [`LookupTxt`] trait, which
//! callers implement on top of a DNS resolver of their choice.
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376
//! [RFC 8617]: https://www.rfc-editor.org/rfc/rfc8617

pub mod arc;
pub mod canonicalize;
pub mod crypto;
pub mod error;
pub mod header;
pub mod message_hash;
mod parse;
pub mod record;
pub mod signature;
pub mod signer;
pub mod tag_list;
mod util;
pub mod verifier;

pub use crate::{
    arc::{seal, verify_chain, ArcVerificationResult, ChainValidationStatus, SealRequest},
    crypto::SigningKey,
    error::{Error, ErrorKind, KeyFormatError, ValidationError, ValidationErrorKind},
    header::{parse_message, FieldBody, FieldName, HeaderField, HeaderFields},
    signature::{DkimSignature, DomainName, Identity, Selector, SignatureAlgorithm},
    signer::{sign, SignRequest, SignedHeader, Signer, SigningResult},
    util::{decode_base64, encode_base64, Base64Error, CanonicalStr},
    verifier::{
        verify, Config, LookupTxt, VerificationOutcome, VerificationResult, VerificationStatus,
        Verifier,
    },
};
