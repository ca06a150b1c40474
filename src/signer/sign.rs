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
    canonicalize,
    crypto::{self, HashAlgorithm, SigningKey},
    error::Error,
    header::{FieldName, HeaderFields},
    message_hash::{self, BodyHashError, BodyHashResult},
    signature::{
        encoded_base64_len, fold_header_value, format_signed_headers, DkimSignature, Identity,
        DKIM_SIGNATURE_NAME,
    },
    signer::{BodyLength, SignRequest, SignedHeader, SigningResult, Timestamp},
    tag_list::{remove_b_tag_value, SignatureTags},
    util::{encode_base64, CanonicalStr},
};
use std::time::SystemTime;
use tracing::trace;

pub fn perform_signing<T>(
    request: SignRequest<T>,
    headers: &HeaderFields,
    signed_headers: Vec<FieldName>,
    body_hash_result: BodyHashResult,
) -> Result<SigningResult, Error>
where
    T: AsRef<SigningKey>,
{
    let algorithm = request.algorithm;
    let canonicalization = request.canonicalization;

    let (body_hash, final_len) =
        body_hash_result.map_err(|e: BodyHashError| Error::Internal(e.to_string().into()))?;

    let body_length = match request.body_length {
        BodyLength::NoLimit => None,
        BodyLength::MessageContent => Some(final_len),
    };

    let timestamp = request.timestamp.map(|timestamp| match timestamp {
        Timestamp::Now => now_unix_secs(),
        Timestamp::Exact(t) => t,
    });

    let expiration = request.valid_duration.map(|duration| {
        timestamp
            .unwrap_or_else(now_unix_secs)
            .saturating_add(duration.as_secs())
    });

    let identity = request
        .identity
        .unwrap_or_else(|| Identity::from_domain(request.domain.clone()));

    let mut tags = SignatureTags::new();
    tags.set("v", "1");
    tags.set("a", algorithm.canonical_str());
    tags.set("c", canonicalization.canonical_str());
    tags.set("d", request.domain.as_ref());
    tags.set("i", identity.to_string());
    if let Some(len) = body_length {
        tags.set("l", len.to_string());
    }
    tags.set("q", "dns/txt");
    tags.set("s", request.selector.as_ref());
    if let Some(t) = timestamp {
        tags.set("t", t.to_string());
    }
    if let Some(x) = expiration {
        tags.set("x", x.to_string());
    }
    tags.set("h", format_signed_headers(&signed_headers));
    tags.set("bh", encode_base64(&body_hash));

    let hash_alg = algorithm.hash_algorithm();
    let selected = canonicalize::select_headers(headers, &signed_headers);

    let (header, signature_data) = produce_signed_header(
        DKIM_SIGNATURE_NAME,
        tags,
        request.signing_key.as_ref(),
        hash_alg,
        |value| {
            message_hash::compute_data_hash(
                hash_alg,
                canonicalization.header,
                &selected,
                canonicalization.header,
                DKIM_SIGNATURE_NAME,
                value,
            )
        },
    )?;

    trace!(domain = %request.domain, selector = %request.selector, "created DKIM signature");

    let signature = DkimSignature {
        algorithm,
        signature_data,
        body_hash,
        canonicalization,
        domain: request.domain,
        signed_headers: signed_headers.into(),
        identity,
        body_length: body_length.map(|n| n as u64),
        selector: request.selector,
        timestamp,
        expiration,
    };

    Ok(SigningResult { header, signature })
}

/// Signs a signature header given as tags without `b=`.
///
/// The header is folded with a placeholder `b=` value of the exact final
/// length, and `compute_hash` receives that header value with the `b=` value
/// removed. Since folding only breaks at spaces or at fixed columns, the
/// final header is identical up to the `b=` value.
pub(crate) fn produce_signed_header<F>(
    header_name: &'static str,
    mut tags: SignatureTags,
    signing_key: &SigningKey,
    hash_alg: HashAlgorithm,
    compute_hash: F,
) -> Result<(SignedHeader, Box<[u8]>), Error>
where
    F: FnOnce(&str) -> Box<[u8]>,
{
    debug_assert!(!tags.contains("b"));

    let b_len = encoded_base64_len(signing_key.signature_length());
    tags.set("b", "0".repeat(b_len));

    let value = format!(" {}", fold_header_value(&tags.serialize(), header_name.len()));

    let data_hash = compute_hash(&remove_b_tag_value(&value));

    let signature_data = sign_hash(signing_key, hash_alg, &data_hash)?;

    tags.set("b", encode_base64(&signature_data));

    let value = format!(" {}", fold_header_value(&tags.serialize(), header_name.len()));

    Ok((
        SignedHeader {
            name: header_name,
            value,
        },
        signature_data.into(),
    ))
}

fn sign_hash(
    signing_key: &SigningKey,
    hash_alg: HashAlgorithm,
    data_hash: &[u8],
) -> Result<Vec<u8>, Error> {
    match crypto::sign(signing_key, hash_alg, data_hash) {
        Ok(s) => {
            trace!(key_type = %signing_key.key_type(), "signing successful");
            Ok(s)
        }
        Err(e) => {
            trace!(key_type = %signing_key.key_type(), "signing failed: {e}");
            Err(e.into())
        }
    }
}

pub(crate) fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |t| t.as_secs())
}
