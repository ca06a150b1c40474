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

//! Computation of the body hash and the header data hash.

use crate::{
    canonicalize::{self, BodyCanonicalizer, CanonicalizationAlgorithm},
    crypto::{self, CountingHasher, HashAlgorithm, HashStatus, InsufficientInput},
    header::HeaderField,
    parse::trim_fws_end,
};
use std::{
    collections::{HashMap, HashSet},
    error::Error,
    fmt::{self, Display, Formatter},
};

/// Computes the hash of the header data: the selected header fields followed
/// by the signature header field itself.
///
/// The signature header value must already have its `b=` value removed. It is
/// hashed without trailing whitespace or line break, whatever the
/// canonicalization.
pub fn compute_data_hash(
    hash_alg: HashAlgorithm,
    canon_alg: CanonicalizationAlgorithm,
    selected_headers: &[&HeaderField],
    sig_canon_alg: CanonicalizationAlgorithm,
    sig_header_name: &str,
    sig_header_value_without_b: &str,
) -> Box<[u8]> {
    let cheaders = canonicalize::canonicalize_selected_headers(canon_alg, selected_headers);

    let mut csig = Vec::with_capacity(sig_header_name.len() + sig_header_value_without_b.len() + 1);
    canonicalize::canonicalize_header(
        &mut csig,
        sig_canon_alg,
        sig_header_name,
        sig_header_value_without_b,
    );

    tracing::trace!(
        "canonicalized signature header: {:?}",
        bstr::BStr::new(trim_fws_end(&csig))
    );

    crypto::digest_slices(hash_alg, [&cheaders[..], trim_fws_end(&csig)])
}

/// Computes the hash of a complete body, optionally limited to the first
/// `length` bytes of canonicalized body.
pub fn body_hash(
    canon_alg: CanonicalizationAlgorithm,
    hash_alg: HashAlgorithm,
    body: &[u8],
    length: Option<usize>,
) -> BodyHashResult {
    let key = (length, hash_alg, canon_alg);

    let mut hasher = BodyHasherBuilder::new();
    hasher.register_canonicalization(length, hash_alg, canon_alg);
    let mut hasher = hasher.build();

    let _ = hasher.hash_chunk(body);

    hasher.finish().take(&key)
}

/// The stance of a body hasher regarding additional body content.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[must_use]
pub enum BodyHasherStance {
    /// More input may change some result.
    Interested,
    /// All registered hashers have consumed as much input as they need.
    Done,
}

pub type BodyHasherKey = (Option<usize>, HashAlgorithm, CanonicalizationAlgorithm);

#[derive(Clone, Default)]
pub struct BodyHasherBuilder {
    registrations: HashSet<BodyHasherKey>,
}

impl BodyHasherBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register_canonicalization(
        &mut self,
        len: Option<usize>,
        alg: HashAlgorithm,
        canon: CanonicalizationAlgorithm,
    ) {
        self.registrations.insert((len, alg, canon));
    }

    pub fn build(self) -> BodyHasher {
        use CanonicalizationAlgorithm::*;

        let hashers = self
            .registrations
            .into_iter()
            .map(|key @ (len, alg, _)| (key, CountingHasher::new(alg, len)))
            .collect();

        BodyHasher {
            hashers,
            canonicalizer_simple: BodyCanonicalizer::new(Simple),
            canonicalizer_relaxed: BodyCanonicalizer::new(Relaxed),
        }
    }
}

/// A producer of body hash results.
///
/// The body hasher canonicalises chunks of the message body once per
/// canonicalization algorithm and feeds them to every registered hasher, so
/// that several signatures with the same body parameters share the work.
pub struct BodyHasher {
    hashers: HashMap<BodyHasherKey, CountingHasher>,
    canonicalizer_simple: BodyCanonicalizer,
    canonicalizer_relaxed: BodyCanonicalizer,
}

impl BodyHasher {
    pub fn hash_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        let mut canonicalized_chunk_simple = None;
        let mut canonicalized_chunk_relaxed = None;

        let mut all_done = true;

        for ((_, _, canon), hasher) in self.hashers.iter_mut().filter(|(_, h)| !h.is_done()) {
            let canonicalized_chunk = match canon {
                CanonicalizationAlgorithm::Simple => canonicalized_chunk_simple
                    .get_or_insert_with(|| self.canonicalizer_simple.canon_chunk(chunk)),
                CanonicalizationAlgorithm::Relaxed => canonicalized_chunk_relaxed
                    .get_or_insert_with(|| self.canonicalizer_relaxed.canon_chunk(chunk)),
            };

            if let HashStatus::AllConsumed = hasher.update(canonicalized_chunk) {
                if !hasher.is_done() {
                    all_done = false;
                }
            }
        }

        if all_done {
            BodyHasherStance::Done
        } else {
            BodyHasherStance::Interested
        }
    }

    pub fn finish(self) -> BodyHashResults {
        let tail_simple = self.canonicalizer_simple.finish_canon();
        let tail_relaxed = self.canonicalizer_relaxed.finish_canon();

        let results = self
            .hashers
            .into_iter()
            .map(|(key @ (_, _, canon), mut hasher)| {
                if !hasher.is_done() {
                    let _ = hasher.update(match canon {
                        CanonicalizationAlgorithm::Simple => &tail_simple[..],
                        CanonicalizationAlgorithm::Relaxed => &tail_relaxed[..],
                    });
                }
                let result = hasher
                    .finish()
                    .map_err(|InsufficientInput| BodyHashError::InsufficientInput);
                (key, result)
            })
            .collect();

        BodyHashResults { results }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BodyHashError {
    /// The canonicalized body is shorter than the requested length.
    InsufficientInput,
    /// No hasher was registered for the key.
    NotRegistered,
}

impl Display for BodyHashError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientInput => write!(f, "body shorter than body length limit"),
            Self::NotRegistered => write!(f, "no body hash computed for these parameters"),
        }
    }
}

impl Error for BodyHashError {}

/// A body hash and the number of canonicalized body bytes it covers.
pub type BodyHashResult = Result<(Box<[u8]>, usize), BodyHashError>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BodyHashResults {
    results: HashMap<BodyHasherKey, BodyHashResult>,
}

impl BodyHashResults {
    pub fn get(&self, key: &BodyHasherKey) -> BodyHashResult {
        self.results
            .get(key)
            .cloned()
            .unwrap_or(Err(BodyHashError::NotRegistered))
    }

    fn take(mut self, key: &BodyHasherKey) -> BodyHashResult {
        self.results
            .remove(key)
            .unwrap_or(Err(BodyHashError::NotRegistered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{header::HeaderFields, util};
    use sha2::{Digest, Sha256};

    fn sha256_digest(msg: &[u8]) -> Box<[u8]> {
        crypto::digest_slices(HashAlgorithm::Sha256, [msg])
    }

    #[test]
    fn body_hasher_simple_and_relaxed() {
        use CanonicalizationAlgorithm::*;

        let mut hasher = BodyHasherBuilder::new();
        hasher.register_canonicalization(None, HashAlgorithm::Sha256, Simple);
        hasher.register_canonicalization(None, HashAlgorithm::Sha256, Relaxed);
        let mut hasher = hasher.build();

        assert_eq!(hasher.hash_chunk(b"abc \r\n"), BodyHasherStance::Interested);

        let results = hasher.finish();

        let (hash, len) = results.get(&(None, HashAlgorithm::Sha256, Simple)).unwrap();
        assert_eq!(len, 6);
        assert_eq!(hash, sha256_digest(b"abc \r\n"));
        let (hash, len) = results.get(&(None, HashAlgorithm::Sha256, Relaxed)).unwrap();
        assert_eq!(len, 5);
        assert_eq!(hash, sha256_digest(b"abc\r\n"));

        assert_eq!(
            results.get(&(None, HashAlgorithm::Sha1, Simple)),
            Err(BodyHashError::NotRegistered)
        );
    }

    #[test]
    fn body_hasher_hash_with_length() {
        let key @ (len, hash_alg, canon_alg) =
            (Some(27), HashAlgorithm::Sha256, CanonicalizationAlgorithm::Simple);

        let mut hasher = BodyHasherBuilder::new();
        hasher.register_canonicalization(len, hash_alg, canon_alg);
        let mut hasher = hasher.build();

        assert_eq!(hasher.hash_chunk(b"well  hello \r\n"), BodyHasherStance::Interested);
        assert_eq!(hasher.hash_chunk(b"\r\n what agi \r"), BodyHasherStance::Interested);
        assert_eq!(hasher.hash_chunk(b"\n\r\n"), BodyHasherStance::Done);

        let results = hasher.finish();

        assert_eq!(
            results.get(&key).unwrap().0,
            sha256_digest(b"well  hello \r\n\r\n what agi \r")
        );
    }

    #[test]
    fn body_length_beyond_body() {
        let result = body_hash(
            CanonicalizationAlgorithm::Relaxed,
            HashAlgorithm::Sha256,
            b"abc",
            Some(10),
        );

        assert_eq!(result, Err(BodyHashError::InsufficientInput));
    }

    #[test]
    fn empty_body_hashes() {
        let (hash, _) = body_hash(
            CanonicalizationAlgorithm::Simple,
            HashAlgorithm::Sha256,
            b"",
            None,
        )
        .unwrap();
        assert_eq!(hash, sha256_digest(b"\r\n"));

        let (hash, len) = body_hash(
            CanonicalizationAlgorithm::Relaxed,
            HashAlgorithm::Sha256,
            b"\r\n\r\n",
            None,
        )
        .unwrap();
        assert_eq!(len, 0);
        assert_eq!(&hash[..], &Sha256::digest(b"")[..]);
    }

    #[test]
    fn body_hasher_known_hash_sample() {
        let body = b"\
Hello Proff,\r\n\
\r\n\
Let\xe2\x80\x99s try this again, with line\r\n\
breaks and empty lines even.\r\n\
\r\n\
Ciao, und bis bald\r\n\
\r\n\
\r\n\
-- \r\n\
David\r\n\
";

        let (hash, _) = body_hash(
            CanonicalizationAlgorithm::Relaxed,
            HashAlgorithm::Sha256,
            body,
            None,
        )
        .unwrap();

        assert_eq!(
            util::encode_base64(&hash),
            "RMSbeRTj/zCxWeWQXpEIbiqxH0Jqg5eYs4ORzOt3MT0="
        );
    }

    #[test]
    fn data_hash_strips_trailing_whitespace_of_signature() {
        let headers: HeaderFields = "From: me@example.com\nTo: you@example.org\n"
            .parse()
            .unwrap();
        let selected: Vec<_> = headers.iter().collect();

        let hash = compute_data_hash(
            HashAlgorithm::Sha256,
            CanonicalizationAlgorithm::Relaxed,
            &selected,
            CanonicalizationAlgorithm::Simple,
            "DKIM-Signature",
            " v=1; b=\r\n",
        );

        assert_eq!(
            hash,
            sha256_digest(b"from:me@example.com\r\nto:you@example.org\r\nDKIM-Signature: v=1; b=")
        );
    }
}
