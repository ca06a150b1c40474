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
    canonicalize::CanonicalizationAlgorithm,
    crypto::HashAlgorithm,
    error::Error,
    header::{HeaderField, HeaderFields},
    message_hash,
    parse::trim_fws,
    signature::{
        parse_instance, ARC_AUTHENTICATION_RESULTS_NAME, ARC_MESSAGE_SIGNATURE_NAME,
        ARC_SEAL_NAME,
    },
};
use std::{collections::BTreeMap, str};

/// The three header fields of one ARC instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArcSet<'a> {
    pub instance: u32,
    pub authentication_results: &'a HeaderField,
    pub message_signature: &'a HeaderField,
    pub seal: &'a HeaderField,
}

/// Finds the ARC sets in a header, ordered from the highest instance number
/// to the lowest.
///
/// Every instance from 1 up to the highest one must be present and complete;
/// a missing, incomplete, or duplicated set is a message format error.
pub fn discover_arc_sets(headers: &HeaderFields) -> Result<Vec<ArcSet<'_>>, Error> {
    let mut slots: BTreeMap<u32, [Option<&HeaderField>; 3]> = BTreeMap::new();

    for field in headers.iter() {
        let (name, value) = field;

        let slot = if *name == ARC_AUTHENTICATION_RESULTS_NAME {
            0
        } else if *name == ARC_MESSAGE_SIGNATURE_NAME {
            1
        } else if *name == ARC_SEAL_NAME {
            2
        } else {
            continue;
        };

        let instance = extract_instance(value.as_ref()).ok_or_else(|| {
            Error::message_format(format!("{name} header without valid instance tag"))
        })?;

        let entry = &mut slots.entry(instance).or_default()[slot];
        if entry.is_some() {
            return Err(Error::message_format(format!(
                "duplicate {name} header for instance {instance}"
            )));
        }
        *entry = Some(field);
    }

    let max_instance = slots.keys().next_back().copied().unwrap_or(0);
    if slots.len() != max_instance as usize {
        return Err(Error::message_format("ARC instances not contiguous"));
    }

    slots
        .into_iter()
        .rev()
        .map(|(instance, set)| match set {
            [Some(authentication_results), Some(message_signature), Some(seal)] => Ok(ArcSet {
                instance,
                authentication_results,
                message_signature,
                seal,
            }),
            _ => Err(Error::message_format(format!("incomplete ARC set {instance}"))),
        })
        .collect()
}

/// Extracts the value of the `i=` tag, which in all three ARC header fields
/// is found among the `;`-separated parts.
fn extract_instance(value: &[u8]) -> Option<u32> {
    let value = str::from_utf8(value).ok()?;

    value.split(';').find_map(|part| {
        let (name, value) = part.split_once('=')?;
        if trim_fws(name) == "i" {
            parse_instance(value).ok()
        } else {
            None
        }
    })
}

/// Computes the data hash of an ARC-Seal.
///
/// The hash input consists of the ARC sets in `prior_sets`, in the given
/// order, each contributing its ARC-Authentication-Results, its
/// ARC-Message-Signature, and its ARC-Seal; then the current instance’s
/// ARC-Authentication-Results; and finally the ARC-Seal being signed or
/// verified, with empty `b=` value. All headers use *relaxed*
/// canonicalization.
pub(crate) fn seal_data_hash<'s, 'a: 's, I>(
    hash_alg: HashAlgorithm,
    prior_sets: I,
    authentication_results: &HeaderField,
    seal_name: &str,
    seal_value_without_b: &str,
) -> Box<[u8]>
where
    I: IntoIterator<Item = &'s ArcSet<'a>>,
{
    let mut selected = vec![];
    for set in prior_sets {
        selected.extend([set.authentication_results, set.message_signature, set.seal]);
    }
    selected.push(authentication_results);

    message_hash::compute_data_hash(
        hash_alg,
        CanonicalizationAlgorithm::Relaxed,
        &selected,
        CanonicalizationAlgorithm::Relaxed,
        seal_name,
        seal_value_without_b,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn arc_headers(instances: &[u32]) -> String {
        let mut s = String::new();
        for i in instances {
            s.push_str(&format!("ARC-Seal: i={i}; cv=none; a=ed25519-sha256\r\n"));
            s.push_str(&format!("ARC-Message-Signature: i={i}; a=ed25519-sha256\r\n"));
            s.push_str(&format!("ARC-Authentication-Results: i={i}; example.org; arc=none\r\n"));
        }
        s.push_str("From: me@example.org\r\n");
        s
    }

    #[test]
    fn discover_sorted_descending() {
        let headers: HeaderFields = arc_headers(&[1, 3, 2]).parse().unwrap();

        let sets = discover_arc_sets(&headers).unwrap();

        let instances: Vec<_> = sets.iter().map(|s| s.instance).collect();
        assert_eq!(instances, [3, 2, 1]);
        assert_eq!(sets[0].seal.0, "arc-seal");
    }

    #[test]
    fn discover_none() {
        let headers: HeaderFields = "From: me@example.org\r\n".parse().unwrap();

        assert!(discover_arc_sets(&headers).unwrap().is_empty());
    }

    #[test]
    fn discover_incomplete_or_duplicate() {
        let headers: HeaderFields = format!(
            "{}ARC-Seal: i=2; cv=pass\r\n",
            arc_headers(&[1])
        )
        .parse()
        .unwrap();
        let e = discover_arc_sets(&headers).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MessageFormat);

        let headers: HeaderFields = format!("{}ARC-Seal: i=1; cv=none\r\n", arc_headers(&[1]))
            .parse()
            .unwrap();
        let e = discover_arc_sets(&headers).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MessageFormat);
    }

    #[test]
    fn discover_gap_or_bad_instance() {
        let headers: HeaderFields = arc_headers(&[1, 3]).parse().unwrap();
        assert!(discover_arc_sets(&headers).is_err());

        let headers: HeaderFields = arc_headers(&[51]).parse().unwrap();
        assert!(discover_arc_sets(&headers).is_err());
    }

    #[test]
    fn extract_instance_folded() {
        assert_eq!(extract_instance(b" a=rsa-sha256;\r\n\ti = 7 ; cv=pass"), Some(7));
        assert_eq!(extract_instance(b" i=0; cv=pass"), None);
        assert_eq!(extract_instance(b" cv=pass"), None);
    }
}
