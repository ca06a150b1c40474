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

//! Tag=value lists as used in DKIM-Signature, ARC-Message-Signature, ARC-Seal,
//! and DKIM public key records.

use crate::{
    parse::{strip_fws, strip_suffix},
    util::{self, Base64Error},
};
use std::{
    borrow::Cow,
    collections::HashSet,
    error::Error,
    fmt::{self, Display, Formatter},
    str,
};

/// An error that occurs when parsing a tag list.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TagListParseError {
    DuplicateTag,
    InvalidTagSpec,
}

impl Display for TagListParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateTag => write!(f, "duplicate tag"),
            Self::InvalidTagSpec => write!(f, "invalid tag specification"),
        }
    }
}

impl Error for TagListParseError {}

#[derive(Debug, PartialEq, Eq)]
pub struct TagSpec<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// A borrowed tag list, with tag values as they appear in the input (without
/// the surrounding folding whitespace).
#[derive(Debug, PartialEq, Eq)]
pub struct TagList<'a>(Vec<TagSpec<'a>>);

impl<'a> AsRef<[TagSpec<'a>]> for TagList<'a> {
    fn as_ref(&self) -> &[TagSpec<'a>] {
        &self.0
    }
}

impl<'a> TagList<'a> {
    pub fn from_str(val: &'a str) -> Result<Self, TagListParseError> {
        match parse_tag_list_internal(val) {
            Some((rest, tag_list)) if rest.is_empty() => {
                // ensure no duplicate names
                let mut names_seen = HashSet::new();
                if tag_list.iter().any(|tag| !names_seen.insert(tag.name)) {
                    return Err(TagListParseError::DuplicateTag);
                }
                Ok(TagList(tag_list))
            }
            _ => Err(TagListParseError::InvalidTagSpec),
        }
    }
}

/// An owned, ordered tag list.
///
/// Insertion order is preserved, so that serialising a parsed list yields the
/// tags in their original order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SignatureTags(Vec<(Box<str>, Box<str>)>);

impl SignatureTags {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn parse(value: &str) -> Result<Self, TagListParseError> {
        let tag_list = TagList::from_str(value)?;
        Ok(Self(
            tag_list
                .as_ref()
                .iter()
                .map(|t| (t.name.into(), t.value.into()))
                .collect(),
        ))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, v)| v.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets a tag value. An existing tag keeps its position, a new tag is
    /// appended.
    pub fn set(&mut self, name: impl Into<Box<str>>, value: impl Into<Box<str>>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_ref(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialises the tags as `name=value` pairs joined with `"; "`.
    pub fn serialize(&self) -> String {
        let mut result = String::new();
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                result.push_str("; ");
            }
            result.push_str(name);
            result.push('=');
            result.push_str(value);
        }
        result
    }
}

pub fn parse_colon_separated_tag_value(value: &str) -> Vec<&str> {
    value
        .split(':')
        .map(|s| s.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n')))
        .collect()
}

pub fn parse_base64_tag_value(value: &str) -> Result<Vec<u8>, Base64Error> {
    util::decode_base64(value)
}

/// Strips a tag name and the following `=` from the start of a tag-spec,
/// returning the rest and the tag name.
pub fn strip_tag_name_and_equals(input: &str) -> Option<(&str, &str)> {
    let s = strip_fws(input).unwrap_or(input);
    let (s, name) = parse_tag_name(s)?;
    let s = strip_fws(s).unwrap_or(s);
    let s = s.strip_prefix('=')?;
    Some((s, name))
}

/// Removes the value of the `b=` tag from a signature header value, leaving
/// everything else byte-for-byte unchanged.
pub fn remove_b_tag_value(value: &str) -> Cow<'_, str> {
    fn b_tag_prefix_len(s: &str) -> Option<usize> {
        let (rest, _) = strip_tag_name_and_equals(s).filter(|(_, name)| *name == "b")?;
        Some(s.len() - rest.len())
    }

    let mut val = Cow::from(value);

    let mut last_i = 0;
    let mut ms = value.match_indices(';');

    loop {
        match ms.next() {
            Some((i, _)) => {
                if let Some(n) = b_tag_prefix_len(&value[last_i..i]) {
                    val.to_mut().drain((last_i + n)..i);
                    break;
                }
                last_i = i + 1;
            }
            None => {
                if last_i != value.len() {
                    if let Some(n) = b_tag_prefix_len(&value[last_i..]) {
                        val = value[..(last_i + n)].into();
                    }
                }
                break;
            }
        }
    }

    val
}

fn parse_tag_list_internal(val: &str) -> Option<(&str, Vec<TagSpec<'_>>)> {
    let (mut s, t) = parse_tag_spec(val)?;

    let mut tags = vec![t];

    while let Some((snext, t)) = s.strip_prefix(';').and_then(parse_tag_spec) {
        s = snext;
        tags.push(t);
    }

    let s = s.strip_prefix(';').unwrap_or(s);
    let s = strip_fws(s).unwrap_or(s);

    Some((s, tags))
}

fn parse_tag_spec(val: &str) -> Option<(&str, TagSpec<'_>)> {
    let (s, name) = strip_tag_name_and_equals(val)?;

    let s = strip_fws(s).unwrap_or(s);

    let (s, value) = match parse_tag_value(s) {
        Some((s, value)) => {
            let s = strip_fws(s).unwrap_or(s);
            (s, value)
        }
        None => (s, Default::default()),
    };

    Some((s, TagSpec { name, value }))
}

fn parse_tag_name(value: &str) -> Option<(&str, &str)> {
    let s = value
        .strip_prefix(is_alpha)?
        .trim_start_matches(is_alphanum);
    Some((s, strip_suffix(value, s)))
}

// Note erratum 5070 in ABNF
fn parse_tag_value(value: &str) -> Option<(&str, &str)> {
    fn strip_tval(s: &str) -> Option<&str> {
        s.strip_prefix(is_tval_char)
            .map(|s| s.trim_start_matches(is_tval_char))
    }

    let mut s = strip_tval(value)?;

    while let Some(snext) = strip_fws(s).and_then(strip_tval) {
        s = snext;
    }

    Some((s, strip_suffix(value, s)))
}

fn is_alpha(c: char) -> bool {
    c.is_ascii_alphabetic()
}

fn is_alphanum(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn is_tval_char(c: char) -> bool {
    // printable ASCII w/o ; or non-ASCII UTF-8
    matches!(c, '!'..=':' | '<'..='~') || !c.is_ascii()
}
