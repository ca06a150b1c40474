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

//! Canonicalization utilities.
//!
//! Both the *simple* and the *relaxed* algorithm are implemented for header
//! fields and for the message body. Body canonicalization is incremental, so
//! that the body can be fed in chunks of any size.

use crate::{
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    util::CanonicalStr,
};
use bstr::ByteSlice;
use std::{
    collections::HashSet,
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CanonicalizationAlgorithm {
    /// The *simple* canonicalization algorithm.
    #[default]
    Simple,
    /// The *relaxed* canonicalization algorithm.
    Relaxed,
}

impl CanonicalStr for CanonicalizationAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }
}

impl Display for CanonicalizationAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for CanonicalizationAlgorithm {
    type Err = InvalidCanonicalizationPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("simple") {
            Ok(Self::Simple)
        } else if s.eq_ignore_ascii_case("relaxed") {
            Ok(Self::Relaxed)
        } else {
            Err(InvalidCanonicalizationPolicy(s.into()))
        }
    }
}

/// An error that occurs when a `c=` value names an unknown algorithm.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct InvalidCanonicalizationPolicy(pub Box<str>);

impl Display for InvalidCanonicalizationPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid canonicalization policy: {}", self.0)
    }
}

impl Error for InvalidCanonicalizationPolicy {}

/// A canonicalization policy, the pair of header and body algorithm.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct Canonicalization {
    /// The header canonicalization.
    pub header: CanonicalizationAlgorithm,
    /// The body canonicalization.
    pub body: CanonicalizationAlgorithm,
}

impl Canonicalization {
    pub fn new(header: CanonicalizationAlgorithm, body: CanonicalizationAlgorithm) -> Self {
        Self { header, body }
    }
}

impl CanonicalStr for Canonicalization {
    fn canonical_str(&self) -> &'static str {
        use CanonicalizationAlgorithm::*;

        match (self.header, self.body) {
            (Simple, Simple) => "simple/simple",
            (Simple, Relaxed) => "simple/relaxed",
            (Relaxed, Simple) => "relaxed/simple",
            (Relaxed, Relaxed) => "relaxed/relaxed",
        }
    }
}

impl Display for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl fmt::Debug for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", &self.header, &self.body)
    }
}

impl FromStr for Canonicalization {
    type Err = InvalidCanonicalizationPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |_| InvalidCanonicalizationPolicy(s.into());

        Ok(if let Some((header, body)) = s.split_once('/') {
            Self {
                header: header.parse().map_err(invalid)?,
                body: body.parse().map_err(invalid)?,
            }
        } else {
            Self {
                header: s.parse().map_err(invalid)?,
                body: Default::default(),
            }
        })
    }
}

const SP: u8 = b' ';
const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRLF: [u8; 2] = [CR, LF];

// which state are we in = what did we see last?
#[derive(Copy, Clone)]
enum CanonState {
    Init,
    CrLf,
    Cr,
    Wsp,
    WspCr,
    Byte,
}

/// A canonicalizer using the body canonicalization algorithm.
pub struct BodyCanonicalizer {
    kind: CanonicalizationAlgorithm,
    state: CanonState,
    blank_line: bool,  // whether currently on an empty or blank line
    empty_lines: usize,  // number of empty lines seen
    content: bool,  // whether any content has been written
}

impl BodyCanonicalizer {
    pub fn simple() -> Self {
        Self::new(CanonicalizationAlgorithm::Simple)
    }

    pub fn relaxed() -> Self {
        Self::new(CanonicalizationAlgorithm::Relaxed)
    }

    pub fn new(kind: CanonicalizationAlgorithm) -> Self {
        Self {
            kind,
            state: CanonState::Init,
            blank_line: true,
            empty_lines: 0,
            content: false,
        }
    }

    // canonicalisation recognises only CRLF as line separator/terminator, stray
    // CR and LF are treated like other bytes
    pub fn canon_chunk(&mut self, bytes: &[u8]) -> Vec<u8> {
        match self.kind {
            CanonicalizationAlgorithm::Simple => self.canon_chunk_simple(bytes),
            CanonicalizationAlgorithm::Relaxed => self.canon_chunk_relaxed(bytes),
        }
    }

    fn canon_chunk_simple(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut result = vec![];

        for &b in bytes {
            match self.state {
                CanonState::Init | CanonState::CrLf => {
                    if b == CR {
                        self.state = CanonState::Cr;
                    } else {
                        self.flush_empty_lines(&mut result);
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Cr => {
                    if b == LF {
                        if self.blank_line {
                            self.empty_lines += 1;
                        } else {
                            result.extend(CRLF);
                            self.blank_line = true;
                        }
                        self.state = CanonState::CrLf;
                        continue;
                    }

                    self.flush_empty_lines(&mut result);
                    result.push(CR);

                    if b != CR {
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Byte => {
                    if b == CR {
                        self.state = CanonState::Cr;
                    } else {
                        result.push(b);
                    }
                }
                CanonState::Wsp | CanonState::WspCr => unreachable!(),
            }
        }

        result
    }

    fn canon_chunk_relaxed(&mut self, bytes: &[u8]) -> Vec<u8> {
        fn is_wsp(b: u8) -> bool {
            matches!(b, b'\t' | b' ')
        }

        let mut result = vec![];

        for &b in bytes {
            match self.state {
                CanonState::Init | CanonState::CrLf => {
                    if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else if b == CR {
                        self.state = CanonState::Cr;
                    } else {
                        self.flush_empty_lines(&mut result);
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Wsp => {
                    if b == CR {
                        self.state = CanonState::WspCr;
                    } else if !is_wsp(b) {
                        self.flush_empty_lines(&mut result);
                        result.push(SP);
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Cr => {
                    if b == LF {
                        if self.blank_line {
                            self.empty_lines += 1;
                        } else {
                            result.extend(CRLF);
                            self.blank_line = true;
                        }
                        self.state = CanonState::CrLf;
                        continue;
                    }

                    self.flush_empty_lines(&mut result);
                    result.push(CR);

                    if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else if b != CR {
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::WspCr => {
                    if b == LF {
                        if self.blank_line {
                            self.empty_lines += 1;
                        } else {
                            result.extend(CRLF);
                            self.blank_line = true;
                        }
                        self.state = CanonState::CrLf;
                        continue;
                    }

                    self.flush_empty_lines(&mut result);
                    result.push(SP);
                    result.push(CR);

                    if b == CR {
                        self.state = CanonState::Cr;
                    } else if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else {
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Byte => {
                    if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else if b == CR {
                        self.state = CanonState::Cr;
                    } else {
                        result.push(b);
                    }
                }
            }
        }

        result
    }

    pub fn finish_canon(mut self) -> Vec<u8> {
        match self.kind {
            CanonicalizationAlgorithm::Simple => {
                match self.state {
                    CanonState::Init => CRLF.to_vec(),  // empty body is CRLF
                    CanonState::CrLf if self.content => vec![],
                    CanonState::CrLf => CRLF.to_vec(),  // only empty lines
                    CanonState::Cr => {
                        let mut result = vec![];  // final chunk to hash
                        self.flush_empty_lines(&mut result);
                        result.push(CR);
                        result.extend(CRLF);  // body needs final CRLF
                        result
                    }
                    CanonState::Byte => CRLF.to_vec(),  // body needs final CRLF
                    CanonState::Wsp | CanonState::WspCr => unreachable!(),
                }
            }
            CanonicalizationAlgorithm::Relaxed => {
                match self.state {
                    CanonState::Init | CanonState::CrLf => vec![],
                    CanonState::Cr => {
                        let mut result = vec![];
                        self.flush_empty_lines(&mut result);
                        result.push(CR);
                        result.extend(CRLF);  // non-empty body needs final CRLF
                        result
                    }
                    CanonState::Wsp => {
                        // unspecified how to treat final WSP: drop, no flush
                        CRLF.to_vec()  // non-empty body needs final CRLF
                    }
                    CanonState::WspCr => {
                        let mut result = vec![];
                        self.flush_empty_lines(&mut result);
                        result.push(SP);
                        result.push(CR);
                        result.extend(CRLF);  // non-empty body needs final CRLF
                        result
                    }
                    CanonState::Byte => CRLF.to_vec(),  // non-empty body needs final CRLF
                }
            }
        }
    }

    // write out remembered empty lines after encountering/before processing
    // byte that ends a section of empty lines
    fn flush_empty_lines(&mut self, result: &mut Vec<u8>) {
        for _ in 0..self.empty_lines {
            result.extend(CRLF);
        }
        self.empty_lines = 0;
        self.blank_line = false;
        self.content = true;
    }
}

/// Canonicalizes a complete message body.
pub fn canonicalize_body(algorithm: CanonicalizationAlgorithm, body: &[u8]) -> Vec<u8> {
    let mut bc = BodyCanonicalizer::new(algorithm);
    let mut result = bc.canon_chunk(body);
    result.extend(bc.finish_canon());
    result
}

/// Canonicalizes every header field, producing a new collection.
///
/// With *simple* the fields are returned unchanged. With *relaxed* each field
/// body is unfolded, compressed, and terminated with CRLF.
pub fn canonicalize_headers(
    algorithm: CanonicalizationAlgorithm,
    headers: &HeaderFields,
) -> HeaderFields {
    match algorithm {
        CanonicalizationAlgorithm::Simple => headers.clone(),
        CanonicalizationAlgorithm::Relaxed => {
            let fields: Vec<HeaderField> = headers
                .iter()
                .map(|(name, value)| {
                    let name = name.as_ref().trim_end().to_ascii_lowercase();
                    let mut body = vec![];
                    canonicalize_header_relaxed(&mut body, value.as_ref());
                    body.extend(CRLF);
                    // output of the relaxed algorithm is always a valid field
                    (FieldName(name.into()), FieldBody(body.into()))
                })
                .collect();
            HeaderFields(fields.into())
        }
    }
}

/// Selects the header fields named in `include`, in that order.
///
/// Each name consumes the bottom-most occurrence not yet consumed, so that a
/// name given twice selects two distinct fields. Names without a remaining
/// occurrence select nothing.
pub fn select_headers<'a>(headers: &'a HeaderFields, include: &[FieldName]) -> Vec<&'a HeaderField> {
    let fields = headers.as_ref();

    let mut result = Vec::with_capacity(include.len());
    let mut processed_indexes = HashSet::with_capacity(include.len());

    for selected_header in include {
        if let Some(i) = (0..fields.len())
            .rev()
            .find(|i| !processed_indexes.contains(i) && fields[*i].0 == *selected_header)
        {
            processed_indexes.insert(i);
            result.push(&fields[i]);
        }
    }

    result
}

/// Produces the header canonicalization result for some selected header
/// fields, each terminated with CRLF.
pub fn canonicalize_selected_headers(
    algorithm: CanonicalizationAlgorithm,
    selected_headers: &[&HeaderField],
) -> Vec<u8> {
    let mut result = vec![];

    for (name, value) in selected_headers {
        canonicalize_header(&mut result, algorithm, name, value);
        result.extend(CRLF);
    }

    result
}

/// Canonicalizes a header field into some result vector, without line
/// terminator.
pub fn canonicalize_header(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    name: impl AsRef<str>,
    value: impl AsRef<[u8]>,
) {
    let name = name.as_ref();
    let value = value.as_ref();

    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            result.extend(name.bytes());
            result.push(b':');
            result.extend(value.strip_suffix(&CRLF).unwrap_or(value));
        }
        CanonicalizationAlgorithm::Relaxed => {
            result.extend(name.trim_end().to_ascii_lowercase().bytes());
            result.push(b':');
            canonicalize_header_relaxed(result, value);
        }
    }
}

fn canonicalize_header_relaxed(result: &mut Vec<u8>, value: &[u8]) {
    fn is_wsp(b: u8) -> bool {
        matches!(b, b' ' | b'\t')
    }

    let value = value.replace(CRLF, "");
    let value = value.trim_with(|c| matches!(c, ' ' | '\t'));

    let mut compressing = false;
    for &b in value {
        if is_wsp(b) {
            if !compressing {
                result.push(SP);
                compressing = true;
            }
        } else {
            result.push(b);
            compressing = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BStr;

    fn selected_names(names: &[&str]) -> Vec<FieldName> {
        names.iter().map(|n| FieldName::new(*n).unwrap()).collect()
    }

    #[test]
    fn canonicalization_from_str() {
        assert_eq!(
            "relaxed/simple".parse::<Canonicalization>(),
            Ok(Canonicalization::new(
                CanonicalizationAlgorithm::Relaxed,
                CanonicalizationAlgorithm::Simple
            ))
        );
        assert_eq!(
            "relaxed".parse::<Canonicalization>(),
            Ok(Canonicalization::new(
                CanonicalizationAlgorithm::Relaxed,
                CanonicalizationAlgorithm::Simple
            ))
        );
        assert_eq!(
            "relaxed/loose".parse::<Canonicalization>(),
            Err(InvalidCanonicalizationPolicy("relaxed/loose".into()))
        );
        assert!("".parse::<Canonicalization>().is_err());
    }

    #[test]
    fn canonicalize_selected_headers_relaxed_ok() {
        let headers = HeaderFields::from_vec(vec![
            ("from".to_owned(), b" Good \t ".to_vec()),
            ("to".to_owned(), b" see   me".to_vec()),
            ("Date".to_owned(), b" Fri 24\r\n\tfoo".to_vec()),
            ("To".to_owned(), b" another one".to_vec()),
        ])
        .unwrap();

        let selected = select_headers(&headers, &selected_names(&["to", "from", "to", "to"]));

        assert_eq!(
            BStr::new(&canonicalize_selected_headers(
                CanonicalizationAlgorithm::Relaxed,
                &selected,
            )),
            BStr::new(&b"to:another one\r\nfrom:Good\r\nto:see me\r\n"[..]),
        );
    }

    #[test]
    fn canonicalize_selected_headers_simple_ok() {
        let headers = HeaderFields::from_vec(vec![
            ("From".to_owned(), b" me \r\n\tagain".to_vec()),
            ("subject".to_owned(), b"hi\r\n".to_vec()),
        ])
        .unwrap();

        let selected = select_headers(&headers, &selected_names(&["subject", "from"]));

        assert_eq!(
            BStr::new(&canonicalize_selected_headers(
                CanonicalizationAlgorithm::Simple,
                &selected,
            )),
            BStr::new(&b"subject:hi\r\nFrom: me \r\n\tagain\r\n"[..]),
        );
    }

    #[test]
    fn select_headers_bottom_up() {
        let headers = HeaderFields::from_vec(vec![
            ("Received".to_owned(), b" one".to_vec()),
            ("From".to_owned(), b" me".to_vec()),
            ("Received".to_owned(), b" two".to_vec()),
        ])
        .unwrap();

        let selected = select_headers(
            &headers,
            &selected_names(&["received", "from", "from", "received", "received"]),
        );

        let values: Vec<_> = selected.iter().map(|(_, v)| v.as_ref()).collect();
        assert_eq!(values, [&b" two"[..], b" me", b" one"]);
    }

    #[test]
    fn canonicalize_headers_relaxed_idempotent() {
        let headers = HeaderFields::from_vec(vec![
            ("From".to_owned(), b" a@x.com \r\n".to_vec()),
            ("TO".to_owned(), b"\tb@y.com,\r\n   c@z.com".to_vec()),
            ("Subject".to_owned(), b"  hi   there ".to_vec()),
        ])
        .unwrap();

        let once = canonicalize_headers(CanonicalizationAlgorithm::Relaxed, &headers);
        let twice = canonicalize_headers(CanonicalizationAlgorithm::Relaxed, &once);

        assert_eq!(once, twice);
        assert_eq!(once.as_ref()[1].0.as_ref(), "to");
        assert_eq!(once.as_ref()[1].1.as_ref(), b"b@y.com, c@z.com\r\n");
        assert_eq!(once.as_ref()[2].1.as_ref(), b"hi there\r\n");
    }

    #[test]
    fn canonicalize_headers_simple_unchanged() {
        let headers = HeaderFields::from_vec(vec![
            ("From".to_owned(), b" a@x.com \r\n".to_vec()),
        ])
        .unwrap();

        assert_eq!(canonicalize_headers(CanonicalizationAlgorithm::Simple, &headers), headers);
    }

    #[test]
    fn canonicalize_body_empty() {
        assert_eq!(canonicalize_body(CanonicalizationAlgorithm::Simple, b""), b"\r\n");
        assert_eq!(canonicalize_body(CanonicalizationAlgorithm::Simple, b"\r\n\r\n"), b"\r\n");
        assert_eq!(canonicalize_body(CanonicalizationAlgorithm::Relaxed, b""), b"");
        assert_eq!(canonicalize_body(CanonicalizationAlgorithm::Relaxed, b" \r\n\t\r\n"), b"");
    }

    #[test]
    fn body_canon_simple_only_empty_lines_in_chunks() {
        let body = canonicalize_chunks(BodyCanonicalizer::simple(), &[b"\r", b"\n\r\n", b"\r\n"]);
        assert_eq!(body, b"\r\n");

        let body = canonicalize_chunks(BodyCanonicalizer::relaxed(), &[b"\r\n", b"\r\n"]);
        assert_eq!(body, b"");
    }

    #[test]
    fn canonicalize_body_trailing_lines() {
        assert_eq!(
            canonicalize_body(CanonicalizationAlgorithm::Simple, b"hello\r\n\r\n\r\n"),
            b"hello\r\n"
        );
        assert_eq!(
            canonicalize_body(CanonicalizationAlgorithm::Simple, b"hello"),
            b"hello\r\n"
        );
        assert_eq!(
            canonicalize_body(CanonicalizationAlgorithm::Relaxed, b"hello \t\r\n \r\n"),
            b"hello\r\n"
        );
    }

    #[test]
    fn body_canon_simple_ok() {
        let bc = BodyCanonicalizer::simple();

        let body = canonicalize_chunks(
            bc,
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(body, b"well  hello \r\n\r\n what agi \r\n");
    }

    #[test]
    fn body_canon_relaxed_basic() {
        let bc = BodyCanonicalizer::relaxed();

        let body = canonicalize_chunks(
            bc,
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(body, b"well hello\r\n\r\n what agi\r\n");
    }

    #[test]
    fn body_canon_relaxed_small_chunks() {
        let bc = BodyCanonicalizer::relaxed();

        let body = canonicalize_chunks(
            bc,
            &[
                b"well ",
                b" hello ",
                b"\r",
                b"\n\r",
                b"\n what agi \r\n\r\n",
                b"\r\n",
            ],
        );

        assert_eq!(body, b"well hello\r\n\r\n what agi\r\n");
    }

    #[test]
    fn body_canon_relaxed_initial_empty_lines() {
        let bc = BodyCanonicalizer::relaxed();

        let body = canonicalize_chunks(bc, &[b"\r\n\r\n", b"\ra \r", b"\nb  ", b"c"]);

        assert_eq!(body, b"\r\n\r\n\ra\r\nb c\r\n");
    }

    fn canonicalize_chunks(mut bc: BodyCanonicalizer, chunks: &[&[u8]]) -> Vec<u8> {
        let mut result = vec![];
        for c in chunks {
            result.extend(bc.canon_chunk(c));
        }
        result.extend(bc.finish_canon());
        result
    }
}
