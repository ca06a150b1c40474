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

//! Representation of email header data.
//!
//! Header fields are kept exactly as they appear in the message: the field
//! name without the colon, and the field body as raw bytes including any
//! leading whitespace and folded continuation lines.

use bstr::ByteSlice;
use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    str::{self, FromStr},
};

/// A header field, consisting of a field name and a field body.
pub type HeaderField = (FieldName, FieldBody);

/// An error that occurs when header data is structurally invalid.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HeaderFieldError {
    EmptyHeader,
    InvalidFieldName,
    InvalidFieldBody,
    MissingColon,
    StrayContinuationLine,
}

impl Display for HeaderFieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyHeader => write!(f, "empty header"),
            Self::InvalidFieldName => write!(f, "invalid header field name"),
            Self::InvalidFieldBody => write!(f, "invalid header field body"),
            Self::MissingColon => write!(f, "header line without colon"),
            Self::StrayContinuationLine => write!(f, "continuation line without header field"),
        }
    }
}

impl Error for HeaderFieldError {}

/// A non-empty, ordered collection of header fields.
///
/// Order and duplicates are significant. The collection is never modified in
/// place; [`HeaderFields::prepend`] returns a new collection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeaderFields(pub(crate) Box<[HeaderField]>);

impl HeaderFields {
    pub fn new(value: impl Into<Box<[HeaderField]>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HeaderFieldError::EmptyHeader);
        }
        Ok(Self(value))
    }

    pub fn from_vec(value: Vec<(String, Vec<u8>)>) -> Result<Self, HeaderFieldError> {
        let value: Vec<_> = value
            .into_iter()
            .map(|(name, value)| {
                let name = FieldName::new(name)?;
                let body = FieldBody::new(value)?;
                Ok((name, body))
            })
            .collect::<Result<_, _>>()?;
        Self::new(value)
    }

    /// Parses a raw header block. Lines may be terminated with CRLF or with a
    /// bare LF; continuation lines are joined to their field with CRLF.
    pub fn from_bytes(value: &[u8]) -> Result<Self, HeaderFieldError> {
        let mut fields: Vec<(&[u8], Vec<u8>)> = vec![];

        for line in value.lines() {
            if line.is_empty() {
                break;
            }
            if line.starts_with(b" ") || line.starts_with(b"\t") {
                match fields.last_mut() {
                    Some((_, body)) => {
                        body.extend(b"\r\n");
                        body.extend(line);
                    }
                    None => return Err(HeaderFieldError::StrayContinuationLine),
                }
            } else {
                let i = line.find_byte(b':').ok_or(HeaderFieldError::MissingColon)?;
                fields.push((&line[..i], line[i + 1..].to_vec()));
            }
        }

        let fields: Vec<_> = fields
            .into_iter()
            .map(|(name, body)| {
                let name = str::from_utf8(name).map_err(|_| HeaderFieldError::InvalidFieldName)?;
                Ok((FieldName::new(name)?, FieldBody::new(body)?))
            })
            .collect::<Result<_, _>>()?;

        Self::new(fields)
    }

    /// Returns a new collection with the given field placed before all
    /// existing fields.
    pub fn prepend(&self, field: HeaderField) -> Self {
        let mut fields = Vec::with_capacity(self.0.len() + 1);
        fields.push(field);
        fields.extend(self.0.iter().cloned());
        Self(fields.into())
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HeaderField> + ExactSizeIterator {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[HeaderField]> for HeaderFields {
    fn as_ref(&self) -> &[HeaderField] {
        &self.0
    }
}

impl FromStr for HeaderFields {
    type Err = HeaderFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

/// Splits a raw message into its header and its body.
///
/// The header ends at the first empty line. A message without such a line
/// has an empty body. The body is returned unaltered.
pub fn parse_message(message: &[u8]) -> Result<(HeaderFields, &[u8]), HeaderFieldError> {
    let (header, body) = if let Some(i) = message.find(b"\r\n\r\n") {
        (&message[..i + 2], &message[i + 4..])
    } else if message.ends_with(b"\r\n") {
        (message, &b""[..])
    } else {
        return Err(HeaderFieldError::EmptyHeader);
    };

    let headers = HeaderFields::from_bytes(header)?;

    Ok((headers, body))
}

/// A header field name.
///
/// Comparison and hashing are case-insensitive.
#[derive(Clone, Eq)]
pub struct FieldName(pub(crate) Box<str>);

impl FieldName {
    pub fn new(value: impl Into<Box<str>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HeaderFieldError::InvalidFieldName);
        }
        if !value.chars().all(|c| c.is_ascii_graphic() && c != ':') {
            return Err(HeaderFieldError::InvalidFieldName);
        }
        Ok(Self(value))
    }
}

impl AsRef<str> for FieldName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl PartialEq for FieldName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl PartialEq<str> for FieldName {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq<&str> for FieldName {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Hash for FieldName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

/// A header field body.
///
/// The body may consist of several lines, all but the first of which must be
/// folded continuation lines. A single trailing CRLF is tolerated, so that
/// values stored with their line terminator are accepted as well.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct FieldBody(pub(crate) Box<[u8]>);

impl FieldBody {
    pub fn new(value: impl Into<Box<[u8]>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();

        let content = value.strip_suffix(b"\r\n").unwrap_or(&value[..]);

        // only folded, non-blank continuation lines:
        if !content.split_str("\r\n").skip(1).all(|line| {
            (line.starts_with(b" ") || line.starts_with(b"\t"))
                && !line.trim_with(|c| matches!(c, ' ' | '\t')).is_empty()
        }) {
            return Err(HeaderFieldError::InvalidFieldBody);
        }
        // no stray CR and LF
        if !content.split_str("\r\n").all(|line| !line.contains(&b'\r') && !line.contains(&b'\n')) {
            return Err(HeaderFieldError::InvalidFieldBody);
        }
        // allow all other bytes, UTF-8 not required to accomodate eg mistaken Latin 1 bytes
        Ok(Self(value))
    }
}

impl AsRef<[u8]> for FieldBody {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for FieldBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldBody")
            .field(&self.0.as_bstr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_name_ok() {
        assert!(FieldName::new("abc").is_ok());

        assert!(FieldName::new("abc ").is_err());
        assert!(FieldName::new("a:c").is_err());
        assert_eq!(FieldName::new("From").unwrap(), "from");
    }

    #[test]
    fn field_name_fmt() {
        let name = FieldName::new("Subject").unwrap();

        assert_eq!(format!("{name:?}"), "\"Subject\"");
        assert_eq!(name.to_string(), "Subject");
    }

    #[test]
    fn field_body_ok() {
        assert!(FieldBody::new(*b" ab\r\n\tcd ").is_ok());
        assert!(FieldBody::new(*b"\r\n\ta").is_ok());
        assert!(FieldBody::new(*b"  ").is_ok());
        assert!(FieldBody::new(*b"a@x.com\r\n").is_ok());

        assert!(FieldBody::new(*b" \r\na").is_err());
        assert!(FieldBody::new(*b" \r\n \r\n a").is_err());
        assert!(FieldBody::new(*b" \na").is_err());
        assert!(FieldBody::new(*b" abc\r\n\r\n").is_err());
    }

    #[test]
    fn header_fields_from_str_ok() {
        let headers = HeaderFields::from_str(
            "From: me\nTo: you (yes,\n\t you!)\r\nSubject:hi\n\nbody",
        )
        .unwrap();

        assert_eq!(
            headers.as_ref(),
            [
                (FieldName::new("From").unwrap(), FieldBody::new(*b" me").unwrap()),
                (
                    FieldName::new("To").unwrap(),
                    FieldBody::new(*b" you (yes,\r\n\t you!)").unwrap()
                ),
                (FieldName::new("Subject").unwrap(), FieldBody::new(*b"hi").unwrap()),
            ]
        );

        assert_eq!(
            HeaderFields::from_str(" folded\nFrom: me"),
            Err(HeaderFieldError::StrayContinuationLine)
        );
        assert_eq!(
            HeaderFields::from_str("From me"),
            Err(HeaderFieldError::MissingColon)
        );
    }

    #[test]
    fn prepend_leaves_original() {
        let headers = HeaderFields::from_str("From: me\nTo: you").unwrap();

        let new_headers = headers.prepend((
            FieldName::new("Received").unwrap(),
            FieldBody::new(*b" by x").unwrap(),
        ));

        assert_eq!(headers.len(), 2);
        assert_eq!(new_headers.len(), 3);
        assert_eq!(new_headers.as_ref()[0].0, "received");
        assert_eq!(new_headers.as_ref()[1..], headers.as_ref()[..]);
    }

    #[test]
    fn parse_message_ok() {
        let (headers, body) = parse_message(b"From: me\r\nTo: you\r\n\r\nhello\r\n").unwrap();

        assert_eq!(headers.len(), 2);
        assert_eq!(body, b"hello\r\n");

        let (headers, body) = parse_message(b"From: me\r\n").unwrap();

        assert_eq!(headers.len(), 1);
        assert_eq!(body, b"");
    }
}
