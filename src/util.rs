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

//! Miscellaneous utilities.

use base64ct::{Base64, Encoding};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// A trait for entities that have a canonical string representation in the
/// DKIM and ARC RFCs.
pub trait CanonicalStr {
    /// Returns the canonical string representation.
    fn canonical_str(&self) -> &'static str;
}

/// An error that occurs when decoding Base64 data.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Base64Error;

impl Display for Base64Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "failed to decode Base64 data")
    }
}

impl Error for Base64Error {}

/// Encodes binary data as a Base64 string.
pub fn encode_base64<T: AsRef<[u8]>>(input: T) -> String {
    Base64::encode_string(input.as_ref())
}

/// Decodes a Base64 string, ignoring any embedded whitespace.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, Base64Error> {
    let input: String = input
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect();

    if input.len() % 4 != 0 {
        return Err(Base64Error);
    }

    Base64::decode_vec(&input).map_err(|_| Base64Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_base64_ok() {
        assert_eq!(decode_base64("aGVs bG8=").unwrap(), b"hello");
        assert_eq!(decode_base64("aGVs\r\n\tbG8=").unwrap(), b"hello");
        assert_eq!(decode_base64("").unwrap(), b"");

        assert_eq!(decode_base64("aGVsbG8"), Err(Base64Error));
        assert_eq!(decode_base64("aGV$bG8="), Err(Base64Error));
    }
}
