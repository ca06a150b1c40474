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

//! Small parsers shared by the tag-list, header, and record code.

pub fn strip_suffix<'a>(s: &'a str, suffix: &str) -> &'a str {
    debug_assert!(s.ends_with(suffix));
    &s[..(s.len() - suffix.len())]
}

const CRLF: &str = "\r\n";

// FWS = ([*WSP CRLF] 1*WSP)

/// Strips one occurrence of folding whitespace from the start of the input.
pub fn strip_fws(input: &str) -> Option<&str> {
    if let Some(s) = strip_wsp(input) {
        s.strip_prefix(CRLF).and_then(strip_wsp).or(Some(s))
    } else {
        input.strip_prefix(CRLF).and_then(strip_wsp)
    }
}

/// Trims any whitespace and line breaks at both ends.
pub fn trim_fws(input: &str) -> &str {
    input.trim_matches(|c| is_wsp(c) || c == '\r' || c == '\n')
}

/// Trims whitespace and line breaks at the end, as is done to a signature
/// header before it is fed to the hash.
pub fn trim_fws_end(input: &[u8]) -> &[u8] {
    let mut end = input.len();
    while end > 0 && matches!(input[end - 1], b' ' | b'\t' | b'\r' | b'\n') {
        end -= 1;
    }
    &input[..end]
}

/// Parses a decimal number as used in the `l=`, `t=`, and `x=` tags.
///
/// Only ASCII digits are accepted, no sign. Values that do not fit in a `u64`
/// saturate: such timestamps are effectively infinite.
pub fn parse_decimal(input: &str) -> Option<u64> {
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(input.parse().unwrap_or(u64::MAX))
}

// RFC 5234, appendix B.1

fn strip_wsp(input: &str) -> Option<&str> {
    input
        .strip_prefix(is_wsp)
        .map(|s| s.trim_start_matches(is_wsp))
}

pub fn is_wsp(c: char) -> bool {
    matches!(c, ' ' | '\t')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fws_ok() {
        assert_eq!(strip_fws(""), None);
        assert_eq!(strip_fws("x"), None);
        assert_eq!(strip_fws(" x"), Some("x"));
        assert_eq!(strip_fws(" \r\nx"), Some("\r\nx"));
        assert_eq!(strip_fws(" \r\n x"), Some("x"));
        assert_eq!(strip_fws("\r\nx"), None);
        assert_eq!(strip_fws("\r\n\tx"), Some("x"));
    }

    #[test]
    fn trim_fws_ok() {
        assert_eq!(trim_fws(" \r\n\tabc d \r\n"), "abc d");
        assert_eq!(trim_fws_end(b"b=; \r\n"), b"b=;");
        assert_eq!(trim_fws_end(b" \r\n"), b"");
    }

    #[test]
    fn parse_decimal_ok() {
        assert_eq!(parse_decimal("0"), Some(0));
        assert_eq!(parse_decimal("1117574938"), Some(1117574938));
        assert_eq!(parse_decimal("99999999999999999999999"), Some(u64::MAX));
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("+12"), None);
        assert_eq!(parse_decimal("12a"), None);
        assert_eq!(parse_decimal("1 2"), None);
    }
}
