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

//! Formatting of signature header values.

use crate::header::FieldName;

/// Maximum line width of folded signature headers, not counting the CRLF.
pub const FOLD_WIDTH: usize = 72;

/// Folds a header value so that no line is longer than [`FOLD_WIDTH`].
///
/// The first line leaves room for the header name. Lines are broken at the
/// last space that fits, the space being replaced by CRLF and a single space
/// of continuation; a stretch without any space is cut at the column limit.
/// A value already containing folds is only folded after its last fold.
pub fn fold_header_value(value: &str, name_len: usize) -> String {
    let mut max_len = FOLD_WIDTH.saturating_sub(name_len).max(1);

    if value.len() <= max_len {
        return value.into();
    }

    let (mut result, mut rest) = match value.rfind("\r\n ") {
        Some(i) => (value[..(i + 3)].to_owned(), &value[(i + 3)..]),
        None => (String::new(), value),
    };

    while rest.len() > max_len {
        match rest[..floor_char_boundary(rest, max_len)].rfind(' ') {
            Some(i) if i > 0 => {
                result.push_str(&rest[..i]);
                result.push_str("\r\n ");
                rest = &rest[(i + 1)..];
            }
            _ => {
                let i = floor_char_boundary(rest, max_len).max(next_char_boundary(rest));
                result.push_str(&rest[..i]);
                result.push_str("\r\n ");
                rest = &rest[i..];
            }
        }
        max_len = FOLD_WIDTH - 1;
    }

    result.push_str(rest);
    result
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(s: &str) -> usize {
    s.chars().next().map_or(0, char::len_utf8)
}

/// Formats the value of an `h=` tag: lowercase names separated by `" : "`.
pub fn format_signed_headers(signed_headers: &[FieldName]) -> String {
    signed_headers
        .iter()
        .map(|name| name.as_ref().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(" : ")
}

/// Returns the length of the Base64 encoding of some number of bytes.
pub fn encoded_base64_len(len: usize) -> usize {
    (len + 2) / 3 * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_lengths(s: &str) -> Vec<usize> {
        s.split("\r\n").map(|l| l.len()).collect()
    }

    #[test]
    fn fold_short_value_unchanged() {
        assert_eq!(fold_header_value("v=1; a=rsa-sha256", 14), "v=1; a=rsa-sha256");
    }

    #[test]
    fn fold_at_spaces() {
        let value = "v=1; a=rsa-sha256; c=relaxed/simple; d=example.com; i=@example.com; s=selector1; t=1700000000; h=from : to : subject";

        let folded = fold_header_value(value, 14);

        assert_eq!(
            folded,
            "v=1; a=rsa-sha256; c=relaxed/simple; d=example.com;\r\n i=@example.com; s=selector1; t=1700000000; h=from : to : subject"
        );
        assert_eq!(folded.replace("\r\n ", " "), value);
        assert!(line_lengths(&folded)[0] <= 72 - 14);
    }

    #[test]
    fn fold_hard_cut() {
        let value = format!("bh=abc; b={}", "A".repeat(150));

        let folded = fold_header_value(&value, 7);

        let lines: Vec<_> = folded.split("\r\n").collect();
        assert_eq!(lines[0], "bh=abc;");
        assert_eq!(lines[1].len(), 72);
        assert!(lines[1].starts_with(" b=AAA"));
        assert_eq!(lines[2].len(), 72);
        assert!(lines.iter().skip(1).all(|l| l.starts_with(' ') && l.len() <= 72));
        assert_eq!(folded.replace("\r\n ", ""), value.replace(' ', ""));
    }

    #[test]
    fn fold_continues_after_existing_fold() {
        let value = format!("a=1;\r\n {}", "x ".repeat(50));

        let folded = fold_header_value(&value, 0);

        assert!(folded.starts_with("a=1;\r\n x x"));
        assert!(line_lengths(&folded).iter().all(|&n| n <= 72));
    }

    #[test]
    fn format_signed_headers_ok() {
        let names = [
            FieldName::new("From").unwrap(),
            FieldName::new("To").unwrap(),
            FieldName::new("Subject").unwrap(),
        ];

        assert_eq!(format_signed_headers(&names), "from : to : subject");
    }

    #[test]
    fn encoded_base64_len_ok() {
        assert_eq!(encoded_base64_len(256), 344);
        assert_eq!(encoded_base64_len(64), 88);
        assert_eq!(encoded_base64_len(32), 44);
    }
}
