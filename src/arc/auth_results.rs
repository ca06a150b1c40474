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


use crate::error::Error;
use std::str::FromStr;

/// A parsed *Authentication-Results* header value (RFC 8601).
///
/// Comments are dropped, and whitespace around `=` is not significant.
/// Method names, results, and property names are lowercased.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthenticationResults {
    pub authserv_id: Box<str>,
    pub results: Vec<MethodResult>,
}

/// One *method=result* statement with its properties, for example
/// `spf=pass smtp.mailfrom=example.org`. A `reason=` is kept as a property.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MethodResult {
    pub method: Box<str>,
    pub result: Box<str>,
    pub properties: Vec<(Box<str>, Box<str>)>,
}

impl AuthenticationResults {
    pub fn parse(value: &str) -> Result<Self, Error> {
        let normalized = normalize(value)?;

        let mut statements = split_outside_quotes(&normalized, ';').into_iter();

        let authserv_id = statements
            .next()
            .and_then(|s| split_outside_quotes(s, ' ').into_iter().next())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::message_format("missing authserv-id"))?;

        let mut results = vec![];
        for statement in statements {
            if statement.is_empty() || statement.eq_ignore_ascii_case("none") {
                continue;
            }
            results.push(parse_statement(statement)?);
        }

        Ok(Self {
            authserv_id: unquote(authserv_id).into(),
            results,
        })
    }

    /// Returns the results for some method, for example `arc`.
    pub fn results_for<'a>(&'a self, method: &'a str) -> impl Iterator<Item = &'a MethodResult> {
        self.results
            .iter()
            .filter(move |r| r.method.eq_ignore_ascii_case(method))
    }
}

impl FromStr for AuthenticationResults {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Returns the result statements of an *Authentication-Results* header value
/// as text, without the authserv-id, comments, and `none`.
pub(crate) fn result_statements(value: &str) -> Result<Vec<String>, Error> {
    let normalized = normalize(value)?;

    Ok(split_outside_quotes(&normalized, ';')
        .into_iter()
        .skip(1)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
        .map(String::from)
        .collect())
}

fn parse_statement(statement: &str) -> Result<MethodResult, Error> {
    let mut tokens = split_outside_quotes(statement, ' ').into_iter();

    let (method, result) = tokens
        .next()
        .and_then(|t| t.split_once('='))
        .filter(|(m, r)| !m.is_empty() && !r.is_empty())
        .ok_or_else(|| Error::message_format(format!("invalid result statement: {statement}")))?;

    // method version, as in `dkim/1=pass`
    let method = method.split_once('/').map_or(method, |(m, _)| m);

    let mut properties = vec![];
    for token in tokens {
        let (name, value) = token
            .split_once('=')
            .ok_or_else(|| Error::message_format(format!("invalid property: {token}")))?;
        properties.push((name.to_ascii_lowercase().into(), unquote(value).into()));
    }

    Ok(MethodResult {
        method: method.to_ascii_lowercase().into(),
        result: unquote(result).to_ascii_lowercase().into(),
        properties,
    })
}

/// Removes comments, collapses whitespace to single spaces, and drops
/// whitespace next to `=` and `;`. Quoted strings are kept as they are.
fn normalize(value: &str) -> Result<String, Error> {
    let mut out = String::with_capacity(value.len());

    let mut depth = 0usize;
    let mut quoted = false;
    let mut escaped = false;
    let mut pending_space = false;

    for c in value.chars() {
        if escaped {
            escaped = false;
            if quoted {
                out.push(c);
            }
            continue;
        }

        if quoted {
            out.push(c);
            match c {
                '\\' => escaped = true,
                '"' => quoted = false,
                _ => {}
            }
            continue;
        }

        if depth > 0 {
            match c {
                '\\' => escaped = true,
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        pending_space = true;
                    }
                }
                _ => {}
            }
            continue;
        }

        match c {
            '(' => depth = 1,
            ' ' | '\t' | '\r' | '\n' => pending_space = true,
            _ => {
                if pending_space
                    && !matches!(c, '=' | ';')
                    && !out.is_empty()
                    && !out.ends_with(|p| p == '=' || p == ';')
                {
                    out.push(' ');
                }
                pending_space = false;

                if c == '"' {
                    quoted = true;
                }
                out.push(c);
            }
        }
    }

    if quoted || depth > 0 {
        return Err(Error::message_format("unterminated quoted string or comment"));
    }

    Ok(out)
}

fn split_outside_quotes(s: &str, sep: char) -> Vec<&str> {
    let mut parts = vec![];
    let mut quoted = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if quoted {
            match c {
                '\\' => escaped = true,
                '"' => quoted = false,
                _ => {}
            }
        } else if c == '"' {
            quoted = true;
        } else if c == sep {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);

    parts
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property(name: &str, value: &str) -> (Box<str>, Box<str>) {
        (name.into(), value.into())
    }

    #[test]
    fn parse_basic() {
        let ar = AuthenticationResults::parse(
            " mx.example.org;\r\n\tspf=pass smtp.mailfrom=example.com;\r\n\tdkim=pass (good signature) header.d=example.com;\r\n\tarc=none",
        )
        .unwrap();

        assert_eq!(&*ar.authserv_id, "mx.example.org");
        assert_eq!(ar.results.len(), 3);
        assert_eq!(&*ar.results[0].method, "spf");
        assert_eq!(&*ar.results[0].result, "pass");
        assert_eq!(ar.results[1].properties, [property("header.d", "example.com")]);
        assert_eq!(ar.results_for("ARC").count(), 1);
    }

    #[test]
    fn parse_version_comments_and_quotes() {
        let ar: AuthenticationResults =
            "example.org 1 (comment; with semicolon); dkim/1 = Fail reason=\"bad; sig\""
                .parse()
                .unwrap();

        assert_eq!(&*ar.authserv_id, "example.org");
        assert_eq!(ar.results.len(), 1);
        assert_eq!(&*ar.results[0].method, "dkim");
        assert_eq!(&*ar.results[0].result, "fail");
        assert_eq!(ar.results[0].properties, [property("reason", "bad; sig")]);
    }

    #[test]
    fn parse_none() {
        let ar = AuthenticationResults::parse("example.org; none").unwrap();

        assert!(ar.results.is_empty());
    }

    #[test]
    fn parse_errors() {
        assert!(AuthenticationResults::parse("").is_err());
        assert!(AuthenticationResults::parse("example.org; spf").is_err());
        assert!(AuthenticationResults::parse("example.org; spf=pass (open").is_err());
    }
}
