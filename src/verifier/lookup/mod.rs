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

//! Public key lookup in DNS.

use crate::{
    error::KeyFormatError,
    record::{DkimKeyRecord, PublicKeyRecord},
    signature::{DomainName, Selector},
};
use std::{
    future::Future,
    io::{self, ErrorKind},
    str,
    time::Duration,
};
use tokio::time;
use tracing::trace;

/// A trait for looking up DNS TXT records containing DKIM public key records.
///
/// The error type used here is `std::io::Error`. The following error kinds on
/// the query result are recognised and receive special treatment.
///
/// * `ErrorKind::InvalidInput` on the query: the domain argument could not be used
/// * `ErrorKind::NotFound` on the query: NXDOMAIN, no key record found
/// * `ErrorKind::TimedOut` on the query: timeout
///
/// The inner, per-record `std::io::Error` can be used to signal errors
/// (parsing, encoding) with individual TXT records.
pub trait LookupTxt: Send + Sync {
    /// The answer consisting of TXT records found.
    type Answer: IntoIterator<Item = io::Result<Vec<u8>>>;
    /// The future resolving to the query’s answer.
    type Query<'a>: Future<Output = io::Result<Self::Answer>> + Send + 'a
    where
        Self: 'a;

    /// Looks up the domain’s TXT records in DNS.
    ///
    /// The domain is passed in A-label (ASCII) form with a trailing dot, eg
    /// `selector._domainkey.example.com.`.
    fn lookup_txt(&self, domain: &str) -> Self::Query<'_>;
}

/// The number of TXT records in an answer that are tried at most.
const MAX_RECORDS: usize = 3;

/// Looks up and parses the public key record for a domain and selector.
///
/// The whole lookup is bounded by `timeout`. Of the TXT records returned the
/// first one that yields a usable key wins.
pub async fn look_up_key<T>(
    resolver: &T,
    domain: &DomainName,
    selector: &Selector,
    timeout: Duration,
) -> Result<PublicKeyRecord, KeyFormatError>
where
    T: LookupTxt + ?Sized,
{
    // Note the trailing dot: only absolute queries.
    let dname = format!("{}._domainkey.{}.", selector.to_ascii(), domain.to_ascii());

    trace!(%domain, %selector, "looking up public key record");

    let txts = match time::timeout(timeout, resolver.lookup_txt(&dname)).await {
        Ok(Ok(txts)) => txts,
        Ok(Err(e)) => {
            trace!(%dname, "key lookup failed: {e}");
            return Err(match e.kind() {
                ErrorKind::NotFound => KeyFormatError::NoKeyFound,
                ErrorKind::TimedOut => KeyFormatError::LookupTimeout,
                ErrorKind::InvalidInput => KeyFormatError::InvalidKeyDomain,
                _ => KeyFormatError::LookupFailure,
            });
        }
        Err(_) => {
            trace!(%dname, "key lookup timed out");
            return Err(KeyFormatError::LookupTimeout);
        }
    };

    let mut last_error = KeyFormatError::NoKeyFound;

    for txt in txts.into_iter().take(MAX_RECORDS) {
        let result = txt
            .map_err(|_| KeyFormatError::LookupFailure)
            .and_then(|bytes| parse_key_record(&bytes));

        match result {
            Ok(record) => {
                trace!(%dname, key_type = %record.key_type(), key_size = record.key_size, "found public key");
                return Ok(record);
            }
            Err(e) => {
                trace!(%dname, "unusable key record: {e}");
                last_error = e;
            }
        }
    }

    Err(last_error)
}

fn parse_key_record(bytes: &[u8]) -> Result<PublicKeyRecord, KeyFormatError> {
    let s = str::from_utf8(bytes).map_err(|_| KeyFormatError::LookupFailure)?;
    let record = s.parse::<DkimKeyRecord>()?;
    PublicKeyRecord::from_key_record(&record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyType;
    use std::pin::Pin;

    const ED25519_RECORD: &str = "v=DKIM1; k=ed25519; p=9VXMCgG0fXGIzwV7eOxKhz+Pe6DRmOBYjyvVoVrc/Dw=";

    struct MockLookupTxt;

    impl LookupTxt for MockLookupTxt {
        type Answer = Vec<io::Result<Vec<u8>>>;
        type Query<'a> = Pin<Box<dyn Future<Output = io::Result<Self::Answer>> + Send + 'a>>;

        fn lookup_txt(&self, domain: &str) -> Self::Query<'_> {
            let domain = domain.to_owned();

            Box::pin(async move {
                match domain.as_str() {
                    "sel._domainkey.example.com." => Ok(vec![
                        Ok(b"v=DKIM1; p=".to_vec()),
                        Ok(b"\xff\xfe".to_vec()),
                        Ok(ED25519_RECORD.as_bytes().to_vec()),
                        Ok(b"v=DKIM1; k=rsa; p=YWJj".to_vec()),
                    ]),
                    "xn--53h._domainkey.example.xn--fiqs8s." => {
                        Ok(vec![Ok(ED25519_RECORD.as_bytes().to_vec())])
                    }
                    "fourth._domainkey.example.com." => Ok(vec![
                        Ok(b"v=DKIM1; p=".to_vec()),
                        Ok(b"v=DKIM1; p=".to_vec()),
                        Ok(b"v=DKIM1; p=".to_vec()),
                        Ok(ED25519_RECORD.as_bytes().to_vec()),
                    ]),
                    "slow._domainkey.example.com." => {
                        time::sleep(Duration::from_secs(60)).await;
                        Ok(vec![])
                    }
                    "empty._domainkey.example.com." => Ok(vec![]),
                    _ => Err(ErrorKind::NotFound.into()),
                }
            })
        }
    }

    async fn look_up(domain: &str, selector: &str) -> Result<PublicKeyRecord, KeyFormatError> {
        let domain = DomainName::new(domain).unwrap();
        let selector = Selector::new(selector).unwrap();
        look_up_key(&MockLookupTxt, &domain, &selector, Duration::from_secs(5)).await
    }

    #[tokio::test]
    async fn look_up_key_skips_bad_records() {
        let record = look_up("example.com", "sel").await.unwrap();

        assert_eq!(record.key_type(), KeyType::Ed25519);
        assert_eq!(record.key_size, 256);
    }

    #[tokio::test]
    async fn look_up_key_uses_a_labels() {
        let record = look_up("Example.中国", "☕").await.unwrap();

        assert_eq!(record.key_type(), KeyType::Ed25519);
    }

    #[tokio::test]
    async fn look_up_key_tries_three_records() {
        let e = look_up("example.com", "fourth").await.unwrap_err();

        assert_eq!(e, KeyFormatError::KeyRevoked);
    }

    #[tokio::test]
    async fn look_up_key_not_found() {
        assert_eq!(look_up("example.org", "sel").await, Err(KeyFormatError::NoKeyFound));
        assert_eq!(look_up("example.com", "empty").await, Err(KeyFormatError::NoKeyFound));
    }

    #[tokio::test(start_paused = true)]
    async fn look_up_key_timeout() {
        assert_eq!(look_up("example.com", "slow").await, Err(KeyFormatError::LookupTimeout));
    }
}
