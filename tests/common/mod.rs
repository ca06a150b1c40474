use std::{future::Future, io, pin::Pin, sync::Arc};
use tokio::fs;
use viaseal::{
    crypto::SigningKey,
    header::HeaderFields,
    signer::SignedHeader,
    verifier::LookupTxt,
};

pub type LookupOutput = Vec<io::Result<Vec<u8>>>;
pub type LookupFuture<'a> = Pin<Box<dyn Future<Output = io::Result<LookupOutput>> + Send + 'a>>;

#[derive(Clone)]
pub struct MockLookup(Arc<dyn Fn(&str) -> LookupFuture<'_> + Send + Sync>);

impl MockLookup {
    pub fn new(f: impl Fn(&str) -> LookupFuture<'_> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl LookupTxt for MockLookup {
    type Answer = LookupOutput;
    type Query<'a> = Pin<Box<dyn Future<Output = io::Result<Self::Answer>> + Send + 'a>>;

    fn lookup_txt(&self, domain: &str) -> Self::Query<'_> {
        let domain = domain.to_owned();

        Box::pin(async move { self.0(&domain).await })
    }
}

/// The raw Ed25519 public key belonging to `tests/keys/ed25519.pem`.
pub const ED25519_PUBLIC_KEY: &str = "9VXMCgG0fXGIzwV7eOxKhz+Pe6DRmOBYjyvVoVrc/Dw=";

/// A resolver serving the test keys: RSA under selectors `s1`, `sel`, and
/// `rsa`; Ed25519 under `ed` and `arc`.
pub fn make_resolver() -> MockLookup {
    MockLookup::new(|name| {
        Box::pin(async move {
            match name {
                "s1._domainkey.x.com."
                | "sel._domainkey.example.com."
                | "rsa._domainkey.example.org." => {
                    let base64 = read_public_key_file_base64("tests/keys/rsa2048.pub.pem").await?;
                    Ok(vec![Ok(format!("v=DKIM1; k=rsa; p={base64}").into())])
                }
                "ed._domainkey.example.com." | "arc._domainkey.example.org." => {
                    Ok(vec![Ok(format!("v=DKIM1; k=ed25519; p={ED25519_PUBLIC_KEY}").into())])
                }
                _ => Err(io::ErrorKind::NotFound.into()),
            }
        })
    })
}

pub async fn read_public_key_file_base64(file_name: &str) -> io::Result<String> {
    let s = fs::read_to_string(file_name).await?;
    let mut key_base64: Vec<_> = s.lines().skip(1).collect();
    key_base64.pop();
    Ok(key_base64.join(""))
}

pub async fn read_signing_key(file_name: &str) -> io::Result<SigningKey> {
    let s = fs::read_to_string(file_name).await?;
    Ok(SigningKey::from_pkcs8_pem(&s).unwrap())
}

/// Prepends signed headers to a header, keeping their order: the first
/// header ends up on top.
pub fn prepend_headers<'a, I>(headers: &HeaderFields, signed: I) -> HeaderFields
where
    I: IntoIterator<Item = &'a SignedHeader>,
    I::IntoIter: DoubleEndedIterator,
{
    signed.into_iter().rev().fold(headers.clone(), |headers, header| {
        headers.prepend(header.to_header_field().unwrap())
    })
}

/// Replaces the value of the first header field with the given name and
/// instance tag, using some string substitution.
pub fn tamper(headers: &HeaderFields, name: &str, instance: u32, from: &str, to: &str) -> HeaderFields {
    let prefix = format!(" i={instance};");
    let mut fields = headers.as_ref().to_vec();

    let field = fields
        .iter_mut()
        .find(|(n, v)| *n == name && v.as_ref().starts_with(prefix.as_bytes()))
        .unwrap();

    let value = String::from_utf8(field.1.as_ref().to_vec()).unwrap();
    assert!(value.contains(from));
    field.1 = viaseal::FieldBody::new(value.replacen(from, to, 1).into_bytes()).unwrap();

    HeaderFields::new(fields).unwrap()
}
