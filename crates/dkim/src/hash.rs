use crate::canonicalization;
use crate::{DKIMError, ParsedEmail};
use base64::engine::general_purpose;
use base64::Engine;
use mailauth_message::Header;
use sha1::{Digest as _, Sha1};
use sha2::Sha256;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub enum HashAlgo {
    RsaSha1,
    RsaSha256,
    Ed25519Sha256,
}

impl HashAlgo {
    pub fn algo_name(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "rsa-sha1",
            Self::RsaSha256 => "rsa-sha256",
            Self::Ed25519Sha256 => "ed25519-sha256",
        }
    }
}

pub(crate) struct LimitHasher {
    pub limit: usize,
    pub hashed: usize,
    pub hasher: HashImpl,
}

impl LimitHasher {
    pub fn hash(&mut self, bytes: &[u8]) {
        let remain = self.limit - self.hashed;
        let len = bytes.len().min(remain);
        self.hasher.hash(&bytes[..len]);
        self.hashed += len;
    }

    pub fn finalize(self) -> String {
        self.hasher.finalize()
    }

    #[cfg(test)]
    pub fn finalize_bytes(self) -> Vec<u8> {
        self.hasher.finalize_bytes()
    }
}

pub(crate) enum HashImpl {
    Sha1(Sha1),
    Sha256(Sha256),
    #[cfg(test)]
    Copy(Vec<u8>),
}

impl HashImpl {
    pub fn from_algo(algo: HashAlgo) -> Self {
        match algo {
            HashAlgo::RsaSha1 => Self::Sha1(Sha1::new()),
            HashAlgo::RsaSha256 | HashAlgo::Ed25519Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    #[cfg(test)]
    pub fn copy_data() -> Self {
        Self::Copy(vec![])
    }

    pub fn hash(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha1(hasher) => hasher.update(bytes),
            Self::Sha256(hasher) => hasher.update(bytes),
            #[cfg(test)]
            Self::Copy(data) => data.extend_from_slice(bytes),
        }
    }

    pub fn finalize(self) -> String {
        match self {
            Self::Sha1(hasher) => general_purpose::STANDARD.encode(hasher.finalize()),
            Self::Sha256(hasher) => general_purpose::STANDARD.encode(hasher.finalize()),
            #[cfg(test)]
            Self::Copy(data) => String::from_utf8_lossy(&data).into(),
        }
    }

    pub fn finalize_bytes(self) -> Vec<u8> {
        match self {
            Self::Sha1(hasher) => hasher.finalize().to_vec(),
            Self::Sha256(hasher) => hasher.finalize().to_vec(),
            #[cfg(test)]
            Self::Copy(data) => data,
        }
    }
}

/// An ordered, lowercased `h=` tag header name list.
#[derive(Debug, Clone, Default)]
pub(crate) struct HeaderList(Vec<String>);

impl HeaderList {
    pub(crate) fn new(headers: Vec<String>) -> Self {
        Self(headers)
    }

    pub(crate) fn as_h_list(&self) -> String {
        self.0.join(":")
    }

    fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }
}

/// Returns the hash of message's body
/// https://datatracker.ietf.org/doc/html/rfc6376#section-3.7
pub(crate) fn compute_body_hash<'a>(
    canonicalization_type: canonicalization::Type,
    length: Option<&str>,
    hash_algo: HashAlgo,
    email: &'a ParsedEmail<'a>,
) -> Result<String, DKIMError> {
    let body = email.get_body();
    let body = body.as_bytes();

    let limit = if let Some(length) = length {
        length
            .parse::<usize>()
            .map_err(|err| DKIMError::SignatureSyntaxError(format!("invalid length: {}", err)))?
    } else {
        usize::MAX
    };

    let mut hasher = LimitHasher {
        hasher: HashImpl::from_algo(hash_algo),
        limit,
        hashed: 0,
    };

    canonicalization_type.canon_body(body, &mut hasher);

    Ok(hasher.finalize())
}

/// Picks out the headers named in `h=`, in the order the signer selected
/// them, walking from the bottom of the message upward so that repeated
/// header names are consumed most-recent-first (see RFC 6376 section 5.4.2).
fn select_headers<'a>(
    signed: &HeaderList,
    email: &'a ParsedEmail<'a>,
) -> Result<Vec<(String, &'a str)>, DKIMError> {
    let mut signed_headers = vec![];

    let email_headers = email.get_headers();
    let num_headers = email_headers.len();
    let mut last_index: HashMap<&str, usize> = HashMap::new();

    'outer: for name in signed.iter() {
        let index = *last_index.get(name).unwrap_or(&num_headers);
        for (header_index, header) in email_headers
            .iter()
            .enumerate()
            .rev()
            .skip(num_headers - index)
        {
            if header.get_name().eq_ignore_ascii_case(name) {
                signed_headers.push((header.get_name().to_string(), header.get_raw_value()));
                last_index.insert(name, header_index);
                continue 'outer;
            }
        }

        last_index.insert(name, 0);
    }

    Ok(signed_headers)
}

/// Computes the canonicalized header hash input for a DKIM-Signature or
/// ARC-Message-Signature header: the `h=`-selected headers followed by the
/// signing header itself with its `b=` value blanked out.
///
/// `H` is any of the tagged header wrappers (`DKIMHeader`,
/// `ARCMessageSignatureHeader`) since they share the same tag grammar; only
/// the wire header name differs, which is why it's passed separately.
pub(crate) fn compute_headers_hash<'a, H>(
    canonicalization_type: canonicalization::Type,
    headers: &HeaderList,
    hash_algo: HashAlgo,
    header_name: &str,
    signing_header: &H,
    email: &'a ParsedEmail<'a>,
) -> Result<Vec<u8>, DKIMError>
where
    H: std::ops::Deref<Target = crate::header::TaggedHeader>,
{
    let mut input = Vec::new();
    let mut hasher = HashImpl::from_algo(hash_algo);

    for (key, value) in select_headers(headers, email)? {
        canonicalization_type.canon_header_into(&key, value.as_bytes(), &mut input);
    }

    append_signing_header(
        canonicalization_type,
        header_name,
        signing_header,
        &mut input,
    );
    tracing::debug!("headers to hash: {:?}", input);

    hasher.hash(&input);
    Ok(hasher.finalize_bytes())
}

/// Computes the hash input for an ARC-Seal header: every prior chain header
/// (`AAR`, `AMS`, `AS` for instances `1..i-1`) plus the current instance's
/// `AAR`/`AMS`, in wire order, followed by the seal itself with `b=` blanked.
/// <https://datatracker.ietf.org/doc/html/rfc8617#section-5.1.1>
pub(crate) fn compute_arc_seal_hash<H>(
    canonicalization_type: canonicalization::Type,
    header_name: &str,
    chain_headers: &[&Header<'_>],
    hash_algo: HashAlgo,
    signing_header: &H,
) -> Result<Vec<u8>, DKIMError>
where
    H: std::ops::Deref<Target = crate::header::TaggedHeader>,
{
    let mut input = Vec::new();
    let mut hasher = HashImpl::from_algo(hash_algo);

    for header in chain_headers {
        canonicalization_type.canon_header_into(
            header.get_name(),
            header.get_raw_value().as_bytes(),
            &mut input,
        );
    }

    append_signing_header(
        canonicalization_type,
        header_name,
        signing_header,
        &mut input,
    );
    tracing::debug!("arc seal hash input: {:?}", input);

    hasher.hash(&input);
    Ok(hasher.finalize_bytes())
}

fn append_signing_header<H>(
    canonicalization_type: canonicalization::Type,
    header_name: &str,
    signing_header: &H,
    input: &mut Vec<u8>,
) where
    H: std::ops::Deref<Target = crate::header::TaggedHeader>,
{
    let sign = signing_header.get_required_raw_tag("b");
    let value = signing_header.raw_bytes.replace(&sign, "");
    let mut canonicalized_value = vec![];
    canonicalization_type.canon_header_into(header_name, value.as_bytes(), &mut canonicalized_value);

    // remove trailing "\r\n"
    canonicalized_value.truncate(canonicalized_value.len() - 2);

    input.extend_from_slice(&canonicalized_value);
}
