//! VMC Parser (component C12): extracts the `subjectAltName` DNS names and
//! the embedded logotype SVG from a caller-supplied Verified Mark
//! Certificate. This crate never fetches the certificate itself and
//! performs no chain-of-trust verification — that is the caller's
//! responsibility, same as this engine's DNS facade never runs its own
//! resolver.

mod error;

pub use error::VmcError;

use base64::engine::general_purpose;
use base64::Engine;
use std::io::Read;
use x509_parser::prelude::*;

/// id-pe-logotype, RFC 3709.
const LOGOTYPE_EXTENSION_OID: &str = "1.3.6.1.5.5.7.1.12";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmcResult {
    pub dns_names: Vec<String>,
    pub svg: Vec<u8>,
}

/// Parses a PEM-encoded VMC, returning its `subjectAltName` DNS names and the
/// gunzipped SVG payload embedded in its logotype extension.
pub fn parse(pem: &[u8]) -> Result<VmcResult, VmcError> {
    let (_, pem) = parse_x509_pem(pem).map_err(|err| VmcError::Malformed(err.to_string()))?;
    let cert = pem
        .parse_x509()
        .map_err(|err| VmcError::Malformed(err.to_string()))?;

    let dns_names = match cert.subject_alternative_name() {
        Ok(Some(ext)) => match ext.parsed_extension() {
            ParsedExtension::SubjectAlternativeName(san) => san
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(name) => Some(name.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let logotype = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == LOGOTYPE_EXTENSION_OID)
        .ok_or(VmcError::MissingLogotypeExtension)?;

    let data_uri = find_data_uri(logotype.value).ok_or(VmcError::NoIndicatorUri)?;
    let gzipped = general_purpose::STANDARD
        .decode(data_uri)
        .map_err(|err| VmcError::Malformed(err.to_string()))?;

    let mut svg = Vec::new();
    flate2::read::GzDecoder::new(&gzipped[..])
        .read_to_end(&mut svg)
        .map_err(|err| VmcError::Malformed(err.to_string()))?;

    Ok(VmcResult { dns_names, svg })
}

/// Scans `value` for the first `data:...;base64,` URI and returns the
/// base64 payload that follows the comma. The logotype extension's DER
/// bytes are treated as an opaque byte string to search rather than parsed
/// via the full `LogotypeInfo` ASN.1 grammar (RFC 6170), since the embedded
/// URI is the only thing ever consumed here.
fn find_data_uri(value: &[u8]) -> Option<&str> {
    const MARKER: &[u8] = b"data:";
    let start = value.windows(MARKER.len()).position(|w| w == MARKER)?;
    let rest = &value[start..];
    let comma = rest.iter().position(|&b| b == b',')?;
    let header = std::str::from_utf8(&rest[..comma]).ok()?;
    if !header.ends_with(";base64") {
        return None;
    }

    let payload = &rest[comma + 1..];
    let end = payload
        .iter()
        .position(|&b| !is_base64_byte(b))
        .unwrap_or(payload.len());
    std::str::from_utf8(&payload[..end]).ok()
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}
