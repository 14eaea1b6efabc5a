//! Recovers SMTP session context from a message's own trace headers, for
//! callers that only have the raw bytes and set `trust_received`.
//!
//! There's no standardized grammar for `Received:` beyond RFC 5321 section
//! 4.4's loose `"from" domain ["(" ... ")"]` shape, so this only understands
//! the common `from <helo> (<client-ip>)` form emitted by the MTAs this
//! engine is meant to sit behind.

use mailauth_message::HeaderMap;
use std::net::IpAddr;

pub struct ReceivedContext {
    pub helo: String,
    pub ip: IpAddr,
}

/// Parses the newest `Received:` header for the client HELO/EHLO name and
/// connecting address. Returns `None` if the header is missing or doesn't
/// match the `from <helo> (<ip>)` shape.
pub fn latest_received<'h>(headers: &'h HeaderMap<'h>) -> Option<ReceivedContext> {
    let value = headers.get_last("Received")?.get_raw_value();
    let rest = value.trim_start().strip_prefix("from ")?;

    let open = rest.find('(')?;
    let helo = rest[..open].trim().to_string();
    if helo.is_empty() {
        return None;
    }

    let close = rest[open..].find(')')? + open;
    let inside = rest[open + 1..close].trim();
    let ip: IpAddr = inside.parse().ok()?;

    Some(ReceivedContext { helo, ip })
}

/// Parses the newest `Return-Path:` header for the envelope sender, per the
/// `Return-Path: <local-part@domain>` / `Return-Path: <>` convention of RFC
/// 5321 section 4.4. A null (`<>`) return path yields `Some(String::new())`,
/// the same empty-sender value `mailauth_spf::evaluate` already treats as
/// "substitute postmaster@helo".
pub fn latest_return_path<'h>(headers: &'h HeaderMap<'h>) -> Option<String> {
    let value = headers.get_last("Return-Path")?.get_raw_value().trim();
    let inner = value.strip_prefix('<')?.strip_suffix('>')?;
    Some(inner.to_string())
}
