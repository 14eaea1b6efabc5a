use mailauth_dkim::DkimPrivateKey;
use std::net::IpAddr;

/// ARC sealing parameters, supplied only when the caller wants this call to
/// add the next instance to the message's ARC chain.
pub struct SealOptions {
    pub signing_domain: String,
    pub selector: String,
    pub private_key: DkimPrivateKey,
}

/// Everything [`crate::authenticate`] needs for one message. SMTP context
/// (`ip`/`helo`/`sender`) is normally supplied by the MTA that invoked the
/// check; set `trust_received` instead when the caller only has the raw
/// message and wants that context recovered from its trace headers.
pub struct AuthenticateOptions<'a> {
    pub ip: Option<IpAddr>,
    pub helo: Option<String>,
    pub sender: Option<String>,
    /// Identifier this host is known as, used as the `Authentication-Results`
    /// `authserv-id` and in ARC's `ARC-Authentication-Results`. Defaults to
    /// the local hostname.
    pub mta: String,
    /// Recover `ip`/`helo`/`sender` from the newest `Received:`/`Return-Path:`
    /// headers when they were not supplied directly.
    pub trust_received: bool,
    pub resolver: &'a dyn mailauth_dns::Lookup,
    /// RFC 8301's minimum accepted RSA key width; signatures with a
    /// narrower key still verify but are reported as `dkim=policy`.
    pub min_bit_length: u32,
    /// Cap on DNS-querying SPF mechanisms/modifiers (RFC 7208 section 4.6.4).
    pub max_resolve_count: u32,
    pub seal: Option<SealOptions>,
    pub disable_arc: bool,
    pub disable_dmarc: bool,
    pub disable_bimi: bool,
}

impl<'a> AuthenticateOptions<'a> {
    /// Starting point carrying this host's hostname as `mta` and the RFC
    /// defaults for the two DNS-lookup ceilings; callers still must supply a
    /// resolver.
    pub fn new(resolver: &'a dyn mailauth_dns::Lookup) -> Self {
        Self {
            ip: None,
            helo: None,
            sender: None,
            mta: gethostname::gethostname()
                .to_str()
                .unwrap_or("localhost")
                .to_string(),
            trust_received: false,
            resolver,
            min_bit_length: 1024,
            max_resolve_count: mailauth_spf::DEFAULT_LOOKUP_LIMIT,
            seal: None,
            disable_arc: false,
            disable_dmarc: false,
            disable_bimi: false,
        }
    }
}
