mod context;
pub mod record;

use context::SpfContext;
use mailauth_dns::{CountedLookup, Lookup, LookupBudget};
use record::Qualifier;
use std::fmt;
use std::net::IpAddr;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpfDisposition {
    /// A result of "none" means either (a) no syntactically valid DNS domain
    /// name was extracted from the SMTP session that could be used as the
    /// one to be authorized, or (b) no SPF records were retrieved from
    /// the DNS.
    None,

    /// A "neutral" result means the ADMD has explicitly stated that it is
    /// not asserting whether the IP address is authorized.
    Neutral,

    /// A "pass" result is an explicit statement that the client is
    /// authorized to inject mail with the given identity.
    Pass,

    /// A "fail" result is an explicit statement that the client is not
    /// authorized to use the domain in the given identity.
    Fail,

    /// A "softfail" result is a weak statement by the publishing ADMD that
    /// the host is probably not authorized.  It has not published a
    /// stronger, more definitive policy that results in a "fail".
    SoftFail,

    /// A "temperror" result means the SPF verifier encountered a transient
    /// (generally DNS) error while performing the check.  A later retry may
    /// succeed without further DNS operator action.
    TempError,

    /// A "permerror" result means the domain's published records could not
    /// be correctly interpreted.  This signals an error condition that
    /// definitely requires DNS operator intervention to be resolved.
    PermError,
}

impl From<Qualifier> for SpfDisposition {
    fn from(qualifier: Qualifier) -> Self {
        match qualifier {
            Qualifier::Pass => Self::Pass,
            Qualifier::Fail => Self::Fail,
            Qualifier::SoftFail => Self::SoftFail,
            Qualifier::Neutral => Self::Neutral,
        }
    }
}

impl fmt::Display for SpfDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Neutral => "neutral",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::SoftFail => "softfail",
            Self::TempError => "temperror",
            Self::PermError => "permerror",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpfResult {
    pub disposition: SpfDisposition,
    pub context: String,
}

/// RFC 7208 section 4.6.4's recommended cap on DNS-querying mechanisms and
/// modifiers evaluated for a single `check_host()` call.
pub const DEFAULT_LOOKUP_LIMIT: u32 = 50;

impl SpfResult {
    pub(crate) fn fail(context: String) -> Self {
        Self {
            disposition: SpfDisposition::Fail,
            context,
        }
    }
}

/// Normalizes an IPv4-mapped IPv6 address (`::ffff:a.b.c.d`) down to its
/// plain IPv4 form, since SPF matching operates on whichever family the
/// record author actually published.
fn unmap_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        other => other,
    }
}

/// Evaluates the "check_host()" function from RFC 7208 for a single message.
///
/// `ip` is the SMTP client's connecting address, `helo` is the HELO/EHLO
/// domain from the session, `mail_from` is the MAIL FROM address (or empty,
/// in which case `postmaster@<helo>` is substituted per RFC 7208 section
/// 4.1), and `mta` is the domain name of the host performing this check
/// (used only by the `%{r}` macro in explanation text). Uses the RFC 7208
/// default lookup limit of 50; see [`evaluate_with_limit`] to override it.
pub async fn evaluate(
    ip: IpAddr,
    helo: &str,
    mail_from: &str,
    resolver: &dyn Lookup,
    mta: &str,
) -> SpfResult {
    evaluate_with_limit(ip, helo, mail_from, resolver, mta, DEFAULT_LOOKUP_LIMIT).await
}

/// Same as [`evaluate`] but with a caller-chosen cap on DNS-querying
/// mechanisms/modifiers, for callers that expose this as a configuration
/// knob rather than hardcoding RFC 7208's suggested default.
pub async fn evaluate_with_limit(
    ip: IpAddr,
    helo: &str,
    mail_from: &str,
    resolver: &dyn Lookup,
    mta: &str,
    max_lookups: u32,
) -> SpfResult {
    let ip = unmap_ip(ip);

    let owned_sender;
    let sender: &str = if mail_from.is_empty() || !mail_from.contains('@') {
        owned_sender = format!("postmaster@{helo}");
        &owned_sender
    } else {
        mail_from
    };

    let domain = match sender.split_once('@') {
        Some((_, domain)) => domain,
        None => {
            return SpfResult {
                disposition: SpfDisposition::PermError,
                context: format!("'{sender}' has no domain part"),
            }
        }
    };

    let cx = match SpfContext::new(sender, domain, ip, helo, mta) {
        Ok(cx) => cx,
        Err(result) => return result,
    };

    let budget = LookupBudget::new(max_lookups);
    let counted = CountedLookup::new(resolver, &budget);
    cx.check(&counted).await
}
