//! BIMI resolution (component C10): fetches and parses the selector TXT
//! record once the caller has established the DMARC gate described in
//! RFC-draft BIMI section 4.1. This crate never fetches or validates the
//! indicator image or the VMC itself — that is [`mailauth-vmc`]'s job, given
//! whatever certificate bytes the caller already retrieved.

mod record;

pub use record::BimiRecord;

use mailauth_dns::{DnsError, Lookup};
use std::fmt;

/// Falls back to this selector when the message carries no `BIMI-Selector`
/// header.
pub const DEFAULT_SELECTOR: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BimiDisposition {
    Pass,
    None,
    /// The DMARC gate was not satisfied; no DNS lookup was performed.
    Skipped,
    TempError,
    PermError,
}

impl fmt::Display for BimiDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::None => "none",
            Self::Skipped => "skipped",
            Self::TempError => "temperror",
            Self::PermError => "permerror",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BimiResult {
    pub disposition: BimiDisposition,
    pub record: Option<BimiRecord>,
    pub context: String,
}

/// Evaluates BIMI for `domain` if `dmarc_eligible` is true.
///
/// `dmarc_eligible` is the caller's (the Aggregator's) already-computed gate:
/// DMARC must have passed and the applicable published policy (`p`, or `sp`
/// for subdomain mail) must not be `none`. Eligibility never depends on
/// `pct` — a message that DMARC-passes is BIMI-eligible even when the
/// record's sampling rate is below 100.
pub async fn evaluate(
    domain: &str,
    selector: Option<&str>,
    dmarc_eligible: bool,
    resolver: &dyn Lookup,
) -> BimiResult {
    if !dmarc_eligible {
        return BimiResult {
            disposition: BimiDisposition::Skipped,
            record: None,
            context: "DMARC did not gate this message as BIMI-eligible".to_owned(),
        };
    }

    let selector = selector.unwrap_or(DEFAULT_SELECTOR);
    let name = format!("{selector}._bimi.{domain}");

    let answers = match resolver.lookup_txt(&name).await {
        Ok(answers) => answers,
        Err(DnsError::Temporary(_, reason)) => {
            return BimiResult {
                disposition: BimiDisposition::TempError,
                record: None,
                context: reason,
            }
        }
        Err(DnsError::Permanent(_, reason)) => {
            return BimiResult {
                disposition: BimiDisposition::PermError,
                record: None,
                context: reason,
            }
        }
        Err(DnsError::LookupLimitExceeded) => {
            return BimiResult {
                disposition: BimiDisposition::TempError,
                record: None,
                context: "too many DNS lookups".to_owned(),
            }
        }
    };

    let mut candidates = answers
        .iter()
        .filter(|txt| txt.to_ascii_lowercase().starts_with("v=bimi1"));

    let Some(first) = candidates.next() else {
        return BimiResult {
            disposition: BimiDisposition::None,
            record: None,
            context: format!("no BIMI record published at {name}"),
        };
    };
    if candidates.next().is_some() {
        return BimiResult {
            disposition: BimiDisposition::PermError,
            record: None,
            context: format!("multiple BIMI records at {name}"),
        };
    }

    match BimiRecord::parse(selector, first) {
        Ok(record) => BimiResult {
            disposition: BimiDisposition::Pass,
            record: Some(record),
            context: format!("BIMI record found at {name}"),
        },
        Err(reason) => BimiResult {
            disposition: BimiDisposition::PermError,
            record: None,
            context: reason,
        },
    }
}
