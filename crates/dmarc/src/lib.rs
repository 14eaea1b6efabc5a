#![allow(dead_code)]
mod types;
#[cfg(test)]
mod tests;

use crate::types::mode::Mode;
use crate::types::record::Record;
pub use crate::types::policy::Policy;
pub use crate::types::results::{Disposition, DispositionWithContext, DmarcResult};
use mailauth_dns::{DnsError, Lookup};
use mailauth_message::AuthenticationResult;
use rand::Rng;
use std::str::FromStr;

/// Everything needed to evaluate DMARC alignment for a single message: the
/// `From:` domain the record is published under, the envelope `MAIL FROM`
/// domain SPF was evaluated against, and the already-computed DKIM/SPF
/// verdicts expressed as `Authentication-Results` entries.
pub struct DmarcContext<'a> {
    from_domain: &'a str,
    mail_from_domain: Option<&'a str>,
    dkim_results: &'a [AuthenticationResult],
    spf_result: Option<&'a AuthenticationResult>,
}

impl<'a> DmarcContext<'a> {
    pub fn new(
        from_domain: &'a str,
        mail_from_domain: Option<&'a str>,
        dkim_results: &'a [AuthenticationResult],
        spf_result: Option<&'a AuthenticationResult>,
    ) -> Self {
        Self {
            from_domain,
            mail_from_domain,
            dkim_results,
            spf_result,
        }
    }

    fn org_domain(&self) -> &'a str {
        psl::domain_str(self.from_domain).unwrap_or(self.from_domain)
    }

    /// Fetches and parses the sole `v=DMARC1` TXT record at `_dmarc.<domain>`,
    /// per RFC 7489 section 6.6.3: zero or more than one candidate is treated
    /// as "no record here", not an error.
    async fn fetch_record(
        &self,
        resolver: &dyn Lookup,
        domain: &str,
    ) -> Result<Option<Record>, DnsError> {
        let name = format!("_dmarc.{domain}");
        let answers = resolver.lookup_txt(&name).await?;
        let mut candidates = answers
            .iter()
            .filter(|txt| txt.to_ascii_lowercase().starts_with("v=dmarc1"));

        let Some(first) = candidates.next() else {
            return Ok(None);
        };
        if candidates.next().is_some() {
            return Ok(None);
        }

        match Record::from_str(first) {
            Ok(record) => Ok(Some(record)),
            Err(_) => Ok(None),
        }
    }

    pub async fn check(&self, resolver: &dyn Lookup) -> DispositionWithContext {
        let org_domain = self.org_domain();

        let at_from_domain = match self.fetch_record(resolver, self.from_domain).await {
            Ok(found) => found,
            Err(DnsError::Temporary(_, reason)) => return self.errored(self.from_domain, reason),
            Err(DnsError::Permanent(_, reason)) => return self.errored(self.from_domain, reason),
            Err(DnsError::LookupLimitExceeded) => {
                return self.errored(self.from_domain, "too many DNS lookups".to_owned())
            }
        };

        let (record, found_domain) = match at_from_domain {
            Some(record) => (record, self.from_domain),
            None if org_domain != self.from_domain => {
                match self.fetch_record(resolver, org_domain).await {
                    Ok(Some(record)) => (record, org_domain),
                    Ok(None) => return self.no_record(org_domain),
                    Err(DnsError::Temporary(_, reason)) => {
                        return self.errored(org_domain, reason)
                    }
                    Err(DnsError::Permanent(_, reason)) => {
                        return self.errored(org_domain, reason)
                    }
                    Err(DnsError::LookupLimitExceeded) => {
                        return self.errored(org_domain, "too many DNS lookups".to_owned())
                    }
                }
            }
            None => return self.no_record(self.from_domain),
        };

        let applicable_policy = if found_domain == self.from_domain {
            record.policy
        } else {
            record.subdomain_policy
        };

        let mut notes = Vec::new();
        let dkim_aligned = self.dkim_alignment(&record, &mut notes);
        let spf_aligned = self.spf_alignment(&record, org_domain, &mut notes);

        let aligned_method = if dkim_aligned {
            Some("dkim")
        } else if spf_aligned {
            Some("spf")
        } else {
            None
        };

        let dmarc_result = if aligned_method.is_some() {
            DmarcResult::Pass
        } else {
            DmarcResult::Fail
        };

        let mut result = Disposition::from(applicable_policy);
        if dmarc_result == DmarcResult::Pass {
            result = Disposition::Pass;
        } else if record.rate < 100 && !matches!(result, Disposition::None) {
            let roll: u8 = rand::thread_rng().gen_range(0..100);
            if roll >= record.rate {
                notes.push(format!(
                    "pct={} sampling excluded this message from policy enforcement",
                    record.rate
                ));
                result = Disposition::None;
            }
        }

        notes.insert(
            0,
            format!(
                "dmarc record found at {found_domain}: p={:?} sp={:?} adkim={:?} aspf={:?} pct={}",
                record.policy, record.subdomain_policy, record.align_dkim, record.align_spf, record.rate
            ),
        );

        DispositionWithContext {
            result,
            dmarc_result,
            policy: record.policy,
            subdomain_policy: record.subdomain_policy,
            aligned_method,
            domain: self.from_domain.to_string(),
            context: notes.join("; "),
        }
    }

    fn dkim_alignment(&self, record: &Record, notes: &mut Vec<String>) -> bool {
        let mut aligned = false;
        for result in self.dkim_results {
            let Some(signing_domain) = result.props.get("header.d") else {
                notes.push("dkim result is missing its d= signing domain".to_owned());
                continue;
            };

            let passed = result.result.eq_ignore_ascii_case("pass");
            let this_aligned = passed
                && match record.align_dkim {
                    Mode::Strict => signing_domain == self.from_domain,
                    Mode::Relaxed => {
                        psl::domain_str(signing_domain).unwrap_or(signing_domain.as_str())
                            == psl::domain_str(self.from_domain).unwrap_or(self.from_domain)
                    }
                };

            notes.push(format!(
                "dkim: d={signing_domain} result={} aligned={this_aligned}",
                result.result
            ));
            aligned |= this_aligned;
        }
        aligned
    }

    fn spf_alignment(&self, record: &Record, org_domain: &str, notes: &mut Vec<String>) -> bool {
        let Some(spf_result) = self.spf_result else {
            return false;
        };
        let Some(mail_from_domain) = self.mail_from_domain else {
            return false;
        };

        let passed = spf_result.result.eq_ignore_ascii_case("pass");
        let aligned = passed
            && match record.align_spf {
                Mode::Strict => mail_from_domain == self.from_domain,
                Mode::Relaxed => {
                    psl::domain_str(mail_from_domain).unwrap_or(mail_from_domain) == org_domain
                }
            };

        notes.push(format!(
            "spf: domain={mail_from_domain} result={} aligned={aligned}",
            spf_result.result
        ));
        aligned
    }

    fn no_record(&self, checked_domain: &str) -> DispositionWithContext {
        DispositionWithContext {
            result: Disposition::None,
            dmarc_result: DmarcResult::Fail,
            policy: Policy::None,
            subdomain_policy: Policy::None,
            aligned_method: None,
            domain: self.from_domain.to_string(),
            context: format!("no DMARC record published for {checked_domain}"),
        }
    }

    /// DMARC fails open: an unresolvable policy is reported as `none`, not as
    /// a distinct error disposition, with the lookup failure kept in
    /// `context` for diagnostics.
    fn errored(&self, checked_domain: &str, reason: String) -> DispositionWithContext {
        DispositionWithContext {
            result: Disposition::None,
            dmarc_result: DmarcResult::Fail,
            policy: Policy::None,
            subdomain_policy: Policy::None,
            aligned_method: None,
            domain: self.from_domain.to_string(),
            context: format!("DMARC lookup for {checked_domain} failed: {reason}"),
        }
    }
}
