use crate::record::{DomainSpec, MacroElement, MacroName, Record};
use crate::{SpfDisposition, SpfResult};
use mailauth_dns::{DnsError, Lookup};
use std::fmt::Write;
use std::net::IpAddr;
use std::time::SystemTime;

/// Formats a client IP the way the `i`/`c` macros expect: dotted-decimal for
/// v4, dot-separated nibbles for v6.
struct IpDisplay {
    ip: IpAddr,
}

impl std::fmt::Display for IpDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip {
            IpAddr::V4(v4) => write!(f, "{v4}"),
            IpAddr::V6(v6) => {
                let mut first = true;
                for segment in v6.segments() {
                    for nibble in format!("{segment:04x}").chars() {
                        if !first {
                            f.write_char('.')?;
                        }
                        first = false;
                        f.write_char(nibble)?;
                    }
                }
                Ok(())
            }
        }
    }
}

pub struct SpfContext<'a> {
    sender: &'a str,
    local_part: &'a str,
    sender_domain: &'a str,
    helo: &'a str,
    mta: &'a str,
    pub(crate) domain: &'a str,
    pub(crate) client_ip: IpAddr,
    now: SystemTime,
}

impl<'a> SpfContext<'a> {
    /// Create a new evaluation context.
    ///
    /// - `sender` is the "MAIL FROM" identity (postmaster@<domain> if the
    ///   session supplied no MAIL FROM)
    /// - `domain` is the domain that provides the sought-after authorization information;
    ///   initially, the domain portion of `sender`
    /// - `client_ip` is the IP address of the SMTP client that is emitting the mail
    /// - `helo` is the HELO/EHLO domain, used only by the `%{h}` macro
    /// - `mta` is the domain name of the host performing this check, used only
    ///   by the `%{r}` macro in explanation text
    pub fn new(
        sender: &'a str,
        domain: &'a str,
        client_ip: IpAddr,
        helo: &'a str,
        mta: &'a str,
    ) -> Result<Self, SpfResult> {
        let Some((local_part, sender_domain)) = sender.split_once('@') else {
            return Err(SpfResult {
                disposition: SpfDisposition::PermError,
                context: format!(
                    "input sender parameter '{sender}' is missing @ sign to delimit local part and domain"
                ),
            });
        };

        Ok(Self {
            sender,
            local_part,
            sender_domain,
            helo,
            mta,
            domain,
            client_ip,
            now: SystemTime::now(),
        })
    }

    pub(crate) fn with_domain(&self, domain: &'a str) -> Self {
        Self { domain, ..*self }
    }

    pub async fn check(&self, resolver: &dyn Lookup) -> SpfResult {
        let initial_txt = match resolver.lookup_txt(self.domain).await {
            Ok(parts) if parts.is_empty() => {
                return SpfResult {
                    disposition: SpfDisposition::None,
                    context: format!("no SPF record published for {}", self.domain),
                }
            }
            Ok(parts) => parts,
            Err(err) => {
                return SpfResult {
                    disposition: match err {
                        DnsError::Temporary(..) => SpfDisposition::TempError,
                        DnsError::Permanent(..) => SpfDisposition::None,
                        DnsError::LookupLimitExceeded => SpfDisposition::PermError,
                    },
                    context: format!("{err}"),
                }
            }
        };

        let candidates: Vec<&String> = initial_txt
            .iter()
            .filter(|txt| txt.to_ascii_lowercase().starts_with("v=spf1"))
            .collect();

        let record = match candidates.as_slice() {
            [] => {
                return SpfResult {
                    disposition: SpfDisposition::None,
                    context: format!("no v=spf1 record published for {}", self.domain),
                }
            }
            [single] => single,
            _ => {
                return SpfResult {
                    disposition: SpfDisposition::PermError,
                    context: format!(
                        "{} publishes more than one v=spf1 record",
                        self.domain
                    ),
                }
            }
        };

        match Record::parse(record) {
            Ok(record) => record.evaluate(self, resolver).await,
            Err(err) => SpfResult {
                disposition: SpfDisposition::PermError,
                context: format!("failed to parse spf record: {err}"),
            },
        }
    }

    pub(crate) fn domain(&self, spec: Option<&DomainSpec>) -> Result<String, SpfResult> {
        let Some(spec) = spec else {
            return Ok(self.domain.to_owned());
        };

        self.expand(&spec.elements).map_err(|err| SpfResult {
            disposition: SpfDisposition::TempError,
            context: format!("error evaluating domain spec: {err}"),
        })
    }

    pub fn expand(&self, elements: &[MacroElement]) -> Result<String, String> {
        let (mut result, mut buf) = (String::new(), String::new());
        for element in elements {
            let m = match element {
                MacroElement::Literal(t) => {
                    result.push_str(t);
                    continue;
                }
                MacroElement::Macro(m) => m,
            };

            buf.clear();
            match m.name {
                MacroName::Sender => buf.push_str(self.sender),
                MacroName::LocalPart => buf.push_str(self.local_part),
                MacroName::SenderDomain => buf.push_str(self.sender_domain),
                MacroName::Domain => buf.push_str(self.domain),
                MacroName::HeloDomain => buf.push_str(self.helo),
                MacroName::ReverseDns => buf.push_str(match self.client_ip.is_ipv4() {
                    true => "in-addr",
                    false => "ip6",
                }),
                MacroName::ClientIp => {
                    buf.write_fmt(format_args!("{}", self.client_ip)).unwrap();
                }
                MacroName::Ip => buf
                    .write_fmt(format_args!("{}", IpDisplay { ip: self.client_ip }))
                    .unwrap(),
                MacroName::CurrentUnixTimeStamp => buf
                    .write_fmt(format_args!(
                        "{}",
                        self.now
                            .duration_since(SystemTime::UNIX_EPOCH)
                            .map(|d| d.as_secs())
                            .unwrap_or(0)
                    ))
                    .unwrap(),
                // "do not use" per RFC 7208 section 7.1; we never populate it.
                MacroName::ValidatedDomainName => {}
                MacroName::RelayingHostName => buf.push_str(self.mta),
            };

            let delimiters = if m.delimiters.is_empty() {
                "."
            } else {
                &m.delimiters
            };

            let mut tokens: Vec<&str> = buf.split(|c| delimiters.contains(c)).collect();

            if m.reverse {
                tokens.reverse();
            }

            if let Some(n) = m.transformer_digits {
                let n = n as usize;
                while tokens.len() > n {
                    tokens.remove(0);
                }
            }

            let output = tokens.join(".");

            if m.url_escape {
                // https://datatracker.ietf.org/doc/html/rfc7208#section-7.3:
                //   Uppercase macros expand exactly as their lowercase
                //   equivalents, and are then URL escaped.  URL escaping
                //   MUST be performed for characters not in the
                //   "unreserved" set.
                // https://datatracker.ietf.org/doc/html/rfc3986#section-2.3:
                //    unreserved  = ALPHA / DIGIT / "-" / "." / "_" / "~"
                for c in output.chars() {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '~' {
                        result.push(c);
                    } else {
                        let mut bytes = [0u8; 4];
                        for b in c.encode_utf8(&mut bytes).bytes() {
                            result.push_str(&format!("%{b:02x}"));
                        }
                    }
                }
            } else {
                result.push_str(&output);
            }
        }

        Ok(result)
    }
}
