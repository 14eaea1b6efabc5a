//! Combines DKIM, SPF, ARC, DMARC and BIMI into the single authentication
//! call an inbound MTA makes per message: [`authenticate`].
//!
//! Each concern (`mailauth-dkim`, `mailauth-spf`, `mailauth-dmarc`,
//! `mailauth-bimi`) stays independently usable; this crate only wires their
//! already-typed verdicts together and formats the headers a receiver would
//! prepend to the message.

mod options;
mod received;

pub use options::{AuthenticateOptions, SealOptions};

use mailauth_dkim::arc::{self, ArcResult, ArcSealerBuilder, ChainValidation};
use mailauth_dkim::{verify_email_with_min_bits, DKIMError, ParsedEmail};
use mailauth_dmarc::{DispositionWithContext, DmarcContext, DmarcResult, Policy};
use mailauth_message::{AuthenticationResult, AuthenticationResults, Header};
use std::collections::BTreeMap;
use std::net::IpAddr;

#[derive(Debug, thiserror::Error)]
pub enum AuthenticateError {
    #[error("message could not be parsed: {0}")]
    MalformedMessage(#[from] DKIMError),
    #[error("message has no usable From: header to authenticate against")]
    MissingFrom,
    #[error(
        "client-ip/helo were not supplied and trust_received ({trust_received}) could not \
         recover them from the message's own Received:/Return-Path: headers"
    )]
    MissingSmtpContext { trust_received: bool },
}

/// Everything one `authenticate()` call produced: the per-method verdicts,
/// and the headers a receiver should prepend to the message, already in the
/// fixed emission order (ARC triple, `Received-SPF`, `Authentication-Results`).
pub struct AuthenticateResult {
    pub dkim: Vec<AuthenticationResult>,
    pub spf: AuthenticationResult,
    pub dmarc: Option<AuthenticationResult>,
    pub arc: Option<AuthenticationResult>,
    pub bimi: Option<AuthenticationResult>,
    /// The new ARC triple (`ARC-Seal`, `ARC-Message-Signature`,
    /// `ARC-Authentication-Results`), when `options.seal` was supplied.
    pub seal: Option<[String; 3]>,
    pub received_spf: String,
    pub authentication_results: String,
    /// `seal` (if present) followed by `received_spf` and
    /// `authentication_results`, ready to prepend verbatim.
    pub headers: Vec<String>,
}

/// Authenticates one message against DKIM, SPF, ARC, DMARC and (gated by
/// DMARC) BIMI, following the ordering in RFC 8601/8617: SPF and the DKIM
/// body hash run concurrently, DKIM signatures verify next, then the ARC
/// chain, then DMARC (consuming the DKIM/SPF verdicts), then BIMI (gated by
/// DMARC), and finally an optional ARC seal for the next hop.
pub async fn authenticate(
    message: &str,
    mut options: AuthenticateOptions<'_>,
) -> Result<AuthenticateResult, AuthenticateError> {
    let email = ParsedEmail::parse(message)?;
    let resolver = options.resolver;

    let (ip, helo, sender) = smtp_context(&email, &options)?;
    let from_domain = from_domain(&email)?;

    let (spf, dkim) = futures::join!(
        mailauth_spf::evaluate_with_limit(ip, &helo, &sender, resolver, &options.mta, options.max_resolve_count),
        verify_email_with_min_bits(&email, resolver, options.min_bit_length),
    );
    let dkim = dkim?;
    let spf_auth = spf_authentication_result(&spf, &sender, &helo);

    let arc_analysis = if options.disable_arc {
        None
    } else {
        Some(arc::analyze_arc(&email, resolver).await)
    };
    let arc_auth = arc_analysis.as_ref().map(arc_authentication_result);

    let mail_from_domain = (!sender.is_empty())
        .then(|| sender.split_once('@').map(|(_, domain)| domain.to_string()))
        .flatten();

    let dmarc = if options.disable_dmarc {
        None
    } else {
        let dkim_for_dmarc = dkim.clone();
        let cx = DmarcContext::new(
            &from_domain,
            mail_from_domain.as_deref(),
            &dkim_for_dmarc,
            Some(&spf_auth),
        );
        Some(cx.check(resolver).await)
    };
    let dmarc_auth = dmarc.as_ref().map(dmarc_authentication_result);

    let bimi_selector = email
        .get_headers()
        .get_first("BIMI-Selector")
        .map(|h| h.get_raw_value().trim().to_string());
    let bimi = if options.disable_bimi {
        None
    } else {
        let eligible = dmarc
            .as_ref()
            .map(|d| bimi_eligible(d, &from_domain))
            .unwrap_or(false);
        Some(
            mailauth_bimi::evaluate(&from_domain, bimi_selector.as_deref(), eligible, resolver)
                .await,
        )
    };
    let bimi_auth = bimi.as_ref().map(|b| {
        bimi_authentication_result(b, &from_domain, bimi_selector.as_deref().unwrap_or(mailauth_bimi::DEFAULT_SELECTOR))
    });

    let mut all_results: Vec<AuthenticationResult> = dkim.clone();
    all_results.push(spf_auth.clone());
    if let Some(r) = &dmarc_auth {
        all_results.push(r.clone());
    }
    if let Some(r) = &arc_auth {
        all_results.push(r.clone());
    }
    if let Some(r) = &bimi_auth {
        all_results.push(r.clone());
    }

    let seal = if options.disable_arc {
        None
    } else {
        options
            .seal
            .take()
            .map(|seal_opts| {
                let analysis = arc_analysis
                    .as_ref()
                    .expect("arc_analysis is always Some when ARC is not disabled");
                build_seal(&email, analysis, seal_opts, &options.mta, &all_results)
            })
            .transpose()?
    };

    let received_spf = build_received_spf(&spf, ip, &sender, &helo);
    let authentication_results = Header::new(
        "Authentication-Results",
        AuthenticationResults {
            serv_id: options.mta.clone(),
            version: None,
            results: all_results,
        },
    )
    .to_header_string();

    let mut headers = Vec::new();
    if let Some(triple) = &seal {
        headers.extend(triple.iter().cloned());
    }
    headers.push(received_spf.clone());
    headers.push(authentication_results.clone());

    Ok(AuthenticateResult {
        dkim,
        spf: spf_auth,
        dmarc: dmarc_auth,
        arc: arc_auth,
        bimi: bimi_auth,
        seal,
        received_spf,
        authentication_results,
        headers,
    })
}

fn smtp_context<'b>(
    email: &'b ParsedEmail<'b>,
    options: &AuthenticateOptions<'_>,
) -> Result<(IpAddr, String, String), AuthenticateError> {
    let mut ip = options.ip;
    let mut helo = options.helo.clone();
    let mut sender = options.sender.clone();

    if options.trust_received {
        if ip.is_none() || helo.is_none() {
            if let Some(ctx) = received::latest_received(email.get_headers()) {
                ip.get_or_insert(ctx.ip);
                helo.get_or_insert(ctx.helo);
            }
        }
        if sender.is_none() {
            sender = received::latest_return_path(email.get_headers());
        }
    }

    let (Some(ip), Some(helo)) = (ip, helo) else {
        return Err(AuthenticateError::MissingSmtpContext {
            trust_received: options.trust_received,
        });
    };

    Ok((ip, helo, sender.unwrap_or_default()))
}

fn from_domain<'b>(email: &'b ParsedEmail<'b>) -> Result<String, AuthenticateError> {
    email
        .get_headers()
        .from()
        .ok()
        .flatten()
        .and_then(|list| list.0.into_iter().next())
        .map(|mailbox| mailbox.address.domain)
        .ok_or(AuthenticateError::MissingFrom)
}

/// BIMI's DMARC gate: alignment passed and the applicable published policy
/// (`p`, or `sp` when `from_domain` is a subdomain of its organizational
/// domain) is not `none`. Eligibility never depends on `pct`.
fn bimi_eligible(dmarc: &DispositionWithContext, from_domain: &str) -> bool {
    if dmarc.dmarc_result != DmarcResult::Pass {
        return false;
    }
    let org_domain = psl::domain_str(from_domain).unwrap_or(from_domain);
    let applicable = if org_domain == from_domain {
        dmarc.policy
    } else {
        dmarc.subdomain_policy
    };
    applicable != Policy::None
}

fn spf_authentication_result(
    spf: &mailauth_spf::SpfResult,
    sender: &str,
    helo: &str,
) -> AuthenticationResult {
    let mut props = BTreeMap::new();
    props.insert("smtp.mailfrom".to_string(), sender.to_string());
    props.insert("smtp.helo".to_string(), helo.to_string());
    AuthenticationResult {
        method: "spf".to_string(),
        method_version: None,
        result: spf.disposition.to_string(),
        reason: Some(spf.context.clone()),
        props,
    }
}

fn dmarc_authentication_result(dmarc: &DispositionWithContext) -> AuthenticationResult {
    let mut props = BTreeMap::new();
    props.insert("header.from".to_string(), dmarc.domain.clone());
    AuthenticationResult {
        method: "dmarc".to_string(),
        method_version: None,
        result: dmarc.result.to_string(),
        reason: Some(dmarc.context.clone()),
        props,
    }
}

fn arc_authentication_result(arc: &ArcResult) -> AuthenticationResult {
    let reason = (!arc.errors.is_empty()).then(|| {
        arc.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    });
    let mut props = BTreeMap::new();
    if arc.instance > 0 {
        props.insert("smtp.arc-instance".to_string(), arc.instance.to_string());
    }
    AuthenticationResult {
        method: "arc".to_string(),
        method_version: None,
        result: arc.cv.as_str().to_string(),
        reason,
        props,
    }
}

fn bimi_authentication_result(
    bimi: &mailauth_bimi::BimiResult,
    domain: &str,
    selector: &str,
) -> AuthenticationResult {
    let mut props = BTreeMap::new();
    props.insert("header.d".to_string(), domain.to_string());
    props.insert("header.selector".to_string(), selector.to_string());
    AuthenticationResult {
        method: "bimi".to_string(),
        method_version: None,
        result: bimi.disposition.to_string(),
        reason: Some(bimi.context.clone()),
        props,
    }
}

/// Renders the method-fields portion of an `Authentication-Results` value
/// (everything after `authserv-id`), for embedding inline in a fresh
/// `ARC-Authentication-Results` header, which RFC 8617 section 4.1.1 models
/// as carrying the same fields without the surrounding folding of a
/// standalone header.
fn format_result_fields(results: &[AuthenticationResult]) -> String {
    results
        .iter()
        .map(|r| {
            let mut s = r.method.clone();
            if let Some(v) = r.method_version {
                s.push_str(&format!("/{v}"));
            }
            s.push('=');
            s.push_str(&r.result);
            if let Some(reason) = &r.reason {
                s.push_str(&format!(" reason={reason}"));
            }
            for (k, v) in &r.props {
                s.push_str(&format!(" {k}={v}"));
            }
            s
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn build_received_spf(spf: &mailauth_spf::SpfResult, ip: IpAddr, sender: &str, helo: &str) -> String {
    let value = format!(
        "{} ({}) client-ip={ip}; envelope-from=\"{sender}\"; helo={helo};",
        spf.disposition, spf.context,
    );
    Header::new_unstructured("Received-SPF", value).to_header_string()
}

fn build_seal<'b>(
    email: &'b ParsedEmail<'b>,
    analysis: &ArcResult,
    seal_opts: SealOptions,
    mta: &str,
    all_results: &[AuthenticationResult],
) -> Result<[String; 3], DKIMError> {
    let instance = analysis.instance + 1;
    if instance > arc::MAX_ARC_INSTANCE {
        return Err(DKIMError::InvalidARCInstance);
    }
    let cv = if analysis.instance == 0 {
        ChainValidation::None
    } else {
        analysis.cv
    };

    let sealer = ArcSealerBuilder::new()
        .with_private_key(seal_opts.private_key)
        .with_selector(seal_opts.selector)
        .with_signing_domain(seal_opts.signing_domain)
        .with_signed_headers(["From"])?
        .build()?;

    sealer.seal(
        email,
        instance,
        cv,
        &format_result_fields(all_results),
        mta,
    )
}
