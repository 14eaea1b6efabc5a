use crate::{Disposition, DmarcContext};
use mailauth_dns::TestResolver;
use mailauth_message::AuthenticationResult;
use std::collections::BTreeMap;

fn dkim_result(signing_domain: Option<&str>, passed: bool) -> AuthenticationResult {
    let mut props = BTreeMap::new();
    if let Some(d) = signing_domain {
        props.insert("header.d".to_string(), d.to_string());
    }
    AuthenticationResult {
        method: "dkim".to_string(),
        method_version: None,
        result: if passed { "pass" } else { "fail" }.to_string(),
        reason: None,
        props,
    }
}

fn spf_result(passed: bool) -> AuthenticationResult {
    AuthenticationResult {
        method: "spf".to_string(),
        method_version: None,
        result: if passed { "pass" } else { "fail" }.to_string(),
        reason: None,
        props: BTreeMap::new(),
    }
}

#[tokio::test]
async fn dkim_relaxed_subdomain_passes() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.sample.example.com",
        "v=DMARC1; p=reject; adkim=r; rua=mailto:dmarc-feedback@example.com",
    );
    let dkim = vec![dkim_result(Some("example.com"), true)];
    let cx = DmarcContext::new("sample.example.com", None, &dkim, None);
    let result = cx.check(&resolver).await;
    k9::assert_equal!(result.result, Disposition::Pass);
}

#[tokio::test]
async fn dkim_relaxed_subdomain_deep_passes() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.a.b.c.sample.example.com",
        "v=DMARC1; p=reject; adkim=r; rua=mailto:dmarc-feedback@example.com",
    );
    let dkim = vec![dkim_result(Some("example.com"), true)];
    let cx = DmarcContext::new("a.b.c.sample.example.com", None, &dkim, None);
    let result = cx.check(&resolver).await;
    k9::assert_equal!(result.result, Disposition::Pass);
}

#[tokio::test]
async fn dkim_relaxed_subdomain_unaligned_fails() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.sample.example.com",
        "v=DMARC1; p=reject; adkim=r; rua=mailto:dmarc-feedback@example.com",
    );
    let dkim = vec![dkim_result(Some("example.org"), true)];
    let cx = DmarcContext::new("sample.example.com", None, &dkim, None);
    let result = cx.check(&resolver).await;
    k9::assert_equal!(result.result, Disposition::Reject);
}

#[tokio::test]
async fn subdomain_policy_falls_back_to_sp_when_found_at_org_domain() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        "v=DMARC1; p=reject; sp=quarantine; adkim=r; rua=mailto:dmarc-feedback@example.com",
    );
    let dkim = vec![dkim_result(Some("example.org"), true)];
    let cx = DmarcContext::new("sample.example.com", None, &dkim, None);
    let result = cx.check(&resolver).await;
    k9::assert_equal!(result.result, Disposition::Quarantine);
}

#[tokio::test]
async fn dkim_strict_exact_domain_passes() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        "v=DMARC1; p=reject; adkim=s; rua=mailto:dmarc-feedback@example.com",
    );
    let dkim = vec![dkim_result(Some("example.com"), true)];
    let cx = DmarcContext::new("example.com", None, &dkim, None);
    let result = cx.check(&resolver).await;
    k9::assert_equal!(result.result, Disposition::Pass);
}

#[tokio::test]
async fn dkim_strict_subdomain_fails() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        "v=DMARC1; p=reject; adkim=s; rua=mailto:dmarc-feedback@example.com",
    );
    let dkim = vec![dkim_result(Some("example.com"), true)];
    let cx = DmarcContext::new("sample.example.com", None, &dkim, None);
    let result = cx.check(&resolver).await;
    k9::assert_equal!(result.result, Disposition::Reject);
}

#[tokio::test]
async fn dkim_missing_signing_domain_fails_and_notes_it() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        "v=DMARC1; p=reject; adkim=r; rua=mailto:dmarc-feedback@example.com",
    );
    let dkim = vec![dkim_result(None, false)];
    let cx = DmarcContext::new("example.com", None, &dkim, None);
    let result = cx.check(&resolver).await;
    k9::assert_equal!(result.result, Disposition::Reject);
    k9::assert_equal!(result.context.contains("d="), true);
}

#[tokio::test]
async fn spf_relaxed_subdomain_passes() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        "v=DMARC1; p=reject; aspf=r; rua=mailto:dmarc-feedback@example.com",
    );
    let spf = spf_result(true);
    let cx = DmarcContext::new("example.com", Some("helper.example.com"), &[], Some(&spf));
    let result = cx.check(&resolver).await;
    k9::assert_equal!(result.result, Disposition::Pass);
}

#[tokio::test]
async fn spf_relaxed_subdomain_deep_passes() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        "v=DMARC1; p=reject; aspf=r; rua=mailto:dmarc-feedback@example.com",
    );
    let spf = spf_result(true);
    let cx = DmarcContext::new(
        "example.com",
        Some("a.b.c.helper.example.com"),
        &[],
        Some(&spf),
    );
    let result = cx.check(&resolver).await;
    k9::assert_equal!(result.result, Disposition::Pass);
}

#[tokio::test]
async fn spf_relaxed_different_org_domain_fails() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        "v=DMARC1; p=reject; aspf=r; rua=mailto:dmarc-feedback@example.com",
    );
    let spf = spf_result(true);
    let cx = DmarcContext::new("example.com", Some("helper.example.org"), &[], Some(&spf));
    let result = cx.check(&resolver).await;
    k9::assert_equal!(result.result, Disposition::Reject);
}

#[tokio::test]
async fn spf_strict_subdomain_fails() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        "v=DMARC1; p=reject; aspf=s; rua=mailto:dmarc-feedback@example.com",
    );
    let spf = spf_result(true);
    let cx = DmarcContext::new("example.com", Some("helper.example.com"), &[], Some(&spf));
    let result = cx.check(&resolver).await;
    k9::assert_equal!(result.result, Disposition::Reject);
}

#[tokio::test]
async fn no_record_anywhere_is_none() {
    let resolver = TestResolver::default();
    let cx = DmarcContext::new("example.com", None, &[], None);
    let result = cx.check(&resolver).await;
    k9::assert_equal!(result.result, Disposition::None);
}

#[tokio::test]
async fn pct_samples_roughly_at_the_configured_rate() {
    let mut rejected = 0;
    let iters = 10_000;
    let pct = 50;

    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        &format!(
            "v=DMARC1; p=reject; aspf=s; pct={pct}; rua=mailto:dmarc-feedback@example.com"
        ),
    );
    let spf = spf_result(true);

    for _ in 0..iters {
        let cx = DmarcContext::new("example.com", Some("helper.example.com"), &[], Some(&spf));
        let result = cx.check(&resolver).await;
        if matches!(result.result, Disposition::Reject) {
            rejected += 1;
        }
    }

    let upper_bound = iters * (pct + 15) / 100;
    let lower_bound = iters * (pct - 15) / 100;
    k9::assert_lesser_than!(rejected, upper_bound);
    k9::assert_greater_than!(rejected, lower_bound);
}

struct FailingResolver;

impl mailauth_dns::Lookup for FailingResolver {
    fn lookup_txt<'a>(
        &'a self,
        name: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<Vec<String>, mailauth_dns::DnsError>> {
        let name = name.to_string();
        Box::pin(async move {
            Err(mailauth_dns::DnsError::Temporary(
                name,
                "timed out".to_string(),
            ))
        })
    }

    fn lookup_mx<'a>(
        &'a self,
        _name: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<Vec<mailauth_dns::MxRecord>, mailauth_dns::DnsError>>
    {
        Box::pin(async move { Ok(vec![]) })
    }

    fn lookup_a<'a>(
        &'a self,
        _name: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<Vec<std::net::IpAddr>, mailauth_dns::DnsError>> {
        Box::pin(async move { Ok(vec![]) })
    }

    fn lookup_aaaa<'a>(
        &'a self,
        _name: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<Vec<std::net::IpAddr>, mailauth_dns::DnsError>> {
        Box::pin(async move { Ok(vec![]) })
    }
}

#[tokio::test]
async fn unresolvable_policy_fails_open_as_none() {
    let resolver = FailingResolver;
    let cx = DmarcContext::new("example.com", None, &[], None);
    let result = cx.check(&resolver).await;
    k9::assert_equal!(result.result, Disposition::None);
    assert!(result.context.contains("DMARC lookup"));
}
