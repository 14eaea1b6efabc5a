//! https://www.rfc-editor.org/rfc/rfc7208#appendix-A.1

use crate::{evaluate, SpfDisposition};
use mailauth_dns::TestResolver;
use std::net::{IpAddr, Ipv4Addr};

fn example_com(record: &str) -> TestResolver {
    TestResolver::default()
        .with_txt("example.com", record)
        .with_mx("example.com", "mail-a.example.com", 10)
        .with_mx("example.com", "mail-b.example.com", 20)
        .with_a("example.com", IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)))
        .with_a("example.com", IpAddr::V4(Ipv4Addr::new(192, 0, 2, 11)))
        .with_a("amy.example.com", IpAddr::V4(Ipv4Addr::new(192, 0, 2, 65)))
        .with_a("bob.example.com", IpAddr::V4(Ipv4Addr::new(192, 0, 2, 66)))
        .with_a(
            "mail-a.example.com",
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 129)),
        )
        .with_a(
            "mail-b.example.com",
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 130)),
        )
}

/// Folds in the related `example.org` zone, used by the `a:example.org` and
/// `mx:example.org` cross-domain cases.
fn with_example_org(resolver: TestResolver) -> TestResolver {
    resolver
        .with_mx("example.org", "mail-c.example.org", 10)
        .with_a(
            "mail-c.example.org",
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 140)),
        )
}

async fn check(resolver: &TestResolver, client_ip: IpAddr, domain: &str) -> crate::SpfResult {
    evaluate(
        client_ip,
        &format!("mail.{domain}"),
        &format!("sender@{domain}"),
        resolver,
        "mta.example.net",
    )
    .await
}

#[tokio::test]
async fn all() {
    let resolver = example_com("v=spf1 +all");

    let result = check(&resolver, IpAddr::V4(Ipv4Addr::LOCALHOST), "example.com").await;
    k9::assert_equal!(
        &result,
        &crate::SpfResult {
            disposition: SpfDisposition::Pass,
            context: "matched 'all' directive".to_owned(),
        },
        "{result:?}"
    );
}

#[tokio::test]
async fn ip() {
    let resolver = example_com("v=spf1 a -all");

    let result = check(&resolver, IpAddr::V4(Ipv4Addr::LOCALHOST), "example.com").await;
    k9::assert_equal!(
        &result,
        &crate::SpfResult {
            disposition: SpfDisposition::Fail,
            context: "matched '-all' directive".to_owned(),
        },
        "{result:?}"
    );

    let result = check(
        &resolver,
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)),
        "example.com",
    )
    .await;
    k9::assert_equal!(
        &result,
        &crate::SpfResult {
            disposition: SpfDisposition::Pass,
            context: "matched 'a' directive".to_owned(),
        },
        "{result:?}"
    );

    let resolver = with_example_org(example_com("v=spf1 a:example.org -all"));

    let result = check(
        &resolver,
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)),
        "example.com",
    )
    .await;
    k9::assert_equal!(
        &result,
        &crate::SpfResult {
            disposition: SpfDisposition::Fail,
            context: "matched '-all' directive".to_owned(),
        },
        "{result:?}"
    );
}

#[tokio::test]
async fn mx() {
    let resolver = example_com("v=spf1 mx -all");

    let result = check(
        &resolver,
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 129)),
        "example.com",
    )
    .await;
    k9::assert_equal!(
        &result,
        &crate::SpfResult {
            disposition: SpfDisposition::Pass,
            context: "matched 'mx' directive".to_owned(),
        },
        "{result:?}"
    );

    let resolver = with_example_org(example_com("v=spf1 mx:example.org -all"));

    let result = check(
        &resolver,
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 140)),
        "example.com",
    )
    .await;
    k9::assert_equal!(
        &result,
        &crate::SpfResult {
            disposition: SpfDisposition::Pass,
            context: "matched 'mx:example.org' directive".to_owned(),
        },
        "{result:?}"
    );
}

#[tokio::test]
async fn no_record_published_is_none() {
    let resolver = TestResolver::default();
    let result = check(
        &resolver,
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
        "example.net",
    )
    .await;
    k9::assert_equal!(result.disposition, SpfDisposition::None);
}

#[tokio::test]
async fn multiple_spf1_records_is_permerror() {
    let resolver = TestResolver::default()
        .with_txt("example.net", "v=spf1 -all")
        .with_txt("example.net", "v=spf1 +all");
    let result = check(
        &resolver,
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
        "example.net",
    )
    .await;
    k9::assert_equal!(result.disposition, SpfDisposition::PermError);
}

#[tokio::test]
async fn empty_mail_from_uses_postmaster_at_helo() {
    let resolver = TestResolver::default().with_txt("mail.example.com", "v=spf1 -all");
    let result = evaluate(
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        "mail.example.com",
        "",
        &resolver,
        "mta.example.net",
    )
    .await;
    k9::assert_equal!(result.disposition, SpfDisposition::Fail);
}
