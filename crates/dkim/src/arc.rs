// Implementation of ARC: https://datatracker.ietf.org/doc/html/rfc8617

use crate::header::{ARCMessageSignatureHeader, ARCSealHeader, TaggedHeaderBuilder};
use crate::{canonicalization, hash, verify_signed_header, DKIMError, DkimPrivateKey, HeaderList, ParsedEmail};
use base64::engine::general_purpose;
use base64::Engine;
use ed25519_dalek::Signer as _;
use mailauth_dns::Lookup;
use mailauth_message::{ARCAuthenticationResults, Header};
use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use sha2::Sha256;
use std::collections::BTreeMap;

pub const MAX_ARC_INSTANCE: u8 = 50;
pub const ARC_MESSAGE_SIGNATURE_HEADER_NAME: &str = "ARC-Message-Signature";
pub const ARC_SEAL_HEADER_NAME: &str = "ARC-Seal";
pub const ARC_AUTHENTICATION_RESULTS_HEADER_NAME: &str = "ARC-Authentication-Results";

/// Chain validation status carried by the newest `ARC-Seal` header.
/// <https://datatracker.ietf.org/doc/html/rfc8617#section-4.2.2>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainValidation {
    None,
    Pass,
    Fail,
}

impl ChainValidation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ARCSet<'a> {
    pub aar_header: &'a Header<'a>,
    pub aar: ARCAuthenticationResults,
    pub sig_header: &'a Header<'a>,
    pub sig: ARCMessageSignatureHeader,
    pub seal_header: &'a Header<'a>,
    pub seal: ARCSealHeader,
}

impl ARCSet<'_> {
    pub fn instance(&self) -> u8 {
        self.aar.instance
    }
}

/// Result of validating a message's ARC chain.
#[derive(Debug)]
pub struct ArcResult {
    pub cv: ChainValidation,
    /// Highest instance number present on the chain, or 0 if the message
    /// carries no ARC headers at all.
    pub instance: u8,
    pub errors: Vec<DKIMError>,
}

/// Groups the `ARC-Seal`, `ARC-Message-Signature` and
/// `ARC-Authentication-Results` headers on `email` by instance. Returns the
/// complete, non-duplicated sets keyed by instance number and the highest
/// instance seen, or the structural errors found along the way (a missing
/// member of a set, or more than one header claiming the same instance).
fn group_arc_sets<'a>(
    email: &'a ParsedEmail<'a>,
) -> Result<Option<(BTreeMap<u8, ARCSet<'a>>, u8)>, Vec<DKIMError>> {
    let mut seals: BTreeMap<u8, Vec<(&Header, ARCSealHeader)>> = BTreeMap::new();
    let mut sigs: BTreeMap<u8, Vec<(&Header, ARCMessageSignatureHeader)>> = BTreeMap::new();
    let mut aars: BTreeMap<u8, Vec<(&Header, ARCAuthenticationResults)>> = BTreeMap::new();

    let headers = email.get_headers();
    let mut errors = vec![];

    for hdr in headers.iter_named(ARC_SEAL_HEADER_NAME) {
        match ARCSealHeader::parse(hdr.get_raw_value()) {
            Ok(seal) => {
                let instance = seal.arc_instance().expect("validated by parse");
                seals.entry(instance).or_default().push((hdr, seal));
            }
            Err(err) => errors.push(err),
        }
    }

    for hdr in headers.iter_named(ARC_MESSAGE_SIGNATURE_HEADER_NAME) {
        match ARCMessageSignatureHeader::parse(hdr.get_raw_value()) {
            Ok(sig) => {
                let instance = sig.arc_instance().expect("validated by parse");
                sigs.entry(instance).or_default().push((hdr, sig));
            }
            Err(err) => errors.push(err),
        }
    }

    for hdr in headers.iter_named(ARC_AUTHENTICATION_RESULTS_HEADER_NAME) {
        match hdr.as_arc_authentication_results() {
            Ok(aar) => {
                if aar.instance == 0 || aar.instance > MAX_ARC_INSTANCE {
                    errors.push(DKIMError::InvalidARCInstance);
                    continue;
                }
                aars.entry(aar.instance).or_default().push((hdr, aar));
            }
            Err(err) => errors.push(err.into()),
        }
    }

    if seals.is_empty() && sigs.is_empty() && aars.is_empty() {
        return Ok(None);
    }

    let mut arc_sets = BTreeMap::new();
    let max_seen = *[
        seals.keys().copied().max(),
        sigs.keys().copied().max(),
        aars.keys().copied().max(),
    ]
    .iter()
    .flatten()
    .max()
    .expect("non-empty above");

    for instance in 1..=max_seen {
        match (
            seals.get(&instance),
            sigs.get(&instance),
            aars.get(&instance),
        ) {
            (Some(seal), Some(sig), Some(aar)) => {
                if seal.len() > 1 || sig.len() > 1 || aar.len() > 1 {
                    errors.push(DKIMError::DuplicateARCInstance(instance));
                    continue;
                }

                arc_sets.insert(
                    instance,
                    ARCSet {
                        aar_header: aar[0].0,
                        aar: aar[0].1.clone(),
                        sig_header: sig[0].0,
                        sig: sig[0].1.clone(),
                        seal_header: seal[0].0,
                        seal: seal[0].1.clone(),
                    },
                );
            }
            _ => {
                errors.push(DKIMError::MissingARCInstance(instance));
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(Some((arc_sets, max_seen)))
}

/// Verifies every instance's signatures and computes the chain's `cv`
/// status.
///
/// <https://datatracker.ietf.org/doc/html/rfc8617#section-5.2>
pub async fn analyze_arc(email: &ParsedEmail<'_>, resolver: &dyn Lookup) -> ArcResult {
    let (arc_sets, max_seen) = match group_arc_sets(email) {
        Ok(None) => {
            return ArcResult {
                cv: ChainValidation::None,
                instance: 0,
                errors: vec![],
            }
        }
        Ok(Some(sets)) => sets,
        Err(errors) => {
            tracing::debug!("ARC chain has structural issues: {errors:#?}");
            let instance = errors
                .iter()
                .filter_map(|err| match err {
                    DKIMError::MissingARCInstance(i) | DKIMError::DuplicateARCInstance(i) => {
                        Some(*i)
                    }
                    _ => None,
                })
                .max()
                .unwrap_or(0);
            return ArcResult {
                cv: ChainValidation::Fail,
                instance,
                errors,
            };
        }
    };
    let mut errors = vec![];

    let mut chain_headers: Vec<&Header> = vec![];
    let mut cv = ChainValidation::None;

    for instance in 1..=max_seen {
        let arc_set = arc_sets.get(&instance).expect("checked contiguous above");

        let declared_cv = arc_set.seal.get_required_tag("cv");
        if instance != 1 && declared_cv == "none" {
            // Reject-as-fail: a later instance has no business declaring
            // that the chain was never sealed before it.
            errors.push(DKIMError::ArcChainBroken(format!(
                "instance {instance} declared cv=none"
            )));
            cv = ChainValidation::Fail;
        }

        let ams_ok = verify_signed_header(
            resolver,
            ARC_MESSAGE_SIGNATURE_HEADER_NAME,
            &arc_set.sig,
            email,
        )
        .await
        .map_err(|err| {
            errors.push(err);
        })
        .is_ok();

        let mut seal_input = chain_headers.clone();
        seal_input.push(arc_set.aar_header);
        seal_input.push(arc_set.sig_header);

        let as_ok = arc_set
            .seal
            .verify(resolver, &seal_input)
            .await
            .map_err(|err| {
                errors.push(err);
            })
            .is_ok();

        cv = if cv == ChainValidation::Fail {
            ChainValidation::Fail
        } else if instance == 1 {
            if ams_ok && as_ok {
                ChainValidation::None
            } else {
                ChainValidation::Fail
            }
        } else if ams_ok && as_ok && cv != ChainValidation::Fail {
            ChainValidation::Pass
        } else {
            ChainValidation::Fail
        };

        chain_headers.push(arc_set.aar_header);
        chain_headers.push(arc_set.sig_header);
        chain_headers.push(arc_set.seal_header);

        tracing::debug!(instance, cv = cv.as_str(), "processed ARC instance");
    }

    ArcResult {
        cv,
        instance: max_seen,
        errors,
    }
}

/// Builder for [`ArcSealer`].
pub struct ArcSealerBuilder {
    private_key: Option<DkimPrivateKey>,
    selector: Option<String>,
    signing_domain: Option<String>,
    signed_headers: Option<Vec<String>>,
    header_canonicalization: canonicalization::Type,
    body_canonicalization: canonicalization::Type,
    time: Option<chrono::DateTime<chrono::offset::Utc>>,
}

impl ArcSealerBuilder {
    pub fn new() -> Self {
        Self {
            private_key: None,
            selector: None,
            signing_domain: None,
            signed_headers: None,
            header_canonicalization: canonicalization::Type::Relaxed,
            body_canonicalization: canonicalization::Type::Relaxed,
            time: None,
        }
    }

    pub fn with_private_key(mut self, key: DkimPrivateKey) -> Self {
        self.private_key = Some(key);
        self
    }

    pub fn with_selector(mut self, value: impl Into<String>) -> Self {
        self.selector = Some(value.into());
        self
    }

    pub fn with_signing_domain(mut self, value: impl Into<String>) -> Self {
        self.signing_domain = Some(value.into());
        self
    }

    /// Headers covered by the `ARC-Message-Signature`. The From: header is
    /// required, same as for a DKIM signature.
    pub fn with_signed_headers(
        mut self,
        headers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, DKIMError> {
        let headers: Vec<String> = headers
            .into_iter()
            .map(|h| h.into().to_lowercase())
            .collect();

        if !headers.iter().any(|h| h.eq_ignore_ascii_case("from")) {
            return Err(DKIMError::BuilderError("missing From in signed headers"));
        }

        self.signed_headers = Some(headers);
        Ok(self)
    }

    pub fn with_header_canonicalization(mut self, value: canonicalization::Type) -> Self {
        self.header_canonicalization = value;
        self
    }

    pub fn with_body_canonicalization(mut self, value: canonicalization::Type) -> Self {
        self.body_canonicalization = value;
        self
    }

    /// Specify current time. Mostly used for testing.
    pub fn with_time(mut self, value: chrono::DateTime<chrono::offset::Utc>) -> Self {
        self.time = Some(value);
        self
    }

    pub fn build(self) -> Result<ArcSealer, DKIMError> {
        use DKIMError::BuilderError;

        let private_key = self
            .private_key
            .ok_or(BuilderError("missing required private key"))?;
        let hash_algo = match private_key {
            DkimPrivateKey::Rsa(_) => hash::HashAlgo::RsaSha256,
            DkimPrivateKey::Ed25519(_) => hash::HashAlgo::Ed25519Sha256,
        };

        Ok(ArcSealer {
            private_key,
            selector: self
                .selector
                .ok_or(BuilderError("missing required selector"))?,
            signing_domain: self
                .signing_domain
                .ok_or(BuilderError("missing required signing domain"))?,
            signed_headers: self
                .signed_headers
                .ok_or(BuilderError("missing required signed headers"))?,
            header_canonicalization: self.header_canonicalization,
            body_canonicalization: self.body_canonicalization,
            hash_algo,
            time: self.time,
        })
    }
}

impl Default for ArcSealerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Produces the `ARC-Authentication-Results`, `ARC-Message-Signature` and
/// `ARC-Seal` headers for the next hop of a chain. Use [`ArcSealerBuilder`]
/// to build an instance.
///
/// Unlike [`analyze_arc`], which only validates an existing chain, this adds
/// a new instance on top of it (or starts one, for an unsealed message).
pub struct ArcSealer {
    private_key: DkimPrivateKey,
    selector: String,
    signing_domain: String,
    signed_headers: Vec<String>,
    header_canonicalization: canonicalization::Type,
    body_canonicalization: canonicalization::Type,
    hash_algo: hash::HashAlgo,
    time: Option<chrono::DateTime<chrono::offset::Utc>>,
}

impl ArcSealer {
    /// Seals `email` as ARC instance `instance`, declaring `cv` as the
    /// validation status of the chain that precedes it (use
    /// `ChainValidation::None` for `instance == 1`, since there's no prior
    /// chain to validate) and recording `authentication_results` as this
    /// hop's `dkim=`/`spf=`/`dmarc=` assessment. Returns the three new
    /// headers in the order they should be prepended to the message:
    /// `ARC-Seal`, `ARC-Message-Signature`, `ARC-Authentication-Results`.
    pub fn seal<'b>(
        &self,
        email: &'b ParsedEmail<'b>,
        instance: u8,
        cv: ChainValidation,
        authentication_results: &str,
        mta: &str,
    ) -> Result<[String; 3], DKIMError> {
        if instance == 0 || instance > MAX_ARC_INSTANCE {
            return Err(DKIMError::InvalidARCInstance);
        }
        if instance == 1 && cv != ChainValidation::None {
            return Err(DKIMError::BuilderError(
                "the first ARC instance must declare cv=none",
            ));
        }
        if instance != 1 && cv == ChainValidation::None {
            return Err(DKIMError::BuilderError(
                "only the first ARC instance may declare cv=none",
            ));
        }

        let now = self.time.unwrap_or_else(chrono::Utc::now);

        let aar_raw = format!("i={instance}; {mta}; {authentication_results}");
        let aar_header = Header::with_name_value(ARC_AUTHENTICATION_RESULTS_HEADER_NAME, aar_raw.clone());

        let ams_tagged = self.build_ams(email, instance, now)?;
        let ams_header = Header::with_name_value(ARC_MESSAGE_SIGNATURE_HEADER_NAME, ams_tagged.raw());

        let prior = match group_arc_sets(email) {
            Ok(Some((sets, _))) => sets,
            Ok(None) => BTreeMap::new(),
            Err(errors) => {
                return Err(errors
                    .into_iter()
                    .next()
                    .expect("group_arc_sets only returns Err with entries"))
            }
        };

        let mut chain_headers: Vec<&Header> = vec![];
        for prior_instance in 1..instance {
            let set = prior
                .get(&prior_instance)
                .ok_or(DKIMError::MissingARCInstance(prior_instance))?;
            chain_headers.push(set.aar_header);
            chain_headers.push(set.sig_header);
            chain_headers.push(set.seal_header);
        }
        chain_headers.push(&aar_header);
        chain_headers.push(&ams_header);

        let as_tagged = self.build_as(instance, cv, now, &chain_headers)?;

        Ok([
            format!("{}: {}", ARC_SEAL_HEADER_NAME, as_tagged.raw()),
            format!("{}: {}", ARC_MESSAGE_SIGNATURE_HEADER_NAME, ams_tagged.raw()),
            format!("{}: {}", ARC_AUTHENTICATION_RESULTS_HEADER_NAME, aar_raw),
        ])
    }

    fn build_ams<'b>(
        &self,
        email: &'b ParsedEmail<'b>,
        instance: u8,
        now: chrono::DateTime<chrono::offset::Utc>,
    ) -> Result<crate::header::TaggedHeader, DKIMError> {
        let body_hash =
            hash::compute_body_hash(self.body_canonicalization, None, self.hash_algo, email)?;

        let builder = TaggedHeaderBuilder::new()
            .add_tag("i", &instance.to_string())
            .add_tag("a", self.hash_algo.algo_name())
            .add_tag(
                "c",
                &format!(
                    "{}/{}",
                    self.header_canonicalization.canon_name(),
                    self.body_canonicalization.canon_name()
                ),
            )
            .add_tag("d", &self.signing_domain)
            .set_signed_headers(&HeaderList::new(self.signed_headers.clone()))
            .add_tag("s", &self.selector)
            .set_time(now)
            .add_tag("bh", &body_hash);

        // For signing, the "b" tag must be present but empty.
        let tagged = builder.clone().add_tag("b", "").build();
        let ams_for_hash = ARCMessageSignatureHeader::parse(tagged.raw())?;

        let header_hash = hash::compute_headers_hash(
            self.header_canonicalization,
            &HeaderList::new(self.signed_headers.clone()),
            self.hash_algo,
            ARC_MESSAGE_SIGNATURE_HEADER_NAME,
            &ams_for_hash,
            email,
        )?;

        let signature = self.sign_hash(&header_hash)?;
        Ok(builder
            .add_tag("b", &general_purpose::STANDARD.encode(signature))
            .build())
    }

    fn build_as(
        &self,
        instance: u8,
        cv: ChainValidation,
        now: chrono::DateTime<chrono::offset::Utc>,
        chain_headers: &[&Header<'_>],
    ) -> Result<crate::header::TaggedHeader, DKIMError> {
        let builder = TaggedHeaderBuilder::new()
            .add_tag("i", &instance.to_string())
            .add_tag("a", self.hash_algo.algo_name())
            .set_time(now)
            .add_tag("cv", cv.as_str())
            .add_tag("d", &self.signing_domain)
            .add_tag("s", &self.selector);

        let tagged = builder.clone().add_tag("b", "").build();
        let as_for_hash = ARCSealHeader::parse(tagged.raw())?;

        let seal_hash = hash::compute_arc_seal_hash(
            canonicalization::Type::Relaxed,
            ARC_SEAL_HEADER_NAME,
            chain_headers,
            self.hash_algo,
            &as_for_hash,
        )?;

        let signature = self.sign_hash(&seal_hash)?;
        Ok(builder
            .add_tag("b", &general_purpose::STANDARD.encode(signature))
            .build())
    }

    fn sign_hash(&self, digest: &[u8]) -> Result<Vec<u8>, DKIMError> {
        match &self.private_key {
            DkimPrivateKey::Rsa(private_key) => private_key
                .sign(
                    match &self.hash_algo {
                        hash::HashAlgo::RsaSha1 => Pkcs1v15Sign::new::<Sha1>(),
                        hash::HashAlgo::RsaSha256 => Pkcs1v15Sign::new::<Sha256>(),
                        other => {
                            return Err(DKIMError::UnsupportedHashAlgorithm(format!("{other:?}")))
                        }
                    },
                    digest,
                )
                .map_err(|err| DKIMError::FailedToSign(err.to_string())),
            DkimPrivateKey::Ed25519(signing_key) => Ok(signing_key.sign(digest).to_vec()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mailauth_dns::TestResolver;

    #[tokio::test]
    async fn test_no_arc_headers() {
        let email = ParsedEmail::parse("Subject: hi\r\n\r\nbody\r\n".to_string()).unwrap();
        let resolver = TestResolver::default();
        let result = analyze_arc(&email, &resolver).await;
        assert_eq!(result.instance, 0);
        assert_eq!(result.cv, ChainValidation::None);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_missing_arc_seal_fails_chain() {
        // Only an AAR/AMS pair for instance 1, no ARC-Seal: the set is
        // incomplete so the chain can't be evaluated.
        let email = ParsedEmail::parse(
            "ARC-Authentication-Results: i=1; example.com; spf=pass\r\n\
             ARC-Message-Signature: i=1; a=rsa-sha256; c=relaxed/relaxed; d=example.com; s=sel; h=from:subject; bh=xxx; b=xxx\r\n\
             Subject: hi\r\n\r\nbody\r\n"
                .to_string(),
        )
        .unwrap();
        let resolver = TestResolver::default();
        let result = analyze_arc(&email, &resolver).await;
        assert_eq!(result.cv, ChainValidation::Fail);
        assert!(matches!(
            result.errors.as_slice(),
            [DKIMError::MissingARCInstance(1)]
        ));
    }

    #[tokio::test]
    async fn test_duplicate_arc_instance() {
        let seal = "ARC-Seal: i=1; a=rsa-sha256; cv=none; d=example.com; s=sel; t=1000000000; b=xxx\r\n";
        let email = ParsedEmail::parse(format!(
            "{seal}{seal}\
             ARC-Authentication-Results: i=1; example.com; spf=pass\r\n\
             ARC-Message-Signature: i=1; a=rsa-sha256; c=relaxed/relaxed; d=example.com; s=sel; h=from:subject; bh=xxx; b=xxx\r\n\
             Subject: hi\r\n\r\nbody\r\n"
        ))
        .unwrap();
        let resolver = TestResolver::default();
        let result = analyze_arc(&email, &resolver).await;
        assert_eq!(result.cv, ChainValidation::Fail);
        assert!(matches!(
            result.errors.as_slice(),
            [DKIMError::DuplicateARCInstance(1)]
        ));
    }

    #[tokio::test]
    async fn test_cv_none_declared_past_instance_one_is_rejected() {
        let email = ParsedEmail::parse(
            "ARC-Seal: i=1; a=rsa-sha256; cv=none; d=example.com; s=sel; t=1000000000; b=xxx\r\n\
             ARC-Authentication-Results: i=1; example.com; spf=pass\r\n\
             ARC-Message-Signature: i=1; a=rsa-sha256; c=relaxed/relaxed; d=example.com; s=sel; h=from:subject; bh=xxx; b=xxx\r\n\
             ARC-Seal: i=2; a=rsa-sha256; cv=none; d=example.com; s=sel; t=1000000001; b=xxx\r\n\
             ARC-Authentication-Results: i=2; example.com; spf=pass\r\n\
             ARC-Message-Signature: i=2; a=rsa-sha256; c=relaxed/relaxed; d=example.com; s=sel; h=from:subject; bh=xxx; b=xxx\r\n\
             Subject: hi\r\n\r\nbody\r\n"
                .to_string(),
        )
        .unwrap();
        let resolver = TestResolver::default();
        let result = analyze_arc(&email, &resolver).await;
        assert_eq!(result.cv, ChainValidation::Fail);
        assert!(result
            .errors
            .iter()
            .any(|err| matches!(err, DKIMError::ArcChainBroken(_))));
    }

    fn test_sealer(domain: &str) -> ArcSealer {
        ArcSealerBuilder::new()
            .with_private_key(crate::roundtrip_test::load_rsa_key())
            .with_selector("2022")
            .with_signing_domain(domain)
            .with_signed_headers(["From", "Subject"])
            .unwrap()
            .with_time(chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_seal_first_instance_round_trips() {
        let raw_email = "Subject: hi\r\nFrom: a@cloudflare.com\r\n\r\nbody\r\n";
        let email = ParsedEmail::parse(raw_email.to_string()).unwrap();

        let [as_line, ams_line, aar_line] = test_sealer("cloudflare.com")
            .seal(
                &email,
                1,
                ChainValidation::None,
                "cloudflare.com; spf=pass smtp.mailfrom=cloudflare.com",
                "cloudflare.com",
            )
            .unwrap();

        assert!(aar_line.starts_with("ARC-Authentication-Results: i=1; cloudflare.com; spf=pass"));

        let ams_raw = ams_line.trim_start_matches("ARC-Message-Signature: ");
        let ams = ARCMessageSignatureHeader::parse(ams_raw).unwrap();
        assert_eq!(ams.arc_instance().unwrap(), 1);
        assert_eq!(ams.get_tag("d"), Some("cloudflare.com"));

        let as_raw = as_line.trim_start_matches("ARC-Seal: ");
        let seal = ARCSealHeader::parse(as_raw).unwrap();
        assert_eq!(seal.get_tag("cv"), Some("none"));
        assert_eq!(seal.arc_instance().unwrap(), 1);

        let resolver = TestResolver::default()
            .with_txt("2022._domainkey.cloudflare.com", crate::roundtrip_test::TEST_ZONE);

        verify_signed_header(&resolver, ARC_MESSAGE_SIGNATURE_HEADER_NAME, &ams, &email)
            .await
            .unwrap();

        let aar_raw = aar_line.trim_start_matches("ARC-Authentication-Results: ");
        let aar_header = Header::with_name_value(ARC_AUTHENTICATION_RESULTS_HEADER_NAME, aar_raw);
        let ams_header = Header::with_name_value(ARC_MESSAGE_SIGNATURE_HEADER_NAME, ams_raw);
        seal.verify(&resolver, &vec![&aar_header, &ams_header])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_seal_rejects_mismatched_cv_for_instance() {
        let email = ParsedEmail::parse("Subject: hi\r\nFrom: a@b.com\r\n\r\nbody\r\n").unwrap();
        let sealer = test_sealer("b.com");

        assert!(matches!(
            sealer.seal(&email, 1, ChainValidation::Pass, "b.com; spf=pass", "b.com"),
            Err(DKIMError::BuilderError(_))
        ));
        assert!(matches!(
            sealer.seal(&email, 2, ChainValidation::None, "b.com; spf=pass", "b.com"),
            Err(DKIMError::BuilderError(_))
        ));
    }

    #[tokio::test]
    async fn test_seal_second_instance_requires_prior_chain() {
        let email = ParsedEmail::parse("Subject: hi\r\nFrom: a@b.com\r\n\r\nbody\r\n").unwrap();
        let sealer = test_sealer("b.com");

        // No instance 1 present yet, so instance 2 can't reference it.
        assert!(matches!(
            sealer.seal(&email, 2, ChainValidation::Pass, "b.com; spf=pass", "b.com"),
            Err(DKIMError::MissingARCInstance(1))
        ));
    }

    #[tokio::test]
    async fn test_seal_second_instance_chains_onto_first() {
        let instance_one = "ARC-Seal: i=1; a=rsa-sha256; cv=none; d=b.com; s=sel; t=1000000000; b=xxx\r\n\
             ARC-Authentication-Results: i=1; b.com; spf=pass\r\n\
             ARC-Message-Signature: i=1; a=rsa-sha256; c=relaxed/relaxed; d=b.com; s=sel; h=from:subject; bh=xxx; b=xxx\r\n";
        let email = ParsedEmail::parse(format!(
            "{instance_one}Subject: hi\r\nFrom: a@b.com\r\n\r\nbody\r\n"
        ))
        .unwrap();

        let [as_line, ams_line, _aar_line] = test_sealer("b.com")
            .seal(&email, 2, ChainValidation::Pass, "b.com; spf=pass", "b.com")
            .unwrap();

        let seal = ARCSealHeader::parse(as_line.trim_start_matches("ARC-Seal: ")).unwrap();
        assert_eq!(seal.arc_instance().unwrap(), 2);
        assert_eq!(seal.get_tag("cv"), Some("pass"));

        let ams = ARCMessageSignatureHeader::parse(
            ams_line.trim_start_matches("ARC-Message-Signature: "),
        )
        .unwrap();
        assert_eq!(ams.arc_instance().unwrap(), 2);
    }
}
