use base64::engine::general_purpose;
use base64::Engine;
use mailauth_dns::Lookup;
use rsa::{pkcs1, pkcs8};
use std::collections::HashMap;

use crate::{parser, DKIMError, DkimPublicKey, DNS_NAMESPACE};

const RSA_KEY_TYPE: &str = "rsa";
const ED25519_KEY_TYPE: &str = "ed25519";

fn parse_key_record(txt: &str) -> Result<DkimPublicKey, DKIMError> {
    let (_, tags) = parser::tag_list(txt).map_err(|err| {
        tracing::warn!("key syntax error: {}", err);
        DKIMError::KeySyntaxError
    })?;

    let mut tags_map = HashMap::new();
    for tag in &tags {
        tags_map.insert(tag.name.clone(), tag.clone());
    }

    if let Some(version) = tags_map.get("v") {
        if version.value != "DKIM1" {
            return Err(DKIMError::KeyIncompatibleVersion);
        }
    }

    let key_type = match tags_map.get("k") {
        Some(v) => {
            if v.value != RSA_KEY_TYPE && v.value != ED25519_KEY_TYPE {
                return Err(DKIMError::InappropriateKeyAlgorithm);
            }
            v.value.clone()
        }
        None => RSA_KEY_TYPE.to_string(),
    };

    let tag = tags_map.get("p").ok_or(DKIMError::NoKeyForSignature)?;
    if tag.value.is_empty() {
        return Err(DKIMError::KeyRevoked);
    }
    let bytes = general_purpose::STANDARD
        .decode(&tag.value)
        .map_err(|err| {
            DKIMError::KeyUnavailable(format!("failed to decode public key: {}", err))
        })?;

    Ok(if key_type == RSA_KEY_TYPE {
        DkimPublicKey::Rsa(
            pkcs8::DecodePublicKey::from_public_key_der(&bytes)
                .or_else(|_| pkcs1::DecodeRsaPublicKey::from_pkcs1_der(&bytes))
                .map_err(|err| {
                    DKIMError::KeyUnavailable(format!("failed to parse public key: {}", err))
                })?,
        )
    } else {
        DkimPublicKey::Ed25519(
            ed25519_dalek::VerifyingKey::from_bytes(
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| DKIMError::KeyUnavailable("ed25519 key is not 32 bytes".into()))?,
            )
            .map_err(|err| {
                DKIMError::KeyUnavailable(format!("failed to parse public key: {}", err))
            })?,
        )
    })
}

// https://datatracker.ietf.org/doc/html/rfc6376#section-6.1.2
pub(crate) async fn retrieve_public_key(
    resolver: &dyn Lookup,
    domain: &str,
    subdomain: &str,
) -> Result<DkimPublicKey, DKIMError> {
    let dns_name = format!("{}.{}.{}", subdomain, DNS_NAMESPACE, domain);
    let res = resolver.lookup_txt(&dns_name).await?;
    let txt = res.first().ok_or(DKIMError::NoKeyForSignature)?;
    tracing::debug!("DKIM TXT: {:?}", txt);

    parse_key_record(txt)
}

/// Resolve every TXT record at the selector, for ARC-Seal verification
/// where key rotation can leave multiple candidate keys in place.
pub(crate) async fn retrieve_public_keys(
    resolver: &dyn Lookup,
    domain: &str,
    subdomain: &str,
) -> Result<Vec<DkimPublicKey>, DKIMError> {
    let dns_name = format!("{}.{}.{}", subdomain, DNS_NAMESPACE, domain);
    let res = resolver.lookup_txt(&dns_name).await?;
    if res.is_empty() {
        return Err(DKIMError::NoKeyForSignature);
    }

    let mut keys = vec![];
    let mut last_err = None;
    for txt in &res {
        match parse_key_record(txt) {
            Ok(key) => keys.push(key),
            Err(err) => last_err = Some(err),
        }
    }

    if keys.is_empty() {
        return Err(last_err.unwrap_or(DKIMError::NoKeyForSignature));
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Status;
    use futures::future::BoxFuture;
    use mailauth_dns::{DnsError, MxRecord};
    use std::net::IpAddr;

    struct TestResolver {}
    impl Lookup for TestResolver {
        fn lookup_txt<'a>(
            &'a self,
            name: &'a str,
        ) -> BoxFuture<'a, Result<Vec<String>, DnsError>> {
            Box::pin(async move {
                assert_eq!(name, "dkim._domainkey.cloudflare.com");
                Ok(vec!["v=DKIM1; k=rsa; p=MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA6gmVDBSBJ0l1/33uAF0gwIsrjQV6nnYjL9DMX6+ez4NNJ2um0InYy128Rd+OlIhmdSld6g3tj3O6R+BwsYsQgU8RWE8VJaRybvPw2P3Asgms4uPrFWHSFiWMPH0P9i/oPwnUO9jZKHiz4+MzFC3bG8BacX7YIxCuWnDU8XNmNsRaLmrv9CHX4/3GHyoHSmDA1ETtyz9JHRCOC8ho8C7b4f2Auwedlau9Lid9LGBhozhgRFhrFwFMe93y34MO1clPbY6HwxpudKWBkMQCTlmXVRnkKxHlJ+fYCyC2jjpCIbGWj2oLxBtFOASWMESR4biW0ph2bsZXslcUSPMTVTkFxQIDAQAB".to_string()])
            })
        }

        fn lookup_mx<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Vec<MxRecord>, DnsError>> {
            Box::pin(async move { Ok(vec![]) })
        }

        fn lookup_a<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>> {
            Box::pin(async move { Ok(vec![]) })
        }

        fn lookup_aaaa<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>> {
            Box::pin(async move { Ok(vec![]) })
        }
    }

    #[tokio::test]
    async fn test_retrieve_public_key() {
        let resolver = TestResolver {};

        retrieve_public_key(&resolver, "cloudflare.com", "dkim")
            .await
            .unwrap();
    }

    struct IncompatibleVersionResolver {}
    impl Lookup for IncompatibleVersionResolver {
        fn lookup_txt<'a>(
            &'a self,
            name: &'a str,
        ) -> BoxFuture<'a, Result<Vec<String>, DnsError>> {
            Box::pin(async move {
                assert_eq!(name, "dkim._domainkey.cloudflare.com");
                Ok(vec!["v=DKIM6; p=key".to_string()])
            })
        }
        fn lookup_mx<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Vec<MxRecord>, DnsError>> {
            Box::pin(async move { Ok(vec![]) })
        }
        fn lookup_a<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>> {
            Box::pin(async move { Ok(vec![]) })
        }
        fn lookup_aaaa<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>> {
            Box::pin(async move { Ok(vec![]) })
        }
    }

    #[tokio::test]
    async fn test_retrieve_public_key_incompatible_version() {
        let resolver = IncompatibleVersionResolver {};

        let key = retrieve_public_key(&resolver, "cloudflare.com", "dkim")
            .await
            .unwrap_err();
        assert_eq!(key, DKIMError::KeyIncompatibleVersion);
    }

    struct BadAlgorithmResolver {}
    impl Lookup for BadAlgorithmResolver {
        fn lookup_txt<'a>(
            &'a self,
            name: &'a str,
        ) -> BoxFuture<'a, Result<Vec<String>, DnsError>> {
            Box::pin(async move {
                assert_eq!(name, "dkim._domainkey.cloudflare.com");
                Ok(vec!["v=DKIM1; p=key; k=foo".to_string()])
            })
        }
        fn lookup_mx<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Vec<MxRecord>, DnsError>> {
            Box::pin(async move { Ok(vec![]) })
        }
        fn lookup_a<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>> {
            Box::pin(async move { Ok(vec![]) })
        }
        fn lookup_aaaa<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>> {
            Box::pin(async move { Ok(vec![]) })
        }
    }

    #[tokio::test]
    async fn test_retrieve_public_key_inappropriate_key_algorithm() {
        let resolver = BadAlgorithmResolver {};

        let key = retrieve_public_key(&resolver, "cloudflare.com", "dkim")
            .await
            .unwrap_err();
        assert_eq!(key, DKIMError::InappropriateKeyAlgorithm);
    }

    struct RevokedKeyResolver {}
    impl Lookup for RevokedKeyResolver {
        fn lookup_txt<'a>(
            &'a self,
            name: &'a str,
        ) -> BoxFuture<'a, Result<Vec<String>, DnsError>> {
            Box::pin(async move {
                assert_eq!(name, "dkim._domainkey.cloudflare.com");
                Ok(vec!["v=DKIM1; k=rsa; p=".to_string()])
            })
        }
        fn lookup_mx<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Vec<MxRecord>, DnsError>> {
            Box::pin(async move { Ok(vec![]) })
        }
        fn lookup_a<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>> {
            Box::pin(async move { Ok(vec![]) })
        }
        fn lookup_aaaa<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>> {
            Box::pin(async move { Ok(vec![]) })
        }
    }

    #[tokio::test]
    async fn test_retrieve_public_key_revoked() {
        let resolver = RevokedKeyResolver {};

        let key = retrieve_public_key(&resolver, "cloudflare.com", "dkim")
            .await
            .unwrap_err();
        assert_eq!(key, DKIMError::KeyRevoked);
        assert_eq!(key.status(), Status::Permfail);
    }
}
