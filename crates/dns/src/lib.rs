//! Typed wrapper around an injected DNS resolver (component C4).
//!
//! Every protocol component that needs DNS (the DKIM key resolver, the SPF
//! evaluator, the DMARC and BIMI resolvers) depends on the single [`Lookup`]
//! trait defined here rather than rolling its own. `NXDOMAIN`/`NODATA`
//! normalize to an empty list at this layer; only transport failures and
//! timeouts surface as [`DnsError::Temporary`], and invalid domain syntax
//! surfaces as [`DnsError::Permanent`].

use futures::future::BoxFuture;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    #[error("DNS lookup for {0:?} failed transiently: {1}")]
    Temporary(String, String),
    #[error("DNS lookup for {0:?} is invalid: {1}")]
    Permanent(String, String),
    #[error("too many DNS lookups")]
    LookupLimitExceeded,
}

impl DnsError {
    pub fn is_permanent(&self) -> bool {
        !matches!(self, DnsError::Temporary(..))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub exchange: String,
    pub preference: u16,
}

/// A trait for entities that perform DNS resolution for this engine.
///
/// Implementations must normalize not-found responses to `Ok(vec![])`; only
/// genuine transport errors should produce `Err`.
pub trait Lookup: Sync + Send {
    fn lookup_txt<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<String>, DnsError>>;
    fn lookup_mx<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<MxRecord>, DnsError>>;
    fn lookup_a<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>>;
    fn lookup_aaaa<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>>;
}

fn validate_domain(name: &str) -> Result<(), DnsError> {
    if name.is_empty() || name.len() > 253 {
        return Err(DnsError::Permanent(name.to_string(), "invalid domain syntax".into()));
    }
    Ok(())
}

pub mod hickory_impl {
    //! Production [`Lookup`] backed by `hickory-resolver`, the same async
    //! resolver crate the signature and SPF components of the workspace this
    //! engine is grounded on already depend on.
    use super::*;
    use hickory_resolver::error::{ResolveError, ResolveErrorKind};
    use hickory_resolver::TokioAsyncResolver;

    fn to_dns_error(name: &str, err: ResolveError) -> DnsError {
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => DnsError::Permanent(name.to_string(), "no records".into()),
            _ => DnsError::Temporary(name.to_string(), err.to_string()),
        }
    }

    impl Lookup for TokioAsyncResolver {
        fn lookup_txt<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<String>, DnsError>> {
            Box::pin(async move {
                validate_domain(name)?;
                match self.txt_lookup(name).await {
                    Ok(records) => Ok(records
                        .into_iter()
                        .map(|txt| txt.iter().map(|data| String::from_utf8_lossy(data)).collect())
                        .collect()),
                    Err(err) if matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(vec![]),
                    Err(err) => Err(to_dns_error(name, err)),
                }
            })
        }

        fn lookup_mx<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<MxRecord>, DnsError>> {
            Box::pin(async move {
                validate_domain(name)?;
                match self.mx_lookup(name).await {
                    Ok(records) => Ok(records
                        .into_iter()
                        .map(|mx| MxRecord {
                            exchange: mx.exchange().to_utf8(),
                            preference: mx.preference(),
                        })
                        .collect()),
                    Err(err) if matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(vec![]),
                    Err(err) => Err(to_dns_error(name, err)),
                }
            })
        }

        fn lookup_a<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>> {
            Box::pin(async move {
                validate_domain(name)?;
                match self.ipv4_lookup(name).await {
                    Ok(records) => Ok(records.into_iter().map(|a| IpAddr::V4(a.0)).collect()),
                    Err(err) if matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(vec![]),
                    Err(err) => Err(to_dns_error(name, err)),
                }
            })
        }

        fn lookup_aaaa<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>> {
            Box::pin(async move {
                validate_domain(name)?;
                match self.ipv6_lookup(name).await {
                    Ok(records) => Ok(records.into_iter().map(|a| IpAddr::V6(a.0)).collect()),
                    Err(err) if matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(vec![]),
                    Err(err) => Err(to_dns_error(name, err)),
                }
            })
        }
    }
}

/// Shared, atomically-incremented lookup counter for the SPF evaluator
/// (§5: "they must still share one counter with atomic increment").
#[derive(Debug)]
pub struct LookupBudget {
    limit: usize,
    count: AtomicUsize,
    consecutive_void: AtomicUsize,
}

impl LookupBudget {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_CONSECUTIVE_VOID: usize = 2;

    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            count: AtomicUsize::new(0),
            consecutive_void: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Record one DNS lookup charged against the budget. `void` indicates
    /// the lookup returned no usable records (NXDOMAIN/NODATA).
    pub fn record(&self, void: bool) -> Result<(), DnsError> {
        let prior = self.count.fetch_add(1, Ordering::SeqCst);
        if prior + 1 > self.limit {
            return Err(DnsError::LookupLimitExceeded);
        }
        if void {
            let streak = self.consecutive_void.fetch_add(1, Ordering::SeqCst) + 1;
            if streak > Self::MAX_CONSECUTIVE_VOID {
                return Err(DnsError::LookupLimitExceeded);
            }
        } else {
            self.consecutive_void.store(0, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Decorates any [`Lookup`] with a shared [`LookupBudget`], charging every
/// call and normalizing limit overruns to [`DnsError::LookupLimitExceeded`].
pub struct CountedLookup<'a> {
    inner: &'a dyn Lookup,
    budget: &'a LookupBudget,
}

impl<'a> CountedLookup<'a> {
    pub fn new(inner: &'a dyn Lookup, budget: &'a LookupBudget) -> Self {
        Self { inner, budget }
    }
}

impl<'a> Lookup for CountedLookup<'a> {
    fn lookup_txt<'b>(&'b self, name: &'b str) -> BoxFuture<'b, Result<Vec<String>, DnsError>> {
        Box::pin(async move {
            let result = self.inner.lookup_txt(name).await?;
            self.budget.record(result.is_empty())?;
            Ok(result)
        })
    }

    fn lookup_mx<'b>(&'b self, name: &'b str) -> BoxFuture<'b, Result<Vec<MxRecord>, DnsError>> {
        Box::pin(async move {
            let result = self.inner.lookup_mx(name).await?;
            self.budget.record(result.is_empty())?;
            Ok(result)
        })
    }

    fn lookup_a<'b>(&'b self, name: &'b str) -> BoxFuture<'b, Result<Vec<IpAddr>, DnsError>> {
        Box::pin(async move {
            let result = self.inner.lookup_a(name).await?;
            self.budget.record(result.is_empty())?;
            Ok(result)
        })
    }

    fn lookup_aaaa<'b>(&'b self, name: &'b str) -> BoxFuture<'b, Result<Vec<IpAddr>, DnsError>> {
        Box::pin(async move {
            let result = self.inner.lookup_aaaa(name).await?;
            self.budget.record(result.is_empty())?;
            Ok(result)
        })
    }
}

/// An in-memory [`Lookup`] for tests, mirroring the `MockResolver`/`TestResolver`
/// doubles already used by the DKIM and SPF components this facade unifies.
#[derive(Default)]
pub struct TestResolver {
    txt: std::collections::HashMap<String, Vec<String>>,
    mx: std::collections::HashMap<String, Vec<MxRecord>>,
    a: std::collections::HashMap<String, Vec<IpAddr>>,
    aaaa: std::collections::HashMap<String, Vec<IpAddr>>,
}

impl TestResolver {
    pub fn with_txt(mut self, name: &str, value: &str) -> Self {
        self.txt.entry(name.to_string()).or_default().push(value.to_string());
        self
    }

    pub fn with_mx(mut self, name: &str, exchange: &str, preference: u16) -> Self {
        self.mx.entry(name.to_string()).or_default().push(MxRecord {
            exchange: exchange.to_string(),
            preference,
        });
        self
    }

    pub fn with_a(mut self, name: &str, ip: IpAddr) -> Self {
        self.a.entry(name.to_string()).or_default().push(ip);
        self
    }

    pub fn with_aaaa(mut self, name: &str, ip: IpAddr) -> Self {
        self.aaaa.entry(name.to_string()).or_default().push(ip);
        self
    }
}

impl Lookup for TestResolver {
    fn lookup_txt<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<String>, DnsError>> {
        let name = name.trim_end_matches('.').to_string();
        Box::pin(async move { Ok(self.txt.get(&name).cloned().unwrap_or_default()) })
    }

    fn lookup_mx<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<MxRecord>, DnsError>> {
        let name = name.trim_end_matches('.').to_string();
        Box::pin(async move { Ok(self.mx.get(&name).cloned().unwrap_or_default()) })
    }

    fn lookup_a<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>> {
        let name = name.trim_end_matches('.').to_string();
        Box::pin(async move { Ok(self.a.get(&name).cloned().unwrap_or_default()) })
    }

    fn lookup_aaaa<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, DnsError>> {
        let name = name.trim_end_matches('.').to_string();
        Box::pin(async move { Ok(self.aaaa.get(&name).cloned().unwrap_or_default()) })
    }
}
