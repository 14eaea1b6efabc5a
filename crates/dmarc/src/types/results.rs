use crate::types::policy::Policy;
use std::fmt;

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum DmarcResult {
    Pass,
    Fail,
}

impl DmarcResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for DmarcResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The action a receiver should take, derived from the published policy once
/// alignment has been evaluated: the outcome surfaced to callers, distinct
/// from the plain pass/fail of [`DmarcResult`].
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Disposition {
    Pass,
    None,
    Quarantine,
    Reject,
    TempError,
    PermError,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::None => "none",
            Self::Quarantine => "quarantine",
            Self::Reject => "reject",
            Self::TempError => "temperror",
            Self::PermError => "permerror",
        })
    }
}

impl From<Policy> for Disposition {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::None => Disposition::None,
            Policy::Quarantine => Disposition::Quarantine,
            Policy::Reject => Disposition::Reject,
        }
    }
}

/// Bundles a [`Disposition`] with the reasoning behind it, plus enough of the
/// resolved policy for a caller to format `Authentication-Results`.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct DispositionWithContext {
    pub result: Disposition,
    pub dmarc_result: DmarcResult,
    pub policy: Policy,
    pub subdomain_policy: Policy,
    pub aligned_method: Option<&'static str>,
    pub domain: String,
    pub context: String,
}
