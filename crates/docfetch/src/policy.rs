//! Resource-access policy and the gate that applies it to outgoing requests.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use url::Url;

use crate::types::FetchError;

/// Bit-set of request capabilities granted to the loaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessPolicy(u8);

impl AccessPolicy {
    pub const NONE: Self = Self(0);
    pub const CSS: Self = Self(1);
    pub const JS: Self = Self(2);
    pub const REDIRECT: Self = Self(4);
    pub const ALL: Self = Self(8);

    const NAMED: [(&'static str, Self); 4] = [
        ("css", Self::CSS),
        ("js", Self::JS),
        ("redirect", Self::REDIRECT),
        ("all", Self::ALL),
    ];

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the capability is granted, directly or through `ALL`.
    pub const fn allows(self, capability: Self) -> bool {
        self.contains(Self::ALL) || self.contains(capability)
    }
}

impl BitOr for AccessPolicy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AccessPolicy {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromStr for AccessPolicy {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "none" {
            return Ok(Self::NONE);
        }
        Self::NAMED
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, policy)| *policy)
            .ok_or_else(|| {
                FetchError::Config(format!(
                    "unknown access policy '{s}', expected none, css, js, redirect or all"
                ))
            })
    }
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(_, p)| self.contains(*p))
            .map(|(name, _)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// Which rule let a request through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    AllowAll,
    Origin,
    Stylesheet,
    Script,
    Redirect,
}

/// Outcome of an access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow(AllowReason),
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow(_))
    }
}

/// Applies an [`AccessPolicy`] to the requests of one document load.
///
/// The gate also owns the redirect allow-set: targets of redirects observed
/// on completed requests, each of which admits exactly one follow-up request.
#[derive(Debug, Clone)]
pub struct AccessGate {
    policy: AccessPolicy,
    origin: Url,
    redirects: Vec<Url>,
}

impl AccessGate {
    pub fn new(policy: AccessPolicy, origin: Url) -> Self {
        Self {
            policy,
            origin,
            redirects: Vec::new(),
        }
    }

    pub fn policy(&self) -> AccessPolicy {
        self.policy
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Number of recorded redirect targets not yet consumed.
    pub fn pending_redirects(&self) -> usize {
        self.redirects.len()
    }

    /// Decide whether a request to `url` may proceed.
    ///
    /// A matching redirect entry is consumed, so a second request to the same
    /// target is judged without it.
    pub fn decide(&mut self, url: &Url) -> Decision {
        let path = url.path();

        if self.policy.contains(AccessPolicy::ALL) {
            return Decision::Allow(AllowReason::AllowAll);
        }
        if *url == self.origin {
            return Decision::Allow(AllowReason::Origin);
        }
        if self.policy.allows(AccessPolicy::CSS) && ends_with_ignore_case(path, ".css") {
            return Decision::Allow(AllowReason::Stylesheet);
        }
        if self.policy.allows(AccessPolicy::JS) && ends_with_ignore_case(path, ".js") {
            return Decision::Allow(AllowReason::Script);
        }
        if self.policy.allows(AccessPolicy::REDIRECT) {
            if let Some(pos) = self.redirects.iter().position(|r| r == url) {
                self.redirects.remove(pos);
                return Decision::Allow(AllowReason::Redirect);
            }
        }
        Decision::Deny
    }

    /// Remember a redirect target so one follow-up request to it is allowed.
    pub fn record_redirect(&mut self, target: Url) {
        if !self.policy.contains(AccessPolicy::REDIRECT) {
            return;
        }
        tracing::debug!("recorded redirect target {target}");
        self.redirects.push(target);
    }
}

fn ends_with_ignore_case(path: &str, suffix: &str) -> bool {
    let (path, suffix) = (path.as_bytes(), suffix.as_bytes());
    path.len() >= suffix.len() && path[path.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}
