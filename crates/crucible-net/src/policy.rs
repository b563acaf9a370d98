//! Host whitelist and address blacklist.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

/// Why a connection was allowed or refused. Logged verbatim and surfaced
/// as an ordinary network error inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allowed,
    Blacklisted,
    NotWhitelisted,
    RateLimited,
}

impl PolicyDecision {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Blacklisted => "blacklisted",
            Self::NotWhitelisted => "not_whitelisted",
            Self::RateLimited => "rate_limited",
        }
    }

    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

impl std::fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One whitelist entry: an exact host or a `*.suffix` wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DomainPattern {
    Exact(String),
    Suffix(String),
}

impl DomainPattern {
    fn parse(entry: &str) -> Self {
        entry.strip_prefix("*.").map_or_else(
            || Self::Exact(entry.to_ascii_lowercase()),
            |suffix| Self::Suffix(suffix.to_ascii_lowercase()),
        )
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            Self::Exact(exact) => host == exact,
            // `*.example.com` covers subdomains and the apex itself.
            Self::Suffix(suffix) => {
                host == suffix || host.strip_suffix(suffix).is_some_and(|p| p.ends_with('.'))
            }
        }
    }
}

/// Egress policy over host names. The blacklist always wins.
#[derive(Debug, Clone, Default)]
pub struct HostPolicy {
    allowed: Vec<DomainPattern>,
}

impl HostPolicy {
    #[must_use]
    pub fn new(allowed_domains: &[String]) -> Self {
        Self {
            allowed: allowed_domains
                .iter()
                .map(|d| DomainPattern::parse(d))
                .collect(),
        }
    }

    /// Evaluate a bare host name or address literal.
    #[must_use]
    pub fn evaluate(&self, host: &str) -> PolicyDecision {
        let host = host.to_ascii_lowercase();
        if is_blacklisted(&host) {
            return PolicyDecision::Blacklisted;
        }
        if self.allowed.iter().any(|p| p.matches(&host)) {
            PolicyDecision::Allowed
        } else {
            PolicyDecision::NotWhitelisted
        }
    }
}

/// Private, loopback, link-local, multicast, and carrier-NAT ranges, plus
/// the loopback names. These are refused even when whitelisted.
fn is_blacklisted(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    let Ok(addr) = host.trim_matches(['[', ']']).parse::<IpAddr>() else {
        return false;
    };
    match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || is_cgnat(v4)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || is_unique_local(v6)
                || is_link_local_v6(v6)
        }
    }
}

/// 100.64.0.0/10.
fn is_cgnat(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    octets[0] == 100 && (octets[1] & 0xc0) == 64
}

/// fc00::/7.
fn is_unique_local(addr: Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xfe00) == 0xfc00
}

/// fe80::/10.
fn is_link_local_v6(addr: Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}
