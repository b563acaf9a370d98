//! Network policy for sandboxed code: egress whitelist, address blacklist,
//! and a per-host sliding-window rate limiter.
//!
//! Refusals surface inside the sandbox as ordinary network errors, never as
//! host-level exceptions, so generated code observes plain failure
//! semantics.

pub mod limiter;
pub mod policy;

pub use limiter::RateLimiter;
pub use policy::{HostPolicy, PolicyDecision};

use std::time::Duration;

/// Host portion of a URL, when it has one.
#[must_use]
pub fn host_of(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
}

/// Combined egress gate consulted once per outbound request.
#[derive(Debug)]
pub struct NetworkPolicy {
    hosts: HostPolicy,
    limiter: RateLimiter,
}

impl NetworkPolicy {
    #[must_use]
    pub fn new(allowed_domains: &[String], rate_limit: usize, window: Duration) -> Self {
        Self {
            hosts: HostPolicy::new(allowed_domains),
            limiter: RateLimiter::new(rate_limit, window),
        }
    }

    /// Decide for a full URL; unparseable URLs are treated as not
    /// whitelisted.
    #[must_use]
    pub fn decide_url(&self, raw: &str) -> PolicyDecision {
        let host = url::Url::parse(raw)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned));
        let Some(host) = host else {
            tracing::debug!(url = raw, "egress refused: no host");
            return PolicyDecision::NotWhitelisted;
        };
        self.decide(&host)
    }

    /// Decide for a bare host. Order: blacklist, whitelist, rate limit.
    #[must_use]
    pub fn decide(&self, host: &str) -> PolicyDecision {
        let decision = self.hosts.evaluate(host);
        if !decision.is_allowed() {
            tracing::debug!(host, reason = %decision, "egress refused");
            return decision;
        }
        if !self.limiter.try_acquire(host) {
            tracing::debug!(host, reason = %PolicyDecision::RateLimited, "egress refused");
            return PolicyDecision::RateLimited;
        }
        tracing::trace!(host, "egress allowed");
        PolicyDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(domains: &[&str], limit: usize) -> NetworkPolicy {
        let owned: Vec<String> = domains.iter().map(|s| (*s).to_owned()).collect();
        NetworkPolicy::new(&owned, limit, Duration::from_secs(60))
    }

    #[test]
    fn host_of_extracts_or_declines() {
        assert_eq!(host_of("https://api.example.com/v1").as_deref(), Some("api.example.com"));
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn url_host_extraction() {
        let p = network(&["api.example.com"], 10);
        assert_eq!(
            p.decide_url("https://api.example.com/v1"),
            PolicyDecision::Allowed
        );
        assert_eq!(
            p.decide_url("https://evil.test/"),
            PolicyDecision::NotWhitelisted
        );
        assert_eq!(p.decide_url("not a url"), PolicyDecision::NotWhitelisted);
    }

    #[test]
    fn blacklisted_requests_never_consume_budget() {
        let p = network(&["api.example.com"], 1);
        assert_eq!(p.decide("127.0.0.1"), PolicyDecision::Blacklisted);
        // The single slot is still available.
        assert_eq!(p.decide("api.example.com"), PolicyDecision::Allowed);
        assert_eq!(p.decide("api.example.com"), PolicyDecision::RateLimited);
    }

    #[test]
    fn rate_limit_applies_after_whitelist() {
        let p = network(&["a.test"], 2);
        assert_eq!(p.decide("a.test"), PolicyDecision::Allowed);
        assert_eq!(p.decide("a.test"), PolicyDecision::Allowed);
        assert_eq!(p.decide("a.test"), PolicyDecision::RateLimited);
    }
}
