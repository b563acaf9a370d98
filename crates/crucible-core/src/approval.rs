//! Human-in-the-loop gate for risky executions.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;

use crucible_validate::{ImpactAssessment, RiskLevel, Violation};

use crate::config::ApprovalConfig;

/// Which risk levels skip the human entirely. Critical never does,
/// whatever the configuration claims.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalPolicy {
    pub auto_approve_low: bool,
    pub auto_approve_medium: bool,
    pub auto_approve_high: bool,
    pub timeout: Duration,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            auto_approve_low: true,
            auto_approve_medium: false,
            auto_approve_high: false,
            timeout: Duration::from_secs(60),
        }
    }
}

impl ApprovalPolicy {
    #[must_use]
    pub fn from_config(config: &ApprovalConfig) -> Self {
        Self {
            auto_approve_low: config.auto_approve_low,
            auto_approve_medium: config.auto_approve_medium,
            auto_approve_high: config.auto_approve_high,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    #[must_use]
    pub fn auto_approves(&self, risk: RiskLevel) -> bool {
        match risk {
            RiskLevel::Low => self.auto_approve_low,
            RiskLevel::Medium => self.auto_approve_medium,
            RiskLevel::High => self.auto_approve_high,
            RiskLevel::Critical => false,
        }
    }
}

/// Everything the approver sees before deciding; one screen's worth.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub action: String,
    /// Content hash of the code to run; the session cache key.
    pub action_hash: String,
    pub risk_level: RiskLevel,
    pub violations: Vec<Violation>,
    pub impact: ImpactAssessment,
    pub code_excerpt: String,
}

impl ApprovalRequest {
    /// The summary a console approver prints.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "action: {}", self.action);
        let _ = writeln!(
            out,
            "risk: {} | blast radius: {} | reversible: {}",
            self.risk_level, self.impact.blast_radius, self.impact.reversible
        );
        let _ = writeln!(
            out,
            "files: {} touched, {} deleted | hosts: {} | commands: {}",
            self.impact.files_touched.len(),
            self.impact.files_deleted_count,
            self.impact.hosts_contacted.len(),
            self.impact.commands_spawned.len()
        );
        for violation in &self.violations {
            let _ = writeln!(out, "  [{}] {}: {}", violation.severity, violation.rule, violation.message);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    /// Approve and skip the prompt for the same action hash this session.
    ApproveForSession,
    Deny,
}

/// Something that can answer an [`ApprovalRequest`]: a console prompt in
/// the CLI, a scripted responder in tests.
pub trait Approver: Send + Sync {
    fn decide(
        &self,
        request: &ApprovalRequest,
    ) -> impl Future<Output = ApprovalDecision> + Send;
}

/// How the gate resolved a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub approved: bool,
    /// True when no human was consulted (policy or session cache).
    pub auto: bool,
}

pub struct ApprovalGate<A> {
    policy: ApprovalPolicy,
    approver: A,
    /// (session_id, action_hash) pairs granted for the session.
    granted: Mutex<HashSet<(String, String)>>,
}

impl<A: Approver> ApprovalGate<A> {
    pub fn new(policy: ApprovalPolicy, approver: A) -> Self {
        Self {
            policy,
            approver,
            granted: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn approver(&self) -> &A {
        &self.approver
    }

    /// Resolve `request` for `session_id`. `force` sends even
    /// auto-approvable risk levels to the approver. A decision that does
    /// not arrive within the policy timeout is a denial.
    pub async fn evaluate(&self, session_id: &str, request: &ApprovalRequest, force: bool) -> Verdict {
        if !force && self.policy.auto_approves(request.risk_level) {
            return Verdict {
                approved: true,
                auto: true,
            };
        }
        let key = (session_id.to_owned(), request.action_hash.clone());
        if self.cached(&key) {
            tracing::debug!(action = %request.action, "approval served from session cache");
            return Verdict {
                approved: true,
                auto: true,
            };
        }
        let decision = tokio::time::timeout(self.policy.timeout, self.approver.decide(request)).await;
        match decision {
            Ok(ApprovalDecision::Approve) => Verdict {
                approved: true,
                auto: false,
            },
            Ok(ApprovalDecision::ApproveForSession) => {
                self.granted
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .insert(key);
                Verdict {
                    approved: true,
                    auto: false,
                }
            }
            Ok(ApprovalDecision::Deny) => Verdict {
                approved: false,
                auto: false,
            },
            Err(_) => {
                tracing::warn!(action = %request.action, "approval timed out, denying");
                Verdict {
                    approved: false,
                    auto: false,
                }
            }
        }
    }

    fn cached(&self, key: &(String, String)) -> bool {
        self.granted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(key)
    }
}

/// Denies everything; the default for non-interactive contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl Approver for DenyAll {
    async fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Deny
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crucible_validate::BlastRadius;

    struct Scripted {
        decision: ApprovalDecision,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(decision: ApprovalDecision) -> Self {
            Self {
                decision,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Approver for Scripted {
        async fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.decision
        }
    }

    /// Never answers; exercises the timeout path.
    struct Silent;

    impl Approver for Silent {
        async fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
            std::future::pending().await
        }
    }

    fn request(risk: RiskLevel) -> ApprovalRequest {
        ApprovalRequest {
            action: "run generated code".into(),
            action_hash: "abc123".into(),
            risk_level: risk,
            violations: vec![],
            impact: ImpactAssessment {
                files_touched: vec![],
                files_deleted_count: 0,
                hosts_contacted: vec![],
                commands_spawned: vec![],
                reversible: true,
                blast_radius: BlastRadius::Contained,
            },
            code_excerpt: String::new(),
        }
    }

    #[tokio::test]
    async fn low_risk_is_auto_approved_without_consultation() {
        let approver = Scripted::new(ApprovalDecision::Deny);
        let gate = ApprovalGate::new(ApprovalPolicy::default(), approver);
        let verdict = gate.evaluate("s1", &request(RiskLevel::Low), false).await;
        assert!(verdict.approved);
        assert!(verdict.auto);
        assert_eq!(gate.approver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn critical_is_never_auto_approved() {
        let policy = ApprovalPolicy {
            auto_approve_low: true,
            auto_approve_medium: true,
            auto_approve_high: true,
            timeout: Duration::from_secs(1),
        };
        let gate = ApprovalGate::new(policy, Scripted::new(ApprovalDecision::Deny));
        let verdict = gate.evaluate("s1", &request(RiskLevel::Critical), false).await;
        assert!(!verdict.approved);
        assert_eq!(gate.approver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_consults_even_for_low_risk() {
        let gate = ApprovalGate::new(
            ApprovalPolicy::default(),
            Scripted::new(ApprovalDecision::Approve),
        );
        let verdict = gate.evaluate("s1", &request(RiskLevel::Low), true).await;
        assert!(verdict.approved);
        assert!(!verdict.auto);
        assert_eq!(gate.approver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn session_grant_skips_the_second_prompt() {
        let gate = ApprovalGate::new(
            ApprovalPolicy::default(),
            Scripted::new(ApprovalDecision::ApproveForSession),
        );
        let first = gate.evaluate("s1", &request(RiskLevel::High), false).await;
        let second = gate.evaluate("s1", &request(RiskLevel::High), false).await;
        assert!(first.approved && !first.auto);
        assert!(second.approved && second.auto);
        assert_eq!(gate.approver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn session_grant_does_not_leak_across_sessions() {
        let gate = ApprovalGate::new(
            ApprovalPolicy::default(),
            Scripted::new(ApprovalDecision::ApproveForSession),
        );
        gate.evaluate("s1", &request(RiskLevel::High), false).await;
        let other = gate.evaluate("s2", &request(RiskLevel::High), false).await;
        assert!(!other.auto);
        assert_eq!(gate.approver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_answer_within_timeout_is_a_denial() {
        let policy = ApprovalPolicy {
            timeout: Duration::from_millis(20),
            ..ApprovalPolicy::default()
        };
        let gate = ApprovalGate::new(policy, Silent);
        let verdict = gate.evaluate("s1", &request(RiskLevel::High), false).await;
        assert!(!verdict.approved);
    }

    #[test]
    fn summary_fits_on_one_screen() {
        let req = request(RiskLevel::Medium);
        let summary = req.summary();
        assert!(summary.contains("risk: medium"));
        assert!(summary.lines().count() <= 20);
    }
}
