//! Scripted backend for pipeline tests. Enabled by the `mock` feature.

use std::collections::VecDeque;

use crate::Sandbox;
use crate::bridge::{HostBridge, HostRequest, HostResponse};
use crate::error::SandboxError;
use crate::exec::{ExecutionOutput, InputBundle, ResourceUsage};
use crate::session::{Limits, NetworkMode, SandboxKind, SandboxSession, SessionState};

/// What the next `run` call should do.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Success {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
    /// Echo the request input back as stdout, like generated code that
    /// prints what it received.
    EchoInput,
    /// Print the value of the last scripted host call, like generated
    /// code printing an onward call result.
    EchoHostResponse,
    Timeout,
    Oom,
    Crash,
}

#[derive(Debug)]
pub struct MockSandbox {
    session: SandboxSession,
    fail_startup: bool,
    outcomes: VecDeque<MockOutcome>,
    host_calls: Vec<HostRequest>,
    /// Every (source, input) pair this sandbox has been asked to run.
    pub calls: Vec<(String, serde_json::Value)>,
    /// Replies the bridge gave to the scripted host calls.
    pub host_responses: Vec<HostResponse>,
}

impl MockSandbox {
    #[must_use]
    pub fn new(limits: Limits, network_mode: NetworkMode) -> Self {
        Self {
            session: SandboxSession::new(SandboxKind::Process, limits, network_mode),
            fail_startup: false,
            outcomes: VecDeque::new(),
            host_calls: Vec::new(),
            calls: Vec::new(),
            host_responses: Vec::new(),
        }
    }

    #[must_use]
    pub fn failing_startup(mut self) -> Self {
        self.fail_startup = true;
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: MockOutcome) -> Self {
        self.outcomes.push_back(outcome);
        self
    }

    /// Script a request the "generated code" makes over the RPC socket
    /// during its run.
    #[must_use]
    pub fn with_host_call(mut self, request: HostRequest) -> Self {
        self.host_calls.push(request);
        self
    }
}

impl Sandbox for MockSandbox {
    async fn initialize(&mut self) -> Result<(), SandboxError> {
        if self.fail_startup {
            return Err(SandboxError::StartupFailed {
                reason: "scripted startup failure".into(),
            });
        }
        self.session.advance(SessionState::Initialized)
    }

    async fn run(
        &mut self,
        source: &str,
        bundle: &InputBundle,
        bridge: &HostBridge,
    ) -> Result<ExecutionOutput, SandboxError> {
        self.calls.push((source.to_owned(), bundle.input.clone()));
        self.session.advance(SessionState::Running)?;
        for call in &self.host_calls {
            self.host_responses.push(bridge.handle(call.clone()).await);
        }
        let outcome = self.outcomes.pop_front().unwrap_or(MockOutcome::Success {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        });
        let usage = ResourceUsage {
            duration_ms: 1,
            memory_bytes: 0,
            cpu_ms: 0,
        };
        match outcome {
            MockOutcome::Success {
                stdout,
                stderr,
                exit_code,
            } => {
                self.session.advance(SessionState::Finished)?;
                Ok(ExecutionOutput {
                    stdout,
                    stderr,
                    exit_code,
                    usage,
                    network_log: bridge.drain_events(),
                })
            }
            MockOutcome::EchoInput => {
                self.session.advance(SessionState::Finished)?;
                Ok(ExecutionOutput {
                    stdout: bundle.input.to_string(),
                    stderr: String::new(),
                    exit_code: 0,
                    usage,
                    network_log: bridge.drain_events(),
                })
            }
            MockOutcome::EchoHostResponse => {
                self.session.advance(SessionState::Finished)?;
                let last = self.host_responses.last();
                let stdout = last
                    .and_then(|r| r.value.as_ref())
                    .map(ToString::to_string)
                    .unwrap_or_default();
                let stderr = last
                    .and_then(|r| r.error.as_ref())
                    .map(|e| e.message.clone())
                    .unwrap_or_default();
                Ok(ExecutionOutput {
                    stdout,
                    stderr,
                    exit_code: 0,
                    usage,
                    network_log: bridge.drain_events(),
                })
            }
            MockOutcome::Timeout => {
                self.session.advance(SessionState::Killed)?;
                Err(SandboxError::Timeout {
                    limit_ms: u64::try_from(self.session.limits.wall_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                })
            }
            MockOutcome::Oom => {
                self.session.advance(SessionState::Killed)?;
                Err(SandboxError::Oom)
            }
            MockOutcome::Crash => {
                self.session.advance(SessionState::Failed)?;
                Err(SandboxError::Crashed {
                    reason: "scripted crash".into(),
                })
            }
        }
    }

    async fn destroy(&mut self) -> Result<(), SandboxError> {
        self.session.advance(SessionState::Destroyed)
    }

    async fn health(&self) -> bool {
        !self.fail_startup
    }

    fn session(&self) -> &SandboxSession {
        &self.session
    }
}
