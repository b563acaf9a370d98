//! Host side of the sandbox RPC socket.
//!
//! Generated code never talks to the network directly: every onward tool
//! call and every fetch goes over a Unix socket in the workspace, one JSON
//! request per line. The bridge gates fetches through the network policy,
//! records each egress attempt, and hands allowed work to the configured
//! transport. Refusals come back as error replies, which the in-sandbox
//! shim raises as ordinary network errors.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use crucible_net::{NetworkPolicy, PolicyDecision, host_of};

use crate::error::SandboxError;
use crate::exec::NetworkEvent;

/// Workspace-relative socket name; backends expose the full path to the
/// guest via `CRUCIBLE_RPC_SOCK`.
pub const RPC_SOCKET_NAME: &str = ".crucible_rpc.sock";

/// One onward tool call, addressed by server and tool name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub server: String,
    pub tool: String,
    pub params: Value,
}

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Value, String>> + Send + 'a>>;

/// Executes work the bridge has already admitted. Object-safe so the
/// orchestrator can hold one behind `Arc<dyn ToolTransport>`.
pub trait ToolTransport: Send + Sync {
    /// Perform an onward tool call and return its result value.
    fn call(&self, request: InvokeRequest) -> TransportFuture<'_>;

    /// Perform an allowed fetch. Deployments without an egress executor
    /// keep the default, which refuses.
    fn fetch(&self, url: String) -> TransportFuture<'_> {
        let _ = url;
        Box::pin(async { Err("no fetch transport configured".to_owned()) })
    }
}

/// Refuses every onward call; the starting point until a deployment wires
/// a real transport in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl ToolTransport for NullTransport {
    fn call(&self, _request: InvokeRequest) -> TransportFuture<'_> {
        Box::pin(async { Err("no tool transport configured".to_owned()) })
    }
}

/// Wire request, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostRequest {
    Invoke {
        server: String,
        tool: String,
        params: Value,
    },
    Fetch {
        url: String,
    },
}

/// Wire reply; exactly one of `value` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<HostError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostError {
    pub kind: String,
    pub message: String,
}

impl HostResponse {
    fn ok(value: Value) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    fn err(kind: &str, message: impl Into<String>) -> Self {
        Self {
            value: None,
            error: Some(HostError {
                kind: kind.to_owned(),
                message: message.into(),
            }),
        }
    }
}

struct BridgeInner {
    policy: Option<NetworkPolicy>,
    transport: Arc<dyn ToolTransport>,
    events: Mutex<Vec<NetworkEvent>>,
}

/// Per-run request handler shared between the serving task and the
/// backend that collects the egress log afterwards.
#[derive(Clone)]
pub struct HostBridge {
    inner: Arc<BridgeInner>,
}

impl Default for HostBridge {
    /// No egress policy (everything refused) and no transport.
    fn default() -> Self {
        Self::new(None, Arc::new(NullTransport))
    }
}

impl HostBridge {
    #[must_use]
    pub fn new(policy: Option<NetworkPolicy>, transport: Arc<dyn ToolTransport>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                policy,
                transport,
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Answer one request. Fetches consult the policy first; invokes are
    /// engine-mediated and skip it.
    pub async fn handle(&self, request: HostRequest) -> HostResponse {
        match request {
            HostRequest::Invoke {
                server,
                tool,
                params,
            } => {
                let result = self
                    .inner
                    .transport
                    .call(InvokeRequest {
                        server,
                        tool,
                        params,
                    })
                    .await;
                match result {
                    Ok(value) => HostResponse::ok(value),
                    Err(message) => HostResponse::err("transport", message),
                }
            }
            HostRequest::Fetch { url } => {
                if let Err(refusal) = self.admit_fetch(&url) {
                    return HostResponse::err("network", refusal.to_string());
                }
                match self.inner.transport.fetch(url).await {
                    Ok(value) => HostResponse::ok(value),
                    Err(message) => HostResponse::err("network", message),
                }
            }
        }
    }

    /// Gate one fetch and record the attempt.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PolicyViolation`] when the policy refuses
    /// the host, or when no policy was granted at all.
    fn admit_fetch(&self, url: &str) -> Result<(), SandboxError> {
        let host = host_of(url).unwrap_or_else(|| url.to_owned());
        let decision = match &self.inner.policy {
            Some(policy) => policy.decide_url(url),
            None => PolicyDecision::NotWhitelisted,
        };
        self.record(NetworkEvent {
            host: host.clone(),
            decision,
        });
        if decision.is_allowed() {
            Ok(())
        } else {
            Err(SandboxError::PolicyViolation { host, decision })
        }
    }

    fn record(&self, event: NetworkEvent) {
        self.inner
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Take the egress log accumulated since the last drain.
    #[must_use]
    pub fn drain_events(&self) -> Vec<NetworkEvent> {
        std::mem::take(
            &mut *self
                .inner
                .events
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Serve requests on `listener` until aborted; backends spawn this for
    /// the duration of one run.
    pub async fn serve(self, listener: UnixListener) {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let bridge = self.clone();
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let response = match serde_json::from_str::<HostRequest>(&line) {
                        Ok(request) => bridge.handle(request).await,
                        Err(err) => HostResponse::err("protocol", err.to_string()),
                    };
                    let mut reply = serde_json::to_vec(&response).unwrap_or_default();
                    reply.push(b'\n');
                    if write.write_all(&reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    }
}
