//! Token-aware wrapper around the deployment transport.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crucible_pii::TokenMap;
use crucible_sandbox::{InvokeRequest, ToolTransport, TransportFuture};

/// Detokenizes onward-call parameters on the way out and re-tokenizes
/// responses on the way back, so the sandbox only ever sees placeholders
/// on either side of the RPC socket while external tools receive the raw
/// values they need.
pub struct ScrubbingTransport {
    tokens: Arc<Mutex<TokenMap>>,
    inner: Arc<dyn ToolTransport>,
}

impl ScrubbingTransport {
    #[must_use]
    pub fn new(tokens: Arc<Mutex<TokenMap>>, inner: Arc<dyn ToolTransport>) -> Self {
        Self { tokens, inner }
    }

    fn tokens(&self) -> MutexGuard<'_, TokenMap> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ToolTransport for ScrubbingTransport {
    fn call(&self, mut request: InvokeRequest) -> TransportFuture<'_> {
        Box::pin(async move {
            self.tokens().detokenize(&mut request.params);
            let mut value = self.inner.call(request).await?;
            self.tokens().tokenize(&mut value);
            Ok(value)
        })
    }

    fn fetch(&self, url: String) -> TransportFuture<'_> {
        Box::pin(async move {
            let mut wrapped = serde_json::Value::String(url);
            self.tokens().detokenize(&mut wrapped);
            let url = wrapped.as_str().unwrap_or_default().to_owned();
            let mut value = self.inner.fetch(url).await?;
            self.tokens().tokenize(&mut value);
            Ok(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};

    /// Records what it was handed and replies with a fixed value.
    struct SpyTransport {
        seen: Mutex<Vec<Value>>,
        reply: Value,
    }

    impl SpyTransport {
        fn new(reply: Value) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                reply,
            }
        }
    }

    impl ToolTransport for SpyTransport {
        fn call(&self, request: InvokeRequest) -> TransportFuture<'_> {
            self.seen.lock().unwrap().push(request.params);
            let reply = self.reply.clone();
            Box::pin(async move { Ok(reply) })
        }
    }

    fn minted(input: &mut Value) -> Arc<Mutex<TokenMap>> {
        let mut map = TokenMap::new();
        map.tokenize(input);
        Arc::new(Mutex::new(map))
    }

    #[tokio::test]
    async fn params_leave_raw_and_responses_come_back_tokenized() {
        let mut input = json!({"email": "alice@example.com"});
        let tokens = minted(&mut input);
        assert_eq!(input["email"], "[EMAIL_1]");

        let spy = Arc::new(SpyTransport::new(json!({"contact": "bob@example.com"})));
        let transport = ScrubbingTransport::new(Arc::clone(&tokens), Arc::clone(&spy) as _);

        let value = transport
            .call(InvokeRequest {
                server: "crm".into(),
                tool: "lookup".into(),
                params: json!({"email": "[EMAIL_1]"}),
            })
            .await
            .unwrap();

        // The external tool saw the raw address.
        let seen = spy.seen.lock().unwrap();
        assert_eq!(seen[0]["email"], "alice@example.com");
        // The sandbox-facing reply is a fresh placeholder.
        assert_eq!(value["contact"], "[EMAIL_2]");
        let map = tokens.lock().unwrap();
        assert_eq!(map.len(), 2);
    }

    #[tokio::test]
    async fn unknown_placeholders_pass_through_unchanged() {
        let tokens = Arc::new(Mutex::new(TokenMap::new()));
        let spy = Arc::new(SpyTransport::new(Value::Null));
        let transport = ScrubbingTransport::new(tokens, Arc::clone(&spy) as _);
        transport
            .call(InvokeRequest {
                server: "crm".into(),
                tool: "lookup".into(),
                params: json!({"email": "[EMAIL_7]"}),
            })
            .await
            .unwrap();
        assert_eq!(spy.seen.lock().unwrap()[0]["email"], "[EMAIL_7]");
    }
}
