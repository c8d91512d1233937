use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::provider::{ModelProvider, ResponseStream};
use crate::types::{CompletionRequest, Role};
use crate::ResponseEvent;

/// Deterministic mock provider for tests. Echoes the last user message back
/// as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "[no input]".into());

        let events: Vec<anyhow::Result<ResponseEvent>> = vec![
            Ok(ResponseEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(ResponseEvent::Usage { input_tokens: 10, output_tokens: 10 }),
            Ok(ResponseEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted mock provider. Each call to `complete` pops the next
/// response script from the front of the queue, letting tests specify exact
/// event sequences — including tool calls — without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<ResponseEvent>>>>,
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedMockProvider {
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![ResponseEvent::TextDelta(r), ResponseEvent::Done]])
    }
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        *self.last_request.lock().unwrap() = Some(req);
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            anyhow::bail!("ScriptedMockProvider: no more scripted responses");
        }
        let script = scripts.remove(0);
        let events: Vec<anyhow::Result<ResponseEvent>> = script.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[tokio::test]
    async fn mock_provider_echoes_last_user_message() {
        let provider = MockProvider;
        let req = CompletionRequest {
            messages: vec![Message::user("hello")],
            ..Default::default()
        };
        let mut stream = provider.complete(req).await.unwrap();
        use futures::StreamExt;
        let first = stream.next().await.unwrap().unwrap();
        match first {
            ResponseEvent::TextDelta(t) => assert_eq!(t, "MOCK: hello"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn scripted_provider_pops_scripts_in_order() {
        let provider = ScriptedMockProvider::new(vec![
            vec![ResponseEvent::TextDelta("first".into()), ResponseEvent::Done],
            vec![ResponseEvent::TextDelta("second".into()), ResponseEvent::Done],
        ]);
        use futures::StreamExt;
        let mut s1 = provider.complete(CompletionRequest::default()).await.unwrap();
        let e1 = s1.next().await.unwrap().unwrap();
        assert!(matches!(e1, ResponseEvent::TextDelta(t) if t == "first"));

        let mut s2 = provider.complete(CompletionRequest::default()).await.unwrap();
        let e2 = s2.next().await.unwrap().unwrap();
        assert!(matches!(e2, ResponseEvent::TextDelta(t) if t == "second"));
    }

    #[tokio::test]
    async fn scripted_provider_errors_when_exhausted() {
        let provider = ScriptedMockProvider::new(vec![]);
        assert!(provider.complete(CompletionRequest::default()).await.is_err());
    }
}
