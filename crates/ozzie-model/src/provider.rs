use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::catalog::{self, ModelCatalogEntry};
use crate::types::{CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// The contract the core consumes from an LLM provider adapter (§6.2).
///
/// Concrete network-backed implementations (OpenAI, Anthropic, ...) are out
/// of scope; this trait plus `MockProvider`/`ScriptedMockProvider` are the
/// full deliverable.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model_name(&self) -> &str;

    /// Stream a completion for `req`. Tool calls, if any, arrive as
    /// `ResponseEvent::ToolCall` events interleaved with text deltas.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    fn catalog_entry(&self) -> Option<ModelCatalogEntry> {
        catalog::lookup(self.name(), self.model_name())
    }

    fn catalog_max_output_tokens(&self) -> Option<u32> {
        self.catalog_entry().map(|e| e.max_output_tokens)
    }

    fn catalog_context_window(&self) -> Option<u32> {
        self.catalog_entry().map(|e| e.context_window)
    }
}
