//! Chat-completion binding for the classification interface.

use async_trait::async_trait;
use litroute_llm::ChatClient;

use super::{ContentClassifier, ExternalResult, PromptKind, Verdict};

/// Classifier collaborator backed by a [`ChatClient`].
#[derive(Debug, Clone)]
pub struct LlmClassifier {
    client: ChatClient,
}

impl LlmClassifier {
    /// Wraps a configured client.
    #[must_use]
    pub const fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentClassifier for LlmClassifier {
    async fn classify(&self, kind: PromptKind, text: &str) -> ExternalResult<Verdict> {
        Ok(self.client.classify(kind, text).await?)
    }
}
