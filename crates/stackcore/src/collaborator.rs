//! Narrow contracts for the external services a run depends on.

use crate::{CollaboratorError, FragmentStream};
use async_trait::async_trait;

/// Similarity search over an externally ingested document collection.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Passages most relevant to `text`, best match first.
    async fn query(
        &self,
        collection: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<String>, CollaboratorError>;
}

/// Web search augmentation.
#[async_trait]
pub trait Searcher: Send + Sync {
    /// Findings formatted as prompt-ready text.
    async fn search(
        &self,
        query: &str,
        credential: Option<&str>,
        num_results: usize,
    ) -> Result<String, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub credential: Option<String>,
}

/// Language-model generation.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Start generating. Errors before the first fragment are returned here;
    /// later ones arrive as `Err` items in the stream.
    async fn generate(&self, request: GenerationRequest)
        -> Result<FragmentStream, CollaboratorError>;
}
