//! Standard stage library
//!
//! Stage adapters for the four node kinds plus the collaborators they talk
//! to: an OpenRouter streaming generator, a SerpAPI searcher and an
//! in-memory retriever.

mod knowledge;
mod llm;
mod memory;
mod openrouter;
mod output;
mod query;
mod serpapi;
mod sse;

pub use knowledge::{KnowledgeBaseFactory, KnowledgeBaseStage};
pub use llm::{build_prompt, LlmEngineFactory, LlmEngineStage};
pub use memory::MemoryRetriever;
pub use openrouter::{
    resolve_model, GeneratorConfig, OpenRouterGenerator, DEFAULT_SYSTEM_PROMPT, KNOWN_MODELS,
    OPENROUTER_BASE_URL,
};
pub use output::{OutputFactory, OutputStage};
pub use query::{UserQueryFactory, UserQueryStage};
pub use serpapi::{format_findings, SearchConfig, SearchResult, SerpApiSearcher, SERPAPI_ENDPOINT};
pub use sse::{text_fragments, SseParser};

use stackcore::{Generator, Retriever, Searcher};
use stackruntime::StageRegistry;
use std::sync::Arc;

/// External services the standard stages depend on.
#[derive(Clone)]
pub struct Collaborators {
    pub retriever: Arc<dyn Retriever>,
    pub generator: Arc<dyn Generator>,
    pub searcher: Arc<dyn Searcher>,
    /// Results requested per web search.
    pub search_results: usize,
}

/// Register all standard stages with a registry
pub fn register_all(registry: &mut StageRegistry, collaborators: Collaborators) {
    registry.register(Arc::new(UserQueryFactory));
    registry.register(Arc::new(KnowledgeBaseFactory::new(collaborators.retriever)));
    registry.register(Arc::new(LlmEngineFactory::new(
        collaborators.generator,
        collaborators.searcher,
        collaborators.search_results,
    )));
    registry.register(Arc::new(OutputFactory));
}
