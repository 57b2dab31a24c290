use async_trait::async_trait;
use stackcore::template;
use stackcore::{
    ExecutionContext, GenerationRequest, Generator, LlmEngineConfig, Node, NodeConfig, NodeKind,
    Searcher, Stage, StageError,
};
use stackruntime::{StageFactory, StageMetadata};
use std::collections::HashMap;
use std::sync::Arc;

const CONTEXT_PROMPT: &str = "Use the following context to answer the question.\n\nContext:\n{{context}}\n\nQuestion: {{query}}\n\nAnswer:";
const BARE_PROMPT: &str = "{{query}}";

/// Render the node's template, or the built-in one when it is blank.
pub fn build_prompt(template: &str, query: &str, context: Option<&str>) -> String {
    let template = if !template.trim().is_empty() {
        template
    } else if context.is_some() {
        CONTEXT_PROMPT
    } else {
        BARE_PROMPT
    };

    let mut bindings = HashMap::from([("query", query)]);
    if let Some(context) = context {
        bindings.insert("context", context);
    }
    template::render(template, &bindings)
}

/// Optional web search, then prompt rendering, then a streamed generation.
pub struct LlmEngineStage {
    config: LlmEngineConfig,
    generator: Arc<dyn Generator>,
    searcher: Arc<dyn Searcher>,
    search_results: usize,
}

impl LlmEngineStage {
    pub fn new(
        config: LlmEngineConfig,
        generator: Arc<dyn Generator>,
        searcher: Arc<dyn Searcher>,
        search_results: usize,
    ) -> Self {
        Self {
            config,
            generator,
            searcher,
            search_results,
        }
    }

    async fn augment_with_search(&self, ctx: &mut ExecutionContext) {
        let credential = self.config.serp_api_key.as_deref().filter(|k| !k.is_empty());
        match self
            .searcher
            .search(ctx.query(), credential, self.search_results)
            .await
        {
            Ok(findings) => ctx.append_web_findings(&findings),
            Err(e) => {
                tracing::warn!(error = %e, "Web search failed; continuing without findings");
                ctx.search_degraded = true;
            }
        }
    }
}

#[async_trait]
impl Stage for LlmEngineStage {
    fn kind(&self) -> NodeKind {
        NodeKind::LlmEngine
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        if self.config.enable_web_search {
            self.augment_with_search(ctx).await;
        }

        let context = ctx.combined_context();
        let prompt = build_prompt(&self.config.prompt, ctx.query(), context.as_deref());

        let credential = self
            .config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| ctx.fallback_credential.clone());

        let request = GenerationRequest {
            model: self.config.model.clone(),
            prompt,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens.get(),
            credential,
        };

        tracing::debug!(
            model = %request.model,
            has_context = context.is_some(),
            prompt_len = request.prompt.len(),
            "Starting generation"
        );

        ctx.model = Some(self.config.model.clone());
        let fragments = self.generator.generate(request).await?;
        ctx.set_fragments(fragments);
        Ok(())
    }
}

pub struct LlmEngineFactory {
    generator: Arc<dyn Generator>,
    searcher: Arc<dyn Searcher>,
    search_results: usize,
}

impl LlmEngineFactory {
    pub fn new(
        generator: Arc<dyn Generator>,
        searcher: Arc<dyn Searcher>,
        search_results: usize,
    ) -> Self {
        Self {
            generator,
            searcher,
            search_results,
        }
    }
}

impl StageFactory for LlmEngineFactory {
    fn create(&self, node: &Node) -> Result<Box<dyn Stage>, StageError> {
        match &node.config {
            NodeConfig::LlmEngine(config) => Ok(Box::new(LlmEngineStage::new(
                config.clone(),
                self.generator.clone(),
                self.searcher.clone(),
                self.search_results,
            ))),
            other => Err(StageError::ContractViolation(format!(
                "expected an LLM Engine node, got {}",
                other.kind()
            ))),
        }
    }

    fn kind(&self) -> NodeKind {
        NodeKind::LlmEngine
    }

    fn metadata(&self) -> StageMetadata {
        StageMetadata {
            description: "Generates a streamed answer, optionally grounded by web search"
                .to_string(),
            category: "generation".to_string(),
        }
    }
}
