use async_trait::async_trait;
use stackcore::{
    ExecutionContext, KnowledgeBaseConfig, Node, NodeConfig, NodeKind, Retriever, Stage,
    StageError,
};
use stackruntime::{StageFactory, StageMetadata};
use std::sync::Arc;

/// Pulls passages for the query from the node's collection.
///
/// Retrieval is optional: a failing retriever marks the run degraded and
/// the pipeline carries on without context.
pub struct KnowledgeBaseStage {
    config: KnowledgeBaseConfig,
    retriever: Arc<dyn Retriever>,
}

impl KnowledgeBaseStage {
    pub fn new(config: KnowledgeBaseConfig, retriever: Arc<dyn Retriever>) -> Self {
        Self { config, retriever }
    }
}

#[async_trait]
impl Stage for KnowledgeBaseStage {
    fn kind(&self) -> NodeKind {
        NodeKind::KnowledgeBase
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        if let Some(key) = self.config.api_key.as_ref().filter(|k| !k.is_empty()) {
            ctx.fallback_credential.get_or_insert_with(|| key.clone());
        }

        let Some(collection) = self
            .config
            .collection_name
            .as_deref()
            .filter(|c| !c.is_empty())
        else {
            tracing::debug!("Knowledge base has no collection; skipping retrieval");
            return Ok(());
        };

        let top_k = self.config.top_k.get() as usize;
        match self.retriever.query(collection, ctx.query(), top_k).await {
            Ok(passages) => {
                tracing::debug!(collection = %collection, passages = passages.len(), "Retrieved passages");
                ctx.append_retrieved(&passages.join("\n"));
            }
            Err(e) => {
                tracing::warn!(collection = %collection, error = %e, "Retrieval failed; continuing without context");
                ctx.retrieval_degraded = true;
            }
        }
        Ok(())
    }
}

pub struct KnowledgeBaseFactory {
    retriever: Arc<dyn Retriever>,
}

impl KnowledgeBaseFactory {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }
}

impl StageFactory for KnowledgeBaseFactory {
    fn create(&self, node: &Node) -> Result<Box<dyn Stage>, StageError> {
        match &node.config {
            NodeConfig::KnowledgeBase(config) => Ok(Box::new(KnowledgeBaseStage::new(
                config.clone(),
                self.retriever.clone(),
            ))),
            other => Err(StageError::ContractViolation(format!(
                "expected a Knowledge Base node, got {}",
                other.kind()
            ))),
        }
    }

    fn kind(&self) -> NodeKind {
        NodeKind::KnowledgeBase
    }

    fn metadata(&self) -> StageMetadata {
        StageMetadata {
            description: "Retrieves relevant passages from a document collection".to_string(),
            category: "retrieval".to_string(),
        }
    }
}
