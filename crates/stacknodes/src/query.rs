use async_trait::async_trait;
use stackcore::{ExecutionContext, Node, NodeConfig, NodeKind, Stage, StageError};
use stackruntime::{StageFactory, StageMetadata};

/// Entry point of every pipeline. The query is already in the context.
pub struct UserQueryStage;

#[async_trait]
impl Stage for UserQueryStage {
    fn kind(&self) -> NodeKind {
        NodeKind::UserQuery
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        tracing::debug!(query_len = ctx.query().len(), "Query received");
        Ok(())
    }
}

pub struct UserQueryFactory;

impl StageFactory for UserQueryFactory {
    fn create(&self, node: &Node) -> Result<Box<dyn Stage>, StageError> {
        match &node.config {
            NodeConfig::UserQuery(_) => Ok(Box::new(UserQueryStage)),
            other => Err(StageError::ContractViolation(format!(
                "expected a User Query node, got {}",
                other.kind()
            ))),
        }
    }

    fn kind(&self) -> NodeKind {
        NodeKind::UserQuery
    }

    fn metadata(&self) -> StageMetadata {
        StageMetadata {
            description: "Accepts the user's question".to_string(),
            category: "input".to_string(),
        }
    }
}
