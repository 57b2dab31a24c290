use async_trait::async_trait;
use stackcore::{ExecutionContext, Node, NodeConfig, NodeKind, OutputConfig, Stage, StageError};
use stackruntime::{StageFactory, StageMetadata};

/// Final stage. Fragments pass through untouched; only the format tag is recorded.
pub struct OutputStage {
    config: OutputConfig,
}

#[async_trait]
impl Stage for OutputStage {
    fn kind(&self) -> NodeKind {
        NodeKind::Output
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        if !ctx.has_fragments() {
            return Err(StageError::ContractViolation(
                "output reached without a response stream".to_string(),
            ));
        }
        ctx.format = self.config.output_type;
        Ok(())
    }
}

pub struct OutputFactory;

impl StageFactory for OutputFactory {
    fn create(&self, node: &Node) -> Result<Box<dyn Stage>, StageError> {
        match &node.config {
            NodeConfig::Output(config) => Ok(Box::new(OutputStage {
                config: config.clone(),
            })),
            other => Err(StageError::ContractViolation(format!(
                "expected an Output node, got {}",
                other.kind()
            ))),
        }
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Output
    }

    fn metadata(&self) -> StageMetadata {
        StageMetadata {
            description: "Delivers the answer to the caller".to_string(),
            category: "output".to_string(),
        }
    }
}
