use stackcore::{Node, NodeKind, Stage, StageError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Factory trait for creating stage instances
pub trait StageFactory: Send + Sync {
    /// Create a stage for the given node, reading its configuration
    fn create(&self, node: &Node) -> Result<Box<dyn Stage>, StageError>;

    /// Node kind this factory handles
    fn kind(&self) -> NodeKind;

    /// Optional: description shown in stage listings
    fn metadata(&self) -> StageMetadata {
        StageMetadata::default()
    }
}

/// Metadata about a stage kind
#[derive(Debug, Clone)]
pub struct StageMetadata {
    pub description: String,
    pub category: String,
}

impl Default for StageMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of available stage factories, one per node kind
pub struct StageRegistry {
    factories: BTreeMap<NodeKind, Arc<dyn StageFactory>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register a stage factory, replacing any previous one for the same kind
    pub fn register(&mut self, factory: Arc<dyn StageFactory>) {
        let kind = factory.kind();
        tracing::info!(kind = %kind, "Registering stage factory");
        self.factories.insert(kind, factory);
    }

    /// Create a stage instance for a node
    pub fn create_stage(&self, node: &Node) -> Result<Box<dyn Stage>, StageError> {
        let factory = self.factories.get(&node.kind()).ok_or_else(|| {
            StageError::ContractViolation(format!("no stage registered for {}", node.kind()))
        })?;

        factory.create(node)
    }

    /// Get all registered kinds
    pub fn kinds(&self) -> Vec<NodeKind> {
        self.factories.keys().copied().collect()
    }

    /// Get metadata for a kind
    pub fn metadata(&self, kind: NodeKind) -> Option<StageMetadata> {
        self.factories.get(&kind).map(|f| f.metadata())
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
