use crate::NodeKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Structural problems found while building a [`Graph`](crate::Graph) snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Edge {source_id} -> {target_id} references unknown node '{missing}'")]
    DanglingEdge {
        source_id: String,
        target_id: String,
        missing: String,
    },

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),
}

/// Reasons a graph does not describe a legal linear pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Malformed graph: {0}")]
    Malformed(#[from] GraphError),

    #[error("Workflow is missing a required component: {kind}")]
    MissingComponent { kind: NodeKind },

    #[error("Workflow contains more than one {kind} component")]
    DuplicateComponent { kind: NodeKind },

    #[error("Missing connection: {0}")]
    MissingEdge(&'static str),

    #[error("Ambiguous topology: {0}")]
    AmbiguousTopology(String),
}

/// Failure reported by an external collaborator (retrieval, search, generation).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected response: {0}")]
    Response(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Missing credential for {0}")]
    MissingCredential(&'static str),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
}

/// Non-recoverable stage failures. Soft collaborator failures never become one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("Generation failed: {0}")]
    Generation(#[from] CollaboratorError),

    #[error("Stage contract violated: {0}")]
    ContractViolation(String),
}

/// Failures of the workflow/history storage collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Stack not found: {0}")]
    NotFound(String),

    #[error("Invalid stack id: {0}")]
    InvalidId(String),
}
