//! Core abstractions for the stack engine
//!
//! This crate provides the graph model, node configuration, errors, the
//! stage and collaborator traits, and the events a run emits. It has no
//! runtime dependencies.

pub mod collaborator;
mod error;
pub mod events;
mod graph;
mod node;
mod stage;
pub mod template;

pub use collaborator::{GenerationRequest, Generator, Retriever, Searcher};
pub use error::{CollaboratorError, GraphError, StackError, StageError, StoreError, ValidationError};
pub use events::*;
pub use graph::{Edge, Graph, GraphSpec};
pub use node::{
    EmbeddingProvider, KnowledgeBaseConfig, LlmEngineConfig, Node, NodeConfig, NodeId, NodeKind,
    OutputConfig, OutputFormat, Position, UserQueryConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_TOKENS,
    DEFAULT_MODEL, DEFAULT_TEMPERATURE, DEFAULT_TOP_K,
};
pub use stage::{ExecutionContext, FragmentStream, Stage, StageDescriptor};

/// Result type for stack operations
pub type Result<T> = std::result::Result<T, StackError>;
