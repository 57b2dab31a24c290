//! Stack execution runtime
//!
//! This crate resolves a submitted graph into an ordered stage list, runs the
//! stages against a shared context and streams the answer back. It also owns
//! the stage registry and the stack store.

mod executor;
mod registry;
mod resolver;
mod runtime;
mod store;

pub use executor::{ExecutionStream, RunId, RunOutcome, RunState, WorkflowExecutor};
pub use registry::{StageFactory, StageMetadata, StageRegistry};
pub use resolver::{resolve, ExecutionPlan};
pub use runtime::{RuntimeConfig, StackRuntime};
pub use store::{
    ChatMessage, MemoryStore, Role, StackDraft, StackRecord, StackUpdate, WorkflowStore,
    UNTITLED_STACK,
};
