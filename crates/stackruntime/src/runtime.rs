use crate::executor::{ExecutionStream, WorkflowExecutor};
use crate::registry::StageRegistry;
use crate::store::{MemoryStore, Role, WorkflowStore};
use futures::stream::{BoxStream, StreamExt};
use stackcore::{GraphSpec, RunEvent, ValidationReport};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Main entry point: a stage registry, an executor and a store.
pub struct StackRuntime {
    executor: Arc<WorkflowExecutor>,
    store: Arc<dyn WorkflowStore>,
    config: RuntimeConfig,
}

impl StackRuntime {
    /// Runtime with an in-memory store
    pub fn new(registry: StageRegistry, config: RuntimeConfig) -> Self {
        Self::with_store(registry, Arc::new(MemoryStore::new()), config)
    }

    pub fn with_store(
        registry: StageRegistry,
        store: Arc<dyn WorkflowStore>,
        config: RuntimeConfig,
    ) -> Self {
        let executor =
            Arc::new(WorkflowExecutor::new(Arc::new(registry)).with_timeout(config.run_timeout));

        Self {
            executor,
            store,
            config,
        }
    }

    pub fn executor(&self) -> &Arc<WorkflowExecutor> {
        &self.executor
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn validate(&self, spec: GraphSpec) -> ValidationReport {
        self.executor.validate(spec)
    }

    pub fn execute(&self, spec: GraphSpec, query: impl Into<String>) -> ExecutionStream {
        self.executor.execute(spec, query)
    }

    /// Execute and, when the run completes with a non-empty answer, record
    /// the exchange in the stack's history before the terminal event is
    /// delivered. Dropping the returned stream cancels the run.
    pub fn chat(
        &self,
        stack_id: Option<Uuid>,
        spec: GraphSpec,
        query: impl Into<String>,
    ) -> BoxStream<'static, RunEvent> {
        let query = query.into();
        let mut run = self.executor.execute(spec, query.clone());
        let store = self.store.clone();

        let stream = async_stream::stream! {
            let mut answer = String::new();
            while let Some(event) = run.next().await {
                match &event {
                    RunEvent::Fragment { text } => answer.push_str(text),
                    RunEvent::Completed { .. } => {
                        if let Some(stack_id) = stack_id {
                            record_exchange(store.as_ref(), stack_id, &query, &answer).await;
                        }
                    }
                    RunEvent::Error { .. } => {}
                }
                yield event;
            }
        };
        stream.boxed()
    }
}

async fn record_exchange(store: &dyn WorkflowStore, stack_id: Uuid, query: &str, answer: &str) {
    if answer.is_empty() {
        return;
    }

    let recorded = async {
        store
            .append_message(stack_id, Role::User, query.to_string())
            .await?;
        store
            .append_message(stack_id, Role::Assistant, answer.to_string())
            .await
    }
    .await;

    if let Err(e) = recorded {
        tracing::warn!(stack_id = %stack_id, error = %e, "Failed to record chat history");
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Runs exceeding this are cancelled.
    pub run_timeout: Option<Duration>,
    /// How many web results the search stage asks for.
    pub search_results: usize,
    /// Default page size for history queries.
    pub history_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            run_timeout: None,
            search_results: 5,
            history_limit: 50,
        }
    }
}
