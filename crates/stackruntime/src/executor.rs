use crate::registry::StageRegistry;
use crate::resolver::{self, ExecutionPlan};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;
use stackcore::{
    CompletionMetadata, ErrorKind, ExecutionContext, Graph, GraphSpec, RunEvent, StageError,
    ValidationError, ValidationReport,
};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

pub type RunId = Uuid;

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Validating,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }
}

/// Drives one request through a resolved stage list.
pub struct WorkflowExecutor {
    registry: Arc<StageRegistry>,
    run_timeout: Option<Duration>,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<StageRegistry>) -> Self {
        Self {
            registry,
            run_timeout: None,
        }
    }

    /// Abandon runs that take longer than `timeout`; treated as a cancellation.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<StageRegistry> {
        &self.registry
    }

    /// Resolve a submitted graph without running anything.
    pub fn plan(&self, spec: GraphSpec) -> Result<ExecutionPlan, ValidationError> {
        let graph = Graph::try_from(spec)?;
        resolver::resolve(&graph)
    }

    /// Stateless validate-only entry point.
    pub fn validate(&self, spec: GraphSpec) -> ValidationReport {
        ValidationReport::from(&self.plan(spec))
    }

    /// Execute a submitted graph. Malformed graphs fail inside the stream.
    pub fn execute(&self, spec: GraphSpec, query: impl Into<String>) -> ExecutionStream {
        let graph = Graph::try_from(spec).map_err(ValidationError::from);
        self.start(graph, query.into())
    }

    /// Execute an already-built snapshot.
    pub fn execute_graph(&self, graph: Graph, query: impl Into<String>) -> ExecutionStream {
        self.start(Ok(graph), query.into())
    }

    fn start(&self, graph: Result<Graph, ValidationError>, query: String) -> ExecutionStream {
        let run_id = RunId::new_v4();
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(RunState::Pending);

        let run = Run {
            run_id,
            registry: self.registry.clone(),
            cancel: cancel.clone(),
            run_timeout: self.run_timeout,
            state: state_tx,
        };

        ExecutionStream {
            run_id,
            inner: Box::pin(run.into_stream(graph, query)),
            cancel,
            state: state_rx,
        }
    }
}

enum Interrupt {
    Cancelled,
    TimedOut,
}

struct Run {
    run_id: RunId,
    registry: Arc<StageRegistry>,
    cancel: CancellationToken,
    run_timeout: Option<Duration>,
    state: watch::Sender<RunState>,
}

impl Run {
    fn into_stream(
        self,
        graph: Result<Graph, ValidationError>,
        query: String,
    ) -> impl Stream<Item = RunEvent> + Send + 'static {
        async_stream::stream! {
            let run_id = self.run_id;
            let span = tracing::info_span!("run", run_id = %run_id);
            let started = Instant::now();
            let deadline = self.run_timeout.map(|t| tokio::time::Instant::now() + t);

            if let Some(interrupt) = self.already_interrupted(deadline) {
                self.abandon(interrupt);
                return;
            }

            self.transition(RunState::Validating);
            let plan = match graph.and_then(|g| resolver::resolve(&g)) {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::warn!(run_id = %run_id, error = %e, "Workflow validation failed");
                    self.transition(RunState::Failed);
                    yield RunEvent::error(ErrorKind::from(&e), e.to_string());
                    return;
                }
            };

            tracing::info!(run_id = %run_id, stages = plan.stages().len(), "Starting run");
            self.transition(RunState::Running);

            let mut ctx = ExecutionContext::new(query, plan.stages().to_vec());
            for descriptor in plan.stages() {
                let stage = match plan
                    .node(descriptor)
                    .ok_or_else(|| {
                        StageError::ContractViolation(format!("node '{}' vanished from snapshot", descriptor.node_id))
                    })
                    .and_then(|node| self.registry.create_stage(node))
                {
                    Ok(stage) => stage,
                    Err(e) => {
                        yield self.fail(&e);
                        return;
                    }
                };

                tracing::debug!(run_id = %run_id, stage = %descriptor.kind, node_id = %descriptor.node_id, "Stage started");
                let stage_started = Instant::now();

                let result = tokio::select! {
                    biased;
                    interrupt = self.interrupted(deadline) => Err(interrupt),
                    result = stage.run(&mut ctx).instrument(span.clone()) => Ok(result),
                };
                match result {
                    Err(interrupt) => {
                        self.abandon(interrupt);
                        return;
                    }
                    Ok(Err(e)) => {
                        yield self.fail(&e);
                        return;
                    }
                    Ok(Ok(())) => {}
                }

                tracing::debug!(
                    run_id = %run_id,
                    stage = %descriptor.kind,
                    duration_ms = stage_started.elapsed().as_millis() as u64,
                    "Stage completed"
                );
            }

            let Some(mut fragments) = ctx.take_fragments() else {
                yield self.fail(&StageError::ContractViolation(
                    "pipeline finished without a response stream".to_string(),
                ));
                return;
            };

            let mut emitted = 0usize;
            loop {
                let next = tokio::select! {
                    biased;
                    interrupt = self.interrupted(deadline) => Err(interrupt),
                    item = fragments.next().instrument(span.clone()) => Ok(item),
                };
                match next {
                    Err(interrupt) => {
                        self.abandon(interrupt);
                        return;
                    }
                    Ok(Some(Ok(text))) => {
                        emitted += 1;
                        yield RunEvent::Fragment { text };
                    }
                    Ok(Some(Err(e))) => {
                        yield self.fail(&StageError::Generation(e));
                        return;
                    }
                    Ok(None) => break,
                }
            }

            let metadata = ctx.metadata();
            tracing::info!(
                run_id = %run_id,
                fragments = emitted,
                retrieval_degraded = metadata.retrieval_degraded,
                search_degraded = metadata.search_degraded,
                duration_ms = started.elapsed().as_millis() as u64,
                "Run completed"
            );
            self.transition(RunState::Completed);
            yield RunEvent::Completed { metadata };
        }
    }

    fn transition(&self, state: RunState) {
        self.state.send_replace(state);
    }

    fn fail(&self, err: &StageError) -> RunEvent {
        tracing::error!(run_id = %self.run_id, error = %err, "Run failed");
        self.transition(RunState::Failed);
        RunEvent::error(ErrorKind::from(err), err.to_string())
    }

    fn abandon(&self, interrupt: Interrupt) {
        match interrupt {
            Interrupt::Cancelled => tracing::info!(run_id = %self.run_id, "Run cancelled"),
            Interrupt::TimedOut => tracing::warn!(run_id = %self.run_id, "Run timed out"),
        }
        self.transition(RunState::Cancelled);
    }

    fn already_interrupted(&self, deadline: Option<tokio::time::Instant>) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            Some(Interrupt::Cancelled)
        } else if deadline.is_some_and(|at| at <= tokio::time::Instant::now()) {
            Some(Interrupt::TimedOut)
        } else {
            None
        }
    }

    async fn interrupted(&self, deadline: Option<tokio::time::Instant>) -> Interrupt {
        let deadline = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Interrupt::Cancelled,
            _ = deadline => Interrupt::TimedOut,
        }
    }
}

/// Caller's handle on a run: an ordered stream of [`RunEvent`]s.
///
/// Nothing executes until the stream is first polled, and the run timeout
/// starts counting from that first poll. Dropping the stream, or
/// calling [`cancel`](Self::cancel), stops the run at the next stage or
/// fragment boundary without a terminal event.
pub struct ExecutionStream {
    run_id: RunId,
    inner: BoxStream<'static, RunEvent>,
    cancel: CancellationToken,
    state: watch::Receiver<RunState>,
}

impl ExecutionStream {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run; useful for wiring caller-side timeouts.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Buffer the whole run into a single answer.
    pub async fn collect_text(mut self) -> RunOutcome {
        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                RunEvent::Fragment { text: piece } => text.push_str(&piece),
                RunEvent::Completed { metadata } => return RunOutcome::Completed { text, metadata },
                RunEvent::Error { kind, message } => {
                    return RunOutcome::Failed {
                        kind,
                        message,
                        partial: text,
                    }
                }
            }
        }
        RunOutcome::Cancelled { partial: text }
    }
}

impl Stream for ExecutionStream {
    type Item = RunEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for ExecutionStream {
    fn drop(&mut self) {
        if !self.state().is_terminal() {
            tracing::debug!(run_id = %self.run_id, "Run stream dropped before finishing");
            self.cancel.cancel();
        }
    }
}

/// Buffered result of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        text: String,
        metadata: CompletionMetadata,
    },
    Failed {
        kind: ErrorKind,
        message: String,
        partial: String,
    },
    Cancelled {
        partial: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StageFactory;
    use async_trait::async_trait;
    use stackcore::{LlmEngineConfig, Node, NodeKind, Stage};

    /// Emits a fixed set of fragments from the LLM stage; other kinds pass through.
    struct ScriptedStage {
        kind: NodeKind,
        fragments: Vec<&'static str>,
    }

    #[async_trait]
    impl Stage for ScriptedStage {
        fn kind(&self) -> NodeKind {
            self.kind
        }

        async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
            if self.kind == NodeKind::LlmEngine {
                let items: Vec<_> = self.fragments.iter().map(|f| Ok(f.to_string())).collect();
                ctx.set_fragments(futures::stream::iter(items).boxed());
            }
            Ok(())
        }
    }

    struct ScriptedFactory(NodeKind);

    impl StageFactory for ScriptedFactory {
        fn create(&self, _node: &Node) -> Result<Box<dyn Stage>, StageError> {
            Ok(Box::new(ScriptedStage {
                kind: self.0,
                fragments: vec!["Hello", ", ", "world"],
            }))
        }

        fn kind(&self) -> NodeKind {
            self.0
        }
    }

    fn executor(kinds: &[NodeKind]) -> WorkflowExecutor {
        let mut registry = StageRegistry::new();
        for kind in kinds {
            registry.register(Arc::new(ScriptedFactory(*kind)));
        }
        WorkflowExecutor::new(Arc::new(registry))
    }

    fn linear() -> GraphSpec {
        let mut spec = GraphSpec::new();
        spec.add_node(Node::user_query("q"));
        spec.add_node(Node::llm_engine("llm", LlmEngineConfig::default()));
        spec.add_node(Node::output("out"));
        spec.connect("q", "llm");
        spec.connect("llm", "out");
        spec
    }

    #[tokio::test]
    async fn test_run_streams_fragments_then_completes() {
        let executor = executor(&[NodeKind::UserQuery, NodeKind::LlmEngine, NodeKind::Output]);
        let mut stream = executor.execute(linear(), "hi");
        assert_eq!(stream.state(), RunState::Pending);

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], RunEvent::fragment("Hello"));
        assert!(matches!(events[3], RunEvent::Completed { .. }));
        assert_eq!(stream.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn test_validation_failure_emits_single_error() {
        let executor = executor(&[NodeKind::UserQuery, NodeKind::LlmEngine, NodeKind::Output]);
        let mut spec = linear();
        spec.edges.retain(|e| e.target != "llm");

        let mut stream = executor.execute(spec, "hi");
        let first = stream.next().await;
        assert_eq!(
            first,
            Some(RunEvent::error(
                ErrorKind::MissingEdge,
                ValidationError::MissingEdge("input to LLMEngine").to_string()
            ))
        );
        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn test_malformed_graph_fails_before_running() {
        let executor = executor(&[NodeKind::UserQuery, NodeKind::LlmEngine, NodeKind::Output]);
        let mut spec = linear();
        spec.connect("out", "nowhere");

        let outcome = executor.execute(spec, "hi").collect_text().await;
        assert!(matches!(
            outcome,
            RunOutcome::Failed { kind: ErrorKind::MalformedGraph, ref partial, .. } if partial.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_missing_factory_is_stage_failure() {
        let executor = executor(&[NodeKind::UserQuery, NodeKind::LlmEngine]);
        let outcome = executor.execute(linear(), "hi").collect_text().await;
        assert!(matches!(
            outcome,
            RunOutcome::Failed { kind: ErrorKind::StageFailure, .. }
        ));
    }

    #[tokio::test]
    async fn test_collect_text_joins_fragments() {
        let executor = executor(&[NodeKind::UserQuery, NodeKind::LlmEngine, NodeKind::Output]);
        match executor.execute(linear(), "hi").collect_text().await {
            RunOutcome::Completed { text, .. } => assert_eq!(text, "Hello, world"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_before_start_yields_nothing() {
        let executor = executor(&[NodeKind::UserQuery, NodeKind::LlmEngine, NodeKind::Output]);
        let mut stream = executor.execute(linear(), "hi");
        stream.cancel();

        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), RunState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_validation() {
        let executor = executor(&[NodeKind::UserQuery, NodeKind::LlmEngine, NodeKind::Output]);
        let mut spec = GraphSpec::new();
        spec.add_node(Node::user_query("q"));

        let mut stream = executor.execute(spec, "hi");
        stream.cancel();

        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), RunState::Cancelled);
    }

    #[tokio::test]
    async fn test_timeout_counts_from_first_poll() {
        let executor = executor(&[NodeKind::UserQuery, NodeKind::LlmEngine, NodeKind::Output])
            .with_timeout(Some(Duration::from_millis(50)));
        let stream = executor.execute(linear(), "hi");

        tokio::time::sleep(Duration::from_millis(100)).await;

        match stream.collect_text().await {
            RunOutcome::Completed { text, .. } => assert_eq!(text, "Hello, world"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_validate_report() {
        let executor = executor(&[]);
        assert!(executor.validate(linear()).valid);

        let mut spec = linear();
        spec.nodes.retain(|n| n.kind() != NodeKind::Output);
        spec.edges.retain(|e| e.target != "out");
        let report = executor.validate(spec);
        assert!(!report.valid);
        assert_eq!(report.message, "Workflow validation failed");
    }
}
