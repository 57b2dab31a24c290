use crate::{CollaboratorError, CompletionMetadata, NodeId, NodeKind, OutputFormat, StageError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Lazily produced text fragments from the generation collaborator.
pub type FragmentStream = BoxStream<'static, Result<String, CollaboratorError>>;

/// Core trait every pipeline stage implements
#[async_trait]
pub trait Stage: Send + Sync {
    /// Node kind this stage was built for
    fn kind(&self) -> NodeKind;

    /// Advance the run. Soft collaborator failures are absorbed into the
    /// context; only non-recoverable failures are returned.
    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), StageError>;
}

/// One resolved step of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub node_id: NodeId,
    pub kind: NodeKind,
}

impl StageDescriptor {
    pub fn new(node_id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            node_id: node_id.into(),
            kind,
        }
    }
}

/// Per-request state threaded through the stages of one run.
///
/// Owned by a single executor invocation and dropped when the run ends.
pub struct ExecutionContext {
    query: String,
    stages: Vec<StageDescriptor>,
    retrieved_context: Option<String>,
    web_findings: Option<String>,
    fragments: Option<FragmentStream>,

    pub retrieval_degraded: bool,
    pub search_degraded: bool,
    pub model: Option<String>,
    pub format: OutputFormat,
    /// Credential offered by an earlier stage to later collaborator calls.
    pub fallback_credential: Option<String>,
}

impl ExecutionContext {
    pub fn new(query: impl Into<String>, stages: Vec<StageDescriptor>) -> Self {
        Self {
            query: query.into(),
            stages,
            retrieved_context: None,
            web_findings: None,
            fragments: None,
            retrieval_degraded: false,
            search_degraded: false,
            model: None,
            format: OutputFormat::default(),
            fallback_credential: None,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn retrieved_context(&self) -> Option<&str> {
        self.retrieved_context.as_deref()
    }

    pub fn web_findings(&self) -> Option<&str> {
        self.web_findings.as_deref()
    }

    pub fn append_retrieved(&mut self, text: &str) {
        append_line(&mut self.retrieved_context, text);
    }

    pub fn append_web_findings(&mut self, text: &str) {
        append_line(&mut self.web_findings, text);
    }

    /// Knowledge-base text first, then web findings, separated by a blank line.
    pub fn combined_context(&self) -> Option<String> {
        match (self.retrieved_context(), self.web_findings()) {
            (Some(kb), Some(web)) => Some(format!("{kb}\n\n{web}")),
            (Some(kb), None) => Some(kb.to_string()),
            (None, Some(web)) => Some(web.to_string()),
            (None, None) => None,
        }
    }

    pub fn set_fragments(&mut self, fragments: FragmentStream) {
        self.fragments = Some(fragments);
    }

    pub fn take_fragments(&mut self) -> Option<FragmentStream> {
        self.fragments.take()
    }

    pub fn has_fragments(&self) -> bool {
        self.fragments.is_some()
    }

    pub fn metadata(&self) -> CompletionMetadata {
        CompletionMetadata {
            model: self.model.clone().unwrap_or_default(),
            has_context: self.retrieved_context.is_some(),
            has_web_search: self.web_findings.is_some(),
            retrieval_degraded: self.retrieval_degraded,
            search_degraded: self.search_degraded,
            format: self.format,
        }
    }
}

fn append_line(slot: &mut Option<String>, text: &str) {
    if text.is_empty() {
        return;
    }
    match slot {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(text);
        }
        None => *slot = Some(text.to_string()),
    }
}
