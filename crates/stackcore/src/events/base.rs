use crate::{OutputFormat, StageError, ValidationError};
use serde::{Deserialize, Serialize};

/// Events delivered to the caller of a run, in order.
///
/// A stream carries any number of `Fragment`s followed by exactly one
/// terminal `Completed` or `Error`, unless the caller cancelled it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Fragment { text: String },
    Completed { metadata: CompletionMetadata },
    Error { kind: ErrorKind, message: String },
}

impl RunEvent {
    pub fn fragment(text: impl Into<String>) -> Self {
        RunEvent::Fragment { text: text.into() }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        RunEvent::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunEvent::Fragment { .. })
    }

    pub fn as_fragment(&self) -> Option<&str> {
        match self {
            RunEvent::Fragment { text } => Some(text),
            _ => None,
        }
    }
}

/// Advisory data attached to a clean completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMetadata {
    pub model: String,
    pub has_context: bool,
    pub has_web_search: bool,
    pub retrieval_degraded: bool,
    pub search_degraded: bool,
    pub format: OutputFormat,
}

/// Machine-readable class of a terminal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedGraph,
    MissingComponent,
    DuplicateComponent,
    MissingEdge,
    AmbiguousTopology,
    GenerationFailure,
    StageFailure,
}

impl From<&ValidationError> for ErrorKind {
    fn from(err: &ValidationError) -> Self {
        match err {
            ValidationError::Malformed(_) => ErrorKind::MalformedGraph,
            ValidationError::MissingComponent { .. } => ErrorKind::MissingComponent,
            ValidationError::DuplicateComponent { .. } => ErrorKind::DuplicateComponent,
            ValidationError::MissingEdge(_) => ErrorKind::MissingEdge,
            ValidationError::AmbiguousTopology(_) => ErrorKind::AmbiguousTopology,
        }
    }
}

impl From<&StageError> for ErrorKind {
    fn from(err: &StageError) -> Self {
        match err {
            StageError::Generation(_) => ErrorKind::GenerationFailure,
            StageError::ContractViolation(_) => ErrorKind::StageFailure,
        }
    }
}

/// Verdict of the validate-only entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub message: String,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn valid() -> Self {
        Self {
            valid: true,
            message: "Workflow is valid and ready for execution".to_string(),
            errors: Vec::new(),
        }
    }

    pub fn invalid(err: &ValidationError) -> Self {
        Self {
            valid: false,
            message: "Workflow validation failed".to_string(),
            errors: vec![err.to_string()],
        }
    }
}

impl<T> From<&Result<T, ValidationError>> for ValidationReport {
    fn from(result: &Result<T, ValidationError>) -> Self {
        match result {
            Ok(_) => ValidationReport::valid(),
            Err(e) => ValidationReport::invalid(e),
        }
    }
}
