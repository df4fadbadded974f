use thiserror::Error;

use crate::actions::ActionOutput;

/// Errors surfaced by the engine and its authoring entry points.
///
/// Parse/validation failures are rejected before any row is written. Mid-run
/// failures mark the execution failed and stop processing; nothing is retried
/// automatically.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid scenario document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("scenario failed validation: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("execution {0} not found")]
    ExecutionNotFound(String),

    #[error("scenario {0} not found")]
    ScenarioNotFound(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A failed action call. Some actions (notably `http_request`) capture an
/// output worth logging even when the step fails; it rides along here so the
/// step log can record it.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    pub output: Option<ActionOutput>,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            output: None,
        }
    }

    pub fn with_output(message: impl Into<String>, output: ActionOutput) -> Self {
        Self {
            message: message.into(),
            output: Some(output),
        }
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}
