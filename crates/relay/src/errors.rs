use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised while resolving or executing a tool call.
///
/// These never abort the tool-call loop: they are rendered into the tool
/// message that answers the request so the transcript stays well formed.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Reasons a model-produced routing reply was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    #[error("routing reply is not a JSON object: {0}")]
    NotAnObject(String),

    #[error("routing flag for '{0}' is not a boolean")]
    InvalidFlag(String),

    #[error("routing reply selected no known capability")]
    NoTarget,

    #[error("routing reply selected '{0}' alongside other targets but gave it no split request")]
    MissingSplit(String),

    #[error("a routing catalog needs at least one capability")]
    EmptyCatalog,

    #[error("primary capability '{0}' is not in the catalog")]
    UnknownPrimary(String),
}

/// Failures talking to a peer agent.
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("could not discover agent card at {url}: {reason}")]
    Discovery { url: String, reason: String },

    #[error("peer call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("peer transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("peer returned a malformed envelope: {0}")]
    Envelope(String),
}

/// The completion provider could not produce a message. Not recoverable
/// inside a task: no further turn can run without a completion.
#[derive(Error, Debug)]
#[error("completion provider failed: {0}")]
pub struct ProviderError(pub String);

impl From<anyhow::Error> for ProviderError {
    fn from(err: anyhow::Error) -> Self {
        ProviderError(format!("{:#}", err))
    }
}

/// Misuse of the task lifecycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("task {0} already reached a terminal state")]
    Terminal(String),

    #[error("task cancellation is not supported")]
    CancelUnsupported,

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("task {0} is closed until a new message arrives for its context")]
    AwaitingInput(String),

    #[error("task {0} is already running")]
    Busy(String),
}
