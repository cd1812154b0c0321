//! Task lifecycle: the states a request moves through and the events that report them.

use serde::{Deserialize, Serialize};

use crate::protocol::{Artifact, WireMessage};

mod emitter;
mod store;

pub use emitter::{EventReceiver, TaskEmitter};
pub use store::TaskStore;

/// `working` may move to any other state. `input-required` resumes to
/// `working` when a new message arrives. `completed` and `failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Working,
    InputRequired,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<WireMessage>,
    pub timestamp: String,
}

impl TaskStatus {
    pub fn new(state: TaskState, message: Option<WireMessage>) -> Self {
        Self {
            state,
            message,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn task_kind() -> String {
    "task".to_string()
}

/// Snapshot of a task as returned by `tasks/get` and `message/send`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub history: Vec<WireMessage>,
    #[serde(default = "task_kind")]
    pub kind: String,
}

impl Task {
    pub fn new<I: Into<String>, C: Into<String>>(id: I, context_id: C) -> Self {
        Self {
            id: id.into(),
            context_id: context_id.into(),
            status: TaskStatus::new(TaskState::Working, None),
            artifacts: Vec::new(),
            history: Vec::new(),
            kind: task_kind(),
        }
    }
}

/// One entry in a task's ordered event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: String,
    pub context_id: String,
    pub state: TaskState,
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<WireMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
}

impl TaskEvent {
    /// Text of the status message or, failing that, of the artifact
    pub fn text(&self) -> Option<String> {
        self.message
            .as_ref()
            .map(WireMessage::text)
            .or_else(|| {
                self.artifact.as_ref().map(|artifact| {
                    artifact
                        .parts
                        .iter()
                        .filter_map(|part| part.as_text())
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            })
    }
}
