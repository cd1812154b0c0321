use relay::peer::interpret_reply;
use relay::protocol::Part;
use relay::task::{Task, TaskState};
use serde_json::Value;

/// What the agent answered to one message
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Absent when the agent answered with a plain message instead of a task
    pub state: Option<TaskState>,
    pub task_id: Option<String>,
    pub context_id: Option<String>,
    pub text: String,
}

fn first_text(parts: &[Part]) -> Option<String> {
    parts.iter().find_map(|part| part.as_text().map(str::to_string))
}

impl Reply {
    /// Read a `message/send` response body
    pub fn from_body(agent_name: &str, body: &Value) -> Self {
        let task = body
            .get("result")
            .filter(|result| result.get("kind").and_then(Value::as_str) == Some("task"))
            .and_then(|result| serde_json::from_value::<Task>(result.clone()).ok());

        let Some(task) = task else {
            return Self {
                state: None,
                task_id: None,
                context_id: body
                    .pointer("/result/contextId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                text: interpret_reply(agent_name, body),
            };
        };

        let from_artifacts = task
            .artifacts
            .iter()
            .find_map(|artifact| first_text(&artifact.parts));
        let from_status = task
            .status
            .message
            .as_ref()
            .and_then(|message| first_text(&message.parts));

        Self {
            state: Some(task.status.state),
            task_id: Some(task.id),
            context_id: Some(task.context_id),
            text: from_artifacts.or(from_status).unwrap_or_default(),
        }
    }

    pub fn needs_input(&self) -> bool {
        self.state == Some(TaskState::InputRequired)
    }
}
