use tokio::sync::mpsc;

use super::{TaskEvent, TaskState, TaskStore};
use crate::errors::TaskError;
use crate::protocol::{Artifact, WireMessage};

pub type EventReceiver = mpsc::UnboundedReceiver<TaskEvent>;

/// The single writer of one task's event stream
///
/// Events reach the receiver in emit order. A `completed` or `failed` event
/// is final and closes the stream; so does `input-required`, which ends the
/// current turn without finishing the task. Every emit after that is rejected.
pub struct TaskEmitter {
    task_id: String,
    context_id: String,
    sender: Option<mpsc::UnboundedSender<TaskEvent>>,
    store: Option<TaskStore>,
    closed_in: Option<TaskState>,
}

impl TaskEmitter {
    pub fn new<T: Into<String>, C: Into<String>>(task_id: T, context_id: C) -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let emitter = Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
            sender: Some(sender),
            store: None,
            closed_in: None,
        };
        (emitter, receiver)
    }

    /// Also apply every event to `store`
    pub fn with_store(mut self, store: TaskStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed_in.is_some()
    }

    /// Progress update. Never final.
    pub fn working<S: Into<String>>(&mut self, text: S) -> Result<(), TaskError> {
        let message = self.agent_message(text);
        self.emit(TaskState::Working, Some(message), None)
    }

    /// Ask the caller for more information. The task stays open and resumes
    /// when the next message for this context arrives.
    pub fn input_required<S: Into<String>>(&mut self, question: S) -> Result<(), TaskError> {
        let message = self.agent_message(question);
        self.emit(TaskState::InputRequired, Some(message), None)
    }

    /// Finish with `result` as the task's result artifact
    pub fn complete<S: Into<String>>(&mut self, result: S) -> Result<(), TaskError> {
        self.emit(TaskState::Completed, None, Some(Artifact::result(result)))
    }

    /// Finish unsuccessfully. `reason` is shown to the caller as is.
    pub fn fail<S: Into<String>>(&mut self, reason: S) -> Result<(), TaskError> {
        let message = self.agent_message(reason);
        self.emit(TaskState::Failed, Some(message), None)
    }

    fn agent_message<S: Into<String>>(&self, text: S) -> WireMessage {
        WireMessage::agent(text)
            .with_context(self.context_id.clone())
            .with_task(self.task_id.clone())
    }

    fn emit(
        &mut self,
        state: TaskState,
        message: Option<WireMessage>,
        artifact: Option<Artifact>,
    ) -> Result<(), TaskError> {
        match self.closed_in {
            Some(closed) if closed.is_terminal() => {
                return Err(TaskError::Terminal(self.task_id.clone()))
            }
            Some(_) => return Err(TaskError::AwaitingInput(self.task_id.clone())),
            None => {}
        }

        let event = TaskEvent {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            state,
            is_final: state.is_terminal(),
            message,
            artifact,
        };

        tracing::debug!(
            task_id = %self.task_id,
            context_id = %self.context_id,
            state = ?state,
            "task event"
        );

        if let Some(store) = &self.store {
            store.record(&event);
        }

        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                tracing::debug!(task_id = %self.task_id, "event receiver dropped");
            }
        }

        if state != TaskState::Working {
            self.closed_in = Some(state);
            self.sender = None;
        }
        Ok(())
    }
}
