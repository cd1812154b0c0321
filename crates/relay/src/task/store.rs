use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Task, TaskEvent, TaskState, TaskStatus};
use crate::errors::TaskError;
use crate::protocol::WireMessage;

/// Finished tasks kept for `tasks/get` before the oldest are dropped
pub const DEFAULT_RETAINED_TASKS: usize = 1000;

struct Inner {
    tasks: HashMap<String, Task>,
    // context id -> most recent task in that context
    latest: HashMap<String, String>,
    // terminal task ids, oldest first
    finished: VecDeque<String>,
    retain: usize,
}

impl Inner {
    fn evict(&mut self) {
        while self.finished.len() > self.retain {
            let Some(task_id) = self.finished.pop_front() else {
                break;
            };
            if let Some(task) = self.tasks.remove(&task_id) {
                if self.latest.get(&task.context_id) == Some(&task_id) {
                    self.latest.remove(&task.context_id);
                }
                tracing::debug!(task_id = %task_id, "evicted finished task");
            }
        }
    }
}

/// In-memory record of the tasks this process has seen
///
/// Running and waiting tasks are always kept. Only the most recent
/// `retain` completed or failed tasks stay queryable. Cheap to clone.
/// The lock is never held across an await.
#[derive(Clone)]
pub struct TaskStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_TASKS)
    }
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retain: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                tasks: HashMap::new(),
                latest: HashMap::new(),
                finished: VecDeque::new(),
                retain,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start or resume the task an inbound message belongs to.
    ///
    /// A message naming a task resumes it if it is waiting for input. A
    /// message naming only a context resumes that context's task if it is
    /// waiting for input, and otherwise starts a new task in the context.
    /// The message is appended to the task's history.
    pub fn begin(&self, message: &WireMessage) -> Result<Task, TaskError> {
        let mut inner = self.lock();

        let resumable = match (&message.task_id, &message.context_id) {
            (Some(task_id), _) => {
                let task = inner
                    .tasks
                    .get(task_id)
                    .ok_or_else(|| TaskError::UnknownTask(task_id.clone()))?;
                match task.status.state {
                    TaskState::InputRequired => Some(task_id.clone()),
                    TaskState::Working => return Err(TaskError::Busy(task_id.clone())),
                    _ => return Err(TaskError::Terminal(task_id.clone())),
                }
            }
            (None, Some(context_id)) => inner
                .latest
                .get(context_id)
                .filter(|id| {
                    inner
                        .tasks
                        .get(*id)
                        .map_or(false, |task| task.status.state == TaskState::InputRequired)
                })
                .cloned(),
            (None, None) => None,
        };

        let task_id = match resumable {
            Some(task_id) => {
                tracing::info!(task_id = %task_id, "resuming task");
                task_id
            }
            None => {
                let context_id = message
                    .context_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let task = Task::new(uuid::Uuid::new_v4().to_string(), context_id.clone());
                tracing::info!(task_id = %task.id, context_id = %context_id, "created task");
                let task_id = task.id.clone();
                inner.latest.insert(context_id, task_id.clone());
                inner.tasks.insert(task_id.clone(), task);
                task_id
            }
        };

        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| TaskError::UnknownTask(task_id.clone()))?;
        let mut inbound = message.clone();
        inbound.task_id = Some(task.id.clone());
        inbound.context_id = Some(task.context_id.clone());
        task.history.push(inbound);
        task.status = TaskStatus::new(TaskState::Working, None);
        Ok(task.clone())
    }

    /// Apply one emitted event to the stored task
    pub fn record(&self, event: &TaskEvent) {
        let mut inner = self.lock();
        let Some(task) = inner.tasks.get_mut(&event.task_id) else {
            tracing::warn!(task_id = %event.task_id, "event for unknown task");
            return;
        };
        if task.status.state.is_terminal() {
            tracing::warn!(task_id = %event.task_id, "event after terminal state ignored");
            return;
        }

        if let Some(message) = &event.message {
            if event.state == TaskState::InputRequired {
                task.history.push(message.clone());
            }
        }
        if let Some(artifact) = &event.artifact {
            task.artifacts.push(artifact.clone());
        }
        task.status = TaskStatus::new(event.state, event.message.clone());

        if event.state.is_terminal() {
            inner.finished.push_back(event.task_id.clone());
            inner.evict();
        }
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.lock().tasks.get(task_id).cloned()
    }

    /// Tasks cannot be cancelled; unknown ids are still reported as such
    pub fn cancel(&self, task_id: &str) -> Result<(), TaskError> {
        if self.lock().tasks.contains_key(task_id) {
            Err(TaskError::CancelUnsupported)
        } else {
            Err(TaskError::UnknownTask(task_id.to_string()))
        }
    }
}
