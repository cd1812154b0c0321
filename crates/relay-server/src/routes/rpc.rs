use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use http::header;
use relay::errors::TaskError;
use relay::executor::RequestContext;
use relay::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, MessageSendParams, TaskQueryParams,
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, METHOD_MESSAGE_SEND,
    METHOD_MESSAGE_STREAM, METHOD_NOT_FOUND, METHOD_TASKS_CANCEL, METHOD_TASKS_GET, PARSE_ERROR,
    TASK_NOT_FOUND, UNSUPPORTED_OPERATION,
};
use relay::task::{Task, TaskEmitter, TaskEvent, TaskState};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::convert::Infallible;
use tokio_stream::wrappers::UnboundedReceiverStream;

// Server-sent events, one JSON-RPC response per task event
pub struct SseResponse {
    stream: BoxStream<'static, Result<Bytes, Infallible>>,
}

impl SseResponse {
    fn new(id: Value, events: UnboundedReceiverStream<TaskEvent>) -> Self {
        let stream = events
            .map(move |event| {
                let frame = serde_json::to_value(&event)
                    .map(|result| JsonRpcResponse::success(id.clone(), result))
                    .unwrap_or_else(|e| {
                        JsonRpcResponse::failure(
                            id.clone(),
                            JsonRpcError::new(INTERNAL_ERROR, e.to_string()),
                        )
                    });
                let data = serde_json::to_string(&frame).unwrap_or_default();
                Ok(Bytes::from(format!("data: {}\n\n", data)))
            })
            .boxed();
        Self { stream }
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            Body::from_stream(self.stream),
        )
            .into_response()
    }
}

fn task_error(error: TaskError) -> JsonRpcError {
    let code = match error {
        TaskError::UnknownTask(_) => TASK_NOT_FOUND,
        TaskError::CancelUnsupported => UNSUPPORTED_OPERATION,
        TaskError::Terminal(_) | TaskError::AwaitingInput(_) | TaskError::Busy(_) => {
            INVALID_PARAMS
        }
    };
    JsonRpcError::new(code, error.to_string())
}

fn params<T: DeserializeOwned>(request: &JsonRpcRequest) -> Result<T, JsonRpcError> {
    serde_json::from_value(request.params.clone())
        .map_err(|e| JsonRpcError::new(INVALID_PARAMS, format!("invalid params: {}", e)))
}

/// Register the inbound message with the store and prepare an emitter that records into it
fn start_task(
    state: &AppState,
    request: &JsonRpcRequest,
) -> Result<(Task, TaskEmitter, UnboundedReceiverStream<TaskEvent>), JsonRpcError> {
    let MessageSendParams { message } = params(request)?;
    let task = state.tasks.begin(&message).map_err(task_error)?;
    let (emitter, receiver) = TaskEmitter::new(&task.id, &task.context_id);
    let emitter = emitter.with_store(state.tasks.clone());

    tracing::info!(
        task_id = %task.id,
        context_id = %task.context_id,
        method = %request.method,
        "task started"
    );
    Ok((task, emitter, UnboundedReceiverStream::new(receiver)))
}

async fn run_task(state: AppState, task: Task, mut emitter: TaskEmitter) {
    let context = RequestContext::from_task(&task);
    if let Err(e) = state.executor.execute(context, &mut emitter).await {
        tracing::error!(task_id = %task.id, error = %e, "executor failed");
    }
    // Every turn must end closed, even when the executor forgot to
    if !emitter.is_closed() {
        tracing::warn!(task_id = %task.id, "executor returned without closing the task");
        if let Err(e) = emitter.fail("The agent stopped without producing an answer.") {
            tracing::error!(task_id = %task.id, error = %e, "could not close task");
        }
    }
}

/// Run the task detached from the request, so a dropped connection cannot
/// strand it, and fail it if the executor panics.
async fn supervise(state: AppState, task: Task, emitter: TaskEmitter) {
    let task_id = task.id.clone();
    let context_id = task.context_id.clone();
    let handle = tokio::spawn(run_task(state.clone(), task, emitter));
    let Err(e) = handle.await else {
        return;
    };

    tracing::error!(task_id = %task_id, error = %e, "executor aborted");
    let still_working = state
        .tasks
        .get(&task_id)
        .map_or(false, |task| task.status.state == TaskState::Working);
    if still_working {
        let (emitter, _events) = TaskEmitter::new(&task_id, &context_id);
        let mut emitter = emitter.with_store(state.tasks.clone());
        if let Err(e) = emitter.fail("The agent stopped unexpectedly before finishing the request.") {
            tracing::error!(task_id = %task_id, error = %e, "could not close task");
        }
    }
}

async fn message_send(state: AppState, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
    let (task, emitter, _events) = start_task(&state, request)?;
    let task_id = task.id.clone();
    // The spawned task keeps going even if this request is dropped
    if let Err(e) = tokio::spawn(supervise(state.clone(), task, emitter)).await {
        tracing::error!(task_id = %task_id, error = %e, "task supervisor failed");
    }

    let snapshot = state
        .tasks
        .get(&task_id)
        .ok_or_else(|| task_error(TaskError::UnknownTask(task_id)))?;
    serde_json::to_value(snapshot).map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))
}

fn tasks_get(state: &AppState, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
    let TaskQueryParams { id } = params(request)?;
    let task = state
        .tasks
        .get(&id)
        .ok_or_else(|| task_error(TaskError::UnknownTask(id)))?;
    serde_json::to_value(task).map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))
}

async fn tasks_cancel(state: &AppState, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
    let TaskQueryParams { id } = params(request)?;
    if let Err(unknown @ TaskError::UnknownTask(_)) = state.tasks.cancel(&id) {
        return Err(task_error(unknown));
    }
    // Whether a known task can stop is up to the executor
    state.executor.cancel(&id).await.map_err(task_error)?;
    tasks_get(state, request)
}

async fn handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let error = JsonRpcError::new(PARSE_ERROR, format!("parse error: {}", e));
            return Json(JsonRpcResponse::failure(Value::Null, error)).into_response();
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        let error = JsonRpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\"");
        return Json(JsonRpcResponse::failure(request.id, error)).into_response();
    }

    tracing::debug!(method = %request.method, "rpc request");

    let result = match request.method.as_str() {
        METHOD_MESSAGE_SEND => message_send(state, &request).await,
        METHOD_MESSAGE_STREAM => match start_task(&state, &request) {
            Ok((task, emitter, events)) => {
                tokio::spawn(supervise(state, task, emitter));
                return SseResponse::new(request.id, events).into_response();
            }
            Err(error) => Err(error),
        },
        METHOD_TASKS_GET => tasks_get(&state, &request),
        METHOD_TASKS_CANCEL => tasks_cancel(&state, &request).await,
        other => Err(JsonRpcError::new(
            METHOD_NOT_FOUND,
            format!("method not found: {}", other),
        )),
    };

    let response = match result {
        Ok(result) => JsonRpcResponse::success(request.id, result),
        Err(error) => {
            tracing::warn!(method = %request.method, code = error.code, error = %error.message, "rpc error");
            JsonRpcResponse::failure(request.id, error)
        }
    };
    Json(response).into_response()
}

pub fn routes(state: AppState) -> Router {
    Router::new().route("/", post(handler)).with_state(state)
}
