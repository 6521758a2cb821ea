//! Task endpoints with fire-and-forget agent notification dispatch.

use super::{AppState, AuthContext, require_board_read, require_board_write};
use crate::db::tasks::{NewTask, TaskPatch};
use crate::error::{ApiError, ApiResult};
use crate::gateway::GatewayTransport;
use crate::types::{Task, TaskDependency};
use axum::Json;
use axum::extract::{Extension, Path, State};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

/// Queue name for agent notification jobs.
const NOTIFY_QUEUE: &str = "agent-notify";

/// Enqueue a best-effort agent notification after the response is sent.
///
/// Dropped silently when the task has no assignee, the assignee has no
/// session, or the board has no gateway; delivery failures are logged by the
/// queue worker and never retried.
fn enqueue_task_notification(state: &AppState, event: &'static str, task: &Task) {
    let Some(agent_id) = task.assigned_agent_id else {
        return;
    };
    let db = state.db.clone();
    let state_for_job = state.clone();
    let title = task.title.clone();
    let status = task.status.clone();

    state.queue.enqueue(
        NOTIFY_QUEUE,
        Box::new(move || {
            let resolved = (|| -> anyhow::Result<Option<(String, Box<dyn GatewayTransport>)>> {
                let Some(agent) = db.get_agent(agent_id)? else {
                    return Ok(None);
                };
                let Some(session_key) = agent.openclaw_session_id else {
                    return Ok(None);
                };
                let Some(board_id) = agent.board_id else {
                    return Ok(None);
                };
                let Some(board) = db.get_board(board_id)? else {
                    return Ok(None);
                };
                let Some(gateway_id) = board.gateway_id else {
                    return Ok(None);
                };
                let Some(gateway) = db.get_gateway(gateway_id)? else {
                    return Ok(None);
                };
                Ok(Some((session_key, state_for_job.gateway_transport(&gateway))))
            })();

            match resolved {
                Ok(Some((session_key, transport))) => {
                    let text = format!("[{event}] {title} (status: {status})");
                    if let Err(e) = transport.send_message(&text, &session_key, true) {
                        tracing::warn!(event, error = %e, "agent notification failed");
                    }
                }
                Ok(None) => {
                    debug!(event, "agent notification skipped: no deliverable target");
                }
                Err(e) => {
                    tracing::warn!(event, error = %e, "agent notification lookup failed");
                }
            }
        }),
    );
}

#[derive(Debug, Deserialize)]
pub struct TaskCreate {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub due_at: Option<i64>,
    #[serde(default)]
    pub assigned_agent_id: Option<Uuid>,
}

pub async fn create_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
    Json(payload): Json<TaskCreate>,
) -> ApiResult<Json<Task>> {
    let (user, _, board) = require_board_write(&state, &ctx, board_id)?;
    let task = state
        .db
        .create_task(NewTask {
            board_id: Some(board.id),
            title: payload.title,
            description: payload.description,
            status: payload.status,
            priority: payload.priority,
            due_at: payload.due_at,
            created_by_user_id: Some(user.id),
            assigned_agent_id: payload.assigned_agent_id,
            auto_created: false,
            auto_reason: None,
        })
        .map_err(ApiError::from)?;

    enqueue_task_notification(&state, "task.created", &task);
    Ok(Json(task))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Task>>> {
    let board = match ctx.agent.as_ref() {
        Some(agent) if agent.board_id == Some(board_id) => state
            .db
            .get_board(board_id)
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::not_found("Board"))?,
        _ => require_board_read(&state, &ctx, board_id)?.2,
    };
    let tasks = state.db.list_tasks(board.id).map_err(ApiError::from)?;
    Ok(Json(tasks))
}

pub async fn get_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<Task>> {
    let task = state
        .db
        .get_task(task_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    if let Some(board_id) = task.board_id {
        match ctx.agent.as_ref() {
            Some(agent) if agent.board_id == Some(board_id) => {}
            _ => {
                require_board_read(&state, &ctx, board_id)?;
            }
        }
    }
    Ok(Json(task))
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskUpdateBody {
    pub title: Option<String>,
    #[serde(default, with = "super::boards::serde_double_option")]
    pub description: Option<Option<String>>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default, with = "super::boards::serde_double_option")]
    pub due_at: Option<Option<i64>>,
    #[serde(default, with = "super::boards::serde_double_option")]
    pub assigned_agent_id: Option<Option<Uuid>>,
}

pub async fn update_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<TaskUpdateBody>,
) -> ApiResult<Json<Task>> {
    let existing = state
        .db
        .get_task(task_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    let is_board_agent = matches!(
        (ctx.agent.as_ref(), existing.board_id),
        (Some(agent), Some(board_id)) if agent.board_id == Some(board_id)
    );
    if !is_board_agent && let Some(board_id) = existing.board_id {
        require_board_write(&state, &ctx, board_id)?;
    }

    let (task, changes) = state
        .db
        .update_task(
            task_id,
            TaskPatch {
                title: payload.title,
                description: payload.description,
                status: payload.status,
                priority: payload.priority,
                due_at: payload.due_at,
                assigned_agent_id: payload.assigned_agent_id,
            },
        )
        .map_err(ApiError::from)?;

    if changes.assigned_agent_id.is_some() {
        enqueue_task_notification(&state, "task.assigned", &task);
    } else if changes.status.is_some() {
        enqueue_task_notification(&state, "status.changed", &task);
    }
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<super::orgs::DeleteResponse>> {
    let task = state
        .db
        .get_task(task_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    if let Some(board_id) = task.board_id {
        require_board_write(&state, &ctx, board_id)?;
    }
    state.db.delete_task(task_id).map_err(ApiError::from)?;
    Ok(Json(super::orgs::DeleteResponse { ok: true }))
}

#[derive(Debug, Deserialize)]
pub struct DependencyCreate {
    pub depends_on_task_id: Uuid,
}

pub async fn add_dependency(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<DependencyCreate>,
) -> ApiResult<Json<TaskDependency>> {
    let task = state
        .db
        .get_task(task_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    let board_id = task
        .board_id
        .ok_or_else(|| ApiError::invalid_value("task_id", "Task is not on a board"))?;
    require_board_write(&state, &ctx, board_id)?;

    let blocker = state
        .db
        .get_task(payload.depends_on_task_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    if blocker.board_id != Some(board_id) {
        return Err(ApiError::invalid_value(
            "depends_on_task_id",
            "Tasks must be on the same board",
        ));
    }

    let dep = state
        .db
        .add_task_dependency(board_id, task_id, payload.depends_on_task_id)
        .map_err(ApiError::from)?;
    Ok(Json(dep))
}
