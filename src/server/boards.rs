//! Board, board-group, and board-memory endpoints.

use super::{AppState, AuthContext, require_admin, require_board_read, require_board_write,
            require_membership};
use crate::db::boards::BoardPatch;
use crate::error::{ApiError, ApiResult};
use crate::types::{Board, BoardGroup, BoardMemory};
use axum::Json;
use axum::extract::{Extension, Path, State};
use serde::Deserialize;
use uuid::Uuid;

/// Incoming board payload; absent and null fields are distinguished for
/// partial updates.
#[derive(Debug, Default, Deserialize)]
pub struct BoardBody {
    pub name: Option<String>,
    #[serde(default, with = "serde_double_option")]
    pub gateway_id: Option<Option<Uuid>>,
    #[serde(default, with = "serde_double_option")]
    pub board_group_id: Option<Option<Uuid>>,
    pub board_type: Option<String>,
    #[serde(default, with = "serde_double_option")]
    pub objective: Option<Option<String>>,
    #[serde(default, with = "serde_double_option")]
    pub success_metrics: Option<Option<serde_json::Value>>,
    #[serde(default, with = "serde_double_option")]
    pub target_date: Option<Option<i64>>,
    pub goal_confirmed: Option<bool>,
    #[serde(default, with = "serde_double_option")]
    pub goal_source: Option<Option<String>>,
}

/// Deserialize a field that may be absent (`None`), null (`Some(None)`), or
/// present (`Some(Some(v))`).
pub(crate) mod serde_double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

impl From<BoardBody> for BoardPatch {
    fn from(body: BoardBody) -> Self {
        BoardPatch {
            name: body.name,
            gateway_id: body.gateway_id,
            board_group_id: body.board_group_id,
            board_type: body.board_type,
            objective: body.objective,
            success_metrics: body.success_metrics,
            target_date: body.target_date,
            goal_confirmed: body.goal_confirmed,
            goal_source: body.goal_source,
        }
    }
}

pub async fn create_board(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
    Json(payload): Json<BoardBody>,
) -> ApiResult<Json<Board>> {
    let (_, _member) = require_admin(&state, &ctx, org_id)?;
    let board = state
        .db
        .create_board(org_id, payload.into())
        .map_err(ApiError::from)?;
    Ok(Json(board))
}

pub async fn list_boards(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Board>>> {
    let (_, member) = require_membership(&state, &ctx, org_id)?;
    let boards = state.db.list_boards(org_id).map_err(ApiError::from)?;
    // Members only see boards they can read.
    let mut visible = Vec::with_capacity(boards.len());
    for board in boards {
        if state
            .db
            .member_can_read_board(member.id, member.role, board.id)
            .map_err(ApiError::from)?
        {
            visible.push(board);
        }
    }
    Ok(Json(visible))
}

pub async fn get_board(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
) -> ApiResult<Json<Board>> {
    let (_, _, board) = require_board_read(&state, &ctx, board_id)?;
    Ok(Json(board))
}

pub async fn update_board(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
    Json(payload): Json<BoardBody>,
) -> ApiResult<Json<Board>> {
    let (_, _, board) = require_board_write(&state, &ctx, board_id)?;
    let updated = state
        .db
        .update_board(board.id, payload.into())
        .map_err(ApiError::from)?;
    Ok(Json(updated))
}

pub async fn delete_board(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
) -> ApiResult<Json<super::orgs::DeleteResponse>> {
    let (_, _, board) = require_board_write(&state, &ctx, board_id)?;
    state.db.delete_board(board.id).map_err(ApiError::from)?;
    Ok(Json(super::orgs::DeleteResponse { ok: true }))
}

#[derive(Debug, Deserialize)]
pub struct BoardGroupCreate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn create_board_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
    Json(payload): Json<BoardGroupCreate>,
) -> ApiResult<Json<BoardGroup>> {
    let (_, _member) = require_admin(&state, &ctx, org_id)?;
    let group = state
        .db
        .create_board_group(org_id, &payload.name, payload.description.as_deref())
        .map_err(ApiError::from)?;
    Ok(Json(group))
}

pub async fn delete_board_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Json<super::orgs::DeleteResponse>> {
    let group = state
        .db
        .get_board_group(group_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Board group"))?;
    let (_, _member) = require_admin(&state, &ctx, group.organization_id)?;
    state
        .db
        .delete_board_group(group_id)
        .map_err(ApiError::from)?;
    Ok(Json(super::orgs::DeleteResponse { ok: true }))
}

#[derive(Debug, Deserialize)]
pub struct MemoryCreate {
    pub content: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub is_chat: bool,
    #[serde(default)]
    pub source: Option<String>,
}

pub async fn add_board_memory(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
    Json(payload): Json<MemoryCreate>,
) -> ApiResult<Json<BoardMemory>> {
    // Agents attached to the board may write memory too.
    let board = match ctx.agent.as_ref() {
        Some(agent) if agent.board_id == Some(board_id) => state
            .db
            .get_board(board_id)
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::not_found("Board"))?,
        _ => require_board_write(&state, &ctx, board_id)?.2,
    };
    let memory = state
        .db
        .add_board_memory(
            board.id,
            &payload.content,
            payload.tags,
            payload.is_chat,
            payload.source.as_deref(),
        )
        .map_err(ApiError::from)?;
    Ok(Json(memory))
}

pub async fn list_board_memory(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
) -> ApiResult<Json<Vec<BoardMemory>>> {
    let board = match ctx.agent.as_ref() {
        Some(agent) if agent.board_id == Some(board_id) => state
            .db
            .get_board(board_id)
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::not_found("Board"))?,
        _ => require_board_read(&state, &ctx, board_id)?.2,
    };
    let memory = state
        .db
        .list_board_memory(board.id)
        .map_err(ApiError::from)?;
    Ok(Json(memory))
}
