//! Agent endpoints: listing and lead provisioning.

use super::{AppState, AuthContext, require_board_read, require_board_write};
use crate::error::{ApiError, ApiResult};
use crate::leads;
use crate::types::Agent;
use axum::Json;
use axum::extract::{Extension, Path, State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub async fn list_board_agents(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Agent>>> {
    let (_, _, board) = require_board_read(&state, &ctx, board_id)?;
    let agents = state
        .db
        .list_board_agents(board.id)
        .map_err(ApiError::from)?;
    Ok(Json(agents))
}

#[derive(Debug, Default, Deserialize)]
pub struct LeadProvisionRequest {
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub identity_profile: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct LeadProvisionResponse {
    #[serde(flatten)]
    pub agent: Agent,
    pub created: bool,
}

/// Ensure the board's lead agent exists, provisioning it on first call.
///
/// The board must be linked to a usable gateway; local row creation commits
/// before the remote calls, which are best-effort.
pub async fn provision_lead(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
    Json(payload): Json<LeadProvisionRequest>,
) -> ApiResult<Json<LeadProvisionResponse>> {
    let (user, _, board) = require_board_write(&state, &ctx, board_id)?;

    let gateway_id = board
        .gateway_id
        .ok_or_else(|| ApiError::invalid_value("gateway_id", "Board has no gateway"))?;
    let gateway = state
        .db
        .get_gateway(gateway_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Gateway"))?;
    let transport = state.gateway_transport(&gateway);

    let db = state.db.clone();
    let (agent, created) = tokio::task::spawn_blocking(move || {
        leads::ensure_board_lead_agent(
            &db,
            transport.as_ref(),
            &board,
            Some(&user),
            payload.agent_name.as_deref(),
            payload.identity_profile.as_ref(),
        )
    })
    .await
    .map_err(ApiError::internal)?
    .map_err(ApiError::from)?;

    Ok(Json(LeadProvisionResponse { agent, created }))
}
