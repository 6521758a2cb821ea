//! Organization, membership, invite, and gateway endpoints.

use super::{AppState, AuthContext, require_admin, require_membership};
use crate::error::{ApiError, ApiResult};
use crate::types::{Gateway, MemberRole, Organization, OrganizationInvite, OrganizationMember};
use axum::Json;
use axum::extract::{Extension, Path, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct OrgCreate {
    pub name: String,
}

pub async fn create_org(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<OrgCreate>,
) -> ApiResult<Json<Organization>> {
    let user = ctx.require_user()?;
    let org = state
        .db
        .create_organization(&payload.name, user.id)
        .map_err(ApiError::from)?;
    state
        .db
        .record_activity("organization.created", Some(&org.name), None, None)
        .map_err(ApiError::from)?;
    Ok(Json(org))
}

pub async fn get_org(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Json<Organization>> {
    let (_, _member) = require_membership(&state, &ctx, org_id)?;
    let org = state
        .db
        .get_organization(org_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Organization"))?;
    Ok(Json(org))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub ok: bool,
}

/// Delete an organization and everything it owns.
///
/// The role check happens before the cascade is invoked, so a non-owner
/// request issues zero delete statements.
pub async fn delete_org(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Json<DeleteResponse>> {
    let (_, member) = require_membership(&state, &ctx, org_id)?;
    if state
        .db
        .get_organization(org_id)
        .map_err(ApiError::from)?
        .is_none()
    {
        return Err(ApiError::not_found("Organization"));
    }
    state
        .db
        .delete_organization(org_id, member.role)
        .map_err(ApiError::from)?;
    Ok(Json(DeleteResponse { ok: true }))
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Json<Vec<OrganizationMember>>> {
    let (_, _member) = require_membership(&state, &ctx, org_id)?;
    let members = state.db.list_members(org_id).map_err(ApiError::from)?;
    Ok(Json(members))
}

#[derive(Debug, Deserialize)]
pub struct InviteCreate {
    pub invited_email: String,
    #[serde(default)]
    pub role: Option<MemberRole>,
    #[serde(default)]
    pub all_boards_read: bool,
    #[serde(default)]
    pub all_boards_write: bool,
}

pub async fn create_invite(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
    Json(payload): Json<InviteCreate>,
) -> ApiResult<Json<OrganizationInvite>> {
    let (user, _member) = require_admin(&state, &ctx, org_id)?;
    let invite = state
        .db
        .create_invite(
            org_id,
            &payload.invited_email,
            payload.role.unwrap_or(MemberRole::Member),
            payload.all_boards_read,
            payload.all_boards_write,
            Some(user.id),
        )
        .map_err(ApiError::from)?;
    Ok(Json(invite))
}

#[derive(Debug, Deserialize)]
pub struct InviteAccept {
    pub token: String,
}

pub async fn accept_invite(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<InviteAccept>,
) -> ApiResult<Json<OrganizationMember>> {
    let user = ctx.require_user()?;
    let member = state
        .db
        .accept_invite(&payload.token, user.id)
        .map_err(ApiError::from)?;
    Ok(Json(member))
}

#[derive(Debug, Deserialize)]
pub struct GatewayCreate {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    pub main_session_key: String,
    #[serde(default)]
    pub workspace_root: String,
}

pub async fn create_gateway(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
    Json(payload): Json<GatewayCreate>,
) -> ApiResult<Json<Gateway>> {
    let (_, _member) = require_admin(&state, &ctx, org_id)?;
    let gateway = state
        .db
        .create_gateway(
            org_id,
            &payload.name,
            &payload.url,
            payload.token.as_deref(),
            &payload.main_session_key,
            &payload.workspace_root,
        )
        .map_err(ApiError::from)?;
    Ok(Json(gateway))
}

pub async fn list_gateways(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Gateway>>> {
    let (_, _member) = require_membership(&state, &ctx, org_id)?;
    let gateways = state.db.list_gateways(org_id).map_err(ApiError::from)?;
    Ok(Json(gateways))
}
