//! Board onboarding endpoints for user/agent collaboration.

use super::{AppState, AuthContext, require_board_read, require_board_write};
use crate::db::boards::BoardPatch;
use crate::db::now_ms;
use crate::db::users::UserProfilePatch;
use crate::error::{ApiError, ApiResult};
use crate::leads;
use crate::types::{
    Board, BoardOnboardingSession, Gateway, OnboardingMessage, OnboardingStatus,
};
use axum::Json;
use axum::extract::{Extension, Path, State};
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Resolve the board's gateway, requiring a usable configuration.
fn gateway_for_board(state: &AppState, board: &Board) -> Result<Gateway, ApiError> {
    let gateway_id = board
        .gateway_id
        .ok_or_else(|| ApiError::invalid_value("gateway_id", "Board has no gateway"))?;
    let gateway = state
        .db
        .get_gateway(gateway_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Gateway"))?;
    if gateway.url.is_empty() || gateway.main_session_key.is_empty() {
        return Err(ApiError::invalid_value(
            "gateway_id",
            "Gateway is not fully configured",
        ));
    }
    Ok(gateway)
}

/// The instruction prompt sent to the gateway main agent when onboarding
/// starts. Deliberately short and deterministic; the agent drives the
/// conversation from here.
fn onboarding_prompt(board: &Board, base_url: &str) -> String {
    format!(
        "BOARD ONBOARDING REQUEST\n\n\
         Board Name: {}\n\
         You are the main agent. Interview the user to clarify the board goal,\n\
         pick a name for the board lead agent, and capture working preferences.\n\
         Respond only through the Mission Control API, never in gateway chat.\n\
         Base URL: {}\n\
         Post each question (and the final status=complete payload) to:\n\
         POST {}/api/v1/agent/boards/{}/onboarding\n\
         with your AUTH_TOKEN in the X-Agent-Token header.\n\
         The completion payload must include board_type; a goal board also\n\
         needs objective and success_metrics, plus user_profile and lead_agent.",
        board.name, base_url, base_url, board.id
    )
}

pub async fn get_onboarding(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
) -> ApiResult<Json<BoardOnboardingSession>> {
    let (_, _, board) = require_board_read(&state, &ctx, board_id)?;
    let session = state
        .db
        .latest_onboarding_session(board.id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Onboarding session"))?;
    Ok(Json(session))
}

/// Start onboarding and send instructions to the gateway main agent.
///
/// Idempotent per active session. Gateway failures here are user-initiated,
/// so they propagate as 502 instead of being swallowed.
pub async fn start_onboarding(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
) -> ApiResult<Json<BoardOnboardingSession>> {
    let (_, _, board) = require_board_write(&state, &ctx, board_id)?;
    if let Some(active) = state
        .db
        .active_onboarding_session(board.id)
        .map_err(ApiError::from)?
    {
        return Ok(Json(active));
    }

    let gateway = gateway_for_board(&state, &board)?;
    let prompt = onboarding_prompt(&board, &state.settings.base_url);
    let session_key = gateway.main_session_key.clone();
    let transport = state.gateway_transport(&gateway);

    let prompt_for_send = prompt.clone();
    let key_for_send = session_key.clone();
    tokio::task::spawn_blocking(move || {
        transport.ensure_session(&key_for_send, "Main Agent")?;
        transport.send_message(&prompt_for_send, &key_for_send, false)
    })
    .await
    .map_err(ApiError::internal)?
    .map_err(ApiError::upstream_gateway)?;

    let session = state
        .db
        .create_onboarding_session(
            board.id,
            &session_key,
            OnboardingMessage {
                role: "user".to_string(),
                content: prompt,
                timestamp: now_ms(),
            },
        )
        .map_err(ApiError::from)?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct OnboardingAnswer {
    pub answer: String,
    #[serde(default)]
    pub other_text: Option<String>,
}

/// Relay a user onboarding answer to the gateway main agent.
pub async fn answer_onboarding(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
    Json(payload): Json<OnboardingAnswer>,
) -> ApiResult<Json<BoardOnboardingSession>> {
    let (_, _, board) = require_board_write(&state, &ctx, board_id)?;
    let session = state
        .db
        .latest_onboarding_session(board.id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Onboarding session"))?;

    let gateway = gateway_for_board(&state, &board)?;
    let answer_text = match &payload.other_text {
        Some(other) => format!("{}: {}", payload.answer, other),
        None => payload.answer.clone(),
    };

    let transport = state.gateway_transport(&gateway);
    let key = session.session_key.clone();
    let text = answer_text.clone();
    tokio::task::spawn_blocking(move || {
        transport.ensure_session(&key, "Main Agent")?;
        transport.send_message(&text, &key, false)
    })
    .await
    .map_err(ApiError::internal)?
    .map_err(ApiError::upstream_gateway)?;

    let session = state
        .db
        .append_onboarding_message(
            session.id,
            OnboardingMessage {
                role: "user".to_string(),
                content: answer_text,
                timestamp: now_ms(),
            },
        )
        .map_err(ApiError::from)?;
    Ok(Json(session))
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfileDraft {
    #[serde(default)]
    pub preferred_name: Option<String>,
    #[serde(default)]
    pub pronouns: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeadAgentDraft {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub identity_profile: Option<HashMap<String, String>>,
    #[serde(default)]
    pub autonomy_level: Option<String>,
    #[serde(default)]
    pub verbosity: Option<String>,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub update_cadence: Option<String>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

/// Question or completion payload posted by the gateway main agent.
#[derive(Debug, Deserialize)]
pub struct AgentOnboardingUpdate {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub options: Option<serde_json::Value>,
    #[serde(default)]
    pub board_type: Option<String>,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub success_metrics: Option<serde_json::Value>,
    #[serde(default)]
    pub target_date: Option<i64>,
    #[serde(default)]
    pub user_profile: Option<UserProfileDraft>,
    #[serde(default)]
    pub lead_agent: Option<LeadAgentDraft>,
}

/// Store onboarding updates submitted by the gateway main agent.
pub async fn agent_onboarding_update(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
    Json(payload): Json<AgentOnboardingUpdate>,
) -> ApiResult<Json<BoardOnboardingSession>> {
    let agent = ctx.require_agent()?;
    // Only the gateway main agent (not a board-bound agent) may post here.
    if agent.board_id.is_some() {
        return Err(ApiError::forbidden(
            "Board-bound agents cannot post onboarding updates",
        ));
    }
    let board = state
        .db
        .get_board(board_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Board"))?;
    let session = state
        .db
        .latest_onboarding_session(board.id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Onboarding session"))?;
    if session.status == OnboardingStatus::Confirmed {
        return Err(ApiError::conflict("Onboarding already confirmed"));
    }

    let raw = serde_json::json!({
        "status": payload.status,
        "question": payload.question,
        "options": payload.options,
        "board_type": payload.board_type,
        "objective": payload.objective,
        "success_metrics": payload.success_metrics,
        "target_date": payload.target_date,
        "user_profile": payload.user_profile.as_ref().map(|p| serde_json::json!({
            "preferred_name": p.preferred_name,
            "pronouns": p.pronouns,
            "timezone": p.timezone,
            "notes": p.notes,
            "context": p.context,
        })),
        "lead_agent": payload.lead_agent.as_ref().map(|l| serde_json::json!({
            "name": l.name,
            "identity_profile": l.identity_profile,
            "autonomy_level": l.autonomy_level,
            "verbosity": l.verbosity,
            "output_format": l.output_format,
            "update_cadence": l.update_cadence,
            "custom_instructions": l.custom_instructions,
        })),
    });
    let message = OnboardingMessage {
        role: "assistant".to_string(),
        content: raw.to_string(),
        timestamp: now_ms(),
    };

    let session = if payload.status.as_deref() == Some("complete") {
        state
            .db
            .advance_onboarding_session(
                session.id,
                OnboardingStatus::Completed,
                Some(raw),
                Some(message),
            )
            .map_err(ApiError::from)?
    } else {
        state
            .db
            .append_onboarding_message(session.id, message)
            .map_err(ApiError::from)?
    };
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct OnboardingConfirm {
    pub board_type: String,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub success_metrics: Option<serde_json::Value>,
    #[serde(default)]
    pub target_date: Option<i64>,
}

/// Confirm onboarding results and provision the board lead agent.
pub async fn confirm_onboarding(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(board_id): Path<Uuid>,
    Json(payload): Json<OnboardingConfirm>,
) -> ApiResult<Json<Board>> {
    let (user, _, board) = require_board_write(&state, &ctx, board_id)?;
    let session = state
        .db
        .latest_onboarding_session(board.id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Onboarding session"))?;

    let board = state
        .db
        .update_board(
            board.id,
            BoardPatch {
                board_type: Some(payload.board_type),
                objective: Some(payload.objective),
                success_metrics: Some(payload.success_metrics),
                target_date: Some(payload.target_date),
                goal_confirmed: Some(true),
                goal_source: Some(Some("lead_agent_onboarding".to_string())),
                ..Default::default()
            },
        )
        .map_err(ApiError::from)?;

    // Pull the drafted user profile and lead configuration out of the
    // completion payload; malformed drafts are ignored, not fatal.
    let mut lead_name: Option<String> = None;
    let mut lead_profile: HashMap<String, String> = HashMap::new();
    if let Some(draft) = &session.draft_goal {
        if let Some(profile) = draft
            .get("user_profile")
            .and_then(|v| serde_json::from_value::<Option<UserProfileDraft>>(v.clone()).ok())
            .flatten()
        {
            state
                .db
                .apply_user_profile(
                    user.id,
                    &UserProfilePatch {
                        preferred_name: profile.preferred_name,
                        pronouns: profile.pronouns,
                        timezone: profile.timezone,
                        notes: profile.notes,
                        context: profile.context,
                    },
                )
                .map_err(ApiError::from)?;
        }
        if let Some(lead) = draft
            .get("lead_agent")
            .and_then(|v| serde_json::from_value::<Option<LeadAgentDraft>>(v.clone()).ok())
            .flatten()
        {
            lead_name = lead.name;
            if let Some(profile) = lead.identity_profile {
                lead_profile.extend(profile);
            }
            for (key, value) in [
                ("autonomy_level", lead.autonomy_level),
                ("verbosity", lead.verbosity),
                ("output_format", lead.output_format),
                ("update_cadence", lead.update_cadence),
                ("custom_instructions", lead.custom_instructions),
            ] {
                if let Some(value) = value {
                    lead_profile.insert(key.to_string(), value);
                }
            }
        }
    }

    state
        .db
        .advance_onboarding_session(session.id, OnboardingStatus::Confirmed, None, None)
        .map_err(ApiError::from)?;

    let gateway = gateway_for_board(&state, &board)?;
    let transport = state.gateway_transport(&gateway);
    let db = state.db.clone();
    let board_for_lead = board.clone();
    let user_for_lead = user.clone();
    let overrides = if lead_profile.is_empty() {
        None
    } else {
        Some(lead_profile)
    };
    tokio::task::spawn_blocking(move || {
        leads::ensure_board_lead_agent(
            &db,
            transport.as_ref(),
            &board_for_lead,
            Some(&user_for_lead),
            lead_name.as_deref(),
            overrides.as_ref(),
        )
    })
    .await
    .map_err(ApiError::internal)?
    .map_err(ApiError::from)?;

    Ok(Json(board))
}
