//! HTTP API server for Mission Control.
//!
//! Route handlers live in per-domain modules; this module owns shared state,
//! the request-id middleware, and authentication resolution.

pub mod agents;
pub mod boards;
pub mod onboarding;
pub mod orgs;
pub mod tasks;

use crate::config::Settings;
use crate::db::Database;
use crate::error::ApiError;
use crate::gateway::{GatewayClient, GatewayConfig, GatewayTransport};
use crate::identity::IdentityVerifier;
use crate::queue::JobQueue;
use crate::types::{Agent, Board, Gateway, MemberRole, OrganizationMember, User};
use anyhow::Result;
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header carrying agent bearer credentials.
pub const AGENT_TOKEN_HEADER: &str = "x-agent-token";

/// Shared state available to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub settings: Arc<Settings>,
    pub queue: Arc<JobQueue>,
    pub identity: Arc<IdentityVerifier>,
}

impl AppState {
    pub fn new(db: Database, settings: Settings) -> Self {
        let identity = Arc::new(IdentityVerifier::new(settings.jwks_url.clone()));
        Self {
            db,
            settings: Arc::new(settings),
            queue: Arc::new(JobQueue::new()),
            identity,
        }
    }

    /// Build a gateway transport for a stored gateway row.
    pub fn gateway_transport(&self, gateway: &Gateway) -> Box<dyn GatewayTransport> {
        Box::new(GatewayClient::new(
            GatewayConfig {
                url: gateway.url.clone(),
                token: gateway.token.clone(),
            },
            Duration::from_secs(self.settings.gateway_timeout_secs),
        ))
    }
}

/// Who is making the request.
#[derive(Clone, Default)]
pub struct AuthContext {
    pub user: Option<User>,
    pub agent: Option<Agent>,
}

impl AuthContext {
    /// The authenticated user, or 401.
    pub fn require_user(&self) -> Result<&User, ApiError> {
        self.user.as_ref().ok_or_else(ApiError::unauthorized)
    }

    /// The authenticated agent, or 401.
    pub fn require_agent(&self) -> Result<&Agent, ApiError> {
        self.agent.as_ref().ok_or_else(ApiError::unauthorized)
    }
}

/// Resolve the caller's identity from `X-Agent-Token` or `Authorization`.
///
/// An agent token takes precedence (agents never carry user JWTs). A user
/// token resolves to a local user row, auto-created on first sight, with a
/// membership ensured so every user always has a tenant to land in.
async fn auth_middleware(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut ctx = AuthContext::default();

    if let Some(token) = request
        .headers()
        .get(AGENT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    {
        let db = state.db.clone();
        let agent = tokio::task::spawn_blocking(move || db.authenticate_agent_token(&token))
            .await
            .ok()
            .and_then(|r| r.ok())
            .flatten();
        ctx.agent = agent;
    } else if let Some(bearer) = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
    {
        let identity = Arc::clone(&state.identity);
        let db = state.db.clone();
        let user = tokio::task::spawn_blocking(move || -> Option<User> {
            if !identity.is_configured() {
                return None;
            }
            let claims = identity.verify(&bearer).ok()?;
            let (user, _created) = db
                .get_or_create_user(&claims.sub, claims.email.as_deref(), claims.name.as_deref())
                .ok()?;
            let _ = db.ensure_member_for_user(user.id);
            Some(user)
        })
        .await
        .ok()
        .flatten();
        ctx.user = user;
    }

    request.extensions_mut().insert(ctx);
    next.run(request).await
}

/// Ensure every request carries a correlation id, honoring a caller-supplied
/// one, and echo it on the response.
async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Correlation id attached to the request extensions.
#[derive(Clone)]
pub struct RequestId(pub String);

/// Health check response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Assemble the full application router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/orgs", post(orgs::create_org))
        .route(
            "/orgs/{org_id}",
            get(orgs::get_org).delete(orgs::delete_org),
        )
        .route("/orgs/{org_id}/members", get(orgs::list_members))
        .route("/orgs/{org_id}/invites", post(orgs::create_invite))
        .route("/invites/accept", post(orgs::accept_invite))
        .route(
            "/orgs/{org_id}/gateways",
            get(orgs::list_gateways).post(orgs::create_gateway),
        )
        .route(
            "/orgs/{org_id}/boards",
            get(boards::list_boards).post(boards::create_board),
        )
        .route(
            "/orgs/{org_id}/board-groups",
            post(boards::create_board_group),
        )
        .route(
            "/board-groups/{group_id}",
            axum::routing::delete(boards::delete_board_group),
        )
        .route(
            "/boards/{board_id}",
            get(boards::get_board)
                .patch(boards::update_board)
                .delete(boards::delete_board),
        )
        .route(
            "/boards/{board_id}/memory",
            get(boards::list_board_memory).post(boards::add_board_memory),
        )
        .route(
            "/boards/{board_id}/agents",
            get(agents::list_board_agents),
        )
        .route("/boards/{board_id}/agents/lead", post(agents::provision_lead))
        .route(
            "/boards/{board_id}/tasks",
            get(tasks::list_tasks).post(tasks::create_task),
        )
        .route(
            "/tasks/{task_id}",
            get(tasks::get_task)
                .patch(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route(
            "/tasks/{task_id}/dependencies",
            post(tasks::add_dependency),
        )
        .route(
            "/boards/{board_id}/onboarding",
            get(onboarding::get_onboarding),
        )
        .route(
            "/boards/{board_id}/onboarding/start",
            post(onboarding::start_onboarding),
        )
        .route(
            "/boards/{board_id}/onboarding/answer",
            post(onboarding::answer_onboarding),
        )
        .route(
            "/boards/{board_id}/onboarding/confirm",
            post(onboarding::confirm_onboarding),
        )
        .route(
            "/agent/boards/{board_id}/onboarding",
            post(onboarding::agent_onboarding_update),
        );

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.settings.host, state.settings.port).parse()?;
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "mission-control listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Resolve the acting user's membership in an organization, or 403.
pub(crate) fn require_membership(
    state: &AppState,
    ctx: &AuthContext,
    org_id: Uuid,
) -> Result<(User, OrganizationMember), ApiError> {
    let user = ctx.require_user()?.clone();
    let member = state
        .db
        .get_member(org_id, user.id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::forbidden("Not a member of this organization"))?;
    Ok((user, member))
}

/// Resolve a board and the acting user's write access to it, or 403/404.
pub(crate) fn require_board_write(
    state: &AppState,
    ctx: &AuthContext,
    board_id: Uuid,
) -> Result<(User, OrganizationMember, Board), ApiError> {
    let board = state
        .db
        .get_board(board_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Board"))?;
    let (user, member) = require_membership(state, ctx, board.organization_id)?;
    let allowed = state
        .db
        .member_can_write_board(member.id, member.role, board.id)
        .map_err(ApiError::from)?;
    if !allowed {
        return Err(ApiError::forbidden("Write access to this board required"));
    }
    Ok((user, member, board))
}

/// Resolve a board and the acting user's read access to it, or 403/404.
pub(crate) fn require_board_read(
    state: &AppState,
    ctx: &AuthContext,
    board_id: Uuid,
) -> Result<(User, OrganizationMember, Board), ApiError> {
    let board = state
        .db
        .get_board(board_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("Board"))?;
    let (user, member) = require_membership(state, ctx, board.organization_id)?;
    let allowed = state
        .db
        .member_can_read_board(member.id, member.role, board.id)
        .map_err(ApiError::from)?;
    if !allowed {
        return Err(ApiError::forbidden("Read access to this board required"));
    }
    Ok((user, member, board))
}

/// Require admin-or-owner on an organization.
pub(crate) fn require_admin(
    state: &AppState,
    ctx: &AuthContext,
    org_id: Uuid,
) -> Result<(User, OrganizationMember), ApiError> {
    let (user, member) = require_membership(state, ctx, org_id)?;
    if !matches!(member.role, MemberRole::Owner | MemberRole::Admin) {
        return Err(ApiError::forbidden("Admin role required"));
    }
    Ok((user, member))
}
