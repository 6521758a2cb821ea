//! Core entity types for the Mission Control backend.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Role of a user inside an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(MemberRole::Owner),
            "admin" => Some(MemberRole::Admin),
            "member" => Some(MemberRole::Member),
            _ => None,
        }
    }
}

/// Lifecycle status of an agent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Provisioning,
    Active,
    Paused,
    Deleting,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Provisioning => "provisioning",
            AgentStatus::Active => "active",
            AgentStatus::Paused => "paused",
            AgentStatus::Deleting => "deleting",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "provisioning" => Some(AgentStatus::Provisioning),
            "active" => Some(AgentStatus::Active),
            "paused" => Some(AgentStatus::Paused),
            "deleting" => Some(AgentStatus::Deleting),
            _ => None,
        }
    }
}

/// Status of a board onboarding session.
///
/// Transitions are monotonic: `active -> completed -> confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    Active,
    Completed,
    Confirmed,
}

impl OnboardingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingStatus::Active => "active",
            OnboardingStatus::Completed => "completed",
            OnboardingStatus::Confirmed => "confirmed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(OnboardingStatus::Active),
            "completed" => Some(OnboardingStatus::Completed),
            "confirmed" => Some(OnboardingStatus::Confirmed),
            _ => None,
        }
    }

    /// Position in the monotonic lifecycle, used to reject reversals.
    pub fn rank(&self) -> u8 {
        match self {
            OnboardingStatus::Active => 0,
            OnboardingStatus::Completed => 1,
            OnboardingStatus::Confirmed => 2,
        }
    }
}

/// Allowed task statuses.
pub const TASK_STATUSES: &[&str] = &["inbox", "ready", "in_progress", "review", "done", "blocked"];

/// Allowed task priorities.
pub const TASK_PRIORITIES: &[&str] = &["low", "medium", "high"];

/// Top-level organization tenant record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Application user account and profile attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Identity-provider subject claim, unique per user.
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub preferred_name: Option<String>,
    pub pronouns: Option<String>,
    pub timezone: Option<String>,
    pub notes: Option<String>,
    pub context: Option<String>,
    pub is_super_admin: bool,
    pub active_organization_id: Option<Uuid>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Membership edge between a user and an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationMember {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Invitation record granting prospective organization access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationInvite {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub invited_email: String,
    pub token: String,
    pub role: MemberRole,
    pub all_boards_read: bool,
    pub all_boards_write: bool,
    pub created_by_user_id: Option<Uuid>,
    pub accepted_by_user_id: Option<Uuid>,
    pub accepted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Configured external gateway endpoint and authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gateway {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub url: String,
    pub token: Option<String>,
    pub main_session_key: String,
    pub workspace_root: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Logical grouping container for boards within an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardGroup {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Primary board entity grouping tasks, agents, and goal metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub slug: String,
    pub gateway_id: Option<Uuid>,
    pub board_group_id: Option<Uuid>,
    pub board_type: String,
    pub objective: Option<String>,
    pub success_metrics: Option<serde_json::Value>,
    pub target_date: Option<i64>,
    pub goal_confirmed: bool,
    pub goal_source: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Agent configuration and lifecycle state persisted in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub board_id: Option<Uuid>,
    pub name: String,
    pub status: AgentStatus,
    pub openclaw_session_id: Option<String>,
    /// Digest record of the agent bearer token. Raw tokens are never stored.
    #[serde(skip_serializing)]
    pub agent_token_hash: Option<String>,
    pub heartbeat_config: Option<serde_json::Value>,
    pub identity_profile: Option<HashMap<String, String>>,
    pub provision_requested_at: Option<i64>,
    pub provision_action: Option<String>,
    pub last_seen_at: Option<i64>,
    pub is_board_lead: bool,
    /// Set when a best-effort gateway call failed and a reconciliation pass
    /// still owes this agent its remote workspace.
    pub pending_sync: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Board-scoped task entity with ownership, status, and timing fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub board_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub due_at: Option<i64>,
    pub in_progress_at: Option<i64>,
    pub created_by_user_id: Option<Uuid>,
    pub assigned_agent_id: Option<Uuid>,
    pub auto_created: bool,
    pub auto_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Directed dependency edge between two tasks on the same board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDependency {
    pub id: Uuid,
    pub board_id: Uuid,
    pub task_id: Uuid,
    pub depends_on_task_id: Uuid,
    pub created_at: i64,
}

/// Approval request and decision metadata for gated operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: Uuid,
    pub board_id: Uuid,
    pub task_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub action_type: String,
    pub payload: Option<serde_json::Value>,
    pub confidence: i64,
    pub rubric_scores: Option<HashMap<String, i64>>,
    pub status: String,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

/// Discrete activity event tied to tasks and agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub event_type: String,
    pub message: Option<String>,
    pub agent_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub created_at: i64,
}

/// Persisted memory item attached directly to a board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardMemory {
    pub id: Uuid,
    pub board_id: Uuid,
    pub content: String,
    pub tags: Option<Vec<String>>,
    pub is_chat: bool,
    pub source: Option<String>,
    pub created_at: i64,
}

/// Persisted memory item associated with a board group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardGroupMemory {
    pub id: Uuid,
    pub board_group_id: Uuid,
    pub content: String,
    pub tags: Option<Vec<String>>,
    pub is_chat: bool,
    pub source: Option<String>,
    pub created_at: i64,
}

/// One message in an onboarding conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingMessage {
    pub role: String,
    pub content: String,
    pub timestamp: i64,
}

/// Persisted onboarding conversation and draft goal data for a board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardOnboardingSession {
    pub id: Uuid,
    pub board_id: Uuid,
    pub session_key: String,
    pub status: OnboardingStatus,
    pub messages: Vec<OnboardingMessage>,
    pub draft_goal: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_role_roundtrip() {
        for role in [MemberRole::Owner, MemberRole::Admin, MemberRole::Member] {
            assert_eq!(MemberRole::from_str(role.as_str()), Some(role));
        }
        assert_eq!(MemberRole::from_str("superuser"), None);
    }

    #[test]
    fn onboarding_status_is_ordered() {
        assert!(OnboardingStatus::Active.rank() < OnboardingStatus::Completed.rank());
        assert!(OnboardingStatus::Completed.rank() < OnboardingStatus::Confirmed.rank());
    }
}
