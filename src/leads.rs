//! Board lead-agent provisioning.
//!
//! Every board gets exactly one lead agent, created lazily on first need and
//! reused afterwards. Local persistence always wins over remote state: the
//! agent row is committed before any gateway call, and gateway failures only
//! flag the row for a later reconciliation pass.

use crate::db::Database;
use crate::db::agents::NewAgent;
use crate::gateway::{GatewayTransport, GatewayError};
use crate::types::{Agent, AgentStatus, Board, User};
use anyhow::Result;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

/// Default heartbeat cadence for newly provisioned leads.
pub fn default_heartbeat_config() -> serde_json::Value {
    serde_json::json!({ "every": "10m", "autostart": true })
}

/// Deterministic main session key for a board lead agent.
pub fn lead_session_key(board_id: Uuid) -> String {
    format!("agent:lead-{board_id}:main")
}

/// Default display name for board lead agents.
pub fn lead_agent_name() -> &'static str {
    "Lead Agent"
}

fn default_identity_profile() -> HashMap<String, String> {
    HashMap::from([
        ("role".to_string(), "Board Lead".to_string()),
        (
            "communication_style".to_string(),
            "direct, concise, practical".to_string(),
        ),
        ("emoji".to_string(), ":gear:".to_string()),
    ])
}

/// Merge caller-supplied identity overrides into the defaults, keeping only
/// trimmed, non-blank values.
fn merge_identity_profile(
    overrides: Option<&HashMap<String, String>>,
) -> HashMap<String, String> {
    let mut profile = default_identity_profile();
    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            let value = value.trim();
            if !value.is_empty() {
                profile.insert(key.clone(), value.to_string());
            }
        }
    }
    profile
}

/// Ensure a board has a lead agent; returns `(agent, created)`.
///
/// Reuses the existing lead when present, reconciling only divergent fields
/// (a newly supplied name, an unset session id). Otherwise creates the agent
/// in `provisioning` status with a freshly minted credential, commits, and
/// then attempts remote workspace provisioning best-effort.
pub fn ensure_board_lead_agent(
    db: &Database,
    transport: &dyn GatewayTransport,
    board: &Board,
    requesting_user: Option<&User>,
    agent_name: Option<&str>,
    identity_overrides: Option<&HashMap<String, String>>,
) -> Result<(Agent, bool)> {
    if let Some(existing) = db.find_board_lead(board.id)? {
        let desired_name = agent_name.unwrap_or(lead_agent_name());
        let desired_session = lead_session_key(board.id);
        let agent =
            db.reconcile_lead_fields(existing.id, Some(desired_name), Some(&desired_session))?;
        return Ok((agent, false));
    }

    let raw_token = crate::tokens::generate_agent_token();
    let agent = db.create_agent(NewAgent {
        board_id: Some(board.id),
        name: agent_name.unwrap_or(lead_agent_name()).to_string(),
        status: AgentStatus::Provisioning,
        openclaw_session_id: Some(lead_session_key(board.id)),
        agent_token_hash: Some(crate::tokens::hash_agent_token(&raw_token)),
        heartbeat_config: Some(default_heartbeat_config()),
        identity_profile: Some(merge_identity_profile(identity_overrides)),
        provision_action: Some("provision".to_string()),
        is_board_lead: true,
    })?;
    info!(board_id = %board.id, agent_id = %agent.id, "lead agent created");

    // The row is committed; everything from here on is best-effort and must
    // not undo it.
    match provision_workspace(transport, &agent, &raw_token, requesting_user) {
        Ok(()) => {
            db.record_activity(
                "agent.provisioned",
                Some(&format!("Lead agent provisioned for board {}", board.name)),
                Some(agent.id),
                None,
            )?;
        }
        Err(e) => {
            warn!(agent_id = %agent.id, error = %e, "lead provisioning gateway call failed");
            db.set_agent_pending_sync(agent.id, true)?;
            db.record_activity(
                "agent.provision_failed",
                Some(&e.to_string()),
                Some(agent.id),
                None,
            )?;
        }
    }

    let agent = db.get_agent(agent.id)?.unwrap_or(agent);
    Ok((agent, true))
}

/// Materialize the agent's remote workspace: ensure its session exists, seed
/// the credential as session context, and dispatch the welcome message.
fn provision_workspace(
    transport: &dyn GatewayTransport,
    agent: &Agent,
    raw_token: &str,
    requesting_user: Option<&User>,
) -> Result<(), GatewayError> {
    let Some(session_key) = agent.openclaw_session_id.as_deref() else {
        return Ok(());
    };
    transport.ensure_session(session_key, &agent.name)?;

    let requested_by = requesting_user
        .and_then(|u| u.preferred_name.as_deref().or(u.name.as_deref()))
        .unwrap_or("the board owner");
    transport.send_message(
        &format!(
            "Workspace provisioning for {}.\nRequested by: {}.\nAUTH_TOKEN: {}\n\
             Store this token in TOOLS.md and pass it as X-Agent-Token on every API call.",
            agent.name, requested_by, raw_token
        ),
        session_key,
        false,
    )?;
    transport.send_message(
        &format!(
            "Hello {}. Your workspace has been provisioned.\n\n\
             Start the agent, run BOOT.md, and if BOOTSTRAP.md exists run it once \
             then delete it. Begin heartbeats after startup.",
            agent.name
        ),
        session_key,
        true,
    )?;
    Ok(())
}

/// Retry workspace provisioning for agents flagged `pending_sync`.
///
/// `transport_for` resolves the gateway transport for an agent's board; an
/// unresolvable agent is skipped and stays flagged. Returns how many agents
/// were reconciled.
pub fn sync_pending_agents<F>(db: &Database, mut transport_for: F) -> Result<usize>
where
    F: FnMut(&Agent) -> Option<Box<dyn GatewayTransport>>,
{
    let pending = db.list_pending_sync_agents()?;
    let mut reconciled = 0;
    for agent in pending {
        let Some(transport) = transport_for(&agent) else {
            warn!(agent_id = %agent.id, "no gateway transport for pending agent, skipping");
            continue;
        };
        let Some(session_key) = agent.openclaw_session_id.as_deref() else {
            continue;
        };
        let outcome = transport.ensure_session(session_key, &agent.name).and_then(|()| {
            transport.send_message(
                &format!(
                    "Hello {}. Your workspace has been provisioned.\n\n\
                     Start the agent, run BOOT.md, and if BOOTSTRAP.md exists run it once \
                     then delete it. Begin heartbeats after startup.",
                    agent.name
                ),
                session_key,
                true,
            )
        });
        match outcome {
            Ok(()) => {
                db.set_agent_pending_sync(agent.id, false)?;
                db.record_activity(
                    "agent.provision_synced",
                    None,
                    Some(agent.id),
                    None,
                )?;
                reconciled += 1;
            }
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "pending-sync retry failed");
            }
        }
    }
    Ok(reconciled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::boards::BoardPatch;
    use crate::gateway::testing::{FailingGateway, RecordingGateway};

    fn setup() -> (Database, Board) {
        let db = Database::open_in_memory().expect("in-memory db");
        let (user, _) = db
            .get_or_create_user("subject-lead-tests", None, None)
            .unwrap();
        let org = db.create_organization("Lead Test Org", user.id).unwrap();
        let board = db
            .create_board(
                org.id,
                BoardPatch {
                    name: Some("Demo Board".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        (db, board)
    }

    #[test]
    fn first_call_creates_then_second_reuses() {
        let (db, board) = setup();
        let gateway = RecordingGateway::default();

        let (first, created) =
            ensure_board_lead_agent(&db, &gateway, &board, None, None, None).unwrap();
        assert!(created);
        assert_eq!(first.status, AgentStatus::Provisioning);
        assert!(first.is_board_lead);
        assert_eq!(
            first.openclaw_session_id.as_deref(),
            Some(lead_session_key(board.id).as_str())
        );

        let (second, created_again) =
            ensure_board_lead_agent(&db, &gateway, &board, None, None, None).unwrap();
        assert!(!created_again);
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn reconciles_name_on_reuse() {
        let (db, board) = setup();
        let gateway = RecordingGateway::default();

        let (first, _) =
            ensure_board_lead_agent(&db, &gateway, &board, None, None, None).unwrap();
        assert_eq!(first.name, "Lead Agent");

        let (renamed, created) =
            ensure_board_lead_agent(&db, &gateway, &board, None, Some("Ava"), None).unwrap();
        assert!(!created);
        assert_eq!(renamed.id, first.id);
        assert_eq!(renamed.name, "Ava");
    }

    #[test]
    fn gateway_failure_keeps_committed_row_and_flags_sync() {
        let (db, board) = setup();

        let (agent, created) =
            ensure_board_lead_agent(&db, &FailingGateway, &board, None, None, None).unwrap();
        assert!(created);
        assert!(agent.pending_sync);
        assert_eq!(agent.status, AgentStatus::Provisioning);

        // The row survived the failure and is found on the next call.
        let (again, created_again) =
            ensure_board_lead_agent(&db, &FailingGateway, &board, None, None, None).unwrap();
        assert!(!created_again);
        assert_eq!(again.id, agent.id);
    }

    #[test]
    fn sync_clears_pending_flag_when_gateway_recovers() {
        let (db, board) = setup();
        let (agent, _) =
            ensure_board_lead_agent(&db, &FailingGateway, &board, None, None, None).unwrap();
        assert!(agent.pending_sync);

        let reconciled = sync_pending_agents(&db, |_agent| {
            Some(Box::new(RecordingGateway::default()) as Box<dyn GatewayTransport>)
        })
        .unwrap();
        assert_eq!(reconciled, 1);
        let fresh = db.get_agent(agent.id).unwrap().unwrap();
        assert!(!fresh.pending_sync);
    }

    #[test]
    fn identity_overrides_keep_only_nonblank_values() {
        let overrides = HashMap::from([
            ("role".to_string(), "  Coordinator  ".to_string()),
            ("emoji".to_string(), "   ".to_string()),
            ("verbosity".to_string(), "concise".to_string()),
        ]);
        let profile = merge_identity_profile(Some(&overrides));
        assert_eq!(profile.get("role").map(String::as_str), Some("Coordinator"));
        assert_eq!(profile.get("emoji").map(String::as_str), Some(":gear:"));
        assert_eq!(profile.get("verbosity").map(String::as_str), Some("concise"));
        assert_eq!(
            profile.get("communication_style").map(String::as_str),
            Some("direct, concise, practical")
        );
    }

    #[test]
    fn heartbeat_default_parses_as_schedule() {
        let config = default_heartbeat_config();
        let every = config.get("every").and_then(|v| v.as_str()).unwrap();
        assert_eq!(crate::durations::parse_every_to_seconds(every).unwrap(), 600);
    }
}
