//! Agent CRUD, lead-agent lookup, and token authentication.

use super::{Database, now_ms};
use crate::error::ApiError;
use crate::tokens::verify_agent_token;
use crate::types::{Agent, AgentStatus};
use anyhow::{Result, anyhow};
use rusqlite::{OptionalExtension, params};
use std::collections::HashMap;
use uuid::Uuid;

type AgentRow = (
    String,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<String>,
    Option<i64>,
    bool,
    bool,
    i64,
    i64,
);

const AGENT_COLUMNS: &str = "id, board_id, name, status, openclaw_session_id, agent_token_hash,
     heartbeat_config, identity_profile, provision_requested_at,
     provision_action, last_seen_at, is_board_lead, pending_sync,
     created_at, updated_at";

fn agent_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
    ))
}

fn agent_from_row(parts: AgentRow) -> Result<Agent> {
    let (
        id,
        board_id,
        name,
        status,
        openclaw_session_id,
        agent_token_hash,
        heartbeat_config,
        identity_profile,
        provision_requested_at,
        provision_action,
        last_seen_at,
        is_board_lead,
        pending_sync,
        created_at,
        updated_at,
    ) = parts;
    Ok(Agent {
        id: Uuid::parse_str(&id)?,
        board_id: board_id.as_deref().map(Uuid::parse_str).transpose()?,
        name,
        status: AgentStatus::from_str(&status)
            .ok_or_else(|| anyhow!("unknown agent status: {status}"))?,
        openclaw_session_id,
        agent_token_hash,
        heartbeat_config: heartbeat_config
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        identity_profile: identity_profile
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        provision_requested_at,
        provision_action,
        last_seen_at,
        is_board_lead,
        pending_sync,
        created_at,
        updated_at,
    })
}

/// Fields required to insert a new agent row.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub board_id: Option<Uuid>,
    pub name: String,
    pub status: AgentStatus,
    pub openclaw_session_id: Option<String>,
    pub agent_token_hash: Option<String>,
    pub heartbeat_config: Option<serde_json::Value>,
    pub identity_profile: Option<HashMap<String, String>>,
    pub provision_action: Option<String>,
    pub is_board_lead: bool,
}

impl Database {
    /// Insert a new agent row.
    ///
    /// Violating the one-lead-per-board index surfaces as a conflict.
    pub fn create_agent(&self, new: NewAgent) -> Result<Agent> {
        let agent = Agent {
            id: Uuid::now_v7(),
            board_id: new.board_id,
            name: new.name,
            status: new.status,
            openclaw_session_id: new.openclaw_session_id,
            agent_token_hash: new.agent_token_hash,
            heartbeat_config: new.heartbeat_config,
            identity_profile: new.identity_profile,
            provision_requested_at: Some(now_ms()),
            provision_action: new.provision_action,
            last_seen_at: None,
            is_board_lead: new.is_board_lead,
            pending_sync: false,
            created_at: now_ms(),
            updated_at: now_ms(),
        };

        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO agents
                 (id, board_id, name, status, openclaw_session_id,
                  agent_token_hash, heartbeat_config, identity_profile,
                  provision_requested_at, provision_action, last_seen_at,
                  is_board_lead, pending_sync, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    agent.id.to_string(),
                    agent.board_id.map(|id| id.to_string()),
                    agent.name,
                    agent.status.as_str(),
                    agent.openclaw_session_id,
                    agent.agent_token_hash,
                    agent
                        .heartbeat_config
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    agent
                        .identity_profile
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    agent.provision_requested_at,
                    agent.provision_action,
                    agent.last_seen_at,
                    agent.is_board_lead,
                    agent.pending_sync,
                    agent.created_at,
                    agent.updated_at
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(anyhow!(ApiError::conflict(
                        "Board already has a lead agent"
                    )))
                }
                Err(e) => Err(e.into()),
            }
        })?;
        Ok(agent)
    }

    /// Get an agent by id.
    pub fn get_agent(&self, agent_id: Uuid) -> Result<Option<Agent>> {
        self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
                    params![agent_id.to_string()],
                    agent_row,
                )
                .optional()?;
            parts.map(agent_from_row).transpose()
        })
    }

    /// List agents on a board, leads first.
    pub fn list_board_agents(&self, board_id: Uuid) -> Result<Vec<Agent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents
                 WHERE board_id = ?1
                 ORDER BY is_board_lead DESC, created_at ASC"
            ))?;
            let rows = stmt
                .query_map(params![board_id.to_string()], agent_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(agent_from_row).collect()
        })
    }

    /// The board's lead agent, if one exists.
    ///
    /// The storage layer enforces at most one; first-match ordering keeps
    /// databases migrated from before the index behaving predictably.
    pub fn find_board_lead(&self, board_id: Uuid) -> Result<Option<Agent>> {
        self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    &format!(
                        "SELECT {AGENT_COLUMNS} FROM agents
                         WHERE board_id = ?1 AND is_board_lead = 1
                         ORDER BY created_at ASC LIMIT 1"
                    ),
                    params![board_id.to_string()],
                    agent_row,
                )
                .optional()?;
            parts.map(agent_from_row).transpose()
        })
    }

    /// Reconcile the mutable lead fields; persists only when something
    /// actually changed. Returns the fresh row.
    pub fn reconcile_lead_fields(
        &self,
        agent_id: Uuid,
        name: Option<&str>,
        openclaw_session_id: Option<&str>,
    ) -> Result<Agent> {
        let agent = self
            .get_agent(agent_id)?
            .ok_or_else(|| anyhow!(ApiError::not_found("Agent")))?;

        let mut changed = false;
        let mut next_name = agent.name.clone();
        if let Some(name) = name
            && agent.name != name
        {
            next_name = name.to_string();
            changed = true;
        }
        let mut next_session = agent.openclaw_session_id.clone();
        if agent.openclaw_session_id.is_none()
            && let Some(session_id) = openclaw_session_id
        {
            next_session = Some(session_id.to_string());
            changed = true;
        }

        if !changed {
            return Ok(agent);
        }

        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE agents SET name = ?1, openclaw_session_id = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![next_name, next_session, now, agent_id.to_string()],
            )?;
            Ok(())
        })?;
        Ok(Agent {
            name: next_name,
            openclaw_session_id: next_session,
            updated_at: now,
            ..agent
        })
    }

    /// Update an agent's lifecycle status.
    pub fn set_agent_status(&self, agent_id: Uuid, status: AgentStatus) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE agents SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now_ms(), agent_id.to_string()],
            )?;
            if updated == 0 {
                return Err(anyhow!(ApiError::not_found("Agent")));
            }
            Ok(())
        })
    }

    /// Flag or clear the pending-sync marker after a gateway call.
    pub fn set_agent_pending_sync(&self, agent_id: Uuid, pending: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE agents SET pending_sync = ?1, updated_at = ?2 WHERE id = ?3",
                params![pending, now_ms(), agent_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Agents still owed a remote workspace by a failed best-effort call.
    pub fn list_pending_sync_agents(&self) -> Result<Vec<Agent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents
                 WHERE pending_sync = 1 ORDER BY updated_at ASC"
            ))?;
            let rows = stmt
                .query_map([], agent_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(agent_from_row).collect()
        })
    }

    /// Authenticate a presented `X-Agent-Token` value.
    ///
    /// Verification recomputes the salted digest per candidate, so the scan
    /// is bounded to rows that actually hold a credential. A match touches
    /// `last_seen_at`.
    pub fn authenticate_agent_token(&self, token: &str) -> Result<Option<Agent>> {
        let candidates = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents
                 WHERE agent_token_hash IS NOT NULL"
            ))?;
            let rows = stmt
                .query_map([], agent_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(agent_from_row).collect::<Result<Vec<_>>>()
        })?;

        for agent in candidates {
            let Some(hash) = agent.agent_token_hash.as_deref() else {
                continue;
            };
            if verify_agent_token(token, hash) {
                let now = now_ms();
                self.with_conn(|conn| {
                    conn.execute(
                        "UPDATE agents SET last_seen_at = ?1 WHERE id = ?2",
                        params![now, agent.id.to_string()],
                    )?;
                    Ok(())
                })?;
                return Ok(Some(Agent {
                    last_seen_at: Some(now),
                    ..agent
                }));
            }
        }
        Ok(None)
    }

    /// Replace an agent's credential digest (token rotation).
    pub fn set_agent_token_hash(&self, agent_id: Uuid, token_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE agents SET agent_token_hash = ?1, updated_at = ?2 WHERE id = ?3",
                params![token_hash, now_ms(), agent_id.to_string()],
            )?;
            if updated == 0 {
                return Err(anyhow!(ApiError::not_found("Agent")));
            }
            Ok(())
        })
    }
}
