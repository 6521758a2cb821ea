//! Board, board-group, and board-memory operations.

use super::{Database, now_ms};
use crate::error::{ApiError, FieldError};
use crate::types::{Board, BoardGroup, BoardGroupMemory, BoardMemory, MemberRole};
use anyhow::{Result, anyhow};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

/// Fields accepted when creating or updating a board.
#[derive(Debug, Clone, Default)]
pub struct BoardPatch {
    pub name: Option<String>,
    pub gateway_id: Option<Option<Uuid>>,
    pub board_group_id: Option<Option<Uuid>>,
    pub board_type: Option<String>,
    pub objective: Option<Option<String>>,
    pub success_metrics: Option<Option<serde_json::Value>>,
    pub target_date: Option<Option<i64>>,
    pub goal_confirmed: Option<bool>,
    pub goal_source: Option<Option<String>>,
}

/// Validate a board's goal fields as a unit.
///
/// A confirmed goal board must carry both an objective and success metrics;
/// the error names every missing field so the caller can fix them in one
/// round trip.
pub fn validate_goal_fields(
    board_type: &str,
    goal_confirmed: bool,
    objective: Option<&str>,
    success_metrics: Option<&serde_json::Value>,
) -> Result<(), ApiError> {
    if board_type != "goal" && board_type != "general" {
        return Err(ApiError::invalid_value(
            "board_type",
            "must be \"goal\" or \"general\"",
        ));
    }
    if board_type != "goal" || !goal_confirmed {
        return Ok(());
    }

    let mut missing = Vec::new();
    if objective.map_or(true, |o| o.trim().is_empty()) {
        missing.push(FieldError::new(
            "objective",
            "is required when a goal board is confirmed",
        ));
    }
    let metrics_empty = match success_metrics {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    };
    if metrics_empty {
        missing.push(FieldError::new(
            "success_metrics",
            "is required when a goal board is confirmed",
        ));
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation(missing))
    }
}

/// Build a URL-safe slug from a display name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut prev_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            slug.push('-');
            prev_dash = true;
        }
    }
    let trimmed = slug.trim_end_matches('-');
    if trimmed.is_empty() {
        Uuid::new_v4().simple().to_string()
    } else {
        trimmed.to_string()
    }
}

type BoardRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    bool,
    Option<String>,
    i64,
    i64,
);

const BOARD_COLUMNS: &str = "id, organization_id, name, slug, gateway_id, board_group_id,
     board_type, objective, success_metrics, target_date, goal_confirmed,
     goal_source, created_at, updated_at";

fn board_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BoardRow> {
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
    ))
}

fn board_from_row(parts: BoardRow) -> Result<Board> {
    let (
        id,
        organization_id,
        name,
        slug,
        gateway_id,
        board_group_id,
        board_type,
        objective,
        success_metrics,
        target_date,
        goal_confirmed,
        goal_source,
        created_at,
        updated_at,
    ) = parts;
    Ok(Board {
        id: Uuid::parse_str(&id)?,
        organization_id: Uuid::parse_str(&organization_id)?,
        name,
        slug,
        gateway_id: gateway_id.as_deref().map(Uuid::parse_str).transpose()?,
        board_group_id: board_group_id.as_deref().map(Uuid::parse_str).transpose()?,
        board_type,
        objective,
        success_metrics: success_metrics
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        target_date,
        goal_confirmed,
        goal_source,
        created_at,
        updated_at,
    })
}

impl Database {
    /// Create a board in an organization.
    pub fn create_board(&self, org_id: Uuid, patch: BoardPatch) -> Result<Board> {
        let name = patch
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| anyhow!(ApiError::missing_field("name")))?
            .to_string();
        let board_type = patch.board_type.unwrap_or_else(|| "goal".to_string());
        let goal_confirmed = patch.goal_confirmed.unwrap_or(false);
        let objective = patch.objective.flatten();
        let success_metrics = patch.success_metrics.flatten();
        validate_goal_fields(
            &board_type,
            goal_confirmed,
            objective.as_deref(),
            success_metrics.as_ref(),
        )
        .map_err(anyhow::Error::from)?;

        let board = Board {
            id: Uuid::now_v7(),
            organization_id: org_id,
            slug: slugify(&name),
            name,
            gateway_id: patch.gateway_id.flatten(),
            board_group_id: patch.board_group_id.flatten(),
            board_type,
            objective,
            success_metrics,
            target_date: patch.target_date.flatten(),
            goal_confirmed,
            goal_source: patch.goal_source.flatten(),
            created_at: now_ms(),
            updated_at: now_ms(),
        };

        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO boards
                 (id, organization_id, name, slug, gateway_id, board_group_id,
                  board_type, objective, success_metrics, target_date,
                  goal_confirmed, goal_source, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    board.id.to_string(),
                    board.organization_id.to_string(),
                    board.name,
                    board.slug,
                    board.gateway_id.map(|id| id.to_string()),
                    board.board_group_id.map(|id| id.to_string()),
                    board.board_type,
                    board.objective,
                    board
                        .success_metrics
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    board.target_date,
                    board.goal_confirmed,
                    board.goal_source,
                    board.created_at,
                    board.updated_at
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(anyhow!(ApiError::conflict(
                        "Board slug already exists in this organization"
                    )))
                }
                Err(e) => Err(e.into()),
            }
        })?;
        Ok(board)
    }

    /// Get a board by id.
    pub fn get_board(&self, board_id: Uuid) -> Result<Option<Board>> {
        self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    &format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = ?1"),
                    params![board_id.to_string()],
                    board_row,
                )
                .optional()?;
            parts.map(board_from_row).transpose()
        })
    }

    /// List boards in an organization, newest first.
    pub fn list_boards(&self, org_id: Uuid) -> Result<Vec<Board>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BOARD_COLUMNS} FROM boards
                 WHERE organization_id = ?1 ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map(params![org_id.to_string()], board_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(board_from_row).collect()
        })
    }

    /// Apply a partial update to a board, revalidating goal fields on the
    /// merged result.
    pub fn update_board(&self, board_id: Uuid, patch: BoardPatch) -> Result<Board> {
        let mut board = self
            .get_board(board_id)?
            .ok_or_else(|| anyhow!(ApiError::not_found("Board")))?;

        if let Some(name) = patch.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(anyhow!(ApiError::missing_field("name")));
            }
            board.name = name;
        }
        if let Some(gateway_id) = patch.gateway_id {
            board.gateway_id = gateway_id;
        }
        if let Some(board_group_id) = patch.board_group_id {
            board.board_group_id = board_group_id;
        }
        if let Some(board_type) = patch.board_type {
            board.board_type = board_type;
        }
        if let Some(objective) = patch.objective {
            board.objective = objective;
        }
        if let Some(success_metrics) = patch.success_metrics {
            board.success_metrics = success_metrics;
        }
        if let Some(target_date) = patch.target_date {
            board.target_date = target_date;
        }
        if let Some(goal_confirmed) = patch.goal_confirmed {
            board.goal_confirmed = goal_confirmed;
        }
        if let Some(goal_source) = patch.goal_source {
            board.goal_source = goal_source;
        }

        validate_goal_fields(
            &board.board_type,
            board.goal_confirmed,
            board.objective.as_deref(),
            board.success_metrics.as_ref(),
        )
        .map_err(anyhow::Error::from)?;
        board.updated_at = now_ms();

        self.with_conn(|conn| {
            conn.execute(
                "UPDATE boards SET name = ?1, gateway_id = ?2, board_group_id = ?3,
                 board_type = ?4, objective = ?5, success_metrics = ?6,
                 target_date = ?7, goal_confirmed = ?8, goal_source = ?9,
                 updated_at = ?10
                 WHERE id = ?11",
                params![
                    board.name,
                    board.gateway_id.map(|id| id.to_string()),
                    board.board_group_id.map(|id| id.to_string()),
                    board.board_type,
                    board.objective,
                    board
                        .success_metrics
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    board.target_date,
                    board.goal_confirmed,
                    board.goal_source,
                    board.updated_at,
                    board.id.to_string()
                ],
            )?;
            Ok(())
        })?;
        Ok(board)
    }

    /// Delete a board and the access-grant rows that reference it.
    ///
    /// A narrower slice than the organization cascade: access rows first,
    /// then the board row, one commit. Returns the tables touched in order.
    pub fn delete_board(&self, board_id: Uuid) -> Result<Vec<&'static str>> {
        if self.get_board(board_id)?.is_none() {
            return Err(anyhow!(ApiError::not_found("Board")));
        }
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let id = board_id.to_string();
            tx.execute(
                "DELETE FROM organization_board_access WHERE board_id = ?1",
                params![id],
            )?;
            tx.execute(
                "DELETE FROM organization_invite_board_access WHERE board_id = ?1",
                params![id],
            )?;
            tx.execute("DELETE FROM boards WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(vec![
                "organization_board_access",
                "organization_invite_board_access",
                "boards",
            ])
        })
    }

    /// Create a board group in an organization.
    pub fn create_board_group(
        &self,
        org_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<BoardGroup> {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!(ApiError::missing_field("name")));
        }
        let group = BoardGroup {
            id: Uuid::now_v7(),
            organization_id: org_id,
            name: name.to_string(),
            slug: slugify(name),
            description: description.map(str::to_string),
            created_at: now_ms(),
            updated_at: now_ms(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO board_groups
                 (id, organization_id, name, slug, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    group.id.to_string(),
                    group.organization_id.to_string(),
                    group.name,
                    group.slug,
                    group.description,
                    group.created_at,
                    group.updated_at
                ],
            )?;
            Ok(())
        })?;
        Ok(group)
    }

    /// Get a board group by id.
    pub fn get_board_group(&self, group_id: Uuid) -> Result<Option<BoardGroup>> {
        self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    "SELECT id, organization_id, name, slug, description,
                            created_at, updated_at
                     FROM board_groups WHERE id = ?1",
                    params![group_id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, i64>(5)?,
                            row.get::<_, i64>(6)?,
                        ))
                    },
                )
                .optional()?;
            parts
                .map(|(id, org_id, name, slug, description, created_at, updated_at)| {
                    Ok(BoardGroup {
                        id: Uuid::parse_str(&id)?,
                        organization_id: Uuid::parse_str(&org_id)?,
                        name,
                        slug,
                        description,
                        created_at,
                        updated_at,
                    })
                })
                .transpose()
        })
    }

    /// Delete a board group: boards under it, then group memory, then the
    /// group row itself, one commit.
    pub fn delete_board_group(&self, group_id: Uuid) -> Result<Vec<&'static str>> {
        if self.get_board_group(group_id)?.is_none() {
            return Err(anyhow!(ApiError::not_found("Board group")));
        }
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let id = group_id.to_string();
            tx.execute("DELETE FROM boards WHERE board_group_id = ?1", params![id])?;
            tx.execute(
                "DELETE FROM board_group_memory WHERE board_group_id = ?1",
                params![id],
            )?;
            tx.execute("DELETE FROM board_groups WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(vec!["boards", "board_group_memory", "board_groups"])
        })
    }

    /// Append a memory item to a board.
    pub fn add_board_memory(
        &self,
        board_id: Uuid,
        content: &str,
        tags: Option<Vec<String>>,
        is_chat: bool,
        source: Option<&str>,
    ) -> Result<BoardMemory> {
        let memory = BoardMemory {
            id: Uuid::now_v7(),
            board_id,
            content: content.to_string(),
            tags,
            is_chat,
            source: source.map(str::to_string),
            created_at: now_ms(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO board_memory
                 (id, board_id, content, tags, is_chat, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    memory.id.to_string(),
                    memory.board_id.to_string(),
                    memory.content,
                    memory
                        .tags
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    memory.is_chat,
                    memory.source,
                    memory.created_at
                ],
            )?;
            Ok(())
        })?;
        Ok(memory)
    }

    /// List board memory, newest first.
    pub fn list_board_memory(&self, board_id: Uuid) -> Result<Vec<BoardMemory>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, board_id, content, tags, is_chat, source, created_at
                 FROM board_memory WHERE board_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map(params![board_id.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(id, board_id, content, tags, is_chat, source, created_at)| {
                    Ok(BoardMemory {
                        id: Uuid::parse_str(&id)?,
                        board_id: Uuid::parse_str(&board_id)?,
                        content,
                        tags: tags.as_deref().map(serde_json::from_str).transpose()?,
                        is_chat,
                        source,
                        created_at,
                    })
                })
                .collect()
        })
    }

    /// Append a memory item to a board group.
    pub fn add_board_group_memory(
        &self,
        group_id: Uuid,
        content: &str,
        tags: Option<Vec<String>>,
        is_chat: bool,
        source: Option<&str>,
    ) -> Result<BoardGroupMemory> {
        let memory = BoardGroupMemory {
            id: Uuid::now_v7(),
            board_group_id: group_id,
            content: content.to_string(),
            tags,
            is_chat,
            source: source.map(str::to_string),
            created_at: now_ms(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO board_group_memory
                 (id, board_group_id, content, tags, is_chat, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    memory.id.to_string(),
                    memory.board_group_id.to_string(),
                    memory.content,
                    memory
                        .tags
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    memory.is_chat,
                    memory.source,
                    memory.created_at
                ],
            )?;
            Ok(())
        })?;
        Ok(memory)
    }

    /// Whether a member can read a board (owners/admins always can).
    pub fn member_can_read_board(&self, member_id: Uuid, role: MemberRole, board_id: Uuid) -> Result<bool> {
        if matches!(role, MemberRole::Owner | MemberRole::Admin) {
            return Ok(true);
        }
        self.board_access(member_id, board_id)
            .map(|access| access.map(|(read, _)| read).unwrap_or(false))
    }

    /// Whether a member can write a board (owners/admins always can).
    pub fn member_can_write_board(&self, member_id: Uuid, role: MemberRole, board_id: Uuid) -> Result<bool> {
        if matches!(role, MemberRole::Owner | MemberRole::Admin) {
            return Ok(true);
        }
        self.board_access(member_id, board_id)
            .map(|access| access.map(|(_, write)| write).unwrap_or(false))
    }

    fn board_access(&self, member_id: Uuid, board_id: Uuid) -> Result<Option<(bool, bool)>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT can_read, can_write FROM organization_board_access
                     WHERE organization_member_id = ?1 AND board_id = ?2",
                    params![member_id.to_string(), board_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })
    }

    /// Grant (or update) a member's access to a board.
    pub fn grant_board_access(
        &self,
        member_id: Uuid,
        board_id: Uuid,
        can_read: bool,
        can_write: bool,
    ) -> Result<()> {
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO organization_board_access
                 (id, organization_member_id, board_id, can_read, can_write,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT (organization_member_id, board_id)
                 DO UPDATE SET can_read = ?4, can_write = ?5, updated_at = ?6",
                params![
                    Uuid::now_v7().to_string(),
                    member_id.to_string(),
                    board_id.to_string(),
                    can_read,
                    can_write,
                    now
                ],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_compacts_separators() {
        assert_eq!(slugify("Demo Board"), "demo-board");
        assert_eq!(slugify("  Q3 -- Launch!  "), "q3-launch");
        assert_eq!(slugify("Ops/Infra"), "ops-infra");
    }

    #[test]
    fn slugify_of_symbols_falls_back_to_random() {
        let slug = slugify("!!!");
        assert!(!slug.is_empty());
        assert!(slug.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn confirmed_goal_board_requires_both_fields() {
        let err = validate_goal_fields("goal", true, None, None).unwrap_err();
        let fields: Vec<&str> = err.fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["objective", "success_metrics"]);
    }

    #[test]
    fn unconfirmed_or_general_boards_skip_goal_checks() {
        assert!(validate_goal_fields("goal", false, None, None).is_ok());
        assert!(validate_goal_fields("general", true, None, None).is_ok());
    }

    #[test]
    fn confirmed_goal_board_with_both_fields_passes() {
        let metrics = serde_json::json!({"metric": "signups", "target": "1000"});
        assert!(validate_goal_fields("goal", true, Some("Grow signups"), Some(&metrics)).is_ok());
    }

    #[test]
    fn blank_objective_counts_as_missing() {
        let metrics = serde_json::json!({"metric": "signups"});
        let err = validate_goal_fields("goal", true, Some("   "), Some(&metrics)).unwrap_err();
        assert_eq!(err.fields.len(), 1);
        assert_eq!(err.fields[0].field, "objective");
    }
}
