//! Task, dependency, approval, and activity-event operations.

use super::{Database, now_ms};
use crate::error::ApiError;
use crate::policy::task_fingerprint;
use crate::types::{
    ActivityEvent, AgentStatus, Approval, Task, TaskDependency, TASK_PRIORITIES, TASK_STATUSES,
};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use uuid::Uuid;

type TaskRow = (
    String,
    Option<String>,
    String,
    Option<String>,
    String,
    String,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<String>,
    bool,
    Option<String>,
    i64,
    i64,
);

const TASK_COLUMNS: &str = "id, board_id, title, description, status, priority, due_at,
     in_progress_at, created_by_user_id, assigned_agent_id, auto_created,
     auto_reason, created_at, updated_at";

fn task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
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

fn task_from_row(parts: TaskRow) -> Result<Task> {
    let (
        id,
        board_id,
        title,
        description,
        status,
        priority,
        due_at,
        in_progress_at,
        created_by_user_id,
        assigned_agent_id,
        auto_created,
        auto_reason,
        created_at,
        updated_at,
    ) = parts;
    Ok(Task {
        id: Uuid::parse_str(&id)?,
        board_id: board_id.as_deref().map(Uuid::parse_str).transpose()?,
        title,
        description,
        status,
        priority,
        due_at,
        in_progress_at,
        created_by_user_id: created_by_user_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()?,
        assigned_agent_id: assigned_agent_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()?,
        auto_created,
        auto_reason,
        created_at,
        updated_at,
    })
}

/// Insert an activity event inside the caller's transaction scope.
fn record_activity_conn(
    conn: &Connection,
    event_type: &str,
    message: Option<&str>,
    agent_id: Option<Uuid>,
    task_id: Option<Uuid>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO activity_events (id, event_type, message, agent_id, task_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            Uuid::now_v7().to_string(),
            event_type,
            message,
            agent_id.map(|id| id.to_string()),
            task_id.map(|id| id.to_string()),
            now_ms()
        ],
    )?;
    Ok(())
}

fn validate_status(status: &str) -> Result<()> {
    if TASK_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(anyhow!(ApiError::invalid_value("status", "Invalid status")))
    }
}

fn validate_priority(priority: &str) -> Result<()> {
    if TASK_PRIORITIES.contains(&priority) {
        Ok(())
    } else {
        Err(anyhow!(ApiError::invalid_value(
            "priority",
            "Invalid priority"
        )))
    }
}

/// Fields accepted when creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub board_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due_at: Option<i64>,
    pub created_by_user_id: Option<Uuid>,
    pub assigned_agent_id: Option<Uuid>,
    pub auto_created: bool,
    pub auto_reason: Option<String>,
}

/// Partial update for a task.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due_at: Option<Option<i64>>,
    pub assigned_agent_id: Option<Option<Uuid>>,
}

/// What changed in an update, for notification dispatch.
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub status: Option<(String, String)>,
    pub assigned_agent_id: Option<(Option<Uuid>, Option<Uuid>)>,
}

impl TaskChanges {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.assigned_agent_id.is_none()
    }
}

impl Database {
    /// Enforce that only provisioned, active agents can be assigned tasks.
    fn validate_task_assignee(&self, conn: &Connection, agent_id: Uuid) -> Result<()> {
        let found = conn
            .query_row(
                "SELECT status, openclaw_session_id FROM agents WHERE id = ?1",
                params![agent_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                },
            )
            .optional()?;
        let Some((status, session_id)) = found else {
            return Err(anyhow!(ApiError::invalid_value(
                "assigned_agent_id",
                "Assignee agent not found"
            )));
        };
        if AgentStatus::from_str(&status) != Some(AgentStatus::Active) {
            return Err(anyhow!(ApiError::invalid_value(
                "assigned_agent_id",
                "Cannot assign task to inactive agent"
            )));
        }
        if session_id.is_none() {
            return Err(anyhow!(ApiError::invalid_value(
                "assigned_agent_id",
                "Cannot assign task to unprovisioned agent"
            )));
        }
        Ok(())
    }

    /// Create a task, record its fingerprint and activity, one commit.
    pub fn create_task(&self, new: NewTask) -> Result<Task> {
        let title = new.title.trim().to_string();
        if title.is_empty() {
            return Err(anyhow!(ApiError::missing_field("title")));
        }
        let status = new.status.unwrap_or_else(|| "inbox".to_string());
        validate_status(&status)?;
        let priority = new.priority.unwrap_or_else(|| "medium".to_string());
        validate_priority(&priority)?;

        let task = Task {
            id: Uuid::now_v7(),
            board_id: new.board_id,
            title,
            description: new.description,
            status,
            priority,
            due_at: new.due_at,
            in_progress_at: None,
            created_by_user_id: new.created_by_user_id,
            assigned_agent_id: new.assigned_agent_id,
            auto_created: new.auto_created,
            auto_reason: new.auto_reason,
            created_at: now_ms(),
            updated_at: now_ms(),
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if let Some(agent_id) = task.assigned_agent_id {
                self.validate_task_assignee(&tx, agent_id)?;
            }
            tx.execute(
                "INSERT INTO tasks
                 (id, board_id, title, description, status, priority, due_at,
                  in_progress_at, created_by_user_id, assigned_agent_id,
                  auto_created, auto_reason, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    task.id.to_string(),
                    task.board_id.map(|id| id.to_string()),
                    task.title,
                    task.description,
                    task.status,
                    task.priority,
                    task.due_at,
                    task.in_progress_at,
                    task.created_by_user_id.map(|id| id.to_string()),
                    task.assigned_agent_id.map(|id| id.to_string()),
                    task.auto_created,
                    task.auto_reason,
                    task.created_at,
                    task.updated_at
                ],
            )?;
            if let Some(board_id) = task.board_id {
                let fingerprint =
                    task_fingerprint(&task.title, task.description.as_deref(), board_id);
                tx.execute(
                    "INSERT INTO task_fingerprints
                     (id, board_id, fingerprint_hash, task_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        Uuid::now_v7().to_string(),
                        board_id.to_string(),
                        fingerprint,
                        task.id.to_string(),
                        now_ms()
                    ],
                )?;
            }
            record_activity_conn(
                &tx,
                "task.created",
                Some(&format!("Task created: {}", task.title)),
                task.assigned_agent_id,
                Some(task.id),
            )?;
            tx.commit()?;
            Ok(())
        })?;
        Ok(task)
    }

    /// Whether a board already holds a task with this content fingerprint.
    pub fn has_task_fingerprint(&self, board_id: Uuid, fingerprint: &str) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT 1 FROM task_fingerprints
                     WHERE board_id = ?1 AND fingerprint_hash = ?2 LIMIT 1",
                    params![board_id.to_string(), fingerprint],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false))
        })
    }

    /// Get a task by id.
    pub fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                    params![task_id.to_string()],
                    task_row,
                )
                .optional()?;
            parts.map(task_from_row).transpose()
        })
    }

    /// List tasks on a board, newest first.
    pub fn list_tasks(&self, board_id: Uuid) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE board_id = ?1 ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map(params![board_id.to_string()], task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(task_from_row).collect()
        })
    }

    /// Apply a partial update; returns the task and what meaningfully changed.
    pub fn update_task(&self, task_id: Uuid, patch: TaskPatch) -> Result<(Task, TaskChanges)> {
        let mut task = self
            .get_task(task_id)?
            .ok_or_else(|| anyhow!(ApiError::not_found("Task")))?;
        let before_status = task.status.clone();
        let before_assignee = task.assigned_agent_id;

        if let Some(title) = patch.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(anyhow!(ApiError::missing_field("title")));
            }
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(status) = patch.status {
            validate_status(&status)?;
            if status == "in_progress" && task.status != "in_progress" {
                task.in_progress_at = Some(now_ms());
            }
            task.status = status;
        }
        if let Some(priority) = patch.priority {
            validate_priority(&priority)?;
            task.priority = priority;
        }
        if let Some(due_at) = patch.due_at {
            task.due_at = due_at;
        }
        if let Some(assigned_agent_id) = patch.assigned_agent_id {
            task.assigned_agent_id = assigned_agent_id;
        }
        task.updated_at = now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if let Some(agent_id) = task.assigned_agent_id
                && Some(agent_id) != before_assignee
            {
                self.validate_task_assignee(&tx, agent_id)?;
            }
            tx.execute(
                "UPDATE tasks SET title = ?1, description = ?2, status = ?3,
                 priority = ?4, due_at = ?5, in_progress_at = ?6,
                 assigned_agent_id = ?7, updated_at = ?8
                 WHERE id = ?9",
                params![
                    task.title,
                    task.description,
                    task.status,
                    task.priority,
                    task.due_at,
                    task.in_progress_at,
                    task.assigned_agent_id.map(|id| id.to_string()),
                    task.updated_at,
                    task.id.to_string()
                ],
            )?;
            record_activity_conn(
                &tx,
                "task.updated",
                Some(&format!("Task updated: {}", task.title)),
                task.assigned_agent_id,
                Some(task.id),
            )?;
            tx.commit()?;
            Ok(())
        })?;

        let mut changes = TaskChanges::default();
        if before_status != task.status {
            changes.status = Some((before_status, task.status.clone()));
        }
        if before_assignee != task.assigned_agent_id {
            changes.assigned_agent_id = Some((before_assignee, task.assigned_agent_id));
        }
        Ok((task, changes))
    }

    /// Delete a task along with its edges, fingerprints, and events.
    pub fn delete_task(&self, task_id: Uuid) -> Result<()> {
        if self.get_task(task_id)?.is_none() {
            return Err(anyhow!(ApiError::not_found("Task")));
        }
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let id = task_id.to_string();
            tx.execute(
                "DELETE FROM activity_events WHERE task_id = ?1",
                params![id],
            )?;
            tx.execute(
                "DELETE FROM task_dependencies
                 WHERE task_id = ?1 OR depends_on_task_id = ?1",
                params![id],
            )?;
            tx.execute(
                "DELETE FROM task_fingerprints WHERE task_id = ?1",
                params![id],
            )?;
            tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
            record_activity_conn(&tx, "task.deleted", None, None, None)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Add a dependency edge between two tasks on the same board.
    pub fn add_task_dependency(
        &self,
        board_id: Uuid,
        task_id: Uuid,
        depends_on_task_id: Uuid,
    ) -> Result<TaskDependency> {
        if task_id == depends_on_task_id {
            return Err(anyhow!(ApiError::invalid_value(
                "depends_on_task_id",
                "A task cannot depend on itself"
            )));
        }
        let dep = TaskDependency {
            id: Uuid::now_v7(),
            board_id,
            task_id,
            depends_on_task_id,
            created_at: now_ms(),
        };
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO task_dependencies
                 (id, board_id, task_id, depends_on_task_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    dep.id.to_string(),
                    dep.board_id.to_string(),
                    dep.task_id.to_string(),
                    dep.depends_on_task_id.to_string(),
                    dep.created_at
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(anyhow!(ApiError::conflict("Dependency already exists")))
                }
                Err(e) => Err(e.into()),
            }
        })?;
        Ok(dep)
    }

    /// List dependency edges for a board.
    pub fn list_task_dependencies(&self, board_id: Uuid) -> Result<Vec<TaskDependency>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, board_id, task_id, depends_on_task_id, created_at
                 FROM task_dependencies WHERE board_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map(params![board_id.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(id, board_id, task_id, depends_on, created_at)| {
                    Ok(TaskDependency {
                        id: Uuid::parse_str(&id)?,
                        board_id: Uuid::parse_str(&board_id)?,
                        task_id: Uuid::parse_str(&task_id)?,
                        depends_on_task_id: Uuid::parse_str(&depends_on)?,
                        created_at,
                    })
                })
                .collect()
        })
    }

    /// Record an approval request for a gated action.
    pub fn create_approval(
        &self,
        board_id: Uuid,
        task_id: Option<Uuid>,
        agent_id: Option<Uuid>,
        action_type: &str,
        payload: Option<serde_json::Value>,
        rubric_scores: Option<HashMap<String, i64>>,
    ) -> Result<Approval> {
        let confidence = rubric_scores
            .as_ref()
            .map(crate::policy::compute_confidence)
            .unwrap_or(0);
        let approval = Approval {
            id: Uuid::now_v7(),
            board_id,
            task_id,
            agent_id,
            action_type: action_type.to_string(),
            payload,
            confidence,
            rubric_scores,
            status: "pending".to_string(),
            created_at: now_ms(),
            resolved_at: None,
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO approvals
                 (id, board_id, task_id, agent_id, action_type, payload,
                  confidence, rubric_scores, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    approval.id.to_string(),
                    approval.board_id.to_string(),
                    approval.task_id.map(|id| id.to_string()),
                    approval.agent_id.map(|id| id.to_string()),
                    approval.action_type,
                    approval
                        .payload
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    approval.confidence,
                    approval
                        .rubric_scores
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    approval.status,
                    approval.created_at
                ],
            )?;
            Ok(())
        })?;
        Ok(approval)
    }

    /// Resolve a pending approval; resolving twice is a conflict.
    pub fn resolve_approval(&self, approval_id: Uuid, approve: bool) -> Result<()> {
        let status = if approve { "approved" } else { "rejected" };
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE approvals SET status = ?1, resolved_at = ?2
                 WHERE id = ?3 AND status = 'pending'",
                params![status, now_ms(), approval_id.to_string()],
            )?;
            if updated == 0 {
                let exists: bool = conn
                    .query_row(
                        "SELECT 1 FROM approvals WHERE id = ?1",
                        params![approval_id.to_string()],
                        |_| Ok(true),
                    )
                    .optional()?
                    .unwrap_or(false);
                if exists {
                    return Err(anyhow!(ApiError::conflict("Approval already resolved")));
                }
                return Err(anyhow!(ApiError::not_found("Approval")));
            }
            Ok(())
        })
    }

    /// Record a normalized activity event outside any larger transaction.
    pub fn record_activity(
        &self,
        event_type: &str,
        message: Option<&str>,
        agent_id: Option<Uuid>,
        task_id: Option<Uuid>,
    ) -> Result<()> {
        self.with_conn(|conn| record_activity_conn(conn, event_type, message, agent_id, task_id))
    }

    /// Recent activity for a task, newest first.
    pub fn list_task_activity(&self, task_id: Uuid, limit: i64) -> Result<Vec<ActivityEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, event_type, message, agent_id, task_id, created_at
                 FROM activity_events WHERE task_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![task_id.to_string(), limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(id, event_type, message, agent_id, task_id, created_at)| {
                    Ok(ActivityEvent {
                        id: Uuid::parse_str(&id)?,
                        event_type,
                        message,
                        agent_id: agent_id.as_deref().map(Uuid::parse_str).transpose()?,
                        task_id: task_id.as_deref().map(Uuid::parse_str).transpose()?,
                        created_at,
                    })
                })
                .collect()
        })
    }
}
