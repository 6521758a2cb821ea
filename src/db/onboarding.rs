//! Board onboarding session persistence.

use super::{Database, now_ms};
use crate::error::ApiError;
use crate::types::{BoardOnboardingSession, OnboardingMessage, OnboardingStatus};
use anyhow::{Result, anyhow};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

type OnboardingRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    i64,
);

const ONBOARDING_COLUMNS: &str =
    "id, board_id, session_key, status, messages, draft_goal, created_at, updated_at";

fn onboarding_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OnboardingRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn onboarding_from_row(parts: OnboardingRow) -> Result<BoardOnboardingSession> {
    let (id, board_id, session_key, status, messages, draft_goal, created_at, updated_at) = parts;
    Ok(BoardOnboardingSession {
        id: Uuid::parse_str(&id)?,
        board_id: Uuid::parse_str(&board_id)?,
        session_key,
        status: OnboardingStatus::from_str(&status)
            .ok_or_else(|| anyhow!("unknown onboarding status: {status}"))?,
        messages: messages
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default(),
        draft_goal: draft_goal.as_deref().map(serde_json::from_str).transpose()?,
        created_at,
        updated_at,
    })
}

impl Database {
    /// Create an onboarding session in `active` status.
    pub fn create_onboarding_session(
        &self,
        board_id: Uuid,
        session_key: &str,
        initial_message: OnboardingMessage,
    ) -> Result<BoardOnboardingSession> {
        let session = BoardOnboardingSession {
            id: Uuid::now_v7(),
            board_id,
            session_key: session_key.to_string(),
            status: OnboardingStatus::Active,
            messages: vec![initial_message],
            draft_goal: None,
            created_at: now_ms(),
            updated_at: now_ms(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO board_onboarding_sessions
                 (id, board_id, session_key, status, messages, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session.id.to_string(),
                    session.board_id.to_string(),
                    session.session_key,
                    session.status.as_str(),
                    serde_json::to_string(&session.messages)?,
                    session.created_at,
                    session.updated_at
                ],
            )?;
            Ok(())
        })?;
        Ok(session)
    }

    /// The most recently updated onboarding session for a board.
    pub fn latest_onboarding_session(
        &self,
        board_id: Uuid,
    ) -> Result<Option<BoardOnboardingSession>> {
        self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    &format!(
                        "SELECT {ONBOARDING_COLUMNS} FROM board_onboarding_sessions
                         WHERE board_id = ?1 ORDER BY updated_at DESC LIMIT 1"
                    ),
                    params![board_id.to_string()],
                    onboarding_row,
                )
                .optional()?;
            parts.map(onboarding_from_row).transpose()
        })
    }

    /// The board's onboarding session still in `active` status, if any.
    pub fn active_onboarding_session(
        &self,
        board_id: Uuid,
    ) -> Result<Option<BoardOnboardingSession>> {
        self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    &format!(
                        "SELECT {ONBOARDING_COLUMNS} FROM board_onboarding_sessions
                         WHERE board_id = ?1 AND status = 'active'
                         ORDER BY updated_at DESC LIMIT 1"
                    ),
                    params![board_id.to_string()],
                    onboarding_row,
                )
                .optional()?;
            parts.map(onboarding_from_row).transpose()
        })
    }

    /// Append a transcript message without changing status.
    pub fn append_onboarding_message(
        &self,
        session_id: Uuid,
        message: OnboardingMessage,
    ) -> Result<BoardOnboardingSession> {
        let mut session = self
            .get_onboarding_session(session_id)?
            .ok_or_else(|| anyhow!(ApiError::not_found("Onboarding session")))?;
        session.messages.push(message);
        session.updated_at = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE board_onboarding_sessions
                 SET messages = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    serde_json::to_string(&session.messages)?,
                    session.updated_at,
                    session.id.to_string()
                ],
            )?;
            Ok(())
        })?;
        Ok(session)
    }

    /// Get an onboarding session by id.
    pub fn get_onboarding_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<BoardOnboardingSession>> {
        self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    &format!(
                        "SELECT {ONBOARDING_COLUMNS} FROM board_onboarding_sessions
                         WHERE id = ?1"
                    ),
                    params![session_id.to_string()],
                    onboarding_row,
                )
                .optional()?;
            parts.map(onboarding_from_row).transpose()
        })
    }

    /// Advance an onboarding session's status, optionally storing the drafted
    /// goal payload and appending a transcript message.
    ///
    /// The lifecycle is monotonic (`active -> completed -> confirmed`);
    /// moving backwards, or re-entering the current status, is a conflict.
    pub fn advance_onboarding_session(
        &self,
        session_id: Uuid,
        next: OnboardingStatus,
        draft_goal: Option<serde_json::Value>,
        message: Option<OnboardingMessage>,
    ) -> Result<BoardOnboardingSession> {
        let mut session = self
            .get_onboarding_session(session_id)?
            .ok_or_else(|| anyhow!(ApiError::not_found("Onboarding session")))?;

        if next.rank() <= session.status.rank() {
            return Err(anyhow!(ApiError::conflict(format!(
                "Onboarding session cannot move from {} to {}",
                session.status.as_str(),
                next.as_str()
            ))));
        }

        session.status = next;
        if let Some(draft) = draft_goal {
            session.draft_goal = Some(draft);
        }
        if let Some(message) = message {
            session.messages.push(message);
        }
        session.updated_at = now_ms();

        self.with_conn(|conn| {
            conn.execute(
                "UPDATE board_onboarding_sessions
                 SET status = ?1, messages = ?2, draft_goal = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    session.status.as_str(),
                    serde_json::to_string(&session.messages)?,
                    session
                        .draft_goal
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    session.updated_at,
                    session.id.to_string()
                ],
            )?;
            Ok(())
        })?;
        Ok(session)
    }
}
