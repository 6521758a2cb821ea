//! User rows keyed by the identity provider's subject claim.

use super::{Database, now_ms};
use crate::types::User;
use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

type UserRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    bool,
    Option<String>,
    i64,
    i64,
);

const USER_COLUMNS: &str = "id, subject, email, name, preferred_name, pronouns, timezone, notes,
     context, is_super_admin, active_organization_id, created_at, updated_at";

fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
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
    ))
}

fn user_from_row(parts: UserRow) -> Result<User> {
    let (
        id,
        subject,
        email,
        name,
        preferred_name,
        pronouns,
        timezone,
        notes,
        context,
        is_super_admin,
        active_organization_id,
        created_at,
        updated_at,
    ) = parts;
    Ok(User {
        id: Uuid::parse_str(&id)?,
        subject,
        email,
        name,
        preferred_name,
        pronouns,
        timezone,
        notes,
        context,
        is_super_admin,
        active_organization_id: active_organization_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()?,
        created_at,
        updated_at,
    })
}

/// Profile fields drafted during onboarding and applied at confirm time.
#[derive(Debug, Clone, Default)]
pub struct UserProfilePatch {
    pub preferred_name: Option<String>,
    pub pronouns: Option<String>,
    pub timezone: Option<String>,
    pub notes: Option<String>,
    pub context: Option<String>,
}

impl UserProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.preferred_name.is_none()
            && self.pronouns.is_none()
            && self.timezone.is_none()
            && self.notes.is_none()
            && self.context.is_none()
    }
}

impl Database {
    /// Find a user by the identity provider subject, creating one on first
    /// sight with claims-derived defaults. Returns `(user, created)`.
    pub fn get_or_create_user(
        &self,
        subject: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<(User, bool)> {
        if let Some(user) = self.get_user_by_subject(subject)? {
            return Ok((user, false));
        }

        let user = User {
            id: Uuid::now_v7(),
            subject: subject.to_string(),
            email: email.map(str::to_string),
            name: name.map(str::to_string),
            preferred_name: None,
            pronouns: None,
            timezone: None,
            notes: None,
            context: None,
            is_super_admin: false,
            active_organization_id: None,
            created_at: now_ms(),
            updated_at: now_ms(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users
                 (id, subject, email, name, is_super_admin, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
                params![
                    user.id.to_string(),
                    user.subject,
                    user.email,
                    user.name,
                    user.created_at,
                    user.updated_at
                ],
            )?;
            Ok(())
        })?;
        Ok((user, true))
    }

    /// Get a user by identity-provider subject.
    pub fn get_user_by_subject(&self, subject: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE subject = ?1"),
                    params![subject],
                    user_row,
                )
                .optional()?;
            parts.map(user_from_row).transpose()
        })
    }

    /// Get a user by id.
    pub fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    params![user_id.to_string()],
                    user_row,
                )
                .optional()?;
            parts.map(user_from_row).transpose()
        })
    }

    /// Apply drafted profile fields onto a user; no-op for an empty patch.
    pub fn apply_user_profile(&self, user_id: Uuid, patch: &UserProfilePatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET
                 preferred_name = COALESCE(?1, preferred_name),
                 pronouns = COALESCE(?2, pronouns),
                 timezone = COALESCE(?3, timezone),
                 notes = COALESCE(?4, notes),
                 context = COALESCE(?5, context),
                 updated_at = ?6
                 WHERE id = ?7",
                params![
                    patch.preferred_name,
                    patch.pronouns,
                    patch.timezone,
                    patch.notes,
                    patch.context,
                    now_ms(),
                    user_id.to_string()
                ],
            )?;
            Ok(())
        })
    }

    /// Set the user's active organization.
    pub fn set_active_organization(&self, user_id: Uuid, org_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET active_organization_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![org_id.to_string(), now_ms(), user_id.to_string()],
            )?;
            Ok(())
        })
    }
}
