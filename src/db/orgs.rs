//! Organization, membership, and invite operations, including the
//! hand-sequenced tenant deletion cascade.

use super::{Database, now_ms};
use crate::error::ApiError;
use crate::types::{MemberRole, Organization, OrganizationInvite, OrganizationMember};
use anyhow::{Result, anyhow};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

/// One step of the organization deletion cascade: the dependent table and the
/// delete statement that retires its rows, scoped by `?1` = organization id.
struct CascadeStep {
    table: &'static str,
    sql: &'static str,
}

const ORG_BOARDS: &str = "SELECT id FROM boards WHERE organization_id = ?1";

/// Leaves-first deletion order for everything an organization owns.
///
/// `activity_events` and the access-grant tables appear twice because they
/// each carry two independent foreign keys that need separate scoping. The
/// statement order is load-bearing: every table must be emptied before any
/// table it references. `delete_order_tests` walks the live schema's
/// foreign-key graph to prove the list stays complete as tables are added.
const ORG_CASCADE: &[CascadeStep] = &[
    CascadeStep {
        table: "activity_events",
        sql: "DELETE FROM activity_events WHERE agent_id IN
              (SELECT id FROM agents WHERE board_id IN
               (SELECT id FROM boards WHERE organization_id = ?1))",
    },
    CascadeStep {
        table: "activity_events",
        sql: "DELETE FROM activity_events WHERE task_id IN
              (SELECT id FROM tasks WHERE board_id IN
               (SELECT id FROM boards WHERE organization_id = ?1))",
    },
    CascadeStep {
        table: "task_dependencies",
        sql: "DELETE FROM task_dependencies WHERE board_id IN
              (SELECT id FROM boards WHERE organization_id = ?1)",
    },
    CascadeStep {
        table: "task_fingerprints",
        sql: "DELETE FROM task_fingerprints WHERE board_id IN
              (SELECT id FROM boards WHERE organization_id = ?1)",
    },
    CascadeStep {
        table: "approvals",
        sql: "DELETE FROM approvals WHERE board_id IN
              (SELECT id FROM boards WHERE organization_id = ?1)",
    },
    CascadeStep {
        table: "board_memory",
        sql: "DELETE FROM board_memory WHERE board_id IN
              (SELECT id FROM boards WHERE organization_id = ?1)",
    },
    CascadeStep {
        table: "board_onboarding_sessions",
        sql: "DELETE FROM board_onboarding_sessions WHERE board_id IN
              (SELECT id FROM boards WHERE organization_id = ?1)",
    },
    CascadeStep {
        table: "organization_board_access",
        sql: "DELETE FROM organization_board_access WHERE board_id IN
              (SELECT id FROM boards WHERE organization_id = ?1)",
    },
    CascadeStep {
        table: "organization_invite_board_access",
        sql: "DELETE FROM organization_invite_board_access WHERE board_id IN
              (SELECT id FROM boards WHERE organization_id = ?1)",
    },
    CascadeStep {
        table: "organization_board_access",
        sql: "DELETE FROM organization_board_access WHERE organization_member_id IN
              (SELECT id FROM organization_members WHERE organization_id = ?1)",
    },
    CascadeStep {
        table: "organization_invite_board_access",
        sql: "DELETE FROM organization_invite_board_access WHERE organization_invite_id IN
              (SELECT id FROM organization_invites WHERE organization_id = ?1)",
    },
    CascadeStep {
        table: "tasks",
        sql: "DELETE FROM tasks WHERE board_id IN
              (SELECT id FROM boards WHERE organization_id = ?1)",
    },
    CascadeStep {
        table: "agents",
        sql: "DELETE FROM agents WHERE board_id IN
              (SELECT id FROM boards WHERE organization_id = ?1)",
    },
    CascadeStep {
        table: "boards",
        sql: "DELETE FROM boards WHERE organization_id = ?1",
    },
    CascadeStep {
        table: "board_group_memory",
        sql: "DELETE FROM board_group_memory WHERE board_group_id IN
              (SELECT id FROM board_groups WHERE organization_id = ?1)",
    },
    CascadeStep {
        table: "board_groups",
        sql: "DELETE FROM board_groups WHERE organization_id = ?1",
    },
    CascadeStep {
        table: "gateways",
        sql: "DELETE FROM gateways WHERE organization_id = ?1",
    },
    CascadeStep {
        table: "organization_invites",
        sql: "DELETE FROM organization_invites WHERE organization_id = ?1",
    },
    CascadeStep {
        table: "organization_members",
        sql: "DELETE FROM organization_members WHERE organization_id = ?1",
    },
    // Memberships for this org are gone by now, so any user left pointing at
    // it with no remaining membership row belongs exclusively to this tenant.
    CascadeStep {
        table: "users",
        sql: "DELETE FROM users WHERE active_organization_id = ?1
              AND id NOT IN (SELECT user_id FROM organization_members)",
    },
    CascadeStep {
        table: "organizations",
        sql: "DELETE FROM organizations WHERE id = ?1",
    },
];

/// The table order the organization cascade touches, duplicates included.
pub fn organization_cascade_tables() -> Vec<&'static str> {
    ORG_CASCADE.iter().map(|step| step.table).collect()
}

fn map_org(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn org_from_parts(parts: (String, String, i64, i64)) -> Result<Organization> {
    let (id, name, created_at, updated_at) = parts;
    Ok(Organization {
        id: Uuid::parse_str(&id)?,
        name,
        created_at,
        updated_at,
    })
}

fn member_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, i64, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn member_from_parts(parts: (String, String, String, String, i64, i64)) -> Result<OrganizationMember> {
    let (id, organization_id, user_id, role, created_at, updated_at) = parts;
    Ok(OrganizationMember {
        id: Uuid::parse_str(&id)?,
        organization_id: Uuid::parse_str(&organization_id)?,
        user_id: Uuid::parse_str(&user_id)?,
        role: MemberRole::from_str(&role)
            .ok_or_else(|| anyhow!("unknown member role: {role}"))?,
        created_at,
        updated_at,
    })
}

impl Database {
    /// Create an organization with `owner_user_id` as its owner member.
    pub fn create_organization(&self, name: &str, owner_user_id: Uuid) -> Result<Organization> {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!(ApiError::missing_field("name")));
        }
        let org_id = Uuid::now_v7();
        let member_id = Uuid::now_v7();
        let now = now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists: bool = tx
                .query_row(
                    "SELECT 1 FROM organizations WHERE name = ?1",
                    params![name],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if exists {
                return Err(anyhow!(ApiError::already_exists("Organization")));
            }

            tx.execute(
                "INSERT INTO organizations (id, name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![org_id.to_string(), name, now, now],
            )?;
            tx.execute(
                "INSERT INTO organization_members
                 (id, organization_id, user_id, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'owner', ?4, ?5)",
                params![
                    member_id.to_string(),
                    org_id.to_string(),
                    owner_user_id.to_string(),
                    now,
                    now
                ],
            )?;
            tx.execute(
                "UPDATE users SET active_organization_id = ?1, updated_at = ?2
                 WHERE id = ?3 AND active_organization_id IS NULL",
                params![org_id.to_string(), now, owner_user_id.to_string()],
            )?;
            tx.commit()?;

            Ok(Organization {
                id: org_id,
                name: name.to_string(),
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Get an organization by id.
    pub fn get_organization(&self, org_id: Uuid) -> Result<Option<Organization>> {
        self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    "SELECT id, name, created_at, updated_at
                     FROM organizations WHERE id = ?1",
                    params![org_id.to_string()],
                    map_org,
                )
                .optional()?;
            parts.map(org_from_parts).transpose()
        })
    }

    /// Membership row for a user in an organization, if any.
    pub fn get_member(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<OrganizationMember>> {
        self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    "SELECT id, organization_id, user_id, role, created_at, updated_at
                     FROM organization_members
                     WHERE organization_id = ?1 AND user_id = ?2",
                    params![org_id.to_string(), user_id.to_string()],
                    member_from_row,
                )
                .optional()?;
            parts.map(member_from_parts).transpose()
        })
    }

    /// List members of an organization, owners first.
    pub fn list_members(&self, org_id: Uuid) -> Result<Vec<OrganizationMember>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, organization_id, user_id, role, created_at, updated_at
                 FROM organization_members
                 WHERE organization_id = ?1
                 ORDER BY CASE role
                    WHEN 'owner' THEN 0 WHEN 'admin' THEN 1 ELSE 2 END,
                    created_at ASC",
            )?;
            let rows = stmt
                .query_map(params![org_id.to_string()], member_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(member_from_parts).collect()
        })
    }

    /// Ensure a user belongs to some organization, creating a personal one on
    /// first login. Returns the active membership.
    pub fn ensure_member_for_user(&self, user_id: Uuid) -> Result<OrganizationMember> {
        let existing = self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    "SELECT id, organization_id, user_id, role, created_at, updated_at
                     FROM organization_members WHERE user_id = ?1
                     ORDER BY created_at ASC LIMIT 1",
                    params![user_id.to_string()],
                    member_from_row,
                )
                .optional()?;
            parts.map(member_from_parts).transpose()
        })?;
        if let Some(member) = existing {
            return Ok(member);
        }

        let org = self.create_organization(&format!("Workspace {}", &user_id.to_string()[..8]), user_id)?;
        self.get_member(org.id, user_id)?
            .ok_or_else(|| anyhow!("owner membership missing after organization create"))
    }

    /// Create an invite to an organization.
    pub fn create_invite(
        &self,
        org_id: Uuid,
        invited_email: &str,
        role: MemberRole,
        all_boards_read: bool,
        all_boards_write: bool,
        created_by_user_id: Option<Uuid>,
    ) -> Result<OrganizationInvite> {
        let invited_email = invited_email.trim().to_ascii_lowercase();
        if invited_email.is_empty() {
            return Err(anyhow!(ApiError::missing_field("invited_email")));
        }
        let invite = OrganizationInvite {
            id: Uuid::now_v7(),
            organization_id: org_id,
            invited_email,
            token: crate::tokens::generate_agent_token(),
            role,
            all_boards_read,
            all_boards_write,
            created_by_user_id,
            accepted_by_user_id: None,
            accepted_at: None,
            created_at: now_ms(),
            updated_at: now_ms(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO organization_invites
                 (id, organization_id, invited_email, token, role,
                  all_boards_read, all_boards_write, created_by_user_id,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    invite.id.to_string(),
                    invite.organization_id.to_string(),
                    invite.invited_email,
                    invite.token,
                    invite.role.as_str(),
                    invite.all_boards_read,
                    invite.all_boards_write,
                    invite.created_by_user_id.map(|id| id.to_string()),
                    invite.created_at,
                    invite.updated_at
                ],
            )?;
            Ok(())
        })?;
        Ok(invite)
    }

    /// Accept an invite: create the membership, copy board grants, and mark
    /// the invite consumed. Conflict if already accepted.
    pub fn accept_invite(&self, token: &str, user_id: Uuid) -> Result<OrganizationMember> {
        let now = now_ms();
        let member_id = Uuid::now_v7();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let invite = tx
                .query_row(
                    "SELECT id, organization_id, role, accepted_at
                     FROM organization_invites WHERE token = ?1",
                    params![token],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<i64>>(3)?,
                        ))
                    },
                )
                .optional()?;
            let Some((invite_id, org_id, role, accepted_at)) = invite else {
                return Err(anyhow!(ApiError::not_found("Invite")));
            };
            if accepted_at.is_some() {
                return Err(anyhow!(ApiError::conflict("Invite already accepted")));
            }

            tx.execute(
                "INSERT INTO organization_members
                 (id, organization_id, user_id, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    member_id.to_string(),
                    org_id,
                    user_id.to_string(),
                    role,
                    now,
                    now
                ],
            )?;
            // Carry the invite's per-board grants over to the new member.
            tx.execute(
                "INSERT INTO organization_board_access
                 (id, organization_member_id, board_id, can_read, can_write,
                  created_at, updated_at)
                 SELECT lower(hex(randomblob(16))), ?1, board_id, can_read, can_write, ?2, ?2
                 FROM organization_invite_board_access
                 WHERE organization_invite_id = ?3",
                params![member_id.to_string(), now, invite_id],
            )?;
            tx.execute(
                "UPDATE organization_invites
                 SET accepted_by_user_id = ?1, accepted_at = ?2, updated_at = ?2
                 WHERE id = ?3",
                params![user_id.to_string(), now, invite_id],
            )?;
            tx.commit()?;

            Ok(OrganizationMember {
                id: member_id,
                organization_id: Uuid::parse_str(&org_id)?,
                user_id,
                role: MemberRole::from_str(&role)
                    .ok_or_else(|| anyhow!("unknown member role: {role}"))?,
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Delete an organization and every row that references it.
    ///
    /// The actor must hold the `owner` role; anything else is a forbidden
    /// error issued before a single statement runs. All statements execute
    /// inside one transaction in [`ORG_CASCADE`] order with a single commit,
    /// so a failure anywhere leaves no partial deletion visible. Returns the
    /// tables touched, in statement order.
    pub fn delete_organization(
        &self,
        org_id: Uuid,
        actor_role: MemberRole,
    ) -> Result<Vec<&'static str>> {
        if actor_role != MemberRole::Owner {
            return Err(anyhow!(ApiError::forbidden(
                "Only organization owners may delete an organization"
            )));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut touched = Vec::with_capacity(ORG_CASCADE.len());
            for step in ORG_CASCADE {
                tx.execute(step.sql, params![org_id.to_string()])?;
                touched.push(step.table);
            }
            tx.commit()?;
            Ok(touched)
        })
    }

    /// Count rows in any owned table that still reference the organization's
    /// boards or the organization itself (diagnostic helper for tests).
    pub fn count_org_scoped_rows(&self, org_id: Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            let org = org_id.to_string();
            let mut total = 0i64;
            for sql in [
                "SELECT COUNT(*) FROM boards WHERE organization_id = ?1".to_string(),
                "SELECT COUNT(*) FROM board_groups WHERE organization_id = ?1".to_string(),
                "SELECT COUNT(*) FROM gateways WHERE organization_id = ?1".to_string(),
                "SELECT COUNT(*) FROM organization_invites WHERE organization_id = ?1".to_string(),
                "SELECT COUNT(*) FROM organization_members WHERE organization_id = ?1".to_string(),
                format!("SELECT COUNT(*) FROM tasks WHERE board_id IN ({ORG_BOARDS})"),
                format!("SELECT COUNT(*) FROM agents WHERE board_id IN ({ORG_BOARDS})"),
            ] {
                let count: i64 = conn.query_row(&sql, params![org], |row| row.get(0))?;
                total += count;
            }
            Ok(total)
        })
    }

    /// Look up a user's membership role, as required before deletion.
    pub fn require_member_role(&self, org_id: Uuid, user_id: Uuid) -> Result<MemberRole> {
        self.get_member(org_id, user_id)?
            .map(|m| m.role)
            .ok_or_else(|| anyhow!(ApiError::forbidden("Not a member of this organization")))
    }
}
