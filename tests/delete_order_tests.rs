//! Tests for the tenant deletion cascade: statement order, authorization,
//! atomicity, and schema coverage.

use mission_control::db::Database;
use mission_control::db::agents::NewAgent;
use mission_control::db::boards::BoardPatch;
use mission_control::db::orgs::organization_cascade_tables;
use mission_control::db::tasks::NewTask;
use mission_control::error::ApiError;
use mission_control::types::{AgentStatus, MemberRole, OnboardingMessage, Organization, User};
use uuid::Uuid;

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

/// Build a fully populated organization touching every owned table.
fn populate_org(db: &Database, suffix: &str) -> (Organization, User) {
    let (user, _) = db
        .get_or_create_user(&format!("owner-{suffix}"), None, Some("Owner"))
        .unwrap();
    let org = db
        .create_organization(&format!("Org {suffix}"), user.id)
        .unwrap();

    let gateway = db
        .create_gateway(
            org.id,
            "Gateway",
            "http://127.0.0.1:18789",
            None,
            "agent:main:main",
            "/tmp/workspaces",
        )
        .unwrap();
    let group = db.create_board_group(org.id, "Group", None).unwrap();
    let board = db
        .create_board(
            org.id,
            BoardPatch {
                name: Some(format!("Board {suffix}")),
                gateway_id: Some(Some(gateway.id)),
                board_group_id: Some(Some(group.id)),
                ..Default::default()
            },
        )
        .unwrap();

    let agent = db
        .create_agent(NewAgent {
            board_id: Some(board.id),
            name: "Lead Agent".to_string(),
            status: AgentStatus::Active,
            openclaw_session_id: Some(format!("agent:lead-{}:main", board.id)),
            agent_token_hash: None,
            heartbeat_config: None,
            identity_profile: None,
            provision_action: None,
            is_board_lead: true,
        })
        .unwrap();

    let task = db
        .create_task(NewTask {
            board_id: Some(board.id),
            title: "Task one".to_string(),
            description: Some("first".to_string()),
            status: None,
            priority: None,
            due_at: None,
            created_by_user_id: Some(user.id),
            assigned_agent_id: None,
            auto_created: false,
            auto_reason: None,
        })
        .unwrap();
    let other = db
        .create_task(NewTask {
            board_id: Some(board.id),
            title: "Task two".to_string(),
            description: None,
            status: None,
            priority: None,
            due_at: None,
            created_by_user_id: None,
            assigned_agent_id: None,
            auto_created: true,
            auto_reason: Some("fixture".to_string()),
        })
        .unwrap();
    db.add_task_dependency(board.id, other.id, task.id).unwrap();
    db.create_approval(board.id, Some(task.id), Some(agent.id), "external_call", None, None)
        .unwrap();

    // One event linked only to the agent, one only to the task: the cascade
    // needs both scoping passes to catch them.
    db.record_activity("agent.heartbeat", None, Some(agent.id), None)
        .unwrap();
    db.record_activity("task.created", None, None, Some(task.id))
        .unwrap();

    db.add_board_memory(board.id, "remember this", None, false, None)
        .unwrap();
    db.add_board_group_memory(group.id, "group context", None, false, None)
        .unwrap();
    db.create_onboarding_session(
        board.id,
        "agent:main:main",
        OnboardingMessage {
            role: "user".to_string(),
            content: "start".to_string(),
            timestamp: 0,
        },
    )
    .unwrap();

    let invite = db
        .create_invite(
            org.id,
            &format!("invitee-{suffix}@example.com"),
            MemberRole::Member,
            false,
            false,
            Some(user.id),
        )
        .unwrap();

    let member = db.get_member(org.id, user.id).unwrap().unwrap();
    db.grant_board_access(member.id, board.id, true, true).unwrap();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO organization_invite_board_access
             (id, organization_invite_id, board_id, can_read, can_write,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, 0, 0, 0)",
            rusqlite::params![
                Uuid::now_v7().to_string(),
                invite.id.to_string(),
                board.id.to_string()
            ],
        )?;
        Ok(())
    })
    .unwrap();

    (org, user)
}

fn count_all_rows(db: &Database) -> i64 {
    let tables = db.table_names().unwrap();
    db.with_conn(|conn| {
        let mut total = 0i64;
        for table in &tables {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            total += count;
        }
        Ok(total)
    })
    .unwrap()
}

mod cascade_order_tests {
    use super::*;

    #[test]
    fn statement_order_matches_dependency_sequence() {
        assert_eq!(
            organization_cascade_tables(),
            vec![
                "activity_events",
                "activity_events",
                "task_dependencies",
                "task_fingerprints",
                "approvals",
                "board_memory",
                "board_onboarding_sessions",
                "organization_board_access",
                "organization_invite_board_access",
                "organization_board_access",
                "organization_invite_board_access",
                "tasks",
                "agents",
                "boards",
                "board_group_memory",
                "board_groups",
                "gateways",
                "organization_invites",
                "organization_members",
                "users",
                "organizations",
            ]
        );
    }

    #[test]
    fn delete_reports_tables_in_declared_order() {
        let db = setup_db();
        let (org, _) = populate_org(&db, "order");
        let touched = db.delete_organization(org.id, MemberRole::Owner).unwrap();
        assert_eq!(touched, organization_cascade_tables());
    }

    #[test]
    fn every_table_referencing_organizations_is_covered() {
        // Walk the live schema's foreign-key graph: any table that can reach
        // `organizations` through references must appear in the cascade, so
        // adding a table without extending the cascade fails here.
        let db = setup_db();
        let edges = db.foreign_key_edges().unwrap();

        let mut reachable = std::collections::HashSet::from(["organizations".to_string()]);
        loop {
            let mut grew = false;
            for (from, to) in &edges {
                if reachable.contains(to) && reachable.insert(from.clone()) {
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        let covered: std::collections::HashSet<&str> =
            organization_cascade_tables().into_iter().collect();
        for table in reachable {
            assert!(
                covered.contains(table.as_str()),
                "table {table} references organizations but is missing from the cascade"
            );
        }
    }
}

mod cascade_behavior_tests {
    use super::*;

    #[test]
    fn deletion_removes_every_dependent_row() {
        let db = setup_db();
        let (org, _) = populate_org(&db, "full");

        db.delete_organization(org.id, MemberRole::Owner).unwrap();

        assert_eq!(count_all_rows(&db), 0);
        assert!(db.foreign_key_violations().unwrap().is_empty());
        assert!(db.get_organization(org.id).unwrap().is_none());
    }

    #[test]
    fn deletion_leaves_other_tenants_untouched() {
        let db = setup_db();
        let (doomed, _) = populate_org(&db, "doomed");
        let (survivor, survivor_owner) = populate_org(&db, "survivor");

        db.delete_organization(doomed.id, MemberRole::Owner).unwrap();

        assert!(db.get_organization(survivor.id).unwrap().is_some());
        assert!(db.get_user(survivor_owner.id).unwrap().is_some());
        assert_eq!(db.list_boards(survivor.id).unwrap().len(), 1);
        assert!(db.foreign_key_violations().unwrap().is_empty());
    }

    #[test]
    fn users_with_other_memberships_survive() {
        let db = setup_db();
        let (doomed, _) = populate_org(&db, "shared");

        // A user who belongs to another org but has the doomed org active.
        let (drifter, _) = db.get_or_create_user("drifter", None, None).unwrap();
        let other_org = db.create_organization("Other Org", drifter.id).unwrap();
        let invite = db
            .create_invite(doomed.id, "drifter@example.com", MemberRole::Member, false, false, None)
            .unwrap();
        db.accept_invite(&invite.token, drifter.id).unwrap();
        db.set_active_organization(drifter.id, doomed.id).unwrap();

        db.delete_organization(doomed.id, MemberRole::Owner).unwrap();

        let drifter = db.get_user(drifter.id).unwrap();
        assert!(drifter.is_some(), "user with other memberships was deleted");
        assert!(db.get_organization(other_org.id).unwrap().is_some());
    }

    #[test]
    fn non_owner_delete_is_forbidden_and_touches_nothing() {
        let db = setup_db();
        let (org, _) = populate_org(&db, "guarded");
        let before = count_all_rows(&db);

        for role in [MemberRole::Admin, MemberRole::Member] {
            let err = db.delete_organization(org.id, role).unwrap_err();
            let api: ApiError = err.into();
            assert_eq!(api.status_code(), axum::http::StatusCode::FORBIDDEN);
        }
        assert_eq!(count_all_rows(&db), before);
    }

    #[test]
    fn deleting_missing_org_is_a_noop() {
        let db = setup_db();
        let (org, _) = populate_org(&db, "bystander");
        let before = count_all_rows(&db);

        // The statement sequence is identical even when every table matches
        // zero rows.
        let touched = db
            .delete_organization(Uuid::now_v7(), MemberRole::Owner)
            .unwrap();
        assert_eq!(touched, organization_cascade_tables());

        assert_eq!(count_all_rows(&db), before);
        assert!(db.get_organization(org.id).unwrap().is_some());
    }
}

mod board_delete_tests {
    use super::*;

    #[test]
    fn board_delete_clears_access_rows_then_board() {
        let db = setup_db();
        let (org, user) = populate_org(&db, "board-del");
        let board = db
            .create_board(
                org.id,
                BoardPatch {
                    name: Some("Disposable".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let member = db.get_member(org.id, user.id).unwrap().unwrap();
        db.grant_board_access(member.id, board.id, true, true).unwrap();

        let touched = db.delete_board(board.id).unwrap();
        assert_eq!(
            touched,
            vec![
                "organization_board_access",
                "organization_invite_board_access",
                "boards",
            ]
        );
        assert!(db.get_board(board.id).unwrap().is_none());
        assert!(db.foreign_key_violations().unwrap().is_empty());
    }

    #[test]
    fn failed_board_delete_rolls_back_access_rows() {
        let db = setup_db();
        let (org, user) = populate_org(&db, "board-rollback");
        // The populated board still has tasks/agents referencing it, so the
        // final DELETE violates their foreign keys and the whole transaction
        // must roll back, access rows included.
        let board = db.list_boards(org.id).unwrap().pop().unwrap();
        let member = db.get_member(org.id, user.id).unwrap().unwrap();

        let access_before: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM organization_board_access WHERE board_id = ?1",
                    rusqlite::params![board.id.to_string()],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert!(access_before > 0, "fixture should grant access to {}", member.id);

        assert!(db.delete_board(board.id).is_err());

        let access_after: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM organization_board_access WHERE board_id = ?1",
                    rusqlite::params![board.id.to_string()],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(access_before, access_after, "partial deletion leaked");
        assert!(db.get_board(board.id).unwrap().is_some());
    }

    #[test]
    fn deleting_missing_board_is_not_found() {
        let db = setup_db();
        let err = db.delete_board(Uuid::now_v7()).unwrap_err();
        let api: ApiError = err.into();
        assert_eq!(api.status_code(), axum::http::StatusCode::NOT_FOUND);
    }
}

mod board_group_delete_tests {
    use super::*;

    #[test]
    fn group_delete_removes_boards_then_memory_then_group() {
        let db = setup_db();
        let (user, _) = db.get_or_create_user("grouper", None, None).unwrap();
        let org = db.create_organization("Group Org", user.id).unwrap();
        let group = db.create_board_group(org.id, "Quarter Goals", None).unwrap();
        db.create_board(
            org.id,
            BoardPatch {
                name: Some("Grouped Board".to_string()),
                board_group_id: Some(Some(group.id)),
                ..Default::default()
            },
        )
        .unwrap();
        db.add_board_group_memory(group.id, "context", None, false, None)
            .unwrap();

        let touched = db.delete_board_group(group.id).unwrap();
        assert_eq!(touched, vec!["boards", "board_group_memory", "board_groups"]);
        assert!(db.get_board_group(group.id).unwrap().is_none());
        assert!(db.list_boards(org.id).unwrap().is_empty());
        assert!(db.foreign_key_violations().unwrap().is_empty());
    }
}
