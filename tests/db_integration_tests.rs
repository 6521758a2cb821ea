//! Integration tests for the database layer.
//!
//! These tests verify the core database operations using an in-memory SQLite
//! database. Tests are organized by module and functionality.

use mission_control::db::Database;
use mission_control::db::agents::NewAgent;
use mission_control::db::boards::BoardPatch;
use mission_control::db::tasks::{NewTask, TaskPatch};
use mission_control::error::ApiError;
use mission_control::tokens::{generate_agent_token, hash_agent_token};
use mission_control::types::{
    AgentStatus, MemberRole, OnboardingMessage, OnboardingStatus, Organization, User,
};
use uuid::Uuid;

/// Helper to create a fresh in-memory database for testing.
fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn setup_org(db: &Database, suffix: &str) -> (Organization, User) {
    let (user, _) = db
        .get_or_create_user(&format!("user-{suffix}"), None, None)
        .unwrap();
    let org = db
        .create_organization(&format!("Org {suffix}"), user.id)
        .unwrap();
    (org, user)
}

mod org_tests {
    use super::*;

    #[test]
    fn create_organization_makes_creator_owner() {
        let db = setup_db();
        let (org, user) = setup_org(&db, "owner");

        let member = db.get_member(org.id, user.id).unwrap().unwrap();
        assert_eq!(member.role, MemberRole::Owner);

        let fresh = db.get_user(user.id).unwrap().unwrap();
        assert_eq!(fresh.active_organization_id, Some(org.id));
    }

    #[test]
    fn duplicate_organization_name_conflicts() {
        let db = setup_db();
        let (_, user) = setup_org(&db, "dup");
        let err = db.create_organization("Org dup", user.id).unwrap_err();
        let api: ApiError = err.into();
        assert_eq!(api.status_code(), axum::http::StatusCode::CONFLICT);
    }

    #[test]
    fn ensure_member_creates_personal_org_on_first_login() {
        let db = setup_db();
        let (user, created) = db.get_or_create_user("fresh-subject", None, None).unwrap();
        assert!(created);

        let member = db.ensure_member_for_user(user.id).unwrap();
        assert_eq!(member.role, MemberRole::Owner);

        // Second call reuses the same membership.
        let again = db.ensure_member_for_user(user.id).unwrap();
        assert_eq!(again.id, member.id);
    }

    #[test]
    fn invite_accept_grants_membership_and_board_access() {
        let db = setup_db();
        let (org, owner) = setup_org(&db, "invite");
        let board = db
            .create_board(
                org.id,
                BoardPatch {
                    name: Some("Shared Board".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let invite = db
            .create_invite(
                org.id,
                "new@example.com",
                MemberRole::Member,
                false,
                false,
                Some(owner.id),
            )
            .unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO organization_invite_board_access
                 (id, organization_invite_id, board_id, can_read, can_write,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, 1, 0, 0)",
                rusqlite::params![
                    Uuid::now_v7().to_string(),
                    invite.id.to_string(),
                    board.id.to_string()
                ],
            )?;
            Ok(())
        })
        .unwrap();

        let (joiner, _) = db.get_or_create_user("joiner", None, None).unwrap();
        let member = db.accept_invite(&invite.token, joiner.id).unwrap();
        assert_eq!(member.role, MemberRole::Member);
        assert!(db
            .member_can_write_board(member.id, member.role, board.id)
            .unwrap());

        // Accepting twice conflicts.
        let err = db.accept_invite(&invite.token, joiner.id).unwrap_err();
        let api: ApiError = err.into();
        assert_eq!(api.status_code(), axum::http::StatusCode::CONFLICT);
    }

    #[test]
    fn plain_members_need_explicit_board_grants() {
        let db = setup_db();
        let (org, _) = setup_org(&db, "grants");
        let board = db
            .create_board(
                org.id,
                BoardPatch {
                    name: Some("Private Board".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let invite = db
            .create_invite(org.id, "m@example.com", MemberRole::Member, false, false, None)
            .unwrap();
        let (joiner, _) = db.get_or_create_user("plain-member", None, None).unwrap();
        let member = db.accept_invite(&invite.token, joiner.id).unwrap();

        assert!(!db
            .member_can_read_board(member.id, member.role, board.id)
            .unwrap());
        db.grant_board_access(member.id, board.id, true, false).unwrap();
        assert!(db
            .member_can_read_board(member.id, member.role, board.id)
            .unwrap());
        assert!(!db
            .member_can_write_board(member.id, member.role, board.id)
            .unwrap());
    }
}

mod agent_tests {
    use super::*;

    fn board_fixture(db: &Database, suffix: &str) -> Uuid {
        let (org, _) = setup_org(db, suffix);
        db.create_board(
            org.id,
            BoardPatch {
                name: Some(format!("Board {suffix}")),
                ..Default::default()
            },
        )
        .unwrap()
        .id
    }

    #[test]
    fn second_lead_for_same_board_conflicts() {
        let db = setup_db();
        let board_id = board_fixture(&db, "two-leads");

        let new_lead = |name: &str| NewAgent {
            board_id: Some(board_id),
            name: name.to_string(),
            status: AgentStatus::Provisioning,
            openclaw_session_id: None,
            agent_token_hash: None,
            heartbeat_config: None,
            identity_profile: None,
            provision_action: None,
            is_board_lead: true,
        };

        db.create_agent(new_lead("First Lead")).unwrap();
        let err = db.create_agent(new_lead("Second Lead")).unwrap_err();
        let api: ApiError = err.into();
        assert_eq!(api.status_code(), axum::http::StatusCode::CONFLICT);
    }

    #[test]
    fn non_lead_agents_are_unlimited() {
        let db = setup_db();
        let board_id = board_fixture(&db, "workers");
        for name in ["Worker A", "Worker B", "Worker C"] {
            db.create_agent(NewAgent {
                board_id: Some(board_id),
                name: name.to_string(),
                status: AgentStatus::Active,
                openclaw_session_id: None,
                agent_token_hash: None,
                heartbeat_config: None,
                identity_profile: None,
                provision_action: None,
                is_board_lead: false,
            })
            .unwrap();
        }
        assert_eq!(db.list_board_agents(board_id).unwrap().len(), 3);
    }

    #[test]
    fn agent_token_authentication_finds_owner() {
        let db = setup_db();
        let board_id = board_fixture(&db, "token-auth");
        let token = generate_agent_token();
        let agent = db
            .create_agent(NewAgent {
                board_id: Some(board_id),
                name: "Authenticated".to_string(),
                status: AgentStatus::Active,
                openclaw_session_id: Some("agent:auth:main".to_string()),
                agent_token_hash: Some(hash_agent_token(&token)),
                heartbeat_config: None,
                identity_profile: None,
                provision_action: None,
                is_board_lead: true,
            })
            .unwrap();

        let found = db.authenticate_agent_token(&token).unwrap().unwrap();
        assert_eq!(found.id, agent.id);
        assert!(found.last_seen_at.is_some());

        assert!(db
            .authenticate_agent_token(&generate_agent_token())
            .unwrap()
            .is_none());
    }

    #[test]
    fn token_rotation_invalidates_old_token() {
        let db = setup_db();
        let board_id = board_fixture(&db, "rotate");
        let old_token = generate_agent_token();
        let agent = db
            .create_agent(NewAgent {
                board_id: Some(board_id),
                name: "Rotated".to_string(),
                status: AgentStatus::Active,
                openclaw_session_id: None,
                agent_token_hash: Some(hash_agent_token(&old_token)),
                heartbeat_config: None,
                identity_profile: None,
                provision_action: None,
                is_board_lead: false,
            })
            .unwrap();

        let new_token = generate_agent_token();
        db.set_agent_token_hash(agent.id, &hash_agent_token(&new_token))
            .unwrap();

        assert!(db.authenticate_agent_token(&old_token).unwrap().is_none());
        assert_eq!(
            db.authenticate_agent_token(&new_token).unwrap().unwrap().id,
            agent.id
        );
    }
}

mod task_tests {
    use super::*;

    fn board_with_agent(db: &Database, suffix: &str) -> (Uuid, Uuid) {
        let (org, _) = setup_org(db, suffix);
        let board = db
            .create_board(
                org.id,
                BoardPatch {
                    name: Some(format!("Board {suffix}")),
                    ..Default::default()
                },
            )
            .unwrap();
        let agent = db
            .create_agent(NewAgent {
                board_id: Some(board.id),
                name: "Worker".to_string(),
                status: AgentStatus::Active,
                openclaw_session_id: Some("agent:worker:main".to_string()),
                agent_token_hash: None,
                heartbeat_config: None,
                identity_profile: None,
                provision_action: None,
                is_board_lead: false,
            })
            .unwrap();
        (board.id, agent.id)
    }

    fn new_task(board_id: Uuid, title: &str) -> NewTask {
        NewTask {
            board_id: Some(board_id),
            title: title.to_string(),
            description: None,
            status: None,
            priority: None,
            due_at: None,
            created_by_user_id: None,
            assigned_agent_id: None,
            auto_created: false,
            auto_reason: None,
        }
    }

    #[test]
    fn create_task_defaults_and_fingerprint() {
        let db = setup_db();
        let (board_id, _) = board_with_agent(&db, "task-create");

        let task = db.create_task(new_task(board_id, "Write docs")).unwrap();
        assert_eq!(task.status, "inbox");
        assert_eq!(task.priority, "medium");

        let fingerprint =
            mission_control::policy::task_fingerprint("Write docs", None, board_id);
        assert!(db.has_task_fingerprint(board_id, &fingerprint).unwrap());
        assert_eq!(db.list_task_activity(task.id, 10).unwrap().len(), 1);
    }

    #[test]
    fn invalid_status_is_rejected() {
        let db = setup_db();
        let (board_id, _) = board_with_agent(&db, "bad-status");
        let mut task = new_task(board_id, "Broken");
        task.status = Some("doing".to_string());
        let err = db.create_task(task).unwrap_err();
        let api: ApiError = err.into();
        assert_eq!(api.status_code(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn assignment_requires_active_provisioned_agent() {
        let db = setup_db();
        let (board_id, agent_id) = board_with_agent(&db, "assign");

        let mut ok = new_task(board_id, "Assigned");
        ok.assigned_agent_id = Some(agent_id);
        assert!(db.create_task(ok).is_ok());

        db.set_agent_status(agent_id, AgentStatus::Paused).unwrap();
        let mut bad = new_task(board_id, "Blocked assign");
        bad.assigned_agent_id = Some(agent_id);
        assert!(db.create_task(bad).is_err());
    }

    #[test]
    fn update_reports_meaningful_changes() {
        let db = setup_db();
        let (board_id, agent_id) = board_with_agent(&db, "changes");
        let task = db.create_task(new_task(board_id, "Track me")).unwrap();

        let (updated, changes) = db
            .update_task(
                task.id,
                TaskPatch {
                    status: Some("in_progress".to_string()),
                    assigned_agent_id: Some(Some(agent_id)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.status, "in_progress");
        assert!(updated.in_progress_at.is_some());
        assert!(changes.status.is_some());
        assert!(changes.assigned_agent_id.is_some());

        // A no-op patch reports nothing.
        let (_, changes) = db.update_task(task.id, TaskPatch::default()).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn dependencies_reject_self_and_duplicates() {
        let db = setup_db();
        let (board_id, _) = board_with_agent(&db, "deps");
        let a = db.create_task(new_task(board_id, "A")).unwrap();
        let b = db.create_task(new_task(board_id, "B")).unwrap();

        assert!(db.add_task_dependency(board_id, a.id, a.id).is_err());
        db.add_task_dependency(board_id, a.id, b.id).unwrap();
        let err = db.add_task_dependency(board_id, a.id, b.id).unwrap_err();
        let api: ApiError = err.into();
        assert_eq!(api.status_code(), axum::http::StatusCode::CONFLICT);
        assert_eq!(db.list_task_dependencies(board_id).unwrap().len(), 1);
    }

    #[test]
    fn delete_task_cleans_edges_and_events() {
        let db = setup_db();
        let (board_id, _) = board_with_agent(&db, "task-del");
        let a = db.create_task(new_task(board_id, "A")).unwrap();
        let b = db.create_task(new_task(board_id, "B")).unwrap();
        db.add_task_dependency(board_id, a.id, b.id).unwrap();

        db.delete_task(a.id).unwrap();
        assert!(db.get_task(a.id).unwrap().is_none());
        assert!(db.list_task_dependencies(board_id).unwrap().is_empty());
        assert!(db.foreign_key_violations().unwrap().is_empty());
    }

    #[test]
    fn approvals_resolve_once() {
        let db = setup_db();
        let (board_id, agent_id) = board_with_agent(&db, "approvals");
        let rubric = std::collections::HashMap::from([
            ("clarity".to_string(), 40i64),
            ("risk".to_string(), 30i64),
        ]);
        let approval = db
            .create_approval(board_id, None, Some(agent_id), "external_call", None, Some(rubric))
            .unwrap();
        assert_eq!(approval.confidence, 70);
        assert_eq!(approval.status, "pending");

        db.resolve_approval(approval.id, true).unwrap();
        let err = db.resolve_approval(approval.id, false).unwrap_err();
        let api: ApiError = err.into();
        assert_eq!(api.status_code(), axum::http::StatusCode::CONFLICT);
    }
}

mod onboarding_tests {
    use super::*;

    fn board_fixture(db: &Database, suffix: &str) -> Uuid {
        let (org, _) = setup_org(db, suffix);
        db.create_board(
            org.id,
            BoardPatch {
                name: Some(format!("Board {suffix}")),
                ..Default::default()
            },
        )
        .unwrap()
        .id
    }

    fn message(role: &str, content: &str) -> OnboardingMessage {
        OnboardingMessage {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: 0,
        }
    }

    #[test]
    fn session_lifecycle_is_monotonic() {
        let db = setup_db();
        let board_id = board_fixture(&db, "onboarding");
        let session = db
            .create_onboarding_session(board_id, "agent:main:main", message("user", "start"))
            .unwrap();
        assert_eq!(session.status, OnboardingStatus::Active);

        let session = db
            .advance_onboarding_session(
                session.id,
                OnboardingStatus::Completed,
                Some(serde_json::json!({"board_type": "goal"})),
                Some(message("assistant", "complete")),
            )
            .unwrap();
        assert_eq!(session.status, OnboardingStatus::Completed);
        assert!(session.draft_goal.is_some());
        assert_eq!(session.messages.len(), 2);

        let session = db
            .advance_onboarding_session(session.id, OnboardingStatus::Confirmed, None, None)
            .unwrap();
        assert_eq!(session.status, OnboardingStatus::Confirmed);

        // Any move backwards (or re-entry) is a conflict.
        for status in [
            OnboardingStatus::Active,
            OnboardingStatus::Completed,
            OnboardingStatus::Confirmed,
        ] {
            let err = db
                .advance_onboarding_session(session.id, status, None, None)
                .unwrap_err();
            let api: ApiError = err.into();
            assert_eq!(api.status_code(), axum::http::StatusCode::CONFLICT);
        }
    }

    #[test]
    fn latest_session_wins() {
        let db = setup_db();
        let board_id = board_fixture(&db, "latest");
        let first = db
            .create_onboarding_session(board_id, "agent:main:main", message("user", "one"))
            .unwrap();
        db.advance_onboarding_session(first.id, OnboardingStatus::Confirmed, None, None)
            .unwrap();
        let second = db
            .create_onboarding_session(board_id, "agent:main:main", message("user", "two"))
            .unwrap();

        let latest = db.latest_onboarding_session(board_id).unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        let active = db.active_onboarding_session(board_id).unwrap().unwrap();
        assert_eq!(active.id, second.id);
    }
}

mod storage_tests {
    use super::*;

    #[test]
    fn reopening_a_database_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mission_control.db");

        let db = Database::open(&path).unwrap();
        let (org, _) = setup_org(&db, "persisted");
        drop(db);

        // Reopen: migrations re-run harmlessly and data survives.
        let db = Database::open(&path).unwrap();
        assert!(db.get_organization(org.id).unwrap().is_some());
    }
}

mod user_tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent_per_subject() {
        let db = setup_db();
        let (first, created) = db
            .get_or_create_user("subject-1", Some("a@example.com"), Some("Ada"))
            .unwrap();
        assert!(created);
        let (second, created_again) = db
            .get_or_create_user("subject-1", Some("other@example.com"), None)
            .unwrap();
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        // Claims-derived defaults stick from first sight.
        assert_eq!(second.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn profile_patch_applies_only_provided_fields() {
        let db = setup_db();
        let (user, _) = db.get_or_create_user("subject-2", None, Some("Sam")).unwrap();
        db.apply_user_profile(
            user.id,
            &mission_control::db::users::UserProfilePatch {
                preferred_name: Some("Sammy".to_string()),
                timezone: Some("UTC".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let fresh = db.get_user(user.id).unwrap().unwrap();
        assert_eq!(fresh.preferred_name.as_deref(), Some("Sammy"));
        assert_eq!(fresh.timezone.as_deref(), Some("UTC"));
        assert_eq!(fresh.name.as_deref(), Some("Sam"));
        assert!(fresh.pronouns.is_none());
    }
}
