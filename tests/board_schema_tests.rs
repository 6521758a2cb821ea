//! Goal-field validation behavior for boards.

use mission_control::db::Database;
use mission_control::db::boards::BoardPatch;
use mission_control::error::ApiError;
use mission_control::types::Organization;

fn setup() -> (Database, Organization) {
    let db = Database::open_in_memory().expect("Failed to create in-memory database");
    let (user, _) = db.get_or_create_user("board-schema-user", None, None).unwrap();
    let org = db.create_organization("Schema Org", user.id).unwrap();
    (db, org)
}

#[test]
fn confirmed_goal_board_without_goal_fields_names_both() {
    let (db, org) = setup();
    let err = db
        .create_board(
            org.id,
            BoardPatch {
                name: Some("Goal Board".to_string()),
                board_type: Some("goal".to_string()),
                goal_confirmed: Some(true),
                ..Default::default()
            },
        )
        .unwrap_err();

    let api: ApiError = err.into();
    assert_eq!(api.status_code(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    let fields: Vec<&str> = api.fields.iter().map(|f| f.field.as_str()).collect();
    assert_eq!(fields, vec!["objective", "success_metrics"]);
}

#[test]
fn confirmed_goal_board_with_goal_fields_succeeds() {
    let (db, org) = setup();
    let board = db
        .create_board(
            org.id,
            BoardPatch {
                name: Some("Goal Board".to_string()),
                board_type: Some("goal".to_string()),
                goal_confirmed: Some(true),
                objective: Some(Some("Ship the beta".to_string())),
                success_metrics: Some(Some(serde_json::json!({
                    "metric": "active users",
                    "target": "500"
                }))),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(board.goal_confirmed);
    assert_eq!(board.objective.as_deref(), Some("Ship the beta"));
}

#[test]
fn unconfirmed_goal_board_needs_no_goal_fields() {
    let (db, org) = setup();
    let board = db
        .create_board(
            org.id,
            BoardPatch {
                name: Some("Draft Board".to_string()),
                board_type: Some("goal".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!board.goal_confirmed);
}

#[test]
fn update_cannot_confirm_goal_without_fields() {
    let (db, org) = setup();
    let board = db
        .create_board(
            org.id,
            BoardPatch {
                name: Some("Draft Board".to_string()),
                board_type: Some("goal".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let err = db
        .update_board(
            board.id,
            BoardPatch {
                goal_confirmed: Some(true),
                ..Default::default()
            },
        )
        .unwrap_err();
    let api: ApiError = err.into();
    assert_eq!(api.fields.len(), 2);

    // Supplying both fields in the same update succeeds.
    let updated = db
        .update_board(
            board.id,
            BoardPatch {
                goal_confirmed: Some(true),
                objective: Some(Some("Ship it".to_string())),
                success_metrics: Some(Some(serde_json::json!({"metric": "launches"}))),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(updated.goal_confirmed);
}

#[test]
fn general_boards_skip_goal_validation() {
    let (db, org) = setup();
    let board = db
        .create_board(
            org.id,
            BoardPatch {
                name: Some("General Board".to_string()),
                board_type: Some("general".to_string()),
                goal_confirmed: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(board.board_type, "general");
}

#[test]
fn unknown_board_type_is_rejected() {
    let (db, org) = setup();
    let err = db
        .create_board(
            org.id,
            BoardPatch {
                name: Some("Odd Board".to_string()),
                board_type: Some("sprint".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
    let api: ApiError = err.into();
    assert_eq!(api.status_code(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
}
