//! Gateway endpoint records scoped to organizations.

use super::{Database, now_ms};
use crate::error::ApiError;
use crate::types::Gateway;
use anyhow::{Result, anyhow};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

type GatewayRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    i64,
    i64,
);

const GATEWAY_COLUMNS: &str =
    "id, organization_id, name, url, token, main_session_key, workspace_root, created_at, updated_at";

fn gateway_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GatewayRow> {
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
    ))
}

fn gateway_from_row(parts: GatewayRow) -> Result<Gateway> {
    let (id, organization_id, name, url, token, main_session_key, workspace_root, created_at, updated_at) =
        parts;
    Ok(Gateway {
        id: Uuid::parse_str(&id)?,
        organization_id: Uuid::parse_str(&organization_id)?,
        name,
        url,
        token,
        main_session_key,
        workspace_root,
        created_at,
        updated_at,
    })
}

impl Database {
    /// Register a gateway for an organization.
    pub fn create_gateway(
        &self,
        org_id: Uuid,
        name: &str,
        url: &str,
        token: Option<&str>,
        main_session_key: &str,
        workspace_root: &str,
    ) -> Result<Gateway> {
        if url.trim().is_empty() {
            return Err(anyhow!(ApiError::missing_field("url")));
        }
        if main_session_key.trim().is_empty() {
            return Err(anyhow!(ApiError::missing_field("main_session_key")));
        }
        let gateway = Gateway {
            id: Uuid::now_v7(),
            organization_id: org_id,
            name: name.to_string(),
            url: url.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
            main_session_key: main_session_key.to_string(),
            workspace_root: workspace_root.to_string(),
            created_at: now_ms(),
            updated_at: now_ms(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO gateways
                 (id, organization_id, name, url, token, main_session_key,
                  workspace_root, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    gateway.id.to_string(),
                    gateway.organization_id.to_string(),
                    gateway.name,
                    gateway.url,
                    gateway.token,
                    gateway.main_session_key,
                    gateway.workspace_root,
                    gateway.created_at,
                    gateway.updated_at
                ],
            )?;
            Ok(())
        })?;
        Ok(gateway)
    }

    /// Get a gateway by id.
    pub fn get_gateway(&self, gateway_id: Uuid) -> Result<Option<Gateway>> {
        self.with_conn(|conn| {
            let parts = conn
                .query_row(
                    &format!("SELECT {GATEWAY_COLUMNS} FROM gateways WHERE id = ?1"),
                    params![gateway_id.to_string()],
                    gateway_row,
                )
                .optional()?;
            parts.map(gateway_from_row).transpose()
        })
    }

    /// List an organization's gateways.
    pub fn list_gateways(&self, org_id: Uuid) -> Result<Vec<Gateway>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {GATEWAY_COLUMNS} FROM gateways
                 WHERE organization_id = ?1 ORDER BY created_at ASC"
            ))?;
            let rows = stmt
                .query_map(params![org_id.to_string()], gateway_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(gateway_from_row).collect()
        })
    }
}
