//! Audit recorder
//!
//! Writes the immutable before/after record of an approved change, in the
//! same transaction as the apply and the snapshot. One entry per approved
//! change, never updated.

use crate::error::CoreResult;
use crate::sql::quote_ident;
use chrono::{DateTime, Utc};
use deadpool_postgres::GenericClient;
use serde::Serialize;
use serde_json::Value;

/// An immutable before/after record of one approved change
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: i64,
    pub pending_change_id: i64,
    pub table_name: String,
    /// Text form: inserts link to a key that did not exist at submission time
    pub record_id: String,
    /// Row as it existed immediately before the apply; `None` for inserts
    pub before_state: Option<Value>,
    /// The applied `new_values` mapping (empty object for deletes)
    pub after_state: Value,
    pub approved_by_id: String,
    pub approved_at: DateTime<Utc>,
}

const COLUMNS: &str =
    "id, pending_change_id, table_name, record_id, before_state, after_state, approved_by_id, approved_at";

fn entry_from_row(row: &tokio_postgres::Row) -> AuditLogEntry {
    AuditLogEntry {
        id: row.get("id"),
        pending_change_id: row.get("pending_change_id"),
        table_name: row.get("table_name"),
        record_id: row.get("record_id"),
        before_state: row.get("before_state"),
        after_state: row.get("after_state"),
        approved_by_id: row.get("approved_by_id"),
        approved_at: row.get("approved_at"),
    }
}

pub struct AuditRecorder;

impl AuditRecorder {
    /// Write the audit entry for an approved change
    #[allow(clippy::too_many_arguments)]
    pub async fn record<C>(
        client: &C,
        schema: &str,
        pending_change_id: i64,
        table_name: &str,
        record_id: &str,
        before_state: Option<&Value>,
        after_state: &Value,
        approved_by_id: &str,
    ) -> CoreResult<AuditLogEntry>
    where
        C: GenericClient,
    {
        let sql = format!(
            "INSERT INTO {}.audit_log \
             (pending_change_id, table_name, record_id, before_state, after_state, approved_by_id) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            quote_ident(schema),
            COLUMNS
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &pending_change_id,
                    &table_name,
                    &record_id,
                    &before_state,
                    &after_state,
                    &approved_by_id,
                ],
            )
            .await?;
        Ok(entry_from_row(&row))
    }

    /// The audit entry written when a change was approved, if any
    pub async fn entry_for_change<C>(
        client: &C,
        schema: &str,
        pending_change_id: i64,
    ) -> CoreResult<Option<AuditLogEntry>>
    where
        C: GenericClient,
    {
        let sql = format!(
            "SELECT {} FROM {}.audit_log WHERE pending_change_id = $1",
            COLUMNS,
            quote_ident(schema)
        );
        let row = client.query_opt(sql.as_str(), &[&pending_change_id]).await?;
        Ok(row.as_ref().map(entry_from_row))
    }
}
