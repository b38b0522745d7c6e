//! Snapshot service
//!
//! Captures the entire post-apply state of a table as one immutable JSONB
//! document, owned 1:1 by the approved change. Capture runs inside the
//! approval transaction, so the stored rows are exactly what the apply left
//! behind; any failure here rolls the whole approval back.

use crate::error::{not_found, CoreResult};
use crate::sql::{quote_ident, SqlBuilder};
use chrono::{DateTime, Utc};
use deadpool_postgres::GenericClient;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Lightweight listing entry, payload omitted
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub id: i64,
    pub change_request_id: i64,
    pub table_name: String,
    pub row_count: i64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// Full snapshot with the captured table state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDetail {
    pub id: i64,
    pub change_request_id: i64,
    pub table_name: String,
    /// Every row of the table at capture time, primary-key ascending
    pub snapshot_data: Value,
    pub row_count: i64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// SHA-256 over the canonical JSON text of the captured rows
pub fn checksum_of(data: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct SnapshotService;

impl SnapshotService {
    /// Read back the whole table and store it as the snapshot owned by
    /// `change_request_id`. Returns the snapshot id.
    pub async fn capture_table<C>(
        client: &C,
        schema: &str,
        table: &str,
        pk_column: &str,
        change_request_id: i64,
    ) -> CoreResult<i64>
    where
        C: GenericClient,
    {
        let aggregate = SqlBuilder::aggregate_table(schema, table, pk_column);
        let row = client.query_one(aggregate.as_str(), &[]).await?;
        let data: Value = row.get(0);

        let row_count = data.as_array().map(|a| a.len()).unwrap_or(0) as i64;
        let checksum = checksum_of(&data);

        let sql = format!(
            "INSERT INTO {}.snapshots \
             (change_request_id, table_name, snapshot_data, row_count, checksum) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
            quote_ident(schema)
        );
        let inserted = client
            .query_one(
                sql.as_str(),
                &[&change_request_id, &table, &data, &row_count, &checksum],
            )
            .await?;
        let id: i64 = inserted.get(0);

        debug!(
            "Captured snapshot {} of {}.{} ({} rows) for change {}",
            id, schema, table, row_count, change_request_id
        );
        Ok(id)
    }

    /// All snapshots taken of one table, newest first, payloads omitted
    pub async fn list_for_table<C>(
        client: &C,
        schema: &str,
        table: &str,
    ) -> CoreResult<Vec<SnapshotSummary>>
    where
        C: GenericClient,
    {
        let sql = format!(
            "SELECT id, change_request_id, table_name, row_count, checksum, created_at \
             FROM {}.snapshots WHERE table_name = $1 ORDER BY created_at DESC, id DESC",
            quote_ident(schema)
        );
        let rows = client.query(sql.as_str(), &[&table]).await?;
        Ok(rows
            .iter()
            .map(|r| SnapshotSummary {
                id: r.get("id"),
                change_request_id: r.get("change_request_id"),
                table_name: r.get("table_name"),
                row_count: r.get("row_count"),
                checksum: r.get("checksum"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// One snapshot with its captured rows
    pub async fn get<C>(client: &C, schema: &str, id: i64) -> CoreResult<SnapshotDetail>
    where
        C: GenericClient,
    {
        let sql = format!(
            "SELECT id, change_request_id, table_name, snapshot_data, row_count, checksum, created_at \
             FROM {}.snapshots WHERE id = $1",
            quote_ident(schema)
        );
        let row = client
            .query_opt(sql.as_str(), &[&id])
            .await?
            .ok_or_else(|| not_found(format!("snapshot {} not found", id)))?;

        Ok(SnapshotDetail {
            id: row.get("id"),
            change_request_id: row.get("change_request_id"),
            table_name: row.get("table_name"),
            snapshot_data: row.get("snapshot_data"),
            row_count: row.get("row_count"),
            checksum: row.get("checksum"),
            created_at: row.get("created_at"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_checksum_deterministic() {
        let data = json!([{"id": 1, "name": "Widget"}, {"id": 2, "name": "Gadget"}]);
        assert_eq!(checksum_of(&data), checksum_of(&data.clone()));
    }

    #[test]
    fn test_checksum_sensitive_to_content() {
        let a = json!([{"id": 1}]);
        let b = json!([{"id": 2}]);
        assert_ne!(checksum_of(&a), checksum_of(&b));
    }

    #[test]
    fn test_checksum_of_empty_table() {
        // 64 lowercase hex chars even for an empty capture
        let c = checksum_of(&json!([]));
        assert_eq!(c.len(), 64);
        assert!(c.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
