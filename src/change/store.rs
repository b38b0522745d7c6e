//! Pending-change persistence
//!
//! SQL lifecycle for the per-environment `pending_changes` control table:
//! submission, pending listing, and the atomic claim that decides races
//! between concurrent approvals.

use crate::catalog::SchemaCatalog;
use crate::change::models::{ChangeOp, ChangeStatus, NewChangeRequest, PendingChange};
use crate::error::{conflict, invalid_input, not_found, AppError, CoreResult};
use crate::sql::quote_ident;
use deadpool_postgres::GenericClient;
use serde_json::Value;
use tracing::{debug, info};
use validator::Validate;

pub struct ChangeRequestStore;

impl ChangeRequestStore {
    /// Record a proposed edit as PENDING.
    ///
    /// Rejects submissions whose shape classifies to no operation and
    /// submissions against tables the catalog does not know.
    pub async fn submit<C>(
        client: &C,
        schema: &str,
        req: NewChangeRequest,
    ) -> CoreResult<PendingChange>
    where
        C: GenericClient,
    {
        req.validate()
            .map_err(|e| invalid_input(format!("invalid change request: {}", e)))?;
        ChangeOp::classify(req.record_id.as_deref(), &req.new_values)?;

        // Unknown target table is a submission error, not a lookup error
        SchemaCatalog::describe_table(client, schema, &req.table_name)
            .await
            .map_err(|e| match e {
                AppError::NotFound(msg) => invalid_input(msg),
                other => other,
            })?;

        let sql = format!(
            "INSERT INTO {}.pending_changes \
             (table_name, record_id, old_values, new_values, status, submitted_by) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            quote_ident(schema),
            PendingChange::COLUMNS
        );
        let status = ChangeStatus::Pending.as_str();
        let new_values = Value::Object(req.new_values.clone());
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &req.table_name,
                    &req.record_id,
                    &req.old_values,
                    &new_values,
                    &status,
                    &req.submitted_by,
                ],
            )
            .await?;

        let change = PendingChange::from_row(&row)?;
        info!(
            "Change {} submitted for table '{}' by {}",
            change.id, change.table_name, change.submitted_by
        );
        Ok(change)
    }

    /// All PENDING changes in submission order
    pub async fn list_pending<C>(client: &C, schema: &str) -> CoreResult<Vec<PendingChange>>
    where
        C: GenericClient,
    {
        let sql = format!(
            "SELECT {} FROM {}.pending_changes WHERE status = $1 ORDER BY id",
            PendingChange::COLUMNS,
            quote_ident(schema)
        );
        let status = ChangeStatus::Pending.as_str();
        let rows = client.query(sql.as_str(), &[&status]).await?;
        rows.iter().map(PendingChange::from_row).collect()
    }

    /// Fetch one change regardless of status
    pub async fn get<C>(client: &C, schema: &str, id: i64) -> CoreResult<Option<PendingChange>>
    where
        C: GenericClient,
    {
        let sql = format!(
            "SELECT {} FROM {}.pending_changes WHERE id = $1",
            PendingChange::COLUMNS,
            quote_ident(schema)
        );
        let row = client.query_opt(sql.as_str(), &[&id]).await?;
        row.as_ref().map(PendingChange::from_row).transpose()
    }

    /// Atomically claim a PENDING change for a decision, moving it straight to
    /// its terminal status.
    ///
    /// The conditional UPDATE takes the row lock, so of two concurrent
    /// decisions exactly one matches; the loser observes a non-PENDING row
    /// and gets `Conflict`. Run inside the decision transaction: a rollback
    /// restores PENDING with no residue.
    pub async fn claim_for_decision<C>(
        client: &C,
        schema: &str,
        id: i64,
        terminal: ChangeStatus,
    ) -> CoreResult<PendingChange>
    where
        C: GenericClient,
    {
        debug_assert!(terminal.is_terminal());

        let sql = format!(
            "UPDATE {}.pending_changes SET status = $2 \
             WHERE id = $1 AND status = $3 RETURNING {}",
            quote_ident(schema),
            PendingChange::COLUMNS
        );
        let terminal_str = terminal.as_str();
        let pending = ChangeStatus::Pending.as_str();
        let row = client
            .query_opt(sql.as_str(), &[&id, &terminal_str, &pending])
            .await?;

        match row {
            Some(row) => {
                debug!("Change {} claimed for {}", id, terminal_str);
                PendingChange::from_row(&row)
            }
            None => match Self::get(client, schema, id).await? {
                Some(existing) => Err(conflict(format!(
                    "change {} was already decided ({})",
                    id,
                    existing.status.as_str()
                ))),
                None => Err(not_found(format!("change {} not found", id))),
            },
        }
    }

    /// Write the generated primary key back onto an approved insert so the
    /// audit trail can link to the new row
    pub async fn set_record_id<C>(
        client: &C,
        schema: &str,
        id: i64,
        record_id: &str,
    ) -> CoreResult<()>
    where
        C: GenericClient,
    {
        let sql = format!(
            "UPDATE {}.pending_changes SET record_id = $2 WHERE id = $1",
            quote_ident(schema)
        );
        client.execute(sql.as_str(), &[&id, &record_id]).await?;
        Ok(())
    }
}
