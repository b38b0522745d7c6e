//! Engine facade
//!
//! The operations consumed by the (external) HTTP/auth layer. Every call
//! resolves its environment, acquires a scoped connection, runs, and releases
//! the connection on every exit path. Approval is the only multi-step write
//! and runs as a single transaction: claim, before-state read, apply,
//! snapshot, audit, and the status flip either all commit or all roll back.

use crate::apply::ApplyEngine;
use crate::audit::{AuditLogEntry, AuditRecorder};
use crate::browser::{Filter, TableBrowser};
use crate::catalog::{ColumnDescriptor, SchemaCatalog};
use crate::change::{
    ChangeRequestStore, ChangeStatus, NewChangeRequest, PendingChange, PendingChangeView,
};
use crate::config::Settings;
use crate::environment::{EnvName, EnvironmentRouter};
use crate::error::{not_found, AppError, CoreResult};
use crate::snapshot::{SnapshotDetail, SnapshotService, SnapshotSummary};
use crate::sql::SqlBuilder;
use deadpool_postgres::Pool;
use serde_json::Value;
use tracing::info;

/// The change-approval engine over one shared pool
pub struct AdminEngine {
    router: EnvironmentRouter,
}

impl AdminEngine {
    pub fn new(pool: Pool) -> Self {
        Self {
            router: EnvironmentRouter::new(pool),
        }
    }

    pub fn router(&self) -> &EnvironmentRouter {
        &self.router
    }

    /// Idempotently ensure every configured environment's namespace exists.
    /// Called once by the external bootstrap.
    pub async fn ensure_environments(&self, settings: &Settings) -> CoreResult<()> {
        for name in &settings.environments {
            let env = EnvName::new(name)?;
            self.router.ensure_namespace(&env).await?;
        }
        Ok(())
    }

    /// Propose a row edit; it becomes PENDING until a reviewer decides
    pub async fn submit_change(
        &self,
        env: &str,
        req: NewChangeRequest,
    ) -> CoreResult<PendingChange> {
        let env = EnvName::new(env)?;
        let conn = self.router.acquire(&env).await?;
        ChangeRequestStore::submit(conn.client(), conn.schema(), req).await
    }

    /// All PENDING changes in submission order, each enriched with a
    /// best-effort lookup of the row it targets (absence is not an error)
    pub async fn list_pending_changes(&self, env: &str) -> CoreResult<Vec<PendingChangeView>> {
        let env = EnvName::new(env)?;
        let conn = self.router.acquire(&env).await?;
        let changes = ChangeRequestStore::list_pending(conn.client(), conn.schema()).await?;

        let mut views = Vec::with_capacity(changes.len());
        for change in changes {
            let original_record = match change.record_id.as_deref() {
                Some(id) => {
                    match TableBrowser::get_by_primary_key(
                        conn.client(),
                        conn.schema(),
                        &change.table_name,
                        id,
                    )
                    .await
                    {
                        Ok(row) => row,
                        // The table or its key may have changed underneath a
                        // pending proposal; listing still succeeds
                        Err(AppError::NotFound(_)) | Err(AppError::NoPrimaryKey(_)) => None,
                        Err(e) => return Err(e),
                    }
                }
                None => None,
            };
            views.push(PendingChangeView {
                change,
                original_record,
            });
        }
        Ok(views)
    }

    /// Approve a pending change: apply it, capture the table, write the audit
    /// trail, and mark it APPROVED — atomically. On any failure the change
    /// remains PENDING and the table is untouched.
    pub async fn approve_change(
        &self,
        env: &str,
        change_id: i64,
        approver_id: &str,
    ) -> CoreResult<PendingChange> {
        let env = EnvName::new(env)?;
        let mut conn = self.router.acquire(&env).await?;
        let schema = env.as_str().to_string();
        let tx = conn.transaction().await?;

        let claimed =
            ChangeRequestStore::claim_for_decision(&tx, &schema, change_id, ChangeStatus::Approved)
                .await?;

        // Live row before the apply; the proposer's old_values are advisory only
        let before_state = match claimed.record_id.as_deref() {
            Some(id) => {
                TableBrowser::get_by_primary_key(&tx, &schema, &claimed.table_name, id).await?
            }
            None => None,
        };

        let applied = ApplyEngine::execute(&tx, &schema, &claimed).await?;

        if claimed.record_id.is_none() {
            ChangeRequestStore::set_record_id(&tx, &schema, change_id, &applied.record_id).await?;
        }

        SnapshotService::capture_table(
            &tx,
            &schema,
            &claimed.table_name,
            &applied.pk_column,
            change_id,
        )
        .await?;

        let after_state = Value::Object(claimed.new_values.clone());
        AuditRecorder::record(
            &tx,
            &schema,
            change_id,
            &claimed.table_name,
            &applied.record_id,
            before_state.as_ref(),
            &after_state,
            approver_id,
        )
        .await?;

        tx.commit().await?;

        info!(
            "Change {} approved by {} ({:?} on {}.{}, record {})",
            change_id, approver_id, applied.op, schema, claimed.table_name, applied.record_id
        );

        let mut change = claimed;
        change.record_id = Some(applied.record_id);
        Ok(change)
    }

    /// Reject a pending change. Status flip only: no table mutation, no
    /// snapshot, no audit entry.
    pub async fn reject_change(
        &self,
        env: &str,
        change_id: i64,
        approver_id: &str,
    ) -> CoreResult<PendingChange> {
        let env = EnvName::new(env)?;
        let conn = self.router.acquire(&env).await?;

        let change = ChangeRequestStore::claim_for_decision(
            conn.client(),
            conn.schema(),
            change_id,
            ChangeStatus::Rejected,
        )
        .await?;

        info!("Change {} rejected by {}", change_id, approver_id);
        Ok(change)
    }

    /// Browsable table names in the environment
    pub async fn list_tables(&self, env: &str) -> CoreResult<Vec<String>> {
        let env = EnvName::new(env)?;
        let conn = self.router.acquire(&env).await?;
        SchemaCatalog::list_tables(conn.client(), conn.schema()).await
    }

    /// Reflected column metadata for one table
    pub async fn describe_table(&self, env: &str, table: &str) -> CoreResult<Vec<ColumnDescriptor>> {
        let env = EnvName::new(env)?;
        let conn = self.router.acquire(&env).await?;
        SchemaCatalog::describe_table(conn.client(), conn.schema(), table).await
    }

    /// Paginated, filtered rows from any reflected table
    pub async fn query_table(
        &self,
        env: &str,
        table: &str,
        limit: Option<i64>,
        offset: Option<i64>,
        filters: &[Filter],
    ) -> CoreResult<Vec<Value>> {
        let env = EnvName::new(env)?;
        let conn = self.router.acquire(&env).await?;
        TableBrowser::query_rows(conn.client(), conn.schema(), table, limit, offset, filters).await
    }

    /// Fetch one row by primary-key value, or `None`
    pub async fn get_record(
        &self,
        env: &str,
        table: &str,
        record_id: &str,
    ) -> CoreResult<Option<Value>> {
        let env = EnvName::new(env)?;
        let conn = self.router.acquire(&env).await?;
        TableBrowser::get_by_primary_key(conn.client(), conn.schema(), table, record_id).await
    }

    /// Direct, non-gated delete of one row. `NotFound` covers both an unknown
    /// table and an absent row.
    pub async fn delete_record(&self, env: &str, table: &str, record_id: &str) -> CoreResult<()> {
        let env = EnvName::new(env)?;
        let conn = self.router.acquire(&env).await?;
        let schema = conn.schema();

        SchemaCatalog::describe_table(conn.client(), schema, table).await?;
        let pk = SchemaCatalog::primary_key_column(conn.client(), schema, table).await?;

        let sql = SqlBuilder::delete_by_pk(schema, table, &pk);
        let affected = conn.client().execute(sql.as_str(), &[&record_id]).await?;
        if affected == 0 {
            return Err(not_found(format!(
                "table '{}' has no row with {} = {}",
                table, pk, record_id
            )));
        }
        info!("Deleted {}.{} record {}", schema, table, record_id);
        Ok(())
    }

    /// Snapshots taken of one table, newest first
    pub async fn list_snapshots(&self, env: &str, table: &str) -> CoreResult<Vec<SnapshotSummary>> {
        let env = EnvName::new(env)?;
        let conn = self.router.acquire(&env).await?;
        SnapshotService::list_for_table(conn.client(), conn.schema(), table).await
    }

    /// One snapshot with its captured rows
    pub async fn get_snapshot(&self, env: &str, id: i64) -> CoreResult<SnapshotDetail> {
        let env = EnvName::new(env)?;
        let conn = self.router.acquire(&env).await?;
        SnapshotService::get(conn.client(), conn.schema(), id).await
    }

    /// The audit entry for an approved change, if one exists
    pub async fn audit_entry_for_change(
        &self,
        env: &str,
        change_id: i64,
    ) -> CoreResult<Option<AuditLogEntry>> {
        let env = EnvName::new(env)?;
        let conn = self.router.acquire(&env).await?;
        AuditRecorder::entry_for_change(conn.client(), conn.schema(), change_id).await
    }
}
