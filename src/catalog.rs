//! Schema catalog
//!
//! Reflects live table/column/primary-key metadata from information_schema.
//! Everything that builds dynamic statements depends on this module: column
//! names used in generated SQL come only from here, never from raw caller
//! input. Introspection is two cheap queries, so there is no cache and every
//! call sees the current schema.

use crate::error::{not_found, AppError, CoreResult};
use crate::sql::is_valid_identifier;
use deadpool_postgres::GenericClient;
use serde::Serialize;

/// The engine's own bookkeeping tables, one set per environment schema
pub const CONTROL_TABLES: [&str; 3] = ["pending_changes", "snapshots", "audit_log"];

/// Migration-tool version tables that must never surface as browsable data
const MIGRATION_TABLES: [&str; 2] = ["alembic_version", "schema_migrations"];

/// Whether a caller-supplied string can name a browsable table: a plausible
/// identifier that is not one of the engine's own tables. Reserved tables are
/// unknown on every path (reflection, browse, submit), not just the listing.
pub fn is_user_table(name: &str) -> bool {
    is_valid_identifier(name)
        && !CONTROL_TABLES.contains(&name)
        && !MIGRATION_TABLES.contains(&name)
}

/// Reflected column metadata
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub is_primary_key: bool,
    pub ordinal_position: i32,
}

// information_schema columns use domain types (sql_identifier,
// cardinal_number); cast to base types for the driver.
const LIST_TABLES: &str = r#"
    SELECT t.table_name::text
    FROM information_schema.tables t
    WHERE t.table_schema = $1
      AND t.table_type = 'BASE TABLE'
      AND t.table_name::text <> ALL($2)
    ORDER BY t.table_name
"#;

const DESCRIBE_TABLE: &str = r#"
    SELECT
        c.column_name::text,
        c.data_type::text,
        c.is_nullable = 'YES' AS nullable,
        c.column_default::text,
        COALESCE(pk.is_pk, false) AS is_primary_key,
        c.ordinal_position::int
    FROM information_schema.columns c
    LEFT JOIN (
        SELECT kcu.column_name, true AS is_pk
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        WHERE tc.constraint_type = 'PRIMARY KEY'
            AND tc.table_schema = $1
            AND tc.table_name = $2
    ) pk ON c.column_name = pk.column_name
    WHERE c.table_schema = $1
        AND c.table_name = $2
    ORDER BY c.ordinal_position
"#;

const GET_PRIMARY_KEY: &str = r#"
    SELECT kcu.column_name::text
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
        ON tc.constraint_name = kcu.constraint_name
        AND tc.table_schema = kcu.table_schema
    WHERE tc.constraint_type = 'PRIMARY KEY'
        AND tc.table_schema = $1
        AND tc.table_name = $2
    ORDER BY kcu.ordinal_position
"#;

/// Read-only reflection over one environment schema
pub struct SchemaCatalog;

impl SchemaCatalog {
    /// All browsable table names in the schema, control and migration
    /// bookkeeping tables excluded
    pub async fn list_tables<C>(client: &C, schema: &str) -> CoreResult<Vec<String>>
    where
        C: GenericClient,
    {
        let excluded: Vec<&str> = CONTROL_TABLES
            .iter()
            .chain(MIGRATION_TABLES.iter())
            .copied()
            .collect();

        let rows = client.query(LIST_TABLES, &[&schema, &excluded]).await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// Ordered column descriptors for a table; `NotFound` if the table does
    /// not exist in this schema
    pub async fn describe_table<C>(
        client: &C,
        schema: &str,
        table: &str,
    ) -> CoreResult<Vec<ColumnDescriptor>>
    where
        C: GenericClient,
    {
        if !is_user_table(table) {
            return Err(not_found(format!(
                "table '{}' not found in environment '{}'",
                table, schema
            )));
        }

        let rows = client.query(DESCRIBE_TABLE, &[&schema, &table]).await?;
        if rows.is_empty() {
            return Err(not_found(format!(
                "table '{}' not found in environment '{}'",
                table, schema
            )));
        }

        Ok(rows
            .iter()
            .map(|row| ColumnDescriptor {
                name: row.get("column_name"),
                data_type: row.get("data_type"),
                nullable: row.get("nullable"),
                default_value: row.get("column_default"),
                is_primary_key: row.get("is_primary_key"),
                ordinal_position: row.get("ordinal_position"),
            })
            .collect())
    }

    /// The single primary-key column of a table. Composite and absent keys are
    /// unsupported by the write path and surface as `NoPrimaryKey`.
    pub async fn primary_key_column<C>(client: &C, schema: &str, table: &str) -> CoreResult<String>
    where
        C: GenericClient,
    {
        if !is_user_table(table) {
            return Err(not_found(format!(
                "table '{}' not found in environment '{}'",
                table, schema
            )));
        }

        let rows = client.query(GET_PRIMARY_KEY, &[&schema, &table]).await?;
        match rows.len() {
            1 => Ok(rows[0].get(0)),
            0 => Err(AppError::NoPrimaryKey(format!(
                "table '{}' has no primary key",
                table
            ))),
            n => Err(AppError::NoPrimaryKey(format!(
                "table '{}' has a composite primary key ({} columns)",
                table, n
            ))),
        }
    }

    /// Pick the single primary-key column out of already-reflected columns,
    /// if there is exactly one. Used for ordering on the read path, where a
    /// missing key is not an error.
    pub fn single_primary_key(columns: &[ColumnDescriptor]) -> Option<&str> {
        let mut pks = columns.iter().filter(|c| c.is_primary_key);
        match (pks.next(), pks.next()) {
            (Some(pk), None) => Some(pk.name.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, pk: bool) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            data_type: "integer".to_string(),
            nullable: !pk,
            default_value: None,
            is_primary_key: pk,
            ordinal_position: 1,
        }
    }

    #[test]
    fn test_single_primary_key() {
        let cols = vec![col("id", true), col("name", false)];
        assert_eq!(SchemaCatalog::single_primary_key(&cols), Some("id"));
    }

    #[test]
    fn test_single_primary_key_composite_or_missing() {
        let composite = vec![col("a", true), col("b", true)];
        assert_eq!(SchemaCatalog::single_primary_key(&composite), None);

        let keyless = vec![col("a", false)];
        assert_eq!(SchemaCatalog::single_primary_key(&keyless), None);
    }

    #[test]
    fn test_control_tables_are_excluded_names() {
        for t in CONTROL_TABLES {
            assert!(["pending_changes", "snapshots", "audit_log"].contains(&t));
        }
    }

    #[test]
    fn test_reserved_tables_are_not_user_tables() {
        for t in CONTROL_TABLES {
            assert!(!is_user_table(t), "control table {}", t);
        }
        for t in ["alembic_version", "schema_migrations"] {
            assert!(!is_user_table(t), "migration table {}", t);
        }
    }

    #[test]
    fn test_user_table_names() {
        assert!(is_user_table("products"));
        assert!(is_user_table("order_items"));
        assert!(!is_user_table("products; DROP TABLE orders"));
        assert!(!is_user_table(""));
    }
}
