//! Apply engine
//!
//! Executes a claimed change against its target table using reflected
//! metadata only. The payload travels as one bound jsonb parameter and
//! `jsonb_populate_record` coerces fields to the real column types, so no
//! per-table code exists anywhere on the write path.
//!
//! Insert/update payload policy (preserved exactly): keys that do not match a
//! reflected column are silently dropped, not errors.

use crate::catalog::SchemaCatalog;
use crate::change::{ChangeOp, PendingChange};
use crate::error::{invalid_input, AppError, CoreResult};
use crate::sql::SqlBuilder;
use deadpool_postgres::GenericClient;
use serde_json::{Map, Value};
use tracing::debug;

/// Outcome of a successful apply
#[derive(Debug, Clone)]
pub struct AppliedChange {
    pub op: ChangeOp,
    /// Primary-key value of the affected row, text form. For inserts this is
    /// the freshly generated key.
    pub record_id: String,
    /// The table's primary-key column, reflected once here and reused by the
    /// rest of the approval transaction
    pub pk_column: String,
}

/// Restrict a payload to the table's reflected columns, in reflected column
/// order. Unknown keys are dropped with a debug note.
fn intersect_columns(
    payload: &Map<String, Value>,
    reflected: &[crate::catalog::ColumnDescriptor],
) -> (Vec<String>, Map<String, Value>) {
    let mut columns = Vec::new();
    let mut filtered = Map::new();
    for col in reflected {
        if let Some(value) = payload.get(&col.name) {
            columns.push(col.name.clone());
            filtered.insert(col.name.clone(), value.clone());
        }
    }
    for key in payload.keys() {
        if !filtered.contains_key(key) {
            debug!("dropping payload key '{}' with no matching column", key);
        }
    }
    (columns, filtered)
}

pub struct ApplyEngine;

impl ApplyEngine {
    /// Classify and execute one claimed change. Zero rows affected on an
    /// update or delete is `RecordMissing` and must abort the surrounding
    /// approval transaction.
    pub async fn execute<C>(
        client: &C,
        schema: &str,
        change: &PendingChange,
    ) -> CoreResult<AppliedChange>
    where
        C: GenericClient,
    {
        let table = change.table_name.as_str();
        let reflected = SchemaCatalog::describe_table(client, schema, table).await?;
        let pk = SchemaCatalog::primary_key_column(client, schema, table).await?;
        let op = ChangeOp::classify(change.record_id.as_deref(), &change.new_values)?;

        let record_id = match (op, change.record_id.as_deref()) {
            (ChangeOp::Insert, _) => {
                let (columns, filtered) = intersect_columns(&change.new_values, &reflected);
                if columns.is_empty() {
                    return Err(invalid_input(format!(
                        "change {} carries no recognized columns for table '{}'",
                        change.id, table
                    )));
                }
                let sql = SqlBuilder::insert_from_json(schema, table, &columns, &pk);
                let payload = Value::Object(filtered);
                let row = client.query_one(sql.as_str(), &[&payload]).await?;
                row.get::<_, String>(0)
            }
            (ChangeOp::Update, Some(id)) => {
                let (columns, filtered) = intersect_columns(&change.new_values, &reflected);
                if columns.is_empty() {
                    return Err(invalid_input(format!(
                        "change {} carries no recognized columns for table '{}'",
                        change.id, table
                    )));
                }
                let sql = SqlBuilder::update_from_json(schema, table, &columns, &pk);
                let payload = Value::Object(filtered);
                let affected = client.execute(sql.as_str(), &[&payload, &id]).await?;
                if affected == 0 {
                    return Err(AppError::RecordMissing(format!(
                        "table '{}' has no row with {} = {}",
                        table, pk, id
                    )));
                }
                id.to_string()
            }
            (ChangeOp::Delete, Some(id)) => {
                let sql = SqlBuilder::delete_by_pk(schema, table, &pk);
                let affected = client.execute(sql.as_str(), &[&id]).await?;
                if affected == 0 {
                    return Err(AppError::RecordMissing(format!(
                        "table '{}' has no row with {} = {}",
                        table, pk, id
                    )));
                }
                id.to_string()
            }
            // classify() never produces update/delete without a record id
            (_, None) => {
                return Err(AppError::Internal(format!(
                    "change {} classified without a record id",
                    change.id
                )))
            }
        };

        debug!(
            "Applied {:?} on {}.{} (record {})",
            op, schema, table, record_id
        );
        Ok(AppliedChange {
            op,
            record_id,
            pk_column: pk,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDescriptor;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn col(name: &str, pos: i32) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            data_type: "text".to_string(),
            nullable: true,
            default_value: None,
            is_primary_key: false,
            ordinal_position: pos,
        }
    }

    #[test]
    fn test_intersect_drops_unknown_keys() {
        let reflected = vec![col("id", 1), col("name", 2), col("price", 3)];
        let payload: Map<_, _> = [
            ("name".to_string(), json!("Widget")),
            ("price".to_string(), json!(9.99)),
            ("not_a_column".to_string(), json!("x")),
        ]
        .into_iter()
        .collect();

        let (columns, filtered) = intersect_columns(&payload, &reflected);
        assert_eq!(columns, vec!["name".to_string(), "price".to_string()]);
        assert_eq!(filtered.len(), 2);
        assert!(!filtered.contains_key("not_a_column"));
    }

    #[test]
    fn test_intersect_preserves_reflected_order() {
        let reflected = vec![col("a", 1), col("b", 2), col("c", 3)];
        let payload: Map<_, _> = [
            ("c".to_string(), json!(3)),
            ("a".to_string(), json!(1)),
        ]
        .into_iter()
        .collect();

        let (columns, _) = intersect_columns(&payload, &reflected);
        assert_eq!(columns, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_intersect_empty_payload() {
        let reflected = vec![col("a", 1)];
        let (columns, filtered) = intersect_columns(&Map::new(), &reflected);
        assert!(columns.is_empty());
        assert!(filtered.is_empty());
    }
}
