//! Table browser
//!
//! Generic paginated, filterable read access to any reflected table. Rows are
//! returned as JSON documents built server-side with `to_jsonb`, so tables of
//! unknown shape need no per-table code.
//!
//! Filter policy (the read path's sole injection defense, preserved exactly):
//! a filter naming a column the table does not have, or an operator outside
//! the closed set, is silently dropped and never reaches the query. Values
//! are always bound parameters.

use crate::catalog::{ColumnDescriptor, SchemaCatalog};
use crate::error::CoreResult;
use crate::sql::{quote_ident, qualify, SqlBuilder};
use deadpool_postgres::GenericClient;
use serde::Deserialize;
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tracing::debug;

/// Default page size when the caller does not specify one
pub const DEFAULT_LIMIT: i64 = 20;

/// A caller-supplied filter triple. `column` and `operator` are validated
/// against closed sets before use; `value` is always bound.
#[derive(Debug, Clone, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operator: String,
    pub value: Value,
}

/// The closed operator set allowed in filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
}

impl FilterOperator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            "LIKE" => Some(Self::Like),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Like => "LIKE",
        }
    }
}

/// A filter that survived validation against reflected columns
#[derive(Debug, Clone)]
struct BoundFilter {
    column: String,
    operator: FilterOperator,
    value: Value,
}

/// Owned parameter storage for the built query
enum Bound {
    Json(Value),
    Text(String),
}

/// Validate filters against the table's reflected columns, silently dropping
/// anything outside the allow-lists
fn retain_valid(filters: &[Filter], columns: &[ColumnDescriptor]) -> Vec<BoundFilter> {
    filters
        .iter()
        .filter_map(|f| {
            if !columns.iter().any(|c| c.name == f.column) {
                debug!("dropping filter on unknown column '{}'", f.column);
                return None;
            }
            let Some(operator) = FilterOperator::parse(&f.operator) else {
                debug!(
                    "dropping filter with disallowed operator '{}' on column '{}'",
                    f.operator, f.column
                );
                return None;
            };
            Some(BoundFilter {
                column: f.column.clone(),
                operator,
                value: f.value.clone(),
            })
        })
        .collect()
}

/// Build the paginated SELECT. Filters occupy $1..$n; LIMIT and OFFSET are
/// $n+1 and $n+2. Comparison filters work on the jsonb projection of the
/// column (numeric for numbers, lexicographic for strings); LIKE works on the
/// column's text form.
fn build_select(
    schema: &str,
    table: &str,
    filters: &[BoundFilter],
    order_by: Option<&str>,
) -> String {
    let mut sql = format!(
        "SELECT to_jsonb(t) AS row FROM {} AS t",
        qualify(schema, table)
    );

    for (i, f) in filters.iter().enumerate() {
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        let clause = match f.operator {
            FilterOperator::Like => {
                format!("t.{}::text LIKE ${}", quote_ident(&f.column), i + 1)
            }
            op => format!(
                "to_jsonb(t.{}) {} ${}::jsonb",
                quote_ident(&f.column),
                op.sql(),
                i + 1
            ),
        };
        sql.push_str(&clause);
    }

    if let Some(pk) = order_by {
        sql.push_str(&format!(" ORDER BY t.{}", quote_ident(pk)));
    }

    sql.push_str(&format!(
        " LIMIT ${} OFFSET ${}",
        filters.len() + 1,
        filters.len() + 2
    ));
    sql
}

/// The string form a LIKE filter compares against
fn like_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Generic read access over reflected tables
pub struct TableBrowser;

impl TableBrowser {
    /// Paginated, filtered rows in primary-key order (insertion order when the
    /// table has no single primary key)
    pub async fn query_rows<C>(
        client: &C,
        schema: &str,
        table: &str,
        limit: Option<i64>,
        offset: Option<i64>,
        filters: &[Filter],
    ) -> CoreResult<Vec<Value>>
    where
        C: GenericClient,
    {
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        let offset = offset.unwrap_or(0);
        if limit < 0 || offset < 0 {
            return Err(crate::error::invalid_input(
                "limit and offset must be non-negative",
            ));
        }

        let columns = SchemaCatalog::describe_table(client, schema, table).await?;
        let bound = retain_valid(filters, &columns);
        let order_by = SchemaCatalog::single_primary_key(&columns);
        let sql = build_select(schema, table, &bound, order_by);

        let owned: Vec<Bound> = bound
            .iter()
            .map(|f| match f.operator {
                FilterOperator::Like => Bound::Text(like_text(&f.value)),
                _ => Bound::Json(f.value.clone()),
            })
            .collect();

        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(owned.len() + 2);
        for p in &owned {
            match p {
                Bound::Json(v) => params.push(v),
                Bound::Text(s) => params.push(s),
            }
        }
        params.push(&limit);
        params.push(&offset);

        let rows = client.query(sql.as_str(), &params).await?;
        Ok(rows.iter().map(|r| r.get::<_, Value>(0)).collect())
    }

    /// Fetch a single row by primary-key value (text form), or `None`
    pub async fn get_by_primary_key<C>(
        client: &C,
        schema: &str,
        table: &str,
        id: &str,
    ) -> CoreResult<Option<Value>>
    where
        C: GenericClient,
    {
        // Reflect first so an unknown table is NotFound, not NoPrimaryKey
        SchemaCatalog::describe_table(client, schema, table).await?;
        let pk = SchemaCatalog::primary_key_column(client, schema, table).await?;

        let sql = SqlBuilder::select_by_pk(schema, table, &pk);
        let row = client.query_opt(sql.as_str(), &[&id]).await?;
        Ok(row.map(|r| r.get::<_, Value>(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn col(name: &str, pk: bool) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            data_type: "text".to_string(),
            nullable: true,
            default_value: None,
            is_primary_key: pk,
            ordinal_position: 0,
        }
    }

    fn filter(column: &str, operator: &str, value: Value) -> Filter {
        Filter {
            column: column.to_string(),
            operator: operator.to_string(),
            value,
        }
    }

    #[test]
    fn test_operator_allow_list() {
        for op in ["=", "!=", ">", "<", ">=", "<=", "LIKE"] {
            assert!(FilterOperator::parse(op).is_some(), "operator {}", op);
        }
        assert!(FilterOperator::parse("like").is_none());
        assert!(FilterOperator::parse("IN").is_none());
        assert!(FilterOperator::parse("; DROP TABLE products --").is_none());
    }

    #[test]
    fn test_unknown_column_is_silently_dropped() {
        let columns = vec![col("id", true), col("category", false)];
        let filters = vec![
            filter("category", "=", json!("Electronics")),
            filter("id; DROP TABLE products", "=", json!(1)),
        ];
        let kept = retain_valid(&filters, &columns);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].column, "category");
    }

    #[test]
    fn test_disallowed_operator_is_silently_dropped() {
        let columns = vec![col("price", false)];
        let filters = vec![
            filter("price", ">=", json!(10)),
            filter("price", "BETWEEN", json!(10)),
        ];
        let kept = retain_valid(&filters, &columns);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].operator, FilterOperator::Ge);
    }

    #[test]
    fn test_build_select_no_filters() {
        let sql = build_select("dev", "products", &[], Some("id"));
        assert_eq!(
            sql,
            "SELECT to_jsonb(t) AS row FROM \"dev\".\"products\" AS t \
             ORDER BY t.\"id\" LIMIT $1 OFFSET $2"
        );
    }

    #[test]
    fn test_build_select_numbering_and_like() {
        let columns = vec![col("id", true), col("category", false), col("name", false)];
        let filters = vec![
            filter("category", "=", json!("Electronics")),
            filter("name", "LIKE", json!("%widget%")),
        ];
        let bound = retain_valid(&filters, &columns);
        let sql = build_select("dev", "products", &bound, Some("id"));
        assert_eq!(
            sql,
            "SELECT to_jsonb(t) AS row FROM \"dev\".\"products\" AS t \
             WHERE to_jsonb(t.\"category\") = $1::jsonb \
             AND t.\"name\"::text LIKE $2 \
             ORDER BY t.\"id\" LIMIT $3 OFFSET $4"
        );
    }

    #[test]
    fn test_build_select_without_primary_key_keeps_insertion_order() {
        let sql = build_select("dev", "events", &[], None);
        assert_eq!(
            sql,
            "SELECT to_jsonb(t) AS row FROM \"dev\".\"events\" AS t LIMIT $1 OFFSET $2"
        );
    }

    #[test]
    fn test_like_text_rendering() {
        assert_eq!(like_text(&json!("abc%")), "abc%");
        assert_eq!(like_text(&json!(42)), "42");
    }
}
