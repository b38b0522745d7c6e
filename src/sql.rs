//! Dynamic SQL construction
//!
//! All statements that embed table or column names are built here. Structural
//! parts (schema, table, column) are always identifiers taken from reflected
//! metadata or validated against the identifier allow-list, then quoted;
//! values travel exclusively as bound parameters.

use once_cell::sync::Lazy;
use regex::Regex;

/// PostgreSQL identifiers: start with a letter or underscore, then letters,
/// digits, underscores, or dollar signs, at most 63 bytes.
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_$]*$").expect("identifier regex"));

/// Validate a PostgreSQL identifier against the allow-list
pub fn is_valid_identifier(name: &str) -> bool {
    name.len() <= 63 && IDENTIFIER_RE.is_match(name)
}

/// Quote an identifier (schema/table/column name) safely
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Schema-qualify a table name
pub fn qualify(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Builders for the dynamic statements used by the reflected write path.
///
/// Typed coercion of JSON payloads is delegated to the server through
/// `jsonb_populate_record`, so a single jsonb parameter serves arbitrary
/// column types.
pub struct SqlBuilder;

impl SqlBuilder {
    /// INSERT the intersected columns from a jsonb payload ($1), returning the
    /// generated primary key in text form.
    pub fn insert_from_json(schema: &str, table: &str, columns: &[String], pk: &str) -> String {
        let target = qualify(schema, table);
        let col_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let select_list = columns
            .iter()
            .map(|c| format!("r.{}", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {target} ({col_list}) SELECT {select_list} \
             FROM jsonb_populate_record(NULL::{target}, $1) AS r RETURNING {pk}::text",
            target = target,
            col_list = col_list,
            select_list = select_list,
            pk = quote_ident(pk),
        )
    }

    /// UPDATE the intersected columns from a jsonb payload ($1) on the row
    /// whose primary key matches $2 (text form).
    pub fn update_from_json(schema: &str, table: &str, columns: &[String], pk: &str) -> String {
        let target = qualify(schema, table);
        let set_list = columns
            .iter()
            .map(|c| format!("{col} = r.{col}", col = quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {target} AS t SET {set_list} \
             FROM jsonb_populate_record(NULL::{target}, $1) AS r WHERE t.{pk}::text = $2",
            target = target,
            set_list = set_list,
            pk = quote_ident(pk),
        )
    }

    /// DELETE the row whose primary key matches $1 (text form)
    pub fn delete_by_pk(schema: &str, table: &str, pk: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {}::text = $1",
            qualify(schema, table),
            quote_ident(pk)
        )
    }

    /// Select one row as a jsonb document by primary key ($1, text form)
    pub fn select_by_pk(schema: &str, table: &str, pk: &str) -> String {
        format!(
            "SELECT to_jsonb(t) AS row FROM {} AS t WHERE t.{}::text = $1",
            qualify(schema, table),
            quote_ident(pk)
        )
    }

    /// Aggregate the entire table into one jsonb array, primary-key ascending
    pub fn aggregate_table(schema: &str, table: &str, pk: &str) -> String {
        format!(
            "SELECT COALESCE(jsonb_agg(to_jsonb(t) ORDER BY t.{}), '[]'::jsonb) AS rows FROM {} AS t",
            quote_ident(pk),
            qualify(schema, table)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_identifier_allow_list() {
        assert!(is_valid_identifier("products"));
        assert!(is_valid_identifier("_audit_log"));
        assert!(is_valid_identifier("Table$1"));
        assert!(!is_valid_identifier("id; DROP TABLE products"));
        assert!(!is_valid_identifier("1starts_with_digit"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier(&"x".repeat(64)));
    }

    #[test]
    fn test_quote_ident_escapes_embedded_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_insert_statement_shape() {
        let cols = vec!["name".to_string(), "price".to_string()];
        let sql = SqlBuilder::insert_from_json("dev", "products", &cols, "id");
        assert_eq!(
            sql,
            "INSERT INTO \"dev\".\"products\" (\"name\", \"price\") \
             SELECT r.\"name\", r.\"price\" \
             FROM jsonb_populate_record(NULL::\"dev\".\"products\", $1) AS r \
             RETURNING \"id\"::text"
        );
    }

    #[test]
    fn test_update_statement_shape() {
        let cols = vec!["stock_quantity".to_string()];
        let sql = SqlBuilder::update_from_json("dev", "products", &cols, "id");
        assert_eq!(
            sql,
            "UPDATE \"dev\".\"products\" AS t SET \"stock_quantity\" = r.\"stock_quantity\" \
             FROM jsonb_populate_record(NULL::\"dev\".\"products\", $1) AS r \
             WHERE t.\"id\"::text = $2"
        );
    }

    #[test]
    fn test_delete_and_select_by_pk() {
        assert_eq!(
            SqlBuilder::delete_by_pk("prod", "orders", "order_id"),
            "DELETE FROM \"prod\".\"orders\" WHERE \"order_id\"::text = $1"
        );
        assert_eq!(
            SqlBuilder::select_by_pk("prod", "orders", "order_id"),
            "SELECT to_jsonb(t) AS row FROM \"prod\".\"orders\" AS t WHERE t.\"order_id\"::text = $1"
        );
    }

    #[test]
    fn test_aggregate_table_shape() {
        assert_eq!(
            SqlBuilder::aggregate_table("test", "products", "id"),
            "SELECT COALESCE(jsonb_agg(to_jsonb(t) ORDER BY t.\"id\"), '[]'::jsonb) AS rows \
             FROM \"test\".\"products\" AS t"
        );
    }
}
