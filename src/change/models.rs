//! Pending-change data models

use crate::error::{invalid_input, AppError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_postgres::Row;
use validator::Validate;

/// Lifecycle status of a pending change.
///
/// PENDING is initial; APPROVED and REJECTED are terminal. A status changes
/// exactly once, and never leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    Pending,
    Approved,
    Rejected,
}

impl ChangeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(AppError::Internal(format!(
                "unrecognized change status '{}'",
                other
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

/// A proposed row mutation awaiting (or past) decision
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub id: i64,
    pub table_name: String,
    /// Primary-key value in text form; absent for inserts until approval
    /// writes back the generated key
    pub record_id: Option<String>,
    /// Advisory snapshot of the prior row supplied by the proposer
    pub old_values: Option<Value>,
    pub new_values: Map<String, Value>,
    pub status: ChangeStatus,
    pub submitted_at: DateTime<Utc>,
    pub submitted_by: String,
}

impl PendingChange {
    /// Column list shared by every pending_changes query
    pub(crate) const COLUMNS: &'static str =
        "id, table_name, record_id, old_values, new_values, status, submitted_at, submitted_by";

    pub(crate) fn from_row(row: &Row) -> CoreResult<Self> {
        let status: String = row.get("status");
        let new_values = match row.get::<_, Value>("new_values") {
            Value::Object(map) => map,
            other => {
                return Err(AppError::Internal(format!(
                    "pending change {} has non-object new_values: {}",
                    row.get::<_, i64>("id"),
                    other
                )))
            }
        };
        Ok(Self {
            id: row.get("id"),
            table_name: row.get("table_name"),
            record_id: row.get("record_id"),
            old_values: row.get("old_values"),
            new_values,
            status: ChangeStatus::parse(&status)?,
            submitted_at: row.get("submitted_at"),
            submitted_by: row.get("submitted_by"),
        })
    }
}

/// A pending change enriched with the current live row it targets, if any
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChangeView {
    #[serde(flatten)]
    pub change: PendingChange,
    /// Best-effort current row; `None` when the record no longer exists
    pub original_record: Option<Value>,
}

/// Submission payload for a proposed edit
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewChangeRequest {
    #[validate(length(min = 1, max = 63, message = "table name is required"))]
    pub table_name: String,
    pub record_id: Option<String>,
    pub old_values: Option<Value>,
    #[serde(default)]
    pub new_values: Map<String, Value>,
    #[validate(length(min = 1, message = "submitter is required"))]
    pub submitted_by: String,
}

/// The operation a change resolves to when applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    /// Classify by the presence of a record id and payload:
    /// no id + data → INSERT, id + data → UPDATE, id + no data → DELETE.
    /// No id and no data is not a change at all.
    pub fn classify(record_id: Option<&str>, new_values: &Map<String, Value>) -> CoreResult<Self> {
        match (record_id, new_values.is_empty()) {
            (None, false) => Ok(Self::Insert),
            (Some(_), false) => Ok(Self::Update),
            (Some(_), true) => Ok(Self::Delete),
            (None, true) => Err(invalid_input(
                "a change without a record id must carry new values",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn payload(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_classify_matrix() {
        let data = payload(&[("name", json!("Widget"))]);
        let empty = Map::new();

        assert_eq!(ChangeOp::classify(None, &data).unwrap(), ChangeOp::Insert);
        assert_eq!(
            ChangeOp::classify(Some("42"), &data).unwrap(),
            ChangeOp::Update
        );
        assert_eq!(
            ChangeOp::classify(Some("42"), &empty).unwrap(),
            ChangeOp::Delete
        );
        assert!(ChangeOp::classify(None, &empty).is_err());
    }

    #[test]
    fn test_status_canonical_casing() {
        assert_eq!(ChangeStatus::Pending.as_str(), "PENDING");
        assert_eq!(ChangeStatus::parse("APPROVED").unwrap(), ChangeStatus::Approved);
        assert!(ChangeStatus::parse("pending").is_err());
        assert_eq!(
            serde_json::to_string(&ChangeStatus::Rejected).unwrap(),
            "\"REJECTED\""
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ChangeStatus::Pending.is_terminal());
        assert!(ChangeStatus::Approved.is_terminal());
        assert!(ChangeStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_new_change_request_validation() {
        let ok: NewChangeRequest = serde_json::from_value(json!({
            "tableName": "products",
            "newValues": {"name": "Widget"},
            "submittedBy": "alice"
        }))
        .unwrap();
        assert!(ok.validate().is_ok());

        let missing_submitter: NewChangeRequest = serde_json::from_value(json!({
            "tableName": "products",
            "newValues": {"name": "Widget"},
            "submittedBy": ""
        }))
        .unwrap();
        assert!(missing_submitter.validate().is_err());
    }
}
