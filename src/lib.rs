//! rowgate — a schema-driven change-approval engine for PostgreSQL.
//!
//! Every row mutation is proposed first, reviewed, and only applied on
//! approval, with an automatic table snapshot and an immutable audit entry
//! written in the same transaction. Tables are discovered at runtime through
//! catalog reflection, so the engine works against any relational layout
//! without per-table code. Each environment (dev, test, prod, ...) lives in
//! its own PostgreSQL schema inside one shared database.
//!
//! Typical wiring:
//!
//! ```no_run
//! use rowgate::{AdminEngine, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load()?;
//!     let pool = rowgate::init_pool(&settings.database).await?;
//!     let engine = AdminEngine::new(pool);
//!     engine.ensure_environments(&settings).await?;
//!
//!     for table in engine.list_tables("dev").await? {
//!         println!("{table}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod apply;
pub mod audit;
pub mod browser;
pub mod catalog;
pub mod change;
pub mod config;
pub mod db;
pub mod engine;
pub mod environment;
pub mod error;
pub mod snapshot;
pub mod sql;

pub use apply::AppliedChange;
pub use audit::AuditLogEntry;
pub use browser::{Filter, FilterOperator};
pub use catalog::ColumnDescriptor;
pub use change::{ChangeOp, ChangeStatus, NewChangeRequest, PendingChange, PendingChangeView};
pub use config::{DatabaseConfig, Settings};
pub use db::init_pool;
pub use engine::AdminEngine;
pub use environment::{EnvName, EnvironmentRouter};
pub use error::{AppError, CoreResult};
pub use snapshot::{SnapshotDetail, SnapshotSummary};
