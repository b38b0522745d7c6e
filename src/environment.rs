//! Environment routing
//!
//! Maps a logical environment name (dev/test/prod/...) to an isolated
//! PostgreSQL schema and hands out pooled connections pinned to it. Every
//! generated statement additionally schema-qualifies its table references with
//! the validated environment name, so a connection acquired for one
//! environment cannot address another's namespace whatever strings a caller
//! supplies.

use crate::error::{invalid_input, AppError, CoreResult};
use crate::sql::quote_ident;
use deadpool_postgres::{Client, Pool, Transaction};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::info;

/// Environment names are a stricter subset of identifiers: lowercase, no
/// dollar signs, so they can double as schema names everywhere.
static ENV_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,62}$").expect("env name regex"));

/// A validated logical environment name. The only way to obtain one is
/// through [`EnvName::new`], which is what makes it safe to embed as a
/// quoted schema identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvName(String);

impl EnvName {
    pub fn new(name: &str) -> CoreResult<Self> {
        if ENV_NAME_RE.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(invalid_input(format!(
                "invalid environment name '{}': must match [a-z][a-z0-9_]*",
                name
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pooled connection scoped to one environment's schema
pub struct EnvConnection {
    client: Client,
    env: EnvName,
}

impl EnvConnection {
    /// The schema this connection is bound to
    pub fn schema(&self) -> &str {
        self.env.as_str()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Begin a transaction on this connection
    pub async fn transaction(&mut self) -> CoreResult<Transaction<'_>> {
        Ok(self.client.transaction().await?)
    }
}

/// Routes logical environments to isolated schemas over one shared pool
pub struct EnvironmentRouter {
    pool: Pool,
}

impl EnvironmentRouter {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Idempotently create the environment's schema and its control tables
    pub async fn ensure_namespace(&self, env: &EnvName) -> CoreResult<()> {
        let client = self.pool.get().await?;
        let schema = quote_ident(env.as_str());

        client
            .execute(format!("CREATE SCHEMA IF NOT EXISTS {}", schema).as_str(), &[])
            .await?;

        client
            .execute(
                format!(
                    "CREATE TABLE IF NOT EXISTS {}.pending_changes (
                        id BIGSERIAL PRIMARY KEY,
                        table_name TEXT NOT NULL,
                        record_id TEXT,
                        old_values JSONB,
                        new_values JSONB NOT NULL,
                        status TEXT NOT NULL DEFAULT 'PENDING',
                        submitted_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                        submitted_by TEXT NOT NULL
                    )",
                    schema
                )
                .as_str(),
                &[],
            )
            .await?;

        client
            .execute(
                format!(
                    "CREATE TABLE IF NOT EXISTS {}.snapshots (
                        id BIGSERIAL PRIMARY KEY,
                        change_request_id BIGINT NOT NULL UNIQUE,
                        table_name TEXT NOT NULL,
                        snapshot_data JSONB NOT NULL,
                        row_count BIGINT NOT NULL,
                        checksum TEXT NOT NULL,
                        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                    )",
                    schema
                )
                .as_str(),
                &[],
            )
            .await?;

        client
            .execute(
                format!(
                    "CREATE TABLE IF NOT EXISTS {}.audit_log (
                        id BIGSERIAL PRIMARY KEY,
                        pending_change_id BIGINT NOT NULL UNIQUE,
                        table_name TEXT NOT NULL,
                        record_id TEXT NOT NULL,
                        before_state JSONB,
                        after_state JSONB NOT NULL,
                        approved_by_id TEXT NOT NULL,
                        approved_at TIMESTAMPTZ NOT NULL DEFAULT now()
                    )",
                    schema
                )
                .as_str(),
                &[],
            )
            .await?;

        info!("Namespace ensured for environment '{}'", env);
        Ok(())
    }

    /// A pooled connection with no schema pinning, for bootstrap DDL that
    /// addresses namespaces by qualified name
    pub async fn acquire_raw(&self) -> CoreResult<Client> {
        Ok(self.pool.get().await.map_err(AppError::Pool)?)
    }

    /// Acquire a pooled connection pinned to the environment's schema.
    ///
    /// The pool bounds acquisition; the client returns to the pool when the
    /// returned value drops, on every exit path.
    pub async fn acquire(&self, env: &EnvName) -> CoreResult<EnvConnection> {
        let client = self.pool.get().await.map_err(AppError::Pool)?;
        client
            .execute(
                format!("SET search_path TO {}", quote_ident(env.as_str())).as_str(),
                &[],
            )
            .await?;
        Ok(EnvConnection {
            client,
            env: env.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_name_accepts_plain_names() {
        assert!(EnvName::new("dev").is_ok());
        assert!(EnvName::new("prod_eu_1").is_ok());
    }

    #[test]
    fn test_env_name_rejects_hostile_strings() {
        assert!(EnvName::new("").is_err());
        assert!(EnvName::new("Dev").is_err());
        assert!(EnvName::new("dev; DROP SCHEMA prod").is_err());
        assert!(EnvName::new("pg_catalog\"").is_err());
        assert!(EnvName::new(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_env_name_display_round_trip() {
        let env = EnvName::new("test").unwrap();
        assert_eq!(env.to_string(), "test");
        assert_eq!(env.as_str(), "test");
    }
}
