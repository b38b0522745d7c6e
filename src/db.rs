//! Database pool bootstrap
//!
//! Builds the shared deadpool-postgres pool from configuration, with optional
//! TLS for managed providers, and verifies connectivity before handing it out.

use crate::config::DatabaseConfig;
use crate::error::{AppError, CoreResult};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tracing::info;

/// Create the connection pool and verify it with a test query
pub async fn init_pool(db: &DatabaseConfig) -> CoreResult<Pool> {
    let mut cfg = Config::new();
    cfg.host = Some(db.host.clone());
    cfg.port = Some(db.port);
    cfg.user = Some(db.user.clone());
    cfg.password = Some(db.password.clone());
    cfg.dbname = Some(db.database.clone());
    cfg.pool = Some(PoolConfig::new(db.max_pool_size));
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = if db.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| AppError::Config(format!("Failed to create TLS pool: {}", e)))?
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))?
    };

    // Verify the pool actually reaches the server before anything depends on it
    let client = pool.get().await?;
    client.query_one("SELECT 1 AS ok", &[]).await?;
    drop(client);

    info!(
        "Database pool ready: {}@{}:{}/{} (TLS: {})",
        db.user, db.host, db.port, db.database, db.require_tls
    );
    Ok(pool)
}
