// Persistence layer for the VPN storefront: models, migrations and the
// ledger store implementations

pub mod models;
pub mod repositories;
pub mod config;
pub mod error;
pub mod utils;

// Re-export commonly used items
pub use sqlx;
pub use config::DatabaseConfig;
pub use error::{constraints, StoreError, StoreResult};
pub use repositories::{LedgerStore, LedgerTx, PgLedgerStore};
#[cfg(feature = "memory")]
pub use repositories::MemoryLedgerStore;

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Database connection manager
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database instance from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.database_url)
            .await
            .context("Failed to connect to database")?;

        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database pool ready"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    pub fn ledger_store(&self) -> PgLedgerStore {
        PgLedgerStore::new(self.pool.clone())
    }
}
