//! MySQL connection pool lifecycle.

use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use jobq_config::StoreConfig;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Owner of the physical connection pool.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Opens the pool. Calling it again is a no-op.
    async fn init(&self) -> StoreResult<()>;

    /// Returns the live pool.
    fn pool(&self) -> StoreResult<MySqlPool>;

    /// Releases the pool. Calling it again is a no-op.
    async fn close(&self);
}

/// MySQL store backend.
pub struct MySqlStore {
    config: StoreConfig,
    pool: OnceCell<MySqlPool>,
    closed: AtomicBool,
}

impl MySqlStore {
    /// Creates an uninitialized store; call [`StoreBackend::init`] before use.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Wraps an already open pool.
    #[must_use]
    pub fn with_pool(config: StoreConfig, pool: MySqlPool) -> Self {
        Self {
            config,
            pool: OnceCell::new_with(Some(pool)),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn connect(&self) -> StoreResult<MySqlPool> {
        let config = &self.config;
        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connecting to MySQL store..."
        );

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        let pool = MySqlPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .max_lifetime(Some(config.max_lifetime()))
            .connect_with(options)
            .await
            .map_err(|source| {
                warn!("Failed to connect to MySQL store: {}", source);
                StoreError::Connect {
                    host: config.host.clone(),
                    port: config.port,
                    source,
                }
            })?;

        if config.run_migrations {
            migrate(&pool).await?;
        }

        info!("MySQL store connection pool established");
        Ok(pool)
    }

    /// Checks that the store answers queries.
    pub async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool()?).await?;
        Ok(())
    }

    /// Applies the bundled schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        migrate(&self.pool()?).await
    }
}

async fn migrate(pool: &MySqlPool) -> StoreResult<()> {
    info!("Running database migrations...");
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

#[async_trait]
impl StoreBackend for MySqlStore {
    async fn init(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::NotInitialized);
        }
        self.pool.get_or_try_init(|| self.connect()).await?;
        Ok(())
    }

    fn pool(&self) -> StoreResult<MySqlPool> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::NotInitialized);
        }
        self.pool.get().cloned().ok_or(StoreError::NotInitialized)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(pool) = self.pool.get() {
            info!("Closing MySQL store connection pool...");
            pool.close().await;
            info!("MySQL store connection pool closed");
        }
    }
}

impl std::fmt::Debug for MySqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("MySqlStore");
        s.field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed));
        if let Some(pool) = self.pool.get() {
            s.field("size", &pool.size()).field("num_idle", &pool.num_idle());
        }
        s.finish()
    }
}
