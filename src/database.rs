#[cfg(feature = "database")]
use anyhow::Result;
#[cfg(feature = "database")]
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
#[cfg(feature = "database")]
use sqlx::{migrate::MigrateDatabase, SqlitePool};
#[cfg(feature = "database")]
use std::str::FromStr;
#[cfg(feature = "database")]
use std::time::Duration;
#[cfg(feature = "database")]
use tracing::info;

#[cfg(feature = "database")]
use crate::config::DatabaseConfig;

#[cfg(feature = "database")]
/// Database manager owning the SQLite pool behind the workflow repository
pub struct DatabaseManager {
    pool: SqlitePool,
}

#[cfg(feature = "database")]
impl DatabaseManager {
    /// Open (creating if needed) the database and optionally run migrations
    pub async fn new(database_url: &str, auto_migrate: bool, max_connections: u32) -> Result<Self> {
        // Create database if it doesn't exist
        if !sqlx::Sqlite::database_exists(database_url).await? {
            info!("Creating database at {}", database_url);
            sqlx::Sqlite::create_database(database_url).await?;
        }

        // WAL lets readers proceed while a status commit holds the write lock;
        // busy_timeout makes a second writer wait instead of failing.
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        if auto_migrate {
            Self::migrate(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Open the database described by the `[database]` config section
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        info!("Initializing database at {}", config.url);
        Self::new(&config.url, config.auto_migrate, config.max_connections).await
    }

    /// Apply pending migrations from `./migrations`
    pub async fn migrate(pool: &SqlitePool) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get database pool for queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}
