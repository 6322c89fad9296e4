use anyhow::Result;
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

/// Layout version of the selection tables. Bump to discard stored selections on upgrade.
pub const STORE_VERSION: i64 = 1;

/// Initialize database connection and run migrations
pub async fn init_db(db_path: &Path) -> Result<SqlitePool> {
    let db_url = format!("sqlite://{}", db_path.display());

    // Create database file if it doesn't exist
    if !sqlx::Sqlite::database_exists(&db_url).await? {
        tracing::info!("Creating database at {}", db_path.display());
        sqlx::Sqlite::create_database(&db_url).await?;
    }

    let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    tracing::info!("Database initialized successfully");
    Ok(pool)
}

/// Open a private in-memory database with the same schema
///
/// Uses a single connection that never expires, since every SQLite memory
/// connection sees its own empty database.
pub async fn init_memory_db() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run database migrations
async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    tracing::debug!("Running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS selected_renderer (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
    "#,
    )
    .execute(pool)
    .await?;

    let version: Option<i64> = sqlx::query("SELECT value FROM store_meta WHERE key = 'version'")
        .fetch_optional(pool)
        .await?
        .map(|row| row.get(0));

    if version != Some(STORE_VERSION) {
        tracing::warn!(
            "Selection store version {:?} does not match {}, erasing stored selection",
            version,
            STORE_VERSION
        );

        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM selected_renderer")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO store_meta (key, value) VALUES ('version', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(STORE_VERSION)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
    }

    tracing::debug!("Database migrations completed");
    Ok(())
}
