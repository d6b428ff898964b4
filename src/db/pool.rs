//! Session database: connection pool and schema versioning

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Executor, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Schema versions in order. The applied version is kept in `PRAGMA user_version`.
const MIGRATIONS: [(i64, &str); 1] = [(1, include_str!("../../migrations/001_sessions.sql"))];

/// Open the session database. Accepts a file path or a `sqlite:` URL.
pub async fn create_pool(database: &str) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = database.contains(":memory:");
    let options = if database.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(database)?
    } else {
        if let Some(parent) = Path::new(database).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        SqliteConnectOptions::new().filename(database)
    };
    let options = options.create_if_missing(true).journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        // every in-memory connection would get its own empty database
        .max_connections(if in_memory { 1 } else { 4 })
        .connect_with(options)
        .await
}

pub async fn schema_version(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version").fetch_one(pool).await?;
    Ok(version)
}

/// Apply every migration newer than the recorded schema version, each in
/// its own transaction. Returns the resulting version.
pub async fn run_migrations(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let applied = schema_version(pool).await?;
    let mut current = applied;

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > applied) {
        let mut tx = pool.begin().await?;
        (&mut *tx).execute(*sql).await?;
        (&mut *tx)
            .execute(format!("PRAGMA user_version = {}", version).as_str())
            .await?;
        tx.commit().await?;

        info!("Session database migrated to schema version {}", version);
        current = *version;
    }

    Ok(current)
}

/// Open the database and bring its schema up to date
pub async fn init_database(database: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = create_pool(database).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
