use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database file and every table cmdex reads or writes.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Source tables. v3 and v4 rows are numbered independently, so the
    // version is part of every key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commands (
            version INTEGER NOT NULL CHECK (version IN (3, 4)),
            id INTEGER NOT NULL,
            name TEXT NOT NULL,
            synopsis TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            syntax TEXT NOT NULL DEFAULT '',
            is_deprecated INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (version, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parameters (
            command_version INTEGER NOT NULL,
            id INTEGER NOT NULL,
            command_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            type_name TEXT,
            description TEXT NOT NULL DEFAULT '',
            is_required INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (command_version, id),
            FOREIGN KEY (command_version, command_id) REFERENCES commands(version, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS examples (
            command_version INTEGER NOT NULL,
            id INTEGER NOT NULL,
            command_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            code TEXT NOT NULL DEFAULT '',
            description TEXT,
            PRIMARY KEY (command_version, id),
            FOREIGN KEY (command_version, command_id) REFERENCES commands(version, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS doc_sections (
            path TEXT NOT NULL,
            heading TEXT NOT NULL,
            body TEXT NOT NULL,
            version INTEGER,
            PRIMARY KEY (path, heading)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS version_mappings (
            v3_command_id INTEGER NOT NULL,
            v4_command_id INTEGER NOT NULL,
            PRIMARY KEY (v3_command_id, v4_command_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Sync ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_records (
            unit_id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_key TEXT NOT NULL,
            parent_key TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_total INTEGER NOT NULL,
            last_hash TEXT NOT NULL,
            last_synced_at INTEGER NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_parameters_command ON parameters(command_version, command_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_examples_command ON examples(command_version, command_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_records_status ON sync_records(status)")
        .execute(pool)
        .await?;

    Ok(())
}
