use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Current on-disk layout, recorded as `store_meta.schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// `triage init`: create the database file and schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            repo TEXT NOT NULL,
            item_type TEXT NOT NULL,
            number INTEGER NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL DEFAULT '',
            author TEXT NOT NULL DEFAULT '',
            state TEXT NOT NULL DEFAULT 'open',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            labels_json TEXT NOT NULL DEFAULT '[]',
            additions INTEGER,
            deletions INTEGER,
            changed_files INTEGER,
            ci_status TEXT NOT NULL DEFAULT 'unknown',
            review_count INTEGER NOT NULL DEFAULT 0,
            has_tests INTEGER,
            PRIMARY KEY (repo, item_type, number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One vector per item. All-zero vectors mark failed embeddings.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            repo TEXT NOT NULL,
            item_type TEXT NOT NULL,
            number INTEGER NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            text_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            vector BLOB NOT NULL,
            PRIMARY KEY (repo, item_type, number),
            FOREIGN KEY (repo, item_type, number) REFERENCES items(repo, item_type, number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_diffs (
            repo TEXT NOT NULL,
            item_type TEXT NOT NULL,
            number INTEGER NOT NULL,
            diff TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            PRIMARY KEY (repo, item_type, number),
            FOREIGN KEY (repo, item_type, number) REFERENCES items(repo, item_type, number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_repo_updated ON items(repo, updated_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_author ON items(repo, author)")
        .execute(pool)
        .await?;

    let stored: Option<String> =
        sqlx::query_scalar("SELECT value FROM store_meta WHERE key = 'schema_version'")
            .fetch_optional(pool)
            .await?;
    match stored.as_deref().map(str::parse::<i64>) {
        None => {
            sqlx::query("INSERT INTO store_meta (key, value) VALUES ('schema_version', ?)")
                .bind(SCHEMA_VERSION.to_string())
                .execute(pool)
                .await?;
        }
        Some(Ok(v)) if v == SCHEMA_VERSION => {}
        Some(Ok(v)) if v > SCHEMA_VERSION => bail!(
            "database schema version {} is newer than this build supports ({})",
            v,
            SCHEMA_VERSION
        ),
        Some(_) => bail!("unrecognised schema_version in store_meta"),
    }

    Ok(())
}
