//! SQLite-backed [`VectorStore`] implementation.
//!
//! Items, embeddings and cached diffs live in the tables created by
//! [`migrate::apply`](crate::migrate::apply). Store-level metadata
//! (embedding model, width, truncation) lives in `store_meta` and is
//! checked on every read-write open before anything is written, so a
//! config change that would mix incompatible vectors fails fast with a
//! typed [`StoreError`].
//!
//! Approximate search uses an in-process [`KeyedIndex`] built from one bulk
//! fetch per repo and dropped whenever that repo's vectors change.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use triage_core::embedding::EmbeddingProvider;
use triage_core::error::StoreError;
use triage_core::models::{CiStatus, Item, ItemKey, ItemState, ItemType};
use triage_core::similarity::{blob_to_vec, is_zero_vector, vec_to_blob};
use triage_core::store::ann::KeyedIndex;
use triage_core::store::{check_dims, StoreStats, VectorStore};

use crate::config::EmbeddingConfig;
use crate::db;
use crate::embedding::local_model_dims;
use crate::migrate;

/// Cached diffs are cut to this many bytes.
pub const MAX_DIFF_BYTES: usize = 100 * 1024;

const META_MODEL: &str = "embedding_model";
const META_DIMS: &str = "embedding_dims";
const META_TRUNCATE: &str = "truncate_dims";
const META_NATIVE: &str = "native_dims";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Governance checks enforced; writes allowed.
    ReadWrite,
    /// No model or width checks and no writes. For `stats` and `get`.
    Inspect,
}

/// What the caller is about to write, checked against `store_meta`.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub mode: OpenMode,
    pub model: Option<String>,
    /// Width of stored vectors (after truncation).
    pub dims: Option<usize>,
    pub truncate_dims: Option<usize>,
    pub native_dims: Option<usize>,
}

impl StoreOptions {
    pub fn inspect() -> Self {
        Self {
            mode: OpenMode::Inspect,
            model: None,
            dims: None,
            truncate_dims: None,
            native_dims: None,
        }
    }

    /// Read-write options for the configured embedding setup. A disabled
    /// provider declares nothing, so only widths are enforced on write.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        if !config.is_enabled() {
            return Self {
                mode: OpenMode::ReadWrite,
                ..Self::inspect()
            };
        }
        Self {
            mode: OpenMode::ReadWrite,
            model: config.model.clone(),
            dims: config.effective_dims(),
            truncate_dims: config.truncate_dims,
            native_dims: config.dims,
        }
    }

    /// Read-write options taken from a live provider, which knows its
    /// model and width even when the config leaves them implicit.
    pub fn for_provider(
        model: &str,
        dims: usize,
        truncate_dims: Option<usize>,
        native_dims: usize,
    ) -> Self {
        Self {
            mode: OpenMode::ReadWrite,
            model: Some(model.to_string()),
            dims: Some(dims),
            truncate_dims,
            native_dims: Some(native_dims),
        }
    }

    /// Options for writing with `provider`, or [`from_config`](Self::from_config)
    /// when embedding is disabled.
    pub fn for_live_provider(
        config: &EmbeddingConfig,
        provider: Option<&dyn EmbeddingProvider>,
    ) -> Self {
        let Some(provider) = provider else {
            return Self::from_config(config);
        };
        let native = config
            .dims
            .or_else(|| config.model.as_deref().and_then(local_model_dims))
            .unwrap_or(provider.dims());
        Self::for_provider(
            provider.model_name(),
            provider.dims(),
            config.truncate_dims,
            native,
        )
    }
}

/// The governance metadata recorded in `store_meta`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreMeta {
    pub embedding_model: Option<String>,
    pub embedding_dims: Option<usize>,
    pub truncate_dims: Option<usize>,
    pub native_dims: Option<usize>,
    pub schema_version: Option<i64>,
}

pub struct SqliteStore {
    pool: SqlitePool,
    mode: OpenMode,
    model: Option<String>,
    dims: RwLock<Option<usize>>,
    indexes: RwLock<HashMap<String, Arc<KeyedIndex>>>,
}

impl SqliteStore {
    /// Open the store, run migrations and enforce governance.
    ///
    /// In [`OpenMode::ReadWrite`] this fails with
    /// [`StoreError::EmbeddingModelChanged`], [`StoreError::TruncationChanged`]
    /// or [`StoreError::DimensionMismatch`] when `options` disagree with
    /// what the store already holds. Missing metadata is recorded only
    /// after every check has passed.
    pub async fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::apply(&pool).await?;
        let meta = read_meta(&pool).await?;

        if options.mode == OpenMode::ReadWrite {
            check_governance(&pool, &meta, &options).await?;
            record_meta(&pool, &meta, &options).await?;
        }

        let dims = meta.embedding_dims.or(match options.mode {
            OpenMode::ReadWrite => options.dims,
            OpenMode::Inspect => None,
        });

        Ok(Self {
            pool,
            mode: options.mode,
            model: options.model.or(meta.embedding_model),
            dims: RwLock::new(dims),
            indexes: RwLock::new(HashMap::new()),
        })
    }

    /// Delete every embedding and the embedding metadata, so the next
    /// read-write open can record a new model or width.
    pub async fn reset_embeddings(path: &Path) -> Result<u64> {
        let pool = db::connect(path).await?;
        migrate::apply(&pool).await?;
        let mut tx = pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM embeddings")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM store_meta WHERE key IN (?, ?, ?, ?)")
            .bind(META_MODEL)
            .bind(META_DIMS)
            .bind(META_TRUNCATE)
            .bind(META_NATIVE)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        pool.close().await;
        Ok(deleted)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub async fn meta(&self) -> Result<StoreMeta> {
        read_meta(&self.pool).await
    }

    /// Every repo with stored items.
    pub async fn repos(&self) -> Result<Vec<String>> {
        Ok(
            sqlx::query_scalar("SELECT DISTINCT repo FROM items ORDER BY repo")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Keys of every stored item in `repo`, in key order.
    pub async fn keys_for_repo(&self, repo: &str) -> Result<Vec<ItemKey>> {
        let rows = sqlx::query("SELECT repo, item_type, number FROM items WHERE repo = ?")
            .bind(repo)
            .fetch_all(&self.pool)
            .await?;
        let mut keys = rows.iter().map(key_from_row).collect::<Result<Vec<_>>>()?;
        keys.sort();
        Ok(keys)
    }

    /// Last stored `updated_at` of an item, if it is known.
    pub async fn stored_updated_at(&self, key: &ItemKey) -> Result<Option<DateTime<Utc>>> {
        let ts: Option<i64> = sqlx::query_scalar(
            "SELECT updated_at FROM items WHERE repo = ? AND item_type = ? AND number = ?",
        )
        .bind(&key.repo)
        .bind(key.item_type.as_str())
        .bind(key.number as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ts.and_then(|t| DateTime::from_timestamp(t, 0)))
    }

    /// Hash of the text behind the stored embedding, when one exists for
    /// the store's model.
    pub async fn embedding_hash(&self, key: &ItemKey) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT model, text_hash FROM embeddings WHERE repo = ? AND item_type = ? AND number = ?",
        )
        .bind(&key.repo)
        .bind(key.item_type.as_str())
        .bind(key.number as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| {
            let model: String = r.get("model");
            match &self.model {
                Some(m) if *m != model => None,
                _ => Some(r.get("text_hash")),
            }
        }))
    }

    /// Insert or replace item metadata without touching its embedding.
    /// A copy older than the stored one is ignored.
    pub async fn put_item(&self, item: &Item) -> Result<()> {
        self.ensure_writable()?;
        let mut conn = self.pool.acquire().await?;
        upsert_item_row(&mut *conn, item).await?;
        Ok(())
    }

    /// Insert or replace item metadata and embedding in one transaction,
    /// recording the hash of the embedded text. Nothing is written when
    /// the stored copy has a newer `updated_at`.
    pub async fn put_item_with_embedding(
        &self,
        item: &Item,
        vector: &[f32],
        text_hash: &str,
    ) -> Result<()> {
        self.ensure_writable()?;
        self.admit(vector.len())?;

        let mut tx = self.pool.begin().await?;
        if !upsert_item_row(&mut *tx, item).await? {
            log::debug!("{}: stored copy is newer, write ignored", item.key);
            return Ok(());
        }
        upsert_embedding_row(&mut *tx, &item.key, self.model_label(), vector, text_hash).await?;
        self.record_dims_if_new(&mut *tx, vector.len()).await?;
        tx.commit().await?;

        self.invalidate(&item.key.repo);
        Ok(())
    }

    /// Cache a PR's diff text, cut to [`MAX_DIFF_BYTES`].
    pub async fn put_diff(&self, key: &ItemKey, diff: &str) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query(
            r#"
            INSERT INTO item_diffs (repo, item_type, number, diff, fetched_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(repo, item_type, number) DO UPDATE SET
                diff = excluded.diff,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&key.repo)
        .bind(key.item_type.as_str())
        .bind(key.number as i64)
        .bind(truncate_bytes(diff, MAX_DIFF_BYTES))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_diff(&self, key: &ItemKey) -> Result<Option<String>> {
        Ok(sqlx::query_scalar(
            "SELECT diff FROM item_diffs WHERE repo = ? AND item_type = ? AND number = ?",
        )
        .bind(&key.repo)
        .bind(key.item_type.as_str())
        .bind(key.number as i64)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Most recent `updated_at` among a repo's items.
    pub async fn last_updated(&self, repo: &str) -> Result<Option<DateTime<Utc>>> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM items WHERE repo = ?")
            .bind(repo)
            .fetch_one(&self.pool)
            .await?;
        Ok(ts.and_then(|t| DateTime::from_timestamp(t, 0)))
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.mode == OpenMode::Inspect {
            bail!("store was opened for inspection and cannot be written");
        }
        Ok(())
    }

    fn admit(&self, width: usize) -> Result<()> {
        let dims = *self.dims.read().map_err(|_| poisoned())?;
        check_dims(dims, width)?;
        Ok(())
    }

    async fn record_dims_if_new(
        &self,
        conn: &mut sqlx::SqliteConnection,
        width: usize,
    ) -> Result<()> {
        let is_new = self
            .dims
            .read()
            .map_err(|_| poisoned())?
            .is_none();
        if is_new {
            sqlx::query("INSERT OR IGNORE INTO store_meta (key, value) VALUES (?, ?)")
                .bind(META_DIMS)
                .bind(width.to_string())
                .execute(&mut *conn)
                .await?;
            *self.dims.write().map_err(|_| poisoned())? = Some(width);
        }
        Ok(())
    }

    fn model_label(&self) -> &str {
        self.model.as_deref().unwrap_or("unknown")
    }

    fn invalidate(&self, repo: &str) {
        if let Ok(mut indexes) = self.indexes.write() {
            indexes.remove(repo);
        }
    }

    async fn index_for(&self, repo: &str) -> Result<Arc<KeyedIndex>> {
        if let Some(index) = self
            .indexes
            .read()
            .map_err(|_| poisoned())?
            .get(repo)
        {
            return Ok(Arc::clone(index));
        }
        let vectors = self.get_all_embeddings(repo).await?;
        let index = Arc::new(KeyedIndex::build(&vectors));
        log::debug!("built ANN index for {} ({} vectors)", repo, index.len());
        self.indexes
            .write()
            .map_err(|_| poisoned())?
            .insert(repo.to_string(), Arc::clone(&index));
        Ok(index)
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("store lock poisoned")
}

/// SHA-256 of the text handed to the embedding provider.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

async fn read_meta(pool: &SqlitePool) -> Result<StoreMeta> {
    let rows = sqlx::query("SELECT key, value FROM store_meta")
        .fetch_all(pool)
        .await?;
    let mut meta = StoreMeta::default();
    for row in rows {
        let key: String = row.get("key");
        let value: String = row.get("value");
        let number = || -> Result<usize> {
            value
                .parse()
                .with_context(|| format!("corrupt store_meta value for {}: {}", key, value))
        };
        match key.as_str() {
            META_MODEL => meta.embedding_model = Some(value.clone()),
            META_DIMS => meta.embedding_dims = Some(number()?),
            META_TRUNCATE => meta.truncate_dims = Some(number()?),
            META_NATIVE => meta.native_dims = Some(number()?),
            "schema_version" => meta.schema_version = value.parse().ok(),
            _ => {}
        }
    }
    Ok(meta)
}

async fn check_governance(pool: &SqlitePool, meta: &StoreMeta, options: &StoreOptions) -> Result<()> {
    if let (Some(stored), Some(configured)) = (&meta.embedding_model, &options.model) {
        if stored != configured {
            return Err(StoreError::EmbeddingModelChanged {
                stored: stored.clone(),
                configured: configured.clone(),
            }
            .into());
        }
    }

    // Truncation only matters once the store has committed to a model.
    if meta.embedding_model.is_some()
        && options.model.is_some()
        && meta.truncate_dims != options.truncate_dims
    {
        return Err(StoreError::TruncationChanged {
            stored: meta.truncate_dims,
            configured: options.truncate_dims,
        }
        .into());
    }

    let stored_dims = match meta.embedding_dims {
        Some(d) => Some(d),
        // Older stores without the meta row: derive from any vector.
        None => sqlx::query_scalar::<_, i64>("SELECT dims FROM embeddings LIMIT 1")
            .fetch_optional(pool)
            .await?
            .map(|d| d as usize),
    };
    if let (Some(expected), Some(actual)) = (stored_dims, options.dims) {
        check_dims(Some(expected), actual)?;
    }
    Ok(())
}

async fn record_meta(pool: &SqlitePool, meta: &StoreMeta, options: &StoreOptions) -> Result<()> {
    let Some(model) = &options.model else {
        return Ok(());
    };
    let mut rows: Vec<(&str, String)> = Vec::new();
    if meta.embedding_model.is_none() {
        rows.push((META_MODEL, model.clone()));
        if let Some(t) = options.truncate_dims {
            rows.push((META_TRUNCATE, t.to_string()));
        }
        if let Some(n) = options.native_dims {
            rows.push((META_NATIVE, n.to_string()));
        }
    }
    if meta.embedding_dims.is_none() {
        if let Some(d) = options.dims {
            rows.push((META_DIMS, d.to_string()));
        }
    }
    let mut tx = pool.begin().await?;
    for (key, value) in rows {
        sqlx::query("INSERT OR IGNORE INTO store_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Write an item row. A copy older than the stored one is ignored;
/// returns whether the row was written.
async fn upsert_item_row(conn: &mut sqlx::SqliteConnection, item: &Item) -> Result<bool> {
    let labels_json = serde_json::to_string(&item.labels)?;
    let result = sqlx::query(
        r#"
        INSERT INTO items (repo, item_type, number, title, body, author, state,
                           created_at, updated_at, labels_json, additions, deletions,
                           changed_files, ci_status, review_count, has_tests)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(repo, item_type, number) DO UPDATE SET
            title = excluded.title,
            body = excluded.body,
            author = excluded.author,
            state = excluded.state,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            labels_json = excluded.labels_json,
            additions = excluded.additions,
            deletions = excluded.deletions,
            changed_files = excluded.changed_files,
            ci_status = excluded.ci_status,
            review_count = excluded.review_count,
            has_tests = excluded.has_tests
        WHERE excluded.updated_at >= items.updated_at
        "#,
    )
    .bind(&item.key.repo)
    .bind(item.key.item_type.as_str())
    .bind(item.key.number as i64)
    .bind(&item.title)
    .bind(&item.body)
    .bind(&item.author)
    .bind(item.state.as_str())
    .bind(item.created_at.timestamp())
    .bind(item.updated_at.timestamp())
    .bind(labels_json)
    .bind(item.additions.map(|v| v as i64))
    .bind(item.deletions.map(|v| v as i64))
    .bind(item.changed_files.map(|v| v as i64))
    .bind(item.ci_status.as_str())
    .bind(item.review_count as i64)
    .bind(item.has_tests)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn upsert_embedding_row(
    conn: &mut sqlx::SqliteConnection,
    key: &ItemKey,
    model: &str,
    vector: &[f32],
    text_hash: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO embeddings (repo, item_type, number, model, dims, text_hash, created_at, vector)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(repo, item_type, number) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            text_hash = excluded.text_hash,
            created_at = excluded.created_at,
            vector = excluded.vector
        "#,
    )
    .bind(&key.repo)
    .bind(key.item_type.as_str())
    .bind(key.number as i64)
    .bind(model)
    .bind(vector.len() as i64)
    .bind(text_hash)
    .bind(Utc::now().timestamp())
    .bind(vec_to_blob(vector))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn key_from_row(row: &SqliteRow) -> Result<ItemKey> {
    let item_type: String = row.get("item_type");
    Ok(ItemKey {
        repo: row.get("repo"),
        item_type: item_type.parse::<ItemType>()?,
        number: row.get::<i64, _>("number") as u64,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<Item> {
    let ts = |col: &str| -> Result<DateTime<Utc>> {
        let secs: i64 = row.get(col);
        DateTime::from_timestamp(secs, 0).with_context(|| format!("invalid {} timestamp", col))
    };
    let labels_json: String = row.get("labels_json");
    let state: String = row.get("state");
    let ci_status: String = row.get("ci_status");
    let unsigned = |col: &str| row.get::<Option<i64>, _>(col).map(|v| v.max(0) as u64);

    Ok(Item {
        key: key_from_row(row)?,
        title: row.get("title"),
        body: row.get("body"),
        author: row.get("author"),
        state: ItemState::from_db(&state),
        created_at: ts("created_at")?,
        updated_at: ts("updated_at")?,
        labels: serde_json::from_str(&labels_json).unwrap_or_default(),
        additions: unsigned("additions"),
        deletions: unsigned("deletions"),
        changed_files: unsigned("changed_files"),
        ci_status: CiStatus::from_db(&ci_status),
        review_count: row.get::<i64, _>("review_count").max(0) as u32,
        has_tests: row.get("has_tests"),
    })
}

const ITEM_COLUMNS: &str = "repo, item_type, number, title, body, author, state, created_at, \
     updated_at, labels_json, additions, deletions, changed_files, ci_status, review_count, has_tests";

#[async_trait]
impl VectorStore for SqliteStore {
    fn dims(&self) -> Option<usize> {
        self.dims.read().ok().and_then(|d| *d)
    }

    async fn upsert(&self, item: &Item, vector: &[f32]) -> Result<()> {
        let text_hash = hash_text(&item.embedding_text(usize::MAX));
        self.put_item_with_embedding(item, vector, &text_hash).await
    }

    async fn upsert_embedding_only(&self, key: &ItemKey, vector: &[f32]) -> Result<()> {
        self.ensure_writable()?;
        self.admit(vector.len())?;
        let Some(item) = self.get(key).await? else {
            return Err(StoreError::UnknownItem(key.to_string()).into());
        };
        let text_hash = hash_text(&item.embedding_text(usize::MAX));

        let mut tx = self.pool.begin().await?;
        upsert_embedding_row(&mut *tx, key, self.model_label(), vector, &text_hash).await?;
        self.record_dims_if_new(&mut *tx, vector.len()).await?;
        tx.commit().await?;

        self.invalidate(&key.repo);
        Ok(())
    }

    async fn get(&self, key: &ItemKey) -> Result<Option<Item>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM items WHERE repo = ? AND item_type = ? AND number = ?",
            ITEM_COLUMNS
        ))
        .bind(&key.repo)
        .bind(key.item_type.as_str())
        .bind(key.number as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn get_all_for_repo(&self, repo: &str) -> Result<Vec<Item>> {
        let rows = sqlx::query(&format!("SELECT {} FROM items WHERE repo = ?", ITEM_COLUMNS))
            .bind(repo)
            .fetch_all(&self.pool)
            .await?;
        let mut items = rows.iter().map(item_from_row).collect::<Result<Vec<_>>>()?;
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }

    async fn get_embedding(&self, key: &ItemKey) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = sqlx::query_scalar(
            "SELECT vector FROM embeddings WHERE repo = ? AND item_type = ? AND number = ?",
        )
        .bind(&key.repo)
        .bind(key.item_type.as_str())
        .bind(key.number as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(blob.map(|b| blob_to_vec(&b)))
    }

    async fn get_all_embeddings(&self, repo: &str) -> Result<HashMap<ItemKey, Vec<f32>>> {
        let rows =
            sqlx::query("SELECT repo, item_type, number, vector FROM embeddings WHERE repo = ?")
                .bind(repo)
                .fetch_all(&self.pool)
                .await?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("vector");
            out.insert(key_from_row(row)?, blob_to_vec(&blob));
        }
        Ok(out)
    }

    async fn search(
        &self,
        repo: &str,
        query: &[f32],
        limit: usize,
        floor: f32,
    ) -> Result<Vec<(ItemKey, f32)>> {
        Ok(self.index_for(repo).await?.search(query, limit, floor))
    }

    async fn stats(&self, repo: &str) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        let rows = sqlx::query("SELECT item_type, COUNT(*) AS n FROM items WHERE repo = ? GROUP BY item_type")
            .bind(repo)
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let item_type: String = row.get("item_type");
            let n = row.get::<i64, _>("n") as u64;
            match item_type.parse::<ItemType>()? {
                ItemType::Pr => stats.prs = n,
                ItemType::Issue => stats.issues = n,
            }
        }
        let blobs: Vec<Vec<u8>> = sqlx::query_scalar("SELECT vector FROM embeddings WHERE repo = ?")
            .bind(repo)
            .fetch_all(&self.pool)
            .await?;
        stats.embedded = blobs.len() as u64;
        stats.zero_vectors = blobs
            .iter()
            .filter(|b| is_zero_vector(&blob_to_vec(b)))
            .count() as u64;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_hex() {
        let h = hash_text("fix the flaky test");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_text("fix the flaky test"));
        assert_ne!(h, hash_text("fix the flaky tests"));
    }

    #[test]
    fn byte_truncation_respects_char_boundaries() {
        assert_eq!(truncate_bytes("abc", 10), "abc");
        assert_eq!(truncate_bytes("abcdef", 3), "abc");
        // 'é' is two bytes; cutting inside it backs off.
        assert_eq!(truncate_bytes("aé", 2), "a");
    }

    #[test]
    fn disabled_provider_declares_nothing() {
        let options = StoreOptions::from_config(&EmbeddingConfig::default());
        assert_eq!(options.mode, OpenMode::ReadWrite);
        assert!(options.model.is_none());
        assert!(options.dims.is_none());
    }
}
