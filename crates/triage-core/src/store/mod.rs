//! Storage abstraction for items and their embeddings.
//!
//! The [`VectorStore`] trait defines the storage operations needed by the
//! clustering and vision engines, enabling pluggable backends (SQLite in
//! the app crate, [`memory::InMemoryStore`] here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Dimension governance
//!
//! A store holds vectors of exactly one width. Once that width is fixed
//! (by configuration or by the first write), any write of a different
//! width fails with [`StoreError::DimensionMismatch`](crate::error::StoreError).
//! Vectors are never truncated or padded on write.

pub mod ann;
pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;
use crate::models::{Item, ItemKey};

/// Per-repo counts returned by [`VectorStore::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub prs: u64,
    pub issues: u64,
    /// Items with a stored embedding (zero vectors included).
    pub embedded: u64,
    /// Stored embeddings that are all-zero (failed embedding attempts).
    pub zero_vectors: u64,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace an item and its embedding atomically |
/// | [`upsert_embedding_only`](VectorStore::upsert_embedding_only) | Replace just the vector |
/// | [`get`](VectorStore::get) | Exact lookup by key |
/// | [`get_all_for_repo`](VectorStore::get_all_for_repo) | All items of a repo |
/// | [`get_embedding`](VectorStore::get_embedding) | One vector |
/// | [`get_all_embeddings`](VectorStore::get_all_embeddings) | Bulk vector fetch |
/// | [`search`](VectorStore::search) | Approximate nearest neighbours |
/// | [`stats`](VectorStore::stats) | Counts by type |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Vector width, or `None` until the first write fixes it.
    fn dims(&self) -> Option<usize>;

    /// Insert or replace an item and its embedding in one unit of work.
    /// A copy whose `updated_at` is older than the stored one is ignored,
    /// so `updated_at` never moves backwards.
    async fn upsert(&self, item: &Item, vector: &[f32]) -> Result<()>;

    /// Replace only the embedding of an existing item.
    async fn upsert_embedding_only(&self, key: &ItemKey, vector: &[f32]) -> Result<()>;

    async fn get(&self, key: &ItemKey) -> Result<Option<Item>>;

    /// All items for `repo`, ordered by key.
    async fn get_all_for_repo(&self, repo: &str) -> Result<Vec<Item>>;

    async fn get_embedding(&self, key: &ItemKey) -> Result<Option<Vec<f32>>>;

    /// Every stored vector for `repo` in one bulk fetch.
    async fn get_all_embeddings(&self, repo: &str) -> Result<HashMap<ItemKey, Vec<f32>>>;

    /// Approximate nearest neighbours of `query` within `repo`, with
    /// similarity `>= floor`, best first, at most `limit`.
    ///
    /// Candidates only: callers recompute exact similarity before
    /// trusting a result.
    async fn search(
        &self,
        repo: &str,
        query: &[f32],
        limit: usize,
        floor: f32,
    ) -> Result<Vec<(ItemKey, f32)>>;

    async fn stats(&self, repo: &str) -> Result<StoreStats>;
}

/// Check `actual` against a store's width. `None` means the width is not
/// fixed yet and anything goes.
pub fn check_dims(expected: Option<usize>, actual: usize) -> Result<(), StoreError> {
    match expected {
        Some(expected) if expected != actual => {
            Err(StoreError::DimensionMismatch { expected, actual })
        }
        _ => Ok(()),
    }
}
