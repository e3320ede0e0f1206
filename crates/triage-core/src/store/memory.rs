//! In-memory [`VectorStore`] implementation for tests and embedding-free
//! experiments.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Search goes through the
//! same [`KeyedIndex`] as the SQLite store, rebuilt lazily per repo after
//! writes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Item, ItemKey, ItemType};
use crate::similarity::is_zero_vector;

use super::ann::KeyedIndex;
use super::{check_dims, StoreStats, VectorStore};

/// In-memory store.
pub struct InMemoryStore {
    dims: RwLock<Option<usize>>,
    items: RwLock<HashMap<ItemKey, Item>>,
    vectors: RwLock<HashMap<ItemKey, Vec<f32>>>,
    indexes: RwLock<HashMap<String, Arc<KeyedIndex>>>,
}

impl InMemoryStore {
    /// A store whose width is fixed by the first write.
    pub fn new() -> Self {
        Self {
            dims: RwLock::new(None),
            items: RwLock::new(HashMap::new()),
            vectors: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// A store that only accepts `dims`-wide vectors.
    pub fn with_dims(dims: usize) -> Self {
        let store = Self::new();
        *store.dims.write().unwrap() = Some(dims);
        store
    }

    fn admit(&self, vector: &[f32]) -> Result<(), StoreError> {
        let mut dims = self.dims.write().unwrap();
        check_dims(*dims, vector.len())?;
        dims.get_or_insert(vector.len());
        Ok(())
    }

    fn invalidate(&self, repo: &str) {
        self.indexes.write().unwrap().remove(repo);
    }

    fn index_for(&self, repo: &str) -> Arc<KeyedIndex> {
        if let Some(index) = self.indexes.read().unwrap().get(repo) {
            return Arc::clone(index);
        }
        let repo_vectors: HashMap<ItemKey, Vec<f32>> = self
            .vectors
            .read()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.repo == repo)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let index = Arc::new(KeyedIndex::build(&repo_vectors));
        self.indexes
            .write()
            .unwrap()
            .insert(repo.to_string(), Arc::clone(&index));
        index
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn dims(&self) -> Option<usize> {
        *self.dims.read().unwrap()
    }

    async fn upsert(&self, item: &Item, vector: &[f32]) -> Result<()> {
        self.admit(vector)?;
        // Both maps are locked together so readers never see one without the other.
        let mut items = self.items.write().unwrap();
        let mut vectors = self.vectors.write().unwrap();
        if items
            .get(&item.key)
            .is_some_and(|stored| stored.updated_at > item.updated_at)
        {
            return Ok(());
        }
        items.insert(item.key.clone(), item.clone());
        vectors.insert(item.key.clone(), vector.to_vec());
        drop(vectors);
        drop(items);
        self.invalidate(&item.key.repo);
        Ok(())
    }

    async fn upsert_embedding_only(&self, key: &ItemKey, vector: &[f32]) -> Result<()> {
        if !self.items.read().unwrap().contains_key(key) {
            return Err(anyhow!(StoreError::UnknownItem(key.to_string())));
        }
        self.admit(vector)?;
        self.vectors
            .write()
            .unwrap()
            .insert(key.clone(), vector.to_vec());
        self.invalidate(&key.repo);
        Ok(())
    }

    async fn get(&self, key: &ItemKey) -> Result<Option<Item>> {
        Ok(self.items.read().unwrap().get(key).cloned())
    }

    async fn get_all_for_repo(&self, repo: &str) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self
            .items
            .read()
            .unwrap()
            .values()
            .filter(|i| i.key.repo == repo)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }

    async fn get_embedding(&self, key: &ItemKey) -> Result<Option<Vec<f32>>> {
        Ok(self.vectors.read().unwrap().get(key).cloned())
    }

    async fn get_all_embeddings(&self, repo: &str) -> Result<HashMap<ItemKey, Vec<f32>>> {
        Ok(self
            .vectors
            .read()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.repo == repo)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn search(
        &self,
        repo: &str,
        query: &[f32],
        limit: usize,
        floor: f32,
    ) -> Result<Vec<(ItemKey, f32)>> {
        Ok(self.index_for(repo).search(query, limit, floor))
    }

    async fn stats(&self, repo: &str) -> Result<StoreStats> {
        let items = self.items.read().unwrap();
        let vectors = self.vectors.read().unwrap();
        let mut stats = StoreStats::default();
        for key in items.keys().filter(|k| k.repo == repo) {
            match key.item_type {
                ItemType::Pr => stats.prs += 1,
                ItemType::Issue => stats.issues += 1,
            }
        }
        for (_, v) in vectors.iter().filter(|(k, _)| k.repo == repo) {
            stats.embedded += 1;
            if is_zero_vector(v) {
                stats.zero_vectors += 1;
            }
        }
        Ok(stats)
    }
}
