//! Test doubles shared by the command modules' unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use triage_core::embedding::EmbeddingProvider;
use triage_core::models::{CiStatus, Item, ItemKey, RepoId};

use crate::config::Config;
use crate::github::{ItemSource, PrDetails, PrFile};

/// Hashes words into `dims` buckets. Texts containing `poison` fail.
pub struct FakeProvider {
    pub dims: usize,
    pub calls: Mutex<usize>,
}

impl FakeProvider {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

pub fn fake_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for word in text.split_whitespace() {
        let bucket = word.bytes().fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
        v[bucket % dims] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for FakeProvider {
    fn model_name(&self) -> &str {
        "fake-model"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        *self.calls.lock().unwrap() += texts.len();
        if texts.iter().any(|t| t.contains("poison")) {
            bail!("poisoned input");
        }
        Ok(texts.iter().map(|t| fake_vector(t, self.dims)).collect())
    }
}

/// Canned GitHub data.
#[derive(Default)]
pub struct FakeSource {
    pub prs: Vec<Item>,
    pub issues: Vec<Item>,
    pub files: HashMap<u64, Vec<PrFile>>,
    pub merged: HashMap<String, u32>,
    pub documents: HashMap<String, String>,
    pub failing_prs: Vec<u64>,
    pub lookups: Mutex<Vec<String>>,
}

#[async_trait]
impl ItemSource for FakeSource {
    async fn list_open_prs(&self, _repo: &RepoId, limit: Option<usize>) -> Result<Vec<Item>> {
        Ok(self.prs.iter().take(limit.unwrap_or(usize::MAX)).cloned().collect())
    }

    async fn list_open_issues(&self, _repo: &RepoId, limit: Option<usize>) -> Result<Vec<Item>> {
        Ok(self.issues.iter().take(limit.unwrap_or(usize::MAX)).cloned().collect())
    }

    async fn pr_details(&self, _repo: &RepoId, number: u64) -> Result<PrDetails> {
        if self.failing_prs.contains(&number) {
            bail!("boom");
        }
        Ok(PrDetails {
            additions: Some(10),
            deletions: Some(5),
            changed_files: Some(2),
            head_sha: format!("sha{}", number),
        })
    }

    async fn pr_files(&self, _repo: &RepoId, number: u64) -> Result<Vec<PrFile>> {
        Ok(self.files.get(&number).cloned().unwrap_or_default())
    }

    async fn ci_status(&self, _repo: &RepoId, _sha: &str) -> Result<CiStatus> {
        Ok(CiStatus::Success)
    }

    async fn approval_count(&self, _repo: &RepoId, _number: u64) -> Result<u32> {
        Ok(1)
    }

    async fn merged_pr_count(&self, _repo: &RepoId, author: &str) -> Result<u32> {
        self.lookups.lock().unwrap().push(author.to_string());
        match self.merged.get(author) {
            Some(n) => Ok(*n),
            None => bail!("search failed"),
        }
    }

    async fn fetch_file(&self, _repo: &RepoId, path: &str) -> Result<Option<String>> {
        Ok(self.documents.get(path).cloned())
    }
}

pub fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_750_000_000, 0).unwrap()
}

pub fn pr(number: u64, title: &str, body: &str, author: &str, age_days: i64) -> Item {
    Item::new(
        ItemKey::pr("o/r", number),
        title,
        body,
        author,
        now() - Duration::days(age_days),
    )
}

pub fn issue(number: u64, title: &str, body: &str, author: &str, age_days: i64) -> Item {
    Item::new(
        ItemKey::issue("o/r", number),
        title,
        body,
        author,
        now() - Duration::days(age_days),
    )
}

/// Config pointing at a database under `dir`, with fast pacing.
pub fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::minimal();
    config.db.path = dir.join("triage.sqlite");
    config.github.repo = Some("o/r".to_string());
    config.github.lookup_delay_ms = 0;
    config.embedding.batch_size = 2;
    config.vision.batch_delay_ms = 0;
    config
}
