//! Stored item retrieval.
//!
//! Shows one item as the store holds it: metadata, PR enrichment, whether
//! it has a (non-zero) embedding and the cached diff. Used by `triage get`.

use anyhow::{bail, Result};
use serde::Serialize;

use triage_core::models::{Item, ItemKey, ItemType, RepoId};
use triage_core::similarity::is_zero_vector;
use triage_core::store::VectorStore;

use crate::config::Config;
use crate::sqlite_store::{SqliteStore, StoreOptions};
use crate::stats::format_ts_iso;

#[derive(Debug, Clone, Serialize)]
pub struct ItemResponse {
    #[serde(flatten)]
    pub item: Item,
    /// Width of the stored embedding, `None` when not embedded.
    pub embedding_dims: Option<usize>,
    /// The stored embedding is all zeros (embedding failed).
    pub embedding_failed: bool,
    pub diff_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// Look up item `number` in `repo`. Without `item_type`, a PR is preferred
/// over an issue with the same number.
pub async fn get_item(
    store: &SqliteStore,
    repo: &RepoId,
    number: u64,
    item_type: Option<ItemType>,
    with_diff: bool,
) -> Result<Option<ItemResponse>> {
    let candidates = match item_type {
        Some(t) => vec![t],
        None => vec![ItemType::Pr, ItemType::Issue],
    };

    for t in candidates {
        let key = ItemKey::new(repo.slug(), t, number);
        let Some(item) = store.get(&key).await? else {
            continue;
        };
        let embedding = store.get_embedding(&key).await?;
        let diff = store.get_diff(&key).await?;
        return Ok(Some(ItemResponse {
            embedding_dims: embedding.as_ref().map(|v| v.len()),
            embedding_failed: embedding.as_deref().is_some_and(is_zero_vector),
            diff_bytes: diff.as_ref().map(|d| d.len()),
            diff: if with_diff { diff } else { None },
            item,
        }));
    }
    Ok(None)
}

pub async fn run_get(
    config: &Config,
    repo_arg: Option<&str>,
    number: u64,
    item_type: Option<ItemType>,
    with_diff: bool,
    json: bool,
) -> Result<()> {
    let repo = config.repo(repo_arg)?;
    let store = SqliteStore::open(&config.db.path, StoreOptions::inspect()).await?;
    let found = get_item(&store, &repo, number, item_type, with_diff).await?;
    store.close().await;

    let Some(response) = found else {
        bail!("{}#{} is not in the store; run `triage scan` first", repo, number);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let item = &response.item;
    println!("--- {} ---", item.key);
    println!("title:      {}", item.title);
    println!("author:     {}", item.author);
    println!("state:      {}", item.state.as_str());
    println!("created_at: {}", format_ts_iso(item.created_at.timestamp()));
    println!("updated_at: {}", format_ts_iso(item.updated_at.timestamp()));
    if !item.labels.is_empty() {
        println!("labels:     {}", item.labels.join(", "));
    }
    if item.key.item_type == ItemType::Pr {
        let opt = |v: Option<u64>| v.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string());
        println!(
            "diff:       +{} -{} in {} files",
            opt(item.additions),
            opt(item.deletions),
            opt(item.changed_files)
        );
        println!("ci:         {}", item.ci_status.as_str());
        println!("approvals:  {}", item.review_count);
        println!(
            "has tests:  {}",
            match item.has_tests {
                Some(true) => "yes",
                Some(false) => "no",
                None => "unknown",
            }
        );
    }
    match (response.embedding_dims, response.embedding_failed) {
        (Some(d), false) => println!("embedding:  {} dims", d),
        (Some(_), true) => println!("embedding:  failed (zero vector)"),
        (None, _) => println!("embedding:  none"),
    }
    if let Some(bytes) = response.diff_bytes {
        println!("cached diff: {} bytes", bytes);
    }
    println!();
    println!("--- Body ---");
    println!("{}", item.body);

    if let Some(diff) = &response.diff {
        println!();
        println!("--- Diff ---");
        println!("{}", diff);
    }
    Ok(())
}
