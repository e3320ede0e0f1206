//! `triage rank`: order stored items by quality score.
//!
//! Author history is looked up once per run, only for the
//! `github.author_lookup_limit` most frequent authors in the dataset.
//! Everyone else, and anyone whose lookup fails, counts as zero merges.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

use triage_core::models::{Item, ItemType, RankedItem, RepoId};
use triage_core::scoring::{rank_items, top_authors, AuthorHistory};
use triage_core::store::VectorStore;

use crate::config::Config;
use crate::github::{GitHubClient, ItemSource};
use crate::sqlite_store::{SqliteStore, StoreOptions};

#[derive(Debug, Clone, Default)]
pub struct RankOptions {
    /// Print at most this many items.
    pub limit: Option<usize>,
    pub prs_only: bool,
    /// Skip merged-PR lookups; every author counts as new.
    pub offline: bool,
}

pub async fn run_rank(
    config: &Config,
    repo_arg: Option<&str>,
    options: &RankOptions,
    json: bool,
) -> Result<()> {
    let repo = config.repo(repo_arg)?;
    let store = SqliteStore::open(&config.db.path, StoreOptions::from_config(&config.embedding))
        .await?;
    let client = if options.offline {
        None
    } else {
        Some(GitHubClient::new(&config.github)?)
    };

    let ranked = rank_repo(
        &store,
        client.as_ref().map(|c| c as &dyn ItemSource),
        &repo,
        config,
        options,
        Utc::now(),
    )
    .await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&ranked)?);
    } else {
        print_ranking(&repo, &ranked);
    }
    Ok(())
}

pub async fn rank_repo(
    store: &dyn VectorStore,
    source: Option<&dyn ItemSource>,
    repo: &RepoId,
    config: &Config,
    options: &RankOptions,
    now: DateTime<Utc>,
) -> Result<Vec<RankedItem>> {
    let mut items = store.get_all_for_repo(&repo.slug()).await?;
    if options.prs_only {
        items.retain(|i| i.key.item_type == ItemType::Pr);
    }
    if items.is_empty() {
        log::warn!("{}: no stored items; run `triage scan` first", repo);
    }

    let history = match source {
        Some(source) => fetch_author_history(source, repo, &items, config).await,
        None => AuthorHistory::default(),
    };

    let mut ranked = rank_items(&items, &history, &config.scoring, now);
    if let Some(limit) = options.limit {
        ranked.truncate(limit);
    }
    Ok(ranked)
}

/// Merged-PR counts for the most frequent authors, paced by
/// `github.lookup_delay_ms`. Failed lookups are logged and left out.
pub async fn fetch_author_history(
    source: &dyn ItemSource,
    repo: &RepoId,
    items: &[Item],
    config: &Config,
) -> AuthorHistory {
    let authors = top_authors(items, config.github.author_lookup_limit);
    let delay = Duration::from_millis(config.github.lookup_delay_ms);
    let mut history = AuthorHistory::default();

    for (i, author) in authors.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match source.merged_pr_count(repo, author).await {
            Ok(count) => history.insert(author.clone(), count),
            Err(e) => log::warn!("merged-PR lookup failed for {}: {:#}", author, e),
        }
    }
    log::info!("{}: author history for {} of {} authors", repo, history.len(), authors.len());
    history
}

pub fn print_ranking(repo: &RepoId, ranked: &[RankedItem]) {
    println!("rank {}", repo);
    if ranked.is_empty() {
        println!();
        println!("No items.");
        return;
    }
    println!();
    println!(
        "{:>4}  {:>6}  {:<5}  {:>5}  {:>5} {:>5} {:>5} {:>5} {:>5} {:>5}  title",
        "#", "number", "type", "score", "tests", "ci", "diff", "auth", "desc", "revw"
    );
    for (i, item) in ranked.iter().enumerate() {
        let s = &item.signals;
        let diff = if s.diff_size < 0.0 {
            "-".to_string()
        } else {
            format!("{:.2}", s.diff_size)
        };
        println!(
            "{:>4}  {:>6}  {:<5}  {:>5.3}  {:>5.2} {:>5.2} {:>5} {:>5.2} {:>5.2} {:>5.2}  {} (@{})",
            i + 1,
            item.key.number,
            item.key.item_type.as_str(),
            item.score,
            s.has_tests,
            s.ci_passing,
            diff,
            s.author_history,
            s.description_quality,
            s.review_approvals,
            item.title,
            item.author
        );
    }
}
