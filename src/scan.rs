//! `triage scan`: pull open PRs and issues from GitHub into the local store.
//!
//! ```text
//! list PRs + issues ──► skip unchanged ──► enrich PRs ──► embed ──► upsert
//!                       (updated_at)      (diff, CI,      (batched,
//!                                          reviews,        isolated)
//!                                          tests)
//! ```
//!
//! An item whose `updated_at` is not newer than the stored copy is skipped
//! entirely unless `--full` is given. Re-embedding is also skipped when
//! the text hash matches the stored embedding. Enrichment failures only
//! cost the affected PR its diff stats; embedding failures become zero
//! vectors and are counted in the summary.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use triage_core::embedding::{embed_isolated, EmbeddingProvider};
use triage_core::models::{Item, ItemKey, ItemType, RepoId};

use crate::config::Config;
use crate::embedding;
use crate::github::{build_diff, detect_tests, GitHubClient, ItemSource};
use crate::progress::{ProgressMode, ScanProgressEvent, ScanProgressReporter};
use crate::sqlite_store::{hash_text, SqliteStore, StoreOptions};

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Re-ingest and re-embed everything, ignoring `updated_at`.
    pub full: bool,
    /// Cap on PRs and on issues fetched (each).
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ScanSummary {
    pub repo: String,
    pub prs_fetched: u64,
    pub issues_fetched: u64,
    pub unchanged: u64,
    pub ingested: u64,
    pub enrich_failed: u64,
    pub embedded: u64,
    /// Changed items whose text was identical, so the vector was kept.
    pub embedding_reused: u64,
    /// Items stored with a zero vector after embedding failed.
    pub embedding_failed: u64,
    pub diffs_cached: u64,
}

/// CLI entry point.
pub async fn run_scan(
    config: &Config,
    repo_arg: Option<&str>,
    options: &ScanOptions,
    progress: ProgressMode,
    json: bool,
) -> Result<()> {
    let repo = config.repo(repo_arg)?;
    let provider = open_provider(config)?;
    let store = SqliteStore::open(
        &config.db.path,
        StoreOptions::for_live_provider(&config.embedding, provider.as_deref()),
    )
    .await?;
    let client = GitHubClient::new(&config.github)?;
    let reporter = progress.reporter();

    let summary = scan_repo(
        &store,
        &client,
        provider.as_deref(),
        config,
        &repo,
        options,
        reporter.as_ref(),
    )
    .await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

/// The configured provider, or `None` (with a warning) when disabled.
pub fn open_provider(config: &Config) -> Result<Option<Box<dyn EmbeddingProvider>>> {
    if !config.embedding.is_enabled() {
        log::warn!("embedding provider is disabled; items are stored without vectors");
        return Ok(None);
    }
    Ok(Some(embedding::create_provider(&config.embedding)?))
}

pub async fn scan_repo(
    store: &SqliteStore,
    source: &dyn ItemSource,
    provider: Option<&dyn EmbeddingProvider>,
    config: &Config,
    repo: &RepoId,
    options: &ScanOptions,
    progress: &dyn ScanProgressReporter,
) -> Result<ScanSummary> {
    let slug = repo.slug();
    let mut summary = ScanSummary {
        repo: slug.clone(),
        ..Default::default()
    };

    progress.report(ScanProgressEvent::Fetching { repo: slug.clone() });
    let prs = source.list_open_prs(repo, options.limit).await?;
    let issues = source.list_open_issues(repo, options.limit).await?;
    summary.prs_fetched = prs.len() as u64;
    summary.issues_fetched = issues.len() as u64;
    log::info!("{}: {} open PRs, {} open issues", slug, prs.len(), issues.len());

    let mut changed = Vec::new();
    for item in prs.into_iter().chain(issues) {
        if !options.full && !is_newer(store, &item).await? {
            summary.unchanged += 1;
            continue;
        }
        changed.push(item);
    }

    let pr_total = changed
        .iter()
        .filter(|i| i.key.item_type == ItemType::Pr)
        .count() as u64;
    let mut diffs: HashMap<ItemKey, String> = HashMap::new();
    let mut enriched = 0u64;
    for item in changed.iter_mut() {
        if item.key.item_type != ItemType::Pr {
            continue;
        }
        match enrich_pr(source, repo, item).await {
            Ok(diff) => {
                if !diff.is_empty() {
                    diffs.insert(item.key.clone(), diff);
                }
            }
            Err(e) => {
                log::warn!("could not enrich {}: {:#}", item.key, e);
                summary.enrich_failed += 1;
            }
        }
        enriched += 1;
        progress.report(ScanProgressEvent::Enriching {
            repo: slug.clone(),
            n: enriched,
            total: pr_total,
        });
    }

    match provider {
        Some(provider) => {
            let counts =
                embed_and_store(store, provider, config, &changed, options.full, &slug, progress)
                    .await?;
            summary.embedded = counts.embedded;
            summary.embedding_reused = counts.reused;
            summary.embedding_failed = counts.failed;
        }
        None => {
            for item in &changed {
                store.put_item(item).await?;
            }
        }
    }
    summary.ingested = changed.len() as u64;

    // Diffs reference items, so they go in last.
    for (key, diff) in &diffs {
        store.put_diff(key, diff).await?;
        summary.diffs_cached += 1;
    }

    Ok(summary)
}

async fn is_newer(store: &SqliteStore, item: &Item) -> Result<bool> {
    Ok(match store.stored_updated_at(&item.key).await? {
        Some(stored) => item.updated_at > stored,
        None => true,
    })
}

/// Fill in a PR's diff stats, CI status, approvals and test detection.
/// Returns the concatenated diff text.
async fn enrich_pr(source: &dyn ItemSource, repo: &RepoId, item: &mut Item) -> Result<String> {
    let number = item.key.number;
    let details = source.pr_details(repo, number).await?;
    item.additions = details.additions;
    item.deletions = details.deletions;
    item.changed_files = details.changed_files;
    item.ci_status = source.ci_status(repo, &details.head_sha).await?;
    item.review_count = source.approval_count(repo, number).await?;
    let files = source.pr_files(repo, number).await?;
    item.has_tests = detect_tests(&files);
    Ok(build_diff(&files))
}

/// Outcome of [`embed_and_store`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedCounts {
    pub embedded: u64,
    pub reused: u64,
    pub failed: u64,
}

/// Embed `items` in `embedding.batch_size` batches and upsert each with
/// its vector. Unless `force`, items whose text hash matches the stored
/// embedding keep their vector and only have metadata rewritten.
pub async fn embed_and_store(
    store: &SqliteStore,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    items: &[Item],
    force: bool,
    repo: &str,
    progress: &dyn ScanProgressReporter,
) -> Result<EmbedCounts> {
    let mut counts = EmbedCounts::default();
    let max_chars = config.embedding.max_input_chars;
    let mut pending: Vec<(&Item, String, String)> = Vec::new();

    for item in items {
        let text = item.embedding_text(max_chars);
        let hash = hash_text(&text);
        if !force && store.embedding_hash(&item.key).await?.as_deref() == Some(hash.as_str()) {
            store.put_item(item).await?;
            counts.reused += 1;
            continue;
        }
        pending.push((item, text, hash));
    }

    let total = pending.len() as u64;
    let batch_size = config.embedding.batch_size.max(1);
    let delay = Duration::from_millis(config.embedding.batch_delay_ms);
    let mut done = 0u64;

    for (i, batch) in pending.chunks(batch_size).enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let texts: Vec<String> = batch.iter().map(|(_, text, _)| text.clone()).collect();
        let result = embed_isolated(provider, &texts).await;
        counts.failed += result.failed as u64;

        for ((item, _, hash), vector) in batch.iter().zip(&result.vectors) {
            store.put_item_with_embedding(item, vector, hash).await?;
        }
        counts.embedded += (batch.len() - result.failed) as u64;
        done += batch.len() as u64;
        progress.report(ScanProgressEvent::Embedding {
            repo: repo.to_string(),
            n: done,
            total,
        });
    }
    Ok(counts)
}

pub fn print_summary(summary: &ScanSummary) {
    println!("scan {}", summary.repo);
    println!("  prs fetched: {}", summary.prs_fetched);
    println!("  issues fetched: {}", summary.issues_fetched);
    println!("  unchanged (skipped): {}", summary.unchanged);
    println!("  ingested: {}", summary.ingested);
    if summary.enrich_failed > 0 {
        println!("  enrichment failed: {}", summary.enrich_failed);
    }
    println!("  embedded: {}", summary.embedded);
    println!("  embeddings reused: {}", summary.embedding_reused);
    if summary.embedding_failed > 0 {
        println!(
            "  embedding failed: {} (stored as zero vectors, excluded from dedupe and vision)",
            summary.embedding_failed
        );
    }
    println!("  diffs cached: {}", summary.diffs_cached);
}
