//! Store statistics and health overview.
//!
//! Summarises what a scan has stored: items per repo, embedding coverage,
//! failed (zero-vector) embeddings and the recorded embedding metadata.
//! Opens the store in inspect mode, so it works even after the embedding
//! config has changed and other commands refuse to run.

use anyhow::Result;
use serde::Serialize;

use triage_core::store::{StoreStats, VectorStore};

use crate::config::Config;
use crate::sqlite_store::{SqliteStore, StoreMeta, StoreOptions};

#[derive(Debug, Clone, Serialize)]
pub struct RepoStats {
    pub repo: String,
    #[serde(flatten)]
    pub counts: StoreStats,
    /// Most recent `updated_at` among the repo's items (unix seconds).
    pub last_updated: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub database: String,
    pub size_bytes: u64,
    pub meta: StoreMeta,
    pub repos: Vec<RepoStats>,
}

pub async fn run_stats(config: &Config, repo_arg: Option<&str>, json: bool) -> Result<()> {
    let store = SqliteStore::open(&config.db.path, StoreOptions::inspect()).await?;
    let report = collect(&store, config, repo_arg).await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

pub async fn collect(
    store: &SqliteStore,
    config: &Config,
    repo_arg: Option<&str>,
) -> Result<StatsReport> {
    let repos = match repo_arg {
        Some(_) => vec![config.repo(repo_arg)?.slug()],
        None => store.repos().await?,
    };

    let mut per_repo = Vec::with_capacity(repos.len());
    for repo in repos {
        per_repo.push(RepoStats {
            counts: store.stats(&repo).await?,
            last_updated: store.last_updated(&repo).await?.map(|t| t.timestamp()),
            repo,
        });
    }

    Ok(StatsReport {
        database: config.db.path.display().to_string(),
        size_bytes: std::fs::metadata(&config.db.path)
            .map(|m| m.len())
            .unwrap_or(0),
        meta: store.meta().await?,
        repos: per_repo,
    })
}

fn print_report(report: &StatsReport) {
    println!("pr-triage store stats");
    println!("=====================");
    println!();
    println!("  Database:    {}", report.database);
    println!("  Size:        {}", format_bytes(report.size_bytes));
    println!(
        "  Model:       {}",
        report.meta.embedding_model.as_deref().unwrap_or("(none)")
    );
    match (report.meta.embedding_dims, report.meta.truncate_dims) {
        (Some(d), Some(_)) => println!(
            "  Dimensions:  {} (truncated from {})",
            d,
            report
                .meta
                .native_dims
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string())
        ),
        (Some(d), None) => println!("  Dimensions:  {}", d),
        (None, _) => println!("  Dimensions:  (not fixed yet)"),
    }

    if report.repos.is_empty() {
        println!();
        println!("  No items stored. Run `triage scan` first.");
        println!();
        return;
    }

    println!();
    println!(
        "  {:<32} {:>6} {:>7} {:>9} {:>7}   {}",
        "REPO", "PRS", "ISSUES", "EMBEDDED", "FAILED", "LAST UPDATED"
    );
    println!("  {}", "-".repeat(84));
    for r in &report.repos {
        let updated = match r.last_updated {
            Some(ts) => format_ts_relative(ts),
            None => "never".to_string(),
        };
        println!(
            "  {:<32} {:>6} {:>7} {:>9} {:>7}   {}",
            r.repo, r.counts.prs, r.counts.issues, r.counts.embedded, r.counts.zero_vectors, updated
        );
    }
    println!();
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative time ("3 hours ago") for recent timestamps, ISO-ish otherwise.
pub fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    let plural = |n: i64| if n == 1 { "" } else { "s" };
    match delta {
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => format!("{} min{} ago", d / 60, plural(d / 60)),
        d if d < 86400 => format!("{} hour{} ago", d / 3600, plural(d / 3600)),
        d if d < 86400 * 30 => format!("{} day{} ago", d / 86400, plural(d / 86400)),
        _ => format_ts_iso(ts),
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
