//! `triage dedupe`: report clusters of near-duplicate PRs and issues.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use triage_core::cluster::{find_duplicates, ClusterReport, EdgeStrategy};
use triage_core::models::RepoId;
use triage_core::store::VectorStore;

use crate::config::Config;
use crate::sqlite_store::{SqliteStore, StoreOptions};

pub async fn run_dedupe(
    config: &Config,
    repo_arg: Option<&str>,
    threshold: Option<f32>,
    json: bool,
) -> Result<()> {
    let repo = config.repo(repo_arg)?;
    let threshold = threshold.unwrap_or(config.dedupe.threshold);
    if !(threshold > 0.0 && threshold <= 1.0) {
        bail!("--threshold must be in (0, 1], got {}", threshold);
    }

    let store = SqliteStore::open(&config.db.path, StoreOptions::from_config(&config.embedding))
        .await?;
    let report = dedupe_repo(&store, &repo, config, threshold, Utc::now()).await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&repo, &report);
    }
    Ok(())
}

/// Cluster `repo` with the configured settings and `threshold`.
pub async fn dedupe_repo(
    store: &dyn VectorStore,
    repo: &RepoId,
    config: &Config,
    threshold: f32,
    now: DateTime<Utc>,
) -> Result<ClusterReport> {
    let mut cluster_config = config.dedupe.clone();
    cluster_config.threshold = threshold;
    let report = find_duplicates(store, &repo.slug(), &cluster_config, now).await?;
    log::info!(
        "{}: {} clusters from {} items ({:?})",
        repo,
        report.clusters.len(),
        report.considered,
        report.strategy
    );
    Ok(report)
}

pub fn print_report(repo: &RepoId, report: &ClusterReport) {
    println!("dedupe {}", repo);
    println!(
        "  items considered: {}  (edges: {})",
        report.considered,
        match report.strategy {
            EdgeStrategy::Exhaustive => "exhaustive",
            EdgeStrategy::Approximate => "approximate",
        }
    );
    if report.skipped_zero > 0 {
        println!(
            "  skipped: {} items with failed embeddings (rerun `triage scan --full` to retry)",
            report.skipped_zero
        );
    }
    println!("  clusters: {}", report.clusters.len());

    if report.clusters.is_empty() {
        println!();
        println!("No duplicates found.");
        return;
    }

    for cluster in &report.clusters {
        println!();
        println!(
            "[{}] {} items, avg similarity {:.3}: {}",
            cluster.id,
            cluster.len(),
            cluster.avg_similarity,
            cluster.theme
        );
        for member in &cluster.members {
            let marker = if member.key == cluster.best_pick { "*" } else { " " };
            println!(
                "  {} #{:<6} {:<5} {:.2}  {} (@{})",
                marker,
                member.key.number,
                member.key.item_type.as_str(),
                member.pick_score,
                member.title,
                member.author
            );
        }
    }
    println!();
    println!("* = best pick");
}
