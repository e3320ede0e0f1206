//! `triage run`: scan, then dedupe, rank and vision over one store.
//!
//! The scan finishes before anything reads the store. `--skip-scan` runs
//! the analysis steps over whatever a previous scan left behind. Vision
//! is skipped (not failed) when no provider or document is available.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use triage_core::cluster::ClusterReport;
use triage_core::embedding::EmbeddingProvider;
use triage_core::models::{RankedItem, RepoId};

use crate::config::Config;
use crate::dedupe::{self, dedupe_repo};
use crate::github::{GitHubClient, ItemSource};
use crate::progress::{ProgressMode, ScanProgressReporter};
use crate::rank::{self, rank_repo, RankOptions};
use crate::scan::{self, open_provider, scan_repo, ScanOptions, ScanSummary};
use crate::sqlite_store::{SqliteStore, StoreOptions};
use crate::vision_cmd::{self, vision_repo, VisionReport};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub skip_scan: bool,
    pub scan: ScanOptions,
    pub rank: RankOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanSummary>,
    pub duplicates: ClusterReport,
    pub ranking: Vec<RankedItem>,
    pub vision: Option<VisionReport>,
}

pub async fn run_pipeline(
    config: &Config,
    repo_arg: Option<&str>,
    options: &RunOptions,
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

    let report = run_steps(
        &store,
        &client,
        provider.as_deref(),
        &repo,
        config,
        options,
        reporter.as_ref(),
        Utc::now(),
    )
    .await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if let Some(summary) = &report.scan {
        scan::print_summary(summary);
        println!();
    }
    dedupe::print_report(&repo, &report.duplicates);
    println!();
    rank::print_ranking(&repo, &report.ranking);
    println!();
    match &report.vision {
        Some(vision) => vision_cmd::print_report(vision),
        None => println!("vision {}: skipped", repo),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn run_steps(
    store: &SqliteStore,
    source: &dyn ItemSource,
    provider: Option<&dyn EmbeddingProvider>,
    repo: &RepoId,
    config: &Config,
    options: &RunOptions,
    progress: &dyn ScanProgressReporter,
    now: DateTime<Utc>,
) -> Result<RunReport> {
    let scan = if options.skip_scan {
        None
    } else {
        Some(scan_repo(store, source, provider, config, repo, &options.scan, progress).await?)
    };

    let duplicates = dedupe_repo(store, repo, config, config.dedupe.threshold, now).await?;

    let rank_source = if options.rank.offline {
        None
    } else {
        Some(source)
    };
    let ranking = rank_repo(store, rank_source, repo, config, &options.rank, now).await?;

    let vision = match provider {
        Some(provider) => vision_repo(store, source, provider, repo, config).await?,
        None => {
            log::warn!("{}: vision alignment skipped, no embedding provider", repo);
            None
        }
    };

    Ok(RunReport {
        scan,
        duplicates,
        ranking,
        vision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::testing::*;

    #[tokio::test]
    async fn full_run_over_fake_repo() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let provider = FakeProvider::new(32);
        let store = SqliteStore::open(
            &config.db.path,
            StoreOptions::for_live_provider(&config.embedding, Some(&provider)),
        )
        .await
        .unwrap();

        let mut source = FakeSource {
            prs: vec![
                pr(1, "Fix login crash", "login crash on empty password", "alice", 1),
                pr(2, "Add plugin loader", "dynamic plugin loading", "bob", 2),
            ],
            issues: vec![issue(3, "Fix login crash", "login crash on empty password", "carol", 3)],
            ..Default::default()
        };
        source.merged.insert("alice".into(), 12);
        source
            .documents
            .insert("README.md".into(), "# Plugins\nA dynamic plugin loading system for everything.\n".into());
        let repo = RepoId::parse("o/r").unwrap();

        let report = run_steps(
            &store,
            &source,
            Some(&provider),
            &repo,
            &config,
            &RunOptions::default(),
            &NoProgress,
            now(),
        )
        .await
        .unwrap();

        assert_eq!(report.scan.as_ref().unwrap().ingested, 3);
        // Identical texts embed identically.
        assert_eq!(report.duplicates.clusters.len(), 1);
        assert_eq!(report.duplicates.clusters[0].len(), 2);
        assert_eq!(report.ranking.len(), 3);
        let vision = report.vision.unwrap();
        assert_eq!(vision.document, "o/r:README.md");
        assert_eq!(vision.scores.len(), 3);
    }

    #[tokio::test]
    async fn skip_scan_without_provider() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = SqliteStore::open(&config.db.path, StoreOptions::from_config(&config.embedding))
            .await
            .unwrap();
        store.put_item(&pr(1, "stored", "", "a", 1)).await.unwrap();
        let repo = RepoId::parse("o/r").unwrap();
        let options = RunOptions {
            skip_scan: true,
            ..Default::default()
        };

        let report = run_steps(&store, &FakeSource::default(), None, &repo, &config, &options, &NoProgress, now())
            .await
            .unwrap();
        assert!(report.scan.is_none());
        assert!(report.duplicates.clusters.is_empty());
        assert_eq!(report.ranking.len(), 1);
        assert!(report.vision.is_none());
    }
}
