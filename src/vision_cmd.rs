//! `triage vision`: classify stored items against the project's vision
//! document.
//!
//! The document is `vision.path` when configured, otherwise the first of
//! `VISION.md`, `docs/VISION.md` and `README.md` found on the repo's
//! default branch. No document means the step is skipped with a warning.

use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;

use triage_core::embedding::{embed_isolated, EmbeddingProvider};
use triage_core::models::{Alignment, RepoId, VisionChunk, VisionScore};
use triage_core::store::VectorStore;
use triage_core::vision::{prepare_sections, score_repo};

use crate::config::Config;
use crate::github::{GitHubClient, ItemSource};
use crate::scan::open_provider;
use crate::sqlite_store::{SqliteStore, StoreOptions};

/// Repository files tried in order when no local document is configured.
pub const VISION_CANDIDATES: [&str; 3] = ["VISION.md", "docs/VISION.md", "README.md"];

#[derive(Debug, Clone, Serialize)]
pub struct VisionReport {
    pub repo: String,
    /// Where the document came from (local path or repo file).
    pub document: String,
    pub sections: usize,
    pub aligned: usize,
    pub drifting: usize,
    pub off_vision: usize,
    pub scores: Vec<VisionScore>,
}

pub async fn run_vision(config: &Config, repo_arg: Option<&str>, json: bool) -> Result<()> {
    let repo = config.repo(repo_arg)?;
    let Some(provider) = open_provider(config)? else {
        bail!("vision alignment needs an embedding provider; set [embedding] provider in config");
    };
    let store = SqliteStore::open(
        &config.db.path,
        StoreOptions::for_live_provider(&config.embedding, Some(provider.as_ref())),
    )
    .await?;
    let client = GitHubClient::new(&config.github)?;

    let report = vision_repo(&store, &client, provider.as_ref(), &repo, config).await?;
    store.close().await;

    match report {
        Some(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
        Some(report) => print_report(&report),
        None if json => println!("null"),
        None => println!("vision {}: skipped (no vision document)", repo),
    }
    Ok(())
}

/// Score `repo` against its vision document. `Ok(None)` when there is no
/// document or it has no usable sections.
pub async fn vision_repo(
    store: &dyn VectorStore,
    source: &dyn ItemSource,
    provider: &dyn EmbeddingProvider,
    repo: &RepoId,
    config: &Config,
) -> Result<Option<VisionReport>> {
    let Some((origin, doc)) = load_document(config, source, repo).await? else {
        log::warn!(
            "{}: no vision document found (tried {}); skipping vision alignment",
            repo,
            VISION_CANDIDATES.join(", ")
        );
        return Ok(None);
    };

    let chunks = embed_sections(provider, &doc, config).await;
    if chunks.is_empty() {
        log::warn!("{}: vision document {} has no usable sections", repo, origin);
        return Ok(None);
    }

    let thresholds = config.vision.thresholds();
    let scores = score_repo(store, &repo.slug(), &chunks, &thresholds).await?;
    let count = |a: Alignment| scores.iter().filter(|s| s.alignment == a).count();

    Ok(Some(VisionReport {
        repo: repo.slug(),
        document: origin,
        sections: chunks.len(),
        aligned: count(Alignment::Aligned),
        drifting: count(Alignment::Drifting),
        off_vision: count(Alignment::OffVision),
        scores,
    }))
}

/// Find the vision document, returning `(origin, text)`.
pub async fn load_document(
    config: &Config,
    source: &dyn ItemSource,
    repo: &RepoId,
) -> Result<Option<(String, String)>> {
    if let Some(path) = &config.vision.path {
        return match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some((path.display().to_string(), text))),
            Err(e) => {
                log::warn!("cannot read vision document {}: {}", path.display(), e);
                Ok(None)
            }
        };
    }

    for candidate in VISION_CANDIDATES {
        match source.fetch_file(repo, candidate).await {
            Ok(Some(text)) if !text.trim().is_empty() => {
                return Ok(Some((format!("{}:{}", repo, candidate), text)))
            }
            Ok(_) => {}
            Err(e) => log::warn!("fetching {} from {} failed: {:#}", candidate, repo, e),
        }
    }
    Ok(None)
}

/// Split and embed the document in `vision.batch_size` batches.
async fn embed_sections(
    provider: &dyn EmbeddingProvider,
    doc: &str,
    config: &Config,
) -> Vec<VisionChunk> {
    let sections = prepare_sections(doc);
    let batch_size = config.vision.batch_size.max(1);
    let delay = Duration::from_millis(config.vision.batch_delay_ms);
    let mut chunks = Vec::with_capacity(sections.len());

    for (i, batch) in sections.chunks(batch_size).enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
        let result = embed_isolated(provider, &texts).await;
        if result.failed > 0 {
            log::warn!("{} vision section(s) failed to embed and will be ignored", result.failed);
        }
        for (section, embedding) in batch.iter().zip(result.vectors) {
            chunks.push(VisionChunk {
                heading: section.heading.clone(),
                embedding,
            });
        }
    }
    chunks
}

pub fn print_report(report: &VisionReport) {
    println!("vision {}", report.repo);
    println!("  document: {}", report.document);
    println!("  sections: {}", report.sections);
    println!(
        "  aligned: {}  drifting: {}  off-vision: {}",
        report.aligned, report.drifting, report.off_vision
    );
    if report.scores.is_empty() {
        println!();
        println!("No embedded items to score.");
        return;
    }
    println!();
    for score in &report.scores {
        println!(
            "  {:<10} {:.3}  #{} {}  [{}]",
            score.alignment.as_str(),
            score.similarity,
            score.key.number,
            score.title,
            score.matched_section
        );
    }
}
