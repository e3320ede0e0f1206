//! `triage embed reset` and `triage embed rebuild`.
//!
//! `reset` deletes every stored vector together with the recorded model,
//! width and truncation, which is how a store is moved to a new embedding
//! setup. `rebuild` does the same and then re-embeds every stored item
//! with the configured provider, without calling GitHub.

use anyhow::{bail, Result};

use triage_core::embedding::EmbeddingProvider;
use triage_core::store::VectorStore;

use crate::config::Config;
use crate::progress::{ProgressMode, ScanProgressReporter};
use crate::scan::{embed_and_store, open_provider, EmbedCounts};
use crate::sqlite_store::{SqliteStore, StoreOptions};

pub async fn run_embed_reset(config: &Config) -> Result<()> {
    let deleted = SqliteStore::reset_embeddings(&config.db.path).await?;
    println!("embed reset");
    println!("  embeddings deleted: {}", deleted);
    println!("  next: `triage embed rebuild` or `triage scan --full`");
    Ok(())
}

pub async fn run_embed_rebuild(config: &Config, progress: ProgressMode) -> Result<()> {
    let Some(provider) = open_provider(config)? else {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    };
    let reporter = progress.reporter();
    let per_repo = rebuild(config, provider.as_ref(), reporter.as_ref()).await?;

    println!("embed rebuild");
    println!("  model: {} ({} dims)", provider.model_name(), provider.dims());
    if per_repo.is_empty() {
        println!("  no items to embed");
    }
    for (repo, counts) in &per_repo {
        println!(
            "  {}: embedded {}, failed {}",
            repo, counts.embedded, counts.failed
        );
    }
    Ok(())
}

/// Clear all vectors and re-embed every stored item with `provider`.
pub async fn rebuild(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    progress: &dyn ScanProgressReporter,
) -> Result<Vec<(String, EmbedCounts)>> {
    let deleted = SqliteStore::reset_embeddings(&config.db.path).await?;
    log::info!("cleared {} embeddings before rebuild", deleted);

    let store = SqliteStore::open(
        &config.db.path,
        StoreOptions::for_live_provider(&config.embedding, Some(provider)),
    )
    .await?;

    let mut per_repo = Vec::new();
    for repo in store.repos().await? {
        let items = store.get_all_for_repo(&repo).await?;
        let counts = embed_and_store(&store, provider, config, &items, true, &repo, progress).await?;
        per_repo.push((repo, counts));
    }
    store.close().await;
    Ok(per_repo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::testing::*;
    use triage_core::error::StoreError;

    #[tokio::test]
    async fn rebuild_switches_provider_width() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        {
            let store =
                SqliteStore::open(&config.db.path, StoreOptions::for_provider("old", 3, None, 3))
                    .await
                    .unwrap();
            store.upsert(&pr(1, "one", "body", "a", 1), &[1.0, 0.0, 0.0]).await.unwrap();
            store.upsert(&issue(2, "two", "", "b", 1), &[0.0, 1.0, 0.0]).await.unwrap();
            store.close().await;
        }

        // A different provider cannot open the old store...
        let provider = FakeProvider::new(8);
        let err = SqliteStore::open(
            &config.db.path,
            StoreOptions::for_live_provider(&config.embedding, Some(&provider)),
        )
        .await
        .err()
        .unwrap();
        assert!(err.downcast_ref::<StoreError>().is_some());

        // ...until a rebuild moves everything over.
        let per_repo = rebuild(&config, &provider, &NoProgress).await.unwrap();
        assert_eq!(per_repo.len(), 1);
        assert_eq!(per_repo[0].1.embedded, 2);

        let store = SqliteStore::open(&config.db.path, StoreOptions::inspect())
            .await
            .unwrap();
        let meta = store.meta().await.unwrap();
        assert_eq!(meta.embedding_model.as_deref(), Some("fake-model"));
        assert_eq!(meta.embedding_dims, Some(8));
        let vectors = store.get_all_embeddings("o/r").await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.values().all(|v| v.len() == 8));
    }

    #[tokio::test]
    async fn reset_clears_vectors_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        {
            let store =
                SqliteStore::open(&config.db.path, StoreOptions::for_provider("m", 2, None, 2))
                    .await
                    .unwrap();
            store.upsert(&pr(1, "one", "", "a", 1), &[1.0, 0.0]).await.unwrap();
            store.close().await;
        }
        assert_eq!(SqliteStore::reset_embeddings(&config.db.path).await.unwrap(), 1);

        let store = SqliteStore::open(&config.db.path, StoreOptions::inspect())
            .await
            .unwrap();
        assert_eq!(store.meta().await.unwrap().embedding_model, None);
        assert!(store.get(&triage_core::models::ItemKey::pr("o/r", 1)).await.unwrap().is_some());
    }
}
