//! Embedding provider trait, truncation decorator and failure isolation.
//!
//! Concrete HTTP/local backends (OpenAI, Ollama, fastembed) live in the
//! `pr-triage` app crate and are selected from config by tag.

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::error::TriageError;

/// Trait for embedding providers.
///
/// Every backend exposes the same call shape. Implementations should
/// retry transient failures themselves; callers that must not abort on a
/// single bad input use [`embed_isolated`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Replace empty or whitespace-only input with a single space.
///
/// Providers reject empty strings, and one such item would otherwise fail
/// the whole batch.
pub fn prepare_input(text: &str) -> String {
    if text.trim().is_empty() {
        " ".to_string()
    } else {
        text.to_string()
    }
}

/// Keeps only the first `target` dimensions of an inner provider's output
/// (matryoshka-style truncation).
///
/// The effective width is [`dims`](EmbeddingProvider::dims) = `target`.
/// Stores record it so a later run with a different target is rejected.
pub struct TruncatingProvider {
    inner: Box<dyn EmbeddingProvider>,
    target: usize,
}

impl TruncatingProvider {
    /// Wrap `inner`. Fails unless `0 < target <= inner.dims()`.
    pub fn new(inner: Box<dyn EmbeddingProvider>, target: usize) -> Result<Self, TriageError> {
        let native = inner.dims();
        if target == 0 || target > native {
            return Err(TriageError::InvalidTruncation { target, native });
        }
        Ok(Self { inner, target })
    }

    /// Width reported by the wrapped provider.
    pub fn native_dims(&self) -> usize {
        self.inner.dims()
    }
}

#[async_trait]
impl EmbeddingProvider for TruncatingProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.target
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.inner.embed_batch(texts).await?;
        vectors
            .into_iter()
            .map(|mut v| {
                if v.len() < self.target {
                    bail!(
                        "provider returned {} dims, cannot truncate to {}",
                        v.len(),
                        self.target
                    );
                }
                v.truncate(self.target);
                Ok(v)
            })
            .collect()
    }
}

/// Result of [`embed_isolated`].
#[derive(Debug, Clone)]
pub struct IsolatedBatch {
    /// One vector per input; zero vectors for inputs that failed.
    pub vectors: Vec<Vec<f32>>,
    /// Number of inputs that were replaced by zero vectors.
    pub failed: usize,
}

/// Embed a batch without letting one bad input abort it.
///
/// Tries the whole batch first. If that fails (or returns the wrong
/// number or width of vectors), every text is embedded on its own and any
/// that still fails is replaced by an all-zero vector of `provider.dims()`.
/// Zero vectors are skipped by clustering and vision scoring.
pub async fn embed_isolated(provider: &dyn EmbeddingProvider, texts: &[String]) -> IsolatedBatch {
    let dims = provider.dims();
    let prepared: Vec<String> = texts.iter().map(|t| prepare_input(t)).collect();

    match provider.embed_batch(&prepared).await {
        Ok(vectors)
            if vectors.len() == prepared.len() && vectors.iter().all(|v| v.len() == dims) =>
        {
            return IsolatedBatch { vectors, failed: 0 };
        }
        Ok(vectors) => log::warn!(
            "embedding batch returned {} vectors for {} inputs; retrying one by one",
            vectors.len(),
            prepared.len()
        ),
        Err(e) => log::warn!("embedding batch failed, retrying one by one: {:#}", e),
    }

    let mut vectors = Vec::with_capacity(prepared.len());
    let mut failed = 0;
    for text in &prepared {
        match provider.embed(text).await {
            Ok(v) if v.len() == dims => vectors.push(v),
            Ok(v) => {
                log::warn!("embedding returned {} dims, expected {}", v.len(), dims);
                failed += 1;
                vectors.push(vec![0.0; dims]);
            }
            Err(e) => {
                log::warn!("embedding failed for one item, storing zero vector: {:#}", e);
                failed += 1;
                vectors.push(vec![0.0; dims]);
            }
        }
    }

    IsolatedBatch { vectors, failed }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Deterministic provider for tests: hashes characters into `dims`
    /// buckets. Texts containing `poison` fail.
    pub struct FakeProvider {
        pub dims: usize,
    }

    pub fn fake_vector(text: &str, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        for (i, c) in text.chars().enumerate() {
            v[(c as usize + i) % dims] += 1.0;
        }
        v
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        fn model_name(&self) -> &str {
            "fake"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("poison")) {
                bail!("poisoned input");
            }
            if texts.iter().any(|t| t.is_empty()) {
                bail!("empty input");
            }
            Ok(texts.iter().map(|t| fake_vector(t, self.dims)).collect())
        }
    }
}
