//! TOML configuration.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below. [`load_config`] parses and validates in one step so
//! commands never see an inconsistent configuration.
//!
//! ```toml
//! [db]
//! path = "./data/triage.sqlite"
//!
//! [github]
//! repo = "rust-lang/rust"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//! truncate_dims = 512
//!
//! [dedupe]
//! threshold = 0.85
//!
//! [vision]
//! path = "./VISION.md"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use triage_core::cluster::ClusterConfig;
use triage_core::models::RepoId;
use triage_core::scoring::ScoreWeights;
use triage_core::vision::VisionThresholds;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub dedupe: ClusterConfig,
    #[serde(default)]
    pub scoring: ScoreWeights,
    #[serde(default)]
    pub vision: VisionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/triage.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    /// Default `owner/name`; `--repo` overrides it.
    #[serde(default)]
    pub repo: Option<String>,
    /// Environment variable holding the API token. Unauthenticated
    /// access works but is heavily rate limited.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// How many of the most active authors get a merged-PR lookup.
    #[serde(default = "default_author_lookup_limit")]
    pub author_lookup_limit: usize,
    #[serde(default = "default_lookup_delay_ms")]
    pub lookup_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            repo: None,
            token_env: default_token_env(),
            api_url: default_api_url(),
            max_retries: default_max_retries(),
            per_page: default_per_page(),
            author_lookup_limit: default_author_lookup_limit(),
            lookup_delay_ms: default_lookup_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_per_page() -> u32 {
    100
}
fn default_author_lookup_limit() -> usize {
    50
}
fn default_lookup_delay_ms() -> u64 {
    250
}

impl GitHubConfig {
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Keep only the first N dimensions of every vector.
    #[serde(default)]
    pub truncate_dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub batch_delay_ms: u64,
    /// Item text is cut to this many chars before embedding.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            truncate_dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            batch_delay_ms: 0,
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_input_chars() -> usize {
    8000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Width of stored vectors: the truncation target if set, else the
    /// provider's native width.
    pub fn effective_dims(&self) -> Option<usize> {
        self.truncate_dims.or(self.dims)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VisionConfig {
    /// Local vision document. When unset the repo's `VISION.md`,
    /// `docs/VISION.md` or `README.md` is fetched.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_aligned")]
    pub aligned: f64,
    #[serde(default = "default_drifting")]
    pub drifting: f64,
    #[serde(default = "default_vision_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_vision_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            path: None,
            aligned: default_aligned(),
            drifting: default_drifting(),
            batch_size: default_vision_batch_size(),
            batch_delay_ms: default_vision_batch_delay_ms(),
        }
    }
}

fn default_aligned() -> f64 {
    VisionThresholds::default().aligned
}
fn default_drifting() -> f64 {
    VisionThresholds::default().drifting
}
fn default_vision_batch_size() -> usize {
    5
}
fn default_vision_batch_delay_ms() -> u64 {
    200
}

impl VisionConfig {
    pub fn thresholds(&self) -> VisionThresholds {
        VisionThresholds {
            aligned: self.aligned,
            drifting: self.drifting,
        }
    }
}

impl Config {
    /// All defaults. Used by commands that can run without a config file.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Resolve the target repository: `--repo` first, then `github.repo`.
    pub fn repo(&self, cli_repo: Option<&str>) -> Result<RepoId> {
        let raw = cli_repo
            .or(self.github.repo.as_deref())
            .context("no repository given: pass --repo owner/name or set github.repo")?;
        Ok(RepoId::parse(raw)?)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if let Some(repo) = &config.github.repo {
        RepoId::parse(repo)?;
    }
    if config.github.per_page == 0 || config.github.per_page > 100 {
        bail!("github.per_page must be in 1..=100");
    }

    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if embedding.is_enabled() && embedding.provider != "local" {
        if embedding.dims.is_none() || embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                embedding.provider
            );
        }
        if embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                embedding.provider
            );
        }
    }
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if let (Some(target), Some(native)) = (embedding.truncate_dims, embedding.dims) {
        if target == 0 || target > native {
            bail!(
                "embedding.truncate_dims ({}) must be in 1..={} (embedding.dims)",
                target,
                native
            );
        }
    }

    let dedupe = &config.dedupe;
    if !(dedupe.threshold > 0.0 && dedupe.threshold <= 1.0) {
        bail!("dedupe.threshold must be in (0.0, 1.0]");
    }
    if dedupe.ann_neighbors == 0 {
        bail!("dedupe.ann_neighbors must be > 0");
    }
    if dedupe.half_life_days <= 0.0 {
        bail!("dedupe.half_life_days must be > 0");
    }

    config.scoring.validate()?;
    config.vision.thresholds().validate()?;
    if config.vision.batch_size == 0 {
        bail!("vision.batch_size must be > 0");
    }
    Ok(())
}
