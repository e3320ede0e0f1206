//! # pr-triage CLI (`triage`)
//!
//! The `triage` binary pulls a repository's open pull requests and issues
//! into a local SQLite store and analyses them: near-duplicate clusters,
//! a quality ranking and alignment with the project's vision document.
//!
//! ## Usage
//!
//! ```bash
//! triage --config ./config/triage.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `triage init` | Create the SQLite database and schema |
//! | `triage scan` | Fetch, enrich and embed open PRs and issues |
//! | `triage dedupe` | Report clusters of near-duplicates |
//! | `triage rank` | Rank items by quality score |
//! | `triage vision` | Classify items against the vision document |
//! | `triage run` | scan, dedupe, rank and vision in one go |
//! | `triage stats` | Store overview |
//! | `triage get <number>` | Show one stored item |
//! | `triage embed reset` | Delete all vectors and embedding metadata |
//! | `triage embed rebuild` | Re-embed every stored item |
//!
//! ## Examples
//!
//! ```bash
//! triage init
//! GITHUB_TOKEN=... triage scan --repo rust-lang/cargo
//! triage dedupe --threshold 0.9 --json
//! triage rank --limit 20
//! triage run -v
//! ```

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use env_logger::Env;

use pr_triage::config::{self, Config};
use pr_triage::pipeline::RunOptions;
use pr_triage::progress::ProgressMode;
use pr_triage::rank::RankOptions;
use pr_triage::scan::ScanOptions;
use pr_triage::{dedupe, embed_cmd, get, migrate, pipeline, rank, scan, stats, vision_cmd};
use triage_core::models::ItemType;

/// pr-triage: duplicate detection, quality ranking and vision alignment
/// for a repository's open pull requests and issues.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/triage.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "triage",
    about = "Triage open pull requests and issues: duplicates, ranking, vision alignment",
    version,
    long_about = "pr-triage fetches a repository's open pull requests and issues, embeds them, \
    clusters near-duplicates, ranks items by a weighted quality score and classifies them \
    against the project's vision document."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/triage.toml`. When the file does not exist,
    /// built-in defaults are used and `--repo` is required.
    #[arg(long, global = true, default_value = "./config/triage.toml")]
    config: PathBuf,

    /// Repository as `owner/name`. Overrides `github.repo`.
    #[arg(long, global = true)]
    repo: Option<String>,

    /// More log output on stderr (`-v` info, `-vv` debug). `RUST_LOG` wins.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and its tables. Idempotent.
    Init,

    /// Fetch open PRs and issues and store them with embeddings.
    ///
    /// Items whose `updated_at` has not moved since the last scan are
    /// skipped. PRs are enriched with diff stats, CI status, approvals and
    /// test detection; their diffs are cached.
    Scan {
        /// Re-ingest and re-embed everything.
        #[arg(long)]
        full: bool,

        /// Fetch at most this many PRs and this many issues.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress on stderr: off, human or json. Defaults to human on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        #[arg(long)]
        json: bool,
    },

    /// Report clusters of near-duplicate PRs and issues.
    Dedupe {
        /// Cosine similarity needed for two items to be linked.
        #[arg(long)]
        threshold: Option<f32>,

        #[arg(long)]
        json: bool,
    },

    /// Rank stored items by quality score.
    Rank {
        /// Show at most this many items.
        #[arg(long)]
        limit: Option<usize>,

        /// Leave issues out.
        #[arg(long)]
        prs_only: bool,

        /// Skip the merged-PR lookups on GitHub.
        #[arg(long)]
        offline: bool,

        #[arg(long)]
        json: bool,
    },

    /// Classify stored items against the vision document.
    ///
    /// Uses `vision.path`, or `VISION.md`, `docs/VISION.md` or `README.md`
    /// from the repository.
    Vision {
        #[arg(long)]
        json: bool,
    },

    /// Run scan, dedupe, rank and vision in order.
    Run {
        /// Analyse what is already stored without scanning.
        #[arg(long)]
        skip_scan: bool,

        #[arg(long)]
        full: bool,

        /// Fetch at most this many PRs and this many issues.
        #[arg(long)]
        limit: Option<usize>,

        /// Skip the merged-PR lookups on GitHub.
        #[arg(long)]
        offline: bool,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        #[arg(long)]
        json: bool,
    },

    /// Show store statistics.
    ///
    /// Works regardless of the configured embedding model.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Show a stored PR or issue.
    Get {
        number: u64,

        /// `pr` or `issue`. Without it a PR wins over an issue.
        #[arg(long = "type")]
        item_type: Option<String>,

        /// Include the cached diff.
        #[arg(long)]
        diff: bool,

        #[arg(long)]
        json: bool,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Print a shell completion script.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Delete every vector and the recorded model, width and truncation.
    ///
    /// Needed after changing the embedding model, dims or truncation.
    Reset,

    /// Reset, then re-embed every stored item with the configured provider.
    Rebuild {
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "triage", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        log::info!("{} not found, using defaults", cli.config.display());
        Config::minimal()
    };
    let repo = cli.repo.as_deref();
    let progress_or_default =
        |p: Option<ProgressMode>| p.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Scan {
            full,
            limit,
            progress,
            json,
        } => {
            let options = ScanOptions { full, limit };
            scan::run_scan(&cfg, repo, &options, progress_or_default(progress), json).await?;
        }
        Commands::Dedupe { threshold, json } => {
            dedupe::run_dedupe(&cfg, repo, threshold, json).await?;
        }
        Commands::Rank {
            limit,
            prs_only,
            offline,
            json,
        } => {
            let options = RankOptions {
                limit,
                prs_only,
                offline,
            };
            rank::run_rank(&cfg, repo, &options, json).await?;
        }
        Commands::Vision { json } => {
            vision_cmd::run_vision(&cfg, repo, json).await?;
        }
        Commands::Run {
            skip_scan,
            full,
            limit,
            offline,
            progress,
            json,
        } => {
            let options = RunOptions {
                skip_scan,
                scan: ScanOptions { full, limit },
                rank: RankOptions {
                    offline,
                    ..Default::default()
                },
            };
            pipeline::run_pipeline(&cfg, repo, &options, progress_or_default(progress), json)
                .await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, repo, json).await?;
        }
        Commands::Get {
            number,
            item_type,
            diff,
            json,
        } => {
            let item_type = item_type
                .as_deref()
                .map(str::parse::<ItemType>)
                .transpose()?;
            get::run_get(&cfg, repo, number, item_type, diff, json).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Reset => embed_cmd::run_embed_reset(&cfg).await?,
            EmbedAction::Rebuild { progress } => {
                embed_cmd::run_embed_rebuild(&cfg, progress_or_default(progress)).await?
            }
        },
        Commands::Completions { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}
