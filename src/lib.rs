//! # pr-triage
//!
//! Triage for a repository's backlog of open pull requests and issues.
//!
//! Items are pulled from GitHub into a local SQLite store together with
//! an embedding of their text. Over that store the tool finds clusters of
//! near-duplicates, ranks items by a weighted quality score and classifies
//! them against the project's vision document.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐
//! │  GitHub  │──▶│ scan: enrich │──▶│   SQLite    │
//! │ REST API │   │   + embed    │   │ items+vecs  │
//! └──────────┘   └──────────────┘   └──────┬──────┘
//!                                          │
//!                  ┌───────────────┬───────┴───────┐
//!                  ▼               ▼               ▼
//!             ┌─────────┐     ┌─────────┐     ┌─────────┐
//!             │ dedupe  │     │  rank   │     │ vision  │
//!             └─────────┘     └─────────┘     └─────────┘
//! ```
//!
//! The pure engines (clustering, scoring, vision, the HNSW index) live in
//! the `triage-core` crate; this crate adds I/O around them.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite vector store with embedding governance |
//! | [`embedding`] | OpenAI, Ollama and local embedding backends |
//! | [`github`] | GitHub REST client |
//! | [`scan`] | Fetch, enrich, embed, store |
//! | [`dedupe`] | Duplicate cluster report |
//! | [`rank`] | Quality ranking with author history |
//! | [`vision_cmd`] | Vision document sourcing and alignment report |
//! | [`pipeline`] | `triage run` |
//! | [`stats`], [`get`], [`embed_cmd`] | Store inspection and maintenance |
//! | [`progress`] | Scan progress on stderr |

pub mod config;
pub mod db;
pub mod dedupe;
pub mod embed_cmd;
pub mod embedding;
pub mod get;
pub mod github;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod rank;
pub mod scan;
pub mod sqlite_store;
pub mod stats;
pub mod vision_cmd;

#[cfg(test)]
pub(crate) mod testing;
