//! # Triage Core
//!
//! Pure logic for pr-triage: item models, the similarity kernel, the
//! embedding provider trait, the vector store abstraction (with an
//! in-memory backend and an HNSW index), duplicate clustering, quality
//! scoring and vision alignment.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem I/O. The
//! `pr-triage` app crate supplies the SQLite store, the embedding
//! backends and the GitHub client.

pub mod cluster;
pub mod embedding;
pub mod error;
pub mod models;
pub mod scoring;
pub mod similarity;
pub mod store;
pub mod vision;
