//! # project-context
//!
//! Project-scoped semantic retrieval: ingest heterogeneous sources into a
//! per-project vector index and answer natural-language questions with
//! ranked, source-attributed evidence.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────┐   ┌─────────────┐   ┌──────────────┐
//! │   Adapters   │──▶│ Artifacts │──▶│ Chunk+Embed │──▶│ vectordb/    │
//! │ local/web/gh │   │ sources/  │   │  (ingest)   │   │ index.sqlite │
//! │ youtube/gdoc │   └───────────┘   └─────────────┘   └──────┬───────┘
//! └──────────────┘                                            │
//!                                     question ──▶ embed ──▶ nearest ──▶ QueryResult
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pctx init research
//! pctx ingest research local ./notes.md ./paper.pdf
//! pctx ingest research web https://example.com/post
//! pctx query research "What is Alpha?" --top-k 5
//! pctx projects
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`adapters`] | Source adapters producing canonical documents |
//! | [`artifact`] | Persisted document format (header + body) |
//! | [`chunk`] | Overlapping fixed-size chunking |
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding providers and vector math |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | Text extraction from PDF and Office files |
//! | [`index`] | Vector index trait with SQLite and in-memory backends |
//! | [`ingest`] | Artifact → chunks → embeddings → index |
//! | [`models`] | Core data types and JSON result shapes |
//! | [`project`] | Project directories and manifests |
//! | [`query`] | Nearest-neighbor search and relevance scoring |
//! | [`workspace`] | Process-wide handles shared by all operations |

pub mod adapters;
pub mod artifact;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod models;
pub mod project;
pub mod query;
pub mod workspace;
