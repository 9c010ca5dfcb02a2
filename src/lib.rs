//! # markdown-rag
//!
//! Retrieval-augmented chat over a folder of markdown files.
//!
//! Documents are split by markdown headers and then into overlapping
//! character windows, embedded, and stored in a local SQLite vector index.
//! Questions go through a two-stage agent pipeline: an analyst drafts an
//! answer using a cached search tool over the index, and a reviewer
//! corrects it and appends references to the documents actually retrieved.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │ Markdown │──▶│ Chunk+Embed  │──▶│  SQLite  │
//! │  files   │   │              │   │ vectors  │
//! └──────────┘   └──────────────┘   └────┬─────┘
//!                                        │
//!                               ┌────────▼───────┐
//!                               │ Retriever (TTL │
//!                               │     cache)     │
//!                               └────────┬───────┘
//!                                        ▼
//!                          ┌──────────────────────────┐
//!                          │ Draft ──▶ Review pipeline│
//!                          └────────┬─────────┬───────┘
//!                                   ▼         ▼
//!                              ┌────────┐ ┌────────┐
//!                              │  CLI   │ │  HTTP  │
//!                              │(mdrag) │ │        │
//!                              └────────┘ └────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`loader`] | Markdown file discovery and decoding |
//! | [`ingest`] | Load → chunk → embed → store orchestration |
//! | [`index`] | Building and opening the persisted vector index |
//! | [`retriever`] | Cached search rendered as text |
//! | [`tools`] | Tools the analyst agent can call |
//! | [`agents`] | Agent personas, tasks, and the tool-call protocol |
//! | [`pipeline`] | Draft and review stages |
//! | [`runner`] | Deadline and cancellation around a pipeline run |
//! | [`server`] | HTTP backend |

pub mod agents;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod history;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod retriever;
pub mod runner;
pub mod server;
pub mod sqlite_store;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;
