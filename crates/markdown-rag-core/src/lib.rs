//! # markdown-rag core
//!
//! Runtime-agnostic logic shared by the `markdown-rag` application:
//! data models, the markdown header + sliding-window chunker, the
//! vector store abstraction, the embedding provider trait, the TTL
//! search cache, and rendering of search hits for agents.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O.

pub mod cache;
pub mod chunk;
pub mod embedding;
pub mod format;
pub mod models;
pub mod store;
