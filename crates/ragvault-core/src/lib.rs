//! # RagVault Core
//!
//! Runtime-agnostic engine logic for RagVault: data models, content
//! hashing, chunking, the IVF index, the similarity query engine, the
//! dedup ingest pipeline, and the [`store::Store`] abstraction.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Storage is
//! reached exclusively through the [`store::Store`] trait; the
//! application crate provides the SQLite implementation and
//! [`store::memory::InMemoryStore`] covers tests and embedded use.
//!
//! The usual entry point is [`engine::Engine`], which ties a store to an
//! [`ivf::IvfIndex`] and exposes ingest and query operations.

pub mod chunk;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod filter;
pub mod hash;
pub mod ingest;
pub mod ivf;
pub mod models;
pub mod search;
pub mod store;

pub use engine::{Engine, EngineConfig};
pub use error::{EngineError, Result};
