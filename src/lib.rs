//! # RagVault
//!
//! Vector similarity search with metadata filtering and content-addressed
//! deduplication, backed by SQLite.
//!
//! The engine logic (hashing, IVF index, query engine, ingest pipeline)
//! lives in the `ragvault-core` crate; this crate supplies the SQLite
//! [`sqlite_store::SqliteStore`], configuration, and the `rvault` CLI
//! commands.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────┐   ┌──────────────┐
//! │   CLI    │──▶│ Engine (ragvault-core)    │──▶│ SqliteStore  │
//! │ (rvault) │   │ ingest · query · IVF index │   │ rows · docs  │
//! └──────────┘   └───────────────────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection and engine construction |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | `Store` implementation over SQLite |
//! | [`dataset`], [`ingest`], [`get`], [`search`], [`index_cmd`], [`stats`] | CLI commands |

pub mod config;
pub mod dataset;
pub mod db;
pub mod get;
pub mod index_cmd;
pub mod ingest;
pub mod input;
pub mod migrate;
pub mod search;
pub mod sqlite_store;
pub mod stats;
