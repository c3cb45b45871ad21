//! Bridges an OrbitDB-shaped append-only log database with a
//! Storacha/w3up-shaped remote content-addressed object store.
//!
//! This crate implements the engine only: CID bridging, block extraction,
//! the upload/download pipelines, block analysis, root selection, and the
//! fallback reconstruction path, composed by an [`orchestrator::Orchestrator`]
//! into `backup`, `restore`, and `purge` workflows. It never talks HTTP and
//! never opens a log database itself — those are External Interface
//! Adapters ([`remote::RemoteStore`], [`download::GatewayFetcher`],
//! [`logdb::LogDb`]) that concrete crates (`orbit-mirror-reqwest`) or
//! callers provide.

pub mod analyze;
pub mod blockstore;
pub mod cid_bridge;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod logdb;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod remote;
pub mod select;
pub mod shape;
pub mod upload;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use error::{Error, Result};
