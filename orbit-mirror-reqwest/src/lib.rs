#![warn(missing_debug_implementations, missing_docs, rust_2018_idioms)]
#![deny(unreachable_pub)]

//! # orbit-mirror-reqwest
//!
//! The `reqwest`-backed transport for `orbit-mirror`: an [`HttpRemoteStore`]
//! that talks to a Storacha/w3up-shaped three-layer HTTP API, and an
//! [`HttpGatewayFetcher`] that downloads objects from a list of IPFS-style
//! gateways. Neither type touches `orbit-mirror`'s orchestration logic — they
//! only implement its `RemoteStore`/`GatewayFetcher` seams.

mod client;
mod error;
mod gateway;

pub use client::HttpRemoteStore;
pub use error::Error;
pub use gateway::HttpGatewayFetcher;
