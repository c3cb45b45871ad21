//! The local block store contract the log-DB runtime is assumed to expose
//! (see `§6`, "Log-DB runtime contract"). Modeled on the shape of
//! `wnfs_common::BlockStore` (an unrelated project's trait with the same
//! `get`/`put`/`has` fingerprint), extended with the full-iteration method
//! this crate needs that isn't guaranteed by that trait.

use async_trait::async_trait;
use bytes::Bytes;
use libipld::Cid;

use crate::cid_bridge::digest_raw;

/// A content-addressed local block store, as exposed by the log-DB runtime.
///
/// The Block Extractor only ever reads from this; the Download Pipeline
/// only ever writes to it; per `§5` these two never run concurrently
/// within a single workflow.
#[async_trait]
pub trait LocalBlockStore: Send + Sync {
    /// Fetch the bytes stored under `cid`, if present.
    async fn get_block(&self, cid: &Cid) -> anyhow::Result<Option<Bytes>>;

    /// Store `bytes` under the given, caller-supplied `cid`.
    ///
    /// Unlike a self-addressing `put`, this accepts the CID as an input:
    /// the log DB computes CIDs using its own codec/hash conventions, and
    /// the download pipeline writes CBOR-bridged CIDs that were computed
    /// ahead of time (`§4.5`, step 2).
    async fn put_block_keyed(&self, cid: Cid, bytes: Bytes) -> anyhow::Result<()>;

    /// Whether a block is already present. Puts are idempotent, so this is
    /// mostly an optimization to avoid redundant writes.
    async fn has_block(&self, cid: &Cid) -> anyhow::Result<bool> {
        Ok(self.get_block(cid).await?.is_some())
    }

    /// Iterate every `(cid, bytes)` pair currently in the store.
    ///
    /// Used by the Block Extractor's "full" mode to discover identity
    /// blocks that are referenced by log entries but not reachable from the
    /// root block's own links.
    async fn iter_all(&self) -> anyhow::Result<Vec<(Cid, Bytes)>>;
}

/// An in-memory `LocalBlockStore`, used by tests and as a reference
/// implementation. Computes a raw-codec CID by content, mirroring how the
/// remote store would address the same bytes.
#[derive(Debug, Default, Clone)]
pub struct MemoryBlockStore {
    blocks: std::sync::Arc<tokio::sync::RwLock<std::collections::HashMap<Cid, Bytes>>>,
}

impl MemoryBlockStore {
    /// Create an empty in-memory block store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` and return the raw-codec CID the bytes hash to.
    /// Convenience for tests that don't care about the log-DB's own codec.
    pub async fn put_block_raw(&self, bytes: impl Into<Bytes>) -> Cid {
        let bytes = bytes.into();
        let cid = digest_raw(&bytes);
        self.blocks.write().await.insert(cid, bytes);
        cid
    }
}

#[async_trait]
impl LocalBlockStore for MemoryBlockStore {
    async fn get_block(&self, cid: &Cid) -> anyhow::Result<Option<Bytes>> {
        Ok(self.blocks.read().await.get(cid).cloned())
    }

    async fn put_block_keyed(&self, cid: Cid, bytes: Bytes) -> anyhow::Result<()> {
        self.blocks.write().await.insert(cid, bytes);
        Ok(())
    }

    async fn iter_all(&self) -> anyhow::Result<Vec<(Cid, Bytes)>> {
        Ok(self
            .blocks
            .read()
            .await
            .iter()
            .map(|(cid, bytes)| (*cid, bytes.clone()))
            .collect())
    }
}
