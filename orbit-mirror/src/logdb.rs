//! The log-DB runtime contract (`§6`): opening, writing, and reading the
//! log DB itself is out of scope (`§1`) — these traits are the seam the
//! core engine needs, nothing more.

use std::sync::Arc;

use async_trait::async_trait;
use libipld::Ipld;

use crate::{blockstore::LocalBlockStore, model::DatabaseKind};

/// A single write operation replayed by the Fallback Reconstructor
/// (`§4.8`, step 5), dispatched per database kind.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// `add(value)` on an event-log database.
    Add(Ipld),
    /// `put(key, value)` on a key-value or document database.
    Put {
        /// The key (for documents, the value's `_id`).
        key: String,
        /// The value being stored.
        value: Ipld,
    },
    /// `del(key)` on a key-value or document database.
    Del {
        /// The key (for documents, the target's `_id`).
        key: String,
    },
    /// `inc(by)` on a counter database. `by` may be negative (from a `DEC` payload).
    Inc {
        /// The signed amount to increment the counter by.
        by: i64,
    },
}

/// An instance of the log-DB runtime: can open databases and exposes the
/// local block store they share.
#[async_trait]
pub trait LogDb: Send + Sync {
    /// The concrete database handle type this runtime produces.
    type Handle: DatabaseHandle;

    /// Open a database at its canonical address (`"/<scheme>/<root-cid>"`).
    async fn open_by_address(&self, address: &str) -> anyhow::Result<Self::Handle>;

    /// Open (creating, if necessary) a database by human-assigned name and kind.
    /// Used by the Fallback Reconstructor to create the recreated database.
    async fn open_by_name(&self, name: &str, kind: DatabaseKind) -> anyhow::Result<Self::Handle>;

    /// The local block store this runtime's databases read and write through.
    fn blockstore(&self) -> Arc<dyn LocalBlockStore>;

    /// The opaque identity id used to label blocks this runtime creates.
    fn identity_id(&self) -> String;
}

/// A single open database.
#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    /// This database's canonical address.
    fn address(&self) -> String;

    /// This database's human-assigned name.
    fn name(&self) -> String;

    /// This database's kind.
    fn kind(&self) -> DatabaseKind;

    /// The hashes of every entry in this database's log, in the runtime's
    /// own iteration order (not necessarily clock order).
    async fn log_entry_hashes(&self) -> anyhow::Result<Vec<libipld::Cid>>;

    /// Apply a single write operation (used during fallback replay).
    async fn apply(&self, op: WriteOp) -> anyhow::Result<()>;

    /// Close the database, releasing any runtime-held resources.
    async fn close(&self) -> anyhow::Result<()>;
}
