//! Data model types from `§3`.

use std::collections::HashMap;

use bytes::Bytes;
use libipld::{Cid, Ipld};
use serde::{Deserialize, Serialize};

/// How a block was classified during extraction or analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// The database's root/manifest block.
    Root,
    /// A block referenced from a root's `accessController` field.
    AccessController,
    /// A log-entry block.
    LogEntry,
    /// An identity block, referenced by one or more log entries.
    Identity,
    /// Decodable, but didn't match any known shape (or not CBOR at all).
    Unknown,
}

/// Which blocks a `full` extraction or analysis run should include, beyond
/// the log entries that are always included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Root, access-controller, and every identity block in local storage.
    Full,
    /// Log-entry blocks only.
    LogEntriesOnly,
}

/// The unordered set of blocks an extraction emits for a database, plus
/// their classification and the database's root CID.
#[derive(Debug, Clone, Default)]
pub struct ExtractionSet {
    /// All extracted blocks, keyed by CID.
    pub blocks: HashMap<Cid, Bytes>,
    /// The classification of each extracted block.
    pub sources: HashMap<Cid, Source>,
    /// The root CID of the extracted database, if known at extraction time.
    pub root_cid: Option<Cid>,
    /// Non-fatal warnings collected during extraction (unreadable entries,
    /// an access controller that couldn't be fetched, etc), so that callers
    /// without a tracing subscriber still see them.
    pub warnings: Vec<String>,
}

impl ExtractionSet {
    /// Record a block under a given source classification.
    ///
    /// The first classification for a CID wins — matches `§4.2`'s tie-break
    /// rule that a block already recorded is never re-classified.
    pub fn record(&mut self, cid: Cid, bytes: Bytes, source: Source) {
        self.blocks.entry(cid).or_insert(bytes);
        self.sources.entry(cid).or_insert(source);
    }

    /// Count of blocks with a given source classification.
    pub fn count(&self, source: Source) -> usize {
        self.sources.values().filter(|&&s| s == source).count()
    }
}

/// A decoded root/manifest block. A database's identity is the CID of its
/// root block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootBlock {
    /// Reference to the access-controller block, e.g. `"/ipfs/<cid>"` or a
    /// bare CID string.
    #[serde(rename = "accessController")]
    pub access_controller: String,
    /// The database's human-assigned name.
    #[serde(default)]
    pub name: Option<String>,
    /// The database kind tag (`"eventlog"`, `"keyvalue"`, `"documents"`, `"counter"`).
    #[serde(rename = "type", default)]
    pub db_type: Option<String>,
    /// Opaque additional metadata.
    #[serde(default)]
    pub meta: Option<Ipld>,
}

/// A decoded access-controller block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControllerBlock {
    /// The access-controller type marker, e.g. `"orbitdb-access-controller"` or `"ipfs"`.
    #[serde(rename = "type")]
    pub controller_type: String,
}

/// The logical clock attached to a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    /// The clock's owning identity id.
    pub id: String,
    /// Lamport-style clock time, used to order entries during fallback replay.
    pub time: u64,
}

/// A decoded log-entry block (`v=2`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntryBlock {
    /// Wire-format version tag; always `2` for entries this crate understands.
    pub v: u8,
    /// The full database address this entry belongs to.
    pub id: String,
    /// The entry's logical clock.
    pub clock: Clock,
    /// The recorded operation payload.
    pub payload: Ipld,
    /// CIDs of parent log entries.
    pub next: Vec<Cid>,
    /// Signature over the entry, opaque to this crate.
    pub sig: String,
    /// The signing key, opaque to this crate.
    pub key: String,
    /// CID of the identity block that produced this entry.
    pub identity: Cid,
}

/// A decoded identity block: has `id` and `type` but no signature/payload
/// structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityBlock {
    /// The identity's id (usually a public key fingerprint).
    pub id: String,
    /// The identity provider type tag.
    #[serde(rename = "type")]
    pub id_type: String,
}

/// The kind of database a set of log entries encodes, inferred by the
/// Fallback Reconstructor from payload shape (`§4.8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatabaseKind {
    /// Append-only list of arbitrary values.
    EventLog,
    /// String-keyed key/value store.
    KeyValue,
    /// `_id`-keyed document store.
    Document,
    /// A single numeric counter.
    Counter,
}

impl DatabaseKind {
    /// The log-DB type tag string this kind corresponds to.
    pub fn type_tag(self) -> &'static str {
        match self {
            DatabaseKind::EventLog => "eventlog",
            DatabaseKind::KeyValue => "keyvalue",
            DatabaseKind::Document => "documents",
            DatabaseKind::Counter => "counter",
        }
    }
}

/// One element of a remote container listing (`§4.3`'s `list`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// The raw-codec CID of the uploaded root object.
    pub root: Cid,
    /// Size in bytes, if the remote store reports it.
    #[serde(default)]
    pub size: Option<u64>,
    /// Insertion timestamp, in whatever format the remote store uses
    /// (RFC3339 in the reference implementation).
    #[serde(default)]
    pub inserted_at: Option<String>,
}

/// A page of a paginated remote listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPage {
    /// The entries in this page.
    pub items: Vec<ManifestEntry>,
    /// An opaque cursor to pass to the next `list` call, if more pages remain.
    pub cursor: Option<String>,
}
