//! In-memory fixtures shared by this crate's own test suite. Gated behind
//! `#[cfg(any(test, feature = "test_utils"))]` in `lib.rs` so downstream
//! crates can reuse them under the `test_utils` feature.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use libipld::{Cid, Ipld};
use tokio::sync::RwLock;

use crate::{
    blockstore::{LocalBlockStore, MemoryBlockStore},
    cid_bridge::{digest_raw, render_base32},
    logdb::{DatabaseHandle, LogDb, WriteOp},
    model::DatabaseKind,
    remote::{AuthProvider, ContainerId, Credentials, Layer, RemoteStore, UploadOutcome},
    model::{ManifestEntry, ManifestPage},
};

const SCHEME: &str = "orbitdb";
const IDENTITY_ID: &str = "03test-identity";

fn cbor_cid(bytes: &[u8]) -> Cid {
    use libipld::multihash::{Code, MultihashDigest};
    Cid::new_v1(crate::cid_bridge::CODEC_DAG_CBOR, Code::Sha2_256.digest(bytes))
}

async fn put_cbor(store: &MemoryBlockStore, ipld: &Ipld) -> anyhow::Result<Cid> {
    let bytes = serde_ipld_dagcbor::to_vec(ipld)?;
    let cid = cbor_cid(&bytes);
    store.put_block_keyed(cid, Bytes::from(bytes)).await?;
    Ok(cid)
}

fn map(pairs: Vec<(&str, Ipld)>) -> Ipld {
    Ipld::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

async fn build_identity(store: &MemoryBlockStore, id: &str) -> anyhow::Result<Cid> {
    put_cbor(
        store,
        &map(vec![
            ("id", Ipld::String(id.to_string())),
            ("type", Ipld::String("publickey".to_string())),
        ]),
    )
    .await
}

async fn build_access_controller(store: &MemoryBlockStore) -> anyhow::Result<Cid> {
    put_cbor(
        store,
        &map(vec![(
            "type",
            Ipld::String("orbitdb-access-controller".to_string()),
        )]),
    )
    .await
}

async fn build_root(store: &MemoryBlockStore, ac_cid: Cid, name: &str, type_tag: &str) -> anyhow::Result<Cid> {
    let rendered = render_base32(&ac_cid)?;
    put_cbor(
        store,
        &map(vec![
            ("accessController", Ipld::String(rendered)),
            ("name", Ipld::String(name.to_string())),
            ("type", Ipld::String(type_tag.to_string())),
        ]),
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn build_entry(
    store: &MemoryBlockStore,
    address: &str,
    identity_cid: Cid,
    time: u64,
    payload: Ipld,
    next: Vec<Cid>,
) -> anyhow::Result<Cid> {
    put_cbor(
        store,
        &map(vec![
            ("v", Ipld::Integer(2)),
            ("id", Ipld::String(address.to_string())),
            (
                "clock",
                map(vec![
                    ("id", Ipld::String(IDENTITY_ID.to_string())),
                    ("time", Ipld::Integer(time as i128)),
                ]),
            ),
            ("payload", payload),
            ("next", Ipld::List(next.into_iter().map(Ipld::Link).collect())),
            ("sig", Ipld::String("deadbeef".to_string())),
            ("key", Ipld::String(IDENTITY_ID.to_string())),
            ("identity", Ipld::Link(identity_cid)),
        ]),
    )
    .await
}

/// ADD/PUT/DEL/INC payload shape, matching the real log DB's wire
/// convention: every payload carries `op`, `key`, and `value`, with `key`
/// and `value` set to `null` when the operation doesn't use them.
fn payload(op: &str, key: Option<&str>, value: Ipld) -> Ipld {
    map(vec![
        ("op", Ipld::String(op.to_string())),
        ("key", key.map(|k| Ipld::String(k.to_string())).unwrap_or(Ipld::Null)),
        ("value", value),
    ])
}

/// An in-memory stand-in for an open log database, built directly from a
/// list of already-decided write payloads rather than by replaying writes
/// through a real runtime. Implements `DatabaseHandle` so it can stand in
/// for the log-DB runtime seam in every module's tests.
#[derive(Clone)]
pub struct FakeDatabase {
    name: String,
    kind: DatabaseKind,
    address: String,
    root_cid: Cid,
    store: MemoryBlockStore,
    entry_hashes: Vec<Cid>,
    applied: Arc<RwLock<Vec<WriteOp>>>,
}

impl FakeDatabase {
    async fn from_payloads(name: &str, kind: DatabaseKind, payloads: Vec<Ipld>) -> anyhow::Result<Self> {
        let store = MemoryBlockStore::new();
        let identity_cid = build_identity(&store, IDENTITY_ID).await?;
        let ac_cid = build_access_controller(&store).await?;
        let root_cid = build_root(&store, ac_cid, name, kind.type_tag()).await?;
        let address = crate::cid_bridge::format_address(SCHEME, &root_cid)?;

        let mut entry_hashes = Vec::with_capacity(payloads.len());
        let mut previous = Vec::new();
        for (time, payload) in payloads.into_iter().enumerate() {
            let cid = build_entry(&store, &address, identity_cid, time as u64, payload, previous.clone()).await?;
            entry_hashes.push(cid);
            previous = vec![cid];
        }

        Ok(Self {
            name: name.to_string(),
            kind,
            address,
            root_cid,
            store,
            entry_hashes,
            applied: Arc::new(RwLock::new(Vec::new())),
        })
    }

    /// An event-log database with one `ADD` entry per value, chained in order.
    pub async fn event_log(name: &str, values: &[&str]) -> anyhow::Result<Self> {
        let payloads = values
            .iter()
            .map(|v| payload("ADD", None, Ipld::String(v.to_string())))
            .collect();
        Self::from_payloads(name, DatabaseKind::EventLog, payloads).await
    }

    /// A key-value database. `None` values encode a `DEL` of that key.
    pub async fn key_value(name: &str, ops: &[(&str, Option<&str>)]) -> anyhow::Result<Self> {
        let payloads = ops
            .iter()
            .map(|(k, v)| match v {
                Some(v) => payload("PUT", Some(k), Ipld::String(v.to_string())),
                None => payload("DEL", Some(k), Ipld::Null),
            })
            .collect();
        Self::from_payloads(name, DatabaseKind::KeyValue, payloads).await
    }

    /// A document database, keyed by `_id`. `None` bodies encode a `DEL`.
    pub async fn document(name: &str, docs: &[(&str, Option<&str>)]) -> anyhow::Result<Self> {
        let payloads = docs
            .iter()
            .map(|(id, body)| match body {
                Some(body) => payload(
                    "PUT",
                    Some(id),
                    map(vec![
                        ("_id", Ipld::String(id.to_string())),
                        ("body", Ipld::String(body.to_string())),
                    ]),
                ),
                None => payload("DEL", Some(id), Ipld::Null),
            })
            .collect();
        Self::from_payloads(name, DatabaseKind::Document, payloads).await
    }

    /// A counter database, one `COUNTER`/`DEC` entry per delta (deltas may
    /// be negative; `COUNTER` carries a positive magnitude, `DEC` a
    /// negative one, matching the wire payload shape of `§4.8`).
    pub async fn counter(name: &str, deltas: &[i64]) -> anyhow::Result<Self> {
        let payloads = deltas
            .iter()
            .map(|d| {
                if *d >= 0 {
                    payload("COUNTER", None, Ipld::Integer(*d as i128))
                } else {
                    payload("DEC", None, Ipld::Integer((-*d) as i128))
                }
            })
            .collect();
        Self::from_payloads(name, DatabaseKind::Counter, payloads).await
    }

    /// A freshly created database with no log entries at all, as produced by
    /// `LogDb::open_by_name` for a name that didn't exist yet.
    pub async fn empty(name: &str, kind: DatabaseKind) -> anyhow::Result<Self> {
        Self::from_payloads(name, kind, Vec::new()).await
    }

    /// The local block store backing this database, as a trait object.
    pub fn blockstore_dyn(&self) -> Arc<dyn LocalBlockStore> {
        Arc::new(self.store.clone())
    }

    /// This database's root CID.
    pub fn root_cid(&self) -> Cid {
        self.root_cid
    }

    /// The ops recorded via `DatabaseHandle::apply` so far, in call order.
    pub async fn applied_ops(&self) -> Vec<WriteOp> {
        self.applied.read().await.clone()
    }
}

#[async_trait]
impl DatabaseHandle for FakeDatabase {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> DatabaseKind {
        self.kind
    }

    async fn log_entry_hashes(&self) -> anyhow::Result<Vec<Cid>> {
        Ok(self.entry_hashes.clone())
    }

    async fn apply(&self, op: WriteOp) -> anyhow::Result<()> {
        self.applied.write().await.push(op);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Reconstruct a `FakeDatabase` handle purely from what's already in a
/// shared block store: decode the root block named by `address` for its
/// name/kind, then scan the store for every log entry whose `id` matches.
/// This is what stands in, in these fixtures, for a real log-DB runtime's
/// ability to open a database it never created in-process, as long as the
/// blocks are locally present.
async fn discover_from_store(store: &MemoryBlockStore, address: &str) -> anyhow::Result<FakeDatabase> {
    let root_cid = crate::cid_bridge::parse_address(address)?;
    let root_bytes = store
        .get_block(&root_cid)
        .await?
        .ok_or_else(|| anyhow::anyhow!("root block not found locally for {address}"))?;
    let root_ipld = crate::shape::decode_ipld(&root_bytes)?;

    let name = match crate::shape::map_get(&root_ipld, "name") {
        Some(Ipld::String(s)) => s.clone(),
        _ => address.to_string(),
    };
    let kind = match crate::shape::map_get(&root_ipld, "type") {
        Some(Ipld::String(t)) => match t.as_str() {
            "keyvalue" => DatabaseKind::KeyValue,
            "documents" => DatabaseKind::Document,
            "counter" => DatabaseKind::Counter,
            _ => DatabaseKind::EventLog,
        },
        _ => DatabaseKind::EventLog,
    };

    let mut entry_hashes = Vec::new();
    for (cid, bytes) in store.iter_all().await? {
        if let Ok(entry) = serde_ipld_dagcbor::from_slice::<crate::model::LogEntryBlock>(&bytes) {
            if entry.id == address {
                entry_hashes.push(cid);
            }
        }
    }

    Ok(FakeDatabase {
        name,
        kind,
        address: address.to_string(),
        root_cid,
        store: store.clone(),
        entry_hashes,
        applied: Arc::new(RwLock::new(Vec::new())),
    })
}

/// A fake log-DB runtime: a registry of `FakeDatabase`s, sharing one local
/// block store so blocks written through one handle are visible to
/// whichever handle is opened next (as the real runtime's storage is shared
/// across every database it opens).
#[derive(Clone)]
pub struct FakeLogDb {
    store: MemoryBlockStore,
    by_address: Arc<RwLock<HashMap<String, FakeDatabase>>>,
    by_name: Arc<RwLock<HashMap<String, FakeDatabase>>>,
}

impl FakeLogDb {
    /// An empty runtime with no registered databases.
    pub fn new() -> Self {
        Self {
            store: MemoryBlockStore::new(),
            by_address: Arc::new(RwLock::new(HashMap::new())),
            by_name: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A runtime pre-populated with a single database, addressable both by
    /// its address and its name. Its blocks are copied into the runtime's
    /// shared store so `blockstore()` can see them.
    pub async fn with_source(db: FakeDatabase) -> anyhow::Result<Self> {
        let runtime = Self::new();
        runtime.register(db).await?;
        Ok(runtime)
    }

    /// Register a database, copying its blocks into the runtime's shared store.
    pub async fn register(&self, db: FakeDatabase) -> anyhow::Result<()> {
        for (cid, bytes) in db.store.iter_all().await? {
            self.store.put_block_keyed(cid, bytes).await?;
        }
        self.by_address.write().await.insert(db.address.clone(), db.clone());
        self.by_name.write().await.insert(db.name.clone(), db.clone());
        Ok(())
    }
}

impl Default for FakeLogDb {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogDb for FakeLogDb {
    type Handle = FakeDatabase;

    async fn open_by_address(&self, address: &str) -> anyhow::Result<FakeDatabase> {
        if let Some(existing) = self.by_address.read().await.get(address) {
            return Ok(existing.clone());
        }

        // Not a database this runtime created itself — discover it purely
        // from whatever's already in the shared local block store, the way
        // a genuinely fresh runtime would after a restore's download
        // pipeline has populated it.
        let db = discover_from_store(&self.store, address).await?;
        self.by_address.write().await.insert(address.to_string(), db.clone());
        Ok(db)
    }

    async fn open_by_name(&self, name: &str, kind: DatabaseKind) -> anyhow::Result<FakeDatabase> {
        if let Some(existing) = self.by_name.read().await.get(name) {
            return Ok(existing.clone());
        }
        let db = FakeDatabase::empty(name, kind).await?;
        self.register(db.clone()).await?;
        Ok(db)
    }

    fn blockstore(&self) -> Arc<dyn LocalBlockStore> {
        Arc::new(self.store.clone())
    }

    fn identity_id(&self) -> String {
        IDENTITY_ID.to_string()
    }
}

/// An in-memory `RemoteStore`, layered the same way the real Storacha-shaped
/// client is (`§4.3`): uploads land in `blobs` and `stores` together and are
/// tracked in insertion order for `list`, `remove` drains a single layer.
///
/// Cheaply cloneable; clones share the same underlying maps, so a test can
/// hand one clone to a "backup" orchestrator and another to a "restore"
/// orchestrator against the same simulated container.
#[derive(Clone)]
pub struct FakeRemoteStore {
    container: String,
    blobs: Arc<RwLock<HashMap<Cid, Bytes>>>,
    stores: Arc<RwLock<HashMap<Cid, Bytes>>>,
    uploads: Arc<RwLock<Vec<Cid>>>,
    fail_next_uploads: Arc<RwLock<usize>>,
}

impl FakeRemoteStore {
    /// A fresh, empty store scoped to `container`.
    pub fn new(container: &str) -> Self {
        Self {
            container: container.to_string(),
            blobs: Arc::new(RwLock::new(HashMap::new())),
            stores: Arc::new(RwLock::new(HashMap::new())),
            uploads: Arc::new(RwLock::new(Vec::new())),
            fail_next_uploads: Arc::new(RwLock::new(0)),
        }
    }

    /// Make the next `n` calls to `upload` fail, to exercise retry/error paths.
    pub async fn fail_next_uploads(&self, n: usize) {
        *self.fail_next_uploads.write().await = n;
    }

    /// A snapshot of every blob currently held, for assertions.
    pub async fn blobs(&self) -> HashMap<Cid, Bytes> {
        self.blobs.read().await.clone()
    }

    /// How many roots are currently tracked at the upload layer.
    pub async fn upload_count(&self) -> usize {
        self.uploads.read().await.len()
    }
}

#[async_trait]
impl RemoteStore for FakeRemoteStore {
    async fn upload(&self, bytes: Bytes, name: &str) -> anyhow::Result<UploadOutcome> {
        {
            let mut remaining = self.fail_next_uploads.write().await;
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("simulated upload failure for {name}");
            }
        }
        let cid = digest_raw(&bytes);
        self.blobs.write().await.insert(cid, bytes.clone());
        self.stores.write().await.insert(cid, bytes);
        self.uploads.write().await.push(cid);
        Ok(UploadOutcome { cid_raw: cid })
    }

    async fn list(&self, limit: Option<usize>, cursor: Option<&str>) -> anyhow::Result<ManifestPage> {
        let uploads = self.uploads.read().await;
        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let limit = limit.unwrap_or(uploads.len());
        let end = uploads.len().min(start.saturating_add(limit));
        let items = uploads[start.min(uploads.len())..end]
            .iter()
            .map(|cid| ManifestEntry {
                root: *cid,
                size: None,
                inserted_at: None,
            })
            .collect();
        let cursor = if end < uploads.len() { Some(end.to_string()) } else { None };
        Ok(ManifestPage { items, cursor })
    }

    async fn remove(&self, layer: Layer, cid: &Cid) -> anyhow::Result<()> {
        match layer {
            Layer::Blob => {
                self.blobs.write().await.remove(cid);
            }
            Layer::Store => {
                self.stores.write().await.remove(cid);
            }
            Layer::Upload => {
                self.uploads.write().await.retain(|c| c != cid);
            }
        }
        Ok(())
    }

    fn current_container(&self) -> ContainerId {
        ContainerId(self.container.clone())
    }

    fn select_container(&mut self, container: ContainerId) {
        self.container = container.0;
    }
}

/// Lets a `FakeRemoteStore` double as its own download source in tests, as
/// if every configured gateway were this same simulated container — the
/// `gateway_base` argument is ignored.
#[async_trait]
impl crate::download::GatewayFetcher for FakeRemoteStore {
    async fn fetch(&self, _gateway_base: &str, cid_raw: &Cid) -> anyhow::Result<Bytes> {
        self.blobs
            .read()
            .await
            .get(cid_raw)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("object not found: {cid_raw}"))
    }
}

/// An `AuthProvider` that returns canned headers without checking `Credentials`.
pub struct FakeAuthProvider;

#[async_trait]
impl AuthProvider for FakeAuthProvider {
    async fn auth_headers(&self, credentials: &Credentials) -> anyhow::Result<Vec<(String, String)>> {
        let token = match credentials {
            Credentials::KeyAndProof { remote_key, .. } => remote_key.clone(),
            Credentials::DelegatedCapability {
                delegated_capability_token,
                ..
            } => delegated_capability_token.clone(),
        };
        Ok(vec![("authorization".to_string(), format!("Bearer {token}"))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_log_chains_entries_with_a_single_head() -> anyhow::Result<()> {
        let db = FakeDatabase::event_log("notes", &["a", "b", "c"]).await?;
        assert_eq!(db.log_entry_hashes().await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn fake_log_db_roundtrips_by_address_and_name() -> anyhow::Result<()> {
        let db = FakeDatabase::event_log("notes", &["a"]).await?;
        let address = db.address();
        let name = db.name();
        let runtime = FakeLogDb::with_source(db).await?;

        let by_address = runtime.open_by_address(&address).await?;
        assert_eq!(by_address.name(), name);

        let by_name = runtime.open_by_name(&name, DatabaseKind::EventLog).await?;
        assert_eq!(by_name.address(), address);
        Ok(())
    }

    #[tokio::test]
    async fn fake_remote_store_tracks_uploads_for_list_and_remove() -> anyhow::Result<()> {
        let mut remote = FakeRemoteStore::new("did:key:space");
        let outcome = remote.upload(Bytes::from_static(b"hello"), "hello.bin").await?;
        assert_eq!(remote.upload_count().await, 1);

        let page = remote.list(None, None).await?;
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].root, outcome.cid_raw);

        remote.remove(Layer::Blob, &outcome.cid_raw).await?;
        assert!(!remote.blobs().await.contains_key(&outcome.cid_raw));

        remote.select_container(ContainerId("did:key:other".to_string()));
        assert_eq!(remote.current_container(), ContainerId("did:key:other".to_string()));
        Ok(())
    }
}
