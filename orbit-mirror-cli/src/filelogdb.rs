//! A minimal, disk-backed `LogDb` for this binary to run the orchestrator
//! against when no richer log-DB runtime is embedded in-process.
//!
//! This is not a reimplementation of the JS log-DB itself (out of scope,
//! `§1`) — it only produces and consumes the same CBOR block shapes
//! (`§3`/`§4.8`'s payload convention) so that a round-trip through this
//! binary's own block directory exercises the real orchestrator code paths
//! against real files instead of an in-memory fixture.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use libipld::{multihash::Code, Cid, Ipld};
use orbit_mirror::{
    blockstore::LocalBlockStore,
    cid_bridge::{format_address, parse_address, CODEC_DAG_CBOR},
    logdb::{DatabaseHandle, LogDb, WriteOp},
    model::DatabaseKind,
    shape::{classify, decode_ipld, map_get},
};
use tokio::sync::Mutex;

const SCHEME: &str = "orbitdb";

fn cbor_cid(bytes: &[u8]) -> Cid {
    use libipld::multihash::MultihashDigest;
    Cid::new_v1(CODEC_DAG_CBOR, Code::Sha2_256.digest(bytes))
}

fn map(pairs: Vec<(&str, Ipld)>) -> Ipld {
    Ipld::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

fn payload(op: &str, key: Option<&str>, value: Ipld) -> Ipld {
    map(vec![
        ("op", Ipld::String(op.to_string())),
        ("key", key.map(|k| Ipld::String(k.to_string())).unwrap_or(Ipld::Null)),
        ("value", value),
    ])
}

/// A `LocalBlockStore` that keeps one file per block, named by the block's
/// CID, under a directory.
#[derive(Debug, Clone)]
pub struct FileBlockStore {
    dir: PathBuf,
}

impl FileBlockStore {
    /// Open (creating if necessary) a block directory at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, cid: &Cid) -> PathBuf {
        self.dir.join(cid.to_string())
    }

    async fn put_cbor(&self, ipld: &Ipld) -> anyhow::Result<Cid> {
        let bytes = serde_ipld_dagcbor::to_vec(ipld)?;
        let cid = cbor_cid(&bytes);
        self.put_block_keyed(cid, Bytes::from(bytes)).await?;
        Ok(cid)
    }
}

#[async_trait]
impl LocalBlockStore for FileBlockStore {
    async fn get_block(&self, cid: &Cid) -> anyhow::Result<Option<Bytes>> {
        match tokio::fs::read(self.path_for(cid)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_block_keyed(&self, cid: Cid, bytes: Bytes) -> anyhow::Result<()> {
        tokio::fs::write(self.path_for(&cid), &bytes).await?;
        Ok(())
    }

    async fn iter_all(&self) -> anyhow::Result<Vec<(Cid, Bytes)>> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(cid) = Cid::try_from(name) else { continue };
            if let Ok(bytes) = tokio::fs::read(entry.path()).await {
                out.push((cid, Bytes::from(bytes)));
            }
        }
        Ok(out)
    }
}

/// A single database backed by `FileBlockStore`, identified by its root CID.
pub struct FileDatabaseHandle {
    store: FileBlockStore,
    address: String,
    name: String,
    kind: DatabaseKind,
    identity_id: String,
    identity_cid: Cid,
    head: Mutex<Option<Cid>>,
    next_time: AtomicU64,
}

impl FileDatabaseHandle {
    fn write_op_payload(op: &WriteOp) -> (Option<String>, Ipld) {
        match op {
            WriteOp::Add(value) => (None, payload("ADD", None, value.clone())),
            WriteOp::Put { key, value } => (Some(key.clone()), payload("PUT", Some(key), value.clone())),
            WriteOp::Del { key } => (Some(key.clone()), payload("DEL", Some(key), Ipld::Null)),
            WriteOp::Inc { by } if *by >= 0 => (None, payload("COUNTER", None, Ipld::Integer(*by as i128))),
            WriteOp::Inc { by } => (None, payload("DEC", None, Ipld::Integer((-*by) as i128))),
        }
    }
}

#[async_trait]
impl DatabaseHandle for FileDatabaseHandle {
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
        let mut out = Vec::new();
        for (cid, bytes) in self.store.iter_all().await? {
            if let Ok(entry) = serde_ipld_dagcbor::from_slice::<orbit_mirror::model::LogEntryBlock>(&bytes) {
                if entry.id == self.address {
                    out.push(cid);
                }
            }
        }
        Ok(out)
    }

    async fn apply(&self, op: WriteOp) -> anyhow::Result<()> {
        let (_key, payload) = Self::write_op_payload(&op);
        let mut head = self.head.lock().await;
        let next: Vec<Cid> = head.iter().copied().collect();
        let time = self.next_time.fetch_add(1, Ordering::SeqCst);

        let entry = map(vec![
            ("v", Ipld::Integer(2)),
            ("id", Ipld::String(self.address.clone())),
            (
                "clock",
                map(vec![
                    ("id", Ipld::String(self.identity_id.clone())),
                    ("time", Ipld::Integer(time as i128)),
                ]),
            ),
            ("payload", payload),
            ("next", Ipld::List(next.into_iter().map(Ipld::Link).collect())),
            ("sig", Ipld::String("unsigned-cli-replay".to_string())),
            ("key", Ipld::String(self.identity_id.clone())),
            ("identity", Ipld::Link(self.identity_cid)),
        ]);

        let cid = self.store.put_cbor(&entry).await?;
        *head = Some(cid);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A `LogDb` whose databases live as CBOR block files under a directory.
pub struct FileLogDb {
    store: FileBlockStore,
    identity_id: String,
}

impl FileLogDb {
    /// Open (creating if necessary) the block directory at `dir`, labeling
    /// any databases this runtime creates under `identity_id`.
    pub async fn open(dir: impl AsRef<Path>, identity_id: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            store: FileBlockStore::open(dir.as_ref()).await?,
            identity_id: identity_id.into(),
        })
    }

    async fn find_head(&self, address: &str) -> anyhow::Result<Option<Cid>> {
        let mut referenced = std::collections::HashSet::new();
        let mut candidates = Vec::new();
        for (cid, bytes) in self.store.iter_all().await? {
            if let Ok(entry) = serde_ipld_dagcbor::from_slice::<orbit_mirror::model::LogEntryBlock>(&bytes) {
                if entry.id == address {
                    candidates.push((entry.clock.time, cid));
                    referenced.extend(entry.next);
                }
            }
        }
        candidates.sort_by_key(|(time, _)| *time);
        Ok(candidates
            .into_iter()
            .rev()
            .map(|(_, cid)| cid)
            .find(|cid| !referenced.contains(cid)))
    }

    /// The identity CID already stamped on this database's entries, if any
    /// exist yet — entries written locally reuse it so the whole log stays
    /// attributed to a single identity block.
    async fn find_identity_cid(&self, address: &str) -> anyhow::Result<Option<Cid>> {
        for (_, bytes) in self.store.iter_all().await? {
            if let Ok(entry) = serde_ipld_dagcbor::from_slice::<orbit_mirror::model::LogEntryBlock>(&bytes) {
                if entry.id == address {
                    return Ok(Some(entry.identity));
                }
            }
        }
        Ok(None)
    }

    async fn build_fresh(&self, name: &str, kind: DatabaseKind) -> anyhow::Result<FileDatabaseHandle> {
        let identity_cid = self
            .store
            .put_cbor(&map(vec![
                ("id", Ipld::String(self.identity_id.clone())),
                ("type", Ipld::String("publickey".to_string())),
            ]))
            .await?;
        let ac_cid = self
            .store
            .put_cbor(&map(vec![(
                "type",
                Ipld::String("orbitdb-access-controller".to_string()),
            )]))
            .await?;
        let rendered = orbit_mirror::cid_bridge::render_base32(&ac_cid)?;
        let root_cid = self
            .store
            .put_cbor(&map(vec![
                ("accessController", Ipld::String(rendered)),
                ("name", Ipld::String(name.to_string())),
                ("type", Ipld::String(kind.type_tag().to_string())),
            ]))
            .await?;
        let address = format_address(SCHEME, &root_cid)?;

        Ok(FileDatabaseHandle {
            store: self.store.clone(),
            address,
            name: name.to_string(),
            kind,
            identity_id: self.identity_id.clone(),
            identity_cid,
            head: Mutex::new(None),
            next_time: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl LogDb for FileLogDb {
    type Handle = FileDatabaseHandle;

    async fn open_by_address(&self, address: &str) -> anyhow::Result<FileDatabaseHandle> {
        let root_cid = parse_address(address)?;
        let root_bytes = self
            .store
            .get_block(&root_cid)
            .await?
            .ok_or_else(|| anyhow::anyhow!("root block not found locally for {address}"))?;
        let root_ipld = decode_ipld(&root_bytes)?;
        if classify(&root_ipld) != orbit_mirror::model::Source::Root {
            anyhow::bail!("block at {address} doesn't look like a database root");
        }

        let name = match map_get(&root_ipld, "name") {
            Some(Ipld::String(s)) => s.clone(),
            _ => address.to_string(),
        };
        let kind = match map_get(&root_ipld, "type") {
            Some(Ipld::String(t)) => match t.as_str() {
                "keyvalue" => DatabaseKind::KeyValue,
                "documents" => DatabaseKind::Document,
                "counter" => DatabaseKind::Counter,
                _ => DatabaseKind::EventLog,
            },
            _ => DatabaseKind::EventLog,
        };

        let identity_cid = match self.find_identity_cid(address).await? {
            Some(cid) => cid,
            None => {
                self.store
                    .put_cbor(&map(vec![
                        ("id", Ipld::String(self.identity_id.clone())),
                        ("type", Ipld::String("publickey".to_string())),
                    ]))
                    .await?
            }
        };

        let head = self.find_head(address).await?;
        Ok(FileDatabaseHandle {
            store: self.store.clone(),
            address: address.to_string(),
            name,
            kind,
            identity_id: self.identity_id.clone(),
            identity_cid,
            head: Mutex::new(head),
            next_time: AtomicU64::new(0),
        })
    }

    async fn open_by_name(&self, name: &str, kind: DatabaseKind) -> anyhow::Result<FileDatabaseHandle> {
        for (_, bytes) in self.store.iter_all().await? {
            if let Ok(ipld) = decode_ipld(&bytes) {
                if classify(&ipld) != orbit_mirror::model::Source::Root {
                    continue;
                }
                if map_get(&ipld, "name") == Some(&Ipld::String(name.to_string())) {
                    let root_cid = cbor_cid(&serde_ipld_dagcbor::to_vec(&ipld)?);
                    let address = format_address(SCHEME, &root_cid)?;
                    let head = self.find_head(&address).await?;
                    let identity_cid = match self.find_identity_cid(&address).await? {
                        Some(cid) => cid,
                        None => {
                            self.store
                                .put_cbor(&map(vec![
                                    ("id", Ipld::String(self.identity_id.clone())),
                                    ("type", Ipld::String("publickey".to_string())),
                                ]))
                                .await?
                        }
                    };
                    return Ok(FileDatabaseHandle {
                        store: self.store.clone(),
                        address,
                        name: name.to_string(),
                        kind,
                        identity_id: self.identity_id.clone(),
                        identity_cid,
                        head: Mutex::new(head),
                        next_time: AtomicU64::new(0),
                    });
                }
            }
        }
        self.build_fresh(name, kind).await
    }

    fn blockstore(&self) -> Arc<dyn LocalBlockStore> {
        Arc::new(self.store.clone())
    }

    fn identity_id(&self) -> String {
        self.identity_id.clone()
    }
}
