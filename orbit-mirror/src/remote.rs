//! The remote store contract (`§4.3`, `§6`). This crate never talks HTTP
//! itself — `orbit-mirror-reqwest` provides the concrete implementation.

use async_trait::async_trait;
use bytes::Bytes;
use libipld::Cid;

use crate::model::ManifestPage;

/// The three storage layers a Storacha-shaped remote store exposes. An
/// uploaded DAG is addressed by `upload` (root CID to shard mapping),
/// backed by `store` (CAR-shaped shards), backed by `blob` (raw bytes).
/// PURGE drains all three, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// The upload-to-shard mapping layer.
    Upload,
    /// The shard storage layer.
    Store,
    /// The raw blob layer.
    Blob,
}

impl Layer {
    /// All layers, in the order PURGE should drain them.
    pub const ALL: [Layer; 3] = [Layer::Upload, Layer::Store, Layer::Blob];
}

/// Identifies which container (space/bucket) a remote client is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(pub String);

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authentication material for constructing a remote client (`§6`).
///
/// Credential plumbing itself — signing, delegation verification — is out
/// of scope (`§1`); this enum only carries what the core needs to select
/// and pass along to an `AuthProvider`.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// The primary auth mode: a key plus a proof of delegation.
    KeyAndProof {
        /// The remote signing key identifier.
        remote_key: String,
        /// A proof of delegated capability for that key.
        remote_proof: String,
    },
    /// Delegated-capability mode: a bearer token produced by a separate
    /// authority, plus a recipient signing-key archive.
    DelegatedCapability {
        /// Base64-encoded capability token.
        delegated_capability_token: String,
        /// JSON archive of the recipient's signing key.
        recipient_key_archive: String,
    },
}

/// Produces request authentication material from `Credentials`.
///
/// Injected at workflow construction (`§9` redesign hint: no global
/// registry of identity providers). The core never performs cryptographic
/// signing itself; this trait is the seam, testable with a fake provider
/// that returns canned headers.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Produce the HTTP headers (name, value) that authenticate a request
    /// under the given credentials.
    async fn auth_headers(&self, credentials: &Credentials) -> anyhow::Result<Vec<(String, String)>>;
}

/// One uploaded block's outcome from the upload pipeline.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// The CID the bytes were uploaded under, as assigned by the remote store.
    pub cid_raw: Cid,
}

/// Capability-authenticated operations against the remote store (`§4.3`).
///
/// All operations are suspension points (`§5`) and may be cancelled via the
/// ambient signal; implementations should treat `tokio`'s cooperative
/// cancellation as sufficient (dropping the future cancels it).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upload a single opaque blob, returning its raw-codec CID.
    async fn upload(&self, bytes: Bytes, name: &str) -> anyhow::Result<UploadOutcome>;

    /// Enumerate objects in the current container.
    async fn list(&self, limit: Option<usize>, cursor: Option<&str>) -> anyhow::Result<ManifestPage>;

    /// Remove a single object from the given layer.
    async fn remove(&self, layer: Layer, cid: &Cid) -> anyhow::Result<()>;

    /// The container this client is currently scoped to.
    fn current_container(&self) -> ContainerId;

    /// Switch this client to a different container.
    fn select_container(&mut self, container: ContainerId);
}
