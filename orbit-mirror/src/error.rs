use libipld::Cid;

/// Errors raised from the orbit-mirror core engine.
///
/// Single-block and single-object failures are generally *not* represented
/// here — those are collected into the summaries returned by the
/// orchestrator (see `orchestrator::BackupSummary` and friends). This enum
/// is reserved for conditions that are fatal to a whole workflow.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The final path segment of a database address isn't a parseable CID,
    /// or the scheme prefix is empty.
    #[error("Invalid database address: {address}")]
    InvalidAddress {
        /// The address string that failed to parse
        address: String,
    },

    /// A CID uses a hash function other than SHA-256, or is a CIDv0, and
    /// so can't be bridged between the raw and CBOR codecs.
    #[error("Unsupported CID for bridging: {cid}")]
    UnsupportedCid {
        /// The offending CID
        cid: Cid,
    },

    /// The remote client could not be constructed — bad credentials,
    /// expired delegation, or similar. Fatal to the workflow.
    #[error("Failed to authenticate with remote store: {reason}")]
    AuthFailed {
        /// A human-readable reason
        reason: String,
    },

    /// The upload pipeline completed without a single successful upload.
    /// Fatal to BACKUP.
    #[error("No blocks were uploaded ({attempted} attempted, all failed)")]
    UploadNoProgress {
        /// How many blocks were attempted
        attempted: usize,
    },

    /// The block analyzer found zero root candidates among the downloaded
    /// blocks, or the caller forced fallback reconstruction.
    #[error("No root block found among downloaded blocks; falling back")]
    AnalysisEmpty,

    /// The fallback reconstructor found zero log-entry blocks to replay.
    /// Fatal to RESTORE.
    #[error("No log-entry blocks available to reconstruct a database from")]
    ReconstructionEmpty,

    /// Failed to open the source or recovered database via the injected
    /// log-DB runtime.
    #[error("Failed to open database: {0}")]
    OpenFailed(anyhow::Error),

    /// An underlying CBOR decode error, surfaced when decoding a block that
    /// must be well-formed for the workflow to proceed (e.g. the root
    /// block itself during backup's access-controller lookup).
    #[error("Failed to decode CBOR block {cid}: {source}")]
    DecodeError {
        /// The block that failed to decode
        cid: Cid,
        /// The underlying decode error
        #[source]
        source: anyhow::Error,
    },

    /// The ambient cancellation signal was tripped mid-workflow. Any local
    /// block-store writes made so far are retained (they're content
    /// addressed and idempotent); remote uploads are not rolled back.
    #[error("Workflow cancelled")]
    Cancelled,

    /// A per-attempt timeout elapsed.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Errors bubbled up from an injected `RemoteStore` implementation.
    #[error("Remote store error: {0}")]
    RemoteStore(#[from] anyhow::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
