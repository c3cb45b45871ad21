//! A passive progress event emitter (`§4.10`). Subscribers register
//! interest; the orchestrator fans events out synchronously. Dropping a
//! subscriber never blocks a pipeline.

use libipld::Cid;
use tokio::sync::broadcast;

/// A structured progress event, emitted by the upload pipeline, download
/// pipeline, and purge workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Emitted once, before a batch of work starts.
    Starting {
        /// The stage this event belongs to.
        stage: Stage,
        /// Total number of items about to be processed.
        total: usize,
    },
    /// Emitted after each completed upload.
    Uploading {
        /// How many uploads have completed so far.
        current: usize,
        /// Total uploads in this run.
        total: usize,
        /// The CID of the block that was just uploaded.
        last_cid: Cid,
        /// The size in bytes of the block that was just uploaded.
        last_size: usize,
    },
    /// Emitted after each completed download.
    Downloading {
        /// How many downloads have completed so far.
        current: usize,
        /// Total downloads in this run.
        total: usize,
        /// The CID of the object that was just downloaded.
        last_cid: Cid,
        /// How many gateways were tried before one succeeded.
        gateway_attempts: usize,
    },
    /// Emitted after each completed removal, during PURGE.
    Removing {
        /// How many removals have completed so far in this layer.
        current: usize,
        /// Total removals in this layer.
        total: usize,
        /// Which layer this removal belongs to.
        layer: crate::remote::Layer,
    },
    /// Emitted once a stage finishes.
    Completed {
        /// The stage this event belongs to.
        stage: Stage,
        /// How many items succeeded.
        successful: usize,
        /// How many items failed.
        failed: usize,
    },
}

impl ProgressEvent {
    /// The completion percentage for events that carry `current`/`total`,
    /// if applicable.
    pub fn percent(&self) -> Option<f64> {
        match self {
            ProgressEvent::Uploading { current, total, .. }
            | ProgressEvent::Downloading { current, total, .. }
            | ProgressEvent::Removing { current, total, .. } => {
                if *total == 0 {
                    Some(100.0)
                } else {
                    Some(*current as f64 / *total as f64 * 100.0)
                }
            }
            _ => None,
        }
    }
}

/// Which pipeline a `Starting`/`Completed` event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The upload pipeline (`§4.4`).
    Upload,
    /// The download pipeline (`§4.5`).
    Download,
    /// The purge workflow (`§4.9`).
    Purge,
}

/// A progress bus that fans events out to zero or more subscribers.
///
/// Cheaply cloneable; clones share the same underlying channel, so the
/// orchestrator can hand a `ProgressBus` to each pipeline stage.
#[derive(Debug, Clone)]
pub struct ProgressBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressBus {
    /// Create a new bus with room for `capacity` buffered-but-unread events
    /// per subscriber before the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to future events. Events emitted before a subscription is
    /// created are never delivered to it.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all current subscribers. Never blocks: a lagging or
    /// dropped subscriber simply misses events, per `broadcast`'s semantics.
    pub fn emit(&self, event: ProgressEvent) {
        // A `SendError` here just means there are no subscribers right now.
        let _ = self.sender.send(event);
    }
}

impl Default for ProgressBus {
    /// A bus with no subscribers can still be emitted into cheaply; this
    /// gives pipelines something to hold without an `Option` at every call site.
    fn default() -> Self {
        Self::new(128)
    }
}
