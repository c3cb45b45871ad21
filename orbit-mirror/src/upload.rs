//! The Upload Pipeline (`§4.4`): upload a block map to the remote store
//! under a bounded concurrency budget, emitting progress as it goes.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use futures::{future::join_all, stream, StreamExt};
use libipld::Cid;
use tracing::{instrument, warn};

use crate::{
    config::Config,
    progress::{ProgressBus, ProgressEvent, Stage},
    remote::RemoteStore,
};

/// A single block's upload failure, recorded rather than raised (`§7`,
/// `UploadBlockFailed`).
#[derive(Debug, Clone)]
pub struct UploadFailure {
    /// The CID (log-DB codec) of the block that failed to upload.
    pub cid: Cid,
    /// A human-readable reason for the failure.
    pub reason: String,
}

/// The result of running the upload pipeline over a block map.
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    /// CBOR CID → the remote store's raw-codec CID, for every block that
    /// uploaded successfully. Deterministic per input: the mapping for a
    /// given source CID depends only on its bytes (the bridge is pure).
    pub cid_mapping: HashMap<Cid, Cid>,
    /// Blocks that failed to upload, with a reason.
    pub failures: Vec<UploadFailure>,
}

impl UploadReport {
    /// How many blocks uploaded successfully.
    pub fn successful(&self) -> usize {
        self.cid_mapping.len()
    }
}

/// Upload every block in `blocks`, drawing from the queue in mega-batches of
/// `batch_size × max_concurrency`: each mega-batch is split into
/// `batch_size`-sized batches, and up to `max_concurrency` of those batches
/// run concurrently, each uploading its `batch_size` blocks concurrently too
/// (`§4.4`). Peak in-flight uploads is the product of the two bounds, not
/// their minimum.
///
/// Completion order is not preserved; the caller gets a deterministic
/// `cid → cid_raw` mapping regardless of which upload finishes first.
#[instrument(skip(remote, blocks, progress))]
pub async fn upload_blocks<R: RemoteStore + ?Sized>(
    remote: &R,
    blocks: Vec<(Cid, Bytes)>,
    config: &Config,
    progress: &ProgressBus,
) -> UploadReport {
    let total = blocks.len();
    progress.emit(ProgressEvent::Starting {
        stage: Stage::Upload,
        total,
    });

    let batch_size = config.batch_size.max(1);
    let max_concurrency = config.max_concurrency.max(1);
    let mega_batch = config.max_uploads_in_flight().max(1);
    let mut report = UploadReport::default();
    let completed = Arc::new(AtomicUsize::new(0));

    for mega in blocks.chunks(mega_batch) {
        let batches: Vec<Vec<(Cid, Bytes)>> = mega.chunks(batch_size).map(<[_]>::to_vec).collect();

        let grouped: Vec<Vec<(Cid, Result<Cid, String>)>> = stream::iter(batches)
            .map(|batch| {
                let completed = Arc::clone(&completed);
                async move {
                    join_all(batch.into_iter().map(|(cid, bytes)| {
                        let completed = Arc::clone(&completed);
                        async move {
                            let size = bytes.len();
                            let outcome = remote.upload(bytes, &cid.to_string()).await;
                            let result = outcome.map(|o| o.cid_raw).map_err(|e| e.to_string());
                            let current = completed.fetch_add(1, Ordering::SeqCst) + 1;
                            match &result {
                                Ok(cid_raw) => {
                                    progress.emit(ProgressEvent::Uploading {
                                        current,
                                        total,
                                        last_cid: *cid_raw,
                                        last_size: size,
                                    });
                                }
                                Err(reason) => warn!(%cid, %reason, "block upload failed"),
                            }
                            (cid, result)
                        }
                    }))
                    .await
                }
            })
            .buffer_unordered(max_concurrency)
            .collect()
            .await;

        for (cid, result) in grouped.into_iter().flatten() {
            match result {
                Ok(cid_raw) => {
                    report.cid_mapping.insert(cid, cid_raw);
                }
                Err(reason) => report.failures.push(UploadFailure { cid, reason }),
            }
        }
    }

    progress.emit(ProgressEvent::Completed {
        stage: Stage::Upload,
        successful: report.successful(),
        failed: report.failures.len(),
    });

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeRemoteStore;

    fn block(bytes: &'static [u8]) -> (Cid, Bytes) {
        (crate::cid_bridge::digest_raw(bytes), Bytes::from_static(bytes))
    }

    #[tokio::test]
    async fn uploads_every_block_and_maps_cids() {
        let remote = FakeRemoteStore::new("did:key:space");
        let config = Config::default();
        let bus = ProgressBus::default();

        let blocks = vec![block(b"one"), block(b"two"), block(b"three")];
        let report = upload_blocks(&remote, blocks, &config, &bus).await;

        assert_eq!(report.successful(), 3);
        assert!(report.failures.is_empty());
        assert_eq!(remote.upload_count().await, 3);
    }

    #[tokio::test]
    async fn partial_failures_are_recorded_not_fatal() {
        let remote = FakeRemoteStore::new("did:key:space");
        remote.fail_next_uploads(1).await;
        let config = Config::default();
        let bus = ProgressBus::default();

        let blocks = vec![block(b"one"), block(b"two")];
        let report = upload_blocks(&remote, blocks, &config, &bus).await;

        assert_eq!(report.successful(), 1);
        assert_eq!(report.failures.len(), 1);
    }

    #[tokio::test]
    async fn never_exceeds_configured_concurrency() {
        let remote = FakeRemoteStore::new("did:key:space");
        let mut config = Config::default();
        config.batch_size = 2;
        config.max_concurrency = 2;
        let bus = ProgressBus::default();

        let blocks: Vec<_> = (0..20u32)
            .map(|i| {
                let bytes = Bytes::from(i.to_be_bytes().to_vec());
                (crate::cid_bridge::digest_raw(&bytes), bytes)
            })
            .collect();

        let report = upload_blocks(&remote, blocks, &config, &bus).await;
        assert_eq!(report.successful(), 20);
        assert_eq!(config.max_uploads_in_flight(), 4);
    }

    /// A store that holds each upload open until every other concurrent
    /// upload has also started, so the pipeline can only finish if it
    /// actually reaches `batch_size × max_concurrency` in flight at once.
    struct RendezvousStore {
        in_flight: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
        target: usize,
    }

    #[async_trait::async_trait]
    impl RemoteStore for RendezvousStore {
        async fn upload(&self, bytes: Bytes, _name: &str) -> anyhow::Result<crate::remote::UploadOutcome> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            while self.in_flight.load(Ordering::SeqCst) < self.target {
                tokio::task::yield_now().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(crate::remote::UploadOutcome {
                cid_raw: crate::cid_bridge::digest_raw(&bytes),
            })
        }

        async fn list(
            &self,
            _limit: Option<usize>,
            _cursor: Option<&str>,
        ) -> anyhow::Result<crate::model::ManifestPage> {
            unimplemented!("not exercised by this test")
        }

        async fn remove(&self, _layer: crate::remote::Layer, _cid: &Cid) -> anyhow::Result<()> {
            unimplemented!("not exercised by this test")
        }

        fn current_container(&self) -> crate::remote::ContainerId {
            crate::remote::ContainerId("did:key:space".to_string())
        }

        fn select_container(&mut self, _container: crate::remote::ContainerId) {}
    }

    #[tokio::test]
    async fn reaches_the_full_batch_size_times_max_concurrency_bound() {
        let mut config = Config::default();
        config.batch_size = 3;
        config.max_concurrency = 4;
        let target = config.max_uploads_in_flight();
        assert_eq!(target, 12);

        let remote = RendezvousStore {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            target,
        };
        let bus = ProgressBus::default();

        let blocks: Vec<_> = (0..target as u32)
            .map(|i| {
                let bytes = Bytes::from(i.to_be_bytes().to_vec());
                (crate::cid_bridge::digest_raw(&bytes), bytes)
            })
            .collect();

        let report = upload_blocks(&remote, blocks, &config, &bus).await;
        assert_eq!(report.successful(), target);
        assert_eq!(remote.peak.load(Ordering::SeqCst), target);
    }
}
