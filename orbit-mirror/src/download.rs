//! The Download Pipeline (`§4.5`): for each remote object, fetch its bytes
//! through an ordered list of gateways (first success wins), bridge the CID,
//! and persist into the local block store.
//!
//! Gateway HTTP fetching itself is an External Interface Adapter (`§6`),
//! the same way `RemoteStore` and `LogDb` are: this crate never links
//! `reqwest` directly, `orbit-mirror-reqwest` supplies the concrete
//! `GatewayFetcher`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use libipld::Cid;
use tracing::{instrument, warn};

use crate::{
    blockstore::LocalBlockStore,
    cid_bridge::raw_to_cbor,
    config::Config,
    progress::{ProgressBus, ProgressEvent, Stage},
};

/// Fetches a single object's bytes from one gateway. Implementations try
/// exactly one gateway per call; the download pipeline owns the failover
/// loop across the configured gateway list.
#[async_trait]
pub trait GatewayFetcher: Send + Sync {
    /// Fetch `cid_raw`'s bytes from `gateway_base`.
    async fn fetch(&self, gateway_base: &str, cid_raw: &Cid) -> anyhow::Result<Bytes>;
}

/// A single object's download failure, recorded rather than raised (`§7`,
/// `GatewayUnavailable`).
#[derive(Debug, Clone)]
pub struct DownloadFailure {
    /// The remote object's raw-codec CID.
    pub cid_raw: Cid,
    /// A human-readable reason, mentioning the last gateway tried.
    pub reason: String,
}

/// The result of running the download pipeline over a remote object listing.
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    /// Raw-codec CID → CBOR-codec CID, for every object persisted locally.
    pub bridged: Vec<(Cid, Cid)>,
    /// Objects that failed on every configured gateway.
    pub failures: Vec<DownloadFailure>,
}

/// Fetch every object in `roots`, trying each configured gateway in order
/// (per-attempt timeout, first success wins) and writing the CBOR-bridged
/// CID into `store` (`§4.5`).
#[instrument(skip(fetcher, store, roots, progress))]
pub async fn download_objects(
    fetcher: &(impl GatewayFetcher + ?Sized),
    store: &Arc<dyn LocalBlockStore>,
    roots: &[Cid],
    config: &Config,
    progress: &ProgressBus,
) -> DownloadReport {
    let total = roots.len();
    progress.emit(ProgressEvent::Starting {
        stage: Stage::Download,
        total,
    });

    let mut report = DownloadReport::default();

    for (index, cid_raw) in roots.iter().enumerate() {
        let mut last_reason = String::from("no gateways configured");
        let mut attempts = 0usize;
        let mut fetched = None;

        for gateway in &config.gateways {
            attempts += 1;
            match tokio::time::timeout(config.timeout, fetcher.fetch(gateway, cid_raw)).await {
                Ok(Ok(bytes)) => {
                    fetched = Some(bytes);
                    break;
                }
                Ok(Err(e)) => last_reason = format!("{gateway}: {e}"),
                Err(_) => last_reason = format!("{gateway}: timed out after {:?}", config.timeout),
            }
        }

        match fetched {
            Some(bytes) => match raw_to_cbor(cid_raw) {
                Ok(cbor_cid) => {
                    if let Err(e) = store.put_block_keyed(cbor_cid, bytes).await {
                        warn!(cid = %cid_raw, error = %e, "failed to persist downloaded block locally");
                        report.failures.push(DownloadFailure {
                            cid_raw: *cid_raw,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                    report.bridged.push((*cid_raw, cbor_cid));
                    progress.emit(ProgressEvent::Downloading {
                        current: index + 1,
                        total,
                        last_cid: cbor_cid,
                        gateway_attempts: attempts,
                    });
                }
                Err(e) => {
                    warn!(cid = %cid_raw, error = %e, "downloaded object can't be bridged to a CBOR CID");
                    report.failures.push(DownloadFailure {
                        cid_raw: *cid_raw,
                        reason: e.to_string(),
                    });
                }
            },
            None => {
                warn!(cid = %cid_raw, reason = %last_reason, "all gateways failed for object");
                report.failures.push(DownloadFailure {
                    cid_raw: *cid_raw,
                    reason: last_reason,
                });
            }
        }
    }

    progress.emit(ProgressEvent::Completed {
        stage: Stage::Download,
        successful: report.bridged.len(),
        failed: report.failures.len(),
    });

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstore::MemoryBlockStore;
    use std::{collections::HashMap, sync::Mutex};

    struct FakeGateways {
        // gateway base -> cid -> bytes (absent means 404)
        content: HashMap<String, HashMap<Cid, Bytes>>,
        calls: Mutex<Vec<(String, Cid)>>,
    }

    #[async_trait]
    impl GatewayFetcher for FakeGateways {
        async fn fetch(&self, gateway_base: &str, cid_raw: &Cid) -> anyhow::Result<Bytes> {
            self.calls.lock().unwrap().push((gateway_base.to_string(), *cid_raw));
            self.content
                .get(gateway_base)
                .and_then(|m| m.get(cid_raw))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 from {gateway_base}"))
        }
    }

    #[tokio::test]
    async fn first_gateway_success_wins() -> anyhow::Result<()> {
        let cid = crate::cid_bridge::digest_raw(b"hello");
        let mut good = HashMap::new();
        good.insert(cid, Bytes::from_static(b"hello"));
        let mut content = HashMap::new();
        content.insert("https://a".to_string(), good);

        let fetcher = FakeGateways {
            content,
            calls: Mutex::new(Vec::new()),
        };
        let store: Arc<dyn LocalBlockStore> = Arc::new(MemoryBlockStore::new());
        let mut config = Config::default();
        config.gateways = vec!["https://a".to_string(), "https://b".to_string()];
        let bus = ProgressBus::default();

        let report = download_objects(&fetcher, &store, &[cid], &config, &bus).await;
        assert_eq!(report.bridged.len(), 1);
        assert!(report.failures.is_empty());

        let cbor_cid = raw_to_cbor(&cid)?;
        assert!(store.get_block(&cbor_cid).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn falls_through_failing_gateways_before_succeeding() -> anyhow::Result<()> {
        let cid = crate::cid_bridge::digest_raw(b"world");
        let mut good = HashMap::new();
        good.insert(cid, Bytes::from_static(b"world"));
        let mut content = HashMap::new();
        content.insert("https://c".to_string(), HashMap::new());
        content.insert("https://d".to_string(), HashMap::new());
        content.insert("https://e".to_string(), good);

        let fetcher = FakeGateways {
            content,
            calls: Mutex::new(Vec::new()),
        };
        let store: Arc<dyn LocalBlockStore> = Arc::new(MemoryBlockStore::new());
        let mut config = Config::default();
        config.gateways = vec!["https://c".to_string(), "https://d".to_string(), "https://e".to_string()];
        let bus = ProgressBus::default();

        let report = download_objects(&fetcher, &store, &[cid], &config, &bus).await;
        assert_eq!(report.bridged.len(), 1);
        assert_eq!(fetcher.calls.lock().unwrap().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn all_gateways_failing_is_recorded_not_fatal() {
        let fetcher = FakeGateways {
            content: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        };
        let store: Arc<dyn LocalBlockStore> = Arc::new(MemoryBlockStore::new());
        let mut config = Config::default();
        config.gateways = vec!["https://a".to_string()];
        let bus = ProgressBus::default();

        let cid = crate::cid_bridge::digest_raw(b"missing");
        let report = download_objects(&fetcher, &store, &[cid], &config, &bus).await;
        assert_eq!(report.failures.len(), 1);
        assert!(report.bridged.is_empty());
    }
}
