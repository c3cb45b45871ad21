//! The Orchestrator (`§4.9`): the three public workflows — BACKUP, RESTORE,
//! PURGE — composed from every other module into the small set of public
//! async functions callers actually need.

use std::{collections::HashMap, time::Duration};

use futures::future::join_all;
use libipld::Cid;
use tracing::{instrument, warn};

use crate::{
    analyze::analyze,
    cid_bridge::{format_address, parse_address},
    config::Config,
    download::{download_objects, GatewayFetcher},
    error::{Error, Result},
    extract::extract,
    fallback::{reconstruct, ReconstructionReport},
    logdb::{DatabaseHandle, LogDb},
    model::{DatabaseKind, ExtractionMode, LogEntryBlock, Source},
    progress::{ProgressBus, ProgressEvent, Stage},
    remote::{Layer, RemoteStore},
    select::select_root,
    upload::upload_blocks,
};

/// The scheme segment of a database address (`"/orbitdb/<root-cid>"`). The
/// log-DB runtime this crate targets never varies this, so it's a constant
/// rather than a configuration option.
const SCHEME: &str = "orbitdb";

/// How to identify the database BACKUP should read from.
#[derive(Debug, Clone)]
pub enum BackupSource {
    /// Open by canonical address.
    Address(String),
    /// Open by human-assigned name, creating it if the runtime doesn't
    /// already have it (only meaningful for `LogDb` implementations that
    /// treat opening and creating as the same call).
    Name(String, DatabaseKind),
}

/// The summary returned by a successful BACKUP (`§4.9`).
#[derive(Debug, Clone)]
pub struct BackupSummary {
    /// The backed-up database's root CID.
    pub root_cid: Cid,
    /// The source database's address.
    pub source_address: String,
    /// Total blocks in the extraction set.
    pub total: usize,
    /// Blocks that uploaded successfully.
    pub uploaded: usize,
    /// Block counts broken down by extraction source classification.
    pub by_source: HashMap<Source, usize>,
}

/// How a RESTORE recovered the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMethod {
    /// The root block was recovered and the database reopened at its
    /// original address.
    Direct,
    /// No usable root was recovered; entries were replayed into a freshly
    /// created database instead.
    FallbackReconstruction,
}

/// The summary returned by a successful RESTORE (`§4.9`).
#[derive(Debug, Clone)]
pub struct RestoreSummary {
    /// The reopened (or freshly created) database's address.
    pub address: String,
    /// How many log entries were recovered.
    pub entries_recovered: usize,
    /// Whether the reopened address matches the address composed from the
    /// selected root CID. Always `false` for a fallback reconstruction.
    pub address_match: bool,
    /// Which path recovery took.
    pub method: RestoreMethod,
}

/// Per-layer counts for a PURGE run.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayerStats {
    /// Objects found (listed) for this layer.
    pub found: usize,
    /// Objects successfully removed.
    pub removed: usize,
    /// Objects that failed to remove.
    pub failed: usize,
}

/// The summary returned by PURGE (`§4.9`).
#[derive(Debug, Clone, Default)]
pub struct PurgeSummary {
    /// Distinct objects found in the container.
    pub total_found: usize,
    /// Total successful removals across all layers.
    pub total_removed: usize,
    /// Total failed removals across all layers.
    pub total_failed: usize,
    /// Per-layer breakdown.
    pub by_layer: HashMap<Layer, LayerStats>,
}

impl PurgeSummary {
    /// Whether every listed object was removed from every layer.
    pub fn fully_drained(&self) -> bool {
        self.total_failed == 0
    }
}

/// Composes every other module into the three public workflows.
///
/// Generic over the three External Interface Adapters (`§6`): the remote
/// store, the log-DB runtime, and the gateway fetcher used during restore.
pub struct Orchestrator<R: RemoteStore, L: LogDb, G: GatewayFetcher> {
    remote: R,
    logdb: L,
    fetcher: G,
    config: Config,
    progress: ProgressBus,
}

impl<R: RemoteStore, L: LogDb, G: GatewayFetcher> Orchestrator<R, L, G> {
    /// Build an orchestrator over the given adapters and configuration.
    pub fn new(remote: R, logdb: L, fetcher: G, config: Config) -> Self {
        Self {
            remote,
            logdb,
            fetcher,
            config,
            progress: ProgressBus::default(),
        }
    }

    /// Subscribe to this orchestrator's progress events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// BACKUP: extract a database's blocks and upload them (`§4.9`).
    #[instrument(skip(self))]
    pub async fn backup(&self, source: BackupSource, mode: ExtractionMode) -> Result<BackupSummary> {
        let handle = match source {
            BackupSource::Address(address) => self
                .logdb
                .open_by_address(&address)
                .await
                .map_err(Error::OpenFailed)?,
            BackupSource::Name(name, kind) => self
                .logdb
                .open_by_name(&name, kind)
                .await
                .map_err(Error::OpenFailed)?,
        };

        let store = self.logdb.blockstore();
        let set = extract(&handle, &store, mode).await?;
        let root_cid = set.root_cid.ok_or_else(|| Error::InvalidAddress {
            address: handle.address(),
        })?;

        let mut by_source: HashMap<Source, usize> = HashMap::new();
        for source in set.sources.values() {
            *by_source.entry(*source).or_insert(0) += 1;
        }

        let blocks: Vec<_> = set.blocks.into_iter().collect();
        let total = blocks.len();
        let report = upload_blocks(&self.remote, blocks, &self.config, &self.progress).await;

        if report.successful() == 0 {
            return Err(Error::UploadNoProgress { attempted: total });
        }

        Ok(BackupSummary {
            root_cid,
            source_address: handle.address(),
            total,
            uploaded: report.successful(),
            by_source,
        })
    }

    async fn list_all_roots(&self) -> anyhow::Result<Vec<Cid>> {
        let mut cids = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.remote.list(None, cursor.as_deref()).await?;
            cids.extend(page.items.into_iter().map(|entry| entry.root));
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(cids)
    }

    /// RESTORE: download every object in the current container, recover the
    /// database's root by graph analysis, and reopen it (or, failing that,
    /// reconstruct it from replayed log entries) (`§4.9`).
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<RestoreSummary> {
        let roots = self.list_all_roots().await.map_err(Error::RemoteStore)?;
        let store = self.logdb.blockstore();

        let download_report = download_objects(&self.fetcher, &store, &roots, &self.config, &self.progress).await;

        let mut blocks = Vec::with_capacity(download_report.bridged.len());
        for (_, cbor_cid) in &download_report.bridged {
            if let Some(bytes) = store.get_block(cbor_cid).await.map_err(Error::RemoteStore)? {
                blocks.push((*cbor_cid, bytes));
            }
        }

        let analysis = analyze(&blocks);
        let by_cid: HashMap<Cid, bytes::Bytes> = blocks.iter().cloned().collect();

        let selected_root = if self.config.force_fallback {
            None
        } else {
            if analysis.roots.is_empty() {
                warn!("AnalysisEmpty: no root candidates among downloaded blocks, switching to fallback reconstruction");
            }
            select_root(&analysis, |cid| by_cid.get(cid).cloned(), SCHEME)
        };

        match selected_root {
            Some(root_cid) => self.restore_direct(root_cid).await,
            None => self.restore_fallback(&analysis, &by_cid).await,
        }
    }

    async fn restore_direct(&self, root_cid: Cid) -> Result<RestoreSummary> {
        let address = format_address(SCHEME, &root_cid)?;
        let handle = self.logdb.open_by_address(&address).await.map_err(Error::OpenFailed)?;

        tokio::time::sleep(self.config.timeout / 10).await;

        let entries = handle.log_entry_hashes().await.map_err(Error::OpenFailed)?;
        let address_match = handle.address() == address;

        Ok(RestoreSummary {
            address: handle.address(),
            entries_recovered: entries.len(),
            address_match,
            method: RestoreMethod::Direct,
        })
    }

    async fn restore_fallback(
        &self,
        analysis: &crate::analyze::Analysis,
        by_cid: &HashMap<Cid, bytes::Bytes>,
    ) -> Result<RestoreSummary> {
        let mut decoded: Vec<(Cid, LogEntryBlock)> = Vec::new();
        for cid in &analysis.log_entries {
            if let Some(bytes) = by_cid.get(cid) {
                if let Ok(entry) = serde_ipld_dagcbor::from_slice::<LogEntryBlock>(bytes) {
                    decoded.push((*cid, entry));
                }
            }
        }

        let name = self
            .config
            .fallback_database_name
            .clone()
            .unwrap_or_else(|| "restored-database".to_string());

        let (handle, report) = reconstruct(&self.logdb, &name, &decoded).await?;
        self.log_reconstruction(&report);

        Ok(RestoreSummary {
            address: handle.address(),
            entries_recovered: report.imported_count,
            address_match: false,
            method: RestoreMethod::FallbackReconstruction,
        })
    }

    fn log_reconstruction(&self, report: &ReconstructionReport) {
        warn!(
            kind = ?report.kind,
            original_count = report.original_count,
            imported_count = report.imported_count,
            import_errors_count = report.import_errors_count,
            "restored via fallback-reconstruction"
        );
    }

    /// PURGE: drain every layer of the current container (`§4.9`).
    #[instrument(skip(self))]
    pub async fn purge(&self) -> Result<PurgeSummary> {
        let cids = self.list_all_roots().await.map_err(Error::RemoteStore)?;
        let mut summary = PurgeSummary {
            total_found: cids.len(),
            ..Default::default()
        };

        for layer in Layer::ALL {
            self.progress.emit(ProgressEvent::Starting {
                stage: Stage::Purge,
                total: cids.len(),
            });

            let mut stats = LayerStats {
                found: cids.len(),
                ..Default::default()
            };

            let batch_size = self.config.batch_size.max(1);
            let mut completed = 0usize;
            for batch in cids.chunks(batch_size) {
                let results = join_all(batch.iter().map(|cid| async move {
                    let result = self.remote.remove(layer, cid).await;
                    (*cid, result)
                }))
                .await;

                for (cid, result) in results {
                    completed += 1;
                    match result {
                        Ok(()) => stats.removed += 1,
                        Err(e) => {
                            warn!(%cid, ?layer, error = %e, "failed to remove object during purge");
                            stats.failed += 1;
                        }
                    }
                    self.progress.emit(ProgressEvent::Removing {
                        current: completed,
                        total: cids.len(),
                        layer,
                    });
                }

                if completed < cids.len() {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }

            self.progress.emit(ProgressEvent::Completed {
                stage: Stage::Purge,
                successful: stats.removed,
                failed: stats.failed,
            });

            summary.total_removed += stats.removed;
            summary.total_failed += stats.failed;
            summary.by_layer.insert(layer, stats);
        }

        Ok(summary)
    }
}

/// Parse a root CID back out of an already-composed address, used by
/// callers that only have the address and need the bare CID (e.g. CLI
/// output formatting).
pub fn root_cid_of(address: &str) -> Result<Cid> {
    parse_address(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        logdb::DatabaseHandle,
        test_utils::{FakeDatabase, FakeLogDb, FakeRemoteStore},
    };

    #[tokio::test]
    async fn scenario_a_event_log_round_trip() -> anyhow::Result<()> {
        let source = FakeDatabase::event_log("notes", &["e1", "e2", "e3"]).await?;
        let source_address = source.address();

        let remote = FakeRemoteStore::new("did:key:space");
        let source_logdb = FakeLogDb::with_source(source).await?;

        let backup_orch = Orchestrator::new(remote.clone(), source_logdb, remote.clone(), Config::default());
        let backup_summary = backup_orch
            .backup(BackupSource::Address(source_address.clone()), ExtractionMode::Full)
            .await?;
        assert_eq!(backup_summary.uploaded, backup_summary.total);

        let fresh_logdb = FakeLogDb::new();
        let restore_orch = Orchestrator::new(remote.clone(), fresh_logdb, remote.clone(), Config::default());
        let restore_summary = restore_orch.restore().await?;

        assert_eq!(restore_summary.method, RestoreMethod::Direct);
        assert!(restore_summary.address_match);
        assert_eq!(restore_summary.address, source_address);
        assert_eq!(restore_summary.entries_recovered, 3);
        Ok(())
    }

    #[tokio::test]
    async fn scenario_b_key_value_round_trip() -> anyhow::Result<()> {
        let source = FakeDatabase::key_value(
            "settings",
            &[("greeting", Some("hi")), ("framework", Some("x")), ("auth", Some("z"))],
        )
        .await?;
        let source_address = source.address();

        let remote = FakeRemoteStore::new("did:key:space");
        let source_logdb = FakeLogDb::with_source(source).await?;
        let backup_orch = Orchestrator::new(remote.clone(), source_logdb, remote.clone(), Config::default());
        backup_orch
            .backup(BackupSource::Address(source_address.clone()), ExtractionMode::Full)
            .await?;

        let restore_orch = Orchestrator::new(remote.clone(), FakeLogDb::new(), remote.clone(), Config::default());
        let restore_summary = restore_orch.restore().await?;

        assert!(restore_summary.address_match);
        assert_eq!(restore_summary.entries_recovered, 3);
        Ok(())
    }

    #[tokio::test]
    async fn scenario_d_forced_fallback_reconstructs_with_a_different_address() -> anyhow::Result<()> {
        let source = FakeDatabase::event_log("notes", &["e1", "e2", "e3"]).await?;
        let source_address = source.address();

        let remote = FakeRemoteStore::new("did:key:space");
        let source_logdb = FakeLogDb::with_source(source).await?;
        let backup_orch = Orchestrator::new(remote.clone(), source_logdb, remote.clone(), Config::default());
        backup_orch
            .backup(
                BackupSource::Address(source_address.clone()),
                ExtractionMode::LogEntriesOnly,
            )
            .await?;

        let mut config = Config::default();
        config.force_fallback = true;
        let restore_orch = Orchestrator::new(remote.clone(), FakeLogDb::new(), remote.clone(), config);
        let restore_summary = restore_orch.restore().await?;

        assert_eq!(restore_summary.method, RestoreMethod::FallbackReconstruction);
        assert!(!restore_summary.address_match);
        assert_ne!(restore_summary.address, source_address);
        assert_eq!(restore_summary.entries_recovered, 3);
        Ok(())
    }

    #[tokio::test]
    async fn scenario_f_purge_drains_container_and_restore_then_fails() -> anyhow::Result<()> {
        let source = FakeDatabase::event_log("notes", &["e1", "e2", "e3"]).await?;
        let source_address = source.address();

        let remote = FakeRemoteStore::new("did:key:space");
        let source_logdb = FakeLogDb::with_source(source).await?;
        let backup_orch = Orchestrator::new(remote.clone(), source_logdb, remote.clone(), Config::default());
        backup_orch
            .backup(BackupSource::Address(source_address), ExtractionMode::Full)
            .await?;

        let purge_orch = Orchestrator::new(remote.clone(), FakeLogDb::new(), remote.clone(), Config::default());
        let purge_summary = purge_orch.purge().await?;
        assert!(purge_summary.fully_drained());
        assert_eq!(purge_summary.total_found, purge_summary.total_removed / 3);

        let restore_orch = Orchestrator::new(remote.clone(), FakeLogDb::new(), remote.clone(), Config::default());
        let restore_result = restore_orch.restore().await;
        assert!(matches!(restore_result, Err(Error::ReconstructionEmpty)));
        Ok(())
    }

    #[tokio::test]
    async fn backup_with_zero_uploads_is_fatal() -> anyhow::Result<()> {
        let source = FakeDatabase::event_log("notes", &["e1"]).await?;
        let address = source.address();
        let source_logdb = FakeLogDb::with_source(source).await?;

        let remote = FakeRemoteStore::new("did:key:space");
        remote.fail_next_uploads(100).await;
        let orch = Orchestrator::new(remote.clone(), source_logdb, remote, Config::default());

        let result = orch.backup(BackupSource::Address(address), ExtractionMode::Full).await;
        assert!(matches!(result, Err(Error::UploadNoProgress { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn purge_summary_reports_by_layer() -> anyhow::Result<()> {
        let source = FakeDatabase::event_log("notes", &["e1"]).await?;
        let address = source.address();
        let remote = FakeRemoteStore::new("did:key:space");
        let source_logdb = FakeLogDb::with_source(source).await?;
        let backup_orch = Orchestrator::new(remote.clone(), source_logdb, remote.clone(), Config::default());
        backup_orch.backup(BackupSource::Address(address), ExtractionMode::Full).await?;

        let purge_orch = Orchestrator::new(remote.clone(), FakeLogDb::new(), remote, Config::default());
        let summary = purge_orch.purge().await?;

        for layer in Layer::ALL {
            let stats = summary.by_layer.get(&layer).unwrap();
            assert_eq!(stats.found, summary.total_found);
            assert_eq!(stats.failed, 0);
        }
        Ok(())
    }
}
