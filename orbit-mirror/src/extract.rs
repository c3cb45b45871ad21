//! The Block Extractor (`§4.2`): walks the log DB's storage to select
//! exactly the blocks that reproduce a database identity.

use std::sync::Arc;

use tracing::{instrument, warn};

use crate::{
    blockstore::LocalBlockStore,
    cid_bridge::parse_address,
    logdb::DatabaseHandle,
    model::{ExtractionMode, ExtractionSet, Source},
    shape::{access_controller_cid, decode_ipld, looks_like_identity},
};

/// Extract the block set that reproduces `handle`'s database identity.
///
/// See `§4.2` for the full algorithm. Entries that can't be read from
/// storage are skipped with a warning rather than aborting the extraction
/// (`ExtractionPartial`, `§7`).
#[instrument(skip(handle, store))]
pub async fn extract(
    handle: &impl DatabaseHandle,
    store: &Arc<dyn LocalBlockStore>,
    mode: ExtractionMode,
) -> crate::error::Result<ExtractionSet> {
    let mut set = ExtractionSet::default();

    for hash in handle
        .log_entry_hashes()
        .await
        .map_err(crate::error::Error::OpenFailed)?
    {
        match store.get_block(&hash).await {
            Ok(Some(bytes)) => set.record(hash, bytes, Source::LogEntry),
            Ok(None) => {
                let msg = format!("log entry {hash} missing from local storage, skipping");
                warn!(cid = %hash, "{msg}");
                set.warnings.push(msg);
            }
            Err(e) => {
                let msg = format!("failed to read log entry {hash}: {e}");
                warn!(cid = %hash, error = %e, "failed to read log entry");
                set.warnings.push(msg);
            }
        }
    }

    let root_cid = parse_address(&handle.address())?;
    set.root_cid = Some(root_cid);

    if mode == ExtractionMode::Full {
        extract_full(&mut set, root_cid, store).await;
    }

    Ok(set)
}

async fn extract_full(set: &mut ExtractionSet, root_cid: libipld::Cid, store: &Arc<dyn LocalBlockStore>) {
    match store.get_block(&root_cid).await {
        Ok(Some(root_bytes)) => {
            match decode_ipld(&root_bytes) {
                Ok(root_ipld) => {
                    set.record(root_cid, root_bytes, Source::Root);

                    if let Some(ac_cid) = access_controller_cid(&root_ipld) {
                        match store.get_block(&ac_cid).await {
                            Ok(Some(ac_bytes)) => set.record(ac_cid, ac_bytes, Source::AccessController),
                            Ok(None) => {
                                let msg = format!("access controller {ac_cid} not found locally");
                                warn!(cid = %ac_cid, "{msg}");
                                set.warnings.push(msg);
                            }
                            Err(e) => {
                                let msg = format!("failed to read access controller {ac_cid}: {e}");
                                warn!(cid = %ac_cid, error = %e, "failed to read access controller");
                                set.warnings.push(msg);
                            }
                        }
                    }
                }
                Err(e) => {
                    let msg = format!("failed to decode root block {root_cid}: {e}");
                    warn!(cid = %root_cid, error = %e, "failed to decode root block");
                    set.warnings.push(msg);
                }
            }
        }
        Ok(None) => {
            let msg = format!("root block {root_cid} not found locally");
            warn!(cid = %root_cid, "{msg}");
            set.warnings.push(msg);
        }
        Err(e) => {
            let msg = format!("failed to read root block {root_cid}: {e}");
            warn!(cid = %root_cid, error = %e, "failed to read root block");
            set.warnings.push(msg);
        }
    }

    let all_blocks = match store.iter_all().await {
        Ok(blocks) => blocks,
        Err(e) => {
            warn!(error = %e, "failed to scan local block store for identity blocks");
            set.warnings.push(format!("failed to scan local store: {e}"));
            return;
        }
    };

    for (cid, bytes) in all_blocks {
        if set.blocks.contains_key(&cid) {
            continue;
        }
        if cid.codec() != crate::cid_bridge::CODEC_DAG_CBOR {
            continue;
        }
        if let Ok(ipld) = decode_ipld(&bytes) {
            if looks_like_identity(&ipld) {
                set.record(cid, bytes, Source::Identity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeDatabase;

    #[tokio::test]
    async fn full_extraction_includes_root_and_entries() -> anyhow::Result<()> {
        let db = FakeDatabase::event_log("notes", &["e1", "e2", "e3"]).await?;
        let set = extract(&db, &db.blockstore_dyn(), ExtractionMode::Full).await?;

        assert_eq!(set.count(Source::Root), 1);
        assert_eq!(set.count(Source::LogEntry), 3);
        assert_eq!(set.root_cid, Some(db.root_cid()));
        Ok(())
    }

    #[tokio::test]
    async fn log_entries_only_skips_root() -> anyhow::Result<()> {
        let db = FakeDatabase::event_log("notes", &["e1", "e2"]).await?;
        let set = extract(&db, &db.blockstore_dyn(), ExtractionMode::LogEntriesOnly).await?;

        assert_eq!(set.count(Source::Root), 0);
        assert_eq!(set.count(Source::LogEntry), 2);
        Ok(())
    }

    #[tokio::test]
    async fn every_log_entry_next_is_in_the_set_or_is_a_head() -> anyhow::Result<()> {
        let db = FakeDatabase::event_log("notes", &["e1", "e2", "e3"]).await?;
        let set = extract(&db, &db.blockstore_dyn(), ExtractionMode::Full).await?;

        for (cid, source) in &set.sources {
            if *source != Source::LogEntry {
                continue;
            }
            let bytes = &set.blocks[cid];
            let entry: crate::model::LogEntryBlock = serde_ipld_dagcbor::from_slice(bytes)?;
            for parent in entry.next {
                assert!(set.blocks.contains_key(&parent));
            }
        }
        Ok(())
    }
}
