//! The Root Selector (`§4.7`): when a remote container holds more than one
//! database's blocks, pick the root actually referenced by the downloaded
//! log entries.

use std::collections::HashSet;

use libipld::Cid;
use tracing::warn;

use crate::{analyze::Analysis, cid_bridge::format_address, model::LogEntryBlock};

/// Pick the best root candidate out of an analysis, given the raw bytes of
/// every log-entry block (needed to read each entry's `id` address field).
///
/// Returns `None` only when there are no root candidates at all; a
/// candidate list with no referenced member still returns the first
/// candidate, with a warning, per `§4.7` step 4.
pub fn select_root(
    analysis: &Analysis,
    log_entry_bytes: impl Fn(&Cid) -> Option<bytes::Bytes>,
    scheme: &str,
) -> Option<Cid> {
    if analysis.roots.is_empty() {
        return None;
    }
    if analysis.roots.len() == 1 {
        return Some(analysis.roots[0]);
    }

    let referenced: HashSet<Cid> = analysis
        .log_entries
        .iter()
        .filter_map(|cid| log_entry_bytes(cid))
        .filter_map(|bytes| serde_ipld_dagcbor::from_slice::<LogEntryBlock>(&bytes).ok())
        .filter_map(|entry| crate::cid_bridge::parse_address(&entry.id).ok())
        .collect();

    let scored = analysis
        .roots
        .iter()
        .find(|root| referenced.contains(root))
        .copied();

    if let Some(root) = scored {
        return Some(root);
    }

    let address_hint = analysis
        .roots
        .first()
        .and_then(|root| format_address(scheme, root).ok())
        .unwrap_or_default();
    warn!(candidates = analysis.roots.len(), %address_hint, "no root candidate is referenced by any log entry, falling back to first-seen");
    analysis.roots.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analyze::analyze,
        blockstore::LocalBlockStore,
        logdb::DatabaseHandle,
        test_utils::FakeDatabase,
    };
    use std::collections::HashMap;

    #[tokio::test]
    async fn single_candidate_is_returned_without_scoring() -> anyhow::Result<()> {
        let db = FakeDatabase::event_log("notes", &["e1"]).await?;
        let blocks = db.blockstore_dyn().iter_all().await?;
        let analysis = analyze(&blocks);
        let by_cid: HashMap<Cid, bytes::Bytes> = blocks.into_iter().collect();

        let picked = select_root(&analysis, |cid| by_cid.get(cid).cloned(), "orbitdb");
        assert_eq!(picked, Some(db.root_cid()));
        Ok(())
    }

    #[tokio::test]
    async fn picks_the_root_referenced_by_log_entries() -> anyhow::Result<()> {
        let referenced_db = FakeDatabase::event_log("real", &["e1", "e2"]).await?;
        let unrelated_db = FakeDatabase::event_log("unrelated", &["u1"]).await?;

        // Only the unrelated database's root block made it into this
        // container's snapshot, not its log entries — as if another
        // database's manifest alone had been backed up alongside this one.
        let mut blocks = referenced_db.blockstore_dyn().iter_all().await?;
        let unrelated_root_bytes = unrelated_db
            .blockstore_dyn()
            .get_block(&unrelated_db.root_cid())
            .await?
            .unwrap();
        blocks.push((unrelated_db.root_cid(), unrelated_root_bytes));

        let analysis = analyze(&blocks);
        assert_eq!(analysis.roots.len(), 2);

        let by_cid: HashMap<Cid, bytes::Bytes> = blocks.into_iter().collect();
        let picked = select_root(&analysis, |cid| by_cid.get(cid).cloned(), "orbitdb");
        assert_eq!(picked, Some(referenced_db.root_cid()));
        Ok(())
    }

    #[test]
    fn no_candidates_returns_none() {
        let analysis = Analysis::default();
        let picked = select_root(&analysis, |_| None, "orbitdb");
        assert_eq!(picked, None);
    }
}
