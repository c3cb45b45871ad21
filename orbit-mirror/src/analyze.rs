//! The Block Analyzer (`§4.6`): classifies every newly-stored block and
//! builds the reverse edge map the Root Selector and Fallback Reconstructor
//! both need.

use std::collections::HashMap;

use bytes::Bytes;
use libipld::Cid;

use crate::{
    cid_bridge::CODEC_DAG_CBOR,
    model::Source,
    shape::{classify, decode_ipld},
};

/// The result of analyzing a populated local block store: every block's
/// classification, the parent-of-a-head reverse edge map, and the head set.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Every CBOR block seen, classified by shape.
    pub sources: HashMap<Cid, Source>,
    /// Root candidates, in the order they were first seen.
    pub roots: Vec<Cid>,
    /// Log-entry CIDs, in the order they were first seen.
    pub log_entries: Vec<Cid>,
    /// `parent[child] = entry` for every `entry.next` edge.
    pub parents: HashMap<Cid, Cid>,
}

impl Analysis {
    /// A log-entry CID is a head if nothing else's `next` references it.
    pub fn heads(&self) -> Vec<Cid> {
        self.log_entries
            .iter()
            .copied()
            .filter(|cid| !self.parents.contains_key(cid))
            .collect()
    }
}

/// Analyze every `(cid, bytes)` pair in `blocks` (typically every block just
/// written by the Download Pipeline). Non-CBOR blocks and blocks that fail
/// to decode are classified as `Source::Unknown` without aborting the scan.
pub fn analyze(blocks: &[(Cid, Bytes)]) -> Analysis {
    let mut analysis = Analysis::default();

    for (cid, bytes) in blocks {
        let source = if cid.codec() != CODEC_DAG_CBOR {
            Source::Unknown
        } else {
            decode_ipld(bytes).map(|ipld| classify(&ipld)).unwrap_or(Source::Unknown)
        };

        analysis.sources.insert(*cid, source);
        match source {
            Source::Root => analysis.roots.push(*cid),
            Source::LogEntry => analysis.log_entries.push(*cid),
            _ => {}
        }
    }

    for (cid, bytes) in blocks {
        if analysis.sources.get(cid) != Some(&Source::LogEntry) {
            continue;
        }
        let Ok(entry) = serde_ipld_dagcbor::from_slice::<crate::model::LogEntryBlock>(bytes) else {
            continue;
        };
        for parent in entry.next {
            analysis.parents.insert(parent, *cid);
        }
    }

    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{blockstore::LocalBlockStore, logdb::DatabaseHandle, test_utils::FakeDatabase};

    #[tokio::test]
    async fn classifies_root_and_entries_and_finds_single_head() -> anyhow::Result<()> {
        let db = FakeDatabase::event_log("notes", &["e1", "e2", "e3"]).await?;
        let store = db.blockstore_dyn();
        let blocks = store.iter_all().await?;

        let analysis = analyze(&blocks);
        assert_eq!(analysis.roots.len(), 1);
        assert_eq!(analysis.log_entries.len(), 3);
        assert_eq!(analysis.roots[0], db.root_cid());

        let heads = analysis.heads();
        assert_eq!(heads.len(), 1);
        let entry_hashes = db.log_entry_hashes().await?;
        assert_eq!(heads[0], *entry_hashes.last().unwrap());
        Ok(())
    }

    #[tokio::test]
    async fn empty_database_has_no_roots_or_heads() -> anyhow::Result<()> {
        let db = FakeDatabase::empty("empty", crate::model::DatabaseKind::EventLog).await?;
        let store = db.blockstore_dyn();
        let blocks = store.iter_all().await?;
        let analysis = analyze(&blocks);
        assert_eq!(analysis.roots.len(), 1);
        assert!(analysis.log_entries.is_empty());
        assert!(analysis.heads().is_empty());
        Ok(())
    }
}
