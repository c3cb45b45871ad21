//! The Fallback Reconstructor (`§4.8`): when no root block survived (or the
//! caller forces it), infer a database's kind from its log entries' payload
//! shapes and replay them into a freshly created database.

use libipld::{Cid, Ipld};
use tracing::warn;

use crate::{
    error::{Error, Result},
    logdb::{DatabaseHandle, LogDb, WriteOp},
    model::{DatabaseKind, LogEntryBlock},
    shape::map_get,
};

/// Metadata recorded alongside a reconstructed database, per `§4.8` step 6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructionReport {
    /// The inferred database kind.
    pub kind: DatabaseKind,
    /// How many log-entry blocks were decoded and considered for replay.
    pub original_count: usize,
    /// How many payloads were successfully replayed.
    pub imported_count: usize,
    /// How many payloads failed to replay (`ImportFailure`, `§7`).
    pub import_errors_count: usize,
}

fn op_str(ipld: &Ipld) -> Option<&str> {
    match map_get(ipld, "op") {
        Some(Ipld::String(op)) => Some(op.as_str()),
        _ => None,
    }
}

fn value_of(ipld: &Ipld) -> Option<&Ipld> {
    map_get(ipld, "value")
}

fn key_of(ipld: &Ipld) -> Option<&str> {
    match map_get(ipld, "key") {
        Some(Ipld::String(k)) => Some(k.as_str()),
        _ => None,
    }
}

fn looks_like_document_payload(payload: &Ipld) -> bool {
    match op_str(payload) {
        Some("PUT") => matches!(value_of(payload), Some(Ipld::Map(m)) if m.contains_key("_id")),
        Some("DEL") => key_of(payload).is_some(),
        _ => false,
    }
}

/// Infer a database kind from the payload-shape tallies of a set of decoded
/// log entries (`§4.8` step 2).
pub fn infer_kind(entries: &[LogEntryBlock]) -> DatabaseKind {
    if entries
        .iter()
        .any(|e| matches!(op_str(&e.payload), Some("COUNTER") | Some("DEC")))
    {
        return DatabaseKind::Counter;
    }

    let put_or_del = entries
        .iter()
        .filter(|e| matches!(op_str(&e.payload), Some("PUT") | Some("DEL")))
        .count();
    if put_or_del == 0 {
        return DatabaseKind::EventLog;
    }

    let document_like = entries
        .iter()
        .filter(|e| looks_like_document_payload(&e.payload))
        .count();
    if document_like * 2 > put_or_del {
        return DatabaseKind::Document;
    }

    if put_or_del * 2 > entries.len() {
        return DatabaseKind::KeyValue;
    }

    DatabaseKind::EventLog
}

/// Sort entries ascending by clock time, ties broken by CID string (`§4.8`
/// step 4). `cid_of` must return the same CID for the same entry every call.
fn sort_entries<'a>(mut entries: Vec<(&'a LogEntryBlock, Cid)>) -> Vec<(&'a LogEntryBlock, Cid)> {
    entries.sort_by(|(a, a_cid), (b, b_cid)| {
        a.clock
            .time
            .cmp(&b.clock.time)
            .then_with(|| a_cid.to_string().cmp(&b_cid.to_string()))
    });
    entries
}

fn write_op_for(kind: DatabaseKind, entry: &LogEntryBlock) -> Option<WriteOp> {
    match kind {
        DatabaseKind::EventLog => {
            let value = value_of(&entry.payload).cloned().unwrap_or_else(|| entry.payload.clone());
            Some(WriteOp::Add(value))
        }
        DatabaseKind::Document | DatabaseKind::KeyValue => match op_str(&entry.payload) {
            Some("PUT") => {
                let key = match kind {
                    DatabaseKind::Document => match value_of(&entry.payload) {
                        Some(Ipld::Map(m)) => match m.get("_id") {
                            Some(Ipld::String(id)) => id.clone(),
                            _ => key_of(&entry.payload)?.to_string(),
                        },
                        _ => key_of(&entry.payload)?.to_string(),
                    },
                    _ => key_of(&entry.payload)?.to_string(),
                };
                let value = value_of(&entry.payload).cloned().unwrap_or(Ipld::Null);
                Some(WriteOp::Put { key, value })
            }
            Some("DEL") => Some(WriteOp::Del {
                key: key_of(&entry.payload)?.to_string(),
            }),
            _ => None,
        },
        DatabaseKind::Counter => {
            let amount = match value_of(&entry.payload) {
                Some(Ipld::Integer(n)) => *n as i64,
                _ => 1,
            };
            match op_str(&entry.payload) {
                Some("COUNTER") => Some(WriteOp::Inc { by: amount }),
                Some("DEC") => Some(WriteOp::Inc { by: -amount }),
                _ => None,
            }
        }
    }
}

/// Reconstruct a database from a decoded, unordered set of log entries
/// (`cid`, block) pairs, replaying them in clock order into a fresh
/// database opened through `logdb` (`§4.8`).
///
/// The recreated database's address is never equal to the original's; this
/// is an accepted, signaled loss (`method: fallback-reconstruction`).
pub async fn reconstruct<L: LogDb>(
    logdb: &L,
    name: &str,
    decoded: &[(Cid, LogEntryBlock)],
) -> Result<(L::Handle, ReconstructionReport)> {
    if decoded.is_empty() {
        return Err(Error::ReconstructionEmpty);
    }

    let refs: Vec<(&LogEntryBlock, Cid)> = decoded.iter().map(|(cid, entry)| (entry, *cid)).collect();
    let entries_only: Vec<LogEntryBlock> = refs.iter().map(|(e, _)| (*e).clone()).collect();
    let kind = infer_kind(&entries_only);

    let handle = logdb
        .open_by_name(name, kind)
        .await
        .map_err(Error::OpenFailed)?;

    let ordered = sort_entries(refs);
    let mut imported = 0usize;
    let mut errors = 0usize;

    for (entry, cid) in &ordered {
        match write_op_for(kind, entry) {
            Some(op) => match handle.apply(op).await {
                Ok(()) => imported += 1,
                Err(e) => {
                    warn!(cid = %cid, error = %e, "fallback replay failed for entry");
                    errors += 1;
                }
            },
            None => {
                warn!(cid = %cid, "fallback replay: payload didn't match inferred kind's shape");
                errors += 1;
            }
        }
    }

    Ok((
        handle,
        ReconstructionReport {
            kind,
            original_count: decoded.len(),
            imported_count: imported,
            import_errors_count: errors,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeDatabase, FakeLogDb};

    async fn decode_entries(db: &FakeDatabase) -> anyhow::Result<Vec<(Cid, LogEntryBlock)>> {
        let store = db.blockstore_dyn();
        let mut out = Vec::new();
        for cid in db.log_entry_hashes().await? {
            let bytes = store.get_block(&cid).await?.unwrap();
            out.push((cid, serde_ipld_dagcbor::from_slice(&bytes)?));
        }
        Ok(out)
    }

    #[tokio::test]
    async fn reconstructs_event_log_in_clock_order() -> anyhow::Result<()> {
        let db = FakeDatabase::event_log("notes", &["e1", "e2", "e3"]).await?;
        let decoded = decode_entries(&db).await?;

        let logdb = FakeLogDb::new();
        let (handle, report) = reconstruct(&logdb, "restored-notes", &decoded).await?;

        assert_eq!(report.kind, DatabaseKind::EventLog);
        assert_eq!(report.imported_count, 3);
        assert_eq!(report.import_errors_count, 0);
        assert_ne!(handle.address(), db.address());

        let applied = handle.applied_ops().await;
        assert_eq!(
            applied,
            vec![
                WriteOp::Add(Ipld::String("e1".into())),
                WriteOp::Add(Ipld::String("e2".into())),
                WriteOp::Add(Ipld::String("e3".into())),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn reconstructs_key_value_puts_and_deletes() -> anyhow::Result<()> {
        let db = FakeDatabase::key_value(
            "settings",
            &[("greeting", Some("hi")), ("scratch", Some("x")), ("scratch", None)],
        )
        .await?;
        let decoded = decode_entries(&db).await?;

        let logdb = FakeLogDb::new();
        let (_, report) = reconstruct(&logdb, "restored-settings", &decoded).await?;
        assert_eq!(report.kind, DatabaseKind::KeyValue);
        assert_eq!(report.imported_count, 3);
        Ok(())
    }

    #[tokio::test]
    async fn reconstructs_documents_by_id() -> anyhow::Result<()> {
        let db = FakeDatabase::document("people", &[("c1", Some("Alice")), ("c2", Some("Bob"))]).await?;
        let decoded = decode_entries(&db).await?;

        let logdb = FakeLogDb::new();
        let (handle, report) = reconstruct(&logdb, "restored-people", &decoded).await?;
        assert_eq!(report.kind, DatabaseKind::Document);

        let applied = handle.applied_ops().await;
        assert!(matches!(&applied[0], WriteOp::Put { key, .. } if key == "c1"));
        assert!(matches!(&applied[1], WriteOp::Put { key, .. } if key == "c2"));
        Ok(())
    }

    #[tokio::test]
    async fn reconstructs_counter_with_signed_deltas() -> anyhow::Result<()> {
        let db = FakeDatabase::counter("hits", &[5, -2, 3]).await?;
        let decoded = decode_entries(&db).await?;

        let logdb = FakeLogDb::new();
        let (handle, report) = reconstruct(&logdb, "restored-hits", &decoded).await?;
        assert_eq!(report.kind, DatabaseKind::Counter);

        let applied = handle.applied_ops().await;
        assert_eq!(
            applied,
            vec![
                WriteOp::Inc { by: 5 },
                WriteOp::Inc { by: -2 },
                WriteOp::Inc { by: 3 },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_entry_set_is_fatal() {
        let logdb = FakeLogDb::new();
        let result = reconstruct(&logdb, "empty", &[]).await;
        assert!(matches!(result, Err(Error::ReconstructionEmpty)));
    }

    #[tokio::test]
    async fn idempotent_across_two_runs() -> anyhow::Result<()> {
        let db = FakeDatabase::event_log("notes", &["e1", "e2"]).await?;
        let decoded = decode_entries(&db).await?;

        let first_logdb = FakeLogDb::new();
        let (first, _) = reconstruct(&first_logdb, "restored-a", &decoded).await?;

        let second_logdb = FakeLogDb::new();
        let (second, _) = reconstruct(&second_logdb, "restored-b", &decoded).await?;

        assert_eq!(first.applied_ops().await, second.applied_ops().await);
        Ok(())
    }
}
