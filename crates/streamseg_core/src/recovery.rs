//! Rebuilds segment state from the operation log on open.
//!
//! Replay starts at the newest checkpoint ledger (or the first record when
//! the log has never been checkpointed) and folds every record into a fresh
//! table with the same `apply` used by live writes. Append payloads go back
//! into the cache because they may not have reached the tier yet.
//!
//! The table is then reconciled with the tier, whose progress is not
//! logged:
//!
//! 1. A pending merge whose parent object already covers the merged range
//!    was concatenated before the crash and is finished. A batch object
//!    left behind by an interrupted concat is deleted.
//! 2. Every segment's storage length is raised to its tier object length,
//!    but never past the start of its first pending merge.
//!
//! Any replay failure is container fatal. It is logged with `error!` and
//! returned; nothing after the failing record is applied.

use crate::cache::ReadCache;
use crate::error::{CoreError, CoreResult};
use crate::log::DurableLog;
use crate::operation::Operation;
use crate::state::{PendingMerge, SegmentStateTable};
use crate::storage_writer::finish_merge;
use crate::types::{SegmentId, SequenceNumber};
use streamseg_storage::LongTermStorage;
use tracing::{error, info, warn};

/// Summary of a recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Sequence number replay started from.
    pub replayed_from: SequenceNumber,
    /// Records applied.
    pub records_replayed: u64,
    /// Merges found already concatenated in the tier.
    pub merges_finished: usize,
}

/// Replays the log into a new table and reconciles it against the tier.
pub(crate) async fn recover(
    log: &DurableLog,
    tier: &dyn LongTermStorage,
    cache: &ReadCache,
) -> CoreResult<(SegmentStateTable, RecoveryStats)> {
    let from = log.latest_checkpoint().unwrap_or(SequenceNumber::FIRST);
    let mut table = SegmentStateTable::new();
    let mut replayed = 0u64;

    for item in log.read_from(from)? {
        let (seq, op) = item.inspect_err(|e| {
            error!(error = %e, "log replay stopped on unreadable record");
        })?;
        if let Err(e) = table.apply(&op) {
            error!(sequence = seq.as_u64(), operation = op.operation_type().name(), error = %e, "log replay failed");
            return Err(if e.is_fatal() {
                e
            } else {
                CoreError::log_corruption(format!("{seq} cannot be applied: {e}"))
            });
        }
        if let Operation::Append(append) = &op {
            cache.put(append.segment_id(), append.offset(), append.data().clone());
        }
        replayed += 1;
    }

    let merges_finished = finish_concatenated_merges(&mut table, tier, cache).await?;
    reconcile_storage_lengths(&mut table, tier).await?;

    let ids: Vec<SegmentId> = table.iter().map(|s| s.id).collect();
    for id in ids {
        if let Some(state) = table.get(id) {
            cache.mark_flushed(id, state.storage_length);
            cache.truncate_before(id, state.start_offset.min(state.storage_length));
        }
    }

    let stats = RecoveryStats {
        replayed_from: from,
        records_replayed: replayed,
        merges_finished,
    };
    info!(
        from = from.as_u64(),
        records = replayed,
        segments = table.len(),
        merges_finished,
        "recovery complete"
    );
    Ok((table, stats))
}

async fn finish_concatenated_merges(
    table: &mut SegmentStateTable,
    tier: &dyn LongTermStorage,
    cache: &ReadCache,
) -> CoreResult<usize> {
    let candidates: Vec<(SegmentId, String, Vec<(PendingMerge, String)>)> = table
        .iter()
        .filter(|s| !s.pending_merges.is_empty())
        .map(|parent| {
            let merges = parent
                .pending_merges
                .iter()
                .filter_map(|m| table.get(m.batch).map(|b| (*m, b.name.clone())))
                .collect();
            (parent.id, parent.name.clone(), merges)
        })
        .collect();

    let mut finished = 0;
    for (parent, parent_name, merges) in candidates {
        let parent_length = tier.length(&parent_name).await?.unwrap_or(0);
        for (merge, batch_name) in merges {
            if parent_length < merge.end() {
                break;
            }
            if tier.length(&batch_name).await?.is_some() {
                warn!(parent = %parent, batch = %merge.batch, "removing batch object left by an interrupted concat");
                tier.delete(&batch_name).await?;
            }
            finish_merge(table, cache, parent, merge);
            finished += 1;
        }
    }
    Ok(finished)
}

async fn reconcile_storage_lengths(
    table: &mut SegmentStateTable,
    tier: &dyn LongTermStorage,
) -> CoreResult<()> {
    let segments: Vec<(SegmentId, String, u64, Option<u64>)> = table
        .iter()
        .map(|s| {
            let merge_start = s.pending_merges.first().map(|m| m.offset);
            (s.id, s.name.clone(), s.storage_length, merge_start)
        })
        .collect();
    for (id, name, recorded, merge_start) in segments {
        let mut actual = tier.length(&name).await?.unwrap_or(0);
        if actual < recorded {
            error!(segment = %id, name, recorded, actual, "tier object is shorter than checkpointed storage length");
            return Err(CoreError::invalid_operation(format!(
                "tier object {name} has {actual} bytes but {recorded} were flushed"
            )));
        }
        if let Some(limit) = merge_start.filter(|&limit| actual > limit) {
            error!(segment = %id, actual, limit, "tier object extends into a pending merge");
            actual = limit;
        }
        if actual > recorded {
            warn!(segment = %id, recorded, actual, "storage length advanced past checkpoint");
            table.set_storage_length(id, actual);
        }
    }
    Ok(())
}
