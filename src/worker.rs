//! The block-ingestion worker: drains the shared work queue, parses
//! each block and writes deduplicated rows.
//!
//! Several workers share one database and will race on the same
//! derived rows. Every row write is a check-then-insert under its own
//! savepoint, so a lost race rolls back one row and the unique index
//! stays the final arbiter; the outer transaction commits on a cadence
//! to amortise fsync cost.

use crate::blocks::Block;
use crate::counters::IngestCounters;
use crate::db::{CidrRecord, DbEntity, ParentRecord, is_unique_violation};
use crate::error::WhoisDbError;
use crate::parser::{last_modified_from_changed, parse_cidrs, parse_property, parse_properties};
use async_channel::Receiver;
use log::{debug, error, info};
use sqlx::{Acquire, PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Instant;

/// Everything the write loop needs, lifted out of a raw block.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParsedBlock {
    /// The advertised range, normalised to one or more prefixes.
    pub cidrs: Vec<String>,
    /// `"inetnum"` when the block is named, `"route"` otherwise.
    pub attr: String,
    /// The declared `netname:`, or the first prefix for route objects.
    pub netname: String,
    /// Originating AS number; empty when the block has no `origin:`.
    pub autnum: String,
    pub description: Option<String>,
    pub remarks: Option<String>,
    pub country: Option<String>,
    pub status: Option<String>,
    pub source: Option<String>,
    pub created: Option<String>,
    pub last_modified: Option<String>,
    /// Maintainers, stored as inverse keys.
    pub mnt_by: Vec<String>,
    /// Notify addresses, stored as local keys.
    pub notify: Vec<String>,
}

impl ParsedBlock {
    /// Parse a raw block. `None` when it carries no usable range, in
    /// which case the block only counts towards the skip total.
    pub fn from_block(block: &[u8]) -> Option<ParsedBlock> {
        let cidrs = parse_cidrs(block);
        if cidrs.is_empty() {
            return None;
        }
        let (netname, attr) = match parse_property(block, "netname") {
            Some(netname) => (netname, "inetnum".to_string()),
            None => (cidrs[0].clone(), "route".to_string()),
        };
        let last_modified = parse_property(block, "last-modified").or_else(|| {
            parse_property(block, "changed")
                .and_then(|changed| last_modified_from_changed(&changed))
        });
        Some(ParsedBlock {
            cidrs,
            attr,
            netname,
            autnum: parse_property(block, "origin").unwrap_or_default(),
            description: parse_property(block, "descr"),
            remarks: parse_property(block, "remarks"),
            country: parse_property(block, "country"),
            status: parse_property(block, "status"),
            source: parse_property(block, "cust_source"),
            created: parse_property(block, "created"),
            last_modified,
            mnt_by: parse_properties(block, "mnt-by"),
            notify: parse_properties(block, "notify"),
        })
    }

    /// The `cidr` row this block produces for one of its prefixes.
    pub fn cidr_record(&self, cidr: &str) -> CidrRecord {
        CidrRecord {
            inetnum: cidr.to_string(),
            autnum: self.autnum.clone(),
            attr: self.attr.clone(),
            netname: Some(self.netname.clone()),
            country: self.country.clone(),
            description: self.description.clone(),
            remarks: self.remarks.clone(),
            status: self.status.clone(),
            source: self.source.clone(),
            created: self.created.clone(),
            last_modified: self.last_modified.clone(),
        }
    }
}

/// Worker-local tallies, reported at every commit and at exit.
#[derive(Debug, Default)]
pub(crate) struct WorkerStats {
    pub inserts: u64,
    pub dupes: u64,
    pub rollbacks: u64,
    pub parent_inserts: u64,
    pub parent_dupes: u64,
    pub parent_rollbacks: u64,
    pub blocks_processed: u64,
    pub blocks_skipped: u64,
}

impl WorkerStats {
    fn summary(&self) -> String {
        format!(
            "{}/{}/{} inserts/dupes/rollbacks + {}/{}/{} parent inserts/dupes/rollbacks, {} blocks ({} skipped)",
            self.inserts,
            self.dupes,
            self.rollbacks,
            self.parent_inserts,
            self.parent_dupes,
            self.parent_rollbacks,
            self.blocks_processed,
            self.blocks_skipped
        )
    }
}

/// Tracks successful inserts and arms a commit whenever the count
/// crosses a cadence boundary; the commit itself happens at the next
/// block boundary.
#[derive(Debug)]
pub(crate) struct CommitClock {
    counter: u64,
    armed: bool,
    commit_count: u64,
}

impl CommitClock {
    pub fn new(commit_count: u64) -> Self {
        Self {
            counter: 0,
            armed: false,
            commit_count,
        }
    }

    pub fn record_insert(&mut self) {
        if !self.armed && self.counter % self.commit_count == 0 {
            self.armed = true;
        }
        self.counter += 1;
    }

    pub fn should_commit(&self) -> bool {
        self.armed
    }

    pub fn reset(&mut self) {
        self.armed = false;
    }
}

/// What became of one row write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum StoreOutcome {
    Inserted,
    /// The check found the row already there.
    Duplicate,
    /// The check missed it but the unique index caught it: a peer
    /// worker got there first.
    LostRace,
    Failed,
}

/// Check-then-insert one `cidr` row under its own savepoint. The
/// lookup runs inside the savepoint too, so a statement error cannot
/// poison the outer transaction.
pub(crate) async fn store_cidr(
    tx: &mut Transaction<'static, Postgres>,
    record: &CidrRecord,
) -> StoreOutcome {
    let mut savepoint = match tx.begin().await {
        Ok(savepoint) => savepoint,
        Err(err) => {
            error!("Failed to open savepoint for cidr row: {err:?}");
            return StoreOutcome::Failed;
        }
    };
    match CidrRecord::get_by_key(&mut savepoint, &record.inetnum, &record.autnum).await {
        Ok(Some(_)) => {
            let _ = savepoint.commit().await;
            return StoreOutcome::Duplicate;
        }
        Ok(None) => {}
        // Leave the insert to fail the same way; the savepoint
        // rollback below cleans up either way.
        Err(err) => debug!(
            "cidr lookup failed (inetnum='{}', autnum='{}'): {err:?}",
            record.inetnum, record.autnum
        ),
    }
    match record.save_with_txn(&mut savepoint).await {
        Ok(()) => match savepoint.commit().await {
            Ok(()) => StoreOutcome::Inserted,
            Err(err) => {
                error!(
                    "Failed to release savepoint (inetnum='{}', autnum='{}'): {err:?}",
                    record.inetnum, record.autnum
                );
                StoreOutcome::Failed
            }
        },
        Err(WhoisDbError::Sqlx(err)) if is_unique_violation(&err) => {
            let _ = savepoint.rollback().await;
            debug!(
                "duplicate cidr row lost to a peer (inetnum='{}', autnum='{}')",
                record.inetnum, record.autnum
            );
            StoreOutcome::LostRace
        }
        Err(err) => {
            let _ = savepoint.rollback().await;
            error!(
                "Failed to insert cidr row (inetnum='{}', autnum='{}', netname='{:?}'): {err:?}",
                record.inetnum, record.autnum, record.netname
            );
            StoreOutcome::Failed
        }
    }
}

/// Check-then-insert one `parent` edge, same savepoint discipline as
/// [`store_cidr`].
pub(crate) async fn store_parent(
    tx: &mut Transaction<'static, Postgres>,
    edge: &ParentRecord,
) -> StoreOutcome {
    let mut savepoint = match tx.begin().await {
        Ok(savepoint) => savepoint,
        Err(err) => {
            error!("Failed to open savepoint for parent row: {err:?}");
            return StoreOutcome::Failed;
        }
    };
    match ParentRecord::get_by_key(
        &mut savepoint,
        &edge.parent,
        &edge.parent_type,
        &edge.child,
        &edge.child_type,
    )
    .await
    {
        Ok(Some(_)) => {
            let _ = savepoint.commit().await;
            return StoreOutcome::Duplicate;
        }
        Ok(None) => {}
        Err(err) => debug!("parent lookup failed ({edge:?}): {err:?}"),
    }
    match edge.save_with_txn(&mut savepoint).await {
        Ok(()) => match savepoint.commit().await {
            Ok(()) => StoreOutcome::Inserted,
            Err(err) => {
                error!("Failed to release savepoint ({edge:?}): {err:?}");
                StoreOutcome::Failed
            }
        },
        Err(WhoisDbError::Sqlx(err)) if is_unique_violation(&err) => {
            let _ = savepoint.rollback().await;
            debug!(
                "duplicate parent row lost to a peer: ('{}','{}','{}','{}')",
                edge.parent, edge.parent_type, edge.child, edge.child_type
            );
            StoreOutcome::LostRace
        }
        Err(err) => {
            let _ = savepoint.rollback().await;
            error!(
                "Failed to insert parent row ('{}','{}','{}','{}'): {err:?}",
                edge.parent, edge.parent_type, edge.child, edge.child_type
            );
            StoreOutcome::Failed
        }
    }
}

/// Write every row one parsed block produces: one `cidr` row per
/// prefix, inverse-key edges for its maintainers and local-key edges
/// for its notify addresses.
pub(crate) async fn write_block(
    tx: &mut Transaction<'static, Postgres>,
    parsed: &ParsedBlock,
    stats: &mut WorkerStats,
    counters: &IngestCounters,
    clock: &mut CommitClock,
) {
    for cidr in &parsed.cidrs {
        let record = parsed.cidr_record(cidr);
        match store_cidr(tx, &record).await {
            StoreOutcome::Inserted => {
                stats.inserts += 1;
                clock.record_insert();
            }
            StoreOutcome::Duplicate => stats.dupes += 1,
            StoreOutcome::LostRace => {
                stats.rollbacks += 1;
                counters.duplicates.increment();
            }
            StoreOutcome::Failed => stats.rollbacks += 1,
        }
    }

    for (parent_type, parents) in [("mntner", &parsed.mnt_by)] {
        for parent in parents {
            let edge = ParentRecord {
                parent: parent.clone(),
                parent_type: parent_type.to_string(),
                child: parsed.netname.clone(),
                child_type: parsed.attr.clone(),
            };
            match store_parent(tx, &edge).await {
                StoreOutcome::Inserted => stats.parent_inserts += 1,
                StoreOutcome::Duplicate => stats.parent_dupes += 1,
                StoreOutcome::LostRace | StoreOutcome::Failed => stats.parent_rollbacks += 1,
            }
        }
    }

    for (child_type, children) in [("e-mail", &parsed.notify)] {
        for child in children {
            let edge = ParentRecord {
                parent: parsed.netname.clone(),
                parent_type: parsed.attr.clone(),
                child: child.clone(),
                child_type: child_type.to_string(),
            };
            match store_parent(tx, &edge).await {
                StoreOutcome::Inserted => stats.parent_inserts += 1,
                StoreOutcome::Duplicate => stats.parent_dupes += 1,
                StoreOutcome::LostRace | StoreOutcome::Failed => stats.parent_rollbacks += 1,
            }
        }
    }
}

/// Worker main loop: pull blocks until the sentinel arrives, commit on
/// the cadence, commit once more on the way out.
pub async fn parse_blocks(
    worker_id: usize,
    jobs: Receiver<Option<Block>>,
    pool: PgPool,
    counters: Arc<IngestCounters>,
    commit_count: u64,
    num_blocks: u64,
) -> Result<(), WhoisDbError> {
    let mut stats = WorkerStats::default();
    let mut clock = CommitClock::new(commit_count.max(1));
    let mut tx = pool.begin().await?;
    let started = Instant::now();

    while let Ok(job) = jobs.recv().await {
        let Some(block) = job else {
            debug!("worker {worker_id}: end of blocks");
            break;
        };
        let Some(parsed) = ParsedBlock::from_block(&block) else {
            stats.blocks_skipped += 1;
            counters.blocks_skipped.increment();
            continue;
        };

        write_block(&mut tx, &parsed, &mut stats, &counters, &mut clock).await;

        stats.blocks_processed += 1;
        counters.blocks_processed.increment();

        if clock.should_commit() {
            clock.reset();
            match tx.commit().await {
                Ok(()) => {
                    let percent =
                        (counters.blocks_processed.value() * 100 / num_blocks.max(1)).min(100);
                    let rate = stats.inserts as f64 / started.elapsed().as_secs_f64().max(1e-9);
                    info!(
                        "worker {worker_id}: committed {} - {percent}% done ({rate:.0} inserts/s)",
                        stats.summary()
                    );
                }
                Err(err) => error!("worker {worker_id}: commit failed: {err:?}"),
            }
            tx = pool.begin().await?;
        }
    }

    if let Err(err) = tx.commit().await {
        error!("worker {worker_id}: final commit failed: {err:?}");
    }
    info!("worker {worker_id}: done {}", stats.summary());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_block_becomes_inetnum_record() {
        let block = b"inetnum: 192.0.2.0 - 192.0.2.127\nnetname: EX1\norigin: AS64500\nmnt-by: MNT-EX\ncust_source: arin\n";
        let parsed = ParsedBlock::from_block(block).expect("block should parse");
        assert_eq!(parsed.cidrs, vec!["192.0.2.0/25"]);
        assert_eq!(parsed.attr, "inetnum");
        assert_eq!(parsed.netname, "EX1");
        assert_eq!(parsed.autnum, "AS64500");
        assert_eq!(parsed.source.as_deref(), Some("arin"));
        assert_eq!(parsed.mnt_by, vec!["MNT-EX"]);
    }

    #[test]
    fn test_route_without_netname_names_itself() {
        let block = b"route: 10.0.0.0/8\norigin: AS65000\nmnt-by: MNT-A\ncust_source: ripe\n";
        let parsed = ParsedBlock::from_block(block).expect("block should parse");
        assert_eq!(parsed.attr, "route");
        assert_eq!(parsed.netname, "10.0.0.0/8");
        let record = parsed.cidr_record(&parsed.cidrs[0]);
        assert_eq!(record.inetnum, "10.0.0.0/8");
        assert_eq!(record.netname.as_deref(), Some("10.0.0.0/8"));
        assert_eq!(record.attr, "route");
    }

    #[test]
    fn test_truncated_inetnum_is_padded() {
        let block = b"inetnum: 177.46.7/24\nnetname: LAC1\ncust_source: lacnic\n";
        let parsed = ParsedBlock::from_block(block).expect("block should parse");
        assert_eq!(parsed.cidrs, vec!["177.46.7.0/24"]);
        assert_eq!(parsed.attr, "inetnum");
        assert_eq!(parsed.autnum, "");
    }

    #[test]
    fn test_block_without_range_is_skipped() {
        let block = b"person: Jan Janssen\nnic-hdl: JJ1-RIPE\n";
        assert!(ParsedBlock::from_block(block).is_none());
    }

    #[test]
    fn test_changed_fallback_fills_last_modified() {
        let block =
            b"inetnum: 10.1.0.0/16\nnetname: N1\nchanged: x@y.com 20220310\ncust_source: ripe\n";
        let parsed = ParsedBlock::from_block(block).expect("block should parse");
        assert_eq!(parsed.last_modified.as_deref(), Some("2022-3-10"));
    }

    #[test]
    fn test_bad_changed_date_leaves_last_modified_empty() {
        let block =
            b"inetnum: 10.1.0.0/16\nnetname: N1\nchanged: x@y.com badstring\ncust_source: ripe\n";
        let parsed = ParsedBlock::from_block(block).expect("block should parse");
        assert_eq!(parsed.last_modified, None);
    }

    #[test]
    fn test_last_modified_wins_over_changed() {
        let block = b"inetnum: 10.1.0.0/16\nnetname: N1\nlast-modified: 2023-01-02T03:04:05Z\nchanged: x@y.com 20220310\n";
        let parsed = ParsedBlock::from_block(block).expect("block should parse");
        assert_eq!(parsed.last_modified.as_deref(), Some("2023-01-02T03:04:05Z"));
    }

    #[test]
    fn test_hyphenated_maintainers_stay_whole() {
        let block = b"route: 10.0.0.0/8\nmnt-by: MNT-IEVOL, MNT-CLOUD14\n";
        let parsed = ParsedBlock::from_block(block).expect("block should parse");
        assert_eq!(parsed.mnt_by, vec!["MNT-IEVOL", "MNT-CLOUD14"]);
    }

    #[test]
    fn test_commit_clock_arms_on_first_insert() {
        let mut clock = CommitClock::new(10_000);
        assert!(!clock.should_commit());
        clock.record_insert();
        assert!(clock.should_commit());
        clock.reset();
        assert!(!clock.should_commit());
    }

    #[test]
    fn test_commit_clock_arms_on_cadence_boundary() {
        let mut clock = CommitClock::new(100);
        clock.record_insert();
        clock.reset();
        for _ in 0..99 {
            clock.record_insert();
        }
        // 100 inserts so far; the next one crosses the boundary.
        assert!(!clock.should_commit());
        clock.record_insert();
        assert!(clock.should_commit());
    }
}
