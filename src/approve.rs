//! Decision handling and the exactly-once ledger commit.
//!
//! The queue routes every verdict through the [`DecisionHandler`] contract.
//! [`ApprovalCoordinator`] is the production handler: on APPROVE it
//! re-interprets the record's current body (the authoritative stake set,
//! since the reviewer may have edited it), then, inside a single
//! transaction, claims the terminal transition and writes the whole ledger
//! batch. Either everything lands or nothing does: a failed write rolls the
//! claim back and the record stays reviewable for a retry.

use crate::calc;
use crate::db::{self, Pool, RecordRow};
use crate::error::QueueError;
use crate::lookup::LookupTables;
use crate::model::{DecisionMeta, LedgerEntry, RecordStatus, Verdict};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Sqlite, Transaction};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Outcome of a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub record_id: i64,
    pub status: RecordStatus,
    pub entries_written: usize,
}

/// Contract invoked by the queue for every verdict.
#[async_trait]
pub trait DecisionHandler: Send + Sync {
    async fn decide(
        &self,
        pool: &Pool,
        record: &RecordRow,
        verdict: Verdict,
        meta: &DecisionMeta,
    ) -> Result<Decision, QueueError>;
}

/// Permanent-store seam. The batch is written through an open transaction
/// so the coordinator controls the commit scope; implementations must not
/// commit or roll back themselves.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn write_batch(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        entries: &[LedgerEntry],
    ) -> anyhow::Result<()>;
}

/// Production store: the `ledger_entries` table in the service database.
pub struct SqliteLedger;

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn write_batch(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        entries: &[LedgerEntry],
    ) -> anyhow::Result<()> {
        db::insert_ledger_entries_tx(tx, entries).await
    }
}

pub struct ApprovalCoordinator {
    tables: Arc<LookupTables>,
    store: Arc<dyn LedgerStore>,
}

impl ApprovalCoordinator {
    pub fn new(tables: Arc<LookupTables>, store: Arc<dyn LedgerStore>) -> Self {
        Self { tables, store }
    }

    #[instrument(skip_all, fields(record_id = record.id))]
    async fn approve(
        &self,
        pool: &Pool,
        record: &RecordRow,
        meta: &DecisionMeta,
    ) -> Result<Decision, QueueError> {
        // Re-interpret the current body rather than trusting the stored
        // snapshot; edits must win.
        let breakdown = calc::evaluate(&record.body, self.tables.as_ref());
        if breakdown.stake_count() == 0 {
            return Err(QueueError::EmptyEntries(record.id));
        }

        let customer = meta
            .customer
            .clone()
            .or_else(|| record.customer.clone())
            .unwrap_or_else(|| record.sender_name.clone());
        let bazar = meta
            .bazar
            .clone()
            .or_else(|| record.bazar.clone())
            .unwrap_or_default();
        let entry_date = Utc::now().date_naive();

        let entries: Vec<LedgerEntry> = breakdown
            .lines
            .iter()
            .flat_map(|line| {
                line.stakes.iter().map(|stake| LedgerEntry {
                    record_id: record.id,
                    customer: customer.clone(),
                    bazar: bazar.clone(),
                    code: stake.code.clone(),
                    amount: stake.amount,
                    kind: line.kind,
                    entry_date,
                })
            })
            .collect();

        let mut tx = pool.begin().await?;
        let claimed = db::claim_decided_tx(
            &mut tx,
            record.id,
            RecordStatus::Approved,
            true,
            Some(customer.as_str()),
            Some(bazar.as_str()),
            Utc::now(),
        )
        .await
        .map_err(QueueError::Commit)?;
        if !claimed {
            return Err(QueueError::AlreadyDecided(record.id));
        }

        if let Err(err) = self.store.write_batch(&mut tx, &entries).await {
            warn!(?err, record_id = record.id, "ledger write failed; rolling back");
            return Err(QueueError::Commit(err));
        }
        tx.commit().await?;

        info!(
            record_id = record.id,
            entries = entries.len(),
            total = breakdown.total,
            "approved and committed"
        );
        Ok(Decision {
            record_id: record.id,
            status: RecordStatus::Approved,
            entries_written: entries.len(),
        })
    }

    #[instrument(skip_all, fields(record_id = record.id))]
    async fn reject(&self, pool: &Pool, record: &RecordRow) -> Result<Decision, QueueError> {
        let mut tx = pool.begin().await?;
        let claimed = db::claim_decided_tx(
            &mut tx,
            record.id,
            RecordStatus::Rejected,
            false,
            None,
            None,
            Utc::now(),
        )
        .await
        .map_err(QueueError::Commit)?;
        if !claimed {
            return Err(QueueError::AlreadyDecided(record.id));
        }
        tx.commit().await?;

        info!(record_id = record.id, "rejected");
        Ok(Decision {
            record_id: record.id,
            status: RecordStatus::Rejected,
            entries_written: 0,
        })
    }
}

#[async_trait]
impl DecisionHandler for ApprovalCoordinator {
    async fn decide(
        &self,
        pool: &Pool,
        record: &RecordRow,
        verdict: Verdict,
        meta: &DecisionMeta,
    ) -> Result<Decision, QueueError> {
        match verdict {
            Verdict::Approve => self.approve(pool, record, meta).await,
            Verdict::Reject => self.reject(pool, record).await,
        }
    }
}
