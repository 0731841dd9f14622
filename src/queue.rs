//! Concurrency-safe staging store for slips awaiting review.
//!
//! Reads are plain snapshots and run concurrently with everything else.
//! Mutations on a single record (`update`, `decide`) are serialized through
//! a per-id async lock so no interleaving can produce two terminal
//! transitions or two ledger commits for the same record.

use crate::approve::{Decision, DecisionHandler};
use crate::calc;
use crate::db::{self, Pool, RecordFilter, RecordRow};
use crate::error::QueueError;
use crate::lookup::LookupTables;
use crate::model::{DecisionMeta, LineError, RawMessage, Verdict};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, instrument};

/// Result of staging one message.
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub id: i64,
    pub total: i64,
    pub stake_count: usize,
    pub errors: Vec<LineError>,
}

/// Bounded, time-windowed cache of recent fingerprints. Lookups are
/// synchronous; expired entries are evicted on the way in.
struct DedupCache {
    window: Duration,
    order: VecDeque<(Instant, String)>,
    seen: HashMap<String, Instant>,
}

impl DedupCache {
    fn new(window: Duration) -> Self {
        Self {
            window,
            order: VecDeque::new(),
            seen: HashMap::new(),
        }
    }

    /// Record `fingerprint` at `now`. Returns false when an unexpired
    /// duplicate is present.
    fn observe(&mut self, fingerprint: &str, now: Instant) -> bool {
        while let Some((seen_at, _)) = self.order.front() {
            if now.duration_since(*seen_at) < self.window {
                break;
            }
            let (_, expired) = self.order.pop_front().expect("front checked above");
            // Only drop the map entry if it wasn't refreshed since.
            if self
                .seen
                .get(&expired)
                .is_some_and(|at| now.duration_since(*at) >= self.window)
            {
                self.seen.remove(&expired);
            }
        }

        if let Some(seen_at) = self.seen.get(fingerprint) {
            if now.duration_since(*seen_at) < self.window {
                return false;
            }
        }
        self.seen.insert(fingerprint.to_string(), now);
        self.order.push_back((now, fingerprint.to_string()));
        true
    }
}

pub struct PendingQueue {
    pool: Pool,
    tables: Arc<LookupTables>,
    handler: Arc<dyn DecisionHandler>,
    dedup: Mutex<DedupCache>,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl PendingQueue {
    pub fn new(
        pool: Pool,
        tables: Arc<LookupTables>,
        handler: Arc<dyn DecisionHandler>,
        dedup_window: Duration,
    ) -> Self {
        Self {
            pool,
            tables,
            handler,
            dedup: Mutex::new(DedupCache::new(dedup_window)),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn record_lock(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks.entry(id).or_default().clone()
    }

    /// Stage an inbound message. The body is interpreted eagerly so the
    /// breakdown is available for display immediately; line failures do not
    /// block staging, they are stored alongside for correction.
    #[instrument(skip_all, fields(sender = %message.sender_name))]
    pub async fn enqueue(&self, message: &RawMessage) -> Result<Enqueued, QueueError> {
        let fingerprint = message.fingerprint();
        {
            let mut dedup = self.dedup.lock().expect("dedup cache poisoned");
            if !dedup.observe(&fingerprint, Instant::now()) {
                info!(%fingerprint, "duplicate within window, not staging");
                return Err(QueueError::Duplicate);
            }
        }

        let breakdown = calc::evaluate(&message.body, self.tables.as_ref());
        let id = db::insert_record(&self.pool, message, &fingerprint, &breakdown)
            .await
            .map_err(map_db)?;
        info!(
            id,
            stakes = breakdown.stake_count(),
            failed_lines = breakdown.errors.len(),
            "staged message"
        );
        Ok(Enqueued {
            id,
            total: breakdown.total,
            stake_count: breakdown.stake_count(),
            errors: breakdown.errors,
        })
    }

    /// Read-only snapshot of staged records.
    pub async fn list(&self, filter: &RecordFilter) -> Result<Vec<RecordRow>, QueueError> {
        db::list_records(&self.pool, filter).await.map_err(map_db)
    }

    pub async fn get(&self, id: i64) -> Result<RecordRow, QueueError> {
        db::fetch_record(&self.pool, id)
            .await
            .map_err(map_db)?
            .ok_or(QueueError::NotFound(id))
    }

    pub async fn pending_count(&self) -> Result<i64, QueueError> {
        db::pending_count(&self.pool).await.map_err(map_db)
    }

    /// Replace a record's body and re-interpret it. PENDING moves to
    /// EDITED; editing an EDITED record keeps it EDITED. Terminal records
    /// cannot be edited.
    #[instrument(skip_all, fields(record_id = id))]
    pub async fn update(&self, id: i64, new_body: &str) -> Result<RecordRow, QueueError> {
        let lock = self.record_lock(id);
        let _guard = lock.lock().await;

        let record = self.get(id).await?;
        if record.status.is_terminal() {
            return Err(QueueError::AlreadyDecided(id));
        }

        let breakdown = calc::evaluate(new_body, self.tables.as_ref());
        let updated = db::update_record_body(&self.pool, id, new_body, &breakdown)
            .await
            .map_err(map_db)?;
        if !updated {
            return Err(QueueError::AlreadyDecided(id));
        }
        info!(record_id = id, total = breakdown.total, "record edited");
        self.get(id).await
    }

    /// Apply a verdict. Exactly one caller wins the terminal transition;
    /// the rest observe `AlreadyDecidedError`. Approval routes through the
    /// decision handler, which owns the exactly-once ledger commit.
    #[instrument(skip_all, fields(record_id = id, ?verdict))]
    pub async fn decide(
        &self,
        id: i64,
        verdict: Verdict,
        meta: DecisionMeta,
    ) -> Result<Decision, QueueError> {
        let lock = self.record_lock(id);
        let _guard = lock.lock().await;

        let record = self.get(id).await?;
        if record.status.is_terminal() {
            return Err(QueueError::AlreadyDecided(id));
        }
        self.handler
            .decide(&self.pool, &record, verdict, &meta)
            .await
    }
}

fn map_db(err: anyhow::Error) -> QueueError {
    match err.downcast::<sqlx::Error>() {
        Ok(db_err) => QueueError::Db(db_err),
        Err(other) => QueueError::Internal(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_cache_blocks_within_window() {
        let mut cache = DedupCache::new(Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(cache.observe("abc", t0));
        assert!(!cache.observe("abc", t0 + Duration::from_secs(30)));
        assert!(cache.observe("def", t0 + Duration::from_secs(30)));
    }

    #[test]
    fn dedup_cache_expires_after_window() {
        let mut cache = DedupCache::new(Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(cache.observe("abc", t0));
        assert!(cache.observe("abc", t0 + Duration::from_secs(61)));
        // The refreshed entry starts a new window.
        assert!(!cache.observe("abc", t0 + Duration::from_secs(90)));
    }

    #[test]
    fn dedup_cache_eviction_keeps_refreshed_entries() {
        let mut cache = DedupCache::new(Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(cache.observe("abc", t0));
        assert!(cache.observe("abc", t0 + Duration::from_secs(61)));
        // The original queue slot for "abc" expires during this sweep, but
        // the refreshed timestamp must survive it.
        assert!(cache.observe("zzz", t0 + Duration::from_secs(100)));
        assert!(!cache.observe("abc", t0 + Duration::from_secs(100)));
    }
}
