use super::model::{RecordFilter, RecordRow};
use crate::calc::Breakdown;
use crate::model::{LedgerEntry, RawMessage, RecordStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, ensure the parent directory exists so a
/// fresh deployment can open its database. In-memory URLs and non-sqlite
/// schemes pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }
    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let path_part = rest.split('?').next().unwrap_or(rest);
    if path_part.is_empty() {
        return url.to_string();
    }
    if let Some(parent) = std::path::Path::new(path_part).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    url.to_string()
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn row_to_record(row: &SqliteRow) -> Result<RecordRow> {
    let status_str: String = row.get("status");
    let status = RecordStatus::parse_status(&status_str)
        .ok_or_else(|| anyhow::anyhow!("record has unknown status {}", status_str))?;
    Ok(RecordRow {
        id: row.get("id"),
        fingerprint: row.get("fingerprint"),
        sender_name: row.get("sender_name"),
        sender_phone: row.get("sender_phone"),
        group_name: row.get("group_name"),
        body: row.get("body"),
        status,
        customer: row.get("customer"),
        bazar: row.get("bazar"),
        parsed_json: row.get("parsed_json"),
        errors_json: row.get("errors_json"),
        total: row.get("total"),
        committed: row.get::<i64, _>("committed") != 0,
        received_at: row.get("received_at"),
        created_at: row.get("created_at"),
        decided_at: row.get("decided_at"),
    })
}

const RECORD_COLUMNS: &str = "id, fingerprint, sender_name, sender_phone, group_name, body, \
     status, customer, bazar, parsed_json, errors_json, total, committed, \
     received_at, created_at, decided_at";

#[instrument(skip_all)]
pub async fn insert_record(
    pool: &Pool,
    message: &RawMessage,
    fingerprint: &str,
    breakdown: &Breakdown,
) -> Result<i64> {
    let parsed_json = serde_json::to_string(&breakdown.lines)?;
    let errors_json = serde_json::to_string(&breakdown.errors)?;
    let rec = sqlx::query(
        "INSERT INTO pending_records \
         (fingerprint, sender_name, sender_phone, group_name, body, status, \
          parsed_json, errors_json, total, committed, received_at, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?) RETURNING id",
    )
    .bind(fingerprint)
    .bind(&message.sender_name)
    .bind(&message.sender_phone)
    .bind(&message.group_name)
    .bind(&message.body)
    .bind(RecordStatus::Pending.as_str())
    .bind(parsed_json)
    .bind(errors_json)
    .bind(breakdown.total)
    .bind(message.received_at)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn fetch_record(pool: &Pool, id: i64) -> Result<Option<RecordRow>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM pending_records WHERE id = ?",
        RECORD_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_record).transpose()
}

#[instrument(skip_all)]
pub async fn list_records(pool: &Pool, filter: &RecordFilter) -> Result<Vec<RecordRow>> {
    let status = filter.status.map(|s| s.as_str().to_string());
    let rows = sqlx::query(&format!(
        "SELECT {} FROM pending_records \
         WHERE (? IS NULL OR status = ?) \
           AND (? IS NULL OR customer = ?) \
           AND (? IS NULL OR created_at >= ?) \
         ORDER BY created_at DESC, id DESC",
        RECORD_COLUMNS
    ))
    .bind(&status)
    .bind(&status)
    .bind(&filter.customer)
    .bind(&filter.customer)
    .bind(filter.since)
    .bind(filter.since)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_record).collect()
}

/// Replace a record's body and its recomputed breakdown, moving PENDING to
/// EDITED. Returns false when the record is already in a terminal state.
#[instrument(skip_all)]
pub async fn update_record_body(
    pool: &Pool,
    id: i64,
    body: &str,
    breakdown: &Breakdown,
) -> Result<bool> {
    let parsed_json = serde_json::to_string(&breakdown.lines)?;
    let errors_json = serde_json::to_string(&breakdown.errors)?;
    let updated = sqlx::query(
        "UPDATE pending_records \
         SET body = ?, parsed_json = ?, errors_json = ?, total = ?, status = ? \
         WHERE id = ? AND status IN (?, ?)",
    )
    .bind(body)
    .bind(parsed_json)
    .bind(errors_json)
    .bind(breakdown.total)
    .bind(RecordStatus::Edited.as_str())
    .bind(id)
    .bind(RecordStatus::Pending.as_str())
    .bind(RecordStatus::Edited.as_str())
    .execute(pool)
    .await?;
    Ok(updated.rows_affected() > 0)
}

/// Compare-and-set a record into a terminal state. Inside a transaction so
/// the flip commits or rolls back together with the ledger batch. Returns
/// false when another decision already won.
pub async fn claim_decided_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: i64,
    status: RecordStatus,
    committed: bool,
    customer: Option<&str>,
    bazar: Option<&str>,
    decided_at: DateTime<Utc>,
) -> Result<bool> {
    let updated = sqlx::query(
        "UPDATE pending_records \
         SET status = ?, committed = ?, customer = COALESCE(?, customer), \
             bazar = COALESCE(?, bazar), decided_at = ? \
         WHERE id = ? AND status IN (?, ?) AND committed = 0",
    )
    .bind(status.as_str())
    .bind(committed as i64)
    .bind(customer)
    .bind(bazar)
    .bind(decided_at)
    .bind(id)
    .bind(RecordStatus::Pending.as_str())
    .bind(RecordStatus::Edited.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(updated.rows_affected() > 0)
}

pub async fn insert_ledger_entries_tx(
    tx: &mut Transaction<'_, Sqlite>,
    entries: &[LedgerEntry],
) -> Result<()> {
    let now = Utc::now();
    for entry in entries {
        sqlx::query(
            "INSERT INTO ledger_entries \
             (record_id, customer, bazar, code, amount, kind, entry_date, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.record_id)
        .bind(&entry.customer)
        .bind(&entry.bazar)
        .bind(&entry.code)
        .bind(entry.amount)
        .bind(entry.kind.as_str())
        .bind(entry.entry_date)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn pending_count(pool: &Pool) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pending_records WHERE status IN (?, ?)")
            .bind(RecordStatus::Pending.as_str())
            .bind(RecordStatus::Edited.as_str())
            .fetch_one(pool)
            .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn ledger_rows_for_record(pool: &Pool, record_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries WHERE record_id = ?")
        .bind(record_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Drop decided records older than `before`. Pending and edited records
/// are never purged.
#[instrument(skip_all)]
pub async fn purge_decided(pool: &Pool, before: DateTime<Utc>) -> Result<u64> {
    let deleted = sqlx::query(
        "DELETE FROM pending_records \
         WHERE status IN (?, ?) AND decided_at IS NOT NULL AND decided_at < ?",
    )
    .bind(RecordStatus::Approved.as_str())
    .bind(RecordStatus::Rejected.as_str())
    .bind(before)
    .execute(pool)
    .await?;
    Ok(deleted.rows_affected())
}
