//! pylon-store - Durable usage ledger for the Pylon gateway
//!
//! Append-only record of every completed dispatch, attributed to a caller
//! wallet. Backed by `SQLite` in WAL mode so a crash between the backend
//! response and the HTTP reply cannot lose a settled payment's record.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use pylon_core::MicroUsd;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Ledger schema. The PRAGMA block makes the store WAL-backed and tolerant
/// of concurrent readers.
const LEDGER_SCHEMA: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS usage_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    caller TEXT NOT NULL,
    capability TEXT NOT NULL,
    cost_micros INTEGER NOT NULL,
    success INTEGER NOT NULL,
    latency_ms INTEGER NOT NULL,
    ts INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_usage_caller ON usage_records(caller);
CREATE INDEX IF NOT EXISTS idx_usage_ts ON usage_records(ts);
";

/// Errors from ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// One completed dispatch.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub caller: String,
    pub capability: String,
    pub cost: MicroUsd,
    pub success: bool,
    pub latency_ms: u64,
    pub ts: DateTime<Utc>,
}

impl UsageRecord {
    pub fn now(caller: &str, capability: &str, cost: MicroUsd, success: bool, latency_ms: u64) -> Self {
        Self {
            caller: caller.to_string(),
            capability: capability.to_string(),
            cost,
            success,
            latency_ms,
            ts: Utc::now(),
        }
    }
}

/// Inclusive day range for aggregation queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    /// Bounds as epoch seconds: `[start, end)`.
    fn bounds(&self) -> (i64, i64) {
        let start = self
            .from
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map_or(0, |dt| Utc.from_utc_datetime(&dt).timestamp());
        let end = self
            .to
            .and_then(|d| d.succ_opt())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map_or(i64::MAX, |dt| Utc.from_utc_datetime(&dt).timestamp());
        (start, end)
    }
}

/// Aggregate totals for one caller.
#[derive(Debug, Clone, Serialize)]
pub struct UsageTotals {
    #[serde(rename = "totalCalls")]
    pub total_calls: u64,
    #[serde(rename = "totalSpend")]
    pub total_spend: MicroUsd,
    #[serde(rename = "successRate")]
    pub success_rate: f64,
    #[serde(rename = "avgLatencyMs")]
    pub avg_latency_ms: u64,
    #[serde(rename = "firstCall", skip_serializing_if = "Option::is_none")]
    pub first_call: Option<DateTime<Utc>>,
    #[serde(rename = "lastCall", skip_serializing_if = "Option::is_none")]
    pub last_call: Option<DateTime<Utc>>,
}

/// Per-capability aggregate for one caller.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityUsage {
    pub capability: String,
    pub calls: u64,
    pub spend: MicroUsd,
    #[serde(rename = "successRate")]
    pub success_rate: f64,
    #[serde(rename = "avgLatencyMs")]
    pub avg_latency_ms: u64,
}

/// Per-day aggregate for one caller.
#[derive(Debug, Clone, Serialize)]
pub struct DayUsage {
    pub date: String,
    pub calls: u64,
    pub spend: MicroUsd,
}

/// Append-only usage ledger backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct UsageLedger {
    conn: Arc<Mutex<Connection>>,
}

impl UsageLedger {
    /// Open (or create) the ledger at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(LEDGER_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory ledger for tests. WAL does not apply to memory databases;
    /// the PRAGMA is a no-op there.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(LEDGER_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Append one record. Committed before the HTTP response goes out.
    pub fn append(&self, record: &UsageRecord) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO usage_records (caller, capability, cost_micros, success, latency_ms, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.caller,
                record.capability,
                record.cost.as_micros() as i64,
                record.success as i64,
                record.latency_ms as i64,
                record.ts.timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Totals for one caller over an optional day range.
    pub fn totals(&self, caller: &str, range: DateRange) -> Result<UsageTotals, StoreError> {
        let (start, end) = range.bounds();
        let conn = self.lock();
        let row = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(cost_micros), 0),
                    COALESCE(SUM(success), 0),
                    COALESCE(SUM(latency_ms), 0),
                    MIN(ts),
                    MAX(ts)
             FROM usage_records
             WHERE caller = ?1 AND ts >= ?2 AND ts < ?3",
            params![caller, start, end],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            },
        )?;

        let (calls, spend, successes, latency_sum, first, last) = row;
        let calls_u = calls.max(0) as u64;
        Ok(UsageTotals {
            total_calls: calls_u,
            total_spend: MicroUsd(spend.max(0) as u64),
            success_rate: if calls > 0 {
                successes as f64 / calls as f64
            } else {
                0.0
            },
            avg_latency_ms: if calls > 0 {
                (latency_sum / calls).max(0) as u64
            } else {
                0
            },
            first_call: first.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
            last_call: last.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        })
    }

    /// Per-capability aggregates for one caller, highest spend first.
    pub fn by_capability(
        &self,
        caller: &str,
        range: DateRange,
    ) -> Result<Vec<CapabilityUsage>, StoreError> {
        let (start, end) = range.bounds();
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT capability,
                    COUNT(*),
                    SUM(cost_micros),
                    SUM(success),
                    SUM(latency_ms)
             FROM usage_records
             WHERE caller = ?1 AND ts >= ?2 AND ts < ?3
             GROUP BY capability
             ORDER BY SUM(cost_micros) DESC",
        )?;
        let rows = stmt.query_map(params![caller, start, end], |row| {
            let calls: i64 = row.get(1)?;
            let spend: i64 = row.get(2)?;
            let successes: i64 = row.get(3)?;
            let latency_sum: i64 = row.get(4)?;
            Ok(CapabilityUsage {
                capability: row.get(0)?,
                calls: calls.max(0) as u64,
                spend: MicroUsd(spend.max(0) as u64),
                success_rate: if calls > 0 {
                    successes as f64 / calls as f64
                } else {
                    0.0
                },
                avg_latency_ms: if calls > 0 {
                    (latency_sum / calls).max(0) as u64
                } else {
                    0
                },
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Per-day spend and call count for one caller, oldest day first.
    pub fn timeline(&self, caller: &str, range: DateRange) -> Result<Vec<DayUsage>, StoreError> {
        let (start, end) = range.bounds();
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT date(ts, 'unixepoch'),
                    COUNT(*),
                    SUM(cost_micros)
             FROM usage_records
             WHERE caller = ?1 AND ts >= ?2 AND ts < ?3
             GROUP BY date(ts, 'unixepoch')
             ORDER BY date(ts, 'unixepoch') ASC",
        )?;
        let rows = stmt.query_map(params![caller, start, end], |row| {
            let calls: i64 = row.get(1)?;
            let spend: i64 = row.get(2)?;
            Ok(DayUsage {
                date: row.get(0)?,
                calls: calls.max(0) as u64,
                spend: MicroUsd(spend.max(0) as u64),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Records for one caller, newest first. Test and debugging aid.
    pub fn records_for(&self, caller: &str) -> Result<Vec<UsageRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT caller, capability, cost_micros, success, latency_ms, ts
             FROM usage_records WHERE caller = ?1 ORDER BY ts DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![caller], |row| {
            let cost: i64 = row.get(2)?;
            let success: i64 = row.get(3)?;
            let latency: i64 = row.get(4)?;
            let ts: i64 = row.get(5)?;
            Ok(UsageRecord {
                caller: row.get(0)?,
                capability: row.get(1)?,
                cost: MicroUsd(cost.max(0) as u64),
                success: success != 0,
                latency_ms: latency.max(0) as u64,
                ts: Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
