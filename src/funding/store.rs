//! Bounded per-symbol funding-rate history.
//!
//! Records are indexed chronologically: index 0 is the oldest record still
//! retained. Appending past the cap evicts from the front, which shifts every
//! index down by one.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::analysis::Analysis;
use crate::funding::record::{FundingRateRecord, RecordStatus};

pub const DEFAULT_HISTORY_CAP: usize = 500;

#[async_trait]
pub trait FundingRateStore: Send + Sync {
    /// Append, evicting the oldest records beyond the cap.
    async fn append(&self, symbol: &str, record: FundingRateRecord) -> Result<()>;

    async fn get_last(&self, symbol: &str) -> Result<Option<FundingRateRecord>>;

    /// Attach `analysis` to the record at `index`. The record must be
    /// awaiting analysis.
    async fn update_analysis(&self, symbol: &str, index: usize, analysis: Analysis) -> Result<()>;

    /// Most recent `limit` records, oldest first.
    async fn get_all(&self, symbol: &str, limit: usize) -> Result<Vec<FundingRateRecord>>;

    /// Every record still awaiting analysis, with its index, oldest first.
    async fn pending(&self, symbol: &str) -> Result<Vec<(usize, FundingRateRecord)>>;

    async fn len(&self, symbol: &str) -> Result<usize>;

    /// Drop a symbol's whole history. Returns the number of records removed.
    async fn remove_symbol(&self, symbol: &str) -> Result<usize>;

    async fn symbols(&self) -> Result<Vec<String>>;
}

fn analyzed(record: &mut FundingRateRecord, symbol: &str, index: usize, analysis: Analysis) -> Result<()> {
    if !record.is_awaiting_analysis() {
        bail!("{} record {} is not awaiting analysis", symbol, index);
    }
    record.status = RecordStatus::Analyzed { analysis };
    Ok(())
}

// =============================================================================
// In-memory
// =============================================================================

pub struct MemoryFundingRateStore {
    cap: usize,
    inner: Mutex<HashMap<String, VecDeque<FundingRateRecord>>>,
}

impl MemoryFundingRateStore {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, VecDeque<FundingRateRecord>>>> {
        self.inner.lock().map_err(|_| anyhow!("funding store lock poisoned"))
    }
}

impl Default for MemoryFundingRateStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

#[async_trait]
impl FundingRateStore for MemoryFundingRateStore {
    async fn append(&self, symbol: &str, record: FundingRateRecord) -> Result<()> {
        let mut map = self.lock()?;
        let history = map.entry(symbol.to_string()).or_default();
        history.push_back(record);
        while history.len() > self.cap {
            history.pop_front();
        }
        Ok(())
    }

    async fn get_last(&self, symbol: &str) -> Result<Option<FundingRateRecord>> {
        Ok(self.lock()?.get(symbol).and_then(|h| h.back().cloned()))
    }

    async fn update_analysis(&self, symbol: &str, index: usize, analysis: Analysis) -> Result<()> {
        let mut map = self.lock()?;
        let record = map
            .get_mut(symbol)
            .and_then(|h| h.get_mut(index))
            .ok_or_else(|| anyhow!("{} has no record at index {}", symbol, index))?;
        analyzed(record, symbol, index, analysis)
    }

    async fn get_all(&self, symbol: &str, limit: usize) -> Result<Vec<FundingRateRecord>> {
        let map = self.lock()?;
        Ok(match map.get(symbol) {
            Some(h) => h.iter().skip(h.len().saturating_sub(limit)).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn pending(&self, symbol: &str) -> Result<Vec<(usize, FundingRateRecord)>> {
        let map = self.lock()?;
        Ok(match map.get(symbol) {
            Some(h) => h
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_awaiting_analysis())
                .map(|(i, r)| (i, r.clone()))
                .collect(),
            None => Vec::new(),
        })
    }

    async fn len(&self, symbol: &str) -> Result<usize> {
        Ok(self.lock()?.get(symbol).map_or(0, |h| h.len()))
    }

    async fn remove_symbol(&self, symbol: &str) -> Result<usize> {
        Ok(self.lock()?.remove(symbol).map_or(0, |h| h.len()))
    }

    async fn symbols(&self) -> Result<Vec<String>> {
        let mut out: Vec<String> = self.lock()?.keys().cloned().collect();
        out.sort();
        Ok(out)
    }
}

// =============================================================================
// SQLite
// =============================================================================

pub struct SqliteFundingRateStore {
    cap: usize,
    conn: Mutex<Connection>,
}

impl SqliteFundingRateStore {
    pub fn open(path: &str, cap: usize) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("open sqlite store at {}", path))?;
        let store = Self {
            cap: cap.max(1),
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.lock()?.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS funding_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                period_ts INTEGER NOT NULL,
                funding_rate_pct REAL NOT NULL,
                index_price REAL NOT NULL,
                key_moment INTEGER NOT NULL,
                status TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS funding_records_symbol ON funding_records (symbol, id);
            COMMIT;",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("sqlite store lock poisoned"))
    }
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, f64, f64, bool, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode(raw: (i64, f64, f64, bool, String)) -> Result<FundingRateRecord> {
    let (period_ts_ms, funding_rate_pct, index_price, key_moment, status) = raw;
    Ok(FundingRateRecord {
        period_ts_ms,
        funding_rate_pct,
        index_price,
        key_moment,
        status: serde_json::from_str(&status).context("decode record status")?,
    })
}

#[async_trait]
impl FundingRateStore for SqliteFundingRateStore {
    async fn append(&self, symbol: &str, record: FundingRateRecord) -> Result<()> {
        let status = serde_json::to_string(&record.status)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO funding_records (symbol, period_ts, funding_rate_pct, index_price, key_moment, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                symbol,
                record.period_ts_ms,
                record.funding_rate_pct,
                record.index_price,
                record.key_moment,
                status
            ],
        )?;
        tx.execute(
            "DELETE FROM funding_records WHERE symbol = ?1 AND id NOT IN (
                SELECT id FROM funding_records WHERE symbol = ?1 ORDER BY id DESC LIMIT ?2
            )",
            params![symbol, self.cap as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn get_last(&self, symbol: &str) -> Result<Option<FundingRateRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT period_ts, funding_rate_pct, index_price, key_moment, status
                 FROM funding_records WHERE symbol = ?1 ORDER BY id DESC LIMIT 1",
                params![symbol],
                record_from_row,
            )
            .optional()?;
        raw.map(decode).transpose()
    }

    async fn update_analysis(&self, symbol: &str, index: usize, analysis: Analysis) -> Result<()> {
        let conn = self.lock()?;
        let row: Option<(i64, i64, f64, f64, bool, String)> = conn
            .query_row(
                "SELECT id, period_ts, funding_rate_pct, index_price, key_moment, status
                 FROM funding_records WHERE symbol = ?1 ORDER BY id ASC LIMIT 1 OFFSET ?2",
                params![symbol, index as i64],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
            )
            .optional()?;
        let (id, period_ts, rate, price, key_moment, status) =
            row.ok_or_else(|| anyhow!("{} has no record at index {}", symbol, index))?;

        let mut record = decode((period_ts, rate, price, key_moment, status))?;
        analyzed(&mut record, symbol, index, analysis)?;
        conn.execute(
            "UPDATE funding_records SET status = ?1 WHERE id = ?2",
            params![serde_json::to_string(&record.status)?, id],
        )?;
        Ok(())
    }

    async fn get_all(&self, symbol: &str, limit: usize) -> Result<Vec<FundingRateRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT period_ts, funding_rate_pct, index_price, key_moment, status FROM (
                SELECT id, period_ts, funding_rate_pct, index_price, key_moment, status
                FROM funding_records WHERE symbol = ?1 ORDER BY id DESC LIMIT ?2
             ) ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![symbol, limit as i64], record_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(decode(row?)?);
        }
        Ok(out)
    }

    async fn pending(&self, symbol: &str) -> Result<Vec<(usize, FundingRateRecord)>> {
        let conn = self.lock()?;
        // Only key moments are ever awaiting analysis.
        let mut stmt = conn.prepare(
            "SELECT idx, period_ts, funding_rate_pct, index_price, key_moment, status FROM (
                SELECT ROW_NUMBER() OVER (ORDER BY id) - 1 AS idx, id,
                       period_ts, funding_rate_pct, index_price, key_moment, status
                FROM funding_records WHERE symbol = ?1
             ) WHERE key_moment = 1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![symbol], |r| {
            Ok((r.get::<_, i64>(0)?, (r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (idx, raw) = row?;
            let record = decode(raw)?;
            if record.is_awaiting_analysis() {
                out.push((idx as usize, record));
            }
        }
        Ok(out)
    }

    async fn len(&self, symbol: &str) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM funding_records WHERE symbol = ?1",
            params![symbol],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    async fn remove_symbol(&self, symbol: &str) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM funding_records WHERE symbol = ?1", params![symbol])?)
    }

    async fn symbols(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT symbol FROM funding_records ORDER BY symbol")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
