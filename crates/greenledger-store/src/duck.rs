//! DuckDB persistence for the evidence ledger, detected gaps, and alert state.
//!
//! Batches are staged through a Parquet file and loaded with
//! `read_parquet`, so the table schema is exactly the Arrow schema.

use std::fs::File;
use std::path::Path;

use arrow::record_batch::RecordBatch;
use duckdb::Connection;
use greenledger_core::{Alert, Gap, LedgerEntry, ReportingPeriod};
use parquet::arrow::ArrowWriter;
use tracing::info;

use crate::StoreError;
use crate::batch::{
    alerts_from_batches, alerts_to_batch, entries_from_batches, entries_to_batch, gaps_to_batch,
};

const LEDGER_TABLE: &str = "ledger_entries";
const GAPS_TABLE: &str = "gaps";
const ALERTS_TABLE: &str = "alerts";

/// Ledger persistence on DuckDB, in-memory or file-backed.
pub struct DuckLedgerStore {
    conn: Connection,
}

impl DuckLedgerStore {
    /// Open an in-memory database.
    pub fn open() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Open or create a database file.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    /// Whether a ledger has been saved to this database.
    pub fn has_ledger(&self) -> bool {
        self.count_table(LEDGER_TABLE).is_ok()
    }

    /// Replace the stored ledger with `entries`.
    pub fn save_entries(&self, entries: &[LedgerEntry]) -> Result<usize, StoreError> {
        let batch = entries_to_batch(entries)?;
        let staged = stage_parquet(&batch)?;
        self.conn.execute_batch(&format!(
            "CREATE OR REPLACE TABLE {LEDGER_TABLE} AS SELECT * FROM read_parquet('{}')",
            staged.display()
        ))?;
        let count = self.count_table(LEDGER_TABLE)?;
        info!(count, "saved ledger entries");
        Ok(count)
    }

    /// All stored entries in commit order. Empty if nothing was saved yet.
    pub fn load_entries(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        if !self.has_ledger() {
            return Ok(vec![]);
        }
        let batches = self.query_arrow(&format!("SELECT * FROM {LEDGER_TABLE} ORDER BY sequence"))?;
        let entries = entries_from_batches(&batches)?;
        info!(count = entries.len(), "loaded ledger entries");
        Ok(entries)
    }

    /// Replace the stored gaps of one reporting period.
    pub fn save_gaps(&self, period: &ReportingPeriod, gaps: &[Gap]) -> Result<(), StoreError> {
        let batch = gaps_to_batch(gaps)?;
        let staged = stage_parquet(&batch)?;
        let source = format!("read_parquet('{}')", staged.display());
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {GAPS_TABLE} AS SELECT * FROM {source} LIMIT 0;
             DELETE FROM {GAPS_TABLE} WHERE period_start = DATE '{}' AND period_end = DATE '{}';
             INSERT INTO {GAPS_TABLE} SELECT * FROM {source};",
            period.start, period.end
        ))?;
        info!(count = gaps.len(), %period, "saved gaps");
        Ok(())
    }

    /// Insert or replace alerts by id. Closed alerts stay in the table as
    /// history.
    pub fn save_alerts(&self, alerts: &[Alert]) -> Result<usize, StoreError> {
        if alerts.is_empty() {
            return Ok(0);
        }
        let batch = alerts_to_batch(alerts)?;
        let staged = stage_parquet(&batch)?;
        let source = format!("read_parquet('{}')", staged.display());
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {ALERTS_TABLE} AS SELECT * FROM {source} LIMIT 0;
             DELETE FROM {ALERTS_TABLE} WHERE id IN (SELECT id FROM {source});
             INSERT INTO {ALERTS_TABLE} SELECT * FROM {source};"
        ))?;
        info!(count = alerts.len(), "saved alerts");
        Ok(alerts.len())
    }

    /// Alerts not yet closed, oldest first. Empty if none were saved yet.
    pub fn load_open_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        if self.count_table(ALERTS_TABLE).is_err() {
            return Ok(vec![]);
        }
        let batches = self.query_arrow(&format!(
            "SELECT * FROM {ALERTS_TABLE} WHERE closed_at IS NULL ORDER BY first_seen_at, id"
        ))?;
        let alerts = alerts_from_batches(&batches)?;
        info!(count = alerts.len(), "loaded open alerts");
        Ok(alerts)
    }

    /// Copy a stored table to a Parquet file.
    pub fn export_parquet(&self, table: StoredTable, path: &Path) -> Result<(), StoreError> {
        self.conn.execute_batch(&format!(
            "COPY {} TO '{}' (FORMAT PARQUET)",
            table.name(),
            path.display()
        ))?;
        info!(table = table.name(), path = %path.display(), "exported parquet");
        Ok(())
    }

    fn count_table(&self, table: &str) -> Result<usize, StoreError> {
        let batches = self.query_arrow(&format!("SELECT count(*)::BIGINT AS cnt FROM {table}"))?;
        let batch = batches.first().ok_or(StoreError::NoResults)?;
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Int64Array>()
            .ok_or_else(|| StoreError::Schema("count column not i64".into()))?;
        Ok(col.value(0) as usize)
    }

    /// Execute SQL and return Arrow batches.
    pub fn query_arrow(&self, sql: &str) -> Result<Vec<RecordBatch>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        Ok(batches)
    }
}

/// Tables written by [`DuckLedgerStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredTable {
    LedgerEntries,
    Gaps,
    Alerts,
}

impl StoredTable {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LedgerEntries => LEDGER_TABLE,
            Self::Gaps => GAPS_TABLE,
            Self::Alerts => ALERTS_TABLE,
        }
    }
}

fn stage_parquet(batch: &RecordBatch) -> Result<tempfile::TempPath, StoreError> {
    let path = tempfile::Builder::new()
        .suffix(".parquet")
        .tempfile()?
        .into_temp_path();
    let file = File::create(&path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{day, fy2026, requirement};
    use crate::{Commit, EvidenceLedger};
    use greenledger_core::{DataPointId, GapReason, Severity};

    fn sample_ledger() -> EvidenceLedger {
        let ledger = EvidenceLedger::new();
        let req = requirement("E2-4", 365);
        let period = fy2026();
        for (i, confidence) in [0.8f32, 0.91].into_iter().enumerate() {
            let dp = DataPointId::new(format!("dp-{i}"));
            ledger
                .try_commit(Commit {
                    requirement: &req,
                    data_point_id: &dp,
                    period: &period,
                    confidence,
                    accepted_at: day(i as i64),
                })
                .unwrap();
        }
        ledger
    }

    #[test]
    fn empty_database_has_no_ledger() {
        let store = DuckLedgerStore::open().unwrap();
        assert!(!store.has_ledger());
        assert!(store.load_entries().unwrap().is_empty());
    }

    #[test]
    fn save_and_load_entries() {
        let store = DuckLedgerStore::open().unwrap();
        let entries: Vec<LedgerEntry> = sample_ledger()
            .snapshot(day(2))
            .entries()
            .into_iter()
            .cloned()
            .collect();
        assert_eq!(store.save_entries(&entries).unwrap(), 2);
        assert_eq!(store.load_entries().unwrap(), entries);
    }

    #[test]
    fn persistent_ledger_survives_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("ledger.duckdb");
        let entries: Vec<LedgerEntry> = sample_ledger()
            .snapshot(day(2))
            .entries()
            .into_iter()
            .cloned()
            .collect();

        let store = DuckLedgerStore::open_persistent(&db_path).unwrap();
        store.save_entries(&entries).unwrap();
        drop(store);

        let store = DuckLedgerStore::open_persistent(&db_path).unwrap();
        assert!(store.has_ledger());
        let restored = EvidenceLedger::from_entries(store.load_entries().unwrap());
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn gaps_replace_per_period() {
        let store = DuckLedgerStore::open().unwrap();
        let gap = |reason| Gap {
            requirement_id: "E2-4".into(),
            code: "ESRS E2-4".into(),
            reporting_period: fy2026(),
            reason,
            days_until_expiry: None,
            computed_at: day(1),
            roll_up: None,
        };
        store.save_gaps(&fy2026(), &[gap(GapReason::Unmet)]).unwrap();
        store.save_gaps(&fy2026(), &[gap(GapReason::Expired)]).unwrap();

        let batches = store.query_arrow("SELECT reason FROM gaps").unwrap();
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 1);
    }

    #[test]
    fn export_ledger_parquet() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = tmp.path().join("ledger.parquet");
        let store = DuckLedgerStore::open().unwrap();
        let entries: Vec<LedgerEntry> = sample_ledger()
            .snapshot(day(2))
            .entries()
            .into_iter()
            .cloned()
            .collect();
        store.save_entries(&entries).unwrap();
        store.export_parquet(StoredTable::LedgerEntries, &out).unwrap();
        assert!(out.exists());
    }

    #[test]
    fn alerts_upsert_by_id_and_reload_open_ones() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("alerts.duckdb");
        let gap = |id: &str| Gap {
            requirement_id: id.into(),
            code: format!("ESRS {id}"),
            reporting_period: fy2026(),
            reason: GapReason::Unmet,
            days_until_expiry: None,
            computed_at: day(1),
            roll_up: None,
        };
        let mut e2_4 = Alert::open(gap("E2-4"), Severity::Critical, day(1));
        let e3_4 = Alert::open(gap("E3-4"), Severity::Critical, day(1));

        let store = DuckLedgerStore::open_persistent(&db_path).unwrap();
        assert!(store.load_open_alerts().unwrap().is_empty());
        assert_eq!(store.save_alerts(&[e2_4.clone(), e3_4.clone()]).unwrap(), 2);

        e2_4.last_seen_at = day(5);
        e2_4.closed_at = Some(day(6));
        store.save_alerts(&[e2_4]).unwrap();
        drop(store);

        let store = DuckLedgerStore::open_persistent(&db_path).unwrap();
        assert_eq!(store.load_open_alerts().unwrap(), vec![e3_4]);
        let batches = store.query_arrow("SELECT id FROM alerts").unwrap();
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 2);
    }
}
