use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use super::memory::ReportStore;
use super::types::{AlertOutcome, InsertOutcome, NaturalKey, Report, ReportData, RiskTier};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS risk_reports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        age REAL,
        serum_sodium REAL,
        serum_creatinine REAL,
        ejection_fraction REAL,
        day REAL,
        probability REAL,
        tier TEXT,
        alert_sent INTEGER DEFAULT 0
    );
    CREATE UNIQUE INDEX IF NOT EXISTS risk_reports_natural_key ON risk_reports (
        patient_id, timestamp, age, serum_sodium, serum_creatinine, ejection_fraction, day
    );
    CREATE TABLE IF NOT EXISTS early_alerts (
        natural_key TEXT PRIMARY KEY
    );
";

const COLUMNS: &str = "id, patient_id, timestamp, age, serum_sodium, serum_creatinine, \
                       ejection_fraction, day, probability, tier, alert_sent";

const KEY_MATCH: &str = "patient_id = ?1 AND timestamp = ?2 AND age = ?3 AND serum_sodium = ?4 \
                         AND serum_creatinine = ?5 AND ejection_fraction = ?6 AND day = ?7";

/// Report table in a SQLite file, so a restarted replica keeps its rows.
///
/// One connection behind a mutex; every mutation runs in its own transaction.
pub struct SqliteReportStore {
    conn: Mutex<Connection>,
}

impl SqliteReportStore {
    /// Opens or creates the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open report database: {}", path.display()))?;
        conn.execute_batch(SCHEMA)
            .context("failed to create report tables")?;
        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
        }))
    }

    fn read<T>(&self, what: &str, query: impl FnOnce(&Connection) -> Result<T>) -> Option<T> {
        let conn = self.conn.lock();
        match query(&conn) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Report {} failed: {:#}", what, e);
                None
            }
        }
    }
}

fn encode_key(key: &NaturalKey) -> Result<String> {
    serde_json::to_string(key).context("failed to encode natural key")
}

fn find_id(tx: &Transaction<'_>, key: &NaturalKey) -> Result<Option<u64>> {
    let [age, sodium, creatinine, ejection, day] = key.features.map(f64::from_bits);
    let id = tx
        .query_row(
            &format!("SELECT id FROM risk_reports WHERE {}", KEY_MATCH),
            params![key.patient_id, key.timestamp, age, sodium, creatinine, ejection, day],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(id.map(|id| id as u64))
}

fn insert(tx: &Transaction<'_>, data: &ReportData, alert_sent: bool) -> Result<InsertOutcome> {
    let key = data.natural_key();
    if let Some(id) = find_id(tx, &key)? {
        return Ok(InsertOutcome::Existing(id));
    }
    let early = tx.execute(
        "DELETE FROM early_alerts WHERE natural_key = ?1",
        params![encode_key(&key)?],
    )? > 0;

    let [age, sodium, creatinine, ejection, day] = data.features;
    tx.execute(
        "INSERT INTO risk_reports (patient_id, timestamp, age, serum_sodium, serum_creatinine, \
         ejection_fraction, day, probability, tier, alert_sent) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            data.patient_id,
            data.timestamp,
            age,
            sodium,
            creatinine,
            ejection,
            day,
            data.probability,
            data.tier.as_str(),
            alert_sent || early,
        ],
    )?;
    Ok(InsertOutcome::Inserted(tx.last_insert_rowid() as u64))
}

fn flag(tx: &Transaction<'_>, id: u64) -> Result<AlertOutcome> {
    let changed = tx.execute(
        "UPDATE risk_reports SET alert_sent = 1 WHERE id = ?1 AND alert_sent = 0",
        params![id as i64],
    )?;
    if changed > 0 {
        return Ok(AlertOutcome::Flagged);
    }
    let exists = tx
        .query_row(
            "SELECT 1 FROM risk_reports WHERE id = ?1",
            params![id as i64],
            |_| Ok(()),
        )
        .optional()?;
    Ok(match exists {
        Some(()) => AlertOutcome::AlreadyFlagged,
        None => AlertOutcome::NotFound,
    })
}

fn is_flagged(tx: &Transaction<'_>, id: u64) -> Result<bool> {
    Ok(tx.query_row(
        "SELECT alert_sent FROM risk_reports WHERE id = ?1",
        params![id as i64],
        |row| row.get(0),
    )?)
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<Report> {
    let tier: String = row.get(9)?;
    let tier = tier
        .parse::<RiskTier>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, e.into()))?;
    Ok(Report {
        id: row.get::<_, i64>(0)? as u64,
        data: ReportData {
            patient_id: row.get(1)?,
            timestamp: row.get(2)?,
            features: [row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?],
            probability: row.get(8)?,
            tier,
        },
        alert_sent: row.get(10)?,
    })
}

fn select(
    conn: &Connection,
    clause: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<Report>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM risk_reports {}", COLUMNS, clause))?;
    let rows = stmt.query_map(args, report_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

impl ReportStore for SqliteReportStore {
    fn insert_if_absent(&self, data: ReportData) -> Result<InsertOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let outcome = insert(&tx, &data, false)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn restore(&self, report: Report) -> Result<(InsertOutcome, AlertOutcome)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let outcome = insert(&tx, &report.data, report.alert_sent)?;
        let alert = match outcome {
            InsertOutcome::Existing(id) if report.alert_sent => flag(&tx, id)?,
            InsertOutcome::Inserted(id) if is_flagged(&tx, id)? => AlertOutcome::Flagged,
            _ => AlertOutcome::AlreadyFlagged,
        };
        tx.commit()?;
        Ok((outcome, alert))
    }

    fn mark_alert_sent(&self, key: &NaturalKey) -> Result<AlertOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let outcome = match find_id(&tx, key)? {
            Some(id) => flag(&tx, id)?,
            None => {
                tx.execute(
                    "INSERT OR IGNORE INTO early_alerts (natural_key) VALUES (?1)",
                    params![encode_key(key)?],
                )?;
                AlertOutcome::NotFound
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn mark_alert_sent_by_id(&self, id: u64) -> Result<AlertOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let outcome = flag(&tx, id)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn get(&self, id: u64) -> Option<Report> {
        self.read("lookup", |conn| {
            Ok(select(conn, "WHERE id = ?1", params![id as i64])?
                .into_iter()
                .next())
        })
        .flatten()
    }

    fn list_for_patient(&self, patient_id: &str, limit: Option<usize>) -> Result<Vec<Report>> {
        // LIMIT -1 is unbounded
        let limit = limit.map_or(-1, |n| n as i64);
        select(
            &self.conn.lock(),
            "WHERE patient_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
            params![patient_id, limit],
        )
    }

    fn scan(&self) -> Result<Vec<Report>> {
        select(&self.conn.lock(), "ORDER BY id", [])
    }

    fn pending_alerts(&self, after_id: u64) -> Result<Vec<Report>> {
        select(
            &self.conn.lock(),
            "WHERE id > ?1 AND tier = ?2 AND alert_sent = 0 ORDER BY id",
            params![after_id as i64, RiskTier::Red.as_str()],
        )
    }

    fn len(&self) -> usize {
        self.read("count", |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM risk_reports", [], |row| {
                row.get(0)
            })?;
            Ok(count as usize)
        })
        .unwrap_or(0)
    }
}
