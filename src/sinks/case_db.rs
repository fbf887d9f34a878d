//! SQLite case database.
//!
//! One table per artifact (`artifact_<key>_<digest>`), every row tagged with
//! the run that produced it, plus `runs` / `artifact_runs` bookkeeping. Each artifact
//! is written in a single transaction.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use log::{debug, info};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use sha2::{Digest, Sha256};

use crate::config::OutputKind;
use crate::errors::SinkError;
use crate::models::{ArtifactResult, RunContext, Value};
use crate::sinks::{ReportSink, SinkMeta, SinkOutcome};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    evidence_root TEXT NOT NULL,
    tool_version TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS artifact_runs (
    run_id TEXT NOT NULL,
    artifact_key TEXT NOT NULL,
    table_name TEXT NOT NULL,
    row_count INTEGER NOT NULL,
    written_at TEXT NOT NULL,
    PRIMARY KEY (run_id, artifact_key)
);
";

/// Table holding an artifact's rows.
///
/// The sanitized key is followed by a digest of the exact key, so keys that
/// differ only in punctuation or case map to distinct tables.
pub fn table_name(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
    format!("artifact_{}_{}", sanitized, &digest[..8])
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(r) => SqlValue::Real(*r),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Timestamp(ts) => SqlValue::Text(ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub struct CaseDbSink {
    path: PathBuf,
    run_id: String,
    conn: Mutex<Connection>,
}

impl CaseDbSink {
    /// Open or create the case database and register this run.
    pub fn open(path: &Path, run_id: &str, evidence_root: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR REPLACE INTO runs (run_id, started_at, evidence_root, tool_version)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                run_id,
                now(),
                evidence_root.display().to_string(),
                env!("CARGO_PKG_VERSION")
            ],
        )?;

        debug!("Opened case database {}", path.display());
        Ok(CaseDbSink {
            path: path.to_path_buf(),
            run_id: run_id.to_string(),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Header columns of an existing artifact table, `None` if it does not exist.
fn existing_columns(conn: &Connection, table: &str) -> Result<Option<Vec<String>>, SinkError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<String>, _>>()?;

    if columns.is_empty() {
        Ok(None)
    } else {
        Ok(Some(columns.into_iter().filter(|c| c != "run_id").collect()))
    }
}

impl ReportSink for CaseDbSink {
    fn name(&self) -> &'static str {
        "case_db"
    }

    fn kind(&self) -> OutputKind {
        OutputKind::CaseDb
    }

    fn write(&self, result: &ArtifactResult, meta: &SinkMeta<'_>) -> Result<SinkOutcome, SinkError> {
        let key = meta.key();
        let table = table_name(key);

        if result.headers.iter().any(|h| h.eq_ignore_ascii_case("run_id")) {
            return Err(SinkError::Rejected(format!(
                "{} has a column named run_id, which the case database reserves",
                key
            )));
        }

        let mut conn = self
            .conn
            .lock()
            .map_err(|_| SinkError::Rejected("case database lock poisoned".to_string()))?;
        let tx = conn.transaction()?;

        match existing_columns(&tx, &table)? {
            Some(columns) if columns != result.headers => {
                return Err(SinkError::Rejected(format!(
                    "table {} has columns [{}] but {} produced [{}]",
                    table,
                    columns.join(", "),
                    key,
                    result.headers.join(", ")
                )));
            }
            Some(_) => {}
            None => {
                let columns: Vec<String> = std::iter::once("run_id TEXT NOT NULL".to_string())
                    .chain(result.headers.iter().map(|h| quote_ident(h)))
                    .collect();
                tx.execute_batch(&format!(
                    "CREATE TABLE {} ({});",
                    quote_ident(&table),
                    columns.join(", ")
                ))?;
            }
        }

        tx.execute(
            &format!("DELETE FROM {} WHERE run_id = ?1", quote_ident(&table)),
            params![self.run_id],
        )?;

        {
            let placeholders: Vec<String> = (1..=result.headers.len() + 1).map(|i| format!("?{}", i)).collect();
            let column_list: Vec<String> = std::iter::once("run_id".to_string())
                .chain(result.headers.iter().map(|h| quote_ident(h)))
                .collect();
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&table),
                column_list.join(", "),
                placeholders.join(", ")
            ))?;

            for row in &result.rows {
                let values = std::iter::once(SqlValue::Text(self.run_id.clone())).chain(row.iter().map(to_sql));
                stmt.execute(params_from_iter(values))?;
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO artifact_runs (run_id, artifact_key, table_name, row_count, written_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![self.run_id, key, table, result.rows.len() as i64, now()],
        )?;
        tx.commit()?;

        debug!("Stored {} rows of {} in {}", result.rows.len(), key, table);
        Ok(SinkOutcome::none())
    }

    fn finalize(&self, _run: &RunContext) -> Result<Vec<PathBuf>, SinkError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SinkError::Rejected("case database lock poisoned".to_string()))?;
        conn.execute(
            "UPDATE runs SET finished_at = ?1 WHERE run_id = ?2",
            params![now(), self.run_id],
        )?;

        info!("Case database updated at {}", self.path.display());
        Ok(vec![self.path.clone()])
    }
}
