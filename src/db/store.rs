//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::Persistence;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const TARGET_COLUMNS: &str = "id, name, kind, address, port, method, post_data, headers, \
     verify_ssl, expected, expected_status, check_interval, timeout";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("connection mutex poisoned")]
    Poisoned,
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Target CRUD ---

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO services (name, kind, address, port, method, post_data, headers, verify_ssl, expected, expected_status, check_interval, timeout)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                target.name,
                target.kind.as_str(),
                target.address,
                target.port,
                target.method,
                target.post_data,
                target.headers,
                target.verify_ssl,
                target.expected,
                target.expected_status,
                target.interval as i64,
                target.timeout as i64,
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Get all targets.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM services ORDER BY id ASC",
            TARGET_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], read_target)?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter().map(|r| r.map_err(DbError::InvalidRow)).collect()
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn()?;
        let target = conn.query_row(
            &format!("SELECT {} FROM services WHERE id = ?1", TARGET_COLUMNS),
            params![id],
            read_target,
        )?;
        target.map_err(DbError::InvalidRow)
    }

    /// Delete a target together with its hits and failures.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM hits WHERE service = ?1", params![id])?;
        conn.execute("DELETE FROM failures WHERE service = ?1", params![id])?;
        conn.execute("DELETE FROM services WHERE id = ?1", params![id])?;
        Ok(())
    }

    // --- Hits and failures ---

    /// Most recent hits for a target, newest first.
    pub fn get_hits(&self, target_id: i64, limit: i64) -> Result<Vec<Hit>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT service, latency, ping_time, created_at FROM hits
             WHERE service = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;

        let hits = stmt
            .query_map(params![target_id, limit], |row| {
                let time_str: String = row.get(3)?;
                Ok(Hit {
                    target_id: row.get(0)?,
                    latency: row.get(1)?,
                    ping_time: row.get(2)?,
                    created_at: parse_db_time(&time_str).unwrap_or_else(Utc::now),
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(hits)
    }

    /// Most recent failures for a target, newest first.
    pub fn get_failures(&self, target_id: i64, limit: i64) -> Result<Vec<Failure>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT service, issue, ping_time, error_code, created_at FROM failures
             WHERE service = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;

        let failures = stmt
            .query_map(params![target_id, limit], |row| {
                let time_str: String = row.get(4)?;
                Ok(Failure {
                    target_id: row.get(0)?,
                    issue: row.get(1)?,
                    ping_time: row.get(2)?,
                    error_code: row.get(3)?,
                    created_at: parse_db_time(&time_str).unwrap_or_else(Utc::now),
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(failures)
    }
}

impl Persistence for Store {
    fn create_hit(&self, hit: &Hit) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO hits (service, latency, ping_time, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                hit.target_id,
                hit.latency,
                hit.ping_time,
                hit.created_at.format(TIME_FORMAT).to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn create_failure(&self, failure: &Failure) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO failures (service, issue, ping_time, error_code, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                failure.target_id,
                failure.issue,
                failure.ping_time,
                failure.error_code,
                failure.created_at.format(TIME_FORMAT).to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

/// Map a `services` row. The inner error is an unknown protocol kind.
fn read_target(row: &Row<'_>) -> SqlResult<Result<Target, String>> {
    let kind: String = row.get(2)?;
    let kind = match kind.parse::<ProtocolKind>() {
        Ok(kind) => kind,
        Err(e) => return Ok(Err(e)),
    };
    let interval: i64 = row.get(11)?;
    let timeout: i64 = row.get(12)?;

    Ok(Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        kind,
        address: row.get(3)?,
        port: row.get(4)?,
        method: row.get(5)?,
        post_data: row.get(6)?,
        headers: row.get(7)?,
        verify_ssl: row.get(8)?,
        expected: row.get(9)?,
        expected_status: row.get(10)?,
        interval: interval.max(0) as u64,
        timeout: timeout.max(0) as u64,
    }))
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
