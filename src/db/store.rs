//! SQLite-backed store implementation.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};

use super::adapter::{ResultStore, StoreError};
use super::models::*;
use super::plan::Plan;
use crate::probe::ProbeType;

const MIGRATIONS: &[(&str, &str)] = &[
    ("000001_endpoints", include_str!("../../migrations/000001_endpoints.up.sql")),
    ("000002_check_results", include_str!("../../migrations/000002_check_results.up.sql")),
];

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const ENDPOINT_COLUMNS: &str = "id, owner_id, name, target, probe_type, enabled, check_frequency, \
     timeout, retry_count, success_codes, notify_on_failure, current_status, last_checked, \
     last_response_time_ns";

/// Thread-safe SQLite store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        for (name, sql) in MIGRATIONS {
            conn.execute_batch(sql)
                .map_err(|e| StoreError::Migration(format!("{} failed: {}", name, e)))?;
        }

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run a blocking store call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {}", e)))?
    }

    // --- Endpoint lifecycle ---

    /// Register a new endpoint, enforcing the owner's plan quota.
    pub fn add_endpoint(&self, endpoint: &mut Endpoint, plan: &Plan) -> Result<i64, StoreError> {
        endpoint.validate()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM endpoints WHERE owner_id = ?1",
            params![endpoint.owner_id],
            |row| row.get(0),
        )?;
        if !plan.can_add_endpoint(count as usize) {
            return Err(StoreError::LimitReached(plan.endpoint_limit()));
        }

        tx.execute(
            "INSERT INTO endpoints (owner_id, name, target, probe_type, enabled, check_frequency, timeout, retry_count, success_codes, notify_on_failure) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                endpoint.owner_id,
                endpoint.name.trim(),
                endpoint.target.trim(),
                endpoint.probe_type.as_str(),
                endpoint.enabled,
                endpoint.check_frequency,
                endpoint.timeout,
                endpoint.retry_count,
                endpoint.success_codes,
                endpoint.notify_on_failure,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        endpoint.id = id;
        Ok(id)
    }

    /// Update an endpoint's settings. The status snapshot is not touched.
    pub fn update_endpoint(&self, endpoint: &Endpoint) -> Result<(), StoreError> {
        endpoint.validate()?;

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE endpoints SET name=?1, target=?2, probe_type=?3, enabled=?4, check_frequency=?5, \
             timeout=?6, retry_count=?7, success_codes=?8, notify_on_failure=?9 WHERE id=?10",
            params![
                endpoint.name.trim(),
                endpoint.target.trim(),
                endpoint.probe_type.as_str(),
                endpoint.enabled,
                endpoint.check_frequency,
                endpoint.timeout,
                endpoint.retry_count,
                endpoint.success_codes,
                endpoint.notify_on_failure,
                endpoint.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Enable or disable an endpoint without deleting it.
    pub fn set_enabled(&self, id: i64, enabled: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE endpoints SET enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_endpoint(&self, id: i64) -> Result<Endpoint, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM endpoints WHERE id = ?1", ENDPOINT_COLUMNS),
                params![id],
                EndpointRow::read,
            )
            .optional()?;

        row.ok_or(StoreError::NotFound)?.into_endpoint()
    }

    /// All endpoints of an owner, enabled or not.
    pub fn list_endpoints(&self, owner_id: &str) -> Result<Vec<Endpoint>, StoreError> {
        self.query_endpoints(
            &format!("SELECT {} FROM endpoints WHERE owner_id = ?1 ORDER BY id", ENDPOINT_COLUMNS),
            owner_id,
        )
    }

    /// Delete an endpoint and its check history.
    pub fn delete_endpoint(&self, id: i64) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM check_results WHERE endpoint_id = ?1", params![id])?;
        let changed = tx.execute("DELETE FROM endpoints WHERE id = ?1", params![id])?;
        tx.commit()?;

        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn enabled_endpoints(&self, owner_id: &str) -> Result<Vec<Endpoint>, StoreError> {
        self.query_endpoints(
            &format!(
                "SELECT {} FROM endpoints WHERE owner_id = ?1 AND enabled = 1 ORDER BY id",
                ENDPOINT_COLUMNS
            ),
            owner_id,
        )
    }

    fn query_endpoints(&self, sql: &str, owner_id: &str) -> Result<Vec<Endpoint>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![owner_id], EndpointRow::read)?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter().map(EndpointRow::into_endpoint).collect()
    }

    // --- Check results ---

    fn insert_check_result(&self, result: &CheckResult) -> Result<(), StoreError> {
        let checked_at = format_db_time(result.checked_at);
        let response_time_ns = duration_to_nanos(result.latency);

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO check_results (endpoint_id, status, response_time_ns, status_code, error_message, checked_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                result.endpoint_id,
                result.status.as_str(),
                response_time_ns,
                result.status_code,
                result.error,
                checked_at,
            ],
        )?;

        // Only move the snapshot forward in time
        tx.execute(
            "UPDATE endpoints SET current_status = ?1, last_checked = ?2, last_response_time_ns = ?3 \
             WHERE id = ?4 AND (last_checked IS NULL OR last_checked <= ?2)",
            params![result.status.as_str(), checked_at, response_time_ns, result.endpoint_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn check_results_since(
        &self,
        endpoint_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT endpoint_id, status, response_time_ns, status_code, error_message, checked_at \
             FROM check_results WHERE endpoint_id = ?1 AND checked_at >= ?2 ORDER BY checked_at ASC, id ASC",
        )?;

        let rows = stmt
            .query_map(params![endpoint_id, format_db_time(since)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<u16>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter()
            .map(|(endpoint_id, status, response_time_ns, status_code, error, checked_at)| {
                Ok(CheckResult {
                    endpoint_id,
                    status: CheckStatus::from_str(&status).map_err(StoreError::Corrupt)?,
                    latency: nanos_to_duration(response_time_ns),
                    status_code,
                    error,
                    checked_at: parse_db_time(&checked_at)
                        .ok_or_else(|| StoreError::Corrupt(format!("bad timestamp: {}", checked_at)))?,
                })
            })
            .collect()
    }

    fn snapshot(&self, endpoint_id: i64) -> Result<Option<StatusSnapshot>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT current_status, last_checked, last_response_time_ns FROM endpoints WHERE id = ?1",
                params![endpoint_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            )
            .optional()?;

        let (status, last_checked, response_time_ns) = row.ok_or(StoreError::NotFound)?;
        Ok(build_snapshot(status, last_checked, response_time_ns))
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn list_enabled_endpoints(&self, subject_id: &str) -> Result<Vec<Endpoint>, StoreError> {
        let subject_id = subject_id.to_string();
        self.blocking(move |store| store.enabled_endpoints(&subject_id)).await
    }

    async fn append_check_result(&self, result: &CheckResult) -> Result<(), StoreError> {
        let result = result.clone();
        self.blocking(move |store| store.insert_check_result(&result)).await
    }

    async fn list_check_results(
        &self,
        endpoint_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StoreError> {
        self.blocking(move |store| store.check_results_since(endpoint_id, since)).await
    }

    async fn endpoint_snapshot(&self, endpoint_id: i64) -> Result<Option<StatusSnapshot>, StoreError> {
        self.blocking(move |store| store.snapshot(endpoint_id)).await
    }
}

/// Raw column values of an `endpoints` row.
struct EndpointRow {
    id: i64,
    owner_id: String,
    name: String,
    target: String,
    probe_type: String,
    enabled: bool,
    check_frequency: u32,
    timeout: u32,
    retry_count: u32,
    success_codes: String,
    notify_on_failure: bool,
    current_status: Option<String>,
    last_checked: Option<String>,
    last_response_time_ns: Option<i64>,
}

impl EndpointRow {
    fn read(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            target: row.get(3)?,
            probe_type: row.get(4)?,
            enabled: row.get(5)?,
            check_frequency: row.get(6)?,
            timeout: row.get(7)?,
            retry_count: row.get(8)?,
            success_codes: row.get(9)?,
            notify_on_failure: row.get(10)?,
            current_status: row.get(11)?,
            last_checked: row.get(12)?,
            last_response_time_ns: row.get(13)?,
        })
    }

    fn into_endpoint(self) -> Result<Endpoint, StoreError> {
        Ok(Endpoint {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            target: self.target,
            probe_type: ProbeType::parse_lenient(&self.probe_type),
            enabled: self.enabled,
            check_frequency: self.check_frequency,
            timeout: self.timeout,
            retry_count: self.retry_count,
            success_codes: self.success_codes,
            notify_on_failure: self.notify_on_failure,
            snapshot: build_snapshot(
                self.current_status,
                self.last_checked,
                self.last_response_time_ns,
            ),
        })
    }
}

fn build_snapshot(
    status: Option<String>,
    last_checked: Option<String>,
    response_time_ns: Option<i64>,
) -> Option<StatusSnapshot> {
    let status = CheckStatus::from_str(status.as_deref()?).ok()?;
    let last_checked = parse_db_time(last_checked.as_deref()?)?;

    Some(StatusSnapshot {
        status,
        last_checked,
        last_response_time: nanos_to_duration(response_time_ns.unwrap_or(0)),
    })
}

fn duration_to_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

fn nanos_to_duration(ns: i64) -> Duration {
    Duration::from_nanos(ns.max(0) as u64)
}

fn format_db_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
