//! In-process store, for tests and embedders without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::adapter::{ResultStore, StoreError};
use super::models::*;

#[derive(Default)]
struct Inner {
    next_id: i64,
    endpoints: HashMap<i64, Endpoint>,
    results: HashMap<i64, Vec<CheckResult>>,
}

/// A [`ResultStore`] kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    failing: AtomicBool,
    appends: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked as failing".to_string()));
        }
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Make every subsequent call fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful appends so far.
    pub fn append_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    /// Insert an endpoint, assigning an id when it has none.
    pub fn insert_endpoint(&self, mut endpoint: Endpoint) -> Result<i64, StoreError> {
        let mut inner = self.inner()?;
        if endpoint.id == 0 {
            inner.next_id += 1;
            endpoint.id = inner.next_id;
        } else {
            inner.next_id = inner.next_id.max(endpoint.id);
        }
        let id = endpoint.id;
        inner.endpoints.insert(id, endpoint);
        Ok(id)
    }

    /// Replace an endpoint's settings, keeping its snapshot.
    pub fn update_endpoint(&self, endpoint: Endpoint) -> Result<(), StoreError> {
        let mut inner = self.inner()?;
        let existing = inner
            .endpoints
            .get_mut(&endpoint.id)
            .ok_or(StoreError::NotFound)?;
        let snapshot = existing.snapshot.take();
        *existing = Endpoint { snapshot, ..endpoint };
        Ok(())
    }

    pub fn remove_endpoint(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner()?;
        inner.results.remove(&id);
        inner.endpoints.remove(&id).map(|_| ()).ok_or(StoreError::NotFound)
    }

    /// Seed history directly, bypassing snapshot maintenance.
    pub fn push_history(&self, result: CheckResult) -> Result<(), StoreError> {
        let mut inner = self.inner()?;
        inner.results.entry(result.endpoint_id).or_default().push(result);
        Ok(())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn list_enabled_endpoints(&self, subject_id: &str) -> Result<Vec<Endpoint>, StoreError> {
        let inner = self.inner()?;
        let mut endpoints: Vec<Endpoint> = inner
            .endpoints
            .values()
            .filter(|e| e.enabled && e.owner_id == subject_id)
            .cloned()
            .collect();
        endpoints.sort_by_key(|e| e.id);
        Ok(endpoints)
    }

    async fn append_check_result(&self, result: &CheckResult) -> Result<(), StoreError> {
        let mut inner = self.inner()?;
        let endpoint = inner
            .endpoints
            .get_mut(&result.endpoint_id)
            .ok_or(StoreError::NotFound)?;

        let is_newer = endpoint
            .snapshot
            .as_ref()
            .map_or(true, |s| s.last_checked <= result.checked_at);
        if is_newer {
            endpoint.snapshot = Some(StatusSnapshot::from_result(result));
        }

        inner
            .results
            .entry(result.endpoint_id)
            .or_default()
            .push(result.clone());
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_check_results(
        &self,
        endpoint_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let inner = self.inner()?;
        let mut results: Vec<CheckResult> = inner
            .results
            .get(&endpoint_id)
            .map(|r| r.iter().filter(|r| r.checked_at >= since).cloned().collect())
            .unwrap_or_default();
        results.sort_by_key(|r| r.checked_at);
        Ok(results)
    }

    async fn endpoint_snapshot(&self, endpoint_id: i64) -> Result<Option<StatusSnapshot>, StoreError> {
        let inner = self.inner()?;
        inner
            .endpoints
            .get(&endpoint_id)
            .map(|e| e.snapshot.clone())
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::time::Duration;

    fn result(endpoint_id: i64, status: CheckStatus, checked_at: DateTime<Utc>) -> CheckResult {
        CheckResult {
            endpoint_id,
            status,
            latency: Duration::from_millis(10),
            status_code: None,
            error: None,
            checked_at,
        }
    }

    #[tokio::test]
    async fn test_snapshot_tracks_newest_result() {
        let store = MemoryStore::new();
        let id = store
            .insert_endpoint(Endpoint { owner_id: "u".into(), ..Default::default() })
            .unwrap();

        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t0 = t1 - ChronoDuration::seconds(30);

        store.append_check_result(&result(id, CheckStatus::Degraded, t1)).await.unwrap();
        let snapshot = store.endpoint_snapshot(id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, CheckStatus::Degraded);
        assert_eq!(snapshot.last_checked, t1);

        store.append_check_result(&result(id, CheckStatus::Down, t0)).await.unwrap();
        let snapshot = store.endpoint_snapshot(id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, CheckStatus::Degraded);
        assert_eq!(store.append_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_failing(true);
        let err = store.list_enabled_endpoints("u").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_failing(false);
        assert!(store.list_enabled_endpoints("u").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_for_unknown_endpoint_fails() {
        let store = MemoryStore::new();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let err = store
            .append_check_result(&result(99, CheckStatus::Healthy, at))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
