//! In-memory view of one subject's endpoints.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{CheckResult, CheckStatus, Endpoint, StatusSnapshot};

/// Latest known state of one loaded endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub endpoint: Endpoint,
    pub snapshot: Option<StatusSnapshot>,
    /// Uptime percentage over the default window, as of the last resync.
    pub uptime: f64,
}

/// A status transition caused by a merged result.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub endpoint_id: i64,
    pub from: Option<CheckStatus>,
    pub to: CheckStatus,
    pub notify: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Session {
    endpoints: BTreeMap<i64, EndpointStatus>,
    last_update: Option<DateTime<Utc>>,
}

/// What happened to a result offered to the session.
#[derive(Debug, PartialEq)]
pub(crate) enum Merge {
    Applied(Option<StatusChange>),
    /// The endpoint is no longer loaded.
    Unknown,
    /// A newer result was already merged.
    Stale,
}

impl Session {
    pub(crate) fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.values().map(|s| s.endpoint.clone()).collect()
    }

    pub(crate) fn statuses(&self) -> Vec<EndpointStatus> {
        self.endpoints.values().cloned().collect()
    }

    pub(crate) fn status(&self, endpoint_id: i64) -> Option<EndpointStatus> {
        self.endpoints.get(&endpoint_id).cloned()
    }

    pub(crate) fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub(crate) fn mark_updated(&mut self, at: DateTime<Utc>) {
        self.last_update = Some(at);
    }

    /// Replace the loaded set. Endpoints that survive keep whichever
    /// snapshot is newer: the one in memory or the one from storage.
    pub(crate) fn replace_endpoints(&mut self, loaded: Vec<(Endpoint, f64)>) {
        let mut next = BTreeMap::new();

        for (mut endpoint, uptime) in loaded {
            let stored = endpoint.snapshot.take();
            let in_memory = self.endpoints.get(&endpoint.id).and_then(|s| s.snapshot.clone());
            let snapshot = newest(stored, in_memory);
            next.insert(endpoint.id, EndpointStatus { endpoint, snapshot, uptime });
        }

        self.endpoints = next;
    }

    /// Fold a result into the endpoint's snapshot if it is not older than
    /// what is already there.
    pub(crate) fn merge_result(&mut self, result: &CheckResult) -> Merge {
        let Some(entry) = self.endpoints.get_mut(&result.endpoint_id) else {
            return Merge::Unknown;
        };

        let previous = entry.snapshot.as_ref();
        if previous.map_or(false, |s| s.last_checked > result.checked_at) {
            return Merge::Stale;
        }

        let from = previous.map(|s| s.status);
        entry.snapshot = Some(StatusSnapshot::from_result(result));

        if from == Some(result.status) {
            return Merge::Applied(None);
        }

        Merge::Applied(Some(StatusChange {
            endpoint_id: result.endpoint_id,
            from,
            to: result.status,
            notify: entry.endpoint.notify_on_failure && !result.status.is_healthy(),
        }))
    }
}

fn newest(a: Option<StatusSnapshot>, b: Option<StatusSnapshot>) -> Option<StatusSnapshot> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.last_checked > a.last_checked { b } else { a }),
        (a, b) => a.or(b),
    }
}
