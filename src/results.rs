use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::model::ArchivalData;

/// Brackets a subtest for whoever keeps its results.
///
/// Called by the collector once it owns a socket: `start_test` right before
/// the first sample, `end_test` when sampling stops.
pub trait ResultRecorder: Send + Sync {
    fn start_test(&self, uuid: &str);
    fn end_test(&self, uuid: &str);
}

/// In-memory record of running and recently finished subtests.
pub struct ResultsStore {
    inner: Mutex<Inner>,
}

/// Read-only view served at `GET /api/results`.
#[derive(Debug, Clone, Serialize)]
pub struct ResultsSnapshot {
    pub active_tests: u64,
    pub completed_tests: u64,
    pub recent: Vec<ArchivalData>,
}

struct Inner {
    active: u64,
    completed: u64,
    recent: VecDeque<ArchivalData>,
    capacity: usize,
}

impl ResultsStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                active: 0,
                completed: 0,
                recent: VecDeque::with_capacity(capacity + 1),
                capacity,
            }),
        }
    }

    /// Keep a finished subtest, evicting the oldest one beyond capacity.
    pub fn save(&self, data: ArchivalData) {
        let mut inner = self.inner.lock();
        inner.completed += 1;
        if inner.capacity == 0 {
            return;
        }
        inner.recent.push_back(data);
        if inner.recent.len() > inner.capacity {
            inner.recent.pop_front();
        }
    }

    pub fn snapshot(&self) -> ResultsSnapshot {
        let inner = self.inner.lock();
        ResultsSnapshot {
            active_tests: inner.active,
            completed_tests: inner.completed,
            recent: inner.recent.iter().cloned().collect(),
        }
    }
}

impl ResultRecorder for ResultsStore {
    fn start_test(&self, uuid: &str) {
        self.inner.lock().active += 1;
        info!(uuid, "test started");
    }

    fn end_test(&self, uuid: &str) {
        let mut inner = self.inner.lock();
        inner.active = inner.active.saturating_sub(1);
        info!(uuid, "test ended");
    }
}
