//! In-memory job history

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{Job, JobOutcome, ServiceType};
use crate::{Error, Result};

/// Records kept when no capacity is configured
pub const DEFAULT_CAPACITY: usize = 100;
/// Listing size when the caller gives none
pub const DEFAULT_LIST_LIMIT: usize = 20;

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, Job>,
    /// Ids oldest first
    order: VecDeque<String>,
}

/// Bounded, process-lifetime job history
pub struct JobStore {
    inner: RwLock<Inner>,
    capacity: usize,
    last_id: AtomicU64,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl JobStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity: capacity.max(1),
            last_id: AtomicU64::new(0),
        }
    }

    /// Record a new pending job
    ///
    /// Inputs are expected to be validated already.
    pub async fn create(&self, url: String, service_type: ServiceType) -> Job {
        let job = Job::new(self.next_id().to_string(), url, service_type);

        let mut inner = self.inner.write().await;
        inner.jobs.insert(job.id.clone(), job.clone());
        inner.order.push_back(job.id.clone());
        self.evict(&mut inner);
        job
    }

    /// Most recent jobs first
    pub async fn list(&self, limit: usize) -> Vec<Job> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.jobs.get(id))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: &str) -> Result<Job> {
        self.inner
            .read()
            .await
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("download {}", id)))
    }

    /// Apply the terminal transition and return the updated record
    pub async fn finish(&self, id: &str, outcome: JobOutcome) -> Result<Job> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("download {}", id)))?;
        job.finish(outcome)?;
        Ok(job.clone())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Epoch milliseconds, bumped past the previous id on collision
    fn next_id(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let previous = match self
            .last_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            }) {
            Ok(prev) | Err(prev) => prev,
        };
        now.max(previous + 1)
    }

    /// Drop the oldest finished jobs beyond capacity; pending jobs are kept
    fn evict(&self, inner: &mut Inner) {
        while inner.order.len() > self.capacity {
            let position = inner
                .order
                .iter()
                .position(|id| inner.jobs.get(id).map_or(true, Job::is_terminal));
            let Some(position) = position else { break };
            if let Some(id) = inner.order.remove(position) {
                inner.jobs.remove(&id);
                debug!(job_id = %id, "Evicted job from history");
            }
        }
    }
}
