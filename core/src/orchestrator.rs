//! Job orchestration
//!
//! The [`Orchestrator`] is the single entry point used by the HTTP layer. It
//! validates and records submissions, then hands each job to its own
//! supervising task which guarantees a terminal state and publishes it.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, info_span, Instrument};

use crate::executor::DownloadExecutor;
use crate::fanout::{RealtimeMessage, StatusFanout};
use crate::push::PushSubscription;
use crate::session::SessionState;
use crate::store::{JobStore, DEFAULT_LIST_LIMIT};
use crate::types::{Job, JobOutcome, ServiceType};
use crate::{Error, Result};

/// Upper bound for a single listing
pub const MAX_LIST_LIMIT: usize = 100;

/// Owns the job store, executor and fanout
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<JobStore>,
    executor: Arc<DownloadExecutor>,
    fanout: Arc<StatusFanout>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<JobStore>,
        executor: Arc<DownloadExecutor>,
        fanout: Arc<StatusFanout>,
    ) -> Self {
        Self {
            store,
            executor,
            fanout,
        }
    }

    /// Validate and record a download, then start it in the background
    ///
    /// The returned job is still pending. Validation failures create nothing.
    pub async fn submit(&self, url: &str, service_type: &str) -> Result<Job> {
        let service_type: ServiceType = service_type.parse()?;
        let url = self.executor.profiles().validate(url, service_type)?;

        let job = self.store.create(url, service_type).await;
        info!(job_id = %job.id, service = %service_type, url = %job.url, "Download accepted");

        self.supervise(job.clone());
        Ok(job)
    }

    pub async fn list(&self, limit: Option<usize>) -> Vec<Job> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        self.store.list(limit).await
    }

    pub async fn get(&self, id: &str) -> Result<Job> {
        self.store.get(id).await
    }

    /// Register a push subscription for `client_id`
    pub async fn subscribe(&self, client_id: &str, subscription: PushSubscription) -> Result<bool> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(Error::Validation("clientId is required".into()));
        }
        if subscription.endpoint.trim().is_empty() {
            return Err(Error::Validation("subscription endpoint is required".into()));
        }
        Ok(self.fanout.subscribe(client_id, subscription).await)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.fanout.subscriber_count().await
    }

    /// Realtime updates published from now on
    pub fn observe(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.fanout.observe()
    }

    pub async fn session_state(&self) -> SessionState {
        self.executor.sessions().state().await
    }

    /// Run `job` on its own task and always record a terminal state
    fn supervise(&self, job: Job) {
        let store = Arc::clone(&self.store);
        let executor = Arc::clone(&self.executor);
        let fanout = Arc::clone(&self.fanout);
        let span = info_span!("job", job_id = %job.id, service = %job.service_type);

        tokio::spawn(
            async move {
                let run = {
                    let job = job.clone();
                    tokio::spawn(async move { executor.run(&job).await }.in_current_span())
                };

                let outcome = match run.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(error = %e, "Download task aborted");
                        JobOutcome::failed(format!("internal error: download task aborted ({})", e))
                    }
                };

                match store.finish(&job.id, outcome).await {
                    Ok(finished) => {
                        info!(
                            status = %finished.status,
                            error = ?finished.error,
                            produced_file = ?finished.produced_file_path,
                            "Download finished"
                        );
                        fanout.publish(finished);
                    }
                    Err(e) => error!(error = %e, "Failed to record download outcome"),
                }
            }
            .instrument(span),
        );
    }
}
