//! Status fanout to realtime observers and push subscribers

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::push::{PushPayload, PushSender, PushSubscription, DEFAULT_ICON};
use crate::types::Job;

/// Realtime channel depth; slower observers skip ahead
pub const REALTIME_CAPACITY: usize = 100;

/// Message sent to realtime observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RealtimeMessage {
    DownloadUpdate { download: Job },
    Pong,
}

/// What one push dispatch achieved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    /// Client ids dropped because their endpoint is gone
    pub removed: Vec<String>,
}

/// Publishes terminal job updates
pub struct StatusFanout {
    realtime: broadcast::Sender<RealtimeMessage>,
    subscriptions: RwLock<HashMap<String, PushSubscription>>,
    /// Unset when push is not configured; subscriptions are still kept
    sender: Option<Arc<dyn PushSender>>,
    icon: String,
}

impl StatusFanout {
    pub fn new(sender: Arc<dyn PushSender>, icon: Option<String>) -> Self {
        Self::build(Some(sender), icon)
    }

    /// Fanout that only broadcasts to realtime observers
    pub fn without_push(icon: Option<String>) -> Self {
        Self::build(None, icon)
    }

    fn build(sender: Option<Arc<dyn PushSender>>, icon: Option<String>) -> Self {
        let (realtime, _) = broadcast::channel(REALTIME_CAPACITY);
        Self {
            realtime,
            subscriptions: RwLock::new(HashMap::new()),
            sender,
            icon: icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
        }
    }

    pub fn push_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// New realtime observer; it only sees messages published from now on
    pub fn observe(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.realtime.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.realtime.receiver_count()
    }

    /// Register or replace the push endpoint of `client_id`
    ///
    /// Returns true if an earlier subscription was replaced.
    pub async fn subscribe(&self, client_id: &str, subscription: PushSubscription) -> bool {
        let replaced = self
            .subscriptions
            .write()
            .await
            .insert(client_id.to_string(), subscription)
            .is_some();
        info!(client_id, replaced, "Push subscription registered");
        replaced
    }

    pub async fn unsubscribe(&self, client_id: &str) -> bool {
        self.subscriptions.write().await.remove(client_id).is_some()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn is_subscribed(&self, client_id: &str) -> bool {
        self.subscriptions.read().await.contains_key(client_id)
    }

    /// Broadcast `job` now and dispatch pushes on a separate task
    pub fn publish(self: &Arc<Self>, job: Job) -> JoinHandle<DispatchReport> {
        let payload = PushPayload::for_job(&job, &self.icon);

        match self.realtime.send(RealtimeMessage::DownloadUpdate { download: job }) {
            Ok(observers) => debug!(observers, "Realtime update broadcast"),
            Err(_) => debug!("No realtime observers connected"),
        }

        let fanout = Arc::clone(self);
        tokio::spawn(async move { fanout.dispatch_push(payload).await })
    }

    async fn dispatch_push(&self, payload: PushPayload) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Some(sender) = &self.sender else {
            debug!(tag = %payload.tag, "Push not configured, skipping dispatch");
            return report;
        };

        let targets: Vec<(String, PushSubscription)> = self
            .subscriptions
            .read()
            .await
            .iter()
            .map(|(id, sub)| (id.clone(), sub.clone()))
            .collect();

        if targets.is_empty() {
            return report;
        }

        let sends = targets.iter().map(|(client_id, subscription)| {
            let payload = &payload;
            async move {
                let result = sender.send(subscription, payload).await;
                (client_id, subscription, result)
            }
        });

        for (client_id, subscription, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) if e.is_gone() => {
                    info!(client_id = %client_id, error = %e, "Removing expired push subscription");
                    let mut subscriptions = self.subscriptions.write().await;
                    // keep a subscription the client re-registered meanwhile
                    if subscriptions.get(client_id) == Some(subscription) {
                        subscriptions.remove(client_id);
                        report.removed.push(client_id.clone());
                    }
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(client_id = %client_id, error = %e, "Push delivery failed");
                    report.failed += 1;
                }
            }
        }

        debug!(
            tag = %payload.tag,
            delivered = report.delivered,
            failed = report.failed,
            removed = report.removed.len(),
            "Push dispatch finished"
        );
        report
    }
}
