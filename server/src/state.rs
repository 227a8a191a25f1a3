//! Application state

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use unidl_core::{
    Connector, DownloadExecutor, FileRelocator, JobStore, Orchestrator, PushSender, Result,
    SessionManager, SshConnector, StatusFanout, WebPushSender,
};

use crate::config::Config;

const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 10;

/// Shared application state
///
/// Cloned into every handler; the orchestrator is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Wire the orchestrator to the configured SSH host and push service
    pub fn new(config: Config) -> Result<Self> {
        let connector = Arc::new(SshConnector::new(config.ssh_settings()?));

        let push: Option<Arc<dyn PushSender>> = match config.push.signing_key() {
            Some(key) => {
                let timeout = config.push.timeout_secs.unwrap_or(DEFAULT_PUSH_TIMEOUT_SECS);
                let sender = WebPushSender::new(
                    key,
                    config.push.contact.clone(),
                    Duration::from_secs(timeout),
                )?;
                info!("Web push enabled");
                Some(Arc::new(sender) as Arc<dyn PushSender>)
            }
            None => {
                info!("VAPID keys not configured, push notifications disabled");
                None
            }
        };

        Ok(Self::from_parts(config, connector, push))
    }

    /// Build state around explicit transport and push implementations
    pub fn from_parts(
        config: Config,
        connector: Arc<dyn Connector>,
        push: Option<Arc<dyn PushSender>>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(connector, config.session_policy()));
        let executor = Arc::new(DownloadExecutor::new(
            sessions,
            config.profiles.clone(),
            FileRelocator::new(Duration::from_secs(config.relocation_grace_secs)),
        ));
        let store = Arc::new(JobStore::new(config.job_history_limit));
        let icon = config.push.icon.clone();
        let fanout = Arc::new(match push {
            Some(sender) => StatusFanout::new(sender, icon),
            None => StatusFanout::without_push(icon),
        });

        info!(
            host = %config.remote.host,
            port = config.remote.port,
            history = config.job_history_limit,
            "Orchestrator ready"
        );

        Self {
            config: Arc::new(config),
            orchestrator: Orchestrator::new(store, executor, fanout),
        }
    }
}
