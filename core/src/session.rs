//! Shared remote session with serialized connection attempts
//!
//! Exactly one connection attempt may be in flight at a time. Callers that
//! arrive while an attempt is running poll for its result instead of dialing
//! again; once connected, the same session is handed to every caller.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use crate::backoff::BackoffPolicy;
use crate::remote::{Connector, RemoteShell};
use crate::{ConnectionError, Error, Result};

/// Timing rules for connection management
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Minimum time between the starts of two connection attempts
    pub min_attempt_spacing: Duration,
    /// Attempts for one connection; transient failures retry within this budget
    pub connect_retry: BackoffPolicy,
    /// How long a caller waits for someone else's in-flight attempt
    pub wait_for_connect: BackoffPolicy,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            min_attempt_spacing: Duration::from_secs(5),
            // first attempt plus exactly one retry
            connect_retry: BackoffPolicy::constant(2, Duration::from_secs(1)),
            wait_for_connect: BackoffPolicy::constant(20, Duration::from_millis(500)),
        }
    }
}

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Ends the in-flight attempt however it finishes
///
/// The flag is cleared before the generation advances, so a caller that sees
/// the new generation can no longer find this attempt in flight.
struct InFlight<'a> {
    connecting: &'a AtomicBool,
    generation: &'a AtomicU64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.connecting.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

/// Owner of the single shared remote session
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    policy: SessionPolicy,
    current: RwLock<Option<Arc<dyn RemoteShell>>>,
    connecting: AtomicBool,
    /// Bumped after each attempt finishes, successfully or not
    generation: AtomicU64,
    last_failure: Mutex<Option<Error>>,
    last_attempt: Mutex<Option<Instant>>,
    attempts: AtomicU64,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: SessionPolicy) -> Self {
        Self {
            connector,
            policy,
            current: RwLock::new(None),
            connecting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            last_failure: Mutex::new(None),
            last_attempt: Mutex::new(None),
            attempts: AtomicU64::new(0),
        }
    }

    /// Get the connected session, connecting if needed
    #[instrument(skip(self), fields(host = %self.connector.host()))]
    pub async fn acquire(&self) -> Result<Arc<dyn RemoteShell>> {
        let generation = self.generation.load(Ordering::Acquire);

        if let Some(shell) = self.connected().await {
            return Ok(shell);
        }

        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _in_flight = InFlight {
                connecting: &self.connecting,
                generation: &self.generation,
            };

            // another caller may have finished connecting since the first check
            if let Some(shell) = self.connected().await {
                return Ok(shell);
            }
            return self.establish().await;
        }

        debug!("Connection attempt already in flight, waiting for it");
        let waited = self
            .policy
            .wait_for_connect
            .poll(|| self.check_wait(generation))
            .await;

        match waited {
            Some(result) => result,
            None => {
                warn!("Gave up waiting for in-flight connection attempt");
                Err(Error::Connection(ConnectionError::Timeout {
                    host: self.connector.host().to_string(),
                }))
            }
        }
    }

    /// Current state of the shared session
    pub async fn state(&self) -> SessionState {
        if self.connecting.load(Ordering::Acquire) {
            return SessionState::Connecting;
        }
        match self.current.read().await.as_ref() {
            Some(shell) if shell.is_connected() => SessionState::Connected,
            _ => SessionState::Disconnected,
        }
    }

    /// Number of connection attempts made so far, retries included
    pub fn connection_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Live session, dropping a stale one
    async fn connected(&self) -> Option<Arc<dyn RemoteShell>> {
        {
            let current = self.current.read().await;
            match current.as_ref() {
                Some(shell) if shell.is_connected() => return Some(shell.clone()),
                None => return None,
                Some(_) => {}
            }
        }

        let mut current = self.current.write().await;
        if matches!(current.as_ref(), Some(shell) if !shell.is_connected()) {
            info!("Remote session closed, discarding it");
            *current = None;
        }
        current.as_ref().filter(|s| s.is_connected()).cloned()
    }

    /// Poll step for callers waiting on another caller's attempt
    async fn check_wait(&self, generation: u64) -> Option<Result<Arc<dyn RemoteShell>>> {
        if let Some(shell) = self.connected().await {
            return Some(Ok(shell));
        }
        let finished = !self.connecting.load(Ordering::Acquire)
            && self.generation.load(Ordering::Acquire) != generation;
        if finished {
            let failure = self.last_failure.lock().await;
            let err = match failure.as_ref() {
                Some(Error::Connection(e)) => Error::Connection(e.clone()),
                Some(Error::Config(msg)) => Error::Config(msg.clone()),
                Some(other) => Error::Other(other.to_string()),
                None => Error::Connection(ConnectionError::Unknown {
                    host: self.connector.host().to_string(),
                    detail: "connection attempt ended without a session".into(),
                }),
            };
            return Some(Err(err));
        }
        None
    }

    async fn establish(&self) -> Result<Arc<dyn RemoteShell>> {
        let result = self
            .policy
            .connect_retry
            .retry(
                |attempt| async move {
                    self.respect_spacing().await;
                    self.attempts.fetch_add(1, Ordering::Relaxed);
                    info!(attempt, "Connecting to remote host");
                    self.connector.connect().await
                },
                |e| matches!(e, Error::Connection(c) if c.is_transient()),
                "remote_connect",
            )
            .await;

        match result {
            Ok(shell) => {
                *self.current.write().await = Some(shell.clone());
                *self.last_failure.lock().await = None;
                Ok(shell)
            }
            Err(e) => {
                warn!(error = %e, "Connection failed");
                let stored = match &e {
                    Error::Connection(c) => Error::Connection(c.clone()),
                    Error::Config(msg) => Error::Config(msg.clone()),
                    other => Error::Other(other.to_string()),
                };
                *self.last_failure.lock().await = Some(stored);
                Err(e)
            }
        }
    }

    /// Sleep until the minimum spacing since the previous attempt has passed
    async fn respect_spacing(&self) {
        let mut last = self.last_attempt.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.policy.min_attempt_spacing {
                let remaining = self.policy.min_attempt_spacing - elapsed;
                debug!(wait_ms = remaining.as_millis() as u64, "Spacing connection attempts");
                sleep(remaining).await;
            }
        }
        *last = Some(Instant::now());
    }
}
