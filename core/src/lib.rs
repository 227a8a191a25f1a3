//! Core library for unidl
//!
//! Download job orchestration over a shared SSH session: job store, remote
//! session management, output interpretation, file relocation, and status
//! fanout to realtime observers and push subscribers.

pub mod backoff;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod orchestrator;
pub mod outcome;
pub mod profile;
pub mod push;
pub mod relocate;
pub mod remote;
pub mod session;
pub mod ssh;
pub mod store;
pub mod types;

// Re-exports
pub use backoff::BackoffPolicy;
pub use error::{ConnectionError, Error, PushError, Result};
pub use executor::DownloadExecutor;
pub use fanout::{DispatchReport, RealtimeMessage, StatusFanout};
pub use orchestrator::{Orchestrator, MAX_LIST_LIMIT};
pub use outcome::{ArtifactScan, OutcomeInterpreter, OutcomePolicy, Verdict};
pub use profile::{CommandProfile, ProfileSet};
pub use push::{PushKeys, PushPayload, PushSender, PushSubscription, WebPushSender};
pub use relocate::FileRelocator;
pub use remote::{Connector, OutputChunk, RemoteShell};
pub use session::{SessionManager, SessionPolicy, SessionState};
pub use ssh::{SshAuth, SshConnector, SshSettings};
pub use store::JobStore;
pub use types::{Job, JobOutcome, JobStatus, ServiceType};
