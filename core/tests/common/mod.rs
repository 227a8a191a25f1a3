//! In-memory fakes for the transport and push seams

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use unidl_core::{
    BackoffPolicy, ConnectionError, Connector, DownloadExecutor, Error, FileRelocator, JobStore,
    Orchestrator, OutputChunk, ProfileSet, PushError, PushPayload, PushSender, PushSubscription,
    RemoteShell, Result, SessionManager, SessionPolicy, StatusFanout,
};

/// Canned reply for commands containing `pattern`
#[derive(Clone)]
pub struct Reply {
    pub pattern: &'static str,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl Reply {
    pub fn ok(pattern: &'static str, stdout: impl Into<String>) -> Self {
        Self {
            pattern,
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn fail(pattern: &'static str, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            pattern,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }
}

/// Remote shell that plays back a download script and canned replies
///
/// Commands that change directory are downloads; everything else is matched
/// against the replies in order and succeeds silently when nothing matches.
/// `{dir}` in a reply to `find` is replaced by the directory searched.
pub struct ScriptedShell {
    download: Vec<OutputChunk>,
    download_exit: i32,
    replies: Vec<Reply>,
    panic_on_download: bool,
    commands: Mutex<Vec<String>>,
}

impl ScriptedShell {
    pub fn new(download: Vec<OutputChunk>, download_exit: i32) -> Self {
        Self {
            download,
            download_exit,
            replies: Vec::new(),
            panic_on_download: false,
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(mut self, reply: Reply) -> Self {
        self.replies.push(reply);
        self
    }

    pub fn panicking() -> Self {
        Self {
            panic_on_download: true,
            ..Self::new(Vec::new(), 0)
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    async fn exec(&self, command: &str, output: mpsc::Sender<OutputChunk>) -> Result<i32> {
        self.commands.lock().unwrap().push(command.to_string());

        if command.starts_with("cd ") || command.contains(" && cd ") {
            if self.panic_on_download {
                panic!("transport exploded");
            }
            for chunk in &self.download {
                let _ = output.send(chunk.clone()).await;
            }
            return Ok(self.download_exit);
        }

        match self.replies.iter().find(|r| command.contains(r.pattern)) {
            Some(reply) => {
                if !reply.stdout.is_empty() {
                    let stdout = match searched_dir(command) {
                        Some(dir) => reply.stdout.replace("{dir}", dir),
                        None => reply.stdout.clone(),
                    };
                    let _ = output.send(OutputChunk::Stdout(stdout)).await;
                }
                if !reply.stderr.is_empty() {
                    let _ = output.send(OutputChunk::Stderr(reply.stderr.clone())).await;
                }
                Ok(reply.exit_code)
            }
            None => Ok(0),
        }
    }

    fn is_connected(&self) -> bool {
        true
    }
}

fn searched_dir(command: &str) -> Option<&str> {
    command.strip_prefix("find ")?.split(" -maxdepth").next()
}

/// Hands out one shared shell, or always fails with one error
pub struct FakeConnector {
    shell: Arc<ScriptedShell>,
    always_fail: Option<ConnectionError>,
    delay: Duration,
    calls: AtomicU32,
}

impl FakeConnector {
    pub fn new(shell: Arc<ScriptedShell>) -> Self {
        Self {
            shell,
            always_fail: None,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(shell: Arc<ScriptedShell>, error: ConnectionError) -> Self {
        Self {
            always_fail: Some(error),
            ..Self::new(shell)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteShell>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        if let Some(err) = &self.always_fail {
            return Err(Error::Connection(err.clone()));
        }
        Ok(self.shell.clone())
    }

    fn host(&self) -> &str {
        "raspberrypi"
    }
}

/// Records every delivery; endpoints containing "gone" answer 410
#[derive(Default)]
pub struct RecordingPushSender {
    sent: Mutex<Vec<(String, PushPayload)>>,
}

impl RecordingPushSender {
    pub fn sent(&self) -> Vec<(String, PushPayload)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushSender for RecordingPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> std::result::Result<(), PushError> {
        self.sent
            .lock()
            .unwrap()
            .push((subscription.endpoint.clone(), payload.clone()));
        if subscription.endpoint.contains("gone") {
            Err(PushError::Gone { status: 410 })
        } else {
            Ok(())
        }
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub connector: Arc<FakeConnector>,
    pub push: Arc<RecordingPushSender>,
    pub sessions: Arc<SessionManager>,
}

pub fn fast_session_policy() -> SessionPolicy {
    SessionPolicy {
        min_attempt_spacing: Duration::from_millis(1),
        connect_retry: BackoffPolicy::constant(2, Duration::from_millis(1)),
        wait_for_connect: BackoffPolicy::constant(400, Duration::from_millis(5)),
    }
}

pub fn harness(connector: FakeConnector) -> Harness {
    let connector = Arc::new(connector);
    let push = Arc::new(RecordingPushSender::default());

    let sessions = Arc::new(SessionManager::new(connector.clone(), fast_session_policy()));
    let executor = Arc::new(DownloadExecutor::new(
        sessions.clone(),
        ProfileSet::default(),
        FileRelocator::new(Duration::ZERO),
    ));
    let fanout = Arc::new(StatusFanout::new(push.clone(), None));
    let orchestrator = Orchestrator::new(Arc::new(JobStore::default()), executor, fanout);

    Harness {
        orchestrator,
        connector,
        push,
        sessions,
    }
}

pub fn stdout(text: &str) -> OutputChunk {
    OutputChunk::Stdout(text.to_string())
}

pub fn stderr(text: &str) -> OutputChunk {
    OutputChunk::Stderr(text.to_string())
}

/// Poll `check` every 10ms for up to five seconds
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
