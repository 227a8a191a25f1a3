//! SSH transport built on russh
//!
//! One authenticated [`client::Handle`] is shared by every job; each command
//! opens its own channel so executions run concurrently on the session.

use async_trait::async_trait;
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{Algorithm, HashAlg};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::remote::{Connector, OutputChunk, RemoteShell};
use crate::{ConnectionError, Error, Result};

/// How the session authenticates; exactly one method is configured
#[derive(Clone)]
pub enum SshAuth {
    Password(String),
    PrivateKey {
        path: String,
        passphrase: Option<String>,
    },
}

impl std::fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SshAuth::Password(_) => f.write_str("Password(***)"),
            SshAuth::PrivateKey { path, .. } => write!(f, "PrivateKey({})", path),
        }
    }
}

impl SshAuth {
    /// Pick the authentication method from externally resolved credentials
    ///
    /// Both or neither being present is a configuration error.
    pub fn from_credentials(
        password: Option<String>,
        key_path: Option<String>,
        passphrase: Option<String>,
    ) -> Result<Self> {
        let password = password.filter(|p| !p.is_empty());
        let key_path = key_path.filter(|k| !k.is_empty());

        match (password, key_path) {
            (Some(password), None) => Ok(SshAuth::Password(password)),
            (None, Some(path)) => Ok(SshAuth::PrivateKey {
                path,
                passphrase: passphrase.filter(|p| !p.is_empty()),
            }),
            (Some(_), Some(_)) => Err(Error::Config(
                "both a password and a private key are configured for SSH; set only one".into(),
            )),
            (None, None) => Err(Error::Config(
                "no SSH authentication method configured (password or private key required)"
                    .into(),
            )),
        }
    }
}

/// SSH connection settings
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
    /// Upper bound for TCP connect + handshake + authentication
    pub connect_timeout: Duration,
}

/// Accepts any host key; the remote is a fixed, operator-configured host
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Opens russh sessions
pub struct SshConnector {
    settings: SshSettings,
}

impl SshConnector {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    fn classify(&self, err: &russh::Error) -> ConnectionError {
        match err {
            russh::Error::IO(io) => ConnectionError::from_io(&self.settings.host, io),
            other => ConnectionError::from_message(&self.settings.host, &other.to_string()),
        }
    }

    async fn handshake(&self) -> Result<client::Handle<SshClientHandler>> {
        let s = &self.settings;
        let config = Arc::new(client::Config::default());

        let mut handle = client::connect(config, (s.host.as_str(), s.port), SshClientHandler)
            .await
            .map_err(|e| Error::Connection(self.classify(&e)))?;

        let auth_result = match &s.auth {
            SshAuth::Password(password) => handle
                .authenticate_password(&s.username, password)
                .await
                .map_err(|e| Error::Connection(self.classify(&e)))?,
            SshAuth::PrivateKey { path, passphrase } => {
                let key_content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    Error::Config(format!("failed to read SSH key at {}: {}", path, e))
                })?;
                let key_pair = russh::keys::decode_secret_key(&key_content, passphrase.as_deref())
                    .map_err(|e| {
                        Error::Config(format!("failed to decode SSH key {}: {}", path, e))
                    })?;

                // RSA keys need an explicit SHA-2 signature algorithm on modern servers
                let hash_alg = match key_pair.algorithm() {
                    Algorithm::Rsa { .. } => Some(HashAlg::Sha256),
                    _ => None,
                };

                handle
                    .authenticate_publickey(
                        &s.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
                    )
                    .await
                    .map_err(|e| Error::Connection(self.classify(&e)))?
            }
        };

        match auth_result {
            client::AuthResult::Success => Ok(handle),
            _ => Err(Error::Connection(ConnectionError::AuthFailed {
                host: s.host.clone(),
                user: s.username.clone(),
            })),
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    #[instrument(skip(self), fields(host = %self.settings.host, port = self.settings.port))]
    async fn connect(&self) -> Result<Arc<dyn RemoteShell>> {
        info!(
            user = %self.settings.username,
            auth = ?self.settings.auth,
            "Opening SSH session"
        );

        let handle = tokio::time::timeout(self.settings.connect_timeout, self.handshake())
            .await
            .map_err(|_| {
                Error::Connection(ConnectionError::Timeout {
                    host: self.settings.host.clone(),
                })
            })??;

        info!("SSH session established");
        Ok(Arc::new(SshShell {
            handle,
            host: self.settings.host.clone(),
        }))
    }

    fn host(&self) -> &str {
        &self.settings.host
    }
}

/// Authenticated SSH session
struct SshShell {
    handle: client::Handle<SshClientHandler>,
    host: String,
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, command: &str, output: mpsc::Sender<OutputChunk>) -> Result<i32> {
        let mut channel = self.handle.channel_open_session().await.map_err(|e| {
            warn!(host = %self.host, error = %e, "Failed to open SSH channel");
            Error::Connection(ConnectionError::from_message(&self.host, &e.to_string()))
        })?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::Execution(format!("failed to start remote command: {}", e)))?;

        let mut exit_code = None;
        let mut receiver_open = true;
        let mut stdout = Utf8Decoder::default();
        let mut stderr = Utf8Decoder::default();

        while let Some(msg) = channel.wait().await {
            match msg {
                russh::ChannelMsg::Data { data } => {
                    if let (true, Some(text)) = (receiver_open, stdout.push(&data)) {
                        receiver_open = output.send(OutputChunk::Stdout(text)).await.is_ok();
                    }
                }
                russh::ChannelMsg::ExtendedData { data, .. } => {
                    if let (true, Some(text)) = (receiver_open, stderr.push(&data)) {
                        receiver_open = output.send(OutputChunk::Stderr(text)).await.is_ok();
                    }
                }
                russh::ChannelMsg::ExitStatus { exit_status } => {
                    debug!(exit_status, "Remote command exited");
                    exit_code = Some(exit_status as i32);
                }
                russh::ChannelMsg::Close => break,
                _ => {}
            }
        }

        if receiver_open {
            if let Some(text) = stdout.finish() {
                receiver_open = output.send(OutputChunk::Stdout(text)).await.is_ok();
            }
        }
        if receiver_open {
            if let Some(text) = stderr.finish() {
                let _ = output.send(OutputChunk::Stderr(text)).await;
            }
        }

        exit_code.ok_or_else(|| {
            if self.handle.is_closed() {
                Error::Connection(ConnectionError::Reset {
                    host: self.host.clone(),
                })
            } else {
                Error::Execution("remote command ended without an exit status".into())
            }
        })
    }

    fn is_connected(&self) -> bool {
        !self.handle.is_closed()
    }
}

/// Decodes one output stream whose packets may split a multi-byte character
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Text up to the last complete character; a split tail waits for more bytes
    fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let keep = incomplete_tail(&self.pending);
        let tail = self.pending.split_off(self.pending.len() - keep);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        Some(text).filter(|t| !t.is_empty())
    }

    /// Whatever is left once the stream ended
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned()).filter(|t| !t.is_empty())
    }
}

/// Length of a truncated UTF-8 sequence at the end of `bytes`
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}
