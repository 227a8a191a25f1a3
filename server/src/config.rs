//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;
use unidl_core::{
    BackoffPolicy, CommandProfile, Error, ProfileSet, Result, SessionPolicy, SshAuth, SshSettings,
};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SSH target that runs the downloads
    pub remote: RemoteConfig,

    /// Download command profiles
    pub profiles: ProfileSet,

    /// Connection timing
    pub session: SessionConfig,

    pub push: PushConfig,

    /// Directory with the web client; static serving is off when unset
    pub client_dir: Option<String>,

    /// Jobs kept in memory
    pub job_history_limit: usize,

    /// Seconds to wait before moving a produced file
    pub relocation_grace_secs: u64,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub key_path: Option<String>,
    pub key_passphrase: Option<String>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_path", &self.key_path)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub connect_timeout_secs: u64,
    pub min_attempt_spacing_secs: u64,
    pub retry_delay_ms: u64,
    pub wait_attempts: u32,
    pub wait_interval_ms: u64,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Icon shown in notifications
    pub icon: Option<String>,
    /// Public application server key handed to browsers
    pub public_key: Option<String>,
    /// VAPID signing key, raw P-256 scalar in base64url
    pub private_key: Option<String>,
    /// `mailto:` or `https:` contact sent to push services
    pub contact: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl PushConfig {
    /// Signing key, when both halves of the VAPID key pair are configured
    pub fn signing_key(&self) -> Option<&str> {
        self.public_key.as_ref()?;
        self.private_key.as_deref()
    }
}

impl std::fmt::Debug for PushConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushConfig")
            .field("icon", &self.icon)
            .field("public_key", &self.public_key)
            .field("private_key", &self.private_key.as_ref().map(|_| "***"))
            .field("contact", &self.contact)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            profiles: ProfileSet::default(),
            session: SessionConfig::default(),
            push: PushConfig::default(),
            client_dir: None,
            job_history_limit: unidl_core::store::DEFAULT_CAPACITY,
            relocation_grace_secs: 3,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.178".to_string(),
            port: 22,
            user: "raspberry".to_string(),
            password: None,
            key_path: None,
            key_passphrase: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            min_attempt_spacing_secs: 5,
            retry_delay_ms: 1000,
            wait_attempts: 20,
            wait_interval_ms: 500,
        }
    }
}

impl Config {
    /// Load configuration from file or environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = if let Some(p) = path {
            Self::load_from_file(p)?
        } else {
            Self::from_lookup(|name| std::env::var(name).ok())?
        };
        config.resolve_secrets(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load from configuration file
    fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config {}: {}", path, e)))
    }

    /// Build from environment-style variables
    fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let set = |name: &str| var(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(host) = set("REMOTE_HOST") {
            config.remote.host = host;
        }
        if let Some(port) = set("REMOTE_PORT") {
            config.remote.port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid REMOTE_PORT: {}", port)))?;
        }
        if let Some(user) = set("REMOTE_USER") {
            config.remote.user = user;
        }

        apply_profile_env(&mut config.profiles.qobuz, "QOBUZ", &set);
        apply_profile_env(&mut config.profiles.youtube, "YOUTUBE", &set);
        if let Some(dir) = set("YOUTUBE_TEMP_DIR") {
            config.profiles.youtube.temp_dir = Some(dir);
        }

        config.push.icon = set("PUSH_ICON");
        config.push.public_key = set("VAPID_PUBLIC_KEY");
        config.push.contact = set("VAPID_CONTACT");
        config.client_dir = set("CLIENT_DIR");

        if let Some(limit) = set("JOB_HISTORY_LIMIT") {
            config.job_history_limit = limit
                .parse()
                .map_err(|_| Error::Config(format!("Invalid JOB_HISTORY_LIMIT: {}", limit)))?;
        }

        Ok(config)
    }

    /// Fill unset credentials from secrets (`NAME` or `NAME_FILE`)
    fn resolve_secrets<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let remote = &mut self.remote;
        if remote.password.is_none() {
            remote.password = get_secret(&var, "REMOTE_PASSWORD");
        }
        if remote.key_path.is_none() {
            remote.key_path = get_secret(&var, "REMOTE_KEY_PATH");
        }
        if remote.key_passphrase.is_none() {
            remote.key_passphrase = get_secret(&var, "REMOTE_KEY_PASSPHRASE");
        }
        if self.push.private_key.is_none() {
            self.push.private_key = get_secret(&var, "VAPID_PRIVATE_KEY");
        }
    }

    /// SSH settings; fails when authentication is ambiguous or missing
    pub fn ssh_settings(&self) -> Result<SshSettings> {
        let auth = SshAuth::from_credentials(
            self.remote.password.clone(),
            self.remote.key_path.clone(),
            self.remote.key_passphrase.clone(),
        )?;

        Ok(SshSettings {
            host: self.remote.host.clone(),
            port: self.remote.port,
            username: self.remote.user.clone(),
            auth,
            connect_timeout: Duration::from_secs(self.session.connect_timeout_secs),
        })
    }

    pub fn session_policy(&self) -> SessionPolicy {
        let s = &self.session;
        SessionPolicy {
            min_attempt_spacing: Duration::from_secs(s.min_attempt_spacing_secs),
            connect_retry: BackoffPolicy::constant(2, Duration::from_millis(s.retry_delay_ms)),
            wait_for_connect: BackoffPolicy::constant(
                s.wait_attempts,
                Duration::from_millis(s.wait_interval_ms),
            ),
        }
    }
}

fn apply_profile_env<F>(profile: &mut CommandProfile, prefix: &str, set: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(command) = set(&format!("{}_COMMAND", prefix)) {
        profile.command = command;
    }
    if let Some(path) = set(&format!("{}_PATH", prefix)) {
        profile.working_dir = path;
    }
}

/// Get secret from a variable or from the file named by `VAR_FILE`
///
/// Supports both direct environment variables and file-based secrets (Docker/Kubernetes pattern).
fn get_secret<F>(var: F, var_name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = var(var_name).filter(|v| !v.is_empty()) {
        return Some(value);
    }

    let path = var(&format!("{}_FILE", var_name))?;
    match std::fs::read_to_string(&path) {
        Ok(contents) => Some(contents.trim().to_string()).filter(|v| !v.is_empty()),
        Err(e) => {
            tracing::warn!(var = var_name, path = %path, error = %e, "Failed to read secret file");
            None
        }
    }
}
