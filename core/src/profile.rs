//! Per-service command profiles and submission validation

use serde::{Deserialize, Serialize};
use url::Url;

use crate::remote::{in_dir, shell_quote};
use crate::types::ServiceType;
use crate::{Error, Result};

/// How one service type is downloaded on the remote host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandProfile {
    /// Download command; the quoted URL is appended
    pub command: String,
    /// Directory the command runs in and final home of produced files
    pub working_dir: String,
    /// Whether the produced file must be moved into `working_dir` afterwards
    #[serde(default)]
    pub relocate: bool,
    /// Parent of the per-job directories of relocated profiles
    #[serde(default)]
    pub temp_dir: Option<String>,
    /// Artifact extension without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Accepted URL hosts; subdomains match too. Empty accepts any host
    #[serde(default)]
    pub domains: Vec<String>,
}

fn default_extension() -> String {
    "mp3".to_string()
}

impl CommandProfile {
    pub fn qobuz_default() -> Self {
        Self {
            command: "export PATH=$PATH:/usr/local/bin:/usr/bin:/bin:/home/raspberry/.local/bin && qobuz-dl dl".into(),
            working_dir: "/DATA/Media/Music/Musica/qobuz-dl".into(),
            relocate: false,
            temp_dir: None,
            extension: "flac".into(),
            domains: vec!["qobuz.com".into()],
        }
    }

    pub fn youtube_default() -> Self {
        Self {
            command: "/snap/bin/yt-dlp -f bestaudio --extract-audio --audio-format mp3 --audio-quality 0".into(),
            working_dir: "/DATA/Media/Music/Musica/yt-dlp".into(),
            relocate: true,
            temp_dir: Some("/home/raspberry".into()),
            extension: "mp3".into(),
            domains: vec![
                "youtube.com".into(),
                "youtu.be".into(),
                "music.youtube.com".into(),
            ],
        }
    }

    /// Directory a job's command runs in
    ///
    /// Relocated profiles get a fresh directory per job under the temp dir
    /// (or the working dir), so the produced file is the only one there.
    pub fn run_dir(&self, job_id: &str) -> String {
        if self.relocate {
            let base = self.temp_dir.as_deref().unwrap_or(&self.working_dir);
            format!("{}/unidl-{}", base.trim_end_matches('/'), job_id)
        } else {
            self.working_dir.clone()
        }
    }

    /// Full remote command line for `url` run as job `job_id`
    pub fn command_for(&self, url: &str, job_id: &str) -> String {
        let dir = self.run_dir(job_id);
        let download = in_dir(&dir, &format!("{} {}", self.command, shell_quote(url)));
        if self.relocate {
            format!("mkdir -p {} && {}", shell_quote(&dir), download)
        } else {
            download
        }
    }

    /// Host equals one of the domains or is a subdomain of one
    pub fn accepts_host(&self, host: &str) -> bool {
        if self.domains.is_empty() {
            return true;
        }
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.domains.iter().any(|domain| {
            let domain = domain.to_ascii_lowercase();
            host == domain || host.ends_with(&format!(".{}", domain))
        })
    }
}

/// The fixed pair of download profiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSet {
    #[serde(default = "CommandProfile::qobuz_default")]
    pub qobuz: CommandProfile,
    #[serde(default = "CommandProfile::youtube_default")]
    pub youtube: CommandProfile,
}

impl Default for ProfileSet {
    fn default() -> Self {
        Self {
            qobuz: CommandProfile::qobuz_default(),
            youtube: CommandProfile::youtube_default(),
        }
    }
}

impl ProfileSet {
    pub fn get(&self, service_type: ServiceType) -> &CommandProfile {
        match service_type {
            ServiceType::Qobuz => &self.qobuz,
            ServiceType::Youtube => &self.youtube,
        }
    }

    /// Check a submission and return the trimmed URL
    pub fn validate(&self, url: &str, service_type: ServiceType) -> Result<String> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::Validation("URL is required".into()));
        }

        let parsed = Url::parse(url)
            .map_err(|e| Error::Validation(format!("invalid URL '{}': {}", url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Validation(format!(
                "unsupported URL scheme '{}': only http and https are allowed",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::Validation("URL has no host".into()))?;

        let profile = self.get(service_type);
        if !profile.accepts_host(host) {
            return Err(Error::Validation(format!(
                "{} is not a {} URL (expected {})",
                host,
                service_type.display_name(),
                profile.domains.join(", ")
            )));
        }

        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_for_quotes_url() {
        let profile = CommandProfile::qobuz_default();
        let cmd = profile.command_for("https://play.qobuz.com/album/x?a=1&b=2", "17");
        assert_eq!(
            cmd,
            "cd /DATA/Media/Music/Musica/qobuz-dl && export PATH=$PATH:/usr/local/bin:/usr/bin:/bin:\
             /home/raspberry/.local/bin && qobuz-dl dl 'https://play.qobuz.com/album/x?a=1&b=2'"
        );
    }

    #[test]
    fn test_relocated_profile_runs_in_job_directory() {
        let profile = CommandProfile::youtube_default();
        assert_eq!(profile.run_dir("1700000000000"), "/home/raspberry/unidl-1700000000000");

        let cmd = profile.command_for("https://youtu.be/abc123", "1700000000000");
        assert_eq!(
            cmd,
            "mkdir -p /home/raspberry/unidl-1700000000000 && cd /home/raspberry/unidl-1700000000000 \
             && /snap/bin/yt-dlp -f bestaudio --extract-audio --audio-format mp3 --audio-quality 0 \
             https://youtu.be/abc123"
        );
    }

    #[test]
    fn test_accepts_subdomains() {
        let profile = CommandProfile::youtube_default();
        assert!(profile.accepts_host("youtu.be"));
        assert!(profile.accepts_host("www.youtube.com"));
        assert!(profile.accepts_host("m.YouTube.com"));
        assert!(!profile.accepts_host("notyoutube.com"));
        assert!(!profile.accepts_host("youtube.com.evil.net"));
    }

    #[test]
    fn test_validate_accepts_known_hosts() {
        let profiles = ProfileSet::default();
        assert_eq!(
            profiles
                .validate("  https://youtu.be/abc123 ", ServiceType::Youtube)
                .unwrap(),
            "https://youtu.be/abc123"
        );
        assert!(profiles
            .validate("https://play.qobuz.com/album/xyz", ServiceType::Qobuz)
            .is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        let profiles = ProfileSet::default();
        for (url, service) in [
            ("", ServiceType::Youtube),
            ("not a url", ServiceType::Youtube),
            ("ftp://youtube.com/x", ServiceType::Youtube),
            ("https://youtu.be/abc", ServiceType::Qobuz),
            ("https://www.qobuz.com/album/x", ServiceType::Youtube),
        ] {
            assert!(
                matches!(profiles.validate(url, service), Err(Error::Validation(_))),
                "expected rejection of {:?} for {}",
                url,
                service
            );
        }
    }

    #[test]
    fn test_empty_domains_accept_any_host() {
        let mut profile = CommandProfile::qobuz_default();
        profile.domains.clear();
        assert!(profile.accepts_host("example.org"));
    }

    #[test]
    fn test_run_dir_without_temp_dir() {
        let mut profile = CommandProfile::youtube_default();
        profile.temp_dir = None;
        assert_eq!(profile.run_dir("9"), "/DATA/Media/Music/Musica/yt-dlp/unidl-9");
        assert_eq!(
            CommandProfile::qobuz_default().run_dir("9"),
            "/DATA/Media/Music/Musica/qobuz-dl"
        );
    }
}
