//! Engine configuration
//!
//! Everything network specific (server, channel, bot names) and every
//! timing bound lives here so it can be tuned without touching protocol
//! code. Values load from TOML and fall back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::{IrcBookError, Result};

/// Configuration consumed by the connection, search and transfer layers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IrcConfig {
    /// IRC server hostname
    pub server: String,
    /// IRC server port
    pub port: u16,
    /// Use TLS for the IRC connection
    pub tls: bool,
    /// Verify the server certificate when using TLS
    pub tls_verify: bool,
    /// Plain-text port to try when the TLS connect fails
    pub plain_fallback_port: Option<u16>,
    /// Channel the search bot listens in
    pub channel: String,
    /// Search command prefix sent before the query
    pub search_bot: String,
    /// Base nickname, random when unset
    pub nickname: Option<String>,
    /// Number of random digits appended after a nickname collision
    pub nickname_suffix_digits: u32,
    /// Collisions tolerated before registration fails
    pub nick_retries: u32,
    /// CTCP VERSION reply text
    pub version_reply: String,
    /// Minimum spacing between outgoing commands on one session
    pub min_command_interval_ms: u64,
    /// TCP/TLS connect timeout
    pub connect_timeout_ms: u64,
    /// Time allowed for the welcome numeric after NICK/USER
    pub registration_timeout_ms: u64,
    /// Time allowed for JOIN confirmation
    pub join_timeout_ms: u64,
    /// Connect attempts before giving up
    pub connect_attempts: u32,
    /// First backoff delay, doubled per attempt
    pub backoff_base_ms: u64,
    /// Backoff ceiling
    pub backoff_max_ms: u64,
    /// How long search responses are collected
    pub response_window_ms: u64,
    /// How long to wait for a DCC offer after a trigger
    pub offer_timeout_ms: u64,
    /// Idle time after which a transfer counts as stalled
    pub stall_timeout_ms: u64,
    /// Idle time after which the session pings the server
    pub keepalive_interval_ms: u64,
    /// Activity age after which a session is unhealthy
    pub stale_after_ms: u64,
    /// Bound on the best-effort QUIT during close
    pub quit_timeout_ms: u64,
    /// Wanted file extension, without the dot
    pub target_extension: String,
    /// Default result cap
    pub max_results: usize,
    /// Cap on candidates tried per download, all when unset
    pub max_download_attempts: Option<usize>,
    /// Destination directory for finished files
    pub download_dir: PathBuf,
    /// Directory for partial files, `<download_dir>/.partial` when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self {
            server: "irc.irchighway.net".to_string(),
            port: 6697,
            tls: true,
            tls_verify: true,
            plain_fallback_port: None,
            channel: "#ebooks".to_string(),
            search_bot: "@search".to_string(),
            nickname: None,
            nickname_suffix_digits: 3,
            nick_retries: 3,
            version_reply: format!("ircbook v{}", env!("CARGO_PKG_VERSION")),
            min_command_interval_ms: 10_000,
            connect_timeout_ms: 30_000,
            registration_timeout_ms: 30_000,
            join_timeout_ms: 10_000,
            connect_attempts: 3,
            backoff_base_ms: 5_000,
            backoff_max_ms: 60_000,
            response_window_ms: 20_000,
            offer_timeout_ms: 60_000,
            stall_timeout_ms: 30_000,
            keepalive_interval_ms: 120_000,
            stale_after_ms: 300_000,
            quit_timeout_ms: 2_000,
            target_extension: "epub".to_string(),
            max_results: 50,
            max_download_attempts: None,
            download_dir: PathBuf::from("downloads"),
            temp_dir: None,
        }
    }
}

impl IrcConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: IrcConfig = toml::from_str(text)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading config file: {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| {
            IrcBookError::config_error(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply an `irc://` or `ircs://` URL to server, port and TLS
    pub fn apply_server_url(&mut self, raw: &str) -> Result<()> {
        let url = Url::parse(raw)?;
        let tls = match url.scheme() {
            "ircs" => true,
            "irc" => false,
            other => {
                return Err(IrcBookError::config_error_with_field(
                    format!("Unsupported scheme '{}'", other),
                    "server",
                ))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| IrcBookError::config_error_with_field("Server URL has no host", "server"))?;

        self.server = host.to_string();
        self.tls = tls;
        self.port = url.port().unwrap_or(if tls { 6697 } else { 6667 });
        debug!("Server set from URL: {}:{} (tls: {})", self.server, self.port, self.tls);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(IrcBookError::config_error_with_field("server cannot be empty", "server"));
        }
        if self.port == 0 {
            return Err(IrcBookError::config_error_with_field("Port cannot be 0", "port"));
        }
        if !self.channel.starts_with('#') && !self.channel.starts_with('&') {
            return Err(IrcBookError::config_error_with_field("channel must start with '#' or '&'", "channel"));
        }
        if self.search_bot.trim().is_empty() {
            return Err(IrcBookError::config_error_with_field("search_bot cannot be empty", "search_bot"));
        }
        if let Some(nick) = &self.nickname {
            if nick.is_empty() || nick.contains(char::is_whitespace) {
                return Err(IrcBookError::config_error_with_field("nickname must be a single word", "nickname"));
            }
        }
        if self.connect_attempts == 0 {
            return Err(IrcBookError::config_error_with_field("connect_attempts must be at least 1", "connect_attempts"));
        }
        if self.target_extension.is_empty() || self.target_extension.starts_with('.') {
            return Err(IrcBookError::config_error_with_field(
                "target_extension must be a bare extension like 'epub'",
                "target_extension",
            ));
        }
        if self.max_results == 0 {
            return Err(IrcBookError::config_error_with_field("max_results must be at least 1", "max_results"));
        }
        for (field, value) in [
            ("response_window_ms", self.response_window_ms),
            ("offer_timeout_ms", self.offer_timeout_ms),
            ("stall_timeout_ms", self.stall_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("registration_timeout_ms", self.registration_timeout_ms),
        ] {
            if value == 0 {
                return Err(IrcBookError::config_error_with_field(format!("{} must be positive", field), field));
            }
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(IrcBookError::config_error_with_field("download_dir cannot be empty", "download_dir"));
        }
        Ok(())
    }

    /// `host:port` of the IRC server
    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// Directory partial downloads are written to
    pub fn partial_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.download_dir.join(".partial"))
    }

    pub fn min_command_interval(&self) -> Duration {
        Duration::from_millis(self.min_command_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn response_window(&self) -> Duration {
        Duration::from_millis(self.response_window_ms)
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.offer_timeout_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn quit_timeout(&self) -> Duration {
        Duration::from_millis(self.quit_timeout_ms)
    }
}
