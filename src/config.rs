//! Configuration for ipclane endpoints.
//!
//! Loaded from `.ipclane.yml` or `~/.config/ipclane/ipclane.yml`, with the
//! socket prefix overridable through `IPCLANE_SOCKET_PREFIX`. Loading runs
//! before any endpoint exists and logs under the `ipclane::config` target.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::logging::Logger;

/// Environment variable that overrides `socket-prefix`.
pub const SOCKET_PREFIX_ENV: &str = "IPCLANE_SOCKET_PREFIX";

/// Default directory holding endpoint sockets.
pub const DEFAULT_SOCKET_PREFIX: &str = "/tmp";

/// Wire framing used by an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// 13-byte header, payload capped at 1400 bytes
    #[default]
    Fixed,
    /// 17-byte header, resizable payload
    Variable,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Fixed => write!(f, "fixed"),
            Framing::Variable => write!(f, "variable"),
        }
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Framing::Fixed),
            "variable" => Ok(Framing::Variable),
            other => Err(format!("unknown framing: {}", other)),
        }
    }
}

/// Endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IpcConfig {
    /// Directory the socket file lives in.
    pub socket_prefix: PathBuf,

    /// Reactor worker threads per endpoint.
    pub worker_threads: usize,

    /// Connection attempts made by `ClientEndpoint::connect`.
    pub connect_attempts: u32,

    /// Delay between connection attempts in milliseconds.
    pub retry_delay_ms: u64,

    /// Upper bound on joining reactor workers during shutdown.
    pub shutdown_timeout_ms: u64,

    /// Framing selected by the command-line tool.
    pub framing: Framing,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_prefix: PathBuf::from(DEFAULT_SOCKET_PREFIX),
            worker_threads: 4,
            connect_attempts: 3,
            retry_delay_ms: 1000,
            shutdown_timeout_ms: 5000,
            framing: Framing::Fixed,
        }
    }
}

impl IpcConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .ipclane.yml in current directory
    /// 3. ~/.config/ipclane/ipclane.yml
    /// 4. Defaults
    ///
    /// The environment override is applied on top of whichever source won.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let config = Self::load_file(config_path)?;
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    fn load_file(config_path: Option<&PathBuf>) -> Result<Self> {
        let logger = Logger::config();
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".ipclane.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    logger.info(format_args!("Loaded config from .ipclane.yml"));
                    return Ok(config);
                }
                Err(e) => {
                    logger.warn(format_args!("Failed to load .ipclane.yml: {}", e));
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ipclane").join("ipclane.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        logger.info(format_args!("Loaded config from {}", user_config.display()));
                        return Ok(config);
                    }
                    Err(e) => {
                        logger.warn(format_args!("Failed to load {}: {}", user_config.display(), e));
                    }
                }
            }
        }

        logger.info(format_args!("No config file found, using defaults"));
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Apply environment overrides using the given lookup.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let logger = Logger::config();
        if let Some(prefix) = lookup(SOCKET_PREFIX_ENV).filter(|p| !p.is_empty()) {
            logger.debug(format_args!("{} overrides socket prefix: {}", SOCKET_PREFIX_ENV, prefix));
            self.socket_prefix = PathBuf::from(prefix);
        }
        self
    }

    /// Set the socket directory.
    pub fn with_socket_prefix<P: AsRef<Path>>(mut self, prefix: P) -> Self {
        self.socket_prefix = prefix.as_ref().to_path_buf();
        self
    }

    /// Set reactor worker thread count.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set connection attempts and the delay between them.
    pub fn with_retry(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.connect_attempts = attempts;
        self.retry_delay_ms = delay_ms;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            eyre::bail!("worker-threads must be > 0");
        }
        if self.connect_attempts == 0 {
            eyre::bail!("connect-attempts must be > 0");
        }
        Ok(())
    }

    /// Full path of a socket file under the configured prefix.
    pub fn socket_path(&self, file_name: &str) -> PathBuf {
        self.socket_prefix.join(file_name)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
