//! Runtime configuration
//!
//! Read once at startup from the environment; everything is overridable
//! per call through command options.

use std::path::PathBuf;
use std::time::Duration;

/// Worker spawn host name.
pub const ENV_HOST: &str = "APP_HOST";
/// Sync source/target directory.
pub const ENV_SRC: &str = "APP_SRC";
/// Filesystem id handed to the filesystem driver.
pub const ENV_FS: &str = "APP_FS";

/// Default worker spawn host.
pub const DEFAULT_PROCESS_HOST: &str = "app:processes";

/// Default client reply deadline.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(600);

/// Configuration for the governance service.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Host used to spawn workers
    pub process_host: String,
    /// Sync source/target directory; overridable by `options.directory`
    pub source_dir: Option<PathBuf>,
    /// Filesystem id; overridable by `options.filesystem`
    pub filesystem: Option<String>,
    /// Client-side reply deadline
    pub reply_timeout: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            process_host: DEFAULT_PROCESS_HOST.to_string(),
            source_dir: None,
            filesystem: None,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

impl GovernorConfig {
    /// Read configuration from the environment.
    pub fn from_env() -> Self {
        Self {
            process_host: std::env::var(ENV_HOST)
                .unwrap_or_else(|_| DEFAULT_PROCESS_HOST.to_string()),
            source_dir: std::env::var(ENV_SRC).ok().map(PathBuf::from),
            filesystem: std::env::var(ENV_FS).ok(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// Set the sync directory (builder style).
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }
}
