use std::path::PathBuf;
use std::time::Duration;

use crate::common::keys::normalize_prefix;
use crate::common::types::HostfsLogLevel;

pub const ENV_SERVER: &str = "HOSTFS_SERVER";
pub const ENV_PREFIX: &str = "HOSTFS_PREFIX";
pub const ENV_CACHE_DIR: &str = "HOSTFS_CACHE_DIR";
pub const ENV_TIMEOUT_MS: &str = "HOSTFS_TIMEOUT_MS";
pub const ENV_LOG: &str = "HOSTFS_LOG";

pub const DEFAULT_REMOTE_PREFIX: &str = "/host/";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CACHE_DIR_NAME: &str = "hostfs-cache";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadConfig {
    /// Remote-forced namespace, always in `/name/` form.
    pub remote_prefix: String,
    /// `host:port` of the file server; `None` disables the remote tier.
    pub server: Option<String>,
    /// Parent of the per-process cache directory.
    pub cache_root: PathBuf,
    pub timeout: Duration,
    pub log_level: HostfsLogLevel,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            remote_prefix: DEFAULT_REMOTE_PREFIX.to_string(),
            server: None,
            cache_root: std::env::temp_dir().join(default_cache_dir_name()),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            log_level: HostfsLogLevel::Off,
        }
    }
}

/// Per-user so one user's cache root never blocks or hosts another's.
fn default_cache_dir_name() -> String {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let uid = unsafe { libc::geteuid() };
    format!("{DEFAULT_CACHE_DIR_NAME}-{uid}")
}

impl PreloadConfig {
    pub fn from_env() -> (Self, Vec<String>) {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from a variable lookup. Malformed values keep the
    /// default and come back as warnings, since logging is configured from
    /// this same result and is not up yet.
    pub fn from_lookup<F>(lookup: F) -> (Self, Vec<String>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let mut warnings = Vec::new();

        if let Some(server) = lookup(ENV_SERVER) {
            let server = server.trim();
            if !server.is_empty() {
                config.server = Some(server.to_string());
            }
        }

        if let Some(prefix) = lookup(ENV_PREFIX) {
            match normalize_prefix(&prefix) {
                Some(prefix) => config.remote_prefix = prefix,
                None => warnings.push(format!("ignoring {ENV_PREFIX}={prefix:?}: prefix must name a directory")),
            }
        }

        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            if !dir.trim().is_empty() {
                config.cache_root = PathBuf::from(dir);
            }
        }

        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.timeout = Duration::from_millis(ms),
                _ => warnings.push(format!("ignoring {ENV_TIMEOUT_MS}={raw:?}: expected a positive integer")),
            }
        }

        if let Some(raw) = lookup(ENV_LOG) {
            match HostfsLogLevel::parse(&raw) {
                Some(level) => config.log_level = level,
                None => warnings.push(format!("ignoring {ENV_LOG}={raw:?}: unknown level")),
            }
        }

        (config, warnings)
    }

    /// Private cache directory of this process.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_root.join(std::process::id().to_string())
    }
}
