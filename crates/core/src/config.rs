// crates/core/src/config.rs
//! Runtime configuration.
//!
//! Resolution order, lowest to highest precedence:
//! 1. built-in defaults
//! 2. `<home>/jobfarm.toml`, if present
//! 3. `JOBFARM_*` environment variables
//!
//! The home directory itself comes from `JOBFARM_HOME` or the platform data
//! directory, since it has to be known before the file can be read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::paths;

pub const ENV_HOME: &str = "JOBFARM_HOME";
pub const ENV_LEASE_SECS: &str = "JOBFARM_LEASE_SECS";
pub const ENV_POLL_SECS: &str = "JOBFARM_POLL_SECS";
pub const ENV_MAX_WAIT_SECS: &str = "JOBFARM_MAX_WAIT_SECS";

/// How long a dequeued job stays assigned before it is reclaimed.
pub const DEFAULT_LEASE_SECS: u64 = 24 * 60 * 60;
/// Longest accepted lease, 100 years. Leases must end within chrono's date range.
pub const MAX_LEASE_SECS: u64 = 100 * 365 * 24 * 60 * 60;
/// Sleep between dequeue attempts while a worker long-polls.
pub const DEFAULT_POLL_SECS: u64 = 60;
/// Upper bound on a single long poll. Zero disables the bound.
pub const DEFAULT_MAX_WAIT_SECS: u64 = 60 * 60;

/// Lease timing applied by the lease manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    pub lease_duration: chrono::Duration,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            lease_duration: chrono::Duration::seconds(DEFAULT_LEASE_SECS as i64),
        }
    }
}

/// Long-poll behaviour of `request-work`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls forever.
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_SECS),
            max_wait: Some(Duration::from_secs(DEFAULT_MAX_WAIT_SECS)),
        }
    }
}

/// Fully resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub lease: LeasePolicy,
    pub poll: PollPolicy,
}

/// On-disk shape of `jobfarm.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    lease_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    max_wait_secs: Option<u64>,
}

impl Config {
    /// Defaults rooted at `home`, ignoring file and environment.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            lease: LeasePolicy::default(),
            poll: PollPolicy::default(),
        }
    }

    /// Resolve configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Resolve configuration using `env` as the environment lookup.
    pub fn load_with<F>(env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = match env(ENV_HOME).filter(|v| !v.is_empty()) {
            Some(home) => PathBuf::from(home),
            None => paths::default_home_dir().ok_or(ConfigError::NoHomeDir)?,
        };

        let mut config = Self::with_home(home);
        if let Some(file) = read_config_file(&paths::config_file_path(&config.home))? {
            config.apply(file.lease_secs, file.poll_interval_secs, file.max_wait_secs)?;
        }

        let lease = parse_env_secs(&env, ENV_LEASE_SECS)?;
        let poll = parse_env_secs(&env, ENV_POLL_SECS)?;
        let max_wait = parse_env_secs(&env, ENV_MAX_WAIT_SECS)?;
        config.apply(lease, poll, max_wait)?;

        Ok(config)
    }

    fn apply(
        &mut self,
        lease_secs: Option<u64>,
        poll_secs: Option<u64>,
        max_wait_secs: Option<u64>,
    ) -> Result<(), ConfigError> {
        if let Some(secs) = lease_secs {
            // A zero lease would make timeouts_on == assigned_on.
            if secs == 0 || secs > MAX_LEASE_SECS {
                return Err(ConfigError::InvalidValue {
                    key: "lease_secs",
                    value: secs.to_string(),
                });
            }
            self.lease.lease_duration = chrono::Duration::seconds(secs as i64);
        }
        if let Some(secs) = poll_secs {
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "poll_interval_secs",
                    value: secs.to_string(),
                });
            }
            self.poll.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = max_wait_secs {
            self.poll.max_wait = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        paths::db_path(&self.home)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        paths::audit_log_path(&self.home)
    }

    pub fn bundles_dir(&self) -> PathBuf {
        paths::bundles_dir(&self.home)
    }

    pub fn reports_dir(&self) -> PathBuf {
        paths::reports_dir(&self.home)
    }
}

fn read_config_file(path: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_owned(),
                source,
            })
        }
    };
    toml::from_str(&text)
        .map(Some)
        .map_err(|e| ConfigError::Malformed {
            path: path.to_owned(),
            message: e.to_string(),
        })
}

fn parse_env_secs<F>(env: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match env(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
