use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use repowatch_core::LifecycleThresholds;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::write_atomic;

pub const DEFAULT_CONFIG_PATH: &str = "~/.config/repowatch/config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("write {path}: {detail}")]
    Write { path: PathBuf, detail: String },
}

/// Daemon settings, stored as TOML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Directory whose immediate children are local clones.
    pub scan_path: String,
    /// Account whose repositories are listed remotely.
    pub github_owner: String,
    pub listen: String,
    /// Where the snapshot and cursor files live.
    pub state_dir: String,

    pub local_interval_secs: u64,
    pub remote_interval_secs: u64,
    pub heartbeat_interval_secs: u64,

    pub stale_days: i64,
    pub abandoned_days: i64,

    /// Bounded queue length per live subscriber.
    pub subscriber_queue: usize,
    pub shutdown_grace_secs: u64,
    /// Concurrent per-repository enrichment calls during a remote cycle.
    pub enrich_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_path: "~/REPOS".to_string(),
            github_owner: String::new(),
            listen: "127.0.0.1:7700".to_string(),
            state_dir: "~/.config/repowatch".to_string(),
            local_interval_secs: 60,
            remote_interval_secs: 300,
            heartbeat_interval_secs: 30,
            stale_days: 30,
            abandoned_days: 90,
            subscriber_queue: 10,
            shutdown_grace_secs: 5,
            enrich_concurrency: 4,
        }
    }
}

/// Config shared between the HTTP surface and the poll loops.
pub type SharedConfig = Arc<RwLock<Config>>;

impl Config {
    /// Load from `path` (tilde expanded). A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let s = toml::to_string_pretty(self).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        write_atomic(path, s.as_bytes()).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.scan_path.trim().is_empty() {
            return invalid("scan_path cannot be empty");
        }
        let addr: SocketAddr = self
            .listen
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("listen is not a socket address: {}", self.listen)))?;
        if addr.port() < 1024 {
            return invalid("listen port must be between 1024 and 65535");
        }
        if self.local_interval_secs < 10 {
            return invalid("local_interval_secs must be at least 10");
        }
        if self.remote_interval_secs < 60 {
            return invalid("remote_interval_secs must be at least 60");
        }
        if self.heartbeat_interval_secs < 1 {
            return invalid("heartbeat_interval_secs must be at least 1");
        }
        if self.stale_days < 1 {
            return invalid("stale_days must be at least 1");
        }
        if self.abandoned_days < 1 {
            return invalid("abandoned_days must be at least 1");
        }
        if self.stale_days >= self.abandoned_days {
            return invalid("stale_days must be less than abandoned_days");
        }
        if self.subscriber_queue < 1 {
            return invalid("subscriber_queue must be at least 1");
        }
        Ok(())
    }

    pub fn thresholds(&self) -> LifecycleThresholds {
        LifecycleThresholds {
            stale_days: self.stale_days,
            abandoned_days: self.abandoned_days,
        }
    }

    pub fn scan_root(&self) -> PathBuf {
        expand(&self.scan_path)
    }

    pub fn state_root(&self) -> PathBuf {
        expand(&self.state_dir)
    }

    pub fn local_interval(&self) -> Duration {
        Duration::from_secs(self.local_interval_secs)
    }

    pub fn remote_interval(&self) -> Duration {
        Duration::from_secs(self.remote_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "github_owner = \"octo\"\nstale_days = 14\n").unwrap();
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.github_owner, "octo");
        assert_eq!(cfg.stale_days, 14);
        assert_eq!(cfg.abandoned_days, 90);
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            github_owner: "octo".into(),
            remote_interval_secs: 600,
            ..Default::default()
        };
        cfg.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad = [
            Config { scan_path: " ".into(), ..Default::default() },
            Config { listen: "127.0.0.1:80".into(), ..Default::default() },
            Config { listen: "nonsense".into(), ..Default::default() },
            Config { local_interval_secs: 9, ..Default::default() },
            Config { remote_interval_secs: 59, ..Default::default() },
            Config { stale_days: 0, ..Default::default() },
            Config { stale_days: 90, abandoned_days: 90, ..Default::default() },
            Config { subscriber_queue: 0, ..Default::default() },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))), "{cfg:?}");
        }
    }

    #[test]
    fn tilde_is_expanded() {
        let cfg = Config { scan_path: "/abs/path".into(), ..Default::default() };
        assert_eq!(cfg.scan_root(), PathBuf::from("/abs/path"));
    }
}
