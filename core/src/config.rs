use std::{fs, io, path::PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;

use crate::{cli::Cli, dispatch::FailurePolicy};

/// Runtime configuration for a bus resolved from file, env and CLI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    /// Refuse a second listener with the same id on one topic.
    pub reject_duplicate_ids: bool,
    /// What a failing handler does to the rest of a delivery.
    pub failure_policy: FailurePolicy,
    /// `tracing_subscriber::EnvFilter` directive used by the binary.
    pub log_filter: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            reject_duplicate_ids: false,
            failure_policy: FailurePolicy::default(),
            log_filter: default_log_filter(),
        }
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    registry: FileRegistry,
    #[serde(default)]
    dispatch: FileDispatch,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize, Default)]
struct FileRegistry {
    #[serde(default)]
    reject_duplicate_ids: bool,
}

#[derive(Deserialize, Default)]
struct FileDispatch {
    #[serde(default)]
    failure_policy: FailurePolicy,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_log_filter")]
    filter: String,
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl BusConfig {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut cfg = Self::default();

        // config file path precedence: CLI -> ENV -> platform config dir
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("LOCALBUS_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(default_config_path);

        let bytes = match fs::read(&config_path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading config file {}", config_path.display()))
            }
        };
        if let Some(bytes) = bytes {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents)
                .with_context(|| format!("invalid config file {}", config_path.display()))?;
            cfg.reject_duplicate_ids = file_cfg.registry.reject_duplicate_ids;
            cfg.failure_policy = file_cfg.dispatch.failure_policy;
            cfg.log_filter = file_cfg.logging.filter;
        }

        // environment overrides; unparsable values are ignored
        if let Ok(v) = std::env::var("LOCALBUS_REJECT_DUPLICATES") {
            if let Ok(v) = v.parse::<bool>() {
                cfg.reject_duplicate_ids = v;
            }
        }
        if let Ok(v) = std::env::var("LOCALBUS_FAILURE_POLICY") {
            if let Ok(v) = v.parse::<FailurePolicy>() {
                cfg.failure_policy = v;
            }
        }
        if let Ok(v) = std::env::var("LOCALBUS_LOG") {
            cfg.log_filter = v;
        }

        // CLI overrides
        if let Some(v) = cli.reject_duplicates {
            cfg.reject_duplicate_ids = v;
        }
        if let Some(v) = cli.failure_policy {
            cfg.failure_policy = v;
        }
        if let Some(v) = &cli.log {
            cfg.log_filter = v.clone();
        }

        if cfg.log_filter.trim().is_empty() {
            anyhow::bail!("empty log filter");
        }
        Ok(cfg)
    }
}

/// Default location of `localbus.toml`.
pub fn default_config_path() -> PathBuf {
    match ProjectDirs::from("org", "localbus", "localbus") {
        Some(proj) => proj.config_dir().join("localbus.toml"),
        None => PathBuf::from("localbus.toml"),
    }
}
