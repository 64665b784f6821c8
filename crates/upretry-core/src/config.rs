use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{ClusterInfo, DEFAULT_MAX_RETRIES};
use crate::error::{ConfigError, PolicyError};
use crate::retry::{RetryOn, RetryPolicy};
use crate::runtime::Runtime;

/// Route retry policy (the `[retry]` section of config.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Comma-separated trigger names, HTTP and gRPC (e.g. "5xx,unavailable").
    #[serde(default)]
    pub retry_on: String,
    /// Maximum retries per request, not counting the first attempt.
    #[serde(default = "default_num_retries")]
    pub num_retries: u32,
    /// Backoff base interval in milliseconds (default 25).
    #[serde(default)]
    pub base_interval_ms: Option<u64>,
    /// Backoff cap in milliseconds (default 10x base).
    #[serde(default)]
    pub max_interval_ms: Option<u64>,
    /// Codes matched by the `retriable-status-codes` trigger.
    #[serde(default)]
    pub retriable_status_codes: Vec<u16>,
    #[serde(default = "default_host_selection_max_attempts")]
    pub host_selection_max_attempts: u32,
}

fn default_num_retries() -> u32 {
    1
}

fn default_host_selection_max_attempts() -> u32 {
    1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_on: "5xx,connect-failure".to_string(),
            num_retries: default_num_retries(),
            base_interval_ms: None,
            max_interval_ms: None,
            retriable_status_codes: Vec::new(),
            host_selection_max_attempts: default_host_selection_max_attempts(),
        }
    }
}

impl RetryConfig {
    /// Build and validate the policy described by this section.
    pub fn to_policy(&self) -> Result<RetryPolicy, PolicyError> {
        let policy = RetryPolicy {
            retry_on: RetryOn::parse_config(&self.retry_on)?,
            num_retries: self.num_retries,
            base_interval: self.base_interval_ms.map(Duration::from_millis),
            max_interval: self.max_interval_ms.map(Duration::from_millis),
            retriable_status_codes: self.retriable_status_codes.clone(),
            host_selection_max_attempts: self.host_selection_max_attempts,
        };
        policy.validate()?;
        Ok(policy)
    }
}

/// Retry limits for one upstream cluster (`[[clusters]]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    /// Concurrent retries allowed at default priority.
    #[serde(default = "default_max_retries")]
    pub max_retries: u64,
    /// Concurrent retries allowed at high priority.
    #[serde(default = "default_max_retries")]
    pub max_retries_high: u64,
}

fn default_max_retries() -> u64 {
    DEFAULT_MAX_RETRIES
}

impl ClusterConfig {
    pub fn to_cluster_info(&self) -> ClusterInfo {
        ClusterInfo::new(self.name.clone(), self.max_retries, self.max_retries_high)
    }
}

/// Global configuration loaded from `~/.config/upretry/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpretryConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
    /// Runtime feature percentages, e.g. `"upstream.use_retry" = 50`.
    #[serde(default)]
    pub runtime: BTreeMap<String, u64>,
}

impl Default for UpretryConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            clusters: vec![ClusterConfig {
                name: "default".to_string(),
                max_retries: DEFAULT_MAX_RETRIES,
                max_retries_high: DEFAULT_MAX_RETRIES,
            }],
            runtime: BTreeMap::new(),
        }
    }
}

impl UpretryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.to_policy()?;
        let mut seen = HashSet::new();
        for c in &self.clusters {
            if !seen.insert(c.name.as_str()) {
                return Err(ConfigError::DuplicateCluster(c.name.clone()));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, PolicyError> {
        self.retry.to_policy()
    }

    pub fn runtime(&self) -> Runtime {
        Runtime::from_features(self.runtime.clone().into_iter().collect())
    }

    /// Shared cluster handles keyed by name.
    pub fn clusters(&self) -> HashMap<String, Arc<ClusterInfo>> {
        self.clusters
            .iter()
            .map(|c| (c.name.clone(), Arc::new(c.to_cluster_info())))
            .collect()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("upretry")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<UpretryConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = UpretryConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    Ok(load_from_path(&path)?)
}

/// Load and validate a configuration file.
pub fn load_from_path(path: &Path) -> Result<UpretryConfig, ConfigError> {
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: UpretryConfig = toml::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    cfg.validate()?;
    tracing::debug!(path = %path.display(), clusters = cfg.clusters.len(), "loaded config");
    Ok(cfg)
}
