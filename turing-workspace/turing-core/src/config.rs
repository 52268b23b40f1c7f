use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::events::UserId;
use crate::services::CommitSettings;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub moderation: ModerationConfig,
}

impl CoreConfig {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("config.toml");
        let mut cfg = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str::<CoreConfig>(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            tracing::info!(
                "No config file found at {}. Using CoreConfig::default().",
                path.display()
            );
            CoreConfig::default()
        };
        cfg.resolve_paths(root);
        Ok(cfg)
    }

    fn resolve_paths(&mut self, root: &Path) {
        self.storage.db_path = absolutize(root, &self.storage.db_path);
    }

    pub fn commit_settings(&self) -> CommitSettings {
        CommitSettings {
            commit_delay: Duration::from_secs(self.pipeline.commit_delay_secs),
            write_retries: self.storage.write_retries,
            retry_backoff: Duration::from_millis(self.storage.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    #[serde(default = "SystemConfig::default_name")]
    pub name: String,
}

impl SystemConfig {
    fn default_name() -> String {
        "turing".to_string()
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "StorageConfig::default_write_retries")]
    pub write_retries: u32,
    #[serde(default = "StorageConfig::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl StorageConfig {
    fn default_db_path() -> PathBuf {
        PathBuf::from("turing.db")
    }

    fn default_write_retries() -> u32 {
        3
    }

    fn default_retry_backoff_ms() -> u64 {
        250
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: Self::default_db_path(),
            write_retries: Self::default_write_retries(),
            retry_backoff_ms: Self::default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Minimum hold in the delay queue.
    #[serde(default = "PipelineConfig::default_queue_delay_ms")]
    pub queue_delay_ms: u64,
    /// Grace window before a message is written.
    #[serde(default = "PipelineConfig::default_commit_delay_secs")]
    pub commit_delay_secs: u64,
}

impl PipelineConfig {
    fn default_queue_delay_ms() -> u64 {
        4000
    }

    fn default_commit_delay_secs() -> u64 {
        30
    }

    pub fn queue_delay(&self) -> Duration {
        Duration::from_millis(self.queue_delay_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_delay_ms: Self::default_queue_delay_ms(),
            commit_delay_secs: Self::default_commit_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default = "GenerationConfig::default_chain_order")]
    pub chain_order: usize,
    #[serde(default = "GenerationConfig::default_max_attempts")]
    pub max_attempts: usize,
}

impl GenerationConfig {
    fn default_chain_order() -> usize {
        2
    }

    fn default_max_attempts() -> usize {
        1000
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            chain_order: Self::default_chain_order(),
            max_attempts: Self::default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModerationConfig {
    /// Accounts ignored in every channel (well-known bots).
    #[serde(default = "ModerationConfig::default_always_ignored")]
    pub always_ignored: Vec<String>,
    #[serde(default)]
    pub blocked_words: Vec<String>,
    /// How far back a timeout reaches into the user's history. Unset means
    /// all of it, same as a ban.
    #[serde(default)]
    pub timeout_lookback_secs: Option<u64>,
}

impl ModerationConfig {
    fn default_always_ignored() -> Vec<String> {
        ["100135110", "19264788", "786049415", "95174992", "854854747"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    pub fn always_ignored_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.always_ignored.iter().map(|s| UserId::from(s.as_str()))
    }

    pub fn timeout_lookback(&self) -> Option<Duration> {
        self.timeout_lookback_secs.map(Duration::from_secs)
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            always_ignored: Self::default_always_ignored(),
            blocked_words: Vec::new(),
            timeout_lookback_secs: None,
        }
    }
}

fn absolutize(root: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        root.join(value)
    }
}
