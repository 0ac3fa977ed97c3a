use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    /// "hourly", "daily" or "never"
    pub rotation: String,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub stale: StaleConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "reward_transfer.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            transfer: TransferConfig::default(),
            batch: BatchConfig::default(),
            queue: QueueConfig::default(),
            stale: StaleConfig::default(),
        }
    }
}

/// Transfer saga settings: where content lands and which ledger tables to use
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransferConfig {
    /// First segment of every destination content key
    pub content_namespace: String,
    pub certificate_category: String,
    pub reward_category: String,
    /// Subject records; `contentKey` holds the source content location
    pub subjects_table: String,
    pub awards_table: String,
    pub balances_table: String,
    pub commits_table: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            content_namespace: "users".to_string(),
            certificate_category: "certificates".to_string(),
            reward_category: "rewards".to_string(),
            subjects_table: "subjects".to_string(),
            awards_table: "awards".to_string(),
            balances_table: "balances".to_string(),
            commits_table: "transfer_commits".to_string(),
        }
    }
}

/// Bulk item-creation job settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch_size: u32,
    pub item_prefix: String,
    pub suffix_digits: usize,
    /// Batches generated in parallel per job
    pub worker_concurrency: usize,
    pub items_table: String,
    pub payload_type: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 20,
            item_prefix: "33300".to_string(),
            suffix_digits: 6,
            worker_concurrency: 4,
            items_table: "items".to_string(),
            payload_type: "CARD".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub receive_batch_size: usize,
    /// Deliveries before a message is dead-lettered
    pub max_receive_count: u32,
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            receive_batch_size: 10,
            max_receive_count: 5,
            poll_interval_ms: 200,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Stale transfer scanning
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StaleConfig {
    pub threshold_secs: u64,
    pub scan_interval_secs: u64,
}

impl Default for StaleConfig {
    fn default() -> Self {
        Self {
            threshold_secs: 60,
            scan_interval_secs: 30,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        Self::from_file(format!("config/{}.yaml", env))
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch.max_batch_size == 0 {
            bail!("batch.max_batch_size must be greater than zero");
        }
        if self.batch.suffix_digits == 0 {
            bail!("batch.suffix_digits must be greater than zero");
        }
        if self.batch.worker_concurrency == 0 {
            bail!("batch.worker_concurrency must be greater than zero");
        }
        if self.transfer.content_namespace.trim().is_empty() {
            bail!("transfer.content_namespace must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
log_level: debug
log_dir: ./logs
log_file: test.log
use_json: true
rotation: never
"#;

    #[test]
    fn test_sections_default() {
        let config = AppConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.batch.max_batch_size, 20);
        assert_eq!(config.batch.item_prefix, "33300");
        assert_eq!(config.transfer.content_namespace, "users");
        assert_eq!(config.queue.poll_interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_partial_section_override() {
        let yaml = format!("{MINIMAL}batch:\n  max_batch_size: 500\n");
        let config = AppConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.batch.max_batch_size, 500);
        assert_eq!(config.batch.suffix_digits, 6);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let yaml = format!("{MINIMAL}batch:\n  max_batch_size: 0\n");
        let err = AppConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("max_batch_size"));
    }

    #[test]
    fn test_rejects_empty_namespace() {
        let yaml = format!("{MINIMAL}transfer:\n  content_namespace: \"\"\n");
        assert!(AppConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert!(config.use_json);

        let missing = AppConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(missing.to_string().contains("Failed to read config file"));
    }
}
