use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::backup::{TableBackupSetup, TargetNaming};
use crate::error::EngineError;
use crate::retry::RetryPolicy;
use crate::topology::ScalingMode;

/// Root configuration, parsed from TOML or any registered `ConfigParser`.
#[derive(Debug, Clone, Deserialize)]
pub struct CirrusConfig {
    /// Retry policy for every remote management call.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Broadcast topic topologies.
    #[serde(default)]
    pub topologies: Vec<TopologyConfig>,

    /// Table backup schedule.
    #[serde(default)]
    pub backup: Option<BackupConfig>,

    /// Compute job monitoring.
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopologyConfig {
    /// Root topic name; forwarding children are named `{parent}-{n}`.
    pub name: String,
    #[serde(default = "default_scaling_mode")]
    pub mode: ScalingMode,
    /// Fan-out limit of a single broker topic.
    #[serde(default = "default_max_per_topic")]
    pub max_per_topic: usize,
    /// Subscribers the vertical topology is sized for.
    #[serde(default = "default_expected_subscribers")]
    pub expected_subscribers: usize,
    /// Concurrent management calls during emit/destroy.
    #[serde(default = "default_emit_parallelism")]
    pub emit_parallelism: usize,
}

fn default_scaling_mode() -> ScalingMode {
    ScalingMode::Vertical
}

fn default_max_per_topic() -> usize {
    2000
}

fn default_expected_subscribers() -> usize {
    2000
}

fn default_emit_parallelism() -> usize {
    16
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    /// Naming of dated target accounts.
    pub naming: TargetNaming,
    /// Directory of the file-backed management log.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// How often the backup service wakes up to check due-ness.
    #[serde(default = "default_poll_interval", rename = "poll_interval_secs", with = "secs")]
    pub poll_interval: Duration,
    #[serde(default)]
    pub tables: Vec<TableBackupSetup>,
}

fn default_log_dir() -> String {
    "backup-log".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(300)
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_job_poll", rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    #[serde(default = "default_job_timeout", rename = "timeout_secs", with = "secs")]
    pub timeout: Duration,
}

fn default_job_poll() -> Duration {
    Duration::from_secs(5)
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(3600)
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_job_poll(),
            timeout: default_job_timeout(),
        }
    }
}

/// Format-specific configuration parser, selected by file extension.
pub trait ConfigParser: Send + Sync {
    fn extensions(&self) -> &[&str];

    fn parse(&self, content: &str) -> Result<CirrusConfig, EngineError>;
}

/// Built-in TOML parser.
pub struct TomlParser;

impl ConfigParser for TomlParser {
    fn extensions(&self) -> &[&str] {
        &["toml"]
    }

    fn parse(&self, content: &str) -> Result<CirrusConfig, EngineError> {
        CirrusConfig::parse(content)
    }
}

impl CirrusConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        Self::load_with(path, &[&TomlParser])
    }

    /// Load configuration choosing the parser by file extension.
    pub fn load_with(path: &str, parsers: &[&dyn ConfigParser]) -> Result<Self, EngineError> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("toml");
        let parser = parsers
            .iter()
            .find(|p| p.extensions().contains(&ext))
            .ok_or_else(|| EngineError::Config(format!("{path}: no parser for '.{ext}' files")))?;
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        let config = parser.parse(&content).map_err(|e| e.with_context(path))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let mut names = HashSet::new();
        for topology in &self.topologies {
            let ctx = format!("topology '{}'", topology.name);
            if topology.name.is_empty() {
                return Err(EngineError::Config("topology name must not be empty".into()));
            }
            if !names.insert(topology.name.as_str()) {
                return Err(EngineError::Config(format!("{ctx}: defined twice")));
            }
            if topology.max_per_topic < 2 {
                return Err(EngineError::Config(format!("{ctx}: max_per_topic must be at least 2")));
            }
            if topology.expected_subscribers == 0 {
                return Err(EngineError::Config(format!("{ctx}: expected_subscribers must be positive")));
            }
        }

        if let Some(ref backup) = self.backup {
            backup.naming.validate()?;
            let mut sources = HashSet::new();
            for table in &backup.tables {
                if !sources.insert(table.source_table.as_str()) {
                    return Err(EngineError::Config(format!(
                        "backup table '{}' defined twice",
                        table.source_table
                    )));
                }
                table.validate()?;
            }
        }
        Ok(())
    }

    pub fn topology(&self, name: &str) -> Option<&TopologyConfig> {
        self.topologies.iter().find(|t| t.name == name)
    }
}

// ---------------------------------------------------------------------------
// Duration fields are written as plain integers in config files
// ---------------------------------------------------------------------------

pub(crate) mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use cirrus_api::backup::BackupMode;

    use super::*;

    const SAMPLE: &str = r#"
[retry]
max_attempts = 3
delay_ms = 250

[[topologies]]
name = "orders"
mode = "horizontal"
max_per_topic = 100

[backup]
log_dir = "/var/lib/cirrus/log"
poll_interval_secs = 60

[backup.naming]
prefix = "bkp"

[[backup.tables]]
source_table = "customers"
incremental_frequency_secs = 3600
switch_target_frequency_secs = 604800
retention_secs = 2592000
mode = "incremental"
timeout_secs = 900
"#;

    #[test]
    fn parses_full_sample() {
        let config = CirrusConfig::parse(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.retry, RetryPolicy::new(3, Duration::from_millis(250)));

        let orders = config.topology("orders").unwrap();
        assert_eq!(orders.mode, ScalingMode::Horizontal);
        assert_eq!(orders.max_per_topic, 100);
        assert_eq!(orders.expected_subscribers, 2000);
        assert_eq!(orders.emit_parallelism, 16);

        let backup = config.backup.unwrap();
        assert_eq!(backup.poll_interval, Duration::from_secs(60));
        assert_eq!(backup.naming.prefix, "bkp");
        let customers = &backup.tables[0];
        assert_eq!(customers.incremental_frequency, Duration::from_secs(3600));
        assert_eq!(customers.mode, BackupMode::Incremental);
        assert_eq!(customers.timeout, Duration::from_secs(900));
    }

    #[test]
    fn defaults_apply_to_empty_config() {
        let config = CirrusConfig::parse("").unwrap();
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.topologies.is_empty());
        assert!(config.backup.is_none());
        assert_eq!(config.jobs.timeout, Duration::from_secs(3600));
    }

    #[test]
    fn rejects_fan_out_below_two() {
        let config = CirrusConfig::parse(
            r#"
[[topologies]]
name = "orders"
max_per_topic = 1
"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn rejects_zero_retention() {
        let config = CirrusConfig::parse(
            r#"
[backup.naming]
prefix = "bkp"

[[backup.tables]]
source_table = "customers"
incremental_frequency_secs = 3600
switch_target_frequency_secs = 86400
retention_secs = 0
"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(EngineError::Config(msg)) if msg.contains("retention_secs")));
    }

    #[test]
    fn rejects_duplicate_backup_tables() {
        let config = CirrusConfig::parse(
            r#"
[backup.naming]
prefix = "bkp"

[[backup.tables]]
source_table = "customers"
incremental_frequency_secs = 3600
switch_target_frequency_secs = 86400
retention_secs = 604800

[[backup.tables]]
source_table = "customers"
incremental_frequency_secs = 60
switch_target_frequency_secs = 86400
retention_secs = 604800
"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }
}
