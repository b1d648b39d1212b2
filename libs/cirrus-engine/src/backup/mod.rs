mod naming;
mod retention;
mod runner;
mod schedule;
mod service;

use std::time::Duration;

use serde::Deserialize;

use cirrus_api::backup::BackupMode;

use crate::error::EngineError;

pub use naming::{BackupTargetDescriptor, TargetNaming};
pub use retention::{AccountPlan, RetentionPlan, RetentionSweeper, SweepReport};
pub use runner::{BackupOutcome, BackupRunner};
pub use schedule::{BackupPlan, PlannedRun, RunKind, SkipReason, incremental_filter, plan_backup};
pub use service::{BackupService, CycleReport, run_cycle};

/// Backup schedule of one source table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TableBackupSetup {
    pub source_table: String,
    /// Table name inside the target account. Defaults to the source name.
    #[serde(default)]
    pub target_table: Option<String>,
    #[serde(rename = "incremental_frequency_secs", with = "crate::config::secs")]
    pub incremental_frequency: Duration,
    /// Age of a target account after which a new one is started.
    #[serde(rename = "switch_target_frequency_secs", with = "crate::config::secs")]
    pub switch_target_frequency: Duration,
    #[serde(rename = "retention_secs", with = "crate::config::secs")]
    pub retention: Duration,
    #[serde(default)]
    pub mode: BackupMode,
    /// Copy timeout; also how long a `Running` row counts as in progress.
    #[serde(default = "default_timeout", rename = "timeout_secs", with = "crate::config::secs")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(3600)
}

impl TableBackupSetup {
    pub fn new(
        source_table: impl Into<String>,
        incremental_frequency: Duration,
        switch_target_frequency: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            source_table: source_table.into(),
            target_table: None,
            incremental_frequency,
            switch_target_frequency,
            retention,
            mode: BackupMode::Full,
            timeout: default_timeout(),
        }
    }

    pub fn with_mode(mut self, mode: BackupMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_target_table(mut self, table: impl Into<String>) -> Self {
        self.target_table = Some(table.into());
        self
    }

    pub fn target_table(&self) -> &str {
        self.target_table.as_deref().unwrap_or(&self.source_table)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let ctx = format!("backup table '{}'", self.source_table);
        if self.source_table.is_empty() {
            return Err(EngineError::Config("backup source_table must not be empty".into()));
        }
        if self.incremental_frequency.is_zero() {
            return Err(EngineError::Config(format!("{ctx}: incremental_frequency_secs must be positive")));
        }
        if self.switch_target_frequency.is_zero() {
            return Err(EngineError::Config(format!("{ctx}: switch_target_frequency_secs must be positive")));
        }
        if self.retention.is_zero() {
            return Err(EngineError::Config(format!("{ctx}: retention_secs must be positive")));
        }
        if self.timeout.is_zero() {
            return Err(EngineError::Config(format!("{ctx}: timeout_secs must be positive")));
        }
        if self.retention < self.incremental_frequency {
            tracing::warn!(
                source_table = %self.source_table,
                retention_secs = self.retention.as_secs(),
                incremental_frequency_secs = self.incremental_frequency.as_secs(),
                "retention is shorter than the backup interval; tables may expire between runs"
            );
        }
        Ok(())
    }
}
