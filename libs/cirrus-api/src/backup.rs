use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::BoxFuture;
use crate::error::ServiceError;

// ---------------------------------------------------------------------------
// Backup management log records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    /// Written before the copy starts; replaced on completion.
    Running,
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupMode {
    #[default]
    Full,
    Incremental,
}

impl std::fmt::Display for BackupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupMode::Full => write!(f, "full"),
            BackupMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// One backup run attempt.
///
/// Partition key is the source table, row key is the start timestamp, so a
/// completion write with the same start time replaces the start row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub source_table_name: String,
    pub target_storage_account_name: String,
    pub target_table_name: String,
    pub date_created: DateTime<Utc>,
    pub backup_started_at: DateTime<Utc>,
    #[serde(default)]
    pub backup_finished_at: Option<DateTime<Utc>>,
    pub status: BackupStatus,
    pub mode: BackupMode,
}

impl BackupRecord {
    pub fn partition_key(&self) -> &str {
        &self.source_table_name
    }

    pub fn row_key(&self) -> String {
        row_key_for(self.backup_started_at)
    }

    pub fn is_finished(&self) -> bool {
        self.backup_finished_at.is_some()
    }
}

/// Row key token for a start timestamp (RFC 3339, millisecond precision).
pub fn row_key_for(started_at: DateTime<Utc>) -> String {
    started_at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Filter for `BackupLog::query`. Empty query returns the whole log.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub source_table: Option<String>,
    pub target_account: Option<String>,
    /// Maximum number of rows. When present, the newest N.
    pub limit: Option<usize>,
}

impl LogQuery {
    pub fn for_source(source_table: impl Into<String>) -> Self {
        Self {
            source_table: Some(source_table.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &BackupRecord) -> bool {
        if let Some(ref source) = self.source_table {
            if record.source_table_name != *source {
                return false;
            }
        }
        if let Some(ref account) = self.target_account {
            if record.target_storage_account_name != *account {
                return false;
            }
        }
        true
    }
}

/// Sort rows the way `BackupLog::query` must return them: newest start first.
pub fn sort_newest_first(records: &mut [BackupRecord]) {
    records.sort_by(|a, b| b.backup_started_at.cmp(&a.backup_started_at));
}

/// Durable, table-shaped backup management log.
pub trait BackupLog: Send + Sync {
    /// Insert or replace the row with the same partition key and row key.
    fn insert(&self, record: &BackupRecord) -> BoxFuture<'_, Result<(), ServiceError>>;

    /// Rows matching `query`, ordered by `backup_started_at` descending.
    fn query(&self, query: &LogQuery) -> BoxFuture<'_, Result<Vec<BackupRecord>, ServiceError>>;

    /// Drop the whole log. Returns `false` when there was nothing to drop.
    fn delete_if_exists(&self) -> BoxFuture<'_, Result<bool, ServiceError>>;
}

// ---------------------------------------------------------------------------
// Backup target storage
// ---------------------------------------------------------------------------

/// Admin plane of the storage service that holds backup accounts and tables.
pub trait BackupStorage: Send + Sync {
    fn account_exists(&self, account: &str) -> BoxFuture<'_, Result<bool, ServiceError>>;

    /// Create an account. Existing account is not an error.
    fn create_account(&self, account: &str) -> BoxFuture<'_, Result<(), ServiceError>>;

    /// Names of all tables in an account. Missing account → `NotFound`.
    fn list_tables(&self, account: &str) -> BoxFuture<'_, Result<Vec<String>, ServiceError>>;

    fn delete_table(&self, account: &str, table: &str) -> BoxFuture<'_, Result<(), ServiceError>>;

    fn delete_account(&self, account: &str) -> BoxFuture<'_, Result<(), ServiceError>>;
}

// ---------------------------------------------------------------------------
// Copy service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub source_table: String,
    pub target_account: String,
    pub target_table: String,
    /// Source-side row filter, e.g. `Timestamp gt datetime'...'`.
    pub filter: Option<String>,
    pub timeout: Duration,
}

/// Result of a copy. Non-empty `errors` means the copy failed (possibly partially).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub rows_copied: u64,
    pub errors: Vec<String>,
}

impl CopyReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Vendor-specific table copy. Possibly slow; callers enforce the timeout.
pub trait CopyService: Send + Sync {
    fn copy(&self, request: &CopyRequest) -> BoxFuture<'_, Result<CopyReport, ServiceError>>;
}
