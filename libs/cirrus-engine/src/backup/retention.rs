use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use cirrus_api::backup::{BackupLog, BackupStorage, LogQuery};
use cirrus_api::error::ErrorKind;

use crate::backup::TableBackupSetup;
use crate::error::EngineError;
use crate::progress::{self, ProgressEvent, ProgressSink};
use crate::retry::{RetryPolicy, with_retry};

/// Retention decision for one target account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountPlan {
    pub account: String,
    pub expired_tables: Vec<String>,
    pub kept_tables: Vec<String>,
    /// Every table in the account is past retention.
    pub delete_account: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    pub accounts: Vec<AccountPlan>,
    /// Accounts that could not be inspected.
    pub failures: Vec<String>,
}

impl RetentionPlan {
    pub fn expired_table_count(&self) -> usize {
        self.accounts.iter().map(|a| a.expired_tables.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `(account, table)` pairs removed.
    pub deleted_tables: Vec<(String, String)>,
    pub deleted_accounts: Vec<String>,
    pub failures: Vec<String>,
}

struct TrackedTable {
    latest_start: DateTime<Utc>,
    retention: Option<Duration>,
}

impl TrackedTable {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.retention {
            Some(retention) => {
                now - self.latest_start > TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX)
            }
            None => false,
        }
    }
}

/// Deletes backup tables past their retention, and accounts once nothing in
/// them is worth keeping.
pub struct RetentionSweeper {
    log: Arc<dyn BackupLog>,
    storage: Arc<dyn BackupStorage>,
    retention: HashMap<String, Duration>,
    retry: RetryPolicy,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl RetentionSweeper {
    pub fn new(log: Arc<dyn BackupLog>, storage: Arc<dyn BackupStorage>, setups: &[TableBackupSetup]) -> Self {
        Self {
            log,
            storage,
            retention: setups
                .iter()
                .map(|s| (s.source_table.clone(), s.retention))
                .collect(),
            retry: RetryPolicy::default(),
            progress: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Work out what is expired at `now`. Deletes nothing.
    pub async fn plan(&self, now: DateTime<Utc>) -> Result<RetentionPlan, EngineError> {
        let tracked = self.tracked_tables().await?;
        let storage = self.storage.as_ref();
        let mut plan = RetentionPlan::default();

        for (account, tables) in tracked {
            let a = account.as_str();
            let listed = match with_retry(&self.retry, "list backup tables", move || storage.list_tables(a)).await {
                Ok(listed) => listed,
                Err(e) if e.kind == ErrorKind::NotFound => {
                    tracing::debug!(account = %account, "backup account no longer exists");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(account = %account, error = %e, "cannot list backup account");
                    plan.failures.push(format!("list tables of '{account}': {e}"));
                    continue;
                }
            };

            let (expired_tables, kept_tables): (Vec<String>, Vec<String>) = listed
                .into_iter()
                .partition(|table| tables.get(table).is_some_and(|t| t.is_expired(now)));
            let delete_account = kept_tables.is_empty() && tables.values().all(|t| t.is_expired(now));

            if !expired_tables.is_empty() || delete_account {
                plan.accounts.push(AccountPlan {
                    account,
                    expired_tables,
                    kept_tables,
                    delete_account,
                });
            }
        }
        Ok(plan)
    }

    /// Delete what [`plan`](Self::plan) finds expired.
    ///
    /// A table or account that cannot be deleted is reported and left for the
    /// next sweep; an account keeps existing while any of its tables does.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        let plan = self.plan(now).await?;
        let storage = self.storage.as_ref();
        let mut report = SweepReport {
            failures: plan.failures,
            ..SweepReport::default()
        };

        for account_plan in plan.accounts {
            let account = account_plan.account.as_str();
            let mut all_deleted = true;

            for table in &account_plan.expired_tables {
                let t = table.as_str();
                match with_retry(&self.retry, "delete backup table", move || storage.delete_table(account, t)).await {
                    Ok(()) => {
                        tracing::info!(account = %account, table = %table, "deleted expired backup table");
                        progress::report(
                            self.progress.as_ref(),
                            ProgressEvent::TableExpired {
                                account: account.to_string(),
                                table: table.clone(),
                            },
                        );
                        report.deleted_tables.push((account.to_string(), table.clone()));
                    }
                    Err(e) => {
                        all_deleted = false;
                        report.failures.push(format!("delete table '{account}/{table}': {e}"));
                    }
                }
            }

            if !(account_plan.delete_account && all_deleted) {
                continue;
            }
            match with_retry(&self.retry, "delete backup account", move || storage.delete_account(account)).await {
                Ok(()) => {
                    tracing::info!(account = %account, "deleted expired backup account");
                    progress::report(
                        self.progress.as_ref(),
                        ProgressEvent::AccountDeleted {
                            account: account.to_string(),
                        },
                    );
                    report.deleted_accounts.push(account.to_string());
                }
                Err(e) => report.failures.push(format!("delete account '{account}': {e}")),
            }
        }

        tracing::info!(
            tables = report.deleted_tables.len(),
            accounts = report.deleted_accounts.len(),
            failures = report.failures.len(),
            "retention sweep finished"
        );
        Ok(report)
    }

    /// Latest start per `(account, table)` over the whole log.
    async fn tracked_tables(&self) -> Result<BTreeMap<String, HashMap<String, TrackedTable>>, EngineError> {
        let log = self.log.as_ref();
        let query = LogQuery::default();
        let q = &query;
        let rows = with_retry(&self.retry, "query backup log", move || log.query(q)).await?;

        let mut tracked: BTreeMap<String, HashMap<String, TrackedTable>> = BTreeMap::new();
        for row in rows {
            let retention = self.retention.get(&row.source_table_name).copied();
            let entry = tracked
                .entry(row.target_storage_account_name)
                .or_default()
                .entry(row.target_table_name)
                .or_insert(TrackedTable {
                    latest_start: row.backup_started_at,
                    retention,
                });
            if row.backup_started_at >= entry.latest_start {
                entry.latest_start = row.backup_started_at;
                entry.retention = retention;
            }
        }
        Ok(tracked)
    }
}
