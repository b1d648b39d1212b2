use std::sync::Arc;

use chrono::{DateTime, Utc};

use cirrus_api::backup::{
    BackupLog, BackupMode, BackupRecord, BackupStatus, BackupStorage, CopyRequest, CopyService, LogQuery,
};

use crate::backup::schedule::{BackupPlan, PlannedRun, RunKind, SkipReason, plan_backup};
use crate::backup::{TableBackupSetup, TargetNaming};
use crate::clock::{Clock, SystemClock};
use crate::error::EngineError;
use crate::progress::{self, ProgressEvent, ProgressSink};
use crate::retry::{RetryPolicy, with_retry};

/// What a call to [`BackupRunner::run`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    NotDue { next_due: DateTime<Utc> },
    InProgress { started_at: DateTime<Utc> },
    FirstBackupDone { target_account: String },
    BackupToNewContainerDone { target_account: String },
    BackupToExistingContainerDone { target_account: String, mode: BackupMode },
}

/// Runs one backup of one table: plan from the log, copy, record the outcome.
///
/// Holds no schedule state between runs; the management log decides.
pub struct BackupRunner {
    log: Arc<dyn BackupLog>,
    storage: Arc<dyn BackupStorage>,
    copier: Arc<dyn CopyService>,
    naming: TargetNaming,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl BackupRunner {
    pub fn new(
        log: Arc<dyn BackupLog>,
        storage: Arc<dyn BackupStorage>,
        copier: Arc<dyn CopyService>,
        naming: TargetNaming,
    ) -> Self {
        Self {
            log,
            storage,
            copier,
            naming,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
            progress: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn naming(&self) -> &TargetNaming {
        &self.naming
    }

    /// Current time according to the runner's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// What `run` would do right now, without side effects.
    pub async fn plan(&self, setup: &TableBackupSetup) -> Result<BackupPlan, EngineError> {
        let history = self.history(&setup.source_table).await?;
        plan_backup(&history, setup, &self.naming, self.clock.now())
    }

    pub async fn run(&self, setup: &TableBackupSetup) -> Result<BackupOutcome, EngineError> {
        let source = setup.source_table.as_str();
        let history = self.history(source).await?;
        let now = self.clock.now();

        let mut run = match plan_backup(&history, setup, &self.naming, now)? {
            BackupPlan::Skip(SkipReason::NotDue { next_due }) => {
                tracing::debug!(source_table = %source, %next_due, "backup not due");
                return Ok(BackupOutcome::NotDue { next_due });
            }
            BackupPlan::Skip(SkipReason::InProgress { started_at }) => {
                tracing::info!(source_table = %source, %started_at, "backup already in progress, skipping");
                return Ok(BackupOutcome::InProgress { started_at });
            }
            BackupPlan::Run(run) => run,
        };

        self.prepare_target(&mut run).await?;

        let mut record = BackupRecord {
            source_table_name: source.to_string(),
            target_storage_account_name: run.target_account.clone(),
            target_table_name: run.target_table.clone(),
            date_created: now,
            backup_started_at: now,
            backup_finished_at: None,
            status: BackupStatus::Running,
            mode: run.mode,
        };
        self.write(&record).await?;

        tracing::info!(
            source_table = %source,
            target_account = %run.target_account,
            kind = ?run.kind,
            mode = %run.mode,
            "backup started"
        );
        progress::report(
            self.progress.as_ref(),
            ProgressEvent::BackupStarted {
                source_table: source.to_string(),
                target_account: run.target_account.clone(),
            },
        );

        let mut errors = self.copy(setup, &run).await;

        record.backup_finished_at = Some(self.clock.now());
        record.status = if errors.is_empty() { BackupStatus::Success } else { BackupStatus::Failure };
        if let Err(e) = self.write(&record).await {
            if errors.is_empty() {
                return Err(e);
            }
            errors.push(format!("recording failure: {e}"));
        }

        progress::report(
            self.progress.as_ref(),
            ProgressEvent::BackupFinished {
                source_table: source.to_string(),
                success: errors.is_empty(),
            },
        );

        if !errors.is_empty() {
            tracing::warn!(source_table = %source, errors = errors.len(), "backup failed");
            return Err(EngineError::CopyFailed {
                source_table: source.to_string(),
                errors,
            });
        }

        tracing::info!(source_table = %source, target_account = %run.target_account, "backup finished");
        Ok(match run.kind {
            RunKind::FirstRun => BackupOutcome::FirstBackupDone {
                target_account: run.target_account,
            },
            RunKind::SwitchTarget => BackupOutcome::BackupToNewContainerDone {
                target_account: run.target_account,
            },
            RunKind::ExistingTarget => BackupOutcome::BackupToExistingContainerDone {
                target_account: run.target_account,
                mode: run.mode,
            },
        })
    }

    async fn history(&self, source: &str) -> Result<Vec<BackupRecord>, EngineError> {
        let log = self.log.as_ref();
        let query = LogQuery::for_source(source);
        let q = &query;
        let rows = with_retry(&self.retry, "query backup log", move || log.query(q))
            .await
            .map_err(|e| e.with_context(format!("backup log for '{source}'")))?;
        Ok(rows)
    }

    /// Make sure the target account exists. A current target that vanished
    /// (deleted by hand or by retention) is recreated and gets a full copy,
    /// and so does a current target whose table is gone.
    async fn prepare_target(&self, run: &mut PlannedRun) -> Result<(), EngineError> {
        let storage = self.storage.as_ref();
        let account = run.target_account.as_str();

        if !run.new_target {
            let exists = with_retry(&self.retry, "check target account", move || {
                storage.account_exists(account)
            })
            .await?;
            if exists {
                let tables = with_retry(&self.retry, "list target tables", move || storage.list_tables(account))
                    .await
                    .map_err(|e| EngineError::from(e).with_context(format!("target account '{account}'")))?;
                if !tables.iter().any(|t| *t == run.target_table) && run.mode == BackupMode::Incremental {
                    tracing::warn!(
                        target_account = %account,
                        target_table = %run.target_table,
                        "backup target table is gone, taking a full copy"
                    );
                    run.mode = BackupMode::Full;
                    run.filter = None;
                }
                return Ok(());
            }
            tracing::warn!(target_account = %account, "current backup target is gone, recreating with a full copy");
            run.mode = BackupMode::Full;
            run.filter = None;
        }

        with_retry(&self.retry, "create target account", move || storage.create_account(account))
            .await
            .map_err(|e| EngineError::from(e).with_context(format!("target account '{account}'")))
    }

    async fn write(&self, record: &BackupRecord) -> Result<(), EngineError> {
        let log = self.log.as_ref();
        with_retry(&self.retry, "write backup record", move || log.insert(record)).await?;
        Ok(())
    }

    /// Copy under the setup timeout. Returns every error reported.
    async fn copy(&self, setup: &TableBackupSetup, run: &PlannedRun) -> Vec<String> {
        let request = CopyRequest {
            source_table: setup.source_table.clone(),
            target_account: run.target_account.clone(),
            target_table: run.target_table.clone(),
            filter: run.filter.clone(),
            timeout: setup.timeout,
        };
        match tokio::time::timeout(setup.timeout, self.copier.copy(&request)).await {
            Ok(Ok(report)) => {
                tracing::debug!(source_table = %request.source_table, rows = report.rows_copied, "copy returned");
                report.errors
            }
            Ok(Err(e)) => vec![e.to_string()],
            Err(_) => vec![format!("copy timed out after {}s", setup.timeout.as_secs())],
        }
    }
}
