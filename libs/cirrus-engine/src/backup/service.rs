use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backup::{BackupOutcome, BackupRunner, RetentionSweeper, SweepReport, TableBackupSetup};

/// Result of one pass over every configured table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub outcomes: Vec<(String, BackupOutcome)>,
    pub failures: Vec<String>,
    pub sweep: Option<SweepReport>,
}

/// Background task that runs the backup schedule every `poll_interval`.
pub struct BackupService {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl BackupService {
    pub fn spawn(
        runner: Arc<BackupRunner>,
        setups: Vec<TableBackupSetup>,
        sweeper: Option<Arc<RetentionSweeper>>,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_cycle(&runner, &setups, sweeper.as_deref()).await;
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("backup service shutting down");
                        break;
                    }
                }
            }
        });

        tracing::info!(poll_interval_secs = poll_interval.as_secs(), "spawned backup service");
        Self { handle, shutdown_tx }
    }

    /// Signal the task and wait for the current cycle to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "backup service task failed");
        }
    }
}

/// Run every due backup once, then sweep expired artifacts.
///
/// One table failing does not stop the others.
pub async fn run_cycle(
    runner: &BackupRunner,
    setups: &[TableBackupSetup],
    sweeper: Option<&RetentionSweeper>,
) -> CycleReport {
    let mut report = CycleReport::default();

    for setup in setups {
        match runner.run(setup).await {
            Ok(outcome) => report.outcomes.push((setup.source_table.clone(), outcome)),
            Err(e) => {
                tracing::error!(source_table = %setup.source_table, error = %e, "backup run failed");
                report.failures.push(format!("{}: {e}", setup.source_table));
            }
        }
    }

    if let Some(sweeper) = sweeper {
        match sweeper.sweep(runner.now()).await {
            Ok(sweep) => report.sweep = Some(sweep),
            Err(e) => {
                tracing::error!(error = %e, "retention sweep failed");
                report.failures.push(format!("retention: {e}"));
            }
        }
    }
    report
}
