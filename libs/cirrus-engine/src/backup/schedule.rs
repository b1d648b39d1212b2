use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};

use cirrus_api::backup::{BackupMode, BackupRecord, BackupStatus, row_key_for};

use crate::backup::{TableBackupSetup, TargetNaming};
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The last run started within the incremental frequency.
    NotDue { next_due: DateTime<Utc> },
    /// A run started recently and has not written its completion row yet.
    InProgress { started_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// No history for the source yet.
    FirstRun,
    /// The current target account is older than the switch frequency.
    SwitchTarget,
    /// Keep writing into the current target account.
    ExistingTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRun {
    pub kind: RunKind,
    pub target_account: String,
    pub target_table: String,
    pub mode: BackupMode,
    /// Source row filter for incremental copies.
    pub filter: Option<String>,
    /// The target account has to be created before copying.
    pub new_target: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupPlan {
    Skip(SkipReason),
    Run(PlannedRun),
}

/// Source filter selecting rows changed after `since`.
pub fn incremental_filter(since: DateTime<Utc>) -> String {
    format!("Timestamp gt datetime'{}'", row_key_for(since))
}

/// Decide what the next backup of `setup.source_table` should do.
///
/// `history` may contain rows of other sources; they are ignored. Order does
/// not matter.
pub fn plan_backup(
    history: &[BackupRecord],
    setup: &TableBackupSetup,
    naming: &TargetNaming,
    now: DateTime<Utc>,
) -> Result<BackupPlan, EngineError> {
    let mut rows: Vec<&BackupRecord> = history
        .iter()
        .filter(|r| r.source_table_name == setup.source_table)
        .collect();
    rows.sort_by(|a, b| b.backup_started_at.cmp(&a.backup_started_at));

    let Some(last) = rows.first() else {
        return Ok(BackupPlan::Run(new_target(RunKind::FirstRun, setup, naming, now)?));
    };

    let since_start = now - last.backup_started_at;
    if last.status == BackupStatus::Running && since_start < delta(setup.timeout) {
        return Ok(BackupPlan::Skip(SkipReason::InProgress {
            started_at: last.backup_started_at,
        }));
    }

    if since_start <= delta(setup.incremental_frequency) {
        return Ok(BackupPlan::Skip(SkipReason::NotDue {
            next_due: last
                .backup_started_at
                .checked_add_signed(delta(setup.incremental_frequency))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }));
    }

    let target = naming.parse(&last.target_storage_account_name)?;
    let target_created = target.created_date.and_time(NaiveTime::MIN).and_utc();
    if now - target_created > delta(setup.switch_target_frequency) {
        return Ok(BackupPlan::Run(new_target(RunKind::SwitchTarget, setup, naming, now)?));
    }

    let target_table = setup.target_table();
    let baseline = match setup.mode {
        BackupMode::Full => None,
        BackupMode::Incremental => rows.iter().find(|r| {
            r.status == BackupStatus::Success
                && r.target_storage_account_name == target.account_name
                && r.target_table_name == target_table
        }),
    };

    Ok(BackupPlan::Run(PlannedRun {
        kind: RunKind::ExistingTarget,
        target_account: target.account_name,
        target_table: target_table.to_string(),
        mode: if baseline.is_some() { BackupMode::Incremental } else { BackupMode::Full },
        filter: baseline.map(|r| incremental_filter(r.backup_started_at)),
        new_target: false,
    }))
}

fn new_target(
    kind: RunKind,
    setup: &TableBackupSetup,
    naming: &TargetNaming,
    now: DateTime<Utc>,
) -> Result<PlannedRun, EngineError> {
    Ok(PlannedRun {
        kind,
        target_account: naming.format(now.date_naive())?,
        target_table: setup.target_table().to_string(),
        mode: BackupMode::Full,
        filter: None,
        new_target: true,
    })
}

fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);
    const DAY: Duration = Duration::from_secs(86_400);

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn setup() -> TableBackupSetup {
        TableBackupSetup::new("customers", HOUR, 7 * DAY, 30 * DAY).with_mode(BackupMode::Incremental)
    }

    fn record(account: &str, started: DateTime<Utc>, status: BackupStatus) -> BackupRecord {
        BackupRecord {
            source_table_name: "customers".into(),
            target_storage_account_name: account.into(),
            target_table_name: "customers".into(),
            date_created: started,
            backup_started_at: started,
            backup_finished_at: (status != BackupStatus::Running).then_some(started),
            status,
            mode: BackupMode::Full,
        }
    }

    fn plan(history: &[BackupRecord], now: DateTime<Utc>) -> BackupPlan {
        plan_backup(history, &setup(), &TargetNaming::new("bkp"), now).unwrap()
    }

    #[test]
    fn first_run_is_full_into_todays_target() {
        let BackupPlan::Run(run) = plan(&[], at(2024, 3, 10, 12)) else { panic!("expected a run") };
        assert_eq!(run.kind, RunKind::FirstRun);
        assert_eq!(run.target_account, "bkp20240310");
        assert_eq!(run.mode, BackupMode::Full);
        assert!(run.new_target);
        assert!(run.filter.is_none());
    }

    #[test]
    fn not_due_within_frequency() {
        let now = at(2024, 3, 10, 12);
        let history = [record("bkp20240310", now, BackupStatus::Success)];
        assert_eq!(
            plan(&history, now),
            BackupPlan::Skip(SkipReason::NotDue { next_due: at(2024, 3, 10, 13) })
        );
        // Exactly one frequency later is still not due.
        assert!(matches!(plan(&history, at(2024, 3, 10, 13)), BackupPlan::Skip(SkipReason::NotDue { .. })));
    }

    #[test]
    fn incremental_filter_references_last_success() {
        let first = at(2024, 3, 10, 10);
        let history = [
            record("bkp20240310", first, BackupStatus::Success),
            record("bkp20240310", at(2024, 3, 10, 11), BackupStatus::Failure),
        ];
        let BackupPlan::Run(run) = plan(&history, at(2024, 3, 10, 13)) else { panic!("expected a run") };
        assert_eq!(run.kind, RunKind::ExistingTarget);
        assert_eq!(run.target_account, "bkp20240310");
        assert_eq!(run.mode, BackupMode::Incremental);
        assert_eq!(
            run.filter.as_deref(),
            Some("Timestamp gt datetime'2024-03-10T10:00:00.000Z'")
        );
        assert!(!run.new_target);
    }

    #[test]
    fn incremental_without_success_falls_back_to_full() {
        let history = [record("bkp20240310", at(2024, 3, 10, 10), BackupStatus::Failure)];
        let BackupPlan::Run(run) = plan(&history, at(2024, 3, 10, 13)) else { panic!("expected a run") };
        assert_eq!(run.kind, RunKind::ExistingTarget);
        assert_eq!(run.mode, BackupMode::Full);
        assert!(run.filter.is_none());
    }

    #[test]
    fn old_target_switches() {
        let history = [record("bkp20240301", at(2024, 3, 9, 10), BackupStatus::Success)];
        let BackupPlan::Run(run) = plan(&history, at(2024, 3, 9, 12)) else { panic!("expected a run") };
        assert_eq!(run.kind, RunKind::SwitchTarget);
        assert_eq!(run.target_account, "bkp20240309");
        assert_eq!(run.mode, BackupMode::Full);
        assert!(run.new_target);
    }

    #[test]
    fn recent_running_row_means_in_progress() {
        let started = at(2024, 3, 10, 10);
        let history = [record("bkp20240310", started, BackupStatus::Running)];
        assert_eq!(
            plan(&history, at(2024, 3, 10, 10) + TimeDelta::minutes(30)),
            BackupPlan::Skip(SkipReason::InProgress { started_at: started })
        );
    }

    #[test]
    fn stale_running_row_is_treated_as_failed() {
        let history = [
            record("bkp20240310", at(2024, 3, 10, 6), BackupStatus::Success),
            record("bkp20240310", at(2024, 3, 10, 8), BackupStatus::Running),
        ];
        let BackupPlan::Run(run) = plan(&history, at(2024, 3, 10, 12)) else { panic!("expected a run") };
        assert_eq!(
            run.filter.as_deref(),
            Some("Timestamp gt datetime'2024-03-10T06:00:00.000Z'")
        );
    }

    #[test]
    fn other_sources_are_ignored() {
        let mut other = record("bkp20240310", at(2024, 3, 10, 12), BackupStatus::Success);
        other.source_table_name = "orders".into();
        let BackupPlan::Run(run) = plan(&[other], at(2024, 3, 10, 12)) else { panic!("expected a run") };
        assert_eq!(run.kind, RunKind::FirstRun);
    }

    #[test]
    fn malformed_target_name_is_an_error() {
        let history = [record("somethingelse", at(2024, 3, 10, 6), BackupStatus::Success)];
        let result = plan_backup(&history, &setup(), &TargetNaming::new("bkp"), at(2024, 3, 10, 12));
        assert!(matches!(result, Err(EngineError::Naming { .. })));
    }
}
