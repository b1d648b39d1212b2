use std::sync::Arc;

use cirrus_api::backup::{BackupLog, LogQuery};
use cirrus_engine::backup::{BackupPlan, RetentionSweeper, SkipReason, plan_backup};
use cirrus_engine::clock::{Clock, SystemClock};
use cirrus_engine::config::BackupConfig;
use cirrus_log_file::FileBackupLog;
use cirrus_memory::MemoryStorage;

use crate::cli::{BackupHistoryArgs, BackupPlanArgs};
use crate::cmd::load_config;
use crate::error::CliError;

fn backup_section(config_path: &str) -> Result<BackupConfig, CliError> {
    load_config(config_path)?.backup.ok_or(CliError::MissingSection("backup"))
}

pub async fn plan(config_path: &str, args: BackupPlanArgs) -> Result<(), CliError> {
    let backup = backup_section(config_path)?;
    let log = FileBackupLog::new(&backup.log_dir);
    let now = SystemClock.now();

    let setups: Vec<_> = backup
        .tables
        .iter()
        .filter(|s| args.table.as_deref().is_none_or(|t| t == s.source_table))
        .collect();
    if let Some(ref table) = args.table {
        if setups.is_empty() {
            return Err(CliError::NotConfigured {
                kind: "backup table",
                name: table.clone(),
            });
        }
    }

    for setup in setups {
        let history = log.query(&LogQuery::for_source(&setup.source_table)).await?;
        match plan_backup(&history, setup, &backup.naming, now)? {
            BackupPlan::Skip(SkipReason::NotDue { next_due }) => {
                println!("{}: not due until {next_due}", setup.source_table);
            }
            BackupPlan::Skip(SkipReason::InProgress { started_at }) => {
                println!("{}: run in progress since {started_at}", setup.source_table);
            }
            BackupPlan::Run(run) => {
                println!(
                    "{}: {:?}, {} copy into {}/{}{}",
                    setup.source_table,
                    run.kind,
                    run.mode,
                    run.target_account,
                    run.target_table,
                    run.filter.map(|f| format!(" where {f}")).unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

pub async fn history(config_path: &str, args: BackupHistoryArgs) -> Result<(), CliError> {
    let backup = backup_section(config_path)?;
    let log = FileBackupLog::new(&backup.log_dir);
    let rows = log
        .query(&LogQuery {
            source_table: args.table,
            target_account: None,
            limit: Some(args.limit),
        })
        .await?;

    for row in rows {
        let finished = row
            .backup_finished_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<24} {}/{}  {:?} {}  finished {finished}",
            row.backup_started_at.to_rfc3339(),
            row.source_table_name,
            row.target_storage_account_name,
            row.target_table_name,
            row.status,
            row.mode,
        );
    }
    Ok(())
}

/// Expiry as recorded in the log. Tables are taken from the log itself, so
/// tables that exist in an account without a log row are not shown.
pub async fn retention_plan(config_path: &str) -> Result<(), CliError> {
    let backup = backup_section(config_path)?;
    let log = Arc::new(FileBackupLog::new(&backup.log_dir));

    let storage = Arc::new(MemoryStorage::new());
    for row in log.query(&LogQuery::default()).await? {
        storage
            .put_table(&row.target_storage_account_name, &row.target_table_name)
            .await;
    }

    let sweeper = RetentionSweeper::new(log, storage, &backup.tables);
    let plan = sweeper.plan(SystemClock.now()).await?;
    if plan.accounts.is_empty() {
        println!("nothing is past retention");
    }
    for account in &plan.accounts {
        let verdict = if account.delete_account { "delete account" } else { "keep account" };
        println!("{} ({verdict})", account.account);
        for table in &account.expired_tables {
            println!("  expired: {table}");
        }
        for table in &account.kept_tables {
            println!("  kept:    {table}");
        }
    }
    Ok(())
}

pub async fn drop_log(config_path: &str) -> Result<(), CliError> {
    let backup = backup_section(config_path)?;
    let log = FileBackupLog::new(&backup.log_dir);
    if log.delete_if_exists().await? {
        println!("dropped backup log at {}", backup.log_dir);
    } else {
        println!("no backup log at {}", backup.log_dir);
    }
    Ok(())
}
