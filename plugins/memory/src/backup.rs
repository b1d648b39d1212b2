use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use cirrus_api::BoxFuture;
use cirrus_api::backup::{
    BackupLog, BackupRecord, BackupStorage, CopyReport, CopyRequest, CopyService, LogQuery, sort_newest_first,
};
use cirrus_api::error::ServiceError;

use crate::Faults;

// ═══════════════════════════════════════════════════════════════
//  MemoryBackupLog
// ═══════════════════════════════════════════════════════════════

/// Backup log keyed by (source table, start timestamp).
#[derive(Default)]
pub struct MemoryBackupLog {
    rows: RwLock<BTreeMap<(String, String), BackupRecord>>,
    faults: Faults,
}

impl MemoryBackupLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        self.faults.arm(count);
    }

    /// Every row, newest first.
    pub async fn records(&self) -> Vec<BackupRecord> {
        let mut rows: Vec<BackupRecord> = self.rows.read().await.values().cloned().collect();
        sort_newest_first(&mut rows);
        rows
    }
}

impl BackupLog for MemoryBackupLog {
    fn insert(&self, record: &BackupRecord) -> BoxFuture<'_, Result<(), ServiceError>> {
        let record = record.clone();
        Box::pin(async move {
            self.faults.check("insert")?;
            let key = (record.partition_key().to_string(), record.row_key());
            self.rows.write().await.insert(key, record);
            Ok(())
        })
    }

    fn query(&self, query: &LogQuery) -> BoxFuture<'_, Result<Vec<BackupRecord>, ServiceError>> {
        let query = query.clone();
        Box::pin(async move {
            self.faults.check("query")?;
            let mut rows: Vec<BackupRecord> = self
                .rows
                .read()
                .await
                .values()
                .filter(|r| query.matches(r))
                .cloned()
                .collect();
            sort_newest_first(&mut rows);
            if let Some(limit) = query.limit {
                rows.truncate(limit);
            }
            Ok(rows)
        })
    }

    fn delete_if_exists(&self) -> BoxFuture<'_, Result<bool, ServiceError>> {
        Box::pin(async move {
            self.faults.check("delete_if_exists")?;
            let mut rows = self.rows.write().await;
            let existed = !rows.is_empty();
            rows.clear();
            Ok(existed)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStorage
// ═══════════════════════════════════════════════════════════════

/// Storage accounts and the table names inside them.
#[derive(Default)]
pub struct MemoryStorage {
    accounts: RwLock<BTreeMap<String, BTreeSet<String>>>,
    faults: Faults,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        self.faults.arm(count);
    }

    /// Create the account if needed and put a table into it.
    pub async fn put_table(&self, account: &str, table: &str) {
        self.accounts
            .write()
            .await
            .entry(account.to_string())
            .or_default()
            .insert(table.to_string());
    }

    pub async fn accounts(&self) -> Vec<String> {
        self.accounts.read().await.keys().cloned().collect()
    }

    /// Tables of an account, `None` when the account does not exist.
    pub async fn tables(&self, account: &str) -> Option<Vec<String>> {
        self.accounts
            .read()
            .await
            .get(account)
            .map(|tables| tables.iter().cloned().collect())
    }
}

impl BackupStorage for MemoryStorage {
    fn account_exists(&self, account: &str) -> BoxFuture<'_, Result<bool, ServiceError>> {
        let account = account.to_string();
        Box::pin(async move {
            self.faults.check("account_exists")?;
            Ok(self.accounts.read().await.contains_key(&account))
        })
    }

    fn create_account(&self, account: &str) -> BoxFuture<'_, Result<(), ServiceError>> {
        let account = account.to_string();
        Box::pin(async move {
            self.faults.check("create_account")?;
            self.accounts.write().await.entry(account).or_default();
            Ok(())
        })
    }

    fn list_tables(&self, account: &str) -> BoxFuture<'_, Result<Vec<String>, ServiceError>> {
        let account = account.to_string();
        Box::pin(async move {
            self.faults.check("list_tables")?;
            self.tables(&account)
                .await
                .ok_or_else(|| ServiceError::not_found(format!("account '{account}'")))
        })
    }

    fn delete_table(&self, account: &str, table: &str) -> BoxFuture<'_, Result<(), ServiceError>> {
        let account = account.to_string();
        let table = table.to_string();
        Box::pin(async move {
            self.faults.check("delete_table")?;
            let mut accounts = self.accounts.write().await;
            let tables = accounts
                .get_mut(&account)
                .ok_or_else(|| ServiceError::not_found(format!("account '{account}'")))?;
            tables.remove(&table);
            Ok(())
        })
    }

    fn delete_account(&self, account: &str) -> BoxFuture<'_, Result<(), ServiceError>> {
        let account = account.to_string();
        Box::pin(async move {
            self.faults.check("delete_account")?;
            self.accounts.write().await.remove(&account);
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryCopyService
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct CopyBehavior {
    errors: Vec<String>,
    delay: Duration,
    rows: u64,
}

/// Copy service that materializes the target table in a [`MemoryStorage`].
pub struct MemoryCopyService {
    storage: Arc<MemoryStorage>,
    behavior: Mutex<CopyBehavior>,
    requests: Mutex<Vec<CopyRequest>>,
}

impl MemoryCopyService {
    pub fn new(storage: Arc<MemoryStorage>) -> Self {
        Self {
            storage,
            behavior: Mutex::new(CopyBehavior {
                rows: 1,
                ..CopyBehavior::default()
            }),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every following copy reports these errors and writes nothing.
    pub async fn fail_with(&self, errors: Vec<String>) {
        self.behavior.lock().await.errors = errors;
    }

    /// Every following copy takes this long.
    pub async fn set_delay(&self, delay: Duration) {
        self.behavior.lock().await.delay = delay;
    }

    /// Requests received so far, oldest first.
    pub async fn requests(&self) -> Vec<CopyRequest> {
        self.requests.lock().await.clone()
    }
}

impl CopyService for MemoryCopyService {
    fn copy(&self, request: &CopyRequest) -> BoxFuture<'_, Result<CopyReport, ServiceError>> {
        let request = request.clone();
        Box::pin(async move {
            self.requests.lock().await.push(request.clone());
            let (errors, delay, rows) = {
                let behavior = self.behavior.lock().await;
                (behavior.errors.clone(), behavior.delay, behavior.rows)
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !errors.is_empty() {
                return Ok(CopyReport { rows_copied: 0, errors });
            }
            if self.storage.tables(&request.target_account).await.is_none() {
                return Ok(CopyReport {
                    rows_copied: 0,
                    errors: vec![format!("target account '{}' not found", request.target_account)],
                });
            }
            self.storage.put_table(&request.target_account, &request.target_table).await;
            Ok(CopyReport {
                rows_copied: rows,
                errors: Vec::new(),
            })
        })
    }
}
