use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use cirrus_api::BoxFuture;
use cirrus_api::backup::{BackupLog, BackupRecord, LogQuery, sort_newest_first};
use cirrus_api::error::ServiceError;

// ════════════════════════════════════════════════════════════════
//  FileBackupLog
// ════════════════════════════════════════════════════════════════

/// Backup management log stored as JSONL, one file per source table:
/// `{data_dir}/{source_table}.jsonl`.
///
/// A row whose start timestamp matches an existing row replaces it. Files
/// are rewritten through a temporary file and a rename.
#[derive(Clone)]
pub struct FileBackupLog {
    data_dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileBackupLog {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn partition_path(&self, source_table: &str) -> Result<PathBuf, ServiceError> {
        if source_table.is_empty()
            || source_table.starts_with('.')
            || source_table.contains(['/', '\\'])
        {
            return Err(ServiceError::config(format!(
                "source table '{source_table}' cannot be used as a log file name"
            )));
        }
        Ok(self.data_dir.join(format!("{source_table}.jsonl")))
    }

    // ── Insert ──

    fn do_insert(&self, record: &BackupRecord) -> Result<(), ServiceError> {
        let path = self.partition_path(record.partition_key())?;
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| ServiceError::io(format!("mkdir {}: {e}", self.data_dir.display())))?;

        let mut rows = read_rows(&path)?;
        let row_key = record.row_key();
        match rows.iter_mut().find(|r| r.row_key() == row_key) {
            Some(existing) => *existing = record.clone(),
            None => rows.push(record.clone()),
        }

        let tmp = path.with_extension("jsonl.tmp");
        {
            let f = std::fs::File::create(&tmp)
                .map_err(|e| ServiceError::io(format!("create {}: {e}", tmp.display())))?;
            let mut w = std::io::BufWriter::new(f);
            for row in &rows {
                let line = serde_json::to_string(row)?;
                writeln!(w, "{line}").map_err(|e| ServiceError::io(format!("write: {e}")))?;
            }
            w.flush().map_err(|e| ServiceError::io(format!("flush: {e}")))?;
        }
        std::fs::rename(&tmp, &path)
            .map_err(|e| ServiceError::io(format!("rename {}: {e}", tmp.display())))?;

        tracing::debug!(source_table = %record.source_table_name, row_key = %row_key, status = ?record.status, "backup log row written");
        Ok(())
    }

    // ── Query ──

    fn do_query(&self, query: &LogQuery) -> Result<Vec<BackupRecord>, ServiceError> {
        let paths = match query.source_table {
            Some(ref source) => vec![self.partition_path(source)?],
            None => self.all_partition_files()?,
        };

        let mut result = Vec::new();
        for path in &paths {
            result.extend(read_rows(path)?.into_iter().filter(|r| query.matches(r)));
        }
        sort_newest_first(&mut result);
        if let Some(limit) = query.limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    fn all_partition_files(&self) -> Result<Vec<PathBuf>, ServiceError> {
        let dir = match std::fs::read_dir(&self.data_dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ServiceError::io(format!("read dir {}: {e}", self.data_dir.display()))),
        };

        let mut files = Vec::new();
        for entry in dir {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    // ── Drop ──

    fn do_delete(&self) -> Result<bool, ServiceError> {
        if !self.data_dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&self.data_dir)
            .map_err(|e| ServiceError::io(format!("remove {}: {e}", self.data_dir.display())))?;
        tracing::info!(dir = %self.data_dir.display(), "backup log dropped");
        Ok(true)
    }
}

// ════════════════════════════════════════════════════════════════
//  BackupLog impl
// ════════════════════════════════════════════════════════════════

impl BackupLog for FileBackupLog {
    fn insert(&self, record: &BackupRecord) -> BoxFuture<'_, Result<(), ServiceError>> {
        let record = record.clone();
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            self.do_insert(&record)
        })
    }

    fn query(&self, query: &LogQuery) -> BoxFuture<'_, Result<Vec<BackupRecord>, ServiceError>> {
        let query = query.clone();
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            self.do_query(&query)
        })
    }

    fn delete_if_exists(&self) -> BoxFuture<'_, Result<bool, ServiceError>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            self.do_delete()
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  Helpers
// ════════════════════════════════════════════════════════════════

/// All rows of one partition file. Missing file → no rows.
fn read_rows(path: &Path) -> Result<Vec<BackupRecord>, ServiceError> {
    let f = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ServiceError::io(format!("open {}: {e}", path.display()))),
    };

    let mut rows = Vec::new();
    for (n, line) in std::io::BufReader::new(f).lines().enumerate() {
        let line = line.map_err(|e| ServiceError::io(format!("read line: {e}")))?;
        if line.trim().is_empty() {
            continue;
        }
        let row: BackupRecord = serde_json::from_str(&line)
            .map_err(|e| ServiceError::format(format!("{}:{}: {e}", path.display(), n + 1)))?;
        rows.push(row);
    }
    Ok(rows)
}
