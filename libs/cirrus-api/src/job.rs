use crate::BoxFuture;
use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskState {
    Preparing,
    Running,
    Completed,
}

/// A file staged onto compute nodes before tasks start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFile {
    pub source_url: String,
    pub file_path: String,
}

/// A job to run on an existing compute pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub pool_id: String,
    pub job_id: String,
    pub resource_files: Vec<ResourceFile>,
    /// One task per command line.
    pub task_commands: Vec<String>,
}

/// Status of one task as reported by the job service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub task_id: String,
    pub state: TaskState,
    pub exit_code: Option<i32>,
    pub failure: Option<String>,
}

impl TaskInfo {
    pub fn has_failed(&self) -> bool {
        self.failure.is_some() || self.exit_code.is_some_and(|c| c != 0)
    }
}

/// Batch compute job service.
pub trait JobService: Send + Sync {
    fn submit_job(&self, spec: &JobSpec) -> BoxFuture<'_, Result<(), ServiceError>>;

    fn list_tasks(&self, job_id: &str) -> BoxFuture<'_, Result<Vec<TaskInfo>, ServiceError>>;

    fn terminate_job(&self, job_id: &str) -> BoxFuture<'_, Result<(), ServiceError>>;
}
