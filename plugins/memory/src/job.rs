use std::collections::HashMap;

use tokio::sync::Mutex;

use cirrus_api::BoxFuture;
use cirrus_api::error::ServiceError;
use cirrus_api::job::{JobService, JobSpec, TaskInfo, TaskState};

use crate::Faults;

struct Job {
    tasks: Vec<TaskInfo>,
    terminated: bool,
}

/// Job service whose tasks move one state forward per `list_tasks` call.
#[derive(Default)]
pub struct MemoryJobService {
    jobs: Mutex<HashMap<String, Job>>,
    exit_codes: Mutex<HashMap<usize, i32>>,
    stuck: bool,
    faults: Faults,
}

impl MemoryJobService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks never leave `Preparing`.
    pub fn stuck() -> Self {
        Self {
            stuck: true,
            ..Self::default()
        }
    }

    pub fn fail_next(&self, count: u32) {
        self.faults.arm(count);
    }

    /// Task number `index` (0-based) of every job exits with `code`.
    pub async fn set_exit_code(&self, index: usize, code: i32) {
        self.exit_codes.lock().await.insert(index, code);
    }

    pub async fn is_terminated(&self, job_id: &str) -> bool {
        self.jobs.lock().await.get(job_id).is_some_and(|j| j.terminated)
    }
}

impl JobService for MemoryJobService {
    fn submit_job(&self, spec: &JobSpec) -> BoxFuture<'_, Result<(), ServiceError>> {
        let spec = spec.clone();
        Box::pin(async move {
            self.faults.check("submit_job")?;
            let mut jobs = self.jobs.lock().await;
            if jobs.contains_key(&spec.job_id) {
                return Err(ServiceError::conflict(format!("job '{}' exists", spec.job_id)));
            }
            let tasks = (0..spec.task_commands.len())
                .map(|i| TaskInfo {
                    task_id: format!("task-{i}"),
                    state: TaskState::Preparing,
                    exit_code: None,
                    failure: None,
                })
                .collect();
            jobs.insert(spec.job_id, Job { tasks, terminated: false });
            Ok(())
        })
    }

    fn list_tasks(&self, job_id: &str) -> BoxFuture<'_, Result<Vec<TaskInfo>, ServiceError>> {
        let job_id = job_id.to_string();
        Box::pin(async move {
            self.faults.check("list_tasks")?;
            let exit_codes = self.exit_codes.lock().await.clone();
            let mut jobs = self.jobs.lock().await;
            let job = jobs
                .get_mut(&job_id)
                .ok_or_else(|| ServiceError::not_found(format!("job '{job_id}'")))?;
            if !self.stuck && !job.terminated {
                for (index, task) in job.tasks.iter_mut().enumerate() {
                    task.state = match task.state {
                        TaskState::Preparing => TaskState::Running,
                        TaskState::Running | TaskState::Completed => {
                            task.exit_code = Some(exit_codes.get(&index).copied().unwrap_or(0));
                            TaskState::Completed
                        }
                    };
                }
            }
            Ok(job.tasks.clone())
        })
    }

    fn terminate_job(&self, job_id: &str) -> BoxFuture<'_, Result<(), ServiceError>> {
        let job_id = job_id.to_string();
        Box::pin(async move {
            self.faults.check("terminate_job")?;
            let mut jobs = self.jobs.lock().await;
            let job = jobs
                .get_mut(&job_id)
                .ok_or_else(|| ServiceError::not_found(format!("job '{job_id}'")))?;
            job.terminated = true;
            Ok(())
        })
    }
}
