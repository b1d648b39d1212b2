use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use cirrus_api::job::{JobService, JobSpec, TaskInfo, TaskState};

use crate::config::JobsConfig;
use crate::error::EngineError;
use crate::progress::{self, ProgressEvent, ProgressSink};
use crate::retry::{RetryPolicy, with_retry};

/// Final state of a job whose tasks all completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub job_id: String,
    pub tasks: Vec<TaskInfo>,
    /// Tasks that completed with a non-zero exit code or a failure.
    pub failed: Vec<TaskInfo>,
}

impl JobSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Submits jobs and waits for their tasks under a wall-clock timeout.
pub struct JobMonitor {
    service: Arc<dyn JobService>,
    poll_interval: Duration,
    retry: RetryPolicy,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl JobMonitor {
    pub fn new(service: Arc<dyn JobService>) -> Self {
        Self {
            service,
            poll_interval: JobsConfig::default().poll_interval,
            retry: RetryPolicy::default(),
            progress: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
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

    /// Poll until every task of `job_id` has reached `target`.
    ///
    /// The last poll happens at the deadline. If the tasks are still short of
    /// `target` then, the job is terminated and `JobTimeout` returned.
    pub async fn wait_for_tasks(
        &self,
        job_id: &str,
        target: TaskState,
        timeout: Duration,
    ) -> Result<Vec<TaskInfo>, EngineError> {
        let service = self.service.as_ref();
        let deadline = Instant::now() + timeout;
        let mut last_done = None;

        loop {
            let tasks = with_retry(&self.retry, "list tasks", move || service.list_tasks(job_id)).await?;
            let done = tasks.iter().filter(|t| t.state >= target).count();

            if last_done != Some(done) {
                tracing::debug!(job_id = %job_id, done, total = tasks.len(), target = ?target, "task progress");
                progress::report(
                    self.progress.as_ref(),
                    ProgressEvent::TasksProgress {
                        job_id: job_id.to_string(),
                        done,
                        total: tasks.len(),
                    },
                );
                last_done = Some(done);
            }

            if !tasks.is_empty() && done == tasks.len() {
                return Ok(tasks);
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(job_id = %job_id, timeout_secs = timeout.as_secs(), "job timed out, terminating");
                if let Err(e) = with_retry(&self.retry, "terminate job", move || service.terminate_job(job_id)).await {
                    tracing::error!(job_id = %job_id, error = %e, "failed to terminate timed out job");
                }
                return Err(EngineError::JobTimeout {
                    job_id: job_id.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Submit `spec` and wait for every task to complete.
    ///
    /// A job without tasks is rejected before submission.
    pub async fn run_job(&self, spec: &JobSpec, timeout: Duration) -> Result<JobSummary, EngineError> {
        if spec.task_commands.is_empty() {
            return Err(EngineError::Config(format!("job '{}' has no task commands", spec.job_id)));
        }
        let service = self.service.as_ref();
        with_retry(&self.retry, "submit job", move || service.submit_job(spec))
            .await
            .map_err(|e| e.with_context(format!("job '{}'", spec.job_id)))?;
        tracing::info!(job_id = %spec.job_id, pool_id = %spec.pool_id, tasks = spec.task_commands.len(), "job submitted");

        let tasks = self.wait_for_tasks(&spec.job_id, TaskState::Completed, timeout).await?;
        let failed: Vec<TaskInfo> = tasks.iter().filter(|t| t.has_failed()).cloned().collect();
        for task in &failed {
            tracing::warn!(
                job_id = %spec.job_id,
                task_id = %task.task_id,
                exit_code = ?task.exit_code,
                failure = ?task.failure,
                "task failed"
            );
        }

        Ok(JobSummary {
            job_id: spec.job_id.clone(),
            tasks,
            failed,
        })
    }
}
