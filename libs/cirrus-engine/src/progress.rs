use std::sync::Arc;

use cirrus_api::error::ServiceError;

/// Progress notification for a caller-supplied sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    TopicEnsured { topic: String },
    SubscriptionEnsured { topic: String, subscription: String },
    TopicDeleted { topic: String },
    BackupStarted { source_table: String, target_account: String },
    BackupFinished { source_table: String, success: bool },
    TableExpired { account: String, table: String },
    AccountDeleted { account: String },
    TasksProgress { job_id: String, done: usize, total: usize },
}

/// Caller-supplied status reporting (console, UI, webhook...).
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent) -> Result<(), ServiceError>;
}

/// Report to an optional sink. Reporting never fails the caller's operation.
pub(crate) fn report(sink: Option<&Arc<dyn ProgressSink>>, event: ProgressEvent) {
    let Some(sink) = sink else { return };
    if let Err(e) = sink.report(&event) {
        tracing::warn!(error = %e, event = ?event, "progress sink failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct FailingSink;

    impl ProgressSink for FailingSink {
        fn report(&self, _event: &ProgressEvent) -> Result<(), ServiceError> {
            Err(ServiceError::io("console detached"))
        }
    }

    #[derive(Default)]
    struct Collecting(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Collecting {
        fn report(&self, event: &ProgressEvent) -> Result<(), ServiceError> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn failing_or_missing_sink_is_swallowed() {
        report(None, ProgressEvent::AccountDeleted { account: "a".into() });
        let sink: Arc<dyn ProgressSink> = Arc::new(FailingSink);
        report(Some(&sink), ProgressEvent::AccountDeleted { account: "a".into() });
    }

    #[test]
    fn events_reach_sink() {
        let collecting = Arc::new(Collecting::default());
        let sink: Arc<dyn ProgressSink> = collecting.clone();
        report(Some(&sink), ProgressEvent::TopicDeleted { topic: "t".into() });
        assert_eq!(
            *collecting.0.lock().unwrap(),
            vec![ProgressEvent::TopicDeleted { topic: "t".into() }]
        );
    }
}
