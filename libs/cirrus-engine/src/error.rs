use cirrus_api::error::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// The topology was provisioned for fewer subscribers than were requested.
    #[error("all subscriptions of topic '{topic}' are full")]
    AllSubscriptionsFull { topic: String },

    #[error("malformed backup target name '{name}': {reason}")]
    Naming { name: String, reason: String },

    #[error("backup of '{source_table}' failed: {}", .errors.join("; "))]
    CopyFailed {
        source_table: String,
        errors: Vec<String>,
    },

    #[error("job '{job_id}' did not finish within {timeout_secs}s")]
    JobTimeout { job_id: String, timeout_secs: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Service` variant, context is added to the inner `ServiceError`.
    /// For message-carrying variants, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Service(e) => EngineError::Service(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            EngineError::InvalidTopology(msg) => {
                EngineError::InvalidTopology(format!("{ctx}: {msg}"))
            }
            other => other,
        }
    }

    pub(crate) fn naming(name: &str, reason: impl Into<String>) -> Self {
        EngineError::Naming {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
