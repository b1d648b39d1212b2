#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Engine(#[from] cirrus_engine::error::EngineError),

    #[error("service: {0}")]
    Service(#[from] cirrus_api::error::ServiceError),

    #[error("no [{0}] section in the configuration")]
    MissingSection(&'static str),

    #[error("{kind} '{name}' is not configured")]
    NotConfigured { kind: &'static str, name: String },

    #[error("{0}")]
    Usage(String),
}
