/// Shared error type used across all AgentFleet crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("tenant already exists: {0}")]
    TenantExists(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("{kind} template not found: {id}")]
    TemplateNotFound { kind: String, id: String },

    #[error("run not found: {0}")]
    RunNotFound(String),

    /// Lost the conditional `pending → running` race. Not a failure for the
    /// caller: some other worker owns the run.
    #[error("run {0} was already claimed")]
    ConcurrencyConflict(String),

    #[error("run {run_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: String,
        from: String,
        to: String,
    },

    #[error("adapter {kind}: {detail}")]
    Adapter { kind: String, detail: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("partition unavailable: {0}")]
    PartitionUnavailable(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Storage-level failures that are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::PartitionUnavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TenantNotFound(_)
                | Self::InstanceNotFound(_)
                | Self::TemplateNotFound { .. }
                | Self::RunNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
