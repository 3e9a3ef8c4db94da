use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkloadError {
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Record not found")]
    NotFound,

    #[error("Malformed bin spec: {0}")]
    MalformedSpec(String),

    #[error("Operation rejected: {0}")]
    Rejected(String),

    #[error("Function '{0}' is not registered")]
    FunctionNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Admission pool closed")]
    PoolClosed,
}

impl WorkloadError {
    /// Timeouts and transport failures. These are logged and the task is
    /// abandoned; nothing is retried above the store layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }

    /// Errors that must stop the process before any dispatch happens.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, WorkloadError>;

impl From<tokio::sync::AcquireError> for WorkloadError {
    fn from(_: tokio::sync::AcquireError) -> Self {
        Self::PoolClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(WorkloadError::Timeout("2s".into()).is_transient());
        assert!(WorkloadError::Transport("reset".into()).is_transient());
        assert!(!WorkloadError::NotFound.is_transient());

        assert!(WorkloadError::Config("capacity".into()).is_fatal());
        assert!(WorkloadError::Connection("refused".into()).is_fatal());
        assert!(!WorkloadError::Rejected("exists".into()).is_fatal());
    }
}
