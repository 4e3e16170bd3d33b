#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}

impl ProcessError {
    /// Whether the error happened before the child process existed
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            ProcessError::InvalidArgument(_)
                | ProcessError::CommandNotFound(_)
                | ProcessError::SpawnFailed { .. }
        )
    }
}
