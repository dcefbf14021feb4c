use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

/// Failure to pull a runnable code block out of model output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Model response was empty")]
    Empty,

    #[error("No code found in model response")]
    NoCode,
}

/// Failure of the reasoning collaborator. Always fatal for a run.
#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("No API key configured for the reasoning backend")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ReasoningError {
    /// Whether a caller-side retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ReasoningError::MissingApiKey => false,
            ReasoningError::Http(e) => e.is_timeout() || e.is_connect(),
            ReasoningError::Api { status, .. } => *status == 429 || *status >= 500,
            ReasoningError::Timeout(_) => true,
            ReasoningError::InvalidResponse(_) => false,
        }
    }
}

/// Failure to set up the execution sandbox. Failures of the executed code
/// are never errors; they are reported inside `ExecutionResult`.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Python not installed or not found in PATH")]
    PythonNotFound,

    #[error("Python interpreter does not exist: {0}")]
    InterpreterMissing(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced to the caller of the control loop
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Reasoning failed: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("Could not complete the task in {iterations} iterations")]
    Exhausted { iterations: u32 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Sandbox setup failed: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_retryable() {
        assert!(ReasoningError::Api {
            status: 503,
            message: "unavailable".to_string()
        }
        .is_retryable());
        assert!(ReasoningError::Api {
            status: 429,
            message: "quota".to_string()
        }
        .is_retryable());
        assert!(!ReasoningError::Api {
            status: 401,
            message: "bad key".to_string()
        }
        .is_retryable());
        assert!(!ReasoningError::MissingApiKey.is_retryable());
        assert!(ReasoningError::Timeout(Duration::from_secs(5)).is_retryable());
    }

    #[test]
    fn test_exhausted_message() {
        let err = AgentError::Exhausted { iterations: 5 };
        assert_eq!(
            err.to_string(),
            "Could not complete the task in 5 iterations"
        );
    }
}
