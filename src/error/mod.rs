use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Request failed with status {status}: {context}")]
    Status { status: u16, context: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Stable code used in structured logs
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Config(_) => "CONFIG_ERROR",
            ClientError::InvalidState(_) => "INVALID_STATE",
            ClientError::Unauthorized(_) => "UNAUTHORIZED",
            ClientError::Status { .. } => "HTTP_STATUS",
            ClientError::Http(_) => "HTTP_ERROR",
            ClientError::Serialization(_) => "SERIALIZATION_ERROR",
            ClientError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the session should be dropped after this error
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Unauthorized(_) | ClientError::Status { status: 401, .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_classification() {
        assert!(ClientError::Unauthorized("bad login".into()).is_auth_failure());
        assert!(ClientError::Status {
            status: 401,
            context: "fetch".into()
        }
        .is_auth_failure());
        assert!(!ClientError::Status {
            status: 500,
            context: "fetch".into()
        }
        .is_auth_failure());
        assert!(!ClientError::InvalidState("no user".into()).is_auth_failure());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ClientError::InvalidState("x".into()).code(), "INVALID_STATE");
        assert_eq!(
            ClientError::Status {
                status: 404,
                context: "x".into()
            }
            .to_string(),
            "Request failed with status 404: x"
        );
    }
}
