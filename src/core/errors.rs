use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    /// 预检失败，未发出任何网络请求
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InitiateFailed(String),

    #[error("Failed to upload chunk {part_number} after {attempts} attempts: {message}")]
    ChunkUploadFailed {
        part_number: u64,
        attempts: u32,
        message: String,
    },

    #[error("{0}")]
    CompleteFailed(String),

    #[error("{0}")]
    UploadFailed(String),

    #[error("{0}")]
    AbortFailed(String),

    #[error("{0}")]
    StatusFailed(String),

    #[error("{0}")]
    Network(String),

    #[error("Server error: status code {status_code}, message: {message}")]
    Server {
        status_code: u16,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cannot move task from {from} to {to}")]
    InvalidTransition {
        from: String,
        to: String,
    },

    #[error("Manager shutdown")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status_code,
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 给用户看的错误文本。服务端的 message 原样透传。
    pub fn user_message(&self) -> String {
        match self {
            UploadError::Server { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_failure_message_names_part_and_attempts() {
        let err = UploadError::ChunkUploadFailed {
            part_number: 7,
            attempts: 3,
            message: "Chunk upload failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to upload chunk 7 after 3 attempts: Chunk upload failed"
        );
    }

    #[test]
    fn server_error_user_message_is_verbatim() {
        let err = UploadError::server_error(413, "Payload too large");
        assert_eq!(err.user_message(), "Payload too large");
        assert!(err.to_string().contains("413"));
    }
}
