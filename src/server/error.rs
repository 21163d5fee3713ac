use thiserror::Error;

/// Errors raised by the messaging core.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Missing, malformed, badly signed or expired bearer token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Caller is not a participant of the thread.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Malformed or out-of-bounds input.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Presence store unreachable, failing or too slow.
    #[error("presence store unavailable: {0}")]
    Presence(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type MessagingResult<T> = Result<T, MessagingError>;

impl MessagingError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        MessagingError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        MessagingError::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        MessagingError::Validation(message.into())
    }

    /// Business-rule failures are reported to the originating connection.
    pub fn is_business_rule(&self) -> bool {
        matches!(self, MessagingError::Forbidden(_) | MessagingError::NotFound(_))
    }

    /// Text carried by the `error` event. Internal failures are not leaked.
    pub fn client_message(&self) -> String {
        match self {
            MessagingError::Forbidden(msg) | MessagingError::NotFound(msg) => msg.clone(),
            MessagingError::Authentication(_) => "Authentication failed".to_string(),
            MessagingError::Validation(msg) => format!("Invalid request: {}", msg),
            MessagingError::Presence(_) | MessagingError::Database(_) | MessagingError::Serialization(_) => {
                "Internal error".to_string()
            }
        }
    }
}
