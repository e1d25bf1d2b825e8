use chrono::{DateTime, Utc};

/// Result type alias for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// A registration call was made with invalid arguments.
    #[error("at {when}, {message}")]
    Argument {
        when: DateTime<Utc>,
        message: String,
    },

    #[error("Bus is closed: the dispatch loop no longer accepts payloads")]
    Closed,

    #[error("Dispatch loop failed: {0}")]
    Dispatcher(#[from] tokio::task::JoinError),
}

impl BusError {
    pub(crate) fn argument(message: impl Into<String>) -> Self {
        BusError::Argument {
            when: Utc::now(),
            message: message.into(),
        }
    }
}
