use thiserror::Error;

#[derive(Error, Debug)]
pub enum CourierError {
    #[error("Invalid agent id: {0}")]
    InvalidAgentId(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Unknown job method: {0}")]
    UnknownMethod(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CourierError>;
