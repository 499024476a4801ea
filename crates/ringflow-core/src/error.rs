//! Error taxonomy shared by all Ringflow crates.

/// Ringflow error type.
#[derive(Debug, thiserror::Error)]
pub enum RingflowError {
    /// Credential bundle incomplete or config file unreadable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request rejected before anything was scheduled.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The call invoker reported failure or never answered.
    #[error("Invocation failed: {0}")]
    Invocation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RingflowError {
    /// Short machine-friendly kind label, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Invocation(_) => "invocation",
            Self::Database(_) => "database",
            Self::Http(_) => "http",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, RingflowError>;
