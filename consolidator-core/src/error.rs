use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsolidatorError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot build a session with no segments")]
    EmptySession,

    #[error("Roster error: {0}")]
    Roster(String),

    #[error("Store error: {0}")]
    Store(String),
}
