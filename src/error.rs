use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("Firestore returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("todo not found: {0}")]
    TodoNotFound(String),

    #[error("todo text must not be empty")]
    EmptyTodo,

    #[error("{failed} of {total} writes failed")]
    PartialFailure { failed: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
