use thiserror::Error;

/// Errors produced by the tdg protocol layer and server.
#[derive(Debug, Error)]
pub enum TdgError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for TdgError {
    fn from(e: serde_json::Error) -> Self {
        TdgError::Codec(e.to_string())
    }
}

pub type TdgResult<T> = Result<T, TdgError>;
