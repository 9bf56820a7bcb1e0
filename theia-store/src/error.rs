use thiserror::Error;

/// Errors produced by an [`crate::store::EventStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] theia_model::CodecError),

    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),

    #[error("event not found: {0}")]
    NotFound(String),

    #[error("failed to flush partition {path}: {source}")]
    WriteFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid search request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
