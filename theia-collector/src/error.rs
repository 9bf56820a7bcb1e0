use thiserror::Error;

/// Errors produced while wiring or running the collector orchestrator.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("store error: {0}")]
    Store(#[from] theia_store::StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] theia_transport::TransportError),

    #[error("invalid criteria: {0}")]
    InvalidCriteria(#[from] theia_model::CriteriaError),

    #[error("codec error: {0}")]
    Codec(#[from] theia_model::CodecError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("action not available in non-persistent mode")]
    NonPersistent,
}

pub type Result<T> = std::result::Result<T, CollectorError>;
