use thiserror::Error;

/// Errors produced while framing, parsing, or validating events.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;
