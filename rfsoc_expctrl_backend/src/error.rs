use rfsoc_compiler_backend::CompileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed binary block: {0}")]
    MalformedBlock(String),
    #[error("reply is not valid UTF-8")]
    NonUtf8(#[from] std::string::FromUtf8Error),
    #[error("connection closed by the board")]
    Closed,
}

impl TransportError {
    /// The reply arrived but its content is garbled; the connection itself is fine.
    pub fn is_garbled(&self) -> bool {
        matches!(
            self,
            TransportError::MalformedBlock(_) | TransportError::NonUtf8(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum AcqError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(
        "acquisition failed after {attempts} attempts: received {received} of {expected} words"
    )]
    RetriesExhausted {
        received: usize,
        expected: usize,
        attempts: u32,
    },
    #[error("board still streaming after {0} drain polls")]
    DrainExhausted(u32),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the control crate can fail with.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Acquisition(#[from] AcqError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("worker error: {0}")]
    Worker(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
