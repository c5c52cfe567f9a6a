use runtime_native::RuntimeError;
use thiserror::Error;
use transport::TransportError;

pub type EndpointResult<T> = Result<T, EndpointError>;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("the execution thread owns the endpoint")]
    ThreadRunning,
    #[error("the execution thread has not been observed stopped")]
    ThreadNotStopped,
    #[error("the execution thread panicked and the endpoint state was lost")]
    ThreadPanicked,
    #[error("transfer length {0} is not a power of two between 8 and 256")]
    InvalidLength(usize),
    #[error("partial write of {0} bytes must carry between 1 and 256 bytes")]
    InvalidPartialLength(usize),
    #[error("the execution thread stopped but has not been rejoined")]
    ThreadNotRejoined,
    #[error("connection management is unavailable in compatibility mode")]
    CompatMode,
    #[error("invalid endpoint configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
