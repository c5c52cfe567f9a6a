use endpoint::{EndpointError, RegisterNameError};
use thiserror::Error;
use transport_socket::SocketError;

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("null pointer passed as {0}")]
    NullPointer(&'static str),
    #[error("endpoint id {0} does not fit in eight bits")]
    InvalidId(usize),
    #[error("the execution thread has not been observed stopped")]
    ThreadLive,
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Register(#[from] RegisterNameError),
}
