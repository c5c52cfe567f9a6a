use thiserror::Error;

pub type SocketResult<T> = Result<T, SocketError>;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket options are not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("invalid socket options: {0}")]
    Options(String),
    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<clap::Error> for SocketError {
    fn from(err: clap::Error) -> Self {
        SocketError::Options(err.to_string())
    }
}
