use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported cipher: {0}")]
    UnsupportedCipher(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Instance on port {0} is already running")]
    AlreadyRunning(u16),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl From<RelayError> for std::io::Error {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
