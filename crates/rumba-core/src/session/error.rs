use thiserror::Error;

/// Failures of a single jukebox request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The request went through but the server reported an error.
    #[error("Jukebox error: {0}")]
    Logic(String),

    /// Timeout, refused connection or a response that could not be read.
    #[error("{0}")]
    Unreachable(String),
}

impl SessionError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SessionError::Unreachable(_))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
