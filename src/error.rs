//! Error types shared by the run client and the orchestrator.

use std::fmt;

/// Failure reported by a [`RunClient`](crate::client::RunClient) call.
///
/// The orchestrator never looks past the code and the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn http(code: u16, message: impl Into<String>) -> Self {
        Self::new(Some(code), message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        let code = err.status().map(|s| s.as_u16());
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else {
            err.to_string()
        };
        Self { code, message }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("orchestrator has shut down")]
    Shutdown,
}

impl Error {
    pub fn invalid_request<T: ToString>(message: T) -> Self {
        Self::InvalidRequest(message.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
