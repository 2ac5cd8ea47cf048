use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
pub enum Error {
    Transport(reqwest::Error),
    Timeout,
    HttpStatus(u16),
    Parse(String),
    Auth,
    Fetch(Arc<Error>),
    InvalidUrl(String),
    CannotConnect,
    UnknownHouse(String),
    Config(String),
    Io(std::io::Error),
}

impl Error {
    /// Connection-level failure: the request never produced a response.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Timeout => true,
            Error::Fetch(inner) => inner.is_transport(),
            _ => false,
        }
    }

    /// Unwraps coordinator-level wrapping to reach the underlying failure.
    pub fn root(&self) -> &Error {
        match self {
            Error::Fetch(inner) => inner.root(),
            other => other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "transport error: {e}"),
            Error::Timeout => write!(f, "request timed out"),
            Error::HttpStatus(status) => write!(f, "unexpected HTTP status {status}"),
            Error::Parse(msg) => write!(f, "parse error: {msg}"),
            Error::Auth => write!(f, "authentication rejected (HTTP 403)"),
            Error::Fetch(e) => write!(f, "refresh failed: {e}"),
            Error::InvalidUrl(url) => write!(f, "invalid base URL: {url:?}"),
            Error::CannotConnect => write!(f, "cannot connect: no house answered"),
            Error::UnknownHouse(id) => write!(f, "unknown house: {id}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            Error::Fetch(e) => Some(e.as_ref()),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else if let Some(status) = e.status() {
            Error::HttpStatus(status.as_u16())
        } else {
            Error::Transport(e)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
