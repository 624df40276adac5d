use std::io;
use thiserror::Error as ThisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    NotFound,
    InvalidInput,
    Internal,
    Transient,      // Retryable filesystem/store hiccup
    Conflict,       // Unique constraint violated on insert
    Configuration,  // Bad criteria, alias map or settings
    FatalStore,     // Store unusable, abort the run
}

#[derive(Debug, ThisError)]
#[error("{kind:?}: {context}")]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error { kind, context: context.into() }
    }

    pub fn parse(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, context)
    }

    pub fn config(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, context)
    }

    pub fn conflict(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, context)
    }

    pub fn transient(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, context)
    }

    pub fn fatal(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::FatalStore, context)
    }

    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }

    /// Errors that must abort a whole run instead of a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::FatalStore | ErrorKind::Configuration)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock => ErrorKind::Transient,
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::Io,
        };
        Error { kind, context: err.to_string() }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: err.to_string(),
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        let path = err
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Error {
            kind: ErrorKind::Transient,
            context: format!("cannot read {}: {}", path, err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
