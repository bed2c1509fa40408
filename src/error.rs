//! Connector error model.
//! Every failure the crate can surface is one of these variants. Only configuration,
//! connection and lifecycle errors ever reach a caller of the coordinator; discovery and
//! shutdown errors are logged where they happen and otherwise absorbed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorError {
    /// Invalid or missing settings; raised by `start` before any connection attempt.
    #[error("{code}: {message}")]
    Config { code: String, message: String },
    /// The data source could not be reached or opened.
    #[error("{code}: {message}")]
    Connection { code: String, message: String },
    /// A single catalog poll failed.
    #[error("{code}: {message}")]
    Discovery { code: String, message: String },
    /// Closing the connection or joining the monitor misbehaved.
    #[error("{code}: {message}")]
    Shutdown { code: String, message: String },
    /// An operation was invoked in a state that does not allow it.
    #[error("{code}: {message}")]
    Lifecycle { code: String, message: String },
}

/// Coarse classification of a [`ConnectorError`], handy for matching in logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Connection,
    Discovery,
    Shutdown,
    Lifecycle,
}

impl ConnectorError {
    pub fn code_str(&self) -> &str {
        match self {
            ConnectorError::Config { code, .. }
            | ConnectorError::Connection { code, .. }
            | ConnectorError::Discovery { code, .. }
            | ConnectorError::Shutdown { code, .. }
            | ConnectorError::Lifecycle { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ConnectorError::Config { message, .. }
            | ConnectorError::Connection { message, .. }
            | ConnectorError::Discovery { message, .. }
            | ConnectorError::Shutdown { message, .. }
            | ConnectorError::Lifecycle { message, .. } => message.as_str(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::Config { .. } => ErrorKind::Config,
            ConnectorError::Connection { .. } => ErrorKind::Connection,
            ConnectorError::Discovery { .. } => ErrorKind::Discovery,
            ConnectorError::Shutdown { .. } => ErrorKind::Shutdown,
            ConnectorError::Lifecycle { .. } => ErrorKind::Lifecycle,
        }
    }

    /// Whether this error aborts `start`. Everything raised once the monitor runs is
    /// degraded to stale-but-present assignments instead.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Config | ErrorKind::Connection | ErrorKind::Lifecycle)
    }

    pub fn config<S: Into<String>>(code: S, msg: S) -> Self { ConnectorError::Config { code: code.into(), message: msg.into() } }
    pub fn connection<S: Into<String>>(code: S, msg: S) -> Self { ConnectorError::Connection { code: code.into(), message: msg.into() } }
    pub fn discovery<S: Into<String>>(code: S, msg: S) -> Self { ConnectorError::Discovery { code: code.into(), message: msg.into() } }
    pub fn shutdown<S: Into<String>>(code: S, msg: S) -> Self { ConnectorError::Shutdown { code: code.into(), message: msg.into() } }
    pub fn lifecycle<S: Into<String>>(code: S, msg: S) -> Self { ConnectorError::Lifecycle { code: code.into(), message: msg.into() } }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

impl From<tokio_postgres::Error> for ConnectorError {
    fn from(err: tokio_postgres::Error) -> Self {
        // Errors on an established client surface during catalog polls
        ConnectorError::Discovery { code: "catalog_query".into(), message: err.to_string() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
