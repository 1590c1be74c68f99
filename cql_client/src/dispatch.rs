//! The boundary between the client and whatever carries requests to the cluster.
//!
//! A [`Dispatcher`] receives fully-encoded requests and returns raw responses. Connection
//! management, framing and node selection all live behind it.

use std::{fmt::Debug, num::NonZeroUsize};

use async_trait::async_trait;
use bytes::Bytes;
use cql_types::{ColumnSpec, Consistency};

use crate::statement::BatchKind;

/// Sends requests to the cluster
#[async_trait]
pub trait Dispatcher: Debug + Send + Sync + 'static {
    /// Send one request and wait for its response
    async fn dispatch(&self, request: &Request) -> Result<Response, DispatchError>;

    /// Release the server-side cursor behind a paging state that will not be resumed
    async fn close_paging(&self, state: &PagingState) -> Result<(), DispatchError>;
}

/// An opaque server cursor for resuming a paged query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PagingState(Bytes);

impl PagingState {
    pub fn new(state: impl Into<Bytes>) -> Self {
        Self(state.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Query(QueryRequest),
    Batch(BatchRequest),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Query(_) => "query",
            Self::Batch(_) => "batch",
        }
    }
}

/// A single query with its values already encoded
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub text: String,
    pub values: Vec<Option<Bytes>>,
    pub consistency: Consistency,
    pub page_size: Option<NonZeroUsize>,
    pub paging_state: Option<PagingState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub kind: BatchKind,
    pub statements: Vec<BatchStatement>,
    pub consistency: Consistency,
    pub serial_consistency: Option<Consistency>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatement {
    pub text: String,
    pub values: Vec<Option<Bytes>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Void,
    Rows(RowsPage),
    SetKeyspace(String),
    SchemaChange,
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Rows(_) => "rows",
            Self::SetKeyspace(_) => "set_keyspace",
            Self::SchemaChange => "schema_change",
        }
    }
}

/// One page of a rows result
///
/// Every row carries one value per column spec, `None` for null. A paging state is present
/// when more pages remain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowsPage {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<Option<Bytes>>>,
    pub paging_state: Option<PagingState>,
}

/// Error codes the server can answer a request with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbErrorCode {
    ServerError,
    ProtocolError,
    BadCredentials,
    Unavailable,
    Overloaded,
    IsBootstrapping,
    Truncate,
    WriteTimeout,
    ReadTimeout,
    ReadFailure,
    FunctionFailure,
    WriteFailure,
    SyntaxError,
    Unauthorized,
    Invalid,
    ConfigError,
    AlreadyExists,
    Unprepared,
    Other(i32),
}

impl DbErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            0x0000 => Self::ServerError,
            0x000A => Self::ProtocolError,
            0x0100 => Self::BadCredentials,
            0x1000 => Self::Unavailable,
            0x1001 => Self::Overloaded,
            0x1002 => Self::IsBootstrapping,
            0x1003 => Self::Truncate,
            0x1100 => Self::WriteTimeout,
            0x1200 => Self::ReadTimeout,
            0x1300 => Self::ReadFailure,
            0x1400 => Self::FunctionFailure,
            0x1500 => Self::WriteFailure,
            0x2000 => Self::SyntaxError,
            0x2100 => Self::Unauthorized,
            0x2200 => Self::Invalid,
            0x2300 => Self::ConfigError,
            0x2400 => Self::AlreadyExists,
            0x2500 => Self::Unprepared,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::ServerError => 0x0000,
            Self::ProtocolError => 0x000A,
            Self::BadCredentials => 0x0100,
            Self::Unavailable => 0x1000,
            Self::Overloaded => 0x1001,
            Self::IsBootstrapping => 0x1002,
            Self::Truncate => 0x1003,
            Self::WriteTimeout => 0x1100,
            Self::ReadTimeout => 0x1200,
            Self::ReadFailure => 0x1300,
            Self::FunctionFailure => 0x1400,
            Self::WriteFailure => 0x1500,
            Self::SyntaxError => 0x2000,
            Self::Unauthorized => 0x2100,
            Self::Invalid => 0x2200,
            Self::ConfigError => 0x2300,
            Self::AlreadyExists => 0x2400,
            Self::Unprepared => 0x2500,
            Self::Other(code) => *code,
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("server error {code:?} ({:#06x}): {message}", .code.code())]
    Server { code: DbErrorCode, message: String },

    #[error("connection reset while waiting for a response")]
    ConnectionReset,

    #[error("timed out waiting for a response")]
    Timeout,

    #[error("i/o error: {0}")]
    Io(String),
}

impl DispatchError {
    pub fn server(code: DbErrorCode, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    /// Whether another attempt could succeed where this one failed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Server { code, .. } => matches!(
                code,
                DbErrorCode::ServerError
                    | DbErrorCode::Unavailable
                    | DbErrorCode::Overloaded
                    | DbErrorCode::IsBootstrapping
                    | DbErrorCode::Truncate
                    | DbErrorCode::WriteTimeout
                    | DbErrorCode::ReadTimeout
            ),
            Self::ConnectionReset | Self::Timeout | Self::Io(_) => true,
        }
    }

    /// Whether the server rejected the request before applying any of it
    pub fn is_certainly_not_applied(&self) -> bool {
        matches!(
            self,
            Self::Server {
                code: DbErrorCode::Unavailable
                    | DbErrorCode::Overloaded
                    | DbErrorCode::IsBootstrapping,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_round_trip() {
        for code in [0x0000, 0x1001, 0x1100, 0x2000, 0x2200, 0x2500, 0x7777] {
            assert_eq!(DbErrorCode::from_code(code).code(), code);
        }
        assert_eq!(DbErrorCode::from_code(0x7777), DbErrorCode::Other(0x7777));
    }

    #[test]
    fn classification() {
        let overloaded = DispatchError::server(DbErrorCode::Overloaded, "busy");
        assert!(overloaded.is_transient());
        assert!(overloaded.is_certainly_not_applied());

        let write_timeout = DispatchError::server(DbErrorCode::WriteTimeout, "slow");
        assert!(write_timeout.is_transient());
        assert!(!write_timeout.is_certainly_not_applied());

        assert!(DispatchError::ConnectionReset.is_transient());
        assert!(!DispatchError::server(DbErrorCode::SyntaxError, "bad").is_transient());
        assert!(!DispatchError::server(DbErrorCode::Unauthorized, "no").is_transient());
    }

    #[test]
    fn server_error_display_includes_code() {
        let err = DispatchError::server(DbErrorCode::Invalid, "unconfigured table");
        assert_eq!(
            err.to_string(),
            "server error Invalid (0x2200): unconfigured table"
        );
    }
}
