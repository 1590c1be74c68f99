//! A CQL client: statement and batch execution with retries and attempt accounting, paged
//! result iteration and keyspace metadata resolution.
//!
//! The network is reached through a [`Dispatcher`]; everything on this side of it (binding,
//! retrying, decoding) is handled by the [`Session`].

pub mod dispatch;
pub mod iter;
pub mod metadata;
pub mod retry;
pub mod session;
pub mod statement;

use cql_types::{CodecError, Consistency, DecodeError};

pub use cql_types;
pub use dispatch::{
    BatchRequest, BatchStatement, DbErrorCode, DispatchError, Dispatcher, PagingState,
    QueryRequest, Request, Response, RowsPage,
};
pub use iter::RowIter;
pub use metadata::{KeyspaceMetadata, MetadataError, ReplicationStrategy, StrategyValue};
pub use retry::{DefaultRetryPolicy, FallthroughRetryPolicy, RetryDecision, RetryPolicy};
pub use session::{ExecutionContext, ExecutionInfo, Session, SessionConfig};
pub use statement::{Batch, BatchKind, MAX_BATCH_STATEMENTS, Statement};

/// Primary error type for the [`Session`]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request failed after {attempts} attempt(s): {source}")]
    Request {
        attempts: u32,
        #[source]
        source: DispatchError,
    },

    #[error("execution cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32 },

    #[error("failed to bind value {index} of statement {statement}: {source}")]
    Encode {
        statement: usize,
        index: usize,
        #[source]
        source: CodecError,
    },

    #[error("cannot execute a batch with no statements")]
    EmptyBatch,

    #[error("batch of {0} statements exceeds the limit of 65535")]
    TooManyStatements(usize),

    #[error("serial consistency must be serial or local_serial, got {0}")]
    InvalidSerialConsistency(Consistency),

    #[error("failed to decode row: {0}")]
    Decode(#[from] DecodeError),

    #[error("failed to resolve keyspace metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("unexpected {response} response to {request} request")]
    UnexpectedResponse {
        request: &'static str,
        response: &'static str,
    },

    #[error("query returned no rows")]
    NoRows,

    #[error("failed to release paging state: {0}")]
    ClosePaging(#[source] DispatchError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Request { source, .. } | Self::ClosePaging(source) => {
                if source.is_transient() {
                    ErrorKind::Transient
                } else {
                    ErrorKind::FatalRequest
                }
            }
            Self::Cancelled { .. } | Self::DeadlineExceeded { .. } => ErrorKind::Cancelled,
            Self::Encode { .. }
            | Self::EmptyBatch
            | Self::TooManyStatements(_)
            | Self::InvalidSerialConsistency(_)
            | Self::UnexpectedResponse { .. } => ErrorKind::FatalRequest,
            Self::Decode(_) | Self::Metadata(_) | Self::NoRows => ErrorKind::FatalDecode,
        }
    }

    /// Number of dispatches made before the error, where the error came from executing
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Request { attempts, .. }
            | Self::Cancelled { attempts }
            | Self::DeadlineExceeded { attempts } => Some(*attempts),
            _ => None,
        }
    }
}

/// How an [`Error`] should be treated by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The cluster could not serve the request right now; retries were exhausted
    Transient,
    /// The request itself was rejected and will be rejected again
    FatalRequest,
    /// The response could not be materialized as asked
    FatalDecode,
    /// The caller cancelled the execution or its deadline passed
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
