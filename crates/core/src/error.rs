//! Error types for xwrap
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Adapter-native failures travel inside [`Error::Adapter`] untouched, so
//! callers can still downcast them to the adapter's own error type.

use crate::types::{CancelReason, IdSpace, Method};
use thiserror::Error;

/// Boxed error used to carry adapter and work-function failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for xwrap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ambient transaction propagation
#[derive(Debug, Error)]
pub enum Error {
    /// No adapter implementation is registered under this name
    #[error("XWrap adapter '{name}' not found.")]
    AdapterNotFound {
        /// Name that failed to resolve
        name: String,
    },

    /// A sub-transaction was requested but there is nothing to nest under
    #[error("No ambient transaction in id-space '{space}' to open a sub-transaction under")]
    NoAmbientTransaction {
        /// Id-space of the failed request
        space: IdSpace,
    },

    /// A request was rejected before anyone answered it
    #[error("Request cancelled: {cause}")]
    Cancelled {
        /// Why the request was rejected
        cause: CancelReason,
    },

    /// Tried to broadcast a request that has no propagation chain to travel on
    #[error("Cannot pass transaction: no propagation chain for request {request}")]
    MismatchedHandler {
        /// Name of the request
        request: String,
    },

    /// Failure raised by the storage adapter, passed through unmodified
    #[error("Adapter error: {0}")]
    Adapter(#[source] BoxError),

    /// Failure raised by a work function
    #[error("{0}")]
    Work(#[source] BoxError),

    /// Rollback failed while handling an earlier error; both are kept
    #[error("Rollback failed ({rollback}) after: {source}")]
    RollbackFailed {
        /// The error that triggered the rollback
        #[source]
        source: Box<Error>,
        /// The error raised by the rollback itself
        rollback: Box<Error>,
    },

    /// A nested borrower failed, so the owning transaction rolled back
    #[error("Transaction {transaction} was rolled back after a nested failure")]
    RollbackOnly {
        /// Name of the owning transaction
        transaction: String,
    },

    /// A borrower finished after the transaction it borrowed had settled
    #[error("Transaction {transaction} finished after its owner {owner} had already settled")]
    OwnerSettled {
        /// Name of the borrowing transaction
        transaction: String,
        /// Name of the owner
        owner: String,
        /// The borrower's own failure, if any
        #[source]
        source: Option<Box<Error>>,
    },

    /// Adapter does not implement an optional method
    #[error("Adapter does not implement {method}")]
    Unsupported {
        /// The missing method
        method: Method,
    },

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be read or was invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap an adapter-native error
    pub fn adapter<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Adapter(error.into())
    }

    /// Wrap a work-function error
    pub fn work<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Work(error.into())
    }

    /// Create an invalid-operation error
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidOperation(message.into())
    }

    /// True when this error means the whole outer chain is aborting
    pub fn aborts_chain(&self) -> bool {
        matches!(self, Error::Cancelled { cause } if cause.aborts_chain())
    }
}
