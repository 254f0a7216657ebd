//! Core types and traits for xwrap
//!
//! This crate defines the foundational types used throughout the system:
//! - IdSpace: namespace tying requests and transactions to one adapter
//! - TransactionType: NEW / SUB / AUTO / implicit
//! - Adapter: the storage collaborator contract
//! - Facade: an adapter bound to an id-space, plus feature detection
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod facade;
pub mod features;
pub mod traits;
pub mod types;

pub use error::{BoxError, Error, Result};
pub use facade::{ErasedFacade, Facade};
pub use features::{FeatureFlags, Features, DEFAULT_CLIENT_METHOD};
pub use traits::{Adapter, BoxFuture, ClientAccessor, Settings};
pub use types::{
    CancelReason, IdSpace, Method, TransactionType, BASIC_INTERFACE, SUBTRANSACTIONS_INTERFACE,
    WRAP_INTERFACE,
};
