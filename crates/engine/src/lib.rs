//! Factory and registries for xwrap
//!
//! This crate ties the lower layers together:
//! - XWrap: the factory handed to application code
//! - registry: adapter constructors by name, facades by id-space
//! - config: `xwrap.toml` loading
//! - adapters: the built-in `memory` adapter
//! - logging: console subscriber helpers
//!
//! Transactions and requests themselves live in `xwrap-concurrency`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod config;
pub mod logging;
pub mod registry;
pub mod xwrap;

pub use adapters::{MemoryAdapter, MemoryClient, MemoryError, MemoryHandle, MemorySettings, MemoryStats};
pub use config::{XWrapConfig, CONFIG_FILE_NAME};
pub use logging::{init_console, use_logger};
pub use registry::{register_adapter, AdapterSource};
pub use xwrap::{client, disconnect, xtransaction, XWrap};

pub use xwrap_concurrency::{
    spawn, Ask, Chain, Context, Outcome, Request, Transaction, TransactionOptions, TransactionState,
};
pub use xwrap_core::{
    Adapter, BoxError, CancelReason, ClientAccessor, Error, Facade, FeatureFlags, Features, IdSpace,
    Method, Result, Settings, TransactionType,
};
