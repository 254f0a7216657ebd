//! xwrap - ambient transaction propagation for async Rust
//!
//! Functions deep inside an async call chain find the transaction an outer
//! caller already opened, without a handle being passed down to them.
//!
//! # Quick Start
//!
//! ```ignore
//! use xwrap::{MemoryAdapter, XWrap, XWrapConfig};
//!
//! let xwrap = XWrap::<MemoryAdapter>::initialize(&XWrapConfig::new("memory", "main"))?;
//!
//! xwrap.transaction(|ctx| async move {
//!     ctx.client().query("INSERT ...");
//!     Ok(())
//! }).await?;
//! ```
//!
//! # Architecture
//!
//! - `xwrap-core`: adapter contract, facade, feature detection, errors
//! - `xwrap-concurrency`: propagation chain, requests, transactions
//! - `xwrap-engine`: factory, registries, config, built-in adapters
//!
//! Only the engine's API is re-exported here.

pub use xwrap_engine::*;
