//! Propagation layer for xwrap
//!
//! This crate implements the ambient transaction protocol:
//! - Chain: task-local list of running transactions that answer requests
//! - Request: single-resolution "who has the current transaction?" query
//! - resolver: NEW / SUB / AUTO decision table
//! - Transaction: open or reuse, run the work, commit or roll back

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod request;
pub mod resolver;
pub mod transaction;

#[cfg(test)]
mod test_support;

pub use chain::{spawn, AmbientAsk, Answerer, Broadcast, Chain, Signal};
pub use request::{Answer, Ask, Request};
pub use resolver::{resolve, Plan};
pub use transaction::{Context, Outcome, Transaction, TransactionOptions, TransactionState};
