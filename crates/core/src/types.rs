//! Core types for ambient transaction propagation
//!
//! - IdSpace: namespace identifying one adapter/connection instance
//! - TransactionType: requested nesting behaviour
//! - CancelReason: why a pending request was rejected
//! - Method: the adapter methods feature detection looks for

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Namespace identifying one adapter instance
///
/// Requests and transactions answer each other only inside the same
/// id-space. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdSpace(Arc<str>);

impl IdSpace {
    /// Create an id-space from a name
    pub fn new(name: impl AsRef<str>) -> Self {
        IdSpace(Arc::from(name.as_ref()))
    }

    /// The id-space name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdSpace {
    fn from(name: &str) -> Self {
        IdSpace::new(name)
    }
}

impl From<String> for IdSpace {
    fn from(name: String) -> Self {
        IdSpace(Arc::from(name))
    }
}

impl From<&String> for IdSpace {
    fn from(name: &String) -> Self {
        IdSpace::new(name)
    }
}

impl AsRef<str> for IdSpace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Requested transaction type
///
/// `Implicit` is what callers get when they do not ask for anything and
/// behaves exactly like `Auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Always open a fresh top-level transaction
    New,
    /// Open a sub-transaction under the ambient one
    Sub,
    /// Reuse the ambient transaction, or open a fresh one when none exists
    Auto,
    /// Nothing requested; same as `Auto`
    #[default]
    Implicit,
}

impl TransactionType {
    /// True for `Auto` and `Implicit`
    pub fn is_auto(self) -> bool {
        matches!(self, TransactionType::Auto | TransactionType::Implicit)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionType::New => "NEW",
            TransactionType::Sub => "SUB",
            TransactionType::Auto => "AUTO",
            TransactionType::Implicit => "IMPLICIT",
        };
        f.write_str(name)
    }
}

/// Why a pending request was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The matching transaction already finished; open a fresh one instead
    Ended {
        /// Name of the finished transaction
        transaction: String,
    },
    /// The matching transaction is rolling back; the whole chain is aborting
    ChainAborting {
        /// Name of the aborting transaction
        transaction: String,
    },
    /// Withdrawn by the code that issued or owns the request
    Withdrawn(String),
}

impl CancelReason {
    /// True when the requester must propagate the failure instead of
    /// falling back to a fresh transaction
    pub fn aborts_chain(&self) -> bool {
        matches!(self, CancelReason::ChainAborting { .. })
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Ended { transaction } => {
                write!(f, "transaction {} already ended", transaction)
            }
            CancelReason::ChainAborting { transaction } => {
                write!(f, "transaction {} is rolling back", transaction)
            }
            CancelReason::Withdrawn(reason) => write!(f, "withdrawn: {}", reason),
        }
    }
}

/// Adapter methods that feature detection inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Obtain a raw client/connection
    GetRawClient,
    /// Begin a top-level transaction
    OpenTransaction,
    /// Commit a top-level transaction
    CommitTransaction,
    /// Roll back a top-level transaction
    RollbackTransaction,
    /// Begin a nested (savepoint-like) transaction
    OpenSubTransaction,
    /// Commit a nested transaction
    CommitSubTransaction,
    /// Roll back a nested transaction
    RollbackSubTransaction,
    /// Install a client accessor into the adapter
    Wrap,
}

impl Method {
    /// Method name as adapters spell it
    pub fn as_str(self) -> &'static str {
        match self {
            Method::GetRawClient => "get_raw_client",
            Method::OpenTransaction => "open_transaction",
            Method::CommitTransaction => "commit_transaction",
            Method::RollbackTransaction => "rollback_transaction",
            Method::OpenSubTransaction => "open_sub_transaction",
            Method::CommitSubTransaction => "commit_sub_transaction",
            Method::RollbackSubTransaction => "rollback_sub_transaction",
            Method::Wrap => "wrap",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Methods every adapter must provide for basic transactions
pub const BASIC_INTERFACE: &[Method] = &[
    Method::GetRawClient,
    Method::OpenTransaction,
    Method::CommitTransaction,
    Method::RollbackTransaction,
];

/// Methods needed for nested sub-transactions
pub const SUBTRANSACTIONS_INTERFACE: &[Method] = &[
    Method::OpenSubTransaction,
    Method::CommitSubTransaction,
    Method::RollbackSubTransaction,
];

/// Methods needed for call wrapping
pub const WRAP_INTERFACE: &[Method] = &[Method::Wrap];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_space_equality() {
        assert_eq!(IdSpace::from("a"), IdSpace::from("a".to_string()));
        assert_ne!(IdSpace::from("a"), IdSpace::from("b"));
        assert_eq!(IdSpace::from("main").to_string(), "main");
    }

    #[test]
    fn test_transaction_type_default_is_implicit() {
        assert_eq!(TransactionType::default(), TransactionType::Implicit);
        assert!(TransactionType::Implicit.is_auto());
        assert!(TransactionType::Auto.is_auto());
        assert!(!TransactionType::New.is_auto());
        assert!(!TransactionType::Sub.is_auto());
    }

    #[test]
    fn test_transaction_type_serde_lowercase() {
        let parsed: TransactionType = serde_json::from_str("\"sub\"").unwrap();
        assert_eq!(parsed, TransactionType::Sub);
        assert_eq!(serde_json::to_string(&TransactionType::New).unwrap(), "\"new\"");
    }

    #[test]
    fn test_only_chain_aborting_aborts() {
        assert!(CancelReason::ChainAborting {
            transaction: "T".into()
        }
        .aborts_chain());
        assert!(!CancelReason::Withdrawn("x".into()).aborts_chain());
    }
}
