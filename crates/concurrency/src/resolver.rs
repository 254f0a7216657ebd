//! Transaction type resolution
//!
//! | requested        | ambient | outcome                          |
//! |------------------|---------|----------------------------------|
//! | `New`            | any     | open a fresh top-level txn       |
//! | `Sub`            | yes     | open a sub-txn (adapter support) |
//! | `Sub`            | no      | `NoAmbientTransaction`           |
//! | `Auto`/implicit  | yes     | reuse the ambient txn            |
//! | `Auto`/implicit  | no      | open a fresh top-level txn       |

use xwrap_core::{Error, IdSpace, Result, TransactionType};

/// What a starting transaction should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan<T> {
    /// Open a brand-new top-level transaction
    Open,
    /// Open a sub-transaction nested in `parent`
    OpenSub {
        /// Transaction to nest under
        parent: T,
    },
    /// Run inside `ambient` without a commit boundary of our own
    Reuse {
        /// Transaction to borrow
        ambient: T,
    },
}

/// Decide how to run a transaction of type `requested`
///
/// `SUB` fails when nothing is ambient, and also when the adapter cannot
/// nest transactions.
pub fn resolve<T>(
    requested: TransactionType,
    ambient: Option<T>,
    supports_subtransactions: bool,
    space: &IdSpace,
) -> Result<Plan<T>> {
    match (requested, ambient) {
        (TransactionType::New, _) => Ok(Plan::Open),
        (TransactionType::Sub, Some(parent)) if supports_subtransactions => Ok(Plan::OpenSub { parent }),
        (TransactionType::Sub, _) => Err(Error::NoAmbientTransaction {
            space: space.clone(),
        }),
        (TransactionType::Auto | TransactionType::Implicit, Some(ambient)) => Ok(Plan::Reuse { ambient }),
        (TransactionType::Auto | TransactionType::Implicit, None) => Ok(Plan::Open),
    }
}
