//! Transaction: one unit of work against an adapter
//!
//! State transitions:
//! - `Created` → `AwaitingAmbient` (start: ask the caller for context)
//! - `AwaitingAmbient` → `Opening` (nothing to reuse, or NEW/SUB requested)
//! - `AwaitingAmbient` → `Reusing` (AUTO with an ambient transaction)
//! - `Opening`/`Reusing` → `Running` (work function executing)
//! - `Running` → `Committing` | `RollingBack` → `Ended`
//!
//! A transaction that opened its own handle (the *owner*) commits or rolls
//! back exactly once. A transaction that reused an ambient one (a
//! *borrower*) never touches the adapter; when its work fails it marks the
//! owner rollback-only so the owner performs the rollback.
//!
//! While the work future runs, the transaction sits on the propagation
//! chain and answers requests of its id-space.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use xwrap_core::{Adapter, CancelReason, Error, Facade, IdSpace, Result, TransactionType};

use crate::chain::{AmbientAsk, Answerer, Broadcast, Chain};
use crate::request::Request;
use crate::resolver::{self, Plan};

static TRANSACTION_NUMBER: AtomicU64 = AtomicU64::new(0);

/// Status of a transaction in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Constructed, not started
    Created,
    /// Waiting to hear whether a caller has an ambient transaction
    AwaitingAmbient,
    /// Opening a handle on the adapter
    Opening,
    /// Borrowing an ambient transaction
    Reusing,
    /// Work function executing
    Running,
    /// Commit in progress
    Committing,
    /// Rollback in progress
    RollingBack,
    /// Terminal
    Ended,
}

/// How a transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Owner committed
    Committed,
    /// Owner rolled back (or scheduled a rollback)
    RolledBack,
    /// Borrower finished; its owner decides the fate of the work
    Released,
    /// Failed before any handle was opened
    NotStarted,
}

/// Options for one transaction invocation
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Requested type
    pub kind: TransactionType,
    /// Display name; generated when absent
    pub name: Option<String>,
    /// Only answer the request with this name
    pub answers: Option<String>,
}

impl TransactionOptions {
    /// Options requesting `kind`
    pub fn new(kind: TransactionType) -> Self {
        TransactionOptions {
            kind,
            ..Default::default()
        }
    }

    /// Set the display name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Restrict answering to the request called `request`
    ///
    /// Requests are named by their asker: the `caller` passed to a client
    /// or transaction lookup, or `<name>/ambient` for the start-up lookup
    /// of a transaction called `<name>`.
    pub fn answering(mut self, request: impl Into<String>) -> Self {
        self.answers = Some(request.into());
        self
    }
}

enum Binding<A: Adapter> {
    Owned {
        client: A::Client,
        handle: Mutex<Option<A::Handle>>,
        depth: usize,
    },
    Borrowed {
        owner: Arc<Transaction<A>>,
    },
}

/// One unit of work against an adapter
pub struct Transaction<A: Adapter> {
    id: u64,
    name: String,
    space: IdSpace,
    facade: Arc<Facade<A>>,
    requested: TransactionType,
    answers: Option<String>,
    state: Mutex<TransactionState>,
    kind: OnceCell<TransactionType>,
    binding: OnceCell<Binding<A>>,
    outcome: OnceCell<Outcome>,
    rollback_only: AtomicBool,
}

/// What a work function receives
pub struct Context<A: Adapter> {
    transaction: Arc<Transaction<A>>,
    client: A::Client,
}

impl<A: Adapter> Context<A> {
    /// Client to run statements on
    pub fn client(&self) -> &A::Client {
        &self.client
    }

    /// The transaction running this work
    pub fn transaction(&self) -> &Arc<Transaction<A>> {
        &self.transaction
    }

    /// Name of the running transaction
    pub fn name(&self) -> &str {
        self.transaction.name()
    }
}

impl<A: Adapter> Clone for Context<A> {
    fn clone(&self) -> Self {
        Context {
            transaction: self.transaction.clone(),
            client: self.client.clone(),
        }
    }
}

impl<A: Adapter> Transaction<A> {
    /// Create a transaction against `facade`
    pub fn new(facade: Arc<Facade<A>>, options: &TransactionOptions) -> Arc<Self> {
        let id = TRANSACTION_NUMBER.fetch_add(1, Ordering::SeqCst) + 1;
        Arc::new(Transaction {
            id,
            name: options.name.clone().unwrap_or_else(|| format!("T{}", id)),
            space: facade.space().clone(),
            facade,
            requested: options.kind,
            answers: options.answers.clone(),
            state: Mutex::new(TransactionState::Created),
            kind: OnceCell::new(),
            binding: OnceCell::new(),
            outcome: OnceCell::new(),
            rollback_only: AtomicBool::new(false),
        })
    }

    /// Unique transaction id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id-space
    pub fn space(&self) -> &IdSpace {
        &self.space
    }

    /// Facade this transaction runs against
    pub fn facade(&self) -> &Arc<Facade<A>> {
        &self.facade
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Resolved type: `New`, `Sub`, or `Auto` for a borrower
    pub fn kind(&self) -> Option<TransactionType> {
        self.kind.get().copied()
    }

    /// Terminal outcome, once ended
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome.get().copied()
    }

    /// True when this transaction borrows an ambient one
    pub fn is_borrowed(&self) -> bool {
        matches!(self.binding.get(), Some(Binding::Borrowed { .. }))
    }

    /// Nesting depth of the handle: 0 for top-level, 1+ for sub-transactions
    pub fn depth(&self) -> Option<usize> {
        match self.binding.get()? {
            Binding::Owned { depth, .. } => Some(*depth),
            Binding::Borrowed { owner } => owner.depth(),
        }
    }

    /// The transaction that owns the handle this one uses
    pub fn owner(self: &Arc<Self>) -> Arc<Self> {
        match self.binding.get() {
            Some(Binding::Borrowed { owner }) => owner.clone(),
            _ => self.clone(),
        }
    }

    /// The client this transaction runs on
    pub fn client(&self) -> Result<A::Client> {
        match self.binding.get() {
            Some(Binding::Owned { client, .. }) => Ok(client.clone()),
            Some(Binding::Borrowed { owner }) => owner.client(),
            None => Err(Error::invalid(format!(
                "transaction {} has no client yet",
                self.name
            ))),
        }
    }

    /// True once a nested failure doomed this transaction
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    /// Force this transaction to roll back when it finishes
    pub fn mark_rollback_only(&self, by: &str, reason: &dyn fmt::Display) {
        if !self.rollback_only.swap(true, Ordering::SeqCst) {
            warn!(
                target: "xwrap::txn",
                transaction = %self.name,
                by = by,
                reason = %reason,
                "Transaction marked rollback-only"
            );
        }
    }

    /// Run `work` as the transaction type given in the options
    ///
    /// Asks the calling chain for an ambient transaction (except for `New`),
    /// resolves the type, opens or reuses a handle, runs the work with this
    /// transaction on the chain, then commits or rolls back.
    pub async fn start<T, F, Fut>(self: Arc<Self>, work: F) -> Result<T>
    where
        F: FnOnce(Context<A>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let mut state = self.state.lock();
            if *state != TransactionState::Created {
                return Err(Error::invalid(format!(
                    "transaction {} already started",
                    self.name
                )));
            }
            *state = TransactionState::AwaitingAmbient;
        }

        let context = match self.prepare().await {
            Ok(context) => context,
            Err(e) => {
                debug!(target: "xwrap::txn", transaction = %self.name, error = %e, "Transaction failed to start");
                self.end(Outcome::NotStarted);
                return Err(e);
            }
        };

        self.run(context, work).await
    }

    async fn prepare(self: &Arc<Self>) -> Result<Context<A>> {
        // New never reuses, so an aborting chain cannot stop it
        let ambient = match self.requested {
            TransactionType::New => None,
            _ => self.lookup_ambient().await?,
        };
        let plan = resolver::resolve(
            self.requested,
            ambient,
            self.facade.supports_subtransactions(),
            &self.space,
        )?;
        self.bind(plan).await
    }

    async fn lookup_ambient(&self) -> Result<Option<Arc<Transaction<A>>>> {
        let ask = Request::<A>::issue(self.space.clone(), Some(format!("{}/ambient", self.name)));
        match ask.await {
            Ok(Some(ambient)) => {
                debug!(target: "xwrap::txn", transaction = %self.name, ambient = %ambient.name, "Ambient transaction found");
                Ok(Some(ambient))
            }
            Ok(None) => {
                debug!(target: "xwrap::txn", transaction = %self.name, "No ambient transaction");
                Ok(None)
            }
            Err(Error::Cancelled { cause }) if !cause.aborts_chain() => {
                debug!(target: "xwrap::txn", transaction = %self.name, cause = %cause, "Ambient lookup cancelled, opening fresh");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn bind(self: &Arc<Self>, plan: Plan<Arc<Transaction<A>>>) -> Result<Context<A>> {
        let adapter = self.facade.adapter();
        let (kind, binding) = match plan {
            Plan::Reuse { ambient } => {
                self.set_state(TransactionState::Reusing);
                let owner = ambient.owner();
                debug!(target: "xwrap::txn", transaction = %self.name, owner = %owner.name, "Reusing ambient transaction");
                (TransactionType::Auto, Binding::Borrowed { owner })
            }
            Plan::OpenSub { parent } => {
                self.set_state(TransactionState::Opening);
                let parent = parent.owner();
                let client = parent.client()?;
                let depth = parent.depth().unwrap_or(0) + 1;
                let handle = adapter.open_sub_transaction(&client, depth).await?;
                debug!(target: "xwrap::txn", transaction = %self.name, parent = %parent.name, depth, "Sub-transaction opened");
                (
                    TransactionType::Sub,
                    Binding::Owned {
                        client,
                        handle: Mutex::new(Some(handle)),
                        depth,
                    },
                )
            }
            Plan::Open => {
                self.set_state(TransactionState::Opening);
                let client = adapter.get_raw_client().await?;
                let handle = adapter.open_transaction(&client).await?;
                debug!(target: "xwrap::txn", transaction = %self.name, "Transaction opened");
                (
                    TransactionType::New,
                    Binding::Owned {
                        client,
                        handle: Mutex::new(Some(handle)),
                        depth: 0,
                    },
                )
            }
        };

        let client = match &binding {
            Binding::Owned { client, .. } => client.clone(),
            Binding::Borrowed { owner } => owner.client()?,
        };
        let _ = self.kind.set(kind);
        let _ = self.binding.set(binding);

        Ok(Context {
            transaction: self.clone(),
            client,
        })
    }

    async fn run<T, F, Fut>(self: &Arc<Self>, context: Context<A>, work: F) -> Result<T>
    where
        F: FnOnce(Context<A>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.set_state(TransactionState::Running);
        debug!(target: "xwrap::txn", transaction = %self.name, space = %self.space, kind = ?self.kind(), "Transaction running");

        let guard = AbandonGuard {
            transaction: Some(self.clone()),
        };
        let chain = Chain::current_or_root().push(self.clone());
        let result = chain.scope(async move { work(context).await }).await;
        let result = self.finish(result).await;
        guard.disarm();
        result
    }

    async fn finish<T>(&self, result: Result<T>) -> Result<T> {
        match self.binding.get() {
            Some(Binding::Owned {
                client,
                handle,
                depth,
            }) => {
                let taken = handle.lock().take();
                match taken {
                    Some(handle) => self.settle(client, &handle, *depth, result).await,
                    None => Err(Error::invalid(format!(
                        "transaction {} already finished",
                        self.name
                    ))),
                }
            }
            Some(Binding::Borrowed { owner }) => {
                self.end(Outcome::Released);
                if matches!(owner.state(), TransactionState::Committing | TransactionState::Ended) {
                    let source = result.err().map(Box::new);
                    error!(
                        target: "xwrap::txn",
                        transaction = %self.name,
                        owner = %owner.name,
                        outcome = ?owner.outcome(),
                        error = ?source,
                        "Borrower finished after its owner settled"
                    );
                    return Err(Error::OwnerSettled {
                        transaction: self.name.clone(),
                        owner: owner.name.clone(),
                        source,
                    });
                }
                if let Err(e) = &result {
                    owner.mark_rollback_only(&self.name, e);
                }
                result
            }
            None => Err(Error::invalid(format!(
                "transaction {} was never opened",
                self.name
            ))),
        }
    }

    async fn settle<T>(&self, client: &A::Client, handle: &A::Handle, depth: usize, result: Result<T>) -> Result<T> {
        let failure = match result {
            Ok(value) if !self.is_rollback_only() => {
                self.set_state(TransactionState::Committing);
                match self.commit(client, handle, depth).await {
                    Ok(()) => {
                        self.end(Outcome::Committed);
                        info!(target: "xwrap::txn", transaction = %self.name, depth, "Transaction committed");
                        return Ok(value);
                    }
                    Err(e) => {
                        warn!(target: "xwrap::txn", transaction = %self.name, error = %e, "Commit failed");
                        e
                    }
                }
            }
            Ok(_) => Error::RollbackOnly {
                transaction: self.name.clone(),
            },
            Err(e) => e,
        };

        self.set_state(TransactionState::RollingBack);
        let rollback = self.rollback(client, handle, depth).await;
        self.end(Outcome::RolledBack);

        match rollback {
            Ok(()) => {
                warn!(target: "xwrap::txn", transaction = %self.name, error = %failure, "Transaction rolled back");
                Err(failure)
            }
            Err(rollback) => {
                error!(target: "xwrap::txn", transaction = %self.name, error = %failure, rollback = %rollback, "Rollback failed");
                Err(Error::RollbackFailed {
                    source: Box::new(failure),
                    rollback: Box::new(rollback),
                })
            }
        }
    }

    async fn commit(&self, client: &A::Client, handle: &A::Handle, depth: usize) -> Result<()> {
        let adapter = self.facade.adapter();
        if depth == 0 {
            adapter.commit_transaction(client, handle).await
        } else {
            adapter.commit_sub_transaction(client, handle).await
        }
    }

    async fn rollback(&self, client: &A::Client, handle: &A::Handle, depth: usize) -> Result<()> {
        let adapter = self.facade.adapter();
        if depth == 0 {
            adapter.rollback_transaction(client, handle).await
        } else {
            adapter.rollback_sub_transaction(client, handle).await
        }
    }

    /// Work future dropped or panicked before finishing
    fn abandon(self: Arc<Self>) {
        match self.binding.get() {
            Some(Binding::Borrowed { owner }) => {
                owner.mark_rollback_only(&self.name, &"work abandoned");
                self.end(Outcome::Released);
            }
            Some(Binding::Owned { handle, .. }) => {
                // None here means commit or rollback is already under way
                let Some(handle) = handle.lock().take() else {
                    return;
                };
                self.set_state(TransactionState::RollingBack);
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        warn!(target: "xwrap::txn", transaction = %self.name, "Work abandoned, scheduling rollback");
                        runtime.spawn(self.rollback_abandoned(handle));
                    }
                    Err(_) => {
                        error!(target: "xwrap::txn", transaction = %self.name, "Work abandoned outside a runtime, handle dropped without rollback");
                        self.end(Outcome::RolledBack);
                    }
                }
            }
            None => {}
        }
    }

    async fn rollback_abandoned(self: Arc<Self>, handle: A::Handle) {
        if let Some(Binding::Owned { client, depth, .. }) = self.binding.get() {
            if let Err(e) = self.rollback(client, &handle, *depth).await {
                error!(target: "xwrap::txn", transaction = %self.name, error = %e, "Rollback of abandoned transaction failed");
            }
        }
        self.end(Outcome::RolledBack);
    }

    fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    fn end(&self, outcome: Outcome) {
        let _ = self.outcome.set(outcome);
        self.set_state(TransactionState::Ended);
    }
}

impl<A: Adapter> Answerer for Transaction<A> {
    fn label(&self) -> &str {
        &self.name
    }

    fn observe(self: Arc<Self>, ask: &dyn AmbientAsk) -> Broadcast {
        if ask.space() != &self.space {
            debug!(target: "xwrap::request", request = ask.name(), by = %self.name, "REQ doesn't match");
            return Broadcast::NoMatch;
        }
        if let Some(expected) = &self.answers {
            if ask.name() != expected {
                debug!(target: "xwrap::request", request = ask.name(), by = %self.name, expected = %expected, "REQ name doesn't match");
                return Broadcast::NoMatch;
            }
        }
        let Some(request) = ask.as_any().downcast_ref::<Request<A>>() else {
            debug!(target: "xwrap::request", request = ask.name(), by = %self.name, "REQ is for another adapter type");
            return Broadcast::NoMatch;
        };

        debug!(target: "xwrap::request", request = ask.name(), by = %self.name, "HANDLE");
        // A borrower is only as alive as the owner whose handle it shares
        let owner = self.owner();
        let won = match (self.state(), owner.state()) {
            (TransactionState::Ended | TransactionState::Committing, _)
            | (_, TransactionState::Ended | TransactionState::Committing) => request.reject(CancelReason::Ended {
                transaction: owner.name.clone(),
            }),
            (TransactionState::RollingBack, _) | (_, TransactionState::RollingBack) => {
                request.reject(CancelReason::ChainAborting {
                    transaction: owner.name.clone(),
                })
            }
            _ if owner.is_rollback_only() => request.reject(CancelReason::ChainAborting {
                transaction: owner.name.clone(),
            }),
            _ => request.fulfill(Some(owner)),
        };

        if won {
            Broadcast::MatchedAndStop
        } else {
            Broadcast::MatchedContinue
        }
    }
}

impl<A: Adapter> fmt::Debug for Transaction<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("space", &self.space)
            .field("state", &self.state())
            .field("kind", &self.kind())
            .field("outcome", &self.outcome())
            .finish()
    }
}

struct AbandonGuard<A: Adapter> {
    transaction: Option<Arc<Transaction<A>>>,
}

impl<A: Adapter> AbandonGuard<A> {
    fn disarm(mut self) {
        self.transaction = None;
    }
}

impl<A: Adapter> Drop for AbandonGuard<A> {
    fn drop(&mut self) {
        if let Some(transaction) = self.transaction.take() {
            transaction.abandon();
        }
    }
}
