//! Requests for the ambient transaction
//!
//! A [`Request`] is a single "who can give me the current transaction?"
//! question. It resolves exactly once: fulfilled with a transaction,
//! fulfilled with `None` (unanswered), or rejected with a [`CancelReason`].
//! Later resolutions are ignored.
//!
//! [`Request::issue`] returns an [`Ask`]. Awaiting the ask yields to the
//! scheduler once, broadcasts the request up the propagation chain captured
//! at issue time, and resolves it with `None` if nobody answered during
//! that round. It never waits on a clock.

use std::any::Any;
use std::fmt;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use xwrap_core::{Adapter, BoxFuture, CancelReason, Error, IdSpace, Result};

use crate::chain::{AmbientAsk, Broadcast, Chain, Signal};
use crate::transaction::Transaction;

static REQUEST_NUMBER: AtomicU64 = AtomicU64::new(0);

/// What a request resolves to
pub type Answer<A> = std::result::Result<Option<Arc<Transaction<A>>>, CancelReason>;

/// A pending question for the ambient transaction of one id-space
pub struct Request<A: Adapter> {
    id: u64,
    name: String,
    space: IdSpace,
    sender: Mutex<Option<oneshot::Sender<Answer<A>>>>,
}

impl<A: Adapter> Request<A> {
    /// Create a request and capture the current propagation chain
    ///
    /// Without a name the request is called `?<id>`.
    pub fn issue(space: IdSpace, name: Option<String>) -> Ask<A> {
        let id = REQUEST_NUMBER.fetch_add(1, Ordering::SeqCst) + 1;
        let name = name.unwrap_or_else(|| format!("?{}", id));
        let (sender, receiver) = oneshot::channel();

        debug!(target: "xwrap::request", request = %name, space = %space, "ASK");

        Ask {
            request: Arc::new(Request {
                id,
                name,
                space,
                sender: Mutex::new(Some(sender)),
            }),
            receiver,
            chain: Chain::current(),
        }
    }

    /// Issue a request and wait for the answer
    pub async fn ask(space: IdSpace, name: Option<String>) -> Result<Option<Arc<Transaction<A>>>> {
        Self::issue(space, name).await
    }

    /// Client of the ambient transaction, if there is one
    pub async fn client(space: IdSpace, name: Option<String>) -> Result<Option<A::Client>> {
        match Self::ask(space, name).await? {
            Some(transaction) => transaction.client().map(Some),
            None => Ok(None),
        }
    }

    /// Unique request id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id-space this request belongs to
    pub fn space(&self) -> &IdSpace {
        &self.space
    }

    /// True until the first fulfill or reject
    pub fn is_pending(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Resolve with `transaction`; returns false if already resolved
    pub fn fulfill(&self, transaction: Option<Arc<Transaction<A>>>) -> bool {
        let Some(sender) = self.sender.lock().take() else {
            return false;
        };
        debug!(
            target: "xwrap::request",
            request = %self.name,
            by = transaction.as_ref().map(|t| t.name()).unwrap_or("none"),
            "FULFILL"
        );
        // The asker may have given up; the request still counts as resolved
        let _ = sender.send(Ok(transaction));
        true
    }

    /// Reject with `reason`; returns false if already resolved
    pub fn reject(&self, reason: CancelReason) -> bool {
        let Some(sender) = self.sender.lock().take() else {
            return false;
        };
        debug!(target: "xwrap::request", request = %self.name, reason = %reason, "REJECT");
        let _ = sender.send(Err(reason));
        true
    }

    fn handle_unanswered(&self) -> bool {
        self.fulfill(None)
    }
}

impl<A: Adapter> AmbientAsk for Request<A> {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn space(&self) -> &IdSpace {
        &self.space
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<A: Adapter> fmt::Debug for Request<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("space", &self.space)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Awaitable side of a [`Request`]
///
/// Resolves to the answering transaction, `None` when unanswered, or
/// [`Error::Cancelled`] when the request was rejected.
pub struct Ask<A: Adapter> {
    request: Arc<Request<A>>,
    receiver: oneshot::Receiver<Answer<A>>,
    chain: Option<Chain>,
}

impl<A: Adapter> Ask<A> {
    /// The underlying request
    pub fn request(&self) -> &Arc<Request<A>> {
        &self.request
    }

    /// Broadcast the request along the chain it was issued in
    ///
    /// Fails with [`Error::MismatchedHandler`] when the request was issued
    /// outside any propagation scope, since there is nobody to ask.
    pub fn broadcast(&self) -> Result<Broadcast> {
        let chain = self.chain.as_ref().ok_or_else(|| Error::MismatchedHandler {
            request: self.request.name.clone(),
        })?;
        Ok(self.offer(chain))
    }

    fn offer(&self, chain: &Chain) -> Broadcast {
        let request: Arc<dyn AmbientAsk> = self.request.clone();
        chain.broadcast(&Signal::Ask(request))
    }

    /// Run one broadcast round and wait for the answer
    pub async fn resolve(self) -> Result<Option<Arc<Transaction<A>>>> {
        tokio::task::yield_now().await;

        debug!(target: "xwrap::request", request = %self.request.name, "(ASK UP)");
        if let Some(chain) = &self.chain {
            self.offer(chain);
        }

        if self.request.is_pending() {
            debug!(target: "xwrap::request", request = %self.request.name, "(ASK UNA)");
            self.request.handle_unanswered();
        }

        match self.receiver.await {
            Ok(Ok(transaction)) => Ok(transaction),
            Ok(Err(cause)) => Err(Error::Cancelled { cause }),
            // Sender dropped without an answer: same as unanswered
            Err(_) => Ok(None),
        }
    }
}

impl<A: Adapter> IntoFuture for Ask<A> {
    type Output = Result<Option<Arc<Transaction<A>>>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.resolve())
    }
}
