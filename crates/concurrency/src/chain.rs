//! Propagation chain: ambient context without thread-locals
//!
//! Every running [`Transaction`](crate::Transaction) pushes itself onto a
//! task-local chain for the lifetime of its work future. A request issued
//! anywhere below it captures the chain and broadcasts itself upward,
//! innermost answerer first. The first answerer that matches and wins stops
//! the walk.
//!
//! Task-locals do not cross `tokio::spawn`. Use [`spawn`] (or capture
//! [`Chain::current`] and re-enter it with [`Chain::scope`]) to carry the
//! chain into a new task.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use xwrap_core::IdSpace;

tokio::task_local! {
    static CHAIN: Chain;
}

/// Outcome of offering a request to answerers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broadcast {
    /// Nobody on the chain matched
    NoMatch,
    /// An answerer matched and resolved the request; the walk stopped there
    MatchedAndStop,
    /// An answerer matched but the request was already resolved
    MatchedContinue,
}

/// Type-erased view of a pending request
pub trait AmbientAsk: Send + Sync {
    /// Unique request id
    fn id(&self) -> u64;
    /// Display name
    fn name(&self) -> &str;
    /// Id-space the request belongs to
    fn space(&self) -> &IdSpace;
    /// Concrete request, for downcasting by the answerer
    fn as_any(&self) -> &dyn Any;
}

/// A value travelling up the chain
pub enum Signal {
    /// A request asking for the ambient transaction
    Ask(Arc<dyn AmbientAsk>),
    /// A value forwarding to another value
    Forward(Box<Signal>),
    /// Any other progress note; never answered
    Notice(String),
}

impl Signal {
    /// Follow forwarding links down to the request, if there is one
    pub fn request(&self) -> Option<&Arc<dyn AmbientAsk>> {
        let mut signal = self;
        loop {
            match signal {
                Signal::Ask(request) => return Some(request),
                Signal::Forward(inner) => signal = &**inner,
                Signal::Notice(_) => return None,
            }
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Ask(request) => write!(f, "Ask({})", request.name()),
            Signal::Forward(inner) => write!(f, "Forward({:?})", inner),
            Signal::Notice(note) => write!(f, "Notice({})", note),
        }
    }
}

/// Something on the chain that may answer requests
pub trait Answerer: Send + Sync {
    /// Name used in logs
    fn label(&self) -> &str;

    /// Look at a request and answer it if it is ours
    fn observe(self: Arc<Self>, request: &dyn AmbientAsk) -> Broadcast;
}

struct Link {
    answerer: Arc<dyn Answerer>,
    parent: Option<Arc<Link>>,
}

/// Immutable, shareable list of answerers, innermost first
#[derive(Clone, Default)]
pub struct Chain {
    head: Option<Arc<Link>>,
}

impl Chain {
    /// An empty chain
    pub fn root() -> Self {
        Chain::default()
    }

    /// The chain of the current task, if the task runs inside a scope
    pub fn current() -> Option<Chain> {
        CHAIN.try_with(Chain::clone).ok()
    }

    /// The chain of the current task, or an empty one
    pub fn current_or_root() -> Chain {
        Chain::current().unwrap_or_default()
    }

    /// A new chain with `answerer` in front of this one
    pub fn push(&self, answerer: Arc<dyn Answerer>) -> Chain {
        Chain {
            head: Some(Arc::new(Link {
                answerer,
                parent: self.head.clone(),
            })),
        }
    }

    /// Number of answerers on the chain
    pub fn depth(&self) -> usize {
        self.links().count()
    }

    /// True when nobody can answer
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Run `future` with this chain as the task's ambient chain
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        CHAIN.scope(self, future).await
    }

    /// Offer `signal` to each answerer, innermost first
    pub fn broadcast(&self, signal: &Signal) -> Broadcast {
        let Some(request) = signal.request() else {
            return Broadcast::NoMatch;
        };
        let mut result = Broadcast::NoMatch;
        for link in self.links() {
            match link.answerer.clone().observe(request.as_ref()) {
                Broadcast::MatchedAndStop => return Broadcast::MatchedAndStop,
                Broadcast::MatchedContinue => result = Broadcast::MatchedContinue,
                Broadcast::NoMatch => {}
            }
        }
        result
    }

    fn links(&self) -> impl Iterator<Item = &Link> {
        std::iter::successors(self.head.as_deref(), |link| link.parent.as_deref())
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.links().map(|link| link.answerer.label()))
            .finish()
    }
}

/// Spawn `future` on the tokio runtime, carrying the current chain with it
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match Chain::current() {
        Some(chain) => tokio::spawn(chain.scope(future)),
        None => tokio::spawn(future),
    }
}
