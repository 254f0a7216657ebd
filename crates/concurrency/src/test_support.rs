//! Counting adapter shared by the unit tests of this crate

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use xwrap_core::{
    Adapter, Error, Facade, IdSpace, Method, Result, BASIC_INTERFACE, SUBTRANSACTIONS_INTERFACE,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub clients: usize,
    pub opens: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub sub_opens: usize,
    pub sub_commits: usize,
    pub sub_rollbacks: usize,
}

#[derive(Default)]
struct Counters {
    clients: AtomicUsize,
    opens: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    sub_opens: AtomicUsize,
    sub_commits: AtomicUsize,
    sub_rollbacks: AtomicUsize,
}

#[derive(Default)]
pub struct CountingAdapter {
    counters: Counters,
    next_id: AtomicU64,
    subtransactions: bool,
    pub fail_commit: AtomicBool,
    pub fail_rollback: AtomicBool,
}

static ALL_METHODS: [Method; 7] = [
    Method::GetRawClient,
    Method::OpenTransaction,
    Method::CommitTransaction,
    Method::RollbackTransaction,
    Method::OpenSubTransaction,
    Method::CommitSubTransaction,
    Method::RollbackSubTransaction,
];

impl CountingAdapter {
    pub fn with_subtransactions() -> Self {
        CountingAdapter {
            subtransactions: true,
            ..Default::default()
        }
    }

    pub fn counts(&self) -> Counts {
        let c = &self.counters;
        Counts {
            clients: c.clients.load(Ordering::SeqCst),
            opens: c.opens.load(Ordering::SeqCst),
            commits: c.commits.load(Ordering::SeqCst),
            rollbacks: c.rollbacks.load(Ordering::SeqCst),
            sub_opens: c.sub_opens.load(Ordering::SeqCst),
            sub_commits: c.sub_commits.load(Ordering::SeqCst),
            sub_rollbacks: c.sub_rollbacks.load(Ordering::SeqCst),
        }
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl Adapter for CountingAdapter {
    type Client = u64;
    type Handle = u64;

    fn methods(&self) -> &'static [Method] {
        if self.subtransactions {
            &ALL_METHODS
        } else {
            BASIC_INTERFACE
        }
    }

    async fn get_raw_client(&self) -> Result<u64> {
        self.counters.clients.fetch_add(1, Ordering::SeqCst);
        Ok(self.next())
    }

    async fn open_transaction(&self, _client: &u64) -> Result<u64> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.next())
    }

    async fn commit_transaction(&self, _client: &u64, _handle: &u64) -> Result<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(Error::adapter("commit refused"));
        }
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback_transaction(&self, _client: &u64, _handle: &u64) -> Result<()> {
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(Error::adapter("rollback refused"));
        }
        self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open_sub_transaction(&self, _client: &u64, _depth: usize) -> Result<u64> {
        self.counters.sub_opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.next())
    }

    async fn commit_sub_transaction(&self, _client: &u64, _handle: &u64) -> Result<()> {
        self.counters.sub_commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback_sub_transaction(&self, _client: &u64, _handle: &u64) -> Result<()> {
        self.counters.sub_rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

pub fn facade(space: &str, adapter: CountingAdapter) -> Arc<Facade<CountingAdapter>> {
    Arc::new(Facade::new(IdSpace::from(space), "counting", adapter))
}

#[test]
fn test_all_methods_cover_sub_interface() {
    assert!(SUBTRANSACTIONS_INTERFACE.iter().all(|m| ALL_METHODS.contains(m)));
}
