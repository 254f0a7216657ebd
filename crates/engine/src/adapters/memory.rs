//! In-memory adapter
//!
//! Registered under the name `memory`. It keeps no data; every client
//! records the statements it was asked to run in a journal, and the adapter
//! counts each primitive call. Sub-transactions are savepoints named after
//! their depth (`sp1`, `sp2`, ...).
//!
//! Failures can be injected per primitive, either through settings or at
//! runtime, which makes the adapter the stub of choice for tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use xwrap_core::{Adapter, ClientAccessor, Error, Method, Result, Settings};

/// Name the adapter is registered under
pub const MEMORY_ADAPTER: &str = "memory";

static BASIC_AND_WRAP: &[Method] = &[
    Method::GetRawClient,
    Method::OpenTransaction,
    Method::CommitTransaction,
    Method::RollbackTransaction,
    Method::Wrap,
];

static FULL: &[Method] = &[
    Method::GetRawClient,
    Method::OpenTransaction,
    Method::CommitTransaction,
    Method::RollbackTransaction,
    Method::OpenSubTransaction,
    Method::CommitSubTransaction,
    Method::RollbackSubTransaction,
    Method::Wrap,
];

/// Errors raised by the memory adapter
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// A primitive was configured to fail
    #[error("memory adapter refused to {0}")]
    Refused(&'static str),

    /// The adapter was disconnected
    #[error("memory adapter is disconnected")]
    Disconnected,
}

/// Settings accepted by [`MemoryAdapter::from_settings`]
///
/// ```toml
/// [settings]
/// subtransactions = true
/// fail_commit = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Offer savepoint-style sub-transactions
    pub subtransactions: bool,
    /// Fail every `open_transaction`
    pub fail_open: bool,
    /// Fail every commit
    pub fail_commit: bool,
    /// Fail every rollback
    pub fail_rollback: bool,
}

impl Default for MemorySettings {
    fn default() -> Self {
        MemorySettings {
            subtransactions: true,
            fail_open: false,
            fail_commit: false,
            fail_rollback: false,
        }
    }
}

/// Snapshot of the adapter's call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Raw clients handed out
    pub clients: usize,
    /// Top-level transactions opened
    pub opens: usize,
    /// Top-level commits
    pub commits: usize,
    /// Top-level rollbacks
    pub rollbacks: usize,
    /// Savepoints created
    pub sub_opens: usize,
    /// Savepoints released
    pub sub_commits: usize,
    /// Savepoints rolled back to
    pub sub_rollbacks: usize,
    /// Disconnect calls
    pub disconnects: usize,
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
    disconnects: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// Client handed out by the memory adapter
#[derive(Debug, Clone)]
pub struct MemoryClient {
    id: u64,
    journal: Arc<Mutex<Vec<String>>>,
}

impl MemoryClient {
    fn new(id: u64) -> Self {
        MemoryClient {
            id,
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Client id, unique per adapter
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Record a statement
    pub fn query(&self, statement: impl Into<String>) {
        self.journal.lock().push(statement.into());
    }

    /// Every statement run on this client, in order
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }
}

impl PartialEq for MemoryClient {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MemoryClient {}

/// One open transaction or savepoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHandle {
    /// Handle id
    pub id: u64,
    /// 0 for a top-level transaction, savepoint depth otherwise
    pub depth: usize,
}

impl MemoryHandle {
    fn savepoint(&self) -> String {
        format!("sp{}", self.depth)
    }
}

/// Adapter that keeps everything in memory
pub struct MemoryAdapter {
    subtransactions: bool,
    fail_open: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    connected: AtomicBool,
    next_id: AtomicU64,
    counters: Counters,
    accessor: Mutex<Option<ClientAccessor<MemoryClient>>>,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        MemoryAdapter::new(MemorySettings::default())
    }
}

impl MemoryAdapter {
    /// Create an adapter with `settings`
    pub fn new(settings: MemorySettings) -> Self {
        MemoryAdapter {
            subtransactions: settings.subtransactions,
            fail_open: AtomicBool::new(settings.fail_open),
            fail_commit: AtomicBool::new(settings.fail_commit),
            fail_rollback: AtomicBool::new(settings.fail_rollback),
            connected: AtomicBool::new(true),
            next_id: AtomicU64::new(0),
            counters: Counters::default(),
            accessor: Mutex::new(None),
        }
    }

    /// Create an adapter without sub-transaction support
    pub fn without_subtransactions() -> Self {
        MemoryAdapter::new(MemorySettings {
            subtransactions: false,
            ..Default::default()
        })
    }

    /// Build from registry settings; `null` means defaults
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        if settings.is_null() {
            return Ok(MemoryAdapter::default());
        }
        let settings: MemorySettings = serde_json::from_value(settings.clone())
            .map_err(|e| Error::Config(format!("Invalid memory adapter settings: {}", e)))?;
        Ok(MemoryAdapter::new(settings))
    }

    /// Current counter values
    pub fn stats(&self) -> MemoryStats {
        let c = &self.counters;
        MemoryStats {
            clients: c.clients.load(Ordering::SeqCst),
            opens: c.opens.load(Ordering::SeqCst),
            commits: c.commits.load(Ordering::SeqCst),
            rollbacks: c.rollbacks.load(Ordering::SeqCst),
            sub_opens: c.sub_opens.load(Ordering::SeqCst),
            sub_commits: c.sub_commits.load(Ordering::SeqCst),
            sub_rollbacks: c.sub_rollbacks.load(Ordering::SeqCst),
            disconnects: c.disconnects.load(Ordering::SeqCst),
        }
    }

    /// Whether `disconnect` has not been called yet
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Make `open_transaction` fail from now on
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make commits fail from now on
    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Make rollbacks fail from now on
    pub fn set_fail_rollback(&self, fail: bool) {
        self.fail_rollback.store(fail, Ordering::SeqCst);
    }

    /// Whether a client accessor has been installed
    pub fn is_wrapped(&self) -> bool {
        self.accessor.lock().is_some()
    }

    /// Ask the installed accessor for the ambient client
    ///
    /// Resolves to `None` when nothing is ambient or nothing was installed.
    pub async fn ambient_client(&self, caller: Option<&str>) -> Result<Option<MemoryClient>> {
        let accessor = self.accessor.lock().clone();
        match accessor {
            Some(accessor) => (*accessor)(caller.map(str::to_string)).await,
            None => Ok(None),
        }
    }

    fn check(&self, flag: &AtomicBool, action: &'static str) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::adapter(MemoryError::Disconnected));
        }
        if flag.load(Ordering::SeqCst) {
            return Err(Error::adapter(MemoryError::Refused(action)));
        }
        Ok(())
    }

    fn handle(&self, depth: usize) -> MemoryHandle {
        MemoryHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            depth,
        }
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    type Client = MemoryClient;
    type Handle = MemoryHandle;

    fn name(&self) -> &str {
        MEMORY_ADAPTER
    }

    fn methods(&self) -> &'static [Method] {
        if self.subtransactions {
            FULL
        } else {
            BASIC_AND_WRAP
        }
    }

    async fn get_raw_client(&self) -> Result<MemoryClient> {
        if !self.is_connected() {
            return Err(Error::adapter(MemoryError::Disconnected));
        }
        bump(&self.counters.clients);
        let client = MemoryClient::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        debug!(target: "xwrap::adapter", adapter = MEMORY_ADAPTER, client = client.id, "Client created");
        Ok(client)
    }

    async fn open_transaction(&self, client: &MemoryClient) -> Result<MemoryHandle> {
        self.check(&self.fail_open, "open a transaction")?;
        bump(&self.counters.opens);
        client.query("BEGIN");
        Ok(self.handle(0))
    }

    async fn commit_transaction(&self, client: &MemoryClient, _handle: &MemoryHandle) -> Result<()> {
        self.check(&self.fail_commit, "commit")?;
        bump(&self.counters.commits);
        client.query("COMMIT");
        Ok(())
    }

    async fn rollback_transaction(&self, client: &MemoryClient, _handle: &MemoryHandle) -> Result<()> {
        self.check(&self.fail_rollback, "roll back")?;
        bump(&self.counters.rollbacks);
        client.query("ROLLBACK");
        Ok(())
    }

    async fn open_sub_transaction(&self, client: &MemoryClient, depth: usize) -> Result<MemoryHandle> {
        if !self.subtransactions {
            return Err(Error::Unsupported {
                method: Method::OpenSubTransaction,
            });
        }
        self.check(&self.fail_open, "open a savepoint")?;
        bump(&self.counters.sub_opens);
        let handle = self.handle(depth);
        client.query(format!("SAVEPOINT {}", handle.savepoint()));
        Ok(handle)
    }

    async fn commit_sub_transaction(&self, client: &MemoryClient, handle: &MemoryHandle) -> Result<()> {
        self.check(&self.fail_commit, "release a savepoint")?;
        bump(&self.counters.sub_commits);
        client.query(format!("RELEASE SAVEPOINT {}", handle.savepoint()));
        Ok(())
    }

    async fn rollback_sub_transaction(&self, client: &MemoryClient, handle: &MemoryHandle) -> Result<()> {
        self.check(&self.fail_rollback, "roll back to a savepoint")?;
        bump(&self.counters.sub_rollbacks);
        client.query(format!("ROLLBACK TO SAVEPOINT {}", handle.savepoint()));
        Ok(())
    }

    fn wrap(&self, accessor: ClientAccessor<MemoryClient>) {
        *self.accessor.lock() = Some(accessor);
    }

    async fn disconnect(&self) -> Result<()> {
        bump(&self.counters.disconnects);
        self.connected.store(false, Ordering::SeqCst);
        self.accessor.lock().take();
        debug!(target: "xwrap::adapter", adapter = MEMORY_ADAPTER, "Disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_default_when_null() {
        let adapter = MemoryAdapter::from_settings(&Settings::Null).unwrap();
        assert_eq!(adapter.methods(), FULL);
        assert_eq!(adapter.stats(), MemoryStats::default());
    }

    #[test]
    fn test_settings_partial_object() {
        let adapter = MemoryAdapter::from_settings(&json!({ "subtransactions": false })).unwrap();
        assert_eq!(adapter.methods(), BASIC_AND_WRAP);
        assert!(!adapter.fail_commit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_settings_invalid() {
        let err = MemoryAdapter::from_settings(&json!({ "subtransactions": "yes" })).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_journal_records_statements() {
        let adapter = MemoryAdapter::default();
        let client = adapter.get_raw_client().await.unwrap();
        let top = adapter.open_transaction(&client).await.unwrap();
        client.query("INSERT 1");
        let sp = adapter.open_sub_transaction(&client, 1).await.unwrap();
        adapter.rollback_sub_transaction(&client, &sp).await.unwrap();
        adapter.commit_transaction(&client, &top).await.unwrap();

        assert_eq!(
            client.journal(),
            vec!["BEGIN", "INSERT 1", "SAVEPOINT sp1", "ROLLBACK TO SAVEPOINT sp1", "COMMIT"]
        );
        let stats = adapter.stats();
        assert_eq!((stats.opens, stats.commits, stats.sub_opens, stats.sub_rollbacks), (1, 1, 1, 1));
    }

    #[tokio::test]
    async fn test_injected_failure_keeps_native_error() {
        let adapter = MemoryAdapter::default();
        adapter.set_fail_commit(true);
        let client = adapter.get_raw_client().await.unwrap();
        let handle = adapter.open_transaction(&client).await.unwrap();
        let err = adapter.commit_transaction(&client, &handle).await.unwrap_err();

        match err {
            Error::Adapter(inner) => {
                assert_eq!(
                    inner.downcast_ref::<MemoryError>(),
                    Some(&MemoryError::Refused("commit"))
                );
            }
            other => panic!("Wrong error variant: {other:?}"),
        }
        assert_eq!(adapter.stats().commits, 0);
    }

    #[tokio::test]
    async fn test_disconnect_refuses_new_clients() {
        let adapter = MemoryAdapter::default();
        adapter.disconnect().await.unwrap();
        assert!(!adapter.is_connected());
        assert_eq!(adapter.stats().disconnects, 1);
        assert!(adapter.get_raw_client().await.is_err());
    }

    #[tokio::test]
    async fn test_sub_unsupported_when_disabled() {
        let adapter = MemoryAdapter::without_subtransactions();
        let client = adapter.get_raw_client().await.unwrap();
        let err = adapter.open_sub_transaction(&client, 1).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Unsupported {
                method: Method::OpenSubTransaction
            }
        ));
    }

    #[tokio::test]
    async fn test_ambient_client_without_accessor() {
        let adapter = MemoryAdapter::default();
        assert!(!adapter.is_wrapped());
        assert!(adapter.ambient_client(Some("probe")).await.unwrap().is_none());
    }
}
