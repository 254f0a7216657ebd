//! Adapter trait: the storage collaborator xwrap drives
//!
//! xwrap never talks to a database itself. An adapter supplies the
//! primitive open/commit/rollback operations and xwrap decides when to call
//! them and who receives the resulting client.
//!
//! Optional capabilities (sub-transactions, call wrapping) have default
//! bodies that fail with [`Error::Unsupported`]. An adapter announces what
//! it really implements through [`Adapter::methods`], which is what
//! feature detection inspects.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::features::FeatureFlags;
use crate::types::{Method, BASIC_INTERFACE};

/// Boxed, sendable future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Settings handed to an adapter constructor
pub type Settings = serde_json::Value;

/// Callback an adapter can use to fetch the ambient client
///
/// The argument is an optional caller name used for request naming.
/// Resolves to `None` when no transaction is ambient.
pub type ClientAccessor<C> = Arc<dyn Fn(Option<String>) -> BoxFuture<'static, Result<Option<C>>> + Send + Sync>;

/// Storage adapter contract
///
/// # Example
///
/// ```ignore
/// #[async_trait]
/// impl Adapter for PgAdapter {
///     type Client = PgClient;
///     type Handle = ();
///
///     async fn get_raw_client(&self) -> Result<PgClient> { self.pool.get().await.map_err(Error::adapter) }
///     async fn open_transaction(&self, c: &PgClient) -> Result<()> { c.query("BEGIN").await.map_err(Error::adapter) }
///     // ...
/// }
/// ```
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Client handed to work functions
    type Client: Clone + Send + Sync + 'static;
    /// Adapter-native token for one open transaction
    type Handle: Send + Sync + 'static;

    /// Adapter name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Methods this adapter actually implements
    fn methods(&self) -> &'static [Method] {
        BASIC_INTERFACE
    }

    /// Feature flags preset by the adapter; detection never overrides them
    fn declared_features(&self) -> FeatureFlags {
        FeatureFlags::default()
    }

    /// Obtain a raw client
    async fn get_raw_client(&self) -> Result<Self::Client>;

    /// Begin a top-level transaction on `client`
    async fn open_transaction(&self, client: &Self::Client) -> Result<Self::Handle>;

    /// Commit a top-level transaction
    async fn commit_transaction(&self, client: &Self::Client, handle: &Self::Handle) -> Result<()>;

    /// Roll back a top-level transaction
    async fn rollback_transaction(&self, client: &Self::Client, handle: &Self::Handle) -> Result<()>;

    /// Begin a sub-transaction; `depth` is 1 for the first nesting level
    async fn open_sub_transaction(&self, _client: &Self::Client, _depth: usize) -> Result<Self::Handle> {
        Err(Error::Unsupported {
            method: Method::OpenSubTransaction,
        })
    }

    /// Commit a sub-transaction
    async fn commit_sub_transaction(&self, _client: &Self::Client, _handle: &Self::Handle) -> Result<()> {
        Err(Error::Unsupported {
            method: Method::CommitSubTransaction,
        })
    }

    /// Roll back a sub-transaction
    async fn rollback_sub_transaction(&self, _client: &Self::Client, _handle: &Self::Handle) -> Result<()> {
        Err(Error::Unsupported {
            method: Method::RollbackSubTransaction,
        })
    }

    /// Install an accessor the adapter may call to find the ambient client
    fn wrap(&self, _accessor: ClientAccessor<Self::Client>) {}

    /// Release every resource held by the adapter
    async fn disconnect(&self) -> Result<()>;
}
