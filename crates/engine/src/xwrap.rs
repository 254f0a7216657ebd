//! The factory: entry point for running work in ambient transactions
//!
//! An [`XWrap`] is bound to one id-space. Every call to
//! [`XWrap::transaction`] builds a fresh [`Transaction`] and starts it;
//! nested calls anywhere below it in the same task (or in tasks spawned with
//! [`xwrap_concurrency::spawn`]) find it through the propagation chain.
//!
//! ```ignore
//! let xwrap = XWrap::<MemoryAdapter>::initialize(&XWrapConfig::new("memory", "main"))?;
//!
//! xwrap.transaction(|ctx| async move {
//!     ctx.client().query("INSERT ...");
//!     save_audit_row(&xwrap).await   // reuses the same transaction
//! }).await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use tracing::debug;
use xwrap_concurrency::{Context, Request, Transaction, TransactionOptions};
use xwrap_core::{Adapter, BoxFuture, ClientAccessor, Error, Facade, Features, IdSpace, Result, Settings, TransactionType};

use crate::config::XWrapConfig;
use crate::registry::{self, AdapterSource};

/// Factory bound to one id-space
pub struct XWrap<A: Adapter> {
    facade: Arc<Facade<A>>,
}

impl<A: Adapter> Clone for XWrap<A> {
    fn clone(&self) -> Self {
        XWrap {
            facade: self.facade.clone(),
        }
    }
}

impl<A: Adapter> std::fmt::Debug for XWrap<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XWrap").field("facade", &self.facade).finish()
    }
}

impl<A: Adapter> XWrap<A> {
    /// Always open a fresh top-level transaction
    pub const NEW: TransactionType = TransactionType::New;
    /// Open a sub-transaction under the ambient one
    pub const SUB: TransactionType = TransactionType::Sub;
    /// Reuse the ambient transaction, or open one
    pub const AUTO: TransactionType = TransactionType::Auto;

    /// Construct (or reuse) the adapter named in `config`
    ///
    /// # Errors
    ///
    /// [`Error::AdapterNotFound`] for an unknown adapter name, or
    /// [`Error::Config`] for an invalid config.
    pub fn initialize(config: &XWrapConfig) -> Result<Self> {
        config.validate()?;
        let space = IdSpace::from(config.id.as_str());
        let facade = registry::resolve(
            AdapterSource::Named(config.adapter.clone()),
            &config.settings,
            &space,
        )?;
        Ok(Self::attach(facade, config.wrap))
    }

    /// Register `adapter` under `space` (or reuse what is registered there)
    pub fn with_adapter(adapter: A, space: impl Into<IdSpace>, wrap: bool) -> Result<Self> {
        let space = space.into();
        let facade = registry::resolve(AdapterSource::Instance(adapter), &Settings::Null, &space)?;
        Ok(Self::attach(facade, wrap))
    }

    fn attach(facade: Arc<Facade<A>>, wrap: bool) -> Self {
        if wrap && facade.features().wrap {
            let space = facade.space().clone();
            let accessor: ClientAccessor<A::Client> = Arc::new(move |caller: Option<String>| -> BoxFuture<'static, Result<Option<A::Client>>> {
                let space = space.clone();
                Box::pin(async move { Request::<A>::client(space, caller).await })
            });
            facade.adapter().wrap(accessor);
            debug!(target: "xwrap::adapter", space = %facade.space(), "Client accessor installed");
        }
        XWrap { facade }
    }

    /// Run `work` in an implicit transaction (reuse ambient, else open)
    pub async fn transaction<T, F, Fut>(&self, work: F) -> Result<T>
    where
        F: FnOnce(Context<A>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.transaction_with(TransactionOptions::default(), work).await
    }

    /// Run `work` in a transaction of the given type
    pub async fn transaction_of<T, F, Fut>(&self, kind: TransactionType, work: F) -> Result<T>
    where
        F: FnOnce(Context<A>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.transaction_with(TransactionOptions::new(kind), work).await
    }

    /// Run `work` with full control over type, name and answered request
    pub async fn transaction_with<T, F, Fut>(&self, options: TransactionOptions, work: F) -> Result<T>
    where
        F: FnOnce(Context<A>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        Transaction::new(self.facade.clone(), &options).start(work).await
    }

    /// Client of the ambient transaction, if any
    pub async fn client(&self, caller: Option<&str>) -> Result<Option<A::Client>> {
        Request::<A>::client(self.space().clone(), caller.map(str::to_string)).await
    }

    /// Ambient client, or a fresh raw client the caller owns
    pub async fn take_client(&self, caller: Option<&str>) -> Result<A::Client> {
        let ambient = match self.get_transaction(caller).await {
            Ok(ambient) => ambient,
            Err(Error::Cancelled { cause }) if !cause.aborts_chain() => None,
            Err(e) => return Err(e),
        };
        match ambient {
            Some(transaction) => transaction.client(),
            None => self.facade.adapter().get_raw_client().await,
        }
    }

    /// The ambient transaction itself, if any
    pub async fn get_transaction(&self, caller: Option<&str>) -> Result<Option<Arc<Transaction<A>>>> {
        Request::<A>::ask(self.space().clone(), caller.map(str::to_string)).await
    }

    /// Unregister this id-space and disconnect the adapter
    pub async fn disconnect(&self) -> Result<()> {
        registry::disconnect(Some(self.space().as_str())).await
    }

    /// The facade this factory runs against
    pub fn facade(&self) -> &Arc<Facade<A>> {
        &self.facade
    }

    /// The adapter
    pub fn adapter(&self) -> &Arc<A> {
        self.facade.adapter()
    }

    /// Id-space of this factory
    pub fn space(&self) -> &IdSpace {
        self.facade.space()
    }

    /// Detected adapter features
    pub fn features(&self) -> Features {
        self.facade.features()
    }
}

/// Factory for a registered id-space
///
/// Without a space the only registered factory is returned; `None` when
/// nothing is registered.
///
/// # Errors
///
/// [`Error::InvalidOperation`] when `space` is omitted and several id-spaces
/// are registered.
pub fn xtransaction<A: Adapter>(space: Option<&str>) -> Result<Option<XWrap<A>>> {
    Ok(registry::lookup::<A>(space)?.map(|facade| XWrap { facade }))
}

/// Ambient client of `space`, if any
pub async fn client<A: Adapter>(space: &str, caller: Option<&str>) -> Result<Option<A::Client>> {
    Request::<A>::client(IdSpace::from(space), caller.map(str::to_string)).await
}

/// Disconnect a registered id-space; see [`xtransaction`] for selection
pub async fn disconnect(space: Option<&str>) -> Result<()> {
    registry::disconnect(space).await
}
