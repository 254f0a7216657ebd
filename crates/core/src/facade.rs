//! Adapter facade
//!
//! A facade pairs an adapter with the id-space it was registered under and
//! the feature map detected for it. Transactions only ever see adapters
//! through a facade.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::features::{FeatureFlags, Features};
use crate::traits::{Adapter, BoxFuture};
use crate::types::IdSpace;

/// An adapter bound to an id-space
pub struct Facade<A: Adapter> {
    space: IdSpace,
    name: String,
    adapter: Arc<A>,
    flags: Mutex<FeatureFlags>,
}

impl<A: Adapter> Facade<A> {
    /// Bind `adapter` to `space` and run feature detection once
    pub fn new(space: IdSpace, name: impl Into<String>, adapter: A) -> Self {
        let flags = adapter.declared_features();
        let facade = Facade {
            space,
            name: name.into(),
            adapter: Arc::new(adapter),
            flags: Mutex::new(flags),
        };
        facade.detect_features();
        facade
    }

    /// Id-space this facade is registered under
    pub fn space(&self) -> &IdSpace {
        &self.space
    }

    /// Name the adapter was resolved by
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wrapped adapter
    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    /// Fill in any unknown feature flags from the adapter's method set
    ///
    /// Safe to call repeatedly; flags that are already known stay as they are.
    pub fn detect_features(&self) -> Features {
        let mut flags = self.flags.lock();
        let features = flags.detect(self.adapter.methods());
        debug!(
            target: "xwrap::adapter",
            space = %self.space,
            basic = features.basic,
            subtransactions = features.subtransactions,
            wrap = features.wrap,
            "Adapter features detected"
        );
        features
    }

    /// Current feature map
    pub fn features(&self) -> Features {
        self.flags.lock().detect(self.adapter.methods())
    }

    /// Raw flags as stored, including anything the adapter preset
    pub fn flags(&self) -> FeatureFlags {
        self.flags.lock().clone()
    }

    /// Whether nested sub-transactions can be opened
    pub fn supports_subtransactions(&self) -> bool {
        self.features().subtransactions
    }
}

impl<A: Adapter> std::fmt::Debug for Facade<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Facade")
            .field("space", &self.space)
            .field("name", &self.name)
            .field("flags", &*self.flags.lock())
            .finish()
    }
}

/// Type-erased view of a facade, as held by the process-wide registry
pub trait ErasedFacade: Send + Sync {
    /// Id-space of the facade
    fn space(&self) -> &IdSpace;

    /// Adapter name
    fn adapter_name(&self) -> &str;

    /// Call the adapter's disconnect primitive
    fn disconnect(&self) -> BoxFuture<'_, Result<()>>;

    /// Recover the concrete facade
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<A: Adapter> ErasedFacade for Facade<A> {
    fn space(&self) -> &IdSpace {
        &self.space
    }

    fn adapter_name(&self) -> &str {
        &self.name
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<()>> {
        self.adapter.disconnect()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
