//! Process-wide registries
//!
//! Two maps live here:
//! - adapter constructors, keyed by name (`memory` is built in)
//! - facades, keyed by id-space
//!
//! At most one facade exists per id-space. Resolving an id-space that is
//! already registered returns the same facade, whatever source was passed.
//!
//! Both maps use parking_lot locks and are never held across an await.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use xwrap_core::{Adapter, ErasedFacade, Error, Facade, IdSpace, Result, Settings};

use crate::adapters::{MemoryAdapter, MEMORY_ADAPTER};

type Constructor = Arc<dyn Fn(&Settings) -> Result<Box<dyn Any + Send>> + Send + Sync>;

fn constructor<A, F>(build: F) -> Constructor
where
    A: Adapter,
    F: Fn(&Settings) -> Result<A> + Send + Sync + 'static,
{
    Arc::new(move |settings: &Settings| build(settings).map(|adapter| Box::new(adapter) as Box<dyn Any + Send>))
}

// =============================================================================
// Adapter constructors
// =============================================================================

static ADAPTERS: Lazy<RwLock<HashMap<String, Constructor>>> = Lazy::new(|| {
    let mut adapters = HashMap::new();
    adapters.insert(MEMORY_ADAPTER.to_string(), constructor(MemoryAdapter::from_settings));
    RwLock::new(adapters)
});

/// Make an adapter constructible by `name`
///
/// Replaces any constructor already registered under that name.
pub fn register_adapter<A, F>(name: impl Into<String>, build: F)
where
    A: Adapter,
    F: Fn(&Settings) -> Result<A> + Send + Sync + 'static,
{
    let name = name.into();
    debug!(target: "xwrap::adapter", adapter = %name, "Adapter registered");
    ADAPTERS.write().insert(name, constructor(build));
}

/// Forget the constructor registered under `name`
pub fn unregister_adapter(name: &str) -> bool {
    ADAPTERS.write().remove(name).is_some()
}

/// Whether a constructor is registered under `name`
pub fn is_registered(name: &str) -> bool {
    ADAPTERS.read().contains_key(name)
}

/// Construct the adapter registered under `name`
///
/// # Errors
///
/// [`Error::AdapterNotFound`] when nothing is registered under `name`;
/// [`Error::Config`] when the registered adapter is not an `A`.
pub fn construct<A: Adapter>(name: &str, settings: &Settings) -> Result<A> {
    let build = ADAPTERS
        .read()
        .get(name)
        .cloned()
        .ok_or_else(|| Error::AdapterNotFound {
            name: name.to_string(),
        })?;
    let adapter = build(settings)?;
    adapter.downcast::<A>().map(|adapter| *adapter).map_err(|_| {
        Error::Config(format!(
            "Adapter '{}' is not of type {}",
            name,
            type_name::<A>()
        ))
    })
}

// =============================================================================
// Facades
// =============================================================================

static FACADES: Lazy<Mutex<HashMap<IdSpace, Arc<dyn ErasedFacade>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Where a facade's adapter comes from
pub enum AdapterSource<A> {
    /// A ready adapter instance
    Instance(A),
    /// A name in the adapter registry
    Named(String),
}

/// Facade for `space`, creating and registering it on first use
///
/// # Errors
///
/// Constructor errors for a named source, or [`Error::Config`] when
/// `space` is already bound to a different adapter type.
pub fn resolve<A: Adapter>(source: AdapterSource<A>, settings: &Settings, space: &IdSpace) -> Result<Arc<Facade<A>>> {
    let mut facades = FACADES.lock();
    if let Some(existing) = facades.get(space) {
        return downcast(existing.clone());
    }

    let (name, adapter) = match source {
        AdapterSource::Instance(adapter) => (adapter.name().to_string(), adapter),
        AdapterSource::Named(name) => {
            let adapter = construct::<A>(&name, settings)?;
            (name, adapter)
        }
    };
    let facade = Arc::new(Facade::new(space.clone(), name, adapter));
    facades.insert(space.clone(), facade.clone());
    info!(target: "xwrap::adapter", space = %space, adapter = facade.name(), "Facade registered");
    Ok(facade)
}

/// Registered facade for `space`
///
/// Without a space, the only registered facade is returned; nothing when
/// none is registered.
///
/// # Errors
///
/// [`Error::InvalidOperation`] when `space` is omitted and more than one
/// facade is registered.
pub fn lookup<A: Adapter>(space: Option<&str>) -> Result<Option<Arc<Facade<A>>>> {
    let found = pick(&FACADES.lock(), space)?;
    found.map(downcast).transpose()
}

/// Remove the facade for `space` without disconnecting it
pub fn unregister(space: &IdSpace) -> bool {
    FACADES.lock().remove(space).is_some()
}

/// Every registered id-space, sorted
pub fn registered_spaces() -> Vec<IdSpace> {
    let mut spaces: Vec<IdSpace> = FACADES.lock().keys().cloned().collect();
    spaces.sort();
    spaces
}

/// Unregister a facade and disconnect its adapter
///
/// Space selection follows [`lookup`]. Unknown spaces are a no-op.
pub async fn disconnect(space: Option<&str>) -> Result<()> {
    let facade = {
        let mut facades = FACADES.lock();
        let Some(facade) = pick(&facades, space)? else {
            return Ok(());
        };
        facades.remove(facade.space());
        facade
    };
    info!(target: "xwrap::adapter", space = %facade.space(), adapter = facade.adapter_name(), "Disconnecting");
    facade.disconnect().await
}

fn pick(
    facades: &HashMap<IdSpace, Arc<dyn ErasedFacade>>,
    space: Option<&str>,
) -> Result<Option<Arc<dyn ErasedFacade>>> {
    match space {
        Some(space) => Ok(facades.get(&IdSpace::from(space)).cloned()),
        None => match facades.len() {
            0 => Ok(None),
            1 => Ok(facades.values().next().cloned()),
            _ => Err(Error::invalid("Must specify adapter id when more than one.")),
        },
    }
}

fn downcast<A: Adapter>(facade: Arc<dyn ErasedFacade>) -> Result<Arc<Facade<A>>> {
    let space = facade.space().clone();
    let name = facade.adapter_name().to_string();
    facade.into_any().downcast::<Facade<A>>().map_err(|_| {
        Error::Config(format!(
            "Id-space '{}' is bound to adapter '{}', not {}",
            space,
            name,
            type_name::<A>()
        ))
    })
}
