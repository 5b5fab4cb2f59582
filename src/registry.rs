//! Accessor registry.
//!
//! Maps each codec type to the single [`RecordAccessor`] serving it.
//! Accessors are built on first use by a factory registered up front and
//! cached for the lifetime of the database.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::ConfigurationError;
use crate::storage::accessor::{RecordAccessor, RecordCodec};

type Instance = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn() -> anyhow::Result<Instance> + Send + Sync>;

/// Registry of accessor factories and constructed accessors.
#[derive(Default)]
pub struct AccessorRegistry {
    factories: Mutex<HashMap<TypeId, Factory>>,
    /// Constructed accessors, never evicted.
    cache: Mutex<HashMap<TypeId, Instance>>,
}

impl AccessorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory building the accessor for codec `C`.
    ///
    /// Replaces an earlier factory for the same codec; an accessor that was
    /// already constructed stays cached.
    pub fn register<C, F>(&self, factory: F)
    where
        C: RecordCodec,
        F: Fn() -> anyhow::Result<RecordAccessor<C>> + Send + Sync + 'static,
    {
        let erased: Factory =
            Arc::new(move || -> anyhow::Result<Instance> { Ok(Arc::new(factory()?)) });
        lock(&self.factories).insert(TypeId::of::<C>(), erased);
    }

    /// Get the accessor for codec `C`, constructing it on first use.
    ///
    /// Two threads racing on the first lookup may both run the factory; the
    /// first instance stored wins and both receive it.
    pub fn resolve<C: RecordCodec>(&self) -> Result<Arc<RecordAccessor<C>>, ConfigurationError> {
        let key = TypeId::of::<C>();
        let entity = type_name::<C>();

        let cached = lock(&self.cache).get(&key).cloned();
        if let Some(instance) = cached {
            return downcast(instance, entity);
        }

        let factory = lock(&self.factories)
            .get(&key)
            .cloned()
            .ok_or(ConfigurationError::MissingFactory { entity })?;

        // Built outside the lock: factories may resolve other accessors.
        let built =
            factory().map_err(|source| ConfigurationError::Construction { entity, source })?;

        let instance = lock(&self.cache).entry(key).or_insert(built).clone();
        tracing::debug!(entity, "Accessor constructed");
        downcast(instance, entity)
    }

    /// Whether a factory exists for codec `C`.
    pub fn is_registered<C: RecordCodec>(&self) -> bool {
        lock(&self.factories).contains_key(&TypeId::of::<C>())
    }

    /// Number of accessors constructed so far.
    pub fn cached_len(&self) -> usize {
        lock(&self.cache).len()
    }
}

impl std::fmt::Debug for AccessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessorRegistry")
            .field("factories", &lock(&self.factories).len())
            .field("cached", &self.cached_len())
            .finish()
    }
}

fn downcast<C: RecordCodec>(
    instance: Instance,
    entity: &'static str,
) -> Result<Arc<RecordAccessor<C>>, ConfigurationError> {
    instance
        .downcast::<RecordAccessor<C>>()
        .map_err(|_| ConfigurationError::TypeMismatch { entity })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
