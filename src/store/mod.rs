//! The record store: registration, reads, writes, and the deferred queue.
//!
//! [`ModelStore`] is a cheap-to-clone handle over shared state; clones talk
//! to the same backend, schema catalog, id allocator and deferred worker.
//! Read operations live in `query`, mutations in `write`, and the
//! missing-field checker in `consistency`.

mod consistency;
mod query;
mod write;

pub use write::{Targets, UpdateOptions};

use std::sync::Arc;

use log::{info, warn};

use crate::config::StoreConfig;
use crate::deferred::DeferredExecutor;
use crate::error::{StoreError, StoreResult};
use crate::ids::IdAllocator;
use crate::keys::KeyCodec;
use crate::kv::{KvBackend, MemoryBackend};
use crate::schema::value::record_stub;
use crate::schema::{ModelSchema, Record, RecordResolver, SchemaCatalog};

/// Typed, queryable records over a flat string key-value backend.
///
/// ```
/// use kvmodel::{FieldDef, Filters, ModelSchema, ModelStore, StoreConfig, Values};
///
/// # fn demo() -> kvmodel::StoreResult<()> {
/// let store = ModelStore::in_memory(StoreConfig::new().with_prefix("app"))?;
/// store.register_model(
///     ModelSchema::new("Task").field("status", FieldDef::string().with_default("created")),
/// )?;
///
/// let task = store.create("Task", Values::new().set("status", "in_work"))?;
/// let found = store.get("Task", &Filters::new().filter("status", "in_work"))?;
/// assert_eq!(found.len(), 1);
/// assert_eq!(found[0], task);
/// # Ok(())
/// # }
/// # demo().unwrap();
/// ```
#[derive(Clone)]
pub struct ModelStore {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    pub(crate) backend: Arc<dyn KvBackend>,
    pub(crate) codec: KeyCodec,
    pub(crate) catalog: SchemaCatalog,
    pub(crate) allocator: IdAllocator,
    pub(crate) config: StoreConfig,
    pub(crate) executor: DeferredExecutor,
}

impl ModelStore {
    /// Opens a store over `backend` under the configured prefix.
    pub fn new(backend: Arc<dyn KvBackend>, config: StoreConfig) -> StoreResult<Self> {
        if config.prefix.is_empty() {
            return Err(StoreError::InvalidSchema("store prefix is empty".to_string()));
        }
        if config.prefix.contains([':', '*', '?']) {
            return Err(StoreError::InvalidSchema(format!(
                "store prefix {:?} may not contain ':', '*' or '?'",
                config.prefix
            )));
        }

        let codec = KeyCodec::new(&config.prefix);
        let allocator = IdAllocator::new(Arc::clone(&backend), codec.clone(), &config);
        info!("model store ready on prefix {:?}", config.prefix);
        Ok(Self {
            inner: Arc::new(StoreInner {
                backend,
                codec,
                catalog: SchemaCatalog::new(),
                allocator,
                config,
                executor: DeferredExecutor::new(),
            }),
        })
    }

    /// Opens a store over a fresh [`MemoryBackend`].
    pub fn in_memory(config: StoreConfig) -> StoreResult<Self> {
        Self::new(Arc::new(MemoryBackend::new()), config)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Installs (or replaces) a model declaration.
    pub fn register_model(&self, schema: ModelSchema) -> StoreResult<()> {
        info!("registering model {}", schema.name());
        self.inner.catalog.register(schema)
    }

    /// Names of all registered models, sorted.
    pub fn registered_models(&self) -> StoreResult<Vec<String>> {
        self.inner.catalog.names()
    }

    /// Deletes every key under this store's prefix, plus the advisory busy
    /// flag. Returns how many keys existed.
    pub fn clear(&self) -> StoreResult<u64> {
        let inner = &self.inner;
        let mut keys = inner.backend.scan_keys(&inner.codec.prefix_pattern())?;
        keys.push(inner.codec.creating_flag());
        let removed = inner.backend.delete(&keys)?;
        info!("cleared {removed} keys under prefix {:?}", inner.config.prefix);
        Ok(removed)
    }

    pub(crate) fn inner(&self) -> &Arc<StoreInner> {
        &self.inner
    }
}

impl StoreInner {
    pub(crate) fn strict(&self) -> bool {
        self.config.strictness.is_strict()
    }
}

/// The store resolves references by loading the neighbor's projection;
/// dangling ids come back as `{id}` stubs so one deleted record cannot
/// poison every record that still points at it.
impl RecordResolver for StoreInner {
    fn resolve(&self, model: &str, id: i64) -> StoreResult<Record> {
        match self.fetch_record(model, id) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Ok(record_stub(id)),
            Err(e @ StoreError::UnregisteredModel(_)) if !self.strict() => {
                warn!("resolving {model}:{id} degraded to a stub: {e}");
                Ok(record_stub(id))
            }
            Err(e) => Err(e),
        }
    }
}
