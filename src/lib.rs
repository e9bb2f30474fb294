//! # kvmodel
//!
//! Typed, queryable record models over a flat string key-value store.
//!
//! Records of a registered model are stored one field per key under the
//! grammar `{prefix}:{model}:{id}:{field}`, with every value a string. The
//! crate layers on top of that keyspace:
//!
//! - **Schemas** ([`ModelSchema`], [`FieldDef`]) declare fields with kinds,
//!   defaults, null policies, choices and expiry.
//! - **The store** ([`ModelStore`]) creates, updates, deletes and queries
//!   records, with deferred variants that run on a background worker.
//! - **Filters** ([`Filters`]) select records Django-style, including
//!   multi-hop paths across reference fields
//!   (`account__gamer__name__startswith`).
//! - **Backends** ([`KvBackend`]) plug in the actual storage: in-memory
//!   for tests and embedding, sled for durability.
//!
//! ```
//! use kvmodel::{FieldDef, Filters, ModelSchema, ModelStore, StoreConfig, Values};
//!
//! # fn main() -> kvmodel::StoreResult<()> {
//! let store = ModelStore::in_memory(StoreConfig::new().with_prefix("games"))?;
//! store.register_model(
//!     ModelSchema::new("TaskChallenge")
//!         .field(
//!             "status",
//!             FieldDef::string().not_null().with_default("in_work").with_choices([
//!                 ("in_work", "In work"),
//!                 ("completed", "Completed"),
//!                 ("failed", "Failed"),
//!             ]),
//!         )
//!         .field("attempts", FieldDef::number().with_default(0)),
//! )?;
//!
//! let task = store.create("TaskChallenge", Values::new())?;
//! store.update("TaskChallenge", kvmodel::Targets::record(&task)?,
//!     Values::new().set("attempts", 1))?;
//! let in_work = store.get(
//!     "TaskChallenge",
//!     &Filters::new().filter("status", "in_work").filter("attempts__gte", 1),
//! )?;
//! assert_eq!(in_work.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod deferred;
pub mod error;
pub mod filters;
pub mod ids;
pub mod keys;
pub mod kv;
pub mod logging;
pub mod schema;
pub mod store;

pub use config::{ConfigError, StoreConfig, Strictness};
pub use deferred::DeferredHandle;
pub use error::{StoreError, StoreResult};
pub use filters::{FilterOperand, Filters};
pub use ids::IdAllocator;
pub use keys::{KeyCodec, ParsedKey};
pub use kv::{KvBackend, KvEntry, KvError, MemoryBackend, SledBackend};
pub use schema::{
    record_id, DefaultValue, FieldDef, FieldKind, FieldValue, ModelSchema, Record,
    RecordResolver, Values,
};
pub use store::{ModelStore, Targets, UpdateOptions};
