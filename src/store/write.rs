//! Write path: create, update, delete, and their deferred variants.
//!
//! Mutations never relax validation: cleaning failures abort regardless of
//! strictness. The only strictness-sensitive spot is an unknown field name
//! in an update map, which permissive stores skip with a diagnostic.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::deferred::DeferredHandle;
use crate::error::{StoreError, StoreResult};
use crate::kv::KvEntry;
use crate::schema::value::{record_id, record_stub};
use crate::schema::{FieldValue, ModelSchema, Record, Values};
use crate::store::{ModelStore, StoreInner};

/// Which records a mutation addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    /// Every stored record of the model.
    All,
    /// An explicit id list.
    Ids(Vec<i64>),
}

impl Targets {
    /// Targets one previously fetched record through its id.
    pub fn record(record: &Record) -> StoreResult<Targets> {
        record_id(record)
            .map(|id| Targets::Ids(vec![id]))
            .ok_or_else(|| {
                StoreError::TypeMismatch("target record carries no integer id".to_string())
            })
    }

    /// Targets a batch of previously fetched records.
    pub fn records<'a>(records: impl IntoIterator<Item = &'a Record>) -> StoreResult<Targets> {
        let ids = records
            .into_iter()
            .map(|record| {
                record_id(record).ok_or_else(|| {
                    StoreError::TypeMismatch("target record carries no integer id".to_string())
                })
            })
            .collect::<StoreResult<Vec<i64>>>()?;
        Ok(Targets::Ids(ids))
    }
}

impl From<i64> for Targets {
    fn from(id: i64) -> Self {
        Targets::Ids(vec![id])
    }
}

impl From<Vec<i64>> for Targets {
    fn from(ids: Vec<i64>) -> Self {
        Targets::Ids(ids)
    }
}

impl From<&[i64]> for Targets {
    fn from(ids: &[i64]) -> Self {
        Targets::Ids(ids.to_vec())
    }
}

/// Expiry handling for updates.
///
/// By default an updated key loses any previous expiry, the way a plain
/// `SET` does. `renew_ttl` re-applies the schema's declared expiry;
/// `new_ttl` overrides it with an explicit number of seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub renew_ttl: bool,
    pub new_ttl: Option<u64>,
}

impl UpdateOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn renew_ttl(mut self) -> Self {
        self.renew_ttl = true;
        self
    }

    #[must_use]
    pub fn with_new_ttl(mut self, secs: u64) -> Self {
        self.new_ttl = Some(secs);
        self
    }
}

impl ModelStore {
    /// Creates one record: allocates the next id, cleans every declared
    /// field, and writes all keys in one batch.
    ///
    /// Returns the stored projection read back from the backend, or a bare
    /// `{id}` stub in economy mode. Values for names the schema does not
    /// declare are ignored.
    pub fn create(&self, model: &str, values: Values) -> StoreResult<Record> {
        self.inner().create_record(model, &values.into_record())
    }

    /// [`create`](Self::create) on the deferred worker.
    pub fn create_deferred(&self, model: &str, values: Values) -> DeferredHandle<Record> {
        let inner = Arc::clone(self.inner());
        let model = model.to_string();
        let record = values.into_record();
        self.inner()
            .executor
            .submit(move || inner.create_record(&model, &record))
    }

    /// Updates fields on the targeted records and returns their new
    /// projections (stubs in economy mode).
    ///
    /// Each field is cleaned once and written to every targeted id, so a
    /// generator default produced for an explicit null lands identically
    /// everywhere. Ids without stored keys are skipped.
    pub fn update(
        &self,
        model: &str,
        targets: impl Into<Targets>,
        values: Values,
    ) -> StoreResult<Vec<Record>> {
        self.update_with_options(model, targets, values, UpdateOptions::default())
    }

    /// [`update`](Self::update) with explicit expiry handling.
    pub fn update_with_options(
        &self,
        model: &str,
        targets: impl Into<Targets>,
        values: Values,
        options: UpdateOptions,
    ) -> StoreResult<Vec<Record>> {
        self.inner()
            .update_records(model, &targets.into(), &values.into_record(), options)
    }

    /// [`update`](Self::update) on the deferred worker.
    pub fn update_deferred(
        &self,
        model: &str,
        targets: impl Into<Targets>,
        values: Values,
    ) -> DeferredHandle<Vec<Record>> {
        self.update_deferred_with_options(model, targets, values, UpdateOptions::default())
    }

    pub fn update_deferred_with_options(
        &self,
        model: &str,
        targets: impl Into<Targets>,
        values: Values,
        options: UpdateOptions,
    ) -> DeferredHandle<Vec<Record>> {
        let inner = Arc::clone(self.inner());
        let model = model.to_string();
        let targets = targets.into();
        let record = values.into_record();
        self.inner()
            .executor
            .submit(move || inner.update_records(&model, &targets, &record, options))
    }

    /// Deletes every key of the targeted records.
    pub fn delete(&self, model: &str, targets: impl Into<Targets>) -> StoreResult<()> {
        self.inner().delete_records(model, &targets.into())
    }

    /// [`delete`](Self::delete) on the deferred worker.
    pub fn delete_deferred(
        &self,
        model: &str,
        targets: impl Into<Targets>,
    ) -> DeferredHandle<()> {
        let inner = Arc::clone(self.inner());
        let model = model.to_string();
        let targets = targets.into();
        self.inner()
            .executor
            .submit(move || inner.delete_records(&model, &targets))
    }
}

impl StoreInner {
    pub(crate) fn create_record(&self, model: &str, values: &Record) -> StoreResult<Record> {
        let schema = self.catalog.require(model)?;
        let id = self.allocator.reserve(model)?;

        let entries = match self.cleaned_entries(&schema, id, values) {
            Ok(entries) => entries,
            Err(e) => {
                self.allocator.release(model, id);
                return Err(e);
            }
        };
        let written = self.backend.multi_set(&entries);
        self.allocator.release(model, id);
        written?;
        info!("created {model} record {id}");

        if self.config.economy {
            return Ok(record_stub(id));
        }
        Ok(self.fetch_record(model, id)?.unwrap_or_else(|| record_stub(id)))
    }

    /// Cleans every declared field into its keyed entry, id first.
    fn cleaned_entries(
        &self,
        schema: &ModelSchema,
        id: i64,
        values: &Record,
    ) -> StoreResult<Vec<KvEntry>> {
        let model = schema.name();
        let mut entries = Vec::new();
        for (name, def) in schema.fields() {
            let assigned_id;
            let provided = if name == "id" {
                assigned_id = FieldValue::Int(id);
                Some(&assigned_id)
            } else {
                values.get(name)
            };
            let cleaned = def.clean(provided).map_err(|e| e.at(model, name))?;
            entries.push(KvEntry::new(
                self.codec.record_key(model, id, name),
                cleaned,
                schema.field_ttl(def),
            ));
        }
        for name in values.keys() {
            if schema.field_def(name).is_none() {
                debug!("ignoring value for undeclared field {name} on {model}");
            }
        }
        Ok(entries)
    }

    pub(crate) fn update_records(
        &self,
        model: &str,
        targets: &Targets,
        values: &Record,
        options: UpdateOptions,
    ) -> StoreResult<Vec<Record>> {
        let schema = self.catalog.require(model)?;
        let existing = self.model_ids(model)?;
        let ids = match targets {
            Targets::All => existing.iter().copied().collect::<Vec<i64>>(),
            Targets::Ids(requested) => {
                let mut seen = BTreeSet::new();
                requested
                    .iter()
                    .copied()
                    .filter(|id| seen.insert(*id))
                    .filter(|id| {
                        let known = existing.contains(id);
                        if !known {
                            debug!("update skipping {model} id {id}: no stored keys");
                        }
                        known
                    })
                    .collect()
            }
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        for (name, value) in values {
            if name == "id" {
                return Err(StoreError::InvalidSchema(format!(
                    "the id field of {model} is immutable"
                )));
            }
            let def = match schema.field_def(name) {
                Some(def) => def,
                None => {
                    let error =
                        StoreError::UnknownField(format!("{name} is not a field of {model}"));
                    if self.strict() {
                        return Err(error);
                    }
                    warn!("update skipping {error}");
                    continue;
                }
            };

            let cleaned = def.clean(Some(value)).map_err(|e| e.at(model, name))?;
            let ttl = match options.new_ttl {
                Some(secs) => Some(secs),
                None if options.renew_ttl => schema.field_ttl(def),
                None => None,
            };
            let entries: Vec<KvEntry> = ids
                .iter()
                .map(|id| {
                    KvEntry::new(self.codec.record_key(model, *id, name), cleaned.clone(), ttl)
                })
                .collect();
            self.backend.multi_set(&entries)?;
        }
        info!("updated {} {model} records", ids.len());

        if self.config.economy {
            return Ok(ids.into_iter().map(record_stub).collect());
        }
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.fetch_record(model, id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub(crate) fn delete_records(&self, model: &str, targets: &Targets) -> StoreResult<()> {
        self.catalog.require(model)?;
        let keys = match targets {
            Targets::All => self.backend.scan_keys(&self.codec.model_pattern(model))?,
            Targets::Ids(ids) => {
                let unique: BTreeSet<i64> = ids.iter().copied().collect();
                let mut keys = Vec::new();
                for id in unique {
                    keys.extend(
                        self.backend
                            .scan_keys(&self.codec.record_pattern(model, id))?,
                    );
                }
                keys
            }
        };
        if keys.is_empty() {
            debug!("delete on {model} matched nothing");
            return Ok(());
        }
        let removed = self.backend.delete(&keys)?;
        info!("deleted {removed} keys from {model}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StoreConfig, Strictness};
    use crate::filters::Filters;
    use crate::schema::FieldDef;

    fn store() -> ModelStore {
        let store = ModelStore::in_memory(StoreConfig::new().with_prefix("w")).unwrap();
        store
            .register_model(
                ModelSchema::new("Task")
                    .field(
                        "status",
                        FieldDef::string()
                            .not_null()
                            .with_default("created")
                            .with_choices([
                                ("created", "Created"),
                                ("in_work", "In work"),
                                ("done", "Done"),
                            ]),
                    )
                    .field("attempts", FieldDef::number().with_default(0)),
            )
            .unwrap();
        store
    }

    #[test]
    fn create_returns_the_stored_projection() {
        let store = store();
        let record = store.create("Task", Values::new()).unwrap();
        assert_eq!(record["id"], FieldValue::Int(1));
        assert_eq!(record["status"], FieldValue::Str("created".into()));
        assert_eq!(record["attempts"], FieldValue::Int(0));
    }

    #[test]
    fn create_rejects_a_bad_choice_and_burns_no_state() {
        let store = store();
        let err = store
            .create("Task", Values::new().set("status", "bruh"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidChoice(_)));
        assert!(err.to_string().contains("(Task -> status)"));
        // Nothing was written, and ids restart cleanly.
        assert_eq!(store.get("Task", &Filters::new()).unwrap().len(), 0);
        let record = store.create("Task", Values::new()).unwrap();
        assert_eq!(record["id"], FieldValue::Int(1));
    }

    #[test]
    fn create_ignores_undeclared_values() {
        let store = store();
        let record = store
            .create("Task", Values::new().set("shoe_size", 43))
            .unwrap();
        assert!(!record.contains_key("shoe_size"));
    }

    #[test]
    fn update_targets_ids_records_or_everything() {
        let store = store();
        let first = store.create("Task", Values::new()).unwrap();
        store.create("Task", Values::new()).unwrap();

        let updated = store
            .update(
                "Task",
                Targets::record(&first).unwrap(),
                Values::new().set("status", "in_work"),
            )
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["status"], FieldValue::Str("in_work".into()));

        let all = store
            .update("Task", Targets::All, Values::new().set("status", "done"))
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all
            .iter()
            .all(|r| r["status"] == FieldValue::Str("done".into())));
    }

    #[test]
    fn update_skips_absent_ids() {
        let store = store();
        store.create("Task", Values::new()).unwrap();
        let updated = store
            .update(
                "Task",
                vec![1, 99],
                Values::new().set("status", "in_work"),
            )
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["id"], FieldValue::Int(1));
    }

    #[test]
    fn update_refuses_to_touch_the_id() {
        let store = store();
        store.create("Task", Values::new()).unwrap();
        assert!(matches!(
            store.update("Task", 1_i64, Values::new().set("id", 9)),
            Err(StoreError::InvalidSchema(_))
        ));
    }

    #[test]
    fn unknown_update_field_follows_strictness() {
        let permissive = store();
        permissive.create("Task", Values::new()).unwrap();
        let updated = permissive
            .update(
                "Task",
                 1_i64,
                Values::new().set("bogus", 1).set("status", "done"),
            )
            .unwrap();
        assert_eq!(updated[0]["status"], FieldValue::Str("done".into()));
        assert!(!updated[0].contains_key("bogus"));

        let strict = ModelStore::in_memory(
            StoreConfig::new()
                .with_prefix("ws")
                .with_strictness(Strictness::Strict),
        )
        .unwrap();
        strict
            .register_model(ModelSchema::new("Task").field("status", FieldDef::string()))
            .unwrap();
        strict.create("Task", Values::new()).unwrap();
        assert!(matches!(
            strict.update("Task", 1_i64, Values::new().set("bogus", 1)),
            Err(StoreError::UnknownField(_))
        ));
    }

    #[test]
    fn delete_by_id_and_all() {
        let store = store();
        store.create("Task", Values::new()).unwrap();
        store.create("Task", Values::new()).unwrap();
        store.create("Task", Values::new()).unwrap();

        store.delete("Task", 2_i64).unwrap();
        let left = store.get("Task", &Filters::new()).unwrap();
        let ids: Vec<i64> = left.iter().map(|r| record_id(r).unwrap()).collect();
        assert_eq!(ids, vec![1, 3]);

        store.delete("Task", Targets::All).unwrap();
        assert!(store.get("Task", &Filters::new()).unwrap().is_empty());
    }

    #[test]
    fn deleting_nothing_is_fine() {
        let store = store();
        store.delete("Task", 17_i64).unwrap();
        store.delete("Task", Targets::All).unwrap();
    }

    #[test]
    fn ids_keep_climbing_after_delete() {
        let store = store();
        store.create("Task", Values::new()).unwrap();
        let second = store.create("Task", Values::new()).unwrap();
        store.delete("Task", Targets::record(&second).unwrap()).unwrap();
        let third = store.create("Task", Values::new()).unwrap();
        assert_eq!(third["id"], FieldValue::Int(3));
    }

    #[test]
    fn economy_mode_returns_stubs() {
        let store = ModelStore::in_memory(
            StoreConfig::new().with_prefix("we").with_economy(true),
        )
        .unwrap();
        store
            .register_model(
                ModelSchema::new("Task")
                    .field("status", FieldDef::string().with_default("created")),
            )
            .unwrap();

        let created = store.create("Task", Values::new()).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created["id"], FieldValue::Int(1));

        let updated = store
            .update("Task", 1_i64, Values::new().set("status", "done"))
            .unwrap();
        assert_eq!(updated[0].len(), 1);

        // The data is fully stored regardless.
        let full = store.get("Task", &Filters::new()).unwrap();
        assert_eq!(full[0]["status"], FieldValue::Str("done".into()));
    }

    #[test]
    fn deferred_mutations_settle_in_order() {
        let store = store();
        let created = store
            .create_deferred("Task", Values::new())
            .wait()
            .unwrap();
        let updated = store
            .update_deferred(
                "Task",
                Targets::record(&created).unwrap(),
                Values::new().set("status", "in_work"),
            )
            .wait()
            .unwrap();
        assert_eq!(updated[0]["status"], FieldValue::Str("in_work".into()));
        store
            .delete_deferred("Task", Targets::record(&created).unwrap())
            .wait()
            .unwrap();
        assert!(store.get("Task", &Filters::new()).unwrap().is_empty());
    }
}
