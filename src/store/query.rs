//! Read path: record loading, filter evaluation, ordering.
//!
//! Filtered queries run per clause: resolve the clause to the id set it
//! allows, intersect the sets, then materialize the surviving ids. A clause
//! that walks reference fields is evaluated innermost-first — terminal
//! field ids, then back across each hop to the ids of the records that link
//! to them.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::filters::{
    many_reference_matches, single_reference_matches, value_matches, FilterOp, FilterOperand,
    Filters,
};
use crate::keys::ParsedKey;
use crate::schema::field::{FieldDef, FieldKind, NULL_SENTINEL};
use crate::schema::value::FieldValue;
use crate::schema::{ModelSchema, Record};
use crate::store::{ModelStore, StoreInner};

/// One reference traversal inside a clause key.
struct Hop {
    model: String,
    field: String,
}

/// A clause key resolved against the registered schemas.
struct ClausePath {
    hops: Vec<Hop>,
    model: String,
    field: String,
    op: FilterOp,
}

impl ModelStore {
    /// Returns every record of `model` matching all `filters` clauses.
    ///
    /// Records come back in ascending id order. An empty filter set returns
    /// the whole model. Under permissive strictness a clause that cannot be
    /// resolved (unknown field, unregistered model on the path) is skipped
    /// with a logged diagnostic instead of failing the query.
    pub fn get(&self, model: &str, filters: &Filters) -> StoreResult<Vec<Record>> {
        let inner = self.inner();
        let schema = match inner.catalog.require(model) {
            Ok(schema) => schema,
            Err(e @ StoreError::UnregisteredModel(_)) if !inner.strict() => {
                warn!("get on {model} returned nothing: {e}");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        debug!("get {model} with {} clauses", filters.len());

        if filters.is_empty() {
            return Ok(inner.load_all(&schema)?.into_values().collect());
        }

        let mut allowed: Option<BTreeSet<i64>> = None;
        for (key, operand) in filters.clauses() {
            match inner.clause_ids(model, key, operand)? {
                Some(ids) => {
                    allowed = Some(match allowed {
                        None => ids,
                        Some(prev) => prev.intersection(&ids).copied().collect(),
                    });
                }
                None => {}
            }
            if matches!(&allowed, Some(ids) if ids.is_empty()) {
                return Ok(Vec::new());
            }
        }

        match allowed {
            // Every clause was skipped; behave like an unfiltered read.
            None => Ok(inner.load_all(&schema)?.into_values().collect()),
            Some(ids) => {
                let mut records = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(record) = inner.fetch_record(model, id)? {
                        records.push(record);
                    }
                }
                Ok(records)
            }
        }
    }

    /// Sorts records by one field, ascending, or descending with a `-`
    /// prefix (`"-created"`). The sort is stable.
    ///
    /// Every record must carry the field and all values must be mutually
    /// comparable, otherwise the whole call fails.
    pub fn order(&self, records: Vec<Record>, ordering: &str) -> StoreResult<Vec<Record>> {
        let (field, descending) = match ordering.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (ordering, false),
        };
        if field.is_empty() {
            return Err(StoreError::UnknownField("empty ordering key".to_string()));
        }
        for record in &records {
            if !record.contains_key(field) {
                return Err(StoreError::UnknownField(format!(
                    "cannot order by {field}: a record is missing it"
                )));
            }
        }

        let mut failure: Option<StoreError> = None;
        let mut records = records;
        records.sort_by(|a, b| {
            let ordering = match (a.get(field), b.get(field)) {
                (Some(left), Some(right)) => match left.compare(right) {
                    Some(ordering) => ordering,
                    None => {
                        if failure.is_none() {
                            failure = Some(StoreError::TypeMismatch(format!(
                                "cannot order {} against {}",
                                left.kind_name(),
                                right.kind_name()
                            )));
                        }
                        std::cmp::Ordering::Equal
                    }
                },
                _ => std::cmp::Ordering::Equal,
            };
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
        match failure {
            Some(error) => Err(error),
            None => Ok(records),
        }
    }
}

impl StoreInner {
    /// Splits a scanned key, degrading to a skip under permissive
    /// strictness when the key does not follow the grammar.
    fn parse_record_key<'a>(&self, key: &'a str) -> StoreResult<Option<ParsedKey<'a>>> {
        match self.codec.parse(key) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) if !self.strict() => {
                warn!("skipping malformed key {key:?}: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Deserializes one stored string per the schema, applying the
    /// read-path strictness policy: unknown fields and unparseable values
    /// degrade to the raw string under permissive strictness.
    pub(crate) fn typed_value(
        &self,
        schema: &ModelSchema,
        field: &str,
        raw: &str,
    ) -> StoreResult<FieldValue> {
        let Some(def) = schema.field_def(field) else {
            let error = StoreError::UnknownField(format!(
                "{field} is stored but not declared on {}",
                schema.name()
            ));
            if self.strict() {
                return Err(error);
            }
            warn!("{error}; keeping the raw string");
            return Ok(FieldValue::Str(raw.to_string()));
        };
        match def.deserialize(raw, self) {
            Ok(value) => Ok(value),
            Err(e @ StoreError::Deserialization(_)) if !self.strict() => {
                warn!(
                    "reading {}:{field} degraded to the raw string: {e}",
                    schema.name()
                );
                Ok(FieldValue::Str(raw.to_string()))
            }
            Err(e) => Err(e.at(schema.name(), field)),
        }
    }

    /// Assembles a typed record from scanned field pairs. `None` when no
    /// pair survived (the record does not exist).
    fn build_record(
        &self,
        schema: &ModelSchema,
        pairs: Vec<(String, String)>,
    ) -> StoreResult<Option<Record>> {
        if pairs.is_empty() {
            return Ok(None);
        }
        let mut record = Record::new();
        for (field, raw) in pairs {
            let value = self.typed_value(schema, &field, &raw)?;
            record.insert(field, value);
        }
        if self.config.save_consistency {
            self.fill_missing(schema, &mut record)?;
        }
        Ok(Some(record))
    }

    /// Loads the full projection of one record, or `None` when it has no
    /// live keys.
    pub(crate) fn fetch_record(&self, model: &str, id: i64) -> StoreResult<Option<Record>> {
        let schema = self.catalog.require(model)?;
        let keys = self.backend.scan_keys(&self.codec.record_pattern(model, id))?;
        let values = self.backend.multi_get(&keys)?;
        let mut pairs = Vec::new();
        for (key, raw) in keys.iter().zip(values) {
            let Some(raw) = raw else { continue };
            let Some(parsed) = self.parse_record_key(key)? else {
                continue;
            };
            pairs.push((parsed.field.to_string(), raw));
        }
        self.build_record(&schema, pairs)
    }

    /// Loads every record of a model, keyed and ordered by id.
    pub(crate) fn load_all(&self, schema: &ModelSchema) -> StoreResult<BTreeMap<i64, Record>> {
        let keys = self
            .backend
            .scan_keys(&self.codec.model_pattern(schema.name()))?;
        let values = self.backend.multi_get(&keys)?;
        let mut grouped: BTreeMap<i64, Vec<(String, String)>> = BTreeMap::new();
        for (key, raw) in keys.iter().zip(values) {
            let Some(raw) = raw else { continue };
            let Some(parsed) = self.parse_record_key(key)? else {
                continue;
            };
            grouped
                .entry(parsed.id)
                .or_default()
                .push((parsed.field.to_string(), raw));
        }

        let mut records = BTreeMap::new();
        for (id, pairs) in grouped {
            if let Some(record) = self.build_record(schema, pairs)? {
                records.insert(id, record);
            }
        }
        Ok(records)
    }

    /// Distinct ids with at least one live key under `model`.
    pub(crate) fn model_ids(&self, model: &str) -> StoreResult<BTreeSet<i64>> {
        let keys = self.backend.scan_keys(&self.codec.model_pattern(model))?;
        let mut ids = BTreeSet::new();
        for key in &keys {
            if let Some(parsed) = self.parse_record_key(key)? {
                ids.insert(parsed.id);
            }
        }
        Ok(ids)
    }

    /// Resolves one clause to the ids it allows. `None` means the clause
    /// was skipped under permissive strictness.
    pub(crate) fn clause_ids(
        &self,
        start_model: &str,
        key: &str,
        operand: &FilterOperand,
    ) -> StoreResult<Option<BTreeSet<i64>>> {
        let Some(path) = self.parse_clause(start_model, key)? else {
            return Ok(None);
        };
        let schema = self.catalog.require(&path.model)?;
        let mut ids = self.terminal_ids(&schema, &path.field, path.op, operand)?;
        for hop in path.hops.iter().rev() {
            if ids.is_empty() {
                break;
            }
            ids = self.hop_owner_ids(hop, &ids)?;
        }
        Ok(Some(ids))
    }

    /// Walks a clause key through the schemas: each `__` segment is either
    /// a reference field to traverse, a terminal field, or the trailing
    /// operator token. Field names shadow operator tokens, so a field
    /// literally named `range` still filters as a field.
    fn parse_clause(&self, start_model: &str, key: &str) -> StoreResult<Option<ClausePath>> {
        let segments: Vec<&str> = key.split("__").collect();
        let mut hops = Vec::new();
        let mut model = start_model.to_string();
        let mut idx = 0;

        while idx < segments.len() {
            let schema = match self.catalog.require(&model) {
                Ok(schema) => schema,
                Err(e) => return self.skip_clause(key, e),
            };
            let seg = segments[idx];
            let remaining = segments.len() - idx - 1;

            let Some(def) = schema.field_def(seg) else {
                return self.skip_clause(
                    key,
                    StoreError::UnknownField(format!("{seg} is not a field of {model}")),
                );
            };
            let target = def.kind().referenced_model().map(str::to_string);

            match (target, remaining) {
                (_, 0) => {
                    return Ok(Some(ClausePath {
                        hops,
                        model,
                        field: seg.to_string(),
                        op: FilterOp::Exact,
                    }));
                }
                (maybe_target, 1) => {
                    let last = segments[idx + 1];
                    if let Some(op) = FilterOp::parse(last) {
                        return Ok(Some(ClausePath {
                            hops,
                            model,
                            field: seg.to_string(),
                            op,
                        }));
                    }
                    match maybe_target {
                        Some(next_model) => {
                            hops.push(Hop {
                                model,
                                field: seg.to_string(),
                            });
                            model = next_model;
                            idx += 1;
                        }
                        None => {
                            return self.skip_clause(
                                key,
                                StoreError::UnknownField(format!(
                                    "{last} is not a filter operator"
                                )),
                            );
                        }
                    }
                }
                (Some(next_model), _) => {
                    hops.push(Hop {
                        model,
                        field: seg.to_string(),
                    });
                    model = next_model;
                    idx += 1;
                }
                (None, _) => {
                    return self.skip_clause(
                        key,
                        StoreError::RelationResolution(format!(
                            "cannot traverse scalar field {seg} of {model}"
                        )),
                    );
                }
            }
        }
        self.skip_clause(key, StoreError::UnknownField("empty filter key".to_string()))
    }

    fn skip_clause(&self, key: &str, error: StoreError) -> StoreResult<Option<ClausePath>> {
        if self.strict() {
            Err(error)
        } else {
            warn!("skipping filter clause {key:?}: {error}");
            Ok(None)
        }
    }

    /// Ids of records whose terminal field satisfies the operator.
    fn terminal_ids(
        &self,
        schema: &ModelSchema,
        field: &str,
        op: FilterOp,
        operand: &FilterOperand,
    ) -> StoreResult<BTreeSet<i64>> {
        let model = schema.name();
        let def = schema.field_def(field).ok_or_else(|| {
            StoreError::UnknownField(format!("{field} is not a field of {model}"))
        })?;
        debug!("evaluating {model}.{field} {}", op.name());

        let keys = self.backend.scan_keys(&self.codec.field_pattern(model, field))?;
        let values = self.backend.multi_get(&keys)?;
        let mut matched = BTreeSet::new();
        let mut seen = BTreeSet::new();
        for (key, raw) in keys.iter().zip(values) {
            let Some(raw) = raw else { continue };
            let Some(parsed) = self.parse_record_key(key)? else {
                continue;
            };
            if parsed.field != field {
                continue;
            }
            seen.insert(parsed.id);
            if self.stored_matches(schema, field, def, &raw, op, operand)? {
                matched.insert(parsed.id);
            }
        }

        if self.config.save_consistency {
            // Records missing the field are judged by their cleaned
            // default, produced per record so generators stay fresh.
            for id in self.model_ids(model)?.difference(&seen) {
                let cleaned = def.clean(None).map_err(|e| e.at(model, field))?;
                if self.stored_matches(schema, field, def, &cleaned, op, operand)? {
                    matched.insert(*id);
                }
            }
        }
        Ok(matched)
    }

    /// Evaluates one stored string against an operator. Clauses ending on a
    /// reference field compare stored ids directly, without resolving the
    /// neighbors.
    fn stored_matches(
        &self,
        schema: &ModelSchema,
        field: &str,
        def: &FieldDef,
        raw: &str,
        op: FilterOp,
        operand: &FilterOperand,
    ) -> StoreResult<bool> {
        if op == FilterOp::IsNull {
            // Nullness is a property of the stored string alone, for
            // reference fields as much as for scalars.
            let FilterOperand::One(FieldValue::Bool(want)) = operand else {
                return Ok(false);
            };
            return Ok((raw == NULL_SENTINEL) == *want);
        }
        if raw != NULL_SENTINEL {
            match def.kind() {
                FieldKind::Reference { .. } => {
                    return match raw.parse::<i64>() {
                        Ok(stored_id) => Ok(single_reference_matches(stored_id, op, operand)),
                        Err(_) => self.degraded_match(schema, field, raw, op, operand),
                    };
                }
                FieldKind::ManyReference { .. } => {
                    return match serde_json::from_str::<Vec<i64>>(raw) {
                        Ok(ids) => Ok(many_reference_matches(&ids, op, operand)),
                        Err(_) => self.degraded_match(schema, field, raw, op, operand),
                    };
                }
                _ => {}
            }
        }
        let value = self.typed_value(schema, field, raw)?;
        Ok(value_matches(&value, op, operand))
    }

    fn degraded_match(
        &self,
        schema: &ModelSchema,
        field: &str,
        raw: &str,
        op: FilterOp,
        operand: &FilterOperand,
    ) -> StoreResult<bool> {
        let error = StoreError::Deserialization(format!("{raw:?} is not a stored reference"));
        if self.strict() {
            return Err(error.at(schema.name(), field));
        }
        warn!(
            "filtering {}:{field} degraded to the raw string: {error}",
            schema.name()
        );
        Ok(value_matches(
            &FieldValue::Str(raw.to_string()),
            op,
            operand,
        ))
    }

    /// Ids of records whose reference field links into `allowed`.
    fn hop_owner_ids(&self, hop: &Hop, allowed: &BTreeSet<i64>) -> StoreResult<BTreeSet<i64>> {
        let schema = self.catalog.require(&hop.model)?;
        let def = schema.field_def(&hop.field).ok_or_else(|| {
            StoreError::UnknownField(format!("{} is not a field of {}", hop.field, hop.model))
        })?;

        let keys = self
            .backend
            .scan_keys(&self.codec.field_pattern(&hop.model, &hop.field))?;
        let values = self.backend.multi_get(&keys)?;
        let mut owners = BTreeSet::new();
        let mut seen = BTreeSet::new();
        for (key, raw) in keys.iter().zip(values) {
            let Some(raw) = raw else { continue };
            let Some(parsed) = self.parse_record_key(key)? else {
                continue;
            };
            if parsed.field != hop.field {
                continue;
            }
            seen.insert(parsed.id);
            if raw == NULL_SENTINEL {
                continue;
            }
            if self.stored_link_hits(&schema, &hop.field, def, &raw, allowed)? {
                owners.insert(parsed.id);
            }
        }

        if self.config.save_consistency {
            for id in self.model_ids(&hop.model)?.difference(&seen) {
                let cleaned = def.clean(None).map_err(|e| e.at(&hop.model, &hop.field))?;
                if cleaned != NULL_SENTINEL
                    && self.stored_link_hits(&schema, &hop.field, def, &cleaned, allowed)?
                {
                    owners.insert(*id);
                }
            }
        }
        Ok(owners)
    }

    fn stored_link_hits(
        &self,
        schema: &ModelSchema,
        field: &str,
        def: &FieldDef,
        raw: &str,
        allowed: &BTreeSet<i64>,
    ) -> StoreResult<bool> {
        match def.kind() {
            FieldKind::Reference { .. } => match raw.parse::<i64>() {
                Ok(id) => Ok(allowed.contains(&id)),
                Err(_) => self.link_parse_failure(schema, field, raw),
            },
            FieldKind::ManyReference { .. } => match serde_json::from_str::<Vec<i64>>(raw) {
                Ok(ids) => Ok(ids.iter().any(|id| allowed.contains(id))),
                Err(_) => self.link_parse_failure(schema, field, raw),
            },
            _ => Err(StoreError::UnknownField(format!(
                "{field} of {} is not a reference",
                schema.name()
            ))),
        }
    }

    fn link_parse_failure(
        &self,
        schema: &ModelSchema,
        field: &str,
        raw: &str,
    ) -> StoreResult<bool> {
        let error = StoreError::Deserialization(format!("{raw:?} is not a stored reference"))
            .at(schema.name(), field);
        if self.strict() {
            return Err(error);
        }
        warn!("{error}; the link counts as broken");
        Ok(false)
    }
}
