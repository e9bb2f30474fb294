//! Field declarations and the clean / deserialize contracts.
//!
//! Every field kind knows two directions:
//!
//! - **clean** takes a typed value (or nothing) and produces the exact
//!   string stored under the field's key, applying the default, the
//!   null policy and the declared choices along the way;
//! - **deserialize** takes a stored string back to a typed
//!   [`FieldValue`], resolving references through a [`RecordResolver`].
//!
//! Reads never mutate: a permissive store may log and degrade while
//! deserializing, but nothing is rewritten in place.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;

use crate::error::{StoreError, StoreResult};
use crate::schema::value::{
    format_date, format_datetime, parse_date, parse_datetime, record_id, FieldValue, Record,
};

/// The string stored when a nullable field holds no value.
pub(crate) const NULL_SENTINEL: &str = "null";

/// Boolean fields always carry this fixed choice set.
static BOOL_CHOICES: Lazy<Vec<(FieldValue, String)>> = Lazy::new(|| {
    vec![
        (FieldValue::Bool(true), "True".to_string()),
        (FieldValue::Bool(false), "False".to_string()),
    ]
});

/// Loads referenced records while a field deserializes.
///
/// The store itself is the resolver in normal operation; the indirection
/// keeps field logic testable without a live store and breaks the module
/// cycle between fields and the query engine.
pub trait RecordResolver {
    /// Returns the current projection of `model`/`id`. A dangling id must
    /// resolve to a minimal `{id}` stub rather than an error, so one
    /// deleted neighbor cannot poison a whole result set.
    fn resolve(&self, model: &str, id: i64) -> StoreResult<Record>;
}

/// The storable shapes a field can declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Free-form text. Cleaning absorbs any scalar via its text rendering.
    Str,
    /// Integer or float, distinguished on read by a decimal point.
    Number,
    /// Boolean, stored as `1` / `0`.
    Bool,
    /// Arbitrary-precision decimal, stored as its text form.
    Decimal,
    /// Calendar date, stored as `YYYY.MM.DD+UTC`.
    Date,
    /// UTC instant at second precision, stored as `YYYY.MM.DD-HH:MM:SS+UTC`.
    DateTime,
    /// A JSON mapping, stored compact.
    JsonObject,
    /// A JSON sequence, stored compact.
    JsonArray,
    /// Single link to another model; only the id is stored.
    Reference { model: String },
    /// Link list to another model, stored as a JSON id array.
    ManyReference { model: String },
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Str => "string",
            FieldKind::Number => "number",
            FieldKind::Bool => "bool",
            FieldKind::Decimal => "decimal",
            FieldKind::Date => "date",
            FieldKind::DateTime => "datetime",
            FieldKind::JsonObject => "json object",
            FieldKind::JsonArray => "json array",
            FieldKind::Reference { .. } => "reference",
            FieldKind::ManyReference { .. } => "many-reference",
        }
    }

    /// Model a reference kind points at, if any.
    pub fn referenced_model(&self) -> Option<&str> {
        match self {
            FieldKind::Reference { model } | FieldKind::ManyReference { model } => Some(model),
            _ => None,
        }
    }
}

/// A field's default: either a fixed value or a generator invoked anew on
/// every use, so `Utc::now` or a token generator yields fresh output per
/// record.
#[derive(Clone)]
pub enum DefaultValue {
    Literal(FieldValue),
    Generator(Arc<dyn Fn() -> FieldValue + Send + Sync>),
}

impl DefaultValue {
    fn produce(&self) -> FieldValue {
        match self {
            DefaultValue::Literal(value) => value.clone(),
            DefaultValue::Generator(generator) => generator(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DefaultValue::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            DefaultValue::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// One field declaration inside a model schema.
///
/// Built with the kind constructors plus chained options:
///
/// ```
/// use kvmodel::{FieldDef, FieldValue};
///
/// let status = FieldDef::string()
///     .not_null()
///     .with_default("created")
///     .with_choices([("created", "Created"), ("done", "Done")]);
/// let attempts = FieldDef::number().with_default(0);
/// let owner = FieldDef::reference("Account");
/// ```
#[derive(Debug, Clone)]
pub struct FieldDef {
    kind: FieldKind,
    default: Option<DefaultValue>,
    null: bool,
    choices: Option<Vec<(FieldValue, String)>>,
    ttl: Option<u64>,
}

impl FieldDef {
    fn of_kind(kind: FieldKind) -> Self {
        Self {
            kind,
            default: None,
            null: true,
            choices: None,
            ttl: None,
        }
    }

    #[must_use]
    pub fn string() -> Self {
        Self::of_kind(FieldKind::Str)
    }

    #[must_use]
    pub fn number() -> Self {
        Self::of_kind(FieldKind::Number)
    }

    /// Boolean field. The `True` / `False` choice pair is attached
    /// automatically, so only real booleans pass cleaning.
    #[must_use]
    pub fn bool() -> Self {
        let mut def = Self::of_kind(FieldKind::Bool);
        def.choices = Some(BOOL_CHOICES.clone());
        def
    }

    #[must_use]
    pub fn decimal() -> Self {
        Self::of_kind(FieldKind::Decimal)
    }

    #[must_use]
    pub fn date() -> Self {
        Self::of_kind(FieldKind::Date)
    }

    #[must_use]
    pub fn datetime() -> Self {
        Self::of_kind(FieldKind::DateTime)
    }

    #[must_use]
    pub fn json_object() -> Self {
        Self::of_kind(FieldKind::JsonObject)
    }

    #[must_use]
    pub fn json_array() -> Self {
        Self::of_kind(FieldKind::JsonArray)
    }

    #[must_use]
    pub fn reference(model: impl Into<String>) -> Self {
        Self::of_kind(FieldKind::Reference {
            model: model.into(),
        })
    }

    #[must_use]
    pub fn many_reference(model: impl Into<String>) -> Self {
        Self::of_kind(FieldKind::ManyReference {
            model: model.into(),
        })
    }

    /// Rejects records that would store this field as null.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.null = false;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(DefaultValue::Literal(value.into()));
        self
    }

    /// Default produced by a generator, re-invoked for every record.
    #[must_use]
    pub fn with_default_fn<F, V>(mut self, generator: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<FieldValue>,
    {
        self.default = Some(DefaultValue::Generator(Arc::new(move || {
            generator().into()
        })));
        self
    }

    /// Restricts cleaned values to an allowed set. Each entry pairs the
    /// stored value with a human-readable label.
    #[must_use]
    pub fn with_choices<I, V, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = (V, S)>,
        V: Into<FieldValue>,
        S: Into<String>,
    {
        self.choices = Some(
            choices
                .into_iter()
                .map(|(value, label)| (value.into(), label.into()))
                .collect(),
        );
        self
    }

    /// Expires this field's key `secs` seconds after each write.
    #[must_use]
    pub fn with_ttl(mut self, secs: u64) -> Self {
        self.ttl = Some(secs);
        self
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn nullable(&self) -> bool {
        self.null
    }

    pub fn ttl(&self) -> Option<u64> {
        self.ttl
    }

    /// Validates and serializes a typed value into its stored string.
    ///
    /// Passing `None` (or an explicit null) applies the default first,
    /// then the null policy: nullable fields store the `null` sentinel,
    /// non-nullable fields fail with [`StoreError::NullNotAllowed`].
    pub fn clean(&self, value: Option<&FieldValue>) -> StoreResult<String> {
        let mut current = match value {
            Some(v) if !v.is_null() => Some(v.clone()),
            _ => None,
        };
        if current.is_none() {
            current = self.default.as_ref().map(DefaultValue::produce);
            if matches!(current, Some(FieldValue::Null)) {
                current = None;
            }
        }

        let value = match current {
            Some(value) => value,
            None => {
                return if self.null {
                    Ok(NULL_SENTINEL.to_string())
                } else {
                    Err(StoreError::NullNotAllowed(
                        "no value provided and no default declared".to_string(),
                    ))
                };
            }
        };

        if let Some(choices) = &self.choices {
            if !choices.iter().any(|(allowed, _)| allowed == &value) {
                return Err(StoreError::InvalidChoice(format!(
                    "{value} is not among the declared choices"
                )));
            }
        }

        self.serialize_value(value)
    }

    fn serialize_value(&self, value: FieldValue) -> StoreResult<String> {
        match &self.kind {
            FieldKind::Str => match value {
                FieldValue::Json(_) | FieldValue::Record(_) | FieldValue::Records(_) => {
                    Err(StoreError::TypeMismatch(format!(
                        "string field cannot absorb a {} value",
                        value.kind_name()
                    )))
                }
                scalar => Ok(scalar.as_text()),
            },
            FieldKind::Number => match value {
                FieldValue::Int(i) => Ok(i.to_string()),
                FieldValue::Float(f) => Ok(format!("{f:?}")),
                other => Err(StoreError::TypeMismatch(format!(
                    "number field cannot take a {} value",
                    other.kind_name()
                ))),
            },
            FieldKind::Bool => match value {
                FieldValue::Bool(b) => Ok(if b { "1" } else { "0" }.to_string()),
                other => Err(StoreError::TypeMismatch(format!(
                    "bool field cannot take a {} value",
                    other.kind_name()
                ))),
            },
            FieldKind::Decimal => match value {
                FieldValue::Decimal(d) => Ok(d.to_string()),
                other => Err(StoreError::TypeMismatch(format!(
                    "decimal field cannot take a {} value",
                    other.kind_name()
                ))),
            },
            FieldKind::Date => match value {
                FieldValue::Date(d) => Ok(format_date(&d)),
                // An instant narrows to its calendar date.
                FieldValue::DateTime(dt) => Ok(format_date(&dt.date_naive())),
                other => Err(StoreError::TypeMismatch(format!(
                    "date field cannot take a {} value",
                    other.kind_name()
                ))),
            },
            FieldKind::DateTime => match value {
                FieldValue::DateTime(dt) => Ok(format_datetime(&dt)),
                other => Err(StoreError::TypeMismatch(format!(
                    "datetime field cannot take a {} value",
                    other.kind_name()
                ))),
            },
            FieldKind::JsonObject => match &value {
                FieldValue::Json(JsonValue::Object(_)) | FieldValue::Record(_) => {
                    Ok(value.to_json().to_string())
                }
                other => Err(StoreError::TypeMismatch(format!(
                    "json object field needs a mapping, got {}",
                    other.kind_name()
                ))),
            },
            FieldKind::JsonArray => match &value {
                FieldValue::Json(JsonValue::Array(_)) | FieldValue::Records(_) => {
                    Ok(value.to_json().to_string())
                }
                other => Err(StoreError::TypeMismatch(format!(
                    "json array field needs a sequence, got {}",
                    other.kind_name()
                ))),
            },
            FieldKind::Reference { .. } => reference_id(&value).map(|id| id.to_string()),
            FieldKind::ManyReference { .. } => {
                let ids = reference_ids(&value)?;
                serde_json::to_string(&ids)
                    .map_err(|e| StoreError::Backend(format!("id list encoding failed: {e}")))
            }
        }
    }

    /// Parses a stored string back into a typed value.
    ///
    /// The `null` sentinel deserializes to [`FieldValue::Null`] on nullable
    /// fields and fails on non-nullable ones (a permissive read path
    /// downgrades that failure to the raw string). Reference kinds resolve
    /// their stored ids through `resolver`.
    pub fn deserialize(
        &self,
        raw: &str,
        resolver: &dyn RecordResolver,
    ) -> StoreResult<FieldValue> {
        if raw == NULL_SENTINEL {
            return if self.null {
                Ok(FieldValue::Null)
            } else {
                Err(StoreError::Deserialization(
                    "null stored for a non-nullable field".to_string(),
                ))
            };
        }

        match &self.kind {
            FieldKind::Str => Ok(FieldValue::Str(raw.to_string())),
            FieldKind::Number => {
                if raw.contains('.') {
                    raw.parse::<f64>().map(FieldValue::Float).map_err(|_| {
                        StoreError::Deserialization(format!("{raw:?} is not a stored float"))
                    })
                } else {
                    raw.parse::<i64>().map(FieldValue::Int).map_err(|_| {
                        StoreError::Deserialization(format!("{raw:?} is not a stored integer"))
                    })
                }
            }
            FieldKind::Bool => raw
                .parse::<i64>()
                .map(|n| FieldValue::Bool(n != 0))
                .map_err(|_| {
                    StoreError::Deserialization(format!("{raw:?} is not a stored bool"))
                }),
            FieldKind::Decimal => BigDecimal::from_str(raw)
                .map(FieldValue::Decimal)
                .map_err(|_| {
                    StoreError::Deserialization(format!("{raw:?} is not a stored decimal"))
                }),
            FieldKind::Date => parse_date(raw).map(FieldValue::Date).ok_or_else(|| {
                StoreError::Deserialization(format!("{raw:?} is not a stored date"))
            }),
            FieldKind::DateTime => parse_datetime(raw).map(FieldValue::DateTime).ok_or_else(
                || StoreError::Deserialization(format!("{raw:?} is not a stored datetime")),
            ),
            FieldKind::JsonObject => match serde_json::from_str::<JsonValue>(raw) {
                Ok(v @ JsonValue::Object(_)) => Ok(FieldValue::Json(v)),
                Ok(_) => Err(StoreError::Deserialization(format!(
                    "{raw:?} is not a JSON mapping"
                ))),
                Err(e) => Err(StoreError::Deserialization(format!(
                    "{raw:?} is not valid JSON: {e}"
                ))),
            },
            FieldKind::JsonArray => match serde_json::from_str::<JsonValue>(raw) {
                Ok(v @ JsonValue::Array(_)) => Ok(FieldValue::Json(v)),
                Ok(_) => Err(StoreError::Deserialization(format!(
                    "{raw:?} is not a JSON sequence"
                ))),
                Err(e) => Err(StoreError::Deserialization(format!(
                    "{raw:?} is not valid JSON: {e}"
                ))),
            },
            FieldKind::Reference { model } => {
                let id = raw.parse::<i64>().map_err(|_| {
                    StoreError::Deserialization(format!("{raw:?} is not a stored reference id"))
                })?;
                resolver.resolve(model, id).map(FieldValue::Record)
            }
            FieldKind::ManyReference { model } => {
                let ids: Vec<i64> = serde_json::from_str(raw).map_err(|_| {
                    StoreError::Deserialization(format!("{raw:?} is not a stored id list"))
                })?;
                ids.into_iter()
                    .map(|id| resolver.resolve(model, id))
                    .collect::<StoreResult<Vec<Record>>>()
                    .map(FieldValue::Records)
            }
        }
    }
}

/// Normalizes a single-reference value down to its id.
pub(crate) fn reference_id(value: &FieldValue) -> StoreResult<i64> {
    match value {
        FieldValue::Int(id) => Ok(*id),
        FieldValue::Record(record) => record_id(record).ok_or_else(|| {
            StoreError::RelationResolution("record value carries no integer id".to_string())
        }),
        FieldValue::Json(JsonValue::Object(map)) => {
            map.get("id").and_then(JsonValue::as_i64).ok_or_else(|| {
                StoreError::RelationResolution(
                    "mapping value carries no integer id".to_string(),
                )
            })
        }
        other => Err(StoreError::RelationResolution(format!(
            "a {} value is neither an id nor an id-bearing record",
            other.kind_name()
        ))),
    }
}

/// Normalizes a many-reference value to a deduplicated id list, keeping
/// first-seen order.
pub(crate) fn reference_ids(value: &FieldValue) -> StoreResult<Vec<i64>> {
    let collected: StoreResult<Vec<i64>> = match value {
        FieldValue::Records(records) => records
            .iter()
            .map(|record| {
                record_id(record).ok_or_else(|| {
                    StoreError::RelationResolution(
                        "record in list carries no integer id".to_string(),
                    )
                })
            })
            .collect(),
        FieldValue::Json(JsonValue::Array(items)) => items
            .iter()
            .map(|item| match item {
                JsonValue::Number(n) => n.as_i64().ok_or_else(|| {
                    StoreError::RelationResolution(format!("{n} is not an integer id"))
                }),
                JsonValue::Object(map) => {
                    map.get("id").and_then(JsonValue::as_i64).ok_or_else(|| {
                        StoreError::RelationResolution(
                            "mapping in list carries no integer id".to_string(),
                        )
                    })
                }
                other => Err(StoreError::RelationResolution(format!(
                    "{other} is neither an id nor an id-bearing mapping"
                ))),
            })
            .collect(),
        single => reference_id(single).map(|id| vec![id]),
    };

    let mut seen = std::collections::BTreeSet::new();
    Ok(collected?
        .into_iter()
        .filter(|id| seen.insert(*id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::value::record_stub;
    use chrono::{NaiveDate, TimeZone, Utc};
    use serde_json::json;

    struct StubResolver;

    impl RecordResolver for StubResolver {
        fn resolve(&self, _model: &str, id: i64) -> StoreResult<Record> {
            Ok(record_stub(id))
        }
    }

    #[test]
    fn clean_applies_default_then_null_policy() {
        let with_default = FieldDef::string().with_default("created");
        assert_eq!(with_default.clean(None).unwrap(), "created");

        let nullable = FieldDef::string();
        assert_eq!(nullable.clean(None).unwrap(), "null");

        let strict = FieldDef::string().not_null();
        assert!(matches!(
            strict.clean(None),
            Err(StoreError::NullNotAllowed(_))
        ));
    }

    #[test]
    fn explicit_null_falls_back_to_default() {
        let def = FieldDef::number().with_default(5);
        assert_eq!(def.clean(Some(&FieldValue::Null)).unwrap(), "5");
    }

    #[test]
    fn generator_default_runs_per_clean() {
        use std::sync::atomic::{AtomicI64, Ordering};
        static COUNTER: AtomicI64 = AtomicI64::new(0);
        let def =
            FieldDef::number().with_default_fn(|| COUNTER.fetch_add(1, Ordering::SeqCst) + 1);
        assert_eq!(def.clean(None).unwrap(), "1");
        assert_eq!(def.clean(None).unwrap(), "2");
    }

    #[test]
    fn choices_gate_cleaning() {
        let def = FieldDef::string().with_choices([("in_work", "In work"), ("done", "Done")]);
        assert_eq!(def.clean(Some(&"done".into())).unwrap(), "done");
        assert!(matches!(
            def.clean(Some(&"bruh".into())),
            Err(StoreError::InvalidChoice(_))
        ));
    }

    #[test]
    fn number_distinguishes_int_and_float() {
        let def = FieldDef::number();
        assert_eq!(def.clean(Some(&4.into())).unwrap(), "4");
        assert_eq!(def.clean(Some(&4.0.into())).unwrap(), "4.0");
        assert_eq!(
            def.deserialize("4", &StubResolver).unwrap(),
            FieldValue::Int(4)
        );
        assert_eq!(
            def.deserialize("4.0", &StubResolver).unwrap(),
            FieldValue::Float(4.0)
        );
        assert!(matches!(
            def.clean(Some(&"four".into())),
            Err(StoreError::TypeMismatch(_))
        ));
    }

    #[test]
    fn bool_stores_single_digit() {
        let def = FieldDef::bool();
        assert_eq!(def.clean(Some(&true.into())).unwrap(), "1");
        assert_eq!(def.clean(Some(&false.into())).unwrap(), "0");
        assert_eq!(
            def.deserialize("1", &StubResolver).unwrap(),
            FieldValue::Bool(true)
        );
        // Non-booleans bounce off the forced choice set.
        assert!(def.clean(Some(&1.into())).is_err());
    }

    #[test]
    fn datetime_roundtrips_at_second_precision() {
        let def = FieldDef::datetime();
        let instant = Utc.with_ymd_and_hms(2021, 5, 1, 14, 30, 7).unwrap();
        let stored = def.clean(Some(&instant.into())).unwrap();
        assert_eq!(stored, "2021.05.01-14:30:07+UTC");
        assert_eq!(
            def.deserialize(&stored, &StubResolver).unwrap(),
            FieldValue::DateTime(instant)
        );
    }

    #[test]
    fn date_narrows_an_instant() {
        let def = FieldDef::date();
        let instant = Utc.with_ymd_and_hms(2021, 5, 1, 14, 30, 7).unwrap();
        assert_eq!(def.clean(Some(&instant.into())).unwrap(), "2021.05.01+UTC");
        let date = NaiveDate::from_ymd_opt(2021, 5, 1).unwrap();
        assert_eq!(
            def.deserialize("2021.05.01+UTC", &StubResolver).unwrap(),
            FieldValue::Date(date)
        );
    }

    #[test]
    fn json_object_requires_mapping_shape() {
        let def = FieldDef::json_object();
        let stored = def
            .clean(Some(&json!({"a": 1, "b": [2, 3]}).into()))
            .unwrap();
        assert_eq!(
            def.deserialize(&stored, &StubResolver).unwrap(),
            FieldValue::Json(json!({"a": 1, "b": [2, 3]}))
        );
        assert!(matches!(
            def.clean(Some(&json!([1, 2]).into())),
            Err(StoreError::TypeMismatch(_))
        ));
        assert!(matches!(
            def.deserialize("[1,2]", &StubResolver),
            Err(StoreError::Deserialization(_))
        ));
    }

    #[test]
    fn reference_accepts_id_record_or_mapping() {
        let def = FieldDef::reference("Parent");
        assert_eq!(def.clean(Some(&7.into())).unwrap(), "7");
        assert_eq!(
            def.clean(Some(&FieldValue::Record(record_stub(7)))).unwrap(),
            "7"
        );
        assert_eq!(def.clean(Some(&json!({"id": 7}).into())).unwrap(), "7");
        assert!(matches!(
            def.clean(Some(&json!({"name": "x"}).into())),
            Err(StoreError::RelationResolution(_))
        ));
        assert_eq!(
            def.deserialize("7", &StubResolver).unwrap(),
            FieldValue::Record(record_stub(7))
        );
    }

    #[test]
    fn many_reference_dedupes_keeping_order() {
        let def = FieldDef::many_reference("Child");
        let stored = def
            .clean(Some(&json!([3, 1, 3, 2, 1]).into()))
            .unwrap();
        assert_eq!(stored, "[3,1,2]");
        assert_eq!(
            def.deserialize(&stored, &StubResolver).unwrap(),
            FieldValue::Records(vec![record_stub(3), record_stub(1), record_stub(2)])
        );
    }

    #[test]
    fn many_reference_wraps_a_single_id() {
        let def = FieldDef::many_reference("Child");
        assert_eq!(def.clean(Some(&5.into())).unwrap(), "[5]");
    }

    #[test]
    fn null_sentinel_deserializes_by_policy() {
        let nullable = FieldDef::number();
        assert_eq!(
            nullable.deserialize("null", &StubResolver).unwrap(),
            FieldValue::Null
        );
        let strict = FieldDef::number().not_null();
        assert!(matches!(
            strict.deserialize("null", &StubResolver),
            Err(StoreError::Deserialization(_))
        ));
    }

    #[test]
    fn ttl_rides_on_the_definition() {
        let def = FieldDef::string().with_ttl(30);
        assert_eq!(def.ttl(), Some(30));
        assert_eq!(FieldDef::string().ttl(), None);
    }
}
