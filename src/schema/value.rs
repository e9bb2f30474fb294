//! Typed values flowing in and out of the store.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use bigdecimal::{BigDecimal, FromPrimitive};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;

/// A deserialized record: field name to typed value.
///
/// Every stored record carries at least an `"id"` entry holding
/// [`FieldValue::Int`].
pub type Record = BTreeMap<String, FieldValue>;

/// Wire formats for temporal values. Both end in a literal `+UTC` marker;
/// instants are always stored in UTC.
pub(crate) const DATETIME_WIRE_FORMAT: &str = "%Y.%m.%d-%H:%M:%S";
pub(crate) const DATE_WIRE_FORMAT: &str = "%Y.%m.%d";
pub(crate) const UTC_SUFFIX: &str = "+UTC";

/// One typed field value.
///
/// Values compare across numeric variants: `Int(5)`, `Float(5.0)` and
/// `Decimal(5)` are all equal. Everything else compares only within its own
/// variant.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    Str(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Json(JsonValue),
    /// A resolved single reference.
    Record(Record),
    /// A resolved reference list, in stored id order.
    Records(Vec<Record>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub(crate) fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldValue::Int(_) | FieldValue::Float(_) | FieldValue::Decimal(_)
        )
    }

    /// Variant name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Decimal(_) => "decimal",
            FieldValue::Str(_) => "string",
            FieldValue::Date(_) => "date",
            FieldValue::DateTime(_) => "datetime",
            FieldValue::Json(_) => "json",
            FieldValue::Record(_) => "record",
            FieldValue::Records(_) => "records",
        }
    }

    /// Canonical text rendering, used by substring-style filter operators
    /// and by the string field kind when it absorbs a scalar.
    ///
    /// Scalars render the way they are stored: floats keep a decimal point
    /// (`4.0`, not `4`), temporals use the `+UTC` wire formats, structured
    /// values render as compact JSON.
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Null => "null".to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => format!("{f:?}"),
            FieldValue::Decimal(d) => d.to_string(),
            FieldValue::Str(s) => s.clone(),
            FieldValue::Date(d) => format_date(d),
            FieldValue::DateTime(dt) => format_datetime(dt),
            FieldValue::Json(v) => v.to_string(),
            FieldValue::Record(_) | FieldValue::Records(_) => self.to_json().to_string(),
        }
    }

    /// Orders two values when they are of comparable shapes.
    ///
    /// Numerics compare numerically across variants, strings
    /// lexicographically, temporals chronologically (a bare date counts as
    /// its UTC midnight). Incomparable shapes return `None`.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        use FieldValue::*;
        match (self, other) {
            (Str(a), Str(b)) => Some(a.cmp(b)),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            (Date(a), DateTime(b)) => day_start(a).map(|dt| dt.cmp(b)),
            (DateTime(a), Date(b)) => day_start(b).map(|dt| a.cmp(&dt)),
            (a, b) if a.is_numeric() && b.is_numeric() => numeric_cmp(a, b),
            _ => None,
        }
    }

    /// Converts to a `serde_json` value. Temporals render in their wire
    /// formats; decimals render as strings to avoid precision loss.
    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Null => JsonValue::Null,
            FieldValue::Bool(b) => JsonValue::Bool(*b),
            FieldValue::Int(i) => JsonValue::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            FieldValue::Decimal(d) => JsonValue::String(d.to_string()),
            FieldValue::Str(s) => JsonValue::String(s.clone()),
            FieldValue::Date(d) => JsonValue::String(format_date(d)),
            FieldValue::DateTime(dt) => JsonValue::String(format_datetime(dt)),
            FieldValue::Json(v) => v.clone(),
            FieldValue::Record(record) => record_to_json(record),
            FieldValue::Records(records) => {
                JsonValue::Array(records.iter().map(record_to_json).collect())
            }
        }
    }
}

fn record_to_json(record: &Record) -> JsonValue {
    JsonValue::Object(
        record
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect(),
    )
}

fn day_start(date: &NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
}

fn numeric_cmp(a: &FieldValue, b: &FieldValue) -> Option<Ordering> {
    use FieldValue::*;
    match (a, b) {
        (Int(x), Int(y)) => Some(x.cmp(y)),
        (Float(x), Float(y)) => x.partial_cmp(y),
        (Int(x), Float(y)) => (*x as f64).partial_cmp(y),
        (Float(x), Int(y)) => x.partial_cmp(&(*y as f64)),
        (Decimal(x), Decimal(y)) => Some(x.cmp(y)),
        (Decimal(x), Int(y)) => Some(x.cmp(&BigDecimal::from(*y))),
        (Int(x), Decimal(y)) => Some(BigDecimal::from(*x).cmp(y)),
        (Decimal(x), Float(y)) => BigDecimal::from_f64(*y).map(|fy| x.cmp(&fy)),
        (Float(x), Decimal(y)) => BigDecimal::from_f64(*x).map(|fx| fx.cmp(y)),
        _ => None,
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        use FieldValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (Json(a), Json(b)) => a == b,
            (Record(a), Record(b)) => a == b,
            (Records(a), Records(b)) => a == b,
            (a, b) if a.is_numeric() && b.is_numeric() => {
                numeric_cmp(a, b) == Some(Ordering::Equal)
            }
            _ => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

/// Pulls the integer id out of a record projection.
pub fn record_id(record: &Record) -> Option<i64> {
    match record.get("id") {
        Some(FieldValue::Int(id)) => Some(*id),
        _ => None,
    }
}

/// The minimal projection a mutation returns in economy mode.
pub(crate) fn record_stub(id: i64) -> Record {
    let mut record = Record::new();
    record.insert("id".to_string(), FieldValue::Int(id));
    record
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v.into())
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Int(v.into())
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Float(v.into())
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<BigDecimal> for FieldValue {
    fn from(v: BigDecimal) -> Self {
        FieldValue::Decimal(v)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(v: NaiveDate) -> Self {
        FieldValue::Date(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::DateTime(v)
    }
}

impl From<JsonValue> for FieldValue {
    fn from(v: JsonValue) -> Self {
        FieldValue::Json(v)
    }
}

impl From<Record> for FieldValue {
    fn from(v: Record) -> Self {
        FieldValue::Record(v)
    }
}

impl From<Vec<Record>> for FieldValue {
    fn from(v: Vec<Record>) -> Self {
        FieldValue::Records(v)
    }
}

impl From<Vec<i64>> for FieldValue {
    fn from(v: Vec<i64>) -> Self {
        FieldValue::Json(JsonValue::Array(v.into_iter().map(JsonValue::from).collect()))
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => FieldValue::Null,
        }
    }
}

/// Builder for the field values handed to `create` and `update`.
///
/// ```
/// use kvmodel::Values;
///
/// let values = Values::new()
///     .set("status", "in_work")
///     .set("attempts", 3)
///     .set_null("comment");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    inner: Record,
}

impl Values {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.inner.insert(name.into(), value.into());
        self
    }

    /// Explicitly passes no value, triggering the field's default-or-null
    /// handling.
    #[must_use]
    pub fn set_null(mut self, name: impl Into<String>) -> Self {
        self.inner.insert(name.into(), FieldValue::Null);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn into_record(self) -> Record {
        self.inner
    }
}

impl From<Record> for Values {
    fn from(inner: Record) -> Self {
        Self { inner }
    }
}

impl From<Values> for Record {
    fn from(values: Values) -> Self {
        values.inner
    }
}

/// Formats an instant in the stored wire form, truncating to seconds.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    format!("{}{}", dt.format(DATETIME_WIRE_FORMAT), UTC_SUFFIX)
}

pub(crate) fn format_date(date: &NaiveDate) -> String {
    format!("{}{}", date.format(DATE_WIRE_FORMAT), UTC_SUFFIX)
}

pub(crate) fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let bare = raw.strip_suffix(UTC_SUFFIX)?;
    chrono::NaiveDateTime::parse_from_str(bare, DATETIME_WIRE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let bare = raw.strip_suffix(UTC_SUFFIX)?;
    NaiveDate::parse_from_str(bare, DATE_WIRE_FORMAT).ok()
}
