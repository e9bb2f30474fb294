//! Filter clauses: `field[__field]*[__operator]` against typed values.
//!
//! Clause keys are parsed against schemas in the query engine; this module
//! owns the operator grammar and the predicate evaluation itself, including
//! the id-based shortcuts used when a clause terminates on a reference
//! field.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;

use crate::schema::field::{reference_id, reference_ids};
use crate::schema::value::{FieldValue, Record};

/// The terminal comparison of a filter clause. Defaults to `Exact` when a
/// clause key names no operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilterOp {
    Exact,
    IExact,
    Contains,
    IContains,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Range,
    IsNull,
}

impl FilterOp {
    pub(crate) fn parse(token: &str) -> Option<FilterOp> {
        Some(match token {
            "exact" => FilterOp::Exact,
            "iexact" => FilterOp::IExact,
            "contains" => FilterOp::Contains,
            "icontains" => FilterOp::IContains,
            "in" => FilterOp::In,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "startswith" => FilterOp::StartsWith,
            "istartswith" => FilterOp::IStartsWith,
            "endswith" => FilterOp::EndsWith,
            "iendswith" => FilterOp::IEndsWith,
            "range" => FilterOp::Range,
            "isnull" => FilterOp::IsNull,
            _ => return None,
        })
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            FilterOp::Exact => "exact",
            FilterOp::IExact => "iexact",
            FilterOp::Contains => "contains",
            FilterOp::IContains => "icontains",
            FilterOp::In => "in",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::StartsWith => "startswith",
            FilterOp::IStartsWith => "istartswith",
            FilterOp::EndsWith => "endswith",
            FilterOp::IEndsWith => "iendswith",
            FilterOp::Range => "range",
            FilterOp::IsNull => "isnull",
        }
    }
}

/// Right-hand side of a clause: one value, or a list for `in` and
/// list-shaped `exact` comparisons.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOperand {
    One(FieldValue),
    Many(Vec<FieldValue>),
}

impl FilterOperand {
    fn one(&self) -> Option<&FieldValue> {
        match self {
            FilterOperand::One(value) => Some(value),
            FilterOperand::Many(_) => None,
        }
    }

    fn many(&self) -> Option<&[FieldValue]> {
        match self {
            FilterOperand::Many(values) => Some(values),
            FilterOperand::One(_) => None,
        }
    }
}

macro_rules! operand_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(impl From<$ty> for FilterOperand {
            fn from(v: $ty) -> Self {
                FilterOperand::One(v.into())
            }
        })*
    };
}

operand_from_scalar!(
    bool,
    i64,
    i32,
    u32,
    f64,
    f32,
    &str,
    String,
    BigDecimal,
    NaiveDate,
    DateTime<Utc>,
    JsonValue,
    Record,
    FieldValue,
);

impl<T: Into<FieldValue>> From<Vec<T>> for FilterOperand {
    fn from(values: Vec<T>) -> Self {
        FilterOperand::Many(values.into_iter().map(Into::into).collect())
    }
}

/// An ANDed set of clauses, built Django-style:
///
/// ```
/// use kvmodel::Filters;
///
/// let filters = Filters::new()
///     .filter("status", "in_work")
///     .filter("attempts__gte", 2)
///     .filter("account__gamer__name__startswith", "gg_");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    clauses: Vec<(String, FilterOperand)>,
}

impl Filters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, key: impl Into<String>, operand: impl Into<FilterOperand>) -> Self {
        self.clauses.push((key.into(), operand.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub(crate) fn clauses(&self) -> &[(String, FilterOperand)] {
        &self.clauses
    }
}

/// Evaluates one operator against a typed value.
///
/// Shape mismatches never error: a comparison that makes no sense for the
/// operand at hand simply fails the record, mirroring how absent values
/// fail every operator except `isnull=false`.
pub(crate) fn value_matches(value: &FieldValue, op: FilterOp, operand: &FilterOperand) -> bool {
    use FilterOp::*;
    match op {
        Exact => operand.one().is_some_and(|rhs| value == rhs),
        IExact => operand
            .one()
            .is_some_and(|rhs| value.as_text().to_lowercase() == rhs.as_text().to_lowercase()),
        Contains => operand
            .one()
            .is_some_and(|rhs| value.as_text().contains(&rhs.as_text())),
        IContains => operand.one().is_some_and(|rhs| {
            value
                .as_text()
                .to_lowercase()
                .contains(&rhs.as_text().to_lowercase())
        }),
        In => operand
            .many()
            .is_some_and(|allowed| allowed.iter().any(|rhs| value == rhs)),
        Gt => matches!(
            operand.one().and_then(|rhs| value.compare(rhs)),
            Some(std::cmp::Ordering::Greater)
        ),
        Gte => matches!(
            operand.one().and_then(|rhs| value.compare(rhs)),
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        ),
        Lt => matches!(
            operand.one().and_then(|rhs| value.compare(rhs)),
            Some(std::cmp::Ordering::Less)
        ),
        Lte => matches!(
            operand.one().and_then(|rhs| value.compare(rhs)),
            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        ),
        StartsWith => operand
            .one()
            .is_some_and(|rhs| value.as_text().starts_with(&rhs.as_text())),
        IStartsWith => operand.one().is_some_and(|rhs| {
            value
                .as_text()
                .to_lowercase()
                .starts_with(&rhs.as_text().to_lowercase())
        }),
        EndsWith => operand
            .one()
            .is_some_and(|rhs| value.as_text().ends_with(&rhs.as_text())),
        IEndsWith => operand.one().is_some_and(|rhs| {
            value
                .as_text()
                .to_lowercase()
                .ends_with(&rhs.as_text().to_lowercase())
        }),
        Range => match (integral_of(value), operand.one().and_then(integral_of)) {
            (Some(v), Some(bound)) => 0 <= v && v < bound,
            _ => false,
        },
        IsNull => operand
            .one()
            .is_some_and(|rhs| matches!(rhs, FieldValue::Bool(b) if value.is_null() == *b)),
    }
}

/// `Some(n)` when the value is a whole number, like `7` or `7.0`.
fn integral_of(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Int(i) => Some(*i),
        FieldValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
        _ => None,
    }
}

/// `Some(ids)` when the operand is list-shaped with every element carrying
/// an id: a value list, a JSON id array, or resolved record lists.
fn operand_id_list(operand: &FilterOperand) -> Option<Vec<i64>> {
    match operand {
        FilterOperand::One(v @ (FieldValue::Json(JsonValue::Array(_)) | FieldValue::Records(_))) => {
            reference_ids(v).ok()
        }
        FilterOperand::One(_) => None,
        FilterOperand::Many(values) => values
            .iter()
            .map(|v| reference_id(v).ok())
            .collect::<Option<Vec<i64>>>(),
    }
}

/// Predicates on a clause terminating at a single-reference field. The
/// stored id is compared directly, so filtering by a record, a mapping or
/// an id all behave alike without resolving the neighbor.
pub(crate) fn single_reference_matches(
    stored_id: i64,
    op: FilterOp,
    operand: &FilterOperand,
) -> bool {
    match op {
        FilterOp::Exact => operand
            .one()
            .and_then(|v| reference_id(v).ok())
            .is_some_and(|id| id == stored_id),
        FilterOp::In => {
            operand_id_list(operand).is_some_and(|ids| ids.contains(&stored_id))
        }
        _ => false,
    }
}

/// Predicates on a clause terminating at a many-reference field.
///
/// `exact` with a single id tests membership; `exact` with a list compares
/// the two id sets; `in` tests for a non-empty intersection.
pub(crate) fn many_reference_matches(
    stored_ids: &[i64],
    op: FilterOp,
    operand: &FilterOperand,
) -> bool {
    match op {
        FilterOp::Exact => {
            if let Some(ids) = operand_id_list(operand) {
                let stored: std::collections::BTreeSet<i64> = stored_ids.iter().copied().collect();
                let wanted: std::collections::BTreeSet<i64> = ids.into_iter().collect();
                stored == wanted
            } else {
                operand
                    .one()
                    .and_then(|v| reference_id(v).ok())
                    .is_some_and(|id| stored_ids.contains(&id))
            }
        }
        FilterOp::In => operand_id_list(operand)
            .is_some_and(|ids| ids.iter().any(|id| stored_ids.contains(id))),
        _ => false,
    }
}
