//! Filter expression builder for the remote's query grammar
//!
//! The remote accepts a `filters` query parameter holding a JSON array of
//! `{property, value, operator?}` objects, where a missing operator means
//! equality. [`FilterBuilder`] accumulates terms in insertion order (the
//! remote evaluates combined predicates in serialized order) and serializes
//! them once; percent-encoding is the transport's job, applied exactly once
//! when the string is embedded in a query string.

use chrono::NaiveDate;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

const DATE_FORMAT: &str = "%Y-%m-%d";

// Sentinel bounds used by the open-ended date filters. The remote only
// understands `between`, so "after" and "before" are expressed as ranges.
const DATE_MIN: &str = "1900-01-01";
const DATE_MAX: &str = "2099-12-31";

/// A single scalar filter value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::String(s) => serializer.serialize_str(s),
            Scalar::Int(i) => serializer.serialize_i64(*i),
            Scalar::Float(f) => serializer.serialize_f64(*f),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(i64::from(value))
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Scalar::Int(i64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<NaiveDate> for Scalar {
    fn from(value: NaiveDate) -> Self {
        Scalar::String(value.format(DATE_FORMAT).to_string())
    }
}

/// Value carried by a filter term, tagged by shape
///
/// The operator dictates the shape: equality takes a scalar, `between` an
/// ordered pair, `in`/`not in` a list. The builder methods enforce this, so
/// serialization can match exhaustively without runtime type inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(Scalar),
    Pair([Scalar; 2]),
    List(Vec<Scalar>),
}

impl Serialize for FilterValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FilterValue::Scalar(s) => s.serialize(serializer),
            FilterValue::Pair(pair) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                for item in pair {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            FilterValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// Non-equality comparison operators understood by the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    In,
    NotIn,
    Between,
}

impl FilterOperator {
    /// Wire representation of the operator.
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not in",
            FilterOperator::Between => "between",
        }
    }
}

impl Serialize for FilterOperator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One predicate in a filter expression
///
/// `operator` is omitted on the wire for plain equality, matching the
/// remote's default-operator convention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterTerm {
    pub property: String,
    pub value: FilterValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<FilterOperator>,
}

impl FilterTerm {
    pub fn equals(property: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self { property: property.into(), value: FilterValue::Scalar(value.into()), operator: None }
    }

    pub fn is_in<V: Into<Scalar>>(
        property: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            property: property.into(),
            value: FilterValue::List(values.into_iter().map(Into::into).collect()),
            operator: Some(FilterOperator::In),
        }
    }

    pub fn not_in<V: Into<Scalar>>(
        property: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            property: property.into(),
            value: FilterValue::List(values.into_iter().map(Into::into).collect()),
            operator: Some(FilterOperator::NotIn),
        }
    }

    pub fn between(
        property: impl Into<String>,
        low: impl Into<Scalar>,
        high: impl Into<Scalar>,
    ) -> Self {
        Self {
            property: property.into(),
            value: FilterValue::Pair([low.into(), high.into()]),
            operator: Some(FilterOperator::Between),
        }
    }
}

/// Fluent builder for filter expressions
///
/// Terms are kept in insertion order; once serialized the expression is
/// immutable (`build` consumes the builder).
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    terms: Vec<FilterTerm>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality predicate (`property == value`).
    pub fn where_eq(mut self, property: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.terms.push(FilterTerm::equals(property, value));
        self
    }

    /// Membership predicate (`property in values`).
    pub fn where_in<V: Into<Scalar>>(
        mut self,
        property: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.terms.push(FilterTerm::is_in(property, values));
        self
    }

    /// Negated membership predicate (`property not in values`).
    pub fn where_not_in<V: Into<Scalar>>(
        mut self,
        property: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.terms.push(FilterTerm::not_in(property, values));
        self
    }

    /// Range predicate (`low <= property <= high`).
    pub fn where_between(
        mut self,
        property: impl Into<String>,
        low: impl Into<Scalar>,
        high: impl Into<Scalar>,
    ) -> Self {
        self.terms.push(FilterTerm::between(property, low, high));
        self
    }

    /// Date-range predicate; dates are formatted as the remote's date-only
    /// string (`YYYY-MM-DD`).
    pub fn where_date_between(
        self,
        property: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        self.where_between(property, start, end)
    }

    /// Exact-date predicate, expressed as a degenerate range.
    pub fn where_date(self, property: impl Into<String>, date: NaiveDate) -> Self {
        self.where_between(property, date, date)
    }

    /// Matches dates on or after `date`.
    pub fn where_date_after(self, property: impl Into<String>, date: NaiveDate) -> Self {
        self.where_between(property, date, DATE_MAX)
    }

    /// Matches dates on or before `date`.
    pub fn where_date_before(self, property: impl Into<String>, date: NaiveDate) -> Self {
        self.where_between(property, DATE_MIN, date)
    }

    /// Append a pre-built term.
    pub fn push(mut self, term: FilterTerm) -> Self {
        self.terms.push(term);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Consume the builder and return the immutable term list.
    pub fn build(self) -> Vec<FilterTerm> {
        self.terms
    }

    /// Serialize to the wire format: a JSON array of terms.
    ///
    /// An empty builder serializes to `[]`, not an absent value; callers
    /// decide whether to omit the query parameter entirely. The output is raw
    /// JSON — encoding is left to the transport so the string is
    /// percent-encoded exactly once.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.terms).expect("filter terms serialize infallibly")
    }

    /// Percent-encoded form for direct embedding in a query string.
    pub fn encoded(&self) -> String {
        urlencoding::encode(&self.to_json()).into_owned()
    }
}
