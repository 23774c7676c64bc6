//! Document, filter and query-option model.
//!
//! Latch stores documents as `serde_json::Value` trees. A stored document is
//! the entry's fields merged with an `_id` field carrying the structured key,
//! so filters can address key subfields with dotted paths (e.g.
//! `_id.extKey`). [`Filter`] is a small typed predicate tree; translating it
//! into a real driver's filter language is a store implementation concern.

use serde_json::Value;
use std::cmp::Ordering;

/// Looks up a dotted field path inside a document.
///
/// `lookup_path(doc, "_id.extKey")` descends through nested objects and
/// returns `None` as soon as a segment is missing or the current node is not
/// an object.
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Rank used to order values of different JSON types, mirroring the
/// cross-type comparison order of document databases.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total ordering over JSON values.
///
/// Numbers compare numerically (integer fast path, float fallback), strings
/// lexicographically, booleans false-before-true. Values of different types
/// order by type rank so sorting a mixed column stays deterministic.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(ix), Some(iy)) = (x.as_i64(), y.as_i64()) {
                ix.cmp(&iy)
            } else {
                let fx = x.as_f64().unwrap_or(f64::NAN);
                let fy = y.as_f64().unwrap_or(f64::NAN);
                fx.partial_cmp(&fy).unwrap_or(Ordering::Equal)
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let ord = compare_values(ex, ey);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => canonical_key(a).cmp(&canonical_key(b)),
        _ => Ordering::Equal,
    }
}

/// Canonical string form of a key value.
///
/// Object fields are sorted recursively so two structurally-equal keys built
/// in different field order map to the same storage slot.
pub fn canonical_key(value: &Value) -> String {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serde_json::Map::new();
                for (k, v) in entries {
                    out.insert(k.clone(), canonicalize(v));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }
    canonicalize(value).to_string()
}

/// Typed filter predicate evaluated against stored documents.
///
/// Field names are dotted paths into the merged document (entry fields plus
/// `_id`). Comparison operators never match a missing field; `Ne` matches
/// documents where the field is absent.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Field equals value
    Eq(String, Value),
    /// Field differs from value (or is absent)
    Ne(String, Value),
    /// Field is strictly less than value
    Lt(String, Value),
    /// Field is less than or equal to value
    Lte(String, Value),
    /// Field is strictly greater than value
    Gt(String, Value),
    /// Field is greater than or equal to value
    Gte(String, Value),
    /// All sub-filters match
    And(Vec<Filter>),
    /// Any sub-filter matches
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Evaluates this filter against a document.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::Eq(field, value) => {
                lookup_path(doc, field).map_or(false, |v| compare_values(v, value) == Ordering::Equal)
            }
            Filter::Ne(field, value) => {
                lookup_path(doc, field).map_or(true, |v| compare_values(v, value) != Ordering::Equal)
            }
            Filter::Lt(field, value) => {
                lookup_path(doc, field).map_or(false, |v| compare_values(v, value) == Ordering::Less)
            }
            Filter::Lte(field, value) => {
                lookup_path(doc, field).map_or(false, |v| compare_values(v, value) != Ordering::Greater)
            }
            Filter::Gt(field, value) => lookup_path(doc, field)
                .map_or(false, |v| compare_values(v, value) == Ordering::Greater),
            Filter::Gte(field, value) => {
                lookup_path(doc, field).map_or(false, |v| compare_values(v, value) != Ordering::Less)
            }
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

/// Sort direction for one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One sort key: a dotted field path and a direction.
#[derive(Debug, Clone)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Options for multi-document queries.
///
/// Multi-key sorts apply lexicographically in declared order; the first key
/// dominates. Offset skips rows before limit caps the result.
///
/// ## Example
///
/// ```rust
/// use latch_store::{FindOptions, SortDirection};
///
/// let opts = FindOptions::new()
///     .offset(3)
///     .limit(3)
///     .sort("price", SortDirection::Ascending);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub sort: Vec<SortSpec>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap on rows returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Rows to skip before returning.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Appends a sort key; call repeatedly for multi-key sorts.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortSpec {
            field: field.into(),
            direction,
        });
        self
    }

    /// Sorts a slice of documents in place according to the sort keys.
    pub fn apply_sort(&self, docs: &mut [Value]) {
        if self.sort.is_empty() {
            return;
        }
        docs.sort_by(|a, b| {
            for spec in &self.sort {
                let va = lookup_path(a, &spec.field).unwrap_or(&Value::Null);
                let vb = lookup_path(b, &spec.field).unwrap_or(&Value::Null);
                let ord = match spec.direction {
                    SortDirection::Ascending => compare_values(va, vb),
                    SortDirection::Descending => compare_values(vb, va),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    /// Applies offset and limit to an already-sorted document list.
    pub fn apply_page(&self, docs: Vec<Value>) -> Vec<Value> {
        let skip = self.offset.unwrap_or(0);
        let iter = docs.into_iter().skip(skip);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}
