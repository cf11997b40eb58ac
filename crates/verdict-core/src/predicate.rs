use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, VerdictError};
use crate::snapshot::ResourceSnapshot;

// ---------------------------------------------------------------------------
// FieldPath
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A dotted/indexed path into a JSON record, e.g. `capacity.desired` or
/// `listeners[0].portRange`.
///
/// Parsing happens once at construction; a malformed path is a
/// configuration error, never a runtime mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| VerdictError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(invalid("path is empty"));
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(invalid("empty path segment"));
            }
            let (key, mut rest) = match part.find('[') {
                Some(i) => (&part[..i], &part[i..]),
                None => (part, ""),
            };
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }
            while !rest.is_empty() {
                let Some(open) = rest.strip_prefix('[') else {
                    return Err(invalid("unexpected characters after index"));
                };
                let Some(end) = open.find(']') else {
                    return Err(invalid("unclosed '['"));
                };
                let index = open[..end]
                    .parse::<usize>()
                    .map_err(|_| invalid("index must be a non-negative integer"))?;
                segments.push(Segment::Index(index));
                rest = &open[end + 1..];
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Walk the path; `None` when any segment is missing or has the wrong shape.
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| match segment {
                Segment::Key(key) => current.as_object()?.get(key),
                Segment::Index(i) => current.as_array()?.get(*i),
            })
    }
}

impl TryFrom<String> for FieldPath {
    type Error = VerdictError;

    fn try_from(raw: String) -> Result<Self> {
        FieldPath::parse(&raw)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.raw
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ---------------------------------------------------------------------------
// Value comparison
// ---------------------------------------------------------------------------

/// Type-aware equality: numbers compare numerically, a number never equals a
/// string.
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => match (a.as_u64(), b.as_u64()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_f64() == b.as_f64(),
            },
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => actual == expected,
    }
}

/// First key of `expected` that `actual` does not satisfy, or `None` when
/// `actual` is a superset. Nested objects are compared as subsets too.
fn subset_mismatch(actual: &Map<String, Value>, expected: &Map<String, Value>) -> Option<String> {
    for (key, want) in expected {
        match (actual.get(key), want) {
            (None, _) => return Some(format!("missing key '{key}'")),
            (Some(Value::Object(have)), Value::Object(want_obj)) => {
                if let Some(inner) = subset_mismatch(have, want_obj) {
                    return Some(format!("{key}.{inner}"));
                }
            }
            (Some(have), _) => {
                if !values_equal(have, want) {
                    return Some(format!("'{key}' is {have}, expected {want}"));
                }
            }
        }
    }
    None
}

fn value_contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(have), Value::String(want)) => have.contains(want.as_str()),
        (Value::Array(items), _) => items.iter().any(|item| {
            values_equal(item, expected)
                || matches!((item, expected), (Value::Object(_), Value::Object(_)) if value_contains(item, expected))
        }),
        (Value::Object(have), Value::Object(want)) => subset_mismatch(have, want).is_none(),
        _ => values_equal(actual, expected),
    }
}

// ---------------------------------------------------------------------------
// MatchResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    pub explanation: String,
}

impl MatchResult {
    pub fn pass(explanation: impl Into<String>) -> Self {
        Self {
            matched: true,
            explanation: explanation.into(),
        }
    }

    pub fn fail(explanation: impl Into<String>) -> Self {
        Self {
            matched: false,
            explanation: explanation.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// One rule evaluated against a snapshot.
///
/// Record-level variants (`FieldEquals`, `FieldContains`, `SubsetMatch`,
/// `ContainsGroup`) applied to a collection match when any member matches.
/// Every variant except the two exclusions fails on an empty or absent
/// snapshot; `CollectionExcludes` and `CollectionExcludesContaining` pass on
/// both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    FieldEquals { path: FieldPath, value: Value },
    FieldContains { path: FieldPath, value: Value },
    SubsetMatch { expected: Map<String, Value> },
    ContainsGroup { predicates: Vec<Predicate> },
    CollectionContains { field: FieldPath, value: Value },
    CollectionExcludes { field: FieldPath, value: Value },
    /// No record's `field` contains `value`, e.g. no instance name carries a
    /// deleted group's name as a prefix.
    CollectionExcludesContaining { field: FieldPath, value: Value },
}

impl Predicate {
    pub fn field_equals(path: &str, value: impl Into<Value>) -> Result<Self> {
        Ok(Predicate::FieldEquals {
            path: FieldPath::parse(path)?,
            value: value.into(),
        })
    }

    pub fn field_contains(path: &str, value: impl Into<Value>) -> Result<Self> {
        Ok(Predicate::FieldContains {
            path: FieldPath::parse(path)?,
            value: value.into(),
        })
    }

    pub fn subset(expected: Map<String, Value>) -> Self {
        Predicate::SubsetMatch { expected }
    }

    pub fn group(predicates: Vec<Predicate>) -> Self {
        Predicate::ContainsGroup { predicates }
    }

    pub fn collection_contains(field: &str, value: impl Into<Value>) -> Result<Self> {
        Ok(Predicate::CollectionContains {
            field: FieldPath::parse(field)?,
            value: value.into(),
        })
    }

    pub fn collection_excludes(field: &str, value: impl Into<Value>) -> Result<Self> {
        Ok(Predicate::CollectionExcludes {
            field: FieldPath::parse(field)?,
            value: value.into(),
        })
    }

    pub fn collection_excludes_containing(field: &str, value: impl Into<Value>) -> Result<Self> {
        Ok(Predicate::CollectionExcludesContaining {
            field: FieldPath::parse(field)?,
            value: value.into(),
        })
    }

    /// The field, value and relation of an exclusion; `None` for other variants.
    fn exclusion(&self) -> Option<(&FieldPath, &Value, &'static str)> {
        match self {
            Predicate::CollectionExcludes { field, value } => Some((field, value, "==")),
            Predicate::CollectionExcludesContaining { field, value } => {
                Some((field, value, "contains"))
            }
            _ => None,
        }
    }

    fn offends(&self, record: &Value) -> bool {
        match self {
            Predicate::CollectionExcludes { field, value } => {
                field.resolve(record).is_some_and(|have| values_equal(have, value))
            }
            Predicate::CollectionExcludesContaining { field, value } => {
                field.resolve(record).is_some_and(|have| value_contains(have, value))
            }
            _ => false,
        }
    }

    /// Evaluate against one record.
    pub fn evaluate_record(&self, record: &Value) -> MatchResult {
        match self {
            Predicate::FieldEquals { path, value } | Predicate::CollectionContains { field: path, value } => {
                match path.resolve(record) {
                    None => MatchResult::fail(format!("field '{path}' not present")),
                    Some(have) if values_equal(have, value) => {
                        MatchResult::pass(format!("'{path}' == {value}"))
                    }
                    Some(have) => MatchResult::fail(format!("'{path}' is {have}, expected {value}")),
                }
            }
            Predicate::FieldContains { path, value } => match path.resolve(record) {
                None => MatchResult::fail(format!("field '{path}' not present")),
                Some(have) if value_contains(have, value) => {
                    MatchResult::pass(format!("'{path}' contains {value}"))
                }
                Some(have) => {
                    MatchResult::fail(format!("'{path}' is {have}, which does not contain {value}"))
                }
            },
            Predicate::SubsetMatch { expected } => match record.as_object() {
                None => MatchResult::fail(format!("record is not an object: {record}")),
                Some(have) => match subset_mismatch(have, expected) {
                    None => MatchResult::pass("record contains expected subset"),
                    Some(reason) => MatchResult::fail(format!("subset mismatch: {reason}")),
                },
            },
            Predicate::ContainsGroup { predicates } => {
                for predicate in predicates {
                    let result = predicate.evaluate_record(record);
                    if !result.matched {
                        return result;
                    }
                }
                MatchResult::pass("record satisfies every predicate in the group")
            }
            Predicate::CollectionExcludes { field, value }
            | Predicate::CollectionExcludesContaining { field, value } => {
                let relation = if matches!(self, Predicate::CollectionExcludes { .. }) {
                    "=="
                } else {
                    "contains"
                };
                if self.offends(record) {
                    MatchResult::fail(format!("record has '{field}' {relation} {value}"))
                } else {
                    MatchResult::pass(format!("record does not have '{field}' {relation} {value}"))
                }
            }
        }
    }

    /// Evaluate against a whole snapshot.
    pub fn evaluate(&self, snapshot: &ResourceSnapshot) -> MatchResult {
        if let Some((field, value, relation)) = self.exclusion() {
            return match snapshot {
                ResourceSnapshot::Absent => {
                    MatchResult::pass("resource absent; nothing to exclude")
                }
                _ => match snapshot.members().iter().position(|r| self.offends(r)) {
                    Some(i) => MatchResult::fail(format!(
                        "record[{i}] has '{field}' {relation} {value}, expected none"
                    )),
                    None => {
                        MatchResult::pass(format!("no record has '{field}' {relation} {value}"))
                    }
                },
            };
        }

        match snapshot {
            ResourceSnapshot::Absent => MatchResult::fail(format!("resource absent; expected {self}")),
            ResourceSnapshot::Record(record) => self.evaluate_record(record),
            ResourceSnapshot::Records(records) if records.is_empty() => {
                MatchResult::fail(format!("collection is empty; expected {self}"))
            }
            ResourceSnapshot::Records(records) => {
                let mut last_miss = None;
                for (i, record) in records.iter().enumerate() {
                    let result = self.evaluate_record(record);
                    if result.matched {
                        return MatchResult::pass(format!("record[{i}]: {}", result.explanation));
                    }
                    last_miss = Some(result.explanation);
                }
                MatchResult::fail(format!(
                    "none of {} record(s) matched {self} (last: {})",
                    records.len(),
                    last_miss.unwrap_or_default()
                ))
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::FieldEquals { path, value } => write!(f, "{path} == {value}"),
            Predicate::FieldContains { path, value } => write!(f, "{path} contains {value}"),
            Predicate::SubsetMatch { expected } => {
                write!(f, "subset of {}", Value::Object(expected.clone()))
            }
            Predicate::ContainsGroup { predicates } => {
                let parts: Vec<String> = predicates.iter().map(|p| p.to_string()).collect();
                write!(f, "a record where ({})", parts.join(" AND "))
            }
            Predicate::CollectionContains { field, value } => {
                write!(f, "an entry with {field} == {value}")
            }
            Predicate::CollectionExcludes { field, value } => {
                write!(f, "no entry with {field} == {value}")
            }
            Predicate::CollectionExcludesContaining { field, value } => {
                write!(f, "no entry whose {field} contains {value}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
