use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Point-in-time read of external resource state.
///
/// A collection read that found nothing is `Records(vec![])`; a single-resource
/// read that found nothing is `Absent`. The two are kept apart so predicates
/// can tell "no entries" from "no such resource".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResourceSnapshot {
    Records(Vec<Value>),
    Record(Value),
    Absent,
}

impl ResourceSnapshot {
    pub fn is_absent(&self) -> bool {
        matches!(self, ResourceSnapshot::Absent)
    }

    /// The records visible to collection predicates. A single record is a
    /// one-element collection; absence is empty.
    pub fn members(&self) -> &[Value] {
        match self {
            ResourceSnapshot::Records(records) => records,
            ResourceSnapshot::Record(record) => std::slice::from_ref(record),
            ResourceSnapshot::Absent => &[],
        }
    }

    /// Short human-readable rendering used in failure explanations.
    pub fn describe(&self) -> String {
        match self {
            ResourceSnapshot::Records(records) => {
                format!("{} record(s): {}", records.len(), Value::Array(records.clone()))
            }
            ResourceSnapshot::Record(record) => format!("record: {record}"),
            ResourceSnapshot::Absent => "resource absent".to_string(),
        }
    }
}
