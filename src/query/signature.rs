use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::{json, Map, Value};

use crate::error::{invalid_argument, LiveResult};

/// Filter, skip and limit of one remote query, compared structurally.
///
/// Object keys are sorted at every depth and a zero skip is dropped, so
/// two signatures built from equivalent parameters are equal and hash
/// alike no matter how their maps were assembled.
#[derive(Clone)]
pub struct QuerySignature {
    filter: Map<String, Value>,
    skip: Option<u64>,
    limit: Option<u64>,
    canonical: String,
}

impl QuerySignature {
    pub fn new(filter: Map<String, Value>, skip: Option<u64>, limit: Option<u64>) -> Self {
        let skip = skip.filter(|skip| *skip != 0);
        let filter = match canonicalize(Value::Object(filter)) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let canonical = json!([Value::Object(filter.clone()), skip, limit]).to_string();
        Self {
            filter,
            skip,
            limit,
            canonical,
        }
    }

    /// Accepts an object or `null` filter.
    pub fn from_value(filter: Value, skip: Option<u64>, limit: Option<u64>) -> LiveResult<Self> {
        match filter {
            Value::Object(map) => Ok(Self::new(map, skip, limit)),
            Value::Null => Ok(Self::new(Map::new(), skip, limit)),
            other => Err(invalid_argument(format!(
                "query filter must be an object, got {other}"
            ))),
        }
    }

    pub fn filter(&self) -> &Map<String, Value> {
        &self.filter
    }

    pub fn skip(&self) -> Option<u64> {
        self.skip
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Stable string form, `[filter, skip, limit]`.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// The `[filter, skip, limit]` triple handed to the transport.
    pub fn to_value(&self) -> Value {
        json!([Value::Object(self.filter.clone()), self.skip, self.limit])
    }
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|left, right| left.0.cmp(&right.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, canonicalize(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

impl PartialEq for QuerySignature {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for QuerySignature {}

impl Hash for QuerySignature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Debug for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("QuerySignature").field(&self.canonical).finish()
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn key_order_does_not_matter() {
        let mut first = Map::new();
        first.insert("status".into(), json!("open"));
        first.insert("owner".into(), json!({"name": "ada", "id": 7}));
        let mut second = Map::new();
        second.insert("owner".into(), json!({"id": 7, "name": "ada"}));
        second.insert("status".into(), json!("open"));

        let a = QuerySignature::new(first, None, Some(10));
        let b = QuerySignature::new(second, None, Some(10));
        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn zero_skip_is_absent() {
        let filter = object(json!({"status": "open"}));
        let a = QuerySignature::new(filter.clone(), Some(0), None);
        let b = QuerySignature::new(filter, None, None);
        assert_eq!(a, b);
        assert_eq!(a.skip(), None);
    }

    #[test]
    fn skip_and_limit_are_part_of_the_key() {
        let filter = object(json!({"status": "open"}));
        let limited = QuerySignature::new(filter.clone(), None, Some(1));
        let skipped = QuerySignature::new(filter, Some(1), None);
        assert_ne!(limited, skipped);
    }

    #[test]
    fn wire_form_is_a_triple() {
        let signature = QuerySignature::new(object(json!({"status": "open"})), None, None);
        assert_eq!(signature.to_value(), json!([{"status": "open"}, null, null]));
    }

    #[test]
    fn rejects_non_object_filters() {
        assert!(QuerySignature::from_value(json!([1, 2]), None, None).is_err());
        assert!(QuerySignature::from_value(Value::Null, None, None).is_ok());
    }
}
