use serde_json::Value;

use crate::error::{invalid_argument, LiveResult};

/// A change pushed by the backend for one subscribed query.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteEvent {
    Added { index: usize, data: Value },
    Removed { ids: Vec<Value> },
    Changed { id: Value, data: Value },
}

impl RemoteEvent {
    /// Decodes a pushed `(action, arguments)` message.
    ///
    /// `added` carries `[index, row]`, `removed` carries `[ids]` and
    /// `changed` carries `[id, attributes]`.
    pub fn from_action(action: &str, arguments: &Value) -> LiveResult<Self> {
        let malformed =
            |err: serde_json::Error| invalid_argument(format!("malformed `{action}` event: {err}"));
        match action {
            "added" => {
                let (index, data): (usize, Value) =
                    serde_json::from_value(arguments.clone()).map_err(malformed)?;
                Ok(RemoteEvent::Added { index, data })
            }
            "removed" => {
                let (ids,): (Vec<Value>,) =
                    serde_json::from_value(arguments.clone()).map_err(malformed)?;
                Ok(RemoteEvent::Removed { ids })
            }
            "changed" => {
                let (id, data): (Value, Value) =
                    serde_json::from_value(arguments.clone()).map_err(malformed)?;
                Ok(RemoteEvent::Changed { id, data })
            }
            other => Err(invalid_argument(format!("unknown remote action `{other}`"))),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            RemoteEvent::Added { .. } => "added",
            RemoteEvent::Removed { .. } => "removed",
            RemoteEvent::Changed { .. } => "changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_each_action() {
        assert_eq!(
            RemoteEvent::from_action("added", &json!([2, {"_id": 9}])).unwrap(),
            RemoteEvent::Added {
                index: 2,
                data: json!({"_id": 9})
            }
        );
        assert_eq!(
            RemoteEvent::from_action("removed", &json!([[1, 2]])).unwrap(),
            RemoteEvent::Removed {
                ids: vec![json!(1), json!(2)]
            }
        );
        let changed = RemoteEvent::from_action("changed", &json!([1, {"title": "x"}])).unwrap();
        assert_eq!(changed.action(), "changed");
    }

    #[test]
    fn rejects_unknown_or_malformed_actions() {
        assert!(RemoteEvent::from_action("moved", &json!([])).is_err());
        assert!(RemoteEvent::from_action("added", &json!({"index": 1})).is_err());
    }
}
