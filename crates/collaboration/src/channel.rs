/// Contract with the replicated store shared by all participants
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Project map keys
pub const KEY_NAME: &str = "name";
pub const KEY_BPM: &str = "bpm";
pub const KEY_TIME_SIGNATURE: &str = "timeSignature";

/// Ordered containers in the shared document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sequence {
    Tracks,
    Clips,
}

/// Anything an observer can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Project,
    Tracks,
    Clips,
}

impl Container {
    pub const ALL: [Container; 3] = [Container::Project, Container::Tracks, Container::Clips];
}

impl From<Sequence> for Container {
    fn from(sequence: Sequence) -> Self {
        match sequence {
            Sequence::Tracks => Container::Tracks,
            Sequence::Clips => Container::Clips,
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Container::from(*self))
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Container::Project => write!(f, "project"),
            Container::Tracks => write!(f, "tracks"),
            Container::Clips => write!(f, "clips"),
        }
    }
}

/// Change callback. Invoked with no arguments for local and remote changes
/// alike, so listeners must re-read the container.
pub type ObserverFn = Arc<dyn Fn() + Send + Sync>;

/// Replicated store of two ordered sequences and one key/value map.
///
/// Merging concurrent writes is the implementation's business; callers only
/// see the converged content and change notifications.
pub trait SharedStateChannel: Send + Sync {
    /// Current content of a sequence, in order
    fn sequence(&self, sequence: Sequence) -> Vec<Value>;

    fn push(&self, sequence: Sequence, items: Vec<Value>);

    fn insert(&self, sequence: Sequence, index: usize, items: Vec<Value>);

    fn delete(&self, sequence: Sequence, index: usize, count: usize);

    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value);

    fn observe(&self, container: Container, callback: ObserverFn);
}

/// Position of the entry whose `"id"` equals `id`
pub fn position_of(items: &[Value], id: &str) -> Option<usize> {
    items.iter().position(|item| entry_id(item) == Some(id))
}

pub fn entry_id(item: &Value) -> Option<&str> {
    item.get("id").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_position_by_id() {
        let items = vec![json!({ "id": "a" }), json!({ "name": "no id" }), json!({ "id": "b" })];

        assert_eq!(position_of(&items, "b"), Some(2));
        assert_eq!(position_of(&items, "c"), None);
        assert_eq!(entry_id(&items[1]), None);
    }

    #[test]
    fn test_container_names() {
        assert_eq!(Container::from(Sequence::Clips), Container::Clips);
        assert_eq!(Sequence::Tracks.to_string(), "tracks");
        assert_eq!(serde_json::to_value(Container::Project).unwrap(), "project");
    }
}
