/// In-process shared document
/// A plain replicated container: local writes are applied, forwarded to an
/// optional outbox for the transport, and announced to observers; remote
/// changes come back in through `apply_remote`.
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    CollaborationError, Container, ObserverFn, Result, Sequence, SharedStateChannel,
};

/// Complete document content; what the relay hands to late joiners
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocImage {
    #[serde(default)]
    pub tracks: Vec<Value>,
    #[serde(default)]
    pub clips: Vec<Value>,
    #[serde(default)]
    pub project: Map<String, Value>,
}

/// One primitive write on the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DocChange {
    Push {
        sequence: Sequence,
        items: Vec<Value>,
    },
    Insert {
        sequence: Sequence,
        index: usize,
        items: Vec<Value>,
    },
    Delete {
        sequence: Sequence,
        index: usize,
        count: usize,
    },
    Set {
        key: String,
        value: Value,
    },
}

impl DocChange {
    pub fn container(&self) -> Container {
        match self {
            DocChange::Push { sequence, .. }
            | DocChange::Insert { sequence, .. }
            | DocChange::Delete { sequence, .. } => (*sequence).into(),
            DocChange::Set { .. } => Container::Project,
        }
    }
}

impl DocImage {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty() && self.clips.is_empty() && self.project.is_empty()
    }

    pub fn sequence(&self, sequence: Sequence) -> &[Value] {
        match sequence {
            Sequence::Tracks => &self.tracks,
            Sequence::Clips => &self.clips,
        }
    }

    fn sequence_mut(&mut self, sequence: Sequence) -> &mut Vec<Value> {
        match sequence {
            Sequence::Tracks => &mut self.tracks,
            Sequence::Clips => &mut self.clips,
        }
    }

    /// Applies `change`. Inserts past the end are rejected; deletes are
    /// clamped to the sequence.
    pub fn apply(&mut self, change: &DocChange) -> Result<Container> {
        match change {
            DocChange::Push { sequence, items } => {
                self.sequence_mut(*sequence).extend(items.iter().cloned());
            }
            DocChange::Insert {
                sequence,
                index,
                items,
            } => {
                let target = self.sequence_mut(*sequence);
                if *index > target.len() {
                    return Err(CollaborationError::InvalidOp(format!(
                        "insert at {} into {} of length {}",
                        index,
                        sequence,
                        target.len()
                    )));
                }
                target.splice(*index..*index, items.iter().cloned());
            }
            DocChange::Delete {
                sequence,
                index,
                count,
            } => {
                let target = self.sequence_mut(*sequence);
                let start = (*index).min(target.len());
                let end = index.saturating_add(*count).min(target.len());
                target.drain(start..end);
            }
            DocChange::Set { key, value } => {
                self.project.insert(key.clone(), value.clone());
            }
        }
        Ok(change.container())
    }
}

struct DocumentInner {
    image: Mutex<DocImage>,
    observers: Mutex<Vec<(Container, ObserverFn)>>,
    outbox: Mutex<Option<mpsc::UnboundedSender<DocChange>>>,
}

/// Cheaply cloneable handle; clones share the same document.
#[derive(Clone)]
pub struct SharedDocument {
    inner: Arc<DocumentInner>,
}

impl Default for SharedDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDocument")
            .field("image", &*self.inner.image.lock())
            .finish()
    }
}

impl SharedDocument {
    pub fn new() -> Self {
        Self::from_image(DocImage::default())
    }

    pub fn from_image(image: DocImage) -> Self {
        Self {
            inner: Arc::new(DocumentInner {
                image: Mutex::new(image),
                observers: Mutex::new(Vec::new()),
                outbox: Mutex::new(None),
            }),
        }
    }

    pub fn image(&self) -> DocImage {
        self.inner.image.lock().clone()
    }

    /// Local changes are forwarded to `outbox` from now on.
    pub fn set_outbox(&self, outbox: mpsc::UnboundedSender<DocChange>) {
        *self.inner.outbox.lock() = Some(outbox);
    }

    pub fn clear_outbox(&self) {
        *self.inner.outbox.lock() = None;
    }

    /// Applies a change that originated elsewhere. Not forwarded.
    pub fn apply_remote(&self, change: &DocChange) -> Result<()> {
        let container = self.inner.image.lock().apply(change)?;
        self.notify(container);
        Ok(())
    }

    /// Replaces the whole content, e.g. with the image received on join.
    pub fn load(&self, image: DocImage) {
        *self.inner.image.lock() = image;
        for container in Container::ALL {
            self.notify(container);
        }
    }

    fn apply_local(&self, change: DocChange) {
        let container = match self.inner.image.lock().apply(&change) {
            Ok(container) => container,
            Err(err) => {
                warn!("rejected local change: {}", err);
                return;
            }
        };

        if let Some(outbox) = self.inner.outbox.lock().as_ref() {
            if outbox.send(change).is_err() {
                debug!("outbox closed, change stays local");
            }
        }
        self.notify(container);
    }

    fn notify(&self, container: Container) {
        // run callbacks outside the lock so they may read the document
        let observers: Vec<ObserverFn> = self
            .inner
            .observers
            .lock()
            .iter()
            .filter(|(c, _)| *c == container)
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in observers {
            callback();
        }
    }
}

impl SharedStateChannel for SharedDocument {
    fn sequence(&self, sequence: Sequence) -> Vec<Value> {
        self.inner.image.lock().sequence(sequence).to_vec()
    }

    fn push(&self, sequence: Sequence, items: Vec<Value>) {
        self.apply_local(DocChange::Push { sequence, items });
    }

    fn insert(&self, sequence: Sequence, index: usize, items: Vec<Value>) {
        self.apply_local(DocChange::Insert {
            sequence,
            index,
            items,
        });
    }

    fn delete(&self, sequence: Sequence, index: usize, count: usize) {
        self.apply_local(DocChange::Delete {
            sequence,
            index,
            count,
        });
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.inner.image.lock().project.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.apply_local(DocChange::Set {
            key: key.to_string(),
            value,
        });
    }

    fn observe(&self, container: Container, callback: ObserverFn) {
        self.inner.observers.lock().push((container, callback));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_sequence_primitives() {
        let doc = SharedDocument::new();
        doc.push(Sequence::Tracks, vec![json!({ "id": "a" }), json!({ "id": "c" })]);
        doc.insert(Sequence::Tracks, 1, vec![json!({ "id": "b" })]);
        doc.delete(Sequence::Tracks, 0, 1);

        let ids: Vec<_> = doc
            .sequence(Sequence::Tracks)
            .iter()
            .map(|v| v["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(doc.sequence(Sequence::Clips).is_empty());
    }

    #[test]
    fn test_observers_fire_per_container() {
        let doc = SharedDocument::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        doc.observe(
            Container::Project,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        doc.set("bpm", json!(128.0));
        doc.push(Sequence::Clips, vec![json!({ "id": "x" })]);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(doc.get("bpm"), Some(json!(128.0)));
    }

    #[test]
    fn test_observer_may_read_document() {
        let doc = SharedDocument::new();
        let reader = doc.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_callback = seen.clone();
        doc.observe(
            Container::Tracks,
            Arc::new(move || {
                let len = reader.sequence(Sequence::Tracks).len();
                seen_in_callback.store(len, Ordering::SeqCst);
            }),
        );

        doc.push(Sequence::Tracks, vec![json!({ "id": "a" }), json!({ "id": "b" })]);

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_local_changes_reach_outbox_remote_do_not() {
        let doc = SharedDocument::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        doc.set_outbox(tx);

        doc.set("name", json!("Demo"));
        doc.apply_remote(&DocChange::Set {
            key: "bpm".into(),
            value: json!(90.0),
        })
        .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            DocChange::Set {
                key: "name".into(),
                value: json!("Demo")
            }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(doc.get("bpm"), Some(json!(90.0)));
    }

    #[test]
    fn test_insert_out_of_range_is_rejected() {
        let mut image = DocImage::default();
        let change = DocChange::Insert {
            sequence: Sequence::Clips,
            index: 3,
            items: vec![json!({})],
        };

        assert!(image.apply(&change).is_err());
        assert!(image.clips.is_empty());
    }

    #[test]
    fn test_delete_is_clamped() {
        let mut image = DocImage::default();
        image.tracks = vec![json!(1), json!(2)];

        image
            .apply(&DocChange::Delete {
                sequence: Sequence::Tracks,
                index: 1,
                count: 10,
            })
            .unwrap();

        assert_eq!(image.tracks, vec![json!(1)]);
    }

    #[test]
    fn test_change_wire_format() {
        let change = DocChange::Delete {
            sequence: Sequence::Tracks,
            index: 2,
            count: 1,
        };
        let value = serde_json::to_value(&change).unwrap();

        assert_eq!(value["op"], "delete");
        assert_eq!(value["sequence"], "tracks");
        assert_eq!(serde_json::from_value::<DocChange>(value).unwrap(), change);
    }
}
