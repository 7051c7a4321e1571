/// Writes local state into the shared channel.
///
/// Entities are addressed by their `"id"` rather than by local index, since
/// remote participants may have reordered or resized the shared sequence.
use project::ProjectSettings;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{encode_settings, entry_id, position_of, Result, Sequence, SharedStateChannel};

pub fn push_entry(channel: &dyn SharedStateChannel, sequence: Sequence, value: Value) {
    channel.push(sequence, vec![value]);
}

/// Replaces the entry with `id`, appending it if the channel does not have it.
pub fn replace_entry(channel: &dyn SharedStateChannel, sequence: Sequence, id: &str, value: Value) {
    match position_of(&channel.sequence(sequence), id) {
        Some(index) => {
            channel.delete(sequence, index, 1);
            channel.insert(sequence, index, vec![value]);
        }
        None => {
            debug!(%sequence, id, "entry missing from channel, appending");
            channel.push(sequence, vec![value]);
        }
    }
}

pub fn delete_entry(channel: &dyn SharedStateChannel, sequence: Sequence, id: &str) -> bool {
    match position_of(&channel.sequence(sequence), id) {
        Some(index) => {
            channel.delete(sequence, index, 1);
            true
        }
        None => {
            debug!(%sequence, id, "entry already gone from channel");
            false
        }
    }
}

/// Brings `sequence` to exactly `desired` with the fewest id-addressed
/// writes: entries missing from `desired` are deleted, changed ones replaced,
/// new ones inserted in place. Returns the number of writes issued.
pub fn reconcile_sequence(
    channel: &dyn SharedStateChannel,
    sequence: Sequence,
    desired: &[Value],
) -> usize {
    let mut current = channel.sequence(sequence);
    let mut writes = 0;

    let wanted: Vec<&str> = desired.iter().filter_map(entry_id).collect();
    for index in (0..current.len()).rev() {
        let keep = entry_id(&current[index])
            .map(|id| wanted.contains(&id))
            .unwrap_or(false);
        if !keep {
            channel.delete(sequence, index, 1);
            current.remove(index);
            writes += 1;
        }
    }

    for (index, value) in desired.iter().enumerate() {
        if current.get(index) == Some(value) {
            continue;
        }

        let found = entry_id(value).and_then(|id| position_of(&current, id));
        match found {
            Some(at) => {
                channel.delete(sequence, at, 1);
                current.remove(at);
                writes += 1;
            }
            None if entry_id(value).is_none() => {
                warn!(%sequence, "mirroring entry without id");
            }
            None => {}
        }

        let at = index.min(current.len());
        channel.insert(sequence, at, vec![value.clone()]);
        current.insert(at, value.clone());
        writes += 1;
    }

    if current.len() > desired.len() {
        let extra = current.len() - desired.len();
        channel.delete(sequence, desired.len(), extra);
        writes += 1;
    }

    writes
}

/// Writes every project map key whose value differs from `settings`.
pub fn reconcile_settings(
    channel: &dyn SharedStateChannel,
    settings: &ProjectSettings,
) -> Result<usize> {
    let mut writes = 0;
    for (key, value) in encode_settings(settings)? {
        if channel.get(key).as_ref() != Some(&value) {
            channel.set(key, value);
            writes += 1;
        }
    }
    Ok(writes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SharedDocument;
    use serde_json::json;

    fn ids(doc: &SharedDocument) -> Vec<String> {
        doc.sequence(Sequence::Tracks)
            .iter()
            .map(|v| v["id"].as_str().unwrap_or("?").to_string())
            .collect()
    }

    #[test]
    fn test_replace_by_id_after_remote_reorder() {
        let doc = SharedDocument::new();
        doc.push(
            Sequence::Tracks,
            vec![json!({ "id": "b", "v": 1 }), json!({ "id": "a", "v": 1 })],
        );

        replace_entry(&doc, Sequence::Tracks, "a", json!({ "id": "a", "v": 2 }));

        assert_eq!(doc.sequence(Sequence::Tracks)[1], json!({ "id": "a", "v": 2 }));
        assert_eq!(ids(&doc), vec!["b", "a"]);
    }

    #[test]
    fn test_delete_missing_entry() {
        let doc = SharedDocument::new();
        assert!(!delete_entry(&doc, Sequence::Clips, "zzz"));
    }

    #[test]
    fn test_reconcile_reaches_desired() {
        let doc = SharedDocument::new();
        doc.push(
            Sequence::Tracks,
            vec![
                json!({ "id": "a", "v": 1 }),
                json!({ "id": "b", "v": 1 }),
                json!({ "noid": true }),
                json!({ "id": "c", "v": 1 }),
            ],
        );
        let desired = vec![
            json!({ "id": "c", "v": 1 }),
            json!({ "id": "a", "v": 2 }),
            json!({ "id": "d", "v": 1 }),
        ];

        let writes = reconcile_sequence(&doc, Sequence::Tracks, &desired);

        assert_eq!(doc.sequence(Sequence::Tracks), desired);
        assert!(writes > 0);
        assert_eq!(reconcile_sequence(&doc, Sequence::Tracks, &desired), 0);
    }

    #[test]
    fn test_reconcile_settings_writes_only_differences() {
        let doc = SharedDocument::new();
        let settings = ProjectSettings::default();

        assert_eq!(reconcile_settings(&doc, &settings).unwrap(), 3);
        assert_eq!(reconcile_settings(&doc, &settings).unwrap(), 0);
        assert_eq!(doc.get("bpm"), Some(json!(120.0)));
    }
}
