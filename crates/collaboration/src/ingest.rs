/// Remote-update ingestion
/// Refreshes the local model from the channel's current content. Never
/// touches history; changed fields are stamped as remote so a later undo
/// leaves them alone.
use project::{
    clip_changes, setting_changes, track_changes, Clip, ClipField, ClipId, FieldKey,
    ProjectState, Track, TrackField, TrackId,
};
use serde_json::Value;
use std::collections::HashSet;
use std::hash::Hash;
use tracing::{debug, warn};

use crate::{
    clip_id_of, decode_clip, decode_track, read_settings, Container, Result, Sequence,
    SharedStateChannel,
};

/// What one ingestion pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Fields stamped as remotely changed
    pub changed_fields: usize,
    /// Entries that could not be decoded
    pub skipped: usize,
    /// Whether the local container was replaced
    pub replaced: bool,
}

impl IngestOutcome {
    pub fn merge(&mut self, other: IngestOutcome) {
        self.changed_fields += other.changed_fields;
        self.skipped += other.skipped;
        self.replaced |= other.replaced;
    }
}

/// Re-reads `container` from `channel` into `state`. Running it again on the
/// same channel content is a no-op.
pub fn ingest(
    state: &mut ProjectState,
    channel: &dyn SharedStateChannel,
    container: Container,
) -> IngestOutcome {
    let outcome = match container {
        Container::Project => ingest_settings(state, channel),
        Container::Tracks => {
            let values = channel.sequence(Sequence::Tracks);
            ingest_sequence::<Track>(state, &values)
        }
        Container::Clips => {
            let values = channel.sequence(Sequence::Clips);
            ingest_sequence::<Clip>(state, &values)
        }
    };

    if outcome.replaced {
        debug!(
            %container,
            changed = outcome.changed_fields,
            skipped = outcome.skipped,
            "ingested remote state"
        );
    }
    outcome
}

fn ingest_settings(state: &mut ProjectState, channel: &dyn SharedStateChannel) -> IngestOutcome {
    let (settings, errors) = read_settings(channel, state.settings());
    for err in &errors {
        warn!("ignoring project value: {}", err);
    }

    let changed = setting_changes(state.settings(), &settings);
    let mut outcome = IngestOutcome {
        skipped: errors.len(),
        ..IngestOutcome::default()
    };
    if changed.is_empty() {
        return outcome;
    }

    outcome.changed_fields = changed.len();
    outcome.replaced = true;
    state.replace_settings(settings);
    state.stamp_remote(changed.into_iter().map(FieldKey::setting));
    outcome
}

/// A container entity the ingestion knows how to diff.
trait Ingestible: Clone + Sized {
    type Id: Copy + Eq + Hash + std::fmt::Display;

    const CONTAINER: Container;

    fn id(&self) -> Self::Id;
    fn decode(value: &Value) -> Result<Self>;
    fn id_of(value: &Value) -> Option<Self::Id>;
    fn local(state: &ProjectState) -> &[Self];
    fn changed_keys(old: &Self, new: &Self) -> Vec<FieldKey>;
    fn presence(id: Self::Id) -> FieldKey;
    fn replace(state: &mut ProjectState, entities: Vec<Self>);
}

impl Ingestible for Track {
    type Id = TrackId;

    const CONTAINER: Container = Container::Tracks;

    fn id(&self) -> TrackId {
        self.id
    }

    fn decode(value: &Value) -> Result<Self> {
        decode_track(value)
    }

    fn id_of(value: &Value) -> Option<TrackId> {
        crate::track_id_of(value)
    }

    fn local(state: &ProjectState) -> &[Self] {
        state.tracks()
    }

    fn changed_keys(old: &Self, new: &Self) -> Vec<FieldKey> {
        track_changes(old, new)
            .into_iter()
            .map(|field| FieldKey::track(new.id, field))
            .collect()
    }

    fn presence(id: TrackId) -> FieldKey {
        FieldKey::track(id, TrackField::Presence)
    }

    fn replace(state: &mut ProjectState, entities: Vec<Self>) {
        state.replace_tracks(entities);
    }
}

impl Ingestible for Clip {
    type Id = ClipId;

    const CONTAINER: Container = Container::Clips;

    fn id(&self) -> ClipId {
        self.id
    }

    fn decode(value: &Value) -> Result<Self> {
        decode_clip(value)
    }

    fn id_of(value: &Value) -> Option<ClipId> {
        clip_id_of(value)
    }

    fn local(state: &ProjectState) -> &[Self] {
        state.clips()
    }

    fn changed_keys(old: &Self, new: &Self) -> Vec<FieldKey> {
        clip_changes(old, new)
            .into_iter()
            .map(|field| FieldKey::clip(new.id, field))
            .collect()
    }

    fn presence(id: ClipId) -> FieldKey {
        FieldKey::clip(id, ClipField::Presence)
    }

    fn replace(state: &mut ProjectState, entities: Vec<Self>) {
        state.replace_clips(entities);
    }
}

fn ingest_sequence<T: Ingestible>(state: &mut ProjectState, values: &[Value]) -> IngestOutcome {
    let local = T::local(state);
    let find = |id: T::Id| local.iter().find(|e| e.id() == id);

    let mut next: Vec<T> = Vec::with_capacity(values.len());
    let mut seen: HashSet<T::Id> = HashSet::with_capacity(values.len());
    let mut keys = Vec::new();
    let mut skipped = 0;

    for value in values {
        let entity = match T::decode(value) {
            Ok(entity) => entity,
            Err(err) => {
                skipped += 1;
                // an unreadable entry must not wipe out what we have for it
                match T::id_of(value).and_then(find) {
                    Some(existing) => {
                        warn!("keeping local {} entry: {}", T::CONTAINER, err);
                        existing.clone()
                    }
                    None => {
                        warn!("skipping {} entry: {}", T::CONTAINER, err);
                        continue;
                    }
                }
            }
        };

        let id = entity.id();
        if !seen.insert(id) {
            warn!(%id, "duplicate {} entry ignored", T::CONTAINER);
            continue;
        }
        match find(id) {
            Some(existing) => keys.extend(T::changed_keys(existing, &entity)),
            None => keys.push(T::presence(id)),
        }
        next.push(entity);
    }

    for existing in local {
        if !seen.contains(&existing.id()) {
            keys.push(T::presence(existing.id()));
        }
    }

    let reordered = next.len() != local.len()
        || next.iter().zip(local).any(|(a, b)| a.id() != b.id());
    if keys.is_empty() && !reordered {
        return IngestOutcome {
            skipped,
            ..IngestOutcome::default()
        };
    }

    let changed_fields = keys.len();
    T::replace(state, next);
    state.stamp_remote(keys);
    IngestOutcome {
        changed_fields,
        skipped,
        replaced: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode_clip, encode_track, SharedDocument, KEY_BPM};
    use project::{ClipKind, ClipPayload, SettingField, TrackKind};
    use serde_json::json;

    fn shared_with_track() -> (ProjectState, SharedDocument, Track) {
        let mut state = ProjectState::new();
        let track = Track::new("Track 1", TrackKind::Midi);
        state.push_track(track.clone());
        let doc = SharedDocument::new();
        doc.push(Sequence::Tracks, vec![encode_track(&track).unwrap()]);
        (state, doc, track)
    }

    #[test]
    fn test_echo_changes_nothing() {
        let (mut state, doc, _) = shared_with_track();
        let revision = state.revision();

        let outcome = ingest(&mut state, &doc, Container::Tracks);

        assert_eq!(outcome, IngestOutcome::default());
        assert_eq!(state.revision(), revision);
        assert!(state.provenance().is_empty());
    }

    #[test]
    fn test_remote_field_is_stamped() {
        let (mut state, doc, mut track) = shared_with_track();
        track.name = "Bass".into();
        doc.delete(Sequence::Tracks, 0, 1);
        doc.insert(Sequence::Tracks, 0, vec![encode_track(&track).unwrap()]);

        let outcome = ingest(&mut state, &doc, Container::Tracks);

        assert!(outcome.replaced);
        assert_eq!(outcome.changed_fields, 1);
        assert_eq!(state.track(track.id).unwrap().name, "Bass");
        let key = FieldKey::track(track.id, TrackField::Name);
        assert_eq!(state.provenance().last_remote_write(&key), Some(state.revision()));
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let (mut state, doc, track) = shared_with_track();
        let clip = Clip::new(track.id, 0.0, 4.0, ClipPayload::empty(ClipKind::Midi));
        doc.push(Sequence::Clips, vec![encode_clip(&clip).unwrap()]);

        ingest(&mut state, &doc, Container::Clips);
        let revision = state.revision();
        let second = ingest(&mut state, &doc, Container::Clips);

        assert!(!second.replaced);
        assert_eq!(state.revision(), revision);
        assert_eq!(state.clip_count(), 1);
    }

    #[test]
    fn test_remote_delete_is_stamped() {
        let (mut state, doc, track) = shared_with_track();
        doc.delete(Sequence::Tracks, 0, 1);

        ingest(&mut state, &doc, Container::Tracks);

        assert_eq!(state.track_count(), 0);
        let key = FieldKey::track(track.id, TrackField::Presence);
        assert!(state.provenance().last_remote_write(&key).is_some());
    }

    #[test]
    fn test_undecodable_entry_keeps_local_copy() {
        let (mut state, doc, track) = shared_with_track();
        doc.delete(Sequence::Tracks, 0, 1);
        doc.push(
            Sequence::Tracks,
            vec![json!({ "id": track.id.to_string(), "volume": "loud" }), json!(42)],
        );

        let outcome = ingest(&mut state, &doc, Container::Tracks);

        assert_eq!(outcome.skipped, 2);
        assert_eq!(state.track_count(), 1);
        assert_eq!(state.track(track.id).unwrap().name, "Track 1");
    }

    #[test]
    fn test_remote_bpm() {
        let (mut state, doc, _) = shared_with_track();
        doc.set(KEY_BPM, json!(140.0));

        let outcome = ingest(&mut state, &doc, Container::Project);

        assert_eq!(outcome.changed_fields, 1);
        assert_eq!(state.bpm(), 140.0);
        assert!(state
            .provenance()
            .last_remote_write(&FieldKey::setting(SettingField::Bpm))
            .is_some());
    }
}
