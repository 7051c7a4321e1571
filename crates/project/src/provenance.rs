/// Remote-provenance bookkeeping
/// Records the local revision at which a remote participant last changed a field,
/// so history restores can tell remote edits apart from local ones.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Clip, ClipId, ProjectSettings, Track, TrackId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingField {
    Name,
    Bpm,
    TimeSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackField {
    /// The track was created or deleted
    Presence,
    Name,
    Kind,
    Volume,
    Muted,
    Solo,
    Color,
    Effects,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipField {
    /// The clip was created or deleted
    Presence,
    TrackId,
    StartTime,
    Duration,
    Color,
    Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum FieldKey {
    Setting { field: SettingField },
    Track { id: TrackId, field: TrackField },
    Clip { id: ClipId, field: ClipField },
}

impl FieldKey {
    pub fn setting(field: SettingField) -> Self {
        FieldKey::Setting { field }
    }

    pub fn track(id: TrackId, field: TrackField) -> Self {
        FieldKey::Track { id, field }
    }

    pub fn clip(id: ClipId, field: ClipField) -> Self {
        FieldKey::Clip { id, field }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteProvenance {
    stamps: HashMap<FieldKey, u64>,
}

impl RemoteProvenance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&mut self, key: FieldKey, revision: u64) {
        let entry = self.stamps.entry(key).or_insert(revision);
        *entry = (*entry).max(revision);
    }

    pub fn last_remote_write(&self, key: &FieldKey) -> Option<u64> {
        self.stamps.get(key).copied()
    }

    /// True if a remote participant wrote `key` after `revision`
    pub fn changed_since(&self, key: &FieldKey, revision: u64) -> bool {
        self.last_remote_write(key)
            .map(|stamped| stamped > revision)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn clear(&mut self) {
        self.stamps.clear();
    }
}

pub fn setting_changes(old: &ProjectSettings, new: &ProjectSettings) -> Vec<SettingField> {
    let mut fields = Vec::new();
    if old.name != new.name {
        fields.push(SettingField::Name);
    }
    if old.bpm != new.bpm {
        fields.push(SettingField::Bpm);
    }
    if old.time_signature != new.time_signature {
        fields.push(SettingField::TimeSignature);
    }
    fields
}

pub fn track_changes(old: &Track, new: &Track) -> Vec<TrackField> {
    let mut fields = Vec::new();
    if old.name != new.name {
        fields.push(TrackField::Name);
    }
    if old.kind != new.kind {
        fields.push(TrackField::Kind);
    }
    if old.volume != new.volume {
        fields.push(TrackField::Volume);
    }
    if old.muted != new.muted {
        fields.push(TrackField::Muted);
    }
    if old.solo != new.solo {
        fields.push(TrackField::Solo);
    }
    if old.color != new.color {
        fields.push(TrackField::Color);
    }
    if old.effects != new.effects {
        fields.push(TrackField::Effects);
    }
    fields
}

pub fn clip_changes(old: &Clip, new: &Clip) -> Vec<ClipField> {
    let mut fields = Vec::new();
    if old.track_id != new.track_id {
        fields.push(ClipField::TrackId);
    }
    if old.start_time != new.start_time {
        fields.push(ClipField::StartTime);
    }
    if old.duration != new.duration {
        fields.push(ClipField::Duration);
    }
    if old.color != new.color {
        fields.push(ClipField::Color);
    }
    if old.payload != new.payload {
        fields.push(ClipField::Payload);
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TrackKind, TrackUpdate};

    #[test]
    fn test_stamp_keeps_latest_revision() {
        let mut provenance = RemoteProvenance::new();
        let key = FieldKey::setting(SettingField::Bpm);

        provenance.stamp(key, 7);
        provenance.stamp(key, 3);

        assert_eq!(provenance.last_remote_write(&key), Some(7));
        assert!(provenance.changed_since(&key, 6));
        assert!(!provenance.changed_since(&key, 7));
        assert!(!provenance.changed_since(&FieldKey::setting(SettingField::Name), 0));
    }

    #[test]
    fn test_track_changes_lists_fields() {
        let old = Track::new("Keys", TrackKind::Midi);
        let mut new = old.clone();
        TrackUpdate::muted(true).with_volume(0.3).apply(&mut new);

        assert_eq!(
            track_changes(&old, &new),
            vec![TrackField::Volume, TrackField::Muted]
        );
        assert!(track_changes(&old, &old).is_empty());
    }
}
