/// Merge-safe restore
/// Builds the image a restore should install when remote participants may have
/// edited the project since the target snapshot was captured.
use project::{
    copy_clip, copy_track, Clip, ClipField, FieldKey, ProjectImage, ProjectSettings,
    ProjectState, SettingField, Track, TrackField, TrackId,
};
use std::collections::HashSet;
use tracing::debug;

use crate::{ConflictPolicy, Snapshot};

/// Computes the image to install for `target` given the live state.
///
/// With [`ConflictPolicy::PreserveRemote`] a field keeps its live value when a
/// remote participant wrote it after `target` was captured. Entities created
/// remotely since then survive, entities deleted remotely stay deleted, and a
/// track is kept while a surviving remote clip still lives on it.
pub fn reconcile(target: &Snapshot, live: &ProjectState, policy: ConflictPolicy) -> ProjectImage {
    match policy {
        ConflictPolicy::Overwrite => target.image().clone(),
        ConflictPolicy::PreserveRemote => Reconciler {
            since: target.revision(),
            live,
        }
        .merge(target.image()),
    }
}

struct Reconciler<'a> {
    since: u64,
    live: &'a ProjectState,
}

impl<'a> Reconciler<'a> {
    fn remote(&self, key: FieldKey) -> bool {
        self.live.provenance().changed_since(&key, self.since)
    }

    fn merge(&self, image: &ProjectImage) -> ProjectImage {
        let settings = self.merge_settings(&image.settings);
        let mut tracks = self.merge_tracks(&image.tracks);
        let clips = self.merge_clips(&image.clips, &mut tracks);

        ProjectImage::new(settings, tracks, clips, image.selection, image.loop_region)
    }

    fn merge_settings(&self, target: &ProjectSettings) -> ProjectSettings {
        let live = self.live.settings();
        let mut merged = target.clone();
        if self.remote(FieldKey::setting(SettingField::Name)) {
            merged.name = live.name.clone();
        }
        if self.remote(FieldKey::setting(SettingField::Bpm)) {
            merged.bpm = live.bpm;
        }
        if self.remote(FieldKey::setting(SettingField::TimeSignature)) {
            merged.time_signature = live.time_signature;
        }
        merged
    }

    fn merge_tracks(&self, target: &[Track]) -> Vec<Track> {
        let mut merged = Vec::with_capacity(target.len());
        for track in target {
            match self.live.track(track.id) {
                Some(live) => merged.push(self.merge_track(track, live)),
                None if self.remote(FieldKey::track(track.id, TrackField::Presence)) => {
                    debug!(track = %track.id, "track deleted remotely, not restoring it");
                }
                None => merged.push(copy_track(track)),
            }
        }

        let known: HashSet<TrackId> = target.iter().map(|t| t.id).collect();
        for (index, live) in self.live.tracks().iter().enumerate() {
            if known.contains(&live.id) {
                continue;
            }
            if self.remote(FieldKey::track(live.id, TrackField::Presence)) {
                debug!(track = %live.id, "keeping remotely created track");
                let at = index.min(merged.len());
                merged.insert(at, copy_track(live));
            }
        }
        merged
    }

    fn merge_track(&self, target: &Track, live: &Track) -> Track {
        let id = target.id;
        let remote = |field| self.remote(FieldKey::track(id, field));
        let mut merged = copy_track(target);
        if remote(TrackField::Name) {
            merged.name = live.name.clone();
        }
        if remote(TrackField::Kind) {
            merged.kind = live.kind;
        }
        if remote(TrackField::Volume) {
            merged.volume = live.volume;
        }
        if remote(TrackField::Muted) {
            merged.muted = live.muted;
        }
        if remote(TrackField::Solo) {
            merged.solo = live.solo;
        }
        if remote(TrackField::Color) {
            merged.color = live.color.clone();
        }
        if remote(TrackField::Effects) {
            merged.effects = copy_track(live).effects;
        }
        merged
    }

    fn merge_clips(&self, target: &[Clip], tracks: &mut Vec<Track>) -> Vec<Clip> {
        let mut merged = Vec::with_capacity(target.len());
        for clip in target {
            match self.live.clip(clip.id) {
                Some(live) => merged.push(self.merge_clip(clip, live)),
                None if self.remote(FieldKey::clip(clip.id, ClipField::Presence)) => {
                    debug!(clip = %clip.id, "clip deleted remotely, not restoring it");
                }
                None => merged.push(copy_clip(clip)),
            }
        }

        let known: HashSet<_> = target.iter().map(|c| c.id).collect();
        for (index, live) in self.live.clips().iter().enumerate() {
            if known.contains(&live.id) {
                continue;
            }
            if self.remote(FieldKey::clip(live.id, ClipField::Presence)) {
                let at = index.min(merged.len());
                merged.insert(at, copy_clip(live));
            }
        }

        let mut track_ids: HashSet<TrackId> = tracks.iter().map(|t| t.id).collect();
        merged.retain(|clip| {
            if track_ids.contains(&clip.track_id) {
                return true;
            }
            let remote_clip = self.remote(FieldKey::clip(clip.id, ClipField::Presence))
                || self.remote(FieldKey::clip(clip.id, ClipField::TrackId));
            match self.live.track(clip.track_id) {
                Some(owner) if remote_clip => {
                    debug!(track = %owner.id, clip = %clip.id, "remote clip pins its track");
                    track_ids.insert(owner.id);
                    tracks.push(copy_track(owner));
                    true
                }
                _ => {
                    debug!(clip = %clip.id, "dropping clip whose track is gone");
                    false
                }
            }
        });
        merged
    }

    fn merge_clip(&self, target: &Clip, live: &Clip) -> Clip {
        let id = target.id;
        let remote = |field| self.remote(FieldKey::clip(id, field));
        let mut merged = copy_clip(target);
        if remote(ClipField::TrackId) {
            merged.track_id = live.track_id;
        }
        if remote(ClipField::StartTime) {
            merged.start_time = live.start_time;
        }
        if remote(ClipField::Duration) {
            merged.duration = live.duration;
        }
        if remote(ClipField::Color) {
            merged.color = live.color.clone();
        }
        if remote(ClipField::Payload) {
            merged.payload = copy_clip(live).payload;
        }
        merged
    }
}
