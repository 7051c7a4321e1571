use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    Beats, Clip, ClipId, ClipUpdate, FieldKey, ProjectImage, RemoteProvenance, Result, Track,
    TrackId, TrackUpdate,
};

pub const DEFAULT_PROJECT_NAME: &str = "Untitled Project";
pub const DEFAULT_BPM: f64 = 120.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl TimeSignature {
    pub const fn new(numerator: u8, denominator: u8) -> Self {
        Self {
            numerator,
            denominator,
        }
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// Project-wide values shared with every participant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    pub name: String,
    pub bpm: f64,
    pub time_signature: TimeSignature,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROJECT_NAME.to_string(),
            bpm: DEFAULT_BPM,
            time_signature: TimeSignature::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub track: Option<TrackId>,
    pub clip: Option<ClipId>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopRegion {
    pub enabled: bool,
    pub start: Beats,
    pub end: Beats,
}

impl Default for LoopRegion {
    fn default() -> Self {
        Self {
            enabled: false,
            start: 0.0,
            end: 16.0,
        }
    }
}

/// Playback state; local to this participant and never captured in history
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transport {
    pub playing: bool,
    pub position: Beats,
}

/// Live, mutable project state for one participant.
///
/// The methods here are raw primitives: they never consult history or the
/// shared channel. Application code goes through the collaboration gateway.
/// Every mutation bumps [`ProjectState::revision`].
#[derive(Debug, Clone, Default)]
pub struct ProjectState {
    settings: ProjectSettings,
    tracks: Vec<Track>,
    clips: Vec<Clip>,
    selection: Selection,
    loop_region: LoopRegion,
    transport: Transport,
    revision: u64,
    provenance: RemoteProvenance,
}

impl ProjectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: ProjectSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn bpm(&self) -> f64 {
        self.settings.bpm
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.settings.time_signature
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == id)
    }

    pub fn track_index(&self, id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }

    pub fn clip_index(&self, id: ClipId) -> Option<usize> {
        self.clips.iter().position(|c| c.id == id)
    }

    pub fn track_clips(&self, track_id: TrackId) -> impl Iterator<Item = &Clip> {
        self.clips.iter().filter(move |c| c.track_id == track_id)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn selected_track(&self) -> Option<&Track> {
        self.selection.track.and_then(|id| self.track(id))
    }

    pub fn selected_clip(&self) -> Option<&Clip> {
        self.selection.clip.and_then(|id| self.clip(id))
    }

    pub fn loop_region(&self) -> LoopRegion {
        self.loop_region
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn provenance(&self) -> &RemoteProvenance {
        &self.provenance
    }

    fn bump(&mut self) {
        self.revision += 1;
    }

    pub fn push_track(&mut self, track: Track) {
        self.tracks.push(track);
        self.bump();
    }

    /// Removes a track and returns its former index. Clips are left alone.
    pub fn remove_track(&mut self, id: TrackId) -> Option<(usize, Track)> {
        let index = self.track_index(id)?;
        let track = self.tracks.remove(index);
        if self.selection.track == Some(id) {
            self.selection.track = None;
        }
        self.bump();
        Some((index, track))
    }

    pub fn update_track(&mut self, id: TrackId, update: &TrackUpdate) -> Option<&Track> {
        let index = self.track_index(id)?;
        update.apply(&mut self.tracks[index]);
        self.bump();
        Some(&self.tracks[index])
    }

    pub fn push_clip(&mut self, clip: Clip) {
        self.clips.push(clip);
        self.bump();
    }

    pub fn remove_clip(&mut self, id: ClipId) -> Option<(usize, Clip)> {
        let index = self.clip_index(id)?;
        let clip = self.clips.remove(index);
        if self.selection.clip == Some(id) {
            self.selection.clip = None;
        }
        self.bump();
        Some((index, clip))
    }

    pub fn update_clip(&mut self, id: ClipId, update: &ClipUpdate) -> Option<&Clip> {
        let index = self.clip_index(id)?;
        update.apply(&mut self.clips[index]);
        self.bump();
        Some(&self.clips[index])
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.settings.name = name.into();
        self.bump();
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.settings.bpm = bpm;
        self.bump();
    }

    pub fn set_time_signature(&mut self, time_signature: TimeSignature) {
        self.settings.time_signature = time_signature;
        self.bump();
    }

    pub fn select_track(&mut self, id: Option<TrackId>) {
        self.selection.track = id;
        self.bump();
    }

    pub fn select_clip(&mut self, id: Option<ClipId>) {
        self.selection.clip = id;
        self.bump();
    }

    pub fn set_loop_region(&mut self, loop_region: LoopRegion) {
        self.loop_region = loop_region;
        self.bump();
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.transport.playing = playing;
    }

    pub fn set_position(&mut self, position: Beats) {
        self.transport.position = position;
    }

    /// Replaces the whole track container in one step.
    pub fn replace_tracks(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
        self.drop_dangling_selection();
        self.bump();
    }

    /// Replaces the whole clip container in one step.
    pub fn replace_clips(&mut self, clips: Vec<Clip>) {
        self.clips = clips;
        self.drop_dangling_selection();
        self.bump();
    }

    pub fn replace_settings(&mut self, settings: ProjectSettings) {
        self.settings = settings;
        self.bump();
    }

    /// Records that a remote participant changed `keys` at the current revision.
    pub fn stamp_remote(&mut self, keys: impl IntoIterator<Item = FieldKey>) {
        let revision = self.revision;
        for key in keys {
            self.provenance.stamp(key, revision);
        }
    }

    /// Validates `image` and installs it as one change. On error nothing is
    /// modified. Transport and provenance are kept.
    pub fn install(&mut self, image: &ProjectImage) -> Result<()> {
        image.validate()?;
        let next = image.to_parts();

        self.settings = next.settings;
        self.tracks = next.tracks;
        self.clips = next.clips;
        self.selection = next.selection;
        self.loop_region = next.loop_region;
        self.drop_dangling_selection();
        self.bump();

        debug!(
            revision = self.revision,
            tracks = self.tracks.len(),
            clips = self.clips.len(),
            "installed project image"
        );
        Ok(())
    }

    fn drop_dangling_selection(&mut self) {
        if let Some(id) = self.selection.track {
            if self.track(id).is_none() {
                self.selection.track = None;
            }
        }
        if let Some(id) = self.selection.clip {
            if self.clip(id).is_none() {
                self.selection.clip = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClipKind, ClipPayload, TrackKind};

    #[test]
    fn test_every_mutation_bumps_revision() {
        let mut state = ProjectState::new();
        assert_eq!(state.revision(), 0);

        let track = Track::new("Track 1", TrackKind::Midi);
        let id = track.id;
        state.push_track(track);
        state.update_track(id, &TrackUpdate::muted(true));
        state.set_bpm(128.0);

        assert_eq!(state.revision(), 3);
        assert!(state.track(id).unwrap().muted);
    }

    #[test]
    fn test_unknown_ids_do_not_bump() {
        let mut state = ProjectState::new();
        assert!(state.update_track(TrackId::new(), &TrackUpdate::muted(true)).is_none());
        assert!(state.remove_clip(ClipId::new()).is_none());
        assert_eq!(state.revision(), 0);
    }

    #[test]
    fn test_transport_is_not_a_revision() {
        let mut state = ProjectState::new();
        state.set_playing(true);
        state.set_position(12.5);

        assert_eq!(state.revision(), 0);
        assert!(state.transport().playing);
    }

    #[test]
    fn test_replacing_clips_drops_dangling_selection() {
        let mut state = ProjectState::new();
        let track = Track::new("Track 1", TrackKind::Midi);
        let track_id = track.id;
        state.push_track(track);
        let clip = Clip::new(track_id, 0.0, 4.0, ClipPayload::empty(ClipKind::Midi));
        let clip_id = clip.id;
        state.push_clip(clip);
        state.select_clip(Some(clip_id));

        state.replace_clips(Vec::new());

        assert_eq!(state.selection().clip, None);
        assert_eq!(state.track_clips(track_id).count(), 0);
    }
}
