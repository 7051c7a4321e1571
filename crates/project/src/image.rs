/// Versioned, self-contained images of project state
/// Every entity has one explicit copy function here; adding a field to a model
/// type fails to compile until the matching copy is updated.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{
    AudioClipData, Clip, ClipPayload, Effect, LoopRegion, MidiClipData, ProjectError,
    ProjectSettings, ProjectState, Result, Selection, Track,
};

pub const IMAGE_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectImage {
    pub version: u16,
    pub settings: ProjectSettings,
    pub tracks: Vec<Track>,
    pub clips: Vec<Clip>,
    #[serde(default)]
    pub selection: Selection,
    #[serde(default)]
    pub loop_region: LoopRegion,
}

pub(crate) struct ImageParts {
    pub settings: ProjectSettings,
    pub tracks: Vec<Track>,
    pub clips: Vec<Clip>,
    pub selection: Selection,
    pub loop_region: LoopRegion,
}

impl ProjectImage {
    pub fn new(
        settings: ProjectSettings,
        tracks: Vec<Track>,
        clips: Vec<Clip>,
        selection: Selection,
        loop_region: LoopRegion,
    ) -> Self {
        Self {
            version: IMAGE_VERSION,
            settings,
            tracks,
            clips,
            selection,
            loop_region,
        }
    }

    /// Deep copy of every tracked field of `state`.
    pub fn capture(state: &ProjectState) -> Self {
        Self::new(
            copy_settings(state.settings()),
            state.tracks().iter().map(copy_track).collect(),
            state.clips().iter().map(copy_clip).collect(),
            state.selection(),
            state.loop_region(),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != IMAGE_VERSION {
            return Err(ProjectError::UnsupportedImageVersion(self.version));
        }
        let bpm = self.settings.bpm;
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(ProjectError::InvalidBpm(bpm));
        }
        let LoopRegion { start, end, .. } = self.loop_region;
        if !start.is_finite() || !end.is_finite() || end < start {
            return Err(ProjectError::InvalidLoop { start, end });
        }

        let mut track_ids = HashSet::new();
        for track in &self.tracks {
            if !track_ids.insert(track.id) {
                return Err(ProjectError::DuplicateTrack(track.id));
            }
        }

        let mut clip_ids = HashSet::new();
        for clip in &self.clips {
            if !clip_ids.insert(clip.id) {
                return Err(ProjectError::DuplicateClip(clip.id));
            }
            if !track_ids.contains(&clip.track_id) {
                return Err(ProjectError::MissingTrack {
                    clip: clip.id,
                    track: clip.track_id,
                });
            }
            if !clip.start_time.is_finite()
                || !clip.duration.is_finite()
                || clip.start_time < 0.0
                || clip.duration <= 0.0
            {
                return Err(ProjectError::InvalidClipRange(clip.id));
            }
        }

        Ok(())
    }

    pub(crate) fn to_parts(&self) -> ImageParts {
        ImageParts {
            settings: copy_settings(&self.settings),
            tracks: self.tracks.iter().map(copy_track).collect(),
            clips: self.clips.iter().map(copy_clip).collect(),
            selection: self.selection,
            loop_region: self.loop_region,
        }
    }
}

fn copy_settings(settings: &ProjectSettings) -> ProjectSettings {
    ProjectSettings {
        name: settings.name.clone(),
        bpm: settings.bpm,
        time_signature: settings.time_signature,
    }
}

pub fn copy_effect(effect: &Effect) -> Effect {
    Effect {
        id: effect.id,
        effect_type: effect.effect_type.clone(),
        enabled: effect.enabled,
        params: effect.params.clone(),
    }
}

pub fn copy_track(track: &Track) -> Track {
    Track {
        id: track.id,
        name: track.name.clone(),
        kind: track.kind,
        volume: track.volume,
        muted: track.muted,
        solo: track.solo,
        color: track.color.clone(),
        effects: track.effects.iter().map(copy_effect).collect(),
        created: track.created,
    }
}

pub fn copy_payload(payload: &ClipPayload) -> ClipPayload {
    match payload {
        ClipPayload::Midi(data) => ClipPayload::Midi(MidiClipData {
            notes: data.notes.clone(),
        }),
        ClipPayload::Audio(data) => ClipPayload::Audio(AudioClipData {
            buffer: data.buffer.clone(),
            url: data.url.clone(),
            gain: data.gain,
            pan: data.pan,
            fade_in: data.fade_in,
            fade_out: data.fade_out,
        }),
    }
}

pub fn copy_clip(clip: &Clip) -> Clip {
    Clip {
        id: clip.id,
        track_id: clip.track_id,
        start_time: clip.start_time,
        duration: clip.duration,
        color: clip.color.clone(),
        created: clip.created,
        payload: copy_payload(&clip.payload),
    }
}
