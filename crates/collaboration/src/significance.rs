/// Significance classification
/// Decides which edits deserve an undo step and names them.
use project::{Beats, Clip, ClipKind, ClipUpdate, Track, TrackKind, TrackUpdate};
use serde::{Deserialize, Serialize};

/// Clip moves or resizes at or below this many beats are not recorded
pub const DEFAULT_POSITION_THRESHOLD: Beats = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignificanceConfig {
    pub position_threshold: Beats,
}

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            position_threshold: DEFAULT_POSITION_THRESHOLD,
        }
    }
}

/// Classifies edits. `Some(description)` means the edit is significant and
/// gets a snapshot with that description.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignificancePolicy {
    config: SignificanceConfig,
}

impl SignificancePolicy {
    pub fn new(config: SignificanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignificanceConfig {
        &self.config
    }

    /// Only name, mute and solo changes count; volume, color and effect
    /// parameters never do.
    pub fn track_update(&self, update: &TrackUpdate) -> Option<String> {
        if let Some(name) = &update.name {
            return Some(format!("Rename track to \"{}\"", name));
        }
        if let Some(muted) = update.muted {
            return Some(if muted { "Mute track" } else { "Unmute track" }.to_string());
        }
        if let Some(solo) = update.solo {
            return Some(if solo { "Solo track" } else { "Unsolo track" }.to_string());
        }
        None
    }

    /// Content edits always count; moves and resizes count once they exceed
    /// the position threshold.
    pub fn clip_update(&self, clip: &Clip, update: &ClipUpdate) -> Option<String> {
        if update.payload.is_some() {
            return Some(format!("Edit {} clip content", clip.kind()));
        }

        let beyond = |from: Beats, to: Option<Beats>| {
            to.map(|to| (to - from).abs() > self.config.position_threshold)
                .unwrap_or(false)
        };
        if beyond(clip.start_time, update.start_time) || beyond(clip.duration, update.duration) {
            return Some(format!("Move/resize {} clip", clip.kind()));
        }
        None
    }

    pub fn bpm(&self, current: f64, bpm: f64) -> Option<String> {
        (current != bpm).then(|| format!("Set BPM to {}", bpm))
    }

    pub fn project_name(&self, current: &str, name: &str) -> Option<String> {
        (current != name).then(|| format!("Rename project to \"{}\"", name))
    }
}

pub fn describe_add_track(kind: TrackKind) -> String {
    format!("Add {} track", kind)
}

pub fn describe_remove_track(track: &Track) -> String {
    format!("Remove track \"{}\"", track.name)
}

pub fn describe_add_clip(kind: ClipKind) -> String {
    format!("Add {} clip", kind)
}

pub fn describe_remove_clip(clip: &Clip) -> String {
    format!("Remove {} clip", clip.kind())
}

pub fn describe_add_effect(effect_type: &str, track: &Track) -> String {
    format!("Add {} to track \"{}\"", effect_type, track.name)
}

pub fn describe_remove_effect(effect_type: &str, track: &Track) -> String {
    format!("Remove {} from track \"{}\"", effect_type, track.name)
}
