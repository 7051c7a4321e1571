use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{EffectId, TrackId};

pub const DEFAULT_TRACK_VOLUME: f64 = 0.8;

const PALETTE: [&str; 16] = [
    "#ef4444", "#f97316", "#f59e0b", "#eab308", "#84cc16", "#22c55e", "#10b981", "#14b8a6",
    "#06b6d4", "#0ea5e9", "#3b82f6", "#6366f1", "#8b5cf6", "#a855f7", "#d946ef", "#ec4899",
];

/// Pick a palette color from the first byte of an id (deterministic)
pub fn palette_color(seed: &[u8]) -> String {
    let idx = seed.first().copied().unwrap_or(0) as usize % PALETTE.len();
    PALETTE[idx].to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    #[default]
    Midi,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Midi => write!(f, "midi"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Effect slot on a track's insert chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Effect {
    pub id: EffectId,
    #[serde(rename = "type")]
    pub effect_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

fn default_enabled() -> bool {
    true
}

impl Effect {
    pub fn new(effect_type: impl Into<String>) -> Self {
        Self {
            id: EffectId::new(),
            effect_type: effect_type.into(),
            enabled: true,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TrackKind,
    pub volume: f64,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub solo: bool,
    pub color: String,
    #[serde(default)]
    pub effects: Vec<Effect>,
    /// Creation time, unix millis
    #[serde(default)]
    pub created: i64,
}

impl Track {
    pub fn new(name: impl Into<String>, kind: TrackKind) -> Self {
        let id = TrackId::new();
        Self {
            id,
            name: name.into(),
            kind,
            volume: DEFAULT_TRACK_VOLUME,
            muted: false,
            solo: false,
            color: palette_color(id.0.as_bytes()),
            effects: Vec::new(),
            created: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn effect(&self, effect_id: EffectId) -> Option<&Effect> {
        self.effects.iter().find(|e| e.id == effect_id)
    }
}

/// Partial track update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solo: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<Vec<Effect>>,
}

impl TrackUpdate {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn volume(volume: f64) -> Self {
        Self {
            volume: Some(volume),
            ..Self::default()
        }
    }

    pub fn muted(muted: bool) -> Self {
        Self {
            muted: Some(muted),
            ..Self::default()
        }
    }

    pub fn solo(solo: bool) -> Self {
        Self {
            solo: Some(solo),
            ..Self::default()
        }
    }

    pub fn effects(effects: Vec<Effect>) -> Self {
        Self {
            effects: Some(effects),
            ..Self::default()
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.volume.is_none()
            && self.muted.is_none()
            && self.solo.is_none()
            && self.color.is_none()
            && self.effects.is_none()
    }

    pub fn apply(&self, track: &mut Track) {
        if let Some(name) = &self.name {
            track.name = name.clone();
        }
        if let Some(volume) = self.volume {
            track.volume = volume;
        }
        if let Some(muted) = self.muted {
            track.muted = muted;
        }
        if let Some(solo) = self.solo {
            track.solo = solo;
        }
        if let Some(color) = &self.color {
            track.color = color.clone();
        }
        if let Some(effects) = &self.effects {
            track.effects = effects.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_leaves_untouched_fields() {
        let mut track = Track::new("Drums", TrackKind::Midi);
        let before = track.clone();

        TrackUpdate::volume(0.25).apply(&mut track);

        assert_eq!(track.volume, 0.25);
        assert_eq!(track.name, before.name);
        assert_eq!(track.muted, before.muted);
        assert_eq!(track.color, before.color);
    }

    #[test]
    fn test_track_wire_format() {
        let track = Track::new("Bass", TrackKind::Audio);
        let value = serde_json::to_value(&track).unwrap();

        assert_eq!(value["type"], "audio");
        assert_eq!(value["name"], "Bass");
        assert!(value["effects"].as_array().unwrap().is_empty());

        let decoded: Track = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, track);
    }

    #[test]
    fn test_palette_color_is_deterministic() {
        assert_eq!(palette_color(&[0]), "#ef4444");
        assert_eq!(palette_color(&[17]), "#f97316");
        assert_eq!(palette_color(&[]), "#ef4444");
    }
}
