use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{palette_color, ClipId, TrackId};

/// Clip positions and lengths are measured in beats.
pub type Beats = f64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ClipKind {
    Midi,
    Audio,
}

impl fmt::Display for ClipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipKind::Midi => write!(f, "midi"),
            ClipKind::Audio => write!(f, "audio"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub start: Beats,
    pub duration: Beats,
}

impl Note {
    pub fn new(pitch: u8, velocity: u8, start: Beats, duration: Beats) -> Self {
        Self {
            pitch,
            velocity,
            start,
            duration,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MidiClipData {
    #[serde(default)]
    pub notes: Vec<Note>,
}

/// Handle to a decoded buffer owned by the audio engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AudioBufferRef {
    pub id: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub frames: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioClipData {
    #[serde(default)]
    pub buffer: Option<AudioBufferRef>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "unity_gain")]
    pub gain: f64,
    #[serde(default)]
    pub pan: f64,
    #[serde(default)]
    pub fade_in: Beats,
    #[serde(default)]
    pub fade_out: Beats,
}

fn unity_gain() -> f64 {
    1.0
}

impl Default for AudioClipData {
    fn default() -> Self {
        Self {
            buffer: None,
            url: None,
            gain: unity_gain(),
            pan: 0.0,
            fade_in: 0.0,
            fade_out: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClipPayload {
    Midi(MidiClipData),
    Audio(AudioClipData),
}

impl ClipPayload {
    pub fn empty(kind: ClipKind) -> Self {
        match kind {
            ClipKind::Midi => ClipPayload::Midi(MidiClipData::default()),
            ClipKind::Audio => ClipPayload::Audio(AudioClipData::default()),
        }
    }

    pub fn kind(&self) -> ClipKind {
        match self {
            ClipPayload::Midi(_) => ClipKind::Midi,
            ClipPayload::Audio(_) => ClipKind::Audio,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: ClipId,
    pub track_id: TrackId,
    pub start_time: Beats,
    pub duration: Beats,
    pub color: String,
    /// Creation time, unix millis
    #[serde(default)]
    pub created: i64,
    #[serde(rename = "data")]
    pub payload: ClipPayload,
}

impl Clip {
    pub fn new(track_id: TrackId, start_time: Beats, duration: Beats, payload: ClipPayload) -> Self {
        let id = ClipId::new();
        Self {
            id,
            track_id,
            start_time,
            duration,
            color: palette_color(id.0.as_bytes()),
            created: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }

    pub fn kind(&self) -> ClipKind {
        self.payload.kind()
    }

    pub fn end_time(&self) -> Beats {
        self.start_time + self.duration
    }
}

/// Partial clip update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClipUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Beats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Beats>,
    #[serde(default, rename = "data", skip_serializing_if = "Option::is_none")]
    pub payload: Option<ClipPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl ClipUpdate {
    pub fn start_time(start_time: Beats) -> Self {
        Self {
            start_time: Some(start_time),
            ..Self::default()
        }
    }

    pub fn duration(duration: Beats) -> Self {
        Self {
            duration: Some(duration),
            ..Self::default()
        }
    }

    pub fn payload(payload: ClipPayload) -> Self {
        Self {
            payload: Some(payload),
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, duration: Beats) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn apply(&self, clip: &mut Clip) {
        if let Some(start_time) = self.start_time {
            clip.start_time = start_time;
        }
        if let Some(duration) = self.duration {
            clip.duration = duration;
        }
        if let Some(payload) = &self.payload {
            clip.payload = payload.clone();
        }
        if let Some(color) = &self.color {
            clip.color = color.clone();
        }
    }
}
