/// Entity encoding for the shared document
use project::{Clip, ClipId, ProjectSettings, TimeSignature, Track, TrackId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    CollaborationError, Container, Result, SharedStateChannel, KEY_BPM, KEY_NAME,
    KEY_TIME_SIGNATURE,
};

fn encode<T: Serialize>(entity: &T) -> Result<Value> {
    Ok(serde_json::to_value(entity)?)
}

fn decode<T: DeserializeOwned>(container: Container, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| CollaborationError::Decode {
        container,
        message: e.to_string(),
    })
}

pub fn encode_track(track: &Track) -> Result<Value> {
    encode(track)
}

pub fn decode_track(value: &Value) -> Result<Track> {
    decode(Container::Tracks, value)
}

pub fn encode_clip(clip: &Clip) -> Result<Value> {
    encode(clip)
}

pub fn decode_clip(value: &Value) -> Result<Clip> {
    let clip: Clip = decode(Container::Clips, value)?;
    if !(clip.start_time.is_finite() && clip.start_time >= 0.0)
        || !(clip.duration.is_finite() && clip.duration > 0.0)
    {
        return Err(CollaborationError::Decode {
            container: Container::Clips,
            message: format!("clip {} has an invalid range", clip.id),
        });
    }
    Ok(clip)
}

pub fn encode_tracks(tracks: &[Track]) -> Result<Vec<Value>> {
    tracks.iter().map(encode_track).collect()
}

pub fn encode_clips(clips: &[Clip]) -> Result<Vec<Value>> {
    clips.iter().map(encode_clip).collect()
}

/// Id of an entry that may not decode as a whole
pub fn track_id_of(value: &Value) -> Option<TrackId> {
    uuid_of(value).map(TrackId)
}

pub fn clip_id_of(value: &Value) -> Option<ClipId> {
    uuid_of(value).map(ClipId)
}

fn uuid_of(value: &Value) -> Option<Uuid> {
    crate::entry_id(value).and_then(|id| Uuid::parse_str(id).ok())
}

/// Project map entries for `settings`, in key order
pub fn encode_settings(settings: &ProjectSettings) -> Result<Vec<(&'static str, Value)>> {
    Ok(vec![
        (KEY_NAME, Value::from(settings.name.clone())),
        (KEY_BPM, Value::from(settings.bpm)),
        (KEY_TIME_SIGNATURE, encode(&settings.time_signature)?),
    ])
}

/// Settings read from the project map. Missing keys keep `current`; invalid
/// ones are reported in the second half of the pair and also keep `current`.
pub fn read_settings(
    channel: &dyn SharedStateChannel,
    current: &ProjectSettings,
) -> (ProjectSettings, Vec<CollaborationError>) {
    let mut settings = current.clone();
    let mut errors = Vec::new();
    let invalid = |key: &str, value: &Value| CollaborationError::Decode {
        container: Container::Project,
        message: format!("{} = {}", key, value),
    };

    if let Some(value) = channel.get(KEY_NAME) {
        match value.as_str() {
            Some(name) => settings.name = name.to_string(),
            None => errors.push(invalid(KEY_NAME, &value)),
        }
    }

    if let Some(value) = channel.get(KEY_BPM) {
        match value.as_f64() {
            Some(bpm) if bpm.is_finite() && bpm > 0.0 => settings.bpm = bpm,
            _ => errors.push(invalid(KEY_BPM, &value)),
        }
    }

    if let Some(value) = channel.get(KEY_TIME_SIGNATURE) {
        match serde_json::from_value::<TimeSignature>(value.clone()) {
            Ok(ts) if ts.numerator > 0 && ts.denominator > 0 => settings.time_signature = ts,
            _ => errors.push(invalid(KEY_TIME_SIGNATURE, &value)),
        }
    }

    (settings, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SharedDocument;
    use project::{ClipKind, ClipPayload, Effect, TrackKind};
    use serde_json::json;

    #[test]
    fn test_track_wire_shape() {
        let mut track = Track::new("Lead", TrackKind::Audio);
        track.effects.push(Effect::new("reverb").with_param("mix", 0.3));
        let value = encode_track(&track).unwrap();

        assert_eq!(value["type"], "audio");
        assert_eq!(value["name"], "Lead");
        assert_eq!(value["effects"][0]["type"], "reverb");
        assert_eq!(decode_track(&value).unwrap(), track);
        assert_eq!(track_id_of(&value), Some(track.id));
    }

    #[test]
    fn test_clip_with_bad_range_is_rejected() {
        let clip = Clip::new(TrackId::new(), 0.0, 4.0, ClipPayload::empty(ClipKind::Midi));
        let mut value = encode_clip(&clip).unwrap();
        value["duration"] = json!(0.0);

        assert!(decode_clip(&value).is_err());
        assert_eq!(clip_id_of(&value), Some(clip.id));
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let err = decode_track(&json!({ "id": "nope" })).unwrap_err();
        assert!(matches!(
            err,
            CollaborationError::Decode {
                container: Container::Tracks,
                ..
            }
        ));
        assert_eq!(track_id_of(&json!({ "id": "nope" })), None);
    }

    #[test]
    fn test_read_settings_keeps_current_for_missing_and_invalid() {
        let doc = SharedDocument::new();
        doc.set(KEY_NAME, json!("Jam"));
        doc.set(KEY_BPM, json!(-3));

        let (settings, errors) = read_settings(&doc, &ProjectSettings::default());

        assert_eq!(settings.name, "Jam");
        assert_eq!(settings.bpm, 120.0);
        assert_eq!(settings.time_signature, TimeSignature::new(4, 4));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_integer_bpm_is_accepted() {
        let doc = SharedDocument::new();
        doc.set(KEY_BPM, json!(96));

        let (settings, errors) = read_settings(&doc, &ProjectSettings::default());

        assert_eq!(settings.bpm, 96.0);
        assert!(errors.is_empty());
    }
}
