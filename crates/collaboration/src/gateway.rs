/// Action gateway
/// The only mutation surface for application code. Each call classifies the
/// edit, snapshots the pre-edit state when it is significant, applies it to
/// the model, then mirrors it into the shared channel.
use history::HistoryEngine;
use project::{
    AudioBufferRef, AudioClipData, Beats, Clip, ClipId, ClipKind, ClipPayload, ClipUpdate,
    Effect, EffectId, LoopRegion, ProjectState, Track, TrackId, TrackKind, TrackUpdate,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    delete_entry, describe_add_clip, describe_add_effect, describe_add_track,
    describe_remove_clip, describe_remove_effect, describe_remove_track, encode_clip,
    encode_clips, encode_track, encode_tracks, ingest, push_entry, reconcile_sequence,
    reconcile_settings, replace_entry, CollaborationConfig, CollaborationError, Container,
    IngestOutcome, Result, Sequence, SharedStateChannel, SignificancePolicy, KEY_BPM, KEY_NAME,
};

pub const INITIAL_STATE: &str = "Initial state";

pub struct ActionGateway {
    state: ProjectState,
    history: HistoryEngine,
    policy: SignificancePolicy,
    channel: Option<Arc<dyn SharedStateChannel>>,
}

impl Default for ActionGateway {
    fn default() -> Self {
        Self::new(&CollaborationConfig::default())
    }
}

impl ActionGateway {
    pub fn new(config: &CollaborationConfig) -> Self {
        Self::with_state(ProjectState::new(), config)
    }

    /// Wraps an existing model; its current content becomes the history
    /// baseline.
    pub fn with_state(state: ProjectState, config: &CollaborationConfig) -> Self {
        let mut history = HistoryEngine::with_config(config.history.clone());
        history.initialize(&state, INITIAL_STATE);
        Self {
            state,
            history,
            policy: SignificancePolicy::new(config.significance),
            channel: None,
        }
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn history(&self) -> &HistoryEngine {
        &self.history
    }

    pub fn policy(&self) -> &SignificancePolicy {
        &self.policy
    }

    // ===== Channel =====

    pub fn is_attached(&self) -> bool {
        self.channel.is_some()
    }

    pub fn channel(&self) -> Result<&dyn SharedStateChannel> {
        self.channel
            .as_deref()
            .ok_or(CollaborationError::ChannelUnavailable)
    }

    /// Attaches `channel`. An empty channel is seeded from the local model;
    /// otherwise the model is refreshed from the channel.
    pub fn attach_channel(&mut self, channel: Arc<dyn SharedStateChannel>) -> Result<IngestOutcome> {
        let empty = channel.sequence(Sequence::Tracks).is_empty()
            && channel.sequence(Sequence::Clips).is_empty()
            && channel.get(KEY_NAME).is_none()
            && channel.get(KEY_BPM).is_none();
        self.channel = Some(channel);

        if empty {
            let writes = self.publish()?;
            info!(writes, "seeded shared channel from local project");
            return Ok(IngestOutcome::default());
        }

        let mut outcome = IngestOutcome::default();
        for container in Container::ALL {
            outcome.merge(self.ingest(container)?);
        }
        info!(changed = outcome.changed_fields, "joined shared project");
        Ok(outcome)
    }

    pub fn detach_channel(&mut self) -> Option<Arc<dyn SharedStateChannel>> {
        self.channel.take()
    }

    /// Writes the whole local model into the channel. Returns the number of
    /// writes issued.
    pub fn publish(&self) -> Result<usize> {
        let channel = self.channel()?;
        let mut writes = reconcile_settings(channel, self.state.settings())?;
        writes += reconcile_sequence(channel, Sequence::Tracks, &encode_tracks(self.state.tracks())?);
        writes += reconcile_sequence(channel, Sequence::Clips, &encode_clips(self.state.clips())?);
        Ok(writes)
    }

    /// Refreshes one container from the channel. Never records history.
    pub fn ingest(&mut self, container: Container) -> Result<IngestOutcome> {
        let channel = self
            .channel
            .as_deref()
            .ok_or(CollaborationError::ChannelUnavailable)?;
        Ok(ingest(&mut self.state, channel, container))
    }

    fn mirror(&self, write: impl FnOnce(&dyn SharedStateChannel) -> Result<()>) {
        match self.channel.as_deref() {
            Some(channel) => {
                if let Err(err) = write(channel) {
                    warn!("failed to mirror change: {}", err);
                }
            }
            None => debug!("no shared channel attached, mirroring skipped"),
        }
    }

    fn record(&mut self, description: String) {
        self.history.snapshot(&self.state, description);
    }

    // ===== Tracks =====

    pub fn add_track(&mut self, kind: TrackKind) -> Track {
        self.record(describe_add_track(kind));

        let track = Track::new(format!("Track {}", self.state.track_count() + 1), kind);
        self.state.push_track(track.clone());
        self.mirror(|channel| {
            push_entry(channel, Sequence::Tracks, encode_track(&track)?);
            Ok(())
        });

        info!(track = %track.id, "added {} track", kind);
        track
    }

    /// Removes a track together with its clips.
    pub fn remove_track(&mut self, id: TrackId) -> Option<Track> {
        let Some(track) = self.state.track(id).cloned() else {
            warn!(track = %id, "remove_track: unknown track");
            return None;
        };
        self.record(describe_remove_track(&track));

        self.state.remove_track(id);
        let (removed, kept): (Vec<Clip>, Vec<Clip>) = self
            .state
            .clips()
            .iter()
            .cloned()
            .partition(|clip| clip.track_id == id);
        if !removed.is_empty() {
            self.state.replace_clips(kept);
        }

        self.mirror(|channel| {
            delete_entry(channel, Sequence::Tracks, &id.to_string());
            for clip in &removed {
                delete_entry(channel, Sequence::Clips, &clip.id.to_string());
            }
            Ok(())
        });

        info!(track = %id, clips = removed.len(), "removed track");
        Some(track)
    }

    pub fn update_track(&mut self, id: TrackId, update: TrackUpdate) -> Option<Track> {
        if self.state.track(id).is_none() {
            warn!(track = %id, "update_track: unknown track");
            return None;
        }
        if let Some(volume) = update.volume {
            if !volume.is_finite() || volume < 0.0 {
                warn!(track = %id, volume, "update_track: invalid volume");
                return None;
            }
        }

        if let Some(description) = self.policy.track_update(&update) {
            self.record(description);
        }

        let track = self.state.update_track(id, &update)?.clone();
        self.mirror_track(&track);
        Some(track)
    }

    fn mirror_track(&self, track: &Track) {
        self.mirror(|channel| {
            replace_entry(channel, Sequence::Tracks, &track.id.to_string(), encode_track(track)?);
            Ok(())
        });
    }

    // ===== Effects =====

    pub fn add_effect(&mut self, track_id: TrackId, effect_type: &str) -> Option<Effect> {
        let Some(track) = self.state.track(track_id).cloned() else {
            warn!(track = %track_id, "add_effect: unknown track");
            return None;
        };
        self.record(describe_add_effect(effect_type, &track));

        let effect = Effect::new(effect_type);
        let mut effects = track.effects;
        effects.push(effect.clone());
        let track = self
            .state
            .update_track(track_id, &TrackUpdate::effects(effects))?
            .clone();
        self.mirror_track(&track);

        debug!(track = %track_id, effect = %effect.id, "added {}", effect_type);
        Some(effect)
    }

    pub fn remove_effect(&mut self, track_id: TrackId, effect_id: EffectId) -> Option<Effect> {
        let track = self.state.track(track_id).cloned()?;
        let Some(effect) = track.effect(effect_id).cloned() else {
            warn!(track = %track_id, effect = %effect_id, "remove_effect: unknown effect");
            return None;
        };
        self.record(describe_remove_effect(&effect.effect_type, &track));

        let effects = track
            .effects
            .into_iter()
            .filter(|e| e.id != effect_id)
            .collect();
        let track = self
            .state
            .update_track(track_id, &TrackUpdate::effects(effects))?
            .clone();
        self.mirror_track(&track);
        Some(effect)
    }

    /// Parameter tweaks are continuous and never recorded.
    pub fn update_effect_param(
        &mut self,
        track_id: TrackId,
        effect_id: EffectId,
        param: &str,
        value: f64,
    ) -> Option<Effect> {
        let mut effects = self.state.track(track_id)?.effects.clone();
        let Some(effect) = effects.iter_mut().find(|e| e.id == effect_id) else {
            warn!(track = %track_id, effect = %effect_id, "update_effect_param: unknown effect");
            return None;
        };
        effect.params.insert(param.to_string(), value);
        let updated = effect.clone();

        let track = self
            .state
            .update_track(track_id, &TrackUpdate::effects(effects))?
            .clone();
        self.mirror_track(&track);
        Some(updated)
    }

    // ===== Clips =====

    pub fn add_clip(
        &mut self,
        track_id: TrackId,
        start_time: Beats,
        duration: Beats,
        kind: ClipKind,
    ) -> Option<Clip> {
        self.insert_clip(track_id, start_time, duration, ClipPayload::empty(kind))
    }

    pub fn add_audio_clip(
        &mut self,
        track_id: TrackId,
        start_time: Beats,
        buffer: Option<AudioBufferRef>,
        duration: Beats,
        url: Option<String>,
    ) -> Option<Clip> {
        let payload = ClipPayload::Audio(AudioClipData {
            buffer,
            url,
            ..AudioClipData::default()
        });
        self.insert_clip(track_id, start_time, duration, payload)
    }

    fn insert_clip(
        &mut self,
        track_id: TrackId,
        start_time: Beats,
        duration: Beats,
        payload: ClipPayload,
    ) -> Option<Clip> {
        if self.state.track(track_id).is_none() {
            warn!(track = %track_id, "add clip: unknown track");
            return None;
        }
        if !valid_range(start_time, duration) {
            warn!(start_time, duration, "add clip: invalid range");
            return None;
        }
        self.record(describe_add_clip(payload.kind()));

        let clip = Clip::new(track_id, start_time, duration, payload);
        self.state.push_clip(clip.clone());
        self.mirror(|channel| {
            push_entry(channel, Sequence::Clips, encode_clip(&clip)?);
            Ok(())
        });

        info!(clip = %clip.id, track = %track_id, "added {} clip", clip.kind());
        Some(clip)
    }

    pub fn remove_clip(&mut self, id: ClipId) -> Option<Clip> {
        let Some(clip) = self.state.clip(id).cloned() else {
            warn!(clip = %id, "remove_clip: unknown clip");
            return None;
        };
        self.record(describe_remove_clip(&clip));

        self.state.remove_clip(id);
        self.mirror(|channel| {
            delete_entry(channel, Sequence::Clips, &id.to_string());
            Ok(())
        });
        Some(clip)
    }

    pub fn update_clip(&mut self, id: ClipId, update: ClipUpdate) -> Option<Clip> {
        let Some(current) = self.state.clip(id) else {
            warn!(clip = %id, "update_clip: unknown clip");
            return None;
        };
        let mut candidate = current.clone();
        update.apply(&mut candidate);
        if !valid_range(candidate.start_time, candidate.duration) {
            warn!(clip = %id, "update_clip: invalid range");
            return None;
        }

        if let Some(description) = self.policy.clip_update(current, &update) {
            self.record(description);
        }

        let clip = self.state.update_clip(id, &update)?.clone();
        self.mirror(|channel| {
            replace_entry(channel, Sequence::Clips, &id.to_string(), encode_clip(&clip)?);
            Ok(())
        });
        Some(clip)
    }

    // ===== Project settings =====

    pub fn set_bpm(&mut self, bpm: f64) {
        if !bpm.is_finite() || bpm <= 0.0 {
            warn!(bpm, "set_bpm: invalid value");
            return;
        }
        let Some(description) = self.policy.bpm(self.state.bpm(), bpm) else {
            return;
        };
        self.record(description);

        self.state.set_bpm(bpm);
        self.mirror(|channel| {
            channel.set(KEY_BPM, Value::from(bpm));
            Ok(())
        });
    }

    pub fn set_project_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        let Some(description) = self.policy.project_name(self.state.name(), &name) else {
            return;
        };
        self.record(description);

        self.state.set_name(name.clone());
        self.mirror(|channel| {
            channel.set(KEY_NAME, Value::from(name));
            Ok(())
        });
    }

    // ===== Local-only state =====

    pub fn select_track(&mut self, id: Option<TrackId>) {
        if let Some(id) = id {
            if self.state.track(id).is_none() {
                warn!(track = %id, "select_track: unknown track");
                return;
            }
        }
        self.state.select_track(id);
    }

    pub fn select_clip(&mut self, id: Option<ClipId>) {
        if let Some(id) = id {
            if self.state.clip(id).is_none() {
                warn!(clip = %id, "select_clip: unknown clip");
                return;
            }
        }
        self.state.select_clip(id);
    }

    pub fn set_loop_region(&mut self, loop_region: LoopRegion) {
        if !(loop_region.start.is_finite()
            && loop_region.end.is_finite()
            && loop_region.end >= loop_region.start)
        {
            warn!(start = loop_region.start, end = loop_region.end, "set_loop_region: invalid region");
            return;
        }
        self.state.set_loop_region(loop_region);
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.state.set_playing(playing);
    }

    pub fn set_position(&mut self, position: Beats) {
        self.state.set_position(position.max(0.0));
    }

    // ===== History =====

    pub fn undo(&mut self) -> bool {
        if !self.history.undo(&mut self.state) {
            return false;
        }
        self.mirror_restored();
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.history.redo(&mut self.state) {
            return false;
        }
        self.mirror_restored();
        true
    }

    /// Other participants see an undo as ordinary edits.
    fn mirror_restored(&self) {
        if self.channel.is_none() {
            return;
        }
        match self.publish() {
            Ok(writes) => debug!(writes, "mirrored restored state"),
            Err(err) => warn!("failed to mirror restored state: {}", err),
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo_description(&self) -> &str {
        self.history.undo_description()
    }

    pub fn redo_description(&self) -> &str {
        self.history.redo_description()
    }

    /// Makes the current model the new baseline.
    pub fn initialize_history(&mut self, description: impl Into<String>) {
        self.history.initialize(&self.state, description);
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

fn valid_range(start_time: Beats, duration: Beats) -> bool {
    start_time.is_finite() && start_time >= 0.0 && duration.is_finite() && duration > 0.0
}
