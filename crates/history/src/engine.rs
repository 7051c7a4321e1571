use project::ProjectState;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{reconcile, HistoryConfig, HistoryError, Result, Snapshot};

/// One undoable step: the state before the action, plus the state after it
/// once the step has been undone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    snapshot: Snapshot,
    redo: Option<Snapshot>,
}

impl HistoryEntry {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn redo_image(&self) -> Option<&Snapshot> {
        self.redo.as_ref()
    }

    pub fn description(&self) -> &str {
        self.snapshot.description()
    }
}

/// Shared view of the re-entrancy guard, for observers that must tell a
/// restore apart from a user action.
#[derive(Debug, Clone, Default)]
pub struct RestoreFlag(Arc<AtomicBool>);

impl RestoreFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Holds the restore flag; cleared on drop, including during unwinding.
struct RestoreGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RestoreGuard<'a> {
    fn acquire(flag: &'a RestoreFlag) -> Option<Self> {
        flag.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: &flag.0 })
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub total_snapshots: usize,
    /// 1-based, 0 when empty
    pub current_position: usize,
    pub can_undo: bool,
    pub can_redo: bool,
    pub memory_bytes: usize,
}

/// Linear undo/redo over full project snapshots.
///
/// Entry 0 is the baseline. The cursor points at the most recent entry whose
/// action is still applied, so `cursor == 0` means nothing can be undone.
#[derive(Debug, Default)]
pub struct HistoryEngine {
    entries: VecDeque<HistoryEntry>,
    cursor: Option<usize>,
    config: HistoryConfig,
    restoring: RestoreFlag,
    last_action_description: String,
}

impl HistoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HistoryConfig) -> Self {
        let mut engine = Self {
            config,
            ..Self::default()
        };
        engine.config.max_history_size = engine.config.max_history_size.max(1);
        engine
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Captures `state` as the pre-action snapshot of a new entry.
    pub fn snapshot(&mut self, state: &ProjectState, description: impl Into<String>) {
        let description = description.into();
        if self.is_restoring() {
            debug!(%description, "ignoring snapshot during restore");
            return;
        }

        match self.cursor {
            Some(cursor) => self.entries.truncate(cursor + 1),
            None => self.entries.clear(),
        }

        self.entries.push_back(HistoryEntry {
            snapshot: Snapshot::capture(state, description.clone()),
            redo: None,
        });
        self.cursor = Some(self.entries.len() - 1);

        while self.entries.len() > self.config.max_history_size {
            self.entries.pop_front();
            self.cursor = self.cursor.map(|c| c.saturating_sub(1));
        }

        info!(
            %description,
            entries = self.entries.len(),
            "snapshot saved"
        );
        self.last_action_description = description;
    }

    pub fn undo(&mut self, state: &mut ProjectState) -> bool {
        match self.try_undo(state) {
            Ok(()) => true,
            Err(HistoryError::HistoryEmpty(which)) => {
                debug!("nothing to undo ({})", which);
                false
            }
            Err(err) => {
                warn!("undo failed: {}", err);
                false
            }
        }
    }

    pub fn redo(&mut self, state: &mut ProjectState) -> bool {
        match self.try_redo(state) {
            Ok(()) => true,
            Err(HistoryError::HistoryEmpty(which)) => {
                debug!("nothing to redo ({})", which);
                false
            }
            Err(err) => {
                warn!("redo failed: {}", err);
                false
            }
        }
    }

    fn try_undo(&mut self, state: &mut ProjectState) -> Result<()> {
        let cursor = match self.cursor {
            Some(cursor) if cursor > 0 => cursor,
            _ => return Err(HistoryError::HistoryEmpty("undo stack")),
        };

        let redo_image = Snapshot::capture(state, self.entries[cursor].description());
        self.cursor = Some(cursor - 1);

        if let Err(err) = self.try_restore(state, &self.entries[cursor].snapshot) {
            self.cursor = Some(cursor);
            return Err(err);
        }

        let entry = &mut self.entries[cursor];
        entry.redo = Some(redo_image);
        info!(description = entry.description(), "undid");
        Ok(())
    }

    fn try_redo(&mut self, state: &mut ProjectState) -> Result<()> {
        let next = match self.cursor {
            Some(cursor) if cursor + 1 < self.entries.len() => cursor + 1,
            _ => return Err(HistoryError::HistoryEmpty("redo stack")),
        };
        self.cursor = Some(next);
        let restored = match self.entries[next].redo.as_ref() {
            Some(image) => self.try_restore(state, image),
            None => Err(HistoryError::MissingRedoImage(next)),
        };
        if let Err(err) = restored {
            self.cursor = Some(next - 1);
            return Err(err);
        }

        info!(description = self.entries[next].description(), "redid");
        Ok(())
    }

    /// Installs `snapshot` into `state` as a single change. Returns false and
    /// leaves `state` untouched if the image cannot be installed.
    pub fn restore(&self, state: &mut ProjectState, snapshot: &Snapshot) -> bool {
        match self.try_restore(state, snapshot) {
            Ok(()) => true,
            Err(err) => {
                error!("failed to restore snapshot {}: {}", snapshot.id(), err);
                false
            }
        }
    }

    fn try_restore(&self, state: &mut ProjectState, snapshot: &Snapshot) -> Result<()> {
        let _guard =
            RestoreGuard::acquire(&self.restoring).ok_or(HistoryError::RestoreInProgress)?;

        let image = reconcile(snapshot, state, self.config.conflict_policy);
        state.install(&image)?;

        debug!(
            description = snapshot.description(),
            revision = state.revision(),
            "state restored"
        );
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
        self.last_action_description.clear();
        info!("history cleared");
    }

    /// Resets the history to a single baseline entry.
    pub fn initialize(&mut self, state: &ProjectState, description: impl Into<String>) {
        self.clear();
        self.snapshot(state, description);
        info!("history initialized");
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(cursor) if cursor > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.cursor, Some(cursor) if cursor + 1 < self.entries.len())
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn current(&self) -> Option<&HistoryEntry> {
        self.cursor.and_then(|c| self.entries.get(c))
    }

    pub fn undo_description(&self) -> &str {
        match self.cursor {
            Some(cursor) if cursor > 0 => self.entries[cursor].description(),
            _ => "Nothing to undo",
        }
    }

    pub fn redo_description(&self) -> &str {
        match self.cursor {
            Some(cursor) if cursor + 1 < self.entries.len() => {
                self.entries[cursor + 1].description()
            }
            _ => "Nothing to redo",
        }
    }

    pub fn last_action_description(&self) -> &str {
        &self.last_action_description
    }

    pub fn is_restoring(&self) -> bool {
        self.restoring.is_set()
    }

    pub fn restore_flag(&self) -> RestoreFlag {
        self.restoring.clone()
    }

    /// Changes the bound and evicts entries beyond it right away. The redo
    /// tail goes first; the oldest entries go only while the cursor stays on
    /// a kept entry.
    pub fn set_max_history_size(&mut self, max_history_size: usize) {
        self.config.max_history_size = max_history_size.max(1);
        while self.entries.len() > self.config.max_history_size {
            match self.cursor {
                Some(cursor) if cursor + 1 < self.entries.len() => {
                    self.entries.pop_back();
                }
                Some(cursor) => {
                    self.entries.pop_front();
                    self.cursor = Some(cursor.saturating_sub(1));
                }
                None => {
                    self.entries.pop_front();
                }
            }
        }
    }

    pub fn stats(&self) -> HistoryStats {
        let memory_bytes = self
            .entries
            .iter()
            .map(|entry| serde_json::to_vec(entry).map(|b| b.len()).unwrap_or(0))
            .sum();

        HistoryStats {
            total_snapshots: self.entries.len(),
            current_position: self.cursor.map(|c| c + 1).unwrap_or(0),
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            memory_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConflictPolicy;
    use project::{ProjectImage, Track, TrackKind, TrackUpdate};

    fn state_with_track() -> (ProjectState, project::TrackId) {
        let mut state = ProjectState::new();
        let track = Track::new("Track 1", TrackKind::Midi);
        let id = track.id;
        state.push_track(track);
        (state, id)
    }

    #[test]
    fn test_empty_engine() {
        let engine = HistoryEngine::new();

        assert!(engine.is_empty());
        assert_eq!(engine.cursor(), None);
        assert!(!engine.can_undo());
        assert!(!engine.can_redo());
        assert_eq!(engine.undo_description(), "Nothing to undo");
        assert_eq!(engine.stats().current_position, 0);
    }

    #[test]
    fn test_initialize_is_not_undoable() {
        let (mut state, _) = state_with_track();
        let mut engine = HistoryEngine::new();
        engine.initialize(&state, "Initial state");

        assert_eq!(engine.len(), 1);
        assert_eq!(engine.cursor(), Some(0));
        assert!(!engine.undo(&mut state));
        assert_eq!(engine.cursor(), Some(0));
    }

    #[test]
    fn test_undo_then_redo_mute() {
        let (mut state, id) = state_with_track();
        let mut engine = HistoryEngine::new();
        engine.initialize(&state, "Initial state");

        engine.snapshot(&state, "Mute track");
        state.update_track(id, &TrackUpdate::muted(true));
        assert_eq!(engine.undo_description(), "Mute track");

        assert!(engine.undo(&mut state));
        assert!(!state.track(id).unwrap().muted);
        assert_eq!(engine.redo_description(), "Mute track");

        assert!(engine.redo(&mut state));
        assert!(state.track(id).unwrap().muted);
        assert!(!engine.can_redo());
    }

    #[test]
    fn test_restore_is_one_revision() {
        let (mut state, id) = state_with_track();
        let mut engine = HistoryEngine::new();
        engine.initialize(&state, "Initial state");
        engine.snapshot(&state, "Rename track to \"Keys\"");
        state.update_track(id, &TrackUpdate::name("Keys"));
        let before = state.revision();

        assert!(engine.undo(&mut state));

        assert_eq!(state.revision(), before + 1);
        assert!(!engine.is_restoring());
    }

    #[test]
    fn test_failed_restore_rolls_back_cursor() {
        let (mut state, id) = state_with_track();
        let mut engine = HistoryEngine::new();
        engine.initialize(&state, "Initial state");
        engine.snapshot(&state, "Mute track");
        state.update_track(id, &TrackUpdate::muted(true));

        let mut broken = engine.entries[1].snapshot.clone();
        broken.image.settings.bpm = -1.0;
        engine.entries[1].snapshot = broken;
        let live = ProjectImage::capture(&state);

        assert!(!engine.undo(&mut state));
        assert_eq!(engine.cursor(), Some(1));
        assert!(engine.entries[1].redo_image().is_none());
        assert_eq!(ProjectImage::capture(&state), live);
        assert!(!engine.is_restoring());
    }

    #[test]
    fn test_restore_rejects_reentry() {
        let (mut state, _) = state_with_track();
        let engine = HistoryEngine::new();
        let snapshot = Snapshot::capture(&state, "Initial state");

        let _held = RestoreGuard::acquire(&engine.restoring).unwrap();
        assert!(engine.is_restoring());
        assert!(!engine.restore(&mut state, &snapshot));
    }

    #[test]
    fn test_snapshot_ignored_while_restoring() {
        let (state, _) = state_with_track();
        let mut engine = HistoryEngine::new();
        engine.initialize(&state, "Initial state");

        let flag = engine.restore_flag();
        flag.0.store(true, Ordering::Release);
        engine.snapshot(&state, "Mute track");
        flag.0.store(false, Ordering::Release);

        assert_eq!(engine.len(), 1);
        assert_eq!(engine.last_action_description(), "Initial state");
    }

    #[test]
    fn test_overwrite_policy_config() {
        let engine = HistoryEngine::with_config(
            HistoryConfig::default()
                .with_conflict_policy(ConflictPolicy::Overwrite)
                .with_max_history_size(0),
        );

        assert_eq!(engine.config().conflict_policy, ConflictPolicy::Overwrite);
        assert_eq!(engine.config().max_history_size, 1);
    }

    #[test]
    fn test_shrinking_bound_evicts_oldest() {
        let (state, _) = state_with_track();
        let mut engine = HistoryEngine::new();
        engine.initialize(&state, "Initial state");
        for i in 0..5 {
            engine.snapshot(&state, format!("Action {}", i));
        }

        engine.set_max_history_size(3);

        assert_eq!(engine.len(), 3);
        assert_eq!(engine.cursor(), Some(2));
        let descriptions: Vec<_> = engine.entries().map(|e| e.description()).collect();
        assert_eq!(descriptions, vec!["Action 2", "Action 3", "Action 4"]);
    }

    #[test]
    fn test_shrinking_bound_after_undo_keeps_redo_steps() {
        let (mut state, _) = state_with_track();
        let mut engine = HistoryEngine::new();
        engine.initialize(&state, "Initial state");
        for bpm in [100.0, 101.0, 102.0, 103.0] {
            engine.snapshot(&state, format!("Set BPM to {}", bpm));
            state.set_bpm(bpm);
        }
        while engine.undo(&mut state) {}
        assert_eq!(state.bpm(), 120.0);

        engine.set_max_history_size(3);

        assert_eq!(engine.len(), 3);
        assert_eq!(engine.cursor(), Some(0));
        assert!(!engine.can_undo());
        assert_eq!(engine.redo_description(), "Set BPM to 100");

        assert!(engine.redo(&mut state));
        assert_eq!(state.bpm(), 100.0);
        assert!(engine.redo(&mut state));
        assert_eq!(state.bpm(), 101.0);
        assert!(!engine.can_redo());
    }

    #[test]
    fn test_stats_report_memory() {
        let (state, _) = state_with_track();
        let mut engine = HistoryEngine::new();
        engine.initialize(&state, "Initial state");

        let stats = engine.stats();
        assert_eq!(stats.total_snapshots, 1);
        assert_eq!(stats.current_position, 1);
        assert!(stats.memory_bytes > 0);
    }
}
