/// Per-room controllers
/// Each room owns its model, history, presence and notification queue, so any
/// number of rooms can live in one process.
use project::ProjectState;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    ActionGateway, CollaborationConfig, CollaborationError, ConnectionStatus, Container,
    IngestOutcome, PresenceRegistry, PresenceUpdate, Result, RoomId, SharedStateChannel, User,
};

/// One participant's view of one room.
///
/// Channel observers only enqueue the container that changed; `pump` re-reads
/// each queued container once, so multi-step writes are seen in their final
/// form.
pub struct RoomSession {
    room: RoomId,
    user: User,
    gateway: ActionGateway,
    presence: PresenceRegistry,
    status: ConnectionStatus,
    notifier: mpsc::UnboundedSender<Container>,
    notifications: mpsc::UnboundedReceiver<Container>,
}

impl RoomSession {
    pub fn new(room: RoomId, user: User, config: &CollaborationConfig) -> Self {
        let (notifier, notifications) = mpsc::unbounded_channel();
        Self {
            room,
            user,
            gateway: ActionGateway::new(config),
            presence: PresenceRegistry::new(),
            status: ConnectionStatus::Disconnected,
            notifier,
            notifications,
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn gateway(&self) -> &ActionGateway {
        &self.gateway
    }

    pub fn state(&self) -> &ProjectState {
        self.gateway.state()
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn presence_mut(&mut self) -> &mut PresenceRegistry {
        &mut self.presence
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Subscribes to `channel` and syncs with it.
    pub fn connect(&mut self, channel: Arc<dyn SharedStateChannel>) -> Result<IngestOutcome> {
        self.status = ConnectionStatus::Connecting;
        for container in Container::ALL {
            let notifier = self.notifier.clone();
            channel.observe(
                container,
                Arc::new(move || {
                    // receiver gone means the room was dropped
                    let _ = notifier.send(container);
                }),
            );
        }

        let outcome = match self.gateway.attach_channel(channel) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.status = ConnectionStatus::Error;
                return Err(err);
            }
        };
        self.pump();

        self.presence.join(self.user.clone());
        self.status = ConnectionStatus::Connected;
        info!(room = %self.room, user = %self.user.id, "connected");
        Ok(outcome)
    }

    pub fn disconnect(&mut self) {
        self.gateway.detach_channel();
        while self.notifications.try_recv().is_ok() {}
        self.presence.clear();
        self.status = ConnectionStatus::Disconnected;
        info!(room = %self.room, "disconnected");
    }

    /// Ingests every pending notification. Safe to call at any time.
    pub fn pump(&mut self) -> IngestOutcome {
        let mut pending = BTreeSet::new();
        while let Ok(container) = self.notifications.try_recv() {
            pending.insert(container);
        }

        let mut outcome = IngestOutcome::default();
        for container in pending {
            match self.gateway.ingest(container) {
                Ok(step) => outcome.merge(step),
                Err(CollaborationError::ChannelUnavailable) => {
                    debug!(%container, "notification after disconnect ignored");
                }
                Err(err) => debug!(%container, "ingest failed: {}", err),
            }
        }
        outcome
    }

    /// Runs a local edit against fresh shared state.
    pub fn edit<R>(&mut self, action: impl FnOnce(&mut ActionGateway) -> R) -> R {
        self.pump();
        action(&mut self.gateway)
    }

    pub fn undo(&mut self) -> bool {
        self.pump();
        self.gateway.undo()
    }

    pub fn redo(&mut self) -> bool {
        self.pump();
        self.gateway.redo()
    }

    pub fn apply_presence(&mut self, update: &PresenceUpdate) {
        self.presence.apply(update);
    }

    /// Presence update announcing this participant's current selection
    pub fn selection_update(&self) -> PresenceUpdate {
        PresenceUpdate::SelectionChanged {
            user_id: self.user.id,
            selection: self.state().selection(),
        }
    }
}

/// Rooms open in this process, by id
pub struct RoomRegistry {
    config: CollaborationConfig,
    rooms: HashMap<RoomId, RoomSession>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(CollaborationConfig::default())
    }
}

impl RoomRegistry {
    pub fn new(config: CollaborationConfig) -> Self {
        Self {
            config,
            rooms: HashMap::new(),
        }
    }

    pub fn config(&self) -> &CollaborationConfig {
        &self.config
    }

    /// Returns the room, creating it for `user` if needed.
    pub fn open(&mut self, room: RoomId, user: User) -> &mut RoomSession {
        let config = &self.config;
        self.rooms.entry(room.clone()).or_insert_with(|| {
            info!(%room, "opening room");
            RoomSession::new(room, user, config)
        })
    }

    pub fn open_default(&mut self, user: User) -> &mut RoomSession {
        let room = RoomId::new(self.config.default_room.clone());
        self.open(room, user)
    }

    pub fn get(&self, room: &RoomId) -> Option<&RoomSession> {
        self.rooms.get(room)
    }

    pub fn session_mut(&mut self, room: &RoomId) -> Result<&mut RoomSession> {
        self.rooms
            .get_mut(room)
            .ok_or_else(|| CollaborationError::RoomNotFound(room.clone()))
    }

    pub fn close(&mut self, room: &RoomId) -> Option<RoomSession> {
        let mut session = self.rooms.remove(room)?;
        session.disconnect();
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn room_ids(&self) -> Vec<&RoomId> {
        let mut ids: Vec<_> = self.rooms.keys().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SharedDocument, UserId};
    use project::{TrackKind, TrackUpdate};

    fn session() -> RoomSession {
        RoomSession::new(
            RoomId::default(),
            User::new(UserId::new(), "Alice"),
            &CollaborationConfig::default(),
        )
    }

    #[test]
    fn test_connect_seeds_empty_channel() {
        let mut room = session();
        room.edit(|g| g.add_track(TrackKind::Midi));
        let doc = SharedDocument::new();

        room.connect(Arc::new(doc.clone())).unwrap();

        assert!(room.status().is_connected());
        assert_eq!(doc.sequence(crate::Sequence::Tracks).len(), 1);
        assert_eq!(room.presence().user_count(), 1);
    }

    #[test]
    fn test_own_writes_are_not_stamped() {
        let mut room = session();
        let doc = SharedDocument::new();
        room.connect(Arc::new(doc)).unwrap();

        let track = room.edit(|g| g.add_track(TrackKind::Midi));
        room.edit(|g| g.update_track(track.id, TrackUpdate::muted(true)));
        let outcome = room.pump();

        assert!(!outcome.replaced);
        assert!(room.state().provenance().is_empty());
    }

    #[test]
    fn test_pump_without_channel() {
        let mut room = session();
        room.connect(Arc::new(SharedDocument::new())).unwrap();
        room.disconnect();

        assert_eq!(room.pump(), IngestOutcome::default());
        assert_eq!(room.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_registry_keeps_rooms_apart() {
        let mut registry = RoomRegistry::default();
        let user = User::new(UserId::new(), "Alice");

        registry
            .open("a".into(), user.clone())
            .edit(|g| g.add_track(TrackKind::Midi));
        registry.open("b".into(), user.clone());
        registry.open_default(user);

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get(&"a".into()).unwrap().state().track_count(), 1);
        assert_eq!(registry.get(&"b".into()).unwrap().state().track_count(), 0);
        assert_eq!(registry.room_ids()[0].as_str(), "a");

        assert!(registry.close(&"b".into()).is_some());
        assert!(matches!(
            registry.session_mut(&"b".into()),
            Err(CollaborationError::RoomNotFound(_))
        ));
    }
}
