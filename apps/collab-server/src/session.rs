use collaboration::{DocChange, DocImage, PresenceUpdate, RoomId, SyncMessage, User, UserId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// A relayed message and the participant it came from (`None` for the relay itself)
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: Option<UserId>,
    pub message: SyncMessage,
}

/// One shared document and the participants connected to it
pub struct RelayRoom {
    pub id: RoomId,
    document: Mutex<DocImage>,
    users: DashMap<UserId, User>,
    pub broadcast_tx: broadcast::Sender<Envelope>,
}

impl RelayRoom {
    pub fn new(id: RoomId) -> Self {
        let (broadcast_tx, _) = broadcast::channel(1000);
        Self {
            id,
            document: Mutex::new(DocImage::default()),
            users: DashMap::new(),
            broadcast_tx,
        }
    }

    /// Adds `user` and hands back their greeting together with their feed.
    /// The copy and the subscription happen under the document lock, so every
    /// update is either in the greeting or on the feed, never both.
    pub fn join(&self, user: User) -> (SyncMessage, broadcast::Receiver<Envelope>) {
        let document = self.document.lock();
        let feed = self.broadcast_tx.subscribe();
        let user_id = user.id;
        self.add_user(user);
        let greeting = SyncMessage::Joined {
            room: self.id.clone(),
            user_id,
            document: document.clone(),
            users: self.users(),
        };
        (greeting, feed)
    }

    pub fn document(&self) -> DocImage {
        self.document.lock().clone()
    }

    /// Sorted by name so every participant lists the room the same way
    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|entry| entry.value().clone()).collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.0.cmp(&b.id.0)));
        users
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Adds or renames `user` and tells the others
    pub fn add_user(&self, user: User) {
        let user_id = user.id;
        self.users.insert(user_id, user.clone());
        self.broadcast(
            Some(user_id),
            SyncMessage::Presence {
                update: PresenceUpdate::UserJoined { user },
            },
        );
    }

    pub fn remove_user(&self, user_id: UserId) -> Option<User> {
        let (_, user) = self.users.remove(&user_id)?;
        self.broadcast(
            None,
            SyncMessage::Presence {
                update: PresenceUpdate::UserLeft { user_id },
            },
        );
        Some(user)
    }

    /// Applies a participant's change to the room document and relays it.
    /// A change the document rejects is not relayed.
    pub fn apply_update(&self, from: UserId, change: DocChange) -> collaboration::Result<()> {
        let mut document = self.document.lock();
        let container = document.apply(&change)?;
        debug!(room = %self.id, user = %from, %container, "relaying update");
        // Still under the lock: the order on the feed is the order applied.
        self.broadcast(Some(from), SyncMessage::Update { change });
        Ok(())
    }

    pub fn relay_presence(&self, from: UserId, update: PresenceUpdate) {
        self.broadcast(Some(from), SyncMessage::Presence { update });
    }

    fn broadcast(&self, from: Option<UserId>, message: SyncMessage) {
        // No receivers is fine: the room may be down to its last participant.
        let _ = self.broadcast_tx.send(Envelope { from, message });
    }
}

/// Manages all relay rooms
#[derive(Default)]
pub struct RoomManager {
    rooms: DashMap<RoomId, Arc<RelayRoom>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, room_id: &RoomId) -> Arc<RelayRoom> {
        self.rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                info!("Created room: {}", room_id);
                Arc::new(RelayRoom::new(room_id.clone()))
            })
            .clone()
    }

    /// Drops the room once its last participant has left
    pub fn remove_if_empty(&self, room_id: &RoomId) -> bool {
        let removed = self
            .rooms
            .remove_if(room_id, |_, room| room.is_empty())
            .is_some();
        if removed {
            info!("Room {} is empty, removed", room_id);
        }
        removed
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
