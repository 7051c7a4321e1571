/// WebSocket synchronization protocol between participants and the relay
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    ConnectionStatus, DocChange, DocImage, PresenceRegistry, PresenceUpdate, Result, RoomId,
    SharedDocument, User, UserId,
};

/// Message types exchanged between client and server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    // Connection management
    Join {
        room: RoomId,
        user: User,
    },

    /// Sent to a joining client: the room's document and who is there
    Joined {
        room: RoomId,
        user_id: UserId,
        document: DocImage,
        users: Vec<User>,
    },

    Leave {
        user_id: UserId,
    },

    // Document synchronization
    Update {
        change: DocChange,
    },

    // Presence updates
    Presence {
        update: PresenceUpdate,
    },

    // Error handling
    Error {
        message: String,
    },

    // Heartbeat
    Ping,
    Pong,
}

impl SyncMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Client side of the relay connection for one shared document.
///
/// Transport-agnostic: the caller moves messages between this and a socket.
pub struct SyncClient {
    room: RoomId,
    user: User,
    document: SharedDocument,
    outbox: mpsc::UnboundedReceiver<DocChange>,
    status: ConnectionStatus,
}

impl SyncClient {
    pub fn new(room: RoomId, user: User, document: SharedDocument) -> Self {
        let (tx, outbox) = mpsc::unbounded_channel();
        document.set_outbox(tx);
        Self {
            room,
            user,
            document,
            outbox,
            status: ConnectionStatus::Connecting,
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// WebSocket endpoint for this client's room on `server_url`
    pub fn endpoint(&self, server_url: &str) -> String {
        format!(
            "{}/ws?room={}&user_id={}",
            server_url.trim_end_matches('/'),
            self.room,
            self.user.id
        )
    }

    pub fn join_message(&self) -> SyncMessage {
        SyncMessage::Join {
            room: self.room.clone(),
            user: self.user.clone(),
        }
    }

    /// Local document changes not yet sent
    pub fn drain_outgoing(&mut self) -> Vec<SyncMessage> {
        let mut messages = Vec::new();
        while let Ok(change) = self.outbox.try_recv() {
            messages.push(SyncMessage::Update { change });
        }
        messages
    }

    pub async fn next_outgoing(&mut self) -> Option<SyncMessage> {
        self.outbox
            .recv()
            .await
            .map(|change| SyncMessage::Update { change })
    }

    /// Applies a message from the relay. Returns a reply to send, if any.
    pub fn handle(
        &mut self,
        message: SyncMessage,
        presence: &mut PresenceRegistry,
    ) -> Result<Option<SyncMessage>> {
        match message {
            SyncMessage::Joined {
                room,
                user_id,
                document,
                users,
            } => {
                info!(%room, user = %user_id, users = users.len(), "joined room");
                self.document.load(document);
                presence.replace(users);
                self.status = ConnectionStatus::Connected;
            }
            SyncMessage::Update { change } => {
                self.document.apply_remote(&change)?;
            }
            SyncMessage::Presence { update } => presence.apply(&update),
            SyncMessage::Leave { user_id } => {
                presence.leave(&user_id);
            }
            SyncMessage::Ping => return Ok(Some(SyncMessage::Pong)),
            SyncMessage::Pong => debug!("received pong"),
            SyncMessage::Error { message } => {
                warn!("relay reported an error: {}", message);
                self.status = ConnectionStatus::Error;
            }
            SyncMessage::Join { .. } => debug!("ignoring join sent to a client"),
        }
        Ok(None)
    }

    pub fn disconnect(&mut self) {
        self.document.clear_outbox();
        self.outbox.close();
        self.status = ConnectionStatus::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Sequence, SharedStateChannel};
    use serde_json::json;

    #[test]
    fn test_message_wire_format() {
        let message = SyncMessage::Update {
            change: DocChange::Set {
                key: "bpm".into(),
                value: json!(128.0),
            },
        };
        let json = message.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "update");
        assert_eq!(value["change"]["op"], "set");
        assert_eq!(SyncMessage::from_json(&json).unwrap(), message);
        assert_eq!(SyncMessage::from_json(r#"{"type":"ping"}"#).unwrap(), SyncMessage::Ping);
    }

    #[test]
    fn test_client_forwards_local_changes() {
        let document = SharedDocument::new();
        let mut client = SyncClient::new(RoomId::default(), User::anonymous(UserId::new()), document.clone());

        document.push(Sequence::Tracks, vec![json!({ "id": "a" })]);
        let outgoing = client.drain_outgoing();

        assert_eq!(outgoing.len(), 1);
        assert!(matches!(outgoing[0], SyncMessage::Update { .. }));
        assert!(client.drain_outgoing().is_empty());
    }

    #[test]
    fn test_client_handles_join_and_updates() {
        let document = SharedDocument::new();
        let user = User::new(UserId::new(), "Alice");
        let mut client = SyncClient::new("jam".into(), user.clone(), document.clone());
        let mut presence = PresenceRegistry::new();
        assert_eq!(client.status(), ConnectionStatus::Connecting);

        let mut image = DocImage::default();
        image.tracks.push(json!({ "id": "t1" }));
        client
            .handle(
                SyncMessage::Joined {
                    room: "jam".into(),
                    user_id: user.id,
                    document: image,
                    users: vec![user.clone()],
                },
                &mut presence,
            )
            .unwrap();

        assert!(client.status().is_connected());
        assert_eq!(document.sequence(Sequence::Tracks).len(), 1);
        assert_eq!(presence.user_count(), 1);

        client
            .handle(
                SyncMessage::Update {
                    change: DocChange::Delete {
                        sequence: Sequence::Tracks,
                        index: 0,
                        count: 1,
                    },
                },
                &mut presence,
            )
            .unwrap();
        assert!(document.sequence(Sequence::Tracks).is_empty());
        // remote changes are not echoed back
        assert!(client.drain_outgoing().is_empty());

        let reply = client.handle(SyncMessage::Ping, &mut presence).unwrap();
        assert_eq!(reply, Some(SyncMessage::Pong));
    }

    #[test]
    fn test_endpoint() {
        let user = User::new(UserId::new(), "Alice");
        let client = SyncClient::new("jam".into(), user.clone(), SharedDocument::new());

        assert_eq!(
            client.endpoint("ws://localhost:1234/"),
            format!("ws://localhost:1234/ws?room=jam&user_id={}", user.id)
        );
    }

    #[test]
    fn test_disconnect_stops_forwarding() {
        let document = SharedDocument::new();
        let mut client = SyncClient::new(RoomId::default(), User::anonymous(UserId::new()), document.clone());

        client.disconnect();
        document.set("name", json!("Offline"));

        assert!(client.drain_outgoing().is_empty());
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }
}
