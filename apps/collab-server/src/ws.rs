use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use collaboration::{RoomId, SyncMessage, User, UserId};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{session::RelayRoom, AppState};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    room: Option<String>,
    user_id: Option<String>,
    user_name: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let room_id = query.room.map(RoomId::new).unwrap_or_default();

    let user_id = query
        .user_id
        .and_then(|id| id.parse::<Uuid>().ok())
        .map(UserId)
        .unwrap_or_default();

    let user = match query.user_name {
        Some(name) => User::new(user_id, name),
        None => User::anonymous(user_id),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id, user))
}

async fn handle_socket(socket: WebSocket, state: AppState, room_id: RoomId, user: User) {
    let user_id = user.id;
    info!(
        "New WebSocket connection: room={}, user={} ({})",
        room_id, user_id, user.name
    );

    let room = state.rooms.get_or_create(&room_id);

    let (mut ws_tx, mut ws_rx) = socket.split();

    let (greeting, mut broadcast_rx) = room.join(user);

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    match greeting.to_json() {
        Ok(json) => {
            if let Err(e) = ws_tx.send(Message::Text(json)).await {
                error!("Failed to send room state: {}", e);
                leave(&state, &room, user_id);
                return;
            }
        }
        Err(e) => error!("Failed to encode room state: {}", e),
    }

    let tx_clone = tx.clone();
    let broadcast_task = tokio::spawn(async move {
        loop {
            let envelope = match broadcast_rx.recv().await {
                Ok(envelope) => envelope,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("User {} lagged behind by {} messages", user_id, skipped);
                    continue;
                }
                Err(_) => break,
            };

            // Don't echo a participant's own messages back
            if envelope.from == Some(user_id) {
                continue;
            }

            match envelope.message.to_json() {
                Ok(json) => {
                    if tx_clone.send(Message::Text(json)).is_err() {
                        debug!("Failed to send broadcast: channel closed");
                        break;
                    }
                }
                Err(e) => error!("Failed to encode broadcast: {}", e),
            }
        }
    });

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_tx.send(msg).await {
                debug!("Failed to send message to WebSocket: {}", e);
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match handle_text_message(&text, &room, user_id, &tx) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => break,
                Err(e) => {
                    error!("Error handling message: {}", e);
                    let reply = SyncMessage::Error {
                        message: e.to_string(),
                    };
                    if let Ok(json) = reply.to_json() {
                        let _ = tx.send(Message::Text(json));
                    }
                }
            },
            Ok(Message::Binary(data)) => {
                debug!("Ignoring binary message ({} bytes)", data.len());
            }
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data));
            }
            Ok(Message::Pong(_)) => {
                debug!("Received pong");
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket closed by client");
                break;
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        }
    }

    broadcast_task.abort();
    send_task.abort();
    leave(&state, &room, user_id);
    info!("WebSocket disconnected: room={}, user={}", room_id, user_id);
}

fn leave(state: &AppState, room: &RelayRoom, user_id: UserId) {
    if let Some(user) = room.remove_user(user_id) {
        info!(
            "User {} left room {} ({} remaining)",
            user.name,
            room.id,
            room.user_count()
        );
    }
    state.rooms.remove_if_empty(&room.id);
}

fn handle_text_message(
    text: &str,
    room: &RelayRoom,
    user_id: UserId,
    tx: &mpsc::UnboundedSender<Message>,
) -> anyhow::Result<ControlFlow<()>> {
    let msg = SyncMessage::from_json(text)?;

    match msg {
        SyncMessage::Update { change } => {
            room.apply_update(user_id, change)?;
        }

        SyncMessage::Presence { update } => {
            debug!("Presence update from user {}: {:?}", user_id, update);
            room.relay_presence(user_id, update);
        }

        SyncMessage::Join { room: requested, user } => {
            if requested != room.id {
                anyhow::bail!("connected to room {}, cannot join {}", room.id, requested);
            }
            if user.id != user_id {
                anyhow::bail!("join for user {} on the connection of {}", user.id, user_id);
            }
            // Already greeted on connect; a later join only updates the name.
            info!("User {} renamed in room {}", user.name, room.id);
            room.add_user(user);
        }

        SyncMessage::Leave { .. } => return Ok(ControlFlow::Break(())),

        SyncMessage::Ping => {
            tx.send(Message::Text(SyncMessage::Pong.to_json()?))?;
        }

        SyncMessage::Pong => {
            debug!("Received pong from user {}", user_id);
        }

        SyncMessage::Joined { .. } | SyncMessage::Error { .. } => {
            warn!("Unexpected message type from user {}", user_id);
        }
    }

    Ok(ControlFlow::Continue(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use collaboration::{DocChange, Sequence};
    use serde_json::json;

    fn setup() -> (RelayRoom, UserId, mpsc::UnboundedReceiver<Message>, mpsc::UnboundedSender<Message>) {
        let room = RelayRoom::new("jam".into());
        let user = User::new(UserId::new(), "Alice");
        let user_id = user.id;
        room.add_user(user);
        let (tx, rx) = mpsc::unbounded_channel();
        (room, user_id, rx, tx)
    }

    fn reply(rx: &mut mpsc::UnboundedReceiver<Message>) -> SyncMessage {
        match rx.try_recv().unwrap() {
            Message::Text(text) => SyncMessage::from_json(&text).unwrap(),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_ping_is_answered() {
        let (room, user_id, mut rx, tx) = setup();
        let flow = handle_text_message(r#"{"type":"ping"}"#, &room, user_id, &tx).unwrap();

        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(reply(&mut rx), SyncMessage::Pong);
    }

    #[test]
    fn test_update_reaches_room_document() {
        let (room, user_id, _rx, tx) = setup();
        let message = SyncMessage::Update {
            change: DocChange::Push {
                sequence: Sequence::Clips,
                items: vec![json!({ "id": "c1" })],
            },
        };
        handle_text_message(&message.to_json().unwrap(), &room, user_id, &tx).unwrap();

        assert_eq!(room.document().clips.len(), 1);
    }

    #[test]
    fn test_later_join_only_renames() {
        let (room, user_id, mut rx, tx) = setup();
        let message = SyncMessage::Join {
            room: "jam".into(),
            user: User::new(user_id, "Alicia"),
        };
        handle_text_message(&message.to_json().unwrap(), &room, user_id, &tx).unwrap();

        let users = room.users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].name, "Alicia");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_join_for_another_room_is_rejected() {
        let (room, user_id, _rx, tx) = setup();
        let message = SyncMessage::Join {
            room: "other".into(),
            user: User::new(user_id, "Alice"),
        };

        assert!(handle_text_message(&message.to_json().unwrap(), &room, user_id, &tx).is_err());
    }

    #[test]
    fn test_leave_ends_the_connection() {
        let (room, user_id, _rx, tx) = setup();
        let message = SyncMessage::Leave { user_id };
        let flow = handle_text_message(&message.to_json().unwrap(), &room, user_id, &tx).unwrap();

        assert_eq!(flow, ControlFlow::Break(()));
    }

    #[test]
    fn test_malformed_message_is_an_error() {
        let (room, user_id, _rx, tx) = setup();
        assert!(handle_text_message("not json", &room, user_id, &tx).is_err());
    }
}
