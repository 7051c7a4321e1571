/// User presence tracking for a collaborative room
/// Who is connected, how they are drawn, and what they have selected.
use chrono::{DateTime, Duration, Utc};
use project::Selection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::UserId;

/// Participant as shown to the others
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub color: UserColor,
}

impl User {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: UserColor::from_user_id(id),
        }
    }

    /// "User NNN" with a number derived from the id
    pub fn anonymous(id: UserId) -> Self {
        let bytes = id.0.as_bytes();
        let number = u16::from_be_bytes([bytes[4], bytes[5]]) % 1000;
        Self::new(id, format!("User {}", number))
    }
}

/// Color assigned to a user for selection highlighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl UserColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Deterministic per user; hue from the id, fixed saturation and lightness
    pub fn from_user_id(user_id: UserId) -> Self {
        let bytes = user_id.0.as_bytes();
        let hue = u16::from_be_bytes([bytes[0], bytes[1]]) % 360;
        Self::from_hsl(f64::from(hue), 0.7, 0.5)
    }

    fn from_hsl(hue: f64, saturation: f64, lightness: f64) -> Self {
        let chroma = (1.0 - (2.0 * lightness - 1.0).abs()) * saturation;
        let sector = hue / 60.0;
        let x = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
        let (r, g, b) = match sector as u8 {
            0 => (chroma, x, 0.0),
            1 => (x, chroma, 0.0),
            2 => (0.0, chroma, x),
            3 => (0.0, x, chroma),
            4 => (x, 0.0, chroma),
            _ => (chroma, 0.0, x),
        };
        let m = lightness - chroma / 2.0;
        let channel = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Self::new(channel(r), channel(g), channel(b))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

/// User's current state in the room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPresence {
    pub user: User,
    pub selection: Selection,
    pub last_activity: DateTime<Utc>,
}

impl UserPresence {
    pub fn new(user: User) -> Self {
        Self {
            user,
            selection: Selection::default(),
            last_activity: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// No activity for 60 seconds
    pub fn is_idle(&self) -> bool {
        Utc::now() - self.last_activity > Duration::seconds(60)
    }
}

/// Presence update message (sent via WebSocket)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceUpdate {
    UserJoined { user: User },
    UserLeft { user_id: UserId },
    SelectionChanged { user_id: UserId, selection: Selection },
}

/// Users present in one room
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    users: HashMap<UserId, UserPresence>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, user: User) {
        self.users.insert(user.id, UserPresence::new(user));
    }

    pub fn leave(&mut self, user_id: &UserId) -> Option<UserPresence> {
        self.users.remove(user_id)
    }

    pub fn get(&self, user_id: &UserId) -> Option<&UserPresence> {
        self.users.get(user_id)
    }

    pub fn apply(&mut self, update: &PresenceUpdate) {
        match update {
            PresenceUpdate::UserJoined { user } => self.join(user.clone()),
            PresenceUpdate::UserLeft { user_id } => {
                self.leave(user_id);
            }
            PresenceUpdate::SelectionChanged { user_id, selection } => {
                if let Some(presence) = self.users.get_mut(user_id) {
                    presence.selection = *selection;
                    presence.touch();
                }
            }
        }
    }

    /// Replaces everyone, e.g. with the list received on join
    pub fn replace(&mut self, users: impl IntoIterator<Item = User>) {
        self.users = users
            .into_iter()
            .map(|user| (user.id, UserPresence::new(user)))
            .collect();
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Users ordered by name
    pub fn users_list(&self) -> Vec<&User> {
        let mut users: Vec<&User> = self.users.values().map(|p| &p.user).collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users
    }

    pub fn active_users(&self) -> Vec<&UserPresence> {
        self.users.values().filter(|p| !p.is_idle()).collect()
    }

    /// Drops users inactive for longer than `max_idle`
    pub fn cleanup_idle(&mut self, max_idle: Duration) {
        let now = Utc::now();
        self.users
            .retain(|_, presence| now - presence.last_activity <= max_idle);
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}
