//! Principals and the room catalog, loaded from one JSON file.
//!
//! ```json
//! {
//!   "rooms": [{ "id": 1, "name": "LT-1", "capacity": 120, "has_projector": true }],
//!   "users": [{ "login": "rep", "id": 7, "role": "STUDENT_REP", "password": "secret" }]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::limits::MAX_LOGIN_LEN;
use crate::model::{Principal, Role, Room, RoomId, UserId};

#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub login: String,
    pub id: UserId,
    pub role: Role,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    rooms: Vec<Room>,
    #[serde(default)]
    users: Vec<UserEntry>,
}

#[derive(Debug)]
pub enum DirectoryError {
    Io(std::io::Error),
    Json(serde_json::Error),
    DuplicateRoom(RoomId),
    DuplicateLogin(String),
    LoginTooLong(String),
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryError::Io(e) => write!(f, "directory io error: {e}"),
            DirectoryError::Json(e) => write!(f, "directory parse error: {e}"),
            DirectoryError::DuplicateRoom(id) => write!(f, "duplicate room id: {id}"),
            DirectoryError::DuplicateLogin(l) => write!(f, "duplicate login: {l}"),
            DirectoryError::LoginTooLong(l) => write!(f, "login too long: {l}"),
        }
    }
}

impl std::error::Error for DirectoryError {}

impl From<std::io::Error> for DirectoryError {
    fn from(e: std::io::Error) -> Self {
        DirectoryError::Io(e)
    }
}

impl From<serde_json::Error> for DirectoryError {
    fn from(e: serde_json::Error) -> Self {
        DirectoryError::Json(e)
    }
}

/// Read-only lookup of rooms and logins.
#[derive(Debug, Default)]
pub struct Directory {
    rooms: HashMap<RoomId, Room>,
    users: HashMap<String, UserEntry>,
}

impl Directory {
    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, DirectoryError> {
        let file: DirectoryFile = serde_json::from_str(raw)?;
        Self::build(file.rooms, file.users)
    }

    pub fn build(rooms: Vec<Room>, users: Vec<UserEntry>) -> Result<Self, DirectoryError> {
        let mut dir = Directory::default();
        for room in rooms {
            let id = room.id;
            if dir.rooms.insert(id, room).is_some() {
                return Err(DirectoryError::DuplicateRoom(id));
            }
        }
        for user in users {
            if user.login.len() > MAX_LOGIN_LEN {
                return Err(DirectoryError::LoginTooLong(user.login));
            }
            let login = user.login.clone();
            if dir.users.insert(login.clone(), user).is_some() {
                return Err(DirectoryError::DuplicateLogin(login));
            }
        }
        Ok(dir)
    }

    pub fn room(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    /// Display name for messages; falls back to the numeric id.
    pub fn room_name(&self, id: RoomId) -> String {
        self.rooms
            .get(&id)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// All rooms sorted by id.
    pub fn rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.values().cloned().collect();
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    pub fn principal(&self, login: &str) -> Option<Principal> {
        self.users.get(login).map(|u| Principal {
            id: u.id,
            role: u.role,
        })
    }

    pub fn password(&self, login: &str) -> Option<&str> {
        self.users.get(login).map(|u| u.password.as_str())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}
