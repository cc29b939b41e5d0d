//! Shared user and room registries.
//!
//! Locking order, top to bottom: user registry, then room registry, then an
//! individual room's members. [`RoomRegistry::leave`] is the only operation
//! that mutates the registry map while a members lock is held; it acquires
//! the registry write lock first.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::protocol::Response;

/// The permanent default room every connected user is placed in.
pub const GENERAL_ROOM: &str = "general";

/// Outbound responses buffered per user before senders block.
pub const OUTBOUND_QUEUE_DEPTH: usize = 32;

/// One connected (or still connecting) client.
///
/// The display name is unset until the Connect handshake succeeds; an unset
/// name marks the session as pending. The outbound sender is shared so any
/// session can enqueue responses for this user; only the owning session ever
/// receives from the paired receiver.
pub struct User {
    name: OnceLock<String>,
    outgoing: mpsc::Sender<Response>,
}

impl User {
    /// Create a user together with the receiving side of its outbound queue.
    pub fn new() -> (Arc<User>, mpsc::Receiver<Response>) {
        let (outgoing, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let user = Arc::new(User {
            name: OnceLock::new(),
            outgoing,
        });
        (user, rx)
    }

    /// The display name, if the Connect handshake has completed.
    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    /// Whether the Connect handshake has completed.
    pub fn connected(&self) -> bool {
        self.name.get().is_some()
    }

    /// Record the display name. The name is written exactly once, under the
    /// user registry lock, so it can never disagree with the registry key.
    fn set_name(&self, name: String) {
        let _ = self.name.set(name);
    }

    /// Enqueue a response on this user's outbound queue, waiting while the
    /// queue is full. A closed queue means the session is already tearing
    /// down; the registry sweep handles the rest.
    pub async fn send(&self, response: Response) {
        let _ = self.outgoing.send(response).await;
    }
}

/// A named room holding its current members.
pub struct Room {
    name: String,
    members: RwLock<HashMap<String, Arc<User>>>,
}

impl Room {
    fn new(name: impl Into<String>) -> Self {
        Room {
            name: name.into(),
            members: RwLock::new(HashMap::new()),
        }
    }

    /// The room name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a member; idempotent for existing members.
    pub async fn insert(&self, name: &str, user: Arc<User>) {
        self.members.write().await.insert(name.to_string(), user);
    }

    /// Whether `name` is a current member.
    pub async fn contains(&self, name: &str) -> bool {
        self.members.read().await.contains_key(name)
    }

    /// Snapshot of current member names.
    pub async fn member_names(&self) -> Vec<String> {
        self.members.read().await.keys().cloned().collect()
    }

    /// Current member count.
    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// Deliver a response to every member except `sender`, in one pass under
    /// the members lock so one sender's messages reach each recipient in
    /// send order.
    pub async fn broadcast(&self, sender: &str, response: &Response) {
        let members = self.members.read().await;
        for (name, user) in members.iter() {
            if name != sender {
                user.send(response.clone()).await;
            }
        }
    }
}

/// All connected users, keyed by display name.
#[derive(Default)]
pub struct UserRegistry {
    users: RwLock<HashMap<String, Arc<User>>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `name` for `user`. Returns false if the name is taken; on
    /// success the user's display name is set under the registry lock.
    pub async fn insert(&self, name: &str, user: &Arc<User>) -> bool {
        let mut users = self.users.write().await;
        if users.contains_key(name) {
            return false;
        }
        user.set_name(name.to_string());
        users.insert(name.to_string(), Arc::clone(user));
        true
    }

    /// Look up a connected user by name.
    pub async fn get(&self, name: &str) -> Option<Arc<User>> {
        self.users.read().await.get(name).cloned()
    }

    /// Remove a user by name.
    pub async fn remove(&self, name: &str) -> Option<Arc<User>> {
        self.users.write().await.remove(name)
    }

    /// Snapshot of connected user names.
    pub async fn names(&self) -> Vec<String> {
        self.users.read().await.keys().cloned().collect()
    }
}

/// All rooms, keyed by name, bootstrapped with the permanent general room.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    general: Arc<Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        let general = Arc::new(Room::new(GENERAL_ROOM));
        let mut rooms = HashMap::new();
        rooms.insert(GENERAL_ROOM.to_string(), Arc::clone(&general));
        RoomRegistry {
            rooms: RwLock::new(rooms),
            general,
        }
    }

    /// The permanent general room.
    pub fn general(&self) -> &Arc<Room> {
        &self.general
    }

    /// Look up a room by name.
    pub async fn get(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(name).cloned()
    }

    /// Create an empty room. Returns false if the name is taken.
    pub async fn create(&self, name: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(name) {
            return false;
        }
        rooms.insert(name.to_string(), Arc::new(Room::new(name)));
        true
    }

    /// Room names, restricted to rooms containing `user` when non-empty.
    pub async fn list(&self, user: &str) -> Vec<String> {
        let rooms = self.rooms.read().await;
        let mut names = Vec::with_capacity(rooms.len());
        for (name, room) in rooms.iter() {
            if user.is_empty() || room.contains(user).await {
                names.push(name.clone());
            }
        }
        names
    }

    /// Remove `user` from `room`, deleting the room if it is left empty and
    /// is not the general room. Returns false if the room does not exist.
    pub async fn leave(&self, room: &str, user: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(target) = rooms.get(room).cloned() else {
            return false;
        };
        let empty = {
            let mut members = target.members.write().await;
            members.remove(user);
            members.is_empty()
        };
        if empty && room != GENERAL_ROOM {
            rooms.remove(room);
            debug!(room, "removed empty room");
        }
        true
    }

    /// Remove `user` from every room, deleting rooms left empty (general
    /// excepted). Runs during session teardown.
    pub async fn remove_everywhere(&self, user: &str) {
        let mut rooms = self.rooms.write().await;
        let mut emptied = Vec::new();
        for (name, room) in rooms.iter() {
            let mut members = room.members.write().await;
            members.remove(user);
            if members.is_empty() && name != GENERAL_ROOM {
                emptied.push(name.clone());
            }
        }
        for name in emptied {
            rooms.remove(&name);
            debug!(room = %name, "removed empty room");
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
