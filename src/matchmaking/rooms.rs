//! Room registry: create, join, leave, close

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::session::PlayerId;

use super::waiting_room::{self, RoomLifecycle, WaitingRoom, WaitingRoomSettings};

/// Room errors, reported back to the requesting player
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room id is invalid")]
    NotFound,

    #[error("Room is full")]
    Full,

    #[error("Room needs space for at least one player")]
    InvalidCapacity,
}

/// A match container with a host and a capacity
#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub host: PlayerId,
    pub max_players: u32,
    /// Join order
    pub members: Vec<PlayerId>,
    pub started: bool,
    pub created_at: DateTime<Utc>,
    closed: bool,
}

impl Room {
    fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            host: self.host,
            max_players: self.max_players,
            current_players: self.members.len() as u32,
            members: self.members.clone(),
            started: self.started,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub host: PlayerId,
    pub max_players: u32,
    pub current_players: u32,
    pub members: Vec<PlayerId>,
    pub started: bool,
    pub created_at: DateTime<Utc>,
}

/// What happened when a player left a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    NotFound,
    Left { remaining: u32 },
    /// Host left or room emptied; these members still need to be told
    Closed { members: Vec<PlayerId> },
}

/// Owns every room and its waiting room.
///
/// The maps only guard id lookups; each room has its own lock.
pub struct RoomManager {
    rooms: DashMap<String, Arc<Mutex<Room>>>,
    waiting: Arc<DashMap<String, Arc<WaitingRoom>>>,
    settings: WaitingRoomSettings,
}

fn generate_room_id() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_string()
}

impl RoomManager {
    pub fn new(settings: WaitingRoomSettings) -> Self {
        Self {
            rooms: DashMap::new(),
            waiting: Arc::new(DashMap::new()),
            settings,
        }
    }

    /// Register a room with the host as its only member
    pub fn create_room(&self, host: PlayerId, max_players: u32) -> Result<String, RoomError> {
        if max_players == 0 {
            return Err(RoomError::InvalidCapacity);
        }

        loop {
            let id = generate_room_id();
            if let Entry::Vacant(slot) = self.rooms.entry(id.clone()) {
                slot.insert(Arc::new(Mutex::new(Room {
                    id: id.clone(),
                    host,
                    max_players,
                    members: vec![host],
                    started: false,
                    created_at: Utc::now(),
                    closed: false,
                })));
                info!(room_id = %id, host = %host, max_players, "Room created");
                return Ok(id);
            }
        }
    }

    fn room(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.get(room_id).map(|r| r.value().clone())
    }

    pub fn join_room(&self, room_id: &str, player: PlayerId) -> Result<RoomSummary, RoomError> {
        let room = self.room(room_id).ok_or(RoomError::NotFound)?;
        let mut room = room.lock();
        if room.closed {
            return Err(RoomError::NotFound);
        }
        if room.members.contains(&player) {
            return Ok(room.summary());
        }
        if room.members.len() as u32 >= room.max_players {
            return Err(RoomError::Full);
        }

        room.members.push(player);
        if let Some(waiting) = self.waiting_room(room_id) {
            waiting.player_joined();
        }

        info!(
            room_id = %room_id,
            player_id = %player,
            current = room.members.len(),
            max = room.max_players,
            "Player joined room"
        );
        Ok(room.summary())
    }

    /// Drop a member, closing the room if it empties or loses its host
    pub fn remove_client(&self, room_id: &str, player: PlayerId) -> RemoveOutcome {
        let Some(room) = self.room(room_id) else {
            return RemoveOutcome::NotFound;
        };
        let mut room = room.lock();
        if room.closed {
            return RemoveOutcome::NotFound;
        }

        let before = room.members.len();
        room.members.retain(|id| *id != player);
        if room.members.len() == before {
            return RemoveOutcome::Left {
                remaining: before as u32,
            };
        }

        if let Some(waiting) = self.waiting_room(room_id) {
            waiting.player_left();
        }

        if room.members.is_empty() || room.host == player {
            let members = self.close_locked(&mut room);
            return RemoveOutcome::Closed { members };
        }

        info!(room_id = %room_id, player_id = %player, "Player left room");
        RemoveOutcome::Left {
            remaining: room.members.len() as u32,
        }
    }

    /// Close a room explicitly, returning the members it still had
    pub fn close_room(&self, room_id: &str) -> Option<Vec<PlayerId>> {
        let room = self.room(room_id)?;
        let mut room = room.lock();
        if room.closed {
            return None;
        }
        Some(self.close_locked(&mut room))
    }

    fn close_locked(&self, room: &mut Room) -> Vec<PlayerId> {
        room.closed = true;
        self.rooms.remove(&room.id);
        if let Some((_, waiting)) = self.waiting.remove(&room.id) {
            waiting.cancel();
        }
        info!(room_id = %room.id, "Room closed");
        std::mem::take(&mut room.members)
    }

    pub fn get_room(&self, room_id: &str) -> Option<RoomSummary> {
        let room = self.room(room_id)?;
        let room = room.lock();
        (!room.closed).then(|| room.summary())
    }

    pub fn rooms(&self) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<Mutex<Room>>> = self.rooms.iter().map(|r| r.value().clone()).collect();
        rooms
            .iter()
            .map(|room| room.lock())
            .filter(|room| !room.closed)
            .map(|room| room.summary())
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn mark_started(&self, room_id: &str) -> bool {
        match self.room(room_id) {
            Some(room) => {
                let mut room = room.lock();
                room.started = !room.closed;
                room.started
            }
            None => false,
        }
    }

    pub fn is_started(&self, room_id: &str) -> bool {
        self.room(room_id)
            .map(|room| room.lock().started)
            .unwrap_or(false)
    }

    /// Begin the pre-game countdown for a room
    pub fn start_waiting_room(
        &self,
        room_id: &str,
        lifecycle: Arc<dyn RoomLifecycle>,
    ) -> Option<Arc<WaitingRoom>> {
        let room = self.room(room_id)?;
        let room = room.lock();
        if room.closed || room.started {
            return None;
        }

        Some(waiting_room::spawn(
            self.waiting.clone(),
            room.id.clone(),
            room.max_players,
            room.members.len() as u32,
            self.settings,
            lifecycle,
        ))
    }

    pub fn waiting_room(&self, room_id: &str) -> Option<Arc<WaitingRoom>> {
        self.waiting.get(room_id).map(|w| w.value().clone())
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Cancel every countdown and wait for their tasks
    pub async fn shutdown(&self) {
        let waiting: Vec<Arc<WaitingRoom>> = self.waiting.iter().map(|w| w.value().clone()).collect();
        self.waiting.clear();
        for room in &waiting {
            room.cancel();
        }
        for room in waiting {
            room.join().await;
        }
        info!("Room manager stopped");
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new(WaitingRoomSettings::default())
    }
}
