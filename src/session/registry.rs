//! Connected players and their outbound queues

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::game::{Team, LOBBY_GAME_ID};
use crate::ws::protocol::ServerMsg;

pub type PlayerId = Uuid;

/// Outcome of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// Queue full, message dropped
    Dropped,
    /// Writer is gone
    Closed,
}

/// A connected player
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub team: Team,
    /// `None` while in the lobby
    pub room_id: Option<String>,
    pub addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    queue: mpsc::Sender<ServerMsg>,
}

impl Player {
    /// Id of the game this player is currently part of
    pub fn game_id(&self) -> &str {
        self.room_id.as_deref().unwrap_or(LOBBY_GAME_ID)
    }

    pub fn enqueue(&self, msg: ServerMsg) -> Enqueue {
        match self.queue.try_send(msg) {
            Ok(()) => Enqueue::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Enqueue::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }
}

/// Registry of connected players.
///
/// One lock guards the whole map; it is only held for lookups and mutation.
pub struct SessionRegistry {
    players: RwLock<HashMap<PlayerId, Player>>,
    queue_capacity: usize,
}

impl SessionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            players: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new connection. The receiver feeds the player's writer task.
    pub fn register(&self, addr: Option<SocketAddr>) -> (PlayerId, mpsc::Receiver<ServerMsg>) {
        let (queue, rx) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();
        let player = Player {
            id,
            team: Team::Left,
            room_id: None,
            addr,
            connected_at: Utc::now(),
            queue,
        };
        self.players.write().insert(id, player);
        info!(player_id = %id, "Player registered");
        (id, rx)
    }

    pub fn get(&self, id: &PlayerId) -> Option<Player> {
        self.players.read().get(id).cloned()
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.players.read().contains_key(id)
    }

    pub fn set_team(&self, id: &PlayerId, team: Team) {
        if let Some(player) = self.players.write().get_mut(id) {
            player.team = team;
        }
    }

    pub fn set_room(&self, id: &PlayerId, room_id: Option<String>) {
        if let Some(player) = self.players.write().get_mut(id) {
            player.room_id = room_id;
        }
    }

    /// Forget a player. Dropping the record closes its outbound queue.
    pub fn remove(&self, id: &PlayerId) -> Option<Player> {
        let removed = self.players.write().remove(id);
        if removed.is_some() {
            info!(player_id = %id, "Player unregistered");
        }
        removed
    }

    /// Players currently in the given game
    pub fn members_of(&self, game_id: &str) -> Vec<Player> {
        self.players
            .read()
            .values()
            .filter(|p| p.game_id() == game_id)
            .cloned()
            .collect()
    }

    pub fn count_in_game(&self, game_id: &str) -> usize {
        self.players
            .read()
            .values()
            .filter(|p| p.game_id() == game_id)
            .count()
    }

    pub fn all(&self) -> Vec<Player> {
        self.players.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.players.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_players_start_in_the_lobby() {
        let registry = SessionRegistry::new(8);
        let (id, _rx) = registry.register(None);
        let player = registry.get(&id).unwrap();
        assert_eq!(player.room_id, None);
        assert_eq!(player.game_id(), LOBBY_GAME_ID);
        assert_eq!(registry.count_in_game(LOBBY_GAME_ID), 1);
    }

    #[test]
    fn room_membership_changes_game() {
        let registry = SessionRegistry::new(8);
        let (a, _rx_a) = registry.register(None);
        let (b, _rx_b) = registry.register(None);
        registry.set_room(&a, Some("abc123".to_string()));
        registry.set_team(&a, Team::Right);

        let members = registry.members_of("abc123");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, a);
        assert_eq!(members[0].team, Team::Right);
        assert_eq!(registry.members_of(LOBBY_GAME_ID)[0].id, b);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let registry = SessionRegistry::new(2);
        let (id, mut rx) = registry.register(None);
        let player = registry.get(&id).unwrap();

        assert_eq!(player.enqueue(ServerMsg::error("1")), Enqueue::Queued);
        assert_eq!(player.enqueue(ServerMsg::error("2")), Enqueue::Queued);
        assert_eq!(player.enqueue(ServerMsg::error("3")), Enqueue::Dropped);

        assert_eq!(rx.try_recv().unwrap(), ServerMsg::error("1"));
        assert_eq!(rx.try_recv().unwrap(), ServerMsg::error("2"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn removing_closes_the_queue() {
        let registry = SessionRegistry::new(4);
        let (id, mut rx) = registry.register(None);
        let player = registry.remove(&id).unwrap();
        drop(player);

        assert!(rx.try_recv().is_err());
        assert!(registry.is_empty());
        assert!(registry.remove(&id).is_none());
    }
}
