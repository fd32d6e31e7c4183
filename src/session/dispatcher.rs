//! Fan-out of server messages onto player queues

use std::sync::Arc;
use tracing::{debug, warn};

use crate::game::{Ball, GameEventSink, Score, Team};
use crate::ws::protocol::ServerMsg;

use super::registry::{Enqueue, Player, PlayerId, SessionRegistry};

/// Routes messages to one player, one game, or everyone.
///
/// Never blocks: a full queue drops the new message for that player only.
#[derive(Clone)]
pub struct Dispatcher {
    sessions: Arc<SessionRegistry>,
}

impl Dispatcher {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    /// Returns true if the message was queued
    pub fn send_to(&self, player_id: &PlayerId, msg: ServerMsg) -> bool {
        match self.sessions.get(player_id) {
            Some(player) => deliver(&player, msg),
            None => false,
        }
    }

    /// Returns how many players had the message queued
    pub fn broadcast_to_game(&self, game_id: &str, msg: &ServerMsg) -> usize {
        self.fan_out(self.sessions.members_of(game_id), msg)
    }

    /// Like `broadcast_to_game`, but each member gets a message built for them
    pub fn broadcast_to_game_with(
        &self,
        game_id: &str,
        build: impl Fn(&Player) -> ServerMsg,
    ) -> usize {
        self.sessions
            .members_of(game_id)
            .iter()
            .filter(|player| deliver(player, build(player)))
            .count()
    }

    pub fn broadcast_all(&self, msg: &ServerMsg) -> usize {
        self.fan_out(self.sessions.all(), msg)
    }

    fn fan_out(&self, players: Vec<Player>, msg: &ServerMsg) -> usize {
        players
            .iter()
            .filter(|player| deliver(player, msg.clone()))
            .count()
    }
}

fn deliver(player: &Player, msg: ServerMsg) -> bool {
    match player.enqueue(msg) {
        Enqueue::Queued => true,
        Enqueue::Dropped => {
            warn!(player_id = %player.id, "Dropping message, send queue full");
            false
        }
        Enqueue::Closed => {
            debug!(player_id = %player.id, "Send queue closed");
            false
        }
    }
}

impl GameEventSink for Dispatcher {
    fn ball_moved(&self, game_id: &str, ball: &Ball) {
        self.broadcast_to_game(
            game_id,
            &ServerMsg::BallPosition {
                x: ball.x,
                y: ball.y,
                radius: ball.radius,
            },
        );
    }

    fn scored(&self, game_id: &str, score: Score, scorer: Team) {
        self.broadcast_to_game(
            game_id,
            &ServerMsg::Score {
                left_score: score.left,
                right_score: score.right,
                who_scored: scorer.display().to_string(),
            },
        );
    }
}
