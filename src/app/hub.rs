//! Client message handling: ties sessions, rooms and games together

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::game::{Direction, EngineError, Game, GameEngine, Team, LOBBY_GAME_ID};
use crate::matchmaking::{RemoveOutcome, RoomLifecycle, RoomManager, WaitingRoomUpdate};
use crate::session::{Dispatcher, Player, PlayerId, SessionRegistry};
use crate::ws::protocol::{ClientMsg, PaddleState, ServerMsg};

pub const INVALID_MESSAGE_FORMAT: &str = "Invalid message format";
pub const HOST_LEFT: &str = "host left";

/// Entry point for everything a connected player does.
///
/// Holds a weak handle to itself so it can register as the lifecycle observer
/// of the waiting rooms it starts.
pub struct GameHub {
    sessions: Arc<SessionRegistry>,
    dispatcher: Dispatcher,
    engine: Arc<GameEngine>,
    rooms: Arc<RoomManager>,
    min_players: u32,
    /// Held for every move between games; player records are re-read under it
    moves: Mutex<()>,
    this: Weak<GameHub>,
}

impl GameHub {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        dispatcher: Dispatcher,
        engine: Arc<GameEngine>,
        rooms: Arc<RoomManager>,
        min_players: u32,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            sessions,
            dispatcher,
            engine,
            rooms,
            min_players,
            moves: Mutex::new(()),
            this: this.clone(),
        })
    }

    /// Register a new connection and place it in the lobby
    pub fn connect(&self, addr: Option<SocketAddr>) -> (PlayerId, mpsc::Receiver<ServerMsg>) {
        let (player_id, rx) = self.sessions.register(addr);
        let team = {
            let _moves = self.moves.lock();
            let team = self.enter_game(&player_id, LOBBY_GAME_ID);
            self.settle_lobby();
            team
        };
        self.dispatcher
            .send_to(&player_id, ServerMsg::Welcome { player_id });

        info!(player_id = %player_id, team = %team, "Player joined lobby");
        (player_id, rx)
    }

    /// Tear down everything the player is part of. Safe to call twice.
    pub fn disconnect(&self, player_id: &PlayerId) {
        let _moves = self.moves.lock();
        let Some(player) = self.sessions.get(player_id) else {
            return;
        };
        self.leave_game(&player);
        self.sessions.remove(player_id);
        self.settle_lobby();

        let connected_secs = (chrono::Utc::now() - player.connected_at).num_seconds();
        info!(player_id = %player_id, addr = ?player.addr, connected_secs, "Player disconnected");
    }

    pub fn handle_message(&self, player_id: &PlayerId, msg: ClientMsg) {
        let Some(player) = self.sessions.get(player_id) else {
            debug!(player_id = %player_id, "Message from unknown player");
            return;
        };

        match msg {
            ClientMsg::Init {
                width,
                height,
                paddle_width,
                paddle_height,
            } => self.on_init(&player, width, height, paddle_width, paddle_height),
            ClientMsg::Movement { direction } => {
                self.on_movement(&player, Direction::parse(&direction))
            }
            ClientMsg::RoomCreateRequest { max_players } => {
                self.on_room_create(&player.id, max_players)
            }
            ClientMsg::RoomJoinRequest { room_id } => self.on_room_join(&player.id, &room_id),
        }
    }

    /// Reply to a frame that could not be decoded
    pub fn invalid_message(&self, player_id: &PlayerId) {
        self.dispatcher
            .send_to(player_id, ServerMsg::error(INVALID_MESSAGE_FORMAT));
    }

    fn on_init(
        &self,
        player: &Player,
        width: f64,
        height: f64,
        paddle_width: f64,
        paddle_height: f64,
    ) {
        let game_id = player.game_id();
        let Some(game) = self.engine.get_game(game_id) else {
            warn!(player_id = %player.id, game_id = %game_id, "Init for missing game");
            return;
        };

        match game.initialize(width, height, paddle_width, paddle_height) {
            Ok(()) => self.try_start(game_id),
            Err(EngineError::AlreadyInitialized) => self.try_start(game_id),
            Err(err) => debug!(player_id = %player.id, error = %err, "Ignoring init"),
        }

        let state = self.paddle_state(game_id, player.team, game.paddles());
        self.dispatcher
            .send_to(&player.id, ServerMsg::InitialGameState(state));
    }

    fn on_movement(&self, player: &Player, direction: Direction) {
        let game_id = player.game_id();
        let Some(game) = self.engine.get_game(game_id) else {
            return;
        };

        let paddles = game.move_paddle(player.team, direction);
        let client_count = self.sessions.count_in_game(game_id) as u32;
        self.dispatcher.broadcast_to_game_with(game_id, |member| {
            ServerMsg::GameState(PaddleState {
                left_paddle_pos: paddles.0,
                right_paddle_pos: paddles.1,
                your_team: member.team,
                client_count,
            })
        });
    }

    fn on_room_create(&self, player_id: &PlayerId, max_players: u32) {
        let _moves = self.moves.lock();
        let Some(player) = self.sessions.get(player_id) else {
            return;
        };
        let player = &player;

        let room_id = match self.rooms.create_room(player.id, max_players) {
            Ok(id) => id,
            Err(err) => {
                self.dispatcher
                    .send_to(&player.id, ServerMsg::error(err.to_string()));
                return;
            }
        };

        self.leave_game(player);
        self.enter_game(&player.id, &room_id);
        self.settle_lobby();

        if let Some(lifecycle) = self.lifecycle() {
            self.rooms.start_waiting_room(&room_id, lifecycle);
        }

        self.dispatcher.send_to(
            &player.id,
            ServerMsg::RoomCreateResponse {
                room_id: room_id.clone(),
            },
        );
        info!(player_id = %player.id, room_id = %room_id, max_players, "Room created by player");
    }

    fn on_room_join(&self, player_id: &PlayerId, room_id: &str) {
        let _moves = self.moves.lock();
        let Some(player) = self.sessions.get(player_id) else {
            return;
        };
        let player = &player;

        let summary = match self.rooms.join_room(room_id, player.id) {
            Ok(summary) => summary,
            Err(err) => {
                info!(player_id = %player.id, room_id = %room_id, error = %err, "Room join refused");
                self.dispatcher
                    .send_to(&player.id, ServerMsg::error(err.to_string()));
                return;
            }
        };

        if player.room_id.as_deref() != Some(room_id) {
            self.leave_game(player);
            self.enter_game(&player.id, room_id);
            self.settle_lobby();
        }

        self.dispatcher.send_to(
            &player.id,
            ServerMsg::RoomJoined {
                room_id: summary.id,
                current_players: summary.current_players,
                max_players: summary.max_players,
            },
        );
    }

    /// Add the player to a game and record where they went. Caller holds `moves`.
    fn enter_game(&self, player_id: &PlayerId, game_id: &str) -> Team {
        let game = self.engine.create_game(game_id);
        let team = pick_team(&game);
        game.add_player(team);

        self.sessions.set_team(player_id, team);
        let room = (game_id != LOBBY_GAME_ID).then(|| game_id.to_string());
        self.sessions.set_room(player_id, room);
        team
    }

    /// Drop the player from their current game and room. Caller holds `moves`
    /// and passes a record read under it.
    fn leave_game(&self, player: &Player) {
        if let Err(err) = self.engine.remove_player(player.game_id(), player.team) {
            debug!(player_id = %player.id, error = %err, "Game already gone");
        }

        let Some(room_id) = player.room_id.as_deref() else {
            return;
        };
        if let RemoveOutcome::Closed { members } = self.rooms.remove_client(room_id, player.id) {
            self.close_room_game(room_id, members, HOST_LEFT);
        }
    }

    /// Notify members, drop the room's game and send everyone back to the lobby
    fn close_room_game(&self, room_id: &str, members: Vec<PlayerId>, reason: &str) {
        for member in &members {
            self.dispatcher.send_to(
                member,
                ServerMsg::RoomClosed {
                    room_id: room_id.to_string(),
                    reason: reason.to_string(),
                },
            );
        }

        self.engine.remove_game(room_id);
        for member in &members {
            if self.sessions.contains(member) {
                self.enter_game(member, LOBBY_GAME_ID);
            }
        }

        info!(room_id = %room_id, reason = %reason, moved = members.len(), "Room closed");
        self.settle_lobby();
    }

    /// Run the lobby ball only while enough players are there to use it
    fn settle_lobby(&self) {
        if self.sessions.count_in_game(LOBBY_GAME_ID) < self.min_players as usize {
            self.engine.stop_ticking(LOBBY_GAME_ID);
        } else {
            self.try_start(LOBBY_GAME_ID);
        }
    }

    /// Start the ball if the game is ready for it
    fn try_start(&self, game_id: &str) {
        let enough = self.sessions.count_in_game(game_id) >= self.min_players as usize;
        let ready = enough && (game_id == LOBBY_GAME_ID || self.rooms.is_started(game_id));
        if !ready {
            return;
        }

        match self.engine.start_ticking(game_id) {
            Ok(_) => {}
            Err(EngineError::NotInitialized) => {
                debug!(game_id = %game_id, "Waiting for init before starting ball");
            }
            Err(err) => warn!(game_id = %game_id, error = %err, "Could not start ball"),
        }
    }

    fn paddle_state(&self, game_id: &str, team: Team, (left, right): (f64, f64)) -> PaddleState {
        PaddleState {
            left_paddle_pos: left,
            right_paddle_pos: right,
            your_team: team,
            client_count: self.sessions.count_in_game(game_id) as u32,
        }
    }

    fn lifecycle(&self) -> Option<Arc<dyn RoomLifecycle>> {
        self.this
            .upgrade()
            .map(|hub| hub as Arc<dyn RoomLifecycle>)
    }
}

/// First two players alternate sides; after that it's a coin flip
fn pick_team(game: &Game) -> Team {
    match game.player_count() {
        0 => Team::Left,
        1 => Team::Right,
        _ if rand::random::<bool>() => Team::Left,
        _ => Team::Right,
    }
}

impl RoomLifecycle for GameHub {
    fn waiting_room_tick(&self, update: &WaitingRoomUpdate) {
        self.dispatcher.broadcast_to_game(
            &update.room_id,
            &ServerMsg::WaitingRoomState {
                room_id: update.room_id.clone(),
                max_players: update.max_players,
                current_players: update.current_players,
                time_left: update.time_left,
                is_active: update.is_active,
            },
        );
    }

    fn game_started(&self, room_id: &str) {
        if !self.rooms.mark_started(room_id) {
            return;
        }
        self.dispatcher.broadcast_to_game(
            room_id,
            &ServerMsg::GameStart {
                room_id: room_id.to_string(),
            },
        );
        self.try_start(room_id);
    }

    fn room_expired(&self, room_id: &str, reason: &str) {
        let _moves = self.moves.lock();
        if let Some(members) = self.rooms.close_room(room_id) {
            self.close_room_game(room_id, members, reason);
        }
    }
}
