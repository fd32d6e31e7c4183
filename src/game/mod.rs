//! Game simulation modules

pub mod engine;
pub mod physics;

pub use engine::{EngineError, EngineSettings, Game, GameEngine, GameEventSink, GameSnapshot};
pub use physics::{Ball, Direction, Score, Team};

/// Game id used by players who are not in a room
pub const LOBBY_GAME_ID: &str = "lobby";
