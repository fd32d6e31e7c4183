//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::GameEngine;
use crate::matchmaking::RoomManager;
use crate::session::{Dispatcher, SessionRegistry};

use super::hub::GameHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub rooms: Arc<RoomManager>,
    pub engine: Arc<GameEngine>,
    pub hub: Arc<GameHub>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let sessions = Arc::new(SessionRegistry::new(config.outbound_queue_capacity));
        let dispatcher = Dispatcher::new(sessions.clone());

        // Running games publish straight to player queues
        let engine = Arc::new(GameEngine::new(
            Arc::new(dispatcher.clone()),
            config.game.engine(),
        ));

        let rooms = Arc::new(RoomManager::new(config.game.waiting_room()));

        let hub = GameHub::new(
            sessions.clone(),
            dispatcher,
            engine.clone(),
            rooms.clone(),
            config.game.min_players_to_start,
        );

        Self {
            config,
            sessions,
            rooms,
            engine,
            hub,
        }
    }

    /// Stop every background task owned by the state
    pub async fn shutdown(&self) {
        self.rooms.shutdown().await;
        self.engine.shutdown().await;
    }
}
