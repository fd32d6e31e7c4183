//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::game::EngineSettings;
use crate::matchmaking::WaitingRoomSettings;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Directory with the browser client, served as the fallback route
    pub static_dir: Option<PathBuf>,
    /// Allowed client origins for CORS, comma-separated. Unset allows any.
    pub client_origin: Option<String>,
    /// Outbound messages buffered per player before new ones are dropped
    pub outbound_queue_capacity: usize,
    pub game: GameSettings,
}

/// Timing and match-start knobs
#[derive(Clone, Copy, Debug)]
pub struct GameSettings {
    pub tick_period: Duration,
    pub score_cooldown: Duration,
    pub waiting_room_duration: Duration,
    pub min_players_to_start: u32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(32),
            score_cooldown: Duration::from_secs(3),
            waiting_room_duration: Duration::from_secs(90),
            min_players_to_start: 2,
        }
    }
}

impl GameSettings {
    pub fn engine(&self) -> EngineSettings {
        EngineSettings {
            tick_period: self.tick_period,
            score_cooldown: self.score_cooldown,
        }
    }

    pub fn waiting_room(&self) -> WaitingRoomSettings {
        WaitingRoomSettings {
            duration: self.waiting_room_duration,
            min_players: self.min_players_to_start,
            ..WaitingRoomSettings::default()
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT; fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let defaults = GameSettings::default();
        let game = GameSettings {
            tick_period: Duration::from_millis(parse_or(
                &lookup,
                "TICK_MS",
                defaults.tick_period.as_millis() as u64,
            )?),
            score_cooldown: Duration::from_millis(parse_or(
                &lookup,
                "SCORE_COOLDOWN_MS",
                defaults.score_cooldown.as_millis() as u64,
            )?),
            waiting_room_duration: Duration::from_secs(parse_or(
                &lookup,
                "WAITING_ROOM_SECS",
                defaults.waiting_room_duration.as_secs(),
            )?),
            min_players_to_start: parse_or(
                &lookup,
                "MIN_PLAYERS_TO_START",
                defaults.min_players_to_start,
            )?,
        };
        if game.tick_period.is_zero() {
            return Err(ConfigError::Invalid("TICK_MS"));
        }

        let outbound_queue_capacity = parse_or(&lookup, "OUTBOUND_QUEUE_CAPACITY", 100usize)?;
        if outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid("OUTBOUND_QUEUE_CAPACITY"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            static_dir: lookup("STATIC_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            client_origin: lookup("CLIENT_ORIGIN").filter(|origin| !origin.trim().is_empty()),
            outbound_queue_capacity,
            game,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
