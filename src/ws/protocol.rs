//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::Team;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMsg {
    /// Viewport report; the first one with positive dimensions sizes the game
    Init {
        width: f64,
        height: f64,
        paddle_width: f64,
        paddle_height: f64,
    },

    /// One discrete paddle input ("up", "down", anything else applies friction)
    Movement { direction: String },

    /// Create a room hosted by the sender
    RoomCreateRequest { max_players: u32 },

    /// Join an existing room by its code
    RoomJoinRequest { room_id: String },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { player_id: Uuid },

    /// Reply to `Init`
    InitialGameState(PaddleState),

    /// Paddle positions after a movement input
    GameState(PaddleState),

    RoomCreateResponse { room_id: String },

    RoomJoined {
        room_id: String,
        current_players: u32,
        max_players: u32,
    },

    BallPosition { x: f64, y: f64, radius: f64 },

    Score {
        left_score: u32,
        right_score: u32,
        /// "Left" or "Right"
        who_scored: String,
    },

    /// Countdown update while a room waits for players
    WaitingRoomState {
        room_id: String,
        max_players: u32,
        current_players: u32,
        time_left: u32,
        is_active: bool,
    },

    GameStart { room_id: String },

    RoomClosed { room_id: String, reason: String },

    /// Error message
    Error { message: String },
}

/// Paddle positions as seen by one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddleState {
    pub left_paddle_pos: f64,
    pub right_paddle_pos: f64,
    pub your_team: Team,
    pub client_count: u32,
}

impl ServerMsg {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Frame encoding negotiated per connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// bincode in binary frames
    #[default]
    Binary,
    /// serde_json in text frames, handy for browser debugging
    Json,
}

/// An encoded outbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

/// Protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid binary message: {0}")]
    Binary(#[from] bincode::Error),

    #[error("Invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),
}

impl WireFormat {
    pub fn encode(self, msg: &ServerMsg) -> Result<Frame, ProtocolError> {
        Ok(match self {
            WireFormat::Binary => Frame::Binary(bincode::serialize(msg)?),
            WireFormat::Json => Frame::Text(serde_json::to_string(msg)?),
        })
    }

    /// Decode a binary frame payload
    pub fn decode_binary(payload: &[u8]) -> Result<ClientMsg, ProtocolError> {
        Ok(bincode::deserialize(payload)?)
    }

    /// Decode a text frame payload
    pub fn decode_text(payload: &str) -> Result<ClientMsg, ProtocolError> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_frames_decode_into_client_messages() {
        let msg = ClientMsg::RoomJoinRequest {
            room_id: "ab12cd".to_string(),
        };
        let bytes = bincode::serialize(&msg).unwrap();
        assert_eq!(WireFormat::decode_binary(&bytes).unwrap(), msg);
    }

    #[test]
    fn json_frames_use_snake_case_tags() {
        let msg = WireFormat::decode_text(r#"{"movement":{"direction":"up"}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMsg::Movement {
                direction: "up".to_string()
            }
        );

        let frame = WireFormat::Json
            .encode(&ServerMsg::GameStart {
                room_id: "r1".to_string(),
            })
            .unwrap();
        assert_eq!(frame, Frame::Text(r#"{"game_start":{"room_id":"r1"}}"#.to_string()));
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(matches!(
            WireFormat::decode_binary(&[0xff, 0xff, 0xff, 0xff, 0x01]),
            Err(ProtocolError::Binary(_))
        ));
        assert!(matches!(
            WireFormat::decode_text("{not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn team_serializes_lowercase() {
        let frame = WireFormat::Json
            .encode(&ServerMsg::InitialGameState(PaddleState {
                left_paddle_pos: 250.0,
                right_paddle_pos: 250.0,
                your_team: Team::Right,
                client_count: 2,
            }))
            .unwrap();
        let Frame::Text(text) = frame else {
            panic!("expected text frame");
        };
        assert!(text.contains(r#""your_team":"right""#));
    }
}
