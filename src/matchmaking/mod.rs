//! Rooms and their pre-game countdowns

pub mod rooms;
pub mod waiting_room;

pub use rooms::{RemoveOutcome, RoomError, RoomManager, RoomSummary};
pub use waiting_room::{RoomLifecycle, WaitingRoomSettings, WaitingRoomUpdate};
