//! Shared state and the message hub

pub mod hub;
pub mod state;

pub use hub::GameHub;
pub use state::AppState;
