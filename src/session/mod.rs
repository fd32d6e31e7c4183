//! Player sessions and outbound message routing

pub mod dispatcher;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use registry::{Player, PlayerId, SessionRegistry};
