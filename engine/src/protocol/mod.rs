//! Command and event messages exchanged with the host bridge

mod messages;

pub use messages::*;
