//! P2P module - peer records and the wire shapes peers exchange

mod messages;
mod peer;

pub use messages::*;
pub use peer::*;
