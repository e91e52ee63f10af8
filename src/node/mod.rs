//! Node module - the orchestrator and the peer sync loop

#[allow(clippy::module_inception)]
mod node;
mod sync;

pub use node::*;
pub use sync::*;
