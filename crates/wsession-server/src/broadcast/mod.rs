//! Broadcast fan-out

mod engine;

pub use engine::{BroadcastEngine, BroadcastReport};
