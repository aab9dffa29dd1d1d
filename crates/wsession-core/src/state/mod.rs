//! Lifecycle states and the state machine that guards them

mod client_state;
mod machine;
mod server_state;

pub use client_state::ClientState;
pub use machine::{LifecycleState, StateMachine, StateTransition};
pub use server_state::ServerState;
