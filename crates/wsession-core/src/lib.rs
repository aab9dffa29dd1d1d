//! # wsession-core
//!
//! Session layer for message sockets: connection options, lifecycle state
//! machines, the transport contract, fragment reassembly and manager events.
//! This crate has no dependency on a web framework or socket library.

pub mod entities;
pub mod error;
pub mod events;
pub mod reassembly;
pub mod state;
pub mod transport;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::Connection;
pub use error::{SessionError, SessionResult, TransportError};
pub use events::{ClientEvent, EventBus, ServerEvent};
pub use reassembly::{BufferPool, Inbound, MessageReassembler, PooledBuffer};
pub use state::{ClientState, LifecycleState, ServerState, StateMachine, StateTransition};
pub use transport::{
    FrameCodec, MemoryTransport, MessageTransport, Received, SocketTransport, TransportState,
};
pub use value_objects::{
    CloseCode, ConnectionOptions, ConnectionOptionsBuilder, MessageKind, MessagePayload,
    ReceivedMessage,
};
