//! Manager events and the bus that delivers them

mod event_bus;
mod session_event;

pub use event_bus::EventBus;
pub use session_event::{ClientEvent, ServerEvent};
