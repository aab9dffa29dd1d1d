//! Transport adapters

mod axum_transport;

pub use axum_transport::{AxumCodec, AxumTransport};
