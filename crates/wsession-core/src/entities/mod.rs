//! Domain entities

mod connection;

pub use connection::Connection;
