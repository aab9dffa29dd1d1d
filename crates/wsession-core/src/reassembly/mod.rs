//! Inbound message reassembly and receive buffers

mod buffer_pool;
mod reassembler;

pub use buffer_pool::{BufferPool, PooledBuffer, DEFAULT_POOL_CAPACITY};
pub use reassembler::{Inbound, MessageReassembler};
