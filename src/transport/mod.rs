//! Wire transport: the external Modbus capability and the liveness
//! wrapper around it.
//!
//! The capability trait is the boundary to the actual protocol client:
//! register/discrete primitives plus open/close/is-open. `Channel` adds
//! the policy this crate owns — cached liveness, reconnect with retries,
//! per-base read-modify-write composition, settle delay after writes, and
//! a single serialization lock so concurrent callers never interleave
//! frames.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

pub mod channel;
pub mod mock;
pub mod modbus_tcp;

pub use channel::{Channel, ChannelConfig};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("io error: {0}")]
    Io(String),

    #[error("modbus exception: {0}")]
    Exception(String),

    #[error("address is not writable")]
    NotWritable,
}

pub type CapFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// The externally supplied protocol client. Implementations do the wire
/// work and nothing else: no retry, no liveness policy, no settling.
pub trait ModbusCapability: Send + Sync {
    /// Cached socket-open status; must not block.
    fn is_open(&self) -> bool;

    fn open(&self) -> CapFuture<'_, ()>;

    fn close(&self) -> CapFuture<'_, ()>;

    fn read_registers(&self, addr: u16, count: u16) -> CapFuture<'_, Vec<u16>>;

    fn write_register(&self, addr: u16, value: u16) -> CapFuture<'_, ()>;

    fn write_registers(&self, addr: u16, values: Vec<u16>) -> CapFuture<'_, ()>;

    fn read_discrete_inputs(&self, addr: u16, count: u16) -> CapFuture<'_, Vec<bool>>;
}
