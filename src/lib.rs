//! Named, typed PLC variables backed by Modbus register cells.
//!
//! The registry binds names (and aliases) to addressable cells, a word
//! and its byte/bit views stay consistent through the sync routines, and
//! polling groups keep values fresh through the gateway. The wire client
//! itself is a capability (`transport::ModbusCapability`); a tokio-modbus
//! TCP backend and an in-memory mock are provided.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use plc_vars::{decl, Channel, ChannelConfig, Gateway, PollerSet, Registry};
//! use plc_vars::transport::modbus_tcp::TcpCapability;
//!
//! # async fn wiring() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(Registry::new());
//! registry.declare(&decl::load_decl_file("variables.txt".as_ref())?);
//!
//! let cap = Arc::new(TcpCapability::new("192.168.1.22:502".parse()?, 1));
//! let channel = Arc::new(Channel::new(cap, ChannelConfig::default()));
//! channel.connect_default().await;
//!
//! let gateway = Arc::new(Gateway::new(registry, channel));
//! let poller = PollerSet::new(gateway);
//! # Ok(())
//! # }
//! ```

pub mod addr;
pub mod decl;
pub mod gateway;
pub mod poller;
pub mod registry;
mod sync;
pub mod transport;
pub mod variable;

pub use addr::{Address, AddressError, Base, WordOrder};
pub use gateway::{AccessError, Gateway};
pub use poller::{GroupConfig, GroupHandle, GroupState, PollerSet};
pub use registry::{Registry, VarId, VarView};
pub use transport::{Channel, ChannelConfig, ModbusCapability, TransportError};
pub use variable::{Value, VarType, Variable};
