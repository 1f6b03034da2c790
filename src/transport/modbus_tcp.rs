//! Modbus TCP capability backed by tokio-modbus.
//!
//! Wire work only; retry/liveness policy lives in `Channel`. Errors are
//! split the usual way: transport-level io errors vs device-reported
//! modbus exceptions.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio_modbus::client::{tcp, Client, Context, Reader, Writer};
use tokio_modbus::slave::Slave;

use super::{CapFuture, ModbusCapability, TransportError};

pub struct TcpCapability {
    addr: SocketAddr,
    slave: Slave,
    ctx: Mutex<Option<Context>>,
    open: AtomicBool,
}

impl TcpCapability {
    pub fn new(addr: SocketAddr, unit_id: u8) -> TcpCapability {
        TcpCapability {
            addr,
            slave: Slave(unit_id),
            ctx: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    fn io_err(err: impl std::fmt::Display) -> TransportError {
        TransportError::Io(err.to_string())
    }

    fn exception_err(err: impl std::fmt::Display) -> TransportError {
        TransportError::Exception(err.to_string())
    }
}

impl ModbusCapability for TcpCapability {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    fn open(&self) -> CapFuture<'_, ()> {
        Box::pin(async move {
            let ctx = tcp::connect_slave(self.addr, self.slave)
                .await
                .map_err(Self::io_err)?;
            *self.ctx.lock().await = Some(ctx);
            self.open.store(true, Ordering::Relaxed);
            Ok(())
        })
    }

    fn close(&self) -> CapFuture<'_, ()> {
        Box::pin(async move {
            self.open.store(false, Ordering::Relaxed);
            if let Some(mut ctx) = self.ctx.lock().await.take() {
                let _ = ctx.disconnect().await;
            }
            Ok(())
        })
    }

    fn read_registers(&self, addr: u16, count: u16) -> CapFuture<'_, Vec<u16>> {
        Box::pin(async move {
            let mut guard = self.ctx.lock().await;
            let ctx = guard.as_mut().ok_or(TransportError::NotConnected)?;
            ctx.read_holding_registers(addr, count)
                .await
                .map_err(Self::io_err)?
                .map_err(Self::exception_err)
        })
    }

    fn write_register(&self, addr: u16, value: u16) -> CapFuture<'_, ()> {
        Box::pin(async move {
            let mut guard = self.ctx.lock().await;
            let ctx = guard.as_mut().ok_or(TransportError::NotConnected)?;
            ctx.write_single_register(addr, value)
                .await
                .map_err(Self::io_err)?
                .map_err(Self::exception_err)
        })
    }

    fn write_registers(&self, addr: u16, values: Vec<u16>) -> CapFuture<'_, ()> {
        Box::pin(async move {
            let mut guard = self.ctx.lock().await;
            let ctx = guard.as_mut().ok_or(TransportError::NotConnected)?;
            ctx.write_multiple_registers(addr, &values)
                .await
                .map_err(Self::io_err)?
                .map_err(Self::exception_err)
        })
    }

    fn read_discrete_inputs(&self, addr: u16, count: u16) -> CapFuture<'_, Vec<bool>> {
        Box::pin(async move {
            let mut guard = self.ctx.lock().await;
            let ctx = guard.as_mut().ok_or(TransportError::NotConnected)?;
            ctx.read_discrete_inputs(addr, count)
                .await
                .map_err(Self::io_err)?
                .map_err(Self::exception_err)
        })
    }
}
