//! In-memory mock capability for tests and demos without a real PLC.
//!
//! Behavior switches:
//! - `fail_open(true)` → `open` fails until cleared
//! - `fail_io(true)` → every read/write fails with an io error
//!
//! Register and discrete banks are plain maps; unset cells read as 0 /
//! false, matching a freshly powered simulator.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{CapFuture, ModbusCapability, TransportError};

#[derive(Default)]
struct MockState {
    registers: HashMap<u16, u16>,
    discrete: HashMap<u16, bool>,
    open: bool,
    fail_open: bool,
    fail_io: bool,
}

#[derive(Default)]
pub struct MockCapability {
    state: Mutex<MockState>,
}

impl MockCapability {
    pub fn new() -> MockCapability {
        MockCapability::default()
    }

    pub fn set_register(&self, addr: u16, value: u16) {
        self.state.lock().registers.insert(addr, value);
    }

    pub fn register(&self, addr: u16) -> u16 {
        self.state.lock().registers.get(&addr).copied().unwrap_or(0)
    }

    pub fn set_discrete(&self, addr: u16, value: bool) {
        self.state.lock().discrete.insert(addr, value);
    }

    pub fn fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    pub fn fail_io(&self, fail: bool) {
        self.state.lock().fail_io = fail;
    }

    fn check_io(&self) -> Result<(), TransportError> {
        let state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        if state.fail_io {
            return Err(TransportError::Io("mock io failure".to_string()));
        }
        Ok(())
    }
}

impl ModbusCapability for MockCapability {
    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn open(&self) -> CapFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if state.fail_open {
                return Err(TransportError::Io("mock open refused".to_string()));
            }
            state.open = true;
            Ok(())
        })
    }

    fn close(&self) -> CapFuture<'_, ()> {
        Box::pin(async move {
            self.state.lock().open = false;
            Ok(())
        })
    }

    fn read_registers(&self, addr: u16, count: u16) -> CapFuture<'_, Vec<u16>> {
        Box::pin(async move {
            self.check_io()?;
            let state = self.state.lock();
            Ok((0..count)
                .map(|i| {
                    let a = addr.wrapping_add(i);
                    state.registers.get(&a).copied().unwrap_or(0)
                })
                .collect())
        })
    }

    fn write_register(&self, addr: u16, value: u16) -> CapFuture<'_, ()> {
        Box::pin(async move {
            self.check_io()?;
            self.state.lock().registers.insert(addr, value);
            Ok(())
        })
    }

    fn write_registers(&self, addr: u16, values: Vec<u16>) -> CapFuture<'_, ()> {
        Box::pin(async move {
            self.check_io()?;
            let mut state = self.state.lock();
            for (i, value) in values.iter().enumerate() {
                state.registers.insert(addr.wrapping_add(i as u16), *value);
            }
            Ok(())
        })
    }

    fn read_discrete_inputs(&self, addr: u16, count: u16) -> CapFuture<'_, Vec<bool>> {
        Box::pin(async move {
            self.check_io()?;
            let state = self.state.lock();
            Ok((0..count)
                .map(|i| {
                    let a = addr.wrapping_add(i);
                    state.discrete.get(&a).copied().unwrap_or(false)
                })
                .collect())
        })
    }
}
