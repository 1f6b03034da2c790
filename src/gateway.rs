//! The read/write API callers and pollers go through.
//!
//! Policy enforced here, in order:
//! - nothing moves while the transport is offline;
//! - unknown names are an absence on read and a hard fault on write;
//! - read-only and declared-default ("write-once") variables reject
//!   non-forced writes; discrete inputs reject every write;
//! - local state changes only after the device confirmed the write, then
//!   the other granularities of the same storage are synchronized.

use std::sync::Arc;

use log::{info, warn};
use thiserror::Error;

use crate::addr::Base;
use crate::registry::Registry;
use crate::transport::Channel;
use crate::variable::Value;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("transport offline")]
    Offline,

    #[error("variable '{0}' not defined")]
    UnknownVariable(String),
}

pub struct Gateway {
    registry: Arc<Registry>,
    channel: Arc<Channel>,
}

impl Gateway {
    pub fn new(registry: Arc<Registry>, channel: Arc<Channel>) -> Gateway {
        Gateway { registry, channel }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn is_alive(&self) -> bool {
        self.channel.is_alive()
    }

    /// Read the live value of `name` from the device and store it into
    /// the variable. Unknown names and transport failures both come back
    /// as `None`; a failed read never erases the last known value.
    pub async fn read(&self, name: &str) -> Result<Option<Value>, AccessError> {
        if !self.channel.is_alive() {
            return Err(AccessError::Offline);
        }
        let Some(view) = self.registry.view(name) else {
            return Ok(None);
        };

        match self.channel.read(&view.address).await {
            Ok(value) => Ok(Some(self.registry.store_read(view.id, value))),
            Err(_) => Ok(None),
        }
    }

    /// Write `value` to `name`. Returns `Ok(false)` on policy rejection
    /// or transport failure, in which case no local state changed.
    pub async fn write(&self, name: &str, value: Value, force: bool) -> Result<bool, AccessError> {
        if !self.channel.is_alive() {
            return Err(AccessError::Offline);
        }
        let view = self
            .registry
            .view(name)
            .ok_or_else(|| AccessError::UnknownVariable(name.to_string()))?;

        // Discrete inputs are externally driven; force does not apply.
        if view.address.base == Base::DiscreteInput {
            warn!("write blocked: '{name}' is a discrete input");
            return Ok(false);
        }
        if view.read_only && !force {
            warn!("write blocked: variable '{name}' is read-only");
            return Ok(false);
        }
        if view.has_initial && !force {
            info!("skipping write for '{name}' (declared default present), use force to override");
            return Ok(false);
        }

        let value = Value::for_type(view.var_type, value.raw());
        match self.channel.write(&view.address, value).await {
            Ok(()) => {
                self.registry
                    .commit_write(view.id, value, self.channel.config().word_order);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// One-shot change query: true once after a value transition, then
    /// false until the next one.
    pub fn is_changed(&self, name: &str) -> Result<bool, AccessError> {
        self.registry
            .take_changed(name)
            .ok_or_else(|| AccessError::UnknownVariable(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::decl::DeclEntry;
    use crate::transport::mock::MockCapability;
    use crate::transport::ChannelConfig;
    use crate::variable::VarType;

    fn entry(name: &str, address: &str, var_type: VarType) -> DeclEntry {
        DeclEntry {
            name: name.to_string(),
            address: address.to_string(),
            var_type,
            description: String::new(),
            initial: None,
            read_only: false,
        }
    }

    fn gateway_with_mock(entries: &[DeclEntry]) -> (Arc<MockCapability>, Gateway) {
        let registry = Arc::new(Registry::new());
        registry.declare(entries);
        let cap = Arc::new(MockCapability::new());
        let channel = Arc::new(Channel::new(
            cap.clone(),
            ChannelConfig {
                settle: Duration::ZERO,
                retry_delay: Duration::from_millis(1),
                ..ChannelConfig::default()
            },
        ));
        (cap, Gateway::new(registry, channel))
    }

    #[tokio::test]
    async fn offline_read_and_write_fail_without_touching_state() {
        let (_cap, gateway) = gateway_with_mock(&[entry("Word2", "%MW2", VarType::Word)]);

        assert_eq!(gateway.read("Word2").await, Err(AccessError::Offline));
        assert_eq!(
            gateway.write("Word2", Value::Word(1), false).await,
            Err(AccessError::Offline)
        );
        assert_eq!(gateway.registry().value("Word2"), None);
        assert_eq!(gateway.is_changed("Word2"), Ok(false));
    }

    #[tokio::test]
    async fn unknown_name_is_absent_on_read_and_a_fault_on_write() {
        let (_cap, gateway) = gateway_with_mock(&[]);
        gateway.channel().connect_default().await;

        assert_eq!(gateway.read("Ghost").await, Ok(None));
        assert_eq!(
            gateway.write("Ghost", Value::Word(1), false).await,
            Err(AccessError::UnknownVariable("Ghost".to_string()))
        );
        assert_eq!(
            gateway.is_changed("Ghost"),
            Err(AccessError::UnknownVariable("Ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn read_stores_value_and_flags_change_once() {
        let (cap, gateway) = gateway_with_mock(&[entry("Word2", "%MW2", VarType::Word)]);
        gateway.channel().connect_default().await;
        cap.set_register(2, 0x1234);

        assert_eq!(gateway.read("Word2").await, Ok(Some(Value::Word(0x1234))));
        assert_eq!(gateway.is_changed("Word2"), Ok(true));
        assert_eq!(gateway.is_changed("Word2"), Ok(false));

        // Same value again: no new change.
        assert_eq!(gateway.read("Word2").await, Ok(Some(Value::Word(0x1234))));
        assert_eq!(gateway.is_changed("Word2"), Ok(false));
    }

    #[tokio::test]
    async fn failed_read_keeps_the_last_known_value() {
        let (cap, gateway) = gateway_with_mock(&[entry("Word2", "%MW2", VarType::Word)]);
        gateway.channel().connect_default().await;
        cap.set_register(2, 42);
        gateway.read("Word2").await.unwrap();

        cap.fail_io(true);
        assert_eq!(gateway.read("Word2").await, Ok(None));
        assert_eq!(gateway.registry().value("Word2"), Some(Value::Word(42)));
        assert!(!gateway.is_alive());
    }

    #[tokio::test]
    async fn read_only_variables_reject_unforced_writes() {
        let mut ro = entry("Soglia", "%MW101", VarType::Word);
        ro.read_only = true;
        let (cap, gateway) = gateway_with_mock(&[ro]);
        gateway.channel().connect_default().await;

        assert_eq!(gateway.write("Soglia", Value::Word(5), false).await, Ok(false));
        assert_eq!(cap.register(101), 0);
        assert_eq!(gateway.registry().value("Soglia"), None);

        assert_eq!(gateway.write("Soglia", Value::Word(5), true).await, Ok(true));
        assert_eq!(cap.register(101), 5);
        assert_eq!(gateway.registry().value("Soglia"), Some(Value::Word(5)));
    }

    #[tokio::test]
    async fn declared_default_protects_against_unforced_writes() {
        let mut preset = entry("Preset", "%MW100", VarType::Word);
        preset.initial = Some(100);
        let (cap, gateway) = gateway_with_mock(&[preset]);
        gateway.channel().connect_default().await;

        assert_eq!(gateway.write("Preset", Value::Word(1), false).await, Ok(false));
        assert_eq!(gateway.registry().value("Preset"), Some(Value::Word(100)));

        assert_eq!(gateway.write("Preset", Value::Word(1), true).await, Ok(true));
        assert_eq!(cap.register(100), 1);
        assert_eq!(gateway.registry().value("Preset"), Some(Value::Word(1)));
    }

    #[tokio::test]
    async fn discrete_inputs_reject_writes_even_when_forced() {
        let (_cap, gateway) =
            gateway_with_mock(&[entry("EmergenzaImpianto", "%IX0.0", VarType::Bool)]);
        gateway.channel().connect_default().await;

        assert_eq!(
            gateway
                .write("EmergenzaImpianto", Value::Bit(true), true)
                .await,
            Ok(false)
        );
        assert_eq!(gateway.registry().value("EmergenzaImpianto"), None);
    }

    #[tokio::test]
    async fn transport_failure_leaves_all_state_unchanged() {
        let (cap, gateway) = gateway_with_mock(&[entry("Word2", "%MW2", VarType::Word)]);
        gateway.channel().connect_default().await;
        cap.fail_io(true);

        assert_eq!(gateway.write("Word2", Value::Word(9), false).await, Ok(false));
        assert_eq!(gateway.registry().value("Word2"), None);
        assert_eq!(gateway.is_changed("Word2"), Ok(false));
        assert!(!gateway.is_alive());
    }

    #[tokio::test]
    async fn confirmed_write_synchronizes_sibling_granularities() {
        let (cap, gateway) = gateway_with_mock(&[entry("Word2", "%MW2", VarType::Word)]);
        gateway.channel().connect_default().await;

        assert_eq!(
            gateway.write("Word2", Value::Word(0x1234), false).await,
            Ok(true)
        );
        assert_eq!(cap.register(2), 0x1234);
        assert_eq!(
            gateway.registry().value("Word2_LowByte"),
            Some(Value::Byte(0x34))
        );
        assert_eq!(
            gateway.registry().value("Word2_HighByte"),
            Some(Value::Byte(0x12))
        );
    }
}
