//! Connection liveness and serialized per-base register access.
//!
//! State machine: `Disconnected → (connect success) → Connected →
//! (I/O failure) → Disconnected`. `mark_dead` is the single place that
//! transitions Alive→Dead. `is_alive` only reports the cached state and
//! never blocks; the poller uses it to decide whether to skip a cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::addr::{Address, Base, WordOrder};
use crate::transport::{ModbusCapability, TransportError};
use crate::variable::Value;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    /// Pause after every successful write; downstream devices need
    /// breathing space between operations.
    pub settle: Duration,
    pub word_order: WordOrder,
    pub connect_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ChannelConfig {
    fn default() -> ChannelConfig {
        ChannelConfig {
            settle: Duration::from_millis(180),
            word_order: WordOrder::LowFirst,
            connect_retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Default)]
struct AliveState {
    alive: bool,
    last_alive: Option<DateTime<Utc>>,
}

pub struct Channel {
    cap: Arc<dyn ModbusCapability>,
    config: ChannelConfig,
    /// Serializes all capability I/O so concurrent callers never
    /// interleave protocol frames.
    io: tokio::sync::Mutex<()>,
    alive: Mutex<AliveState>,
}

impl Channel {
    pub fn new(cap: Arc<dyn ModbusCapability>, config: ChannelConfig) -> Channel {
        Channel {
            cap,
            config,
            io: tokio::sync::Mutex::new(()),
            alive: Mutex::new(AliveState::default()),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Cached connection status. Never retries, never sleeps.
    pub fn is_alive(&self) -> bool {
        self.alive.lock().alive
    }

    pub fn last_alive(&self) -> Option<DateTime<Utc>> {
        self.alive.lock().last_alive
    }

    /// Active reconnect. `retries == 0` keeps trying until success (the
    /// caller must be prepared to block); `retries == N` gives up after N
    /// attempts and reports false.
    pub async fn connect(&self, retries: u32, retry_delay: Duration) -> bool {
        if self.cap.is_open() {
            self.mark_alive();
            return true;
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.cap.open().await {
                Ok(()) => {
                    self.mark_alive();
                    return true;
                }
                Err(err) => warn!("connect attempt {attempt} failed: {err}"),
            }

            if retries > 0 && attempt >= retries {
                let _ = self.cap.close().await;
                self.alive.lock().alive = false;
                return false;
            }
            tokio::time::sleep(retry_delay).await;
        }
    }

    /// Reconnect with the configured retry policy.
    pub async fn connect_default(&self) -> bool {
        self.connect(self.config.connect_retries, self.config.retry_delay)
            .await
    }

    /// Force the connection closed and the cached state dead.
    pub async fn mark_dead(&self, reason: &str) {
        warn!("connection marked dead: {reason}");
        self.alive.lock().alive = false;
        let _ = self.cap.close().await;
    }

    fn mark_alive(&self) {
        let mut state = self.alive.lock();
        state.alive = true;
        state.last_alive = Some(Utc::now());
    }

    /// Read one cell at its native granularity. Any capability failure
    /// marks the connection dead before surfacing.
    pub async fn read(&self, address: &Address) -> Result<Value, TransportError> {
        let _io = self.io.lock().await;
        match self.read_raw(address).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.mark_dead(&format!("read {address} failed: {err}")).await;
                Err(err)
            }
        }
    }

    /// Write one cell at its native granularity (read-modify-write of the
    /// parent register for bytes and bits). Pauses for the settle
    /// duration after a confirmed write.
    pub async fn write(&self, address: &Address, value: Value) -> Result<(), TransportError> {
        if address.base == Base::DiscreteInput {
            return Err(TransportError::NotWritable);
        }

        let _io = self.io.lock().await;
        match self.write_raw(address, value).await {
            Ok(()) => {
                tokio::time::sleep(self.config.settle).await;
                Ok(())
            }
            Err(err) => {
                self.mark_dead(&format!("write {address} failed: {err}")).await;
                Err(err)
            }
        }
    }

    async fn read_raw(&self, address: &Address) -> Result<Value, TransportError> {
        match address.base {
            Base::Word => {
                let regs = self.cap.read_registers(address.index, 1).await?;
                let word = first_reg(&regs)?;
                Ok(Value::Word(word))
            }
            Base::Byte => {
                let regs = self
                    .cap
                    .read_registers(address.parent_word_index(), 1)
                    .await?;
                let word = first_reg(&regs)?;
                let byte = if address.is_high_half() {
                    (word >> 8) as u8
                } else {
                    (word & 0xFF) as u8
                };
                Ok(Value::Byte(byte))
            }
            Base::Bit => {
                let regs = self
                    .cap
                    .read_registers(address.parent_word_index(), 1)
                    .await?;
                let word = first_reg(&regs)?;
                let byte = (word >> (address.index % 2 * 8)) as u8;
                let bit = address.sub_bit.unwrap_or(0);
                Ok(Value::Bit((byte >> bit) & 1 == 1))
            }
            Base::DoubleWord => {
                let regs = self.cap.read_registers(address.index, 2).await?;
                if regs.len() < 2 {
                    return Err(TransportError::Io(format!(
                        "short register response: {}",
                        regs.len()
                    )));
                }
                let dword = match self.config.word_order {
                    WordOrder::LowFirst => ((regs[1] as u32) << 16) | regs[0] as u32,
                    WordOrder::HighFirst => ((regs[0] as u32) << 16) | regs[1] as u32,
                };
                Ok(Value::DWord(dword))
            }
            Base::DiscreteInput => {
                // IX addresses are byte.bit, inputs are numbered flat:
                // %IXb.k reads input 8b + k.
                let bit = address.sub_bit.unwrap_or(0) as u16;
                let input = address
                    .index
                    .checked_mul(8)
                    .and_then(|v| v.checked_add(bit))
                    .ok_or_else(|| {
                        TransportError::Io(format!("discrete input {address} out of range"))
                    })?;
                let bits = self.cap.read_discrete_inputs(input, 1).await?;
                let bit = bits
                    .first()
                    .copied()
                    .ok_or_else(|| TransportError::Io("empty discrete response".to_string()))?;
                Ok(Value::Bit(bit))
            }
        }
    }

    async fn write_raw(&self, address: &Address, value: Value) -> Result<(), TransportError> {
        match address.base {
            Base::Word => {
                self.cap
                    .write_register(address.index, value.raw() as u16)
                    .await
            }
            Base::Byte => {
                let parent = address.parent_word_index();
                let regs = self.cap.read_registers(parent, 1).await?;
                let word = first_reg(&regs)?;
                let byte = value.raw() as u16 & 0xFF;
                let patched = if address.is_high_half() {
                    (word & 0x00FF) | (byte << 8)
                } else {
                    (word & 0xFF00) | byte
                };
                self.cap.write_register(parent, patched).await
            }
            Base::Bit => {
                let parent = address.parent_word_index();
                let regs = self.cap.read_registers(parent, 1).await?;
                let word = first_reg(&regs)?;
                let shift = address.index % 2 * 8;
                let mut byte = (word >> shift) as u8;
                let bit = address.sub_bit.unwrap_or(0);
                if value.raw() != 0 {
                    byte |= 1 << bit;
                } else {
                    byte &= !(1 << bit);
                }
                let patched = (word & !(0xFFu16 << shift)) | ((byte as u16) << shift);
                self.cap.write_register(parent, patched).await
            }
            Base::DoubleWord => {
                let raw = value.raw();
                let lo = (raw & 0xFFFF) as u16;
                let hi = (raw >> 16) as u16;
                let words = match self.config.word_order {
                    WordOrder::LowFirst => vec![lo, hi],
                    WordOrder::HighFirst => vec![hi, lo],
                };
                self.cap.write_registers(address.index, words).await
            }
            Base::DiscreteInput => Err(TransportError::NotWritable),
        }
    }
}

fn first_reg(regs: &[u16]) -> Result<u16, TransportError> {
    regs.first()
        .copied()
        .ok_or_else(|| TransportError::Io("empty register response".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockCapability;

    fn channel_with_mock() -> (Arc<MockCapability>, Channel) {
        let cap = Arc::new(MockCapability::new());
        let config = ChannelConfig {
            settle: Duration::ZERO,
            retry_delay: Duration::from_millis(1),
            ..ChannelConfig::default()
        };
        (cap.clone(), Channel::new(cap, config))
    }

    fn addr(text: &str) -> Address {
        Address::parse(text).unwrap()
    }

    #[tokio::test]
    async fn connect_flips_alive_and_records_timestamp() {
        let (_cap, channel) = channel_with_mock();
        assert!(!channel.is_alive());
        assert!(channel.last_alive().is_none());

        assert!(channel.connect(3, Duration::from_millis(1)).await);
        assert!(channel.is_alive());
        assert!(channel.last_alive().is_some());
    }

    #[tokio::test]
    async fn connect_gives_up_after_n_attempts() {
        let (cap, channel) = channel_with_mock();
        cap.fail_open(true);

        assert!(!channel.connect(2, Duration::from_millis(1)).await);
        assert!(!channel.is_alive());

        cap.fail_open(false);
        assert!(channel.connect_default().await);
        assert!(channel.is_alive());
    }

    #[tokio::test]
    async fn word_read_and_write_use_one_register() {
        let (cap, channel) = channel_with_mock();
        channel.connect_default().await;

        cap.set_register(2, 0x1234);
        assert_eq!(channel.read(&addr("%MW2")).await, Ok(Value::Word(0x1234)));

        channel.write(&addr("%MW2"), Value::Word(0xAB34)).await.unwrap();
        assert_eq!(cap.register(2), 0xAB34);
    }

    #[tokio::test]
    async fn byte_write_patches_only_its_half() {
        let (cap, channel) = channel_with_mock();
        channel.connect_default().await;
        cap.set_register(3, 0x1234);

        // MB6 is the low half of MW3, MB7 the high half.
        channel.write(&addr("%MB6"), Value::Byte(0xFF)).await.unwrap();
        assert_eq!(cap.register(3), 0x12FF);

        channel.write(&addr("%MB7"), Value::Byte(0xAB)).await.unwrap();
        assert_eq!(cap.register(3), 0xABFF);

        assert_eq!(channel.read(&addr("%MB7")).await, Ok(Value::Byte(0xAB)));
        assert_eq!(channel.read(&addr("%MB6")).await, Ok(Value::Byte(0xFF)));
    }

    #[tokio::test]
    async fn bit_write_patches_single_bit_through_parent_word() {
        let (cap, channel) = channel_with_mock();
        channel.connect_default().await;

        channel.write(&addr("%MX8.0"), Value::Bit(true)).await.unwrap();
        assert_eq!(cap.register(4), 0x0001);

        channel.write(&addr("%MX9.7"), Value::Bit(true)).await.unwrap();
        assert_eq!(cap.register(4), 0x8001);

        channel.write(&addr("%MX8.0"), Value::Bit(false)).await.unwrap();
        assert_eq!(cap.register(4), 0x8000);

        assert_eq!(channel.read(&addr("%MX9.7")).await, Ok(Value::Bit(true)));
        assert_eq!(channel.read(&addr("%MX8.0")).await, Ok(Value::Bit(false)));
    }

    #[tokio::test]
    async fn dword_write_honors_word_order() {
        let (cap, channel) = channel_with_mock();
        channel.connect_default().await;

        channel
            .write(&addr("%MD10"), Value::DWord(0x1122_3344))
            .await
            .unwrap();
        assert_eq!(cap.register(10), 0x3344);
        assert_eq!(cap.register(11), 0x1122);
        assert_eq!(
            channel.read(&addr("%MD10")).await,
            Ok(Value::DWord(0x1122_3344))
        );

        let cap2 = Arc::new(MockCapability::new());
        let channel2 = Channel::new(
            cap2.clone(),
            ChannelConfig {
                settle: Duration::ZERO,
                word_order: WordOrder::HighFirst,
                ..ChannelConfig::default()
            },
        );
        channel2.connect_default().await;
        channel2
            .write(&addr("%MD10"), Value::DWord(0x1122_3344))
            .await
            .unwrap();
        assert_eq!(cap2.register(10), 0x1122);
        assert_eq!(cap2.register(11), 0x3344);
        assert_eq!(
            channel2.read(&addr("%MD10")).await,
            Ok(Value::DWord(0x1122_3344))
        );
    }

    #[tokio::test]
    async fn discrete_inputs_read_but_never_write() {
        let (cap, channel) = channel_with_mock();
        channel.connect_default().await;
        cap.set_discrete(0, true);

        assert_eq!(channel.read(&addr("%IX0.0")).await, Ok(Value::Bit(true)));
        assert_eq!(
            channel.write(&addr("%IX0.0"), Value::Bit(false)).await,
            Err(TransportError::NotWritable)
        );
        // Policy rejection is not an I/O failure.
        assert!(channel.is_alive());
    }

    #[tokio::test]
    async fn discrete_input_bits_map_to_distinct_inputs() {
        let (cap, channel) = channel_with_mock();
        channel.connect_default().await;

        // %IX1.3 is input 11; its byte siblings stay untouched.
        cap.set_discrete(11, true);
        assert_eq!(channel.read(&addr("%IX1.3")).await, Ok(Value::Bit(true)));
        assert_eq!(channel.read(&addr("%IX1.0")).await, Ok(Value::Bit(false)));
        assert_eq!(channel.read(&addr("%IX0.3")).await, Ok(Value::Bit(false)));
    }

    #[tokio::test]
    async fn io_failure_marks_connection_dead() {
        let (cap, channel) = channel_with_mock();
        channel.connect_default().await;
        assert!(channel.is_alive());

        cap.fail_io(true);
        assert!(channel.read(&addr("%MW2")).await.is_err());
        assert!(!channel.is_alive());
    }
}
