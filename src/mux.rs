//! Channel selection on the shared bus
//!
//! Identical sensors share one address, so a TCA9548A-style multiplexer
//! connects exactly one downstream pair at a time. Boards that wire sensors
//! at distinct addresses use [`DirectBus`], where selection is a no-op.

use crate::bus::I2cBus;
use crate::clock::Clock;
use crate::error::Result;
use std::time::Duration;

/// Default TCA9548A address (A0..A2 low)
pub const TCA9548A_ADDRESS: u8 = 0x70;

/// Number of downstream channels on a TCA9548A
pub const TCA9548A_CHANNELS: usize = 8;

/// Electrical settle time after switching channels
pub const MUX_SETTLE: Duration = Duration::from_millis(1);

/// Routes bus traffic to one channel at a time
pub trait ChannelSelector {
    /// Number of selectable channels
    fn capacity(&self) -> usize;

    /// Connect `channel` to the bus and wait for it to settle
    ///
    /// # Panics
    /// If `channel >= self.capacity()`. An out-of-range channel is a caller bug,
    /// not a bus condition.
    fn select<B: I2cBus, C: Clock>(&mut self, bus: &mut B, clock: &mut C, channel: usize) -> Result<()>;
}

/// TCA9548A 8-channel I2C multiplexer
#[derive(Debug, Clone)]
pub struct Tca9548a {
    address: u8,
}

impl Tca9548a {
    pub fn new(address: u8) -> Self {
        Self { address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}

impl Default for Tca9548a {
    fn default() -> Self {
        Self::new(TCA9548A_ADDRESS)
    }
}

impl ChannelSelector for Tca9548a {
    fn capacity(&self) -> usize {
        TCA9548A_CHANNELS
    }

    fn select<B: I2cBus, C: Clock>(&mut self, bus: &mut B, clock: &mut C, channel: usize) -> Result<()> {
        assert!(
            channel < TCA9548A_CHANNELS,
            "multiplexer channel {} out of range (0..{})",
            channel,
            TCA9548A_CHANNELS
        );

        bus.write(self.address, &[1u8 << channel])?;
        clock.sleep(MUX_SETTLE);
        Ok(())
    }
}

/// Single bus without a multiplexer; every channel is always connected
#[derive(Debug, Clone)]
pub struct DirectBus {
    channels: usize,
}

impl DirectBus {
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl ChannelSelector for DirectBus {
    fn capacity(&self) -> usize {
        self.channels
    }

    fn select<B: I2cBus, C: Clock>(&mut self, _bus: &mut B, _clock: &mut C, channel: usize) -> Result<()> {
        assert!(
            channel < self.channels,
            "channel {} out of range (0..{})",
            channel,
            self.channels
        );
        Ok(())
    }
}

/// Selector chosen at runtime from the configured topology
#[derive(Debug, Clone)]
pub enum Selector {
    Multiplexed(Tca9548a),
    Direct(DirectBus),
}

impl ChannelSelector for Selector {
    fn capacity(&self) -> usize {
        match self {
            Selector::Multiplexed(mux) => mux.capacity(),
            Selector::Direct(direct) => direct.capacity(),
        }
    }

    fn select<B: I2cBus, C: Clock>(&mut self, bus: &mut B, clock: &mut C, channel: usize) -> Result<()> {
        match self {
            Selector::Multiplexed(mux) => mux.select(bus, clock, channel),
            Selector::Direct(direct) => direct.select(bus, clock, channel),
        }
    }
}
