//! Simulated bus with MPU6050-like devices, optionally behind a multiplexer
//!
//! Models just enough of the register interface for the driver: a register
//! pointer with auto-increment, WHO_AM_I, PWR_MGMT_1 reset value and the
//! 14-byte data block at ACCEL_XOUT_H. Used by tests and `--simulate` runs.

use crate::bus::I2cBus;
use crate::error::{BusError, Result};
use crate::mpu6050::{
    RawSample, BURST_LEN, MPU6050_ADDRESS, REG_ACCEL_XOUT_H, REG_PWR_MGMT_1, REG_WHO_AM_I, WHO_AM_I_VALUE,
};
use std::fmt;
use std::sync::Arc;

const REGISTER_COUNT: usize = 0x80;
const DATA_START: usize = REG_ACCEL_XOUT_H as usize;

/// Produces the sample for the n-th burst read
#[derive(Clone)]
pub struct SampleGenerator(Arc<dyn Fn(u64) -> RawSample + Send + Sync>);

impl SampleGenerator {
    pub fn new<F>(generator: F) -> Self
    where
        F: Fn(u64) -> RawSample + Send + Sync + 'static,
    {
        Self(Arc::new(generator))
    }

    fn sample(&self, n: u64) -> RawSample {
        (self.0)(n)
    }
}

impl fmt::Debug for SampleGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SampleGenerator")
    }
}

/// One simulated sensor
#[derive(Debug, Clone)]
pub struct SimSensor {
    address: u8,
    registers: [u8; REGISTER_COUNT],
    pointer: usize,
    generator: Option<SampleGenerator>,
    bursts: u64,
    identity_reads: u32,
    truncate: Option<(u32, usize)>,
}

impl SimSensor {
    pub fn new(address: u8) -> Self {
        let mut registers = [0u8; REGISTER_COUNT];
        registers[REG_WHO_AM_I as usize] = WHO_AM_I_VALUE;
        registers[REG_PWR_MGMT_1 as usize] = 0x40; // SLEEP set after power-on reset

        Self {
            address,
            registers,
            pointer: 0,
            generator: None,
            bursts: 0,
            identity_reads: 0,
            truncate: None,
        }
    }

    /// Answer WHO_AM_I with `identity` instead of 0x68
    pub fn with_identity(mut self, identity: u8) -> Self {
        self.registers[REG_WHO_AM_I as usize] = identity;
        self
    }

    /// Fixed data registers
    pub fn with_sample(mut self, sample: RawSample) -> Self {
        self.set_sample(sample);
        self
    }

    /// Data registers refreshed before every burst read
    ///
    /// The generator gets the burst index; callers that want sample time
    /// divide by their own loop rate.
    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(u64) -> RawSample + Send + Sync + 'static,
    {
        self.generator = Some(SampleGenerator::new(generator));
        self
    }

    pub fn set_sample(&mut self, sample: RawSample) {
        self.registers[DATA_START..DATA_START + BURST_LEN]
            .copy_from_slice(&sample.to_burst());
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.registers[reg as usize]
    }

    /// How many times WHO_AM_I was read
    pub fn identity_reads(&self) -> u32 {
        self.identity_reads
    }

    /// Completed burst reads of the data block
    pub fn bursts(&self) -> u64 {
        self.bursts
    }

    fn write(&mut self, bytes: &[u8]) {
        if let Some((&reg, values)) = bytes.split_first() {
            self.pointer = reg as usize % REGISTER_COUNT;
            for value in values {
                self.registers[self.pointer] = *value;
                self.pointer = (self.pointer + 1) % REGISTER_COUNT;
            }
        }
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<()> {
        if self.pointer == REG_WHO_AM_I as usize {
            self.identity_reads += 1;
        }

        let burst = self.pointer == DATA_START && buffer.len() == BURST_LEN;
        if burst {
            if let Some(sample) = self.generator.as_ref().map(|g| g.sample(self.bursts)) {
                self.set_sample(sample);
            }
        }

        if let Some((remaining, actual)) = self.truncate {
            self.truncate = (remaining > 1).then_some((remaining - 1, actual));
            let actual = actual.min(buffer.len().saturating_sub(1));
            self.fill(&mut buffer[..actual]);
            return Err(BusError::Truncated {
                expected: buffer.len(),
                actual,
            });
        }

        self.fill(buffer);
        if burst {
            self.bursts += 1;
        }
        Ok(())
    }

    fn fill(&mut self, buffer: &mut [u8]) {
        for byte in buffer {
            *byte = self.registers[self.pointer];
            self.pointer = (self.pointer + 1) % REGISTER_COUNT;
        }
    }
}

/// Simulated I2C bus
#[derive(Debug, Clone)]
pub struct SimBus {
    mux_address: Option<u8>,
    mux_present: bool,
    selected: u8,
    slots: Vec<Option<SimSensor>>,
    mux_writes: u32,
}

impl SimBus {
    /// Sensors wired straight to the bus, each at its own address
    pub fn direct(sensors: Vec<SimSensor>) -> Self {
        Self {
            mux_address: None,
            mux_present: false,
            selected: 0,
            slots: sensors.into_iter().map(Some).collect(),
            mux_writes: 0,
        }
    }

    /// Sensors behind a multiplexer; `None` leaves that channel empty
    pub fn multiplexed(mux_address: u8, channels: Vec<Option<SimSensor>>) -> Self {
        Self {
            mux_address: Some(mux_address),
            mux_present: true,
            selected: 0,
            slots: channels,
            mux_writes: 0,
        }
    }

    /// `count` identical sensors at 0x68 behind a multiplexer
    pub fn array(mux_address: u8, count: usize, sample: RawSample) -> Self {
        let channels = (0..count)
            .map(|_| Some(SimSensor::new(MPU6050_ADDRESS).with_sample(sample)))
            .collect();
        Self::multiplexed(mux_address, channels)
    }

    /// Sensor in slot `index` (channel for multiplexed buses)
    ///
    /// # Panics
    /// If the slot is empty.
    pub fn sensor(&self, index: usize) -> &SimSensor {
        self.slots[index].as_ref().expect("empty simulated slot")
    }

    pub fn sensor_mut(&mut self, index: usize) -> &mut SimSensor {
        self.slots[index].as_mut().expect("empty simulated slot")
    }

    /// Fail the next `count` reads of sensor `index` after `actual` bytes
    pub fn truncate_reads(&mut self, index: usize, count: u32, actual: usize) {
        if count > 0 {
            self.sensor_mut(index).truncate = Some((count, actual));
        }
    }

    /// Make the multiplexer stop (or resume) acknowledging
    pub fn set_mux_present(&mut self, present: bool) {
        self.mux_present = present;
    }

    /// Channel-select writes accepted by the multiplexer
    pub fn mux_writes(&self) -> u32 {
        self.mux_writes
    }

    fn device(&mut self, address: u8) -> Option<&mut SimSensor> {
        let selected = self.selected;
        let multiplexed = self.mux_address.is_some();
        self.slots
            .iter_mut()
            .enumerate()
            .filter(|(channel, _)| !multiplexed || (*channel < 8 && (selected >> *channel) & 1 != 0))
            .filter_map(|(_, slot)| slot.as_mut())
            .find(|sensor| sensor.address == address)
    }
}

impl I2cBus for SimBus {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
        if Some(address) == self.mux_address {
            if !self.mux_present {
                return Err(BusError::NoAck { address });
            }
            self.selected = bytes.first().copied().unwrap_or(0);
            self.mux_writes += 1;
            return Ok(());
        }

        let sensor = self.device(address).ok_or(BusError::NoAck { address })?;
        sensor.write(bytes);
        Ok(())
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        if Some(address) == self.mux_address {
            if !self.mux_present {
                return Err(BusError::NoAck { address });
            }
            buffer.fill(self.selected);
            return Ok(());
        }

        let sensor = self.device(address).ok_or(BusError::NoAck { address })?;
        sensor.read(buffer)
    }

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()> {
        self.write(address, bytes)?;
        self.read(address, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_selected_channel_answers() {
        let mut bus = SimBus::array(0x70, 3, RawSample::default());
        let mut id = [0u8];

        // Nothing selected after reset
        assert!(bus.write_read(0x68, &[0x75], &mut id).is_err());

        bus.write(0x70, &[0b010]).unwrap();
        bus.write_read(0x68, &[0x75], &mut id).unwrap();
        assert_eq!(id[0], 0x68);
        assert_eq!(bus.sensor(1).identity_reads(), 1);
        assert_eq!(bus.sensor(0).identity_reads(), 0);
    }

    #[test]
    fn test_empty_channel_nacks() {
        let mut bus = SimBus::multiplexed(0x70, vec![None, Some(SimSensor::new(0x68))]);
        bus.write(0x70, &[0b01]).unwrap();
        assert_eq!(bus.write(0x68, &[0x6B, 0]), Err(BusError::NoAck { address: 0x68 }));
    }

    #[test]
    fn test_register_pointer_auto_increments() {
        let mut bus = SimBus::direct(vec![SimSensor::new(0x69)]);
        bus.write(0x69, &[0x19, 0x09, 0x01]).unwrap();
        assert_eq!(bus.sensor(0).register(0x19), 0x09);
        assert_eq!(bus.sensor(0).register(0x1A), 0x01);
    }

    #[test]
    fn test_generator_refreshes_each_burst() {
        fn ramp(n: u64) -> RawSample {
            RawSample { accel_x: n as i16, ..Default::default() }
        }
        let mut bus = SimBus::direct(vec![SimSensor::new(0x68).with_generator(ramp)]);
        let mut data = [0u8; BURST_LEN];

        for expected in 0..3i16 {
            bus.write_read(0x68, &[0x3B], &mut data).unwrap();
            assert_eq!(RawSample::from_burst(&data).accel_x, expected);
        }
        assert_eq!(bus.sensor(0).bursts(), 3);
    }

    #[test]
    fn test_generator_captures_state() {
        let offset = 7i16;
        let mut bus = SimBus::direct(vec![
            SimSensor::new(0x68).with_generator(move |n| RawSample { gyro_z: offset + n as i16, ..Default::default() }),
        ]);
        let mut data = [0u8; BURST_LEN];

        bus.write_read(0x68, &[0x3B], &mut data).unwrap();
        bus.write_read(0x68, &[0x3B], &mut data).unwrap();
        assert_eq!(RawSample::from_burst(&data).gyro_z, 8);
    }

    #[test]
    fn test_register_map_matches_driver() {
        use crate::clock::ManualClock;
        use crate::mpu6050::{Mpu6050, SensorSettings};

        let sample = RawSample { accel_x: -3, gyro_y: 42, ..Default::default() };
        let mut bus = SimBus::direct(vec![SimSensor::new(0x68).with_sample(sample)]);
        assert_eq!(bus.sensor(0).register(REG_WHO_AM_I), WHO_AM_I_VALUE);
        assert_eq!(bus.sensor(0).register(REG_PWR_MGMT_1), 0x40);

        let sensor = Mpu6050::new(0x68, SensorSettings::default());
        sensor.init(&mut bus, &mut ManualClock::new()).unwrap();

        assert_eq!(bus.sensor(0).register(REG_PWR_MGMT_1), 0x00);
        assert_eq!(bus.sensor(0).identity_reads(), 1);
        assert_eq!(sensor.read_raw(&mut bus).unwrap(), sample);
        assert_eq!(bus.sensor(0).bursts(), 1);
    }

    #[test]
    fn test_missing_mux_nacks() {
        let mut bus = SimBus::array(0x70, 1, RawSample::default());
        bus.set_mux_present(false);
        assert_eq!(bus.write(0x70, &[1]), Err(BusError::NoAck { address: 0x70 }));
    }
}
