//! MPU6050 register-level driver
//!
//! The driver is stateless apart from its address and settings: every call
//! borrows the bus, so one instance per channel can share a single
//! multiplexed bus.

use crate::bus::I2cBus;
use crate::clock::Clock;
use crate::error::{BusError, InitError};
use serde::Deserialize;
use std::f64::consts::PI;
use std::time::Duration;

// MPU6050 I2C addresses
pub const MPU6050_ADDRESS: u8 = 0x68; // AD0 low
pub const MPU6050_ALT_ADDRESS: u8 = 0x69; // AD0 high

// MPU6050 Register addresses
const REG_SMPLRT_DIV: u8 = 0x19; // Sample rate divider
const REG_CONFIG: u8 = 0x1A; // DLPF configuration
const REG_GYRO_CONFIG: u8 = 0x1B;
const REG_ACCEL_CONFIG: u8 = 0x1C;
pub(crate) const REG_ACCEL_XOUT_H: u8 = 0x3B;
pub(crate) const REG_PWR_MGMT_1: u8 = 0x6B;
pub(crate) const REG_WHO_AM_I: u8 = 0x75;

/// Expected WHO_AM_I value (independent of AD0)
pub const WHO_AM_I_VALUE: u8 = 0x68;

/// Bytes in one accel + temp + gyro burst
pub const BURST_LEN: usize = 14;

/// Time for the oscillator to stabilize after leaving sleep
pub const WAKE_SETTLE: Duration = Duration::from_millis(50);

// DLPF_CFG=1: 188 Hz bandwidth, 1 kHz gyro output rate
const DLPF_CFG_188HZ: u8 = 0x01;
const GYRO_OUTPUT_RATE_HZ: u32 = 1000;

/// Supported sample rate range for the 1 kHz output rate divider
pub const MIN_SAMPLE_RATE_HZ: u32 = 4;
pub const MAX_SAMPLE_RATE_HZ: u32 = 1000;

/// Accelerometer full-scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum AccelRange {
    #[default]
    #[serde(rename = "2g")]
    G2,
    #[serde(rename = "4g")]
    G4,
    #[serde(rename = "8g")]
    G8,
    #[serde(rename = "16g")]
    G16,
}

impl AccelRange {
    /// AFS_SEL bits for ACCEL_CONFIG
    pub fn register_value(self) -> u8 {
        match self {
            AccelRange::G2 => 0x00,
            AccelRange::G4 => 0x08,
            AccelRange::G8 => 0x10,
            AccelRange::G16 => 0x18,
        }
    }

    /// Sensitivity in LSB/g
    pub fn lsb_per_g(self) -> f64 {
        match self {
            AccelRange::G2 => 16384.0,
            AccelRange::G4 => 8192.0,
            AccelRange::G8 => 4096.0,
            AccelRange::G16 => 2048.0,
        }
    }
}

/// Gyroscope full-scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum GyroRange {
    #[default]
    #[serde(rename = "250dps")]
    Dps250,
    #[serde(rename = "500dps")]
    Dps500,
    #[serde(rename = "1000dps")]
    Dps1000,
    #[serde(rename = "2000dps")]
    Dps2000,
}

impl GyroRange {
    /// FS_SEL bits for GYRO_CONFIG
    pub fn register_value(self) -> u8 {
        match self {
            GyroRange::Dps250 => 0x00,
            GyroRange::Dps500 => 0x08,
            GyroRange::Dps1000 => 0x10,
            GyroRange::Dps2000 => 0x18,
        }
    }

    /// Sensitivity in LSB/(°/s)
    pub fn lsb_per_dps(self) -> f64 {
        match self {
            GyroRange::Dps250 => 131.0,
            GyroRange::Dps500 => 65.5,
            GyroRange::Dps1000 => 32.8,
            GyroRange::Dps2000 => 16.4,
        }
    }
}

/// One register write in an init sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub register: u8,
    pub value: u8,
}

impl RegisterWrite {
    pub const fn new(register: u8, value: u8) -> Self {
        Self { register, value }
    }
}

/// Fixed measurement settings, chosen once at construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSettings {
    pub accel_range: AccelRange,
    pub gyro_range: GyroRange,
    pub sample_rate_hz: u32,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            accel_range: AccelRange::G2,
            gyro_range: GyroRange::Dps250,
            sample_rate_hz: 100,
        }
    }
}

impl SensorSettings {
    /// SMPLRT_DIV for the configured rate
    ///
    /// Sample Rate = Gyro Output Rate / (1 + SMPLRT_DIV)
    pub fn sample_rate_divider(&self) -> u8 {
        let rate = self.sample_rate_hz.clamp(MIN_SAMPLE_RATE_HZ, MAX_SAMPLE_RATE_HZ);
        (GYRO_OUTPUT_RATE_HZ / rate).saturating_sub(1) as u8
    }

    /// Rate the sensor actually produces after divider truncation
    pub fn effective_sample_rate_hz(&self) -> f64 {
        GYRO_OUTPUT_RATE_HZ as f64 / (1.0 + self.sample_rate_divider() as f64)
    }

    /// Configuration writes issued after wake-up, in order
    pub fn register_table(&self) -> [RegisterWrite; 4] {
        [
            RegisterWrite::new(REG_CONFIG, DLPF_CFG_188HZ),
            RegisterWrite::new(REG_SMPLRT_DIV, self.sample_rate_divider()),
            RegisterWrite::new(REG_ACCEL_CONFIG, self.accel_range.register_value()),
            RegisterWrite::new(REG_GYRO_CONFIG, self.gyro_range.register_value()),
        ]
    }
}

/// One burst read, as delivered by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
    pub temperature: i16,
    pub gyro_x: i16,
    pub gyro_y: i16,
    pub gyro_z: i16,
}

impl RawSample {
    /// Decode a burst starting at ACCEL_XOUT_H:
    /// Bytes 0-5:   ACCEL_XOUT (X, Y, Z)
    /// Bytes 6-7:   TEMP_OUT
    /// Bytes 8-13:  GYRO_XOUT (X, Y, Z)
    pub fn from_burst(data: &[u8; BURST_LEN]) -> Self {
        let word = |i: usize| i16::from_be_bytes([data[i], data[i + 1]]);
        Self {
            accel_x: word(0),
            accel_y: word(2),
            accel_z: word(4),
            temperature: word(6),
            gyro_x: word(8),
            gyro_y: word(10),
            gyro_z: word(12),
        }
    }

    /// Inverse of [`RawSample::from_burst`]
    pub fn to_burst(&self) -> [u8; BURST_LEN] {
        let mut data = [0u8; BURST_LEN];
        let words = [
            self.accel_x,
            self.accel_y,
            self.accel_z,
            self.temperature,
            self.gyro_x,
            self.gyro_y,
            self.gyro_z,
        ];
        for (chunk, word) in data.chunks_exact_mut(2).zip(words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        data
    }

    pub fn accel(&self) -> [i16; 3] {
        [self.accel_x, self.accel_y, self.accel_z]
    }

    pub fn gyro(&self) -> [i16; 3] {
        [self.gyro_x, self.gyro_y, self.gyro_z]
    }

    /// Accelerometer in g
    pub fn accel_to_g(&self, range: AccelRange) -> [f64; 3] {
        self.accel().map(|raw| raw as f64 / range.lsb_per_g())
    }

    /// Gyroscope in rad/s, after subtracting a raw-LSB bias
    pub fn gyro_to_rad_s(&self, range: GyroRange, bias: [f64; 3]) -> [f64; 3] {
        let raw = self.gyro();
        [0usize, 1, 2].map(|i| (raw[i] as f64 - bias[i]) * (PI / 180.0) / range.lsb_per_dps())
    }

    /// Die temperature in °C
    pub fn temperature_c(&self) -> f64 {
        self.temperature as f64 / 340.0 + 36.53
    }
}

/// Calibrated sample in physical units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalSample {
    /// Acceleration in g
    pub accel: [f64; 3],
    /// Angular rate in rad/s
    pub gyro: [f64; 3],
    /// Die temperature in °C, when exposed
    pub temperature_c: Option<f64>,
}

impl PhysicalSample {
    pub fn from_raw(
        raw: &RawSample,
        settings: &SensorSettings,
        gyro_bias: [f64; 3],
        include_temperature: bool,
    ) -> Self {
        Self {
            accel: raw.accel_to_g(settings.accel_range),
            gyro: raw.gyro_to_rad_s(settings.gyro_range, gyro_bias),
            temperature_c: include_temperature.then(|| raw.temperature_c()),
        }
    }
}

/// MPU6050 at one bus address
#[derive(Debug, Clone)]
pub struct Mpu6050 {
    address: u8,
    settings: SensorSettings,
}

impl Mpu6050 {
    pub fn new(address: u8, settings: SensorSettings) -> Self {
        Self { address, settings }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn settings(&self) -> &SensorSettings {
        &self.settings
    }

    /// Probe, wake and configure the sensor
    ///
    /// Stops at the first failure; the caller decides whether the channel is
    /// usable. No retries.
    pub fn init<B: I2cBus, C: Clock>(&self, bus: &mut B, clock: &mut C) -> Result<(), InitError> {
        self.probe(bus)?;

        // Wake up the sensor (clear sleep bit)
        self.write_register(bus, REG_PWR_MGMT_1, 0x00)?;
        clock.sleep(WAKE_SETTLE);

        self.apply_config(bus, &self.settings.register_table())?;
        Ok(())
    }

    /// Verify device ID
    pub fn probe<B: I2cBus>(&self, bus: &mut B) -> Result<(), InitError> {
        let who_am_i = self.read_register(bus, REG_WHO_AM_I)?;
        if who_am_i != WHO_AM_I_VALUE {
            return Err(InitError::IdentityMismatch {
                expected: WHO_AM_I_VALUE,
                actual: who_am_i,
            });
        }
        Ok(())
    }

    /// Write a configuration sequence in order, stopping at the first failure
    pub fn apply_config<B: I2cBus>(&self, bus: &mut B, table: &[RegisterWrite]) -> Result<(), BusError> {
        for step in table {
            self.write_register(bus, step.register, step.value)?;
        }
        Ok(())
    }

    /// Read accel, temperature and gyro in a single transaction
    pub fn read_raw<B: I2cBus>(&self, bus: &mut B) -> Result<RawSample, BusError> {
        let mut data = [0u8; BURST_LEN];
        bus.write_read(self.address, &[REG_ACCEL_XOUT_H], &mut data)?;
        Ok(RawSample::from_burst(&data))
    }

    fn write_register<B: I2cBus>(&self, bus: &mut B, reg: u8, value: u8) -> Result<(), BusError> {
        bus.write(self.address, &[reg, value])
    }

    fn read_register<B: I2cBus>(&self, bus: &mut B, reg: u8) -> Result<u8, BusError> {
        let mut data = [0u8];
        bus.write_read(self.address, &[reg], &mut data)?;
        Ok(data[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sim::{SimBus, SimSensor};

    fn sensor() -> Mpu6050 {
        Mpu6050::new(MPU6050_ADDRESS, SensorSettings::default())
    }

    #[test]
    fn test_accel_conversion_is_raw_over_16384() {
        for raw in [i16::MIN, -16384, -1, 0, 1, 8192, 16384, i16::MAX] {
            let sample = RawSample { accel_x: raw, accel_y: raw, accel_z: raw, ..Default::default() };
            let g = sample.accel_to_g(AccelRange::G2);
            assert_eq!(g, [raw as f64 / 16384.0; 3]);
        }
    }

    #[test]
    fn test_gyro_conversion_to_rad_per_s() {
        for raw in [i16::MIN, -131, 0, 131, 1310, i16::MAX] {
            let sample = RawSample { gyro_x: raw, gyro_y: raw, gyro_z: raw, ..Default::default() };
            let rate = sample.gyro_to_rad_s(GyroRange::Dps250, [0.0; 3]);
            assert_eq!(rate, [raw as f64 * (PI / 180.0) / 131.0; 3]);
        }
    }

    #[test]
    fn test_one_g_on_x() {
        let sample = RawSample { accel_x: 16384, ..Default::default() };
        let physical = PhysicalSample::from_raw(&sample, &SensorSettings::default(), [0.0; 3], false);
        assert_eq!(physical.accel, [1.0, 0.0, 0.0]);
        assert_eq!(physical.temperature_c, None);
    }

    #[test]
    fn test_temperature_opt_in() {
        let sample = RawSample { temperature: 0, ..Default::default() };
        let physical = PhysicalSample::from_raw(&sample, &SensorSettings::default(), [0.0; 3], true);
        assert_eq!(physical.temperature_c, Some(36.53));
    }

    #[test]
    fn test_gyro_bias_subtracted_before_scaling() {
        let sample = RawSample { gyro_z: 231, ..Default::default() };
        let rate = sample.gyro_to_rad_s(GyroRange::Dps250, [0.0, 0.0, 100.0]);
        assert!((rate[2] - PI / 180.0).abs() < 1e-12);
    }

    #[test]
    fn test_burst_decodes_big_endian_in_register_order() {
        let data = [
            0x40, 0x00, // accel x = 16384
            0xC0, 0x00, // accel y = -16384
            0x00, 0x01, // accel z = 1
            0xFF, 0xFE, // temp = -2
            0x00, 0x83, // gyro x = 131
            0xFF, 0x7D, // gyro y = -131
            0x7F, 0xFF, // gyro z = 32767
        ];
        let sample = RawSample::from_burst(&data);
        assert_eq!(sample.accel(), [16384, -16384, 1]);
        assert_eq!(sample.temperature, -2);
        assert_eq!(sample.gyro(), [131, -131, 32767]);
        assert_eq!(sample.to_burst(), data);
    }

    #[test]
    fn test_register_table_for_defaults() {
        let table = SensorSettings::default().register_table();
        assert_eq!(
            table,
            [
                RegisterWrite::new(0x1A, 0x01),
                RegisterWrite::new(0x19, 9), // 1 kHz / (1 + 9) = 100 Hz
                RegisterWrite::new(0x1C, 0x00),
                RegisterWrite::new(0x1B, 0x00),
            ]
        );
    }

    #[test]
    fn test_sample_rate_divider() {
        let at = |hz| SensorSettings { sample_rate_hz: hz, ..Default::default() };
        assert_eq!(at(1000).sample_rate_divider(), 0);
        assert_eq!(at(2).sample_rate_divider(), 249);
        assert_eq!(at(300).sample_rate_divider(), 2);
        assert!((at(300).effective_sample_rate_hz() - 333.333).abs() < 0.01);
    }

    #[test]
    fn test_init_writes_wake_then_table() {
        let mut bus = SimBus::direct(vec![SimSensor::new(MPU6050_ADDRESS)]);
        let mut clock = ManualClock::new();
        let settings = SensorSettings {
            accel_range: AccelRange::G8,
            gyro_range: GyroRange::Dps1000,
            sample_rate_hz: 500,
        };

        Mpu6050::new(MPU6050_ADDRESS, settings).init(&mut bus, &mut clock).unwrap();

        let device = bus.sensor(0);
        assert_eq!(device.register(0x6B), 0x00);
        assert_eq!(device.register(0x1A), 0x01);
        assert_eq!(device.register(0x19), 1);
        assert_eq!(device.register(0x1C), 0x10);
        assert_eq!(device.register(0x1B), 0x10);
        assert_eq!(clock.now(), WAKE_SETTLE);
    }

    #[test]
    fn test_init_rejects_wrong_identity() {
        let mut bus = SimBus::direct(vec![SimSensor::new(MPU6050_ADDRESS).with_identity(0x70)]);
        let mut clock = ManualClock::new();

        let err = sensor().init(&mut bus, &mut clock).unwrap_err();
        assert_eq!(err, InitError::IdentityMismatch { expected: 0x68, actual: 0x70 });
        // Nothing written after a failed probe
        assert_eq!(bus.sensor(0).register(0x6B), 0x40);
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn test_init_absent_device_is_bus_error() {
        let mut bus = SimBus::direct(vec![]);
        let mut clock = ManualClock::new();

        let err = sensor().init(&mut bus, &mut clock).unwrap_err();
        assert_eq!(err, InitError::Bus(BusError::NoAck { address: MPU6050_ADDRESS }));
    }

    #[test]
    fn test_read_raw_returns_current_sample() {
        let expected = RawSample { accel_z: 16384, gyro_x: -42, temperature: 1200, ..Default::default() };
        let mut bus = SimBus::direct(vec![SimSensor::new(MPU6050_ADDRESS).with_sample(expected)]);

        assert_eq!(sensor().read_raw(&mut bus).unwrap(), expected);
    }

    #[test]
    fn test_read_raw_truncated() {
        let mut bus = SimBus::direct(vec![SimSensor::new(MPU6050_ADDRESS)]);
        bus.truncate_reads(0, 1, 6);

        let err = sensor().read_raw(&mut bus).unwrap_err();
        assert_eq!(err, BusError::Truncated { expected: 14, actual: 6 });
        assert!(sensor().read_raw(&mut bus).is_ok());
    }
}
