//! Static pipeline configuration
//!
//! Everything here is fixed once the scheduler is built. Values come from
//! defaults, an optional TOML file and command-line overrides, and are
//! validated before any bus traffic happens.

use crate::error::ConfigError;
use crate::mpu6050::{
    AccelRange, GyroRange, SensorSettings, MAX_SAMPLE_RATE_HZ, MPU6050_ADDRESS,
};
use crate::mux::{DirectBus, Selector, Tca9548a, TCA9548A_ADDRESS, TCA9548A_CHANNELS};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Slowest supported loop rate; the sensor itself never samples below 4 Hz
pub const MIN_LOOP_RATE_HZ: u32 = 1;

/// Default body-site labels, right leg then left leg
pub const DEFAULT_LABELS: [&str; 6] = ["thigh_r", "shank_r", "foot_r", "thigh_l", "shank_l", "foot_l"];

fn default_mux_address() -> u8 {
    TCA9548A_ADDRESS
}

fn default_sensor_address() -> u8 {
    MPU6050_ADDRESS
}

/// How sensors are reached on the bus
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    /// Identical sensors behind a TCA9548A multiplexer, one per channel
    Multiplexed {
        #[serde(default = "default_mux_address")]
        address: u8,
    },
    /// No multiplexer; every sensor has its own address
    Direct,
}

impl Default for Topology {
    fn default() -> Self {
        Topology::Multiplexed {
            address: TCA9548A_ADDRESS,
        }
    }
}

/// One sensor location
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelConfig {
    pub label: String,
    #[serde(default = "default_sensor_address")]
    pub address: u8,
}

impl ChannelConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            address: MPU6050_ADDRESS,
        }
    }
}

/// Complete acquisition configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub topology: Topology,
    /// Channel `i` is multiplexer output `i`
    pub channels: Vec<ChannelConfig>,
    pub sample_rate_hz: u32,
    /// Accelerometer correction gain of the orientation filter
    pub filter_gain: f64,
    pub accel_range: AccelRange,
    pub gyro_range: GyroRange,
    /// Expose die temperature in records
    pub include_temperature: bool,
    /// Stationary gyro samples per channel at startup; 0 skips calibration
    pub calibration_samples: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            channels: DEFAULT_LABELS.iter().map(|label| ChannelConfig::new(*label)).collect(),
            sample_rate_hz: 100,
            filter_gain: 1.0,
            accel_range: AccelRange::G2,
            gyro_range: GyroRange::Dps250,
            include_temperature: false,
            calibration_samples: 0,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a TOML configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::read_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file without validating it
    ///
    /// For callers that layer overrides on top and validate the result.
    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the channel list with sensors at the default address
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = labels.into_iter().map(ChannelConfig::new).collect();
        self
    }

    /// Check the configuration is usable as a whole
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        if self.channels.is_empty() {
            return invalid("at least one channel is required".to_string());
        }

        if !(MIN_LOOP_RATE_HZ..=MAX_SAMPLE_RATE_HZ).contains(&self.sample_rate_hz) {
            return invalid(format!(
                "sample rate must be {}-{} Hz, got {}",
                MIN_LOOP_RATE_HZ, MAX_SAMPLE_RATE_HZ, self.sample_rate_hz
            ));
        }

        if !self.filter_gain.is_finite() || self.filter_gain < 0.0 {
            return invalid(format!("filter gain must be finite and >= 0, got {}", self.filter_gain));
        }

        for (index, channel) in self.channels.iter().enumerate() {
            if channel.label.is_empty() || channel.label.contains(['\t', '\n', '\r']) {
                return invalid(format!("channel {} label {:?} is empty or contains a tab/newline", index, channel.label));
            }
            if channel.address > 0x7F {
                return invalid(format!("channel {} address 0x{:02X} is not 7-bit", index, channel.address));
            }
        }

        match self.topology {
            Topology::Multiplexed { address } => {
                if address > 0x7F {
                    return invalid(format!("multiplexer address 0x{:02X} is not 7-bit", address));
                }
                if self.channels.len() > TCA9548A_CHANNELS {
                    return invalid(format!(
                        "{} channels configured but the multiplexer has {}",
                        self.channels.len(),
                        TCA9548A_CHANNELS
                    ));
                }
                if let Some(channel) = self.channels.iter().find(|c| c.address == address) {
                    return invalid(format!(
                        "sensor '{}' shares the multiplexer address 0x{:02X}",
                        channel.label, address
                    ));
                }
            }
            Topology::Direct => {
                let mut seen = HashSet::new();
                for channel in &self.channels {
                    if !seen.insert(channel.address) {
                        return invalid(format!(
                            "address 0x{:02X} used twice without a multiplexer",
                            channel.address
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Nominal tick period
    pub fn period(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.sample_rate_hz.max(1) as u64)
    }

    pub fn sensor_settings(&self) -> SensorSettings {
        SensorSettings {
            accel_range: self.accel_range,
            gyro_range: self.gyro_range,
            sample_rate_hz: self.sample_rate_hz,
        }
    }

    pub fn selector(&self) -> Selector {
        match self.topology {
            Topology::Multiplexed { address } => Selector::Multiplexed(Tca9548a::new(address)),
            Topology::Direct => Selector::Direct(DirectBus::new(self.channels.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::ChannelSelector;

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.channels.len(), 6);
        assert_eq!(config.period(), Duration::from_millis(10));
    }

    #[test]
    fn test_reference_periods() {
        let at = |hz| PipelineConfig { sample_rate_hz: hz, ..Default::default() };
        assert_eq!(at(100).period(), Duration::from_millis(10));
        assert_eq!(at(2).period(), Duration::from_millis(500));
        at(2).validate().unwrap();
        assert!(at(0).validate().is_err());
        assert!(at(1001).validate().is_err());
    }

    #[test]
    fn test_too_many_channels_rejected() {
        let config = PipelineConfig::default().with_labels((0..9).map(|i| format!("s{}", i)));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("multiplexer has 8")));
    }

    #[test]
    fn test_eight_channels_accepted() {
        let config = PipelineConfig::default().with_labels((0..8).map(|i| format!("s{}", i)));
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_channels_rejected() {
        let config = PipelineConfig::default().with_labels(Vec::<String>::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_gain_rejected() {
        for gain in [-0.1, f64::NAN, f64::INFINITY] {
            let config = PipelineConfig { filter_gain: gain, ..Default::default() };
            assert!(config.validate().is_err(), "gain {} accepted", gain);
        }
    }

    #[test]
    fn test_label_with_tab_rejected() {
        let config = PipelineConfig::default().with_labels(["left\tknee"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_direct_requires_unique_addresses() {
        let mut config = PipelineConfig {
            topology: Topology::Direct,
            ..Default::default()
        }
        .with_labels(["a", "b"]);
        assert!(config.validate().is_err());

        config.channels[1].address = 0x69;
        config.validate().unwrap();
        assert_eq!(config.selector().capacity(), 2);
    }

    #[test]
    fn test_sensor_on_mux_address_rejected() {
        let mut config = PipelineConfig::default().with_labels(["a"]);
        config.channels[0].address = 0x70;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            sample_rate_hz = 2000
            "#,
        );
        assert!(config.is_err());

        let config = PipelineConfig::from_toml_str(
            r#"
            sample_rate_hz = 50
            filter_gain = 0.5
            accel_range = "4g"
            gyro_range = "500dps"
            include_temperature = true

            [topology]
            kind = "multiplexed"
            address = 0x71

            [[channels]]
            label = "wrist_l"

            [[channels]]
            label = "wrist_r"
            "#,
        )
        .unwrap();

        assert_eq!(config.sample_rate_hz, 50);
        assert_eq!(config.filter_gain, 0.5);
        assert_eq!(config.accel_range, AccelRange::G4);
        assert_eq!(config.gyro_range, GyroRange::Dps500);
        assert!(config.include_temperature);
        assert_eq!(config.topology, Topology::Multiplexed { address: 0x71 });
        assert_eq!(config.channels, vec![ChannelConfig::new("wrist_l"), ChannelConfig::new("wrist_r")]);
        assert_eq!(config.calibration_samples, 0);
    }

    #[test]
    fn test_read_from_file_defers_validation() {
        let path = std::env::temp_dir().join(format!("imu_array_config_{}.toml", std::process::id()));
        std::fs::write(&path, "sample_rate_hz = 2000\n").unwrap();

        let raw = PipelineConfig::read_from_file(&path).unwrap();
        let checked = PipelineConfig::load_from_file(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(raw.sample_rate_hz, 2000);
        assert!(raw.validate().is_err());
        assert!(matches!(checked, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = PipelineConfig::read_from_file("/nonexistent/imu_array.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_parse_direct_topology() {
        let config = PipelineConfig::from_toml_str(
            r#"
            topology = { kind = "direct" }
            channels = [
                { label = "chest", address = 0x68 },
                { label = "back", address = 0x69 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(config.topology, Topology::Direct);
        assert_eq!(config.channels[1].address, 0x69);
    }
}
