//! Multi-channel MPU6050 acquisition over a single I2C bus
//!
//! Identical IMUs sit behind a TCA9548A multiplexer (or at distinct
//! addresses on one bus). A fixed-period scheduler selects each channel in
//! turn, burst-reads the sensor, runs that channel's orientation filter and
//! emits one record per successful read. The hardware bus is an FT232H via
//! libMPSSE behind the `ftdi` feature; [`sim::SimBus`] stands in for it in
//! tests and dry runs.
//!
//! # Quick Start
//!
//! ## Streaming Records
//! ```no_run
//! use imu_array::{PipelineConfig, Scheduler, StreamControl, SystemClock};
//! use imu_array::mpu6050::RawSample;
//! use imu_array::sim::SimBus;
//!
//! let config = PipelineConfig::default();
//! let level = RawSample { accel_z: 16384, ..Default::default() };
//! let bus = SimBus::array(0x70, config.channels.len(), level);
//!
//! let mut scheduler = Scheduler::from_config(&config, bus, SystemClock::new())?;
//! for report in scheduler.initialize() {
//!     println!("{} ready: {}", report.location, report.ready());
//! }
//!
//! scheduler.stream(|record| {
//!     println!("{} {} roll={:.1}", record.timestamp_ms, record.location, record.orientation.roll);
//!     if record.timestamp_ms > 5_000 {
//!         StreamControl::Break
//!     } else {
//!         StreamControl::Continue
//!     }
//! });
//! # Ok::<(), imu_array::ConfigError>(())
//! ```
//!
//! ## Writing the Tab-Delimited Stream
//! ```no_run
//! use imu_array::{PipelineConfig, Scheduler, StreamControl, SystemClock, TsvWriter};
//! use imu_array::mpu6050::RawSample;
//! use imu_array::sim::SimBus;
//!
//! let config = PipelineConfig::default().with_labels(["wrist_l", "wrist_r"]);
//! let bus = SimBus::array(0x70, 2, RawSample::default());
//! let mut scheduler = Scheduler::from_config(&config, bus, SystemClock::new())?;
//!
//! let mut writer = TsvWriter::new(std::io::stdout().lock(), config.include_temperature)?;
//! scheduler.run_ticks(1000, |record| match writer.write(record) {
//!     Ok(()) => StreamControl::Continue,
//!     Err(_) => StreamControl::Break,
//! });
//! writer.flush()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bus;
pub mod calibration;
pub mod clock;
pub mod config;
pub mod error;
#[cfg(feature = "ftdi")]
mod ffi;
pub mod filter;
pub mod mpu6050;
pub mod mux;
pub mod record;
pub mod scheduler;
pub mod sim;

// Re-export public API
pub use bus::I2cBus;
#[cfg(feature = "ftdi")]
pub use bus::Ft232hBus;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChannelConfig, PipelineConfig, Topology};
pub use error::{BusError, ConfigError, InitError, Result};
pub use filter::{EulerAngles, OrientationFilter, Quaternion};
pub use mpu6050::{Mpu6050, RawSample, SensorSettings};
pub use mux::{ChannelSelector, DirectBus, Selector, Tca9548a};
pub use record::{AcquisitionRecord, StreamFormat, TsvWriter};
pub use scheduler::{InitEvent, InitReport, RunStats, Scheduler, StreamControl};
