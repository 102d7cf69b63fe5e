//! Startup gyro bias estimation
//!
//! The sensor must be stationary while this runs. The mean raw gyro reading
//! becomes the channel's bias and is subtracted before unit conversion.

use crate::bus::I2cBus;
use crate::clock::Clock;
use crate::mpu6050::{Mpu6050, RawSample};
use std::time::Duration;

/// Running mean of raw gyro readings
#[derive(Debug, Clone, Default)]
pub struct GyroBiasEstimator {
    sum: [i64; 3],
    count: u32,
}

impl GyroBiasEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sample: &RawSample) {
        for (sum, raw) in self.sum.iter_mut().zip(sample.gyro()) {
            *sum += raw as i64;
        }
        self.count += 1;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Mean gyro reading in raw LSB; zero when nothing was collected
    pub fn bias(&self) -> [f64; 3] {
        if self.count == 0 {
            return [0.0; 3];
        }
        self.sum.map(|sum| sum as f64 / self.count as f64)
    }
}

/// Take `samples` burst reads `interval` apart and average the gyro axes
///
/// The sensor's channel must already be selected. Failed reads are skipped,
/// not retried, so the estimate may rest on fewer than `samples` readings.
pub fn collect_gyro_bias<B: I2cBus, C: Clock>(
    sensor: &Mpu6050,
    bus: &mut B,
    clock: &mut C,
    samples: u32,
    interval: Duration,
) -> GyroBiasEstimator {
    let mut estimator = GyroBiasEstimator::new();

    for i in 0..samples {
        match sensor.read_raw(bus) {
            Ok(raw) => estimator.add(&raw),
            Err(e) => log::debug!("Calibration read {} failed: {}", i, e),
        }
        clock.sleep(interval);
    }

    estimator
}
