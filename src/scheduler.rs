//! Fixed-period acquisition loop
//!
//! One [`Scheduler`] owns the bus, the channel selector, the clock and every
//! channel's state. Each tick walks the channels in ascending order: select,
//! burst read, convert, update that channel's filter, emit a record. A failed
//! read skips only that channel for only that tick.
//!
//! Ticks are free-running against the clock. When a tick overruns its period
//! the next one starts immediately and the schedule is re-anchored there, so
//! missed ticks are dropped rather than queued.

use crate::bus::I2cBus;
use crate::calibration::collect_gyro_bias;
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::error::{ConfigError, InitError};
use crate::filter::OrientationFilter;
use crate::mpu6050::{Mpu6050, PhysicalSample, SensorSettings};
use crate::mux::{ChannelSelector, Selector};
use crate::record::AcquisitionRecord;
use std::sync::Arc;
use std::time::Duration;

/// Control flow for streaming operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    /// Continue streaming
    Continue,
    /// Stop after the current tick
    Break,
}

/// Per-channel state, exclusively owned by the scheduler
#[derive(Debug, Clone)]
pub struct ChannelState {
    id: usize,
    location: Arc<str>,
    sensor: Mpu6050,
    ready: bool,
    init_error: Option<InitError>,
    gyro_bias: [f64; 3],
    filter: OrientationFilter,
}

impl ChannelState {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Passed initialization; never becomes true again once false
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn gyro_bias(&self) -> [f64; 3] {
        self.gyro_bias
    }

    pub fn filter(&self) -> &OrientationFilter {
        &self.filter
    }
}

/// Progress during [`Scheduler::initialize_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitEvent<'a> {
    /// A ready channel is about to be sampled for gyro bias
    Calibrating { channel: usize, location: &'a str, samples: u32 },
    /// Every ready channel has been calibrated
    CalibrationDone,
}

/// Startup outcome for one channel
#[derive(Debug, Clone, PartialEq)]
pub struct InitReport {
    pub channel: usize,
    pub location: Arc<str>,
    pub result: Result<(), InitError>,
}

impl InitReport {
    pub fn ready(&self) -> bool {
        self.result.is_ok()
    }
}

/// Counters over the scheduler's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub ticks: u64,
    pub records: u64,
    /// Ready channels skipped because selection or the burst read failed
    pub failed_reads: u64,
    /// Ticks that started late because the previous one overran
    pub overruns: u64,
}

/// Acquisition loop over all configured channels
pub struct Scheduler<B: I2cBus, S: ChannelSelector, C: Clock> {
    bus: B,
    selector: S,
    clock: C,
    channels: Vec<ChannelState>,
    settings: SensorSettings,
    period: Duration,
    include_temperature: bool,
    calibration_samples: u32,
    initialized: bool,
    loop_start: Option<Duration>,
    next_tick: Option<Duration>,
    stats: RunStats,
}

impl<B: I2cBus, C: Clock> Scheduler<B, Selector, C> {
    /// Build a scheduler whose selector follows the configured topology
    pub fn from_config(config: &PipelineConfig, bus: B, clock: C) -> Result<Self, ConfigError> {
        Self::new(config, bus, config.selector(), clock)
    }
}

impl<B: I2cBus, S: ChannelSelector, C: Clock> Scheduler<B, S, C> {
    /// Validate the configuration and set up channel state
    ///
    /// No bus traffic happens until [`Scheduler::initialize`] or the first tick.
    pub fn new(config: &PipelineConfig, bus: B, selector: S, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;

        if config.channels.len() > selector.capacity() {
            return Err(ConfigError::Validation(format!(
                "{} channels configured but the selector has {}",
                config.channels.len(),
                selector.capacity()
            )));
        }

        let settings = config.sensor_settings();
        let channels = config
            .channels
            .iter()
            .enumerate()
            .map(|(id, channel)| ChannelState {
                id,
                location: Arc::from(channel.label.as_str()),
                sensor: Mpu6050::new(channel.address, settings),
                ready: false,
                init_error: None,
                gyro_bias: [0.0; 3],
                filter: OrientationFilter::new(config.filter_gain, config.sample_rate_hz as f64),
            })
            .collect();

        Ok(Self {
            bus,
            selector,
            clock,
            channels,
            settings,
            period: config.period(),
            include_temperature: config.include_temperature,
            calibration_samples: config.calibration_samples,
            initialized: false,
            loop_start: None,
            next_tick: None,
            stats: RunStats::default(),
        })
    }

    /// Probe, wake and configure every channel once
    ///
    /// Channels that fail stay not-ready for the life of the scheduler and are
    /// never touched again. Calling this again only returns the original
    /// outcome.
    pub fn initialize(&mut self) -> Vec<InitReport> {
        self.initialize_with(|_| {})
    }

    /// [`Scheduler::initialize`], reporting calibration progress to `on_event`
    ///
    /// Events are only produced by the call that actually initializes.
    pub fn initialize_with<F>(&mut self, mut on_event: F) -> Vec<InitReport>
    where
        F: FnMut(InitEvent<'_>),
    {
        if !self.initialized {
            self.initialized = true;

            for index in 0..self.channels.len() {
                let result = self.init_channel(index);
                let channel = &mut self.channels[index];
                match result {
                    Ok(()) => {
                        channel.ready = true;
                        log::info!("Channel {} ({}): ready", channel.id, channel.location);
                    }
                    Err(e) => {
                        log::warn!("Channel {} ({}): not ready: {}", channel.id, channel.location, e);
                        channel.init_error = Some(e);
                    }
                }
            }

            if self.calibration_samples > 0 {
                self.calibrate(&mut on_event);
            }
        }

        self.channels
            .iter()
            .map(|channel| InitReport {
                channel: channel.id,
                location: channel.location.clone(),
                result: match &channel.init_error {
                    Some(e) => Err(e.clone()),
                    None => Ok(()),
                },
            })
            .collect()
    }

    fn init_channel(&mut self, index: usize) -> Result<(), InitError> {
        self.selector.select(&mut self.bus, &mut self.clock, index)?;
        self.channels[index].sensor.init(&mut self.bus, &mut self.clock)
    }

    fn calibrate<F>(&mut self, on_event: &mut F)
    where
        F: FnMut(InitEvent<'_>),
    {
        let interval = self.period;

        for channel in self.channels.iter_mut().filter(|c| c.ready) {
            log::info!(
                "Calibrating channel {} ({}): {} samples, keep the sensor still",
                channel.id,
                channel.location,
                self.calibration_samples
            );
            on_event(InitEvent::Calibrating {
                channel: channel.id,
                location: &channel.location,
                samples: self.calibration_samples,
            });

            if let Err(e) = self.selector.select(&mut self.bus, &mut self.clock, channel.id) {
                log::warn!("Channel {}: calibration skipped: {}", channel.id, e);
                continue;
            }

            let estimator = collect_gyro_bias(
                &channel.sensor,
                &mut self.bus,
                &mut self.clock,
                self.calibration_samples,
                interval,
            );
            channel.gyro_bias = estimator.bias();

            log::info!(
                "Channel {}: gyro bias [{:.1}, {:.1}, {:.1}] LSB from {} samples",
                channel.id,
                channel.gyro_bias[0],
                channel.gyro_bias[1],
                channel.gyro_bias[2],
                estimator.count()
            );
        }

        log::info!("Calibration done");
        on_event(InitEvent::CalibrationDone);
    }

    /// Wait for the next tick, then run one pass over all channels
    ///
    /// Returns `Break` if the callback asked to stop during this pass. The
    /// pass itself always completes; later records of the same tick are
    /// still delivered.
    pub fn tick<F>(&mut self, mut on_record: F) -> StreamControl
    where
        F: FnMut(&AcquisitionRecord) -> StreamControl,
    {
        if !self.initialized {
            self.initialize();
        }

        self.wait_for_tick();
        self.stats.ticks += 1;

        let mut control = StreamControl::Continue;
        let loop_start = self.loop_start.unwrap_or_default();

        for index in 0..self.channels.len() {
            let channel = &mut self.channels[index];
            if !channel.ready {
                continue;
            }

            if let Err(e) = self.selector.select(&mut self.bus, &mut self.clock, index) {
                log::debug!("Channel {}: select failed: {}", index, e);
                self.stats.failed_reads += 1;
                continue;
            }

            let raw = match channel.sensor.read_raw(&mut self.bus) {
                Ok(raw) => raw,
                Err(e) => {
                    log::debug!("Channel {}: read failed: {}", index, e);
                    self.stats.failed_reads += 1;
                    continue;
                }
            };

            let physical =
                PhysicalSample::from_raw(&raw, &self.settings, channel.gyro_bias, self.include_temperature);
            channel.filter.update(physical.gyro, physical.accel);

            let record = AcquisitionRecord {
                timestamp_ms: self.clock.now().saturating_sub(loop_start).as_millis() as u64,
                channel: index,
                location: channel.location.clone(),
                accel_raw: raw.accel(),
                orientation: channel.filter.euler(),
                temperature_c: physical.temperature_c,
            };
            self.stats.records += 1;

            if on_record(&record) == StreamControl::Break {
                control = StreamControl::Break;
            }
        }

        control
    }

    /// Sleep until the next deadline, or start now if already late
    fn wait_for_tick(&mut self) {
        let now = self.clock.now();

        let tick_start = match self.next_tick {
            None => {
                self.loop_start = Some(now);
                now
            }
            Some(deadline) if deadline > now => {
                self.clock.sleep(deadline - now);
                deadline
            }
            Some(deadline) => {
                log::trace!("Tick overran by {:?}", now - deadline);
                self.stats.overruns += 1;
                now
            }
        };

        self.next_tick = Some(tick_start + self.period);
    }

    /// Run ticks while `keep_running` returns true and the callback does not break
    ///
    /// `keep_running` is checked before every tick, so the loop can stop even
    /// when no channel produces records.
    pub fn stream_while<P, F>(&mut self, mut keep_running: P, mut on_record: F) -> RunStats
    where
        P: FnMut(&RunStats) -> bool,
        F: FnMut(&AcquisitionRecord) -> StreamControl,
    {
        while keep_running(&self.stats) {
            if self.tick(&mut on_record) == StreamControl::Break {
                break;
            }
        }
        self.stats
    }

    /// Run until the callback returns `Break`
    pub fn stream<F>(&mut self, on_record: F) -> RunStats
    where
        F: FnMut(&AcquisitionRecord) -> StreamControl,
    {
        self.stream_while(|_| true, on_record)
    }

    /// Run exactly `ticks` more ticks unless the callback breaks first
    pub fn run_ticks<F>(&mut self, ticks: u64, on_record: F) -> RunStats
    where
        F: FnMut(&AcquisitionRecord) -> StreamControl,
    {
        let target = self.stats.ticks + ticks;
        self.stream_while(|stats| stats.ticks < target, on_record)
    }

    pub fn channels(&self) -> &[ChannelState] {
        &self.channels
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}
