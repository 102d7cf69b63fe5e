//! IMU array logger
//!
//! Reads every configured channel at a fixed rate and writes one tab-separated
//! line per successful read to stdout or a file. Diagnostics go to stderr.
//!
//! Usage:
//!   imu-array-logger --rate 100 --output-dir recordings
//!   imu-array-logger --simulate --labels hip,knee,ankle --duration 10

use clap::Parser;
use imu_array::mpu6050::RawSample;
use imu_array::sim::{SimBus, SimSensor};
use imu_array::{
    Clock, I2cBus, InitEvent, InitReport, PipelineConfig, Scheduler, Selector, StreamControl, StreamFormat, SystemClock,
    Topology, TsvWriter,
};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "imu-array-logger")]
#[command(about = "Stream orientation records from an array of MPU6050 sensors", long_about = None)]
struct Args {
    /// TOML configuration file (defaults are used if omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Loop rate in Hz (1-1000)
    #[arg(short, long)]
    rate: Option<u32>,

    /// Orientation filter accelerometer gain
    #[arg(short, long)]
    gain: Option<f64>,

    /// Comma-separated channel labels, in multiplexer order
    #[arg(short, long, value_delimiter = ',')]
    labels: Option<Vec<String>>,

    /// Append a die temperature column
    #[arg(long)]
    temperature: bool,

    /// Stationary gyro samples per channel before streaming
    #[arg(long, value_name = "SAMPLES")]
    calibrate: Option<u32>,

    /// Duration in seconds (runs until Ctrl+C if omitted)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Output file (stdout if neither this nor --output-dir is given)
    #[arg(short, long, conflicts_with = "output_dir")]
    output: Option<PathBuf>,

    /// Directory for a timestamped output file
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Frame the stream with calibration/start markers and dashboard column names
    #[arg(long)]
    framed: bool,

    /// Use simulated sensors instead of the FT232H
    #[arg(long)]
    simulate: bool,

    /// FT232H adapter channel
    #[arg(long, default_value = "0")]
    channel_index: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    log::info!(
        "{} channels at {} Hz, filter gain {}",
        config.channels.len(),
        config.sample_rate_hz,
        config.filter_gain
    );
    log::debug!(
        "Sensor output rate {:.1} Hz",
        config.sensor_settings().effective_sample_rate_hz()
    );

    if args.simulate {
        log::info!("Using simulated sensors");
        run(&args, &config, simulated_bus(&config))
    } else {
        open_hardware(&args, &config)
    }
}

#[cfg(feature = "ftdi")]
fn open_hardware(args: &Args, config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("Opening FT232H channel {}", args.channel_index);
    let bus = imu_array::Ft232hBus::open(args.channel_index).map_err(|e| {
        log::error!("FT232H not available: {}", e);
        log::error!("Check the USB connection, the FTDI driver and that no other program holds the device");
        e
    })?;
    run(args, config, bus)
}

#[cfg(not(feature = "ftdi"))]
fn open_hardware(_args: &Args, _config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    Err("built without the `ftdi` feature; rebuild with --features ftdi or pass --simulate".into())
}

fn load_config(args: &Args) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            // Validated once below, after the overrides
            PipelineConfig::read_from_file(path)?
        }
        None => PipelineConfig::default(),
    };

    if let Some(labels) = &args.labels {
        config = config.with_labels(labels.iter().map(|label| label.trim().to_string()));
    }
    if let Some(rate) = args.rate {
        config.sample_rate_hz = rate;
    }
    if let Some(gain) = args.gain {
        config.filter_gain = gain;
    }
    if let Some(samples) = args.calibrate {
        config.calibration_samples = samples;
    }
    if args.temperature {
        config.include_temperature = true;
    }

    config.validate()?;
    Ok(config)
}

/// Slow 30° roll oscillation with matching gyro rate, 5 s period, at `t` seconds
fn tilting(t: f64) -> RawSample {
    const AMPLITUDE_DEG: f64 = 30.0;
    const PERIOD_S: f64 = 5.0;

    let omega = 2.0 * std::f64::consts::PI / PERIOD_S;
    let roll = AMPLITUDE_DEG.to_radians() * (omega * t).sin();
    let roll_rate_dps = AMPLITUDE_DEG * omega * (omega * t).cos();

    RawSample {
        accel_x: 0,
        accel_y: (16384.0 * roll.sin()) as i16,
        accel_z: (16384.0 * roll.cos()) as i16,
        temperature: -1700, // ~31.5 °C
        gyro_x: (131.0 * roll_rate_dps) as i16,
        gyro_y: 0,
        gyro_z: 0,
    }
}

/// One tilting sensor per channel; burst `n` is the sample at `n / rate` seconds
fn simulated_bus(config: &PipelineConfig) -> SimBus {
    let rate = config.sample_rate_hz as f64;
    let sensors = config
        .channels
        .iter()
        .map(move |channel| SimSensor::new(channel.address).with_generator(move |n| tilting(n as f64 / rate)));

    match config.topology {
        Topology::Multiplexed { address } => SimBus::multiplexed(address, sensors.map(Some).collect()),
        Topology::Direct => SimBus::direct(sensors.collect()),
    }
}

fn open_output(args: &Args) -> io::Result<Box<dyn Write>> {
    if let Some(path) = &args.output {
        log::info!("Writing to {}", path.display());
        return Ok(Box::new(BufWriter::new(File::create(path)?)));
    }

    if let Some(dir) = &args.output_dir {
        fs::create_dir_all(dir)?;
        let name = format!("imu_data_{}.tsv", chrono::Local::now().format("%Y%m%d_%H%M%S"));
        let path = dir.join(name);
        log::info!("Writing to {}", path.display());
        return Ok(Box::new(BufWriter::new(File::create(path)?)));
    }

    Ok(Box::new(io::stdout().lock()))
}

/// Initialize every channel, framing calibration progress into the stream,
/// then write the start marker and header
fn start_stream<B: I2cBus, C: Clock, W: Write>(
    scheduler: &mut Scheduler<B, Selector, C>,
    writer: &mut TsvWriter<W>,
) -> io::Result<Vec<InitReport>> {
    let mut marker_error = None;

    let reports = scheduler.initialize_with(|event| {
        let result = match event {
            InitEvent::Calibrating { location, samples, .. } => writer.calibrating(location, samples),
            InitEvent::CalibrationDone => writer.calibration_done(),
        };
        if let Err(e) = result {
            marker_error.get_or_insert(e);
        }
    });

    if let Some(e) = marker_error {
        return Err(e);
    }
    writer.start()?;
    Ok(reports)
}

fn run<B: I2cBus>(args: &Args, config: &PipelineConfig, bus: B) -> Result<(), Box<dyn std::error::Error>> {
    let mut scheduler = Scheduler::from_config(config, bus, SystemClock::new())?;

    let format = if args.framed { StreamFormat::Framed } else { StreamFormat::Plain };
    let mut writer = TsvWriter::with_format(open_output(args)?, format, config.include_temperature)?;

    let reports = start_stream(&mut scheduler, &mut writer)?;
    let ready = reports.iter().filter(|r| r.ready()).count();
    log::info!("{} of {} channels ready", ready, reports.len());
    if ready == 0 {
        log::warn!("No channel passed initialization; only the header will be written");
    }

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, stopping acquisition");
        r.store(false, Ordering::SeqCst);
    })?;

    let started = Instant::now();
    let limit = args.duration.map(Duration::from_secs);
    let mut sink_error = None;

    let stats = scheduler.stream_while(
        |_| running.load(Ordering::SeqCst) && limit.map_or(true, |limit| started.elapsed() < limit),
        |record| match writer.write(record) {
            Ok(()) => StreamControl::Continue,
            Err(e) => {
                sink_error = Some(e);
                StreamControl::Break
            }
        },
    );

    match sink_error {
        // Downstream consumer went away; that ends the run normally
        Some(e) if e.kind() == io::ErrorKind::BrokenPipe => log::info!("Output closed"),
        Some(e) => {
            log::error!("Write failed: {}", e);
            return Err(e.into());
        }
        None => writer.flush()?,
    }

    let elapsed = started.elapsed().as_secs_f64();
    log::info!(
        "Acquisition complete: {} ticks, {} records, {} failed reads, {} overruns in {:.2} s",
        stats.ticks,
        stats.records,
        stats.failed_reads,
        stats.overruns,
        elapsed
    );

    Ok(())
}
