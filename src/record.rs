//! Acquisition records and their tab-delimited stream framing
//!
//! Two layouts share one writer. [`StreamFormat::Plain`] is a header line and
//! rows. [`StreamFormat::Framed`] matches the serial protocol of the original
//! gait-logging firmware: calibration status lines, `===CALIBRATION_DONE===`,
//! `===START===`, then a header using the dashboard column names
//! (`location`, `channel`, `value_x..z`, `raw_signal`).

use crate::filter::EulerAngles;
use std::io::{self, Write};
use std::sync::Arc;

/// One successful read of one channel in one tick
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRecord {
    /// Milliseconds since the acquisition loop started
    pub timestamp_ms: u64,
    pub channel: usize,
    /// Sensor location label, e.g. "thigh_r"
    pub location: Arc<str>,
    /// Raw accelerometer counts (x, y, z)
    pub accel_raw: [i16; 3],
    /// Orientation in degrees after this sample
    pub orientation: EulerAngles,
    /// Die temperature in °C, only when temperature output is enabled
    pub temperature_c: Option<f64>,
}

/// Stream layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamFormat {
    /// Header line, then one row per record
    #[default]
    Plain,
    /// Marker lines around the header, dashboard column names
    Framed,
}

pub const CALIBRATION_DONE_MARKER: &str = "===CALIBRATION_DONE===";
pub const START_MARKER: &str = "===START===";

const PLAIN_FIELDS: [&str; 9] = [
    "timestamp", "channel", "location", "accel_x", "accel_y", "accel_z", "roll", "pitch", "yaw",
];

const FRAMED_FIELDS: [&str; 10] = [
    "timestamp", "location", "channel", "value_x", "value_y", "value_z", "roll", "pitch", "yaw", "raw_signal",
];

// Dashboard channel kind; only accelerometer rows are produced
const FRAMED_CHANNEL: &str = "acc";

// No raw analog signal exists on this hardware; the column keeps the schema
const FRAMED_RAW_SIGNAL: &str = "0";

/// Writes records as tab-separated lines
pub struct TsvWriter<W: Write> {
    out: W,
    format: StreamFormat,
    include_temperature: bool,
    started: bool,
    records: u64,
}

impl<W: Write> TsvWriter<W> {
    /// Create a plain-format writer and emit the header line
    pub fn new(out: W, include_temperature: bool) -> io::Result<Self> {
        Self::with_format(out, StreamFormat::Plain, include_temperature)
    }

    /// Create a writer for `format`
    ///
    /// Plain output writes its header immediately. Framed output writes
    /// nothing until [`TsvWriter::start`] (or the first record), so
    /// calibration lines can come first.
    pub fn with_format(out: W, format: StreamFormat, include_temperature: bool) -> io::Result<Self> {
        let mut writer = Self {
            out,
            format,
            include_temperature,
            started: false,
            records: 0,
        };
        if format == StreamFormat::Plain {
            writer.start()?;
        }
        Ok(writer)
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Announce calibration of one channel (framed output only)
    pub fn calibrating(&mut self, location: &str, samples: u32) -> io::Result<()> {
        if self.format == StreamFormat::Framed && !self.started {
            writeln!(self.out, "Calibrating {} ({} samples)...", location, samples)?;
        }
        Ok(())
    }

    /// Mark the end of calibration (framed output only)
    pub fn calibration_done(&mut self) -> io::Result<()> {
        if self.format == StreamFormat::Framed && !self.started {
            writeln!(self.out, "{}", CALIBRATION_DONE_MARKER)?;
        }
        Ok(())
    }

    /// Emit the start marker (framed) and the header; later calls do nothing
    pub fn start(&mut self) -> io::Result<()> {
        if self.started {
            return Ok(());
        }

        let mut header = match self.format {
            StreamFormat::Plain => PLAIN_FIELDS.join("\t"),
            StreamFormat::Framed => {
                writeln!(self.out, "{}", START_MARKER)?;
                FRAMED_FIELDS.join("\t")
            }
        };
        if self.include_temperature {
            header.push_str("\ttemperature");
        }
        writeln!(self.out, "{}", header)?;

        self.started = true;
        Ok(())
    }

    pub fn write(&mut self, record: &AcquisitionRecord) -> io::Result<()> {
        self.start()?;

        let [ax, ay, az] = record.accel_raw;
        let EulerAngles { roll, pitch, yaw } = record.orientation;

        match self.format {
            StreamFormat::Plain => write!(
                self.out,
                "{}\t{}\t{}\t{}\t{}\t{}\t{:.2}\t{:.2}\t{:.2}",
                record.timestamp_ms, record.channel, record.location, ax, ay, az, roll, pitch, yaw
            )?,
            StreamFormat::Framed => write!(
                self.out,
                "{}\t{}\t{}\t{}\t{}\t{}\t{:.2}\t{:.2}\t{:.2}\t{}",
                record.timestamp_ms,
                record.location,
                FRAMED_CHANNEL,
                ax,
                ay,
                az,
                roll,
                pitch,
                yaw,
                FRAMED_RAW_SIGNAL
            )?,
        }

        if self.include_temperature {
            match record.temperature_c {
                Some(temp) => write!(self.out, "\t{:.2}", temp)?,
                None => write!(self.out, "\t")?,
            }
        }

        writeln!(self.out)?;
        self.records += 1;
        Ok(())
    }

    /// Records written so far
    pub fn record_count(&self) -> u64 {
        self.records
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(temperature_c: Option<f64>) -> AcquisitionRecord {
        AcquisitionRecord {
            timestamp_ms: 1250,
            channel: 2,
            location: Arc::from("foot_r"),
            accel_raw: [16384, -12, 300],
            orientation: EulerAngles { roll: 1.234, pitch: -0.25, yaw: 179.999 },
            temperature_c,
        }
    }

    #[test]
    fn test_header_then_rows() {
        let mut writer = TsvWriter::new(Vec::new(), false).unwrap();
        writer.write(&record(None)).unwrap();
        writer.write(&record(None)).unwrap();
        assert_eq!(writer.record_count(), 2);

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp\tchannel\tlocation\taccel_x\taccel_y\taccel_z\troll\tpitch\tyaw");
        assert_eq!(lines[1], "1250\t2\tfoot_r\t16384\t-12\t300\t1.23\t-0.25\t180.00");
        assert_eq!(lines[1], lines[2]);
    }

    #[test]
    fn test_temperature_column_opt_in() {
        let mut writer = TsvWriter::new(Vec::new(), true).unwrap();
        writer.write(&record(Some(24.5))).unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].ends_with("\tyaw\ttemperature"));
        assert!(lines[1].ends_with("\t24.50"));
        assert_eq!(lines[0].split('\t').count(), lines[1].split('\t').count());
    }

    #[test]
    fn test_header_only_when_empty() {
        let writer = TsvWriter::new(Vec::new(), false).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_plain_ignores_markers() {
        let mut writer = TsvWriter::new(Vec::new(), false).unwrap();
        writer.calibrating("foot_r", 100).unwrap();
        writer.calibration_done().unwrap();
        writer.start().unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("timestamp\t"));
    }

    #[test]
    fn test_framed_marker_order_and_header() {
        let mut writer = TsvWriter::with_format(Vec::new(), StreamFormat::Framed, false).unwrap();
        writer.calibrating("thigh_r", 200).unwrap();
        writer.calibrating("foot_r", 200).unwrap();
        writer.calibration_done().unwrap();
        writer.start().unwrap();
        writer.write(&record(None)).unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("Calibrating"));
        assert!(lines[1].starts_with("Calibrating"));
        assert_eq!(lines[2], "===CALIBRATION_DONE===");
        assert_eq!(lines[3], "===START===");
        assert_eq!(
            lines[4],
            "timestamp\tlocation\tchannel\tvalue_x\tvalue_y\tvalue_z\troll\tpitch\tyaw\traw_signal"
        );
        assert_eq!(lines[5], "1250\tfoot_r\tacc\t16384\t-12\t300\t1.23\t-0.25\t180.00\t0");
    }

    #[test]
    fn test_framed_rows_match_header_width() {
        let mut writer = TsvWriter::with_format(Vec::new(), StreamFormat::Framed, true).unwrap();
        // First record starts the stream without an explicit start()
        writer.write(&record(Some(30.0))).unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], START_MARKER);
        assert!(lines[1].ends_with("\traw_signal\ttemperature"));
        // The trailing field is never empty, so trimmed lines keep their width
        assert_eq!(lines[1].split('\t').count(), lines[2].trim().split('\t').count());
    }

    #[test]
    fn test_markers_after_start_are_dropped() {
        let mut writer = TsvWriter::with_format(Vec::new(), StreamFormat::Framed, false).unwrap();
        writer.start().unwrap();
        writer.start().unwrap();
        writer.calibrating("late", 1).unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
