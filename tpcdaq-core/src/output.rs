//! Output format writers for decoded digits.
//!
//! Supports a human-readable CSV dump and a compact binary format. Both
//! writers stream one event at a time.

use crate::event::{DigitContainer, Event};
use crate::types::{ChannelDigit, ChannelSystem, EventContext, INVALID_CLOCK};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Magic bytes opening a binary digit file.
pub const BINARY_MAGIC: &[u8; 8] = b"TPCDIGI\0";
/// Version of the binary layout.
pub const BINARY_VERSION: u32 = 1;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("{field} of {value} does not fit the binary layout")]
    Overflow { field: &'static str, value: usize },
}

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Csv,
    Binary,
}

impl FromStr for OutputFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "bin" | "binary" => Ok(Self::Binary),
            other => Err(OutputError::InvalidFormat(format!(
                "Unknown output format: {}. Use csv or bin",
                other
            ))),
        }
    }
}

impl OutputFormat {
    /// Picks the format from a file extension, defaulting to CSV.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, OutputError> {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.parse(),
            None => Ok(Self::Csv),
        }
    }
}

/// Clock fields as written to the output; an unset clock is written as
/// the invalid sentinel in both fields.
fn clock_fields(context: &EventContext) -> (u32, u32) {
    match context.timestamp {
        Some(t) => (t.seconds, t.nanoseconds),
        None => (INVALID_CLOCK, INVALID_CLOCK),
    }
}

/// Containers that are written out; transient containers are skipped.
fn persisted(event: &Event) -> impl Iterator<Item = (&str, &DigitContainer)> {
    event.containers().filter(|(_, container)| !container.transient)
}

fn narrow<T: TryFrom<usize>>(field: &'static str, value: usize) -> Result<T, OutputError> {
    T::try_from(value).map_err(|_| OutputError::Overflow { field, value })
}

/// CSV writer, one row per digit.
pub struct DigitCsvWriter<W: Write> {
    writer: BufWriter<W>,
    rows: u64,
}

impl<W: Write> DigitCsvWriter<W> {
    /// Creates a new CSV writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            rows: 0,
        }
    }

    /// Writes the column header.
    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(
            self.writer,
            "run,subrun,event,seconds,nanoseconds,container,system,crate,card,channel,start,count,samples"
        )?;
        Ok(())
    }

    /// Writes every digit of every persisted container of an event.
    pub fn write_event(&mut self, event: &Event) -> Result<(), OutputError> {
        for (path, container) in persisted(event) {
            for digit in &container.digits {
                self.write_digit(&event.context, path, digit)?;
            }
        }
        Ok(())
    }

    #[inline]
    fn write_digit(
        &mut self,
        context: &EventContext,
        path: &str,
        digit: &ChannelDigit,
    ) -> Result<(), OutputError> {
        let (seconds, nanoseconds) = clock_fields(context);
        write!(
            self.writer,
            "{},{},{},{},{},{},{},{},{},{},{},{},",
            context.run,
            context.subrun,
            context.event,
            seconds,
            nanoseconds,
            path,
            digit.id.system.as_str(),
            digit.id.crate_number,
            digit.id.card,
            digit.id.channel,
            digit.start_sample,
            digit.samples.len()
        )?;
        for (i, sample) in digit.samples.iter().enumerate() {
            if i > 0 {
                self.writer.write_all(b" ")?;
            }
            write!(self.writer, "{}", sample)?;
        }
        self.writer.write_all(b"\n")?;
        self.rows += 1;
        Ok(())
    }

    /// Number of digit rows written.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Binary digit writer.
///
/// After the 8-byte magic and a `u32` version, each digit is written as a
/// little-endian record:
/// - run, subrun, event: i32
/// - seconds, nanoseconds: u32 (`0xFFFFFFFF` when unset)
/// - container path: u16 length + UTF-8 bytes
/// - system: u8 (0 = tpc, 1 = pds, 2 = mc)
/// - crate, card, channel, start sample, sample count: u32
/// - samples: u16 each
pub struct DigitBinaryWriter<W: Write> {
    writer: BufWriter<W>,
    records: u64,
}

impl<W: Write> DigitBinaryWriter<W> {
    /// Creates a new binary writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            records: 0,
        }
    }

    /// Writes the magic number and version.
    pub fn write_header(&mut self) -> Result<(), OutputError> {
        self.writer.write_all(BINARY_MAGIC)?;
        self.writer.write_all(&BINARY_VERSION.to_le_bytes())?;
        Ok(())
    }

    /// Writes every digit of every persisted container of an event.
    ///
    /// Fails without writing a partial record if a length or start sample
    /// does not fit its field.
    pub fn write_event(&mut self, event: &Event) -> Result<(), OutputError> {
        let context = &event.context;
        let (seconds, nanoseconds) = clock_fields(context);
        for (path, container) in persisted(event) {
            let path_len: u16 = narrow("container path length", path.len())?;
            for digit in &container.digits {
                let start: u32 = narrow("start sample", digit.start_sample)?;
                let count: u32 = narrow("sample count", digit.samples.len())?;
                self.writer.write_all(&context.run.to_le_bytes())?;
                self.writer.write_all(&context.subrun.to_le_bytes())?;
                self.writer.write_all(&context.event.to_le_bytes())?;
                self.writer.write_all(&seconds.to_le_bytes())?;
                self.writer.write_all(&nanoseconds.to_le_bytes())?;
                self.writer.write_all(&path_len.to_le_bytes())?;
                self.writer.write_all(path.as_bytes())?;
                self.writer.write_all(&[system_code(digit.id.system)])?;
                for value in [
                    digit.id.crate_number,
                    digit.id.card,
                    digit.id.channel,
                    start,
                    count,
                ] {
                    self.writer.write_all(&value.to_le_bytes())?;
                }
                for sample in &digit.samples {
                    self.writer.write_all(&sample.to_le_bytes())?;
                }
                self.records += 1;
            }
        }
        Ok(())
    }

    /// Number of digit records written.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

fn system_code(system: ChannelSystem) -> u8 {
    match system {
        ChannelSystem::Tpc => 0,
        ChannelSystem::Pds => 1,
        ChannelSystem::Mc => 2,
    }
}

/// Writes the digits of a set of events to a CSV file.
pub fn write_csv<P: AsRef<Path>>(path: P, events: &[Event]) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = DigitCsvWriter::new(file);
    writer.write_header()?;
    for event in events {
        writer.write_event(event)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the digits of a set of events to a binary file.
pub fn write_binary<P: AsRef<Path>>(path: P, events: &[Event]) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = DigitBinaryWriter::new(file);
    writer.write_header()?;
    for event in events {
        writer.write_event(event)?;
    }
    writer.flush()?;
    Ok(())
}
