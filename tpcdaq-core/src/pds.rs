//! Photon detector (PDS) event source.
//!
//! The PDS DAQ stores one row per trigger in a column table. Reading the
//! table itself is left to an implementation of [`PdsTable`]; this module
//! turns rows into events with the waveforms under `digits/pmt`.

use crate::clock;
use crate::error::{DecodeError, Result};
use crate::event::{Event, EventSource, PMT_DIGITS};
use crate::types::{ChannelDigit, ChannelId, ChannelSystem, EventContext, Partition, Timestamp};
use std::collections::VecDeque;
use tracing::{debug, warn};

pub const MAX_DIGITIZERS: usize = 3;
pub const MAX_CHANNELS: usize = 8;
pub const MAX_SAMPLES: usize = 1024;
/// Largest waveform block a row may carry.
pub const MAX_DATA: usize = MAX_DIGITIZERS * MAX_CHANNELS * MAX_SAMPLES;

/// Name of the integer datum carrying the GPS clock.
pub const GPS_TIME: &str = "gpsTime";

/// GPS years count from 1996.
const GPS_BASE_YEAR: i64 = 1996;

/// One row of the PDS event table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdsRow {
    pub event_number: u32,
    pub computer_sec_into_epoch: i32,
    pub computer_ns_into_sec: i64,
    pub gps_ns_into_sec: u32,
    pub gps_sec_into_day: u32,
    pub gps_days_into_year: u16,
    /// Years since 1996; zero when the receiver had no lock
    pub gps_year: u16,
    pub gps_ctrl_flag: u16,
    pub digitizer_size: Vec<u32>,
    pub digitizer_ch_mask: Vec<u32>,
    pub digitizer_ev_num: Vec<u32>,
    pub digitizer_time: Vec<u32>,
    pub n_digitizers: u32,
    pub n_channels: u32,
    pub n_samples: u32,
    /// Samples laid out digitizer-major, then channel, then sample
    pub waveforms: Vec<u16>,
}

impl PdsRow {
    /// Computer clock as a time stamp. Negative fields are clamped to zero.
    pub fn timestamp(&self) -> Timestamp {
        let seconds = u32::try_from(self.computer_sec_into_epoch).unwrap_or_else(|_| {
            warn!(
                event = self.event_number,
                seconds = self.computer_sec_into_epoch,
                "negative PDS computer clock"
            );
            0
        });
        let nanoseconds = u32::try_from(self.computer_ns_into_sec.clamp(0, 999_999_999)).unwrap_or(0);
        Timestamp::new(seconds, nanoseconds)
    }

    /// The GPS clock as `[unix seconds, nanoseconds, control flag]`, if the
    /// receiver reported a year.
    pub fn gps_time(&self) -> Option<[i64; 3]> {
        if self.gps_year == 0 {
            return None;
        }
        let year_start = clock::utc_seconds(GPS_BASE_YEAR + i64::from(self.gps_year), 1, 1, 0, 0, 0);
        let seconds = year_start
            + 86_400 * i64::from(self.gps_days_into_year)
            + i64::from(self.gps_sec_into_day);
        Some([
            seconds,
            i64::from(self.gps_ns_into_sec),
            i64::from(self.gps_ctrl_flag),
        ])
    }

    /// Splits the waveform block into one digit per digitizer channel.
    pub fn digits(&self) -> Result<Vec<ChannelDigit>> {
        if self.waveforms.len() > MAX_DATA {
            return Err(DecodeError::MalformedHeader(format!(
                "PDS event {} carries {} samples, more than {}",
                self.event_number,
                self.waveforms.len(),
                MAX_DATA
            )));
        }
        let digitizers = self.n_digitizers as usize;
        let channels = self.n_channels as usize;
        let samples = self.n_samples as usize;
        let needed = digitizers
            .checked_mul(channels)
            .and_then(|n| n.checked_mul(samples))
            .filter(|n| *n <= self.waveforms.len())
            .ok_or_else(|| {
                DecodeError::MalformedHeader(format!(
                    "PDS event {} declares {}x{}x{} samples but carries {}",
                    self.event_number,
                    digitizers,
                    channels,
                    samples,
                    self.waveforms.len()
                ))
            })?;

        let block = &self.waveforms[..needed];

        let mut digits = Vec::with_capacity(digitizers * channels);
        for digitizer in 0..digitizers {
            for channel in 0..channels {
                let start = (digitizer * channels + channel) * samples;
                let id = ChannelId::new(ChannelSystem::Pds, 0, digitizer as u32, channel as u32);
                digits.push(ChannelDigit::new(id, 0, block[start..start + samples].to_vec()));
            }
        }
        Ok(digits)
    }

    /// Converts the row into an event.
    pub fn to_event(&self) -> Result<Event> {
        let mut context = EventContext::new(0, self.event_number as i32);
        context.partition = Partition::MiniCaptain;
        context.timestamp = Some(self.timestamp());

        let mut event = Event::new(context);
        if let Some(gps) = self.gps_time() {
            event.integers.insert(GPS_TIME.to_string(), gps.to_vec());
        }
        event.container_or_insert(PMT_DIGITS).digits = self.digits()?;
        Ok(event)
    }
}

/// A forward cursor over the rows of a PDS event table.
pub trait PdsTable {
    /// Returns the next row, or `Ok(None)` past the last one.
    fn next_row(&mut self) -> Result<Option<PdsRow>>;
}

/// A PDS table held in memory.
#[derive(Debug, Default)]
pub struct MemoryTable {
    rows: VecDeque<PdsRow>,
}

impl MemoryTable {
    pub fn new<I: IntoIterator<Item = PdsRow>>(rows: I) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }
}

impl PdsTable for MemoryTable {
    fn next_row(&mut self) -> Result<Option<PdsRow>> {
        Ok(self.rows.pop_front())
    }
}

/// Event source over a PDS table, starting at the first row.
pub struct PdsReader<T: PdsTable> {
    table: T,
    events_read: usize,
}

impl<T: PdsTable> PdsReader<T> {
    pub fn new(table: T) -> Self {
        Self {
            table,
            events_read: 0,
        }
    }
}

impl<T: PdsTable> EventSource for PdsReader<T> {
    fn next_event(&mut self) -> Result<Option<Event>> {
        let row = match self.table.next_row()? {
            Some(row) => row,
            None => return Ok(None),
        };
        let event = row.to_event()?;
        self.events_read += 1;
        debug!(event = %event.context, channels = event.digit_count(), "decoded pds event");
        Ok(Some(event))
    }

    fn events_read(&self) -> usize {
        self.events_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(event_number: u32) -> PdsRow {
        PdsRow {
            event_number,
            computer_sec_into_epoch: 1_400_000_000,
            computer_ns_into_sec: 250,
            n_digitizers: 2,
            n_channels: 3,
            n_samples: 4,
            waveforms: (0..24).collect(),
            ..PdsRow::default()
        }
    }

    #[test]
    fn test_row_to_event() {
        let event = row(42).to_event().unwrap();
        assert_eq!(event.context.run, 0);
        assert_eq!(event.context.event, 42);
        assert_eq!(event.context.partition, Partition::MiniCaptain);
        assert_eq!(event.context.timestamp, Some(Timestamp::new(1_400_000_000, 250)));
        assert!(event.integers.get(GPS_TIME).is_none());

        let pmt = event.container(PMT_DIGITS).unwrap();
        assert_eq!(pmt.len(), 6);
        assert_eq!(pmt.digits[0].id, ChannelId::new(ChannelSystem::Pds, 0, 0, 0));
        assert_eq!(pmt.digits[0].samples, vec![0, 1, 2, 3]);
        assert_eq!(pmt.digits[4].id, ChannelId::new(ChannelSystem::Pds, 0, 1, 1));
        assert_eq!(pmt.digits[4].samples, vec![16, 17, 18, 19]);
    }

    #[test]
    fn test_gps_time() {
        let mut pds = row(1);
        pds.gps_year = 18; // 2014
        pds.gps_days_into_year = 165;
        pds.gps_sec_into_day = 45_005;
        pds.gps_ns_into_sec = 123;
        pds.gps_ctrl_flag = 3;

        let event = pds.to_event().unwrap();
        assert_eq!(
            event.integers.get(GPS_TIME).unwrap(),
            &vec![1_402_835_405, 123, 3]
        );
    }

    #[test]
    fn test_short_waveform_block() {
        let mut pds = row(1);
        pds.waveforms.truncate(23);
        assert!(matches!(pds.to_event(), Err(DecodeError::MalformedHeader(_))));
    }

    #[test]
    fn test_oversized_waveform_block() {
        let mut pds = row(1);
        pds.waveforms = vec![0; MAX_DATA + 1];
        assert!(matches!(pds.digits(), Err(DecodeError::MalformedHeader(_))));
    }

    #[test]
    fn test_negative_clock_clamped() {
        let mut pds = row(1);
        pds.computer_sec_into_epoch = -5;
        pds.computer_ns_into_sec = -1;
        assert_eq!(pds.timestamp(), Timestamp::new(0, 0));
    }

    #[test]
    fn test_reader_starts_at_first_row() {
        let mut reader = PdsReader::new(MemoryTable::new(vec![row(1), row(2)]));
        assert_eq!(reader.next_event().unwrap().unwrap().context.event, 1);
        assert_eq!(reader.next_event().unwrap().unwrap().context.event, 2);
        assert!(reader.next_event().unwrap().is_none());
        assert_eq!(reader.events_read(), 2);
    }
}
