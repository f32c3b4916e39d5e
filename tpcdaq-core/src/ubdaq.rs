//! Event source for UBDAQ (crate/card/channel) files.

use crate::config::UbdaqOptions;
use crate::error::{DecodeError, Result};
use crate::event::{Event, EventSource, DRIFT_DIGITS};
use crate::reader::{Compression, WordReader};
use crate::record::{EventRecord, Expand, Granularity};
use crate::types::{EventContext, Partition};
use std::io::BufRead;
use std::path::Path;
use tracing::{debug, error, info};

/// File name fragment that marks miniCAPTAIN data.
const MINI_CAPTAIN_TAG: &str = "mCAPTAIN";

/// Picks the detector partition from a file name.
pub fn partition_from_path<P: AsRef<Path>>(path: P) -> Partition {
    let name = path
        .as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.contains(MINI_CAPTAIN_TAG) {
        Partition::MiniCaptain
    } else {
        Partition::Captain
    }
}

/// Reads UBDAQ event records and converts them to events.
///
/// Every record is expanded down to channel granularity. Digits are stored
/// under `digits/drift`.
pub struct UbdaqReader<R: BufRead> {
    reader: WordReader<R>,
    options: UbdaqOptions,
    partition: Partition,
    events_read: usize,
}

impl UbdaqReader<Box<dyn BufRead>> {
    /// Opens a file. Names ending in `.gz` are read through gzip.
    pub fn open<P: AsRef<Path>>(path: P, options: UbdaqOptions) -> Result<Self> {
        let path = path.as_ref();
        let compression = Compression::from_path(path);
        let partition = partition_from_path(path);
        info!(path = %path.display(), ?compression, ?partition, "opened ubdaq file");
        Ok(Self::new(WordReader::open(path, compression)?, options).with_partition(partition))
    }
}

impl<R: BufRead> UbdaqReader<R> {
    pub fn new(reader: WordReader<R>, options: UbdaqOptions) -> Self {
        Self {
            reader,
            options,
            partition: Partition::Captain,
            events_read: 0,
        }
    }

    pub fn with_partition(mut self, partition: Partition) -> Self {
        self.partition = partition;
        self
    }

    #[inline]
    pub fn options(&self) -> &UbdaqOptions {
        &self.options
    }

    /// Reads and fully expands the next record without converting it.
    pub fn next_record(&mut self) -> Result<Option<EventRecord>> {
        let mut record = match EventRecord::read_from(&mut self.reader)? {
            Some(record) => record,
            None => return Ok(None),
        };
        record.expand_with(Granularity::Channel, &self.options.config)?;
        Ok(Some(record))
    }

    fn convert(&self, record: &EventRecord, index: usize) -> Result<Event> {
        let header = record.global_header();
        let mut context = EventContext::new(header.run as i32, header.event as i32);
        context.subrun = header.subrun as i32;
        context.partition = self.partition;
        context.timestamp = record.timestamp();
        if context.timestamp.is_none() {
            let err = DecodeError::InvalidTimestamp {
                run: context.run,
                event: context.event,
            };
            error!("{}", err);
        }

        let mut event = Event::new(context);
        let drift = event.container_or_insert(DRIFT_DIGITS);
        drift.digits = record.digits(&self.options)?;
        drift.transient = self.options.is_transient(index);
        debug!(
            event = %event.context,
            channels = event.digit_count(),
            "decoded ubdaq event"
        );
        Ok(event)
    }
}

impl<R: BufRead> EventSource for UbdaqReader<R> {
    fn next_event(&mut self) -> Result<Option<Event>> {
        let record = match self.next_record()? {
            Some(record) => record,
            None => return Ok(None),
        };
        let event = self.convert(&record, self.events_read)?;
        self.events_read += 1;
        Ok(Some(event))
    }

    fn events_read(&self) -> usize {
        self.events_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::DAQ_EPOCH_UNIX_SECONDS;
    use crate::encode::{CardBuilder, CrateBuilder, RecordBuilder};
    use crate::types::{ChannelId, ChannelSystem, Timestamp, INVALID_CLOCK};
    use std::io::Cursor;

    fn source(records: &[RecordBuilder], options: UbdaqOptions) -> UbdaqReader<Cursor<Vec<u8>>> {
        let bytes: Vec<u8> = records.iter().flat_map(|r| r.encode()).collect();
        UbdaqReader::new(WordReader::new(Cursor::new(bytes)), options)
    }

    fn record(event: u32) -> RecordBuilder {
        RecordBuilder::new(7, event)
            .seconds(10)
            .sub_second(1, 2, 3)
            .crate_block(CrateBuilder::new(2).card(CardBuilder::new(5).channel(9, vec![1, 2, 3])))
    }

    #[test]
    fn test_partition_from_path() {
        assert_eq!(partition_from_path("/data/run_mCAPTAIN_01.ubdaq"), Partition::MiniCaptain);
        assert_eq!(partition_from_path("/data/mCAPTAIN/run_01.ubdaq"), Partition::Captain);
        assert_eq!(partition_from_path("run_01.ubdaq.gz"), Partition::Captain);
    }

    #[test]
    fn test_events_in_order() {
        let mut reader = source(&[record(1), record(2)], UbdaqOptions::default());

        let event = reader.next_event().unwrap().unwrap();
        assert_eq!(event.context.run, 7);
        assert_eq!(event.context.event, 1);
        assert_eq!(event.context.partition, Partition::Captain);
        let t = event.context.timestamp.unwrap();
        assert_eq!(i64::from(t.seconds), DAQ_EPOCH_UNIX_SECONDS + 10);
        assert_eq!(t.nanoseconds, 1_002_003);

        let drift = event.container(DRIFT_DIGITS).unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift.digits[0].id, ChannelId::new(ChannelSystem::Tpc, 2, 5, 9));
        assert_eq!(drift.digits[0].samples, vec![1, 2, 3]);
        assert!(!drift.transient);

        assert_eq!(reader.next_event().unwrap().unwrap().context.event, 2);
        assert!(reader.next_event().unwrap().is_none());
        assert_eq!(reader.events_read(), 2);
    }

    #[test]
    fn test_invalid_timestamp_still_produces_event() {
        let bad = RecordBuilder::new(1, 1)
            .seconds(INVALID_CLOCK)
            .crate_block(CrateBuilder::new(1).seb_time(INVALID_CLOCK, INVALID_CLOCK).card(CardBuilder::new(1)));
        let mut reader = source(&[bad], UbdaqOptions::default());
        let event = reader.next_event().unwrap().unwrap();
        assert_eq!(event.context.timestamp, None);
    }

    #[test]
    fn test_seb_fallback() {
        let seb = RecordBuilder::new(1, 1)
            .seconds(INVALID_CLOCK)
            .crate_block(CrateBuilder::new(1).seb_time(1_400_000_000, 250).card(CardBuilder::new(1)));
        let mut reader = source(&[seb], UbdaqOptions::default());
        let event = reader.next_event().unwrap().unwrap();
        assert_eq!(event.context.timestamp, Some(Timestamp::new(1_400_000_000, 250_000)));
    }

    #[test]
    fn test_transient_every() {
        let options = UbdaqOptions {
            transient_every: Some(2),
            ..UbdaqOptions::default()
        };
        let mut reader = source(&[record(1), record(2), record(3)], options);
        let flags: Vec<bool> = (0..3)
            .map(|_| {
                let event = reader.next_event().unwrap().unwrap();
                event.container(DRIFT_DIGITS).unwrap().transient
            })
            .collect();
        assert_eq!(flags, vec![false, true, false]);
    }

    #[test]
    fn test_truncated_stream() {
        let mut bytes = record(1).encode();
        bytes.truncate(bytes.len() - 10);
        let mut reader = UbdaqReader::new(WordReader::new(Cursor::new(bytes)), UbdaqOptions::default());
        assert!(matches!(
            reader.next_event(),
            Err(DecodeError::TruncatedStream { .. })
        ));
    }
}
