//! Decoder for the word-tagged (Nevis) TPC stream.
//!
//! Each 16-bit word carries a 4-bit flag and 12 bits of data. An event
//! opens with three barrier words (`0xFFFF`), followed by a fixed header and
//! a run of channels:
//!
//! ```text
//! FFFF FFFF FFFF               barrier
//! status
//! size_hi size_lo              event size   (4095 * hi + lo)
//! event_hi event_lo            event number (4095 * hi + lo)
//! run_hi run_lo                run number   (4095 * hi + lo)
//! reserved reserved
//! 4ccc 0sss 0sss ... 5xxx      channel ccc with samples sss
//! ...
//! Exxx                         end of event
//! ```

use crate::config::DecoderConfig;
use crate::error::{DecodeError, Result};
use crate::event::{Event, EventSource, DRIFT_DIGITS};
use crate::parser::{
    self, FLAG_BARRIER, FLAG_CHANNEL_END, FLAG_CHANNEL_START, FLAG_EVENT_END, FLAG_SAMPLE,
};
use crate::reader::{Compression, WordReader};
use crate::types::{ChannelDigit, ChannelId, ChannelSystem, EventContext};
use std::io::BufRead;
use std::path::Path;
use tracing::{debug, info, warn};

/// Number of barrier words that open an event.
const BARRIER_WORDS: usize = 3;

/// One event decoded from the word-tagged stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NevisEvent {
    /// Run and event number; this format carries no subrun or clock
    pub context: EventContext,
    /// Status word following the barrier (not interpreted)
    pub status: u16,
    /// Approximate number of words in the event as reported by the DAQ
    pub event_size: u32,
    /// Channel digits in stream order
    pub digits: Vec<ChannelDigit>,
}

impl NevisEvent {
    /// Converts into an [`Event`] with the digits stored under
    /// `digits/drift`.
    pub fn into_event(self) -> Event {
        let mut event = Event::new(self.context);
        event.container_or_insert(DRIFT_DIGITS).digits = self.digits;
        event
    }
}

/// Stateless apart from diagnostics counters.
#[derive(Debug, Default)]
pub struct NevisDecoder {
    config: DecoderConfig,
    unexpected_flags: u64,
}

impl NevisDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            unexpected_flags: 0,
        }
    }

    /// Number of stray words skipped so far.
    pub fn unexpected_flags(&self) -> u64 {
        self.unexpected_flags
    }

    /// Decodes one event starting at the reader's current position.
    ///
    /// Any error invalidates the event; the decoder does not try to find
    /// the next barrier.
    pub fn decode_event<R: BufRead>(&mut self, reader: &mut WordReader<R>) -> Result<NevisEvent> {
        for index in 0..BARRIER_WORDS {
            let word = reader.read_word()?;
            if !parser::is_barrier(word) {
                return Err(DecodeError::MalformedBarrier { index, word });
            }
        }

        let status = reader.read_word()?;
        let event_size = read_combined(reader)?;
        let event_number = read_combined(reader)?;
        let run_number = read_combined(reader)?;

        // Two reserved words
        reader.read_word()?;
        reader.read_word()?;

        let context = EventContext::new(run_number as i32, event_number as i32);
        debug!(%context, event_size, "decoding nevis event");

        let mut digits = Vec::new();
        loop {
            let word = reader.read_word()?;
            match parser::word_flag(word) {
                FLAG_CHANNEL_START => {
                    let channel = u32::from(parser::word_data(word));
                    let (samples, terminator) = self.read_channel(reader, channel)?;
                    let id = ChannelId::new(ChannelSystem::Mc, 0, 0, channel);
                    digits.push(ChannelDigit::new(id, 0, samples));

                    match parser::word_flag(terminator) {
                        FLAG_CHANNEL_END => continue,
                        FLAG_EVENT_END => break,
                        _ => self.unexpected(terminator),
                    }
                }
                FLAG_SAMPLE => continue,
                FLAG_EVENT_END => break,
                _ => self.unexpected(word),
            }
        }

        Ok(NevisEvent {
            context,
            status,
            event_size,
            digits,
        })
    }

    /// Reads sample words until a word with a non-zero flag, which is
    /// returned alongside the samples.
    fn read_channel<R: BufRead>(
        &self,
        reader: &mut WordReader<R>,
        channel: u32,
    ) -> Result<(Vec<u16>, u16)> {
        let limit = self.config.nevis_sample_cap;
        let mut samples = Vec::new();
        loop {
            let word = reader.read_word()?;
            if parser::word_flag(word) != FLAG_SAMPLE {
                return Ok((samples, word));
            }
            if samples.len() >= limit {
                return Err(DecodeError::OverlongChannel { channel, limit });
            }
            samples.push(parser::word_data(word));
        }
    }

    fn unexpected(&mut self, word: u16) {
        self.unexpected_flags += 1;
        let err = DecodeError::UnexpectedFlag {
            flag: parser::word_flag(word),
            data: parser::word_data(word),
        };
        warn!("{}", err);
    }
}

fn read_combined<R: BufRead>(reader: &mut WordReader<R>) -> Result<u32> {
    let high = reader.read_word()?;
    let low = reader.read_word()?;
    Ok(parser::combine_4095(high, low))
}

/// Event source reading a word-tagged file.
pub struct NevisReader<R: BufRead> {
    reader: WordReader<R>,
    decoder: NevisDecoder,
    events_read: usize,
}

impl NevisReader<Box<dyn BufRead>> {
    /// Opens a file; gzip compressed files are detected from their content.
    pub fn open<P: AsRef<Path>>(path: P, config: DecoderConfig) -> Result<Self> {
        let path = path.as_ref();
        let compression = Compression::sniff(path)?;
        info!(path = %path.display(), ?compression, "opened nevis file");
        Ok(Self::new(WordReader::open(path, compression)?, config))
    }
}

impl<R: BufRead> NevisReader<R> {
    pub fn new(reader: WordReader<R>, config: DecoderConfig) -> Self {
        Self {
            reader,
            decoder: NevisDecoder::new(config),
            events_read: 0,
        }
    }

    /// Number of stray words skipped so far.
    pub fn unexpected_flags(&self) -> u64 {
        self.decoder.unexpected_flags()
    }
}

impl<R: BufRead> EventSource for NevisReader<R> {
    fn next_event(&mut self) -> Result<Option<Event>> {
        if self.reader.at_end()? {
            return Ok(None);
        }
        let event = self.decoder.decode_event(&mut self.reader)?;
        self.events_read += 1;
        Ok(Some(event.into_event()))
    }

    fn events_read(&self) -> usize {
        self.events_read
    }
}

/// Word statistics for a raw word-tagged stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordScan {
    /// Total words read
    pub words: u64,
    /// Words seen for each of the 16 flag values
    pub flag_counts: [u64; 16],
    /// Word offsets where a run of barrier words begins
    pub barrier_offsets: Vec<u64>,
    /// The stream ended on an odd byte or the source failed
    pub truncated: bool,
}

impl WordScan {
    /// Number of channel start words.
    pub fn channels(&self) -> u64 {
        self.flag_counts[FLAG_CHANNEL_START as usize]
    }

    /// Number of sample (flag 0) words.
    pub fn samples(&self) -> u64 {
        self.flag_counts[FLAG_SAMPLE as usize]
    }
}

/// Walks a whole word stream without building events.
pub fn scan_words<R: BufRead>(reader: &mut WordReader<R>) -> WordScan {
    let mut scan = WordScan::default();
    let mut in_barrier = false;
    loop {
        match reader.at_end() {
            Ok(true) => break,
            Ok(false) => {}
            Err(_) => {
                scan.truncated = true;
                break;
            }
        }
        let word = match reader.read_word() {
            Ok(word) => word,
            Err(_) => {
                scan.truncated = true;
                break;
            }
        };
        let flag = parser::word_flag(word);
        scan.flag_counts[flag as usize] += 1;
        let barrier = flag == FLAG_BARRIER && parser::is_barrier(word);
        if barrier && !in_barrier {
            scan.barrier_offsets.push(scan.words);
        }
        in_barrier = barrier;
        scan.words += 1;
    }
    scan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, BufReader, Cursor, Read};

    fn header(event: u32, run: u32) -> Vec<u16> {
        vec![
            0xFFFF,
            0xFFFF,
            0xFFFF,
            0x0000,
            0x0000,
            0x0010,
            (event / 4095) as u16,
            (event % 4095) as u16,
            (run / 4095) as u16,
            (run % 4095) as u16,
            0x0000,
            0x0000,
        ]
    }

    fn reader(words: &[u16]) -> WordReader<Cursor<Vec<u8>>> {
        WordReader::new(Cursor::new(
            words.iter().flat_map(|w| w.to_ne_bytes()).collect(),
        ))
    }

    /// Source that fails every read.
    struct FailingSource;

    impl Read for FailingSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "connection reset"))
        }
    }

    type FailingReader = WordReader<BufReader<io::Chain<Cursor<Vec<u8>>, FailingSource>>>;

    fn failing_after(words: &[u16]) -> FailingReader {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_ne_bytes()).collect();
        WordReader::new(BufReader::new(Cursor::new(bytes).chain(FailingSource)))
    }

    #[test]
    fn test_decode_single_channel() {
        let mut words = header(12, 3);
        words.extend([0x4007, 0x0001, 0x0002, 0x0003, 0x0004, 0x0005, 0x5007, 0xE000]);

        let mut decoder = NevisDecoder::default();
        let event = decoder.decode_event(&mut reader(&words)).unwrap();

        assert_eq!(event.context.event, 12);
        assert_eq!(event.context.run, 3);
        assert!(event.context.timestamp.is_none());
        assert_eq!(event.digits.len(), 1);
        assert_eq!(event.digits[0].id.channel, 7);
        assert_eq!(event.digits[0].samples, vec![1, 2, 3, 4, 5]);
        assert_eq!(decoder.unexpected_flags(), 0);
    }

    #[test]
    fn test_base_4095_numbers() {
        let mut words = header(5000, 9000);
        words.push(0xE000);
        let event = NevisDecoder::default()
            .decode_event(&mut reader(&words))
            .unwrap();
        assert_eq!(event.context.event, 5000);
        assert_eq!(event.context.run, 9000);
    }

    #[test]
    fn test_channel_closed_by_event_end() {
        let mut words = header(1, 1);
        words.extend([0x4001, 0x0010, 0xE000]);
        let event = NevisDecoder::default()
            .decode_event(&mut reader(&words))
            .unwrap();
        assert_eq!(event.digits.len(), 1);
        assert_eq!(event.digits[0].samples, vec![0x10]);
    }

    #[test]
    fn test_malformed_barrier() {
        let mut words = header(1, 1);
        words[1] = 0xFFFE;
        let err = NevisDecoder::default()
            .decode_event(&mut reader(&words))
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MalformedBarrier {
                index: 1,
                word: 0xFFFE
            }
        ));
    }

    #[test]
    fn test_stray_words_are_skipped() {
        let mut words = header(1, 1);
        words.extend([0x0000, 0x7123, 0x4002, 0x0001, 0x5002, 0x9000, 0xE000]);
        let mut decoder = NevisDecoder::default();
        let event = decoder.decode_event(&mut reader(&words)).unwrap();
        assert_eq!(event.digits.len(), 1);
        assert_eq!(decoder.unexpected_flags(), 2);
    }

    #[test]
    fn test_channel_ended_by_unexpected_flag() {
        let mut words = header(1, 1);
        words.extend([0x4001, 0x0011, 0x0012, 0x7005, 0x4002, 0x0021, 0x5002, 0xE000]);
        let mut decoder = NevisDecoder::default();
        let event = decoder.decode_event(&mut reader(&words)).unwrap();

        assert_eq!(event.digits.len(), 2);
        assert_eq!(event.digits[0].id.channel, 1);
        assert_eq!(event.digits[0].samples, vec![0x11, 0x12]);
        assert_eq!(event.digits[1].id.channel, 2);
        assert_eq!(event.digits[1].samples, vec![0x21]);
        assert_eq!(decoder.unexpected_flags(), 1);
    }

    #[test]
    fn test_channel_start_does_not_end_channel() {
        // The second start word closes channel 1 as a stray terminator and
        // does not open channel 2; its samples and end word are skipped.
        let mut words = header(1, 1);
        words.extend([0x4001, 0x0011, 0x4002, 0x0021, 0x5002, 0x4003, 0x0031, 0x5003, 0xE000]);
        let mut decoder = NevisDecoder::default();
        let event = decoder.decode_event(&mut reader(&words)).unwrap();

        assert_eq!(event.digits.len(), 2);
        assert_eq!(event.digits[0].id.channel, 1);
        assert_eq!(event.digits[0].samples, vec![0x11]);
        assert_eq!(event.digits[1].id.channel, 3);
        assert_eq!(event.digits[1].samples, vec![0x31]);
        assert_eq!(decoder.unexpected_flags(), 2);
    }

    #[test]
    fn test_overlong_channel() {
        let config = DecoderConfig {
            nevis_sample_cap: 4,
            ..DecoderConfig::default()
        };
        let mut words = header(1, 1);
        words.extend([0x4003, 1, 2, 3, 4, 5, 0x5003, 0xE000]);
        let err = NevisDecoder::new(config)
            .decode_event(&mut reader(&words))
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::OverlongChannel {
                channel: 3,
                limit: 4
            }
        ));

        // Exactly at the cap is accepted
        let mut words = header(1, 1);
        words.extend([0x4003, 1, 2, 3, 4, 0x5003, 0xE000]);
        assert!(NevisDecoder::new(config)
            .decode_event(&mut reader(&words))
            .is_ok());
    }

    #[test]
    fn test_truncated_event() {
        let mut words = header(1, 1);
        words.extend([0x4003, 1, 2]);
        let err = NevisDecoder::default()
            .decode_event(&mut reader(&words))
            .unwrap_err();
        assert!(matches!(err, DecodeError::TruncatedStream { .. }));
    }

    #[test]
    fn test_reader_stops_at_end() {
        let mut words = header(1, 1);
        words.push(0xE000);
        words.extend(header(2, 1));
        words.push(0xE000);
        let mut source = NevisReader::new(reader(&words), DecoderConfig::default());
        assert_eq!(source.next_event().unwrap().unwrap().context.event, 1);
        assert_eq!(source.next_event().unwrap().unwrap().context.event, 2);
        assert!(source.next_event().unwrap().is_none());
        assert_eq!(source.events_read(), 2);
    }

    #[test]
    fn test_source_error_after_event() {
        let mut words = header(1, 1);
        words.extend([0x4001, 0x0001, 0x5001, 0xE000]);
        let mut source = NevisReader::new(failing_after(&words), DecoderConfig::default());

        assert_eq!(source.next_event().unwrap().unwrap().context.event, 1);
        match source.next_event() {
            Err(DecodeError::TruncatedStream { offset, .. }) => {
                assert_eq!(offset, 2 * words.len() as u64)
            }
            other => panic!("expected truncation, got {:?}", other),
        }
        assert_eq!(source.events_read(), 1);
    }

    #[test]
    fn test_scan_words_source_error() {
        let mut words = header(1, 1);
        words.push(0xE000);
        let scan = scan_words(&mut failing_after(&words));
        assert_eq!(scan.words, words.len() as u64);
        assert!(scan.truncated);
    }

    #[test]
    fn test_scan_words() {
        let mut words = header(1, 1);
        words.extend([0x4001, 0x0001, 0x0002, 0x5001, 0xE000]);
        words.extend(header(2, 1));
        let scan = scan_words(&mut reader(&words));
        assert_eq!(scan.words, words.len() as u64);
        assert_eq!(scan.barrier_offsets, vec![0, 17]);
        assert_eq!(scan.channels(), 1);
        assert!(!scan.truncated);
    }
}
