use super::{expand_children, insert_child, Expand, Granularity, Payload};
use super::{CrateHeader, CrateRecord, CRATE_HEADER_BYTES};
use crate::clock::DAQ_EPOCH_UNIX_SECONDS;
use crate::config::{DecoderConfig, UbdaqOptions};
use crate::error::{DecodeError, Result};
use crate::parser;
use crate::reader::WordReader;
use crate::types::{ChannelDigit, ChannelId, ChannelSystem, Timestamp, INVALID_CLOCK};
use byteorder::{ByteOrder, NativeEndian};
use std::io::BufRead;
use tracing::{trace, warn};

/// Size of the global event header on the wire.
pub const GLOBAL_HEADER_BYTES: usize = 33;

/// The header that opens every UBDAQ event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalHeader {
    pub record_type: u8,
    pub record_origin: u8,
    pub run: u32,
    pub subrun: u32,
    pub event: u32,
    pub event_number_crate: u32,
    /// Seconds since 2012-01-01 UTC, or [`INVALID_CLOCK`]
    pub seconds: u32,
    pub milliseconds: u16,
    pub microseconds: u16,
    pub nanoseconds: u16,
    /// Bytes of record body following the header
    pub byte_count: u32,
    pub seb_count: u8,
}

impl GlobalHeader {
    pub(crate) fn read<R: BufRead>(reader: &mut WordReader<R>) -> Result<Self> {
        Ok(Self {
            record_type: reader.read_u8()?,
            record_origin: reader.read_u8()?,
            run: reader.read_u32()?,
            subrun: reader.read_u32()?,
            event: reader.read_u32()?,
            event_number_crate: reader.read_u32()?,
            seconds: reader.read_u32()?,
            milliseconds: reader.read_word()?,
            microseconds: reader.read_word()?,
            nanoseconds: reader.read_word()?,
            byte_count: reader.read_u32()?,
            seb_count: reader.read_u8()?,
        })
    }

    /// The global DAQ clock as unix time, if set.
    pub fn timestamp(&self) -> Option<Timestamp> {
        if self.seconds == INVALID_CLOCK {
            return None;
        }
        let seconds = u32::try_from(i64::from(self.seconds) + DAQ_EPOCH_UNIX_SECONDS).ok()?;
        let nanoseconds = u64::from(self.nanoseconds)
            + 1_000 * u64::from(self.microseconds)
            + 1_000_000 * u64::from(self.milliseconds);
        Timestamp::from_raw(seconds, u32::try_from(nanoseconds).ok()?)
    }
}

/// Beam instrumentation header. Carried through undecoded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BeamHeader {
    pub record_type: u8,
    pub event_signal: String,
    pub seconds: u32,
    pub milliseconds: u16,
    pub number_of_devices: u8,
    pub byte_count: u32,
}

/// Readings of one beam device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BeamDatum {
    pub device_name: String,
    pub units: String,
    pub values: Vec<f64>,
}

/// Beam instrumentation block of an event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BeamRecord {
    pub header: BeamHeader,
    pub data: Vec<BeamDatum>,
}

impl BeamRecord {
    /// Bytes this block occupies on the wire, presence flag excluded.
    pub fn encoded_len(&self) -> usize {
        let header = 1 + 2 + self.header.event_signal.len() + 4 + 2 + 1 + 4;
        let data: usize = self
            .data
            .iter()
            .map(|d| 2 + d.device_name.len() + 2 + d.units.len() + 4 + 8 * d.values.len())
            .sum();
        header + data
    }

    fn read<R: BufRead>(reader: &mut WordReader<R>) -> Result<Self> {
        let header = BeamHeader {
            record_type: reader.read_u8()?,
            event_signal: read_str16(reader)?,
            seconds: reader.read_u32()?,
            milliseconds: reader.read_word()?,
            number_of_devices: reader.read_u8()?,
            byte_count: reader.read_u32()?,
        };
        let mut data = Vec::with_capacity(usize::from(header.number_of_devices));
        for _ in 0..header.number_of_devices {
            let device_name = read_str16(reader)?;
            let units = read_str16(reader)?;
            let n = reader.read_u32()? as usize;
            let raw = reader.read_span(n.saturating_mul(8))?;
            let mut values = vec![0f64; n];
            NativeEndian::read_f64_into(&raw, &mut values);
            data.push(BeamDatum {
                device_name,
                units,
                values,
            });
        }
        Ok(Self { header, data })
    }
}

fn read_str16<R: BufRead>(reader: &mut WordReader<R>) -> Result<String> {
    let len = reader.read_word()?;
    let bytes = reader.read_span(usize::from(len))?;
    String::from_utf8(bytes)
        .map_err(|e| DecodeError::MalformedHeader(format!("beam string is not UTF-8: {}", e)))
}

/// One UBDAQ event: the global header and its crates.
///
/// A record starts collapsed at [`Granularity::Event`] holding the raw body.
/// Expanding to [`Granularity::Crate`] decodes the beam block and splits the
/// body into crates; finer granularities cascade into every crate.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    global_header: GlobalHeader,
    beam: Option<BeamRecord>,
    payload: Payload<CrateHeader, CrateRecord>,
    granularity: Granularity,
}

impl EventRecord {
    /// Creates a collapsed record from a header and its body bytes.
    pub fn new(global_header: GlobalHeader, body: Vec<u8>) -> Self {
        Self {
            global_header,
            beam: None,
            payload: Payload::Collapsed(body),
            granularity: Granularity::Event,
        }
    }

    /// Reads the next record from a stream.
    ///
    /// Returns `Ok(None)` if the stream is at its end before the header.
    pub fn read_from<R: BufRead>(reader: &mut WordReader<R>) -> Result<Option<Self>> {
        if reader.at_end()? {
            return Ok(None);
        }
        let header = GlobalHeader::read(reader)?;
        let body = reader.read_span(header.byte_count as usize)?;
        trace!(run = header.run, event = header.event, bytes = body.len(), "event record");
        Ok(Some(Self::new(header, body)))
    }

    /// Parses one record from the start of a byte buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = WordReader::new(bytes);
        Self::read_from(&mut reader)?.ok_or(DecodeError::TruncatedStream {
            offset: 0,
            needed: GLOBAL_HEADER_BYTES,
        })
    }

    #[inline]
    pub fn global_header(&self) -> &GlobalHeader {
        &self.global_header
    }

    /// Beam block, once expanded to crate granularity.
    pub fn beam(&self) -> Option<&BeamRecord> {
        self.beam.as_ref()
    }

    /// Raw body, until expanded.
    pub fn raw(&self) -> Option<&[u8]> {
        self.payload.raw()
    }

    /// Crates keyed by their header, once expanded.
    pub fn crates(&self) -> Option<&[(CrateHeader, CrateRecord)]> {
        self.payload.children()
    }

    /// Number of channels decoded so far.
    pub fn channel_count(&self) -> usize {
        self.channels().count()
    }

    /// Bytes of the record covered by the decoded structure, header
    /// included.
    pub fn consumed_bytes(&self) -> usize {
        let body = match &self.payload {
            Payload::Collapsed(raw) => raw.len(),
            Payload::Expanded(crates) => {
                1 + self.beam.as_ref().map_or(0, BeamRecord::encoded_len)
                    + crates
                        .iter()
                        .map(|(_, c)| CRATE_HEADER_BYTES + c.consumed_bytes() + 4)
                        .sum::<usize>()
            }
        };
        GLOBAL_HEADER_BYTES + body
    }

    /// Event time: the global clock if set, else the earliest crate clock.
    ///
    /// The crate clocks are only seen once the record is expanded to
    /// crate granularity.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.global_header.timestamp().or_else(|| {
            self.crates()?
                .iter()
                .filter(|(h, _)| h.seb_time_sec != INVALID_CLOCK && h.seb_time_usec != INVALID_CLOCK)
                .map(|(h, _)| (h.seb_time_sec, h.seb_time_usec))
                .min()
                .map(|(sec, usec)| Timestamp::new(sec, usec.saturating_mul(1_000)))
        })
    }

    /// Converts every channel into a digit, keeping the sample window
    /// selected by `options`.
    ///
    /// The record must already be expanded to channel granularity.
    pub fn digits(&self, options: &UbdaqOptions) -> Result<Vec<ChannelDigit>> {
        if self.granularity < Granularity::Channel {
            return Err(DecodeError::NotExpanded(Granularity::Channel));
        }
        let digits = self
            .channels()
            .map(|(crate_number, module, number, channel)| {
                let samples = channel.samples();
                let (begin, end) = options.sample_window(samples.len());
                let id = ChannelId::new(ChannelSystem::Tpc, crate_number, module, u32::from(number));
                ChannelDigit::new(id, begin, samples[begin..end].to_vec())
            })
            .collect();
        Ok(digits)
    }

    /// Walks all expanded channels as (crate number, module, channel, record).
    fn channels(&self) -> impl Iterator<Item = (u32, u32, u16, &super::ChannelRecord)> {
        self.crates().into_iter().flatten().flat_map(|(crate_header, crate_record)| {
            crate_record.cards().into_iter().flatten().flat_map(move |(card_header, card)| {
                card.channels().into_iter().flatten().map(move |(number, channel)| {
                    (crate_header.crate_number, card_header.module(), *number, channel)
                })
            })
        })
    }
}

impl Expand for EventRecord {
    fn granularity(&self) -> Granularity {
        self.granularity
    }

    fn expand_with(&mut self, to: Granularity, config: &DecoderConfig) -> Result<()> {
        if to <= self.granularity {
            return Ok(());
        }
        if let Some(beam) = self.payload.materialize(split_crates)? {
            self.beam = beam;
        }
        self.granularity = self.granularity.max(Granularity::Crate);
        expand_children(&mut self.payload, to, config)?;
        self.granularity = to;
        Ok(())
    }
}

/// Running out of body bytes before the end-of-event trailer.
fn exhausted(err: DecodeError) -> DecodeError {
    match err {
        DecodeError::TruncatedStream { offset, .. } => DecodeError::MissingEventTrailer {
            consumed: offset as usize,
        },
        other => other,
    }
}

/// Splits an event body into its beam block and crates.
///
/// There is no crate count: crates are read until one ends with the
/// end-of-event trailer, and every crate consumes at least its header, so
/// the scan always terminates at the end of the buffer.
fn split_crates(body: &[u8]) -> Result<(Vec<(CrateHeader, CrateRecord)>, Option<BeamRecord>)> {
    let mut reader = WordReader::new(body);
    let beam = match reader.read_u8().map_err(exhausted)? {
        0 => None,
        1 => Some(BeamRecord::read(&mut reader).map_err(exhausted)?),
        flag => {
            return Err(DecodeError::MalformedHeader(format!(
                "beam presence flag {}",
                flag
            )))
        }
    };

    let mut crates = Vec::new();
    loop {
        let header = CrateHeader::read(&mut reader).map_err(exhausted)?;
        let payload = reader
            .read_span(header.crate_bytes as usize)
            .map_err(exhausted)?;
        let trailer = reader.read_u32().map_err(exhausted)?;
        trace!(crate_number = header.crate_number, bytes = payload.len(), trailer, "crate");
        insert_child(&mut crates, header, CrateRecord::new(payload, trailer));
        if trailer == parser::END_OF_EVENT_TRAILER {
            break;
        }
    }

    let consumed = reader.offset() as usize;
    if consumed < body.len() {
        warn!(
            stray = body.len() - consumed,
            "ignoring bytes after end-of-event trailer"
        );
    }
    Ok((crates, beam))
}
