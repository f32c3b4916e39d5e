//! Reference encoders for both wire formats.
//!
//! The builders write exactly the layouts the decoders accept. They are used
//! by the test suites and benchmarks to produce synthetic input, and by
//! tools that need to fabricate small sample files.

use crate::parser::{self, CHANNEL_HEADER_FLAG, CRATE_EVENT_MARKER};
use crate::record::{BeamRecord, CrateHeader, GLOBAL_HEADER_BYTES};

/// Value written after every card block.
pub const CARD_TRAILER: u32 = 0xFFFF_E000;

// ============================================================================
// Crate/card/channel (UBDAQ) format
// ============================================================================

/// Builds one card block.
#[derive(Debug, Clone, Default)]
pub struct CardBuilder {
    module: u32,
    crate_id: u32,
    event: u32,
    frame: u32,
    channels: Vec<(u16, Vec<u16>)>,
}

impl CardBuilder {
    pub fn new(module: u32) -> Self {
        Self {
            module,
            ..Self::default()
        }
    }

    pub fn crate_id(mut self, crate_id: u32) -> Self {
        self.crate_id = crate_id;
        self
    }

    pub fn event(mut self, event: u32) -> Self {
        self.event = event;
        self
    }

    pub fn frame(mut self, frame: u32) -> Self {
        self.frame = frame;
        self
    }

    /// Appends a channel. Samples must fit in 12 bits.
    pub fn channel(mut self, number: u16, samples: Vec<u16>) -> Self {
        self.channels.push((number, samples));
        self
    }

    fn data_words(&self) -> Vec<u16> {
        let mut words = Vec::new();
        for (number, samples) in &self.channels {
            let number = parser::channel_number(*number);
            words.push(CHANNEL_HEADER_FLAG | number);
            words.extend(samples.iter().map(|s| s & 0x0FFF));
            words.push(parser::CHANNEL_TRAILER_MASK | number);
        }
        words
    }

    /// Header, channel data and trailer.
    pub fn encode(&self) -> Vec<u8> {
        let words = self.data_words();
        let checksum = words.iter().map(|w| u32::from(*w)).sum::<u32>() & 0xFF_FFFF;

        let mut out = Vec::with_capacity(20 + words.len() * 2 + 4);
        for header_word in [
            parser::pack_card_id(self.crate_id, self.module),
            parser::pack_split_24(words.len() as u32),
            parser::pack_split_24(self.event),
            parser::pack_split_24(self.frame),
            parser::pack_split_24(checksum),
        ] {
            push_u32(&mut out, header_word);
        }
        for word in words {
            push_u16(&mut out, word);
        }
        push_u32(&mut out, CARD_TRAILER);
        out
    }
}

/// Builds one crate block.
#[derive(Debug, Clone, Default)]
pub struct CrateBuilder {
    crate_number: u32,
    event_number: u32,
    seb_time_sec: u32,
    seb_time_usec: u32,
    cards: Vec<CardBuilder>,
}

impl CrateBuilder {
    pub fn new(crate_number: u32) -> Self {
        Self {
            crate_number,
            ..Self::default()
        }
    }

    pub fn event_number(mut self, event_number: u32) -> Self {
        self.event_number = event_number;
        self
    }

    pub fn seb_time(mut self, sec: u32, usec: u32) -> Self {
        self.seb_time_sec = sec;
        self.seb_time_usec = usec;
        self
    }

    pub fn card(mut self, card: CardBuilder) -> Self {
        self.cards.push(card);
        self
    }

    /// Returns the crate header and the crate payload it describes.
    pub fn encode(&self) -> (CrateHeader, Vec<u8>) {
        let mut payload = Vec::new();
        push_u32(&mut payload, CRATE_EVENT_MARKER);
        push_u32(&mut payload, self.event_number);
        for card in &self.cards {
            payload.extend(card.clone().crate_id(self.crate_number).encode());
        }
        let header = CrateHeader {
            crate_number: self.crate_number,
            crate_bytes: payload.len() as u32,
            seb_time_sec: self.seb_time_sec,
            seb_time_usec: self.seb_time_usec,
        };
        (header, payload)
    }
}

/// Builds a complete event record: global header and body.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    run: u32,
    subrun: u32,
    event: u32,
    seconds: u32,
    milliseconds: u16,
    microseconds: u16,
    nanoseconds: u16,
    beam: Option<BeamRecord>,
    crates: Vec<CrateBuilder>,
    end_trailer: u32,
}

impl RecordBuilder {
    pub fn new(run: u32, event: u32) -> Self {
        Self {
            run,
            subrun: 0,
            event,
            seconds: 0,
            milliseconds: 0,
            microseconds: 0,
            nanoseconds: 0,
            beam: None,
            crates: Vec::new(),
            end_trailer: parser::END_OF_EVENT_TRAILER,
        }
    }

    pub fn subrun(mut self, subrun: u32) -> Self {
        self.subrun = subrun;
        self
    }

    /// Seconds since the DAQ epoch, or the invalid clock sentinel.
    pub fn seconds(mut self, seconds: u32) -> Self {
        self.seconds = seconds;
        self
    }

    pub fn sub_second(mut self, milliseconds: u16, microseconds: u16, nanoseconds: u16) -> Self {
        self.milliseconds = milliseconds;
        self.microseconds = microseconds;
        self.nanoseconds = nanoseconds;
        self
    }

    pub fn beam(mut self, beam: BeamRecord) -> Self {
        self.beam = Some(beam);
        self
    }

    pub fn crate_block(mut self, block: CrateBuilder) -> Self {
        self.crates.push(block);
        self
    }

    /// Trailer written after the last crate; anything other than the
    /// end-of-event trailer yields a record that never terminates.
    pub fn end_trailer(mut self, trailer: u32) -> Self {
        self.end_trailer = trailer;
        self
    }

    /// Encodes the body: beam block and crate blocks.
    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match &self.beam {
            None => body.push(0),
            Some(beam) => {
                body.push(1);
                encode_beam(&mut body, beam);
            }
        }
        let last = self.crates.len().saturating_sub(1);
        for (i, block) in self.crates.iter().enumerate() {
            let (header, payload) = block.encode();
            push_u32(&mut body, header.crate_number);
            push_u32(&mut body, header.crate_bytes);
            push_u32(&mut body, header.seb_time_sec);
            push_u32(&mut body, header.seb_time_usec);
            body.extend(payload);
            let trailer = if i == last {
                self.end_trailer
            } else {
                parser::CRATE_TRAILER
            };
            push_u32(&mut body, trailer);
        }
        body
    }

    /// Encodes the whole record.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.encode_body();
        let mut out = Vec::with_capacity(GLOBAL_HEADER_BYTES + body.len());
        out.push(1); // record type
        out.push(0); // record origin
        push_u32(&mut out, self.run);
        push_u32(&mut out, self.subrun);
        push_u32(&mut out, self.event);
        push_u32(&mut out, self.event);
        push_u32(&mut out, self.seconds);
        push_u16(&mut out, self.milliseconds);
        push_u16(&mut out, self.microseconds);
        push_u16(&mut out, self.nanoseconds);
        push_u32(&mut out, body.len() as u32);
        out.push(self.crates.len() as u8);
        out.extend(body);
        out
    }
}

fn encode_beam(out: &mut Vec<u8>, beam: &BeamRecord) {
    out.push(beam.header.record_type);
    push_str16(out, &beam.header.event_signal);
    push_u32(out, beam.header.seconds);
    push_u16(out, beam.header.milliseconds);
    out.push(beam.data.len() as u8);
    push_u32(out, beam.header.byte_count);
    for datum in &beam.data {
        push_str16(out, &datum.device_name);
        push_str16(out, &datum.units);
        push_u32(out, datum.values.len() as u32);
        for value in &datum.values {
            out.extend_from_slice(&value.to_ne_bytes());
        }
    }
}

fn push_str16(out: &mut Vec<u8>, s: &str) {
    push_u16(out, s.len() as u16);
    out.extend_from_slice(s.as_bytes());
}

#[inline]
fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_ne_bytes());
}

#[inline]
fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_ne_bytes());
}

// ============================================================================
// Word-tagged (Nevis) format
// ============================================================================

/// Builds one word-tagged event.
#[derive(Debug, Clone, Default)]
pub struct NevisEventBuilder {
    run: u32,
    event: u32,
    status: u16,
    body: Vec<u16>,
}

impl NevisEventBuilder {
    pub fn new(run: u32, event: u32) -> Self {
        Self {
            run,
            event,
            ..Self::default()
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Appends a channel closed by a channel end word.
    pub fn channel(mut self, number: u16, samples: &[u16]) -> Self {
        let number = parser::word_data(number);
        self.body.push(u16::from(parser::FLAG_CHANNEL_START) << 12 | number);
        self.body.extend(samples.iter().map(|s| parser::word_data(*s)));
        self.body.push(u16::from(parser::FLAG_CHANNEL_END) << 12 | number);
        self
    }

    /// Appends an arbitrary word, e.g. a stray flag.
    pub fn raw_word(mut self, word: u16) -> Self {
        self.body.push(word);
        self
    }

    /// Encodes the event as words, barrier through end-of-event.
    pub fn words(&self) -> Vec<u16> {
        let split = |v: u32| [(v / 4095) as u16, (v % 4095) as u16];
        let size = (12 + self.body.len() + 1) as u32;

        let mut words = vec![0xFFFF; 3];
        words.push(self.status);
        words.extend(split(size));
        words.extend(split(self.event));
        words.extend(split(self.run));
        words.extend([0, 0]);
        words.extend(&self.body);
        words.push(u16::from(parser::FLAG_EVENT_END) << 12);
        words
    }

    /// Encodes the event as native-endian bytes.
    pub fn encode(&self) -> Vec<u8> {
        self.words().iter().flat_map(|w| w.to_ne_bytes()).collect()
    }
}
