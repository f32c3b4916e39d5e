use super::{expand_children, insert_child, overrun, CardHeader, CardRecord, Expand, Granularity, Payload};
use super::CARD_HEADER_BYTES;
use crate::config::DecoderConfig;
use crate::error::{DecodeError, Result};
use crate::parser;
use crate::reader::WordReader;
use std::io::BufRead;
use tracing::trace;

/// Size of a crate header on the wire.
pub const CRATE_HEADER_BYTES: usize = 16;

/// Size of the event header that opens a crate payload.
const CRATE_EVENT_HEADER_BYTES: usize = 8;

/// Header of one crate (SEB) block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CrateHeader {
    pub crate_number: u32,
    /// Bytes of payload following this header
    pub crate_bytes: u32,
    pub seb_time_sec: u32,
    pub seb_time_usec: u32,
}

impl CrateHeader {
    pub(crate) fn read<R: BufRead>(reader: &mut WordReader<R>) -> Result<Self> {
        Ok(Self {
            crate_number: reader.read_u32()?,
            crate_bytes: reader.read_u32()?,
            seb_time_sec: reader.read_u32()?,
            seb_time_usec: reader.read_u32()?,
        })
    }
}

/// Event header written by a crate at the start of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrateEventHeader {
    pub marker: u32,
    pub event_number: u32,
}

/// One crate's cards.
#[derive(Debug, Clone, PartialEq)]
pub struct CrateRecord {
    trailer: u32,
    event_header: Option<CrateEventHeader>,
    payload: Payload<CardHeader, CardRecord>,
    granularity: Granularity,
}

impl CrateRecord {
    /// Creates a collapsed crate from its raw payload.
    pub fn new(raw: Vec<u8>, trailer: u32) -> Self {
        Self {
            trailer,
            event_header: None,
            payload: Payload::Collapsed(raw),
            granularity: Granularity::Crate,
        }
    }

    #[inline]
    pub fn trailer(&self) -> u32 {
        self.trailer
    }

    /// The crate's event header, once expanded to card granularity.
    pub fn event_header(&self) -> Option<&CrateEventHeader> {
        self.event_header.as_ref()
    }

    /// Raw payload, until expanded.
    pub fn raw(&self) -> Option<&[u8]> {
        self.payload.raw()
    }

    /// Cards keyed by their header, once expanded.
    pub fn cards(&self) -> Option<&[(CardHeader, CardRecord)]> {
        self.payload.children()
    }

    /// Bytes of payload this crate covers.
    pub fn consumed_bytes(&self) -> usize {
        match &self.payload {
            Payload::Collapsed(raw) => raw.len(),
            Payload::Expanded(cards) => {
                CRATE_EVENT_HEADER_BYTES
                    + cards
                        .iter()
                        .map(|(_, card)| CARD_HEADER_BYTES + card.consumed_bytes() + 4)
                        .sum::<usize>()
            }
        }
    }
}

impl Expand for CrateRecord {
    fn granularity(&self) -> Granularity {
        self.granularity
    }

    fn expand_with(&mut self, to: Granularity, config: &DecoderConfig) -> Result<()> {
        if to <= self.granularity {
            return Ok(());
        }
        if let Some(header) = self.payload.materialize(split_cards)? {
            self.event_header = Some(header);
        }
        // Cards are in place even if a card below fails to expand
        self.granularity = self.granularity.max(Granularity::Card);
        expand_children(&mut self.payload, to, config)?;
        self.granularity = to;
        Ok(())
    }
}

/// Splits a crate payload into cards: an event header, then card header,
/// card data and card trailer until the payload is used up.
fn split_cards(raw: &[u8]) -> Result<(Vec<(CardHeader, CardRecord)>, CrateEventHeader)> {
    let mut reader = WordReader::new(raw);
    let event_header = CrateEventHeader {
        marker: reader.read_u32().map_err(overrun("crate event header"))?,
        event_number: reader.read_u32().map_err(overrun("crate event header"))?,
    };
    if event_header.marker != parser::CRATE_EVENT_MARKER {
        return Err(DecodeError::MalformedHeader(format!(
            "crate event header marker {:#010x}",
            event_header.marker
        )));
    }

    let mut cards = Vec::new();
    while !reader.at_end()? {
        let header = CardHeader::read(&mut reader).map_err(overrun("card header"))?;
        if !parser::has_card_marker(header.id_and_module) {
            return Err(DecodeError::MalformedHeader(format!(
                "card header word {:#010x} at byte {}",
                header.id_and_module,
                reader.offset() - CARD_HEADER_BYTES as u64
            )));
        }
        let data = reader
            .read_span(header.data_size())
            .map_err(overrun("card data"))?;
        let trailer = reader.read_u32().map_err(overrun("card trailer"))?;
        trace!(module = header.module(), bytes = data.len(), "card");
        insert_child(&mut cards, header, CardRecord::new(data, trailer));
    }
    Ok((cards, event_header))
}
