use super::{expand_children, insert_child, overrun, ChannelRecord, Expand, Granularity, Payload};
use crate::config::DecoderConfig;
use crate::error::{DecodeError, Result};
use crate::parser;
use crate::reader::WordReader;
use byteorder::{ByteOrder, NativeEndian};
use std::io::BufRead;

/// Size of a card header on the wire.
pub const CARD_HEADER_BYTES: usize = 20;

/// The five header words that open a card (FEM) block.
///
/// Apart from the first word, each word packs a 24-bit value into two
/// 12-bit halves, see [`parser::split_24`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CardHeader {
    pub id_and_module: u32,
    pub word_count: u32,
    pub event: u32,
    pub frame: u32,
    pub checksum: u32,
}

impl CardHeader {
    pub(crate) fn read<R: BufRead>(reader: &mut WordReader<R>) -> Result<Self> {
        Ok(Self {
            id_and_module: reader.read_u32()?,
            word_count: reader.read_u32()?,
            event: reader.read_u32()?,
            frame: reader.read_u32()?,
            checksum: reader.read_u32()?,
        })
    }

    #[inline]
    pub fn module(&self) -> u32 {
        parser::card_module(self.id_and_module)
    }

    #[inline]
    pub fn crate_id(&self) -> u32 {
        parser::card_crate_id(self.id_and_module)
    }

    /// Number of 16-bit words of channel data.
    #[inline]
    pub fn data_words(&self) -> u32 {
        parser::split_24(self.word_count)
    }

    #[inline]
    pub fn event_number(&self) -> u32 {
        parser::split_24(self.event)
    }

    #[inline]
    pub fn frame_number(&self) -> u32 {
        parser::split_24(self.frame)
    }

    #[inline]
    pub fn checksum_value(&self) -> u32 {
        parser::split_24(self.checksum)
    }

    /// Bytes of channel data that follow the header.
    #[inline]
    pub fn data_size(&self) -> usize {
        self.data_words() as usize * 2
    }
}

/// One card's channel data.
#[derive(Debug, Clone, PartialEq)]
pub struct CardRecord {
    trailer: u32,
    payload: Payload<u16, ChannelRecord>,
}

impl CardRecord {
    /// Creates a collapsed card from its raw channel data.
    pub fn new(raw: Vec<u8>, trailer: u32) -> Self {
        Self {
            trailer,
            payload: Payload::Collapsed(raw),
        }
    }

    #[inline]
    pub fn trailer(&self) -> u32 {
        self.trailer
    }

    /// Raw channel data, until expanded.
    pub fn raw(&self) -> Option<&[u8]> {
        self.payload.raw()
    }

    /// Channels keyed by channel number, once expanded.
    pub fn channels(&self) -> Option<&[(u16, ChannelRecord)]> {
        self.payload.children()
    }

    /// Bytes of channel data this card covers.
    pub fn consumed_bytes(&self) -> usize {
        match &self.payload {
            Payload::Collapsed(raw) => raw.len(),
            Payload::Expanded(channels) => channels.iter().map(|(_, c)| c.consumed_bytes()).sum(),
        }
    }
}

impl Expand for CardRecord {
    fn granularity(&self) -> Granularity {
        if self.payload.is_expanded() {
            Granularity::Channel
        } else {
            Granularity::Card
        }
    }

    fn expand_with(&mut self, to: Granularity, config: &DecoderConfig) -> Result<()> {
        if to <= self.granularity() {
            return Ok(());
        }
        let cap = config.card_sample_cap;
        self.payload.materialize(|raw| Ok((split_channels(raw, cap)?, ())))?;
        expand_children(&mut self.payload, to, config)
    }
}

// Channels never expand further.
impl Expand for ChannelRecord {
    fn granularity(&self) -> Granularity {
        Granularity::Channel
    }

    fn expand_with(&mut self, _to: Granularity, _config: &DecoderConfig) -> Result<()> {
        Ok(())
    }
}

/// Splits card data into channels.
///
/// Each channel is a header word, sample words, and a trailer word with a
/// bit of [`parser::CHANNEL_TRAILER_MASK`] set.
fn split_channels(raw: &[u8], cap: usize) -> Result<Vec<(u16, ChannelRecord)>> {
    let mut channels = Vec::new();
    let mut pos = 0;
    let word_at = |pos: usize, what: &str| -> Result<u16> {
        raw.get(pos..pos + 2)
            .map(NativeEndian::read_u16)
            .ok_or_else(|| {
                overrun(what)(DecodeError::TruncatedStream {
                    offset: pos as u64,
                    needed: 2 - raw.len().saturating_sub(pos).min(2),
                })
            })
    };

    while pos < raw.len() {
        let header = word_at(pos, "channel header")?;
        pos += 2;
        let number = parser::channel_number(header);

        let start = pos;
        let trailer = loop {
            let word = word_at(pos, "channel data")?;
            pos += 2;
            if parser::is_channel_trailer(word) {
                break word;
            }
            if (pos - start) / 2 > cap {
                return Err(DecodeError::SampleCapExceeded {
                    channel: u32::from(number),
                    limit: cap,
                });
            }
        };

        let samples = raw[start..pos - 2].to_vec();
        insert_child(&mut channels, number, ChannelRecord::new(header, trailer, samples));
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    #[test]
    fn test_card_header_fields() {
        let header = CardHeader {
            id_and_module: parser::pack_card_id(2, 9),
            word_count: parser::pack_split_24(6),
            event: parser::pack_split_24(0x12345),
            frame: parser::pack_split_24(77),
            checksum: parser::pack_split_24(0xABC),
        };
        assert_eq!(header.module(), 9);
        assert_eq!(header.crate_id(), 2);
        assert_eq!(header.data_words(), 6);
        assert_eq!(header.data_size(), 12);
        assert_eq!(header.event_number(), 0x12345);
        assert_eq!(header.frame_number(), 77);
        assert_eq!(header.checksum_value(), 0xABC);
    }

    #[test]
    fn test_expand_channels() {
        let raw = bytes(&[0x4001, 10, 11, 12, 0x5001, 0x4002, 0x5002, 0x4003, 7, 0x5003]);
        let size = raw.len();
        let mut card = CardRecord::new(raw, 0);
        assert_eq!(card.granularity(), Granularity::Card);

        card.expand(Granularity::Channel).unwrap();
        assert_eq!(card.granularity(), Granularity::Channel);
        assert!(card.raw().is_none());

        let channels = card.channels().unwrap();
        let numbers: Vec<u16> = channels.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(channels[0].1.samples(), vec![10, 11, 12]);
        assert!(channels[1].1.samples().is_empty());
        assert_eq!(channels[2].1.trailer(), 0x5003);
        assert_eq!(card.consumed_bytes(), size);
    }

    #[test]
    fn test_expand_is_idempotent() {
        let mut card = CardRecord::new(bytes(&[0x4001, 1, 0x5001]), 0);
        card.expand(Granularity::Channel).unwrap();
        card.expand(Granularity::Channel).unwrap();
        card.expand(Granularity::Card).unwrap();
        assert_eq!(card.channels().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_channel_trailer() {
        let mut card = CardRecord::new(bytes(&[0x4001, 1, 2]), 0);
        let err = card.expand(Granularity::Channel).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader(_)));
        // The card stays collapsed
        assert!(card.raw().is_some());
    }

    #[test]
    fn test_sample_cap() {
        let config = DecoderConfig {
            card_sample_cap: 3,
            ..DecoderConfig::default()
        };
        let mut card = CardRecord::new(bytes(&[0x4005, 1, 2, 3, 0x5005]), 0);
        card.expand_with(Granularity::Channel, &config).unwrap();

        let mut card = CardRecord::new(bytes(&[0x4005, 1, 2, 3, 4, 0x5005]), 0);
        let err = card.expand_with(Granularity::Channel, &config).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::SampleCapExceeded {
                channel: 5,
                limit: 3
            }
        ));
    }
}
