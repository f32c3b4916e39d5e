use crate::parser;
use byteorder::{ByteOrder, NativeEndian};

/// One channel of a card: the finest record level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    header: u16,
    trailer: u16,
    raw: Vec<u8>,
}

impl ChannelRecord {
    pub fn new(header: u16, trailer: u16, raw: Vec<u8>) -> Self {
        Self {
            header,
            trailer,
            raw,
        }
    }

    #[inline]
    pub fn channel_number(&self) -> u16 {
        parser::channel_number(self.header)
    }

    #[inline]
    pub fn header(&self) -> u16 {
        self.header
    }

    #[inline]
    pub fn trailer(&self) -> u16 {
        self.trailer
    }

    /// Raw sample bytes between header and trailer.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    #[inline]
    pub fn sample_count(&self) -> usize {
        self.raw.len() / 2
    }

    /// Decodes the samples. The bytes are copied out word by word, so the
    /// raw buffer need not be aligned.
    pub fn samples(&self) -> Vec<u16> {
        let mut samples = vec![0u16; self.sample_count()];
        NativeEndian::read_u16_into(&self.raw[..samples.len() * 2], &mut samples);
        samples
    }

    /// Bytes this channel occupied in the card, header and trailer included.
    pub fn consumed_bytes(&self) -> usize {
        self.raw.len() + 4
    }
}
